//! Adapter interfaces for external services.
//!
//! Every stage backend implements [`Backend`] for its request/output pair;
//! the stage adapter in `core::stage` chains a primary and a fallback.
//! Uploading has its own [`Uploader`] trait because its failures are
//! classified (transient vs permanent) instead of falling back.

pub mod elevenlabs;
pub mod gemini;
pub mod local_render;
pub mod media;
pub mod piper;
pub mod stock_render;
pub mod template;
pub mod youtube;

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{ContentUnit, NarrationArtifact, Script, UnitId, VideoMetadata};

pub use elevenlabs::ElevenLabsBackend;
pub use gemini::GeminiBackend;
pub use local_render::LocalRenderer;
pub use piper::PiperBackend;
pub use stock_render::StockRenderer;
pub use template::TemplateBackend;
pub use youtube::YouTubeUploader;

/// Failure reported by a single backend attempt
#[derive(Debug, Clone, Error, PartialEq)]
pub enum BackendError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("{0}")]
    Failed(String),
}

impl BackendError {
    /// Classify a non-success HTTP response
    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let body = body.trim();
        let snippet: String = body.chars().take(300).collect();
        if status.as_u16() == 429 {
            Self::RateLimited(format!("HTTP {}: {}", status, snippet))
        } else if status.is_server_error() {
            Self::Unavailable(format!("HTTP {}: {}", status, snippet))
        } else {
            Self::Failed(format!("HTTP {}: {}", status, snippet))
        }
    }
}

impl From<std::io::Error> for BackendError {
    fn from(e: std::io::Error) -> Self {
        Self::Failed(format!("io: {}", e))
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::Malformed(e.to_string())
        } else if e.is_connect() || e.is_timeout() {
            Self::Unavailable(e.to_string())
        } else {
            Self::Failed(e.to_string())
        }
    }
}

/// One concrete implementation of a stage capability
#[async_trait]
pub trait Backend<I, O>: Send + Sync
where
    I: Sync,
    O: Send,
{
    /// Human-readable backend name (recorded in run logs)
    fn name(&self) -> &str;

    /// Produce the stage output for `input`
    async fn produce(&self, input: &I) -> Result<O, BackendError>;
}

/// Input to the Content stage
#[derive(Debug, Clone)]
pub struct ContentRequest {
    pub niche: String,
    pub topic: String,
    /// Target narration length
    pub duration_secs: u32,
}

/// Input to the Narration stage
#[derive(Debug, Clone)]
pub struct NarrationRequest {
    pub unit_id: UnitId,
    pub text: String,
    /// Directory the audio file is written to
    pub output_dir: PathBuf,
    /// Speech rate multiplier (1.0 = normal)
    pub speed: f32,
}

impl NarrationRequest {
    /// Output path for a given extension, keyed by unit id
    pub fn output_path(&self, extension: &str) -> PathBuf {
        self.output_dir
            .join(format!("{}.{}", self.unit_id, extension))
    }
}

/// Output of a narration backend
#[derive(Debug, Clone)]
pub struct Narration {
    pub path: PathBuf,
    pub duration_secs: f64,
}

/// Input to the Render stage
#[derive(Debug, Clone)]
pub struct RenderRequest {
    pub unit: ContentUnit,
    pub narration: NarrationArtifact,
    pub output_path: PathBuf,
    /// Per-unit scratch directory (captions, downloaded media)
    pub work_dir: PathBuf,
    pub resolution: (u32, u32),
    pub fps: u32,
    /// Hard cap on video length
    pub max_duration_secs: Option<f64>,
}

impl RenderRequest {
    /// Length of the rendered video
    pub fn target_duration(&self) -> f64 {
        let d = self.narration.duration_secs;
        match self.max_duration_secs {
            Some(max) if max > 0.0 => d.min(max),
            _ => d,
        }
    }
}

/// Output of a render backend
#[derive(Debug, Clone)]
pub struct RenderedVideo {
    pub path: PathBuf,
    pub clips: Vec<String>,
}

pub type ContentBackend = dyn Backend<ContentRequest, Script>;
pub type NarrationBackend = dyn Backend<NarrationRequest, Narration>;
pub type RenderBackend = dyn Backend<RenderRequest, RenderedVideo>;

/// Kinds of upload errors that retrying cannot fix
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermanentKind {
    /// Credential missing, expired or lacking scope
    Auth,
    /// Metadata or file rejected by the platform
    Metadata,
    /// Platform-side upload limit reached
    Quota,
}

impl std::fmt::Display for PermanentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            PermanentKind::Auth => "auth",
            PermanentKind::Metadata => "metadata",
            PermanentKind::Quota => "quota",
        })
    }
}

/// Upload failure, classified for the publish retry policy
#[derive(Debug, Clone, Error, PartialEq)]
pub enum UploadError {
    #[error("transient upload error: {0}")]
    Transient(String),

    #[error("permanent upload error ({kind}): {message}")]
    Permanent { kind: PermanentKind, message: String },
}

/// Video-hosting upload client
#[async_trait]
pub trait Uploader: Send + Sync {
    fn name(&self) -> &str;

    /// Upload a video and return the platform-assigned id
    async fn upload(&self, video: &Path, metadata: &VideoMetadata) -> Result<String, UploadError>;

    /// Public URL for a platform video id
    fn video_url(&self, video_id: &str) -> String;
}
