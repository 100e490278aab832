//! Artifacts produced by the Narration and Render stages.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::content::UnitId;

/// Which backend in a stage's chain produced an artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendRole {
    Primary,
    Fallback,
}

/// Narration audio for one content unit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NarrationArtifact {
    pub unit_id: UnitId,

    /// Audio file on disk
    pub path: PathBuf,

    pub duration_secs: f64,

    /// Name of the engine that produced the audio
    pub engine: String,

    pub role: BackendRole,

    pub created_at: DateTime<Utc>,
}

/// Rendered video for one content unit (terminal artifact before publish)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderArtifact {
    pub unit_id: UnitId,

    /// Video file on disk
    pub path: PathBuf,

    /// (width, height)
    pub resolution: (u32, u32),

    pub fps: u32,

    /// Media clips or images used in the render
    pub clips: Vec<String>,

    pub renderer: String,

    pub role: BackendRole,

    pub created_at: DateTime<Utc>,
}
