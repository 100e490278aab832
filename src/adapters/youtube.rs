//! YouTube Data API v3 uploader.
//!
//! Uses the resumable upload protocol: one POST carrying the metadata opens
//! a session, one PUT sends the file. Auth is an OAuth access token from
//! YOUTUBE_ACCESS_TOKEN; token refresh is left to whoever provisions it.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::{PermanentKind, UploadError, Uploader};
use crate::domain::VideoMetadata;

const DEFAULT_ENDPOINT: &str = "https://www.googleapis.com/upload/youtube/v3";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

pub struct YouTubeUploader {
    access_token: Option<String>,
    endpoint: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct InsertResponse {
    id: String,
}

impl YouTubeUploader {
    pub fn new(access_token: Option<String>) -> Self {
        Self {
            access_token,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            client: reqwest::Client::builder()
                .connect_timeout(CONNECT_TIMEOUT)
                .build()
                .unwrap_or_default(),
        }
    }

    /// Create from the YOUTUBE_ACCESS_TOKEN environment variable
    pub fn from_env() -> Self {
        Self::new(std::env::var("YOUTUBE_ACCESS_TOKEN").ok())
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    async fn open_session(
        &self,
        token: &str,
        metadata: &VideoMetadata,
        length: u64,
    ) -> Result<String, UploadError> {
        let url = format!(
            "{}/videos?uploadType=resumable&part=snippet,status",
            self.endpoint
        );
        let body = json!({
            "snippet": {
                "title": metadata.title,
                "description": metadata.description,
                "tags": metadata.tags,
                "categoryId": metadata.category_id,
            },
            "status": {
                "privacyStatus": metadata.privacy_status.as_str(),
                "selfDeclaredMadeForKids": metadata.made_for_kids,
            }
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(token)
            .header("X-Upload-Content-Type", "video/*")
            .header("X-Upload-Content-Length", length.to_string())
            .json(&body)
            .send()
            .await
            .map_err(network_error)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(classify_status(status.as_u16(), &text));
        }

        response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| UploadError::Transient("upload session has no Location".to_string()))
    }
}

/// Classify an error response from the upload API.
///
/// Anything retrying cannot fix is permanent; server-side and throttling
/// responses are transient.
pub fn classify_status(status: u16, body: &str) -> UploadError {
    let snippet: String = body.trim().chars().take(300).collect();
    let message = format!("HTTP {}: {}", status, snippet);

    let permanent = |kind| UploadError::Permanent {
        kind,
        message: message.clone(),
    };

    match status {
        400 if body.contains("uploadLimitExceeded") => permanent(PermanentKind::Quota),
        403 if body.contains("quotaExceeded") || body.contains("uploadLimitExceeded") => {
            permanent(PermanentKind::Quota)
        }
        401 | 403 => permanent(PermanentKind::Auth),
        429 => UploadError::Transient(message),
        s if s >= 500 => UploadError::Transient(message),
        _ => permanent(PermanentKind::Metadata),
    }
}

fn network_error(e: reqwest::Error) -> UploadError {
    UploadError::Transient(format!("network: {}", e))
}

#[async_trait]
impl Uploader for YouTubeUploader {
    fn name(&self) -> &str {
        "youtube"
    }

    async fn upload(&self, video: &Path, metadata: &VideoMetadata) -> Result<String, UploadError> {
        let token = self.access_token.as_deref().ok_or_else(|| UploadError::Permanent {
            kind: PermanentKind::Auth,
            message: "YOUTUBE_ACCESS_TOKEN not set".to_string(),
        })?;

        let bytes = tokio::fs::read(video).await.map_err(|e| UploadError::Permanent {
            kind: PermanentKind::Metadata,
            message: format!("cannot read {}: {}", video.display(), e),
        })?;

        let session = self
            .open_session(token, metadata, bytes.len() as u64)
            .await?;

        let response = self
            .client
            .put(&session)
            .bearer_auth(token)
            .header(reqwest::header::CONTENT_TYPE, "video/*")
            .body(bytes)
            .send()
            .await
            .map_err(network_error)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(classify_status(status.as_u16(), &text));
        }

        let inserted: InsertResponse = response
            .json()
            .await
            .map_err(|e| UploadError::Transient(format!("unreadable upload response: {}", e)))?;

        Ok(inserted.id)
    }

    fn video_url(&self, video_id: &str) -> String {
        format!("https://www.youtube.com/watch?v={}", video_id)
    }
}
