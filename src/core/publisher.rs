//! Publish adapter: quota gate, upload, bounded retry.
//!
//! A denied quota check short-circuits to a skipped record without touching
//! the uploader. Transient upload errors are retried with backoff up to the
//! policy bound; permanent ones fail at once. An attempt that outlives its
//! timeout counts as transient. Failed uploads hand their quota
//! slot back, except when the platform itself reported its upload limit, in
//! which case the local window is closed too.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{error, info, warn};

use crate::adapters::{PermanentKind, UploadError, Uploader};
use crate::domain::{PublishOutcome, PublishRecord, RenderArtifact, VideoMetadata};

use super::quota::{QuotaDecision, QuotaTracker};
use super::retry::RetryPolicy;

/// An upload that ended without a video id
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PublishError {
    #[error("upload failed after {attempts} attempts: {message}")]
    RetriesExhausted { attempts: u32, message: String },

    #[error("upload rejected ({kind}): {message}")]
    Permanent {
        kind: PermanentKind,
        message: String,
        attempts: u32,
    },
}

impl PublishError {
    pub fn is_permanent(&self) -> bool {
        matches!(self, PublishError::Permanent { .. })
    }

    pub fn attempts(&self) -> u32 {
        match self {
            PublishError::RetriesExhausted { attempts, .. }
            | PublishError::Permanent { attempts, .. } => *attempts,
        }
    }

    /// Upload-log entry for this failure
    pub fn to_record(&self, render: &RenderArtifact, metadata: &VideoMetadata) -> PublishRecord {
        PublishRecord::new(
            render.unit_id.clone(),
            PublishOutcome::Failed {
                reason: self.to_string(),
                permanent: self.is_permanent(),
            },
            metadata,
            self.attempts(),
        )
    }
}

/// Bound on one upload attempt unless configured otherwise
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(600);

pub struct Publisher {
    uploader: Arc<dyn Uploader>,
    quota: QuotaTracker,
    retry: RetryPolicy,
    attempt_timeout: Duration,
}

impl Publisher {
    pub fn new(uploader: Arc<dyn Uploader>, quota: QuotaTracker, retry: RetryPolicy) -> Self {
        Self {
            uploader,
            quota,
            retry,
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
        }
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    pub fn quota(&self) -> &QuotaTracker {
        &self.quota
    }

    /// Publish a rendered video.
    ///
    /// `Ok` covers both a successful upload and a quota skip; `Err` means the
    /// upload was attempted and failed.
    pub async fn publish(
        &self,
        render: &RenderArtifact,
        metadata: &VideoMetadata,
    ) -> Result<PublishRecord, PublishError> {
        if let QuotaDecision::Denied { retry_after } = self.quota.check_and_reserve() {
            let hours = retry_after.as_secs_f64() / 3600.0;
            info!(
                unit_id = %render.unit_id,
                retry_after_secs = retry_after.as_secs(),
                "Daily quota reached, skipping upload"
            );
            return Ok(PublishRecord::new(
                render.unit_id.clone(),
                PublishOutcome::Skipped {
                    reason: format!("quota denied; window resets in {:.1}h", hours),
                },
                metadata,
                0,
            ));
        }

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            info!(
                unit_id = %render.unit_id,
                attempt,
                uploader = self.uploader.name(),
                "Uploading video"
            );

            let upload = self.uploader.upload(&render.path, metadata);
            let result = match tokio::time::timeout(self.attempt_timeout, upload).await {
                Ok(result) => result,
                Err(_) => Err(UploadError::Transient(format!(
                    "upload attempt timed out after {:?}",
                    self.attempt_timeout
                ))),
            };

            match result {
                Ok(video_id) => {
                    let url = self.uploader.video_url(&video_id);
                    info!(unit_id = %render.unit_id, %video_id, %url, "Upload complete");
                    return Ok(PublishRecord::new(
                        render.unit_id.clone(),
                        PublishOutcome::Published { video_id, url },
                        metadata,
                        attempt,
                    ));
                }
                Err(UploadError::Transient(message)) => {
                    if self.retry.should_retry(attempt) {
                        let delay = self.retry.delay_for_attempt(attempt);
                        warn!(
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %message,
                            "Upload failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }

                    error!(attempt, error = %message, "Upload failed, retries exhausted");
                    self.quota.release();
                    return Err(PublishError::RetriesExhausted {
                        attempts: attempt,
                        message,
                    });
                }
                Err(UploadError::Permanent { kind, message }) => {
                    error!(attempt, %kind, error = %message, "Upload rejected");
                    if kind == PermanentKind::Quota {
                        self.quota.exhaust();
                    } else {
                        self.quota.release();
                    }
                    return Err(PublishError::Permanent {
                        kind,
                        message,
                        attempts: attempt,
                    });
                }
            }
        }
    }
}
