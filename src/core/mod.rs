//! Core orchestration logic.
//!
//! This module contains:
//! - StageAdapter: primary/fallback chain per stage
//! - QuotaTracker: persisted 24h publish ceiling
//! - Publisher: quota-gated upload with retry
//! - RunLog / ArtifactStore: append-only history and per-unit manifests
//! - Orchestrator: one Content -> Narration -> Render -> Publish run
//! - Scheduler: recurring runs with cooldown and stop signal

pub mod artifact_store;
pub mod orchestrator;
pub mod publisher;
pub mod quota;
pub mod retry;
pub mod run_log;
pub mod scheduler;
pub mod stage;
pub mod topics;

// Re-export commonly used types
pub use artifact_store::ArtifactStore;
pub use orchestrator::{Orchestrator, PipelineSettings, RunOptions};
pub use publisher::{PublishError, Publisher};
pub use quota::{QuotaDecision, QuotaState, QuotaTracker};
pub use retry::RetryPolicy;
pub use run_log::RunLog;
pub use scheduler::{
    Cadence, Clock, PipelineRunner, RunTally, Scheduler, SchedulerReport, SchedulerSettings,
    StopReason, SystemClock,
};
pub use stage::{AttemptReport, Produced, StageAdapter, StageFailure};
pub use topics::TopicPicker;
