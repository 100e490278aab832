//! Domain types for the reelpipe pipeline.
//!
//! - Content: ContentUnit and its timestamp-derived UnitId
//! - Artifact: narration and render outputs
//! - Publish: upload metadata and PublishRecord
//! - Run: RunRecord with ordered stage statuses

pub mod artifact;
pub mod content;
pub mod publish;
pub mod run;

pub use artifact::{BackendRole, NarrationArtifact, RenderArtifact};
pub use content::{ContentUnit, Script, UnitId};
pub use publish::{PrivacyStatus, PublishOutcome, PublishRecord, VideoMetadata};
pub use run::{RunOutcome, RunRecord, RunRecordError, Stage, StageEntry, StageStatus};
