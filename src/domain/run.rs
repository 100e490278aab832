//! Run records: one entry per pipeline execution.
//!
//! Stage statuses are filled strictly in pipeline order; `record` rejects
//! anything else so a RunRecord can never claim Narration ran before Content.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::content::UnitId;
use super::publish::PublishRecord;

/// Pipeline stages in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Content,
    Narration,
    Render,
    Publish,
}

impl Stage {
    /// Stage that runs after this one
    pub fn next(&self) -> Option<Stage> {
        match self {
            Stage::Content => Some(Stage::Narration),
            Stage::Narration => Some(Stage::Render),
            Stage::Render => Some(Stage::Publish),
            Stage::Publish => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Stage::Content => "content",
            Stage::Narration => "narration",
            Stage::Render => "render",
            Stage::Publish => "publish",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Outcome of a single stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Primary backend produced the artifact
    Success,

    /// Primary failed, fallback produced the artifact
    Fallback,

    /// Stage could not produce an artifact
    Failure,

    /// Stage deliberately not executed (upload disabled, quota denied)
    Skipped,
}

/// One stage's line in a run record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageEntry {
    pub stage: Stage,
    pub status: StageStatus,

    /// Backend that produced the artifact (if any)
    pub backend: Option<String>,

    pub duration_ms: Option<u64>,

    /// Failure or skip reason
    pub error: Option<String>,

    pub recorded_at: DateTime<Utc>,
}

impl StageEntry {
    pub fn new(stage: Stage, status: StageStatus) -> Self {
        Self {
            stage,
            status,
            backend: None,
            duration_ms: None,
            error: None,
            recorded_at: Utc::now(),
        }
    }

    pub fn with_backend(mut self, backend: impl Into<String>) -> Self {
        self.backend = Some(backend.into());
        self
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// Terminal (or current) state of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum RunOutcome {
    Running,

    /// All required stages finished (publish may have been skipped)
    Done,

    Failed { reason: String },

    /// Stop signal observed before `before` could start
    Interrupted { before: Stage },
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RunRecordError {
    #[error("stage '{stage}' recorded after '{last}'")]
    OutOfOrder { stage: Stage, last: Stage },

    #[error("stage '{stage}' recorded before '{expected}'")]
    Skipped { stage: Stage, expected: Stage },

    #[error("stage '{stage}' recorded after '{failed}' failed")]
    AfterFailure { stage: Stage, failed: Stage },

    #[error("run already finished; cannot record stage '{stage}'")]
    Finished { stage: Stage },
}

/// Append-only history entry for one pipeline execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: Uuid,
    pub unit_id: UnitId,
    pub niche: String,
    pub topic: Option<String>,

    /// Stage statuses in pipeline order
    pub stages: Vec<StageEntry>,

    pub outcome: RunOutcome,

    /// Present when the Publish stage was attempted or short-circuited
    pub publish: Option<PublishRecord>,

    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,

    /// Raw error text for unexpected (non-stage) failures
    pub error: Option<String>,
}

impl RunRecord {
    pub fn new(unit_id: UnitId, niche: impl Into<String>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            unit_id,
            niche: niche.into(),
            topic: None,
            stages: Vec::new(),
            outcome: RunOutcome::Running,
            publish: None,
            started_at: Utc::now(),
            completed_at: None,
            error: None,
        }
    }

    /// Record a stage status; only the stage right after the last one is accepted
    pub fn record(&mut self, entry: StageEntry) -> Result<(), RunRecordError> {
        if self.is_finished() {
            return Err(RunRecordError::Finished { stage: entry.stage });
        }

        let expected = match self.stages.last() {
            None => Some(Stage::Content),
            Some(last) => {
                if last.status == StageStatus::Failure {
                    return Err(RunRecordError::AfterFailure {
                        stage: entry.stage,
                        failed: last.stage,
                    });
                }
                if entry.stage <= last.stage {
                    return Err(RunRecordError::OutOfOrder {
                        stage: entry.stage,
                        last: last.stage,
                    });
                }
                last.stage.next()
            }
        };

        match expected {
            Some(expected) if expected != entry.stage => Err(RunRecordError::Skipped {
                stage: entry.stage,
                expected,
            }),
            _ => {
                self.stages.push(entry);
                Ok(())
            }
        }
    }

    /// Status recorded for a stage, if any
    pub fn status_of(&self, stage: Stage) -> Option<StageStatus> {
        self.stages
            .iter()
            .find(|e| e.stage == stage)
            .map(|e| e.status)
    }

    pub fn finish_done(&mut self) {
        self.outcome = RunOutcome::Done;
        self.completed_at = Some(Utc::now());
    }

    pub fn finish_failed(&mut self, reason: impl Into<String>) {
        self.outcome = RunOutcome::Failed {
            reason: reason.into(),
        };
        self.completed_at = Some(Utc::now());
    }

    pub fn finish_interrupted(&mut self, before: Stage) {
        self.outcome = RunOutcome::Interrupted { before };
        self.completed_at = Some(Utc::now());
    }

    pub fn is_finished(&self) -> bool {
        !matches!(self.outcome, RunOutcome::Running)
    }

    pub fn is_done(&self) -> bool {
        matches!(self.outcome, RunOutcome::Done)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.outcome, RunOutcome::Failed { .. })
    }

    /// Short label for listings
    pub fn outcome_label(&self) -> &'static str {
        match self.outcome {
            RunOutcome::Running => "running",
            RunOutcome::Done => "done",
            RunOutcome::Failed { .. } => "failed",
            RunOutcome::Interrupted { .. } => "interrupted",
        }
    }
}
