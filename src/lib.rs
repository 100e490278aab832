//! reelpipe - scheduled short-video pipeline
//!
//! Turns a niche and a topic into a published video in four stages:
//!
//! ```text
//! Content -> Narration -> Render -> Publish
//! ```
//!
//! Each generative stage has a primary backend and a fallback, each attempt
//! bounded by its own timeout. Publishing is gated by a persisted 24h quota
//! and retries transient upload errors with backoff. Every run appends one
//! RunRecord to `logs/run_log.jsonl`; artifacts are keyed by a
//! timestamp-derived unit id so runs never overwrite each other.
//!
//! # Modules
//!
//! - `adapters`: Stage backends (Gemini, template, ElevenLabs, Piper,
//!   Pexels slideshow, local clip) and the YouTube uploader
//! - `core`: StageAdapter, QuotaTracker, Publisher, Orchestrator, Scheduler
//! - `domain`: ContentUnit, artifacts, PublishRecord, RunRecord
//! - `config`: YAML configuration and workspace layout
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # One run
//! reelpipe
//!
//! # Three runs back to back, no upload
//! reelpipe --count 3 --no-upload
//!
//! # Run on the configured cadence until Ctrl+C
//! reelpipe --schedule
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;

// Re-export main types at crate root for convenience
pub use core::{Orchestrator, Scheduler};
pub use domain::{ContentUnit, PublishRecord, RunRecord, UnitId};
