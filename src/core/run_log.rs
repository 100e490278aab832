//! Append-only run and upload logs.
//!
//! Both logs are newline-delimited JSON. Each record is serialized up front
//! and written with a single `write_all`, so a reader never sees half an
//! entry.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::warn;

use crate::domain::{PublishRecord, RunRecord};

/// File-backed run and upload logs
#[derive(Debug, Clone)]
pub struct RunLog {
    runs_path: PathBuf,
    uploads_path: PathBuf,
}

impl RunLog {
    pub fn new(runs_path: impl Into<PathBuf>, uploads_path: impl Into<PathBuf>) -> Self {
        Self {
            runs_path: runs_path.into(),
            uploads_path: uploads_path.into(),
        }
    }

    pub fn runs_path(&self) -> &Path {
        &self.runs_path
    }

    pub async fn append_run(&self, record: &RunRecord) -> Result<()> {
        append_line(&self.runs_path, record).await
    }

    pub async fn append_publish(&self, record: &PublishRecord) -> Result<()> {
        append_line(&self.uploads_path, record).await
    }

    /// All run records in append order
    pub async fn runs(&self) -> Result<Vec<RunRecord>> {
        read_lines(&self.runs_path).await
    }

    /// All publish records in append order
    pub async fn publishes(&self) -> Result<Vec<PublishRecord>> {
        read_lines(&self.uploads_path).await
    }

    /// Most recent runs first
    pub async fn recent_runs(&self, limit: usize) -> Result<Vec<RunRecord>> {
        let mut runs = self.runs().await?;
        runs.reverse();
        runs.truncate(limit);
        Ok(runs)
    }
}

async fn append_line<T: Serialize>(path: &Path, record: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create log directory: {}", parent.display()))?;
    }

    let mut line = serde_json::to_string(record).context("Failed to serialize record")?;
    line.push('\n');

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .with_context(|| format!("Failed to open log file: {}", path.display()))?;

    file.write_all(line.as_bytes())
        .await
        .context("Failed to write record")?;
    file.flush().await.context("Failed to flush record")?;

    Ok(())
}

/// Parse every line; unparseable lines are skipped with a warning
async fn read_lines<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let file = File::open(path)
        .await
        .with_context(|| format!("Failed to open log file: {}", path.display()))?;

    let mut lines = BufReader::new(file).lines();
    let mut records = Vec::new();
    let mut line_no = 0usize;

    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(&line) {
            Ok(record) => records.push(record),
            Err(e) => warn!(
                path = %path.display(),
                line = line_no,
                error = %e,
                "Skipping bad log line"
            ),
        }
    }

    Ok(records)
}
