//! Workspace layout.
//!
//! Single source of truth for where reelpipe keeps things; import this
//! instead of joining path segments by hand.
//!
//! | Path | Contents |
//! |------|----------|
//! | `content/<unit_id>/` | unit.json, narration.json, render.json, captions.srt |
//! | `output/audio/` | narration audio, one file per unit |
//! | `output/videos/` | rendered videos, one file per unit |
//! | `logs/` | run_log.jsonl, upload_log.jsonl |
//! | `state/` | quota.json, used_topics.json |

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::domain::UnitId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    root: PathBuf,
}

impl Layout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn content_dir(&self) -> PathBuf {
        self.root.join("content")
    }

    /// Per-unit directory; its creation reserves the unit id
    pub fn unit_dir(&self, id: &UnitId) -> PathBuf {
        self.content_dir().join(id.as_str())
    }

    pub fn audio_dir(&self) -> PathBuf {
        self.root.join("output").join("audio")
    }

    pub fn video_dir(&self) -> PathBuf {
        self.root.join("output").join("videos")
    }

    pub fn video_path(&self, id: &UnitId) -> PathBuf {
        self.video_dir().join(format!("{}.mp4", id))
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn run_log(&self) -> PathBuf {
        self.logs_dir().join("run_log.jsonl")
    }

    pub fn upload_log(&self) -> PathBuf {
        self.logs_dir().join("upload_log.jsonl")
    }

    pub fn state_dir(&self) -> PathBuf {
        self.root.join("state")
    }

    pub fn quota_state(&self) -> PathBuf {
        self.state_dir().join("quota.json")
    }

    pub fn used_topics(&self) -> PathBuf {
        self.state_dir().join("used_topics.json")
    }

    /// Create every top-level directory
    pub fn ensure(&self) -> Result<()> {
        for dir in [
            self.content_dir(),
            self.audio_dir(),
            self.video_dir(),
            self.logs_dir(),
            self.state_dir(),
        ] {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_layout_paths() {
        let layout = Layout::new("/work");
        let id = UnitId::from("20250101_120000");

        assert_eq!(layout.unit_dir(&id), PathBuf::from("/work/content/20250101_120000"));
        assert_eq!(
            layout.video_path(&id),
            PathBuf::from("/work/output/videos/20250101_120000.mp4")
        );
        assert_eq!(layout.run_log(), PathBuf::from("/work/logs/run_log.jsonl"));
        assert_eq!(layout.quota_state(), PathBuf::from("/work/state/quota.json"));
    }

    #[test]
    fn test_ensure_creates_dirs() {
        let temp = TempDir::new().unwrap();
        let layout = Layout::new(temp.path());
        layout.ensure().unwrap();

        assert!(layout.audio_dir().is_dir());
        assert!(layout.video_dir().is_dir());
        assert!(layout.state_dir().is_dir());
    }
}
