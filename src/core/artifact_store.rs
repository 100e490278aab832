//! Artifact store keyed by unit id.
//!
//! A unit id is reserved by creating its directory under `content/`.
//! `create_dir` is atomic, so two runs started in the same second get
//! `<ts>` and `<ts>_v2` rather than sharing a directory.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::fs;

use crate::config::paths::Layout;
use crate::domain::{ContentUnit, NarrationArtifact, RenderArtifact, UnitId};

/// Give up after this many versions of one timestamp
const MAX_VERSIONS: u32 = 1000;

pub const UNIT_FILE: &str = "unit.json";
pub const NARRATION_FILE: &str = "narration.json";
pub const RENDER_FILE: &str = "render.json";

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    layout: Layout,
}

impl ArtifactStore {
    pub fn new(layout: Layout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Reserve a fresh unit id for a run started at `at`
    pub fn reserve_unit_id(&self, at: DateTime<Utc>) -> Result<UnitId> {
        let content_dir = self.layout.content_dir();
        std::fs::create_dir_all(&content_dir)
            .with_context(|| format!("Failed to create {}", content_dir.display()))?;

        let base = UnitId::from_timestamp(at);
        for version in 1..=MAX_VERSIONS {
            let id = base.versioned(version);
            let dir = self.layout.unit_dir(&id);
            match std::fs::create_dir(&dir) {
                Ok(()) => return Ok(id),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(e) => {
                    return Err(e)
                        .with_context(|| format!("Failed to reserve {}", dir.display()));
                }
            }
        }

        anyhow::bail!("No free unit id for {} after {} versions", base, MAX_VERSIONS)
    }

    pub async fn save_unit(&self, unit: &ContentUnit) -> Result<PathBuf> {
        self.write_json(&unit.id, UNIT_FILE, unit).await
    }

    pub async fn save_narration(&self, artifact: &NarrationArtifact) -> Result<PathBuf> {
        self.write_json(&artifact.unit_id, NARRATION_FILE, artifact)
            .await
    }

    pub async fn save_render(&self, artifact: &RenderArtifact) -> Result<PathBuf> {
        self.write_json(&artifact.unit_id, RENDER_FILE, artifact)
            .await
    }

    pub async fn load_unit(&self, id: &UnitId) -> Result<ContentUnit> {
        self.read_json(id, UNIT_FILE).await
    }

    pub async fn load_narration(&self, id: &UnitId) -> Result<NarrationArtifact> {
        self.read_json(id, NARRATION_FILE).await
    }

    /// Whether a manifest exists for a unit
    pub fn has(&self, id: &UnitId, file: &str) -> bool {
        self.layout.unit_dir(id).join(file).exists()
    }

    async fn write_json<T: Serialize>(
        &self,
        id: &UnitId,
        file: &str,
        value: &T,
    ) -> Result<PathBuf> {
        let dir = self.layout.unit_dir(id);
        fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create {}", dir.display()))?;

        let path = dir.join(file);
        let json = serde_json::to_string_pretty(value)
            .with_context(|| format!("Failed to serialize {}", file))?;
        fs::write(&path, json)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(path)
    }

    async fn read_json<T: DeserializeOwned>(&self, id: &UnitId, file: &str) -> Result<T> {
        let path = self.layout.unit_dir(id).join(file);
        let text = fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("Failed to parse {}", path.display()))
    }
}
