//! Topic rotation.
//!
//! Topics are drawn at random from the niche's pool without repeats; once
//! every topic has been used the rotation starts over. Used topics persist
//! in `state/used_topics.json` keyed by niche.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rand::seq::SliceRandom;
use rand::Rng;
use tracing::{debug, warn};

type UsedTopics = BTreeMap<String, Vec<String>>;

#[derive(Debug, Clone)]
pub struct TopicPicker {
    state_path: PathBuf,
    niche: String,
    pool: Vec<String>,
}

/// "tech_facts" -> "Tech Facts"
pub fn humanize_niche(niche: &str) -> String {
    niche
        .split(|c: char| c == '_' || c == '-' || c.is_whitespace())
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

impl TopicPicker {
    pub fn new(
        state_path: impl Into<PathBuf>,
        niche: impl Into<String>,
        pool: Vec<String>,
    ) -> Self {
        Self {
            state_path: state_path.into(),
            niche: niche.into(),
            pool,
        }
    }

    pub fn pick(&self) -> String {
        self.pick_with(&mut rand::thread_rng())
    }

    /// Choose the next topic and record it as used
    pub fn pick_with<R: Rng + ?Sized>(&self, rng: &mut R) -> String {
        if self.pool.is_empty() {
            return humanize_niche(&self.niche);
        }

        let mut state = load_used(&self.state_path);
        let used = state.entry(self.niche.clone()).or_default();

        let mut available: Vec<&String> = self.pool.iter().filter(|t| !used.contains(t)).collect();
        if available.is_empty() {
            debug!(niche = %self.niche, "Topic pool exhausted, starting over");
            used.clear();
            available = self.pool.iter().collect();
        }

        let topic = available
            .choose(rng)
            .map(|t| (*t).clone())
            .unwrap_or_else(|| humanize_niche(&self.niche));
        used.push(topic.clone());

        if let Err(e) = save_used(&self.state_path, &state) {
            warn!(error = %e, "Failed to persist used topics");
        }
        topic
    }
}

fn load_used(path: &Path) -> UsedTopics {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return UsedTopics::new(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Used topics unreadable, starting fresh");
            return UsedTopics::new();
        }
    };
    serde_json::from_str(&text).unwrap_or_else(|e| {
        warn!(path = %path.display(), error = %e, "Used topics corrupt, starting fresh");
        UsedTopics::new()
    })
}

fn save_used(path: &Path, state: &UsedTopics) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(state).context("Failed to serialize used topics")?;
    std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))
}
