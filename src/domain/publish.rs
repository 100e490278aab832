//! Publish records and upload metadata.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::content::{ContentUnit, UnitId};

/// Platform limits on metadata fields (in characters)
pub const MAX_TITLE_CHARS: usize = 100;
pub const MAX_DESCRIPTION_CHARS: usize = 5000;
pub const MAX_TAGS_CHARS: usize = 500;

const SHORTS_MARKER: &str = "#Shorts";

/// Visibility of an uploaded video
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrivacyStatus {
    #[default]
    Public,
    Unlisted,
    Private,
}

impl PrivacyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrivacyStatus::Public => "public",
            PrivacyStatus::Unlisted => "unlisted",
            PrivacyStatus::Private => "private",
        }
    }
}

impl fmt::Display for PrivacyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PrivacyStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "public" => Ok(Self::Public),
            "unlisted" => Ok(Self::Unlisted),
            "private" => Ok(Self::Private),
            other => Err(format!("unknown privacy status '{}'", other)),
        }
    }
}

/// What happened at the Publish stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "result")]
pub enum PublishOutcome {
    Published { video_id: String, url: String },

    /// Not attempted; the external service was never contacted
    Skipped { reason: String },

    /// Attempted and failed; the rendered video stays on disk
    Failed { reason: String, permanent: bool },
}

/// Immutable entry in the upload log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishRecord {
    pub unit_id: UnitId,
    pub outcome: PublishOutcome,
    pub privacy_status: PrivacyStatus,
    pub title: String,

    /// Upload attempts made (0 when skipped)
    pub attempts: u32,

    pub recorded_at: DateTime<Utc>,
}

impl PublishRecord {
    pub fn new(
        unit_id: UnitId,
        outcome: PublishOutcome,
        metadata: &VideoMetadata,
        attempts: u32,
    ) -> Self {
        Self {
            unit_id,
            outcome,
            privacy_status: metadata.privacy_status,
            title: metadata.title.clone(),
            attempts,
            recorded_at: Utc::now(),
        }
    }

    pub fn is_published(&self) -> bool {
        matches!(self.outcome, PublishOutcome::Published { .. })
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self.outcome, PublishOutcome::Skipped { .. })
    }

    pub fn video_id(&self) -> Option<&str> {
        match &self.outcome {
            PublishOutcome::Published { video_id, .. } => Some(video_id),
            _ => None,
        }
    }
}

/// Metadata sent with an upload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoMetadata {
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
    pub category_id: String,
    pub privacy_status: PrivacyStatus,
    pub made_for_kids: bool,
}

impl VideoMetadata {
    /// Build platform-ready metadata for a content unit
    pub fn for_unit(
        unit: &ContentUnit,
        privacy_status: PrivacyStatus,
        category_id: &str,
        made_for_kids: bool,
        shorts: bool,
    ) -> Self {
        let mut title = unit.title.trim().to_string();
        if title.is_empty() {
            title = unit.topic.clone();
        }
        let mut description = unit.description.clone();
        let mut tags = unit.tags.clone();

        if shorts {
            title = shorts_title(&title);
            if !description.to_lowercase().contains("#shorts") {
                description = format!("{}\n\n{}", SHORTS_MARKER, description);
            }
            let has_shorts_tag = tags.iter().any(|t| {
                let t = t.to_lowercase().replace('#', "");
                matches!(t.trim(), "shorts" | "short" | "youtubeshorts")
            });
            if !has_shorts_tag {
                tags.splice(
                    0..0,
                    [SHORTS_MARKER, "shorts", "youtube shorts"].map(String::from),
                );
            }
        }

        Self {
            title: truncate_chars(&title, MAX_TITLE_CHARS),
            description: truncate_chars(&description, MAX_DESCRIPTION_CHARS),
            tags: optimize_tags(&tags),
            category_id: category_id.to_string(),
            privacy_status,
            made_for_kids,
        }
    }
}

fn shorts_title(title: &str) -> String {
    if title.to_lowercase().contains("#shorts") {
        return title.to_string();
    }
    let suffix = format!(" {}", SHORTS_MARKER);
    let room = MAX_TITLE_CHARS - suffix.chars().count();
    format!("{}{}", truncate_chars(title, room), suffix)
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

/// Deduplicate tags (case-insensitive), drop one-character tags, and keep
/// the list within the platform's total character budget.
pub fn optimize_tags(tags: &[String]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut total = 0usize;
    let mut out = Vec::new();

    for tag in tags {
        let trimmed = tag.trim();
        let key = trimmed.to_lowercase();
        if key.chars().count() <= 1 || !seen.insert(key) {
            continue;
        }
        // +1 for the separator
        let cost = trimmed.chars().count() + 1;
        if total + cost > MAX_TAGS_CHARS {
            break;
        }
        total += cost;
        out.push(trimmed.to_string());
    }

    out
}
