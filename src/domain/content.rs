//! Content units produced by the Content stage.
//!
//! A ContentUnit is immutable once created; later stages only read it.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Timestamp-derived identifier shared by every artifact of one run
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitId(String);

impl UnitId {
    /// Base identifier for a run started at `at` (`YYYYMMDD_HHMMSS`)
    pub fn from_timestamp(at: DateTime<Utc>) -> Self {
        Self(at.format("%Y%m%d_%H%M%S").to_string())
    }

    /// Versioned variant used when the base identifier is already taken.
    ///
    /// Version 1 is the base identifier itself.
    pub fn versioned(&self, version: u32) -> Self {
        if version <= 1 {
            self.clone()
        } else {
            Self(format!("{}_v{}", self.0, version))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UnitId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Raw output of a content backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Script {
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
    /// Full narration text
    pub body: String,
}

/// A generated script, ready for narration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentUnit {
    pub id: UnitId,
    pub topic: String,
    pub niche: String,
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,

    /// Script lines in narration order
    pub lines: Vec<String>,

    /// First 16 hex chars of the SHA256 of the script lines
    pub fingerprint: String,

    pub created_at: DateTime<Utc>,
}

impl ContentUnit {
    /// Build a unit from a backend script
    pub fn from_script(id: UnitId, niche: &str, topic: &str, script: Script) -> Self {
        let lines = split_script_lines(&script.body);
        let fingerprint = fingerprint_lines(&lines);

        Self {
            id,
            topic: topic.to_string(),
            niche: niche.to_string(),
            title: script.title,
            description: script.description,
            tags: script.tags,
            lines,
            fingerprint,
            created_at: Utc::now(),
        }
    }

    /// Narration text (lines joined by blank lines)
    pub fn narration_text(&self) -> String {
        self.lines.join("\n\n")
    }

    pub fn word_count(&self) -> usize {
        self.lines.iter().map(|l| l.split_whitespace().count()).sum()
    }
}

/// Split a script body into narration lines.
///
/// Paragraph breaks win; a single paragraph is split on sentence ends.
pub fn split_script_lines(body: &str) -> Vec<String> {
    let lines: Vec<String> = body
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect();

    if lines.len() != 1 {
        return lines;
    }

    let mut sentences = Vec::new();
    let mut current = String::new();
    for ch in lines[0].chars() {
        current.push(ch);
        if matches!(ch, '.' | '!' | '?') {
            let sentence = current.trim();
            if !sentence.is_empty() {
                sentences.push(sentence.to_string());
            }
            current.clear();
        }
    }
    let rest = current.trim();
    if !rest.is_empty() {
        sentences.push(rest.to_string());
    }
    sentences
}

fn fingerprint_lines(lines: &[String]) -> String {
    let mut hasher = Sha256::new();
    for line in lines {
        hasher.update(line.as_bytes());
        hasher.update(b"\n");
    }
    hex::encode(&hasher.finalize()[..8])
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_unit_id_format() {
        let at = Utc.with_ymd_and_hms(2025, 3, 9, 7, 5, 1).unwrap();
        let id = UnitId::from_timestamp(at);
        assert_eq!(id.as_str(), "20250309_070501");
        assert_eq!(id.versioned(1), id);
        assert_eq!(id.versioned(3).as_str(), "20250309_070501_v3");
    }

    #[test]
    fn test_split_paragraphs() {
        let lines = split_script_lines("First line.\n\n  Second line.  \n\nThird.");
        assert_eq!(lines, vec!["First line.", "Second line.", "Third."]);
    }

    #[test]
    fn test_split_single_paragraph_into_sentences() {
        let lines = split_script_lines("One fact. Another fact! A question? trailing");
        assert_eq!(
            lines,
            vec!["One fact.", "Another fact!", "A question?", "trailing"]
        );
    }

    #[test]
    fn test_unit_from_script() {
        let script = Script {
            title: "Title".to_string(),
            description: "Desc".to_string(),
            tags: vec!["a".to_string()],
            body: "Line one here.\nLine two.".to_string(),
        };
        let unit = ContentUnit::from_script(UnitId::from("u1"), "tech_facts", "chips", script);

        assert_eq!(unit.lines.len(), 2);
        assert_eq!(unit.word_count(), 5);
        assert_eq!(unit.fingerprint.len(), 16);
        assert_eq!(unit.narration_text(), "Line one here.\n\nLine two.");
    }
}
