//! Daily publish quota.
//!
//! The counter lives in `state/quota.json`. Every mutation is a single
//! read-modify-write under an exclusive lock on a sidecar lock file, and the
//! new state is written to a temp file and renamed into place, so a crash
//! never leaves a half-written record. Bookkeeping problems never fail the
//! pipeline: unreadable state counts as zero usage.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Length of one quota window
pub fn window_length() -> chrono::Duration {
    chrono::Duration::hours(24)
}

/// Persisted quota counter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaState {
    /// Publishes reserved in the current window
    pub count: u32,
    pub window_start: DateTime<Utc>,

    /// Set when the platform itself reported its upload limit
    #[serde(default)]
    pub exhausted: bool,
}

/// Result of a reservation attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaDecision {
    Allowed,
    Denied { retry_after: Duration },
}

impl QuotaDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, QuotaDecision::Allowed)
    }
}

impl QuotaState {
    pub fn fresh(now: DateTime<Utc>) -> Self {
        Self {
            count: 0,
            window_start: now,
            exhausted: false,
        }
    }

    pub fn window_end(&self) -> DateTime<Utc> {
        self.window_start + window_length()
    }

    /// Start a new window if the current one is more than 24h old
    pub fn rolled(self, now: DateTime<Utc>) -> Self {
        if now - self.window_start > window_length() {
            Self::fresh(now)
        } else {
            self
        }
    }

    /// Check capacity and take a slot in one step
    pub fn reserve(self, now: DateTime<Utc>, ceiling: u32) -> (Self, QuotaDecision) {
        let state = self.rolled(now);
        if state.exhausted || state.count >= ceiling {
            let retry_after = (state.window_end() - now)
                .to_std()
                .unwrap_or(Duration::ZERO);
            return (state, QuotaDecision::Denied { retry_after });
        }

        let next = Self {
            count: state.count + 1,
            ..state
        };
        (next, QuotaDecision::Allowed)
    }

    /// Give back a slot that was reserved but not used
    pub fn released(self, now: DateTime<Utc>) -> Self {
        let state = self.rolled(now);
        Self {
            count: state.count.saturating_sub(1),
            ..state
        }
    }

    /// Close the current window
    pub fn exhausted(self, now: DateTime<Utc>) -> Self {
        Self {
            exhausted: true,
            ..self.rolled(now)
        }
    }

    pub fn remaining(&self, ceiling: u32) -> u32 {
        if self.exhausted {
            0
        } else {
            ceiling.saturating_sub(self.count)
        }
    }
}

/// File-backed quota tracker
#[derive(Debug, Clone)]
pub struct QuotaTracker {
    path: PathBuf,
    ceiling: u32,
}

impl QuotaTracker {
    pub fn new(path: impl Into<PathBuf>, ceiling: u32) -> Self {
        Self {
            path: path.into(),
            ceiling,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn ceiling(&self) -> u32 {
        self.ceiling
    }

    pub fn check_and_reserve(&self) -> QuotaDecision {
        self.check_and_reserve_at(Utc::now())
    }

    pub fn check_and_reserve_at(&self, now: DateTime<Utc>) -> QuotaDecision {
        let ceiling = self.ceiling;
        match self.update(now, |state| state.reserve(now, ceiling)) {
            Ok(decision) => {
                debug!(?decision, ceiling, "Quota checked");
                decision
            }
            Err(e) => {
                warn!(error = %e, "Quota bookkeeping failed, allowing publish");
                QuotaDecision::Allowed
            }
        }
    }

    /// Return a reserved slot after an upload that did not happen
    pub fn release(&self) {
        self.release_at(Utc::now())
    }

    pub fn release_at(&self, now: DateTime<Utc>) {
        if let Err(e) = self.update(now, |state| (state.released(now), ())) {
            warn!(error = %e, "Failed to release quota reservation");
        }
    }

    /// Mark the window used up after the platform refused an upload
    pub fn exhaust(&self) {
        self.exhaust_at(Utc::now())
    }

    pub fn exhaust_at(&self, now: DateTime<Utc>) {
        match self.update(now, |state| (state.exhausted(now), ())) {
            Ok(()) => info!("Quota window marked exhausted"),
            Err(e) => warn!(error = %e, "Failed to mark quota exhausted"),
        }
    }

    /// Current state, rolled forward to `now`, without modifying the file
    pub fn snapshot_at(&self, now: DateTime<Utc>) -> QuotaState {
        self.load(now).rolled(now)
    }

    pub fn snapshot(&self) -> QuotaState {
        self.snapshot_at(Utc::now())
    }

    /// Locked read-modify-write of the state file
    fn update<T>(
        &self,
        now: DateTime<Utc>,
        f: impl FnOnce(QuotaState) -> (QuotaState, T),
    ) -> Result<T> {
        let dir = self
            .path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create state directory: {}", dir.display()))?;

        let lock_path = self.path.with_extension("lock");
        let lock = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&lock_path)
            .with_context(|| format!("Failed to open lock file: {}", lock_path.display()))?;
        lock.lock_exclusive()
            .context("Failed to acquire quota lock")?;

        let (next, out) = f(self.load(now));

        let json = serde_json::to_string_pretty(&next).context("Failed to serialize quota")?;
        let mut tmp = tempfile::NamedTempFile::new_in(&dir)
            .context("Failed to create temp quota file")?;
        tmp.write_all(json.as_bytes())
            .context("Failed to write quota")?;
        tmp.flush().context("Failed to flush quota")?;
        tmp.persist(&self.path)
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;

        // Lock is released when `lock` is dropped
        Ok(out)
    }

    fn load(&self, now: DateTime<Utc>) -> QuotaState {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return QuotaState::fresh(now),
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Quota state unreadable, treating as empty"
                );
                return QuotaState::fresh(now);
            }
        };

        match serde_json::from_str(&text) {
            Ok(state) => state,
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Quota state corrupt, treating as empty"
                );
                QuotaState::fresh(now)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_reserve_counts_up_to_ceiling() {
        let mut state = QuotaState::fresh(t0());
        for _ in 0..3 {
            let (next, decision) = state.reserve(t0(), 3);
            assert!(decision.is_allowed());
            state = next;
        }
        let (state, decision) = state.reserve(t0(), 3);
        assert_eq!(state.count, 3);
        assert_eq!(
            decision,
            QuotaDecision::Denied {
                retry_after: Duration::from_secs(24 * 3600)
            }
        );
    }

    #[test]
    fn test_window_rolls_after_24h() {
        let state = QuotaState {
            count: 5,
            window_start: t0(),
            exhausted: true,
        };

        // Exactly 24h is still the same window
        let (same, decision) = state.clone().reserve(t0() + window_length(), 5);
        assert!(!decision.is_allowed());
        assert_eq!(same.count, 5);

        let later = t0() + window_length() + chrono::Duration::seconds(1);
        let (next, decision) = state.reserve(later, 5);
        assert!(decision.is_allowed());
        assert_eq!(next.count, 1);
        assert!(!next.exhausted);
        assert_eq!(next.window_start, later);
    }

    #[test]
    fn test_zero_ceiling_always_denies() {
        let (_, decision) = QuotaState::fresh(t0()).reserve(t0(), 0);
        assert!(!decision.is_allowed());
    }

    #[test]
    fn test_release_never_underflows() {
        let state = QuotaState::fresh(t0()).released(t0());
        assert_eq!(state.count, 0);
    }

    #[test]
    fn test_tracker_persists_across_instances() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("state").join("quota.json");

        let tracker = QuotaTracker::new(&path, 2);
        assert!(tracker.check_and_reserve_at(t0()).is_allowed());

        let reopened = QuotaTracker::new(&path, 2);
        assert!(reopened.check_and_reserve_at(t0()).is_allowed());
        assert!(!reopened.check_and_reserve_at(t0()).is_allowed());
        assert_eq!(reopened.snapshot_at(t0()).count, 2);
    }

    #[test]
    fn test_exhaust_denies_until_rollover() {
        let temp = TempDir::new().unwrap();
        let tracker = QuotaTracker::new(temp.path().join("quota.json"), 10);

        tracker.exhaust_at(t0());
        assert!(!tracker.check_and_reserve_at(t0()).is_allowed());
        assert_eq!(tracker.snapshot_at(t0()).remaining(10), 0);

        let tomorrow = t0() + chrono::Duration::hours(25);
        assert!(tracker.check_and_reserve_at(tomorrow).is_allowed());
    }
}
