//! Recurring execution of the pipeline.
//!
//! Cooperative and single-threaded: compute the next fire time, wait for it
//! (interruptibly), run the pipeline once, repeat. Unexpected errors from a
//! run are logged and followed by a cooldown; they never end the loop unless
//! they pile up past `max_consecutive_errors`.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::domain::RunRecord;

const HOUR: u64 = 3600;
const DAY: u64 = 24 * HOUR;

/// Longest explicit interval accepted
pub const MAX_INTERVAL: Duration = Duration::from_secs(365 * DAY);

/// Recurrence pattern for scheduled runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Cadence {
    Daily,
    TwiceDaily,
    ThriceDaily,
    Weekly,
    Every(Duration),
}

impl Cadence {
    pub fn interval(&self) -> Duration {
        match self {
            Cadence::Daily => Duration::from_secs(DAY),
            Cadence::TwiceDaily => Duration::from_secs(DAY / 2),
            Cadence::ThriceDaily => Duration::from_secs(DAY / 3),
            Cadence::Weekly => Duration::from_secs(7 * DAY),
            Cadence::Every(d) => (*d).min(MAX_INTERVAL),
        }
    }
}

impl FromStr for Cadence {
    type Err = String;

    /// Named cadence, or `<n><unit>` with unit `s`, `m`, `h` or `d`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        match s.as_str() {
            "daily" => return Ok(Cadence::Daily),
            "twice_daily" => return Ok(Cadence::TwiceDaily),
            "thrice_daily" => return Ok(Cadence::ThriceDaily),
            "weekly" => return Ok(Cadence::Weekly),
            _ => {}
        }

        let split = s
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(|| format!("interval '{}' needs a unit (s, m, h, d)", s))?;
        let (number, unit) = s.split_at(split);
        let n: u64 = number
            .parse()
            .map_err(|_| format!("unknown schedule '{}'", s))?;
        let unit_secs = match unit {
            "s" => 1,
            "m" => 60,
            "h" => HOUR,
            "d" => DAY,
            _ => return Err(format!("unknown schedule '{}'", s)),
        };
        let secs = n
            .checked_mul(unit_secs)
            .filter(|secs| *secs <= MAX_INTERVAL.as_secs())
            .ok_or_else(|| format!("schedule interval '{}' exceeds 365d", s))?;
        if secs == 0 {
            return Err("schedule interval must be positive".to_string());
        }
        Ok(Cadence::Every(Duration::from_secs(secs)))
    }
}

impl fmt::Display for Cadence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cadence::Daily => f.write_str("daily"),
            Cadence::TwiceDaily => f.write_str("twice_daily"),
            Cadence::ThriceDaily => f.write_str("thrice_daily"),
            Cadence::Weekly => f.write_str("weekly"),
            Cadence::Every(d) => {
                let secs = d.as_secs();
                if secs % DAY == 0 {
                    write!(f, "{}d", secs / DAY)
                } else if secs % HOUR == 0 {
                    write!(f, "{}h", secs / HOUR)
                } else if secs % 60 == 0 {
                    write!(f, "{}m", secs / 60)
                } else {
                    write!(f, "{}s", secs)
                }
            }
        }
    }
}

impl TryFrom<String> for Cadence {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Cadence> for String {
    fn from(c: Cadence) -> Self {
        c.to_string()
    }
}

/// Source of time and interruptible waiting
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Wait until `deadline`; returns true if the stop signal fired first
    async fn sleep_until(&self, deadline: DateTime<Utc>, stop: &mut watch::Receiver<bool>) -> bool;
}

/// Wall clock backed by tokio timers
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep_until(&self, deadline: DateTime<Utc>, stop: &mut watch::Receiver<bool>) -> bool {
        if *stop.borrow() {
            return true;
        }
        let wait = (deadline - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        let stopped = tokio::select! {
            _ = tokio::time::sleep(wait) => false,
            stopped = wait_for_stop(stop) => stopped,
        };
        stopped || *stop.borrow()
    }
}

/// Resolves once stop is set; never resolves if the sender is gone
pub async fn wait_for_stop(stop: &mut watch::Receiver<bool>) -> bool {
    // The borrow guard is !Send; drop it before parking
    let fired = stop.wait_for(|v| *v).await.is_ok();
    if fired {
        true
    } else {
        std::future::pending().await
    }
}

/// Something the scheduler can run once per tick
#[async_trait]
pub trait PipelineRunner: Send + Sync {
    /// Execute one pipeline run. `Err` means an unexpected error.
    async fn next_run(&self) -> Result<RunRecord>;
}

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub cadence: Cadence,
    pub cooldown: Duration,
    /// 0 disables the limit
    pub max_consecutive_errors: u32,
    /// Stop after this many runs (None = forever)
    pub max_runs: Option<u32>,
}

/// Why the loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Signal,
    TooManyErrors(u32),
    MaxRuns,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunTally {
    pub done: u32,
    pub failed: u32,
    pub interrupted: u32,
    pub errors: u32,
}

impl RunTally {
    pub fn total(&self) -> u32 {
        self.done + self.failed + self.interrupted + self.errors
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerReport {
    pub tally: RunTally,
    pub reason: StopReason,
}

pub struct Scheduler<C: Clock> {
    settings: SchedulerSettings,
    clock: C,
}

/// `t + d`, saturating at chrono's upper bound so a fire time never stays put
fn add(t: DateTime<Utc>, d: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(d)
        .ok()
        .and_then(|d| t.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

impl<C: Clock> Scheduler<C> {
    pub fn new(settings: SchedulerSettings, clock: C) -> Self {
        Self { settings, clock }
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Next fire time after a run that fired at `fired_at`
    pub fn next_fire(&self, fired_at: DateTime<Utc>, errored: bool) -> DateTime<Utc> {
        let interval = self.settings.cadence.interval();
        let wait = if errored {
            self.settings.cooldown.min(interval)
        } else {
            interval
        };
        add(fired_at, wait)
    }

    pub async fn run_forever(
        &self,
        runner: &dyn PipelineRunner,
        mut stop: watch::Receiver<bool>,
    ) -> SchedulerReport {
        let mut tally = RunTally::default();
        let mut consecutive_errors = 0u32;
        let mut next = self.clock.now();

        info!(cadence = %self.settings.cadence, "Scheduler started");

        let reason = loop {
            if self.clock.sleep_until(next, &mut stop).await {
                break StopReason::Signal;
            }

            let fired_at = self.clock.now();
            let errored = match runner.next_run().await {
                Ok(record) => {
                    consecutive_errors = 0;
                    if record.is_done() {
                        tally.done += 1;
                    } else if record.is_failed() {
                        tally.failed += 1;
                    } else {
                        tally.interrupted += 1;
                    }
                    info!(
                        unit_id = %record.unit_id,
                        outcome = record.outcome_label(),
                        "Scheduled run finished"
                    );
                    false
                }
                Err(e) => {
                    consecutive_errors += 1;
                    tally.errors += 1;
                    error!(
                        error = %format!("{:#}", e),
                        consecutive_errors,
                        "Scheduled run raised an unexpected error"
                    );
                    true
                }
            };

            let limit = self.settings.max_consecutive_errors;
            if limit > 0 && consecutive_errors >= limit {
                error!(consecutive_errors, "Too many consecutive errors, stopping scheduler");
                break StopReason::TooManyErrors(consecutive_errors);
            }

            if let Some(max) = self.settings.max_runs {
                if tally.total() >= max {
                    break StopReason::MaxRuns;
                }
            }

            if *stop.borrow() {
                break StopReason::Signal;
            }

            next = self.next_fire(fired_at, errored);
            if errored {
                warn!(resume_at = %next, "Cooling down after error");
            } else {
                info!(next_run = %next, "Next run scheduled");
            }
        };

        info!(?reason, runs = tally.total(), "Scheduler stopped");
        SchedulerReport { tally, reason }
    }
}
