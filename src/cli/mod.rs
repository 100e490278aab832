//! Command-line interface for reelpipe.
//!
//! Without a subcommand, runs the pipeline: once, `--count N` times back to
//! back, or forever on the configured cadence with `--schedule`.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::config::{self, ResolvedConfig};
use crate::core::scheduler::wait_for_stop;
use crate::core::{
    Orchestrator, QuotaTracker, RunLog, RunOptions, Scheduler, SchedulerSettings, StopReason,
    SystemClock,
};
use crate::domain::{PublishOutcome, RunOutcome, RunRecord};

/// Exit code for a run cut short by Ctrl+C
const EXIT_INTERRUPTED: u8 = 130;

/// reelpipe - scheduled short-video pipeline
#[derive(Parser, Debug)]
#[command(name = "reelpipe")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Config file (defaults to $REELPIPE_CONFIG, then ./config.yaml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Disable the publish stage
    #[arg(long)]
    pub no_upload: bool,

    /// Run N pipeline executions back to back
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
    pub count: u32,

    /// Enter the long-running scheduler loop
    #[arg(long, conflicts_with = "count")]
    pub schedule: bool,

    /// Use this topic instead of drawing from the pool
    #[arg(long)]
    pub topic: Option<String>,

    /// Offline content template only (no script API)
    #[arg(long)]
    pub test: bool,

    /// Vertical 1080x1920 short, capped at 60 seconds
    #[arg(long)]
    pub short: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List recent runs
    Runs {
        /// Maximum number of runs to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Show the publish quota window
    Quota,

    /// Show resolved configuration
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<ExitCode> {
        let config = config::load_config(self.config.as_deref())?;

        match self.command {
            Some(Commands::Runs { limit }) => list_runs(&config, limit).await,
            Some(Commands::Quota) => show_quota(&config),
            Some(Commands::Config) => show_config(&config),
            None => {
                let options = RunOptions {
                    test_mode: self.test,
                    shorts: self.short,
                    no_upload: self.no_upload,
                };
                if self.schedule {
                    if self.topic.is_some() || self.test {
                        warn!("--topic and --test are ignored in scheduled mode");
                    }
                    let options = RunOptions {
                        test_mode: false,
                        ..options
                    };
                    run_scheduled(&config, options).await
                } else {
                    run_batch(&config, options, self.count, self.topic.as_deref()).await
                }
            }
        }
    }
}

/// Stop flag flipped by Ctrl+C
fn stop_on_ctrl_c() -> watch::Receiver<bool> {
    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Stop requested, finishing current stage");
            let _ = stop_tx.send(true);
        }
    });
    stop_rx
}

async fn run_batch(
    config: &ResolvedConfig,
    options: RunOptions,
    count: u32,
    topic: Option<&str>,
) -> Result<ExitCode> {
    let stop = stop_on_ctrl_c();
    let orchestrator = Orchestrator::from_config(config, options)?.with_stop(stop.clone());
    let pause = Duration::from_secs(config.settings.scheduler.between_runs_seconds);

    let report = run_sequence(&orchestrator, count, topic, pause, stop).await?;
    if count > 1 {
        eprintln!("\n[{} of {} runs completed]", report.done, count);
    }
    Ok(report.exit_code())
}

/// How a `--count` batch ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchEnd {
    /// Every run finished DONE
    Completed,
    /// A run finished FAILED; later runs were not started
    Failed,
    /// Stop was requested during a run or the pause after it
    Interrupted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchReport {
    /// Runs started
    pub runs: u32,
    /// Runs that finished DONE
    pub done: u32,
    pub end: BatchEnd,
}

impl BatchReport {
    /// Process exit status: 0 when all runs were DONE, 1 on a failed run, 130 on interrupt
    pub fn exit_status(&self) -> u8 {
        match self.end {
            BatchEnd::Completed => 0,
            BatchEnd::Failed => 1,
            BatchEnd::Interrupted => EXIT_INTERRUPTED,
        }
    }

    pub fn exit_code(&self) -> ExitCode {
        ExitCode::from(self.exit_status())
    }
}

/// Run `count` executions sequentially, stopping at the first one that is not DONE
pub async fn run_sequence(
    orchestrator: &Orchestrator,
    count: u32,
    topic: Option<&str>,
    pause: Duration,
    mut stop: watch::Receiver<bool>,
) -> Result<BatchReport> {
    let mut report = BatchReport {
        runs: 0,
        done: 0,
        end: BatchEnd::Completed,
    };

    for n in 1..=count {
        if count > 1 {
            info!(run = n, of = count, "Starting run");
        }

        let run = orchestrator.run_once(topic).await?;
        report.runs += 1;
        print_run(&run);

        match run.outcome {
            RunOutcome::Done => report.done += 1,
            RunOutcome::Failed { .. } => {
                if n < count {
                    warn!(completed = report.done, "Stopping batch after failed run");
                }
                report.end = BatchEnd::Failed;
                return Ok(report);
            }
            _ => {
                report.end = BatchEnd::Interrupted;
                return Ok(report);
            }
        }

        if n < count {
            info!(seconds = pause.as_secs(), "Waiting before next run");
            let stopped = tokio::select! {
                _ = tokio::time::sleep(pause) => false,
                stopped = wait_for_stop(&mut stop) => stopped,
            };
            if stopped {
                eprintln!("\n[Stopped after {} of {} runs]", report.done, count);
                report.end = BatchEnd::Interrupted;
                return Ok(report);
            }
        }
    }

    Ok(report)
}

async fn run_scheduled(config: &ResolvedConfig, options: RunOptions) -> Result<ExitCode> {
    let stop = stop_on_ctrl_c();
    let orchestrator = Orchestrator::from_config(config, options)?.with_stop(stop.clone());

    let scheduler_config = &config.settings.scheduler;
    let scheduler = Scheduler::new(
        SchedulerSettings {
            cadence: config.cadence,
            cooldown: Duration::from_secs(scheduler_config.cooldown_seconds),
            max_consecutive_errors: scheduler_config.max_consecutive_errors,
            max_runs: None,
        },
        SystemClock,
    );

    let report = scheduler.run_forever(&orchestrator, stop).await;
    let tally = &report.tally;
    eprintln!(
        "\n[Scheduler stopped: {} done, {} failed, {} interrupted, {} errors]",
        tally.done, tally.failed, tally.interrupted, tally.errors
    );

    match report.reason {
        StopReason::TooManyErrors(n) => {
            eprintln!("[Gave up after {} consecutive errors]", n);
            Ok(ExitCode::FAILURE)
        }
        StopReason::Signal | StopReason::MaxRuns => Ok(ExitCode::SUCCESS),
    }
}

fn print_run(run: &RunRecord) {
    for entry in &run.stages {
        let backend = entry.backend.as_deref().unwrap_or("-");
        match &entry.error {
            Some(note) => println!(
                "  {:<10} {:<9} {:<12} {}",
                entry.stage.name(),
                status_label(entry.status),
                backend,
                note
            ),
            None => println!(
                "  {:<10} {:<9} {}",
                entry.stage.name(),
                status_label(entry.status),
                backend
            ),
        }
    }

    match &run.outcome {
        RunOutcome::Done => {
            match run.publish.as_ref().map(|p| &p.outcome) {
                Some(PublishOutcome::Published { url, .. }) => {
                    eprintln!("\n[Run {} completed: {}]", run.unit_id, url)
                }
                Some(PublishOutcome::Skipped { reason }) => {
                    eprintln!("\n[Run {} completed, upload skipped: {}]", run.unit_id, reason)
                }
                _ => eprintln!("\n[Run {} completed]", run.unit_id),
            }
        }
        RunOutcome::Failed { reason } => eprintln!("\n[Run {} failed: {}]", run.unit_id, reason),
        RunOutcome::Interrupted { before } => {
            eprintln!("\n[Run {} interrupted before {}]", run.unit_id, before)
        }
        RunOutcome::Running => eprintln!("\n[Run {} still running]", run.unit_id),
    }
}

fn status_label(status: crate::domain::StageStatus) -> &'static str {
    use crate::domain::StageStatus;
    match status {
        StageStatus::Success => "ok",
        StageStatus::Fallback => "fallback",
        StageStatus::Failure => "FAILED",
        StageStatus::Skipped => "skipped",
    }
}

/// List recent runs, newest first
async fn list_runs(config: &ResolvedConfig, limit: usize) -> Result<ExitCode> {
    let layout = config.layout();
    let runs = RunLog::new(layout.run_log(), layout.upload_log())
        .recent_runs(limit)
        .await?;

    if runs.is_empty() {
        println!("No runs found");
        return Ok(ExitCode::SUCCESS);
    }

    println!("{:<22} {:<20} {:<12} {:<30}", "UNIT ID", "STARTED", "OUTCOME", "TOPIC");
    println!("{}", "-".repeat(86));

    for run in runs {
        println!(
            "{:<22} {:<20} {:<12} {:<30}",
            run.unit_id.as_str(),
            run.started_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            run.outcome_label(),
            run.topic.as_deref().unwrap_or("-")
        );
    }

    Ok(ExitCode::SUCCESS)
}

fn show_quota(config: &ResolvedConfig) -> Result<ExitCode> {
    let ceiling = config.settings.daily_quota;
    let tracker = QuotaTracker::new(config.layout().quota_state(), ceiling);
    let state = tracker.snapshot();

    println!("Quota file:   {}", tracker.path().display());
    println!("Used:         {}/{}", state.count.min(ceiling), ceiling);
    println!("Remaining:    {}", state.remaining(ceiling));
    println!("Window start: {}", state.window_start.format("%Y-%m-%d %H:%M:%S UTC"));
    println!("Window end:   {}", state.window_end().format("%Y-%m-%d %H:%M:%S UTC"));
    if state.exhausted {
        println!("Platform reported its upload limit; publishing resumes after the window ends");
    }
    if state.window_end() <= Utc::now() {
        println!("(window has expired; the next publish starts a new one)");
    }

    Ok(ExitCode::SUCCESS)
}

fn show_config(config: &ResolvedConfig) -> Result<ExitCode> {
    let s = &config.settings;
    let layout = config.layout();

    let config_file = config
        .config_file
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "(none - using defaults)".to_string());
    println!("Config file: {}", config_file);
    println!("Workspace:   {}", config.workspace.display());
    println!();
    println!("Pipeline:");
    println!("  Niche:          {}", s.niche);
    println!("  Duration:       {}s", s.duration);
    println!("  Resolution:     {}x{} @ {}fps", s.resolution.0, s.resolution.1, s.fps);
    println!("  Schedule:       {}", config.cadence);
    println!("  Topics:         {}", config.topics().len());
    println!();
    println!("Publishing:");
    println!("  Upload enabled: {}", s.upload_enabled);
    println!("  Privacy:        {}", s.privacy_status.as_str());
    println!("  Daily quota:    {}", s.daily_quota);
    println!("  Max attempts:   {}", s.publish.retry.max_attempts);
    println!("  Attempt bound:  {}s", s.publish.timeout_seconds);
    println!();
    println!("Background music:");
    if s.assets.background_music {
        println!("  Directory:      {}", config.workspace_path(&s.assets.music_dir).display());
        println!("  Volume:         {:.2}", s.assets.music_volume);
    } else {
        println!("  Disabled");
    }
    println!();
    println!("Backend timeouts:");
    for (stage, t) in [
        ("content", s.backends.content.timeouts()),
        ("narration", s.backends.narration.timeouts()),
        ("render", s.backends.render.timeouts()),
    ] {
        println!(
            "  {:<10} primary {}s, fallback {}s",
            stage,
            t.primary.as_secs(),
            t.fallback.as_secs()
        );
    }
    println!();
    println!("Paths:");
    println!("  Content:  {}", layout.content_dir().display());
    println!("  Videos:   {}", layout.video_dir().display());
    println!("  Run log:  {}", layout.run_log().display());
    println!("  Quota:    {}", layout.quota_state().display());

    Ok(ExitCode::SUCCESS)
}
