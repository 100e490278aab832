//! Pipeline orchestrator.
//!
//! Runs Content -> Narration -> Render -> Publish for one content unit and
//! records the outcome. A stage failure ends the run as FAILED without
//! touching later stages; artifacts already written stay on disk. Unexpected
//! errors are recorded as FAILED too, then returned to the caller.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::watch;
use tracing::{error, info, instrument, warn};

use crate::adapters::media::BackgroundMusic;
use crate::adapters::{
    ContentBackend, ContentRequest, ElevenLabsBackend, GeminiBackend, LocalRenderer, Narration,
    NarrationBackend, NarrationRequest, PiperBackend, RenderBackend, RenderRequest, RenderedVideo,
    StockRenderer, TemplateBackend, Uploader, YouTubeUploader,
};
use crate::config::{self, ResolvedConfig};
use crate::domain::{
    BackendRole, ContentUnit, NarrationArtifact, PrivacyStatus, PublishOutcome, PublishRecord,
    RenderArtifact, RunRecord, Script, Stage, StageEntry, StageStatus, UnitId, VideoMetadata,
};

use super::artifact_store::ArtifactStore;
use super::publisher::Publisher;
use super::quota::QuotaTracker;
use super::run_log::RunLog;
use super::scheduler::PipelineRunner;
use super::stage::{Produced, StageAdapter, StageFailure};
use super::topics::TopicPicker;

/// Static per-run parameters
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub niche: String,
    /// Target narration length in seconds
    pub duration_secs: u32,
    pub resolution: (u32, u32),
    pub fps: u32,
    /// Hard cap on video length
    pub max_video_secs: Option<f64>,
    pub narration_speed: f32,
    pub upload_enabled: bool,
    pub shorts: bool,
    pub privacy_status: PrivacyStatus,
    pub category_id: String,
    pub made_for_kids: bool,
}

/// Command-line switches that shape how the pipeline is built
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Use only the offline template for content
    pub test_mode: bool,
    pub shorts: bool,
    /// Force-disable publishing regardless of config
    pub no_upload: bool,
}

impl PipelineSettings {
    pub fn from_config(config: &ResolvedConfig, options: RunOptions) -> Self {
        let s = &config.settings;
        let (resolution, duration_secs, max_video_secs, narration_speed) = if options.shorts {
            (
                config::SHORTS_RESOLUTION,
                s.duration.min(config::SHORTS_MAX_SECS),
                Some(config::SHORTS_MAX_SECS as f64),
                config::SHORTS_SPEED,
            )
        } else {
            (s.resolution, s.duration, None, s.narration_speed)
        };

        Self {
            niche: s.niche.clone(),
            duration_secs,
            resolution,
            fps: s.fps,
            max_video_secs,
            narration_speed,
            upload_enabled: s.upload_enabled && !options.no_upload,
            shorts: options.shorts,
            privacy_status: s.privacy_status,
            category_id: s.category_id.clone(),
            made_for_kids: s.made_for_kids,
        }
    }
}

/// Main pipeline orchestrator
pub struct Orchestrator {
    settings: PipelineSettings,
    store: ArtifactStore,
    log: RunLog,
    topics: TopicPicker,
    content: StageAdapter<ContentRequest, Script>,
    narration: StageAdapter<NarrationRequest, Narration>,
    render: StageAdapter<RenderRequest, RenderedVideo>,
    publisher: Publisher,
    stop: watch::Receiver<bool>,
}

/// Stage outcome inside a run: keep going, or the run is already finished
enum Step<T> {
    Next(T),
    Halt,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        settings: PipelineSettings,
        store: ArtifactStore,
        log: RunLog,
        topics: TopicPicker,
        content: StageAdapter<ContentRequest, Script>,
        narration: StageAdapter<NarrationRequest, Narration>,
        render: StageAdapter<RenderRequest, RenderedVideo>,
        publisher: Publisher,
    ) -> Self {
        // Sender dropped immediately: the flag stays false
        let (_, stop) = watch::channel(false);
        Self {
            settings,
            store,
            log,
            topics,
            content,
            narration,
            render,
            publisher,
            stop,
        }
    }

    /// Build the production pipeline from configuration
    pub fn from_config(config: &ResolvedConfig, options: RunOptions) -> Result<Self> {
        let layout = config.layout();
        layout.ensure()?;

        let backends = &config.settings.backends;

        let content_timeouts = backends.content.timeouts();
        let template: Arc<ContentBackend> = Arc::new(TemplateBackend::new());
        let content = if options.test_mode {
            StageAdapter::new(Stage::Content, template, content_timeouts.fallback)
        } else {
            let gemini: Arc<ContentBackend> =
                Arc::new(GeminiBackend::from_env(backends.content.model.clone()));
            StageAdapter::new(Stage::Content, gemini, content_timeouts.primary)
                .with_fallback(template, content_timeouts.fallback)
        };

        let narration_timeouts = backends.narration.timeouts();
        let elevenlabs: Arc<NarrationBackend> = Arc::new(ElevenLabsBackend::from_env(
            backends.narration.voice_id.clone(),
            backends.narration.model_id.clone(),
        ));
        let piper: Arc<NarrationBackend> = Arc::new(PiperBackend::new(
            config.workspace_path(&backends.narration.piper_model),
        ));
        let narration = StageAdapter::new(Stage::Narration, elevenlabs, narration_timeouts.primary)
            .with_fallback(piper, narration_timeouts.fallback);

        let render_timeouts = backends.render.timeouts();
        let assets = &config.settings.assets;
        let music = assets.background_music.then(|| {
            BackgroundMusic::new(config.workspace_path(&assets.music_dir), assets.music_volume)
        });
        let stock: Arc<RenderBackend> =
            Arc::new(StockRenderer::from_env().with_music(music.clone()));
        let local: Arc<RenderBackend> = Arc::new(
            LocalRenderer::new(Some(config.workspace_path(&backends.render.clip_dir)))
                .with_background_color(backends.render.background_color.clone())
                .with_music(music),
        );
        let render = StageAdapter::new(Stage::Render, stock, render_timeouts.primary)
            .with_fallback(local, render_timeouts.fallback);

        let uploader: Arc<dyn Uploader> = Arc::new(YouTubeUploader::from_env());
        let publisher = Publisher::new(
            uploader,
            QuotaTracker::new(layout.quota_state(), config.settings.daily_quota),
            config.settings.publish.retry.clone(),
        )
        .with_attempt_timeout(config.settings.publish.attempt_timeout());

        Ok(Self::new(
            PipelineSettings::from_config(config, options),
            ArtifactStore::new(layout.clone()),
            RunLog::new(layout.run_log(), layout.upload_log()),
            TopicPicker::new(layout.used_topics(), &config.settings.niche, config.topics()),
            content,
            narration,
            render,
            publisher,
        ))
    }

    /// Observe an external stop flag between stages
    pub fn with_stop(mut self, stop: watch::Receiver<bool>) -> Self {
        self.stop = stop;
        self
    }

    fn stop_requested(&self) -> bool {
        *self.stop.borrow()
    }

    /// Execute one pipeline run.
    ///
    /// Returns the finished RunRecord (DONE, FAILED or INTERRUPTED) after
    /// appending it to the run log. `Err` is reserved for unexpected errors;
    /// those are still recorded as a FAILED RunRecord first.
    #[instrument(skip(self), fields(niche = %self.settings.niche))]
    pub async fn run_once(&self, topic: Option<&str>) -> Result<RunRecord> {
        let topic = match topic {
            Some(t) if !t.trim().is_empty() => t.trim().to_string(),
            _ => self.topics.pick(),
        };

        let started = Utc::now();
        let unit_id = match self.store.reserve_unit_id(started) {
            Ok(id) => id,
            Err(e) => {
                let mut run = RunRecord::new(UnitId::from_timestamp(started), &self.settings.niche);
                run.topic = Some(topic);
                return self.abort(run, e).await;
            }
        };

        let mut run = RunRecord::new(unit_id, &self.settings.niche);
        run.topic = Some(topic.clone());
        info!(unit_id = %run.unit_id, %topic, "Starting pipeline run");

        if let Err(e) = self.execute(&mut run, &topic).await {
            return self.abort(run, e).await;
        }

        self.log.append_run(&run).await?;
        info!(
            unit_id = %run.unit_id,
            outcome = run.outcome_label(),
            "Pipeline run finished"
        );
        Ok(run)
    }

    /// Record an unexpected error on the run, persist it, and hand the error back
    async fn abort(&self, mut run: RunRecord, e: anyhow::Error) -> Result<RunRecord> {
        let message = format!("{:#}", e);
        error!(unit_id = %run.unit_id, error = %message, "Run aborted by unexpected error");

        run.error = Some(message.clone());
        if !run.is_finished() {
            run.finish_failed(format!("unexpected error: {}", message));
        }
        if let Err(log_err) = self.log.append_run(&run).await {
            warn!(error = %log_err, "Failed to record aborted run");
        }
        Err(e)
    }

    async fn execute(&self, run: &mut RunRecord, topic: &str) -> Result<()> {
        let unit = match self.content_stage(run, topic).await? {
            Step::Next(unit) => unit,
            Step::Halt => return Ok(()),
        };
        let narration = match self.narration_stage(run, &unit).await? {
            Step::Next(n) => n,
            Step::Halt => return Ok(()),
        };
        let render = match self.render_stage(run, &unit, &narration).await? {
            Step::Next(r) => r,
            Step::Halt => return Ok(()),
        };
        self.publish_stage(run, &unit, &render).await
    }

    /// Finish the run as interrupted if stop was requested
    fn check_stop(&self, run: &mut RunRecord, stage: Stage) -> bool {
        if self.stop_requested() {
            info!(unit_id = %run.unit_id, %stage, "Stop requested, not starting stage");
            run.finish_interrupted(stage);
            return true;
        }
        false
    }

    async fn content_stage(&self, run: &mut RunRecord, topic: &str) -> Result<Step<ContentUnit>> {
        if self.check_stop(run, Stage::Content) {
            return Ok(Step::Halt);
        }

        let request = ContentRequest {
            niche: self.settings.niche.clone(),
            topic: topic.to_string(),
            duration_secs: self.settings.duration_secs,
        };
        let produced = match self.content.produce(&request).await {
            Ok(p) => p,
            Err(failure) => return self.stage_failed(run, failure).map(|_| Step::Halt),
        };

        let entry = stage_entry(Stage::Content, &produced);
        let unit = ContentUnit::from_script(
            run.unit_id.clone(),
            &self.settings.niche,
            topic,
            produced.output,
        );
        if unit.lines.is_empty() {
            let reason = format!("{} returned an empty script", unit_backend(&entry));
            error!(unit_id = %unit.id, %reason, "Content stage failed");
            run.record(StageEntry::new(Stage::Content, StageStatus::Failure).with_error(&reason))?;
            run.finish_failed(reason);
            return Ok(Step::Halt);
        }

        self.store.save_unit(&unit).await?;
        run.record(entry)?;
        info!(unit_id = %unit.id, title = %unit.title, lines = unit.lines.len(), "Content ready");
        Ok(Step::Next(unit))
    }

    async fn narration_stage(
        &self,
        run: &mut RunRecord,
        unit: &ContentUnit,
    ) -> Result<Step<NarrationArtifact>> {
        if self.check_stop(run, Stage::Narration) {
            return Ok(Step::Halt);
        }

        let request = NarrationRequest {
            unit_id: unit.id.clone(),
            text: unit.narration_text(),
            output_dir: self.store.layout().audio_dir(),
            speed: self.settings.narration_speed,
        };
        let produced = match self.narration.produce(&request).await {
            Ok(p) => p,
            Err(failure) => return self.stage_failed(run, failure).map(|_| Step::Halt),
        };

        let entry = stage_entry(Stage::Narration, &produced);
        let artifact = NarrationArtifact {
            unit_id: unit.id.clone(),
            path: produced.output.path,
            duration_secs: produced.output.duration_secs,
            engine: produced.backend,
            role: produced.role,
            created_at: Utc::now(),
        };

        self.store.save_narration(&artifact).await?;
        run.record(entry)?;
        info!(
            unit_id = %unit.id,
            engine = %artifact.engine,
            duration_secs = artifact.duration_secs,
            "Narration ready"
        );
        Ok(Step::Next(artifact))
    }

    async fn render_stage(
        &self,
        run: &mut RunRecord,
        unit: &ContentUnit,
        narration: &NarrationArtifact,
    ) -> Result<Step<RenderArtifact>> {
        if self.check_stop(run, Stage::Render) {
            return Ok(Step::Halt);
        }

        let layout = self.store.layout();
        let request = RenderRequest {
            unit: unit.clone(),
            narration: narration.clone(),
            output_path: layout.video_path(&unit.id),
            work_dir: layout.unit_dir(&unit.id),
            resolution: self.settings.resolution,
            fps: self.settings.fps,
            max_duration_secs: self.settings.max_video_secs,
        };
        let produced = match self.render.produce(&request).await {
            Ok(p) => p,
            Err(failure) => return self.stage_failed(run, failure).map(|_| Step::Halt),
        };

        let entry = stage_entry(Stage::Render, &produced);
        let artifact = RenderArtifact {
            unit_id: unit.id.clone(),
            path: produced.output.path,
            resolution: self.settings.resolution,
            fps: self.settings.fps,
            clips: produced.output.clips,
            renderer: produced.backend,
            role: produced.role,
            created_at: Utc::now(),
        };

        self.store.save_render(&artifact).await?;
        run.record(entry)?;
        info!(unit_id = %unit.id, path = %artifact.path.display(), "Render ready");
        Ok(Step::Next(artifact))
    }

    async fn publish_stage(
        &self,
        run: &mut RunRecord,
        unit: &ContentUnit,
        render: &RenderArtifact,
    ) -> Result<()> {
        if !self.settings.upload_enabled {
            info!(unit_id = %unit.id, "Upload disabled, video kept at {}", render.path.display());
            run.record(
                StageEntry::new(Stage::Publish, StageStatus::Skipped).with_error("upload disabled"),
            )?;
            run.finish_done();
            return Ok(());
        }

        if self.check_stop(run, Stage::Publish) {
            return Ok(());
        }

        let metadata = VideoMetadata::for_unit(
            unit,
            self.settings.privacy_status,
            &self.settings.category_id,
            self.settings.made_for_kids,
            self.settings.shorts,
        );

        let start = std::time::Instant::now();
        let result = self.publisher.publish(render, &metadata).await;
        let elapsed = millis(start.elapsed());

        match result {
            Ok(record) => {
                let entry = if record.is_skipped() {
                    StageEntry::new(Stage::Publish, StageStatus::Skipped)
                        .with_error(skip_reason(&record))
                } else {
                    StageEntry::new(Stage::Publish, StageStatus::Success)
                };
                self.log.append_publish(&record).await?;
                run.record(entry.with_duration(elapsed))?;
                run.publish = Some(record);
                run.finish_done();
            }
            Err(e) => {
                error!(
                    unit_id = %unit.id,
                    error = %e,
                    video = %render.path.display(),
                    "Publish failed, rendered video kept for manual upload"
                );
                let record = e.to_record(render, &metadata);
                self.log.append_publish(&record).await?;
                run.record(
                    StageEntry::new(Stage::Publish, StageStatus::Failure)
                        .with_duration(elapsed)
                        .with_error(e.to_string()),
                )?;
                run.publish = Some(record);
                run.finish_failed(format!("publish: {}", e));
            }
        }
        Ok(())
    }

    fn stage_failed(&self, run: &mut RunRecord, failure: StageFailure) -> Result<()> {
        error!(
            unit_id = %run.unit_id,
            stage = %failure.stage,
            backends = ?failure.backends(),
            "Stage failed"
        );
        run.record(
            StageEntry::new(failure.stage, StageStatus::Failure).with_error(failure.to_string()),
        )?;
        run.finish_failed(failure.to_string());
        Ok(())
    }
}

fn millis(d: Duration) -> u64 {
    d.as_millis().min(u64::MAX as u128) as u64
}

fn unit_backend(entry: &StageEntry) -> &str {
    entry.backend.as_deref().unwrap_or("backend")
}

fn skip_reason(record: &PublishRecord) -> String {
    match &record.outcome {
        PublishOutcome::Skipped { reason } => reason.clone(),
        _ => String::new(),
    }
}

/// Stage entry for a produced artifact; a fallback keeps the primary's error
fn stage_entry<O>(stage: Stage, produced: &Produced<O>) -> StageEntry {
    let status = match produced.role {
        BackendRole::Primary => StageStatus::Success,
        BackendRole::Fallback => StageStatus::Fallback,
    };
    let mut entry = StageEntry::new(stage, status)
        .with_backend(produced.backend.clone())
        .with_duration(millis(produced.elapsed));
    if let Some(first) = produced.failures.first() {
        entry = entry.with_error(first.to_string());
    }
    entry
}

#[async_trait]
impl PipelineRunner for Orchestrator {
    async fn next_run(&self) -> Result<RunRecord> {
        self.run_once(None).await
    }
}
