//! Shared fixtures: fake stage backends, a scripted uploader and a manual clock.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tempfile::TempDir;
use tokio::sync::watch;

use reelpipe::adapters::{
    Backend, BackendError, ContentRequest, Narration, NarrationRequest, RenderRequest,
    RenderedVideo, UploadError, Uploader,
};
use reelpipe::config::paths::Layout;
use reelpipe::core::{
    ArtifactStore, Clock, Orchestrator, PipelineSettings, Publisher, QuotaTracker, RetryPolicy,
    RunLog, StageAdapter, TopicPicker,
};
use reelpipe::domain::{PrivacyStatus, Script, Stage, VideoMetadata};

const T: Duration = Duration::from_secs(5);

/// Content backend returning a fixed two-line script
pub struct FakeContent {
    pub name: &'static str,
    pub fail: bool,
    pub calls: AtomicU32,
    /// Flip the stop flag after producing
    pub stop_after: Option<watch::Sender<bool>>,
}

impl FakeContent {
    pub fn ok(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            fail: false,
            calls: AtomicU32::new(0),
            stop_after: None,
        })
    }

    pub fn failing(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            fail: true,
            calls: AtomicU32::new(0),
            stop_after: None,
        })
    }

    pub fn stopping(name: &'static str, stop: watch::Sender<bool>) -> Arc<Self> {
        Arc::new(Self {
            name,
            fail: false,
            calls: AtomicU32::new(0),
            stop_after: Some(stop),
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Backend<ContentRequest, Script> for FakeContent {
    fn name(&self) -> &str {
        self.name
    }

    async fn produce(&self, input: &ContentRequest) -> Result<Script, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(BackendError::RateLimited("quota exceeded".to_string()));
        }
        if let Some(stop) = &self.stop_after {
            let _ = stop.send(true);
        }
        Ok(Script {
            title: format!("Facts about {}", input.topic),
            description: format!("A short video about {}.", input.topic),
            tags: vec!["facts".to_string(), input.topic.clone()],
            body: format!("{} changed everything.\nHere is how it works.", input.topic),
        })
    }
}

/// Narration backend writing a placeholder audio file
pub struct FakeNarration {
    pub name: &'static str,
    pub fail: bool,
    pub calls: AtomicU32,
}

impl FakeNarration {
    pub fn ok(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            fail: false,
            calls: AtomicU32::new(0),
        })
    }

    pub fn failing(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            fail: true,
            calls: AtomicU32::new(0),
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Backend<NarrationRequest, Narration> for FakeNarration {
    fn name(&self) -> &str {
        self.name
    }

    async fn produce(&self, input: &NarrationRequest) -> Result<Narration, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(BackendError::Unavailable(format!("{} offline", self.name)));
        }
        tokio::fs::create_dir_all(&input.output_dir).await?;
        let path = input.output_path("wav");
        tokio::fs::write(&path, b"RIFF").await?;
        Ok(Narration {
            path,
            duration_secs: 12.5,
        })
    }
}

/// Render backend writing a placeholder video file
pub struct FakeRender {
    pub name: &'static str,
    pub fail: bool,
    pub calls: AtomicU32,
}

impl FakeRender {
    pub fn ok(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            fail: false,
            calls: AtomicU32::new(0),
        })
    }

    pub fn failing(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            fail: true,
            calls: AtomicU32::new(0),
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Backend<RenderRequest, RenderedVideo> for FakeRender {
    fn name(&self) -> &str {
        self.name
    }

    async fn produce(&self, input: &RenderRequest) -> Result<RenderedVideo, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(BackendError::Failed("ffmpeg exited with 1".to_string()));
        }
        if let Some(parent) = input.output_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&input.output_path, b"video").await?;
        Ok(RenderedVideo {
            path: input.output_path.clone(),
            clips: vec!["clip.mp4".to_string()],
        })
    }
}

/// Uploader replaying scripted results, then succeeding
#[derive(Default)]
pub struct FakeUploader {
    script: Mutex<VecDeque<Result<String, UploadError>>>,
    pub calls: AtomicU32,
}

impl FakeUploader {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn scripted(results: Vec<Result<String, UploadError>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(results.into()),
            calls: AtomicU32::new(0),
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Uploader for FakeUploader {
    fn name(&self) -> &str {
        "fake"
    }

    async fn upload(
        &self,
        _video: &std::path::Path,
        _metadata: &VideoMetadata,
    ) -> Result<String, UploadError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(format!("vid{}", n)))
    }

    fn video_url(&self, video_id: &str) -> String {
        format!("https://example.test/watch?v={}", video_id)
    }
}

/// Backends wired into one orchestrator
pub struct Fixture {
    pub temp: TempDir,
    pub layout: Layout,
    pub content: Arc<FakeContent>,
    pub content_fallback: Arc<FakeContent>,
    pub narration: Arc<FakeNarration>,
    pub narration_fallback: Arc<FakeNarration>,
    pub render: Arc<FakeRender>,
    pub render_fallback: Arc<FakeRender>,
    pub uploader: Arc<FakeUploader>,
    pub ceiling: u32,
    pub upload_enabled: bool,
    pub stop: Option<watch::Receiver<bool>>,
}

impl Fixture {
    pub fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let layout = Layout::new(temp.path());
        Self {
            temp,
            layout,
            content: FakeContent::ok("gemini"),
            content_fallback: FakeContent::ok("template"),
            narration: FakeNarration::ok("elevenlabs"),
            narration_fallback: FakeNarration::ok("piper"),
            render: FakeRender::ok("pexels"),
            render_fallback: FakeRender::ok("local"),
            uploader: FakeUploader::new(),
            ceiling: 6,
            upload_enabled: true,
            stop: None,
        }
    }

    pub fn settings(&self) -> PipelineSettings {
        PipelineSettings {
            niche: "tech_facts".to_string(),
            duration_secs: 60,
            resolution: (1920, 1080),
            fps: 30,
            max_video_secs: None,
            narration_speed: 1.0,
            upload_enabled: self.upload_enabled,
            shorts: false,
            privacy_status: PrivacyStatus::Private,
            category_id: "28".to_string(),
            made_for_kids: false,
        }
    }

    pub fn quota(&self) -> QuotaTracker {
        QuotaTracker::new(self.layout.quota_state(), self.ceiling)
    }

    pub fn run_log(&self) -> RunLog {
        RunLog::new(self.layout.run_log(), self.layout.upload_log())
    }

    pub fn store(&self) -> ArtifactStore {
        ArtifactStore::new(self.layout.clone())
    }

    pub fn orchestrator(&self) -> Orchestrator {
        let orchestrator = Orchestrator::new(
            self.settings(),
            self.store(),
            self.run_log(),
            TopicPicker::new(
                self.layout.used_topics(),
                "tech_facts",
                vec!["lasers".to_string(), "radio".to_string()],
            ),
            StageAdapter::<ContentRequest, Script>::new(Stage::Content, self.content.clone(), T)
                .with_fallback(self.content_fallback.clone(), T),
            StageAdapter::<NarrationRequest, Narration>::new(
                Stage::Narration,
                self.narration.clone(),
                T,
            )
            .with_fallback(self.narration_fallback.clone(), T),
            StageAdapter::<RenderRequest, RenderedVideo>::new(
                Stage::Render,
                self.render.clone(),
                T,
            )
            .with_fallback(self.render_fallback.clone(), T),
            Publisher::new(self.uploader.clone(), self.quota(), RetryPolicy::immediate(3)),
        );
        match &self.stop {
            Some(stop) => orchestrator.with_stop(stop.clone()),
            None => orchestrator,
        }
    }
}

/// Clock that jumps straight to each deadline
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
    pub waits: Mutex<Vec<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Utc.with_ymd_and_hms(2025, 1, 1, 6, 0, 0).unwrap()),
            waits: Mutex::new(Vec::new()),
        }
    }

    pub fn start(&self) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 6, 0, 0).unwrap()
    }

    pub fn waits(&self) -> Vec<DateTime<Utc>> {
        self.waits.lock().unwrap().clone()
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }

    async fn sleep_until(&self, deadline: DateTime<Utc>, stop: &mut watch::Receiver<bool>) -> bool {
        if *stop.borrow() {
            return true;
        }
        self.waits.lock().unwrap().push(deadline);
        let mut now = self.now.lock().unwrap();
        if deadline > *now {
            *now = deadline;
        }
        *stop.borrow()
    }
}
