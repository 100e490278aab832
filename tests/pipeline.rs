//! Orchestrator Integration Tests
//!
//! Full Content -> Narration -> Render -> Publish runs against fake backends.

mod common;

use common::{FakeContent, FakeNarration, FakeRender, FakeUploader, Fixture};
use reelpipe::adapters::{PermanentKind, UploadError};
use reelpipe::core::artifact_store::{NARRATION_FILE, RENDER_FILE, UNIT_FILE};
use reelpipe::domain::{PublishOutcome, RunOutcome, Stage, StageStatus};
use tokio::sync::watch;

#[tokio::test]
async fn test_upload_disabled_skips_publish_and_finishes() {
    let mut fixture = Fixture::new();
    fixture.upload_enabled = false;
    let orchestrator = fixture.orchestrator();

    let run = orchestrator.run_once(Some("lasers")).await.unwrap();

    assert!(run.is_done());
    assert!(run.publish.is_none());
    assert_eq!(fixture.uploader.calls(), 0);
    assert_eq!(run.status_of(Stage::Content), Some(StageStatus::Success));
    assert_eq!(run.status_of(Stage::Render), Some(StageStatus::Success));
    assert_eq!(run.status_of(Stage::Publish), Some(StageStatus::Skipped));
    assert!(fixture.layout.video_path(&run.unit_id).exists());

    // Quota untouched when nothing is published
    assert_eq!(fixture.quota().snapshot().count, 0);
}

#[tokio::test]
async fn test_successful_run_publishes_and_logs() {
    let fixture = Fixture::new();
    let orchestrator = fixture.orchestrator();

    let run = orchestrator.run_once(Some("lasers")).await.unwrap();

    assert!(run.is_done());
    assert_eq!(run.topic.as_deref(), Some("lasers"));
    let publish = run.publish.as_ref().unwrap();
    assert!(publish.is_published());
    assert_eq!(publish.video_id(), Some("vid1"));

    let store = fixture.store();
    for file in [UNIT_FILE, NARRATION_FILE, RENDER_FILE] {
        assert!(store.has(&run.unit_id, file), "missing {}", file);
    }

    let log = fixture.run_log();
    let runs = log.runs().await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].unit_id, run.unit_id);
    assert_eq!(log.publishes().await.unwrap().len(), 1);
    assert_eq!(fixture.quota().snapshot().count, 1);
}

#[tokio::test]
async fn test_primary_failure_is_recorded_as_fallback() {
    let mut fixture = Fixture::new();
    fixture.narration = FakeNarration::failing("elevenlabs");
    let orchestrator = fixture.orchestrator();

    let run = orchestrator.run_once(Some("radio")).await.unwrap();

    assert!(run.is_done());
    assert_eq!(run.status_of(Stage::Narration), Some(StageStatus::Fallback));
    assert_eq!(fixture.narration.calls(), 1);
    assert_eq!(fixture.narration_fallback.calls(), 1);

    let entry = run
        .stages
        .iter()
        .find(|e| e.stage == Stage::Narration)
        .unwrap();
    assert_eq!(entry.backend.as_deref(), Some("piper"));
    assert!(entry.error.as_deref().unwrap().contains("elevenlabs"));

    let narration = fixture.store().load_narration(&run.unit_id).await.unwrap();
    assert_eq!(narration.engine, "piper");
}

#[tokio::test]
async fn test_narration_failure_contains_run() {
    let mut fixture = Fixture::new();
    fixture.narration = FakeNarration::failing("elevenlabs");
    fixture.narration_fallback = FakeNarration::failing("piper");
    let orchestrator = fixture.orchestrator();

    let run = orchestrator.run_once(Some("lasers")).await.unwrap();

    assert!(run.is_failed());
    assert_eq!(run.status_of(Stage::Content), Some(StageStatus::Success));
    assert_eq!(run.status_of(Stage::Narration), Some(StageStatus::Failure));
    assert_eq!(run.status_of(Stage::Render), None);
    assert_eq!(run.status_of(Stage::Publish), None);

    // One attempt per backend, no hidden retries
    assert_eq!(fixture.narration.calls(), 1);
    assert_eq!(fixture.narration_fallback.calls(), 1);
    assert_eq!(fixture.render.calls(), 0);
    assert_eq!(fixture.uploader.calls(), 0);

    let store = fixture.store();
    assert!(store.has(&run.unit_id, UNIT_FILE));
    assert!(!store.has(&run.unit_id, RENDER_FILE));
    assert!(!fixture.layout.video_path(&run.unit_id).exists());

    match &run.outcome {
        RunOutcome::Failed { reason } => {
            assert!(reason.contains("elevenlabs"));
            assert!(reason.contains("piper"));
        }
        other => panic!("unexpected outcome {:?}", other),
    }

    // The failed run is still logged
    assert_eq!(fixture.run_log().runs().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_content_failure_stops_before_narration() {
    let mut fixture = Fixture::new();
    fixture.content = FakeContent::failing("gemini");
    fixture.content_fallback = FakeContent::failing("template");
    let orchestrator = fixture.orchestrator();

    let run = orchestrator.run_once(None).await.unwrap();

    assert!(run.is_failed());
    assert_eq!(run.stages.len(), 1);
    assert_eq!(fixture.narration.calls(), 0);
}

#[tokio::test]
async fn test_render_failure_keeps_narration() {
    let mut fixture = Fixture::new();
    fixture.render = FakeRender::failing("pexels");
    fixture.render_fallback = FakeRender::failing("local");
    let orchestrator = fixture.orchestrator();

    let run = orchestrator.run_once(Some("lasers")).await.unwrap();

    assert!(run.is_failed());
    assert_eq!(run.status_of(Stage::Render), Some(StageStatus::Failure));
    let narration = fixture.store().load_narration(&run.unit_id).await.unwrap();
    assert!(narration.path.exists());
}

#[tokio::test]
async fn test_quota_ceiling_skips_second_publish() {
    let mut fixture = Fixture::new();
    fixture.ceiling = 1;
    let orchestrator = fixture.orchestrator();

    let first = orchestrator.run_once(None).await.unwrap();
    let second = orchestrator.run_once(None).await.unwrap();

    assert_ne!(first.unit_id, second.unit_id);

    assert!(first.is_done());
    assert!(first.publish.as_ref().unwrap().is_published());

    assert!(second.is_done());
    let skipped = second.publish.as_ref().unwrap();
    assert!(skipped.is_skipped());
    assert_eq!(second.status_of(Stage::Publish), Some(StageStatus::Skipped));

    assert_eq!(fixture.uploader.calls(), 1);
    assert_eq!(fixture.run_log().publishes().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_permanent_upload_error_keeps_video() {
    let mut fixture = Fixture::new();
    fixture.uploader = FakeUploader::scripted(vec![Err(UploadError::Permanent {
        kind: PermanentKind::Auth,
        message: "token expired".to_string(),
    })]);
    let orchestrator = fixture.orchestrator();

    let run = orchestrator.run_once(Some("lasers")).await.unwrap();

    assert!(run.is_failed());
    assert_eq!(run.status_of(Stage::Publish), Some(StageStatus::Failure));
    assert_eq!(fixture.uploader.calls(), 1);
    assert!(fixture.layout.video_path(&run.unit_id).exists());

    match &run.publish.as_ref().unwrap().outcome {
        PublishOutcome::Failed { permanent, .. } => assert!(*permanent),
        other => panic!("unexpected outcome {:?}", other),
    }

    // Slot given back
    assert_eq!(fixture.quota().snapshot().count, 0);
}

#[tokio::test]
async fn test_transient_upload_errors_are_retried() {
    let mut fixture = Fixture::new();
    fixture.uploader = FakeUploader::scripted(vec![
        Err(UploadError::Transient("502".to_string())),
        Err(UploadError::Transient("503".to_string())),
    ]);
    let orchestrator = fixture.orchestrator();

    let run = orchestrator.run_once(Some("lasers")).await.unwrap();

    assert!(run.is_done());
    assert_eq!(fixture.uploader.calls(), 3);
    assert_eq!(run.publish.as_ref().unwrap().attempts, 3);
}

#[tokio::test]
async fn test_retry_bound_exhausted_fails_run() {
    let mut fixture = Fixture::new();
    fixture.uploader = FakeUploader::scripted(
        (0..3)
            .map(|_| Err(UploadError::Transient("timeout".to_string())))
            .collect(),
    );
    let orchestrator = fixture.orchestrator();

    let run = orchestrator.run_once(Some("lasers")).await.unwrap();

    assert!(run.is_failed());
    assert_eq!(fixture.uploader.calls(), 3);
    match &run.publish.as_ref().unwrap().outcome {
        PublishOutcome::Failed { permanent, .. } => assert!(!*permanent),
        other => panic!("unexpected outcome {:?}", other),
    }
}

#[tokio::test]
async fn test_remote_quota_error_short_circuits_later_runs() {
    let mut fixture = Fixture::new();
    fixture.uploader = FakeUploader::scripted(vec![Err(UploadError::Permanent {
        kind: PermanentKind::Quota,
        message: "uploadLimitExceeded".to_string(),
    })]);
    let orchestrator = fixture.orchestrator();

    let first = orchestrator.run_once(None).await.unwrap();
    assert!(first.is_failed());
    assert!(fixture.quota().snapshot().exhausted);

    let second = orchestrator.run_once(None).await.unwrap();
    assert!(second.is_done());
    assert!(second.publish.as_ref().unwrap().is_skipped());
    assert_eq!(fixture.uploader.calls(), 1);
}

#[tokio::test]
async fn test_stop_signal_interrupts_between_stages() {
    let (stop_tx, stop_rx) = watch::channel(false);
    let mut fixture = Fixture::new();
    fixture.content = FakeContent::stopping("gemini", stop_tx);
    fixture.stop = Some(stop_rx);
    let orchestrator = fixture.orchestrator();

    let run = orchestrator.run_once(Some("lasers")).await.unwrap();

    assert_eq!(
        run.outcome,
        RunOutcome::Interrupted {
            before: Stage::Narration
        }
    );
    assert_eq!(run.status_of(Stage::Content), Some(StageStatus::Success));
    assert_eq!(fixture.narration.calls(), 0);
    assert!(fixture.store().has(&run.unit_id, UNIT_FILE));

    let logged = fixture.run_log().runs().await.unwrap();
    assert_eq!(logged.len(), 1);
    assert_eq!(logged[0].outcome_label(), "interrupted");
}

#[tokio::test]
async fn test_topics_drawn_from_pool() {
    let mut fixture = Fixture::new();
    fixture.upload_enabled = false;
    let orchestrator = fixture.orchestrator();

    let first = orchestrator.run_once(None).await.unwrap();
    let second = orchestrator.run_once(None).await.unwrap();

    let mut topics = vec![first.topic.unwrap(), second.topic.unwrap()];
    topics.sort();
    assert_eq!(topics, vec!["lasers".to_string(), "radio".to_string()]);
}
