//! End-to-end pipeline tests that do not require a working FFmpeg.
//!
//! These drive `run_job` through validation, download and failure paths
//! and assert the lifecycle guarantees: typed failures, no leaked temp
//! directories, cancellation semantics.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use vcomp_pipeline::{run_job, ErrorKind, Settings};

/// Settings pointing the pipeline at a fresh work dir with every remote
/// stage disabled.
fn test_settings(work_dir: &std::path::Path) -> Arc<Settings> {
    let mut settings = Settings::default();
    settings.engine.work_dir = work_dir.to_string_lossy().to_string();
    settings.storage.upload_enabled = false;
    settings.ai.align_enabled = false;
    settings.ai.image_fix_enabled = false;
    settings.download.max_retries = 0;
    Arc::new(settings)
}

/// No per-job scope directory may survive a finished run.
fn assert_no_scope_leak(work_dir: &std::path::Path) {
    let leaked: Vec<_> = std::fs::read_dir(work_dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .filter(|e| e.file_name().to_string_lossy().starts_with("job_"))
                .collect()
        })
        .unwrap_or_default();
    assert!(leaked.is_empty(), "leaked scope dirs: {:?}", leaked);
}

#[tokio::test]
async fn rejects_structurally_invalid_document() {
    let work = tempfile::tempdir().unwrap();
    let doc = serde_json::json!({ "segments": [] });

    let err = run_job(test_settings(work.path()), doc, CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.kind, ErrorKind::Validation);
    assert_eq!(err.stage, "validate");
    assert_no_scope_leak(work.path());
}

#[tokio::test]
async fn rejects_document_that_does_not_parse() {
    let work = tempfile::tempdir().unwrap();
    let doc = serde_json::json!({ "segments": "not-a-list" });

    let err = run_job(test_settings(work.path()), doc, CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.kind, ErrorKind::Validation);
}

#[tokio::test]
async fn cancellation_before_any_stage_produces_no_output() {
    let work = tempfile::tempdir().unwrap();
    let doc = serde_json::json!({
        "segments": [{ "id": "s1", "image": { "url": "http://unreachable.invalid/a.jpg" } }]
    });

    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = run_job(test_settings(work.path()), doc, cancel)
        .await
        .unwrap_err();

    assert_eq!(err.kind, ErrorKind::Cancelled);
    assert_no_scope_leak(work.path());
    // No upload and no retained local file.
    assert!(!work.path().join("output").exists());
}

#[tokio::test]
async fn missing_required_asset_is_an_asset_error() {
    let work = tempfile::tempdir().unwrap();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/gone.mp3"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/a.jpg"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "image/jpeg")
                .set_body_bytes(vec![0xFF; 32]),
        )
        .mount(&server)
        .await;

    let doc = serde_json::json!({
        "segments": [{
            "id": "s1",
            "image": { "url": format!("{}/a.jpg", server.uri()) },
            "voice_over": { "url": format!("{}/gone.mp3", server.uri()) }
        }]
    });

    let err = run_job(test_settings(work.path()), doc, CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.kind, ErrorKind::Asset);
    assert_eq!(err.stage, "download");
    assert!(err.message.contains("gone.mp3"));
    assert_no_scope_leak(work.path());
}

#[tokio::test]
async fn unrenderable_assets_fail_at_the_render_stage() {
    let work = tempfile::tempdir().unwrap();
    let server = MockServer::start().await;
    // Served bytes are not a decodable image, so every segment render
    // fails and the batch reports a per-segment diagnostic.
    Mock::given(method("GET"))
        .and(path("/fake.jpg"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "image/jpeg")
                .set_body_bytes(vec![0xAB; 64]),
        )
        .mount(&server)
        .await;

    let doc = serde_json::json!({
        "segments": [
            { "id": "s1", "image": { "url": format!("{}/fake.jpg", server.uri()) } },
            { "id": "s2", "image": { "url": format!("{}/fake.jpg", server.uri()) } }
        ]
    });

    let err = run_job(test_settings(work.path()), doc, CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.stage, "render_segments");
    assert_eq!(err.kind, ErrorKind::Processing);
    assert!(err.message.contains("2/2 items failed"));
    assert!(err.message.contains("s1"));
    assert!(err.message.contains("s2"));
    assert_no_scope_leak(work.path());
}
