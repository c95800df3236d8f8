//! Integration tests for the capture orchestrator

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use tui_snapshots::capture::{CaptureConfig, CaptureRequest, CaptureResult, Capturer, OutputFormat};
use tui_snapshots::driver::{AppSource, ArtifactFormat, MockDriver, TerminalSize};
use tui_snapshots::error::{CaptureError, PluginError, PluginResult};
use tui_snapshots::plugins::{CapturePlugin, Metadata, MetricsPlugin, PluginPipeline};

fn config(dir: &Path) -> CaptureConfig {
    CaptureConfig::default()
        .output_dir(dir)
        .interaction_delay(Duration::ZERO)
        .session_timeout(Duration::from_secs(10))
        .write_manifest(false)
}

fn capturer(driver: MockDriver, dir: &Path) -> Capturer<MockDriver> {
    Capturer::new(driver).config(config(dir))
}

fn request() -> CaptureRequest {
    CaptureRequest::new(AppSource::new("demo-app").size(TerminalSize::COMPACT)).context("main")
}

#[tokio::test]
async fn test_scripted_sequence_produces_artifact() {
    let dir = tempfile::tempdir().expect("tempdir");
    let capturer = capturer(MockDriver::new(), dir.path());

    let result = capturer
        .capture(request().interactions(["click:#a", "wait:0.5", "press:enter"]))
        .await
        .expect("valid sequence");

    assert!(result.success, "capture failed: {:?}", result.error_message);
    assert_eq!(result.format, OutputFormat::Vector);
    assert!(result.size_bytes > 0);
    let path = result.path_for(ArtifactFormat::Vector).expect("vector artifact");
    assert!(path.exists());
    assert_eq!(
        capturer.driver().dispatched(),
        vec!["click:#a", "wait:0.5", "press:enter"]
    );
    assert_eq!(capturer.driver().live_sessions(), 0);
}

#[tokio::test]
async fn test_invalid_sequence_never_touches_driver() {
    let dir = tempfile::tempdir().expect("tempdir");
    let capturer = capturer(MockDriver::new(), dir.path());

    let err = capturer
        .capture(request().interactions(["press:enter", "f2"]))
        .await
        .expect_err("bare key must be rejected");

    let validation = match err {
        CaptureError::Validation(validation) => validation,
        other => panic!("expected a validation error, got {other:?}"),
    };
    assert_eq!(validation.errors.len(), 1);
    assert_eq!(validation.errors[0].index, 1);
    assert!(validation.to_string().contains("press:f2"));
    assert_eq!(capturer.driver().starts(), 0);
    assert_eq!(capturer.driver().dispatches(), 0);
    assert!(capturer.shared_cache().is_empty());
}

#[tokio::test]
async fn test_second_capture_is_served_from_cache() {
    let dir = tempfile::tempdir().expect("tempdir");
    let capturer = capturer(MockDriver::new(), dir.path());
    let req = request().interactions(["press:down"]);

    let first = capturer.capture(req.clone()).await.expect("first");
    let second = capturer.capture(req).await.expect("second");

    assert_eq!(capturer.driver().starts(), 1);
    assert!(!first.cache_hit);
    assert!(second.cache_hit);
    assert_eq!(first.artifacts, second.artifacts);
    assert_eq!(first.size_bytes, second.size_bytes);
    assert_eq!(first.fingerprint, second.fingerprint);
    assert_eq!(first.timestamp, second.timestamp);
}

#[tokio::test]
async fn test_expired_entry_triggers_one_more_capture() {
    let dir = tempfile::tempdir().expect("tempdir");
    let capturer = capturer(MockDriver::new(), dir.path());
    let req = request().cache_ttl(Duration::from_millis(300));

    capturer.capture(req.clone()).await.expect("first");
    capturer.capture(req.clone()).await.expect("cached");
    assert_eq!(capturer.driver().starts(), 1);

    tokio::time::sleep(Duration::from_millis(450)).await;
    let third = capturer.capture(req).await.expect("after expiry");
    assert!(!third.cache_hit);
    assert_eq!(capturer.driver().starts(), 2);
}

#[tokio::test]
async fn test_concurrent_captures_share_one_session() {
    let dir = tempfile::tempdir().expect("tempdir");
    let driver = MockDriver::new().with_start_delay(Duration::from_millis(100));
    let capturer = capturer(driver, dir.path());
    let req = request().interactions(["type:hello", "press:enter"]);

    let results = futures::future::join_all((0..8).map(|_| capturer.capture(req.clone()))).await;

    assert_eq!(capturer.driver().starts(), 1);
    let results: Vec<CaptureResult> = results
        .into_iter()
        .map(|r| r.expect("capture"))
        .collect();
    assert!(results.iter().all(|r| r.success));
    assert!(results.iter().all(|r| r.artifacts == results[0].artifacts));
    assert_eq!(capturer.shared_cache().stats().in_flight, 0);
}

#[tokio::test]
async fn test_failed_interaction_aborts_remaining_sequence() {
    let dir = tempfile::tempdir().expect("tempdir");
    let metrics = Arc::new(MetricsPlugin::new());
    let capturer = capturer(MockDriver::new().fail_on("click:#gone"), dir.path())
        .plugins(PluginPipeline::new().with(metrics.clone()));

    let result = capturer
        .capture(request().interactions(["press:down", "click:#gone", "press:enter"]))
        .await
        .expect("driver failures are reported in the result");

    assert!(!result.success);
    let step = result.failed_step.expect("failed step recorded");
    assert_eq!(step.index, 1);
    assert_eq!(step.command, "click:#gone");
    assert!(result.error_message.expect("message").contains("#gone"));
    assert_eq!(capturer.driver().dispatched(), vec!["press:down", "click:#gone"]);
    assert_eq!(capturer.driver().exports(), 0);
    assert_eq!(capturer.driver().live_sessions(), 0);
    assert!(capturer.shared_cache().is_empty());
    assert_eq!(metrics.snapshot().failures, 1);
}

#[tokio::test]
async fn test_start_failure_is_reported() {
    let dir = tempfile::tempdir().expect("tempdir");
    let capturer = capturer(MockDriver::new().fail_start("no such binary"), dir.path());

    let result = capturer.capture(request()).await.expect("reported in result");
    assert!(!result.success);
    assert!(result.error_message.expect("message").contains("no such binary"));
    assert!(result.artifacts.is_empty());
}

#[tokio::test]
async fn test_missing_raster_backend_downgrades_to_vector() {
    let dir = tempfile::tempdir().expect("tempdir");
    let capturer = capturer(MockDriver::new().without_raster(), dir.path());

    let both = capturer
        .capture(request().output_format(OutputFormat::Both))
        .await
        .expect("capture");
    assert!(both.success);
    assert_eq!(both.format, OutputFormat::Vector);
    assert_eq!(both.artifacts.len(), 1);
    assert_eq!(both.warnings.len(), 1);

    let raster_only = capturer
        .capture(request().context("raster").output_format(OutputFormat::Raster))
        .await
        .expect("capture");
    assert!(raster_only.success);
    assert_eq!(raster_only.format, OutputFormat::Vector);
    assert!(raster_only.path_for(ArtifactFormat::Vector).is_some());
}

#[tokio::test]
async fn test_both_formats_are_exported() {
    let dir = tempfile::tempdir().expect("tempdir");
    let capturer = capturer(MockDriver::new(), dir.path());

    let result = capturer
        .capture(request().output_format(OutputFormat::Both))
        .await
        .expect("capture");
    assert!(result.success);
    assert_eq!(result.format, OutputFormat::Both);
    let svg = result.path_for(ArtifactFormat::Vector).expect("svg");
    let png = result.path_for(ArtifactFormat::Raster).expect("png");
    assert_eq!(svg.with_extension("png"), png);
    assert_eq!(
        result.size_bytes,
        result.artifacts.iter().map(|a| a.size_bytes).sum::<u64>()
    );
}

#[tokio::test]
async fn test_deleted_artifacts_invalidate_cache_entry() {
    let dir = tempfile::tempdir().expect("tempdir");
    let capturer = capturer(MockDriver::new(), dir.path());

    let first = capturer.capture(request()).await.expect("first");
    std::fs::remove_file(first.primary_path().expect("path")).expect("remove");

    let second = capturer.capture(request()).await.expect("second");
    assert!(!second.cache_hit);
    assert!(second.success);
    assert_eq!(capturer.driver().starts(), 2);
    assert_eq!(capturer.shared_cache().stats().invalidations, 1);
}

#[tokio::test]
async fn test_cancellation_stops_live_session() {
    let dir = tempfile::tempdir().expect("tempdir");
    let capturer = capturer(MockDriver::new(), dir.path());
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let err = capturer
        .capture_with_cancel(request().interactions(["press:down", "wait:10"]), &cancel)
        .await
        .expect_err("cancelled");

    assert!(matches!(err, CaptureError::Cancelled));
    assert_eq!(capturer.driver().starts(), 1);
    assert_eq!(capturer.driver().live_sessions(), 0);
    assert!(capturer.shared_cache().is_empty());
    assert_eq!(capturer.shared_cache().stats().in_flight, 0);
}

#[tokio::test]
async fn test_cancelled_waiter_leaves_shared_capture_running() {
    let dir = tempfile::tempdir().expect("tempdir");
    let driver = MockDriver::new().with_start_delay(Duration::from_millis(200));
    let capturer = capturer(driver, dir.path());
    let cancel = CancellationToken::new();

    let (owner, waiter, _) = tokio::join!(
        capturer.capture(request()),
        capturer.capture_with_cancel(request(), &cancel),
        async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        }
    );

    assert!(matches!(waiter, Err(CaptureError::Cancelled)));
    assert!(owner.expect("owner").success);
    assert_eq!(capturer.driver().starts(), 1);
    assert_eq!(capturer.shared_cache().len(), 1);
}

#[tokio::test]
async fn test_separate_capturers_share_a_cache() {
    let dir = tempfile::tempdir().expect("tempdir");
    let cache = Arc::new(tui_snapshots::cache::CaptureCache::default());
    let a = capturer(MockDriver::new(), dir.path()).cache(cache.clone());
    let b = capturer(MockDriver::new(), dir.path()).cache(cache);

    a.capture(request()).await.expect("a");
    let hit = b.capture(request()).await.expect("b");
    assert!(hit.cache_hit);
    assert_eq!(b.driver().starts(), 0);
}

// ----------------------------------------------------------------------------
// Plugins
// ----------------------------------------------------------------------------

#[derive(Default)]
struct Recorder {
    calls: Mutex<Vec<String>>,
}

#[async_trait]
impl CapturePlugin for Recorder {
    fn name(&self) -> &str {
        "recorder"
    }

    async fn pre_capture(&self, context: &str, _app: &AppSource) -> PluginResult<Metadata> {
        self.calls.lock().push(format!("pre:{context}"));
        let mut meta = Metadata::new();
        meta.insert("recorder.seen".into(), serde_json::json!(true));
        Ok(meta)
    }

    async fn post_capture(&self, result: &mut CaptureResult, metadata: &Metadata) -> PluginResult<()> {
        self.calls.lock().push(format!("post:{}", metadata.contains_key("recorder.seen")));
        result.metadata.insert("recorder".into(), serde_json::json!("ran"));
        Ok(())
    }

    async fn on_success(&self, _result: &CaptureResult) -> PluginResult<()> {
        self.calls.lock().push("success".into());
        Ok(())
    }

    async fn on_failure(&self, _error: &str, _context: &str) -> PluginResult<()> {
        self.calls.lock().push("failure".into());
        Ok(())
    }
}

struct Broken;

#[async_trait]
impl CapturePlugin for Broken {
    fn name(&self) -> &str {
        "broken"
    }

    async fn post_capture(&self, _result: &mut CaptureResult, _metadata: &Metadata) -> PluginResult<()> {
        Err(PluginError::new("post hook exploded"))
    }
}

#[tokio::test]
async fn test_hooks_run_in_lifecycle_order() {
    let dir = tempfile::tempdir().expect("tempdir");
    let recorder = Arc::new(Recorder::default());
    let capturer = capturer(MockDriver::new(), dir.path())
        .plugins(PluginPipeline::new().with(recorder.clone()));

    let result = capturer.capture(request()).await.expect("capture");
    assert!(result.success);
    assert_eq!(result.metadata.get("recorder"), Some(&serde_json::json!("ran")));
    assert_eq!(*recorder.calls.lock(), vec!["pre:main", "post:true", "success"]);

    // Cache hits skip the hooks entirely.
    capturer.capture(request()).await.expect("cached");
    assert_eq!(recorder.calls.lock().len(), 3);
}

#[tokio::test]
async fn test_failing_plugin_is_isolated() {
    let dir = tempfile::tempdir().expect("tempdir");
    let recorder = Arc::new(Recorder::default());
    let capturer = capturer(MockDriver::new(), dir.path())
        .plugins(PluginPipeline::new().with(Arc::new(Broken)).with(recorder.clone()));

    let result = capturer.capture(request()).await.expect("capture");
    assert!(result.success);
    assert!(recorder.calls.lock().contains(&"success".to_string()));
}

#[tokio::test]
async fn test_fatal_plugin_fails_the_capture() {
    let dir = tempfile::tempdir().expect("tempdir");
    let recorder = Arc::new(Recorder::default());
    let capturer = capturer(MockDriver::new(), dir.path()).plugins(
        PluginPipeline::new()
            .with(recorder.clone())
            .with_fatal(Arc::new(Broken)),
    );

    let result = capturer.capture(request()).await.expect("capture");
    assert!(!result.success);
    let message = result.error_message.expect("message");
    assert!(message.contains("broken"), "{message}");
    assert!(recorder.calls.lock().contains(&"failure".to_string()));
    assert!(capturer.shared_cache().is_empty());
}

#[derive(Default)]
struct FailureLog {
    errors: Mutex<Vec<String>>,
}

#[async_trait]
impl CapturePlugin for FailureLog {
    fn name(&self) -> &str {
        "failure-log"
    }

    async fn on_failure(&self, error: &str, _context: &str) -> PluginResult<()> {
        self.errors.lock().push(error.to_string());
        Ok(())
    }
}

#[tokio::test]
async fn test_fatal_post_hook_keeps_driver_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let log = Arc::new(FailureLog::default());
    let capturer = capturer(MockDriver::new().fail_on("click:#gone"), dir.path()).plugins(
        PluginPipeline::new()
            .with_fatal(Arc::new(Broken))
            .with(log.clone()),
    );

    let result = capturer
        .capture(request().interactions(["click:#gone"]))
        .await
        .expect("capture");

    assert!(!result.success);
    let message = result.error_message.clone().expect("message");
    assert!(message.contains("#gone"), "{message}");
    assert!(result.warnings.iter().any(|w| w.contains("broken")), "{:?}", result.warnings);
    let errors = log.errors.lock().clone();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("#gone"), "{}", errors[0]);
}

// ----------------------------------------------------------------------------
// Unbounded durations
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_unbounded_ttl_and_timeout_still_capture() {
    let dir = tempfile::tempdir().expect("tempdir");
    let capturer = Capturer::new(MockDriver::new())
        .config(config(dir.path()).session_timeout(Duration::MAX));

    let first = capturer
        .capture(request().interactions(["press:enter"]).cache_ttl(Duration::MAX))
        .await
        .expect("capture");
    assert!(first.success, "{:?}", first.error_message);

    let second = capturer
        .capture(request().interactions(["press:enter"]).cache_ttl(Duration::MAX))
        .await
        .expect("cached");
    assert!(second.cache_hit);
    assert_eq!(capturer.driver().starts(), 1);
    assert_eq!(capturer.shared_cache().cleanup_expired(), 0);
}
