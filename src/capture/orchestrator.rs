use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::fingerprint::Fingerprinter;
use super::types::{CaptureRequest, CaptureResult, CaptureState, FailedStep, OutputFormat};
use crate::artifacts;
use crate::cache::{CaptureCache, Reservation};
use crate::config;
use crate::driver::{AppSource, ArtifactFormat, AutomationDriver, DriverError, PtyDriver};
use crate::error::{CaptureError, CaptureOutcome};
use crate::interaction::{parse_sequence, InteractionCommand};
use crate::plugins::{Metadata, PluginPipeline};

/// Orchestrator settings.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Base of the `apps/<app>/<context>` tree
    pub output_dir: PathBuf,
    /// Upper bound for one driver session, from start to the last export
    pub session_timeout: Duration,
    /// Pause between consecutive interactions
    pub interaction_delay: Duration,
    pub write_manifest: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        let settings = &config::get().capture;
        Self {
            output_dir: settings.output_dir.clone(),
            session_timeout: settings.session_timeout,
            interaction_delay: settings.interaction_delay,
            write_manifest: settings.write_manifest,
        }
    }
}

impl CaptureConfig {
    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = timeout;
        self
    }

    pub fn interaction_delay(mut self, delay: Duration) -> Self {
        self.interaction_delay = delay;
        self
    }

    pub fn write_manifest(mut self, enabled: bool) -> Self {
        self.write_manifest = enabled;
        self
    }
}

/// Drives captures through validation, the shared cache, one driver
/// session and the plugin hooks.
///
/// A `Capturer` is cheap to share by reference; concurrent captures on the
/// same instance (or on instances sharing a [`CaptureCache`]) with the same
/// fingerprint start at most one driver session between them.
pub struct Capturer<D: AutomationDriver> {
    driver: Arc<D>,
    cache: Arc<CaptureCache>,
    plugins: Arc<PluginPipeline>,
    config: CaptureConfig,
    fingerprinter: Fingerprinter,
}

impl<D: AutomationDriver> Capturer<D> {
    pub fn new(driver: D) -> Self {
        Self::with_driver(Arc::new(driver))
    }

    pub fn with_driver(driver: Arc<D>) -> Self {
        Self {
            driver,
            cache: Arc::new(CaptureCache::default()),
            plugins: Arc::new(PluginPipeline::new()),
            config: CaptureConfig::default(),
            fingerprinter: Fingerprinter::default(),
        }
    }

    pub fn cache(mut self, cache: Arc<CaptureCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn plugins(mut self, plugins: PluginPipeline) -> Self {
        self.plugins = Arc::new(plugins);
        self
    }

    pub fn config(mut self, config: CaptureConfig) -> Self {
        self.config = config;
        self
    }

    pub fn fingerprinter(mut self, fingerprinter: Fingerprinter) -> Self {
        self.fingerprinter = fingerprinter;
        self
    }

    pub fn driver(&self) -> &Arc<D> {
        &self.driver
    }

    pub fn shared_cache(&self) -> &Arc<CaptureCache> {
        &self.cache
    }

    pub fn capture_config(&self) -> &CaptureConfig {
        &self.config
    }

    /// Fingerprint a request without running it. Fails like `capture` on
    /// an invalid interaction sequence.
    pub fn fingerprint(&self, request: &CaptureRequest) -> CaptureOutcome<String> {
        let commands = parse_sequence(&request.interactions)?;
        Ok(self.fingerprinter.fingerprint(
            &request.app,
            &request.context,
            &commands,
            request.output_format,
        ))
    }

    pub async fn capture(&self, request: CaptureRequest) -> CaptureOutcome<CaptureResult> {
        self.capture_with_cancel(request, &CancellationToken::new()).await
    }

    /// Run one capture.
    ///
    /// Only an invalid interaction sequence or cancellation is returned as
    /// `Err`; driver, export and plugin failures come back as a result with
    /// `success == false`. A cancelled capture stops its driver session
    /// before returning. Cancelling a capture that is waiting on another
    /// caller's computation leaves that computation running.
    pub async fn capture_with_cancel(
        &self,
        request: CaptureRequest,
        cancel: &CancellationToken,
    ) -> CaptureOutcome<CaptureResult> {
        let mut lifecycle = Lifecycle::new();

        lifecycle.advance(CaptureState::Validating);
        let commands = match parse_sequence(&request.interactions) {
            Ok(commands) => commands,
            Err(err) => {
                lifecycle.advance(CaptureState::Failed);
                warn!(context = %request.context, error = %err, "rejected interaction sequence");
                return Err(err.into());
            }
        };

        lifecycle.advance(CaptureState::ComputingFingerprint);
        let fingerprint = self.fingerprinter.fingerprint(
            &request.app,
            &request.context,
            &commands,
            request.output_format,
        );
        lifecycle.fingerprint = fingerprint.clone();

        if !request.use_cache {
            lifecycle.advance(CaptureState::ClaimingComputation);
            return self
                .execute(&request, &commands, &fingerprint, &mut lifecycle, cancel)
                .await;
        }

        if let Some(hit) = self.cached(&fingerprint) {
            return Ok(lifecycle.finish_with_hit(hit));
        }

        lifecycle.advance(CaptureState::ClaimingComputation);
        let claim = loop {
            match self.cache.reserve(&fingerprint) {
                Reservation::Claimed(claim) => {
                    // Another caller may have finished between the lookup and the claim.
                    if let Some(hit) = self.cached(&fingerprint) {
                        claim.complete(hit.clone());
                        return Ok(lifecycle.finish_with_hit(hit));
                    }
                    break claim;
                }
                Reservation::InFlight(pending) => {
                    debug!(fingerprint = %fingerprint, "joining in-flight capture");
                    let shared = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(CaptureError::Cancelled),
                        shared = pending.wait() => shared,
                    };
                    match shared {
                        Some(result) => {
                            lifecycle.advance(CaptureState::CacheHit);
                            lifecycle.advance(CaptureState::Done);
                            return Ok(result);
                        }
                        None => {
                            debug!(fingerprint = %fingerprint, "in-flight capture abandoned, retrying claim");
                            continue;
                        }
                    }
                }
            }
        };

        // Cancellation drops the claim here, which releases waiters to retry.
        let result = self
            .execute(&request, &commands, &fingerprint, &mut lifecycle, cancel)
            .await?;

        if result.success {
            self.cache.put(&fingerprint, result.clone(), request.cache_ttl);
        }
        claim.complete(result.clone());
        Ok(result)
    }

    /// A cached result whose artifacts are still on disk.
    fn cached(&self, fingerprint: &str) -> Option<CaptureResult> {
        let mut result = self.cache.get(fingerprint)?;
        if let Err(reason) = result.verify_artifacts() {
            self.cache.discard(fingerprint, &reason);
            return None;
        }
        result.cache_hit = true;
        Some(result)
    }

    async fn execute(
        &self,
        request: &CaptureRequest,
        commands: &[InteractionCommand],
        fingerprint: &str,
        lifecycle: &mut Lifecycle,
        cancel: &CancellationToken,
    ) -> CaptureOutcome<CaptureResult> {
        let started = Instant::now();
        let mut result = CaptureResult::pending(request, fingerprint);

        lifecycle.advance(CaptureState::StartingDriver);
        let pre = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(CaptureError::Cancelled),
            pre = self.plugins.pre_capture(&request.context, &request.app) => pre,
        };

        let (metadata, outcome) = match pre {
            Ok(metadata) => {
                let outcome = self
                    .drive(request, commands, &mut result, lifecycle, cancel)
                    .await;
                (metadata, outcome)
            }
            Err(abort) => (Metadata::new(), Err(Halt::failed(abort.to_string()))),
        };

        match outcome {
            Ok(()) => {
                lifecycle.advance(CaptureState::FinalizingSuccess);
                result.success = true;
            }
            Err(Halt::Cancelled) => {
                info!(fingerprint, context = %request.context, "capture cancelled");
                return Err(CaptureError::Cancelled);
            }
            Err(Halt::Failed { message, step }) => {
                lifecycle.advance(CaptureState::FinalizingFailure);
                warn!(fingerprint, context = %request.context, error = %message, "capture failed");
                result.fail(message);
                result.failed_step = step;
            }
        }
        result.duration_ms = started.elapsed().as_millis() as u64;

        lifecycle.advance(CaptureState::RunningHooks);
        self.run_hooks(&mut result, &metadata).await;

        if result.success && self.config.write_manifest {
            match artifacts::write_manifest(&result) {
                Ok(Some(path)) => debug!(path = %path.display(), "wrote capture manifest"),
                Ok(None) => {}
                Err(err) => warn!(error = %err, "failed to write capture manifest"),
            }
        }

        lifecycle.advance(CaptureState::Done);
        Ok(result)
    }

    async fn run_hooks(&self, result: &mut CaptureResult, metadata: &Metadata) {
        if let Err(abort) = self.plugins.post_capture(result, metadata).await {
            if result.success {
                result.fail(abort.to_string());
            } else {
                // Keep the original cause as the error message.
                result.warnings.push(abort.to_string());
            }
        }
        if result.success {
            if let Err(abort) = self.plugins.on_success(result).await {
                result.fail(abort.to_string());
            }
        }
        if !result.success {
            let error = result.error_message.as_deref().unwrap_or("capture failed");
            self.plugins.on_failure(error, &result.context).await;
        }
    }

    /// Start a session, run the sequence, export, and always stop the session.
    async fn drive(
        &self,
        request: &CaptureRequest,
        commands: &[InteractionCommand],
        result: &mut CaptureResult,
        lifecycle: &mut Lifecycle,
        cancel: &CancellationToken,
    ) -> Result<(), Halt> {
        // No deadline when the timeout reaches past what `Instant` can represent.
        let deadline = Instant::now().checked_add(self.config.session_timeout);

        let session = self
            .interruptible(cancel, deadline, self.driver.start(&request.app))
            .await??;
        debug!(driver = self.driver.name(), app = %request.app.display_name(), "driver session started");

        let mut guard = SessionGuard::new(Arc::clone(&self.driver), session);
        let outcome = self
            .run_session(&mut guard, request, commands, result, lifecycle, cancel, deadline)
            .await;

        if let Err(err) = guard.stop().await {
            warn!(driver = self.driver.name(), error = %err, "failed to stop driver session");
        }
        outcome
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_session(
        &self,
        guard: &mut SessionGuard<D>,
        request: &CaptureRequest,
        commands: &[InteractionCommand],
        result: &mut CaptureResult,
        lifecycle: &mut Lifecycle,
        cancel: &CancellationToken,
        deadline: Option<Instant>,
    ) -> Result<(), Halt> {
        lifecycle.advance(CaptureState::ExecutingInteractions);
        for (index, command) in commands.iter().enumerate() {
            if index > 0 && !self.config.interaction_delay.is_zero() {
                self.interruptible(cancel, deadline, tokio::time::sleep(self.config.interaction_delay))
                    .await?;
            }
            debug!(index, command = %command, "dispatching interaction");
            let session = guard.session_mut()?;
            let dispatched = self
                .interruptible(cancel, deadline, self.driver.dispatch(session, command))
                .await?;
            if let Err(err) = dispatched {
                lifecycle.advance(CaptureState::InteractionFailed);
                return Err(Halt::Failed {
                    message: format!("interaction {} ('{}') failed: {}", index + 1, command, err),
                    step: Some(FailedStep {
                        index,
                        command: command.to_string(),
                    }),
                });
            }
        }

        lifecycle.advance(CaptureState::Exporting);
        let dir = self.output_dir_for(request);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| Halt::failed(format!("failed to create {}: {e}", dir.display())))?;
        let stem = artifacts::artifact_stem(
            &request.context,
            &artifacts::format_timestamp(&result.timestamp),
            &result.fingerprint,
        );

        let mut downgraded = false;
        for format in request.output_format.formats() {
            let path = artifacts::artifact_path(&dir, &stem, format);
            let session = guard.session_mut()?;
            match self
                .interruptible(cancel, deadline, self.driver.export(session, format, &path))
                .await?
            {
                Ok(artifact) => result.artifacts.push(artifact),
                Err(DriverError::RenderingUnavailable(reason)) if format == ArtifactFormat::Raster => {
                    warn!(reason = %reason, "raster export unavailable, keeping vector output");
                    result
                        .warnings
                        .push(format!("raster export unavailable ({reason}); produced vector only"));
                    downgraded = true;
                }
                Err(err) => return Err(err.into()),
            }
        }

        let has_vector = result
            .artifacts
            .iter()
            .any(|a| a.format == ArtifactFormat::Vector);
        if downgraded && !has_vector {
            let path = artifacts::artifact_path(&dir, &stem, ArtifactFormat::Vector);
            let session = guard.session_mut()?;
            let artifact = self
                .interruptible(
                    cancel,
                    deadline,
                    self.driver.export(session, ArtifactFormat::Vector, &path),
                )
                .await??;
            result.artifacts.push(artifact);
        }

        record_artifact_sizes(result).await
    }

    fn output_dir_for(&self, request: &CaptureRequest) -> PathBuf {
        request.output_dir.clone().unwrap_or_else(|| {
            artifacts::artifact_dir(
                &self.config.output_dir,
                &request.app.display_name(),
                &request.context,
            )
        })
    }

    /// Await `fut` unless the caller cancels or the session deadline passes.
    async fn interruptible<T>(
        &self,
        cancel: &CancellationToken,
        deadline: Option<Instant>,
        fut: impl Future<Output = T>,
    ) -> Result<T, Halt> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Halt::Cancelled),
            _ = expire(deadline) => {
                Err(DriverError::Timeout(self.config.session_timeout).into())
            }
            value = fut => Ok(value),
        }
    }
}

async fn expire(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

/// Re-read every exported artifact from disk and record its real size.
async fn record_artifact_sizes(result: &mut CaptureResult) -> Result<(), Halt> {
    let mut total = 0;
    for artifact in &mut result.artifacts {
        let len = tokio::fs::metadata(&artifact.path)
            .await
            .map(|m| m.len())
            .unwrap_or(0);
        if len == 0 {
            return Err(Halt::failed(format!(
                "exported artifact missing or empty: {}",
                artifact.path.display()
            )));
        }
        artifact.size_bytes = len;
        total += len;
    }
    if result.artifacts.is_empty() {
        return Err(Halt::failed("no artifacts were exported"));
    }

    let formats: Vec<ArtifactFormat> = result.artifacts.iter().map(|a| a.format).collect();
    if let Some(format) = OutputFormat::covering(&formats) {
        result.format = format;
    }
    result.size_bytes = total;
    Ok(())
}

/// Why a driver session ended early.
enum Halt {
    Cancelled,
    Failed {
        message: String,
        step: Option<FailedStep>,
    },
}

impl Halt {
    fn failed(message: impl Into<String>) -> Self {
        Halt::Failed {
            message: message.into(),
            step: None,
        }
    }
}

impl From<DriverError> for Halt {
    fn from(err: DriverError) -> Self {
        Halt::failed(err.to_string())
    }
}

/// Owns a live driver session. If the owning future is dropped before
/// [`SessionGuard::stop`] runs, the session is stopped on a background task.
struct SessionGuard<D: AutomationDriver> {
    driver: Arc<D>,
    session: Option<D::Session>,
}

impl<D: AutomationDriver> SessionGuard<D> {
    fn new(driver: Arc<D>, session: D::Session) -> Self {
        Self {
            driver,
            session: Some(session),
        }
    }

    fn session_mut(&mut self) -> Result<&mut D::Session, DriverError> {
        self.session.as_mut().ok_or(DriverError::SessionClosed)
    }

    async fn stop(mut self) -> Result<(), DriverError> {
        match self.session.take() {
            Some(session) => self.driver.stop(session).await,
            None => Ok(()),
        }
    }
}

impl<D: AutomationDriver> Drop for SessionGuard<D> {
    fn drop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        let driver = Arc::clone(&self.driver);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(err) = driver.stop(session).await {
                        warn!(error = %err, "failed to stop abandoned driver session");
                    }
                });
            }
            Err(_) => warn!("driver session dropped outside a runtime; relying on driver cleanup"),
        }
    }
}

/// Tracks the orchestrator state for one capture.
struct Lifecycle {
    state: CaptureState,
    fingerprint: String,
}

impl Lifecycle {
    fn new() -> Self {
        Self {
            state: CaptureState::Idle,
            fingerprint: String::new(),
        }
    }

    fn advance(&mut self, next: CaptureState) {
        if !self.state.can_transition_to(next) {
            warn!(from = %self.state, to = %next, "unexpected capture state transition");
        }
        debug!(fingerprint = %self.fingerprint, from = %self.state, to = %next, "capture state");
        self.state = next;
    }

    fn finish_with_hit(&mut self, hit: CaptureResult) -> CaptureResult {
        self.advance(CaptureState::CacheHit);
        self.advance(CaptureState::Done);
        debug!(fingerprint = %self.fingerprint, "served capture from cache");
        hit
    }
}

/// Capture `app` through a PTY with default settings and a private cache.
pub async fn capture_app(
    app: AppSource,
    context: &str,
    interactions: &[&str],
    output_format: OutputFormat,
    output_dir: Option<&Path>,
) -> CaptureOutcome<CaptureResult> {
    let mut request = CaptureRequest::new(app)
        .context(context)
        .interactions(interactions.iter().copied())
        .output_format(output_format);
    if let Some(dir) = output_dir {
        request = request.output_dir(dir);
    }
    Capturer::new(PtyDriver::default()).capture(request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{MockDriver, TerminalSize};

    fn capturer(dir: &Path) -> Capturer<MockDriver> {
        Capturer::new(MockDriver::new()).config(
            CaptureConfig::default()
                .output_dir(dir)
                .interaction_delay(Duration::ZERO)
                .write_manifest(false),
        )
    }

    fn request() -> CaptureRequest {
        CaptureRequest::new(AppSource::new("demo").size(TerminalSize::COMPACT)).context("main menu")
    }

    #[tokio::test]
    async fn organises_artifacts_by_app_and_context() {
        let dir = tempfile::tempdir().unwrap();
        let result = capturer(dir.path()).capture(request()).await.unwrap();

        assert!(result.success, "{:?}", result.error_message);
        let path = result.primary_path().unwrap();
        assert!(path.starts_with(dir.path().join("apps").join("demo").join("main_menu")));
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("main_menu_"));
        assert!(name.ends_with(&format!("_{}.svg", &result.fingerprint[..8])));
    }

    #[tokio::test]
    async fn explicit_output_dir_wins() {
        let dir = tempfile::tempdir().unwrap();
        let custom = dir.path().join("custom");
        let result = capturer(dir.path())
            .capture(request().output_dir(&custom))
            .await
            .unwrap();
        assert_eq!(result.primary_path().unwrap().parent(), Some(custom.as_path()));
    }

    #[tokio::test]
    async fn manifest_sits_next_to_primary_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let capturer = Capturer::new(MockDriver::new()).config(
            CaptureConfig::default()
                .output_dir(dir.path())
                .interaction_delay(Duration::ZERO)
                .write_manifest(true),
        );
        let result = capturer.capture(request()).await.unwrap();
        let manifest = result.primary_path().unwrap().with_extension("json");
        let parsed: CaptureResult =
            serde_json::from_str(&std::fs::read_to_string(manifest).unwrap()).unwrap();
        assert_eq!(parsed.fingerprint, result.fingerprint);
    }

    #[tokio::test]
    async fn session_timeout_fails_the_capture() {
        let dir = tempfile::tempdir().unwrap();
        let capturer = Capturer::new(MockDriver::new()).config(
            CaptureConfig::default()
                .output_dir(dir.path())
                .interaction_delay(Duration::ZERO)
                .session_timeout(Duration::from_millis(50)),
        );
        let result = capturer
            .capture(request().interactions(["wait:5"]))
            .await
            .unwrap();

        assert!(!result.success);
        assert!(result.error_message.unwrap().contains("timed out"));
        assert_eq!(capturer.driver().live_sessions(), 0);
        assert!(capturer.shared_cache().is_empty());
    }

    #[tokio::test]
    async fn bypassing_the_cache_always_runs_the_driver() {
        let dir = tempfile::tempdir().unwrap();
        let capturer = capturer(dir.path());
        capturer.capture(request().use_cache(false)).await.unwrap();
        capturer.capture(request().use_cache(false)).await.unwrap();
        assert_eq!(capturer.driver().starts(), 2);
        assert!(capturer.shared_cache().is_empty());
    }
}
