use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::terminal::Terminal;
use super::{AppSource, Artifact, ArtifactFormat, AutomationDriver, DriverError, DriverResult};
use crate::interaction::{InteractionCommand, Verb};

/// Scripted in-process driver.
///
/// Draws each dispatched interaction onto an emulated screen, so exported
/// artifacts are real SVG/PNG files, and counts every call so tests can
/// assert how often the application would have been launched.
#[derive(Debug, Default)]
pub struct MockDriver {
    start_delay: Duration,
    dispatch_delay: Duration,
    fail_start: Option<String>,
    fail_on: Option<String>,
    raster_unavailable: bool,
    starts: AtomicUsize,
    stops: AtomicUsize,
    dispatches: AtomicUsize,
    exports: AtomicUsize,
    dispatched: Mutex<Vec<String>>,
}

pub struct MockSession {
    terminal: Terminal,
    line: u16,
}

impl MockDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every `start`, simulating a slow application launch.
    pub fn with_start_delay(mut self, delay: Duration) -> Self {
        self.start_delay = delay;
        self
    }

    pub fn with_dispatch_delay(mut self, delay: Duration) -> Self {
        self.dispatch_delay = delay;
        self
    }

    pub fn fail_start(mut self, reason: impl Into<String>) -> Self {
        self.fail_start = Some(reason.into());
        self
    }

    /// Fail when this exact command (e.g. `"click:#gone"`) is dispatched.
    pub fn fail_on(mut self, command: impl Into<String>) -> Self {
        self.fail_on = Some(command.into());
        self
    }

    pub fn without_raster(mut self) -> Self {
        self.raster_unavailable = true;
        self
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn dispatches(&self) -> usize {
        self.dispatches.load(Ordering::SeqCst)
    }

    pub fn exports(&self) -> usize {
        self.exports.load(Ordering::SeqCst)
    }

    /// Sessions started but not yet stopped.
    pub fn live_sessions(&self) -> usize {
        self.starts().saturating_sub(self.stops())
    }

    /// Every command dispatched so far, in order.
    pub fn dispatched(&self) -> Vec<String> {
        self.dispatched.lock().clone()
    }
}

impl MockSession {
    fn println(&mut self, text: &str) {
        let line = format!("\x1b[{};1H{}", self.line + 1, text);
        self.terminal.feed(line.as_bytes());
        self.line = (self.line + 1) % self.terminal.screen().rows();
    }
}

#[async_trait]
impl AutomationDriver for MockDriver {
    type Session = MockSession;

    fn name(&self) -> &str {
        "mock"
    }

    async fn start(&self, app: &AppSource) -> DriverResult<MockSession> {
        if !self.start_delay.is_zero() {
            tokio::time::sleep(self.start_delay).await;
        }
        if let Some(reason) = &self.fail_start {
            return Err(DriverError::StartFailed {
                app: app.program().to_string(),
                reason: reason.clone(),
            });
        }
        self.starts.fetch_add(1, Ordering::SeqCst);

        let size = app.terminal_size();
        let mut session = MockSession {
            terminal: Terminal::new(size.cols, size.rows),
            line: 0,
        };
        session.println(&format!("\x1b[1;36m{}\x1b[0m", app.display_name()));
        Ok(session)
    }

    async fn dispatch(
        &self,
        session: &mut MockSession,
        command: &InteractionCommand,
    ) -> DriverResult<()> {
        self.dispatches.fetch_add(1, Ordering::SeqCst);
        self.dispatched.lock().push(command.to_string());

        if !self.dispatch_delay.is_zero() {
            tokio::time::sleep(self.dispatch_delay).await;
        }
        if self.fail_on.as_deref() == Some(command.to_string().as_str()) {
            return Err(match command.verb() {
                Verb::Click | Verb::Hover => DriverError::TargetNotFound {
                    target: command.argument().to_string(),
                },
                _ => DriverError::DispatchFailed {
                    command: command.to_string(),
                    reason: "scripted failure".into(),
                },
            });
        }
        if let Some(duration) = command.duration() {
            tokio::time::sleep(duration).await;
        }
        session.println(&format!("> {command}"));
        Ok(())
    }

    async fn export(
        &self,
        session: &mut MockSession,
        format: ArtifactFormat,
        path: &Path,
    ) -> DriverResult<Artifact> {
        if format == ArtifactFormat::Raster && self.raster_unavailable {
            return Err(DriverError::RenderingUnavailable("mock raster backend disabled".into()));
        }
        self.exports.fetch_add(1, Ordering::SeqCst);
        let screen = session.terminal.screen();
        let bytes = match format {
            ArtifactFormat::Vector => screen.render_svg("mock").into_bytes(),
            ArtifactFormat::Raster => screen.render_png().map_err(|e| DriverError::ExportFailed {
                format: format.to_string(),
                reason: e.to_string(),
            })?,
        };
        tokio::fs::write(path, &bytes).await?;
        Ok(Artifact {
            format,
            path: path.to_path_buf(),
            size_bytes: bytes.len() as u64,
        })
    }

    async fn stop(&self, _session: MockSession) -> DriverResult<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::TerminalSize;
    use crate::interaction::parse_interaction;

    fn app() -> AppSource {
        AppSource::new("demo").size(TerminalSize::COMPACT)
    }

    #[tokio::test]
    async fn records_dispatches_and_exports_svg() {
        let driver = MockDriver::new();
        let mut session = driver.start(&app()).await.unwrap();
        let cmd = parse_interaction("press:enter").unwrap();
        driver.dispatch(&mut session, &cmd).await.unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.svg");
        let artifact = driver
            .export(&mut session, ArtifactFormat::Vector, &path)
            .await
            .unwrap();
        driver.stop(session).await.unwrap();

        assert_eq!(driver.starts(), 1);
        assert_eq!(driver.dispatched(), vec!["press:enter".to_string()]);
        assert_eq!(driver.live_sessions(), 0);
        assert!(artifact.size_bytes > 0);
        assert!(std::fs::read_to_string(path).unwrap().contains("press:enter"));
    }

    #[tokio::test]
    async fn scripted_click_failure_is_target_not_found() {
        let driver = MockDriver::new().fail_on("click:#gone");
        let mut session = driver.start(&app()).await.unwrap();
        let err = driver
            .dispatch(&mut session, &parse_interaction("click:#gone").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::TargetNotFound { .. }));
    }

    #[tokio::test]
    async fn raster_can_be_disabled() {
        let driver = MockDriver::new().without_raster();
        let mut session = driver.start(&app()).await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        let err = driver
            .export(&mut session, ArtifactFormat::Raster, &dir.path().join("x.png"))
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::RenderingUnavailable(_)));
    }
}
