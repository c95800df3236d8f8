//! Real driver: runs the application inside a pseudo terminal.
//!
//! Output is read on a dedicated thread and fed into a [`Terminal`] screen
//! model. Every PTY operation runs on the blocking pool; a session is an
//! `Arc<Mutex<_>>` so the blocking closures can own a handle to it.

use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use portable_pty::{Child, CommandBuilder, MasterPty, PtySize, native_pty_system};
use tracing::{debug, warn};

use super::terminal::Terminal;
use super::{AppSource, Artifact, ArtifactFormat, AutomationDriver, DriverError, DriverResult};
use crate::interaction::{InteractionCommand, Target, Verb};

const QUIET_WINDOW: Duration = Duration::from_millis(180);
/// Maximum time to wait for the first frame (for apps that output continuously)
const MAX_STARTUP_RENDER_WAIT: Duration = Duration::from_secs(3);
/// Maximum time to wait for a frame after each interaction
const MAX_INPUT_RENDER_WAIT: Duration = Duration::from_secs(2);
const EXIT_GRACE: Duration = Duration::from_millis(300);

/// Configuration for [`PtyDriver`].
#[derive(Debug, Clone)]
pub struct PtyDriverConfig {
    /// Output silence that counts as a settled frame
    pub quiet_window: Duration,
    pub startup_wait: Duration,
    pub input_wait: Duration,
    /// Pause between characters of a `type` step
    pub typing_delay: Duration,
    /// Raster export needs the font renderer; disable to force vector-only output
    pub raster_enabled: bool,
    pub env: Vec<(String, String)>,
}

impl Default for PtyDriverConfig {
    fn default() -> Self {
        Self {
            quiet_window: QUIET_WINDOW,
            startup_wait: MAX_STARTUP_RENDER_WAIT,
            input_wait: MAX_INPUT_RENDER_WAIT,
            typing_delay: Duration::from_millis(50),
            raster_enabled: true,
            env: Vec::new(),
        }
    }
}

impl PtyDriverConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn quiet_window(mut self, window: Duration) -> Self {
        self.quiet_window = window;
        self
    }

    pub fn startup_wait(mut self, wait: Duration) -> Self {
        self.startup_wait = wait;
        self
    }

    pub fn typing_delay(mut self, delay: Duration) -> Self {
        self.typing_delay = delay;
        self
    }

    pub fn raster_enabled(mut self, enabled: bool) -> Self {
        self.raster_enabled = enabled;
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

/// Drives applications through a native PTY.
#[derive(Debug, Clone, Default)]
pub struct PtyDriver {
    config: PtyDriverConfig,
}

impl PtyDriver {
    pub fn new(config: PtyDriverConfig) -> Self {
        Self { config }
    }
}

struct PtyState {
    terminal: Terminal,
    rx: Receiver<Vec<u8>>,
    writer: Box<dyn Write + Send>,
    child: Box<dyn Child + Send + Sync>,
    _master: Box<dyn MasterPty + Send>,
}

impl PtyState {
    fn send(&mut self, command: &InteractionCommand, bytes: &[u8]) -> DriverResult<()> {
        self.writer
            .write_all(bytes)
            .and_then(|_| self.writer.flush())
            .map_err(|e| DriverError::DispatchFailed {
                command: command.to_string(),
                reason: e.to_string(),
            })
    }

    fn settle(&mut self, quiet: Duration, max_wait: Duration) {
        drain_until_quiet(&self.rx, &mut self.terminal, quiet, max_wait);
    }

    fn exited(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(Some(_)))
    }

    fn shutdown(&mut self) {
        if self.exited() {
            return;
        }
        let deadline = Instant::now() + EXIT_GRACE;
        while Instant::now() < deadline {
            if self.exited() {
                return;
            }
            thread::sleep(Duration::from_millis(20));
        }
        if let Err(err) = self.child.kill() {
            debug!(error = %err, "kill after grace period failed");
        }
        let _ = self.child.wait();
    }
}

impl Drop for PtyState {
    fn drop(&mut self) {
        if !self.exited() {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

/// A live PTY session.
pub struct PtySession {
    app: String,
    state: Arc<Mutex<PtyState>>,
}

impl PtySession {
    /// Visible screen text, for diagnostics.
    pub fn screen_text(&self) -> String {
        self.state.lock().terminal.screen().text()
    }
}

async fn blocking<T, F>(label: &'static str, f: F) -> DriverResult<T>
where
    F: FnOnce() -> DriverResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| DriverError::Io(std::io::Error::other(format!("{label} task failed: {e}"))))?
}

#[async_trait]
impl AutomationDriver for PtyDriver {
    type Session = PtySession;

    fn name(&self) -> &str {
        "pty"
    }

    /// Spawn `app` and wait for its first frame.
    ///
    /// The spawn runs on a blocking thread and cannot be interrupted. If the
    /// caller stops waiting, the finished state is dropped, which kills and
    /// reaps the child.
    async fn start(&self, app: &AppSource) -> DriverResult<PtySession> {
        let app = app.clone();
        let config = self.config.clone();
        let name = app.display_name();
        let state = blocking("start", move || spawn_app(&app, &config)).await?;
        debug!(app = %name, "pty session started");
        Ok(PtySession {
            app: name,
            state: Arc::new(Mutex::new(state)),
        })
    }

    async fn dispatch(
        &self,
        session: &mut PtySession,
        command: &InteractionCommand,
    ) -> DriverResult<()> {
        // Wait runs on the async clock so cancellation interrupts it.
        if command.verb() == Verb::Wait {
            tokio::time::sleep(command.duration().unwrap_or_default()).await;
            let state = Arc::clone(&session.state);
            let quiet = self.config.quiet_window;
            return blocking("wait", move || {
                let mut state = state.lock();
                state.settle(quiet, quiet);
                Ok(())
            })
            .await;
        }

        let state = Arc::clone(&session.state);
        let config = self.config.clone();
        let command = command.clone();
        blocking("dispatch", move || {
            let mut state = state.lock();
            if state.exited() {
                return Err(DriverError::SessionClosed);
            }
            dispatch_blocking(&mut state, &command, &config)?;
            state.settle(config.quiet_window, config.input_wait);
            Ok(())
        })
        .await
    }

    async fn export(
        &self,
        session: &mut PtySession,
        format: ArtifactFormat,
        path: &Path,
    ) -> DriverResult<Artifact> {
        if format == ArtifactFormat::Raster && !self.config.raster_enabled {
            return Err(DriverError::RenderingUnavailable(
                "raster rendering disabled for this driver".into(),
            ));
        }
        let state = Arc::clone(&session.state);
        let title = session.app.clone();
        let path = path.to_path_buf();
        blocking("export", move || {
            let mut state = state.lock();
            while let Ok(chunk) = state.rx.try_recv() {
                state.terminal.feed(&chunk);
            }
            let screen = state.terminal.screen();
            let bytes = match format {
                ArtifactFormat::Vector => screen.render_svg(&title).into_bytes(),
                ArtifactFormat::Raster => {
                    screen.render_png().map_err(|e| DriverError::ExportFailed {
                        format: format.to_string(),
                        reason: e.to_string(),
                    })?
                }
            };
            std::fs::write(&path, &bytes)?;
            Ok(Artifact {
                format,
                path,
                size_bytes: bytes.len() as u64,
            })
        })
        .await
    }

    async fn stop(&self, session: PtySession) -> DriverResult<()> {
        let state = session.state;
        blocking("stop", move || {
            state.lock().shutdown();
            Ok(())
        })
        .await
    }
}

fn spawn_app(app: &AppSource, config: &PtyDriverConfig) -> DriverResult<PtyState> {
    let size = app.terminal_size();
    let start_failed = |reason: String| DriverError::StartFailed {
        app: app.program().to_string(),
        reason,
    };

    let pair = native_pty_system()
        .openpty(PtySize {
            rows: size.rows,
            cols: size.cols,
            pixel_width: 0,
            pixel_height: 0,
        })
        .map_err(|e| start_failed(format!("failed to open PTY: {e}")))?;

    let program = resolve_binary_path(app.program())
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_else(|| app.program().to_string());

    let mut cmd = CommandBuilder::new(&program);
    cmd.env("TERM", "xterm-256color");
    cmd.env("COLUMNS", size.cols.to_string());
    cmd.env("LINES", size.rows.to_string());
    for (key, value) in &config.env {
        cmd.env(key, value);
    }
    for arg in app.arguments() {
        cmd.arg(arg);
    }

    let child = pair
        .slave
        .spawn_command(cmd)
        .map_err(|e| start_failed(format!("failed to spawn '{program}': {e}")))?;
    drop(pair.slave);

    let reader = pair
        .master
        .try_clone_reader()
        .map_err(|e| start_failed(format!("failed to clone PTY reader: {e}")))?;
    let writer = pair
        .master
        .take_writer()
        .map_err(|e| start_failed(format!("failed to take PTY writer: {e}")))?;

    let mut state = PtyState {
        terminal: Terminal::new(size.cols, size.rows),
        rx: spawn_reader(reader),
        writer,
        child,
        _master: pair.master,
    };
    state.settle(config.quiet_window, config.startup_wait);

    if state.exited() && state.terminal.screen().text().trim().is_empty() {
        return Err(start_failed("process exited before drawing anything".into()));
    }
    Ok(state)
}

fn dispatch_blocking(
    state: &mut PtyState,
    command: &InteractionCommand,
    config: &PtyDriverConfig,
) -> DriverResult<()> {
    match command.verb() {
        Verb::Press => {
            let key = command.key().unwrap_or_default();
            let bytes = key_bytes(&key).ok_or_else(|| DriverError::DispatchFailed {
                command: command.to_string(),
                reason: format!("unknown key '{key}'"),
            })?;
            state.send(command, &bytes)
        }
        Verb::Type => {
            let mut buf = [0u8; 4];
            for (i, ch) in command.argument().chars().enumerate() {
                if i > 0 && !config.typing_delay.is_zero() {
                    thread::sleep(config.typing_delay);
                }
                state.send(command, ch.encode_utf8(&mut buf).as_bytes())?;
            }
            Ok(())
        }
        Verb::Click | Verb::Hover => {
            let target = command.target().unwrap_or_else(|| Target::parse(command.argument()));
            let (col, row) = locate(state, &target).ok_or_else(|| DriverError::TargetNotFound {
                target: command.argument().to_string(),
            })?;
            // SGR mouse reporting is 1-based.
            let (x, y) = (col + 1, row + 1);
            let bytes = if command.verb() == Verb::Click {
                format!("\x1b[<0;{x};{y}M\x1b[<0;{x};{y}m")
            } else {
                format!("\x1b[<35;{x};{y}M")
            };
            state.send(command, bytes.as_bytes())
        }
        Verb::Wait => Ok(()),
    }
}

fn locate(state: &PtyState, target: &Target) -> Option<(u16, u16)> {
    let screen = state.terminal.screen();
    match target {
        Target::Cell { col, row } => (*col < screen.cols() && *row < screen.rows()).then_some((*col, *row)),
        other => other.label().and_then(|label| screen.find_text(label)),
    }
}

/// Bytes a terminal sends for a normalised key name.
pub fn key_bytes(key: &str) -> Option<Vec<u8>> {
    if key.chars().count() == 1 {
        return Some(key.as_bytes().to_vec());
    }
    let seq: &[u8] = match key {
        "up" => b"\x1b[A",
        "down" => b"\x1b[B",
        "right" => b"\x1b[C",
        "left" => b"\x1b[D",
        "home" => b"\x1b[H",
        "end" => b"\x1b[F",
        "pageup" => b"\x1b[5~",
        "pagedown" => b"\x1b[6~",
        "insert" => b"\x1b[2~",
        "delete" => b"\x1b[3~",
        "enter" => b"\r",
        "space" => b" ",
        "tab" => b"\t",
        "backspace" => b"\x7f",
        "escape" => b"\x1b",
        "f1" => b"\x1bOP",
        "f2" => b"\x1bOQ",
        "f3" => b"\x1bOR",
        "f4" => b"\x1bOS",
        "f5" => b"\x1b[15~",
        "f6" => b"\x1b[17~",
        "f7" => b"\x1b[18~",
        "f8" => b"\x1b[19~",
        "f9" => b"\x1b[20~",
        "f10" => b"\x1b[21~",
        "f11" => b"\x1b[23~",
        "f12" => b"\x1b[24~",
        other => {
            if let Some(rest) = other.strip_prefix("ctrl+") {
                return match rest {
                    "space" => Some(vec![0x00]),
                    r if r.len() == 1 && r.as_bytes()[0].is_ascii_lowercase() => {
                        Some(vec![r.as_bytes()[0] - b'a' + 1])
                    }
                    _ => None,
                };
            }
            if let Some(rest) = other.strip_prefix("alt+") {
                let mut inner = key_bytes(rest)?;
                inner.insert(0, 0x1b);
                return Some(inner);
            }
            return None;
        }
    };
    Some(seq.to_vec())
}

fn spawn_reader(mut reader: Box<dyn Read + Send>) -> Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut buffer = [0u8; 4096];
        loop {
            match reader.read(&mut buffer) {
                Ok(0) => break,
                Ok(size) => {
                    if tx.send(buffer[..size].to_vec()).is_err() {
                        break;
                    }
                }
                Err(err) => match err.kind() {
                    ErrorKind::Interrupted => continue,
                    ErrorKind::WouldBlock => thread::sleep(Duration::from_millis(10)),
                    _ => break,
                },
            }
        }
    });
    rx
}

/// Feed output into the terminal until it has been quiet for `quiet`, or
/// `max_wait` elapsed (apps that animate never go quiet).
fn drain_until_quiet(
    rx: &Receiver<Vec<u8>>,
    terminal: &mut Terminal,
    quiet: Duration,
    max_wait: Duration,
) {
    let start = Instant::now();
    let mut last_activity = Instant::now();

    while start.elapsed() < max_wait {
        match rx.recv_timeout(Duration::from_millis(50)) {
            Ok(chunk) => {
                terminal.feed(&chunk);
                last_activity = Instant::now();
            }
            Err(RecvTimeoutError::Timeout) => {
                if last_activity.elapsed() >= quiet {
                    break;
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    while let Ok(chunk) = rx.try_recv() {
        terminal.feed(&chunk);
    }
}

fn resolve_binary_path(command: &str) -> Option<PathBuf> {
    let path = Path::new(command);
    let looks_like_path = path.is_absolute()
        || command.contains(std::path::MAIN_SEPARATOR)
        || command.starts_with("./")
        || command.starts_with(".\\");

    if !looks_like_path {
        return None;
    }
    if path.exists() {
        std::fs::canonicalize(path)
            .map_err(|e| warn!(path = %path.display(), error = %e, "could not canonicalize"))
            .ok()
    } else {
        Some(path.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_keys_map_to_sequences() {
        assert_eq!(key_bytes("enter"), Some(b"\r".to_vec()));
        assert_eq!(key_bytes("f2"), Some(b"\x1bOQ".to_vec()));
        assert_eq!(key_bytes("ctrl+c"), Some(vec![0x03]));
        assert_eq!(key_bytes("alt+x"), Some(vec![0x1b, b'x']));
        assert_eq!(key_bytes("q"), Some(b"q".to_vec()));
        assert_eq!(key_bytes("hyper"), None);
    }

    #[test]
    fn drain_feeds_pending_output() {
        let (tx, rx) = mpsc::channel();
        tx.send(b"hello".to_vec()).unwrap();
        drop(tx);
        let mut terminal = Terminal::new(10, 2);
        drain_until_quiet(&rx, &mut terminal, Duration::from_millis(10), Duration::from_secs(1));
        assert!(terminal.screen().text().starts_with("hello"));
    }

    #[test]
    fn bare_program_names_are_not_resolved() {
        assert_eq!(resolve_binary_path("htop"), None);
        assert_eq!(
            resolve_binary_path("/definitely/not/here"),
            Some(PathBuf::from("/definitely/not/here"))
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn drives_a_shell_command() {
        let driver = PtyDriver::new(PtyDriverConfig::new().startup_wait(Duration::from_secs(2)));
        let app = AppSource::new("/bin/sh").args(["-c", "echo ready; sleep 2"]);
        let Ok(mut session) = driver.start(&app).await else {
            // No PTY available in this environment.
            return;
        };
        assert!(session.screen_text().contains("ready"));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame.svg");
        let artifact = driver
            .export(&mut session, ArtifactFormat::Vector, &path)
            .await
            .unwrap();
        assert!(artifact.size_bytes > 0);
        assert!(std::fs::read_to_string(&path).unwrap().contains("ready"));
        driver.stop(session).await.unwrap();
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn dropping_a_session_reaps_the_child() {
        let config = PtyDriverConfig::new().startup_wait(Duration::from_millis(200));
        let app = AppSource::new("/bin/sh").args(["-c", "sleep 30"]);
        let Ok(state) = spawn_app(&app, &config) else {
            return;
        };
        let Some(pid) = state.child.process_id() else {
            return;
        };
        let proc_dir = PathBuf::from(format!("/proc/{pid}"));
        assert!(proc_dir.exists());

        drop(state);
        // A zombie keeps its /proc entry until it is reaped.
        assert!(!proc_dir.exists());
    }
}
