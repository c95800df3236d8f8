//! Automation drivers.
//!
//! A driver starts a target application in a controllable mode, accepts
//! interactions one at a time and exports what is on screen. The capture
//! orchestrator only ever talks to the [`AutomationDriver`] trait.

mod mock;
mod pty;
pub mod terminal;
mod types;

use std::path::Path;

use async_trait::async_trait;

pub use crate::error::{DriverError, DriverResult};
use crate::interaction::InteractionCommand;

pub use mock::{MockDriver, MockSession};
pub use pty::{PtyDriver, PtyDriverConfig, PtySession, key_bytes};
pub use types::{AppSource, Artifact, ArtifactFormat, TerminalSize};

/// Narrow contract between the orchestrator and whatever actually runs the app.
///
/// A session is owned by exactly one capture and is never shared. `stop` must
/// be safe to call after any failure, including a failed dispatch.
#[async_trait]
pub trait AutomationDriver: Send + Sync + 'static {
    type Session: Send + 'static;

    /// Identifies the driver in logs.
    fn name(&self) -> &str;

    async fn start(&self, app: &AppSource) -> DriverResult<Self::Session>;

    async fn dispatch(
        &self,
        session: &mut Self::Session,
        command: &InteractionCommand,
    ) -> DriverResult<()>;

    /// Render the current screen to `path` in `format`.
    ///
    /// Drivers without a raster backend return [`DriverError::RenderingUnavailable`].
    async fn export(
        &self,
        session: &mut Self::Session,
        format: ArtifactFormat,
        path: &Path,
    ) -> DriverResult<Artifact>;

    async fn stop(&self, session: Self::Session) -> DriverResult<()>;
}
