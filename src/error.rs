//! Error types for capture, driving, caching and comparison.
//!
//! Only two kinds of failure ever reach a `capture` caller as an `Err`:
//! invalid interaction scripts (detected before any side effect) and
//! cancellation. Everything discovered mid-capture is recorded in the
//! returned `CaptureResult` instead.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::plugins::HookPoint;

fn quoted(examples: &[String]) -> String {
    examples
        .iter()
        .map(|e| format!("\"{e}\""))
        .collect::<Vec<_>>()
        .join(", ")
}

/// A single interaction string that failed to parse.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InteractionError {
    #[error(
        "interaction '{command}' is missing the ':' separator; interactions use '<verb>:<argument>', e.g. {}",
        quoted(.examples)
    )]
    Malformed { command: String, examples: Vec<String> },

    #[error(
        "unknown interaction verb '{verb}' in '{command}'; expected one of click, type, press, hover, wait, e.g. {}",
        quoted(.examples)
    )]
    UnknownVerb {
        command: String,
        verb: String,
        examples: Vec<String>,
    },

    #[error("interaction '{command}' is missing its {verb} target, e.g. {}", quoted(.examples))]
    MissingArgument {
        command: String,
        verb: String,
        examples: Vec<String>,
    },

    #[error(
        "wait duration '{argument}' in '{command}' {reason}, e.g. {}",
        quoted(.examples)
    )]
    InvalidDuration {
        command: String,
        argument: String,
        reason: String,
        examples: Vec<String>,
    },
}

impl InteractionError {
    /// The offending interaction string, verbatim.
    pub fn command(&self) -> &str {
        match self {
            InteractionError::Malformed { command, .. }
            | InteractionError::UnknownVerb { command, .. }
            | InteractionError::MissingArgument { command, .. }
            | InteractionError::InvalidDuration { command, .. } => command,
        }
    }

    /// Corrected examples the caller can copy.
    pub fn examples(&self) -> &[String] {
        match self {
            InteractionError::Malformed { examples, .. }
            | InteractionError::UnknownVerb { examples, .. }
            | InteractionError::MissingArgument { examples, .. }
            | InteractionError::InvalidDuration { examples, .. } => examples,
        }
    }
}

/// An interaction that failed validation, with its position in the sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct InvalidInteraction {
    /// Zero-based index into the submitted sequence
    pub index: usize,
    pub error: InteractionError,
}

/// A whole interaction sequence rejected before anything was dispatched.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{}", render_validation(.errors, .total))]
pub struct ValidationError {
    pub errors: Vec<InvalidInteraction>,
    /// Number of interactions that were submitted
    pub total: usize,
}

impl ValidationError {
    pub fn first(&self) -> Option<&InteractionError> {
        self.errors.first().map(|e| &e.error)
    }
}

fn render_validation(errors: &[InvalidInteraction], total: &usize) -> String {
    let mut out = format!(
        "invalid interaction sequence: {} of {} interaction(s) rejected",
        errors.len(),
        total
    );
    for invalid in errors {
        out.push_str(&format!("\n  position {}: {}", invalid.index + 1, invalid.error));
    }
    out
}

/// Failures reported by an automation driver.
#[derive(Error, Debug)]
pub enum DriverError {
    #[error("failed to start '{app}': {reason}")]
    StartFailed { app: String, reason: String },

    #[error("interaction target '{target}' not found on screen")]
    TargetNotFound { target: String },

    #[error("failed to dispatch '{command}': {reason}")]
    DispatchFailed { command: String, reason: String },

    #[error("failed to export {format} artifact: {reason}")]
    ExportFailed { format: String, reason: String },

    #[error("raster rendering unavailable: {0}")]
    RenderingUnavailable(String),

    #[error("driver session timed out after {0:?}")]
    Timeout(Duration),

    #[error("driver session already closed")]
    SessionClosed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type DriverResult<T> = Result<T, DriverError>;

/// Error returned from a plugin hook.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{0}")]
pub struct PluginError(pub String);

impl PluginError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<String> for PluginError {
    fn from(message: String) -> Self {
        Self(message)
    }
}

impl From<&str> for PluginError {
    fn from(message: &str) -> Self {
        Self(message.to_string())
    }
}

pub type PluginResult<T> = Result<T, PluginError>;

/// A fatal plugin failed and the capture must be treated as failed.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("plugin '{plugin}' aborted the capture in {hook}: {message}")]
pub struct PluginAbort {
    pub plugin: String,
    pub hook: HookPoint,
    pub message: String,
}

/// Problems with a cache entry. Never surfaced; always degrades to a miss.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("cached artifact missing: {0}")]
    ArtifactMissing(PathBuf),

    #[error("cache entry corrupted: {0}")]
    EntryCorrupted(String),
}

/// Errors returned by `capture`.
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("capture cancelled")]
    Cancelled,
}

pub type CaptureOutcome<T> = Result<T, CaptureError>;

/// Errors from the comparison surface that cannot be expressed as a record.
#[derive(Error, Debug)]
pub enum CompareError {
    #[error("both paths must be files or both directories: {baseline} vs {candidate}")]
    PathKindMismatch { baseline: PathBuf, candidate: PathBuf },

    #[error("path not found: {0}")]
    NotFound(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type CompareResult<T> = Result<T, CompareError>;
