use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::driver::{AppSource, Artifact, ArtifactFormat};
use crate::error::CacheError;
use crate::plugins::Metadata;

/// Requested artifact encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Vector,
    Raster,
    Both,
}

impl OutputFormat {
    pub fn formats(&self) -> Vec<ArtifactFormat> {
        match self {
            OutputFormat::Vector => vec![ArtifactFormat::Vector],
            OutputFormat::Raster => vec![ArtifactFormat::Raster],
            OutputFormat::Both => vec![ArtifactFormat::Vector, ArtifactFormat::Raster],
        }
    }

    /// The format describing exactly the given artifacts.
    pub fn covering(formats: &[ArtifactFormat]) -> Option<OutputFormat> {
        let vector = formats.contains(&ArtifactFormat::Vector);
        let raster = formats.contains(&ArtifactFormat::Raster);
        match (vector, raster) {
            (true, true) => Some(OutputFormat::Both),
            (true, false) => Some(OutputFormat::Vector),
            (false, true) => Some(OutputFormat::Raster),
            (false, false) => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Vector => "vector",
            OutputFormat::Raster => "raster",
            OutputFormat::Both => "both",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "vector" | "svg" => Ok(OutputFormat::Vector),
            "raster" | "png" => Ok(OutputFormat::Raster),
            "both" => Ok(OutputFormat::Both),
            other => Err(format!("unknown output format '{other}' (expected vector, raster or both)")),
        }
    }
}

/// One capture to perform. Consumed by [`Capturer::capture`](super::Capturer::capture).
#[derive(Debug, Clone)]
pub struct CaptureRequest {
    pub app: AppSource,
    pub context: String,
    /// Raw interaction strings, validated as a whole before anything runs
    pub interactions: Vec<String>,
    pub output_format: OutputFormat,
    /// Write artifacts here instead of the organised `apps/<app>/<context>` tree
    pub output_dir: Option<PathBuf>,
    pub use_cache: bool,
    /// Overrides the cache's default TTL for this result
    pub cache_ttl: Option<Duration>,
}

impl CaptureRequest {
    pub fn new(app: AppSource) -> Self {
        Self {
            app,
            context: "capture".to_string(),
            interactions: Vec::new(),
            output_format: OutputFormat::Vector,
            output_dir: None,
            use_cache: true,
            cache_ttl: None,
        }
    }

    pub fn context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    pub fn interactions<I, S>(mut self, interactions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.interactions = interactions.into_iter().map(Into::into).collect();
        self
    }

    pub fn output_format(mut self, format: OutputFormat) -> Self {
        self.output_format = format;
        self
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    pub fn use_cache(mut self, enabled: bool) -> Self {
        self.use_cache = enabled;
        self
    }

    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }
}

/// The interaction that stopped a sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedStep {
    /// Zero-based position in the sequence
    pub index: usize,
    pub command: String,
}

/// Outcome of a capture.
///
/// `success == true` means every listed artifact existed with a non-zero
/// size when the result was assembled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureResult {
    pub success: bool,
    pub artifacts: Vec<Artifact>,
    /// Sum of all artifact sizes
    pub size_bytes: u64,
    /// Formats actually produced; differs from the request after a raster downgrade
    pub format: OutputFormat,
    pub timestamp: DateTime<Utc>,
    pub context: String,
    pub app: String,
    pub fingerprint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_step: Option<FailedStep>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub cache_hit: bool,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Metadata::is_empty")]
    pub metadata: Metadata,
}

impl CaptureResult {
    pub(crate) fn pending(request: &CaptureRequest, fingerprint: &str) -> Self {
        Self {
            success: false,
            artifacts: Vec::new(),
            size_bytes: 0,
            format: request.output_format,
            timestamp: Utc::now(),
            context: request.context.clone(),
            app: request.app.display_name(),
            fingerprint: fingerprint.to_string(),
            error_message: None,
            failed_step: None,
            warnings: Vec::new(),
            cache_hit: false,
            duration_ms: 0,
            metadata: Metadata::new(),
        }
    }

    pub(crate) fn fail(&mut self, message: impl Into<String>) {
        self.success = false;
        self.error_message = Some(message.into());
    }

    pub fn artifact_paths(&self) -> Vec<&Path> {
        self.artifacts.iter().map(|a| a.path.as_path()).collect()
    }

    /// Path of the first artifact, the vector one when both were produced.
    pub fn primary_path(&self) -> Option<&Path> {
        self.artifacts.first().map(|a| a.path.as_path())
    }

    pub fn path_for(&self, format: ArtifactFormat) -> Option<&Path> {
        self.artifacts
            .iter()
            .find(|a| a.format == format)
            .map(|a| a.path.as_path())
    }

    /// Check that every artifact is still on disk with its recorded size.
    pub fn verify_artifacts(&self) -> Result<(), CacheError> {
        if self.artifacts.is_empty() {
            return Err(CacheError::EntryCorrupted("result has no artifacts".into()));
        }
        for artifact in &self.artifacts {
            let len = match std::fs::metadata(&artifact.path) {
                Ok(meta) if meta.is_file() => meta.len(),
                _ => return Err(CacheError::ArtifactMissing(artifact.path.clone())),
            };
            if len == 0 || len != artifact.size_bytes {
                return Err(CacheError::EntryCorrupted(format!(
                    "{} is {} bytes, expected {}",
                    artifact.path.display(),
                    len,
                    artifact.size_bytes
                )));
            }
        }
        Ok(())
    }

    pub fn artifacts_intact(&self) -> bool {
        self.verify_artifacts().is_ok()
    }
}

/// Orchestrator lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CaptureState {
    Idle,
    Validating,
    Failed,
    ComputingFingerprint,
    CacheHit,
    ClaimingComputation,
    StartingDriver,
    ExecutingInteractions,
    InteractionFailed,
    Exporting,
    FinalizingSuccess,
    FinalizingFailure,
    RunningHooks,
    Done,
}

impl CaptureState {
    /// Whether `next` is a legal successor of `self`.
    pub fn can_transition_to(self, next: CaptureState) -> bool {
        use CaptureState::*;
        matches!(
            (self, next),
            (Idle, Validating)
                | (Validating, Failed)
                | (Validating, ComputingFingerprint)
                | (ComputingFingerprint, CacheHit)
                | (ComputingFingerprint, ClaimingComputation)
                | (CacheHit, Done)
                | (ClaimingComputation, CacheHit)
                | (ClaimingComputation, StartingDriver)
                | (StartingDriver, ExecutingInteractions)
                | (StartingDriver, FinalizingFailure)
                | (ExecutingInteractions, InteractionFailed)
                | (ExecutingInteractions, Exporting)
                | (ExecutingInteractions, FinalizingFailure)
                | (InteractionFailed, FinalizingFailure)
                | (Exporting, FinalizingSuccess)
                | (Exporting, FinalizingFailure)
                | (FinalizingSuccess, RunningHooks)
                | (FinalizingFailure, RunningHooks)
                | (RunningHooks, Done)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, CaptureState::Done | CaptureState::Failed)
    }
}

impl fmt::Display for CaptureState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
