//! TUI Snapshots - visual regression testing for terminal applications.
//!
//! This crate provides:
//! - Interaction scripts (`click:#ok`, `type:hello`, `press:ctrl+c`, `wait:0.5`)
//!   validated as a whole before anything runs
//! - A capture orchestrator that drives an application through an
//!   [`AutomationDriver`] and exports vector (SVG) and raster (PNG) artifacts
//! - A fingerprint-keyed result cache with TTL, LRU eviction and
//!   single-flight deduplication of concurrent captures
//! - A plugin pipeline around every capture, isolating plugin failures
//! - Artifact comparison and batch regression reports
//!
//! # Example
//!
//! ```rust,no_run
//! use tui_snapshots::{AppSource, CaptureRequest, Capturer, OutputFormat, PtyDriver};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let capturer = Capturer::new(PtyDriver::default());
//! let request = CaptureRequest::new(AppSource::new("/usr/bin/htop"))
//!     .context("main")
//!     .interactions(["press:f2", "wait:0.5"])
//!     .output_format(OutputFormat::Both);
//! let result = capturer.capture(request).await?;
//! println!("{:?}", result.artifact_paths());
//! # Ok(())
//! # }
//! ```

pub mod artifacts;
pub mod cache;
pub mod capture;
pub mod compare;
pub mod config;
pub mod driver;
pub mod error;
pub mod interaction;
pub mod plugins;
pub mod quality;

// Re-export capture types
pub use capture::{
    CaptureConfig, CaptureRequest, CaptureResult, CaptureState, Capturer, FailedStep,
    Fingerprinter, OutputFormat, capture_app,
};

// Re-export drivers
pub use driver::{
    AppSource, Artifact, ArtifactFormat, AutomationDriver, MockDriver, PtyDriver, PtyDriverConfig,
    TerminalSize,
};

// Re-export the interaction grammar
pub use interaction::{InteractionCommand, Target, Verb, parse_interaction, parse_sequence, validate_sequence};

// Re-export cache and plugins
pub use cache::{CacheConfig, CacheStats, CaptureCache};
pub use plugins::{CapturePlugin, HookPoint, LoggingPlugin, Metadata, MetricsPlugin, PluginPipeline, ValidationPlugin};

// Re-export comparison
pub use compare::{ComparisonRecord, ComparisonReport, ComparisonStatus, compare, compare_batch, compare_paths};

pub use error::{CaptureError, CompareError, DriverError, InteractionError, PluginError, ValidationError};
