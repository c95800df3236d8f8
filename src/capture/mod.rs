//! Capture orchestration.
//!
//! A [`Capturer`] validates a [`CaptureRequest`], consults the shared
//! [`CaptureCache`](crate::cache::CaptureCache), drives one
//! [`AutomationDriver`](crate::driver::AutomationDriver) session through the
//! interaction sequence, exports artifacts and runs the plugin hooks.

mod fingerprint;
mod orchestrator;
mod types;

pub use fingerprint::{Fingerprinter, DEFAULT_KEY_LENGTH, FINGERPRINT_SALT};
pub use orchestrator::{capture_app, CaptureConfig, Capturer};
pub use types::{CaptureRequest, CaptureResult, CaptureState, FailedStep, OutputFormat};
