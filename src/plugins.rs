//! Plugin hook pipeline.
//!
//! Plugins observe (and may annotate) captures at four points. Every hook has
//! a no-op default, so a plugin implements only what it needs. The pipeline
//! runs plugins in registration order and isolates each call: an error or a
//! panic is logged with the plugin's name and the remaining plugins still
//! run. Plugins registered with [`PluginPipeline::add_fatal`] instead abort
//! the capture, which is then reported as failed.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{error, info, warn};

use crate::capture::CaptureResult;
use crate::driver::AppSource;
pub use crate::error::{PluginAbort, PluginError, PluginResult};

/// Free-form annotations shared between hooks and attached to results.
pub type Metadata = serde_json::Map<String, Value>;

/// Where in the capture lifecycle a hook runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookPoint {
    PreCapture,
    PostCapture,
    OnSuccess,
    OnFailure,
}

impl fmt::Display for HookPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HookPoint::PreCapture => "pre_capture",
            HookPoint::PostCapture => "post_capture",
            HookPoint::OnSuccess => "on_success",
            HookPoint::OnFailure => "on_failure",
        })
    }
}

/// Capture lifecycle hooks.
#[async_trait]
pub trait CapturePlugin: Send + Sync {
    /// Identifies the plugin in logs and abort reports.
    fn name(&self) -> &str;

    /// Runs before the driver starts. Returned entries are merged into the
    /// metadata handed to `post_capture`; later plugins win on key clashes.
    async fn pre_capture(&self, _context: &str, _app: &AppSource) -> PluginResult<Metadata> {
        Ok(Metadata::new())
    }

    /// Runs once the result is assembled. May modify the result.
    async fn post_capture(&self, _result: &mut CaptureResult, _metadata: &Metadata) -> PluginResult<()> {
        Ok(())
    }

    async fn on_success(&self, _result: &CaptureResult) -> PluginResult<()> {
        Ok(())
    }

    async fn on_failure(&self, _error: &str, _context: &str) -> PluginResult<()> {
        Ok(())
    }
}

struct Registered {
    plugin: Arc<dyn CapturePlugin>,
    fatal: bool,
}

/// Ordered plugin list with per-call failure isolation.
#[derive(Default)]
pub struct PluginPipeline {
    plugins: Vec<Registered>,
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

impl PluginPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plugin whose failures are logged and ignored.
    pub fn add(&mut self, plugin: Arc<dyn CapturePlugin>) -> &mut Self {
        self.plugins.push(Registered {
            plugin,
            fatal: false,
        });
        self
    }

    /// Register a plugin whose failure aborts the capture.
    pub fn add_fatal(&mut self, plugin: Arc<dyn CapturePlugin>) -> &mut Self {
        self.plugins.push(Registered {
            plugin,
            fatal: true,
        });
        self
    }

    pub fn with(mut self, plugin: Arc<dyn CapturePlugin>) -> Self {
        self.add(plugin);
        self
    }

    pub fn with_fatal(mut self, plugin: Arc<dyn CapturePlugin>) -> Self {
        self.add_fatal(plugin);
        self
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.plugins.iter().map(|r| r.plugin.name().to_string()).collect()
    }

    /// Await one hook call, turning errors and panics into log lines, or
    /// into a [`PluginAbort`] for fatal plugins.
    async fn guarded<T, F>(entry: &Registered, hook: HookPoint, call: F) -> Result<Option<T>, PluginAbort>
    where
        F: Future<Output = PluginResult<T>>,
    {
        let message = match AssertUnwindSafe(call).catch_unwind().await {
            Ok(Ok(value)) => return Ok(Some(value)),
            Ok(Err(err)) => err.0,
            Err(payload) => format!("panicked: {}", panic_message(payload.as_ref())),
        };

        let name = entry.plugin.name();
        if entry.fatal {
            error!(plugin = name, hook = %hook, error = %message, "fatal plugin failed");
            return Err(PluginAbort {
                plugin: name.to_string(),
                hook,
                message,
            });
        }
        warn!(plugin = name, hook = %hook, error = %message, "plugin failed (continuing)");
        Ok(None)
    }

    pub async fn pre_capture(&self, context: &str, app: &AppSource) -> Result<Metadata, PluginAbort> {
        let mut merged = Metadata::new();
        for entry in &self.plugins {
            let call = entry.plugin.pre_capture(context, app);
            if let Some(meta) = Self::guarded(entry, HookPoint::PreCapture, call).await? {
                merged.extend(meta);
            }
        }
        Ok(merged)
    }

    pub async fn post_capture(&self, result: &mut CaptureResult, metadata: &Metadata) -> Result<(), PluginAbort> {
        for entry in &self.plugins {
            let call = entry.plugin.post_capture(result, metadata);
            Self::guarded(entry, HookPoint::PostCapture, call).await?;
        }
        Ok(())
    }

    pub async fn on_success(&self, result: &CaptureResult) -> Result<(), PluginAbort> {
        for entry in &self.plugins {
            let call = entry.plugin.on_success(result);
            Self::guarded(entry, HookPoint::OnSuccess, call).await?;
        }
        Ok(())
    }

    /// Failure hooks always run to completion; a fatal failure here has
    /// nothing left to abort, so it is only logged.
    pub async fn on_failure(&self, error: &str, context: &str) {
        for entry in &self.plugins {
            let call = entry.plugin.on_failure(error, context);
            let _ = Self::guarded(entry, HookPoint::OnFailure, call).await;
        }
    }
}

impl fmt::Debug for PluginPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginPipeline")
            .field("plugins", &self.names())
            .finish()
    }
}

// ============================================================================
// Built-in plugins
// ============================================================================

const START_KEY: &str = "logging.started_at";

/// Logs capture start, completion and failures through `tracing`.
#[derive(Debug, Default)]
pub struct LoggingPlugin;

#[async_trait]
impl CapturePlugin for LoggingPlugin {
    fn name(&self) -> &str {
        "logging"
    }

    async fn pre_capture(&self, context: &str, app: &AppSource) -> PluginResult<Metadata> {
        info!(app = %app.display_name(), context, "starting capture");
        let mut meta = Metadata::new();
        meta.insert(
            START_KEY.into(),
            json!(chrono::Utc::now().timestamp_millis()),
        );
        Ok(meta)
    }

    async fn post_capture(&self, result: &mut CaptureResult, metadata: &Metadata) -> PluginResult<()> {
        let elapsed_ms = metadata
            .get(START_KEY)
            .and_then(Value::as_i64)
            .map(|start| chrono::Utc::now().timestamp_millis() - start)
            .unwrap_or(result.duration_ms as i64);
        if result.success {
            info!(
                path = ?result.primary_path(),
                size = result.size_bytes,
                elapsed_ms,
                "capture succeeded"
            );
        } else {
            error!(
                error = result.error_message.as_deref().unwrap_or("unknown"),
                elapsed_ms,
                "capture failed"
            );
        }
        Ok(())
    }

    async fn on_failure(&self, error: &str, context: &str) -> PluginResult<()> {
        error!(context, error, "capture failure");
        Ok(())
    }
}

/// Aggregate counters collected by [`MetricsPlugin`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CaptureMetrics {
    pub captures: u64,
    pub successes: u64,
    pub failures: u64,
    pub total_bytes: u64,
    pub total_duration_ms: u64,
}

impl CaptureMetrics {
    pub fn success_rate(&self) -> f64 {
        ratio(self.successes, self.captures)
    }

    pub fn average_size(&self) -> f64 {
        ratio(self.total_bytes, self.successes)
    }

    pub fn average_duration_ms(&self) -> f64 {
        ratio(self.total_duration_ms, self.captures)
    }
}

fn ratio(num: u64, den: u64) -> f64 {
    if den == 0 { 0.0 } else { num as f64 / den as f64 }
}

/// Counts captures, outcomes, sizes and durations.
///
/// Cache hits never reach plugin hooks; see `CaptureCache::stats` for those.
#[derive(Debug, Default)]
pub struct MetricsPlugin {
    metrics: Mutex<CaptureMetrics>,
}

impl MetricsPlugin {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> CaptureMetrics {
        self.metrics.lock().clone()
    }

    pub fn reset(&self) {
        *self.metrics.lock() = CaptureMetrics::default();
    }
}

#[async_trait]
impl CapturePlugin for MetricsPlugin {
    fn name(&self) -> &str {
        "metrics"
    }

    async fn pre_capture(&self, _context: &str, _app: &AppSource) -> PluginResult<Metadata> {
        self.metrics.lock().captures += 1;
        Ok(Metadata::new())
    }

    async fn post_capture(&self, result: &mut CaptureResult, _metadata: &Metadata) -> PluginResult<()> {
        let mut m = self.metrics.lock();
        m.total_duration_ms += result.duration_ms;
        if result.success {
            m.successes += 1;
            m.total_bytes += result.size_bytes;
        } else {
            m.failures += 1;
        }
        Ok(())
    }
}

/// Checks artifact sizes and records the verdict under `metadata["validation"]`.
#[derive(Debug, Clone)]
pub struct ValidationPlugin {
    pub min_size: u64,
    pub max_size: u64,
    /// Treat artifacts under 512 bytes as blank frames
    pub require_content: bool,
}

impl Default for ValidationPlugin {
    fn default() -> Self {
        Self {
            min_size: 1024,
            max_size: 10 * 1024 * 1024,
            require_content: true,
        }
    }
}

#[async_trait]
impl CapturePlugin for ValidationPlugin {
    fn name(&self) -> &str {
        "validation"
    }

    async fn post_capture(&self, result: &mut CaptureResult, _metadata: &Metadata) -> PluginResult<()> {
        if !result.success || result.artifacts.is_empty() {
            return Ok(());
        }
        let size = result.size_bytes;
        let mut errors = Vec::new();
        if size < self.min_size {
            errors.push(format!("file size {size} below minimum {}", self.min_size));
        }
        if size > self.max_size {
            errors.push(format!("file size {size} exceeds maximum {}", self.max_size));
        }
        let content_detected = !(self.require_content && size < 512);
        if !content_detected {
            errors.push("capture appears to be empty".to_string());
        }
        let quality_score = if errors.is_empty() { 1.0 } else { 0.5 };
        result.metadata.insert(
            "validation".into(),
            json!({
                "file_size_valid": size >= self.min_size && size <= self.max_size,
                "content_detected": content_detected,
                "quality_score": quality_score,
                "validation_errors": errors,
            }),
        );
        Ok(())
    }
}
