//! Configuration management with environment variable support.
//!
//! Library components take explicit config structs; this module supplies the
//! process-wide defaults those structs start from.
//!
//! # Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `TUI_SNAPSHOTS_OUTPUT_DIR` | Base directory for captured artifacts | `snapshots` |
//! | `TUI_SNAPSHOTS_CACHE_TTL` | Cache entry lifetime in seconds | `3600` |
//! | `TUI_SNAPSHOTS_CACHE_CAPACITY` | Max cached results, `0` for unbounded | `256` |
//! | `TUI_SNAPSHOTS_SESSION_TIMEOUT` | Whole driver session timeout in seconds | `60` |
//! | `TUI_SNAPSHOTS_INTERACTION_DELAY` | Settle delay between interactions (ms) | `100` |
//! | `TUI_SNAPSHOTS_THRESHOLD` | Default comparison threshold | `0.95` |
//! | `TUI_SNAPSHOTS_DEFAULT_SIZE` | Default terminal size | `standard` |
//! | `TUI_SNAPSHOTS_WRITE_MANIFEST` | Write a JSON manifest per capture | `true` |
//!
//! # Example
//!
//! ```bash
//! export TUI_SNAPSHOTS_OUTPUT_DIR="/var/tmp/snapshots"
//! export TUI_SNAPSHOTS_CACHE_TTL=600
//! ```

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::Duration;

// ============================================================================
// Default Values
// ============================================================================

/// Default artifact base directory
pub const DEFAULT_OUTPUT_DIR: &str = "snapshots";

/// Default cache TTL (seconds)
pub const DEFAULT_CACHE_TTL: u64 = 3600;

/// Default cache capacity (entries)
pub const DEFAULT_CACHE_CAPACITY: usize = 256;

/// Default driver session timeout (seconds)
pub const DEFAULT_SESSION_TIMEOUT: u64 = 60;

/// Default delay between interactions (milliseconds)
pub const DEFAULT_INTERACTION_DELAY: u64 = 100;

/// Default similarity threshold for comparisons
pub const DEFAULT_THRESHOLD: f64 = 0.95;

/// Default terminal size preset
pub const DEFAULT_TERMINAL_SIZE: &str = "standard";

/// Default terminal width (columns)
pub const DEFAULT_TERMINAL_WIDTH: u16 = 120;

/// Default terminal height (rows)
pub const DEFAULT_TERMINAL_HEIGHT: u16 = 40;

// ============================================================================
// Environment Variable Names
// ============================================================================

pub const ENV_OUTPUT_DIR: &str = "TUI_SNAPSHOTS_OUTPUT_DIR";
pub const ENV_CACHE_TTL: &str = "TUI_SNAPSHOTS_CACHE_TTL";
pub const ENV_CACHE_CAPACITY: &str = "TUI_SNAPSHOTS_CACHE_CAPACITY";
pub const ENV_SESSION_TIMEOUT: &str = "TUI_SNAPSHOTS_SESSION_TIMEOUT";
pub const ENV_INTERACTION_DELAY: &str = "TUI_SNAPSHOTS_INTERACTION_DELAY";
pub const ENV_THRESHOLD: &str = "TUI_SNAPSHOTS_THRESHOLD";
pub const ENV_DEFAULT_SIZE: &str = "TUI_SNAPSHOTS_DEFAULT_SIZE";
pub const ENV_WRITE_MANIFEST: &str = "TUI_SNAPSHOTS_WRITE_MANIFEST";

// ============================================================================
// Configuration Getters (with caching)
// ============================================================================

static CONFIG: OnceLock<Config> = OnceLock::new();

/// Get the global configuration (initialized from environment on first access)
pub fn get() -> &'static Config {
    CONFIG.get_or_init(Config::from_env)
}

/// Centralized configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub capture: CaptureSettings,
    pub cache: CacheSettings,
    pub compare: CompareSettings,
    pub terminal: TerminalSettings,
}

/// Capture orchestration settings
#[derive(Debug, Clone)]
pub struct CaptureSettings {
    /// Base directory artifacts are organised under
    pub output_dir: PathBuf,
    /// Whole driver session timeout
    pub session_timeout: Duration,
    /// Settle delay after each interaction
    pub interaction_delay: Duration,
    /// Whether a JSON manifest is written beside each capture
    pub write_manifest: bool,
}

/// Result cache settings
#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub ttl: Duration,
    /// `0` disables the LRU bound
    pub capacity: usize,
}

/// Comparison settings
#[derive(Debug, Clone)]
pub struct CompareSettings {
    pub threshold: f64,
}

/// Terminal geometry for PTY captures
#[derive(Debug, Clone)]
pub struct TerminalSettings {
    pub size: String,
    pub width: u16,
    pub height: u16,
}

impl Config {
    /// Create configuration from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        Self {
            capture: CaptureSettings::from_env(),
            cache: CacheSettings::from_env(),
            compare: CompareSettings::from_env(),
            terminal: TerminalSettings::from_env(),
        }
    }

    /// Create configuration with all defaults (ignoring environment)
    pub fn defaults() -> Self {
        Self {
            capture: CaptureSettings::defaults(),
            cache: CacheSettings::defaults(),
            compare: CompareSettings::defaults(),
            terminal: TerminalSettings::defaults(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

fn env_bool(name: &str) -> Option<bool> {
    env::var(name).ok().and_then(|s| parse_bool(&s))
}

impl CaptureSettings {
    pub fn from_env() -> Self {
        Self {
            output_dir: env::var(ENV_OUTPUT_DIR)
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_OUTPUT_DIR)),
            session_timeout: Duration::from_secs(
                env_parse(ENV_SESSION_TIMEOUT).unwrap_or(DEFAULT_SESSION_TIMEOUT),
            ),
            interaction_delay: Duration::from_millis(
                env_parse(ENV_INTERACTION_DELAY).unwrap_or(DEFAULT_INTERACTION_DELAY),
            ),
            write_manifest: env_bool(ENV_WRITE_MANIFEST).unwrap_or(true),
        }
    }

    pub fn defaults() -> Self {
        Self {
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            session_timeout: Duration::from_secs(DEFAULT_SESSION_TIMEOUT),
            interaction_delay: Duration::from_millis(DEFAULT_INTERACTION_DELAY),
            write_manifest: true,
        }
    }
}

impl CacheSettings {
    pub fn from_env() -> Self {
        Self {
            ttl: Duration::from_secs(env_parse(ENV_CACHE_TTL).unwrap_or(DEFAULT_CACHE_TTL)),
            capacity: env_parse(ENV_CACHE_CAPACITY).unwrap_or(DEFAULT_CACHE_CAPACITY),
        }
    }

    pub fn defaults() -> Self {
        Self {
            ttl: Duration::from_secs(DEFAULT_CACHE_TTL),
            capacity: DEFAULT_CACHE_CAPACITY,
        }
    }
}

impl CompareSettings {
    pub fn from_env() -> Self {
        let threshold = env_parse::<f64>(ENV_THRESHOLD)
            .filter(|t| (0.0..=1.0).contains(t))
            .unwrap_or(DEFAULT_THRESHOLD);
        Self { threshold }
    }

    pub fn defaults() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
        }
    }
}

impl TerminalSettings {
    pub fn from_env() -> Self {
        let size = env::var(ENV_DEFAULT_SIZE).unwrap_or_else(|_| DEFAULT_TERMINAL_SIZE.to_string());

        let (width, height) =
            parse_terminal_size(&size).unwrap_or((DEFAULT_TERMINAL_WIDTH, DEFAULT_TERMINAL_HEIGHT));

        Self {
            size,
            width,
            height,
        }
    }

    pub fn defaults() -> Self {
        Self {
            size: DEFAULT_TERMINAL_SIZE.to_string(),
            width: DEFAULT_TERMINAL_WIDTH,
            height: DEFAULT_TERMINAL_HEIGHT,
        }
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Parse a terminal size string into (width, height)
/// Supports: "compact" (80x24), "standard" (120x40), "large" (160x50), "xl" (200x60), or "WxH"
pub fn parse_terminal_size(size: &str) -> Option<(u16, u16)> {
    match size.trim().to_lowercase().as_str() {
        "compact" => Some((80, 24)),
        "standard" => Some((120, 40)),
        "large" => Some((160, 50)),
        "xl" => Some((200, 60)),
        custom => {
            let (w, h) = custom.split_once('x')?;
            let w: u16 = w.parse().ok()?;
            let h: u16 = h.parse().ok()?;
            (w > 0 && h > 0).then_some((w, h))
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Base artifact directory (convenience function)
pub fn output_dir() -> PathBuf {
    get().capture.output_dir.clone()
}

/// Default comparison threshold (convenience function)
pub fn default_threshold() -> f64 {
    get().compare.threshold
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_terminal_size_presets() {
        assert_eq!(parse_terminal_size("compact"), Some((80, 24)));
        assert_eq!(parse_terminal_size("Standard"), Some((120, 40)));
        assert_eq!(parse_terminal_size("xl"), Some((200, 60)));
    }

    #[test]
    fn test_parse_terminal_size_custom() {
        assert_eq!(parse_terminal_size("100x30"), Some((100, 30)));
        assert_eq!(parse_terminal_size("0x30"), None);
        assert_eq!(parse_terminal_size("100"), None);
    }

    #[test]
    fn test_parse_bool() {
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool("off"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn test_config_defaults() {
        let config = Config::defaults();
        assert_eq!(config.cache.ttl, Duration::from_secs(3600));
        assert_eq!(config.cache.capacity, 256);
        assert_eq!(config.capture.output_dir, PathBuf::from("snapshots"));
        assert!(config.capture.write_manifest);
        assert!((config.compare.threshold - 0.95).abs() < f64::EPSILON);
    }
}
