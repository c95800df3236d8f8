//! On-disk layout of captured artifacts.
//!
//! Artifacts land under `<base>/apps/<app>/<context>/` with file names of
//! the form `<context>_<YYYYMMDD_HHMMSS>_<fp8>.<ext>`, unless a request
//! supplies its own output directory.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::capture::CaptureResult;
use crate::driver::ArtifactFormat;

/// Characters of the fingerprint kept in file names.
const FINGERPRINT_PREFIX: usize = 8;

/// Generate a timestamp string in YYYYMMDD_HHMMSS format
pub fn generate_timestamp() -> String {
    format_timestamp(&Utc::now())
}

pub fn format_timestamp(at: &DateTime<Utc>) -> String {
    at.format("%Y%m%d_%H%M%S").to_string()
}

/// Make a label safe to use as a single path component.
pub fn sanitize_name(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_matches('.');
    if cleaned.is_empty() {
        "unnamed".to_string()
    } else {
        cleaned.to_string()
    }
}

/// Directory for one app/context pair below `base`.
pub fn artifact_dir(base: &Path, app: &str, context: &str) -> PathBuf {
    base.join("apps")
        .join(sanitize_name(app))
        .join(sanitize_name(context))
}

/// File stem shared by all artifacts (and the manifest) of one capture.
pub fn artifact_stem(context: &str, timestamp: &str, fingerprint: &str) -> String {
    let short: String = fingerprint.chars().take(FINGERPRINT_PREFIX).collect();
    format!("{}_{}_{}", sanitize_name(context), timestamp, short)
}

pub fn artifact_path(dir: &Path, stem: &str, format: ArtifactFormat) -> PathBuf {
    dir.join(format!("{stem}.{}", format.extension()))
}

/// Write the JSON manifest next to the primary artifact.
///
/// Returns the manifest path, or `None` when the result has no artifacts.
pub fn write_manifest(result: &CaptureResult) -> io::Result<Option<PathBuf>> {
    let Some(primary) = result.primary_path() else {
        return Ok(None);
    };
    let manifest_path = primary.with_extension("json");
    let json = serde_json::to_string_pretty(result).map_err(io::Error::other)?;
    fs::write(&manifest_path, json)?;
    Ok(Some(manifest_path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn sanitizes_path_components() {
        assert_eq!(sanitize_name("my app/v2"), "my_app_v2");
        assert_eq!(sanitize_name("../.."), "_._");
        assert_eq!(sanitize_name("   "), "unnamed");
        assert_eq!(sanitize_name("main-menu"), "main-menu");
    }

    #[test]
    fn builds_organised_paths() {
        let dir = artifact_dir(Path::new("/tmp/snaps"), "demo", "main menu");
        assert_eq!(dir, PathBuf::from("/tmp/snaps/apps/demo/main_menu"));

        let stem = artifact_stem("main menu", "20240101_120000", "0123456789abcdef");
        assert_eq!(stem, "main_menu_20240101_120000_01234567");
        assert_eq!(
            artifact_path(&dir, &stem, ArtifactFormat::Raster),
            dir.join("main_menu_20240101_120000_01234567.png")
        );
    }

    #[test]
    fn timestamp_has_fixed_shape() {
        let ts = generate_timestamp();
        assert_eq!(ts.len(), 15);
        assert_eq!(ts.as_bytes()[8], b'_');
    }
}
