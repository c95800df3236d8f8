//! Artifact comparison for regression detection.
//!
//! Scores are in `[0, 1]`. Byte-identical files score exactly `1.0`; any
//! other pair is scored from size similarity and structural similarity
//! (SVG element counts, or pixels for same-sized rasters), which keeps
//! differing files well below typical thresholds.
//!
//! The engine only reads artifacts and is independent of any capture state.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use serde::{Serialize, Serializer};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::driver::ArtifactFormat;
use crate::error::{CompareError, CompareResult};

const SIZE_WEIGHT: f64 = 0.3;
const STRUCTURE_WEIGHT: f64 = 0.3;
/// Structural score when the pair cannot be analysed structurally
const NEUTRAL_STRUCTURE: f64 = 0.5;

/// Placeholder written in reports for the absent side of a pair.
pub const MISSING: &str = "MISSING";

// ============================================================================
// Similarity
// ============================================================================

/// Hex SHA-256 of a file's contents.
pub fn file_hash(path: &Path) -> std::io::Result<String> {
    Ok(hex::encode(Sha256::digest(fs::read(path)?)))
}

/// Similarity of two artifacts in `[0, 1]`. Unreadable files score `0.0`.
pub fn calculate_similarity(a: &Path, b: &Path) -> f64 {
    match (fs::read(a), fs::read(b)) {
        (Ok(left), Ok(right)) => similarity_of(a, &left, b, &right),
        _ => 0.0,
    }
}

fn similarity_of(a: &Path, left: &[u8], b: &Path, right: &[u8]) -> f64 {
    if Sha256::digest(left) == Sha256::digest(right) {
        return 1.0;
    }

    let size = size_similarity(left.len() as u64, right.len() as u64);
    let structure = match (format_of(a), format_of(b)) {
        (Some(ArtifactFormat::Vector), Some(ArtifactFormat::Vector)) => {
            match (std::str::from_utf8(left), std::str::from_utf8(right)) {
                (Ok(l), Ok(r)) => svg_structural_similarity(l, r).unwrap_or(size),
                _ => size,
            }
        }
        (Some(ArtifactFormat::Raster), Some(ArtifactFormat::Raster)) => {
            pixel_similarity(left, right).unwrap_or(NEUTRAL_STRUCTURE)
        }
        _ => NEUTRAL_STRUCTURE,
    };

    (SIZE_WEIGHT * size + STRUCTURE_WEIGHT * structure).clamp(0.0, 1.0)
}

fn format_of(path: &Path) -> Option<ArtifactFormat> {
    path.extension()
        .and_then(|e| e.to_str())
        .and_then(ArtifactFormat::from_extension)
}

fn size_similarity(a: u64, b: u64) -> f64 {
    let largest = a.max(b).max(1);
    1.0 - a.abs_diff(b) as f64 / largest as f64
}

fn tag_regex() -> Option<&'static Regex> {
    static TAG: OnceLock<Option<Regex>> = OnceLock::new();
    TAG.get_or_init(|| Regex::new(r"<([A-Za-z_][\w.\-]*(?::[A-Za-z_][\w.\-]*)?)[\s/>]").ok())
        .as_ref()
}

/// Element counts by local tag name, or `None` if the text has no `<svg>` root.
pub fn count_svg_elements(svg: &str) -> Option<BTreeMap<String, usize>> {
    let mut counts = BTreeMap::new();
    for cap in tag_regex()?.captures_iter(svg) {
        let tag = &cap[1];
        let local = tag.rsplit(':').next().unwrap_or(tag);
        *counts.entry(local.to_string()).or_insert(0) += 1;
    }
    counts.contains_key("svg").then_some(counts)
}

/// Mean per-tag count similarity over the union of tag names.
pub fn svg_structural_similarity(a: &str, b: &str) -> Option<f64> {
    let left = count_svg_elements(a)?;
    let right = count_svg_elements(b)?;
    let tags: BTreeSet<&String> = left.keys().chain(right.keys()).collect();

    let total: f64 = tags
        .iter()
        .map(|tag| {
            let l = left.get(*tag).copied().unwrap_or(0);
            let r = right.get(*tag).copied().unwrap_or(0);
            1.0 - l.abs_diff(r) as f64 / l.max(r).max(1) as f64
        })
        .sum();
    Some(total / tags.len() as f64)
}

/// `1 - mean absolute channel difference`, for rasters of equal dimensions.
pub fn pixel_similarity(a: &[u8], b: &[u8]) -> Option<f64> {
    let left = image::load_from_memory(a).ok()?.to_rgba8();
    let right = image::load_from_memory(b).ok()?.to_rgba8();
    if left.dimensions() != right.dimensions() {
        return None;
    }
    let channels = left.as_raw().len();
    if channels == 0 {
        return Some(1.0);
    }
    let diff: u64 = left
        .as_raw()
        .iter()
        .zip(right.as_raw())
        .map(|(l, r)| l.abs_diff(*r) as u64)
        .sum();
    Some(1.0 - diff as f64 / (channels as f64 * 255.0))
}

// ============================================================================
// Records and reports
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ComparisonStatus {
    Passed,
    Failed,
    /// One side of the pair does not exist
    Missing,
}

/// One baseline/candidate pair.
#[derive(Debug, Clone, PartialEq)]
pub struct ComparisonRecord {
    pub baseline: Option<PathBuf>,
    pub candidate: Option<PathBuf>,
    pub similarity: f64,
    pub status: ComparisonStatus,
}

impl ComparisonRecord {
    fn scored(baseline: PathBuf, candidate: PathBuf, similarity: f64, threshold: f64) -> Self {
        let status = if similarity >= threshold {
            ComparisonStatus::Passed
        } else {
            ComparisonStatus::Failed
        };
        Self {
            baseline: Some(baseline),
            candidate: Some(candidate),
            similarity,
            status,
        }
    }

    fn missing(baseline: Option<PathBuf>, candidate: Option<PathBuf>) -> Self {
        Self {
            baseline,
            candidate,
            similarity: 0.0,
            status: ComparisonStatus::Missing,
        }
    }

    pub fn passed(&self) -> bool {
        self.status == ComparisonStatus::Passed
    }

    /// File name of whichever side exists, for display.
    pub fn name(&self) -> String {
        self.baseline
            .as_deref()
            .or(self.candidate.as_deref())
            .and_then(Path::file_name)
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

fn path_or_missing(path: &Option<PathBuf>) -> String {
    path.as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| MISSING.to_string())
}

impl Serialize for ComparisonRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct Row {
            baseline: String,
            current: String,
            similarity: f64,
            passed: bool,
        }
        Row {
            baseline: path_or_missing(&self.baseline),
            current: path_or_missing(&self.candidate),
            similarity: self.similarity,
            passed: self.passed(),
        }
        .serialize(serializer)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ReportSummary {
    pub total: usize,
    pub passed: usize,
    /// Includes missing pairs
    pub failed: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComparisonReport {
    pub threshold: f64,
    pub summary: ReportSummary,
    pub results: Vec<ComparisonRecord>,
}

impl ComparisonReport {
    pub fn new(threshold: f64, results: Vec<ComparisonRecord>) -> Self {
        let passed = results.iter().filter(|r| r.passed()).count();
        Self {
            threshold,
            summary: ReportSummary {
                total: results.len(),
                passed,
                failed: results.len() - passed,
            },
            results,
        }
    }

    pub fn all_passed(&self) -> bool {
        self.summary.failed == 0
    }

    /// Process exit code: `0` when every comparison passed.
    pub fn exit_code(&self) -> i32 {
        if self.all_passed() { 0 } else { 1 }
    }

    pub fn failures(&self) -> impl Iterator<Item = &ComparisonRecord> {
        self.results.iter().filter(|r| !r.passed())
    }

    pub fn missing(&self) -> usize {
        self.results
            .iter()
            .filter(|r| r.status == ComparisonStatus::Missing)
            .count()
    }

    pub fn to_json(&self) -> CompareResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Write the report as pretty JSON, creating parent directories.
    pub fn write_json(&self, path: &Path) -> CompareResult<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.to_json()?)?;
        info!(path = %path.display(), "wrote comparison report");
        Ok(())
    }
}

// ============================================================================
// Entry points
// ============================================================================

/// Compare two artifacts. An absent side yields a `Missing` record.
pub fn compare(baseline: &Path, candidate: &Path, threshold: f64) -> ComparisonRecord {
    let baseline_present = baseline.is_file();
    let candidate_present = candidate.is_file();
    if !baseline_present || !candidate_present {
        return ComparisonRecord::missing(
            baseline_present.then(|| baseline.to_path_buf()),
            candidate_present.then(|| candidate.to_path_buf()),
        );
    }

    let similarity = calculate_similarity(baseline, candidate);
    debug!(
        baseline = %baseline.display(),
        candidate = %candidate.display(),
        similarity,
        "compared artifacts"
    );
    ComparisonRecord::scored(
        baseline.to_path_buf(),
        candidate.to_path_buf(),
        similarity,
        threshold,
    )
}

/// Artifacts below `root`, as paths relative to it.
fn discover(root: &Path, recursive: bool) -> BTreeSet<PathBuf> {
    if !root.is_dir() {
        return BTreeSet::new();
    }
    let walker = WalkDir::new(root)
        .min_depth(1)
        .max_depth(if recursive { usize::MAX } else { 1 });

    walker
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(err) => {
                warn!(error = %err, "skipping unreadable entry");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file() && format_of(entry.path()).is_some())
        .filter_map(|entry| entry.path().strip_prefix(root).ok().map(Path::to_path_buf))
        .collect()
}

/// Compare every artifact (`.svg`/`.png`) in two directory trees, matched
/// by relative path. Files present on only one side become `Missing` records.
pub fn compare_batch(
    baseline_dir: &Path,
    candidate_dir: &Path,
    threshold: f64,
    recursive: bool,
) -> CompareResult<ComparisonReport> {
    if !baseline_dir.is_dir() {
        return Err(CompareError::NotFound(baseline_dir.to_path_buf()));
    }

    let baseline_files = discover(baseline_dir, recursive);
    let candidate_files = discover(candidate_dir, recursive);
    let all: BTreeSet<&PathBuf> = baseline_files.iter().chain(&candidate_files).collect();
    info!(files = all.len(), recursive, "comparing artifacts");

    let results = all
        .into_iter()
        .map(|relative| {
            let baseline = baseline_dir.join(relative);
            let candidate = candidate_dir.join(relative);
            match (baseline_files.contains(relative), candidate_files.contains(relative)) {
                (true, true) => compare(&baseline, &candidate, threshold),
                (true, false) => ComparisonRecord::missing(Some(baseline), None),
                _ => ComparisonRecord::missing(None, Some(candidate)),
            }
        })
        .collect();

    Ok(ComparisonReport::new(threshold, results))
}

/// Compare two files or two directories.
pub fn compare_paths(
    baseline: &Path,
    candidate: &Path,
    threshold: f64,
    recursive: bool,
) -> CompareResult<ComparisonReport> {
    if !baseline.exists() {
        return Err(CompareError::NotFound(baseline.to_path_buf()));
    }
    if baseline.is_dir() {
        if candidate.exists() && !candidate.is_dir() {
            return Err(CompareError::PathKindMismatch {
                baseline: baseline.to_path_buf(),
                candidate: candidate.to_path_buf(),
            });
        }
        return compare_batch(baseline, candidate, threshold, recursive);
    }
    if candidate.is_dir() {
        return Err(CompareError::PathKindMismatch {
            baseline: baseline.to_path_buf(),
            candidate: candidate.to_path_buf(),
        });
    }
    Ok(ComparisonReport::new(
        threshold,
        vec![compare(baseline, candidate, threshold)],
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SVG_A: &str = r#"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 10 10"><rect/><text>a</text><text>b</text></svg>"#;
    const SVG_B: &str = r#"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 10 10"><rect/><text>a</text></svg>"#;

    #[test]
    fn counts_elements_by_local_name() {
        let counts = count_svg_elements(SVG_A).unwrap();
        assert_eq!(counts.get("svg"), Some(&1));
        assert_eq!(counts.get("text"), Some(&2));
        assert_eq!(counts.get("rect"), Some(&1));
        assert!(count_svg_elements("plain text").is_none());
    }

    #[test]
    fn structural_similarity_averages_per_tag() {
        // svg 1.0, rect 1.0, text 0.5
        let score = svg_structural_similarity(SVG_A, SVG_B).unwrap();
        assert!((score - 2.5 / 3.0).abs() < 1e-9);
        assert_eq!(svg_structural_similarity(SVG_A, SVG_A), Some(1.0));
    }

    #[test]
    fn identical_files_score_one_and_different_files_stay_low() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.svg");
        let b = dir.path().join("b.svg");
        fs::write(&a, SVG_A).unwrap();
        fs::write(&b, SVG_B).unwrap();

        assert_eq!(calculate_similarity(&a, &a), 1.0);
        let score = calculate_similarity(&a, &b);
        assert!(score > 0.0 && score <= 0.6, "score {score}");
        assert_eq!(calculate_similarity(&a, &dir.path().join("none.svg")), 0.0);
    }

    #[test]
    fn same_size_rasters_compare_per_pixel() {
        let black = image::RgbaImage::from_pixel(4, 4, image::Rgba([0, 0, 0, 255]));
        let mut mostly = black.clone();
        mostly.put_pixel(0, 0, image::Rgba([255, 255, 255, 255]));

        let encode = |img: &image::RgbaImage| {
            let mut out = std::io::Cursor::new(Vec::new());
            img.write_to(&mut out, image::ImageFormat::Png).unwrap();
            out.into_inner()
        };
        let score = pixel_similarity(&encode(&black), &encode(&mostly)).unwrap();
        assert!(score > 0.9 && score < 1.0);
    }

    #[test]
    fn missing_candidate_serializes_as_missing() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.svg");
        fs::write(&a, SVG_A).unwrap();

        let record = compare(&a, &dir.path().join("gone.svg"), 0.95);
        assert_eq!(record.status, ComparisonStatus::Missing);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["current"], MISSING);
        assert_eq!(json["passed"], false);
    }

    #[test]
    fn report_summary_counts_missing_as_failed() {
        let report = ComparisonReport::new(
            0.9,
            vec![
                ComparisonRecord::scored("a".into(), "a".into(), 1.0, 0.9),
                ComparisonRecord::scored("b".into(), "b".into(), 0.5, 0.9),
                ComparisonRecord::missing(Some("c".into()), None),
            ],
        );
        assert_eq!(
            report.summary,
            ReportSummary {
                total: 3,
                passed: 1,
                failed: 2
            }
        );
        assert_eq!(report.missing(), 1);
        assert_eq!(report.exit_code(), 1);
        assert_eq!(ComparisonReport::new(0.9, Vec::new()).exit_code(), 0);
    }

    #[test]
    fn mismatched_path_kinds_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.svg");
        fs::write(&file, SVG_A).unwrap();
        let err = compare_paths(dir.path(), &file, 0.95, false).unwrap_err();
        assert!(matches!(err, CompareError::PathKindMismatch { .. }));
        let err = compare_paths(&dir.path().join("nope"), &file, 0.95, false).unwrap_err();
        assert!(matches!(err, CompareError::NotFound(_)));
    }
}
