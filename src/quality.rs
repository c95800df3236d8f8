//! Heuristic quality scoring for captured artifacts.

use std::fs;
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::capture::CaptureResult;
use crate::compare::count_svg_elements;
use crate::driver::ArtifactFormat;

/// Scores in `[0, 1]` for one capture.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct QualityMetrics {
    pub file_size_score: f64,
    pub content_complexity_score: f64,
    pub structure_score: f64,
    pub completeness_score: f64,
    pub overall_score: f64,
}

/// Score the primary artifact of a capture. Captures without artifacts score zero.
pub fn assess(result: &CaptureResult) -> QualityMetrics {
    let Some(path) = result.primary_path() else {
        return QualityMetrics::default();
    };
    let format = result
        .artifacts
        .first()
        .map(|a| a.format)
        .unwrap_or(ArtifactFormat::Vector);

    let file_size_score = file_size_score(result.size_bytes);
    let content_complexity_score = content_complexity(path);
    let structure_score = structure_score(path, format);
    let completeness_score = completeness(path);

    QualityMetrics {
        file_size_score,
        content_complexity_score,
        structure_score,
        completeness_score,
        overall_score: 0.2 * file_size_score
            + 0.3 * content_complexity_score
            + 0.3 * structure_score
            + 0.2 * completeness_score,
    }
}

/// 0 below 2 KB, 1 between 10 KB and 500 KB, linear in between and
/// falling to 0 at 2 MB.
pub fn file_size_score(size: u64) -> f64 {
    const MIN_EXPECTED: f64 = 2_000.0;
    const OPTIMAL_MIN: f64 = 10_000.0;
    const OPTIMAL_MAX: f64 = 500_000.0;
    const MAX_EXPECTED: f64 = 2_000_000.0;

    let size = size as f64;
    if size < MIN_EXPECTED {
        0.0
    } else if size < OPTIMAL_MIN {
        (size - MIN_EXPECTED) / (OPTIMAL_MIN - MIN_EXPECTED)
    } else if size <= OPTIMAL_MAX {
        1.0
    } else {
        (1.0 - (size - OPTIMAL_MAX) / (MAX_EXPECTED - OPTIMAL_MAX)).max(0.0)
    }
}

fn is_svg(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .and_then(ArtifactFormat::from_extension)
        == Some(ArtifactFormat::Vector)
}

fn text_regex() -> Option<&'static Regex> {
    static TEXT: OnceLock<Option<Regex>> = OnceLock::new();
    TEXT.get_or_init(|| Regex::new(r"(?s)<text\b[^>]*>(.*?)</text>").ok())
        .as_ref()
}

fn root_tag(svg: &str) -> Option<&str> {
    let start = svg.find("<svg")?;
    let end = svg[start..].find('>')?;
    Some(&svg[start..start + end])
}

pub fn content_complexity(path: &Path) -> f64 {
    if !is_svg(path) {
        return fs::metadata(path)
            .map(|m| (m.len() as f64 / 50_000.0).min(1.0))
            .unwrap_or(0.5);
    }
    fs::read_to_string(path)
        .ok()
        .and_then(|svg| svg_complexity(&svg))
        .unwrap_or(0.5)
}

/// Element count, tag diversity and text volume, normalised against
/// 100 elements, 10 tag kinds and 500 characters.
pub fn svg_complexity(svg: &str) -> Option<f64> {
    let counts = count_svg_elements(svg)?;
    let elements: usize = counts.values().sum();
    let text_len: usize = text_regex()?
        .captures_iter(svg)
        .map(|c| c[1].chars().count())
        .sum();

    Some(
        (elements as f64 / 100.0).min(1.0) * 0.5
            + (counts.len() as f64 / 10.0).min(1.0) * 0.3
            + (text_len as f64 / 500.0).min(1.0) * 0.2,
    )
}

pub fn structure_score(path: &Path, format: ArtifactFormat) -> f64 {
    match format {
        ArtifactFormat::Raster => match fs::metadata(path) {
            Ok(m) if m.len() > 0 => 1.0,
            _ => 0.0,
        },
        ArtifactFormat::Vector => fs::read_to_string(path)
            .map(|svg| svg_structure(&svg))
            .unwrap_or(0.0),
    }
}

/// Fraction of passed checks: svg root, viewBox, content, namespace.
pub fn svg_structure(svg: &str) -> f64 {
    let (Some(counts), Some(root)) = (count_svg_elements(svg), root_tag(svg)) else {
        return 0.0;
    };
    let checks = [
        true,
        root.contains("viewBox"),
        counts.values().sum::<usize>() > 1,
        root.contains("xmlns") || root.contains("http://www.w3.org/2000/svg"),
    ];
    checks.iter().filter(|c| **c).count() as f64 / checks.len() as f64
}

pub fn completeness(path: &Path) -> f64 {
    let Ok(meta) = fs::metadata(path) else {
        return 0.5;
    };
    let size = meta.len();
    if is_svg(path) {
        return fs::read_to_string(path)
            .ok()
            .and_then(|svg| svg_completeness(&svg, size))
            .unwrap_or(0.5);
    }
    match size {
        0..=999 => 0.3,
        1_000..=10_000 => size as f64 / 10_000.0,
        _ => 1.0,
    }
}

fn svg_completeness(svg: &str, size: u64) -> Option<f64> {
    let counts = count_svg_elements(svg)?;
    let has = |tag: &str| counts.get(tag).is_some_and(|n| *n > 0);
    let indicators = [
        has("text"),
        has("rect") || has("circle") || has("path"),
        size > 2_000,
        svg.contains("style=") || has("style"),
    ];
    let score = indicators.iter().filter(|i| **i).count() as f64 / indicators.len() as f64;
    Some(score * 0.7 + (size as f64 / 20_000.0).min(1.0) * 0.3)
}
