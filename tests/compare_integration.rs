//! Integration tests for artifact comparison

use std::fs;
use std::path::Path;

use pretty_assertions::assert_eq;

use tui_snapshots::compare::{
    ComparisonStatus, ReportSummary, compare, compare_batch, compare_paths,
};

const BASE_SVG: &str = r#"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 64 32"><rect width="64" height="32"/><text x="0" y="16">Main menu</text></svg>"#;
const CHANGED_SVG: &str = r#"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 64 32"><rect width="64" height="32"/><rect width="8" height="8"/><text x="0" y="16">Settings</text><text x="0" y="24">Back</text></svg>"#;

fn write(root: &Path, relative: &str, contents: &str) {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
    fs::write(path, contents).expect("write");
}

#[test]
fn test_artifact_compared_with_itself_passes() {
    let dir = tempfile::tempdir().expect("tempdir");
    write(dir.path(), "shot.svg", BASE_SVG);
    let path = dir.path().join("shot.svg");

    for threshold in [0.0, 0.5, 0.95, 1.0] {
        let record = compare(&path, &path, threshold);
        assert_eq!(record.similarity, 1.0);
        assert_eq!(record.status, ComparisonStatus::Passed);
    }
}

#[test]
fn test_missing_candidate_is_recorded_not_raised() {
    let baseline = tempfile::tempdir().expect("tempdir");
    let candidate = tempfile::tempdir().expect("tempdir");
    write(baseline.path(), "main.svg", BASE_SVG);
    write(baseline.path(), "help.svg", BASE_SVG);
    write(candidate.path(), "main.svg", BASE_SVG);
    write(candidate.path(), "extra.svg", BASE_SVG);

    let report = compare_batch(baseline.path(), candidate.path(), 0.95, false).expect("report");

    assert_eq!(report.summary, ReportSummary { total: 3, passed: 1, failed: 2 });
    let names: Vec<String> = report.results.iter().map(|r| r.name()).collect();
    assert_eq!(names, vec!["extra.svg", "help.svg", "main.svg"]);
    assert_eq!(report.results[0].status, ComparisonStatus::Missing);
    assert!(report.results[0].baseline.is_none());
    assert_eq!(report.results[1].status, ComparisonStatus::Missing);
    assert!(report.results[1].candidate.is_none());
    assert_eq!(report.missing(), 2);
    assert_eq!(report.exit_code(), 1);
}

#[test]
fn test_recursive_batch_counts_pass_and_fail() {
    let baseline = tempfile::tempdir().expect("tempdir");
    let candidate = tempfile::tempdir().expect("tempdir");
    for (relative, current) in [
        ("apps/demo/main/main.svg", BASE_SVG),
        ("apps/demo/help/help.svg", BASE_SVG),
        ("apps/demo/settings/settings.svg", CHANGED_SVG),
    ] {
        write(baseline.path(), relative, BASE_SVG);
        write(candidate.path(), relative, current);
    }
    write(baseline.path(), "apps/demo/notes.txt", "ignored");

    let report = compare_batch(baseline.path(), candidate.path(), 0.95, true).expect("report");
    assert_eq!(report.summary, ReportSummary { total: 3, passed: 2, failed: 1 });
    let failed: Vec<String> = report.failures().map(|r| r.name()).collect();
    assert_eq!(failed, vec!["settings.svg"]);

    let shallow = compare_batch(baseline.path(), candidate.path(), 0.95, false).expect("report");
    assert_eq!(shallow.summary.total, 0);
    assert_eq!(shallow.exit_code(), 0);
}

#[test]
fn test_extensions_match_case_insensitively() {
    let baseline = tempfile::tempdir().expect("tempdir");
    let candidate = tempfile::tempdir().expect("tempdir");
    write(baseline.path(), "UPPER.SVG", BASE_SVG);
    write(candidate.path(), "UPPER.SVG", BASE_SVG);

    let report = compare_batch(baseline.path(), candidate.path(), 0.95, false).expect("report");
    assert_eq!(report.summary.passed, 1);
}

#[test]
fn test_report_json_shape() {
    let baseline = tempfile::tempdir().expect("tempdir");
    let candidate = tempfile::tempdir().expect("tempdir");
    write(baseline.path(), "a.svg", BASE_SVG);
    write(baseline.path(), "b.svg", BASE_SVG);
    write(candidate.path(), "a.svg", BASE_SVG);

    let report = compare_paths(baseline.path(), candidate.path(), 0.9, false).expect("report");
    let out = baseline.path().join("reports/nested/report.json");
    report.write_json(&out).expect("write report");

    let json: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&out).expect("read")).expect("json");
    assert_eq!(json["threshold"], 0.9);
    assert_eq!(json["summary"]["total"], 2);
    assert_eq!(json["summary"]["passed"], 1);
    assert_eq!(json["summary"]["failed"], 1);
    assert_eq!(json["results"][0]["passed"], true);
    assert_eq!(json["results"][0]["similarity"], 1.0);
    assert_eq!(json["results"][1]["current"], "MISSING");
    assert_eq!(json["results"][1]["passed"], false);
}

#[test]
fn test_single_file_pair_report() {
    let dir = tempfile::tempdir().expect("tempdir");
    write(dir.path(), "a.svg", BASE_SVG);
    write(dir.path(), "b.svg", CHANGED_SVG);

    let report = compare_paths(&dir.path().join("a.svg"), &dir.path().join("b.svg"), 0.95, false)
        .expect("report");
    assert_eq!(report.summary.total, 1);
    let record = &report.results[0];
    assert_eq!(record.status, ComparisonStatus::Failed);
    assert!(record.similarity > 0.0 && record.similarity < 0.95);
}
