//! Fold every per-test report under the report directory into one LCOV file.
//!
//! The aggregate is rebuilt from scratch on every run; nothing is merged
//! incrementally into a previous `lcov.info`.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use kiln_core::fs::write_atomic;
use kiln_core::{obs, Layout};

use crate::error::{CoverageError, Result};
use crate::lcov::{self, CoverageSummary};
use crate::model::CoverageMap;

/// All `*.json` files below `dir`, sorted for a deterministic merge order.
pub fn collect_report_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    if dir.is_dir() {
        walk(dir, &mut files)?;
    }
    files.sort();
    Ok(files)
}

fn walk(dir: &Path, files: &mut Vec<PathBuf>) -> Result<()> {
    for entry in fs::read_dir(dir).map_err(CoverageError::io("read directory", dir))? {
        let entry = entry.map_err(CoverageError::io("read directory", dir))?;
        let path = entry.path();
        if path.is_dir() {
            walk(&path, files)?;
        } else if path.extension().map(|e| e == "json").unwrap_or(false) {
            files.push(path);
        }
    }
    Ok(())
}

/// Merge every report below `report_dir`.
pub fn aggregate(report_dir: &Path) -> Result<CoverageMap> {
    let files = collect_report_files(report_dir)?;
    if files.is_empty() {
        warn!(dir = %report_dir.display(), "No coverage reports found");
    }

    let mut merged = CoverageMap::new();
    for path in files {
        let raw = fs::read(&path).map_err(CoverageError::io("read", &path))?;
        let value: serde_json::Value =
            serde_json::from_slice(&raw).map_err(|source| CoverageError::InvalidReport {
                path: path.clone(),
                source,
            })?;
        let report = CoverageMap::from_value(value).map_err(|source| {
            CoverageError::InvalidReport {
                path: path.clone(),
                source,
            }
        })?;
        debug!(report = %path.display(), files = report.len(), "Merging coverage report");
        merged.merge(report);
    }
    Ok(merged)
}

/// Write `map` as LCOV to `path` and return its totals.
pub fn write_lcov(map: &CoverageMap, path: &Path) -> Result<CoverageSummary> {
    let records = lcov::records_from_map(map);
    write_atomic(path, lcov::render(&records).as_bytes())
        .map_err(CoverageError::io("write", path))?;
    Ok(CoverageSummary::from_records(&records))
}

/// The make-report step: aggregate a report directory into an LCOV file.
#[derive(Debug, Clone)]
pub struct Aggregator {
    report_dir: PathBuf,
    lcov_path: PathBuf,
}

impl Aggregator {
    pub fn new(report_dir: impl Into<PathBuf>, lcov_path: impl Into<PathBuf>) -> Self {
        Self {
            report_dir: report_dir.into(),
            lcov_path: lcov_path.into(),
        }
    }

    pub fn from_layout(layout: &Layout) -> Self {
        Self::new(&layout.report_dir, &layout.lcov)
    }

    pub fn lcov_path(&self) -> &Path {
        &self.lcov_path
    }

    pub fn run(&self) -> Result<CoverageSummary> {
        let map = aggregate(&self.report_dir)?;
        let summary = write_lcov(&map, &self.lcov_path)?;
        obs::emit_report_written(
            &self.lcov_path.display().to_string(),
            summary.files,
            summary.lines_hit,
            summary.lines_found,
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn write_json(path: &Path, value: serde_json::Value) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, serde_json::to_vec(&value).unwrap()).unwrap();
    }

    #[test]
    fn test_collect_is_recursive_and_sorted() {
        let dir = tempfile::tempdir().unwrap();
        write_json(&dir.path().join("phantom/b.json"), json!({}));
        write_json(&dir.path().join("phantom/nested/a.json"), json!({}));
        write_json(&dir.path().join("a.json"), json!({}));
        fs::write(dir.path().join("lcov.info"), "TN:\n").unwrap();

        let files = collect_report_files(dir.path()).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.strip_prefix(dir.path()).unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.json", "phantom/b.json", "phantom/nested/a.json"]);
    }

    #[test]
    fn test_missing_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let map = aggregate(&dir.path().join("absent")).unwrap();
        assert!(map.is_empty());
    }

    #[test]
    fn test_invalid_report_names_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("broken.json"), "{").unwrap();
        match aggregate(dir.path()) {
            Err(CoverageError::InvalidReport { path, .. }) => {
                assert!(path.ends_with("broken.json"))
            }
            other => panic!("expected InvalidReport, got {other:?}"),
        }
    }

    #[test]
    fn test_aggregate_sums_across_reports() {
        let dir = tempfile::tempdir().unwrap();
        let range = json!({ "start": { "line": 1 }, "end": { "line": 1 } });
        let range_b = json!({ "start": { "line": 2 }, "end": { "line": 2 } });
        write_json(
            &dir.path().join("r1.json"),
            json!({ "a.js": { "statementMap": { "A": range }, "s": { "A": 2 } } }),
        );
        write_json(
            &dir.path().join("r2.json"),
            json!({ "a.js": { "statementMap": { "A": range, "B": range_b }, "s": { "A": 3, "B": 1 } } }),
        );

        let map = aggregate(dir.path()).unwrap();
        assert_eq!(map.0["a.js"].s["A"], 5);
        assert_eq!(map.0["a.js"].s["B"], 1);
    }
}
