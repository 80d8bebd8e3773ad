//! Per-test-file coverage capture.
//!
//! The test suite calls a [`CoverageSink`] once per finished test file. The
//! collector writes that file's payload to its own JSON document and keeps no
//! other state, so calls may arrive in any order and re-running one test file
//! only replaces its own report.

use serde_json::Value;
use std::path::{Path, PathBuf};

use kiln_core::fs::write_atomic;
use kiln_core::obs;

use crate::error::{CoverageError, Result};

/// Receives the coverage payload of each completed test file.
pub trait CoverageSink: Send + Sync {
    /// Persist `coverage` for `test_file`; returns where it was written.
    fn on_file_complete(&self, test_file: &Path, coverage: &Value) -> Result<PathBuf>;
}

/// Writes `<report_dir>/<test name>.json` for each test file.
#[derive(Debug, Clone)]
pub struct CoverageCollector {
    report_dir: PathBuf,
    test_root: String,
}

impl CoverageCollector {
    pub fn new(report_dir: impl Into<PathBuf>, test_root: impl Into<String>) -> Self {
        Self {
            report_dir: report_dir.into(),
            test_root: test_root.into(),
        }
    }

    pub fn report_dir(&self) -> &Path {
        &self.report_dir
    }

    /// Report path for `test_file`.
    pub fn report_path(&self, test_file: &Path) -> Result<PathBuf> {
        let name = derive_test_name(test_file, &self.test_root)?;
        let mut path = self.report_dir.clone();
        let mut parts = name.split('/').peekable();
        while let Some(part) = parts.next() {
            if parts.peek().is_some() {
                path.push(part);
            } else {
                path.push(format!("{part}.json"));
            }
        }
        Ok(path)
    }
}

impl CoverageSink for CoverageCollector {
    fn on_file_complete(&self, test_file: &Path, coverage: &Value) -> Result<PathBuf> {
        let path = self.report_path(test_file)?;
        let body = serde_json::to_vec(coverage)?;
        write_atomic(&path, &body).map_err(CoverageError::io("write coverage report", &path))?;

        let name = derive_test_name(test_file, &self.test_root)?;
        obs::emit_coverage_recorded(&name, &path.display().to_string());
        Ok(path)
    }
}

/// Report name for a test file: the path below the last `<test_root>/`
/// segment, without its extension. Nested directories are kept.
///
/// `/repo/test/reporter-html/index.html` with root `test` gives
/// `reporter-html/index`.
pub fn derive_test_name(test_file: &Path, test_root: &str) -> Result<String> {
    let invalid = || CoverageError::InvalidTestName(test_file.to_path_buf());

    let normalized = test_file.to_string_lossy().replace('\\', "/");
    let marker = format!("/{test_root}/");
    let relative = if let Some(idx) = normalized.rfind(&marker) {
        &normalized[idx + marker.len()..]
    } else if let Some(rest) = normalized.strip_prefix(&marker[1..]) {
        rest
    } else {
        normalized.as_str()
    };

    let mut parts = Vec::new();
    for part in relative.split('/') {
        match part {
            "" | "." => continue,
            ".." => return Err(invalid()),
            p => parts.push(p),
        }
    }

    let last = parts.pop().ok_or_else(invalid)?;
    let stem = match last.rfind('.') {
        Some(0) | None => last,
        Some(dot) => &last[..dot],
    };
    if stem.is_empty() {
        return Err(invalid());
    }
    parts.push(stem);
    Ok(parts.join("/"))
}
