//! Test engine seam.
//!
//! A [`TestEngine`] runs one test file. Engines that produce coverage leave a
//! JSON document at the `coverage_out` path they are handed; [`TestSuite`]
//! picks it up and forwards it to the injected [`CoverageSink`], if any.

use anyhow::Context;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

use kiln_coverage::CoverageSink;

use crate::runner::StageRunner;
use crate::stage::StageConfig;

/// Environment variable naming the file an engine writes coverage to.
pub const COVERAGE_FILE_ENV: &str = "KILN_COVERAGE_FILE";

#[derive(Debug, Clone)]
pub struct TestFileOutcome {
    pub test_file: PathBuf,
    pub passed: bool,
    /// Captured output, shown when the file fails.
    pub output: String,
    pub duration_ms: u64,
}

#[async_trait]
pub trait TestEngine: Send + Sync {
    async fn run_file(&self, test_file: &Path, coverage_out: &Path) -> anyhow::Result<TestFileOutcome>;
}

/// Runs `command <test_file>` in the project root.
#[derive(Debug, Clone)]
pub struct CommandTestEngine {
    name: String,
    command: Vec<String>,
    root: PathBuf,
    timeout_secs: u64,
}

impl CommandTestEngine {
    pub fn new(
        name: impl Into<String>,
        command: Vec<String>,
        root: impl Into<PathBuf>,
        timeout_secs: u64,
    ) -> Self {
        Self {
            name: name.into(),
            command,
            root: root.into(),
            timeout_secs,
        }
    }
}

#[async_trait]
impl TestEngine for CommandTestEngine {
    async fn run_file(&self, test_file: &Path, coverage_out: &Path) -> anyhow::Result<TestFileOutcome> {
        let stage = StageConfig::custom(self.name.clone(), self.command.clone(), self.timeout_secs)
            .with_arg(test_file.to_string_lossy())
            .in_dir(&self.root)
            .with_env(COVERAGE_FILE_ENV, coverage_out.to_string_lossy());

        let start = Instant::now();
        let outcome = match StageRunner::execute_stage(&stage).await {
            Ok(result) => TestFileOutcome {
                test_file: test_file.to_path_buf(),
                passed: result.passed(),
                output: result.diagnostics(),
                duration_ms: result.duration_ms,
            },
            // Timeouts fail the file, not the whole run.
            Err(e) => TestFileOutcome {
                test_file: test_file.to_path_buf(),
                passed: false,
                output: e.to_string(),
                duration_ms: start.elapsed().as_millis() as u64,
            },
        };
        Ok(outcome)
    }
}

/// Totals for one suite run.
#[derive(Debug, Clone, Default)]
pub struct SuiteOutcome {
    pub passed: usize,
    pub failed: Vec<TestFileOutcome>,
    /// Reports handed to the coverage sink.
    pub reports: Vec<PathBuf>,
}

impl SuiteOutcome {
    pub fn success(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn diagnostics(&self) -> String {
        self.failed
            .iter()
            .map(|f| format!("{}:\n{}", f.test_file.display(), f.output))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// An ordered list of test files run by one engine.
pub struct TestSuite<'a> {
    name: &'a str,
    engine: &'a dyn TestEngine,
    files: &'a [PathBuf],
}

impl<'a> TestSuite<'a> {
    pub fn new(name: &'a str, engine: &'a dyn TestEngine, files: &'a [PathBuf]) -> Self {
        Self { name, engine, files }
    }

    /// Run every file in order. Every file runs even after a failure so the
    /// coverage of passing files is still recorded.
    ///
    /// `Err` means coverage could not be recorded; test failures are reported
    /// through [`SuiteOutcome::failed`].
    pub async fn run(&self, sink: Option<&dyn CoverageSink>) -> anyhow::Result<SuiteOutcome> {
        let scratch = tempfile::tempdir().context("create coverage scratch directory")?;
        let mut outcome = SuiteOutcome::default();

        for (index, file) in self.files.iter().enumerate() {
            let coverage_out = scratch.path().join(format!("{index}.json"));
            debug!(suite = %self.name, test_file = %file.display(), "Running test file");

            let result = self.engine.run_file(file, &coverage_out).await?;

            if let Some(sink) = sink {
                if coverage_out.exists() {
                    let raw = tokio::fs::read(&coverage_out)
                        .await
                        .with_context(|| format!("read coverage for {}", file.display()))?;
                    let payload: serde_json::Value = serde_json::from_slice(&raw)
                        .with_context(|| format!("coverage for {} is not JSON", file.display()))?;
                    let report = sink
                        .on_file_complete(file, &payload)
                        .with_context(|| format!("record coverage for {}", file.display()))?;
                    outcome.reports.push(report);
                } else {
                    warn!(suite = %self.name, test_file = %file.display(), "Test file produced no coverage");
                }
            }

            if result.passed {
                outcome.passed += 1;
            } else {
                warn!(suite = %self.name, test_file = %file.display(), "Test file failed");
                outcome.failed.push(result);
            }
        }

        info!(
            suite = %self.name,
            passed = outcome.passed,
            failed = outcome.failed.len(),
            "Test suite finished"
        );
        Ok(outcome)
    }
}
