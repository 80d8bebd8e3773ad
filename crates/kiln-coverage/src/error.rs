//! Error types for kiln-coverage

use std::path::PathBuf;
use thiserror::Error;

/// Errors from swapping, collecting and aggregating coverage.
#[derive(Error, Debug)]
pub enum CoverageError {
    /// The deliverable to protect does not exist
    #[error("Production artifact not found: {0}")]
    MissingArtifact(PathBuf),

    /// The instrumentation step produced nothing
    #[error("Instrumented artifact not found: {0}")]
    MissingInstrumented(PathBuf),

    /// Filesystem operation failed
    #[error("Failed to {action} {path}: {source}")]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The restored artifact is not the artifact we backed up
    #[error("Restored artifact {path} does not match original (expected sha256 {expected}, got {actual})")]
    DigestMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    /// A test file path yields no usable report name
    #[error("Cannot derive a report name from test file {0}")]
    InvalidTestName(PathBuf),

    /// A per-test report is not a coverage document
    #[error("Invalid coverage report {path}: {source}")]
    InvalidReport {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Malformed LCOV input
    #[error("Invalid LCOV at line {line}: {reason}")]
    Lcov { line: usize, reason: String },

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CoverageError {
    pub(crate) fn io(action: &'static str, path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| CoverageError::Io {
            action,
            path,
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, CoverageError>;

/// Errors from the coverage service upload. Never fatal to a pipeline.
#[derive(Error, Debug)]
pub enum UploadError {
    /// Neither a repo token nor a CI job id is available
    #[error("Coverage upload is not configured: {0}")]
    NotConfigured(String),

    /// Transport-level failure
    #[error("HTTP error: {0}")]
    Http(String),

    /// The service answered with a non-success status
    #[error("Coverage service rejected upload ({status}): {body}")]
    Rejected { status: u16, body: String },

    /// The local report could not be read
    #[error(transparent)]
    Report(#[from] CoverageError),
}

impl From<reqwest::Error> for UploadError {
    fn from(err: reqwest::Error) -> Self {
        UploadError::Http(err.to_string())
    }
}
