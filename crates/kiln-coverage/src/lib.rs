//! kiln coverage - the coverage measurement pipeline
//!
//! - [`swap`]: put the instrumented artifact in place of the deliverable and
//!   guarantee the original comes back byte-for-byte
//! - [`collector`]: persist one JSON report per executed test file
//! - [`aggregate`] / [`lcov`]: fold every per-test report into one LCOV file
//! - [`upload`]: ship the LCOV report to the coverage service

pub mod aggregate;
pub mod collector;
pub mod error;
pub mod lcov;
pub mod model;
pub mod swap;
pub mod upload;

pub use aggregate::{aggregate, collect_report_files, write_lcov, Aggregator};
pub use collector::{derive_test_name, CoverageCollector, CoverageSink};
pub use error::{CoverageError, Result, UploadError};
pub use lcov::{CoverageSummary, LcovRecord};
pub use model::{CoverageMap, FileCoverage};
pub use swap::{ArtifactSwap, SwapGuard, SwapPaths, SwapState};
pub use upload::{CoverageUploader, CoverallsClient, UploadReceipt};
