//! kiln CI - named task pipelines for building, testing and measuring
//! coverage of a bundled artifact
//!
//! - Declares the `build`, `test`, `coverage` and `default` pipelines
//! - Runs external collaborators (bundler, linter, instrumenter, test engines)
//!   as stages with fail-fast semantics
//! - Wraps the coverage test stage in a guaranteed artifact restore

pub mod context;
pub mod engine;
pub mod pipeline;
pub mod registry;
pub mod runner;
pub mod stage;

// Re-export key types
pub use context::PipelineContext;
pub use engine::{CommandTestEngine, SuiteOutcome, TestEngine, TestFileOutcome, TestSuite};
pub use pipeline::{CiPipeline, PipelineResult, TaskOutcome, TaskReport};
pub use registry::{Plan, PlanNode, PipelineRegistry, RegistryError, Step};
pub use runner::{StageResult, StageRunner};
pub use stage::{StageConfig, Task};
