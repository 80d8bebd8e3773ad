//! kiln core - shared building blocks for the kiln pipeline
//!
//! - `config`: `kiln.toml` loading and the derived project [`Layout`]
//! - `manifest`: the project manifest (`package.json`) that supplies the version
//! - `template`: `@VERSION` / `@DATE` substitution for generated deliverables
//! - `version_gate`: once-per-process legacy runtime detection
//! - `telemetry` / `obs`: tracing setup and structured lifecycle events

pub mod config;
pub mod error;
pub mod fs;
pub mod manifest;
pub mod obs;
pub mod telemetry;
pub mod template;
pub mod version_gate;

pub use config::{
    ArtifactConfig, CommandsConfig, KilnConfig, Layout, TestsConfig, UploadConfig,
    WatchConfig, CONFIG_FILE_NAME,
};
pub use error::{ConfigError, Result};
pub use manifest::ProjectManifest;
pub use telemetry::init_tracing;
pub use template::{apply, copy_templated, format_date, TemplateContext};
pub use version_gate::{GateDecision, RuntimeGate, RuntimeVersion};
