//! `kiln.toml` configuration and the project layout derived from it.
//!
//! Every section is optional; a missing file yields the defaults, which match
//! a project whose sources live in `src/`, deliverables in `dist/`, scratch
//! output in `build/` and tests under `test/`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{ConfigError, Result};
use crate::manifest::ProjectManifest;

/// Default config file name, looked up in the project root.
pub const CONFIG_FILE_NAME: &str = "kiln.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct KilnConfig {
    pub artifact: ArtifactConfig,
    pub commands: CommandsConfig,
    pub tests: TestsConfig,
    pub upload: UploadConfig,
    pub watch: WatchConfig,
}

/// Where the artifact comes from and where it goes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ArtifactConfig {
    /// Base name of the deliverables. Falls back to the manifest name.
    pub name: Option<String>,
    pub src_dir: PathBuf,
    pub dist_dir: PathBuf,
    pub build_dir: PathBuf,
    /// Path segment that marks the root of the test tree; coverage report
    /// names are taken relative to it.
    pub test_root: String,
    /// Sub-directory of the report dir that holds per-test JSON files.
    pub coverage_subdir: String,
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            name: None,
            src_dir: PathBuf::from("src"),
            dist_dir: PathBuf::from("dist"),
            build_dir: PathBuf::from("build"),
            test_root: "test".to_string(),
            coverage_subdir: "phantom".to_string(),
        }
    }
}

/// Commands for the external collaborators. An empty command means the
/// collaborator is not configured and its task is skipped with a warning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CommandsConfig {
    /// Prints the runtime version, e.g. `v0.12.18`.
    pub runtime_version: Vec<String>,
    pub bundle: Vec<String>,
    pub lint: Vec<String>,
    pub markup: Vec<String>,
    pub instrument: Vec<String>,
    /// Test file path is appended as the last argument.
    pub test_node: Vec<String>,
    /// Test file path is appended as the last argument.
    pub test_browser: Vec<String>,
    /// Timeout for every non-test command, 0 disables it.
    pub timeout_secs: u64,
}

impl Default for CommandsConfig {
    fn default() -> Self {
        let argv = |parts: &[&str]| parts.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        Self {
            runtime_version: argv(&["node", "--version"]),
            bundle: argv(&["npx", "rollup", "-c"]),
            lint: argv(&["npx", "eslint", "."]),
            markup: Vec::new(),
            instrument: argv(&["npx", "nyc", "instrument", "dist", "build/instrumented/dist"]),
            test_node: argv(&["node"]),
            test_browser: Vec::new(),
            timeout_secs: 600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TestsConfig {
    /// Test files run by the node suite.
    pub node: Vec<String>,
    /// Test files run by the browser suite. Only this suite reports coverage.
    pub browser: Vec<String>,
    /// Per test file timeout, 0 disables it.
    pub timeout_secs: u64,
}

impl Default for TestsConfig {
    fn default() -> Self {
        Self {
            node: Vec::new(),
            browser: Vec::new(),
            timeout_secs: 30,
        }
    }
}

/// Coverage service settings. Secrets normally come from the environment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct UploadConfig {
    pub enabled: bool,
    pub endpoint: String,
    pub service_name: String,
    pub service_job_id: Option<String>,
    #[serde(skip_serializing)]
    pub repo_token: Option<String>,
    pub timeout_secs: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: "https://coveralls.io/api/v1/jobs".to_string(),
            service_name: "kiln".to_string(),
            service_job_id: None,
            repo_token: None,
            timeout_secs: 60,
        }
    }
}

impl UploadConfig {
    /// Apply `COVERALLS_*` environment overrides.
    pub fn apply_env(&mut self) {
        if let Ok(endpoint) = std::env::var("COVERALLS_ENDPOINT") {
            self.endpoint = endpoint;
        }
        if let Ok(name) = std::env::var("COVERALLS_SERVICE_NAME") {
            self.service_name = name;
        }
        if let Ok(job) = std::env::var("COVERALLS_SERVICE_JOB_ID") {
            self.service_job_id = Some(job);
        }
        if let Ok(token) = std::env::var("COVERALLS_REPO_TOKEN") {
            self.repo_token = Some(token);
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WatchConfig {
    pub paths: Vec<PathBuf>,
    /// File extensions that trigger a rerun.
    pub extensions: Vec<String>,
    pub debounce_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            paths: vec![
                PathBuf::from("src"),
                PathBuf::from("test"),
                PathBuf::from("reporter"),
            ],
            extensions: vec![
                "js".to_string(),
                "css".to_string(),
                "html".to_string(),
                "json".to_string(),
            ],
            debounce_ms: 300,
        }
    }
}

impl KilnConfig {
    /// Load the config at `path`, or defaults when the file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        debug!(path = %path.display(), "KilnConfig::load");
        let mut config = if path.exists() {
            let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
            Self::parse(&raw).map_err(|source| ConfigError::Toml {
                path: path.to_path_buf(),
                source,
            })?
        } else {
            debug!("Config file not found, using defaults");
            Self::default()
        };
        config.upload.apply_env();
        Ok(config)
    }

    pub fn parse(raw: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }
}

/// Resolved paths for one project. All paths are absolute under `root`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    pub root: PathBuf,
    pub artifact: PathBuf,
    pub stylesheet_src: PathBuf,
    pub stylesheet: PathBuf,
    pub instrumented: PathBuf,
    pub backup: PathBuf,
    pub report_dir: PathBuf,
    pub coverage_dir: PathBuf,
    pub lcov: PathBuf,
}

impl Layout {
    pub fn resolve(root: &Path, config: &ArtifactConfig, manifest: &ProjectManifest) -> Self {
        let name = config.name.as_deref().unwrap_or(&manifest.name);
        let dist = root.join(&config.dist_dir);
        let build = root.join(&config.build_dir);
        let report_dir = build.join("report");

        Self {
            root: root.to_path_buf(),
            artifact: dist.join(format!("{name}.js")),
            stylesheet_src: root.join(&config.src_dir).join(format!("{name}.css")),
            stylesheet: dist.join(format!("{name}.css")),
            instrumented: build
                .join("instrumented")
                .join(&config.dist_dir)
                .join(format!("{name}.js")),
            backup: build.join(format!("{name}.orig.js")),
            coverage_dir: report_dir.join(&config.coverage_subdir),
            lcov: report_dir.join("lcov.info"),
            report_dir,
        }
    }
}
