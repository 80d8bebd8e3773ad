//! Task and stage definitions.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use kiln_core::CommandsConfig;

/// Every task a pipeline can name.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum Task {
    /// Bundle sources into the artifact (external bundler).
    Bundle,

    /// Template `@VERSION`/`@DATE` into the bundled artifact in place.
    CopyJs,

    /// Template the stylesheet into the output directory.
    CopyCss,

    /// Static analysis. Gated on the runtime version.
    Lint,

    /// Markup validation.
    Markup,

    /// Node test suite.
    TestNode,

    /// Browser test suite; the only suite that reports coverage.
    TestBrowser,

    /// Produce the instrumented copy of the artifact.
    Instrument,

    /// Aggregate per-test reports into `lcov.info`.
    MakeReport,

    /// Send `lcov.info` to the coverage service.
    Upload,
}

impl Task {
    /// Get the task name as a string.
    pub fn name(&self) -> &'static str {
        match self {
            Task::Bundle => "bundle",
            Task::CopyJs => "copy-js",
            Task::CopyCss => "copy-css",
            Task::Lint => "lint",
            Task::Markup => "markup",
            Task::TestNode => "test-node",
            Task::TestBrowser => "test-browser",
            Task::Instrument => "instrument",
            Task::MakeReport => "make-report",
            Task::Upload => "upload",
        }
    }

    /// The configured command for tasks backed by a single external command.
    /// `None` for tasks kiln performs itself or that run per test file.
    pub fn command<'a>(&self, commands: &'a CommandsConfig) -> Option<&'a [String]> {
        match self {
            Task::Bundle => Some(&commands.bundle),
            Task::Lint => Some(&commands.lint),
            Task::Markup => Some(&commands.markup),
            Task::Instrument => Some(&commands.instrument),
            _ => None,
        }
    }
}

impl std::fmt::Display for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Configuration for one external command invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageConfig {
    /// Human-readable stage name.
    pub name: String,

    /// Command to execute (first element is executable).
    pub command: Vec<String>,

    /// Timeout in seconds, 0 disables it.
    pub timeout_secs: u64,

    /// Working directory; inherits the current one when unset.
    pub cwd: Option<PathBuf>,

    /// Extra environment variables.
    pub env: Vec<(String, String)>,
}

impl StageConfig {
    /// Stage for a task's configured command, `None` when the command is empty.
    pub fn for_task(task: Task, commands: &CommandsConfig) -> Option<Self> {
        let command = task.command(commands)?;
        if command.is_empty() {
            return None;
        }
        Some(Self::custom(
            task.name().to_string(),
            command.to_vec(),
            commands.timeout_secs,
        ))
    }

    /// Create a custom stage configuration.
    pub fn custom(name: String, command: Vec<String>, timeout_secs: u64) -> Self {
        Self {
            name,
            command,
            timeout_secs,
            cwd: None,
            env: Vec::new(),
        }
    }

    pub fn in_dir(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Append an argument to the command.
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.command.push(arg.into());
        self
    }
}
