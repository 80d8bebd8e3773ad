//! Runtime version gate.
//!
//! Some collaborators (the linter in particular) no longer run on `0.x`
//! runtimes. The runtime is probed once per process; pipelines are then built
//! with a [`GateDecision`] per gated task instead of rewriting task names.

use regex::Regex;
use std::process::Command;
use std::sync::OnceLock;
use tracing::{debug, warn};

/// Environment override for the detected runtime version.
pub const RUNTIME_VERSION_ENV: &str = "KILN_RUNTIME_VERSION";

/// Version string reported by the external runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeVersion(pub String);

fn legacy_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^v?0\.\d+").expect("legacy pattern is valid"))
}

impl RuntimeVersion {
    /// Probe the runtime: `KILN_RUNTIME_VERSION` if set, otherwise the first
    /// line printed by `command`. Returns `None` when nothing can be detected.
    pub fn detect(command: &[String]) -> Option<Self> {
        if let Ok(version) = std::env::var(RUNTIME_VERSION_ENV) {
            debug!(version = %version, "Runtime version from environment");
            return Some(Self(version.trim().to_string()));
        }

        let (exe, args) = command.split_first()?;
        match Command::new(exe).args(args).output() {
            Ok(output) if output.status.success() => {
                let stdout = String::from_utf8_lossy(&output.stdout);
                let version = stdout.lines().next().unwrap_or_default().trim().to_string();
                if version.is_empty() {
                    None
                } else {
                    debug!(version = %version, "Detected runtime version");
                    Some(Self(version))
                }
            }
            Ok(output) => {
                warn!(command = %exe, status = %output.status, "Runtime version probe failed");
                None
            }
            Err(e) => {
                warn!(command = %exe, error = %e, "Runtime version probe could not start");
                None
            }
        }
    }

    /// `0.x` runtimes are legacy.
    pub fn is_legacy(&self) -> bool {
        legacy_pattern().is_match(&self.0)
    }
}

impl std::fmt::Display for RuntimeVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What the pipeline does with a gated task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GateDecision<T> {
    Run(T),
    /// Log that the task was skipped; never run its effect.
    SkipWithLog(T),
}

impl<T> GateDecision<T> {
    pub fn task(&self) -> &T {
        match self {
            GateDecision::Run(t) | GateDecision::SkipWithLog(t) => t,
        }
    }

    pub fn is_skip(&self) -> bool {
        matches!(self, GateDecision::SkipWithLog(_))
    }
}

/// Decision maker fixed at configuration time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeGate {
    runtime: Option<RuntimeVersion>,
    legacy: bool,
}

impl RuntimeGate {
    pub fn new(runtime: Option<RuntimeVersion>) -> Self {
        let legacy = runtime.as_ref().map(RuntimeVersion::is_legacy).unwrap_or(false);
        if runtime.is_none() {
            warn!("Runtime version unknown, treating runtime as current");
        }
        Self { runtime, legacy }
    }

    /// Probe the runtime once and freeze the decision.
    pub fn detect(command: &[String]) -> Self {
        Self::new(RuntimeVersion::detect(command))
    }

    pub fn is_legacy(&self) -> bool {
        self.legacy
    }

    pub fn runtime_label(&self) -> String {
        self.runtime
            .as_ref()
            .map(|r| r.0.clone())
            .unwrap_or_else(|| "unknown".to_string())
    }

    pub fn gate<T>(&self, task: T) -> GateDecision<T> {
        if self.legacy {
            GateDecision::SkipWithLog(task)
        } else {
            GateDecision::Run(task)
        }
    }
}
