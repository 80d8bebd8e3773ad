//! Project manifest (`package.json`).

use regex::Regex;
use serde::Deserialize;
use std::path::Path;
use std::sync::OnceLock;

use crate::error::{ConfigError, Result};

pub const MANIFEST_FILE_NAME: &str = "package.json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectManifest {
    pub name: String,
    /// Semantic version embedded into deliverables as `@VERSION`.
    pub version: String,
}

#[derive(Deserialize)]
struct RawManifest {
    name: Option<String>,
    version: Option<String>,
}

fn semver_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^\d+\.\d+\.\d+(?:-[0-9A-Za-z.-]+)?(?:\+[0-9A-Za-z.-]+)?$")
            .expect("semver pattern is valid")
    })
}

impl ProjectManifest {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let parsed: RawManifest =
            serde_json::from_str(&raw).map_err(|source| ConfigError::Manifest {
                path: path.to_path_buf(),
                source,
            })?;
        Self::from_parts(parsed.name, parsed.version)
    }

    fn from_parts(name: Option<String>, version: Option<String>) -> Result<Self> {
        let version = version.ok_or(ConfigError::MissingValue("version"))?;
        if !semver_pattern().is_match(&version) {
            return Err(ConfigError::InvalidValue {
                field: "version",
                value: version,
            });
        }

        // Scoped packages (`@org/lib`) name their files after the last segment.
        let name = name
            .as_deref()
            .and_then(|n| n.rsplit('/').next())
            .filter(|n| !n.is_empty())
            .unwrap_or("bundle")
            .to_string();

        Ok(Self { name, version })
    }
}
