//! Everything a pipeline run needs to know about the project.

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tracing::info;

use kiln_core::manifest::MANIFEST_FILE_NAME;
use kiln_core::{KilnConfig, Layout, ProjectManifest, RuntimeGate, TemplateContext, CONFIG_FILE_NAME};
use kiln_coverage::SwapPaths;

#[derive(Debug, Clone)]
pub struct PipelineContext {
    pub config: KilnConfig,
    pub manifest: ProjectManifest,
    pub layout: Layout,
    pub template: TemplateContext,
    pub gate: RuntimeGate,
}

impl PipelineContext {
    pub fn new(
        root: &Path,
        config: KilnConfig,
        manifest: ProjectManifest,
        gate: RuntimeGate,
        now: DateTime<Utc>,
    ) -> Self {
        let layout = Layout::resolve(root, &config.artifact, &manifest);
        let template = TemplateContext::new(manifest.version.clone(), now);
        Self {
            config,
            manifest,
            layout,
            template,
            gate,
        }
    }

    /// Read `package.json` and `kiln.toml` under `root`, then probe the
    /// runtime once. `config_path` overrides the config location.
    pub fn load(root: &Path, config_path: Option<&Path>) -> kiln_core::Result<Self> {
        let manifest = ProjectManifest::load(&root.join(MANIFEST_FILE_NAME))?;
        let config_path = config_path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| root.join(CONFIG_FILE_NAME));
        let config = KilnConfig::load(&config_path)?;
        let gate = RuntimeGate::detect(&config.commands.runtime_version);

        info!(
            project = %manifest.name,
            version = %manifest.version,
            runtime = %gate.runtime_label(),
            legacy = gate.is_legacy(),
            "Loaded project"
        );
        Ok(Self::new(root, config, manifest, gate, Utc::now()))
    }

    pub fn root(&self) -> &Path {
        &self.layout.root
    }

    /// Configured test files, resolved against the project root.
    pub fn test_files(&self, files: &[String]) -> Vec<PathBuf> {
        files.iter().map(|f| self.layout.root.join(f)).collect()
    }

    pub fn swap_paths(&self) -> SwapPaths {
        SwapPaths::from(&self.layout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use kiln_core::RuntimeVersion;

    #[test]
    fn test_load_reads_manifest_and_config() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("package.json"),
            r#"{ "name": "qunit", "version": "3.2.1" }"#,
        )
        .unwrap();
        std::fs::write(
            dir.path().join("kiln.toml"),
            "[commands]\nruntime_version = [\"echo\", \"v20.1.0\"]\n\n[tests]\nnode = [\"test/index.js\"]\n",
        )
        .unwrap();

        let ctx = PipelineContext::load(dir.path(), None).unwrap();
        assert_eq!(ctx.manifest.version, "3.2.1");
        assert_eq!(ctx.template.version, "3.2.1");
        assert!(ctx.layout.artifact.ends_with("dist/qunit.js"));
        assert_eq!(
            ctx.test_files(&ctx.config.tests.node),
            vec![dir.path().join("test/index.js")]
        );
    }

    #[test]
    fn test_load_requires_manifest() {
        let dir = tempfile::tempdir().unwrap();
        assert!(PipelineContext::load(dir.path(), None).is_err());
    }

    #[test]
    fn test_swap_paths_follow_layout() {
        let manifest = ProjectManifest {
            name: "lib".to_string(),
            version: "1.0.0".to_string(),
        };
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let gate = RuntimeGate::new(Some(RuntimeVersion("v20.0.0".to_string())));
        let ctx = PipelineContext::new(Path::new("/repo"), KilnConfig::default(), manifest, gate, now);

        let paths = ctx.swap_paths();
        assert_eq!(paths.artifact, PathBuf::from("/repo/dist/lib.js"));
        assert_eq!(paths.backup, PathBuf::from("/repo/build/lib.orig.js"));
        assert_eq!(ctx.root(), Path::new("/repo"));
    }
}
