//! Pipeline runs against a scratch project with shell commands standing in
//! for the bundler, instrumenter and test engines.

use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use kiln_ci::{CiPipeline, PipelineContext, PipelineRegistry, TaskOutcome};
use kiln_ci::stage::Task;
use kiln_core::{KilnConfig, ProjectManifest, RuntimeGate, RuntimeVersion};
use kiln_coverage::{CoverageUploader, UploadError, UploadReceipt};
use std::fs;
use std::path::Path;
use std::sync::Arc;

const BUNDLE: &str =
    "mkdir -p dist && printf '/*! lib v@VERSION | @DATE */\\nvar lib = {};\\n' > dist/lib.js";
const INSTRUMENT: &str = "mkdir -p build/instrumented/dist && \
    { echo 'var __cov = {};'; cat dist/lib.js; } > build/instrumented/dist/lib.js";
const BROWSER: &str = "grep -q __cov dist/lib.js || exit 3; \
    printf '{\"dist/lib.js\":{\"path\":\"dist/lib.js\",\"statementMap\":{\"1\":{\"start\":{\"line\":1},\"end\":{\"line\":1}},\"2\":{\"start\":{\"line\":2},\"end\":{\"line\":2}}},\"s\":{\"1\":1,\"2\":0}}}' \
    > \"$KILN_COVERAGE_FILE\"; \
    case \"$1\" in *fail*) echo 'not ok 1 - assertion' ; exit 1;; esac";

fn sh(script: &str, name: &str) -> Vec<String> {
    vec![
        "sh".to_string(),
        "-c".to_string(),
        script.to_string(),
        name.to_string(),
    ]
}

struct Project {
    dir: tempfile::TempDir,
    config: KilnConfig,
}

impl Project {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        fs::create_dir_all(dir.path().join("test")).unwrap();
        fs::write(dir.path().join("src/lib.css"), "/*! lib @VERSION */\n.lib {}\n").unwrap();

        let mut config = KilnConfig::default();
        config.commands.bundle = sh(BUNDLE, "bundle");
        config.commands.lint = sh("echo ran > lint.log", "lint");
        config.commands.markup = Vec::new();
        config.commands.instrument = sh(INSTRUMENT, "instrument");
        config.commands.test_node = sh("exit 0", "node");
        config.commands.test_browser = sh(BROWSER, "browser");
        config.tests.node = vec!["test/unit.js".to_string()];
        config.tests.browser = vec!["test/index.html".to_string()];
        config.upload.enabled = false;

        Self { dir, config }
    }

    fn root(&self) -> &Path {
        self.dir.path()
    }

    fn pipeline(&self, runtime: &str) -> (CiPipeline, PipelineRegistry) {
        let manifest = ProjectManifest {
            name: "lib".to_string(),
            version: "3.2.1".to_string(),
        };
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 34, 56).unwrap() + Duration::milliseconds(789);
        let gate = RuntimeGate::new(Some(RuntimeVersion(runtime.to_string())));
        let registry = PipelineRegistry::standard(&gate).unwrap();
        let ctx = PipelineContext::new(self.root(), self.config.clone(), manifest, gate, now);
        (CiPipeline::new(ctx), registry)
    }

    fn read(&self, rel: &str) -> String {
        fs::read_to_string(self.root().join(rel)).unwrap()
    }
}

#[tokio::test]
async fn build_templates_version_and_date() {
    let project = Project::new();
    let (pipeline, registry) = project.pipeline("v20.11.1");

    let result = pipeline.run(&registry.resolve("build").unwrap()).await.unwrap();
    assert!(result.success, "{:?}", result.failed_task());
    assert_eq!(result.tasks.len(), 3);

    for deliverable in ["dist/lib.js", "dist/lib.css"] {
        let text = project.read(deliverable);
        assert!(text.contains("3.2.1"), "{deliverable}: {text}");
        assert!(!text.contains("@VERSION"));
        assert!(!text.contains("@DATE"));
    }
    assert!(project.read("dist/lib.js").contains("2024-05-01T12:34Z"));
}

#[tokio::test]
async fn build_stops_at_first_failure() {
    let mut project = Project::new();
    project.config.commands.bundle = sh("echo 'rollup: syntax error' >&2; exit 2", "bundle");
    let (pipeline, registry) = project.pipeline("v20.11.1");

    let result = pipeline.run(&registry.resolve("build").unwrap()).await.unwrap();
    assert!(!result.success);
    assert_eq!(result.tasks.len(), 1);
    let failed = result.failed_task().unwrap();
    assert_eq!(failed.task, Task::Bundle);
    assert!(failed.detail.contains("syntax error"));
    assert!(!project.root().join("dist/lib.css").exists());
}

#[tokio::test]
async fn legacy_runtime_skips_lint() {
    let mut project = Project::new();
    // Outside the coverage scope the deliverable is not instrumented.
    project.config.commands.test_browser = sh("exit 0", "browser");
    let (pipeline, registry) = project.pipeline("v0.12.18");

    let result = pipeline.run(&registry.resolve("default").unwrap()).await.unwrap();
    assert!(result.success, "{:?}", result.failed_task());
    let lint = result.tasks.iter().find(|t| t.task == Task::Lint).unwrap();
    assert_eq!(lint.outcome, TaskOutcome::Skipped);
    assert!(!project.root().join("lint.log").exists());

    let (modern, registry) = project.pipeline("v20.11.1");
    let result = modern.run(&registry.resolve("test").unwrap()).await.unwrap();
    assert!(result.success, "{:?}", result.failed_task());
    let lint = result.tasks.iter().find(|t| t.task == Task::Lint).unwrap();
    assert_eq!(lint.outcome, TaskOutcome::Passed);
    assert!(project.root().join("lint.log").exists());
}

#[tokio::test]
async fn coverage_writes_lcov_and_restores_artifact() {
    let mut project = Project::new();
    project.config.tests.browser = vec!["test/index.html".to_string(), "test/logs.html".to_string()];
    let (pipeline, registry) = project.pipeline("v20.11.1");

    let result = pipeline.run(&registry.resolve("coverage").unwrap()).await.unwrap();
    assert!(result.success, "{:?}", result.failed_task());

    let summary = result.coverage().unwrap();
    assert_eq!(summary.files, 1);
    assert_eq!(summary.lines_found, 2);
    assert_eq!(summary.lines_hit, 1);
    assert!(project.read("build/report/lcov.info").contains("DA:1,2\n"));
    assert!(project.root().join("build/report/phantom/index.json").exists());
    assert!(project.root().join("build/report/phantom/logs.json").exists());

    assert!(!project.read("dist/lib.js").contains("__cov"));
    assert!(!project.root().join("build/lib.orig.js").exists());
    let upload = result.tasks.last().unwrap();
    assert_eq!(upload.task, Task::Upload);
    assert_eq!(upload.outcome, TaskOutcome::Skipped);
}

#[tokio::test]
async fn failing_browser_tests_still_restore_artifact() {
    let mut project = Project::new();
    project.config.tests.browser = vec!["test/index.html".to_string(), "test/fail.html".to_string()];
    let (pipeline, registry) = project.pipeline("v20.11.1");

    pipeline.run(&registry.resolve("build").unwrap()).await.unwrap();
    let built = fs::read(project.root().join("dist/lib.js")).unwrap();

    let result = pipeline.run(&registry.resolve("coverage").unwrap()).await.unwrap();
    assert!(!result.success);
    let failed = result.failed_task().unwrap();
    assert_eq!(failed.task, Task::TestBrowser);
    assert!(failed.detail.contains("not ok 1"));
    assert!(result.tasks.iter().all(|t| t.task != Task::MakeReport));

    assert_eq!(fs::read(project.root().join("dist/lib.js")).unwrap(), built);
    assert!(!project.root().join("build/lib.orig.js").exists());
}

#[tokio::test]
async fn missing_instrumented_copy_leaves_artifact_untouched() {
    let mut project = Project::new();
    project.config.commands.instrument = Vec::new();
    let (pipeline, registry) = project.pipeline("v20.11.1");

    pipeline.run(&registry.resolve("build").unwrap()).await.unwrap();
    let built = fs::read(project.root().join("dist/lib.js")).unwrap();

    let err = pipeline.run(&registry.resolve("coverage").unwrap()).await.unwrap_err();
    assert!(format!("{err:#}").contains("instrumented"));
    assert_eq!(fs::read(project.root().join("dist/lib.js")).unwrap(), built);
    assert!(!project.root().join("build/lib.orig.js").exists());
}

#[tokio::test]
async fn restore_failure_outranks_test_failure() {
    let mut project = Project::new();
    project.config.commands.test_browser = sh("rm build/lib.orig.js; exit 1", "browser");
    let (pipeline, registry) = project.pipeline("v20.11.1");

    let err = pipeline.run(&registry.resolve("coverage").unwrap()).await.unwrap_err();
    assert!(format!("{err:#}").contains("restore the original artifact"));
}

#[tokio::test]
async fn cancelled_coverage_run_restores_artifact() {
    let mut project = Project::new();
    project.config.commands.test_browser = sh("touch started; exec sleep 30", "browser");
    let (pipeline, registry) = project.pipeline("v20.11.1");

    pipeline.run(&registry.resolve("build").unwrap()).await.unwrap();
    let built = fs::read(project.root().join("dist/lib.js")).unwrap();

    let plan = registry.resolve("coverage").unwrap();
    let mut run = Box::pin(pipeline.run(&plan));
    let started = project.root().join("started");
    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(10);
    while !started.exists() {
        assert!(tokio::time::Instant::now() < deadline, "browser suite never started");
        tokio::select! {
            res = &mut run => panic!("coverage run finished early: {:?}", res.map(|r| r.success)),
            _ = tokio::time::sleep(std::time::Duration::from_millis(20)) => {}
        }
    }
    assert!(project.read("dist/lib.js").contains("__cov"));
    assert!(project.root().join("build/lib.orig.js").exists());

    drop(run);
    assert_eq!(fs::read(project.root().join("dist/lib.js")).unwrap(), built);
    assert!(!project.root().join("build/lib.orig.js").exists());
}

struct DownUploader;

#[async_trait]
impl CoverageUploader for DownUploader {
    async fn upload(&self, _lcov_path: &Path) -> Result<UploadReceipt, UploadError> {
        Err(UploadError::Http("connection refused".to_string()))
    }
}

#[tokio::test]
async fn upload_failure_is_only_a_warning() {
    let mut project = Project::new();
    project.config.upload.enabled = true;
    let (pipeline, registry) = project.pipeline("v20.11.1");
    let pipeline = pipeline.with_uploader(Some(Arc::new(DownUploader)));

    let result = pipeline.run(&registry.resolve("coverage").unwrap()).await.unwrap();
    assert!(result.success);
    let upload = result.tasks.last().unwrap();
    assert_eq!(upload.outcome, TaskOutcome::Warned);
    assert!(upload.detail.contains("connection refused"));
    assert!(project.root().join("build/report/lcov.info").exists());
}
