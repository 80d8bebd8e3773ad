//! Pipeline execution.
//!
//! Runs a resolved [`Plan`] task by task and stops at the first failure. The
//! instrumented scope swaps the instrumented artifact in, runs its body with
//! a coverage collector attached, and always restores the original artifact
//! afterwards, whatever the body did.

use anyhow::Context;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn, Instrument};
use uuid::Uuid;

use kiln_core::{copy_templated, obs, GateDecision};
use kiln_coverage::{
    Aggregator, ArtifactSwap, CoverageCollector, CoverageSink, CoverageSummary, CoverageUploader,
    CoverallsClient,
};

use crate::context::PipelineContext;
use crate::engine::{CommandTestEngine, TestEngine, TestSuite};
use crate::registry::{Plan, PlanNode};
use crate::runner::StageRunner;
use crate::stage::{StageConfig, Task};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Passed,
    Failed,
    /// Not run: gated off or not configured.
    Skipped,
    /// Failed without failing the pipeline (upload only).
    Warned,
}

/// What happened to one task.
#[derive(Debug, Clone)]
pub struct TaskReport {
    pub task: Task,
    pub outcome: TaskOutcome,
    pub duration_ms: u64,
    /// Diagnostic output for failures, a short note otherwise.
    pub detail: String,
    /// Set by `make-report`.
    pub coverage: Option<CoverageSummary>,
}

impl TaskReport {
    fn new(task: Task, outcome: TaskOutcome, detail: impl Into<String>) -> Self {
        Self {
            task,
            outcome,
            duration_ms: 0,
            detail: detail.into(),
            coverage: None,
        }
    }

    pub fn passed(&self) -> bool {
        self.outcome != TaskOutcome::Failed
    }
}

/// Result of a complete pipeline execution.
#[derive(Debug, Clone)]
pub struct PipelineResult {
    pub run_id: String,

    pub pipeline: String,

    /// Whether every task that ran passed.
    pub success: bool,

    /// Reports of the tasks that were reached, in order.
    pub tasks: Vec<TaskReport>,

    /// Total duration in milliseconds.
    pub duration_ms: u64,
}

impl PipelineResult {
    /// Number of tasks that passed (skipped and warned included).
    pub fn passed_count(&self) -> usize {
        self.tasks.iter().filter(|t| t.passed()).count()
    }

    /// Number of tasks that failed.
    pub fn failed_count(&self) -> usize {
        self.tasks.iter().filter(|t| !t.passed()).count()
    }

    pub fn failed_task(&self) -> Option<&TaskReport> {
        self.tasks.iter().find(|t| !t.passed())
    }

    /// Totals of the last coverage report written by this run.
    pub fn coverage(&self) -> Option<CoverageSummary> {
        self.tasks.iter().rev().find_map(|t| t.coverage)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Halt,
}

type FlowFuture<'a> = Pin<Box<dyn Future<Output = anyhow::Result<Flow>> + Send + 'a>>;

/// Pipeline executor for one project.
pub struct CiPipeline {
    ctx: PipelineContext,
    node_engine: Option<Arc<dyn TestEngine>>,
    browser_engine: Option<Arc<dyn TestEngine>>,
    uploader: Option<Arc<dyn CoverageUploader>>,
}

impl CiPipeline {
    /// Executor with command-backed test engines and the Coveralls uploader
    /// from the project configuration.
    pub fn new(ctx: PipelineContext) -> Self {
        let engine = |name: &str, command: &[String]| -> Option<Arc<dyn TestEngine>> {
            if command.is_empty() {
                return None;
            }
            Some(Arc::new(CommandTestEngine::new(
                name,
                command.to_vec(),
                ctx.root(),
                ctx.config.tests.timeout_secs,
            )))
        };
        let node_engine = engine(Task::TestNode.name(), &ctx.config.commands.test_node);
        let browser_engine = engine(Task::TestBrowser.name(), &ctx.config.commands.test_browser);

        let uploader: Option<Arc<dyn CoverageUploader>> =
            match CoverallsClient::new(ctx.config.upload.clone(), ctx.root()) {
                Ok(client) => Some(Arc::new(client)),
                Err(e) => {
                    warn!(error = %e, "Coverage uploader unavailable");
                    None
                }
            };

        Self {
            ctx,
            node_engine,
            browser_engine,
            uploader,
        }
    }

    pub fn with_test_engines(
        mut self,
        node: Option<Arc<dyn TestEngine>>,
        browser: Option<Arc<dyn TestEngine>>,
    ) -> Self {
        self.node_engine = node;
        self.browser_engine = browser;
        self
    }

    pub fn with_uploader(mut self, uploader: Option<Arc<dyn CoverageUploader>>) -> Self {
        self.uploader = uploader;
        self
    }

    pub fn context(&self) -> &PipelineContext {
        &self.ctx
    }

    /// Execute `plan`.
    ///
    /// A failing task ends the run with `success == false`. `Err` is
    /// reserved for faults outside any task: the artifact could not be
    /// swapped or restored.
    pub async fn run(&self, plan: &Plan) -> anyhow::Result<PipelineResult> {
        let run_id = Uuid::new_v4().to_string();
        let span = obs::run_span(&run_id, &plan.pipeline);
        self.run_plan(plan, run_id).instrument(span).await
    }

    async fn run_plan(&self, plan: &Plan, run_id: String) -> anyhow::Result<PipelineResult> {
        let start = Instant::now();
        obs::emit_pipeline_started(&plan.pipeline, plan.task_count());

        let mut tasks = Vec::new();
        let flow = self.run_nodes(&plan.nodes, None, &mut tasks).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        let success = matches!(flow, Ok(Flow::Continue));
        obs::emit_pipeline_finished(&plan.pipeline, duration_ms, success);
        flow?;

        if success {
            info!(run_id = %run_id, "Pipeline completed successfully");
        } else {
            info!(run_id = %run_id, "Pipeline failed");
        }

        Ok(PipelineResult {
            run_id,
            pipeline: plan.pipeline.clone(),
            success,
            tasks,
            duration_ms,
        })
    }

    fn run_nodes<'a>(
        &'a self,
        nodes: &'a [PlanNode],
        sink: Option<&'a CoverageCollector>,
        tasks: &'a mut Vec<TaskReport>,
    ) -> FlowFuture<'a> {
        Box::pin(async move {
            for node in nodes {
                match node {
                    PlanNode::Task(decision) => {
                        let report = self.run_decision(*decision, sink).await;
                        let failed = !report.passed();
                        tasks.push(report);
                        if failed {
                            return Ok(Flow::Halt);
                        }
                    }
                    PlanNode::Instrumented(body) => {
                        if self.run_instrumented(body, tasks).await? == Flow::Halt {
                            return Ok(Flow::Halt);
                        }
                    }
                }
            }
            Ok(Flow::Continue)
        })
    }

    async fn run_instrumented(
        &self,
        body: &[PlanNode],
        tasks: &mut Vec<TaskReport>,
    ) -> anyhow::Result<Flow> {
        let guard = ArtifactSwap::engage(self.ctx.swap_paths())
            .context("swap the instrumented artifact in")?;
        let collector = CoverageCollector::new(
            &self.ctx.layout.coverage_dir,
            self.ctx.config.artifact.test_root.clone(),
        );

        let outcome = self.run_nodes(body, Some(&collector), tasks).await;

        match guard.restore() {
            Ok(()) => outcome,
            Err(restore_err) => {
                if let Err(body_err) = &outcome {
                    error!(error = %body_err, "Instrumented tasks failed before restore");
                }
                Err(anyhow::Error::new(restore_err).context("restore the original artifact"))
            }
        }
    }

    async fn run_decision(
        &self,
        decision: GateDecision<Task>,
        sink: Option<&CoverageCollector>,
    ) -> TaskReport {
        let task = match decision {
            GateDecision::Run(task) => task,
            GateDecision::SkipWithLog(task) => {
                let runtime = self.ctx.gate.runtime_label();
                info!(runtime = %runtime, "Old runtime detected, task \"{task}\" skipped...");
                obs::emit_task_skipped(task.name(), &runtime);
                return TaskReport::new(task, TaskOutcome::Skipped, format!("skipped on runtime {runtime}"));
            }
        };

        obs::emit_task_started(task.name());
        let start = Instant::now();
        let mut report = self.run_task(task, sink).await;
        report.duration_ms = start.elapsed().as_millis() as u64;
        obs::emit_task_finished(task.name(), report.duration_ms, report.passed());
        if report.outcome == TaskOutcome::Failed {
            warn!(task = %task, detail = %report.detail, "Task failed");
        }
        report
    }

    async fn run_task(&self, task: Task, sink: Option<&CoverageCollector>) -> TaskReport {
        let layout = &self.ctx.layout;
        match task {
            Task::Bundle | Task::Lint | Task::Markup | Task::Instrument => self.run_command(task).await,
            Task::CopyJs => self.copy(task, &layout.artifact, &layout.artifact),
            Task::CopyCss => self.copy(task, &layout.stylesheet_src, &layout.stylesheet),
            Task::TestNode => {
                let files = self.ctx.test_files(&self.ctx.config.tests.node);
                self.run_suite(task, self.node_engine.as_deref(), &files, None).await
            }
            Task::TestBrowser => {
                let files = self.ctx.test_files(&self.ctx.config.tests.browser);
                let sink = sink.map(|c| c as &dyn CoverageSink);
                self.run_suite(task, self.browser_engine.as_deref(), &files, sink).await
            }
            Task::MakeReport => match Aggregator::from_layout(layout).run() {
                Ok(summary) => {
                    let mut report = TaskReport::new(
                        task,
                        TaskOutcome::Passed,
                        format!(
                            "{} files, lines {:.1}% ({}/{})",
                            summary.files,
                            summary.line_percent(),
                            summary.lines_hit,
                            summary.lines_found
                        ),
                    );
                    report.coverage = Some(summary);
                    report
                }
                Err(e) => TaskReport::new(task, TaskOutcome::Failed, e.to_string()),
            },
            Task::Upload => self.upload(task).await,
        }
    }

    async fn run_command(&self, task: Task) -> TaskReport {
        let Some(stage) = StageConfig::for_task(task, &self.ctx.config.commands) else {
            warn!(task = %task, "No command configured, skipping");
            return TaskReport::new(task, TaskOutcome::Skipped, "no command configured");
        };
        let stage = stage.in_dir(self.ctx.root());

        match StageRunner::execute_stage(&stage).await {
            Ok(result) if result.passed() => TaskReport::new(task, TaskOutcome::Passed, ""),
            Ok(result) => TaskReport::new(task, TaskOutcome::Failed, result.diagnostics()),
            // Spawn errors and timeouts fail the task like a non-zero exit.
            Err(e) => TaskReport::new(task, TaskOutcome::Failed, e.to_string()),
        }
    }

    fn copy(&self, task: Task, src: &Path, dest: &Path) -> TaskReport {
        match copy_templated(src, dest, &self.ctx.template) {
            Ok(()) => TaskReport::new(task, TaskOutcome::Passed, dest.display().to_string()),
            Err(e) => TaskReport::new(
                task,
                TaskOutcome::Failed,
                format!("{} -> {}: {}", src.display(), dest.display(), e),
            ),
        }
    }

    async fn run_suite(
        &self,
        task: Task,
        engine: Option<&dyn TestEngine>,
        files: &[PathBuf],
        sink: Option<&dyn CoverageSink>,
    ) -> TaskReport {
        let Some(engine) = engine else {
            warn!(task = %task, "No test engine configured, skipping");
            return TaskReport::new(task, TaskOutcome::Skipped, "no test engine configured");
        };
        if files.is_empty() {
            warn!(task = %task, "No test files configured, skipping");
            return TaskReport::new(task, TaskOutcome::Skipped, "no test files configured");
        }

        match TestSuite::new(task.name(), engine, files).run(sink).await {
            Ok(outcome) if outcome.success() => TaskReport::new(
                task,
                TaskOutcome::Passed,
                format!("{} test files passed", outcome.passed),
            ),
            Ok(outcome) => TaskReport::new(task, TaskOutcome::Failed, outcome.diagnostics()),
            Err(e) => TaskReport::new(task, TaskOutcome::Failed, format!("{e:#}")),
        }
    }

    async fn upload(&self, task: Task) -> TaskReport {
        if !self.ctx.config.upload.enabled {
            return TaskReport::new(task, TaskOutcome::Skipped, "upload disabled");
        }
        let Some(uploader) = &self.uploader else {
            return TaskReport::new(task, TaskOutcome::Skipped, "no uploader available");
        };

        match uploader.upload(&self.ctx.layout.lcov).await {
            Ok(receipt) => TaskReport::new(
                task,
                TaskOutcome::Passed,
                receipt.url.unwrap_or_else(|| format!("status {}", receipt.status)),
            ),
            Err(e) => {
                obs::emit_upload_failed(&self.ctx.config.upload.endpoint, &e);
                TaskReport::new(task, TaskOutcome::Warned, e.to_string())
            }
        }
    }
}
