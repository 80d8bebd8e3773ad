//! Structured observability hooks for pipeline lifecycle events.
//!
//! Every function logs one event with an `event` field so log aggregation can
//! filter on it, e.g. `event=task.finished task=lint success=false`.
//! Use `RUST_LOG` to tune verbosity and `--json` for machine-readable output.

use tracing::{error, info, warn};

/// Run-scoped span tagging every event with the run id and pipeline name.
///
/// ```ignore
/// pipeline.run_plan(plan).instrument(run_span("6f1c...", "coverage")).await
/// ```
///
/// Returned unentered: async callers attach it with `tracing::Instrument`
/// since an entered guard must not cross an `.await`.
pub fn run_span(run_id: &str, pipeline: &str) -> tracing::Span {
    tracing::info_span!("kiln.run", run_id = %run_id, pipeline = %pipeline)
}

pub fn emit_pipeline_started(pipeline: &str, steps: usize) {
    info!(event = "pipeline.started", pipeline = %pipeline, steps = steps);
}

pub fn emit_pipeline_finished(pipeline: &str, duration_ms: u64, success: bool) {
    info!(
        event = "pipeline.finished",
        pipeline = %pipeline,
        duration_ms = duration_ms,
        success = success,
    );
}

pub fn emit_task_started(task: &str) {
    info!(event = "task.started", task = %task);
}

/// Emit event: a task was replaced by its skip stub on a legacy runtime.
pub fn emit_task_skipped(task: &str, runtime: &str) {
    info!(event = "task.skipped", task = %task, runtime = %runtime);
}

pub fn emit_task_finished(task: &str, duration_ms: u64, success: bool) {
    if success {
        info!(event = "task.finished", task = %task, duration_ms = duration_ms, success = true);
    } else {
        warn!(event = "task.finished", task = %task, duration_ms = duration_ms, success = false);
    }
}

/// Emit event: the instrumented artifact now stands in for the deliverable.
pub fn emit_artifact_swapped(artifact: &str, backup: &str) {
    info!(event = "artifact.swapped", artifact = %artifact, backup = %backup);
}

/// Emit event: the original artifact is back in place.
pub fn emit_artifact_restored(artifact: &str, digest: &str) {
    info!(event = "artifact.restored", artifact = %artifact, sha256 = %digest);
}

/// Emit event: restoring the original artifact failed. Always `error` level.
pub fn emit_artifact_restore_failed(artifact: &str, error: &dyn std::fmt::Display) {
    error!(event = "artifact.restore_failed", artifact = %artifact, error = %error);
}

pub fn emit_coverage_recorded(test_name: &str, path: &str) {
    info!(event = "coverage.recorded", test_name = %test_name, path = %path);
}

pub fn emit_report_written(path: &str, files: usize, lines_hit: usize, lines_found: usize) {
    info!(
        event = "coverage.report_written",
        path = %path,
        files = files,
        lines_hit = lines_hit,
        lines_found = lines_found,
    );
}

/// Emit event: coverage upload failed. Warning only, the local report stands.
pub fn emit_upload_failed(endpoint: &str, error: &dyn std::fmt::Display) {
    warn!(event = "upload.failed", endpoint = %endpoint, error = %error);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_span_create() {
        let span = run_span("test-run-id", "coverage");
        let _entered = span.enter();
        emit_task_started("bundle");
        emit_task_finished("bundle", 3, true);
    }
}
