//! kiln - build, test and coverage pipelines for a bundled JavaScript library
//!
//! ## Commands
//!
//! - `build`: bundle and template the deliverables
//! - `test`: lint, validate markup and run the test suites
//! - `coverage`: build, run the browser suite against the instrumented
//!   artifact, write `lcov.info` and upload it
//! - `default`: build, then test
//! - `watch`: run `default`, then again on every change
//! - `restore`: put back an artifact left instrumented by an aborted run
//! - `pipelines`: print the resolved pipelines

mod watch;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{info, warn, Level};

use kiln_ci::{CiPipeline, PipelineContext, PipelineRegistry, PipelineResult, TaskOutcome};
use kiln_coverage::ArtifactSwap;

use crate::watch::ProjectWatcher;

#[derive(Parser)]
#[command(name = "kiln")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Build, test and coverage pipelines for a bundled JavaScript library", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Project root containing package.json
    #[arg(long, global = true, env = "KILN_ROOT", default_value = ".")]
    root: PathBuf,

    /// Config file (default: <root>/kiln.toml)
    #[arg(long, global = true, env = "KILN_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Bundle sources and template the deliverables
    Build,

    /// Lint, validate markup and run both test suites
    Test,

    /// Measure coverage of the browser suite and publish the report
    Coverage,

    /// Build, then test
    Default,

    /// Run the default pipeline on every change
    Watch,

    /// Restore an artifact left instrumented by an aborted coverage run
    Restore,

    /// Print the resolved pipelines
    Pipelines,
}

impl Commands {
    fn pipeline(&self) -> Option<&'static str> {
        match self {
            Commands::Build => Some("build"),
            Commands::Test => Some("test"),
            Commands::Coverage => Some("coverage"),
            Commands::Default | Commands::Watch => Some("default"),
            Commands::Restore | Commands::Pipelines => None,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    kiln_core::init_tracing(cli.json, level);

    let root = std::fs::canonicalize(&cli.root)
        .with_context(|| format!("Project root not found: {}", cli.root.display()))?;
    let ctx = PipelineContext::load(&root, cli.config.as_deref())
        .context("Failed to load project configuration")?;
    let registry = PipelineRegistry::standard(&ctx.gate).context("Invalid pipeline definitions")?;

    match cli.command {
        Commands::Restore => cmd_restore(&ctx),
        Commands::Pipelines => cmd_pipelines(&registry),
        Commands::Watch => {
            recover_stale(&ctx)?;
            cmd_watch(ctx, &registry).await
        }
        ref command => {
            recover_stale(&ctx)?;
            let name = command.pipeline().unwrap_or("default");
            cmd_run(CiPipeline::new(ctx), &registry, name).await
        }
    }
}

/// Put back a backup left by a run that died inside the instrumented scope.
fn recover_stale(ctx: &PipelineContext) -> Result<bool> {
    let recovered = ArtifactSwap::recover_stale(&ctx.swap_paths())
        .context("Failed to restore the artifact from a previous run")?;
    if recovered {
        warn!(artifact = %ctx.layout.artifact.display(), "Restored artifact left instrumented by a previous run");
    }
    Ok(recovered)
}

fn cmd_restore(ctx: &PipelineContext) -> Result<()> {
    if recover_stale(ctx)? {
        println!("✓ Restored {}", ctx.layout.artifact.display());
    } else {
        println!("Nothing to restore: no backup at {}", ctx.layout.backup.display());
    }
    Ok(())
}

fn cmd_pipelines(registry: &PipelineRegistry) -> Result<()> {
    for name in registry.names() {
        let plan = registry.resolve(name)?;
        println!("{name}:");
        for line in plan.describe() {
            println!("{line}");
        }
    }
    Ok(())
}

async fn cmd_run(pipeline: CiPipeline, registry: &PipelineRegistry, name: &str) -> Result<()> {
    let plan = registry.resolve(name)?;
    let result = pipeline
        .run(&plan)
        .await
        .with_context(|| format!("Pipeline {name} aborted"))?;

    print_result(&result);
    if result.success {
        Ok(())
    } else {
        anyhow::bail!("Pipeline {} failed", name)
    }
}

async fn cmd_watch(ctx: PipelineContext, registry: &PipelineRegistry) -> Result<()> {
    let plan = registry.resolve("default")?;
    let ignored = output_dirs(&ctx);
    let watcher = ProjectWatcher::new(ctx.root(), &ctx.config.watch, ignored);
    let pipeline = CiPipeline::new(ctx);

    let (_guard, mut rx) = watcher.start().context("Failed to start file watcher")?;
    run_once(&pipeline, &plan).await;

    loop {
        tokio::select! {
            batch = watch::next_batch(&mut rx, watcher.debounce()) => {
                let Some(batch) = batch else { break };
                info!(changed = batch.len(), first = %batch[0].display(), "Change detected");
                run_once(&pipeline, &plan).await;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Stopping watch");
                break;
            }
        }
    }
    Ok(())
}

/// One watch iteration. Failures are reported and watching continues.
async fn run_once(pipeline: &CiPipeline, plan: &kiln_ci::Plan) {
    match pipeline.run(plan).await {
        Ok(result) => print_result(&result),
        Err(e) => eprintln!("✗ Pipeline {} aborted: {:#}", plan.pipeline, e),
    }
}

fn output_dirs(ctx: &PipelineContext) -> Vec<PathBuf> {
    let artifact = &ctx.config.artifact;
    [&artifact.dist_dir, &artifact.build_dir]
        .into_iter()
        .map(|dir| ctx.root().join(dir))
        .collect()
}

fn print_result(result: &PipelineResult) {
    println!();
    println!("Pipeline: {}", result.pipeline);
    println!("Run ID: {}", result.run_id);
    println!("Status: {}", if result.success { "✓ PASSED" } else { "✗ FAILED" });
    println!("Duration: {}ms", result.duration_ms);
    println!();

    for task in &result.tasks {
        let status = match task.outcome {
            TaskOutcome::Passed => "✓",
            TaskOutcome::Failed => "✗",
            TaskOutcome::Skipped => "-",
            TaskOutcome::Warned => "!",
        };
        println!("  {} {} ({}ms)", status, task.task, task.duration_ms);
        if task.outcome != TaskOutcome::Passed && !task.detail.is_empty() {
            for line in task.detail.lines() {
                println!("      {line}");
            }
        }
    }

    if let Some(summary) = result.coverage() {
        println!();
        println!(
            "Coverage: lines {:.2}% ({}/{}), functions {:.2}% ({}/{}), branches {:.2}% ({}/{})",
            summary.line_percent(),
            summary.lines_hit,
            summary.lines_found,
            summary.function_percent(),
            summary.functions_hit,
            summary.functions_found,
            summary.branch_percent(),
            summary.branches_hit,
            summary.branches_found,
        );
    }

    println!();
    println!("Summary: {}/{} tasks passed", result.passed_count(), result.tasks.len());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_global_flags() {
        let cli = Cli::try_parse_from(["kiln", "--verbose", "--root", "/repo", "coverage"]).unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.root, PathBuf::from("/repo"));
        assert!(matches!(cli.command, Commands::Coverage));
        assert_eq!(cli.command.pipeline(), Some("coverage"));
    }

    #[test]
    fn test_cli_command_pipelines() {
        for (arg, expected) in [
            ("build", Some("build")),
            ("test", Some("test")),
            ("default", Some("default")),
            ("watch", Some("default")),
            ("restore", None),
            ("pipelines", None),
        ] {
            let cli = Cli::try_parse_from(["kiln", arg]).unwrap();
            assert_eq!(cli.command.pipeline(), expected, "{arg}");
        }
        assert!(Cli::try_parse_from(["kiln", "deploy"]).is_err());
    }

    #[test]
    fn test_cmd_restore_recovers_backup() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("package.json"),
            r#"{ "name": "lib", "version": "1.0.0" }"#,
        )
        .unwrap();
        std::fs::write(
            dir.path().join("kiln.toml"),
            "[commands]\nruntime_version = [\"echo\", \"v20.0.0\"]\n",
        )
        .unwrap();
        let ctx = PipelineContext::load(dir.path(), None).unwrap();
        std::fs::create_dir_all(ctx.layout.artifact.parent().unwrap()).unwrap();
        std::fs::create_dir_all(ctx.layout.backup.parent().unwrap()).unwrap();
        std::fs::write(&ctx.layout.artifact, "instrumented").unwrap();
        std::fs::write(&ctx.layout.backup, "original").unwrap();

        cmd_restore(&ctx).unwrap();
        assert_eq!(std::fs::read_to_string(&ctx.layout.artifact).unwrap(), "original");
        assert!(!ctx.layout.backup.exists());
        assert!(!recover_stale(&ctx).unwrap());
    }

    #[test]
    fn test_output_dirs_are_ignored_by_watch() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("package.json"),
            r#"{ "name": "lib", "version": "1.0.0" }"#,
        )
        .unwrap();
        let ctx = PipelineContext::load(dir.path(), None).unwrap();
        let dirs = output_dirs(&ctx);
        assert_eq!(dirs, vec![dir.path().join("dist"), dir.path().join("build")]);
    }
}
