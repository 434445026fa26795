// src/lib.rs

pub mod cli;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod types;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::cli::CliArgs;
use crate::config::loader::load_and_validate;
use crate::config::model::WorkflowFile;
use crate::dag::{ExecutionPlan, WorkflowGraph};
use crate::engine::{RunOptions, RunResult, Scheduler};
use crate::exec::{JobBackend, LocalBackend, LoggingCallback, SlurmBackend};
use crate::types::BackendKind;

pub use crate::dag::build_graph;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - workflow loading and graph validation
/// - backend selection
/// - the scheduler
/// - Ctrl-C handling (aborts the run)
pub async fn run(args: CliArgs) -> Result<()> {
    let workflow_path = PathBuf::from(&args.workflow);
    let workflow = load_and_validate(&workflow_path)
        .with_context(|| format!("loading workflow {}", workflow_path.display()))?;

    let graph = WorkflowGraph::build(workflow.descriptors())?.named(workflow.name.clone());

    let max_concurrency = args
        .max_concurrency
        .unwrap_or(workflow.config.max_concurrency);
    let backend_kind = args.backend.unwrap_or(workflow.config.backend);

    if args.dry_run {
        print_plan(&workflow, &graph, max_concurrency, backend_kind)?;
        return Ok(());
    }

    let backend = select_backend(backend_kind, workflow.poll_interval());
    let scheduler = Scheduler::new(backend, RunOptions { max_concurrency })
        .with_callback(Arc::new(LoggingCallback));

    // Ctrl-C -> abort the run; in-flight jobs are cancelled.
    {
        let abort = scheduler.abort_handle();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for Ctrl+C");
                return;
            }
            info!("Ctrl+C received; aborting workflow run");
            abort.abort();
        });
    }

    info!(
        workflow = %graph.name(),
        backend = ?backend_kind,
        max_concurrency,
        "starting workflow"
    );

    let results = scheduler.run(Arc::new(graph)).await?;
    print_results(&results);
    Ok(())
}

fn select_backend(kind: BackendKind, poll_interval: Duration) -> Arc<dyn JobBackend> {
    match kind {
        BackendKind::Slurm => Arc::new(SlurmBackend::new(poll_interval)),
        BackendKind::Local => Arc::new(LocalBackend::new()),
    }
}

/// Dry-run output: levels, tasks, payloads and dependencies.
fn print_plan(
    workflow: &WorkflowFile,
    graph: &WorkflowGraph,
    max_concurrency: usize,
    backend: BackendKind,
) -> Result<()> {
    let plan = ExecutionPlan::from_graph(graph)?;

    println!("jobdag dry-run: {}", graph.name());
    println!("  config.max_concurrency = {max_concurrency}");
    println!("  config.backend = {backend:?}");
    println!("  config.poll_interval = {:?}", workflow.poll_interval());
    println!();

    println!("plan ({} tasks, {} levels):", graph.len(), plan.depth());
    for (index, level) in plan.levels.iter().enumerate() {
        println!("  level {index}:");
        for task in level {
            let Some(descriptor) = graph.descriptor(task) else {
                continue;
            };
            println!("    - {task}");
            println!("        run: {}", descriptor.payload.summary());
            if !descriptor.depends_on.is_empty() {
                println!("        depends_on: {:?}", descriptor.depends_on);
            }
        }
    }

    debug!("dry-run complete (no execution)");
    Ok(())
}

fn print_results(results: &RunResult) {
    println!("workflow completed ({} tasks):", results.len());
    for (task, record) in results.iter() {
        println!(
            "  {task}  job={}  status={}  elapsed={:.1}s",
            record.job_id,
            record.status,
            record.elapsed.as_secs_f64()
        );
    }
}
