/// flowmesh: workflow execution engine
///
/// Command-line entry point. Loads a workflow document, registers the
/// built-in executors and runs it, printing the per-unit results as JSON.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use flowmesh::runtime::{register_builtins, ExecutionManager};
use flowmesh::{EngineConfig, ExecutionEngine, ExecutionOptions, Workflow};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// flowmesh - run workflow graphs sequentially or in dependency batches
#[derive(Parser)]
#[command(name = "flowmesh")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an entire workflow
    Run {
        /// Path to the workflow JSON document
        workflow_file: PathBuf,

        /// Execute dependency batches concurrently
        #[arg(long)]
        parallel: bool,

        /// Concurrency cap per batch (parallel mode)
        #[arg(long)]
        max_concurrency: Option<usize>,

        /// JSON input handed to the start units
        #[arg(long)]
        input: Option<String>,

        /// Start from this unit instead of the graph roots
        #[arg(long)]
        start: Option<String>,
    },

    /// Run a single unit of a workflow
    Step {
        /// Path to the workflow JSON document
        workflow_file: PathBuf,

        /// The unit id to execute
        #[arg(long)]
        unit: String,

        /// JSON input handed to the unit
        #[arg(long)]
        input: Option<String>,
    },
}

fn load_workflow(path: &Path) -> Result<Workflow> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("failed to parse workflow {}", path.display()))
}

fn parse_input(input: Option<String>) -> Result<Option<Value>> {
    input
        .map(|raw| serde_json::from_str(&raw).context("--input is not valid JSON"))
        .transpose()
}

fn build_manager() -> Result<ExecutionManager> {
    let engine = ExecutionEngine::new(EngineConfig::default());
    register_builtins(&engine)?;
    Ok(ExecutionManager::new(Arc::new(engine)))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so stdout stays machine-readable
    tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let manager = build_manager()?;

    match cli.command {
        Commands::Run {
            workflow_file,
            parallel,
            max_concurrency,
            input,
            start,
        } => {
            let workflow = load_workflow(&workflow_file)?;
            tracing::info!("🚀 Running workflow '{}' ({} units)", workflow.id, workflow.units.len());

            let mut options = if parallel {
                ExecutionOptions::parallel(max_concurrency.unwrap_or(manager.engine().config().scheduler.max_concurrency))
            } else {
                ExecutionOptions::sequential()
            };
            if let Some(input) = parse_input(input)? {
                options = options.with_input(input);
            }
            if let Some(start) = start {
                options = options.starting_at(start);
            }

            let run = manager.execute_workflow(&workflow.units, &workflow.edges, &options).await?;
            for warning in &run.warnings {
                tracing::warn!("⚠️ {}", warning);
            }
            if let Some(unit_id) = &run.halted_by {
                tracing::error!("🛑 Run halted by '{}'", unit_id);
            }
            println!("{}", serde_json::to_string_pretty(&run.results)?);
        }
        Commands::Step {
            workflow_file,
            unit,
            input,
        } => {
            let workflow = load_workflow(&workflow_file)?;
            let target = workflow
                .units
                .iter()
                .find(|candidate| candidate.id == unit)
                .with_context(|| format!("unit '{}' not found in workflow '{}'", unit, workflow.id))?;

            let input = parse_input(input)?.unwrap_or_else(|| Value::Object(Default::default()));
            let result = manager.execute_step(target, input).await;
            manager.finish_step_run();
            println!("{}", serde_json::to_string_pretty(&result?)?);
        }
    }

    Ok(())
}
