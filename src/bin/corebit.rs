//! # CoreBit Command Line
//!
//! Runs a YAML workflow once, streaming each batch as a JSON line, or on its
//! schedule until interrupted or its iteration cap is reached.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use corebit::config::ConfigManager;
use corebit::logging::init_structured_logging;
use corebit::pipeline::Pipeline;
use corebit::scheduler::{Scheduler, SchedulerState};
use corebit::workflow::{build_pipeline_with_config, StageRegistry, WorkflowDefinition};
use futures::StreamExt;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "corebit")]
#[command(about = "Run batch task pipelines from workflow files")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a workflow
    Run {
        /// Workflow definition (YAML)
        #[arg(short, long)]
        workflow: PathBuf,

        /// JSON file holding an array of input elements
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Configuration file (TOML or YAML); falls back to COREBIT_CONFIG
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Run the pipeline a single time instead of on its schedule
        #[arg(long)]
        once: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_structured_logging();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            workflow,
            input,
            config,
            once,
        } => run(&workflow, input.as_deref(), config.as_deref(), once).await,
    }
}

async fn run(
    workflow_path: &Path,
    input: Option<&Path>,
    config_path: Option<&Path>,
    once: bool,
) -> anyhow::Result<()> {
    let manager = match config_path {
        Some(path) => ConfigManager::load(path)?,
        None => ConfigManager::load_from_env()?,
    };
    let definition = WorkflowDefinition::from_file(workflow_path)?;
    let elements = load_elements(input)?;

    let registry = StageRegistry::with_builtins();
    let pipeline = build_pipeline_with_config(&definition, &registry, &manager.config().pipeline)?;

    if once {
        return run_once(&pipeline, elements).await;
    }

    let scheduler = match &definition.schedule {
        Some(schedule) => Scheduler::from_config(pipeline, &schedule.to_config(), elements)?,
        None if manager.config().scheduler.cron.is_some() => {
            Scheduler::from_config(pipeline, &manager.config().scheduler, elements)?
        }
        None => bail!(
            "workflow '{}' has no schedule and no scheduler.cron is configured; use --once",
            definition.name
        ),
    };
    run_scheduled(scheduler).await
}

fn load_elements(input: Option<&Path>) -> anyhow::Result<Vec<Value>> {
    let Some(path) = input else {
        warn!("No --input given; running with an empty element list");
        return Ok(Vec::new());
    };

    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read input file {}", path.display()))?;
    let elements: Vec<Value> = serde_json::from_str(&contents)
        .with_context(|| format!("input file {} must hold a JSON array", path.display()))?;
    Ok(elements)
}

async fn run_once(pipeline: &Pipeline<Value>, elements: Vec<Value>) -> anyhow::Result<()> {
    let mut run = pipeline.call(elements, None);
    let mut batches = 0usize;

    while let Some(item) = run.next().await {
        let batch = item.with_context(|| format!("pipeline '{}' failed", pipeline.name()))?;
        println!("{}", serde_json::to_string(&batch)?);
        batches += 1;
    }

    info!(pipeline = %pipeline.name(), batches, "✅ CLI: Workflow run completed");
    Ok(())
}

async fn run_scheduled(scheduler: Scheduler<Value>) -> anyhow::Result<()> {
    scheduler.start()?;

    let state = tokio::select! {
        state = scheduler.wait() => state?,
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for Ctrl-C")?;
            info!("🛑 CLI: Interrupt received, stopping scheduler");
            scheduler.shutdown().await?
        }
    };

    let stats = scheduler.stats();
    println!("{}", serde_json::to_string(&stats)?);
    if state == SchedulerState::Exhausted && stats.failed > 0 {
        warn!(failed = stats.failed, "Some scheduled runs failed");
    }
    info!(state = %state, completed = stats.completed, "✅ CLI: Scheduler finished");
    Ok(())
}
