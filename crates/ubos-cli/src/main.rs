//! `ubos` binary: run, validate and inspect orchestration plans.

use clap::{Parser, Subcommand};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use ubos_bus::MessageBus;
use ubos_core::OrchestrationPlan;
use ubos_orchestrator::{
    ExecutionCoordinator, ExecutionOptions, Orchestrator, RunStore, UbosConfig,
};

#[derive(Parser)]
#[command(name = "ubos", about = "UBOS — agent orchestration substrate")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "ubos.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a plan
    Run {
        /// Plan JSON file
        #[arg(long)]
        plan: PathBuf,
        /// JSON object mapping requirement ids to input text
        #[arg(long)]
        inputs: Option<PathBuf>,
        /// Produce placeholder results without calling any agent collaborator
        #[arg(long)]
        dry_run: bool,
        /// Requirements in flight at once
        #[arg(long)]
        concurrency: Option<usize>,
        /// Upper bound per agent invocation
        #[arg(long)]
        timeout_ms: Option<u64>,
        /// Project charged for resource slots
        #[arg(long)]
        project: Option<String>,
        /// Dispatch agents through the in-process message bus
        #[arg(long)]
        bus: bool,
    },
    /// List saved runs and print the latest summary
    History,
    /// Check a plan's structural invariants
    Validate {
        /// Plan JSON file
        #[arg(long)]
        plan: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .json()
        .init();

    let cli = Cli::parse();

    let config = UbosConfig::load(&cli.config).await?.with_env_overrides()?;

    match cli.command {
        Commands::Run {
            plan,
            inputs,
            dry_run,
            concurrency,
            timeout_ms,
            project,
            bus,
        } => {
            let plan = read_plan(&plan).await?;
            let inputs = match inputs {
                Some(path) => read_inputs(&path).await?,
                None => HashMap::new(),
            };
            let options = run_options(&config, dry_run, concurrency, timeout_ms, project);

            let resources = config.build_resources().await;
            // Projects without a configured limit get the run's concurrency.
            if !config.resources.projects.contains_key(options.project()) {
                let limit = u32::try_from(options.effective_concurrency(&plan)).unwrap_or(u32::MAX);
                resources.configure_project(options.project(), limit);
            }

            let mut coordinator = ExecutionCoordinator::new(Arc::new(config.build_factory()?))
                .with_resources(Arc::clone(&resources))
                .with_working_dir(std::env::current_dir()?);
            if bus {
                coordinator = coordinator.with_bus(MessageBus::new());
            }

            let orchestrator = Orchestrator::new(coordinator)
                .with_run_store(RunStore::new(&config.data_dir));

            info!(task = %plan.task.task_id, dry_run = options.dry_run, "Starting run");
            let outcome = orchestrator.execute(&plan, &inputs, &options).await?;

            println!("{}", outcome.summary);
            if resources.over_budget() {
                warn!(
                    spent_usd = resources.today_cost_usd(),
                    budget_usd = resources.daily_budget_usd(),
                    "Daily budget exceeded"
                );
            }
            if !outcome.success {
                std::process::exit(1);
            }
        }
        Commands::History => {
            let history = RunStore::new(&config.data_dir).history().await?;
            if history.files.is_empty() {
                println!("No runs in {}", config.data_dir.display());
                return Ok(());
            }
            println!("Runs:");
            for file in &history.files {
                println!("  {}", file.display());
            }
            if let Some(latest) = history.latest {
                println!(
                    "\nLatest: {} ({})\n{}",
                    latest.task_id,
                    if latest.success { "success" } else { "failed" },
                    latest.summary
                );
            }
        }
        Commands::Validate { plan } => {
            let plan = read_plan(&plan).await?;
            plan.validate()?;
            println!(
                "Plan '{}' is valid: {} requirement(s), {} agent spec(s), {} batch(es)",
                plan.task.task_id,
                plan.scheduled_count(),
                plan.agent_specs.len(),
                plan.parallel_batches.len()
            );
        }
    }

    Ok(())
}

async fn read_plan(path: &Path) -> anyhow::Result<OrchestrationPlan> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to read plan '{}': {}", path.display(), e))?;
    serde_json::from_str(&content)
        .map_err(|e| anyhow::anyhow!("Invalid plan '{}': {}", path.display(), e))
}

async fn read_inputs(path: &Path) -> anyhow::Result<HashMap<String, String>> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to read inputs '{}': {}", path.display(), e))?;
    serde_json::from_str(&content).map_err(|e| {
        anyhow::anyhow!(
            "Inputs '{}' must be a JSON object of strings: {}",
            path.display(),
            e
        )
    })
}

/// Config defaults overridden by command-line flags.
fn run_options(
    config: &UbosConfig,
    dry_run: bool,
    concurrency: Option<usize>,
    timeout_ms: Option<u64>,
    project: Option<String>,
) -> ExecutionOptions {
    let mut options = config.execution_options();
    options.dry_run |= dry_run;
    if concurrency.is_some() {
        options.concurrency = concurrency;
    }
    if timeout_ms.is_some() {
        options.timeout_ms = timeout_ms;
    }
    if project.is_some() {
        options.project = project;
    }
    options
}
