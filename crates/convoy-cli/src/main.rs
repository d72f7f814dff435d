use async_trait::async_trait;
use clap::{Parser, Subcommand};
use convoy_agent::TokenUsage;
use convoy_core::ConvoyResult;
use convoy_orchestrator::{
    default_analysis, default_plan, read_jsonl, AgentInvoker, ConvoyConfig, InvocationOutput,
    InvocationRequest, JsonLinesSink, MissionStore, Orchestrator, StaticPlanner,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "convoy", about = "Convoy: multi-agent mission orchestrator")]
struct Cli {
    /// Path to a convoy.toml config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the role registry as JSON
    Roles,
    /// Print the model catalog
    Models,
    /// Run a mission with a dry-run invoker
    Run {
        /// JSON array of plan items (defaults to the built-in four-step plan)
        #[arg(long)]
        plan: Option<PathBuf>,
        /// Append mission events to this JSON Lines file
        #[arg(long)]
        events: Option<PathBuf>,
        /// Force sequential dispatch
        #[arg(long)]
        sequential: bool,
        /// The mission request
        request: String,
    },
    /// Rebuild a mission snapshot from an event log
    Replay {
        /// JSON Lines event log
        path: PathBuf,
    },
}

/// Echoes each task's instruction back as its artifact.
struct EchoInvoker;

#[async_trait]
impl AgentInvoker for EchoInvoker {
    async fn invoke(&self, request: InvocationRequest) -> ConvoyResult<InvocationOutput> {
        let content = format!(
            "[dry-run {} via {}]\n{}",
            request.config.role,
            request.config.model.id,
            request.instruction()
        );
        // Rough token estimate of four characters per token.
        let usage = TokenUsage::new(
            (request.render_context().len() / 4) as u64,
            (content.len() / 4) as u64,
        );
        Ok(InvocationOutput::text(content).with_usage(usage))
    }
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

    let config = match &cli.config {
        Some(path) => ConvoyConfig::load(path)
            .map_err(|e| anyhow::anyhow!("Failed to load config '{}': {e}", path.display()))?,
        None => ConvoyConfig::default(),
    };

    match cli.command {
        Commands::Roles => {
            let pool = config.build_pool(Arc::new(EchoInvoker))?;
            println!("{}", serde_json::to_string_pretty(&pool.list_configs())?);
        }
        Commands::Models => {
            let catalog = config.catalog();
            println!("Models:");
            for model in catalog.models() {
                println!(
                    "  {:<28} {:<10} in ${:.3}/M  out ${:.3}/M  ctx {}",
                    model.id,
                    model.provider,
                    model.input_price,
                    model.output_price,
                    model.context_window
                );
            }
            println!("\nTotal: {} model(s)", catalog.len());
        }
        Commands::Run {
            plan,
            events,
            sequential,
            request,
        } => {
            let planner = match &plan {
                Some(path) => {
                    let text = std::fs::read_to_string(path).map_err(|e| {
                        anyhow::anyhow!("Failed to read plan '{}': {e}", path.display())
                    })?;
                    StaticPlanner::from_json(&text)?
                }
                None => StaticPlanner::new(default_plan(&request)).with_analysis(default_analysis()),
            };

            let pool = Arc::new(config.build_pool(Arc::new(EchoInvoker))?);
            let mut orchestrator = Orchestrator::new(pool, Arc::new(planner));
            if let Some(path) = &events {
                orchestrator = orchestrator.with_sink(Arc::new(JsonLinesSink::create(path)?));
                info!(path = %path.display(), "Recording mission events");
            }

            let mut options = config.mission_options();
            if sequential {
                options = options.sequential();
            }

            let snapshot = orchestrator.run_mission(request, options).await;
            info!(
                mission_id = %snapshot.mission.id,
                status = %snapshot.mission.status,
                done = snapshot.counts.done,
                failed = snapshot.counts.failed,
                skipped = snapshot.counts.skipped,
                "Mission finished"
            );
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }
        Commands::Replay { path } => {
            let events = read_jsonl(&path)?;
            let store = MissionStore::replay(events)?;
            eprintln!("{}", store.scheduler().visualize());
            println!("{}", serde_json::to_string_pretty(&store.snapshot())?);
        }
    }

    Ok(())
}
