//! # FlowPilot — CRM Process Automation Server
//!
//! Drives tenant-defined sales processes: staged pipelines, scheduled
//! actions, approval queues, and multi-channel dispatch.
//!
//! Usage:
//!   flowpilot serve                      # Start engine + gateway
//!   flowpilot serve --config my.toml     # Custom config path
//!   flowpilot validate process.json      # Check a process definition
//!   flowpilot init-config                # Write a default config file

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use flowpilot_channels::ChannelExecutor;
use flowpilot_core::{EntityStore, FlowConfig, MemoryEntityStore};
use flowpilot_engine::{ActionStore, AutomationLog, ProcessEngine, spawn_sweep};
use flowpilot_process::ProcessDefinition;

#[derive(Parser)]
#[command(
    name = "flowpilot",
    version,
    about = "⚙️ FlowPilot — CRM Process Automation Engine"
)]
struct Cli {
    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the engine, sweep loop, and HTTP gateway
    Serve {
        /// Config file path (default: ~/.flowpilot/config.toml)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Validate a process definition JSON file
    Validate {
        /// Path to the definition file
        file: PathBuf,
    },
    /// Write a default config file and exit
    InitConfig {
        /// Target path (default: ~/.flowpilot/config.toml)
        #[arg(short, long)]
        path: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "flowpilot=debug,tower_http=debug"
    } else {
        "flowpilot=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    match cli.command {
        Command::Serve { config } => serve(config).await,
        Command::Validate { file } => validate(&file),
        Command::InitConfig { path } => init_config(path),
    }
}

async fn serve(config_path: Option<PathBuf>) -> Result<()> {
    let config_path = config_path.unwrap_or_else(FlowConfig::default_path);
    let config = FlowConfig::load(&config_path)?;

    let data_dir = config.resolved_data_dir();
    std::fs::create_dir_all(&data_dir)?;

    let store = Arc::new(ActionStore::open(&data_dir.join("actions.db"))?);
    let log = Arc::new(AutomationLog::open(&data_dir.join("automation_log.db"))?);
    let entities: Arc<dyn EntityStore> = Arc::new(MemoryEntityStore::new());
    let executor = Arc::new(ChannelExecutor::new(
        config.channels.clone(),
        entities.clone(),
    ));
    let engine = Arc::new(ProcessEngine::new(store, log, executor, entities));

    tracing::info!("⚙️ FlowPilot starting (data dir: {})", data_dir.display());

    let sweep_engine = engine.clone();
    let sweep = config.sweep.clone();
    tokio::spawn(async move {
        spawn_sweep(sweep_engine, sweep.interval_secs, sweep.batch_size).await;
    });

    if config.gateway.enabled {
        flowpilot_gateway::start(&config.gateway, engine).await?;
    } else {
        tracing::info!("Gateway disabled; engine running headless. Ctrl-C to stop.");
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}

fn validate(file: &PathBuf) -> Result<()> {
    let content = std::fs::read_to_string(file)?;
    let def: ProcessDefinition = serde_json::from_str(&content)?;
    def.validate()?;

    println!("✅ '{}' is valid ({} stages):", def.name, def.stage_count());
    for (i, stage) in def.stages.iter().enumerate() {
        println!(
            "   {}. {} [{}] → {}{}",
            i + 1,
            stage.name,
            stage.category.as_str(),
            stage.action.action_type.as_str(),
            if stage.requires_approval {
                " (requires approval)"
            } else {
                ""
            }
        );
    }
    Ok(())
}

fn init_config(path: Option<PathBuf>) -> Result<()> {
    let path = path.unwrap_or_else(FlowConfig::default_path);
    if path.exists() {
        println!("⚠️  Config already exists at {}", path.display());
        return Ok(());
    }
    FlowConfig::default().save(&path)?;
    println!("✅ Default config written to {}", path.display());
    Ok(())
}
