use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;

use config::PulseConfig;
use pulse_channels::{Notifier, build_notifier, connect_notifier};
use pulse_core::{ClaudeCliEngine, Executor, HeartbeatOutcome};
use pulse_scheduler::HeartbeatScheduler;

#[derive(Parser)]
#[command(name = "pulse")]
#[command(version)]
#[command(about = "pulse - scheduled heartbeats for autonomous agents")]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize config directory, default config and a starter checklist
    Init,

    /// Show current configuration (secrets masked)
    Config,

    /// Run the heartbeat scheduler until Ctrl+C
    Start,

    /// Run one heartbeat for an agent right now
    Beat {
        /// Agent id from the config
        agent_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let filter = if cli.debug { "debug" } else { "info" };
    let env_filter = if cli.debug {
        EnvFilter::new(filter)
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter))
    };
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    match cli.command {
        Commands::Init => cmd_init().await,
        Commands::Config => cmd_config(&cli.config).await,
        Commands::Start => cmd_start(&cli.config).await,
        Commands::Beat { agent_id } => cmd_beat(&cli.config, &agent_id).await,
    }
}

async fn cmd_init() -> Result<()> {
    let config_dir = config::config_dir();
    tokio::fs::create_dir_all(&config_dir)
        .await
        .with_context(|| format!("Failed to create config dir: {}", config_dir.display()))?;

    let config_path = config_dir.join("config.toml");
    if config_path.exists() {
        warn!("Config already exists at {}", config_path.display());
    } else {
        let default_config = include_str!("../../../config/default.toml");
        tokio::fs::write(&config_path, default_config).await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&config_path, std::fs::Permissions::from_mode(0o600))
                .await?;
        }
        info!("Created default config at {}", config_path.display());
    }

    let workspace = config_dir.join("workspace");
    tokio::fs::create_dir_all(&workspace).await?;

    let checklist_path = workspace.join(pulse_core::checklist::DEFAULT_CHECKLIST_FILE);
    if pulse_core::checklist::ensure_checklist_file(&checklist_path).await? {
        info!("Created checklist at {}", checklist_path.display());
    }

    println!("pulse initialized at {}", config_dir.display());
    println!(
        "Edit {} to add agents, and {} to tell them what to check.",
        config_path.display(),
        checklist_path.display()
    );
    Ok(())
}

async fn cmd_config(config_path: &Option<PathBuf>) -> Result<()> {
    let cfg = PulseConfig::load(config_path)?;
    println!("{}", toml::to_string_pretty(&cfg.masked())?);
    Ok(())
}

/// Engine, executor and scheduler wired from config, delivering to `notifier`
fn build_scheduler(cfg: &PulseConfig, notifier: Arc<dyn Notifier>) -> Result<HeartbeatScheduler> {
    let engine = Arc::new(
        ClaudeCliEngine::new(config::shellexpand(&cfg.engine.claude_path))
            .with_model(cfg.engine.model.clone())
            .with_max_turns(cfg.engine.max_turns),
    );
    let executor = Arc::new(Executor::new(engine, cfg.heartbeat_settings()));

    HeartbeatScheduler::new(cfg.agent_configs()?, executor, notifier)
        .context("Failed to create heartbeat scheduler")
}

async fn cmd_start(config_path: &Option<PathBuf>) -> Result<()> {
    let cfg = PulseConfig::load(config_path)?;
    info!("Starting pulse...");

    // The scheduler starts the notifier itself
    let notifier = build_notifier(&cfg.notifications.slack.to_notifier_config());
    let scheduler = build_scheduler(&cfg, notifier)?;

    for agent in cfg.agent_configs()? {
        info!(
            "Agent {}: every {:?} in {}{}",
            agent.agent_id,
            agent.interval,
            agent.workspace.display(),
            agent
                .active_hours
                .map(|w| format!(" (active {})", w))
                .unwrap_or_default()
        );
    }

    scheduler.start().await;
    info!("Notifications go to the {} notifier", scheduler.notifier_name().await);

    // Wait for shutdown signal
    signal::ctrl_c().await?;
    info!("Received Ctrl+C, shutting down...");
    scheduler.stop().await;

    println!("pulse stopped.");
    Ok(())
}

async fn cmd_beat(config_path: &Option<PathBuf>, agent_id: &str) -> Result<()> {
    let cfg = PulseConfig::load(config_path)?;
    // Manual runs never start the scheduler, so connect the notifier here
    let notifier = connect_notifier(&cfg.notifications.slack.to_notifier_config()).await;
    let scheduler = build_scheduler(&cfg, notifier.clone())?;

    let result = scheduler.trigger_now(agent_id).await;
    if let Err(e) = notifier.stop().await {
        warn!("Failed to stop {} notifier: {}", notifier.name(), e);
    }
    let result = result?;

    let outcome = result.outcome();
    println!("{}: {}", agent_id, outcome);
    match outcome {
        HeartbeatOutcome::Notified => println!("\n{}", result.output),
        HeartbeatOutcome::Failed => {
            let error = result
                .error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown error".to_string());
            anyhow::bail!("Heartbeat for {} failed: {}", agent_id, error);
        }
        _ => {}
    }
    if let Some(token) = &result.session_token {
        println!("session: {}", token);
    }
    Ok(())
}
