//! Inspector Relay CLI - replays webhook inspector events locally.
//!
//! This is the main binary entry point. See the `inspector_relay`
//! library for the core functionality.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use inspector_relay::{constants, Config, RelaySettings, Supervisor};
use mimalloc::MiMalloc;
use tokio_util::sync::CancellationToken;

/// Global allocator configured per M-MIMALLOC-APPS guideline.
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

// CLI
#[derive(Parser)]
#[command(name = "inspector-relay")]
#[command(version)]
#[command(about = "Replay webhook inspector events against a local endpoint")]
struct Cli {
    /// Path to the configuration file (created on first run)
    #[arg(long, default_value = constants::CONFIG_FILE_NAME)]
    config: PathBuf,

    /// Event stream URL (`ws://`, `wss://`, or `http(s)://`)
    #[arg(long)]
    ws_url: Option<String>,

    /// Give up on a replay after this many seconds (default: wait forever)
    #[arg(long)]
    forward_timeout_secs: Option<u64>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    println!("=== Webhook Inspector Client ===");

    // Config is collected before the runtime starts so prompts can block on stdin
    let mut config = Config::load_or_prompt(&cli.config)?;
    config.apply_env_overrides();
    config.validate()?;

    let mut settings = RelaySettings::default().with_env_overrides();
    if let Some(url) = cli.ws_url.as_deref() {
        settings = settings.with_ws_url(url);
    }
    settings.forward_timeout = cli.forward_timeout_secs.map(Duration::from_secs);

    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    runtime.block_on(run(config, settings))
}

async fn run(config: Config, settings: RelaySettings) -> Result<()> {
    let shutdown = CancellationToken::new();

    // Ctrl+C and SIGTERM both arm the same token; repeats are no-ops
    let trigger = shutdown.clone();
    ctrlc::set_handler(move || trigger.cancel()).context("Failed to install signal handler")?;

    println!("Connecting to WebSocket from Webhook Inspector...");
    let supervisor = Supervisor::new(config, settings)?;
    let handle = supervisor.spawn(shutdown.clone());

    shutdown.cancelled().await;
    println!("\nClosing connection...");

    if !handle.wait(constants::SHUTDOWN_GRACE).await {
        log::warn!("Exiting before the connection loop finished unwinding");
    }

    Ok(())
}
