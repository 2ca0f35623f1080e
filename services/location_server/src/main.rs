//! Location server binary
//!
//! Usage:
//!   location-server --config config/location.toml
//!   location-server --config config/location.toml --env production

use anyhow::{Context, Result};
use clap::Parser;
use location_server::LocationNode;
use node_config::NodeConfig;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const STATS_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Parser, Debug)]
#[command(name = "location-server")]
#[command(about = "Locus location registry and actor host")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: PathBuf,

    /// Environment override file under <config dir>/environments/
    #[arg(short, long)]
    env: Option<String>,

    /// Log level, overrides [logging].level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Enable JSON logging format
    #[arg(long)]
    json_logs: bool,

    /// Print the resolved configuration and exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = NodeConfig::load(&args.config, args.env.as_deref())
        .with_context(|| format!("Failed to load configuration from {:?}", args.config))?;

    if args.print_config {
        println!("{}", config.to_toml_string()?);
        return Ok(());
    }

    init_logging(&args, &config)?;
    info!("Starting location server");
    info!("Configuration: {:?}", args.config);

    let node = LocationNode::start(config).await.map_err(|e| {
        error!("Failed to start node: {:#}", e);
        e
    })?;

    let stats = node.registry().cloned().map(|registry| {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(STATS_INTERVAL);
            interval.tick().await;
            loop {
                interval.tick().await;
                let stats = registry.stats();
                info!(records = stats.records, locked = stats.locked, "Registry stats");
            }
        })
    });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to install CTRL+C signal handler")?;
    info!("Received shutdown signal");

    if let Some(stats) = stats {
        stats.abort();
    }
    node.shutdown();
    Ok(())
}

fn init_logging(args: &Args, config: &NodeConfig) -> Result<()> {
    let level = args.log_level.as_deref().unwrap_or(&config.logging.level);
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .context("Invalid log level")?;

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    if args.json_logs || config.logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}
