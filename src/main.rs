use anyhow::{Context, Result};
use clap::Parser;
use fleet_backend::fleet::initiate_links;
use fleet_backend::tasks::start_workers;
use fleet_backend::{FleetConfig, FleetController, FleetRegistry, InMemoryStore, Store};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "fleet-backend", version, about = "Fleet coordination backend for radio and simulated drones")]
struct Cli {
    /// TOML configuration file; every key is optional
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log filter, overrides the configured level
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => FleetConfig::load(path)?,
        None => FleetConfig::default(),
    };

    // RUST_LOG wins over the command line, which wins over the config file
    let level = cli.log_level.as_deref().unwrap_or(&config.log_level);
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(level).context("invalid log filter")?,
    };
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    info!("Fleet backend starting");
    info!("  Argos drones: {:?}", config.argos.addresses());
    info!("  Crazyflie radios: {:?}", config.crazyflie.uris);

    let registry = FleetRegistry::new();
    let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
    start_workers(&registry, store.clone(), &config).await?;

    let registered = initiate_links(&registry, &config).await;
    info!(registered, "Fleet ready");

    // Handed to the router, which owns the request surface
    let _controller = FleetController::new(registry.clone(), store, config);

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("Received SIGINT, shutting down");

    registry.terminate_all().await;
    info!("Fleet backend stopped");
    Ok(())
}
