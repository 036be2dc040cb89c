//! sigrelay - Entry Point

use anyhow::Result;
use clap::Parser;
use std::path::Path;
use tracing::{info, warn};

/// Trading-signal ingestion: classify, persist, broadcast.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via SIGRELAY_CONFIG env var)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // .env is optional
    let dotenv = dotenvy::dotenv().ok();

    let config_path = sigrelay_app::AppConfig::resolve_path(args.config);
    let mut config = sigrelay_app::AppConfig::load(&config_path)?;
    config.apply_env_overrides();

    sigrelay_telemetry::init_logging(&config.telemetry.log_filter)?;

    info!("Starting sigrelay v{}", env!("CARGO_PKG_VERSION"));
    if let Some(path) = dotenv {
        info!(path = %path.display(), "Loaded environment file");
    }
    if Path::new(&config_path).exists() {
        info!(config_path = %config_path, "Configuration loaded");
    } else {
        warn!(config_path = %config_path, "Config file not found, using defaults");
    }

    config.validate()?;
    info!(
        backend = ?config.storage.backend,
        batch_size = config.writer.batch_size,
        flush_interval_secs = config.writer.flush_interval_secs,
        max_subscribers = config.dashboard.max_subscribers,
        "Configuration validated"
    );

    sigrelay_app::Application::new(config).run().await?;

    Ok(())
}
