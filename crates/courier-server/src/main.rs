//! Courier server binary.

mod config;
mod handlers;
mod metrics;
mod ws;

use anyhow::Result;
use config::Config;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "courier=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Courier server v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::load()?;
    info!("Configuration loaded: {}:{}", config.host, config.port);

    metrics::init_metrics();

    handlers::run_server(config).await?;

    Ok(())
}
