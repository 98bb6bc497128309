//! # sockit server
//!
//! Websocket front end for the sockit room mesh.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings (or ./sockit.toml if present)
//! sockit
//!
//! # Run with a specific config file
//! sockit /path/to/sockit.toml
//!
//! # Override individual settings
//! SOCKIT__PORT=9000 SOCKIT__MESH__NAME=chess sockit
//! ```

mod config;
mod handlers;
mod metrics;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sockit=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => config::Config::from_file(path)?,
        None => config::Config::load()?,
    };

    tracing::info!(
        mesh = %config.mesh.name,
        "Starting sockit server on {}:{}",
        config.host,
        config.port
    );

    metrics::init_metrics();

    handlers::run_server(config).await?;

    Ok(())
}
