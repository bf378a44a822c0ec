//! # Murmur Server
//!
//! Real-time chat notification server.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! murmur
//!
//! # Run with a config file
//! MURMUR_CONFIG=/path/to/murmur.toml murmur
//!
//! # Run with environment variables
//! MURMUR_PORT=5000 MURMUR_HOST=0.0.0.0 murmur
//! ```
//!
//! ## Endpoints
//!
//! - `GET /stream` - Server-Sent Events stream of new messages
//! - `POST /send_message` - Store a message and notify every stream
//! - `GET /messages`, `GET /users`, `GET /health`

mod config;
mod handlers;
mod metrics;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "murmur_server=debug,murmur_core=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = config::Config::load()?;

    tracing::info!("Starting Murmur server on {}:{}", config.host, config.port);

    // Initialize metrics
    metrics::init_metrics();

    // Start the server
    handlers::run_server(config).await?;

    Ok(())
}
