//! Envelope gateway.
//!
//! # Architecture Overview
//!
//! ```text
//!                     ┌──────────────────────────────────────────────────┐
//!                     │                 ENVELOPE GATEWAY                  │
//!                     │                                                   │
//!  Client Request     │  ┌─────────┐   ┌────────────┐   ┌─────────────┐  │
//!  ───────────────────┼─▶│   net   │──▶│ request id │──▶│ interceptor │  │
//!                     │  │listener │   │   layers   │   │  (buffer)   │  │
//!                     │  └─────────┘   └────────────┘   └──────┬──────┘  │
//!                     │                                        │         │
//!                     │                                        ▼         │
//!                     │                                 ┌─────────────┐  │
//!                     │                                 │   router    │──┼──▶ Upstream
//!                     │                                 │ /health, *  │◀─┼─── service
//!                     │                                 └──────┬──────┘  │
//!                     │                                        │         │
//!  Client Response    │              ┌─────────────┐           │         │
//!  ◀──────────────────┼──────────────│ disposition │◀──────────┘         │
//!                     │              │ pass / wrap │                     │
//!                     │              └─────────────┘                     │
//!                     └──────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;

use envelope_gateway::config::{load_config, validate_config, ConfigError, GatewayConfig};
use envelope_gateway::lifecycle::startup;
use envelope_gateway::observability::logging;

#[derive(Parser)]
#[command(name = "envelope-gateway")]
#[command(about = "HTTP gateway that normalizes responses into a uniform envelope", long_about = None)]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override listener.bind_address.
    #[arg(short, long)]
    bind: Option<String>,

    /// Override upstream.address.
    #[arg(short, long)]
    upstream: Option<String>,
}

impl Cli {
    fn resolve_config(&self) -> Result<GatewayConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => load_config(path)?,
            None => GatewayConfig::default(),
        };

        if let Some(bind) = &self.bind {
            config.listener.bind_address = bind.clone();
        }
        if let Some(upstream) = &self.upstream {
            config.upstream.address = Some(upstream.clone());
        }

        validate_config(&config).map_err(ConfigError::Validation)?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = cli.resolve_config()?;

    logging::init(&config.observability)?;

    tracing::info!("envelope-gateway v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bind_address = %config.listener.bind_address,
        max_connections = config.listener.max_connections,
        upstream = config.upstream.address.as_deref().unwrap_or("none"),
        request_timeout_secs = config.timeouts.request_secs,
        "Configuration loaded"
    );

    startup::run(config).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
