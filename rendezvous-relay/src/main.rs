//! rendezvous-relay binary entry point.
//!
//! Usage:
//! ```bash
//! rendezvous-relay                      # listen on 0.0.0.0:3000
//! rendezvous-relay 127.0.0.1:4000
//! rendezvous-relay --config relay.toml
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use rendezvous_relay::{RelayConfig, RelayServer};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Rendezvous relay: discovery and message routing for rendezvous clients.
#[derive(Parser, Debug)]
#[command(name = "rendezvous-relay")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Listen address, overrides `server.bind_address`
    listen: Option<String>,

    /// TOML configuration file
    #[arg(long, short)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => RelayConfig::from_file(path)?,
        None => RelayConfig::default(),
    };
    if let Some(listen) = cli.listen {
        config.server.bind_address = listen;
    }

    let bind_address = config.server.bind_address.clone();
    let server = RelayServer::bind(config)
        .await
        .with_context(|| format!("Failed to bind {}", bind_address))?;

    server
        .serve_with_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for ctrl-c: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await?;

    Ok(())
}
