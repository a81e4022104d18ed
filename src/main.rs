//! Blockchain transaction gateway
//!
//! Hands out transaction nonces for hot wallets on every configured chain.
//!
//! # Architecture Overview
//!
//! ```text
//!     config.toml ──▶ config ──▶ lifecycle::startup
//!                                      │
//!                  ┌───────────────────┼────────────────────┐
//!                  ▼                   ▼                    ▼
//!          ┌──────────────┐    ┌──────────────┐     ┌──────────────┐
//!          │  blockchain  │    │    nonce     │     │   storage    │
//!          │ RPC client   │◀───│ coordinator  │────▶│ shared store │
//!          │ (oracle)     │    │ (per chain)  │     │ (per path)   │
//!          └──────────────┘    └──────▲───────┘     └──────────────┘
//!                                     │
//!                          lifecycle::reconciler
//!                          (periodic ledger sync)
//!
//!     Cross-cutting: observability (tracing + Prometheus), lifecycle (signals/shutdown)
//! ```

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use chain_gateway::config::{load_config, GatewayConfig};
use chain_gateway::lifecycle::signals::wait_for_shutdown_signal;
use chain_gateway::lifecycle::{Gateway, Reconciler, Shutdown};
use chain_gateway::observability::{logging, metrics};

#[derive(Parser)]
#[command(name = "chain-gateway")]
#[command(about = "Nonce coordination service for blockchain hot wallets", long_about = None)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = if args.config.exists() {
        load_config(&args.config)?
    } else {
        GatewayConfig {
            chains: vec![Default::default()],
            ..Default::default()
        }
    };

    logging::init_logging(&config.observability)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %args.config.display(),
        chains = config.chains.len(),
        db_path = %config.storage.db_path,
        "chain-gateway starting"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let gateway = Gateway::start(&config).await?;

    let shutdown = Shutdown::new();
    let reconciler = Reconciler::new(
        gateway.coordinators(),
        Duration::from_secs(config.nonce.reconcile_interval_secs),
    );
    let reconciler_task = tokio::spawn(reconciler.run(shutdown.subscribe()));

    wait_for_shutdown_signal().await;
    shutdown.trigger();

    if let Err(e) = reconciler_task.await {
        tracing::error!(error = %e, "Reconciler task ended abnormally");
    }
    gateway.close();

    tracing::info!("Shutdown complete");
    Ok(())
}
