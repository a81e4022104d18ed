//! Periodic nonce reconciliation.
//!
//! # Responsibilities
//! - Re-check confirmed nonces against the ledger on a fixed interval
//! - Keep going when one chain's oracle is down

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time;

use crate::nonce::NonceCoordinator;

pub struct Reconciler {
    coordinators: Vec<Arc<NonceCoordinator>>,
    interval: Duration,
}

impl Reconciler {
    pub fn new(coordinators: Vec<Arc<NonceCoordinator>>, interval: Duration) -> Self {
        Self {
            coordinators,
            interval,
        }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(
            interval_secs = self.interval.as_secs(),
            chains = self.coordinators.len(),
            "Nonce reconciler starting"
        );

        let mut ticker = time::interval(self.interval);
        // The first tick fires immediately; init already reconciled.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.run_once().await;
                }
                _ = shutdown.recv() => {
                    tracing::info!("Nonce reconciler received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// One pass over every coordinator. Returns how many reconciliations
    /// failed; a chain that could not be swept at all counts once.
    pub async fn run_once(&self) -> usize {
        let mut failures = 0;
        for coordinator in &self.coordinators {
            match coordinator.reconcile_all().await {
                Ok(summary) if summary.failed == 0 => {
                    tracing::debug!(scope = %coordinator.scope(), addresses = summary.addresses, "Reconciliation pass complete");
                }
                Ok(summary) => {
                    failures += summary.failed;
                    tracing::warn!(
                        scope = %coordinator.scope(),
                        addresses = summary.addresses,
                        failed = summary.failed,
                        "Reconciliation pass incomplete"
                    );
                }
                Err(e) => {
                    failures += 1;
                    tracing::warn!(scope = %coordinator.scope(), error = %e, "Reconciliation pass failed");
                }
            }
        }
        failures
    }
}
