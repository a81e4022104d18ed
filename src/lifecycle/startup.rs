//! Startup wiring.
//!
//! # Responsibilities
//! - Open one shared store per distinct storage path
//! - Build and initialize one nonce coordinator per configured chain
//! - Hold the gateway's ownership of every coordinator until shutdown

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use thiserror::Error;

use crate::blockchain::{BlockchainClient, BlockchainError, LedgerOracle};
use crate::config::GatewayConfig;
use crate::nonce::{ChainScope, Clock, NonceCoordinator, NonceError, SystemClock};
use crate::storage::{FileStore, KeyValueStore, OwnerHandle, SharedRegistry};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("blockchain client for '{chain}' failed: {source}")]
    Blockchain {
        chain: String,
        #[source]
        source: BlockchainError,
    },

    #[error("nonce coordinator for '{chain}' failed to initialize: {source}")]
    Nonce {
        chain: String,
        #[source]
        source: NonceError,
    },

    #[error("no ledger oracle supplied for chain '{0}'")]
    MissingOracle(String),
}

/// Every running coordinator plus the stores they share.
pub struct Gateway {
    stores: SharedRegistry<dyn KeyValueStore>,
    coordinators: BTreeMap<String, Arc<NonceCoordinator>>,
    handle: OwnerHandle,
}

impl Gateway {
    /// Connect to every configured chain and bring its coordinator up.
    pub async fn start(config: &GatewayConfig) -> Result<Self, StartupError> {
        let mut oracles: HashMap<String, Arc<dyn LedgerOracle>> = HashMap::new();
        for chain in &config.chains {
            let client = BlockchainClient::new(chain.clone())
                .await
                .map_err(|source| StartupError::Blockchain {
                    chain: chain.name.clone(),
                    source,
                })?;
            oracles.insert(chain.name.clone(), Arc::new(client));
        }
        Self::assemble(config, oracles, Arc::new(SystemClock)).await
    }

    /// Build coordinators against caller-supplied oracles.
    ///
    /// Chains configured with the same `db_path` share one store instance.
    pub async fn assemble(
        config: &GatewayConfig,
        mut oracles: HashMap<String, Arc<dyn LedgerOracle>>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, StartupError> {
        if let Some(chain) = config.chains.iter().find(|c| !oracles.contains_key(&c.name)) {
            return Err(StartupError::MissingOracle(chain.name.clone()));
        }

        let mut gateway = Self {
            stores: SharedRegistry::new(),
            coordinators: BTreeMap::new(),
            handle: OwnerHandle::new(),
        };

        for chain in &config.chains {
            let Some(oracle) = oracles.remove(&chain.name) else {
                return Err(StartupError::MissingOracle(chain.name.clone()));
            };

            let db_path = config.storage.db_path.clone();
            let store = gateway.stores.acquire(db_path.clone(), || {
                Arc::new(FileStore::new(db_path)) as Arc<dyn KeyValueStore>
            });

            let coordinator = Arc::new(NonceCoordinator::with_clock(
                ChainScope::new(chain.name.clone(), chain.chain_id),
                store,
                config.nonce.ttls(),
                clock.clone(),
            ));
            coordinator.declare_ownership(gateway.handle);
            // Register before init so a failure below still closes it.
            gateway.coordinators.insert(chain.name.clone(), coordinator.clone());

            if let Err(source) = coordinator.init(oracle).await {
                gateway.close();
                return Err(StartupError::Nonce {
                    chain: chain.name.clone(),
                    source,
                });
            }
        }

        tracing::info!(
            chains = gateway.coordinators.len(),
            stores = gateway.stores.len(),
            "Gateway started"
        );
        Ok(gateway)
    }

    pub fn coordinator(&self, chain: &str) -> Option<Arc<NonceCoordinator>> {
        self.coordinators.get(chain).cloned()
    }

    pub fn coordinators(&self) -> Vec<Arc<NonceCoordinator>> {
        self.coordinators.values().cloned().collect()
    }

    pub fn stores(&self) -> &SharedRegistry<dyn KeyValueStore> {
        &self.stores
    }

    /// Give up the gateway's ownership of every coordinator.
    ///
    /// Safe to call more than once.
    pub fn close(&self) {
        for (chain, coordinator) in &self.coordinators {
            if let Err(e) = coordinator.close(&self.handle) {
                tracing::error!(chain = %chain, error = %e, "Failed to close nonce coordinator");
            }
        }
    }
}
