//! JSON-RPC client used as the ledger oracle.
//!
//! One alloy HTTP provider per configured URL, tried in order. Every call is
//! bounded by the chain's RPC timeout; the first provider that answers wins.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::Address;
use alloy::providers::{Provider, ProviderBuilder};
use async_trait::async_trait;
use tokio::time::timeout;

use crate::blockchain::oracle::LedgerOracle;
use crate::blockchain::types::{BlockchainError, BlockchainResult, ChainConfig, ChainId};

type DynProvider = Arc<dyn Provider + Send + Sync>;

#[derive(Clone)]
pub struct BlockchainClient {
    /// Primary first, then failovers.
    providers: Vec<DynProvider>,
    config: ChainConfig,
    call_timeout: Duration,
}

impl BlockchainClient {
    /// Build providers for `config` and check the node's chain id.
    ///
    /// Only a malformed primary URL is fatal. An unreachable node or a chain id
    /// mismatch is logged; nonce calls will surface the problem later.
    pub async fn new(config: ChainConfig) -> BlockchainResult<Self> {
        let primary: url::Url = config.rpc_url.parse().map_err(|e| {
            BlockchainError::Rpc(format!("Invalid RPC URL '{}': {}", config.rpc_url, e))
        })?;

        let mut providers: Vec<DynProvider> = vec![Arc::new(ProviderBuilder::new().connect_http(primary))];
        for raw in &config.failover_urls {
            match raw.parse::<url::Url>() {
                Ok(url) => providers.push(Arc::new(ProviderBuilder::new().connect_http(url))),
                Err(e) => tracing::warn!(chain = %config.name, url = %raw, error = %e, "Ignoring invalid failover RPC URL"),
            }
        }

        let client = Self {
            providers,
            call_timeout: Duration::from_secs(config.rpc_timeout_secs),
            config,
        };

        match client.verify_chain_id().await {
            Ok(()) => tracing::info!(
                chain = %client.config.name,
                chain_id = client.config.chain_id,
                providers = client.providers.len(),
                "Ledger oracle connected"
            ),
            Err(e) => tracing::warn!(
                chain = %client.config.name,
                error = %e,
                "Ledger oracle created without a verified chain id"
            ),
        }
        Ok(client)
    }

    /// Fail unless the node reports the configured chain id.
    pub async fn verify_chain_id(&self) -> BlockchainResult<()> {
        let actual = self.get_chain_id().await?;
        if actual.0 != self.config.chain_id {
            return Err(BlockchainError::ChainMismatch {
                expected: self.config.chain_id,
                actual: actual.0,
            });
        }
        Ok(())
    }

    pub async fn get_chain_id(&self) -> BlockchainResult<ChainId> {
        self.first_answer("eth_chainId", |provider| async move { provider.get_chain_id().await })
            .await
            .map(ChainId)
    }

    /// Confirmed (mined) transaction count of `address`.
    pub async fn get_transaction_count(&self, address: Address) -> BlockchainResult<u64> {
        self.first_answer("eth_getTransactionCount", move |provider| async move {
            provider.get_transaction_count(address).await
        })
        .await
    }

    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    /// Run `call` against each provider in turn until one answers in time.
    async fn first_answer<T, E, F, Fut>(&self, method: &'static str, call: F) -> BlockchainResult<T>
    where
        E: Display,
        F: Fn(DynProvider) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut timeouts = 0;
        for (idx, provider) in self.providers.iter().enumerate() {
            match timeout(self.call_timeout, call(provider.clone())).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) => {
                    tracing::warn!(chain = %self.config.name, provider_idx = idx, method, error = %e, "RPC call failed");
                }
                Err(_) => {
                    timeouts += 1;
                    tracing::warn!(chain = %self.config.name, provider_idx = idx, method, "RPC call timed out");
                }
            }
        }

        if timeouts == self.providers.len() {
            Err(BlockchainError::Timeout(self.config.rpc_timeout_secs))
        } else {
            Err(BlockchainError::Rpc(format!("every provider failed {}", method)))
        }
    }
}

#[async_trait]
impl LedgerOracle for BlockchainClient {
    async fn confirmed_transaction_count(&self, address: &str) -> BlockchainResult<u64> {
        let parsed: Address = address.parse().map_err(|e| BlockchainError::InvalidAddress {
            address: address.to_string(),
            reason: format!("{}", e),
        })?;
        self.get_transaction_count(parsed).await
    }
}

impl std::fmt::Debug for BlockchainClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockchainClient")
            .field("chain", &self.config.name)
            .field("rpc_url", &self.config.rpc_url)
            .field("chain_id", &self.config.chain_id)
            .field("timeout_secs", &self.config.rpc_timeout_secs)
            .finish()
    }
}
