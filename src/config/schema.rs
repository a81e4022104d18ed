//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

use crate::nonce::NonceTtls;

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Durable nonce storage.
    pub storage: StorageConfig,

    /// Nonce coordination settings shared by every chain.
    pub nonce: NonceConfig,

    /// Chains to coordinate nonces for.
    pub chains: Vec<ChainConfig>,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Storage configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path of the nonce database file. Chains configured with the same path
    /// share one store.
    pub db_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: "db/nonces.json".to_string(),
        }
    }
}

/// Nonce coordination configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NonceConfig {
    /// How long a confirmed nonce is trusted before re-reading it from the
    /// node, in milliseconds.
    pub local_nonce_ttl_ms: i64,

    /// How long a handed-out nonce may stay uncommitted before its slot is
    /// reused, in milliseconds.
    pub pending_nonce_ttl_ms: i64,

    /// Interval of the background reconciliation pass, in seconds.
    pub reconcile_interval_secs: u64,
}

impl NonceConfig {
    pub fn ttls(&self) -> NonceTtls {
        NonceTtls::new(self.local_nonce_ttl_ms, self.pending_nonce_ttl_ms)
    }
}

impl Default for NonceConfig {
    fn default() -> Self {
        Self {
            local_nonce_ttl_ms: 300_000,
            pending_nonce_ttl_ms: 300_000,
            reconcile_interval_secs: 60,
        }
    }
}

/// Per-chain configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ChainConfig {
    /// Chain name, used in storage keys, logs and metric labels.
    pub name: String,

    /// JSON-RPC endpoint URL.
    pub rpc_url: String,

    /// Failover JSON-RPC endpoint URLs.
    pub failover_urls: Vec<String>,

    /// Chain ID (e.g., 1 for Ethereum mainnet, 31337 for local Anvil).
    pub chain_id: u64,

    /// RPC request timeout in seconds.
    pub rpc_timeout_secs: u64,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            name: "ethereum".to_string(),
            rpc_url: "http://localhost:8545".to_string(),
            failover_urls: Vec::new(),
            chain_id: 1,
            rpc_timeout_secs: 10,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format: "pretty" or "json".
    pub log_format: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
