//! Blockchain integration subsystem.
//!
//! # Data Flow
//! ```text
//! ChainConfig (RPC URL, failovers, chain id)
//!     → client.rs (alloy HTTP providers with timeouts and failover)
//!     → oracle.rs (LedgerOracle: confirmed transaction count per address)
//!     → nonce::coordinator (re-anchors local nonce state)
//! ```
//!
//! # Constraints
//! - All RPC calls have configurable timeouts
//! - Graceful degradation when blockchain unreachable
//! - The oracle never retries on its own; retry policy belongs to the caller

pub mod client;
pub mod oracle;
pub mod types;

pub use client::BlockchainClient;
pub use oracle::LedgerOracle;
pub use types::{BlockchainError, BlockchainResult, ChainConfig, ChainId};
