//! The remote ledger as seen by the nonce subsystem.

use async_trait::async_trait;

use crate::blockchain::types::BlockchainResult;

/// Source of truth for how many transactions an address has had confirmed.
///
/// Only consulted to re-anchor local state. Implementations may fail with a
/// transient network error and must not retry internally.
#[async_trait]
pub trait LedgerOracle: Send + Sync {
    async fn confirmed_transaction_count(&self, address: &str) -> BlockchainResult<u64>;
}
