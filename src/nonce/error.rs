//! Nonce subsystem errors.

use thiserror::Error;

use crate::blockchain::BlockchainError;
use crate::storage::StorageError;

#[derive(Debug, Error)]
pub enum NonceError {
    /// Invalid TTL settings. Fatal to the coordinator instance.
    #[error("nonce coordinator configuration error: {0}")]
    Config(String),

    /// Operation invoked before `init` completed. Call `init` and retry.
    #[error("{operation} called before the nonce coordinator was initialized")]
    NotReady { operation: &'static str },

    /// An address that cannot be used as a store key.
    #[error("invalid address '{address}': {reason}")]
    InvalidAddress { address: String, reason: &'static str },

    /// A commit that would not move the confirmed nonce forward.
    #[error("invalid nonce: used nonce {used} is not greater than current nonce {current}")]
    InvalidNonce { used: i64, current: i64 },

    /// The ledger oracle could not be queried.
    #[error("ledger oracle error: {0}")]
    Oracle(#[from] BlockchainError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl NonceError {
    /// Whether the caller may retry the same call later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, NonceError::NotReady { .. } | NonceError::Oracle(_))
    }
}

pub type NonceResult<T> = Result<T, NonceError>;
