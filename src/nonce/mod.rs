//! Nonce coordination subsystem.
//!
//! # Data Flow
//! ```text
//! caller asks for a nonce
//!     → coordinator.rs (in-memory confirmed + pending state)
//!     → if the confirmed record expired: LedgerOracle (transaction count - 1)
//!     → nonce handed out, pending queue written through store.rs
//! caller dispatches the transaction
//!     → commit_nonce (confirmed record advanced, pending pruned)
//! ```
//!
//! # Invariants
//! - A pending queue is contiguous and starts right after the confirmed nonce
//! - Nothing at or below the ledger's confirmed nonce stays pending
//! - Commits only move forward; `reset_nonce` is the explicit way back

pub mod clock;
pub mod coordinator;
pub mod error;
pub mod store;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use coordinator::NonceCoordinator;
pub use error::{NonceError, NonceResult};
pub use store::{ChainScope, NonceStore};
pub use types::{CoordinatorPhase, NonceInfo, NonceTtls, ReconcileSummary};
