//! Nonce records and coordinator settings.

use std::fmt;

use serde::Serialize;

/// A nonce together with the time it must be re-validated.
///
/// `nonce` is signed: an account that never sent a transaction has a
/// confirmed nonce of `-1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NonceInfo {
    pub nonce: i64,
    /// Unix milliseconds.
    pub expiry: i64,
}

impl NonceInfo {
    pub fn new(nonce: i64, expiry: i64) -> Self {
        Self { nonce, expiry }
    }

    /// True once `now` is past the expiry.
    pub fn is_expired(&self, now: i64) -> bool {
        now > self.expiry
    }
}

impl fmt::Display for NonceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.nonce, self.expiry)
    }
}

/// Lifecycle phase of a coordinator.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorPhase {
    Uninitialized = 0,
    Initializing = 1,
    Ready = 2,
}

/// Outcome of one sweep over every known address.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub addresses: usize,
    pub failed: usize,
}

/// Staleness windows, in milliseconds.
///
/// Signed so that a bad configuration can be detected and rejected at init
/// instead of wrapping around.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NonceTtls {
    /// How long a confirmed nonce is trusted before asking the node again.
    pub local_ms: i64,
    /// How long a handed-out nonce is held before its slot may be reused.
    pub pending_ms: i64,
}

impl NonceTtls {
    pub fn new(local_ms: i64, pending_ms: i64) -> Self {
        Self { local_ms, pending_ms }
    }
}

impl Default for NonceTtls {
    fn default() -> Self {
        Self {
            local_ms: 300_000,
            pending_ms: 300_000,
        }
    }
}
