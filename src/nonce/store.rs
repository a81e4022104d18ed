//! Persistence adapter between nonce records and the key/value store.
//!
//! Key layout, per chain scope:
//! ```text
//! {chain}/{chain_id}/{address}          → "{nonce}:{expiry}"
//! {chain}/{chain_id}/{address}/pending  → "{nonce}:{expiry},{nonce}:{expiry},..."
//! ```
//! Every call goes straight to the store; nothing is cached here.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::nonce::types::NonceInfo;
use crate::storage::{KeyValueStore, StorageError, StorageResult};

const PENDING_SUFFIX: &str = "pending";

/// The `(chain, chain_id)` half of a nonce scope key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChainScope {
    pub chain: String,
    pub chain_id: u64,
}

impl ChainScope {
    pub fn new(chain: impl Into<String>, chain_id: u64) -> Self {
        Self {
            chain: chain.into(),
            chain_id,
        }
    }

    fn prefix(&self) -> String {
        format!("{}/{}/", self.chain, self.chain_id)
    }
}

impl fmt::Display for ChainScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.chain, self.chain_id)
    }
}

/// Reads and writes nonce records for one chain scope.
#[derive(Clone)]
pub struct NonceStore {
    store: Arc<dyn KeyValueStore>,
    scope: ChainScope,
}

impl NonceStore {
    pub fn new(store: Arc<dyn KeyValueStore>, scope: ChainScope) -> Self {
        Self { store, scope }
    }

    pub fn scope(&self) -> &ChainScope {
        &self.scope
    }

    /// Open the underlying store. Safe to call repeatedly.
    pub fn open(&self) -> StorageResult<()> {
        self.store.open()
    }

    pub fn save_current_nonce(&self, address: &str, nonce: &NonceInfo) -> StorageResult<()> {
        let key = format!("{}{}", self.scope.prefix(), address);
        self.store.put(&key, &nonce.to_string())
    }

    pub fn save_pending_nonces(&self, address: &str, nonces: &[NonceInfo]) -> StorageResult<()> {
        let key = format!("{}{}/{}", self.scope.prefix(), address, PENDING_SUFFIX);
        let value = nonces
            .iter()
            .map(NonceInfo::to_string)
            .collect::<Vec<_>>()
            .join(",");
        self.store.put(&key, &value)
    }

    /// Confirmed records for every address in scope.
    pub fn current_nonces(&self) -> StorageResult<HashMap<String, NonceInfo>> {
        let mut out = HashMap::new();
        for (key, value) in self.scoped_entries()? {
            if let ScopedKey::Current(address) = ScopedKey::parse(&key, &self.scope.prefix()) {
                out.insert(address.to_string(), decode_info(&key, &value)?);
            }
        }
        Ok(out)
    }

    /// Pending queues for every address in scope.
    pub fn pending_nonces(&self) -> StorageResult<HashMap<String, Vec<NonceInfo>>> {
        let mut out = HashMap::new();
        for (key, value) in self.scoped_entries()? {
            if let ScopedKey::Pending(address) = ScopedKey::parse(&key, &self.scope.prefix()) {
                let queue = if value.is_empty() {
                    Vec::new()
                } else {
                    value
                        .split(',')
                        .map(|item| decode_info(&key, item))
                        .collect::<StorageResult<Vec<_>>>()?
                };
                out.insert(address.to_string(), queue);
            }
        }
        Ok(out)
    }

    fn scoped_entries(&self) -> StorageResult<Vec<(String, String)>> {
        self.store.get_all(&self.scope.prefix())
    }
}

enum ScopedKey<'a> {
    Current(&'a str),
    Pending(&'a str),
    Other,
}

impl<'a> ScopedKey<'a> {
    fn parse(key: &'a str, prefix: &str) -> Self {
        let Some(rest) = key.strip_prefix(prefix) else {
            return ScopedKey::Other;
        };
        let parts: Vec<&str> = rest.split('/').collect();
        match parts.as_slice() {
            [address] if !address.is_empty() => ScopedKey::Current(*address),
            [address, PENDING_SUFFIX] if !address.is_empty() => ScopedKey::Pending(*address),
            _ => ScopedKey::Other,
        }
    }
}

fn decode_info(key: &str, raw: &str) -> StorageResult<NonceInfo> {
    let malformed = |reason: &str| StorageError::Decode {
        key: key.to_string(),
        reason: format!("{} in '{}'", reason, raw),
    };
    let (nonce, expiry) = raw.split_once(':').ok_or_else(|| malformed("missing ':'"))?;
    let nonce = nonce.trim().parse().map_err(|_| malformed("bad nonce"))?;
    let expiry = expiry.trim().parse().map_err(|_| malformed("bad expiry"))?;
    Ok(NonceInfo::new(nonce, expiry))
}
