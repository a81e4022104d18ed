//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use chain_gateway::blockchain::{BlockchainError, BlockchainResult, LedgerOracle};
use chain_gateway::nonce::{ChainScope, Clock, NonceCoordinator, NonceTtls};
use chain_gateway::storage::{FileStore, KeyValueStore, MemoryStore, Shared};

pub const ADDRESS: &str = "0x00000000000000000000000000000000000000aa";

/// Ledger oracle with a settable transaction count and a call counter.
#[derive(Default)]
pub struct MockOracle {
    count: AtomicU64,
    calls: AtomicUsize,
    down: AtomicBool,
}

impl MockOracle {
    pub fn with_count(count: u64) -> Arc<Self> {
        let oracle = Self::default();
        oracle.count.store(count, Ordering::SeqCst);
        Arc::new(oracle)
    }

    pub fn set_count(&self, count: u64) {
        self.count.store(count, Ordering::SeqCst);
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LedgerOracle for MockOracle {
    async fn confirmed_transaction_count(&self, _address: &str) -> BlockchainResult<u64> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.down.load(Ordering::SeqCst) {
            return Err(BlockchainError::Rpc("connection refused".to_string()));
        }
        Ok(self.count.load(Ordering::SeqCst))
    }
}

pub fn memory_store() -> Arc<Shared<dyn KeyValueStore>> {
    let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    Arc::new(Shared::new("memory", store))
}

/// A memory store already holding `entries`, as a previous run would have left it.
pub fn seeded_store(entries: &[(&str, &str)]) -> Arc<Shared<dyn KeyValueStore>> {
    let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    store.open().unwrap();
    for (key, value) in entries {
        store.put(key, value).unwrap();
    }
    Arc::new(Shared::new("memory", store))
}

pub fn file_store(path: &Path) -> Arc<Shared<dyn KeyValueStore>> {
    let store: Arc<dyn KeyValueStore> = Arc::new(FileStore::new(path));
    Arc::new(Shared::new(path.display().to_string(), store))
}

/// A coordinator for `ethereum/1` that is already initialized against `oracle`.
pub async fn ready_coordinator(
    store: Arc<Shared<dyn KeyValueStore>>,
    ttls: NonceTtls,
    clock: Arc<dyn Clock>,
    oracle: Arc<MockOracle>,
) -> Arc<NonceCoordinator> {
    let coordinator = Arc::new(NonceCoordinator::with_clock(
        ChainScope::new("ethereum", 1),
        store,
        ttls,
        clock,
    ));
    coordinator.init(oracle).await.unwrap();
    coordinator
}

pub fn oracles(names: &[&str], oracle: Arc<MockOracle>) -> HashMap<String, Arc<dyn LedgerOracle>> {
    names
        .iter()
        .map(|name| (name.to_string(), oracle.clone() as Arc<dyn LedgerOracle>))
        .collect()
}
