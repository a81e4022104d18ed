//! Per-chain nonce coordination.
//!
//! Hands out nonces for addresses on one `(chain, chain_id)` scope so that a
//! burst of concurrent transactions goes out as `[n, n+1, n+2, ...]` instead of
//! `[n, n, n, ...]`.
//!
//! # State
//! - confirmed: last nonce known safe to build on, per address, with an expiry
//!   after which it is re-read from the ledger oracle
//! - pending: nonces handed out but not yet committed, contiguous from
//!   confirmed + 1; an entry older than the pending TTL is treated as dropped
//!   and its slot is handed out again
//!
//! Every mutation is written through to the [`NonceStore`] before the call
//! returns. All state sits behind one async mutex; oracle round trips happen
//! while it is held, so no caller ever sees a half-updated queue.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use futures_util::future::try_join_all;
use tokio::sync::{Mutex, MutexGuard};

use crate::blockchain::LedgerOracle;
use crate::nonce::clock::{Clock, SystemClock};
use crate::nonce::error::{NonceError, NonceResult};
use crate::nonce::store::{ChainScope, NonceStore};
use crate::nonce::types::{CoordinatorPhase, NonceInfo, NonceTtls, ReconcileSummary};
use crate::observability::metrics;
use crate::storage::{KeyValueStore, OwnerHandle, OwnerSet, Shared};

impl From<u8> for CoordinatorPhase {
    fn from(val: u8) -> Self {
        match val {
            1 => CoordinatorPhase::Initializing,
            2 => CoordinatorPhase::Ready,
            _ => CoordinatorPhase::Uninitialized,
        }
    }
}

#[derive(Default)]
struct CoordinatorState {
    oracle: Option<Arc<dyn LedgerOracle>>,
    confirmed: HashMap<String, NonceInfo>,
    pending: HashMap<String, Vec<NonceInfo>>,
}

impl CoordinatorState {
    fn oracle(&self, operation: &'static str) -> NonceResult<Arc<dyn LedgerOracle>> {
        self.oracle.clone().ok_or(NonceError::NotReady { operation })
    }
}

/// `now + ttl_ms`, pinned at `i64::MAX` instead of wrapping.
fn expiry_after(now: i64, ttl_ms: i64) -> i64 {
    now.saturating_add(ttl_ms)
}

/// Addresses become store keys; `/` would alias another record.
fn check_address(address: &str) -> NonceResult<()> {
    let reason = if address.is_empty() {
        "address is empty"
    } else if address.contains('/') {
        "address contains '/'"
    } else {
        return Ok(());
    };
    Err(NonceError::InvalidAddress {
        address: address.to_string(),
        reason,
    })
}

/// Nonce authority for one chain scope.
pub struct NonceCoordinator {
    scope: ChainScope,
    ttls: NonceTtls,
    clock: Arc<dyn Clock>,
    store: NonceStore,
    shared_store: Arc<Shared<dyn KeyValueStore>>,
    /// This coordinator's ownership of `shared_store`.
    handle: OwnerHandle,
    /// Callers sharing this coordinator.
    owners: OwnerSet,
    phase: AtomicU8,
    state: Mutex<CoordinatorState>,
}

impl NonceCoordinator {
    /// Create a coordinator over `shared_store`, using the system clock.
    ///
    /// The coordinator registers itself as an owner of the store right away;
    /// it is unusable until [`init`](Self::init) succeeds.
    pub fn new(scope: ChainScope, shared_store: Arc<Shared<dyn KeyValueStore>>, ttls: NonceTtls) -> Self {
        Self::with_clock(scope, shared_store, ttls, Arc::new(SystemClock))
    }

    pub fn with_clock(
        scope: ChainScope,
        shared_store: Arc<Shared<dyn KeyValueStore>>,
        ttls: NonceTtls,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let handle = OwnerHandle::new();
        shared_store.declare_ownership(handle);
        let store = NonceStore::new(shared_store.resource().clone(), scope.clone());

        Self {
            scope,
            ttls,
            clock,
            store,
            shared_store,
            handle,
            owners: OwnerSet::new(),
            phase: AtomicU8::new(CoordinatorPhase::Uninitialized as u8),
            state: Mutex::new(CoordinatorState::default()),
        }
    }

    pub fn scope(&self) -> &ChainScope {
        &self.scope
    }

    pub fn chain(&self) -> &str {
        &self.scope.chain
    }

    pub fn chain_id(&self) -> u64 {
        self.scope.chain_id
    }

    pub fn ttls(&self) -> NonceTtls {
        self.ttls
    }

    pub fn phase(&self) -> CoordinatorPhase {
        CoordinatorPhase::from(self.phase.load(Ordering::SeqCst))
    }

    fn set_phase(&self, phase: CoordinatorPhase) {
        self.phase.store(phase as u8, Ordering::SeqCst);
    }

    /// Load persisted state and reconcile it against `oracle`.
    ///
    /// Only the first oracle ever supplied is kept. Calling `init` on a ready
    /// coordinator is a no-op; concurrent callers wait for the one attempt in
    /// flight. A failed attempt leaves the coordinator uninitialized.
    pub async fn init(&self, oracle: Arc<dyn LedgerOracle>) -> NonceResult<()> {
        if self.ttls.local_ms < 0 {
            return Err(NonceError::Config(
                "local nonce TTL must be greater than or equal to zero".to_string(),
            ));
        }
        if self.ttls.pending_ms < 0 {
            return Err(NonceError::Config(
                "pending nonce TTL must be greater than or equal to zero".to_string(),
            ));
        }

        let mut state = self.state.lock().await;
        if state.oracle.is_none() {
            state.oracle = Some(oracle);
        }
        if self.phase() == CoordinatorPhase::Ready {
            return Ok(());
        }
        // A previous close gave the store share away.
        self.shared_store.declare_ownership(self.handle);

        self.set_phase(CoordinatorPhase::Initializing);
        match self.load_and_reconcile(&mut state).await {
            Ok(()) => {
                self.set_phase(CoordinatorPhase::Ready);
                tracing::info!(
                    scope = %self.scope,
                    addresses = state.confirmed.len(),
                    local_ttl_ms = self.ttls.local_ms,
                    pending_ttl_ms = self.ttls.pending_ms,
                    "Nonce coordinator ready"
                );
                Ok(())
            }
            Err(e) => {
                state.confirmed.clear();
                state.pending.clear();
                self.set_phase(CoordinatorPhase::Uninitialized);
                tracing::error!(scope = %self.scope, error = %e, "Nonce coordinator initialization failed");
                Err(e)
            }
        }
    }

    async fn load_and_reconcile(&self, state: &mut CoordinatorState) -> NonceResult<()> {
        self.store.open()?;
        state.confirmed = self.store.current_nonces()?;
        state.pending = self.store.pending_nonces()?;

        let now = self.clock.now_millis();
        let stale: Vec<String> = state
            .confirmed
            .iter()
            .filter(|(_, info)| info.expiry <= now)
            .map(|(address, _)| address.clone())
            .collect();
        if stale.is_empty() {
            return Ok(());
        }

        let oracle = state.oracle("init")?;
        let counts = try_join_all(stale.iter().map(|address| {
            let oracle = oracle.clone();
            async move { oracle.confirmed_transaction_count(address).await }
        }))
        .await
        .inspect_err(|_| metrics::record_reconciliation(&self.scope.chain, "error"))?;

        for (address, count) in stale.iter().zip(counts) {
            self.apply_external(state, address, count, now)?;
        }
        tracing::debug!(scope = %self.scope, reconciled = stale.len(), "Reconciled persisted nonces");
        Ok(())
    }

    async fn ready_state(&self, operation: &'static str) -> NonceResult<MutexGuard<'_, CoordinatorState>> {
        let state = self.state.lock().await;
        if self.phase() != CoordinatorPhase::Ready {
            tracing::error!(scope = %self.scope, operation, "Nonce coordinator called before initialization");
            return Err(NonceError::NotReady { operation });
        }
        Ok(state)
    }

    /// Re-read the confirmed nonce for `address` from the oracle if its record
    /// has expired, pruning pending entries the ledger has moved past.
    pub async fn reconcile(&self, address: &str) -> NonceResult<()> {
        check_address(address)?;
        let mut state = self.ready_state("reconcile").await?;
        self.reconcile_locked(&mut state, address, "reconcile").await?;
        Ok(())
    }

    /// Reconcile every address this coordinator knows about.
    ///
    /// The lock is taken per address, so allocations interleave with the
    /// sweep. A failed address is logged and counted; the sweep carries on.
    /// Only losing readiness mid-sweep aborts it.
    pub async fn reconcile_all(&self) -> NonceResult<ReconcileSummary> {
        let addresses: Vec<String> = {
            let state = self.ready_state("reconcile_all").await?;
            state.confirmed.keys().cloned().collect()
        };

        let mut summary = ReconcileSummary {
            addresses: addresses.len(),
            failed: 0,
        };
        for address in &addresses {
            let mut state = self.ready_state("reconcile_all").await?;
            if let Err(e) = self.reconcile_locked(&mut state, address, "reconcile_all").await {
                summary.failed += 1;
                tracing::warn!(scope = %self.scope, address = %address, error = %e, "Skipping address in reconciliation pass");
            }
        }
        Ok(summary)
    }

    /// Returns the confirmed nonce after reconciling.
    async fn reconcile_locked(
        &self,
        state: &mut CoordinatorState,
        address: &str,
        operation: &'static str,
    ) -> NonceResult<i64> {
        let now = self.clock.now_millis();
        if let Some(info) = state.confirmed.get(address) {
            if info.expiry > now {
                return Ok(info.nonce);
            }
        }

        let oracle = state.oracle(operation)?;
        let count = match oracle.confirmed_transaction_count(address).await {
            Ok(count) => count,
            Err(e) => {
                metrics::record_reconciliation(&self.scope.chain, "error");
                tracing::warn!(scope = %self.scope, address, error = %e, "Ledger oracle query failed");
                return Err(e.into());
            }
        };
        self.apply_external(state, address, count, now)
    }

    fn apply_external(
        &self,
        state: &mut CoordinatorState,
        address: &str,
        confirmed_count: u64,
        now: i64,
    ) -> NonceResult<i64> {
        let external = confirmed_count as i64 - 1;
        let info = NonceInfo::new(external, expiry_after(now, self.ttls.local_ms));
        self.store.save_current_nonce(address, &info)?;
        let previous = state.confirmed.insert(address.to_string(), info);

        if let Some(queue) = state.pending.get(address).filter(|q| !q.is_empty()) {
            let pruned: Vec<NonceInfo> = queue.iter().copied().filter(|p| p.nonce > external).collect();
            self.store.save_pending_nonces(address, &pruned)?;
            metrics::record_pending_depth(&self.scope.chain, pruned.len());
            state.pending.insert(address.to_string(), pruned);
        }

        metrics::record_reconciliation(&self.scope.chain, "updated");
        tracing::debug!(
            scope = %self.scope,
            address,
            previous = ?previous.map(|p| p.nonce),
            external,
            "Merged nonce from ledger"
        );
        Ok(external)
    }

    /// The nonce the ledger is assumed to have already confirmed for `address`.
    pub async fn current_nonce(&self, address: &str) -> NonceResult<i64> {
        check_address(address)?;
        let mut state = self.ready_state("current_nonce").await?;
        self.reconcile_locked(&mut state, address, "current_nonce").await
    }

    /// Hand out the next nonce for `address`.
    ///
    /// Reuses the first pending slot whose TTL lapsed without a commit;
    /// otherwise extends the pending queue by one.
    pub async fn allocate_nonce(&self, address: &str) -> NonceResult<i64> {
        check_address(address)?;
        let mut state = self.ready_state("allocate_nonce").await?;
        let current = self.reconcile_locked(&mut state, address, "allocate_nonce").await?;

        let now = self.clock.now_millis();
        let expiry = expiry_after(now, self.ttls.pending_ms);
        let mut queue = state.pending.get(address).cloned().unwrap_or_default();

        let (nonce, reused) = match queue.iter().position(|p| p.is_expired(now)) {
            Some(i) => {
                queue[i].expiry = expiry;
                (queue[i].nonce, true)
            }
            None => {
                let next = queue.last().map_or(current + 1, |tail| tail.nonce + 1);
                queue.push(NonceInfo::new(next, expiry));
                (next, false)
            }
        };

        self.store.save_pending_nonces(address, &queue)?;
        metrics::record_nonce_allocated(&self.scope.chain, reused);
        metrics::record_pending_depth(&self.scope.chain, queue.len());
        tracing::debug!(scope = %self.scope, address, nonce, reused, pending = queue.len(), "Allocated nonce");
        state.pending.insert(address.to_string(), queue);
        Ok(nonce)
    }

    /// Record that a transaction went out with `used`.
    ///
    /// Fails with [`NonceError::InvalidNonce`] unless `used` is strictly greater
    /// than the confirmed nonce; use [`reset_nonce`](Self::reset_nonce) to move
    /// backwards on purpose.
    pub async fn commit_nonce(&self, address: &str, used: i64) -> NonceResult<()> {
        check_address(address)?;
        let mut state = self.ready_state("commit_nonce").await?;

        if let Some(current) = state.confirmed.get(address) {
            if used <= current.nonce {
                metrics::record_commit(&self.scope.chain, "rejected");
                tracing::error!(
                    scope = %self.scope,
                    address,
                    used,
                    current = current.nonce,
                    "Provided nonce is not greater than current nonce"
                );
                return Err(NonceError::InvalidNonce {
                    used,
                    current: current.nonce,
                });
            }
        }

        let info = NonceInfo::new(used, expiry_after(self.clock.now_millis(), self.ttls.local_ms));
        self.store.save_current_nonce(address, &info)?;
        state.confirmed.insert(address.to_string(), info);
        self.drop_pending_through(&mut state, address, used)?;

        metrics::record_commit(&self.scope.chain, "accepted");
        tracing::debug!(scope = %self.scope, address, nonce = used, "Committed nonce");
        Ok(())
    }

    /// Rewind `address` to `nonce` for cancel or replace flows.
    ///
    /// The confirmed record is overwritten unconditionally and the pending
    /// queue is cleared, so the next allocation is `nonce + 1`.
    pub async fn reset_nonce(&self, address: &str, nonce: i64) -> NonceResult<()> {
        check_address(address)?;
        let mut state = self.ready_state("reset_nonce").await?;

        let info = NonceInfo::new(nonce, expiry_after(self.clock.now_millis(), self.ttls.local_ms));
        self.store.save_current_nonce(address, &info)?;
        let previous = state.confirmed.insert(address.to_string(), info);
        self.store.save_pending_nonces(address, &[])?;
        state.pending.insert(address.to_string(), Vec::new());

        metrics::record_commit(&self.scope.chain, "reset");
        metrics::record_pending_depth(&self.scope.chain, 0);
        tracing::warn!(
            scope = %self.scope,
            address,
            previous = ?previous.map(|p| p.nonce),
            nonce,
            "Nonce reset"
        );
        Ok(())
    }

    fn drop_pending_through(&self, state: &mut CoordinatorState, address: &str, nonce: i64) -> NonceResult<()> {
        let Some(queue) = state.pending.get(address) else {
            return Ok(());
        };
        if !queue.iter().any(|p| p.nonce <= nonce) {
            return Ok(());
        }
        let kept: Vec<NonceInfo> = queue.iter().copied().filter(|p| p.nonce > nonce).collect();
        self.store.save_pending_nonces(address, &kept)?;
        metrics::record_pending_depth(&self.scope.chain, kept.len());
        state.pending.insert(address.to_string(), kept);
        Ok(())
    }

    /// Whether `candidate` is what the coordinator would hand out next.
    ///
    /// This allocates: a matching candidate now occupies its pending slot.
    pub async fn is_valid_nonce(&self, address: &str, candidate: i64) -> NonceResult<bool> {
        Ok(self.allocate_nonce(address).await? == candidate)
    }

    /// Addresses with a confirmed record, sorted.
    pub async fn known_addresses(&self) -> Vec<String> {
        let state = self.state.lock().await;
        let mut addresses: Vec<String> = state.confirmed.keys().cloned().collect();
        addresses.sort();
        addresses
    }

    /// Snapshot of the pending queue for `address`.
    pub async fn pending_nonces(&self, address: &str) -> Vec<NonceInfo> {
        let state = self.state.lock().await;
        state.pending.get(address).cloned().unwrap_or_default()
    }

    /// Register `handle` as a user of this coordinator.
    pub fn declare_ownership(&self, handle: OwnerHandle) {
        self.owners.declare(handle);
    }

    /// Drop `handle`'s ownership. When the last owner leaves, the coordinator
    /// stops serving and gives up its share of the store.
    pub fn close(&self, handle: &OwnerHandle) -> NonceResult<()> {
        let released = self.owners.release(handle, || {
            self.set_phase(CoordinatorPhase::Uninitialized);
            self.shared_store.close(&self.handle)
        });
        if let Some(result) = released {
            result?;
            tracing::info!(scope = %self.scope, "Nonce coordinator closed");
        }
        Ok(())
    }

    pub fn ref_count(&self) -> usize {
        self.owners.count()
    }
}

impl std::fmt::Debug for NonceCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NonceCoordinator")
            .field("scope", &self.scope)
            .field("ttls", &self.ttls)
            .field("phase", &self.phase())
            .field("store", &self.shared_store.key())
            .finish()
    }
}
