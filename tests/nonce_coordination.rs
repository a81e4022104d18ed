//! End-to-end nonce coordination scenarios.

mod common;

use std::sync::Arc;
use std::time::Duration;

use chain_gateway::nonce::{ChainScope, Clock, CoordinatorPhase, ManualClock, NonceCoordinator, NonceError, NonceTtls, SystemClock};
use chain_gateway::storage::{KeyValueStore, OwnerHandle, Shared};
use common::{file_store, memory_store, ready_coordinator, seeded_store, MockOracle, ADDRESS};

fn system_clock() -> Arc<dyn Clock> {
    Arc::new(SystemClock)
}

#[tokio::test]
async fn test_first_allocations_follow_ledger_count() {
    // Ledger has confirmed 11 transactions (nonces 0..=10).
    let oracle = MockOracle::with_count(11);
    let coordinator =
        ready_coordinator(memory_store(), NonceTtls::default(), system_clock(), oracle.clone()).await;

    assert_eq!(coordinator.current_nonce(ADDRESS).await.unwrap(), 10);
    assert_eq!(coordinator.allocate_nonce(ADDRESS).await.unwrap(), 11);
    assert_eq!(coordinator.allocate_nonce(ADDRESS).await.unwrap(), 12);

    coordinator.commit_nonce(ADDRESS, 11).await.unwrap();
    assert_eq!(coordinator.current_nonce(ADDRESS).await.unwrap(), 11);
    let pending: Vec<i64> = coordinator
        .pending_nonces(ADDRESS)
        .await
        .iter()
        .map(|p| p.nonce)
        .collect();
    assert_eq!(pending, vec![12]);
}

#[tokio::test]
async fn test_concurrent_allocations_never_collide() {
    let oracle = MockOracle::with_count(5);
    let coordinator =
        ready_coordinator(memory_store(), NonceTtls::default(), system_clock(), oracle.clone()).await;

    let tasks: Vec<_> = (0..50)
        .map(|_| {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.allocate_nonce(ADDRESS).await })
        })
        .collect();

    let mut nonces = Vec::new();
    for task in tasks {
        nonces.push(task.await.unwrap().unwrap());
    }
    nonces.sort_unstable();

    let expected: Vec<i64> = (5..55).collect();
    assert_eq!(nonces, expected);
    // One ledger read seeded the address; the rest were served from memory.
    assert_eq!(oracle.calls(), 1);
}

#[tokio::test]
async fn test_commit_is_monotonic() {
    let oracle = MockOracle::with_count(3);
    let coordinator =
        ready_coordinator(memory_store(), NonceTtls::default(), system_clock(), oracle).await;

    coordinator.commit_nonce(ADDRESS, 4).await.unwrap();
    for stale in [4, 3, -1] {
        let err = coordinator.commit_nonce(ADDRESS, stale).await.unwrap_err();
        assert!(matches!(err, NonceError::InvalidNonce { current: 4, .. }));
    }
    assert_eq!(coordinator.current_nonce(ADDRESS).await.unwrap(), 4);
}

#[tokio::test]
async fn test_reconciliation_is_cached_until_ttl() {
    let clock = Arc::new(ManualClock::new(1_000_000));
    let oracle = MockOracle::with_count(8);
    let coordinator = ready_coordinator(
        memory_store(),
        NonceTtls::new(10_000, 60_000),
        clock.clone(),
        oracle.clone(),
    )
    .await;

    coordinator.reconcile(ADDRESS).await.unwrap();
    coordinator.reconcile(ADDRESS).await.unwrap();
    assert_eq!(coordinator.current_nonce(ADDRESS).await.unwrap(), 7);
    assert_eq!(oracle.calls(), 1);

    // Expiry is inclusive: a record whose expiry equals now is re-read.
    clock.advance(Duration::from_millis(10_000));
    oracle.set_count(9);
    assert_eq!(coordinator.current_nonce(ADDRESS).await.unwrap(), 8);
    assert_eq!(oracle.calls(), 2);
}

#[tokio::test]
async fn test_ledger_advance_prunes_pending() {
    let clock = Arc::new(ManualClock::new(0));
    let oracle = MockOracle::with_count(11);
    let coordinator = ready_coordinator(
        memory_store(),
        NonceTtls::new(1_000, 60_000),
        clock.clone(),
        oracle.clone(),
    )
    .await;

    for expected in 11..=14 {
        assert_eq!(coordinator.allocate_nonce(ADDRESS).await.unwrap(), expected);
    }

    // Nonces 11 and 12 were mined out of band.
    oracle.set_count(13);
    clock.advance(Duration::from_millis(1_000));
    coordinator.reconcile(ADDRESS).await.unwrap();

    let pending: Vec<i64> = coordinator
        .pending_nonces(ADDRESS)
        .await
        .iter()
        .map(|p| p.nonce)
        .collect();
    assert_eq!(pending, vec![13, 14]);
    assert_eq!(coordinator.allocate_nonce(ADDRESS).await.unwrap(), 15);
}

#[tokio::test]
async fn test_stuck_slots_are_reused_after_pending_ttl() {
    let clock = Arc::new(ManualClock::new(0));
    let oracle = MockOracle::with_count(11);
    let coordinator = ready_coordinator(
        memory_store(),
        NonceTtls::new(1_000_000, 1_000),
        clock.clone(),
        oracle,
    )
    .await;

    assert_eq!(coordinator.allocate_nonce(ADDRESS).await.unwrap(), 11);
    assert_eq!(coordinator.allocate_nonce(ADDRESS).await.unwrap(), 12);

    // At exactly the expiry the slot is still held.
    clock.advance(Duration::from_millis(1_000));
    assert_eq!(coordinator.allocate_nonce(ADDRESS).await.unwrap(), 13);

    clock.advance(Duration::from_millis(1));
    assert_eq!(coordinator.allocate_nonce(ADDRESS).await.unwrap(), 11);
    assert_eq!(coordinator.allocate_nonce(ADDRESS).await.unwrap(), 12);
    // 13 was handed out later and is still within its window.
    assert_eq!(coordinator.allocate_nonce(ADDRESS).await.unwrap(), 14);
}

#[tokio::test]
async fn test_reset_rewinds_and_clears_queue() {
    let oracle = MockOracle::with_count(20);
    let coordinator =
        ready_coordinator(memory_store(), NonceTtls::default(), system_clock(), oracle).await;

    coordinator.allocate_nonce(ADDRESS).await.unwrap();
    coordinator.allocate_nonce(ADDRESS).await.unwrap();
    coordinator.reset_nonce(ADDRESS, 15).await.unwrap();

    assert!(coordinator.pending_nonces(ADDRESS).await.is_empty());
    assert_eq!(coordinator.allocate_nonce(ADDRESS).await.unwrap(), 16);
}

#[tokio::test]
async fn test_oracle_outage_surfaces_as_retryable() {
    let oracle = MockOracle::with_count(1);
    let coordinator =
        ready_coordinator(memory_store(), NonceTtls::default(), system_clock(), oracle.clone()).await;

    oracle.set_down(true);
    let err = coordinator.allocate_nonce(ADDRESS).await.unwrap_err();
    assert!(matches!(err, NonceError::Oracle(_)));
    assert!(err.is_retryable());
    assert!(coordinator.pending_nonces(ADDRESS).await.is_empty());

    oracle.set_down(false);
    assert_eq!(coordinator.allocate_nonce(ADDRESS).await.unwrap(), 1);
}

#[tokio::test]
async fn test_state_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nonces.json");
    let oracle = MockOracle::with_count(3);
    let owner = OwnerHandle::new();

    let first =
        ready_coordinator(file_store(&path), NonceTtls::default(), system_clock(), oracle.clone()).await;
    first.declare_ownership(owner);
    first.commit_nonce(ADDRESS, 7).await.unwrap();
    assert_eq!(first.allocate_nonce(ADDRESS).await.unwrap(), 8);
    first.close(&owner).unwrap();

    let calls_before = oracle.calls();
    let second =
        ready_coordinator(file_store(&path), NonceTtls::default(), system_clock(), oracle.clone()).await;

    assert_eq!(second.current_nonce(ADDRESS).await.unwrap(), 7);
    assert_eq!(second.known_addresses().await, vec![ADDRESS.to_string()]);
    let pending: Vec<i64> = second.pending_nonces(ADDRESS).await.iter().map(|p| p.nonce).collect();
    assert_eq!(pending, vec![8]);
    // Unexpired records load without a ledger round trip.
    assert_eq!(oracle.calls(), calls_before);
}

#[tokio::test]
async fn test_init_reconciles_expired_records() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nonces.json");
    let clock = Arc::new(ManualClock::new(0));
    let oracle = MockOracle::with_count(3);
    let owner = OwnerHandle::new();

    let first = ready_coordinator(
        file_store(&path),
        NonceTtls::new(1_000, 1_000),
        clock.clone(),
        oracle.clone(),
    )
    .await;
    first.declare_ownership(owner);
    first.commit_nonce(ADDRESS, 2).await.unwrap();
    first.close(&owner).unwrap();

    clock.advance(Duration::from_secs(5));
    oracle.set_count(30);
    let second =
        ready_coordinator(file_store(&path), NonceTtls::new(1_000, 1_000), clock, oracle).await;
    assert_eq!(second.current_nonce(ADDRESS).await.unwrap(), 29);
}

fn expired_record_store() -> Arc<Shared<dyn KeyValueStore>> {
    let key = format!("ethereum/1/{}", ADDRESS);
    seeded_store(&[(key.as_str(), "4:500")])
}

fn unready_coordinator(
    store: Arc<Shared<dyn KeyValueStore>>,
) -> NonceCoordinator {
    NonceCoordinator::with_clock(
        ChainScope::new("ethereum", 1),
        store,
        NonceTtls::default(),
        Arc::new(ManualClock::new(1_000)),
    )
}

#[tokio::test]
async fn test_second_init_is_a_no_op() {
    let oracle = MockOracle::with_count(9);
    let coordinator = unready_coordinator(expired_record_store());

    coordinator.init(oracle.clone()).await.unwrap();
    assert_eq!(oracle.calls(), 1);

    let other = MockOracle::with_count(50);
    coordinator.init(other.clone()).await.unwrap();
    assert_eq!(oracle.calls(), 1);
    assert_eq!(other.calls(), 0);
    assert_eq!(coordinator.phase(), CoordinatorPhase::Ready);
    assert_eq!(coordinator.current_nonce(ADDRESS).await.unwrap(), 8);
}

#[tokio::test]
async fn test_concurrent_init_loads_once() {
    let oracle = MockOracle::with_count(9);
    let coordinator = unready_coordinator(expired_record_store());

    let (first, second, third) = tokio::join!(
        coordinator.init(oracle.clone()),
        coordinator.init(oracle.clone()),
        coordinator.init(oracle.clone()),
    );
    first.unwrap();
    second.unwrap();
    third.unwrap();

    assert_eq!(oracle.calls(), 1);
    assert_eq!(coordinator.phase(), CoordinatorPhase::Ready);
}

#[tokio::test]
async fn test_failed_init_can_be_retried() {
    let oracle = MockOracle::with_count(9);
    oracle.set_down(true);
    let coordinator = unready_coordinator(expired_record_store());

    let err = coordinator.init(oracle.clone()).await.unwrap_err();
    assert!(matches!(err, NonceError::Oracle(_)));
    assert_eq!(coordinator.phase(), CoordinatorPhase::Uninitialized);
    assert!(matches!(
        coordinator.allocate_nonce(ADDRESS).await,
        Err(NonceError::NotReady { .. })
    ));

    oracle.set_down(false);
    coordinator.init(oracle.clone()).await.unwrap();
    assert_eq!(coordinator.phase(), CoordinatorPhase::Ready);
    assert_eq!(coordinator.allocate_nonce(ADDRESS).await.unwrap(), 9);
}

#[tokio::test]
async fn test_aliasing_address_cannot_rewrite_pending_queue() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nonces.json");
    let oracle = MockOracle::with_count(11);
    let owner = OwnerHandle::new();

    let first =
        ready_coordinator(file_store(&path), NonceTtls::default(), system_clock(), oracle.clone()).await;
    first.declare_ownership(owner);
    assert_eq!(first.allocate_nonce(ADDRESS).await.unwrap(), 11);
    assert_eq!(first.allocate_nonce(ADDRESS).await.unwrap(), 12);

    let aliased = format!("{}/pending", ADDRESS);
    let err = first.commit_nonce(&aliased, 99).await.unwrap_err();
    assert!(matches!(err, NonceError::InvalidAddress { .. }));
    first.close(&owner).unwrap();

    let second =
        ready_coordinator(file_store(&path), NonceTtls::default(), system_clock(), oracle).await;
    let pending: Vec<i64> = second.pending_nonces(ADDRESS).await.iter().map(|p| p.nonce).collect();
    assert_eq!(pending, vec![11, 12]);
    assert_eq!(second.allocate_nonce(ADDRESS).await.unwrap(), 13);
}
