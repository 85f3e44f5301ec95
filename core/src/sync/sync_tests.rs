//! Tests for versioned replication, conflicts and transactions

use chrono::Duration;
use serde_json::json;
use std::sync::Arc;
use std::thread;

use crate::clock::ManualClock;
use crate::error::EngineError;
use crate::ids::{EncounterId, NodeId};

use super::*;

// ═══════════════════════════════════════════════════════════════════════════
// Test Helpers
// ═══════════════════════════════════════════════════════════════════════════

fn manager_with(resolver: Arc<dyn ConflictResolver>) -> (DataSyncManager, ManualClock) {
    let clock = ManualClock::default();
    let manager = DataSyncManager::new(
        NodeId::from("local"),
        16,
        Duration::seconds(30),
        resolver,
        clock.shared(),
    );
    (manager, clock)
}

fn manager() -> (DataSyncManager, ManualClock) {
    manager_with(Arc::new(LastWriteWins))
}

fn node(id: &str) -> NodeId {
    NodeId::from(id)
}

// ═══════════════════════════════════════════════════════════════════════════
// Local Writes
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn local_sync_starts_at_one_and_increments() {
    let (sync, _) = manager();
    let id = EncounterId::new();

    assert_eq!(sync.version(&id), 0);
    assert_eq!(sync.start_sync(id, json!({"health": 100}), &node("a")), 1);
    assert_eq!(sync.start_sync(id, json!({"health": 90}), &node("a")), 2);
    assert_eq!(sync.start_sync(id, json!({"health": 80}), &node("b")), 3);

    let state = sync.get_state(&id).unwrap();
    assert_eq!(state.version, 3);
    assert_eq!(state.data, json!({"health": 80}));
    assert_eq!(state.last_writer, node("b"));
}

// ═══════════════════════════════════════════════════════════════════════════
// Remote Writes
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn remote_write_at_or_above_local_is_applied() {
    let (sync, _) = manager();
    let id = EncounterId::new();
    sync.start_sync(id, json!({"health": 100}), &node("local"));
    sync.start_sync(id, json!({"health": 95}), &node("local"));

    let equal = sync.handle_remote_sync(id, json!({"health": 90}), 2, &node("peer"));
    assert!(equal.success);
    assert_eq!(equal.version, 3);

    // Accepted writes advance by exactly one, however far ahead the sender is
    let ahead = sync.handle_remote_sync(id, json!({"health": 50}), 10, &node("peer"));
    assert!(ahead.success);
    assert_eq!(ahead.version, 4);
    assert_eq!(sync.get_state(&id).unwrap().data, json!({"health": 50}));
}

#[test]
fn remote_write_for_unknown_encounter_is_adopted() {
    let (sync, _) = manager();
    let id = EncounterId::new();
    let outcome = sync.handle_remote_sync(id, json!({"health": 10}), 4, &node("peer"));
    assert!(outcome.success);
    assert_eq!(outcome.version, 1);
    assert_eq!(sync.get_state(&id).unwrap().last_writer, node("peer"));
}

#[test]
fn replica_tracks_owner_version_when_writes_arrive_in_order() {
    let (owner, _) = manager();
    let (replica, _) = manager();
    let id = EncounterId::new();

    for health in [100, 90, 80, 70] {
        let version = owner.start_sync(id, json!({ "health": health }), &node("owner"));
        let outcome = replica.handle_remote_sync(id, json!({ "health": health }), version, &node("owner"));
        assert!(outcome.success);
        assert_eq!(outcome.version, version);
    }

    // A gap in delivery is accepted but still only advances by one
    let outcome = replica.handle_remote_sync(id, json!({"health": 10}), 9, &node("owner"));
    assert!(outcome.success);
    assert_eq!(outcome.version, 5);
}

#[test]
fn stale_remote_write_is_a_conflict_and_leaves_state_untouched() {
    let (sync, _) = manager();
    let id = EncounterId::new();
    for h in [100, 90, 80] {
        sync.start_sync(id, json!({"health": h}), &node("local"));
    }
    let before = sync.get_state(&id).unwrap();

    let outcome = sync.handle_remote_sync(id, json!({"health": 999}), 1, &node("peer"));
    assert!(!outcome.success);
    assert!(outcome.message.starts_with("CONFLICT"));
    assert!(outcome.is_conflict());
    assert_eq!(outcome.version, 3);
    assert_eq!(sync.get_state(&id).unwrap(), before);
    assert_eq!(sync.open_conflicts(), vec![outcome.conflict.unwrap()]);
    assert_eq!(sync.statistics().conflicts, 1);
}

#[test]
fn versions_are_strictly_increasing() {
    let (sync, _) = manager();
    let id = EncounterId::new();
    let mut last = 0;
    for step in 0..20u64 {
        let version = if step % 3 == 0 {
            let outcome = sync.handle_remote_sync(id, json!(step), last, &node("peer"));
            assert!(outcome.success);
            outcome.version
        } else {
            sync.start_sync(id, json!(step), &node("local"))
        };
        assert!(version > last, "step {step}: {version} <= {last}");
        last = version;
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Conflict Resolution
// ═══════════════════════════════════════════════════════════════════════════

fn conflicted(sync: &DataSyncManager) -> (EncounterId, uuid::Uuid) {
    let id = EncounterId::new();
    sync.start_sync(id, json!({"health": 400, "hits": 3}), &node("local"));
    sync.start_sync(id, json!({"health": 300, "hits": 5}), &node("local"));
    let outcome = sync.handle_remote_sync(id, json!({"health": 350, "hits": 9}), 1, &node("peer"));
    (id, outcome.conflict.unwrap())
}

#[test]
fn last_write_wins_takes_remote_payload() {
    let (sync, _) = manager();
    let (id, tx) = conflicted(&sync);

    let resolved = sync.resolve_conflict(tx).unwrap();
    assert!(resolved.success);
    assert_eq!(resolved.version, 3);
    let state = sync.get_state(&id).unwrap();
    assert_eq!(state.data, json!({"health": 350, "hits": 9}));
    assert_eq!(state.last_writer, node("peer"));
    assert_eq!(sync.transaction_state(tx), Some(TransactionState::Committed));

    // Already settled
    assert!(matches!(sync.resolve_conflict(tx), Err(EngineError::TransactionExpired(_))));
}

#[test]
fn resolver_can_be_swapped_without_changing_call_sites() {
    let (sync, _) = manager();
    sync.set_resolver(Arc::new(MergeMax));
    let (id, tx) = conflicted(&sync);
    sync.resolve_conflict(tx).unwrap();
    assert_eq!(sync.get_state(&id).unwrap().data, json!({"health": 350, "hits": 9}));

    sync.set_resolver(Arc::new(FirstWriteWins));
    let (id, tx) = conflicted(&sync);
    sync.resolve_conflict(tx).unwrap();
    let state = sync.get_state(&id).unwrap();
    assert_eq!(state.data, json!({"health": 300, "hits": 5}));
    assert_eq!(state.version, 3);
    assert_eq!(sync.resolver_name(), "first_write_wins");
}

#[test]
fn expired_conflict_cannot_be_resolved() {
    let (sync, clock) = manager();
    let (_, tx) = conflicted(&sync);
    clock.advance(Duration::seconds(31));

    assert_eq!(sync.transaction_state(tx), Some(TransactionState::Aborted));
    assert!(matches!(sync.resolve_conflict(tx), Err(EngineError::TransactionExpired(_))));
    assert!(sync.open_conflicts().is_empty());
    assert!(matches!(
        sync.resolve_conflict(uuid::Uuid::new_v4()),
        Err(EngineError::TransactionNotFound(_))
    ));
}

// ═══════════════════════════════════════════════════════════════════════════
// Transactions
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn transaction_tracks_applied_peers() {
    let (sync, _) = manager();
    let id = EncounterId::new();
    let tx = sync.begin_transaction(id, &node("local"), vec![node("b"), node("c")]);

    assert!(sync.mark_applied(tx, &node("b")).unwrap());
    assert!(!sync.mark_applied(tx, &node("b")).unwrap());
    assert_eq!(sync.pending_peers(tx), vec![node("c")]);

    assert!(sync.mark_applied(tx, &node("c")).unwrap());
    assert!(sync.transaction(tx).unwrap().is_fully_applied());
    sync.commit(tx).unwrap();
    assert_eq!(sync.transaction_state(tx), Some(TransactionState::Committed));
    assert!(sync.abort(tx).is_err());
}

#[test]
fn expired_transactions_read_as_aborted_and_get_swept() {
    let (sync, clock) = manager();
    let id = EncounterId::new();
    let tx = sync.begin_transaction(id, &node("local"), vec![node("b")]);
    let aborted = sync.begin_transaction(id, &node("local"), vec![node("b")]);
    sync.abort(aborted).unwrap();

    clock.advance(Duration::seconds(30));
    assert_eq!(sync.transaction_state(tx), Some(TransactionState::Aborted));
    assert!(matches!(sync.mark_applied(tx, &node("b")), Err(EngineError::TransactionExpired(_))));
    assert!(matches!(sync.commit(tx), Err(EngineError::TransactionExpired(_))));

    let fresh = sync.begin_transaction(id, &node("local"), vec![]);
    assert_eq!(sync.sweep_expired_transactions(), 2);
    assert_eq!(sync.transaction_state(fresh), Some(TransactionState::Pending));
    assert_eq!(sync.transaction_state(tx), None);
}

// ═══════════════════════════════════════════════════════════════════════════
// History / Stats
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn history_is_bounded_and_newest_first() {
    let (sync, _) = manager();
    let id = EncounterId::new();
    for i in 0..20 {
        sync.start_sync(id, json!(i), &node("local"));
    }
    let history = sync.get_sync_history(100);
    assert_eq!(history.len(), 16);
    assert_eq!(history[0].version, 20);
    assert_eq!(history[15].version, 5);
    assert_eq!(sync.get_sync_history(2).len(), 2);
    assert_eq!(sync.statistics().total_syncs, 20);
    assert_eq!(sync.statistics().max_version, 20);
}

#[test]
fn stale_states_are_forgotten() {
    let (sync, clock) = manager();
    let old = EncounterId::new();
    sync.start_sync(old, json!(1), &node("local"));
    clock.advance(Duration::hours(3));
    let fresh = EncounterId::new();
    sync.start_sync(fresh, json!(1), &node("local"));

    assert_eq!(sync.forget_stale(Duration::hours(2)), 1);
    assert_eq!(sync.version(&old), 0);
    assert_eq!(sync.version(&fresh), 1);
    assert!(sync.forget(&fresh));
}

#[test]
fn concurrent_remote_writes_never_lose_versions() {
    let (sync, _) = manager();
    let sync = Arc::new(sync);
    let id = EncounterId::new();
    sync.start_sync(id, json!(0), &node("local"));

    let workers: Vec<_> = (0..4)
        .map(|t| {
            let sync = Arc::clone(&sync);
            thread::spawn(move || {
                let peer = NodeId::new(format!("peer-{t}"));
                let mut applied = 0u64;
                for i in 0..250 {
                    let current = sync.version(&id);
                    if sync.handle_remote_sync(id, json!(i), current, &peer).success {
                        applied += 1;
                    }
                }
                applied
            })
        })
        .collect();
    let applied: u64 = workers.into_iter().map(|w| w.join().unwrap()).sum();

    // Every accepted write moved the version by at least one
    assert!(sync.version(&id) > applied);
    let stats = sync.statistics();
    assert_eq!(stats.remote_applied, applied);
    assert_eq!(stats.remote_applied + stats.conflicts, 1000);
}
