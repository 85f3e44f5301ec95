//! Versioned encounter replication.
//!
//! Every encounter has one [`VersionedState`]. The owning node advances it
//! through [`DataSyncManager::start_sync`]; replicas apply peer writes through
//! [`DataSyncManager::handle_remote_sync`]. Both paths run their
//! read-compare-write inside a single map entry guard, so decisions for the
//! same encounter are serialized.

mod resolver;
mod transaction;

#[cfg(test)]
mod sync_tests;

pub use resolver::{
    ConflictResolver, FirstWriteWins, LastWriteWins, MergeMax, RemoteWrite, merge_max, resolver_for,
};
pub use transaction::{SyncTransaction, TransactionState};

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Serialize;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use uuid::Uuid;

use crate::clock::SharedClock;
use crate::error::{EngineError, EngineResult};
use crate::ids::{EncounterId, NodeId};
use crate::locks::{lock, read, write};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VersionedState {
    pub version: u64,
    pub data: Value,
    pub last_writer: NodeId,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SyncKind {
    Local,
    Remote,
    Conflict,
    Resolved,
}

/// One entry of the observability history.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncRecord {
    pub encounter: EncounterId,
    pub kind: SyncKind,
    pub node: NodeId,
    /// Version after the operation (local version for a conflict)
    pub version: u64,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncOutcome {
    pub success: bool,
    pub version: u64,
    pub message: String,
    /// Transaction holding the rejected write, when `success` is false
    pub conflict: Option<Uuid>,
}

impl SyncOutcome {
    pub fn is_conflict(&self) -> bool {
        self.conflict.is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncStats {
    pub total_syncs: u64,
    pub remote_applied: u64,
    pub conflicts: u64,
    pub tracked_encounters: usize,
    pub pending_transactions: usize,
    pub max_version: u64,
}

pub struct DataSyncManager {
    node: NodeId,
    states: DashMap<EncounterId, VersionedState>,
    transactions: DashMap<Uuid, SyncTransaction>,
    history: Mutex<VecDeque<SyncRecord>>,
    history_capacity: usize,
    transaction_ttl: Duration,
    resolver: RwLock<Arc<dyn ConflictResolver>>,
    clock: SharedClock,
    total_syncs: AtomicU64,
    remote_applied: AtomicU64,
    conflicts: AtomicU64,
}

impl DataSyncManager {
    pub fn new(
        node: NodeId,
        history_capacity: usize,
        transaction_ttl: Duration,
        resolver: Arc<dyn ConflictResolver>,
        clock: SharedClock,
    ) -> Self {
        Self {
            node,
            states: DashMap::new(),
            transactions: DashMap::new(),
            history: Mutex::new(VecDeque::with_capacity(history_capacity.min(1024))),
            history_capacity: history_capacity.max(1),
            transaction_ttl,
            resolver: RwLock::new(resolver),
            clock,
            total_syncs: AtomicU64::new(0),
            remote_applied: AtomicU64::new(0),
            conflicts: AtomicU64::new(0),
        }
    }

    pub fn node(&self) -> &NodeId {
        &self.node
    }

    pub fn set_resolver(&self, resolver: Arc<dyn ConflictResolver>) {
        tracing::info!(resolver = resolver.name(), "Conflict resolver changed");
        *write(&self.resolver) = resolver;
    }

    pub fn resolver_name(&self) -> &'static str {
        read(&self.resolver).name()
    }

    fn push_history(&self, record: SyncRecord) {
        let mut history = lock(&self.history);
        if history.len() >= self.history_capacity {
            history.pop_front();
        }
        history.push_back(record);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Write Paths
    // ─────────────────────────────────────────────────────────────────────────

    /// Local write path: version 1 for a new encounter, otherwise +1.
    pub fn start_sync(&self, encounter: EncounterId, payload: Value, origin: &NodeId) -> u64 {
        let now = self.clock.now();
        let version = match self.states.entry(encounter) {
            Entry::Occupied(mut slot) => {
                let state = slot.get_mut();
                state.version += 1;
                state.data = payload;
                state.last_writer = origin.clone();
                state.updated_at = now;
                state.version
            }
            Entry::Vacant(slot) => {
                slot.insert(VersionedState {
                    version: 1,
                    data: payload,
                    last_writer: origin.clone(),
                    updated_at: now,
                });
                1
            }
        };

        self.total_syncs.fetch_add(1, Ordering::Relaxed);
        self.push_history(SyncRecord {
            encounter,
            kind: SyncKind::Local,
            node: origin.clone(),
            version,
            at: now,
        });
        tracing::debug!(encounter = %encounter, version, "Local sync");
        version
    }

    /// Replication path. A write whose version is at least the local one is
    /// applied and bumps the local version by one; an unknown encounter is
    /// adopted at version 1. A stale write is not applied, it is parked in a
    /// pending transaction for [`Self::resolve_conflict`].
    pub fn handle_remote_sync(
        &self,
        encounter: EncounterId,
        payload: Value,
        remote_version: u64,
        origin: &NodeId,
    ) -> SyncOutcome {
        let now = self.clock.now();
        let applied = match self.states.entry(encounter) {
            Entry::Occupied(mut slot) => {
                let state = slot.get_mut();
                if remote_version >= state.version {
                    state.version += 1;
                    state.data = payload;
                    state.last_writer = origin.clone();
                    state.updated_at = now;
                    Ok(state.version)
                } else {
                    Err((state.version, payload))
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(VersionedState {
                    version: 1,
                    data: payload,
                    last_writer: origin.clone(),
                    updated_at: now,
                });
                Ok(1)
            }
        };

        self.total_syncs.fetch_add(1, Ordering::Relaxed);
        match applied {
            Ok(version) => {
                self.remote_applied.fetch_add(1, Ordering::Relaxed);
                self.push_history(SyncRecord {
                    encounter,
                    kind: SyncKind::Remote,
                    node: origin.clone(),
                    version,
                    at: now,
                });
                SyncOutcome {
                    success: true,
                    version,
                    message: format!("applied remote version {remote_version} from {origin}"),
                    conflict: None,
                }
            }
            Err((local_version, payload)) => {
                self.conflicts.fetch_add(1, Ordering::Relaxed);
                let mut tx = SyncTransaction::new(
                    encounter,
                    origin.clone(),
                    Vec::new(),
                    now,
                    now + self.transaction_ttl,
                );
                tx.conflict = Some(RemoteWrite {
                    payload,
                    version: remote_version,
                    node: origin.clone(),
                });
                let tx_id = tx.id;
                self.transactions.insert(tx_id, tx);

                self.push_history(SyncRecord {
                    encounter,
                    kind: SyncKind::Conflict,
                    node: origin.clone(),
                    version: local_version,
                    at: now,
                });
                let message = EngineError::VersionConflict {
                    encounter,
                    local: local_version,
                    remote: remote_version,
                }
                .to_string();
                tracing::warn!(encounter = %encounter, local_version, remote_version, origin = %origin, "Stale remote sync");
                SyncOutcome {
                    success: false,
                    version: local_version,
                    message,
                    conflict: Some(tx_id),
                }
            }
        }
    }

    /// Settle a conflict recorded by [`Self::handle_remote_sync`] with the
    /// current resolver. The state ends at `max(local, remote) + 1`.
    pub fn resolve_conflict(&self, transaction: Uuid) -> EngineResult<SyncOutcome> {
        let now = self.clock.now();
        let (encounter, remote) = {
            let tx = self
                .transactions
                .get(&transaction)
                .ok_or(EngineError::TransactionNotFound(transaction))?;
            if tx.effective_state(now) != TransactionState::Pending {
                return Err(EngineError::TransactionExpired(transaction));
            }
            let remote = tx
                .conflict
                .clone()
                .ok_or(EngineError::TransactionNotFound(transaction))?;
            (tx.encounter, remote)
        };

        let resolver = Arc::clone(&read(&self.resolver));
        let version = match self.states.entry(encounter) {
            Entry::Occupied(mut slot) => {
                let state = slot.get_mut();
                let (data, writer) = resolver.resolve(state, &remote);
                state.version = state.version.max(remote.version) + 1;
                state.data = data;
                state.last_writer = writer;
                state.updated_at = now;
                state.version
            }
            Entry::Vacant(slot) => {
                let version = remote.version + 1;
                slot.insert(VersionedState {
                    version,
                    data: remote.payload.clone(),
                    last_writer: remote.node.clone(),
                    updated_at: now,
                });
                version
            }
        };

        if let Some(mut tx) = self.transactions.get_mut(&transaction) {
            tx.set_state(TransactionState::Committed);
        }
        self.push_history(SyncRecord {
            encounter,
            kind: SyncKind::Resolved,
            node: remote.node.clone(),
            version,
            at: now,
        });
        tracing::info!(encounter = %encounter, version, resolver = resolver.name(), "Conflict resolved");
        Ok(SyncOutcome {
            success: true,
            version,
            message: format!("resolved with {}", resolver.name()),
            conflict: None,
        })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Transactions
    // ─────────────────────────────────────────────────────────────────────────

    pub fn begin_transaction(&self, encounter: EncounterId, initiating_node: &NodeId, peers: Vec<NodeId>) -> Uuid {
        let now = self.clock.now();
        let tx = SyncTransaction::new(encounter, initiating_node.clone(), peers, now, now + self.transaction_ttl);
        let id = tx.id;
        self.transactions.insert(id, tx);
        id
    }

    fn with_pending<R>(&self, transaction: Uuid, f: impl FnOnce(&mut SyncTransaction) -> R) -> EngineResult<R> {
        let now = self.clock.now();
        let mut tx = self
            .transactions
            .get_mut(&transaction)
            .ok_or(EngineError::TransactionNotFound(transaction))?;
        match tx.effective_state(now) {
            TransactionState::Pending => Ok(f(tx.value_mut())),
            _ => Err(EngineError::TransactionExpired(transaction)),
        }
    }

    /// Record that `peer` applied the write. Ok(false) if it already had.
    pub fn mark_applied(&self, transaction: Uuid, peer: &NodeId) -> EngineResult<bool> {
        self.with_pending(transaction, |tx| tx.mark_applied(peer))
    }

    pub fn pending_peers(&self, transaction: Uuid) -> Vec<NodeId> {
        self.transactions
            .get(&transaction)
            .map(|tx| tx.pending_peers())
            .unwrap_or_default()
    }

    pub fn commit(&self, transaction: Uuid) -> EngineResult<()> {
        self.with_pending(transaction, |tx| tx.set_state(TransactionState::Committed))
    }

    pub fn abort(&self, transaction: Uuid) -> EngineResult<()> {
        self.with_pending(transaction, |tx| tx.set_state(TransactionState::Aborted))
    }

    pub fn transaction_state(&self, transaction: Uuid) -> Option<TransactionState> {
        let now = self.clock.now();
        self.transactions
            .get(&transaction)
            .map(|tx| tx.effective_state(now))
    }

    pub fn transaction(&self, transaction: Uuid) -> Option<SyncTransaction> {
        self.transactions.get(&transaction).map(|tx| tx.clone())
    }

    /// Transactions holding a rejected write that is still resolvable.
    pub fn open_conflicts(&self) -> Vec<Uuid> {
        let now = self.clock.now();
        self.transactions
            .iter()
            .filter(|tx| tx.is_conflict() && tx.effective_state(now) == TransactionState::Pending)
            .map(|tx| tx.id)
            .collect()
    }

    /// Drop every transaction past its expiry. Returns the count removed.
    pub fn sweep_expired_transactions(&self) -> usize {
        let now = self.clock.now();
        let before = self.transactions.len();
        self.transactions.retain(|_, tx| now < tx.expires_at);
        let removed = before.saturating_sub(self.transactions.len());
        if removed > 0 {
            tracing::debug!(removed, "Swept expired sync transactions");
        }
        removed
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────────────────────

    pub fn get_state(&self, encounter: &EncounterId) -> Option<VersionedState> {
        self.states.get(encounter).map(|s| s.clone())
    }

    /// Current version, 0 when the encounter was never synced.
    pub fn version(&self, encounter: &EncounterId) -> u64 {
        self.states.get(encounter).map_or(0, |s| s.version)
    }

    pub fn forget(&self, encounter: &EncounterId) -> bool {
        self.states.remove(encounter).is_some()
    }

    /// Drop versioned states not written within `max_age`.
    pub fn forget_stale(&self, max_age: Duration) -> usize {
        let cutoff = self.clock.now() - max_age;
        let before = self.states.len();
        self.states.retain(|_, s| s.updated_at >= cutoff);
        before.saturating_sub(self.states.len())
    }

    /// Most recent `limit` operations across all encounters, newest first.
    pub fn get_sync_history(&self, limit: usize) -> Vec<SyncRecord> {
        lock(&self.history).iter().rev().take(limit).cloned().collect()
    }

    pub fn statistics(&self) -> SyncStats {
        let now = self.clock.now();
        SyncStats {
            total_syncs: self.total_syncs.load(Ordering::Relaxed),
            remote_applied: self.remote_applied.load(Ordering::Relaxed),
            conflicts: self.conflicts.load(Ordering::Relaxed),
            tracked_encounters: self.states.len(),
            pending_transactions: self
                .transactions
                .iter()
                .filter(|tx| tx.effective_state(now) == TransactionState::Pending)
                .count(),
            max_version: self.states.iter().map(|s| s.version).max().unwrap_or(0),
        }
    }
}
