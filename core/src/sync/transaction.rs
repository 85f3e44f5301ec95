use chrono::{DateTime, Utc};
use hashbrown::HashSet;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::resolver::RemoteWrite;
use crate::ids::{EncounterId, NodeId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionState {
    Pending,
    Committed,
    Aborted,
}

impl std::fmt::Display for TransactionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TransactionState::Pending => "PENDING",
            TransactionState::Committed => "COMMITTED",
            TransactionState::Aborted => "ABORTED",
        };
        f.write_str(s)
    }
}

/// A multi-step replication. Peers that already applied the write are
/// remembered so a retry never applies it twice.
#[derive(Debug, Clone)]
pub struct SyncTransaction {
    pub id: Uuid,
    pub encounter: EncounterId,
    pub initiating_node: NodeId,
    state: TransactionState,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub peers: Vec<NodeId>,
    applied: HashSet<NodeId>,
    /// Set when the transaction records a rejected remote write
    pub(crate) conflict: Option<RemoteWrite>,
}

impl SyncTransaction {
    pub(crate) fn new(
        encounter: EncounterId,
        initiating_node: NodeId,
        peers: Vec<NodeId>,
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            encounter,
            initiating_node,
            state: TransactionState::Pending,
            created_at,
            expires_at,
            peers,
            applied: HashSet::new(),
            conflict: None,
        }
    }

    /// State as any reader must see it: an expired pending transaction is aborted.
    pub fn effective_state(&self, now: DateTime<Utc>) -> TransactionState {
        match self.state {
            TransactionState::Pending if now >= self.expires_at => TransactionState::Aborted,
            state => state,
        }
    }

    pub(crate) fn set_state(&mut self, state: TransactionState) {
        self.state = state;
    }

    /// Returns false if `peer` had already applied the write.
    pub(crate) fn mark_applied(&mut self, peer: &NodeId) -> bool {
        self.applied.insert(peer.clone())
    }

    pub fn has_applied(&self, peer: &NodeId) -> bool {
        self.applied.contains(peer)
    }

    pub fn pending_peers(&self) -> Vec<NodeId> {
        self.peers
            .iter()
            .filter(|p| !self.applied.contains(*p))
            .cloned()
            .collect()
    }

    pub fn is_fully_applied(&self) -> bool {
        self.peers.iter().all(|p| self.applied.contains(p))
    }

    pub fn is_conflict(&self) -> bool {
        self.conflict.is_some()
    }
}
