//! Outbound replication.
//!
//! Local mutations only enqueue a [`ReplicationMessage`]; a single
//! [`ReplicationWorker`] task drains the queue and pushes each message to
//! every active peer. A slow or unreachable peer therefore delays other
//! replications but never the write that produced them.

use dashmap::{DashMap, DashSet};
use hashbrown::HashSet;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::mpsc;

use super::registry::NodeRegistry;
use crate::balancer::{LoadBalancer, NodeInfo};
use crate::ids::{EncounterId, NodeId};
use crate::sync::DataSyncManager;

pub type ReplicationSender = mpsc::UnboundedSender<ReplicationMessage>;
pub type ReplicationReceiver = mpsc::UnboundedReceiver<ReplicationMessage>;

pub fn channel() -> (ReplicationSender, ReplicationReceiver) {
    mpsc::unbounded_channel()
}

/// One versioned write, as sent to peers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicationMessage {
    pub encounter: EncounterId,
    pub version: u64,
    pub origin: NodeId,
    pub payload: Value,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("peer {0} is unreachable")]
    Unreachable(NodeId),

    #[error("peer {peer} rejected the write: {message}")]
    Rejected { peer: NodeId, message: String },

    #[error("failed to encode replication message")]
    Encode(#[from] serde_json::Error),
}

/// Delivers replication messages to one peer. Framing is up to the
/// implementation.
pub trait PeerTransport: Send + Sync + 'static {
    fn push(
        &self,
        peer: &NodeInfo,
        message: &ReplicationMessage,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;
}

// ─────────────────────────────────────────────────────────────────────────────
// Loopback Transport
// ─────────────────────────────────────────────────────────────────────────────

/// In-process transport: each peer is a [`DataSyncManager`] in the same
/// process. Peers can be partitioned to simulate an unreachable node.
#[derive(Default, Clone)]
pub struct LoopbackTransport {
    replicas: Arc<DashMap<NodeId, Arc<DataSyncManager>>>,
    partitioned: Arc<DashSet<NodeId>>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect(&self, node: NodeId, replica: Arc<DataSyncManager>) {
        self.replicas.insert(node, replica);
    }

    pub fn disconnect(&self, node: &NodeId) -> Option<Arc<DataSyncManager>> {
        self.replicas.remove(node).map(|(_, r)| r)
    }

    pub fn replica(&self, node: &NodeId) -> Option<Arc<DataSyncManager>> {
        self.replicas.get(node).map(|r| Arc::clone(r.value()))
    }

    pub fn replicas(&self) -> Vec<(NodeId, Arc<DataSyncManager>)> {
        let mut all: Vec<_> = self
            .replicas
            .iter()
            .map(|r| (r.key().clone(), Arc::clone(r.value())))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    pub fn partition(&self, node: NodeId) {
        self.partitioned.insert(node);
    }

    pub fn heal(&self, node: &NodeId) {
        self.partitioned.remove(node);
    }
}

impl PeerTransport for LoopbackTransport {
    async fn push(&self, peer: &NodeInfo, message: &ReplicationMessage) -> Result<(), TransportError> {
        if self.partitioned.contains(&peer.id) {
            return Err(TransportError::Unreachable(peer.id.clone()));
        }
        let replica = self
            .replica(&peer.id)
            .ok_or_else(|| TransportError::Unreachable(peer.id.clone()))?;
        let outcome = replica.handle_remote_sync(
            message.encounter,
            message.payload.clone(),
            message.version,
            &message.origin,
        );
        if outcome.success {
            Ok(())
        } else {
            Err(TransportError::Rejected {
                peer: peer.id.clone(),
                message: outcome.message,
            })
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Worker
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FanOutReport {
    pub applied: Vec<NodeId>,
    pub failed: Vec<NodeId>,
    pub rejected: Vec<NodeId>,
    pub committed: bool,
}

pub struct ReplicationWorker<T: PeerTransport> {
    rx: ReplicationReceiver,
    transport: T,
    local: NodeId,
    registry: Arc<NodeRegistry>,
    sync: Arc<DataSyncManager>,
    balancer: Arc<LoadBalancer>,
    max_attempts: u32,
}

impl<T: PeerTransport> ReplicationWorker<T> {
    pub fn new(
        rx: ReplicationReceiver,
        transport: T,
        local: NodeId,
        registry: Arc<NodeRegistry>,
        sync: Arc<DataSyncManager>,
        balancer: Arc<LoadBalancer>,
        max_attempts: u32,
    ) -> Self {
        Self {
            rx,
            transport,
            local,
            registry,
            sync,
            balancer,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Drain the queue until every sender is dropped.
    pub async fn run(mut self) {
        tracing::debug!(node = %self.local, "Replication worker started");
        while let Some(message) = self.rx.recv().await {
            self.fan_out(&message).await;
        }
        tracing::debug!(node = %self.local, "Replication worker stopped");
    }

    /// Handle every message already queued, then return. Used by tests and
    /// by callers that drive replication by hand.
    pub async fn drain(&mut self) -> Vec<FanOutReport> {
        let mut reports = Vec::new();
        while let Ok(message) = self.rx.try_recv() {
            reports.push(self.fan_out(&message).await);
        }
        reports
    }

    /// Push one message to all active peers inside a sync transaction.
    /// Unreachable peers are retried; peers that applied are never sent the
    /// message again.
    pub async fn fan_out(&self, message: &ReplicationMessage) -> FanOutReport {
        let peers = self.registry.active_peers(&self.local);
        let mut report = FanOutReport::default();
        if peers.is_empty() {
            report.committed = true;
            return report;
        }

        let peer_ids: Vec<NodeId> = peers.iter().map(|p| p.id.clone()).collect();
        let tx = self.sync.begin_transaction(message.encounter, &self.local, peer_ids);
        let mut rejected: HashSet<NodeId> = HashSet::new();

        for attempt in 1..=self.max_attempts {
            let pending: Vec<NodeInfo> = self
                .sync
                .pending_peers(tx)
                .into_iter()
                .filter(|id| !rejected.contains(id))
                .filter_map(|id| peers.iter().find(|p| p.id == id).cloned())
                .collect();
            if pending.is_empty() {
                break;
            }

            for peer in &pending {
                let started = Instant::now();
                match self.transport.push(peer, message).await {
                    Ok(()) => {
                        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
                        self.balancer.record_success(&peer.id, elapsed_ms);
                        if let Err(e) = self.sync.mark_applied(tx, &peer.id) {
                            tracing::warn!(transaction = %tx, error = %e, "Replication outlived its transaction");
                            return self.finish(tx, report);
                        }
                    }
                    Err(TransportError::Rejected { peer: id, message: reason }) => {
                        tracing::warn!(
                            encounter = %message.encounter,
                            peer = %id,
                            reason = %reason,
                            "Peer rejected replicated write"
                        );
                        rejected.insert(id);
                    }
                    Err(e) => {
                        self.balancer.record_failure(&peer.id);
                        tracing::warn!(
                            encounter = %message.encounter,
                            peer = %peer.id,
                            attempt,
                            error = %e,
                            "Replication push failed"
                        );
                    }
                }
            }
        }

        report.rejected = rejected.into_iter().collect();
        report.rejected.sort();
        self.finish(tx, report)
    }

    fn finish(&self, tx: uuid::Uuid, mut report: FanOutReport) -> FanOutReport {
        let Some(transaction) = self.sync.transaction(tx) else {
            return report;
        };
        for peer in &transaction.peers {
            if transaction.has_applied(peer) {
                report.applied.push(peer.clone());
            } else if !report.rejected.contains(peer) {
                report.failed.push(peer.clone());
            }
        }

        let result = if transaction.is_fully_applied() {
            report.committed = true;
            self.sync.commit(tx)
        } else {
            self.sync.abort(tx)
        };
        if let Err(e) = result {
            tracing::debug!(transaction = %tx, error = %e, "Transaction already settled");
            report.committed = false;
        }

        tracing::debug!(
            encounter = %transaction.encounter,
            applied = report.applied.len(),
            failed = report.failed.len(),
            rejected = report.rejected.len(),
            committed = report.committed,
            "Replication fan-out finished"
        );
        report
    }
}
