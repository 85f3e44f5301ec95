//! Error types for engine operations

use crate::ids::{EncounterId, NodeId};
use raidmesh_types::PlacementStrategy;
use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced by the coordinator, sync manager and facade.
///
/// Read paths never return these; unknown IDs yield empty values instead.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("encounter {0} not found")]
    EncounterNotFound(EncounterId),

    #[error("node {0} not found")]
    NodeNotFound(NodeId),

    #[error("no eligible node among {candidates} candidates (strategy {strategy})")]
    PlacementFailure {
        candidates: usize,
        strategy: PlacementStrategy,
    },

    #[error("CONFLICT: encounter {encounter} is at version {local}, remote sent {remote}")]
    VersionConflict {
        encounter: EncounterId,
        local: u64,
        remote: u64,
    },

    #[error("NODE_UNAVAILABLE: encounter {encounter} is owned by inactive node {node}")]
    NodeUnavailable { encounter: EncounterId, node: NodeId },

    #[error("encounter {0} is already closed")]
    EncounterClosed(EncounterId),

    #[error("sync transaction {0} not found")]
    TransactionNotFound(Uuid),

    #[error("sync transaction {0} expired")]
    TransactionExpired(Uuid),

    #[error("boss system used before initialize()")]
    NotInitialized,

    #[error("failed to encode encounter snapshot")]
    Snapshot(#[from] serde_json::Error),

    #[error("damage database error: {0}")]
    Persistence(String),
}

pub type EngineResult<T> = Result<T, EngineError>;
