use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;

use crate::adapters::SpawnLocation;
use crate::ids::{ContributorId, EncounterId, NodeId};
use crate::ledger::LedgerSnapshot;
use crate::progression::BossTier;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EncounterStatus {
    Spawned,
    Active,
    Dead,
    Despawned,
}

impl EncounterStatus {
    /// Dead and despawned encounters accept no further writes.
    pub fn is_terminal(self) -> bool {
        matches!(self, EncounterStatus::Dead | EncounterStatus::Despawned)
    }
}

impl fmt::Display for EncounterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EncounterStatus::Spawned => "SPAWNED",
            EncounterStatus::Active => "ACTIVE",
            EncounterStatus::Dead => "DEAD",
            EncounterStatus::Despawned => "DESPAWNED",
        };
        f.write_str(s)
    }
}

/// Authoritative state of one encounter, as held by the coordinator and
/// replicated to peers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncounterData {
    pub id: EncounterId,
    pub boss_kind: String,
    pub tier: BossTier,
    pub health: f64,
    pub max_health: f64,
    pub status: EncounterStatus,
    pub owner_node: NodeId,
    pub involved_contributors: BTreeSet<ContributorId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<SpawnLocation>,
    /// Placement preference, reused when ownership fails over
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EncounterData {
    pub fn new(
        id: EncounterId,
        boss_kind: &str,
        tier: BossTier,
        max_health: f64,
        owner_node: NodeId,
        location: Option<SpawnLocation>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            boss_kind: boss_kind.to_string(),
            tier,
            health: max_health,
            max_health,
            status: EncounterStatus::Spawned,
            owner_node,
            involved_contributors: BTreeSet::new(),
            location,
            region: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Subtract `amount` from health without going below zero. The first hit
    /// moves a spawned encounter to active.
    pub fn apply_damage(&mut self, contributor: &ContributorId, amount: f64, now: DateTime<Utc>) -> f64 {
        self.health = (self.health - amount).max(0.0);
        self.involved_contributors.insert(contributor.clone());
        if self.status == EncounterStatus::Spawned {
            self.status = EncounterStatus::Active;
        }
        self.updated_at = now;
        self.health
    }

    pub fn mark_dead(&mut self, now: DateTime<Utc>) {
        self.status = EncounterStatus::Dead;
        self.health = 0.0;
        self.updated_at = now;
    }

    pub fn mark_despawned(&mut self, now: DateTime<Utc>) {
        self.status = EncounterStatus::Despawned;
        self.updated_at = now;
    }

    pub fn health_fraction(&self) -> f64 {
        if self.max_health > 0.0 {
            self.health / self.max_health
        } else {
            0.0
        }
    }
}

/// Replicated payload: encounter data plus the ledger at the time of the write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncounterSnapshot {
    pub data: EncounterData,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ledger: Option<LedgerSnapshot>,
}

impl EncounterSnapshot {
    pub fn to_value(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }

    pub fn from_value(value: &Value) -> serde_json::Result<Self> {
        Self::deserialize(value)
    }
}
