use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::difficulty::{DifficultyInputs, DifficultyState};
use crate::ids::EncounterId;
use crate::progression::{AttributeMultipliers, BossTier};
use crate::quality::QualityRating;
use crate::reward::{PlayerReward, RewardPools};

/// Read-only view of a live encounter's calculators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleRecord {
    pub encounter: EncounterId,
    pub boss_kind: String,
    pub tier: BossTier,
    pub difficulty: DifficultyState,
    pub inputs: DifficultyInputs,
    pub multipliers: AttributeMultipliers,
    pub created_at: DateTime<Utc>,
}

/// Outcome of [`super::LifecycleManager::update_difficulty`].
#[derive(Debug, Clone, PartialEq)]
pub struct DifficultyUpdate {
    pub record: LifecycleRecord,
    /// False when the throttle returned the cached state
    pub recomputed: bool,
}

/// What the caller knows about the fight at the moment of the kill.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KillReport {
    pub duration: Duration,
    pub deaths: u32,
    pub weakened: bool,
    pub recent_kill: bool,
}

impl Default for KillReport {
    fn default() -> Self {
        Self {
            duration: Duration::zero(),
            deaths: 0,
            weakened: false,
            recent_kill: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KillSummary {
    pub encounter: EncounterId,
    pub boss_kind: String,
    pub tier: BossTier,
    pub participants: usize,
    pub quality: QualityRating,
    pub difficulty: DifficultyState,
    pub difficulty_multiplier: f64,
    pub drop_multiplier: f64,
    pub pools: RewardPools,
    pub killed_at: DateTime<Utc>,
}

/// Result of finalizing an encounter. Empty when the encounter was
/// already finalized or never initialized.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KillSettlement {
    pub summary: Option<KillSummary>,
    pub rewards: Vec<PlayerReward>,
}

impl KillSettlement {
    pub fn is_empty(&self) -> bool {
        self.summary.is_none() && self.rewards.is_empty()
    }

    pub fn total_experience(&self) -> f64 {
        self.rewards.iter().map(|r| r.experience).sum()
    }
}
