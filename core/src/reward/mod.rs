//! Kill reward pools and their per-contributor split.

mod cooldown;


pub use cooldown::RewardCooldowns;

use chrono::{DateTime, Utc};
use hashbrown::HashMap;
use raidmesh_types::RewardConfig;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::ids::ContributorId;
use crate::progression::BossTier;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RewardPools {
    pub experience: f64,
    pub spirits: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerReward {
    pub contributor: ContributorId,
    pub damage: f64,
    /// Fraction of total damage, 0.0-1.0
    pub contribution: f64,
    pub experience: f64,
    pub spirits: f64,
    pub is_killer: bool,
    /// Reduced because of a recent claim for the same boss kind
    pub dampened: bool,
}

/// Splits the kill pools between contributors.
#[derive(Debug, Clone)]
pub struct RewardCalculator {
    config: RewardConfig,
    cooldowns: Arc<RewardCooldowns>,
}

impl RewardCalculator {
    pub fn new(config: RewardConfig, cooldowns: Arc<RewardCooldowns>) -> Self {
        Self { config, cooldowns }
    }

    pub fn config(&self) -> &RewardConfig {
        &self.config
    }

    pub fn cooldowns(&self) -> &Arc<RewardCooldowns> {
        &self.cooldowns
    }

    /// `base * tier * quality_mult * difficulty_mult` for experience and spirits.
    pub fn pools(&self, tier: BossTier, quality_mult: f64, difficulty_mult: f64) -> RewardPools {
        let scale = f64::from(tier.level()) * quality_mult * difficulty_mult;
        RewardPools {
            experience: self.config.base_experience * scale,
            spirits: self.config.base_spirits * scale,
        }
    }

    /// Split `pools` by damage share. A killer with no tracked damage still
    /// receives the floor fraction of each pool.
    pub fn distribute(
        &self,
        boss_kind: &str,
        pools: RewardPools,
        damage: &HashMap<ContributorId, f64>,
        killer: Option<&ContributorId>,
        now: DateTime<Utc>,
    ) -> Vec<PlayerReward> {
        let total: f64 = damage.values().filter(|d| **d > 0.0).sum();
        let mut rewards = Vec::with_capacity(damage.len() + 1);

        if total > 0.0 {
            for (contributor, &dealt) in damage.iter().filter(|(_, d)| **d > 0.0) {
                let share = dealt / total;
                let is_killer = killer == Some(contributor);
                let bonus = if is_killer { 1.0 + self.config.killer_bonus } else { 1.0 };
                rewards.push(PlayerReward {
                    contributor: contributor.clone(),
                    damage: dealt,
                    contribution: share,
                    experience: pools.experience * share * bonus,
                    spirits: pools.spirits * share * bonus,
                    is_killer,
                    dampened: false,
                });
            }
        }

        if let Some(killer) = killer
            && !rewards.iter().any(|r| &r.contributor == killer)
        {
            rewards.push(PlayerReward {
                contributor: killer.clone(),
                damage: 0.0,
                contribution: 0.0,
                experience: pools.experience * self.config.killer_floor,
                spirits: pools.spirits * self.config.killer_floor,
                is_killer: true,
                dampened: false,
            });
        }

        for reward in &mut rewards {
            if self.cooldowns.check_and_claim(&reward.contributor, boss_kind, now) {
                reward.experience *= self.config.dampening;
                reward.spirits *= self.config.dampening;
                reward.dampened = true;
            }
        }

        rewards.sort_by(|a, b| {
            b.damage
                .total_cmp(&a.damage)
                .then_with(|| a.contributor.cmp(&b.contributor))
        });
        rewards
    }
}

/// Number of item drops, never below one.
pub fn drop_count(base: u32, drop_multiplier: f64) -> u32 {
    let scaled = (f64::from(base) * drop_multiplier).round();
    if scaled.is_finite() && scaled >= 1.0 {
        scaled.min(f64::from(u32::MAX)) as u32
    } else {
        1
    }
}

/// Chance of a rare drop, capped at certainty.
pub fn rarity_probability(base: f64, quality_multiplier: f64) -> f64 {
    (base * quality_multiplier).clamp(0.0, 1.0)
}
