//! Boss tiers and attribute multipliers.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::difficulty::power_modifier;

pub const MAX_HEALTH_MULTIPLIER: f64 = 5.0;
pub const MAX_DAMAGE_MULTIPLIER: f64 = 3.0;
pub const MAX_SPEED_MULTIPLIER: f64 = 2.0;
pub const MAX_ARMOR_MULTIPLIER: f64 = 1.5;
pub const MAX_RANGE_MULTIPLIER: f64 = 1.5;
pub const MAX_DROP_MULTIPLIER: f64 = 3.0;

const MAX_KILL_MODIFIER: f64 = 2.5;
const MAX_PARTICIPANT_SCALE: f64 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum BossTier {
    Normal = 1,
    Elite = 2,
    World = 3,
    Legendary = 4,
}

impl BossTier {
    /// Map a raw tier level into 1..=4, clamping (with a warning) when out of range.
    pub fn from_level(level: i64) -> Self {
        let tier = match level {
            1 => Some(BossTier::Normal),
            2 => Some(BossTier::Elite),
            3 => Some(BossTier::World),
            4 => Some(BossTier::Legendary),
            _ => None,
        };
        tier.unwrap_or_else(|| {
            let clamped = if level < 1 { BossTier::Normal } else { BossTier::Legendary };
            tracing::warn!(level, clamped = clamped.level(), "Tier out of range, clamping");
            clamped
        })
    }

    pub fn level(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            BossTier::Normal => "Normal",
            BossTier::Elite => "Elite",
            BossTier::World => "World",
            BossTier::Legendary => "Legendary",
        }
    }

    pub fn health_multiplier(self) -> f64 {
        match self {
            BossTier::Normal => 1.0,
            BossTier::Elite => 1.5,
            BossTier::World => 2.0,
            BossTier::Legendary => 2.5,
        }
    }

    pub fn damage_multiplier(self) -> f64 {
        match self {
            BossTier::Normal => 1.0,
            BossTier::Elite => 1.3,
            BossTier::World => 1.6,
            BossTier::Legendary => 2.0,
        }
    }

    pub fn armor_multiplier(self) -> f64 {
        match self {
            BossTier::Normal => 1.0,
            BossTier::Elite => 1.15,
            BossTier::World => 1.3,
            BossTier::Legendary => 1.5,
        }
    }
}

impl std::fmt::Display for BossTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (T{})", self.name(), self.level())
    }
}

/// `1 + 0.1` per participant beyond the first, at most 2x.
pub fn participant_scale(participants: usize) -> f64 {
    (1.0 + 0.1 * participants.saturating_sub(1) as f64).min(MAX_PARTICIPANT_SCALE)
}

/// Tier health multiplier scaled by participant count, capped at the health ceiling.
pub fn attribute_multiplier(tier: BossTier, participants: usize) -> f64 {
    (tier.health_multiplier() * participant_scale(participants)).min(MAX_HEALTH_MULTIPLIER)
}

// ─────────────────────────────────────────────────────────────────────────────
// Per-encounter Progression
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AttributeMultipliers {
    pub health: f64,
    pub damage: f64,
    pub speed: f64,
    pub armor: f64,
    pub attack_range: f64,
    pub drop: f64,
}

impl AttributeMultipliers {
    pub fn named(&self) -> [(&'static str, f64); 6] {
        [
            ("health", self.health),
            ("damage", self.damage),
            ("speed", self.speed),
            ("armor", self.armor),
            ("attack_range", self.attack_range),
            ("drop", self.drop),
        ]
    }
}

impl Default for AttributeMultipliers {
    fn default() -> Self {
        Self {
            health: 1.0,
            damage: 1.0,
            speed: 1.0,
            armor: 1.0,
            attack_range: 1.0,
            drop: 1.0,
        }
    }
}

/// Attribute multipliers for one encounter, recalculated at most once per
/// `cache_for`.
#[derive(Debug, Clone)]
pub struct AttributeProgression {
    tier: BossTier,
    kill_count: u32,
    avg_power: f64,
    recommended_power: f64,
    multipliers: AttributeMultipliers,
    computed_at: Option<DateTime<Utc>>,
    cache_for: Duration,
}

impl AttributeProgression {
    pub fn new(tier: BossTier, cache_for: Duration) -> Self {
        Self {
            tier,
            kill_count: 0,
            avg_power: 0.0,
            recommended_power: 0.0,
            multipliers: AttributeMultipliers::default(),
            computed_at: None,
            cache_for,
        }
    }

    pub fn tier(&self) -> BossTier {
        self.tier
    }

    pub fn set_kill_count(&mut self, kills: u32) {
        self.kill_count = kills;
        self.computed_at = None;
    }

    pub fn set_power(&mut self, avg_power: f64, recommended_power: f64) {
        self.avg_power = avg_power;
        self.recommended_power = recommended_power;
        self.computed_at = None;
    }

    fn kill_modifier(&self) -> f64 {
        (1.0 + 0.05 * self.kill_count as f64).min(MAX_KILL_MODIFIER)
    }

    pub fn multipliers(&mut self, now: DateTime<Utc>) -> AttributeMultipliers {
        if let Some(at) = self.computed_at
            && now - at < self.cache_for
        {
            return self.multipliers;
        }
        self.recalculate(now)
    }

    pub fn recalculate(&mut self, now: DateTime<Utc>) -> AttributeMultipliers {
        let kill = self.kill_modifier();
        let power = power_modifier(self.avg_power, self.recommended_power);
        let tier = self.tier;

        self.multipliers = AttributeMultipliers {
            health: (tier.health_multiplier() * kill * power).min(MAX_HEALTH_MULTIPLIER),
            damage: (tier.damage_multiplier() * kill * power).min(MAX_DAMAGE_MULTIPLIER),
            speed: (1.0 + (kill - 1.0) * 0.5).min(MAX_SPEED_MULTIPLIER),
            armor: (tier.armor_multiplier() * (1.0 + (kill - 1.0) * 0.2)).min(MAX_ARMOR_MULTIPLIER),
            attack_range: (1.0 + (kill - 1.0) * 0.2).min(MAX_RANGE_MULTIPLIER),
            drop: (1.0 + (f64::from(tier.level()) - 1.0) * 0.25 + (kill - 1.0) * 0.5)
                .min(MAX_DROP_MULTIPLIER),
        };
        self.computed_at = Some(now);
        self.multipliers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_range_tiers_clamp() {
        assert_eq!(BossTier::from_level(0), BossTier::Normal);
        assert_eq!(BossTier::from_level(-7), BossTier::Normal);
        assert_eq!(BossTier::from_level(3), BossTier::World);
        assert_eq!(BossTier::from_level(9), BossTier::Legendary);
    }

    #[test]
    fn tier_tables() {
        let health: Vec<_> = [1, 2, 3, 4]
            .map(|l| BossTier::from_level(l).health_multiplier())
            .to_vec();
        assert_eq!(health, vec![1.0, 1.5, 2.0, 2.5]);
        assert_eq!(BossTier::Elite.damage_multiplier(), 1.3);
        assert_eq!(BossTier::Legendary.damage_multiplier(), 2.0);
    }

    #[test]
    fn participants_scale_health_up_to_the_cap() {
        assert_eq!(attribute_multiplier(BossTier::Normal, 1), 1.0);
        assert_eq!(attribute_multiplier(BossTier::Normal, 0), 1.0);
        assert!((attribute_multiplier(BossTier::World, 6) - 3.0).abs() < 1e-9);
        assert_eq!(attribute_multiplier(BossTier::Legendary, 40), MAX_HEALTH_MULTIPLIER);
    }

    #[test]
    fn kill_count_raises_multipliers_within_caps() {
        let now = Utc::now();
        let mut progression = AttributeProgression::new(BossTier::Legendary, Duration::seconds(1));
        let fresh = progression.multipliers(now);
        assert_eq!(fresh.health, 2.5);
        assert_eq!(fresh.armor, 1.5);

        progression.set_kill_count(100);
        let veteran = progression.multipliers(now);
        assert_eq!(veteran.health, MAX_HEALTH_MULTIPLIER);
        assert_eq!(veteran.damage, MAX_DAMAGE_MULTIPLIER);
        assert_eq!(veteran.speed, 1.75);
        assert_eq!(veteran.drop, 2.5);
    }

    #[test]
    fn multipliers_are_cached_for_the_window() {
        let now = Utc::now();
        let mut progression = AttributeProgression::new(BossTier::Normal, Duration::seconds(1));
        progression.set_power(100.0, 100.0);
        let first = progression.multipliers(now);

        // Mutating through the setter invalidates the cache
        progression.set_power(40.0, 100.0);
        assert_eq!(progression.multipliers(now).health, 2.0);
        assert_ne!(first.health, 2.0);
    }
}
