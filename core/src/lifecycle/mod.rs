//! Encounter lifecycle: `UNINITIALIZED -> ACTIVE -> FINALIZED`.
//!
//! The manager owns one difficulty calculator and one attribute progression
//! per live encounter. Finalization removes the entry atomically, so exactly
//! one caller computes rewards for a given kill.

mod settlement;

#[cfg(test)]
mod lifecycle_tests;

pub use settlement::{DifficultyUpdate, KillReport, KillSettlement, KillSummary, LifecycleRecord};

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use raidmesh_types::DifficultyConfig;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::clock::SharedClock;
use crate::difficulty::{DifficultyCalculator, DifficultyInputs, DifficultyState, KillHistory};
use crate::ids::{ContributorId, EncounterId};
use crate::ledger::DamageLedger;
use crate::progression::{AttributeProgression, BossTier};
use crate::quality::{self, KillContext};
use crate::reward::RewardCalculator;

const ATTRIBUTE_CACHE_MS: i64 = 1000;

struct LiveEncounter {
    boss_kind: String,
    tier: BossTier,
    recommended_power: f64,
    difficulty: DifficultyCalculator,
    progression: AttributeProgression,
    created_at: DateTime<Utc>,
}

impl LiveEncounter {
    fn record(&mut self, encounter: EncounterId, now: DateTime<Utc>) -> LifecycleRecord {
        LifecycleRecord {
            encounter,
            boss_kind: self.boss_kind.clone(),
            tier: self.tier,
            difficulty: self.difficulty.state(),
            inputs: self.difficulty.inputs(),
            multipliers: self.progression.multipliers(now),
            created_at: self.created_at,
        }
    }
}

pub struct LifecycleManager {
    live: DashMap<EncounterId, LiveEncounter>,
    ledger: Arc<DamageLedger>,
    kill_history: Arc<KillHistory>,
    rewards: RewardCalculator,
    config: DifficultyConfig,
    clock: SharedClock,
    started: AtomicBool,
}

impl LifecycleManager {
    pub fn new(
        ledger: Arc<DamageLedger>,
        rewards: RewardCalculator,
        kill_history: Arc<KillHistory>,
        config: DifficultyConfig,
        clock: SharedClock,
    ) -> Self {
        Self {
            live: DashMap::new(),
            ledger,
            kill_history,
            rewards,
            config,
            clock,
            started: AtomicBool::new(false),
        }
    }

    pub fn start(&self) {
        self.started.store(true, Ordering::Release);
        tracing::info!("Lifecycle manager started");
    }

    /// Stop accepting new encounters and drop all live state.
    pub fn shutdown(&self) {
        self.started.store(false, Ordering::Release);
        let dropped = self.live.len();
        self.live.clear();
        tracing::info!(dropped, "Lifecycle manager stopped");
    }

    pub fn is_initialized(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    pub fn kill_history(&self) -> &Arc<KillHistory> {
        &self.kill_history
    }

    pub fn rewards(&self) -> &RewardCalculator {
        &self.rewards
    }

    fn update_interval(&self) -> Duration {
        Duration::milliseconds(i64::try_from(self.config.update_interval_ms).unwrap_or(i64::MAX))
    }

    fn inputs_for(&self, boss_kind: &str, participants: usize, avg_power: f64, recommended: f64) -> DifficultyInputs {
        DifficultyInputs {
            participant_count: participants,
            avg_power,
            recommended_power: recommended,
            total_kills: self.kill_history.total(boss_kind),
            recent_kills: self.kill_history.recent(boss_kind, self.clock.now()),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Transitions
    // ─────────────────────────────────────────────────────────────────────────

    /// Wire fresh calculators for an encounter. Returns `None` when the
    /// manager has not been started.
    pub fn initialize(
        &self,
        encounter: EncounterId,
        boss_kind: &str,
        tier: BossTier,
        avg_power: f64,
        recommended_power: f64,
        participant_count: usize,
    ) -> Option<LifecycleRecord> {
        if !self.is_initialized() {
            tracing::error!(encounter = %encounter, "initialize() called before lifecycle manager start");
            return None;
        }
        let now = self.clock.now();
        let inputs = self.inputs_for(boss_kind, participant_count, avg_power, recommended_power);

        let mut difficulty = DifficultyCalculator::new(self.update_interval());
        difficulty.force_update(inputs, now);

        let mut progression = AttributeProgression::new(tier, Duration::milliseconds(ATTRIBUTE_CACHE_MS));
        progression.set_kill_count(inputs.total_kills);
        progression.set_power(avg_power, recommended_power);

        let mut live = LiveEncounter {
            boss_kind: boss_kind.to_string(),
            tier,
            recommended_power,
            difficulty,
            progression,
            created_at: now,
        };
        let record = live.record(encounter, now);
        self.live.insert(encounter, live);

        tracing::debug!(
            encounter = %encounter,
            boss_kind,
            tier = tier.level(),
            score = record.difficulty.score,
            "Lifecycle initialized"
        );
        Some(record)
    }

    /// Feed new fight conditions into the difficulty calculator. Throttled by
    /// the update interval; returns the (possibly cached) state.
    pub fn update_difficulty(
        &self,
        encounter: &EncounterId,
        participant_count: usize,
        avg_power: f64,
    ) -> Option<DifficultyUpdate> {
        let now = self.clock.now();
        let mut live = self.live.get_mut(encounter)?;
        let inputs = self.inputs_for(&live.boss_kind, participant_count, avg_power, live.recommended_power);
        let before = live.difficulty.state();
        let after = live.difficulty.update(inputs, now);
        let recomputed = after.computed_at != before.computed_at;
        if recomputed {
            live.progression.set_power(avg_power, inputs.recommended_power);
            live.progression.set_kill_count(inputs.total_kills);
        }
        Some(DifficultyUpdate {
            record: live.record(*encounter, now),
            recomputed,
        })
    }

    /// One-shot difficulty outside the live throttle. A known boss kind
    /// brings its kill history into the score.
    pub fn evaluate_difficulty(
        &self,
        boss_kind: Option<&str>,
        participant_count: usize,
        avg_power: f64,
        recommended_power: f64,
    ) -> DifficultyState {
        let inputs = match boss_kind {
            Some(kind) => self.inputs_for(kind, participant_count, avg_power, recommended_power),
            None => DifficultyInputs {
                participant_count,
                avg_power,
                recommended_power,
                ..DifficultyInputs::default()
            },
        };
        DifficultyCalculator::new(Duration::zero()).force_update(inputs, self.clock.now())
    }

    /// Finalize a kill: remove the encounter, rate it, split rewards from the
    /// ledger. A second call for the same encounter returns an empty settlement.
    pub fn on_killed(
        &self,
        encounter: &EncounterId,
        killer: Option<&ContributorId>,
        report: KillReport,
    ) -> KillSettlement {
        let Some((_, mut live)) = self.live.remove(encounter) else {
            tracing::debug!(encounter = %encounter, "on_killed for unknown or finalized encounter");
            return KillSettlement::default();
        };
        let now = self.clock.now();

        let damage = self.ledger.damage_map(encounter);
        let participants = damage.len();
        let difficulty = live.difficulty.state();
        let difficulty_multiplier = difficulty.multiplier;

        let rating = quality::rate(&KillContext {
            participants,
            tier: live.tier,
            difficulty_score: difficulty.score,
            duration: report.duration,
            deaths: report.deaths,
            weakened: report.weakened,
            recent_kill: report.recent_kill,
        });

        let pools = self
            .rewards
            .pools(live.tier, rating.experience_multiplier, difficulty_multiplier);
        let rewards = self
            .rewards
            .distribute(&live.boss_kind, pools, &damage, killer, now);
        let drop_multiplier = live.progression.multipliers(now).drop * rating.drop_multiplier;

        self.kill_history.record_kill(&live.boss_kind, now);

        tracing::info!(
            encounter = %encounter,
            boss_kind = %live.boss_kind,
            grade = %rating.grade,
            participants,
            rewarded = rewards.len(),
            "Encounter finalized"
        );

        KillSettlement {
            summary: Some(KillSummary {
                encounter: *encounter,
                boss_kind: live.boss_kind,
                tier: live.tier,
                participants,
                quality: rating,
                difficulty,
                difficulty_multiplier,
                drop_multiplier,
                pools,
                killed_at: now,
            }),
            rewards,
        }
    }

    /// Drop a live encounter without rewards (despawn).
    pub fn discard(&self, encounter: &EncounterId) -> bool {
        self.live.remove(encounter).is_some()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────────────────────

    pub fn record(&self, encounter: &EncounterId) -> Option<LifecycleRecord> {
        let now = self.clock.now();
        let mut live = self.live.get_mut(encounter)?;
        Some(live.record(*encounter, now))
    }

    pub fn is_active(&self, encounter: &EncounterId) -> bool {
        self.live.contains_key(encounter)
    }

    pub fn active_count(&self) -> usize {
        self.live.len()
    }

    pub fn active_by_kind(&self, boss_kind: &str) -> Vec<EncounterId> {
        self.live
            .iter()
            .filter(|e| e.value().boss_kind == boss_kind)
            .map(|e| *e.key())
            .collect()
    }

    pub fn killed_recently(&self, boss_kind: &str) -> bool {
        self.kill_history.killed_recently(boss_kind, self.clock.now())
    }
}
