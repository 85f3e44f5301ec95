//! Host-facing entry point.
//!
//! [`BossSystem`] is what a game server embeds: it installs the host's
//! adapters, gates use on `initialize()` and exposes read accessors plus the
//! difficulty/reward/attribute calculations over one coordinator.

use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::adapters::{
    AnnouncementAdapter, DamageDatabase, EntityAdapter, EventAdapter, KillRecord, LocationSelector,
};
use crate::coordinator::{CoordinatorStatus, DistributedCoordinator};
use crate::difficulty::DifficultyState;
use crate::error::{EngineError, EngineResult};
use crate::ids::{ContributorId, EncounterId};
use crate::ledger::LedgerSnapshot;
use crate::lifecycle::{KillReport, KillSettlement, LifecycleRecord};
use crate::progression::{BossTier, attribute_multiplier};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemStatistics {
    pub version: &'static str,
    pub initialized: bool,
    pub enabled: bool,
    pub active_encounters: usize,
    pub recorded_kills: usize,
    pub coordinator: CoordinatorStatus,
}

pub struct BossSystem {
    coordinator: Arc<DistributedCoordinator>,
    enabled: AtomicBool,
}

impl BossSystem {
    pub fn new(coordinator: Arc<DistributedCoordinator>) -> Self {
        Self {
            coordinator,
            enabled: AtomicBool::new(true),
        }
    }

    /// Install the host adapters and start the coordinator. Must run before
    /// any calculation; calling it again swaps the adapters.
    pub fn initialize(&self, events: Arc<dyn EventAdapter>, entities: Arc<dyn EntityAdapter>) {
        let adapters = self.coordinator.adapters();
        adapters.set_events(events);
        adapters.set_entities(entities);
        if !self.coordinator.is_started() {
            self.coordinator.start();
        }
        tracing::info!(version = VERSION, node = %self.coordinator.local_node(), "Boss system initialized");
    }

    pub fn shutdown(&self) {
        self.coordinator.shutdown();
    }

    pub fn set_damage_database(&self, database: Arc<dyn DamageDatabase>) {
        self.coordinator.adapters().set_database(database);
    }

    pub fn set_location_selector(&self, selector: Arc<dyn LocationSelector>) {
        self.coordinator.adapters().set_locations(selector);
    }

    pub fn set_announcement_handler(&self, announcer: Arc<dyn AnnouncementAdapter>) {
        self.coordinator.adapters().set_announcements(announcer);
    }

    pub fn coordinator(&self) -> &Arc<DistributedCoordinator> {
        &self.coordinator
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Reads
    // ─────────────────────────────────────────────────────────────────────────

    pub fn lifecycle_record(&self, encounter: &EncounterId) -> Option<LifecycleRecord> {
        self.coordinator.lifecycle().record(encounter)
    }

    pub fn ledger(&self, encounter: &EncounterId) -> Option<LedgerSnapshot> {
        self.coordinator.ledger().get_ledger(encounter)
    }

    /// Persisted kills, newest first. Pages are zero-based; empty without a
    /// damage database.
    pub fn damage_history(&self, page: usize, page_size: usize) -> Vec<KillRecord> {
        self.coordinator
            .adapters()
            .database()
            .map(|db| db.kills_page(page, page_size))
            .unwrap_or_default()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Calculations
    // ─────────────────────────────────────────────────────────────────────────

    /// Difficulty for an encounter under the given conditions. A live
    /// encounter feeds its throttled calculator (and keeps its own
    /// recommended power); anything else is computed once from the inputs,
    /// with kill history when the boss kind is still known.
    pub fn calculate_difficulty(
        &self,
        encounter: &EncounterId,
        participant_count: usize,
        avg_power: f64,
        recommended_power: f64,
    ) -> EngineResult<DifficultyState> {
        self.ensure_initialized()?;
        let lifecycle = self.coordinator.lifecycle();
        if let Some(update) = lifecycle.update_difficulty(encounter, participant_count, avg_power) {
            return Ok(update.record.difficulty);
        }
        let boss_kind = self.coordinator.encounter(encounter).map(|e| e.boss_kind);
        Ok(lifecycle.evaluate_difficulty(boss_kind.as_deref(), participant_count, avg_power, recommended_power))
    }

    /// Settle a kill with the caller's fight report: the encounter is marked
    /// dead and its rewards are split.
    pub fn calculate_rewards(
        &self,
        encounter: &EncounterId,
        killer: &ContributorId,
        duration_secs: u64,
        deaths: u32,
    ) -> EngineResult<KillSettlement> {
        self.ensure_initialized()?;
        let boss_kind = self
            .coordinator
            .encounter(encounter)
            .map(|e| e.boss_kind)
            .ok_or(EngineError::EncounterNotFound(*encounter))?;
        let report = KillReport {
            duration: crate::clock::seconds(duration_secs),
            deaths,
            weakened: false,
            recent_kill: self.coordinator.lifecycle().killed_recently(&boss_kind),
        };
        self.coordinator.complete_kill_with(encounter, Some(killer), report)
    }

    /// Health multiplier for a tier level and crowd size. Out-of-range tiers
    /// are clamped into 1..=4.
    pub fn calculate_attribute_multiplier(&self, tier_level: i64, participant_count: usize) -> f64 {
        attribute_multiplier(BossTier::from_level(tier_level), participant_count)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Status
    // ─────────────────────────────────────────────────────────────────────────

    pub fn is_initialized(&self) -> bool {
        self.coordinator.is_started()
    }

    pub fn is_enabled(&self) -> bool {
        self.is_initialized() && self.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
        tracing::info!(enabled, "Boss system toggled");
    }

    pub fn version(&self) -> &'static str {
        VERSION
    }

    pub fn statistics(&self) -> SystemStatistics {
        SystemStatistics {
            version: VERSION,
            initialized: self.is_initialized(),
            enabled: self.is_enabled(),
            active_encounters: self.coordinator.lifecycle().active_count(),
            recorded_kills: self.coordinator.adapters().database().map_or(0, |db| db.len()),
            coordinator: self.coordinator.status(),
        }
    }

    fn ensure_initialized(&self) -> EngineResult<()> {
        if self.is_initialized() {
            Ok(())
        } else {
            tracing::error!("Boss system used before initialize()");
            Err(EngineError::NotInitialized)
        }
    }
}
