//! Distributed encounter coordinator.
//!
//! Wires the node registry, load balancer, damage ledger, lifecycle manager
//! and sync manager together. Every accepted mutation bumps the encounter's
//! version through [`DataSyncManager::start_sync`] and enqueues the snapshot
//! for the [`ReplicationWorker`]; nothing here waits on a peer.
//! The snapshot is built, versioned and queued while the encounter's entry
//! is still locked, so a higher version never carries older state and peers
//! receive versions in order.
//!
//! Ownership: an encounter is writable only while its owner node is active.
//! A write against an encounter whose owner went away first tries to move it
//! to a new node through the balancer, and fails with `NodeUnavailable` if
//! no node can take it. Reads keep working from the last synced snapshot.

mod encounter;
mod registry;
mod replication;

#[cfg(test)]
mod coordinator_tests;

pub use encounter::{EncounterData, EncounterSnapshot, EncounterStatus};
pub use registry::NodeRegistry;
pub use replication::{
    FanOutReport, LoopbackTransport, PeerTransport, ReplicationMessage, ReplicationReceiver,
    ReplicationSender, ReplicationWorker, TransportError,
};

use chrono::Duration;
use dashmap::DashMap;
use raidmesh_types::{EngineConfig, PlacementStrategy};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::adapters::{Adapters, Announcement, EncounterEvent, KillRecord};
use crate::balancer::{BalancerStats, LoadBalancer, NodeInfo};
use crate::clock::{SharedClock, seconds};
use crate::difficulty::KillHistory;
use crate::error::{EngineError, EngineResult};
use crate::ids::{ContributorId, EncounterId, NodeId};
use crate::ledger::{DamageLedger, LedgerSnapshot};
use crate::lifecycle::{KillReport, KillSettlement, LifecycleManager, LifecycleRecord};
use crate::progression::BossTier;
use crate::reward::{RewardCalculator, RewardCooldowns};
use crate::sync::{DataSyncManager, SyncStats, resolver_for};

/// Radius handed to the location selector when counting nearby players.
const SPAWN_RADIUS: f64 = 64.0;
const RANKING_LINES: usize = 3;
/// Participant estimate when no location selector reports a crowd.
const DEFAULT_PARTICIPANTS: usize = 3;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FailoverReport {
    pub reassigned: Vec<(EncounterId, NodeId)>,
    pub stranded: Vec<EncounterId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub ledgers: usize,
    pub expired_encounters: usize,
    pub transactions: usize,
    pub cooldowns: usize,
    pub decayed_nodes: usize,
    pub silent_nodes: usize,
    pub stale_states: usize,
}

impl SweepReport {
    pub fn total(&self) -> usize {
        self.ledgers
            + self.expired_encounters
            + self.transactions
            + self.cooldowns
            + self.decayed_nodes
            + self.silent_nodes
            + self.stale_states
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoordinatorStatus {
    pub local_node: NodeId,
    pub started: bool,
    pub nodes: usize,
    pub active_nodes: usize,
    pub live_encounters: usize,
    pub ledgers: usize,
    pub unsent_replications: u64,
    pub strategy: PlacementStrategy,
    pub sync: SyncStats,
    pub balancer: BalancerStats,
}

pub struct DistributedCoordinator {
    local: NodeId,
    registry: Arc<NodeRegistry>,
    encounters: DashMap<EncounterId, EncounterData>,
    ledger: Arc<DamageLedger>,
    lifecycle: Arc<LifecycleManager>,
    balancer: Arc<LoadBalancer>,
    sync: Arc<DataSyncManager>,
    adapters: Arc<Adapters>,
    outbound: ReplicationSender,
    unsent: AtomicU64,
    config: EngineConfig,
    clock: SharedClock,
}

impl DistributedCoordinator {
    /// Build a coordinator for `local`. The returned receiver feeds a
    /// [`ReplicationWorker`]; see [`Self::replication_worker`].
    pub fn new(
        local: NodeId,
        config: EngineConfig,
        adapters: Arc<Adapters>,
        clock: SharedClock,
    ) -> (Self, ReplicationReceiver) {
        let ledger = Arc::new(DamageLedger::new(
            seconds(config.ledger.retention_secs),
            Arc::clone(&clock),
        ));
        let rewards = RewardCalculator::new(
            config.reward.clone(),
            Arc::new(RewardCooldowns::new(seconds(config.reward.cooldown_secs))),
        );
        let lifecycle = Arc::new(LifecycleManager::new(
            Arc::clone(&ledger),
            rewards,
            Arc::new(KillHistory::new(seconds(config.difficulty.recent_kill_window_secs))),
            config.difficulty.clone(),
            Arc::clone(&clock),
        ));
        let sync = Arc::new(DataSyncManager::new(
            local.clone(),
            config.sync.history_capacity,
            seconds(config.sync.transaction_ttl_secs),
            resolver_for(config.sync.conflict_strategy),
            Arc::clone(&clock),
        ));
        let (outbound, rx) = replication::channel();

        let coordinator = Self {
            registry: Arc::new(NodeRegistry::new(Arc::clone(&clock))),
            encounters: DashMap::new(),
            ledger,
            lifecycle,
            balancer: Arc::new(LoadBalancer::new(config.balancer.clone())),
            sync,
            adapters,
            outbound,
            unsent: AtomicU64::new(0),
            local,
            config,
            clock,
        };
        (coordinator, rx)
    }

    /// Worker that pushes this coordinator's writes to its peers.
    pub fn replication_worker<T: PeerTransport>(&self, rx: ReplicationReceiver, transport: T) -> ReplicationWorker<T> {
        ReplicationWorker::new(
            rx,
            transport,
            self.local.clone(),
            Arc::clone(&self.registry),
            Arc::clone(&self.sync),
            Arc::clone(&self.balancer),
            self.config.sync.max_push_attempts,
        )
    }

    pub fn start(&self) {
        self.lifecycle.start();
        tracing::info!(node = %self.local, "Coordinator started");
    }

    pub fn shutdown(&self) {
        self.lifecycle.shutdown();
        tracing::info!(node = %self.local, live = self.encounters.len(), "Coordinator stopped");
    }

    pub fn is_started(&self) -> bool {
        self.lifecycle.is_initialized()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Nodes
    // ─────────────────────────────────────────────────────────────────────────

    pub fn register_node(&self, id: NodeId, name: &str, address: &str, region: Option<&str>) -> NodeInfo {
        let node = self.registry.register(id, name, address, region);
        tracing::info!(node = %node.id, address = %node.address, region = ?node.region, "Node registered");
        node
    }

    pub fn heartbeat(&self, id: &NodeId, load: f64) -> EngineResult<()> {
        self.registry.heartbeat(id, load)
    }

    /// Take a node out of placement. Its encounters move lazily, on their
    /// next write.
    pub fn mark_node_inactive(&self, id: &NodeId) -> bool {
        let changed = self.registry.mark_inactive(id);
        if changed {
            let owned = self.encounters_by_node(id).len();
            if owned > 0 {
                tracing::warn!(node = %id, owned, "Inactive node still owns encounters");
            }
        }
        changed
    }

    pub fn expire_silent_nodes(&self, timeout: Duration) -> Vec<NodeId> {
        self.registry.expire_silent(timeout)
    }

    pub fn unregister_node(&self, id: &NodeId) -> Option<NodeInfo> {
        let removed = self.registry.unregister(id)?;
        self.balancer.reset_node(id);
        tracing::info!(node = %id, owned = self.encounters_by_node(id).len(), "Node unregistered");
        Some(removed)
    }

    /// Move every encounter owned by `id` to another node now.
    pub fn failover_node(&self, id: &NodeId) -> FailoverReport {
        let mut report = FailoverReport::default();
        for encounter in self.encounters_by_node(id) {
            match self.reassign(&encounter, id) {
                Ok(owner) => report.reassigned.push((encounter, owner)),
                Err(e) => {
                    tracing::warn!(encounter = %encounter, node = %id, error = %e, "Failover left encounter stranded");
                    report.stranded.push(encounter);
                }
            }
        }
        if !report.reassigned.is_empty() || !report.stranded.is_empty() {
            tracing::info!(
                node = %id,
                reassigned = report.reassigned.len(),
                stranded = report.stranded.len(),
                "Failover finished"
            );
        }
        report
    }

    pub fn node(&self, id: &NodeId) -> Option<NodeInfo> {
        self.registry.get(id)
    }

    pub fn nodes(&self) -> Vec<NodeInfo> {
        self.registry.all()
    }

    fn reassign(&self, encounter: &EncounterId, failed: &NodeId) -> EngineResult<NodeId> {
        let region = self
            .encounters
            .get(encounter)
            .ok_or(EngineError::EncounterNotFound(*encounter))?
            .region
            .clone();
        let candidates: Vec<NodeInfo> = self
            .registry
            .all()
            .into_iter()
            .filter(|n| &n.id != failed)
            .collect();
        let target = self.balancer.select(&candidates, region.as_deref())?;

        let staged = {
            let mut entry = self
                .encounters
                .get_mut(encounter)
                .ok_or(EngineError::EncounterNotFound(*encounter))?;
            if &entry.owner_node != failed {
                // Moved by a concurrent writer
                return Ok(entry.owner_node.clone());
            }
            entry.owner_node = target.id.clone();
            entry.updated_at = self.clock.now();
            self.stage(&entry)
        };
        self.registry.adjust_encounters(failed, -1);
        self.registry.adjust_encounters(&target.id, 1);
        tracing::info!(encounter = %encounter, from = %failed, to = %target.id, "Encounter ownership moved");
        self.staged_version(encounter, staged);
        Ok(target.id)
    }

    /// Owner of a writable encounter, failing over first if needed.
    fn ensure_writable(&self, encounter: &EncounterId) -> EngineResult<NodeId> {
        let (owner, status) = {
            let entry = self
                .encounters
                .get(encounter)
                .ok_or(EngineError::EncounterNotFound(*encounter))?;
            (entry.owner_node.clone(), entry.status)
        };
        if status.is_terminal() {
            return Err(EngineError::EncounterClosed(*encounter));
        }
        if self.registry.is_active(&owner) {
            return Ok(owner);
        }
        self.reassign(encounter, &owner).map_err(|e| {
            tracing::warn!(encounter = %encounter, owner = %owner, error = %e, "Write rejected, owner unavailable");
            EngineError::NodeUnavailable {
                encounter: *encounter,
                node: owner,
            }
        })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Encounters
    // ─────────────────────────────────────────────────────────────────────────

    /// Place and start a new encounter. A placement failure is returned as
    /// is; nothing is retried.
    pub fn create_encounter(
        &self,
        boss_kind: &str,
        tier: BossTier,
        preferred_region: Option<&str>,
    ) -> EngineResult<EncounterId> {
        if !self.is_started() {
            return Err(EngineError::NotInitialized);
        }
        let owner = self.balancer.select(&self.registry.all(), preferred_region)?;

        let (location, participants) = match self.adapters.locations() {
            Some(selector) => {
                let location = selector.select_spawn_location(boss_kind, f64::from(tier.level()));
                let nearby = location
                    .as_ref()
                    .map(|l| selector.nearby_player_count(l, SPAWN_RADIUS))
                    .filter(|n| *n > 0)
                    .unwrap_or(DEFAULT_PARTICIPANTS);
                (location, nearby)
            }
            None => (None, DEFAULT_PARTICIPANTS),
        };

        let id = EncounterId::new();
        let power = self.config.spawn.recommended_power;
        let record = self
            .lifecycle
            .initialize(id, boss_kind, tier, power, power, participants)
            .ok_or(EngineError::NotInitialized)?;
        self.ledger.create_ledger(id, boss_kind);

        let now = self.clock.now();
        let max_health = self.config.spawn.base_health * record.multipliers.health;
        let mut data = EncounterData::new(id, boss_kind, tier, max_health, owner.id.clone(), location, now);
        data.region = preferred_region.map(str::to_string);
        self.encounters.insert(id, data.clone());
        self.registry.adjust_encounters(&owner.id, 1);

        let entities = self.adapters.entities();
        if !entities.spawn(id, boss_kind, data.location.as_ref()) {
            tracing::warn!(encounter = %id, boss_kind, "Entity adapter failed to spawn boss");
        }
        entities.apply_multipliers(id, &record.multipliers);

        let staged = self.stage(&data);
        let version = self.staged_version(&id, staged);
        self.adapters.emit(EncounterEvent::Spawned {
            encounter: id,
            boss_kind: boss_kind.to_string(),
            tier,
        });
        self.adapters.announce(Announcement::Spawned {
            boss_kind: boss_kind.to_string(),
            tier,
            location: data
                .location
                .as_ref()
                .map_or_else(|| owner.name.clone(), |l| l.display_name()),
        });

        tracing::info!(
            encounter = %id,
            boss_kind,
            tier = tier.level(),
            owner = %owner.id,
            participants,
            difficulty = record.difficulty.score,
            max_health,
            version,
            "Encounter created"
        );
        Ok(id)
    }

    /// Apply a hit: health drops (never below zero), the ledger records it,
    /// and the new snapshot is replicated. Non-positive damage is ignored and
    /// returns the current health. Returns remaining health.
    pub fn record_damage(&self, encounter: &EncounterId, contributor: &ContributorId, amount: f64) -> EngineResult<f64> {
        self.ensure_writable(encounter)?;
        if !amount.is_finite() || amount <= 0.0 {
            tracing::warn!(encounter = %encounter, contributor = %contributor, amount, "Ignoring non-positive damage");
            return Ok(self.encounters.get(encounter).map_or(0.0, |e| e.health));
        }

        let (health, staged) = {
            let mut entry = self
                .encounters
                .get_mut(encounter)
                .ok_or(EngineError::EncounterNotFound(*encounter))?;
            if entry.status.is_terminal() {
                return Err(EngineError::EncounterClosed(*encounter));
            }
            entry.apply_damage(contributor, amount, self.clock.now());
            self.ledger.record_damage(encounter, contributor, amount);
            (entry.health, self.stage(&entry))
        };
        let update = self.lifecycle.update_difficulty(
            encounter,
            self.ledger.participant_count(encounter),
            self.config.spawn.recommended_power,
        );

        self.adapters.entities().set_health(*encounter, health);
        self.adapters.emit(EncounterEvent::Damaged {
            encounter: *encounter,
            contributor: contributor.clone(),
            amount,
        });
        if let Some(update) = update
            && update.recomputed
        {
            self.apply_attributes(&update.record);
        }
        self.staged_version(encounter, staged);
        Ok(health)
    }

    /// Push recalculated multipliers to the boss actor and report each one.
    fn apply_attributes(&self, record: &LifecycleRecord) {
        self.adapters
            .entities()
            .apply_multipliers(record.encounter, &record.multipliers);
        let events: Vec<EncounterEvent> = record
            .multipliers
            .named()
            .into_iter()
            .map(|(attribute, value)| EncounterEvent::AttributeUpdated {
                encounter: record.encounter,
                attribute,
                value,
            })
            .collect();
        self.adapters.emit_all(&events);
        tracing::debug!(
            encounter = %record.encounter,
            score = record.difficulty.score,
            health = record.multipliers.health,
            damage = record.multipliers.damage,
            "Attributes reapplied"
        );
    }

    /// Finish a kill, timing the fight from encounter creation.
    pub fn complete_kill(&self, encounter: &EncounterId, killer: Option<&ContributorId>) -> EngineResult<KillSettlement> {
        let (created_at, boss_kind) = {
            let entry = self
                .encounters
                .get(encounter)
                .ok_or(EngineError::EncounterNotFound(*encounter))?;
            (entry.created_at, entry.boss_kind.clone())
        };
        let report = KillReport {
            duration: self.clock.now() - created_at,
            recent_kill: self.lifecycle.killed_recently(&boss_kind),
            ..KillReport::default()
        };
        self.complete_kill_with(encounter, killer, report)
    }

    /// Mark the encounter dead, settle rewards, persist the ledger, replicate
    /// the terminal state and drop the encounter from live state.
    pub fn complete_kill_with(
        &self,
        encounter: &EncounterId,
        killer: Option<&ContributorId>,
        report: KillReport,
    ) -> EngineResult<KillSettlement> {
        self.ensure_writable(encounter)?;
        let (data, ledger, staged) = {
            let mut entry = self
                .encounters
                .get_mut(encounter)
                .ok_or(EngineError::EncounterNotFound(*encounter))?;
            if entry.status.is_terminal() {
                return Err(EngineError::EncounterClosed(*encounter));
            }
            entry.mark_dead(self.clock.now());
            let ledger = self.ledger.finalize(encounter);
            let staged = self.stage(&entry);
            (entry.clone(), ledger, staged)
        };

        let settlement = self.lifecycle.on_killed(encounter, killer, report);
        self.staged_version(encounter, staged);
        if let Some(snapshot) = &ledger {
            self.persist_kill(&data, killer, snapshot, report);
        }
        self.retire(&data);

        let total_damage = ledger.as_ref().map_or(0.0, |l| l.total_damage);
        let participants = ledger.as_ref().map_or(0, |l| l.participant_count());
        self.adapters.emit(EncounterEvent::Killed {
            encounter: *encounter,
            killer: killer.cloned(),
            total_damage,
            participants,
        });
        self.adapters.announce(Announcement::Killed {
            boss_kind: data.boss_kind.clone(),
            killer: killer.cloned(),
            tier: data.tier,
        });
        if let Some(snapshot) = &ledger
            && !snapshot.records.is_empty()
        {
            self.adapters.announce(ranking(&data.boss_kind, snapshot));
        }

        tracing::info!(
            encounter = %encounter,
            boss_kind = %data.boss_kind,
            killer = ?killer.map(ContributorId::as_str),
            participants,
            total_damage,
            experience = settlement.total_experience(),
            "Encounter killed"
        );
        Ok(settlement)
    }

    /// Remove an encounter without a kill. No rewards are computed.
    pub fn despawn_encounter(&self, encounter: &EncounterId, reason: &str) -> EngineResult<()> {
        self.ensure_writable(encounter)?;
        self.close_despawned(encounter, reason)
    }

    fn close_despawned(&self, encounter: &EncounterId, reason: &str) -> EngineResult<()> {
        let (data, staged) = {
            let mut entry = self
                .encounters
                .get_mut(encounter)
                .ok_or(EngineError::EncounterNotFound(*encounter))?;
            if entry.status.is_terminal() {
                return Err(EngineError::EncounterClosed(*encounter));
            }
            entry.mark_despawned(self.clock.now());
            self.ledger.finalize(encounter);
            let staged = self.stage(&entry);
            (entry.clone(), staged)
        };
        self.lifecycle.discard(encounter);
        self.staged_version(encounter, staged);
        self.retire(&data);

        if !self.adapters.entities().despawn(*encounter) {
            tracing::warn!(encounter = %encounter, "Entity adapter failed to despawn boss");
        }
        self.adapters.emit(EncounterEvent::Despawned {
            encounter: *encounter,
            reason: reason.to_string(),
        });
        tracing::info!(encounter = %encounter, reason, "Encounter despawned");
        Ok(())
    }

    /// Drop a closed encounter from live state.
    fn retire(&self, data: &EncounterData) {
        self.ledger.delete_ledger(&data.id);
        if self.encounters.remove(&data.id).is_some() {
            self.registry.adjust_encounters(&data.owner_node, -1);
        }
    }

    fn persist_kill(
        &self,
        data: &EncounterData,
        killer: Option<&ContributorId>,
        ledger: &LedgerSnapshot,
        report: KillReport,
    ) {
        let Some(database) = self.adapters.database() else {
            return;
        };
        let record = KillRecord {
            encounter: data.id,
            boss_kind: data.boss_kind.clone(),
            tier: data.tier,
            killer: killer.cloned(),
            total_damage: ledger.total_damage,
            participant_count: ledger.participant_count(),
            duration_secs: report.duration.num_seconds(),
            killed_at: data.updated_at,
            contributions: ledger.records.clone(),
        };
        if let Err(e) = database.save_kill(record) {
            tracing::error!(encounter = %data.id, error = %e, "Failed to persist kill");
            self.adapters.emit(EncounterEvent::SystemError {
                kind: "persistence",
                message: e.to_string(),
            });
        }
    }

    /// Snapshot `data` with its ledger, version it locally and queue it for
    /// peers. Callers that mutate a live encounter call this under its entry
    /// guard, so versions reach the queue in order. Must not call adapters.
    fn stage(&self, data: &EncounterData) -> serde_json::Result<u64> {
        let snapshot = EncounterSnapshot {
            data: data.clone(),
            ledger: self.ledger.get_ledger(&data.id),
        };
        let payload = snapshot.to_value()?;
        let version = self.sync.start_sync(data.id, payload.clone(), &self.local);
        let message = ReplicationMessage {
            encounter: data.id,
            version,
            origin: self.local.clone(),
            payload,
        };
        if self.outbound.send(message).is_err() {
            self.unsent.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(encounter = %data.id, version, "No replication worker, write kept local");
        }
        Ok(version)
    }

    /// Report a snapshot that could not be encoded. Returns the staged version,
    /// or the current one on failure.
    fn staged_version(&self, encounter: &EncounterId, staged: serde_json::Result<u64>) -> u64 {
        match staged {
            Ok(version) => version,
            Err(e) => {
                tracing::error!(encounter = %encounter, error = %e, "Failed to encode encounter snapshot");
                self.adapters.emit(EncounterEvent::SystemError {
                    kind: "snapshot",
                    message: e.to_string(),
                });
                self.sync.version(encounter)
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────────────────────

    /// Live data, or the last synced snapshot once the encounter is closed
    /// or known only through replication.
    pub fn encounter(&self, id: &EncounterId) -> Option<EncounterData> {
        if let Some(live) = self.encounters.get(id) {
            return Some(live.clone());
        }
        self.last_snapshot(id).map(|s| s.data)
    }

    pub fn last_snapshot(&self, id: &EncounterId) -> Option<EncounterSnapshot> {
        let state = self.sync.get_state(id)?;
        match EncounterSnapshot::from_value(&state.data) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                tracing::warn!(encounter = %id, error = %e, "Unreadable synced snapshot");
                None
            }
        }
    }

    /// Live encounters, oldest first.
    pub fn encounters(&self) -> Vec<EncounterData> {
        let mut all: Vec<EncounterData> = self.encounters.iter().map(|e| e.clone()).collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        all
    }

    pub fn encounters_by_node(&self, node: &NodeId) -> Vec<EncounterId> {
        self.encounters
            .iter()
            .filter(|e| &e.owner_node == node)
            .map(|e| *e.key())
            .collect()
    }

    pub fn is_live(&self, id: &EncounterId) -> bool {
        self.encounters.contains_key(id)
    }

    pub fn status(&self) -> CoordinatorStatus {
        CoordinatorStatus {
            local_node: self.local.clone(),
            started: self.is_started(),
            nodes: self.registry.len(),
            active_nodes: self.registry.active_count(),
            live_encounters: self.encounters.len(),
            ledgers: self.ledger.active_count(),
            unsent_replications: self.unsent.load(Ordering::Relaxed),
            strategy: self.balancer.strategy(),
            sync: self.sync.statistics(),
            balancer: self.balancer.statistics(),
        }
    }

    pub fn local_node(&self) -> &NodeId {
        &self.local
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    pub fn ledger(&self) -> &Arc<DamageLedger> {
        &self.ledger
    }

    pub fn lifecycle(&self) -> &Arc<LifecycleManager> {
        &self.lifecycle
    }

    pub fn balancer(&self) -> &Arc<LoadBalancer> {
        &self.balancer
    }

    pub fn sync(&self) -> &Arc<DataSyncManager> {
        &self.sync
    }

    pub fn adapters(&self) -> &Arc<Adapters> {
        &self.adapters
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Maintenance
    // ─────────────────────────────────────────────────────────────────────────

    /// One pass of every periodic cleanup. Each step runs independently; a
    /// failure is logged and the pass continues.
    pub fn sweep(&self) -> SweepReport {
        let now = self.clock.now();
        let mut report = SweepReport {
            ledgers: self.ledger.sweep_expired(),
            ..SweepReport::default()
        };

        let orphaned: Vec<EncounterId> = self
            .encounters
            .iter()
            .filter(|e| !self.ledger.contains(e.key()))
            .map(|e| *e.key())
            .collect();
        for id in orphaned {
            match self.close_despawned(&id, "expired") {
                Ok(()) => report.expired_encounters += 1,
                Err(e) => tracing::warn!(encounter = %id, error = %e, "Failed to expire encounter"),
            }
        }

        report.transactions = self.sync.sweep_expired_transactions();
        report.cooldowns = self.lifecycle.rewards().cooldowns().sweep(now);
        report.decayed_nodes = self.balancer.decay();
        if self.config.sweep.heartbeat_timeout_secs > 0 {
            report.silent_nodes = self
                .expire_silent_nodes(seconds(self.config.sweep.heartbeat_timeout_secs))
                .len();
        }
        report.stale_states = self
            .sync
            .forget_stale(seconds(self.config.sync.state_retention_secs));

        if report.total() > 0 {
            tracing::debug!(
                ledgers = report.ledgers,
                expired_encounters = report.expired_encounters,
                transactions = report.transactions,
                cooldowns = report.cooldowns,
                decayed_nodes = report.decayed_nodes,
                silent_nodes = report.silent_nodes,
                stale_states = report.stale_states,
                "Sweep finished"
            );
        }
        report
    }
}

fn ranking(boss_kind: &str, ledger: &LedgerSnapshot) -> Announcement {
    let total = ledger.total_damage;
    let lines = ledger
        .records
        .iter()
        .take(RANKING_LINES)
        .enumerate()
        .map(|(i, r)| {
            let pct = if total > 0.0 { r.total_damage / total * 100.0 } else { 0.0 };
            format!("#{} {} {:.0} ({:.1}%)", i + 1, r.contributor, r.total_damage, pct)
        })
        .collect();
    Announcement::Rankings {
        boss_kind: boss_kind.to_string(),
        lines,
    }
}
