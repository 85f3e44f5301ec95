//! Per-encounter damage ledger.
//!
//! Each encounter gets its own [`EncounterLedger`] behind its own mutex, so
//! hits against one encounter are serialized while hits against different
//! encounters never contend. The outer map only hands out `Arc` clones; no
//! map shard lock is held while a ledger is being mutated.

mod record;


pub use record::{ContributionRecord, EncounterLedger, LedgerSnapshot};

use chrono::Duration;
use dashmap::DashMap;
use hashbrown::HashMap;
use std::sync::{Arc, Mutex};

use crate::clock::SharedClock;
use crate::ids::{ContributorId, EncounterId};
use crate::locks::lock;

type LedgerHandle = Arc<Mutex<EncounterLedger>>;

pub struct DamageLedger {
    ledgers: DashMap<EncounterId, LedgerHandle>,
    retention: Duration,
    clock: SharedClock,
}

impl DamageLedger {
    pub fn new(retention: Duration, clock: SharedClock) -> Self {
        Self {
            ledgers: DashMap::new(),
            retention,
            clock,
        }
    }

    fn handle(&self, encounter: &EncounterId) -> Option<LedgerHandle> {
        self.ledgers.get(encounter).map(|entry| Arc::clone(entry.value()))
    }

    fn with_ledger<R>(&self, encounter: &EncounterId, f: impl FnOnce(&EncounterLedger) -> R) -> Option<R> {
        let handle = self.handle(encounter)?;
        let ledger = lock(&handle);
        Some(f(&ledger))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Mutation
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a ledger for `encounter`. An existing ledger is left untouched.
    pub fn create_ledger(&self, encounter: EncounterId, boss_kind: &str) {
        let now = self.clock.now();
        self.ledgers
            .entry(encounter)
            .or_insert_with(|| Arc::new(Mutex::new(EncounterLedger::new(encounter, boss_kind, now))));
        tracing::debug!(encounter = %encounter, boss_kind, "Ledger created");
    }

    /// Credit damage to a contributor. Returns whether anything was recorded.
    pub fn record_damage(&self, encounter: &EncounterId, contributor: &ContributorId, amount: f64) -> bool {
        if !amount.is_finite() || amount <= 0.0 {
            tracing::warn!(encounter = %encounter, contributor = %contributor, amount, "Ignoring non-positive damage");
            return false;
        }
        let Some(handle) = self.handle(encounter) else {
            tracing::warn!(encounter = %encounter, contributor = %contributor, "Damage for unknown ledger dropped");
            return false;
        };
        let now = self.clock.now();
        lock(&handle).record(contributor, amount, now);
        true
    }

    /// Stamp the end time. The ledger stays readable until deleted or swept.
    pub fn finalize(&self, encounter: &EncounterId) -> Option<LedgerSnapshot> {
        let handle = self.handle(encounter)?;
        let now = self.clock.now();
        let mut ledger = lock(&handle);
        if ledger.ended_at.is_none() {
            ledger.ended_at = Some(now);
        }
        Some(ledger.snapshot())
    }

    pub fn delete_ledger(&self, encounter: &EncounterId) -> Option<LedgerSnapshot> {
        let (_, handle) = self.ledgers.remove(encounter)?;
        let snapshot = lock(&handle).snapshot();
        Some(snapshot)
    }

    /// Remove ledgers older than the retention window. Returns the count removed.
    pub fn sweep_expired(&self) -> usize {
        let cutoff = self.clock.now() - self.retention;
        let expired: Vec<EncounterId> = self
            .ledgers
            .iter()
            .filter(|entry| lock(entry.value()).created_at < cutoff)
            .map(|entry| *entry.key())
            .collect();

        let mut removed = 0;
        for encounter in expired {
            // Re-check: the ledger may have been replaced since the snapshot
            if self
                .ledgers
                .remove_if(&encounter, |_, handle| lock(handle).created_at < cutoff)
                .is_some()
            {
                removed += 1;
            }
        }
        if removed > 0 {
            tracing::info!(removed, "Swept expired ledgers");
        }
        removed
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────────────────────

    pub fn contains(&self, encounter: &EncounterId) -> bool {
        self.ledgers.contains_key(encounter)
    }

    pub fn active_count(&self) -> usize {
        self.ledgers.len()
    }

    pub fn get_ledger(&self, encounter: &EncounterId) -> Option<LedgerSnapshot> {
        self.with_ledger(encounter, EncounterLedger::snapshot)
    }

    pub fn get_contribution(&self, encounter: &EncounterId, contributor: &ContributorId) -> Option<ContributionRecord> {
        self.with_ledger(encounter, |l| l.get(contributor).cloned()).flatten()
    }

    pub fn top_contributors(&self, encounter: &EncounterId, n: usize) -> Vec<ContributionRecord> {
        self.with_ledger(encounter, |l| l.ranked().into_iter().take(n).cloned().collect())
            .unwrap_or_default()
    }

    /// Share of the encounter's damage on a 0-100 scale, 0 when unknown.
    pub fn contribution_percentage(&self, encounter: &EncounterId, contributor: &ContributorId) -> f64 {
        self.with_ledger(encounter, |l| l.percentage(contributor))
            .unwrap_or(0.0)
    }

    /// 1-based rank, -1 if the contributor (or ledger) is absent.
    pub fn rank(&self, encounter: &EncounterId, contributor: &ContributorId) -> i32 {
        self.with_ledger(encounter, |l| l.rank_of(contributor))
            .flatten()
            .map_or(-1, |r| r as i32)
    }

    pub fn total_damage(&self, encounter: &EncounterId) -> f64 {
        self.with_ledger(encounter, EncounterLedger::total_damage)
            .unwrap_or(0.0)
    }

    pub fn participants(&self, encounter: &EncounterId) -> Vec<ContributorId> {
        self.with_ledger(encounter, |l| {
            l.ranked().into_iter().map(|r| r.contributor.clone()).collect()
        })
        .unwrap_or_default()
    }

    pub fn participant_count(&self, encounter: &EncounterId) -> usize {
        self.with_ledger(encounter, EncounterLedger::len).unwrap_or(0)
    }

    pub fn damage_map(&self, encounter: &EncounterId) -> HashMap<ContributorId, f64> {
        self.with_ledger(encounter, EncounterLedger::damage_map)
            .unwrap_or_default()
    }

    pub fn average_damage(&self, encounter: &EncounterId) -> f64 {
        self.with_ledger(encounter, |l| {
            if l.is_empty() {
                0.0
            } else {
                l.total_damage() / l.len() as f64
            }
        })
        .unwrap_or(0.0)
    }
}
