use chrono::{DateTime, Utc};
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::ids::{ContributorId, EncounterId};

/// Accumulated damage from one contributor against one encounter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContributionRecord {
    pub contributor: ContributorId,
    pub total_damage: f64,
    pub hit_count: u64,
    pub first_hit_time: DateTime<Utc>,
    pub last_hit_time: DateTime<Utc>,
    /// Order of this contributor's first hit within the ledger
    pub first_hit_seq: u64,
}

impl ContributionRecord {
    pub fn average_hit(&self) -> f64 {
        if self.hit_count == 0 {
            0.0
        } else {
            self.total_damage / self.hit_count as f64
        }
    }
}

/// Highest damage first, earliest first hit breaks ties.
pub(crate) fn by_rank(a: &ContributionRecord, b: &ContributionRecord) -> Ordering {
    b.total_damage
        .total_cmp(&a.total_damage)
        .then(a.first_hit_seq.cmp(&b.first_hit_seq))
}

/// Damage bookkeeping for a single encounter.
#[derive(Debug, Clone)]
pub struct EncounterLedger {
    pub encounter: EncounterId,
    pub boss_kind: String,
    records: HashMap<ContributorId, ContributionRecord>,
    total_damage: f64,
    pub created_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    next_seq: u64,
}

impl EncounterLedger {
    pub fn new(encounter: EncounterId, boss_kind: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            encounter,
            boss_kind: boss_kind.into(),
            records: HashMap::new(),
            total_damage: 0.0,
            created_at: now,
            ended_at: None,
            next_seq: 0,
        }
    }

    /// Credit `amount` to `contributor`. Callers filter non-positive amounts.
    pub fn record(&mut self, contributor: &ContributorId, amount: f64, now: DateTime<Utc>) {
        if !self.records.contains_key(contributor) {
            self.records.insert(
                contributor.clone(),
                ContributionRecord {
                    contributor: contributor.clone(),
                    total_damage: 0.0,
                    hit_count: 0,
                    first_hit_time: now,
                    last_hit_time: now,
                    first_hit_seq: self.next_seq,
                },
            );
            self.next_seq += 1;
        }
        if let Some(record) = self.records.get_mut(contributor) {
            record.total_damage += amount;
            record.hit_count += 1;
            record.last_hit_time = now;
            self.total_damage += amount;
        }
    }

    pub fn total_damage(&self) -> f64 {
        self.total_damage
    }

    pub fn get(&self, contributor: &ContributorId) -> Option<&ContributionRecord> {
        self.records.get(contributor)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn ranked(&self) -> Vec<&ContributionRecord> {
        let mut records: Vec<_> = self.records.values().collect();
        records.sort_by(|a, b| by_rank(a, b));
        records
    }

    /// 1-based rank, or `None` if the contributor never hit.
    pub fn rank_of(&self, contributor: &ContributorId) -> Option<usize> {
        let target = self.records.get(contributor)?;
        let ahead = self
            .records
            .values()
            .filter(|r| by_rank(r, target) == Ordering::Less)
            .count();
        Some(ahead + 1)
    }

    /// Share of total damage on a 0-100 scale.
    pub fn percentage(&self, contributor: &ContributorId) -> f64 {
        match self.records.get(contributor) {
            Some(r) if self.total_damage > 0.0 => r.total_damage / self.total_damage * 100.0,
            _ => 0.0,
        }
    }

    pub fn damage_map(&self) -> HashMap<ContributorId, f64> {
        self.records
            .iter()
            .map(|(id, r)| (id.clone(), r.total_damage))
            .collect()
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            encounter: self.encounter,
            boss_kind: self.boss_kind.clone(),
            total_damage: self.total_damage,
            created_at: self.created_at,
            ended_at: self.ended_at,
            records: self.ranked().into_iter().cloned().collect(),
        }
    }
}

/// Point-in-time copy of a ledger, records in rank order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub encounter: EncounterId,
    pub boss_kind: String,
    pub total_damage: f64,
    pub created_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub records: Vec<ContributionRecord>,
}

impl LedgerSnapshot {
    pub fn participant_count(&self) -> usize {
        self.records.len()
    }

    pub fn contribution(&self, contributor: &ContributorId) -> Option<&ContributionRecord> {
        self.records.iter().find(|r| &r.contributor == contributor)
    }

    pub fn damage_map(&self) -> HashMap<ContributorId, f64> {
        self.records
            .iter()
            .map(|r| (r.contributor.clone(), r.total_damage))
            .collect()
    }

    pub fn duration(&self) -> Option<chrono::Duration> {
        self.ended_at.map(|end| end - self.created_at)
    }
}
