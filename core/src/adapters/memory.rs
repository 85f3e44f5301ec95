use chrono::{DateTime, Utc};
use std::sync::RwLock;

use super::{DamageDatabase, KillRecord};
use crate::error::EngineResult;
use crate::ids::{ContributorId, EncounterId};
use crate::locks::{read, write};

/// Process-local [`DamageDatabase`]. Records are kept oldest first; saving a
/// kill for an encounter that already has one replaces it.
#[derive(Debug, Default)]
pub struct InMemoryDamageDatabase {
    kills: RwLock<Vec<KillRecord>>,
}

impl InMemoryDamageDatabase {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DamageDatabase for InMemoryDamageDatabase {
    fn save_kill(&self, record: KillRecord) -> EngineResult<()> {
        let mut kills = write(&self.kills);
        kills.retain(|k| k.encounter != record.encounter);
        let at = kills.partition_point(|k| k.killed_at <= record.killed_at);
        kills.insert(at, record);
        Ok(())
    }

    fn kill(&self, encounter: &EncounterId) -> Option<KillRecord> {
        read(&self.kills).iter().find(|k| &k.encounter == encounter).cloned()
    }

    fn kills_page(&self, page: usize, page_size: usize) -> Vec<KillRecord> {
        if page_size == 0 {
            return Vec::new();
        }
        read(&self.kills)
            .iter()
            .rev()
            .skip(page.saturating_mul(page_size))
            .take(page_size)
            .cloned()
            .collect()
    }

    fn kills_since(&self, since: DateTime<Utc>) -> Vec<KillRecord> {
        read(&self.kills)
            .iter()
            .rev()
            .take_while(|k| k.killed_at >= since)
            .cloned()
            .collect()
    }

    fn lifetime_damage(&self, contributor: &ContributorId) -> f64 {
        read(&self.kills).iter().map(|k| k.damage_by(contributor)).sum()
    }

    fn delete_before(&self, cutoff: DateTime<Utc>) -> usize {
        let mut kills = write(&self.kills);
        let before = kills.len();
        kills.retain(|k| k.killed_at >= cutoff);
        let removed = before - kills.len();
        if removed > 0 {
            tracing::debug!(removed, "Deleted old kill records");
        }
        removed
    }

    fn len(&self) -> usize {
        read(&self.kills).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::ContributionRecord;
    use crate::progression::BossTier;
    use chrono::Duration;

    fn contribution(who: &str, damage: f64, at: DateTime<Utc>, seq: u64) -> ContributionRecord {
        ContributionRecord {
            contributor: ContributorId::from(who),
            total_damage: damage,
            hit_count: 1,
            first_hit_time: at,
            last_hit_time: at,
            first_hit_seq: seq,
        }
    }

    fn kill_at(at: DateTime<Utc>, alice: f64) -> KillRecord {
        KillRecord {
            encounter: EncounterId::new(),
            boss_kind: "dragon".into(),
            tier: BossTier::Elite,
            killer: Some(ContributorId::from("alice")),
            total_damage: alice + 50.0,
            participant_count: 2,
            duration_secs: 300,
            killed_at: at,
            contributions: vec![contribution("alice", alice, at, 0), contribution("bob", 50.0, at, 1)],
        }
    }

    #[test]
    fn pages_are_newest_first() {
        let db = InMemoryDamageDatabase::new();
        let now = Utc::now();
        let kills: Vec<_> = (0..5).map(|i| kill_at(now - Duration::days(i), 100.0)).collect();
        // Insert out of order
        for k in kills.iter().rev() {
            db.save_kill(k.clone()).unwrap();
        }

        let first = db.kills_page(0, 2);
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].encounter, kills[0].encounter);
        assert_eq!(first[1].encounter, kills[1].encounter);
        assert_eq!(db.kills_page(2, 2).len(), 1);
        assert!(db.kills_page(3, 2).is_empty());
        assert!(db.kills_page(0, 0).is_empty());
    }

    #[test]
    fn history_queries() {
        let db = InMemoryDamageDatabase::new();
        let now = Utc::now();
        db.save_kill(kill_at(now - Duration::days(10), 100.0)).unwrap();
        db.save_kill(kill_at(now - Duration::days(2), 300.0)).unwrap();
        db.save_kill(kill_at(now, 200.0)).unwrap();

        assert_eq!(db.kills_since(now - Duration::days(7)).len(), 2);
        assert_eq!(db.lifetime_damage(&ContributorId::from("alice")), 600.0);
        assert_eq!(db.lifetime_damage(&ContributorId::from("bob")), 150.0);
        assert_eq!(db.lifetime_damage(&ContributorId::from("nobody")), 0.0);

        assert_eq!(db.delete_before(now - Duration::days(7)), 1);
        assert_eq!(db.len(), 2);
    }

    #[test]
    fn saving_twice_replaces() {
        let db = InMemoryDamageDatabase::new();
        let mut record = kill_at(Utc::now(), 100.0);
        db.save_kill(record.clone()).unwrap();
        record.total_damage = 999.0;
        db.save_kill(record.clone()).unwrap();
        assert_eq!(db.len(), 1);
        assert_eq!(db.kill(&record.encounter).unwrap().total_damage, 999.0);
    }
}
