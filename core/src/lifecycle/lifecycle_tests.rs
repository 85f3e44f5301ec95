//! Tests for LifecycleManager transitions and kill settlement

use chrono::Duration;
use raidmesh_types::{DifficultyConfig, RewardConfig};
use std::sync::Arc;

use crate::clock::ManualClock;
use crate::difficulty::{DifficultyLevel, KillHistory};
use crate::ids::{ContributorId, EncounterId};
use crate::ledger::DamageLedger;
use crate::progression::BossTier;
use crate::quality::QualityGrade;
use crate::reward::{RewardCalculator, RewardCooldowns};

use super::{KillReport, LifecycleManager};

// ═══════════════════════════════════════════════════════════════════════════
// Test Helpers
// ═══════════════════════════════════════════════════════════════════════════

struct Harness {
    manager: LifecycleManager,
    ledger: Arc<DamageLedger>,
    clock: ManualClock,
}

fn harness() -> Harness {
    let clock = ManualClock::default();
    let ledger = Arc::new(DamageLedger::new(Duration::hours(1), clock.shared()));
    let rewards = RewardCalculator::new(
        RewardConfig::default(),
        Arc::new(RewardCooldowns::new(Duration::hours(1))),
    );
    let manager = LifecycleManager::new(
        Arc::clone(&ledger),
        rewards,
        Arc::new(KillHistory::new(Duration::hours(1))),
        DifficultyConfig::default(),
        clock.shared(),
    );
    manager.start();
    Harness { manager, ledger, clock }
}

fn spawn_with_damage(h: &Harness, kind: &str) -> EncounterId {
    let id = EncounterId::new();
    h.ledger.create_ledger(id, kind);
    h.manager
        .initialize(id, kind, BossTier::Elite, 100.0, 100.0, 3)
        .unwrap();
    for (who, dmg) in [("alice", 300.0), ("bob", 200.0), ("carol", 100.0)] {
        h.ledger.record_damage(&id, &ContributorId::from(who), dmg);
    }
    id
}

fn quick_kill() -> KillReport {
    KillReport {
        duration: Duration::minutes(5),
        ..KillReport::default()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Initialization
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn initialize_fails_closed_before_start() {
    let h = harness();
    h.manager.shutdown();
    let id = EncounterId::new();
    assert!(h.manager.initialize(id, "dragon", BossTier::Normal, 100.0, 100.0, 3).is_none());
    assert!(!h.manager.is_initialized());
    assert_eq!(h.manager.active_count(), 0);
}

#[test]
fn initialize_wires_baseline_calculators() {
    let h = harness();
    let id = EncounterId::new();
    let record = h
        .manager
        .initialize(id, "dragon", BossTier::World, 100.0, 100.0, 3)
        .unwrap();

    assert_eq!(record.difficulty.score, 50);
    assert_eq!(record.difficulty.level, DifficultyLevel::Hard);
    assert_eq!(record.multipliers.health, 2.0);
    assert_eq!(record.tier, BossTier::World);
    assert!(h.manager.is_active(&id));
    assert_eq!(h.manager.active_by_kind("dragon"), vec![id]);
}

// ═══════════════════════════════════════════════════════════════════════════
// Difficulty Updates
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn difficulty_updates_are_throttled_while_active() {
    let h = harness();
    let id = spawn_with_damage(&h, "dragon");

    // Within the interval of initialize(): cached
    let cached = h.manager.update_difficulty(&id, 1, 100.0).unwrap();
    assert!(!cached.recomputed);
    assert_eq!(cached.record.difficulty.score, 50);

    h.clock.advance(Duration::milliseconds(1500));
    let fresh = h.manager.update_difficulty(&id, 1, 100.0).unwrap();
    assert!(fresh.recomputed);
    assert_eq!(fresh.record.difficulty.score, 70);
    assert_eq!(fresh.record.inputs.participant_count, 1);

    assert!(h.manager.update_difficulty(&EncounterId::new(), 1, 100.0).is_none());
}

// ═══════════════════════════════════════════════════════════════════════════
// Kill Settlement
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn on_killed_is_idempotent() {
    let h = harness();
    let id = spawn_with_damage(&h, "dragon");
    let killer = ContributorId::from("alice");

    let first = h.manager.on_killed(&id, Some(&killer), quick_kill());
    assert!(!first.is_empty());
    assert_eq!(first.rewards.len(), 3);
    assert_eq!(first.rewards[0].contributor, killer);
    assert!(first.rewards[0].is_killer);

    let second = h.manager.on_killed(&id, Some(&killer), quick_kill());
    assert!(second.is_empty());
    assert!(!h.manager.is_active(&id));
}

#[test]
fn settlement_reflects_quality_and_tier() {
    let h = harness();
    let id = spawn_with_damage(&h, "dragon");

    let settlement = h.manager.on_killed(&id, None, quick_kill());
    let summary = settlement.summary.as_ref().unwrap();
    // base (3 + 40 + 15) / 3 = 19.3, +30 bonuses -> 49
    assert_eq!(summary.quality.score, 49);
    assert_eq!(summary.quality.grade, QualityGrade::C);
    assert_eq!(summary.participants, 3);
    // 100 * tier 2 * 0.8 quality * 1.0 difficulty
    assert!((summary.pools.experience - 160.0).abs() < 1e-9);
    assert!((settlement.total_experience() - 160.0).abs() < 1e-9);
}

#[test]
fn kills_feed_history_for_later_encounters() {
    let h = harness();
    let first = spawn_with_damage(&h, "dragon");
    h.manager.on_killed(&first, None, quick_kill());
    assert!(h.manager.killed_recently("dragon"));
    assert!(!h.manager.killed_recently("golem"));
    assert_eq!(h.manager.kill_history().total("dragon"), 1);

    let second = EncounterId::new();
    let record = h
        .manager
        .initialize(second, "dragon", BossTier::Normal, 100.0, 100.0, 3)
        .unwrap();
    // One recent kill: time term +2
    assert_eq!(record.inputs.recent_kills, 1);
    assert_eq!(record.difficulty.score, 52);
}

#[test]
fn discard_removes_without_rewards() {
    let h = harness();
    let id = spawn_with_damage(&h, "golem");
    assert!(h.manager.discard(&id));
    assert!(h.manager.on_killed(&id, None, quick_kill()).is_empty());
    assert_eq!(h.manager.kill_history().total("golem"), 0);
}
