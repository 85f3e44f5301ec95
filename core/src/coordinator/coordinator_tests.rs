//! Tests for placement, damage routing, kills and failover, plus loopback
//! replication across an in-process cluster.

use chrono::{Duration, Utc};
use raidmesh_types::EngineConfig;
use serde_json::json;
use std::sync::{Arc, Mutex};

use crate::adapters::{
    Adapters, DamageDatabase, EncounterEvent, EntityAdapter, EventAdapter, InMemoryDamageDatabase,
    LocationSelector, SpawnLocation,
};
use crate::clock::ManualClock;
use crate::error::EngineError;
use crate::ids::{ContributorId, EncounterId, NodeId};
use crate::progression::{AttributeMultipliers, BossTier};
use crate::sync::{DataSyncManager, LastWriteWins};

use super::*;

// ═══════════════════════════════════════════════════════════════════════════
// Test Helpers
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Default)]
struct EventLog(Mutex<Vec<EncounterEvent>>);

impl EventAdapter for EventLog {
    fn on_event(&self, event: &EncounterEvent) {
        self.0.lock().unwrap().push(event.clone());
    }
}

impl EventLog {
    fn attribute_updates(&self, encounter: &EncounterId) -> Vec<&'static str> {
        self.0
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                EncounterEvent::AttributeUpdated { encounter: id, attribute, .. } if id == encounter => {
                    Some(*attribute)
                }
                _ => None,
            })
            .collect()
    }

    fn killed(&self) -> usize {
        self.0
            .lock()
            .unwrap()
            .iter()
            .filter(|e| matches!(e, EncounterEvent::Killed { .. }))
            .count()
    }
}

/// Counts multiplier pushes to the boss actor.
#[derive(Default)]
struct BossActor(Mutex<Vec<(EncounterId, AttributeMultipliers)>>);

impl EntityAdapter for BossActor {
    fn spawn(&self, _: EncounterId, _: &str, _: Option<&SpawnLocation>) -> bool {
        true
    }

    fn despawn(&self, _: EncounterId) -> bool {
        true
    }

    fn set_health(&self, _: EncounterId, _: f64) {}

    fn apply_multipliers(&self, encounter: EncounterId, multipliers: &AttributeMultipliers) {
        self.0.lock().unwrap().push((encounter, *multipliers));
    }
}

struct Cluster {
    coordinator: DistributedCoordinator,
    rx: Option<ReplicationReceiver>,
    clock: ManualClock,
    events: Arc<EventLog>,
    database: Arc<InMemoryDamageDatabase>,
}

fn cluster() -> Cluster {
    let clock = ManualClock::new(Utc::now());
    let adapters = Arc::new(Adapters::default());
    let events = Arc::new(EventLog::default());
    let database = Arc::new(InMemoryDamageDatabase::new());
    adapters.set_events(events.clone());
    adapters.set_database(database.clone());

    let (coordinator, rx) = DistributedCoordinator::new(
        NodeId::from("a"),
        EngineConfig::default(),
        adapters,
        clock.shared(),
    );
    for id in ["a", "b", "c"] {
        coordinator.register_node(NodeId::from(id), id, &format!("{id}.local:7000"), None);
    }
    coordinator.start();
    Cluster {
        coordinator,
        rx: Some(rx),
        clock,
        events,
        database,
    }
}

fn node(id: &str) -> NodeId {
    NodeId::from(id)
}

fn who(id: &str) -> ContributorId {
    ContributorId::from(id)
}

fn spawn(c: &Cluster) -> EncounterId {
    c.coordinator
        .create_encounter("dragon", BossTier::Normal, None)
        .unwrap()
}

// ═══════════════════════════════════════════════════════════════════════════
// Placement
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn create_places_on_least_loaded_node() {
    let c = cluster();
    c.coordinator.heartbeat(&node("a"), 0.5).unwrap();
    c.coordinator.heartbeat(&node("b"), 0.1).unwrap();
    c.coordinator.heartbeat(&node("c"), 0.9).unwrap();

    let id = spawn(&c);
    let data = c.coordinator.encounter(&id).unwrap();
    assert_eq!(data.owner_node, node("b"));
    assert_eq!(data.status, EncounterStatus::Spawned);
    assert_eq!(data.max_health, 10_000.0);
    assert_eq!(data.health, data.max_health);
    assert_eq!(c.coordinator.sync().version(&id), 1);
    assert_eq!(c.coordinator.node(&node("b")).unwrap().active_encounters, 1);
    assert!(c.coordinator.ledger().contains(&id));
    assert!(c.coordinator.lifecycle().is_active(&id));
}

#[test]
fn placement_failure_is_surfaced() {
    let c = cluster();
    for id in ["a", "b", "c"] {
        c.coordinator.mark_node_inactive(&node(id));
    }
    let err = c
        .coordinator
        .create_encounter("dragon", BossTier::Normal, None)
        .unwrap_err();
    assert!(matches!(err, EngineError::PlacementFailure { candidates: 3, .. }));
    assert!(c.coordinator.encounters().is_empty());
}

#[test]
fn create_requires_started_coordinator() {
    let c = cluster();
    c.coordinator.shutdown();
    assert!(matches!(
        c.coordinator.create_encounter("dragon", BossTier::Normal, None),
        Err(EngineError::NotInitialized)
    ));
}

#[test]
fn location_selector_supplies_spawn_point_and_crowd() {
    struct Arena;
    impl LocationSelector for Arena {
        fn select_spawn_location(&self, _: &str, _: f64) -> Option<SpawnLocation> {
            Some(SpawnLocation::new("overworld", 0.0, 64.0, 0.0).named("Arena"))
        }
        fn nearby_player_count(&self, _: &SpawnLocation, _: f64) -> usize {
            1
        }
    }

    let c = cluster();
    c.coordinator.adapters().set_locations(Arc::new(Arena));
    let id = c
        .coordinator
        .create_encounter("dragon", BossTier::Normal, Some("eu"))
        .unwrap();
    let data = c.coordinator.encounter(&id).unwrap();
    assert_eq!(data.location.unwrap().display_name(), "Arena");
    assert_eq!(data.region.as_deref(), Some("eu"));

    // One player nearby: participant term +20
    let record = c.coordinator.lifecycle().record(&id).unwrap();
    assert_eq!(record.inputs.participant_count, 1);
    assert_eq!(record.difficulty.score, 70);
}

// ═══════════════════════════════════════════════════════════════════════════
// Damage
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn damage_reduces_health_and_bumps_version() {
    let c = cluster();
    let id = spawn(&c);

    assert_eq!(c.coordinator.record_damage(&id, &who("alice"), 300.0).unwrap(), 9_700.0);
    assert_eq!(c.coordinator.record_damage(&id, &who("bob"), 200.0).unwrap(), 9_500.0);
    assert_eq!(c.coordinator.sync().version(&id), 3);

    let data = c.coordinator.encounter(&id).unwrap();
    assert_eq!(data.status, EncounterStatus::Active);
    assert_eq!(data.involved_contributors.len(), 2);
    assert_eq!(c.coordinator.ledger().total_damage(&id), 500.0);

    // Latest snapshot carries the ledger
    let snapshot = c.coordinator.last_snapshot(&id).unwrap();
    assert_eq!(snapshot.ledger.unwrap().total_damage, 500.0);
}

#[test]
fn concurrent_hits_replicate_the_newest_state() {
    let mut c = cluster();
    let id = spawn(&c);

    std::thread::scope(|s| {
        for t in 0..8 {
            let coordinator = &c.coordinator;
            s.spawn(move || {
                let player = who(&format!("p{t}"));
                for _ in 0..25 {
                    coordinator.record_damage(&id, &player, 1.0).unwrap();
                }
            });
        }
    });

    let live = c.coordinator.encounter(&id).unwrap();
    assert_eq!(live.health, 9_800.0);
    assert_eq!(c.coordinator.sync().version(&id), 201);

    // Highest version pairs with the final health and ledger
    let synced = c.coordinator.last_snapshot(&id).unwrap();
    assert_eq!(synced.data.health, live.health);
    assert_eq!(synced.ledger.unwrap().total_damage, 200.0);

    // Peers see versions in order
    let mut rx = c.rx.take().unwrap();
    let mut last = 0;
    while let Ok(message) = rx.try_recv() {
        assert!(message.version > last, "{} after {last}", message.version);
        last = message.version;
    }
    assert_eq!(last, 201);
}

#[test]
fn difficulty_recompute_reapplies_attributes() {
    let c = cluster();
    let actor = Arc::new(BossActor::default());
    c.coordinator.adapters().set_entities(actor.clone());
    let id = spawn(&c);
    assert_eq!(actor.0.lock().unwrap().len(), 1);

    // Throttled: nothing new to push
    c.coordinator.record_damage(&id, &who("alice"), 100.0).unwrap();
    assert_eq!(actor.0.lock().unwrap().len(), 1);
    assert!(c.events.attribute_updates(&id).is_empty());

    c.clock.advance(Duration::seconds(2));
    c.coordinator.record_damage(&id, &who("alice"), 100.0).unwrap();
    let pushes = actor.0.lock().unwrap().clone();
    assert_eq!(pushes.len(), 2);
    assert_eq!(pushes[1].0, id);
    assert_eq!(
        c.events.attribute_updates(&id),
        vec!["health", "damage", "speed", "armor", "attack_range", "drop"]
    );
}

#[test]
fn health_never_goes_below_zero() {
    let c = cluster();
    let id = spawn(&c);
    assert_eq!(c.coordinator.record_damage(&id, &who("alice"), 50_000.0).unwrap(), 0.0);
    assert_eq!(c.coordinator.ledger().total_damage(&id), 50_000.0);
}

#[test]
fn invalid_damage_is_ignored() {
    let c = cluster();
    let id = spawn(&c);
    for amount in [0.0, -5.0, f64::NAN] {
        assert_eq!(c.coordinator.record_damage(&id, &who("alice"), amount).unwrap(), 10_000.0);
    }
    assert_eq!(c.coordinator.sync().version(&id), 1);
    assert_eq!(c.coordinator.ledger().participant_count(&id), 0);
    assert!(matches!(
        c.coordinator.record_damage(&EncounterId::new(), &who("alice"), 10.0),
        Err(EngineError::EncounterNotFound(_))
    ));
}

// ═══════════════════════════════════════════════════════════════════════════
// Kill / Despawn
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn kill_settles_persists_and_retires() {
    let c = cluster();
    let id = spawn(&c);
    for (name, dmg) in [("alice", 300.0), ("bob", 200.0), ("carol", 100.0)] {
        c.coordinator.record_damage(&id, &who(name), dmg).unwrap();
    }
    let owner = c.coordinator.encounter(&id).unwrap().owner_node;
    c.clock.advance(Duration::minutes(4));

    let settlement = c.coordinator.complete_kill(&id, Some(&who("alice"))).unwrap();
    assert_eq!(settlement.rewards.len(), 3);
    assert_eq!(settlement.rewards[0].contributor, who("alice"));

    // Gone from live state, readable from the terminal snapshot
    assert!(!c.coordinator.is_live(&id));
    assert!(!c.coordinator.ledger().contains(&id));
    let last = c.coordinator.encounter(&id).unwrap();
    assert_eq!(last.status, EncounterStatus::Dead);
    assert_eq!(last.health, 0.0);
    assert_eq!(c.coordinator.node(&owner).unwrap().active_encounters, 0);

    let record = c.database.kill(&id).unwrap();
    assert_eq!(record.total_damage, 600.0);
    assert_eq!(record.duration_secs, 240);
    assert_eq!(record.contributions[0].contributor, who("alice"));
    assert_eq!(c.events.killed(), 1);

    assert!(matches!(
        c.coordinator.complete_kill(&id, Some(&who("alice"))),
        Err(EngineError::EncounterNotFound(_))
    ));
    assert!(c.coordinator.lifecycle().killed_recently("dragon"));
}

#[test]
fn despawn_discards_without_rewards() {
    let c = cluster();
    let id = spawn(&c);
    c.coordinator.record_damage(&id, &who("alice"), 10.0).unwrap();

    c.coordinator.despawn_encounter(&id, "timeout").unwrap();
    assert_eq!(c.coordinator.encounter(&id).unwrap().status, EncounterStatus::Despawned);
    assert!(!c.coordinator.lifecycle().is_active(&id));
    assert!(c.database.is_empty());
    assert!(!c.coordinator.lifecycle().killed_recently("dragon"));
    assert!(c.coordinator.despawn_encounter(&id, "again").is_err());
}

// ═══════════════════════════════════════════════════════════════════════════
// Failover
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn write_after_owner_loss_moves_the_encounter() {
    let c = cluster();
    let id = spawn(&c);
    let owner = c.coordinator.encounter(&id).unwrap().owner_node;
    c.coordinator.mark_node_inactive(&owner);

    // Reads keep working before the move
    assert_eq!(c.coordinator.encounter(&id).unwrap().owner_node, owner);

    c.coordinator.record_damage(&id, &who("alice"), 10.0).unwrap();
    let moved = c.coordinator.encounter(&id).unwrap().owner_node;
    assert_ne!(moved, owner);
    assert!(c.coordinator.node(&moved).unwrap().is_active);
    assert_eq!(c.coordinator.node(&owner).unwrap().active_encounters, 0);
    assert_eq!(c.coordinator.node(&moved).unwrap().active_encounters, 1);
}

#[test]
fn writes_fail_while_no_node_can_take_over() {
    let c = cluster();
    let id = spawn(&c);
    for n in ["a", "b", "c"] {
        c.coordinator.mark_node_inactive(&node(n));
    }

    let err = c.coordinator.record_damage(&id, &who("alice"), 10.0).unwrap_err();
    assert!(matches!(err, EngineError::NodeUnavailable { .. }));
    assert!(err.to_string().starts_with("NODE_UNAVAILABLE"));
    assert!(matches!(
        c.coordinator.complete_kill(&id, None),
        Err(EngineError::NodeUnavailable { .. })
    ));
    assert_eq!(c.coordinator.encounter(&id).unwrap().health, 10_000.0);

    // A heartbeat brings a node back and the write goes through
    c.coordinator.heartbeat(&node("c"), 0.2).unwrap();
    c.coordinator.record_damage(&id, &who("alice"), 10.0).unwrap();
    assert_eq!(c.coordinator.encounter(&id).unwrap().owner_node, node("c"));
}

#[test]
fn eager_failover_moves_everything_owned() {
    let c = cluster();
    c.coordinator.heartbeat(&node("b"), 0.0).unwrap();
    c.coordinator.heartbeat(&node("a"), 0.6).unwrap();
    c.coordinator.heartbeat(&node("c"), 0.7).unwrap();
    let ids: Vec<_> = (0..3).map(|_| spawn(&c)).collect();
    assert_eq!(c.coordinator.encounters_by_node(&node("b")).len(), 3);

    c.coordinator.mark_node_inactive(&node("b"));
    let report = c.coordinator.failover_node(&node("b"));
    assert_eq!(report.reassigned.len(), 3);
    assert!(report.stranded.is_empty());
    assert!(report.reassigned.iter().all(|(_, to)| to == &node("a")));
    assert!(c.coordinator.encounters_by_node(&node("b")).is_empty());
    for id in ids {
        assert!(c.coordinator.sync().version(&id) >= 2);
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Sweeps
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn sweep_expires_abandoned_encounters_and_silent_nodes() {
    let c = cluster();
    let stale = spawn(&c);
    c.clock.advance(Duration::minutes(61));
    let fresh = spawn(&c);
    c.coordinator.heartbeat(&node("a"), 0.1).unwrap();

    let report = c.coordinator.sweep();
    assert_eq!(report.ledgers, 1);
    assert_eq!(report.expired_encounters, 1);
    assert_eq!(report.silent_nodes, 2);
    assert_eq!(c.coordinator.encounter(&stale).unwrap().status, EncounterStatus::Despawned);
    assert!(c.coordinator.is_live(&fresh));

    let second = c.coordinator.sweep();
    assert_eq!(second.total(), 0);
}

// ═══════════════════════════════════════════════════════════════════════════
// Replication
// ═══════════════════════════════════════════════════════════════════════════

fn replica(c: &Cluster, id: &str) -> Arc<DataSyncManager> {
    Arc::new(DataSyncManager::new(
        node(id),
        64,
        Duration::seconds(30),
        Arc::new(LastWriteWins),
        c.clock.shared(),
    ))
}

#[tokio::test]
async fn loopback_replicas_follow_the_owner() {
    let mut c = cluster();
    let transport = LoopbackTransport::new();
    let (b, cc) = (replica(&c, "b"), replica(&c, "c"));
    transport.connect(node("b"), b.clone());
    transport.connect(node("c"), cc.clone());
    let mut worker = c
        .coordinator
        .replication_worker(c.rx.take().unwrap(), transport);

    let id = spawn(&c);
    c.coordinator.record_damage(&id, &who("alice"), 250.0).unwrap();
    let reports = worker.drain().await;
    assert_eq!(reports.len(), 2);
    assert!(reports.iter().all(|r| r.committed && r.applied.len() == 2));

    for peer in [&b, &cc] {
        let snapshot = EncounterSnapshot::from_value(&peer.get_state(&id).unwrap().data).unwrap();
        assert_eq!(snapshot.data.health, 9_750.0);
        assert_eq!(peer.version(&id), c.coordinator.sync().version(&id));
    }
    assert_eq!(c.coordinator.balancer().reliability(&node("b")).success_count, 2);
    assert_eq!(c.coordinator.sync().statistics().pending_transactions, 0);
}

#[tokio::test]
async fn unreachable_peer_is_retried_then_penalized() {
    let mut c = cluster();
    let transport = LoopbackTransport::new();
    transport.connect(node("b"), replica(&c, "b"));
    transport.connect(node("c"), replica(&c, "c"));
    transport.partition(node("c"));
    let mut worker = c
        .coordinator
        .replication_worker(c.rx.take().unwrap(), transport.clone());

    spawn(&c);
    let reports = worker.drain().await;
    assert_eq!(reports[0].applied, vec![node("b")]);
    assert_eq!(reports[0].failed, vec![node("c")]);
    assert!(!reports[0].committed);

    let unreliable = c.coordinator.balancer().reliability(&node("c"));
    assert_eq!(unreliable.failure_count, 3);
    assert_eq!(unreliable.consecutive_failures, 3);
    assert_eq!(c.coordinator.balancer().reliability(&node("b")).success_count, 1);

    transport.heal(&node("c"));
    spawn(&c);
    assert!(worker.drain().await[0].committed);
}

#[tokio::test]
async fn stale_replica_write_is_rejected_not_penalized() {
    let mut c = cluster();
    let transport = LoopbackTransport::new();
    let b = replica(&c, "b");
    transport.connect(node("b"), b.clone());
    transport.connect(node("c"), replica(&c, "c"));
    let mut worker = c
        .coordinator
        .replication_worker(c.rx.take().unwrap(), transport);

    let id = spawn(&c);
    for i in 0..5 {
        b.start_sync(id, json!({ "local": i }), &node("b"));
    }

    let reports = worker.drain().await;
    assert_eq!(reports[0].rejected, vec![node("b")]);
    assert_eq!(reports[0].applied, vec![node("c")]);
    assert_eq!(b.open_conflicts().len(), 1);
    assert_eq!(c.coordinator.balancer().reliability(&node("b")).failure_count, 0);
}

#[tokio::test]
async fn spawned_worker_stops_when_coordinator_drops() {
    let mut c = cluster();
    let transport = LoopbackTransport::new();
    let b = replica(&c, "b");
    transport.connect(node("b"), b.clone());
    c.coordinator.mark_node_inactive(&node("c"));
    let worker = c
        .coordinator
        .replication_worker(c.rx.take().unwrap(), transport);
    let handle = tokio::spawn(worker.run());

    let id = spawn(&c);
    drop(c);
    handle.await.unwrap();
    assert_eq!(b.version(&id), 1);
}
