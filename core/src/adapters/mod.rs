//! Boundary contracts with the host world.
//!
//! The engine never spawns actors, renders text or writes to a database
//! itself. Everything outside the coordination core goes through one of the
//! traits below, installed into an [`Adapters`] registry at startup.

mod memory;

pub use memory::InMemoryDamageDatabase;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, RwLock};

use crate::error::EngineResult;
use crate::ids::{ContributorId, EncounterId};
use crate::ledger::ContributionRecord;
use crate::locks::{read, write};
use crate::progression::{AttributeMultipliers, BossTier};

// ─────────────────────────────────────────────────────────────────────────────
// Shared Types
// ─────────────────────────────────────────────────────────────────────────────

/// An in-world spawn point. Opaque to the engine beyond its name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpawnLocation {
    pub world: String,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl SpawnLocation {
    pub fn new(world: impl Into<String>, x: f64, y: f64, z: f64) -> Self {
        Self {
            world: world.into(),
            x,
            y,
            z,
            name: None,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn display_name(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => format!("{} ({:.0}, {:.0}, {:.0})", self.world, self.x, self.y, self.z),
        }
    }
}

/// Durable record of one finalized kill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KillRecord {
    pub encounter: EncounterId,
    pub boss_kind: String,
    pub tier: BossTier,
    pub killer: Option<ContributorId>,
    pub total_damage: f64,
    pub participant_count: usize,
    pub duration_secs: i64,
    pub killed_at: DateTime<Utc>,
    /// Ranked, highest damage first
    pub contributions: Vec<ContributionRecord>,
}

impl KillRecord {
    pub fn damage_by(&self, contributor: &ContributorId) -> f64 {
        self.contributions
            .iter()
            .find(|c| &c.contributor == contributor)
            .map_or(0.0, |c| c.total_damage)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Entity Adapter
// ─────────────────────────────────────────────────────────────────────────────

/// Controls the boss actor in the host world.
pub trait EntityAdapter: Send + Sync {
    fn spawn(&self, encounter: EncounterId, boss_kind: &str, location: Option<&SpawnLocation>) -> bool;
    fn despawn(&self, encounter: EncounterId) -> bool;
    fn set_health(&self, encounter: EncounterId, health: f64);
    fn apply_multipliers(&self, encounter: EncounterId, multipliers: &AttributeMultipliers);
}

// ─────────────────────────────────────────────────────────────────────────────
// Event Adapter
// ─────────────────────────────────────────────────────────────────────────────

/// Outbound notifications about encounter state.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EncounterEvent {
    Spawned {
        encounter: EncounterId,
        boss_kind: String,
        tier: BossTier,
    },
    Damaged {
        encounter: EncounterId,
        contributor: ContributorId,
        amount: f64,
    },
    AttributeUpdated {
        encounter: EncounterId,
        attribute: &'static str,
        value: f64,
    },
    Killed {
        encounter: EncounterId,
        killer: Option<ContributorId>,
        total_damage: f64,
        participants: usize,
    },
    Despawned {
        encounter: EncounterId,
        reason: String,
    },
    SystemError {
        kind: &'static str,
        message: String,
    },
}

/// Receives [`EncounterEvent`]s. Implementations must not block.
pub trait EventAdapter: Send + Sync {
    fn on_event(&self, event: &EncounterEvent);

    fn on_events(&self, events: &[EncounterEvent]) {
        for event in events {
            self.on_event(event);
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Damage Persistence
// ─────────────────────────────────────────────────────────────────────────────

/// Durable storage of finalized ledgers.
pub trait DamageDatabase: Send + Sync {
    fn save_kill(&self, record: KillRecord) -> EngineResult<()>;
    fn kill(&self, encounter: &EncounterId) -> Option<KillRecord>;
    /// Newest first. Pages are zero-based.
    fn kills_page(&self, page: usize, page_size: usize) -> Vec<KillRecord>;
    fn kills_since(&self, since: DateTime<Utc>) -> Vec<KillRecord>;
    fn lifetime_damage(&self, contributor: &ContributorId) -> f64;
    fn delete_before(&self, cutoff: DateTime<Utc>) -> usize;
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Location Selection
// ─────────────────────────────────────────────────────────────────────────────

/// Supplies spawn points and crowd sizes. The engine only decides which node
/// owns an encounter, never where it appears.
pub trait LocationSelector: Send + Sync {
    fn select_spawn_location(&self, boss_kind: &str, difficulty_hint: f64) -> Option<SpawnLocation>;
    fn nearby_player_count(&self, location: &SpawnLocation, radius: f64) -> usize;

    fn spawn_points(&self) -> Vec<SpawnLocation> {
        Vec::new()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Announcements
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Announcement {
    Spawned {
        boss_kind: String,
        tier: BossTier,
        location: String,
    },
    Killed {
        boss_kind: String,
        killer: Option<ContributorId>,
        tier: BossTier,
    },
    Warning {
        boss_kind: String,
        message: String,
        level: u8,
    },
    Rankings {
        boss_kind: String,
        lines: Vec<String>,
    },
}

impl fmt::Display for Announcement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Announcement::Spawned { boss_kind, tier, location } => {
                write!(f, "{boss_kind} [{tier}] has appeared at {location}")
            }
            Announcement::Killed { boss_kind, killer: Some(killer), tier } => {
                write!(f, "{boss_kind} [{tier}] was slain by {killer}")
            }
            Announcement::Killed { boss_kind, killer: None, tier } => {
                write!(f, "{boss_kind} [{tier}] was slain")
            }
            Announcement::Warning { boss_kind, message, level } => {
                write!(f, "[{boss_kind}] warning {level}: {message}")
            }
            Announcement::Rankings { boss_kind, lines } => {
                write!(f, "{boss_kind} damage ranking")?;
                for line in lines {
                    write!(f, "\n  {line}")?;
                }
                Ok(())
            }
        }
    }
}

/// Human-readable broadcast sink. Nothing it returns is consumed.
pub trait AnnouncementAdapter: Send + Sync {
    fn broadcast(&self, announcement: &Announcement);

    fn whisper(&self, _contributor: &ContributorId, _announcement: &Announcement) {}
}

// ─────────────────────────────────────────────────────────────────────────────
// Built-in Implementations
// ─────────────────────────────────────────────────────────────────────────────

/// Accepts everything and does nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct Noop;

impl EntityAdapter for Noop {
    fn spawn(&self, _: EncounterId, _: &str, _: Option<&SpawnLocation>) -> bool {
        true
    }

    fn despawn(&self, _: EncounterId) -> bool {
        true
    }

    fn set_health(&self, _: EncounterId, _: f64) {}

    fn apply_multipliers(&self, _: EncounterId, _: &AttributeMultipliers) {}
}

impl EventAdapter for Noop {
    fn on_event(&self, _: &EncounterEvent) {}
}

impl AnnouncementAdapter for Noop {
    fn broadcast(&self, _: &Announcement) {}
}

/// Writes events and announcements to the tracing log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventAdapter for TracingSink {
    fn on_event(&self, event: &EncounterEvent) {
        match event {
            EncounterEvent::SystemError { kind, message } => {
                tracing::error!(target: "events", kind, message = %message, "System error");
            }
            EncounterEvent::Damaged { .. } => {
                tracing::trace!(target: "events", event = ?event);
            }
            _ => tracing::info!(target: "events", event = ?event),
        }
    }
}

impl AnnouncementAdapter for TracingSink {
    fn broadcast(&self, announcement: &Announcement) {
        tracing::info!(target: "announce", "{announcement}");
    }

    fn whisper(&self, contributor: &ContributorId, announcement: &Announcement) {
        tracing::info!(target: "announce", to = %contributor, "{announcement}");
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Registry
// ─────────────────────────────────────────────────────────────────────────────

/// Installed adapters. Every slot can be replaced at runtime; readers get a
/// cloned `Arc` and never hold the lock while calling out.
pub struct Adapters {
    entities: RwLock<Arc<dyn EntityAdapter>>,
    events: RwLock<Arc<dyn EventAdapter>>,
    announcements: RwLock<Arc<dyn AnnouncementAdapter>>,
    database: RwLock<Option<Arc<dyn DamageDatabase>>>,
    locations: RwLock<Option<Arc<dyn LocationSelector>>>,
}

impl Default for Adapters {
    fn default() -> Self {
        Self {
            entities: RwLock::new(Arc::new(Noop)),
            events: RwLock::new(Arc::new(Noop)),
            announcements: RwLock::new(Arc::new(Noop)),
            database: RwLock::new(None),
            locations: RwLock::new(None),
        }
    }
}

impl Adapters {
    pub fn set_entities(&self, adapter: Arc<dyn EntityAdapter>) {
        *write(&self.entities) = adapter;
    }

    pub fn set_events(&self, adapter: Arc<dyn EventAdapter>) {
        *write(&self.events) = adapter;
    }

    pub fn set_announcements(&self, adapter: Arc<dyn AnnouncementAdapter>) {
        *write(&self.announcements) = adapter;
    }

    pub fn set_database(&self, database: Arc<dyn DamageDatabase>) {
        *write(&self.database) = Some(database);
    }

    pub fn set_locations(&self, selector: Arc<dyn LocationSelector>) {
        *write(&self.locations) = Some(selector);
    }

    pub fn entities(&self) -> Arc<dyn EntityAdapter> {
        Arc::clone(&read(&self.entities))
    }

    pub fn events(&self) -> Arc<dyn EventAdapter> {
        Arc::clone(&read(&self.events))
    }

    pub fn announcements(&self) -> Arc<dyn AnnouncementAdapter> {
        Arc::clone(&read(&self.announcements))
    }

    pub fn database(&self) -> Option<Arc<dyn DamageDatabase>> {
        read(&self.database).clone()
    }

    pub fn locations(&self) -> Option<Arc<dyn LocationSelector>> {
        read(&self.locations).clone()
    }

    pub fn emit(&self, event: EncounterEvent) {
        self.events().on_event(&event);
    }

    pub fn emit_all(&self, events: &[EncounterEvent]) {
        if !events.is_empty() {
            self.events().on_events(events);
        }
    }

    pub fn announce(&self, announcement: Announcement) {
        self.announcements().broadcast(&announcement);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<EncounterEvent>>);

    impl EventAdapter for Recorder {
        fn on_event(&self, event: &EncounterEvent) {
            self.0.lock().unwrap().push(event.clone());
        }
    }

    #[test]
    fn registry_swaps_event_sink() {
        let adapters = Adapters::default();
        let recorder = Arc::new(Recorder::default());
        adapters.emit(EncounterEvent::SystemError {
            kind: "test",
            message: "dropped".into(),
        });

        adapters.set_events(recorder.clone());
        adapters.emit(EncounterEvent::Despawned {
            encounter: EncounterId::new(),
            reason: "timeout".into(),
        });
        let seen = recorder.0.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(matches!(seen[0], EncounterEvent::Despawned { .. }));
    }

    #[test]
    fn optional_slots_start_empty() {
        let adapters = Adapters::default();
        assert!(adapters.database().is_none());
        assert!(adapters.locations().is_none());
        adapters.set_database(Arc::new(InMemoryDamageDatabase::default()));
        assert!(adapters.database().is_some_and(|db| db.is_empty()));
    }

    #[test]
    fn announcements_render_readable_text() {
        let text = Announcement::Killed {
            boss_kind: "Ancient Dragon".into(),
            killer: Some(ContributorId::from("alice")),
            tier: BossTier::World,
        }
        .to_string();
        assert_eq!(text, "Ancient Dragon [World (T3)] was slain by alice");

        let location = SpawnLocation::new("overworld", 10.4, 64.0, -3.0);
        assert_eq!(location.display_name(), "overworld (10, 64, -3)");
        assert_eq!(location.named("Peak").display_name(), "Peak");
    }
}
