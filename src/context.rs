use raidmesh_core::adapters::{Adapters, InMemoryDamageDatabase, Noop, TracingSink};
use raidmesh_core::clock::system_clock;
use raidmesh_core::context::{BackgroundTasks, EngineConfig, spawn_replication, spawn_sweeper};
use raidmesh_core::coordinator::{DistributedCoordinator, LoopbackTransport};
use raidmesh_core::sync::{DataSyncManager, resolver_for};
use raidmesh_core::{BossSystem, EncounterId, NodeId, clock};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

const DEFAULT_NODE: &str = "node-1";
const LOCAL_ADDRESS: &str = "127.0.0.1:7000";

/// Holds all shared state for the console: the local node's boss system,
/// the in-process replicas of every peer and the background tasks.
#[derive(Clone)]
pub struct ConsoleContext {
    pub system: Arc<BossSystem>,
    pub transport: LoopbackTransport,
    pub tasks: Arc<Mutex<BackgroundTasks>>,
}

impl ConsoleContext {
    /// Build the local node, register it, and start replication and the
    /// periodic sweep. Must be called inside a tokio runtime.
    pub async fn new(config: EngineConfig) -> Self {
        let local = NodeId::from(config.node_id.as_deref().unwrap_or(DEFAULT_NODE));
        let sweep_interval = Duration::from_secs(config.sweep.interval_secs);
        let region = config.region.clone();

        let adapters = Arc::new(Adapters::default());
        adapters.set_announcements(Arc::new(TracingSink));
        adapters.set_database(Arc::new(InMemoryDamageDatabase::new()));

        let (coordinator, rx) = DistributedCoordinator::new(local.clone(), config, adapters, system_clock());
        coordinator.register_node(local.clone(), local.as_str(), LOCAL_ADDRESS, region.as_deref());

        let transport = LoopbackTransport::new();
        let worker = coordinator.replication_worker(rx, transport.clone());
        let coordinator = Arc::new(coordinator);

        let system = Arc::new(BossSystem::new(Arc::clone(&coordinator)));
        system.initialize(Arc::new(TracingSink), Arc::new(Noop));

        let tasks = BackgroundTasks {
            sweeper: spawn_sweeper(coordinator, sweep_interval),
            replication: Some(spawn_replication(worker)),
        };

        Self {
            system,
            transport,
            tasks: Arc::new(Mutex::new(tasks)),
        }
    }

    pub fn coordinator(&self) -> &Arc<DistributedCoordinator> {
        self.system.coordinator()
    }

    /// Register a peer and give it an in-process replica. Re-registering
    /// keeps the existing replica.
    pub fn register_peer(&self, id: NodeId, address: &str, region: Option<&str>) {
        let coordinator = self.coordinator();
        coordinator.register_node(id.clone(), id.as_str(), address, region);
        if &id == coordinator.local_node() || self.transport.replica(&id).is_some() {
            return;
        }
        let config = &coordinator.config().sync;
        let replica = DataSyncManager::new(
            id.clone(),
            config.history_capacity,
            clock::seconds(config.transaction_ttl_secs),
            resolver_for(config.conflict_strategy),
            system_clock(),
        );
        self.transport.connect(id, Arc::new(replica));
    }

    /// Accept a full encounter ID or a unique prefix of a live one.
    pub fn resolve_encounter(&self, input: &str) -> Result<EncounterId, String> {
        if let Some(id) = EncounterId::parse(input) {
            return Ok(id);
        }
        let matches: Vec<EncounterId> = self
            .coordinator()
            .encounters()
            .into_iter()
            .map(|e| e.id)
            .filter(|id| id.to_string().starts_with(input))
            .collect();
        match matches.as_slice() {
            [id] => Ok(*id),
            [] => Err(format!("no live encounter matches '{input}'\n")),
            _ => Err(format!("'{input}' matches {} encounters\n", matches.len())),
        }
    }

    pub async fn shutdown(&self) {
        self.tasks.lock().await.abort_all().await;
        self.system.shutdown();
    }
}
