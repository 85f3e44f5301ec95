use chrono::Duration;
use dashmap::DashMap;

use crate::balancer::{NodeInfo, clamp_load};
use crate::clock::SharedClock;
use crate::error::{EngineError, EngineResult};
use crate::ids::NodeId;

/// Known nodes and their liveness. Failure detection itself is external:
/// nodes go inactive when an operator says so or when heartbeats stop.
pub struct NodeRegistry {
    nodes: DashMap<NodeId, NodeInfo>,
    clock: SharedClock,
}

impl NodeRegistry {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            nodes: DashMap::new(),
            clock,
        }
    }

    /// Insert a node, or refresh and reactivate an existing one. Load and
    /// encounter counts of a known node are kept.
    pub fn register(&self, id: NodeId, name: &str, address: &str, region: Option<&str>) -> NodeInfo {
        let now = self.clock.now();
        let mut entry = self
            .nodes
            .entry(id.clone())
            .or_insert_with(|| NodeInfo::new(id.clone(), name, address, now));
        let was_active = entry.is_active;
        entry.name = name.to_string();
        entry.address = address.to_string();
        entry.region = region.map(str::to_string);
        entry.is_active = true;
        entry.last_heartbeat = now;
        if !was_active {
            tracing::info!(node = %id, "Node reactivated");
        }
        entry.clone()
    }

    pub fn heartbeat(&self, id: &NodeId, load: f64) -> EngineResult<()> {
        let mut node = self
            .nodes
            .get_mut(id)
            .ok_or_else(|| EngineError::NodeNotFound(id.clone()))?;
        node.load = clamp_load(load);
        node.last_heartbeat = self.clock.now();
        if !node.is_active {
            node.is_active = true;
            tracing::info!(node = %id, "Node back after heartbeat");
        }
        Ok(())
    }

    /// Returns true if the node was active before the call.
    pub fn mark_inactive(&self, id: &NodeId) -> bool {
        match self.nodes.get_mut(id) {
            Some(mut node) if node.is_active => {
                node.is_active = false;
                tracing::warn!(node = %id, "Node marked inactive");
                true
            }
            _ => false,
        }
    }

    /// Mark every active node silent for longer than `timeout` inactive.
    pub fn expire_silent(&self, timeout: Duration) -> Vec<NodeId> {
        let cutoff = self.clock.now() - timeout;
        let mut expired = Vec::new();
        for mut node in self.nodes.iter_mut() {
            if node.is_active && node.last_heartbeat < cutoff {
                node.is_active = false;
                expired.push(node.id.clone());
            }
        }
        for id in &expired {
            tracing::warn!(node = %id, timeout_secs = timeout.num_seconds(), "Node missed heartbeats");
        }
        expired
    }

    pub fn unregister(&self, id: &NodeId) -> Option<NodeInfo> {
        self.nodes.remove(id).map(|(_, node)| node)
    }

    pub(crate) fn adjust_encounters(&self, id: &NodeId, delta: isize) {
        if let Some(mut node) = self.nodes.get_mut(id) {
            node.active_encounters = node.active_encounters.saturating_add_signed(delta);
        }
    }

    pub fn get(&self, id: &NodeId) -> Option<NodeInfo> {
        self.nodes.get(id).map(|n| n.clone())
    }

    /// Unknown nodes count as inactive.
    pub fn is_active(&self, id: &NodeId) -> bool {
        self.nodes.get(id).is_some_and(|n| n.is_active)
    }

    /// All nodes ordered by ID.
    pub fn all(&self) -> Vec<NodeInfo> {
        let mut nodes: Vec<NodeInfo> = self.nodes.iter().map(|n| n.clone()).collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        nodes
    }

    /// Active nodes other than `local`, ordered by ID.
    pub fn active_peers(&self, local: &NodeId) -> Vec<NodeInfo> {
        self.all()
            .into_iter()
            .filter(|n| n.is_active && &n.id != local)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn active_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_active).count()
    }
}
