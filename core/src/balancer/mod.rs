//! Encounter placement across nodes.
//!
//! Strategies are a closed [`PlacementStrategy`] enum; each variant maps to
//! one selection function below. Reliability counters are fed by the
//! replication worker and read by the weighted and health-aware strategies.

mod node;


pub use node::{NodeInfo, NodeReliability, ProximityFn, RegionMatch};
pub(crate) use node::clamp_load;

use dashmap::DashMap;
use rand::Rng;
use rand::distributions::{Distribution, WeightedIndex};
use raidmesh_types::{BalancerConfig, PlacementStrategy};
use serde::Serialize;
use std::cmp::Ordering as CmpOrdering;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use crate::error::{EngineError, EngineResult};
use crate::ids::NodeId;
use crate::locks::{read, write};

const MIN_SELECTION_WEIGHT: f64 = 0.01;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BalancerStats {
    pub tracked_nodes: usize,
    pub total_successes: u64,
    pub total_failures: u64,
    pub unhealthy_nodes: usize,
    pub avg_response_time_ms: f64,
}

pub struct LoadBalancer {
    reliability: DashMap<NodeId, NodeReliability>,
    cursor: AtomicUsize,
    config: RwLock<BalancerConfig>,
    proximity: RwLock<Arc<dyn ProximityFn>>,
}

impl LoadBalancer {
    pub fn new(config: BalancerConfig) -> Self {
        Self {
            reliability: DashMap::new(),
            cursor: AtomicUsize::new(0),
            config: RwLock::new(config),
            proximity: RwLock::new(Arc::new(RegionMatch)),
        }
    }

    pub fn strategy(&self) -> PlacementStrategy {
        read(&self.config).strategy
    }

    pub fn set_strategy(&self, strategy: PlacementStrategy) {
        write(&self.config).strategy = strategy;
        tracing::info!(strategy = %strategy, "Placement strategy changed");
    }

    pub fn set_proximity(&self, proximity: Arc<dyn ProximityFn>) {
        *write(&self.proximity) = proximity;
    }

    fn failure_threshold(&self) -> u32 {
        read(&self.config).failure_threshold
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Selection
    // ─────────────────────────────────────────────────────────────────────────

    /// Pick a node with the configured strategy.
    pub fn select(&self, candidates: &[NodeInfo], preferred_region: Option<&str>) -> EngineResult<NodeInfo> {
        self.select_node(candidates, self.strategy(), preferred_region)
    }

    /// Pick an active node from `candidates`. An empty or all-inactive set is
    /// a placement failure; nothing is retried here.
    pub fn select_node(
        &self,
        candidates: &[NodeInfo],
        strategy: PlacementStrategy,
        preferred_region: Option<&str>,
    ) -> EngineResult<NodeInfo> {
        self.select_node_with(candidates, strategy, preferred_region, &mut rand::thread_rng())
    }

    pub fn select_node_with<R: Rng + ?Sized>(
        &self,
        candidates: &[NodeInfo],
        strategy: PlacementStrategy,
        preferred_region: Option<&str>,
        rng: &mut R,
    ) -> EngineResult<NodeInfo> {
        let mut active: Vec<&NodeInfo> = candidates.iter().filter(|n| n.is_active).collect();
        if active.is_empty() {
            tracing::warn!(candidates = candidates.len(), strategy = %strategy, "No active node for placement");
            return Err(EngineError::PlacementFailure {
                candidates: candidates.len(),
                strategy,
            });
        }
        active.sort_by(|a, b| a.id.cmp(&b.id));

        let chosen = match strategy {
            PlacementStrategy::RoundRobin => self.round_robin(&active),
            PlacementStrategy::LeastLoaded => least_loaded(&active),
            PlacementStrategy::Weighted => self.weighted(&active, rng),
            PlacementStrategy::HealthAware => self.health_aware(&active),
            PlacementStrategy::GeographicProximity => self.nearest(&active, preferred_region),
        };
        tracing::debug!(node = %chosen.id, strategy = %strategy, "Node selected");
        Ok(chosen.clone())
    }

    fn round_robin<'a>(&self, active: &[&'a NodeInfo]) -> &'a NodeInfo {
        let idx = self.cursor.fetch_add(1, Ordering::Relaxed) % active.len();
        active[idx]
    }

    fn weighted<'a, R: Rng + ?Sized>(&self, active: &[&'a NodeInfo], rng: &mut R) -> &'a NodeInfo {
        let weights: Vec<f64> = active
            .iter()
            .map(|n| {
                let spare = (1.0 - n.load).max(0.1);
                (spare * self.reliability(&n.id).effective_weight()).max(MIN_SELECTION_WEIGHT)
            })
            .collect();
        match WeightedIndex::new(&weights) {
            Ok(dist) => active[dist.sample(rng)],
            Err(e) => {
                tracing::warn!(error = %e, "Invalid placement weights, using least loaded");
                least_loaded(active)
            }
        }
    }

    fn health_aware<'a>(&self, active: &[&'a NodeInfo]) -> &'a NodeInfo {
        let threshold = self.failure_threshold();
        let scored: Vec<(&NodeInfo, u32)> = active
            .iter()
            .map(|n| (*n, self.reliability(&n.id).consecutive_failures))
            .collect();
        let healthy: Vec<_> = scored.iter().filter(|(_, f)| *f < threshold).copied().collect();
        let pool = if healthy.is_empty() {
            tracing::warn!(threshold, "All nodes above failure threshold, picking least failing");
            scored
        } else {
            healthy
        };
        pool.into_iter()
            .min_by(|(a, fa), (b, fb)| fa.cmp(fb).then_with(|| by_load(a, b)))
            .map(|(n, _)| n)
            .unwrap_or(active[0])
    }

    fn nearest<'a>(&self, active: &[&'a NodeInfo], preferred_region: Option<&str>) -> &'a NodeInfo {
        let proximity = Arc::clone(&read(&self.proximity));
        active
            .iter()
            .map(|n| (*n, proximity.distance(n, preferred_region)))
            .min_by(|(a, da), (b, db)| da.total_cmp(db).then_with(|| by_load(a, b)))
            .map(|(n, _)| n)
            .unwrap_or(active[0])
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Reliability
    // ─────────────────────────────────────────────────────────────────────────

    pub fn record_success(&self, node: &NodeId, response_time_ms: f64) {
        self.reliability
            .entry(node.clone())
            .or_default()
            .record_success(response_time_ms);
    }

    pub fn record_failure(&self, node: &NodeId) {
        let mut entry = self.reliability.entry(node.clone()).or_default();
        entry.record_failure();
        tracing::debug!(node = %node, consecutive = entry.consecutive_failures, "Node failure recorded");
    }

    pub fn reliability(&self, node: &NodeId) -> NodeReliability {
        self.reliability
            .get(node)
            .map(|r| *r.value())
            .unwrap_or_default()
    }

    pub fn reset_node(&self, node: &NodeId) {
        self.reliability.remove(node);
    }

    pub fn reset_weights(&self) {
        self.reliability.clear();
        self.cursor.store(0, Ordering::Relaxed);
        tracing::info!("Reliability state cleared");
    }

    /// Halve the counters of nodes whose sample count exceeds the
    /// reliability window. Returns the number of nodes decayed.
    pub fn decay(&self) -> usize {
        let window = read(&self.config).reliability_window;
        let mut decayed = 0;
        for mut entry in self.reliability.iter_mut() {
            if entry.samples() > window {
                entry.halve();
                decayed += 1;
            }
        }
        decayed
    }

    pub fn statistics(&self) -> BalancerStats {
        let threshold = self.failure_threshold();
        let mut stats = BalancerStats::default();
        let mut rt_sum = 0.0;
        for entry in self.reliability.iter() {
            stats.tracked_nodes += 1;
            stats.total_successes += entry.success_count;
            stats.total_failures += entry.failure_count;
            if entry.consecutive_failures >= threshold {
                stats.unhealthy_nodes += 1;
            }
            rt_sum += entry.avg_response_time_ms;
        }
        if stats.tracked_nodes > 0 {
            stats.avg_response_time_ms = rt_sum / stats.tracked_nodes as f64;
        }
        stats
    }
}

fn by_load(a: &NodeInfo, b: &NodeInfo) -> CmpOrdering {
    a.load.total_cmp(&b.load).then_with(|| a.id.cmp(&b.id))
}

fn least_loaded<'a>(active: &[&'a NodeInfo]) -> &'a NodeInfo {
    active
        .iter()
        .copied()
        .min_by(|a, b| by_load(a, b))
        .unwrap_or(active[0])
}
