use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::NodeId;

/// A server process that can own encounters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub id: NodeId,
    pub name: String,
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    pub is_active: bool,
    /// Instantaneous utilization, 0.0-1.0
    pub load: f64,
    pub active_encounters: usize,
    pub last_heartbeat: DateTime<Utc>,
}

impl NodeInfo {
    pub fn new(id: NodeId, name: impl Into<String>, address: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id,
            name: name.into(),
            address: address.into(),
            region: None,
            is_active: true,
            load: 0.0,
            active_encounters: 0,
            last_heartbeat: now,
        }
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn with_load(mut self, load: f64) -> Self {
        self.load = clamp_load(load);
        self
    }
}

pub(crate) fn clamp_load(load: f64) -> f64 {
    if load.is_finite() { load.clamp(0.0, 1.0) } else { 1.0 }
}

/// Rolling reliability counters for one node. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NodeReliability {
    pub success_count: u64,
    pub failure_count: u64,
    pub consecutive_failures: u32,
    pub avg_response_time_ms: f64,
    /// 0.1-1.0, nudged up on success and down on failure
    pub weight: f64,
}

impl Default for NodeReliability {
    fn default() -> Self {
        Self {
            success_count: 0,
            failure_count: 0,
            consecutive_failures: 0,
            avg_response_time_ms: 0.0,
            weight: 1.0,
        }
    }
}

impl NodeReliability {
    pub fn samples(&self) -> u64 {
        self.success_count + self.failure_count
    }

    /// Fraction of successful interactions; an untested node counts as reliable.
    pub fn success_rate(&self) -> f64 {
        match self.samples() {
            0 => 1.0,
            n => self.success_count as f64 / n as f64,
        }
    }

    pub fn effective_weight(&self) -> f64 {
        self.weight * self.success_rate() / (1.0 + self.avg_response_time_ms / 100.0)
    }

    pub(crate) fn record_success(&mut self, response_time_ms: f64) {
        let rt = response_time_ms.max(0.0);
        self.avg_response_time_ms = if self.success_count == 0 {
            rt
        } else {
            (self.avg_response_time_ms + rt) / 2.0
        };
        self.success_count += 1;
        self.consecutive_failures = 0;
        self.weight = (self.weight + 0.01).min(1.0);
    }

    pub(crate) fn record_failure(&mut self) {
        self.failure_count += 1;
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.weight = (self.weight - 0.1).max(0.1);
    }

    pub(crate) fn halve(&mut self) {
        self.success_count /= 2;
        self.failure_count /= 2;
    }
}

/// Distance between a node and the requested region. Lower is closer.
pub trait ProximityFn: Send + Sync {
    fn distance(&self, node: &NodeInfo, preferred_region: Option<&str>) -> f64;
}

/// 0 for a node in the preferred region, 1 otherwise.
#[derive(Debug, Default, Clone, Copy)]
pub struct RegionMatch;

impl ProximityFn for RegionMatch {
    fn distance(&self, node: &NodeInfo, preferred_region: Option<&str>) -> f64 {
        match (preferred_region, node.region.as_deref()) {
            (Some(wanted), Some(region)) if wanted.eq_ignore_ascii_case(region) => 0.0,
            (None, _) => 0.0,
            _ => 1.0,
        }
    }
}
