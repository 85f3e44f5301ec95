//! Shared configuration types for raidmesh
//!
//! This crate contains the serializable configuration consumed by the
//! coordination engine (raidmesh-core) and the operator console. Every field
//! carries a serde default so partially written config files still load.

use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// Strategy Enums
// ─────────────────────────────────────────────────────────────────────────────

/// How the load balancer picks an owning node for a new encounter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlacementStrategy {
    /// Cyclic pointer over active nodes
    RoundRobin,
    /// Lowest instantaneous load
    #[default]
    LeastLoaded,
    /// Random pick weighted by spare capacity and reliability
    Weighted,
    /// Least-loaded after excluding nodes with repeated failures
    HealthAware,
    /// Closest node according to a pluggable distance function
    GeographicProximity,
}

impl PlacementStrategy {
    pub const ALL: [PlacementStrategy; 5] = [
        PlacementStrategy::RoundRobin,
        PlacementStrategy::LeastLoaded,
        PlacementStrategy::Weighted,
        PlacementStrategy::HealthAware,
        PlacementStrategy::GeographicProximity,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            PlacementStrategy::RoundRobin => "round_robin",
            PlacementStrategy::LeastLoaded => "least_loaded",
            PlacementStrategy::Weighted => "weighted",
            PlacementStrategy::HealthAware => "health_aware",
            PlacementStrategy::GeographicProximity => "geographic_proximity",
        }
    }

    /// Parse a strategy from its label (case-insensitive, `-` or `_`).
    pub fn from_label(label: &str) -> Option<Self> {
        let normalized = label.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL.into_iter().find(|s| s.label() == normalized)
    }
}

impl std::fmt::Display for PlacementStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// How a recorded sync conflict is settled once resolution is requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStrategy {
    /// The incoming remote payload replaces local state
    #[default]
    LastWriteWins,
    /// Local state is kept, only the version advances
    FirstWriteWins,
    /// Object keys are unioned and numeric fields keep the larger value
    MergeMax,
}

// ─────────────────────────────────────────────────────────────────────────────
// Section Configs
// ─────────────────────────────────────────────────────────────────────────────

/// Damage ledger bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Seconds an unfinalized ledger is kept after creation.
    #[serde(default = "default_ledger_retention_secs")]
    pub retention_secs: u64,
}

fn default_ledger_retention_secs() -> u64 {
    3600
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            retention_secs: default_ledger_retention_secs(),
        }
    }
}

/// Difficulty recomputation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DifficultyConfig {
    /// Minimum milliseconds between two recomputations of the same encounter.
    #[serde(default = "default_update_interval_ms")]
    pub update_interval_ms: u64,
    /// Window in seconds used to count "recent" kills of the same boss kind.
    #[serde(default = "default_recent_kill_window_secs")]
    pub recent_kill_window_secs: u64,
}

fn default_update_interval_ms() -> u64 {
    1000
}
fn default_recent_kill_window_secs() -> u64 {
    3600
}

impl Default for DifficultyConfig {
    fn default() -> Self {
        Self {
            update_interval_ms: default_update_interval_ms(),
            recent_kill_window_secs: default_recent_kill_window_secs(),
        }
    }
}

/// Reward pools and repeat-claim dampening.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewardConfig {
    /// Base experience per tier level.
    #[serde(default = "default_base_experience")]
    pub base_experience: f64,
    /// Base spirit currency per tier level.
    #[serde(default = "default_base_spirits")]
    pub base_spirits: f64,
    /// Extra fraction of their share awarded to the finishing blow.
    #[serde(default = "default_killer_bonus")]
    pub killer_bonus: f64,
    /// Fraction of the pool granted to a killer with no tracked damage.
    #[serde(default = "default_killer_floor")]
    pub killer_floor: f64,
    /// Seconds within which a repeat claim for the same boss kind is dampened.
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
    /// Multiplier applied to a dampened claim.
    #[serde(default = "default_dampening")]
    pub dampening: f64,
}

fn default_base_experience() -> f64 {
    100.0
}
fn default_base_spirits() -> f64 {
    10.0
}
fn default_killer_bonus() -> f64 {
    0.2
}
fn default_killer_floor() -> f64 {
    0.01
}
fn default_cooldown_secs() -> u64 {
    3600
}
fn default_dampening() -> f64 {
    0.5
}

impl Default for RewardConfig {
    fn default() -> Self {
        Self {
            base_experience: default_base_experience(),
            base_spirits: default_base_spirits(),
            killer_bonus: default_killer_bonus(),
            killer_floor: default_killer_floor(),
            cooldown_secs: default_cooldown_secs(),
            dampening: default_dampening(),
        }
    }
}

/// Node placement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalancerConfig {
    #[serde(default)]
    pub strategy: PlacementStrategy,
    /// Consecutive failures at which health-aware placement skips a node.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Samples per node after which reliability counters are halved.
    #[serde(default = "default_reliability_window")]
    pub reliability_window: u64,
}

fn default_failure_threshold() -> u32 {
    3
}
fn default_reliability_window() -> u64 {
    1000
}

impl Default for BalancerConfig {
    fn default() -> Self {
        Self {
            strategy: PlacementStrategy::default(),
            failure_threshold: default_failure_threshold(),
            reliability_window: default_reliability_window(),
        }
    }
}

/// Cross-node replication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Seconds before a pending sync transaction is treated as aborted.
    #[serde(default = "default_transaction_ttl_secs")]
    pub transaction_ttl_secs: u64,
    /// Number of sync operations kept for observability.
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
    #[serde(default)]
    pub conflict_strategy: ConflictStrategy,
    /// Push attempts per peer before a fan-out gives up on it.
    #[serde(default = "default_max_push_attempts")]
    pub max_push_attempts: u32,
    /// Seconds a settled versioned state is kept without new writes.
    #[serde(default = "default_state_retention_secs")]
    pub state_retention_secs: u64,
}

fn default_transaction_ttl_secs() -> u64 {
    30
}
fn default_history_capacity() -> usize {
    256
}
fn default_max_push_attempts() -> u32 {
    3
}
fn default_state_retention_secs() -> u64 {
    7200
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            transaction_ttl_secs: default_transaction_ttl_secs(),
            history_capacity: default_history_capacity(),
            conflict_strategy: ConflictStrategy::default(),
            max_push_attempts: default_max_push_attempts(),
            state_retention_secs: default_state_retention_secs(),
        }
    }
}

/// Background maintenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepConfig {
    /// Zero disables the periodic sweep.
    #[serde(default = "default_sweep_interval_secs")]
    pub interval_secs: u64,
    /// Seconds without a heartbeat before a node is marked inactive.
    /// Zero disables heartbeat expiry.
    #[serde(default = "default_heartbeat_timeout_secs")]
    pub heartbeat_timeout_secs: u64,
}

fn default_sweep_interval_secs() -> u64 {
    60
}
fn default_heartbeat_timeout_secs() -> u64 {
    30
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_sweep_interval_secs(),
            heartbeat_timeout_secs: default_heartbeat_timeout_secs(),
        }
    }
}

/// Initial encounter stats.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpawnConfig {
    /// Tier-1 health before the tier multiplier is applied.
    #[serde(default = "default_base_health")]
    pub base_health: f64,
    /// Power level the difficulty baseline is tuned against.
    #[serde(default = "default_recommended_power")]
    pub recommended_power: f64,
}

fn default_base_health() -> f64 {
    10_000.0
}
fn default_recommended_power() -> f64 {
    100.0
}

impl Default for SpawnConfig {
    fn default() -> Self {
        Self {
            base_health: default_base_health(),
            recommended_power: default_recommended_power(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Engine Config
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Identity of the node hosting this engine instance.
    #[serde(default)]
    pub node_id: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub difficulty: DifficultyConfig,
    #[serde(default)]
    pub reward: RewardConfig,
    #[serde(default)]
    pub balancer: BalancerConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub sweep: SweepConfig,
    #[serde(default)]
    pub spawn: SpawnConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategy_labels_parse_back() {
        for strategy in PlacementStrategy::ALL {
            assert_eq!(PlacementStrategy::from_label(strategy.label()), Some(strategy));
        }
        assert_eq!(
            PlacementStrategy::from_label("Health-Aware"),
            Some(PlacementStrategy::HealthAware)
        );
        assert_eq!(PlacementStrategy::from_label("random"), None);
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = EngineConfig::default();
        assert_eq!(config.ledger.retention_secs, 3600);
        assert_eq!(config.difficulty.update_interval_ms, 1000);
        assert_eq!(config.reward.dampening, 0.5);
        assert_eq!(config.balancer.failure_threshold, 3);
        assert_eq!(config.sync.transaction_ttl_secs, 30);
        assert_eq!(config.sweep.heartbeat_timeout_secs, 30);
    }
}
