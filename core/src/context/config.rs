//! Engine configuration
//!
//! Re-exports the shared config types from raidmesh-types and adds
//! persistence plus range validation for [`EngineConfig`].

use std::path::Path;

pub use raidmesh_types::{
    BalancerConfig, ConflictStrategy, DifficultyConfig, EngineConfig, LedgerConfig,
    PlacementStrategy, RewardConfig, SpawnConfig, SweepConfig, SyncConfig,
};

use super::error::ConfigError;

const APP_NAME: &str = "raidmesh";
const CONFIG_NAME: &str = "config";

// ─────────────────────────────────────────────────────────────────────────────
// EngineConfig Extensions
// ─────────────────────────────────────────────────────────────────────────────

/// Extension trait for EngineConfig persistence and validation
pub trait EngineConfigExt: Sized {
    /// Load from the platform config directory, falling back to defaults.
    fn load() -> Self;
    fn try_load() -> Result<Self, ConfigError>;
    fn load_from_path(path: &Path) -> Result<Self, ConfigError>;
    fn save(&self) -> Result<(), ConfigError>;
    /// Pull out-of-range values back into range. Returns the number of fixes.
    fn validate(&mut self) -> usize;
}

impl EngineConfigExt for EngineConfig {
    fn load() -> Self {
        Self::try_load().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Failed to load config, using defaults");
            EngineConfig::default()
        })
    }

    fn try_load() -> Result<Self, ConfigError> {
        let mut config: EngineConfig = confy::load(APP_NAME, CONFIG_NAME)?;
        config.validate();
        Ok(config)
    }

    fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: EngineConfig = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate();
        Ok(config)
    }

    fn save(&self) -> Result<(), ConfigError> {
        confy::store(APP_NAME, CONFIG_NAME, self.clone()).map_err(ConfigError::Save)
    }

    fn validate(&mut self) -> usize {
        let mut fixes = 0;

        if self.difficulty.update_interval_ms == 0 {
            tracing::warn!("difficulty.update_interval_ms is 0, using 1000");
            self.difficulty.update_interval_ms = 1000;
            fixes += 1;
        }
        if !(0.0..=1.0).contains(&self.reward.dampening) {
            tracing::warn!(value = self.reward.dampening, "reward.dampening out of range, clamping");
            self.reward.dampening = self.reward.dampening.clamp(0.0, 1.0);
            fixes += 1;
        }
        if self.reward.killer_bonus < 0.0 {
            tracing::warn!(value = self.reward.killer_bonus, "reward.killer_bonus negative, using 0");
            self.reward.killer_bonus = 0.0;
            fixes += 1;
        }
        if !(0.0..=1.0).contains(&self.reward.killer_floor) || self.reward.killer_floor == 0.0 {
            tracing::warn!(value = self.reward.killer_floor, "reward.killer_floor out of range, using 0.01");
            self.reward.killer_floor = 0.01;
            fixes += 1;
        }
        if self.balancer.failure_threshold == 0 {
            tracing::warn!("balancer.failure_threshold is 0, using 3");
            self.balancer.failure_threshold = 3;
            fixes += 1;
        }
        if self.sync.history_capacity == 0 {
            tracing::warn!("sync.history_capacity is 0, using 256");
            self.sync.history_capacity = 256;
            fixes += 1;
        }
        if self.sync.max_push_attempts == 0 {
            self.sync.max_push_attempts = 1;
            fixes += 1;
        }
        if self.spawn.base_health <= 0.0 {
            tracing::warn!(value = self.spawn.base_health, "spawn.base_health must be positive, using 10000");
            self.spawn.base_health = 10_000.0;
            fixes += 1;
        }

        fixes
    }
}
