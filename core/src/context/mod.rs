mod background_tasks;
mod config;
mod error;

pub use background_tasks::{BackgroundTasks, spawn_replication, spawn_sweeper};
pub use config::{
    BalancerConfig, ConflictStrategy, DifficultyConfig, EngineConfig, EngineConfigExt, LedgerConfig,
    PlacementStrategy, RewardConfig, SpawnConfig, SweepConfig, SyncConfig,
};
pub use error::ConfigError;
