pub mod adapters;
pub mod balancer;
pub mod clock;
pub mod context;
pub mod coordinator;
pub mod difficulty;
pub mod error;
pub mod facade;
pub mod ids;
pub mod ledger;
pub mod lifecycle;
mod locks;
pub mod progression;
pub mod quality;
pub mod reward;
pub mod sync;

// Re-exports for convenience
pub use adapters::{
    Adapters, Announcement, AnnouncementAdapter, DamageDatabase, EncounterEvent, EntityAdapter,
    EventAdapter, InMemoryDamageDatabase, KillRecord, LocationSelector, SpawnLocation, TracingSink,
};
pub use balancer::{LoadBalancer, NodeInfo, NodeReliability};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock, system_clock};
pub use coordinator::{
    DistributedCoordinator, EncounterData, EncounterSnapshot, EncounterStatus, LoopbackTransport,
    PeerTransport, ReplicationWorker,
};
pub use difficulty::{DifficultyInputs, DifficultyLevel, DifficultyState};
pub use error::{EngineError, EngineResult};
pub use facade::{BossSystem, SystemStatistics};
pub use ids::{ContributorId, EncounterId, NodeId};
pub use ledger::{ContributionRecord, DamageLedger, LedgerSnapshot};
pub use lifecycle::{KillReport, KillSettlement, LifecycleManager};
pub use progression::{AttributeMultipliers, BossTier};
pub use quality::{QualityGrade, QualityRating};
pub use reward::{PlayerReward, RewardCalculator};
pub use context::{ConflictStrategy, EngineConfig, EngineConfigExt, PlacementStrategy};
pub use sync::{DataSyncManager, SyncOutcome};
