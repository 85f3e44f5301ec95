use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::coordinator::{DistributedCoordinator, PeerTransport, ReplicationWorker};

#[derive(Default)]
pub struct BackgroundTasks {
    pub sweeper: Option<JoinHandle<()>>,
    pub replication: Option<JoinHandle<()>>,
}

impl BackgroundTasks {
    pub async fn abort_all(&mut self) {
        if let Some(handle) = self.replication.take() {
            handle.abort();
        }
        if let Some(handle) = self.sweeper.take() {
            handle.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        self.sweeper.as_ref().is_some_and(|h| !h.is_finished())
            || self.replication.as_ref().is_some_and(|h| !h.is_finished())
    }
}

/// Run `coordinator.sweep()` every `interval`. The first pass happens one
/// interval after the call. A zero interval disables the sweeper.
pub fn spawn_sweeper(coordinator: Arc<DistributedCoordinator>, interval: Duration) -> Option<JoinHandle<()>> {
    if interval.is_zero() {
        tracing::info!("Periodic sweep disabled");
        return None;
    }
    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // First tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let report = coordinator.sweep();
            if report.total() > 0 {
                tracing::info!(removed = report.total(), "Periodic sweep");
            }
        }
    }))
}

pub fn spawn_replication<T: PeerTransport>(worker: ReplicationWorker<T>) -> JoinHandle<()> {
    tokio::spawn(worker.run())
}
