use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::ids::ContributorId;

/// Last full reward claim per (contributor, boss kind).
#[derive(Debug)]
pub struct RewardCooldowns {
    claims: DashMap<(ContributorId, String), DateTime<Utc>>,
    window: Duration,
}

impl RewardCooldowns {
    pub fn new(window: Duration) -> Self {
        Self {
            claims: DashMap::new(),
            window,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Check the cooldown and, when it is clear, record `now` as the new claim.
    /// Returns true if the claim falls inside an existing cooldown.
    pub fn check_and_claim(&self, contributor: &ContributorId, boss_kind: &str, now: DateTime<Utc>) -> bool {
        match self.claims.entry((contributor.clone(), boss_kind.to_string())) {
            Entry::Occupied(mut last) => {
                if now - *last.get() < self.window {
                    return true;
                }
                last.insert(now);
                false
            }
            Entry::Vacant(slot) => {
                slot.insert(now);
                false
            }
        }
    }

    pub fn is_on_cooldown(&self, contributor: &ContributorId, boss_kind: &str, now: DateTime<Utc>) -> bool {
        self.claims
            .get(&(contributor.clone(), boss_kind.to_string()))
            .is_some_and(|last| now - *last < self.window)
    }

    /// Drop claims older than the window. Returns the count removed.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let before = self.claims.len();
        self.claims.retain(|_, last| now - *last < self.window);
        before.saturating_sub(self.claims.len())
    }

    pub fn len(&self) -> usize {
        self.claims.len()
    }

    pub fn is_empty(&self) -> bool {
        self.claims.is_empty()
    }
}
