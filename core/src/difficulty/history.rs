use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::collections::VecDeque;

#[derive(Debug, Default)]
struct KindHistory {
    total: u32,
    recent: VecDeque<DateTime<Utc>>,
}

/// Kill counts per boss kind, feeding the history and time difficulty terms.
///
/// Only timestamps inside `window` are retained; the all-time total is a
/// plain counter.
#[derive(Debug)]
pub struct KillHistory {
    kinds: DashMap<String, KindHistory>,
    window: Duration,
}

impl KillHistory {
    pub fn new(window: Duration) -> Self {
        Self {
            kinds: DashMap::new(),
            window,
        }
    }

    pub fn record_kill(&self, boss_kind: &str, at: DateTime<Utc>) {
        let mut entry = self.kinds.entry(boss_kind.to_string()).or_default();
        entry.total = entry.total.saturating_add(1);
        entry.recent.push_back(at);
        let cutoff = at - self.window;
        while entry.recent.front().is_some_and(|t| *t < cutoff) {
            entry.recent.pop_front();
        }
    }

    pub fn total(&self, boss_kind: &str) -> u32 {
        self.kinds.get(boss_kind).map_or(0, |h| h.total)
    }

    /// Kills of `boss_kind` within the window ending at `now`.
    pub fn recent(&self, boss_kind: &str, now: DateTime<Utc>) -> u32 {
        let cutoff = now - self.window;
        self.kinds.get(boss_kind).map_or(0, |h| {
            h.recent.iter().filter(|t| **t >= cutoff && **t <= now).count() as u32
        })
    }

    /// Whether the last kill of `boss_kind` happened within the window.
    pub fn killed_recently(&self, boss_kind: &str, now: DateTime<Utc>) -> bool {
        self.recent(boss_kind, now) > 0
    }

    pub fn last_kill(&self, boss_kind: &str) -> Option<DateTime<Utc>> {
        self.kinds.get(boss_kind).and_then(|h| h.recent.back().copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recent_counts_only_inside_window() {
        let history = KillHistory::new(Duration::hours(1));
        let t0 = Utc::now();
        history.record_kill("dragon", t0);
        history.record_kill("dragon", t0 + Duration::minutes(30));
        history.record_kill("golem", t0);

        assert_eq!(history.total("dragon"), 2);
        assert_eq!(history.recent("dragon", t0 + Duration::minutes(45)), 2);
        assert_eq!(history.recent("dragon", t0 + Duration::minutes(75)), 1);
        assert_eq!(history.recent("dragon", t0 + Duration::hours(3)), 0);
        assert_eq!(history.total("dragon"), 2);
        assert_eq!(history.total("hydra"), 0);
        assert!(history.killed_recently("golem", t0 + Duration::minutes(10)));
    }
}
