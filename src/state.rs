use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use sqlx::{Pool, Postgres};
use tokio::sync::{mpsc, Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::cache::MemoryCache;
use crate::config::AppConfig;
use crate::fanout::Fanout;

#[derive(Debug, Clone, Copy)]
pub(crate) enum RefreshCause {
    MatchScored(Uuid),
    MembershipChanged(Uuid),
    Manual,
    Scheduled,
}

impl RefreshCause {
    pub(crate) fn label(&self) -> &'static str {
        match self {
            Self::MatchScored(_) => "match_scored",
            Self::MembershipChanged(_) => "membership_changed",
            Self::Manual => "manual",
            Self::Scheduled => "scheduled",
        }
    }
}

pub(crate) struct PerfCounters {
    pub(crate) scoring_runs: AtomicU64,
    pub(crate) predictions_scored: AtomicU64,
    pub(crate) rewards_created: AtomicU64,
    pub(crate) refresh_runs: AtomicU64,
    pub(crate) refresh_errors: AtomicU64,
    pub(crate) cache_hits: AtomicU64,
    pub(crate) cache_misses: AtomicU64,
    pub(crate) cache_invalidations: AtomicU64,
}

impl PerfCounters {
    pub(crate) fn new() -> Self {
        Self {
            scoring_runs: AtomicU64::new(0),
            predictions_scored: AtomicU64::new(0),
            rewards_created: AtomicU64::new(0),
            refresh_runs: AtomicU64::new(0),
            refresh_errors: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            cache_invalidations: AtomicU64::new(0),
        }
    }

    pub(crate) fn snapshot_json(&self, refresh_pending: bool) -> serde_json::Value {
        serde_json::json!({
            "scoring": {
                "runs": self.scoring_runs.load(Ordering::Relaxed),
                "predictions_scored": self.predictions_scored.load(Ordering::Relaxed),
                "rewards_created": self.rewards_created.load(Ordering::Relaxed),
            },
            "leaderboard": {
                "refresh_runs": self.refresh_runs.load(Ordering::Relaxed),
                "refresh_errors": self.refresh_errors.load(Ordering::Relaxed),
                "refresh_pending": refresh_pending,
            },
            "cache": {
                "hits": self.cache_hits.load(Ordering::Relaxed),
                "misses": self.cache_misses.load(Ordering::Relaxed),
                "invalidations": self.cache_invalidations.load(Ordering::Relaxed),
            }
        })
    }
}

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) cfg: Arc<AppConfig>,
    pub(crate) db: Pool<Postgres>,
    pub(crate) cache: Arc<MemoryCache>,
    pub(crate) fanout: Arc<Fanout>,
    pub(crate) refresh_tx: mpsc::UnboundedSender<RefreshCause>,
    pub(crate) refresh_pending: Arc<AtomicBool>,
    pub(crate) match_mutexes: Arc<Vec<Arc<Mutex<()>>>>,
    pub(crate) perf: Arc<PerfCounters>,
}

impl AppState {
    fn shard_index(id: Uuid, shard_count: usize) -> usize {
        if shard_count == 0 {
            return 0;
        }
        (id.as_u128() % shard_count as u128) as usize
    }

    // Single logical writer per match inside this process; the FOR UPDATE
    // row lock covers other processes.
    pub(crate) async fn lock_match(&self, match_id: Uuid) -> OwnedMutexGuard<()> {
        let idx = Self::shard_index(match_id, self.match_mutexes.len());
        self.match_mutexes[idx].clone().lock_owned().await
    }

    pub(crate) fn invalidate(&self, pattern: &str) {
        let removed = self.cache.delete_by_pattern(pattern);
        self.perf
            .cache_invalidations
            .fetch_add(removed as u64, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shard_index_is_stable_and_bounded() {
        let id = Uuid::new_v4();
        let a = AppState::shard_index(id, 256);
        let b = AppState::shard_index(id, 256);
        assert_eq!(a, b);
        assert!(a < 256);
        assert_eq!(AppState::shard_index(id, 0), 0);
    }

    #[test]
    fn refresh_cause_labels() {
        assert_eq!(RefreshCause::Manual.label(), "manual");
        assert_eq!(RefreshCause::Scheduled.label(), "scheduled");
        assert_eq!(
            RefreshCause::MatchScored(Uuid::nil()).label(),
            "match_scored"
        );
        assert_eq!(
            RefreshCause::MembershipChanged(Uuid::nil()).label(),
            "membership_changed"
        );
    }
}
