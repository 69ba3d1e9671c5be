use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::leaderboard::run_refresh;
use crate::state::{AppState, RefreshCause};

const REFRESH_RETRY_DELAY_MS: u64 = 2_000;

// Deduped enqueue: while one refresh is queued, later triggers coalesce into
// it instead of piling up identical rebuilds.
pub(crate) fn enqueue_leaderboard_refresh(state: &AppState, cause: RefreshCause) {
    if state.refresh_pending.swap(true, Ordering::AcqRel) {
        return;
    }
    if state.refresh_tx.send(cause).is_err() {
        state.refresh_pending.store(false, Ordering::Release);
        tracing::warn!("refresh enqueue failed cause={} (worker gone)", cause.label());
    }
}

fn enqueue_refresh_after_delay(state: AppState, cause: RefreshCause, delay_ms: u64) {
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(delay_ms.max(1))).await;
        enqueue_leaderboard_refresh(&state, cause);
    });
}

pub(crate) fn start_background_tasks(
    state: AppState,
    mut refresh_rx: mpsc::UnboundedReceiver<RefreshCause>,
) {
    // 1) Leaderboard refresh worker. Runs strictly after the triggering
    // transaction committed (the trigger is the post-commit enqueue).
    let s_refresh = state.clone();
    tokio::spawn(async move {
        while let Some(cause) = refresh_rx.recv().await {
            // Clear before running: triggers landing during the rebuild must
            // queue a fresh pass, since this one's snapshot predates them.
            s_refresh.refresh_pending.store(false, Ordering::Release);
            match run_refresh(&s_refresh).await {
                Ok(outcome) => {
                    tracing::debug!(
                        "refresh done cause={} global_rows={} league_rows={}",
                        cause.label(),
                        outcome.global_rows,
                        outcome.league_rows
                    );
                }
                Err(e) => {
                    s_refresh.perf.refresh_errors.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        "refresh failed cause={} error={e} retry_in_ms={REFRESH_RETRY_DELAY_MS}",
                        cause.label()
                    );
                    enqueue_refresh_after_delay(
                        s_refresh.clone(),
                        cause,
                        REFRESH_RETRY_DELAY_MS,
                    );
                }
            }
        }
    });

    // 2) Cache sweeper. TTLs are advisory; this just keeps dead entries from
    // accumulating between invalidations.
    let s_sweep = state.clone();
    tokio::spawn(async move {
        let interval = s_sweep.cfg.cache.sweep_interval_seconds.max(1);
        loop {
            tokio::time::sleep(Duration::from_secs(interval)).await;
            let purged = s_sweep.cache.purge_expired();
            if purged > 0 {
                tracing::debug!("cache sweep purged={purged}");
            }
        }
    });

    // 3) Optional scheduled refresh.
    let interval = state.cfg.leaderboard.refresh_interval_seconds;
    if interval > 0 {
        let s_tick = state.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_secs(interval)).await;
                enqueue_leaderboard_refresh(&s_tick, RefreshCause::Scheduled);
            }
        });
    }
}
