use std::sync::atomic::Ordering;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ServiceError;
use crate::fanout::{Scope, EVT_LEADERBOARD_UPDATED};
use crate::state::AppState;
use crate::store::{self, LeaderboardEntryRow, NewLeaderboardEntry};

// Competition ranking over a points-descending slice: ties share a rank and
// the next distinct value takes its 1-based position, so [30,30,20,10]
// ranks as [1,1,3,4].
pub(crate) fn rank_standings(points_desc: &[i64]) -> Vec<i64> {
    let mut ranks = Vec::with_capacity(points_desc.len());
    let mut last_points: Option<i64> = None;
    let mut last_rank = 0i64;
    for (idx, points) in points_desc.iter().enumerate() {
        let rank = match last_points {
            Some(prev) if prev == *points => last_rank,
            _ => idx as i64 + 1,
        };
        ranks.push(rank);
        last_points = Some(*points);
        last_rank = rank;
    }
    ranks
}

// Memberships arrive sorted by league then points descending; each
// contiguous league run is ranked independently.
fn rank_league_runs(
    memberships: &[(Uuid, Uuid, i64)],
) -> (Vec<NewLeaderboardEntry>, Vec<Uuid>) {
    let mut entries = Vec::with_capacity(memberships.len());
    let mut league_ids: Vec<Uuid> = Vec::new();
    let mut idx = 0usize;
    while idx < memberships.len() {
        let league_id = memberships[idx].0;
        let mut end = idx;
        while end < memberships.len() && memberships[end].0 == league_id {
            end += 1;
        }
        let run = &memberships[idx..end];
        let points: Vec<i64> = run.iter().map(|(_, _, p)| *p).collect();
        let ranks = rank_standings(&points);
        for ((_, user_id, points), rank) in run.iter().zip(ranks.iter()) {
            entries.push(NewLeaderboardEntry {
                user_id: *user_id,
                league_id: Some(league_id),
                points: *points,
                rank: *rank,
            });
        }
        league_ids.push(league_id);
        idx = end;
    }
    (entries, league_ids)
}

#[derive(Debug)]
pub(crate) struct RefreshOutcome {
    pub(crate) global_rows: usize,
    pub(crate) league_rows: usize,
    pub(crate) league_ids: Vec<Uuid>,
}

// Rebuilds every standing from current user points in one transaction. The
// table is a derived snapshot, so a full replace is always safe and also
// drops entries for users who left a league.
pub(crate) async fn refresh_leaderboards(
    state: &AppState,
) -> Result<RefreshOutcome, ServiceError> {
    let started = std::time::Instant::now();
    let mut tx = state.db.begin().await?;

    let users = store::load_user_points(&mut tx).await?;
    let global_points: Vec<i64> = users.iter().map(|(_, p)| *p).collect();
    let global_ranks = rank_standings(&global_points);
    let mut entries: Vec<NewLeaderboardEntry> = users
        .iter()
        .zip(global_ranks.iter())
        .map(|((user_id, points), rank)| NewLeaderboardEntry {
            user_id: *user_id,
            league_id: None,
            points: *points,
            rank: *rank,
        })
        .collect();
    let global_rows = entries.len();

    let memberships = store::load_membership_points(&mut tx).await?;
    let (league_entries, league_ids) = rank_league_runs(&memberships);
    let league_rows = league_entries.len();
    entries.extend(league_entries);

    store::replace_leaderboard_entries(&mut tx, &entries).await?;
    tx.commit().await?;

    tracing::info!(
        "leaderboards rebuilt global_rows={global_rows} leagues={} league_rows={league_rows} elapsed_ms={}",
        league_ids.len(),
        started.elapsed().as_millis()
    );
    Ok(RefreshOutcome {
        global_rows,
        league_rows,
        league_ids,
    })
}

// Refresh plus its post-commit obligations, in the mandated order:
// recompute, invalidate, then notify.
pub(crate) async fn run_refresh(state: &AppState) -> Result<RefreshOutcome, ServiceError> {
    let outcome = refresh_leaderboards(state).await?;
    state.perf.refresh_runs.fetch_add(1, Ordering::Relaxed);

    state.invalidate("leaderboard:*");
    state.fanout.publish(
        &Scope::Global,
        EVT_LEADERBOARD_UPDATED,
        serde_json::json!({ "entries": outcome.global_rows }),
    );
    for league_id in &outcome.league_ids {
        state.fanout.publish(
            &Scope::League(*league_id),
            EVT_LEADERBOARD_UPDATED,
            serde_json::json!({ "league_id": league_id }),
        );
    }
    Ok(outcome)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct LeaderboardPage {
    pub(crate) entries: Vec<LeaderboardEntryRow>,
    pub(crate) total: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub(crate) struct RankInfo {
    pub(crate) rank: i64,
    pub(crate) points: i64,
}

fn cached_page(state: &AppState, key: &str) -> Option<LeaderboardPage> {
    let value = state.cache.get(key)?;
    match serde_json::from_value::<LeaderboardPage>(value) {
        Ok(page) => {
            state.perf.cache_hits.fetch_add(1, Ordering::Relaxed);
            Some(page)
        }
        // Raw or mismatched cache payload: treat as a miss and recompute.
        Err(_) => None,
    }
}

fn store_page(state: &AppState, key: &str, page: &LeaderboardPage, ttl_seconds: u64) {
    if let Ok(value) = serde_json::to_value(page) {
        state.cache.set(key, &value, Some(ttl_seconds));
    }
}

pub(crate) async fn get_global_leaderboard(
    state: &AppState,
    limit: i64,
    offset: i64,
) -> Result<LeaderboardPage, ServiceError> {
    let key = format!("leaderboard:global:{limit}:{offset}");
    if let Some(page) = cached_page(state, &key) {
        return Ok(page);
    }
    state.perf.cache_misses.fetch_add(1, Ordering::Relaxed);

    let paged = store::page_leaderboard(&state.db, None, limit, offset).await?;
    let page = LeaderboardPage {
        entries: paged.rows,
        total: paged.total,
    };
    store_page(state, &key, &page, state.cfg.cache.leaderboard_ttl_seconds);
    Ok(page)
}

pub(crate) async fn get_league_leaderboard(
    state: &AppState,
    league_id: Uuid,
    limit: i64,
    offset: i64,
) -> Result<LeaderboardPage, ServiceError> {
    let key = format!("leaderboard:league:{league_id}:{limit}:{offset}");
    if let Some(page) = cached_page(state, &key) {
        return Ok(page);
    }
    state.perf.cache_misses.fetch_add(1, Ordering::Relaxed);

    if store::fetch_league(&state.db, league_id).await?.is_none() {
        return Err(ServiceError::not_found(format!(
            "league {league_id} not found"
        )));
    }
    let paged = store::page_leaderboard(&state.db, Some(league_id), limit, offset).await?;
    let page = LeaderboardPage {
        entries: paged.rows,
        total: paged.total,
    };
    store_page(state, &key, &page, state.cfg.cache.leaderboard_ttl_seconds);
    Ok(page)
}

// Absent is a legitimate answer (user not ranked yet, or not a member of the
// league); only found entries are cached.
pub(crate) async fn get_user_rank(
    state: &AppState,
    user_id: Uuid,
    league_id: Option<Uuid>,
) -> Result<Option<RankInfo>, ServiceError> {
    let key = match league_id {
        Some(league_id) => format!("leaderboard:user:{user_id}:league:{league_id}"),
        None => format!("leaderboard:user:{user_id}:global"),
    };
    if let Some(value) = state.cache.get(&key) {
        if let Ok(info) = serde_json::from_value::<RankInfo>(value) {
            state.perf.cache_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Some(info));
        }
    }
    state.perf.cache_misses.fetch_add(1, Ordering::Relaxed);

    let Some((rank, points)) = store::fetch_user_entry(&state.db, user_id, league_id).await? else {
        return Ok(None);
    };
    let info = RankInfo { rank, points };
    if let Ok(value) = serde_json::to_value(info) {
        state
            .cache
            .set(&key, &value, Some(state.cfg.cache.rank_ttl_seconds));
    }
    Ok(Some(info))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ties_share_rank_and_skip_the_next() {
        assert_eq!(rank_standings(&[30, 30, 20, 10]), vec![1, 1, 3, 4]);
        assert_eq!(rank_standings(&[10, 10, 8]), vec![1, 1, 3]);
    }

    #[test]
    fn distinct_points_rank_sequentially() {
        assert_eq!(rank_standings(&[50, 40, 30]), vec![1, 2, 3]);
    }

    #[test]
    fn all_tied_share_first_place() {
        assert_eq!(rank_standings(&[7, 7, 7, 7]), vec![1, 1, 1, 1]);
    }

    #[test]
    fn empty_and_single() {
        assert_eq!(rank_standings(&[]), Vec::<i64>::new());
        assert_eq!(rank_standings(&[0]), vec![1]);
    }

    #[test]
    fn tie_runs_in_the_middle() {
        assert_eq!(rank_standings(&[9, 5, 5, 5, 2, 2, 1]), vec![1, 2, 2, 2, 5, 5, 7]);
    }

    #[test]
    fn league_runs_rank_independently() {
        let league_a = Uuid::from_u128(1);
        let league_b = Uuid::from_u128(2);
        let (u1, u2, u3) = (Uuid::from_u128(10), Uuid::from_u128(11), Uuid::from_u128(12));
        // u2 trails in league A but leads league B outright.
        let memberships = vec![
            (league_a, u1, 30),
            (league_a, u3, 30),
            (league_a, u2, 20),
            (league_b, u2, 20),
            (league_b, u3, 5),
        ];
        let (entries, league_ids) = rank_league_runs(&memberships);
        assert_eq!(league_ids, vec![league_a, league_b]);
        let ranks: Vec<(Option<Uuid>, Uuid, i64)> = entries
            .iter()
            .map(|e| (e.league_id, e.user_id, e.rank))
            .collect();
        assert_eq!(
            ranks,
            vec![
                (Some(league_a), u1, 1),
                (Some(league_a), u3, 1),
                (Some(league_a), u2, 3),
                (Some(league_b), u2, 1),
                (Some(league_b), u3, 2),
            ]
        );
    }

    #[test]
    fn no_memberships_yields_no_league_entries() {
        let (entries, league_ids) = rank_league_runs(&[]);
        assert!(entries.is_empty());
        assert!(league_ids.is_empty());
    }
}
