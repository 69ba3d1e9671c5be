use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use axum::extract::{Path, Query, State};
use axum::http::header::{ACCEPT, CONTENT_TYPE};
use axum::http::{HeaderValue, Method, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use futures::Stream;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgPoolOptions;
use tokio::sync::{mpsc, Mutex};
use tower_http::cors::{Any, CorsLayer};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

mod cache;
mod config;
mod error;
mod fanout;
mod leaderboard;
mod scoring;
mod state;
mod store;
mod tasks;

use crate::cache::MemoryCache;
use crate::config::load_config;
use crate::error::ServiceError;
use crate::fanout::{Fanout, Scope, EVT_PREDICTION_CONFIRMED};
use crate::leaderboard::{get_global_leaderboard, get_league_leaderboard, get_user_rank, run_refresh};
use crate::scoring::calculate_points;
use crate::state::{AppState, PerfCounters, RefreshCause};
use crate::store::{MatchFilter, MatchStatus, MatchUpdate, NewMatch, Paged};
use crate::tasks::{enqueue_leaderboard_refresh, start_background_tasks};

const MATCH_LOCK_SHARDS: usize = 256;
const FANOUT_ROOM_CAPACITY: usize = 256;
const DEFAULT_PAGE_LIMIT: i64 = 10;
const MAX_PAGE_LIMIT: i64 = 100;
const INVITE_CODE_LEN: usize = 8;

pub(crate) fn now_epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

#[derive(Debug, Deserialize)]
struct CreateMatchRequest {
    home_team: String,
    away_team: String,
    start_time: DateTime<Utc>,
    league: String,
    season: String,
}

#[derive(Debug, Deserialize)]
struct UpdateMatchRequest {
    home_score: Option<i32>,
    away_score: Option<i32>,
    status: Option<MatchStatus>,
    end_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct CreatePredictionRequest {
    user_id: Uuid,
    match_id: Uuid,
    home_score: i32,
    away_score: i32,
}

#[derive(Debug, Deserialize)]
struct CreateLeagueRequest {
    name: String,
    owner_id: Uuid,
    is_private: bool,
}

#[derive(Debug, Deserialize)]
struct MembershipRequest {
    user_id: Uuid,
    invite_code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PageQuery {
    limit: Option<i64>,
    offset: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct RankQuery {
    league_id: Option<Uuid>,
}

fn page_params(q: &PageQuery) -> (i64, i64) {
    let limit = q.limit.unwrap_or(DEFAULT_PAGE_LIMIT).clamp(1, MAX_PAGE_LIMIT);
    let offset = q.offset.unwrap_or(0).max(0);
    (limit, offset)
}

// SCHEDULED -> LIVE -> COMPLETED is one-directional; CANCELLED is terminal
// from either non-final state. Same-state updates (e.g. a LIVE score change
// carrying status=LIVE) pass through.
fn valid_transition(from: MatchStatus, to: MatchStatus) -> bool {
    use MatchStatus::*;
    from == to
        || matches!(
            (from, to),
            (Scheduled, Live) | (Live, Completed) | (Scheduled, Cancelled) | (Live, Cancelled)
        )
}

fn cache_lookup<T: DeserializeOwned>(state: &AppState, key: &str) -> Option<T> {
    let hit = state
        .cache
        .get(key)
        .and_then(|v| serde_json::from_value(v).ok());
    match hit {
        Some(v) => {
            state.perf.cache_hits.fetch_add(1, Ordering::Relaxed);
            Some(v)
        }
        None => {
            state.perf.cache_misses.fetch_add(1, Ordering::Relaxed);
            None
        }
    }
}

fn cache_store<T: Serialize>(state: &AppState, key: &str, value: &T, ttl_seconds: u64) {
    if let Ok(v) = serde_json::to_value(value) {
        state.cache.set(key, &v, Some(ttl_seconds));
    }
}

// ===== HTTP handlers =====

async fn health_check(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ServiceError> {
    sqlx::query("SELECT 1")
        .fetch_one(&state.db)
        .await
        .map_err(|e| ServiceError::Transient(format!("db error: {e}")))?;
    Ok(Json(serde_json::json!({
        "status": "healthy",
        "database": "connected"
    })))
}

async fn get_service_stats(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(
        state
            .perf
            .snapshot_json(state.refresh_pending.load(Ordering::Acquire)),
    )
}

async fn create_match(
    State(state): State<AppState>,
    Json(req): Json<CreateMatchRequest>,
) -> Result<(StatusCode, Json<store::MatchRow>), ServiceError> {
    let row = store::insert_match(
        &state.db,
        &NewMatch {
            home_team: req.home_team,
            away_team: req.away_team,
            start_time: req.start_time,
            league: req.league,
            season: req.season,
        },
    )
    .await?;
    state.invalidate("matches:upcoming:*");
    Ok((StatusCode::CREATED, Json(row)))
}

async fn get_match(
    State(state): State<AppState>,
    Path(match_id): Path<Uuid>,
) -> Result<Json<store::MatchRow>, ServiceError> {
    let key = format!("matches:id:{match_id}");
    if let Some(row) = cache_lookup::<store::MatchRow>(&state, &key) {
        return Ok(Json(row));
    }
    let row = store::fetch_match(&state.db, match_id)
        .await?
        .ok_or_else(|| ServiceError::not_found(format!("match {match_id} not found")))?;
    cache_store(&state, &key, &row, state.cfg.cache.read_ttl_seconds);
    Ok(Json(row))
}

async fn update_match(
    State(state): State<AppState>,
    Path(match_id): Path<Uuid>,
    Json(req): Json<UpdateMatchRequest>,
) -> Result<Json<serde_json::Value>, ServiceError> {
    let current = store::fetch_match(&state.db, match_id)
        .await?
        .ok_or_else(|| ServiceError::not_found(format!("match {match_id} not found")))?;
    if matches!(current.status, MatchStatus::Completed | MatchStatus::Cancelled) {
        // No correction path once a match is final; a rescore would need an
        // explicit reversal design.
        return Err(ServiceError::invalid_state(format!(
            "match {match_id} is already {}",
            current.status.as_str()
        )));
    }
    if let Some(next) = req.status {
        if !valid_transition(current.status, next) {
            return Err(ServiceError::invalid_state(format!(
                "illegal status transition {} -> {}",
                current.status.as_str(),
                next.as_str()
            )));
        }
    }

    let completing = req.status == Some(MatchStatus::Completed);
    if completing {
        let home = req.home_score.or(current.home_score);
        let away = req.away_score.or(current.away_score);
        if home.is_none() || away.is_none() {
            return Err(ServiceError::invalid_state(
                "cannot complete a match without a final score",
            ));
        }
    }

    let upd = MatchUpdate {
        home_score: req.home_score,
        away_score: req.away_score,
        status: req.status,
        end_time: req.end_time.or(if completing { Some(Utc::now()) } else { None }),
    };
    let row = store::update_match(&state.db, match_id, &upd)
        .await?
        .ok_or_else(|| ServiceError::not_found(format!("match {match_id} not found")))?;
    state.cache.delete(&format!("matches:id:{match_id}"));
    state.invalidate(&format!("matches:league:{}:*", row.league));
    state.invalidate(&format!("matches:season:{}:*", row.season));
    match req.status {
        Some(MatchStatus::Live) => {
            state.invalidate("matches:live:*");
            state.invalidate("matches:upcoming:*");
        }
        Some(MatchStatus::Completed) => {
            state.invalidate("matches:live:*");
            state.invalidate("matches:completed:*");
        }
        Some(MatchStatus::Cancelled) => {
            state.invalidate("matches:upcoming:*");
            state.invalidate("matches:live:*");
        }
        _ => {}
    }

    let predictions_scored = if completing {
        Some(calculate_points(&state, match_id).await?)
    } else {
        None
    };
    Ok(Json(serde_json::json!({
        "match": row,
        "predictions_scored": predictions_scored,
    })))
}

async fn calculate_match_points(
    State(state): State<AppState>,
    Path(match_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ServiceError> {
    let processed = calculate_points(&state, match_id).await?;
    Ok(Json(serde_json::json!({ "processed": processed })))
}

async fn list_matches_cached(
    state: &AppState,
    filter: MatchFilter<'_>,
    key: String,
    limit: i64,
    offset: i64,
) -> Result<Json<Paged<store::MatchRow>>, ServiceError> {
    if let Some(page) = cache_lookup::<Paged<store::MatchRow>>(state, &key) {
        return Ok(Json(page));
    }
    let page = store::list_matches(&state.db, filter, limit, offset).await?;
    cache_store(state, &key, &page, state.cfg.cache.read_ttl_seconds);
    Ok(Json(page))
}

async fn get_upcoming_matches(
    State(state): State<AppState>,
    Query(q): Query<PageQuery>,
) -> Result<Json<Paged<store::MatchRow>>, ServiceError> {
    let (limit, offset) = page_params(&q);
    let key = format!("matches:upcoming:{limit}:{offset}");
    list_matches_cached(&state, MatchFilter::Upcoming, key, limit, offset).await
}

async fn get_live_matches(
    State(state): State<AppState>,
    Query(q): Query<PageQuery>,
) -> Result<Json<Paged<store::MatchRow>>, ServiceError> {
    let (limit, offset) = page_params(&q);
    let key = format!("matches:live:{limit}:{offset}");
    list_matches_cached(&state, MatchFilter::Live, key, limit, offset).await
}

async fn get_completed_matches(
    State(state): State<AppState>,
    Query(q): Query<PageQuery>,
) -> Result<Json<Paged<store::MatchRow>>, ServiceError> {
    let (limit, offset) = page_params(&q);
    let key = format!("matches:completed:{limit}:{offset}");
    list_matches_cached(&state, MatchFilter::Completed, key, limit, offset).await
}

async fn get_matches_by_league(
    State(state): State<AppState>,
    Path(league): Path<String>,
    Query(q): Query<PageQuery>,
) -> Result<Json<Paged<store::MatchRow>>, ServiceError> {
    let (limit, offset) = page_params(&q);
    let key = format!("matches:league:{league}:{limit}:{offset}");
    list_matches_cached(&state, MatchFilter::League(&league), key, limit, offset).await
}

async fn get_matches_by_season(
    State(state): State<AppState>,
    Path(season): Path<String>,
    Query(q): Query<PageQuery>,
) -> Result<Json<Paged<store::MatchRow>>, ServiceError> {
    let (limit, offset) = page_params(&q);
    let key = format!("matches:season:{season}:{limit}:{offset}");
    list_matches_cached(&state, MatchFilter::Season(&season), key, limit, offset).await
}

async fn create_prediction(
    State(state): State<AppState>,
    Json(req): Json<CreatePredictionRequest>,
) -> Result<(StatusCode, Json<store::PredictionRow>), ServiceError> {
    let m = store::fetch_match(&state.db, req.match_id)
        .await?
        .ok_or_else(|| ServiceError::not_found(format!("match {} not found", req.match_id)))?;
    if m.status != MatchStatus::Scheduled {
        return Err(ServiceError::invalid_state(
            "match has already started or ended",
        ));
    }
    if Utc::now() >= m.start_time {
        return Err(ServiceError::invalid_state("too late to make a prediction"));
    }

    let row = store::upsert_prediction(
        &state.db,
        req.user_id,
        req.match_id,
        req.home_score,
        req.away_score,
    )
    .await?;

    state.invalidate(&format!("predictions:match:{}:*", req.match_id));
    state.invalidate(&format!("predictions:user:{}:*", req.user_id));
    state.fanout.publish(
        &Scope::User(req.user_id),
        EVT_PREDICTION_CONFIRMED,
        serde_json::json!({
            "id": row.id,
            "match_id": row.match_id,
            "home_score": row.home_score,
            "away_score": row.away_score,
            "status": row.status,
            "timestamp": row.created_at,
        }),
    );
    Ok((StatusCode::CREATED, Json(row)))
}

async fn get_user_predictions(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Query(q): Query<PageQuery>,
) -> Result<Json<Paged<store::UserPredictionRow>>, ServiceError> {
    let (limit, offset) = page_params(&q);
    let key = format!("predictions:user:{user_id}:{limit}:{offset}");
    if let Some(page) = cache_lookup::<Paged<store::UserPredictionRow>>(&state, &key) {
        return Ok(Json(page));
    }
    let page = store::list_user_predictions(&state.db, user_id, limit, offset).await?;
    cache_store(&state, &key, &page, state.cfg.cache.read_ttl_seconds);
    Ok(Json(page))
}

async fn get_match_predictions(
    State(state): State<AppState>,
    Path(match_id): Path<Uuid>,
    Query(q): Query<PageQuery>,
) -> Result<Json<Paged<store::MatchPredictionRow>>, ServiceError> {
    let (limit, offset) = page_params(&q);
    let key = format!("predictions:match:{match_id}:{limit}:{offset}");
    if let Some(page) = cache_lookup::<Paged<store::MatchPredictionRow>>(&state, &key) {
        return Ok(Json(page));
    }
    let page = store::list_match_predictions(&state.db, match_id, limit, offset).await?;
    cache_store(&state, &key, &page, state.cfg.cache.read_ttl_seconds);
    Ok(Json(page))
}

async fn get_global_leaderboard_handler(
    State(state): State<AppState>,
    Query(q): Query<PageQuery>,
) -> Result<Json<leaderboard::LeaderboardPage>, ServiceError> {
    let (limit, offset) = page_params(&q);
    Ok(Json(get_global_leaderboard(&state, limit, offset).await?))
}

async fn get_league_leaderboard_handler(
    State(state): State<AppState>,
    Path(league_id): Path<Uuid>,
    Query(q): Query<PageQuery>,
) -> Result<Json<leaderboard::LeaderboardPage>, ServiceError> {
    let (limit, offset) = page_params(&q);
    Ok(Json(
        get_league_leaderboard(&state, league_id, limit, offset).await?,
    ))
}

async fn get_user_rank_handler(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Query(q): Query<RankQuery>,
) -> Result<Json<Option<leaderboard::RankInfo>>, ServiceError> {
    Ok(Json(get_user_rank(&state, user_id, q.league_id).await?))
}

async fn refresh_leaderboards_handler(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ServiceError> {
    let outcome = run_refresh(&state).await?;
    Ok(Json(serde_json::json!({
        "global_rows": outcome.global_rows,
        "league_rows": outcome.league_rows,
        "leagues": outcome.league_ids.len(),
    })))
}

async fn create_league(
    State(state): State<AppState>,
    Json(req): Json<CreateLeagueRequest>,
) -> Result<(StatusCode, Json<store::LeagueRow>), ServiceError> {
    let invite_code = if req.is_private {
        Some(Uuid::new_v4().simple().to_string()[..INVITE_CODE_LEN].to_uppercase())
    } else {
        None
    };
    let row = store::create_league(
        &state.db,
        &req.name,
        req.owner_id,
        req.is_private,
        invite_code.as_deref(),
    )
    .await?;
    state.invalidate("leagues:*");
    enqueue_leaderboard_refresh(&state, RefreshCause::MembershipChanged(row.id));
    Ok((StatusCode::CREATED, Json(row)))
}

async fn get_league(
    State(state): State<AppState>,
    Path(league_id): Path<Uuid>,
) -> Result<Json<store::LeagueRow>, ServiceError> {
    let key = format!("leagues:id:{league_id}");
    if let Some(row) = cache_lookup::<store::LeagueRow>(&state, &key) {
        return Ok(Json(row));
    }
    let row = store::fetch_league(&state.db, league_id)
        .await?
        .ok_or_else(|| ServiceError::not_found(format!("league {league_id} not found")))?;
    cache_store(&state, &key, &row, state.cfg.cache.read_ttl_seconds);
    Ok(Json(row))
}

async fn get_public_leagues(
    State(state): State<AppState>,
    Query(q): Query<PageQuery>,
) -> Result<Json<Paged<store::LeagueRow>>, ServiceError> {
    let (limit, offset) = page_params(&q);
    let key = format!("leagues:public:{limit}:{offset}");
    if let Some(page) = cache_lookup::<Paged<store::LeagueRow>>(&state, &key) {
        return Ok(Json(page));
    }
    let page = store::list_public_leagues(&state.db, limit, offset).await?;
    cache_store(&state, &key, &page, state.cfg.cache.read_ttl_seconds);
    Ok(Json(page))
}

async fn join_league(
    State(state): State<AppState>,
    Path(league_id): Path<Uuid>,
    Json(req): Json<MembershipRequest>,
) -> Result<Json<serde_json::Value>, ServiceError> {
    let league = store::fetch_league(&state.db, league_id)
        .await?
        .ok_or_else(|| ServiceError::not_found(format!("league {league_id} not found")))?;
    if league.is_private {
        let supplied = req.invite_code.as_deref().unwrap_or_default();
        if league.invite_code.as_deref() != Some(supplied) {
            return Err(ServiceError::invalid_state("invalid invite code"));
        }
    }
    if store::membership_exists(&state.db, league_id, req.user_id).await? {
        return Err(ServiceError::conflict(
            "user is already a member of this league",
        ));
    }
    // The unique constraint still backstops a concurrent join.
    store::insert_membership(&state.db, league_id, req.user_id).await?;

    state.invalidate("leagues:*");
    state.invalidate("leaderboard:*");
    enqueue_leaderboard_refresh(&state, RefreshCause::MembershipChanged(league_id));
    Ok(Json(serde_json::json!({ "joined": true })))
}

async fn leave_league(
    State(state): State<AppState>,
    Path(league_id): Path<Uuid>,
    Json(req): Json<MembershipRequest>,
) -> Result<Json<serde_json::Value>, ServiceError> {
    let league = store::fetch_league(&state.db, league_id)
        .await?
        .ok_or_else(|| ServiceError::not_found(format!("league {league_id} not found")))?;
    if league.owner_id == req.user_id {
        return Err(ServiceError::invalid_state(
            "league owner cannot leave the league",
        ));
    }
    let removed = store::delete_membership(&state.db, league_id, req.user_id).await?;
    if removed == 0 {
        return Err(ServiceError::not_found(
            "user is not a member of this league",
        ));
    }

    state.invalidate("leagues:*");
    state.invalidate("leaderboard:*");
    enqueue_leaderboard_refresh(&state, RefreshCause::MembershipChanged(league_id));
    Ok(Json(serde_json::json!({ "left": true })))
}

async fn get_user_rewards(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Query(q): Query<PageQuery>,
) -> Result<Json<Paged<store::RewardRow>>, ServiceError> {
    let (limit, offset) = page_params(&q);
    let key = format!("rewards:user:{user_id}:{limit}:{offset}");
    if let Some(page) = cache_lookup::<Paged<store::RewardRow>>(&state, &key) {
        return Ok(Json(page));
    }
    let page = store::list_user_rewards(&state.db, user_id, limit, offset).await?;
    cache_store(&state, &key, &page, state.cfg.cache.read_ttl_seconds);
    Ok(Json(page))
}

async fn get_user(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<store::UserRow>, ServiceError> {
    let row = store::fetch_user(&state.db, user_id)
        .await?
        .ok_or_else(|| ServiceError::not_found(format!("user {user_id} not found")))?;
    Ok(Json(row))
}

// ===== Event stream (server push) =====

fn sse_for_scope(
    state: &AppState,
    scope: Scope,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.fanout.subscribe(&scope);
    let stream = futures::stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(msg) => {
                    let event = Event::default()
                        .event(msg.event)
                        .data(msg.payload.to_string());
                    return Some((Ok::<_, Infallible>(event), rx));
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("event stream lagged skipped={skipped}");
                    continue;
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => return None,
            }
        }
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

async fn subscribe_global(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    sse_for_scope(&state, Scope::Global)
}

async fn subscribe_scope(
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, Uuid)>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ServiceError> {
    let scope = match kind.as_str() {
        "user" => Scope::User(id),
        "match" => Scope::Match(id),
        "league" => Scope::League(id),
        _ => {
            return Err(ServiceError::not_found(format!(
                "unknown event scope {kind}"
            )))
        }
    };
    Ok(sse_for_scope(&state, scope))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cfg = Arc::new(load_config()?);

    let db = PgPoolOptions::new()
        .min_connections(cfg.database.min_pool_size)
        .max_connections(cfg.database.max_pool_size)
        .acquire_timeout(Duration::from_secs(cfg.database.acquire_timeout_seconds))
        .max_lifetime(Duration::from_secs(cfg.database.max_lifetime_seconds))
        .connect(&cfg.database.url)
        .await
        .context("failed to connect to postgres")?;

    let (refresh_tx, refresh_rx) = mpsc::unbounded_channel::<RefreshCause>();
    let state = AppState {
        cfg: cfg.clone(),
        db,
        cache: Arc::new(MemoryCache::new()),
        fanout: Arc::new(Fanout::new(FANOUT_ROOM_CAPACITY)),
        refresh_tx,
        refresh_pending: Arc::new(AtomicBool::new(false)),
        match_mutexes: Arc::new(
            (0..MATCH_LOCK_SHARDS)
                .map(|_| Arc::new(Mutex::new(())))
                .collect(),
        ),
        perf: Arc::new(PerfCounters::new()),
    };

    start_background_tasks(state.clone(), refresh_rx);

    let allowed_headers = [CONTENT_TYPE, ACCEPT];
    let allowed_methods = [Method::GET, Method::POST, Method::PATCH, Method::DELETE, Method::OPTIONS];
    let cors = if cfg.api.cors_origins.iter().any(|x| x == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(allowed_methods)
            .allow_headers(allowed_headers)
    } else {
        let origins: Vec<HeaderValue> = cfg
            .api
            .cors_origins
            .iter()
            .filter_map(|origin| HeaderValue::from_str(origin).ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(allowed_methods)
            .allow_headers(allowed_headers)
    };

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/stats", get(get_service_stats))
        .route("/matches", post(create_match))
        .route("/matches/upcoming", get(get_upcoming_matches))
        .route("/matches/live", get(get_live_matches))
        .route("/matches/completed", get(get_completed_matches))
        .route("/matches/league/{league}", get(get_matches_by_league))
        .route("/matches/season/{season}", get(get_matches_by_season))
        .route("/matches/{match_id}", get(get_match).patch(update_match))
        .route("/matches/{match_id}/calculate", post(calculate_match_points))
        .route("/matches/{match_id}/predictions", get(get_match_predictions))
        .route("/predictions", post(create_prediction))
        .route("/predictions/user/{user_id}", get(get_user_predictions))
        .route("/leaderboard/global", get(get_global_leaderboard_handler))
        .route("/leaderboard/league/{league_id}", get(get_league_leaderboard_handler))
        .route("/leaderboard/user/{user_id}", get(get_user_rank_handler))
        .route("/leaderboard/refresh", post(refresh_leaderboards_handler))
        .route("/leagues", post(create_league))
        .route("/leagues/public", get(get_public_leagues))
        .route("/leagues/{league_id}", get(get_league))
        .route("/leagues/{league_id}/join", post(join_league))
        .route("/leagues/{league_id}/leave", post(leave_league))
        .route("/rewards/user/{user_id}", get(get_user_rewards))
        .route("/users/{user_id}", get(get_user))
        .route("/events/global", get(subscribe_global))
        .route("/events/{kind}/{id}", get(subscribe_scope))
        .layer(cors)
        .with_state(state);

    let addr: SocketAddr = format!("{}:{}", cfg.api.host, cfg.api.port).parse()?;
    tracing::info!("listening addr={addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_params_defaults_and_clamps() {
        let defaults = PageQuery {
            limit: None,
            offset: None,
        };
        assert_eq!(page_params(&defaults), (DEFAULT_PAGE_LIMIT, 0));

        let oversized = PageQuery {
            limit: Some(10_000),
            offset: Some(-5),
        };
        assert_eq!(page_params(&oversized), (MAX_PAGE_LIMIT, 0));

        let undersized = PageQuery {
            limit: Some(0),
            offset: Some(30),
        };
        assert_eq!(page_params(&undersized), (1, 30));
    }

    #[test]
    fn status_transitions() {
        use MatchStatus::*;
        assert!(valid_transition(Scheduled, Live));
        assert!(valid_transition(Live, Completed));
        assert!(valid_transition(Scheduled, Cancelled));
        assert!(valid_transition(Live, Cancelled));
        assert!(valid_transition(Live, Live));

        assert!(!valid_transition(Scheduled, Completed));
        assert!(!valid_transition(Live, Scheduled));
        assert!(!valid_transition(Completed, Live));
        assert!(!valid_transition(Completed, Scheduled));
        assert!(!valid_transition(Cancelled, Live));
    }

}
