use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Postgres, QueryBuilder, Row, Transaction};
use uuid::Uuid;

use crate::error::ServiceError;

// Postgres caps bind parameters per statement; chunk bulk writes well below it.
const LEADERBOARD_INSERT_CHUNK: usize = 500;
const REWARD_INSERT_CHUNK: usize = 200;

const MATCH_COLUMNS: &str =
    "id, home_team, away_team, home_score, away_score, status, league, season, start_time, end_time";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub(crate) enum MatchStatus {
    Scheduled,
    Live,
    Completed,
    Cancelled,
}

impl MatchStatus {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "SCHEDULED",
            Self::Live => "LIVE",
            Self::Completed => "COMPLETED",
            Self::Cancelled => "CANCELLED",
        }
    }

    pub(crate) fn parse(raw: &str) -> Option<Self> {
        match raw {
            "SCHEDULED" => Some(Self::Scheduled),
            "LIVE" => Some(Self::Live),
            "COMPLETED" => Some(Self::Completed),
            "CANCELLED" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub(crate) enum PredictionStatus {
    Pending,
    Calculated,
}

impl PredictionStatus {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "PENDING" => Some(Self::Pending),
            "CALCULATED" => Some(Self::Calculated),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Paged<T> {
    pub(crate) rows: Vec<T>,
    pub(crate) total: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct MatchRow {
    pub(crate) id: Uuid,
    pub(crate) home_team: String,
    pub(crate) away_team: String,
    pub(crate) home_score: Option<i32>,
    pub(crate) away_score: Option<i32>,
    pub(crate) status: MatchStatus,
    pub(crate) league: String,
    pub(crate) season: String,
    pub(crate) start_time: DateTime<Utc>,
    pub(crate) end_time: Option<DateTime<Utc>>,
}

fn match_from_row(r: &sqlx::postgres::PgRow) -> Result<MatchRow, ServiceError> {
    let status_raw: String = r.get("status");
    let status = MatchStatus::parse(&status_raw)
        .ok_or_else(|| ServiceError::Unexpected(format!("unknown match status {status_raw}")))?;
    Ok(MatchRow {
        id: r.get("id"),
        home_team: r.get("home_team"),
        away_team: r.get("away_team"),
        home_score: r.get("home_score"),
        away_score: r.get("away_score"),
        status,
        league: r.get("league"),
        season: r.get("season"),
        start_time: r.get("start_time"),
        end_time: r.get("end_time"),
    })
}

#[derive(Debug, Clone)]
pub(crate) struct NewMatch {
    pub(crate) home_team: String,
    pub(crate) away_team: String,
    pub(crate) start_time: DateTime<Utc>,
    pub(crate) league: String,
    pub(crate) season: String,
}

pub(crate) async fn insert_match(
    db: &Pool<Postgres>,
    new: &NewMatch,
) -> Result<MatchRow, ServiceError> {
    let sql = format!(
        "INSERT INTO matches (id, home_team, away_team, status, league, season, start_time, created_at, updated_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, NOW(), NOW()) RETURNING {MATCH_COLUMNS}"
    );
    let row = sqlx::query(&sql)
        .bind(Uuid::new_v4())
        .bind(&new.home_team)
        .bind(&new.away_team)
        .bind(MatchStatus::Scheduled.as_str())
        .bind(&new.league)
        .bind(&new.season)
        .bind(new.start_time)
        .fetch_one(db)
        .await?;
    match_from_row(&row)
}

pub(crate) async fn fetch_match(
    db: &Pool<Postgres>,
    id: Uuid,
) -> Result<Option<MatchRow>, ServiceError> {
    let sql = format!("SELECT {MATCH_COLUMNS} FROM matches WHERE id = $1");
    let row = sqlx::query(&sql).bind(id).fetch_optional(db).await?;
    row.as_ref().map(match_from_row).transpose()
}

// Row-locked fetch inside the scoring transaction; serializes concurrent
// scoring passes across processes on the match row itself.
pub(crate) async fn fetch_match_for_scoring(
    tx: &mut Transaction<'_, Postgres>,
    id: Uuid,
) -> Result<Option<MatchRow>, ServiceError> {
    let sql = format!("SELECT {MATCH_COLUMNS} FROM matches WHERE id = $1 FOR UPDATE");
    let row = sqlx::query(&sql).bind(id).fetch_optional(&mut **tx).await?;
    row.as_ref().map(match_from_row).transpose()
}

#[derive(Debug, Clone, Default)]
pub(crate) struct MatchUpdate {
    pub(crate) home_score: Option<i32>,
    pub(crate) away_score: Option<i32>,
    pub(crate) status: Option<MatchStatus>,
    pub(crate) end_time: Option<DateTime<Utc>>,
}

pub(crate) async fn update_match(
    db: &Pool<Postgres>,
    id: Uuid,
    upd: &MatchUpdate,
) -> Result<Option<MatchRow>, ServiceError> {
    let mut qb: QueryBuilder<Postgres> = QueryBuilder::new("UPDATE matches SET updated_at = NOW()");
    if let Some(v) = upd.home_score {
        qb.push(", home_score = ");
        qb.push_bind(v);
    }
    if let Some(v) = upd.away_score {
        qb.push(", away_score = ");
        qb.push_bind(v);
    }
    if let Some(v) = upd.status {
        qb.push(", status = ");
        qb.push_bind(v.as_str());
    }
    if let Some(v) = upd.end_time {
        qb.push(", end_time = ");
        qb.push_bind(v);
    }
    qb.push(" WHERE id = ");
    qb.push_bind(id);
    qb.push(format!(" RETURNING {MATCH_COLUMNS}"));
    let row = qb.build().fetch_optional(db).await?;
    row.as_ref().map(match_from_row).transpose()
}

pub(crate) enum MatchFilter<'a> {
    Upcoming,
    Live,
    Completed,
    League(&'a str),
    Season(&'a str),
}

pub(crate) async fn list_matches(
    db: &Pool<Postgres>,
    filter: MatchFilter<'_>,
    limit: i64,
    offset: i64,
) -> Result<Paged<MatchRow>, ServiceError> {
    let (where_sql, order_sql, bind) = match filter {
        MatchFilter::Upcoming => (
            "status = 'SCHEDULED' AND start_time > NOW()",
            "start_time ASC",
            None,
        ),
        MatchFilter::Live => ("status = 'LIVE'", "start_time ASC", None),
        MatchFilter::Completed => ("status = 'COMPLETED'", "end_time DESC NULLS LAST", None),
        MatchFilter::League(league) => ("league = $1", "start_time DESC", Some(league)),
        MatchFilter::Season(season) => ("season = $1", "start_time DESC", Some(season)),
    };

    let rows = if let Some(value) = bind {
        let sql = format!(
            "SELECT {MATCH_COLUMNS} FROM matches WHERE {where_sql} ORDER BY {order_sql} LIMIT $2 OFFSET $3"
        );
        sqlx::query(&sql)
            .bind(value)
            .bind(limit)
            .bind(offset)
            .fetch_all(db)
            .await?
    } else {
        let sql = format!(
            "SELECT {MATCH_COLUMNS} FROM matches WHERE {where_sql} ORDER BY {order_sql} LIMIT $1 OFFSET $2"
        );
        sqlx::query(&sql)
            .bind(limit)
            .bind(offset)
            .fetch_all(db)
            .await?
    };

    let count_sql = format!("SELECT COUNT(*) FROM matches WHERE {where_sql}");
    let total: i64 = if let Some(value) = bind {
        sqlx::query_scalar(&count_sql).bind(value).fetch_one(db).await?
    } else {
        sqlx::query_scalar(&count_sql).fetch_one(db).await?
    };

    let rows = rows
        .iter()
        .map(match_from_row)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Paged { rows, total })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct PredictionRow {
    pub(crate) id: Uuid,
    pub(crate) user_id: Uuid,
    pub(crate) match_id: Uuid,
    pub(crate) home_score: i32,
    pub(crate) away_score: i32,
    pub(crate) points: i64,
    pub(crate) status: PredictionStatus,
    pub(crate) created_at: DateTime<Utc>,
}

fn prediction_status(raw: &str) -> Result<PredictionStatus, ServiceError> {
    PredictionStatus::parse(raw)
        .ok_or_else(|| ServiceError::Unexpected(format!("unknown prediction status {raw}")))
}

// One prediction per (user, match): a re-submission updates the stored
// scores. Only reachable while the match is still open for predictions, so
// a CALCULATED row can never be overwritten here.
pub(crate) async fn upsert_prediction(
    db: &Pool<Postgres>,
    user_id: Uuid,
    match_id: Uuid,
    home_score: i32,
    away_score: i32,
) -> Result<PredictionRow, ServiceError> {
    let row = sqlx::query(
        "INSERT INTO predictions (id, user_id, match_id, home_score, away_score, points, status, created_at, updated_at) \
         VALUES ($1, $2, $3, $4, $5, 0, 'PENDING', NOW(), NOW()) \
         ON CONFLICT (user_id, match_id) DO UPDATE SET \
             home_score = EXCLUDED.home_score, \
             away_score = EXCLUDED.away_score, \
             updated_at = NOW() \
         RETURNING id, user_id, match_id, home_score, away_score, points, status, created_at",
    )
    .bind(Uuid::new_v4())
    .bind(user_id)
    .bind(match_id)
    .bind(home_score)
    .bind(away_score)
    .fetch_one(db)
    .await?;
    let status_raw: String = row.get("status");
    Ok(PredictionRow {
        id: row.get("id"),
        user_id: row.get("user_id"),
        match_id: row.get("match_id"),
        home_score: row.get("home_score"),
        away_score: row.get("away_score"),
        points: row.get("points"),
        status: prediction_status(&status_raw)?,
        created_at: row.get("created_at"),
    })
}

#[derive(Debug, Clone)]
pub(crate) struct PendingPrediction {
    pub(crate) id: Uuid,
    pub(crate) user_id: Uuid,
    pub(crate) home_score: i32,
    pub(crate) away_score: i32,
}

pub(crate) async fn pending_predictions_for_match(
    tx: &mut Transaction<'_, Postgres>,
    match_id: Uuid,
) -> Result<Vec<PendingPrediction>, ServiceError> {
    let rows = sqlx::query(
        "SELECT id, user_id, home_score, away_score FROM predictions \
         WHERE match_id = $1 AND status = 'PENDING' ORDER BY created_at ASC FOR UPDATE",
    )
    .bind(match_id)
    .fetch_all(&mut **tx)
    .await?;
    Ok(rows
        .iter()
        .map(|r| PendingPrediction {
            id: r.get("id"),
            user_id: r.get("user_id"),
            home_score: r.get("home_score"),
            away_score: r.get("away_score"),
        })
        .collect())
}

// The status predicate makes the flip single-shot even if two passes race:
// the loser updates zero rows.
pub(crate) async fn mark_prediction_calculated(
    tx: &mut Transaction<'_, Postgres>,
    prediction_id: Uuid,
    points: i64,
) -> Result<u64, ServiceError> {
    let done = sqlx::query(
        "UPDATE predictions SET points = $1, status = 'CALCULATED', updated_at = NOW() \
         WHERE id = $2 AND status = 'PENDING'",
    )
    .bind(points)
    .bind(prediction_id)
    .execute(&mut **tx)
    .await?;
    Ok(done.rows_affected())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct UserPredictionRow {
    pub(crate) id: Uuid,
    pub(crate) match_id: Uuid,
    pub(crate) home_score: i32,
    pub(crate) away_score: i32,
    pub(crate) points: i64,
    pub(crate) status: PredictionStatus,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) home_team: String,
    pub(crate) away_team: String,
    pub(crate) match_home_score: Option<i32>,
    pub(crate) match_away_score: Option<i32>,
    pub(crate) match_status: MatchStatus,
}

pub(crate) async fn list_user_predictions(
    db: &Pool<Postgres>,
    user_id: Uuid,
    limit: i64,
    offset: i64,
) -> Result<Paged<UserPredictionRow>, ServiceError> {
    let rows = sqlx::query(
        "SELECT p.id, p.match_id, p.home_score, p.away_score, p.points, p.status, p.created_at, \
                m.home_team, m.away_team, m.home_score AS match_home_score, \
                m.away_score AS match_away_score, m.status AS match_status \
         FROM predictions p JOIN matches m ON m.id = p.match_id \
         WHERE p.user_id = $1 ORDER BY p.created_at DESC LIMIT $2 OFFSET $3",
    )
    .bind(user_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(db)
    .await?;
    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM predictions WHERE user_id = $1")
        .bind(user_id)
        .fetch_one(db)
        .await?;

    let mut out = Vec::with_capacity(rows.len());
    for r in &rows {
        let status_raw: String = r.get("status");
        let match_status_raw: String = r.get("match_status");
        out.push(UserPredictionRow {
            id: r.get("id"),
            match_id: r.get("match_id"),
            home_score: r.get("home_score"),
            away_score: r.get("away_score"),
            points: r.get("points"),
            status: prediction_status(&status_raw)?,
            created_at: r.get("created_at"),
            home_team: r.get("home_team"),
            away_team: r.get("away_team"),
            match_home_score: r.get("match_home_score"),
            match_away_score: r.get("match_away_score"),
            match_status: MatchStatus::parse(&match_status_raw).ok_or_else(|| {
                ServiceError::Unexpected(format!("unknown match status {match_status_raw}"))
            })?,
        });
    }
    Ok(Paged { rows: out, total })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct MatchPredictionRow {
    pub(crate) id: Uuid,
    pub(crate) user_id: Uuid,
    pub(crate) username: String,
    pub(crate) home_score: i32,
    pub(crate) away_score: i32,
    pub(crate) points: i64,
    pub(crate) status: PredictionStatus,
    pub(crate) created_at: DateTime<Utc>,
}

pub(crate) async fn list_match_predictions(
    db: &Pool<Postgres>,
    match_id: Uuid,
    limit: i64,
    offset: i64,
) -> Result<Paged<MatchPredictionRow>, ServiceError> {
    let rows = sqlx::query(
        "SELECT p.id, p.user_id, u.username, p.home_score, p.away_score, p.points, p.status, p.created_at \
         FROM predictions p JOIN users u ON u.id = p.user_id \
         WHERE p.match_id = $1 ORDER BY p.created_at ASC LIMIT $2 OFFSET $3",
    )
    .bind(match_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(db)
    .await?;
    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM predictions WHERE match_id = $1")
        .bind(match_id)
        .fetch_one(db)
        .await?;

    let mut out = Vec::with_capacity(rows.len());
    for r in &rows {
        let status_raw: String = r.get("status");
        out.push(MatchPredictionRow {
            id: r.get("id"),
            user_id: r.get("user_id"),
            username: r.get("username"),
            home_score: r.get("home_score"),
            away_score: r.get("away_score"),
            points: r.get("points"),
            status: prediction_status(&status_raw)?,
            created_at: r.get("created_at"),
        });
    }
    Ok(Paged { rows: out, total })
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct UserRow {
    pub(crate) id: Uuid,
    pub(crate) username: String,
    pub(crate) points: i64,
}

pub(crate) async fn fetch_user(
    db: &Pool<Postgres>,
    id: Uuid,
) -> Result<Option<UserRow>, ServiceError> {
    let row = sqlx::query("SELECT id, username, points FROM users WHERE id = $1")
        .bind(id)
        .fetch_optional(db)
        .await?;
    Ok(row.map(|r| UserRow {
        id: r.get("id"),
        username: r.get("username"),
        points: r.get("points"),
    }))
}

pub(crate) async fn credit_user_points(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    delta: i64,
) -> Result<(), ServiceError> {
    sqlx::query("UPDATE users SET points = points + $1 WHERE id = $2")
        .bind(delta)
        .bind(user_id)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

#[derive(Debug, Clone)]
pub(crate) struct NewReward {
    pub(crate) id: Uuid,
    pub(crate) user_id: Uuid,
    pub(crate) prediction_id: Uuid,
    pub(crate) points: i64,
    pub(crate) description: &'static str,
}

pub(crate) async fn insert_rewards(
    tx: &mut Transaction<'_, Postgres>,
    rewards: &[NewReward],
) -> Result<(), ServiceError> {
    if rewards.is_empty() {
        return Ok(());
    }
    let now = Utc::now();
    for chunk in rewards.chunks(REWARD_INSERT_CHUNK) {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO rewards (id, user_id, prediction_id, points, description, created_at) ",
        );
        qb.push_values(chunk, |mut b, r| {
            b.push_bind(r.id)
                .push_bind(r.user_id)
                .push_bind(r.prediction_id)
                .push_bind(r.points)
                .push_bind(r.description)
                .push_bind(now);
        });
        qb.build().execute(&mut **tx).await?;
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct RewardRow {
    pub(crate) id: Uuid,
    pub(crate) prediction_id: Uuid,
    pub(crate) points: i64,
    pub(crate) description: String,
    pub(crate) created_at: DateTime<Utc>,
}

pub(crate) async fn list_user_rewards(
    db: &Pool<Postgres>,
    user_id: Uuid,
    limit: i64,
    offset: i64,
) -> Result<Paged<RewardRow>, ServiceError> {
    let rows = sqlx::query(
        "SELECT id, prediction_id, points, description, created_at FROM rewards \
         WHERE user_id = $1 ORDER BY created_at DESC LIMIT $2 OFFSET $3",
    )
    .bind(user_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(db)
    .await?;
    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM rewards WHERE user_id = $1")
        .bind(user_id)
        .fetch_one(db)
        .await?;
    Ok(Paged {
        rows: rows
            .iter()
            .map(|r| RewardRow {
                id: r.get("id"),
                prediction_id: r.get("prediction_id"),
                points: r.get("points"),
                description: r.get("description"),
                created_at: r.get("created_at"),
            })
            .collect(),
        total,
    })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct LeagueRow {
    pub(crate) id: Uuid,
    pub(crate) name: String,
    pub(crate) owner_id: Uuid,
    pub(crate) is_private: bool,
    pub(crate) invite_code: Option<String>,
    pub(crate) member_count: i64,
}

fn league_from_row(r: &sqlx::postgres::PgRow) -> LeagueRow {
    LeagueRow {
        id: r.get("id"),
        name: r.get("name"),
        owner_id: r.get("owner_id"),
        is_private: r.get("is_private"),
        invite_code: r.get("invite_code"),
        member_count: r.get("member_count"),
    }
}

// Owner membership lands in the same transaction as the league row.
pub(crate) async fn create_league(
    db: &Pool<Postgres>,
    name: &str,
    owner_id: Uuid,
    is_private: bool,
    invite_code: Option<&str>,
) -> Result<LeagueRow, ServiceError> {
    let mut tx = db.begin().await?;
    let league_id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO leagues (id, name, owner_id, is_private, invite_code, created_at) \
         VALUES ($1, $2, $3, $4, $5, NOW())",
    )
    .bind(league_id)
    .bind(name)
    .bind(owner_id)
    .bind(is_private)
    .bind(invite_code)
    .execute(&mut *tx)
    .await?;
    sqlx::query("INSERT INTO league_members (league_id, user_id, joined_at) VALUES ($1, $2, NOW())")
        .bind(league_id)
        .bind(owner_id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(LeagueRow {
        id: league_id,
        name: name.to_string(),
        owner_id,
        is_private,
        invite_code: invite_code.map(|s| s.to_string()),
        member_count: 1,
    })
}

pub(crate) async fn fetch_league(
    db: &Pool<Postgres>,
    id: Uuid,
) -> Result<Option<LeagueRow>, ServiceError> {
    let row = sqlx::query(
        "SELECT l.id, l.name, l.owner_id, l.is_private, l.invite_code, \
                (SELECT COUNT(*) FROM league_members lm WHERE lm.league_id = l.id) AS member_count \
         FROM leagues l WHERE l.id = $1",
    )
    .bind(id)
    .fetch_optional(db)
    .await?;
    Ok(row.as_ref().map(league_from_row))
}

pub(crate) async fn list_public_leagues(
    db: &Pool<Postgres>,
    limit: i64,
    offset: i64,
) -> Result<Paged<LeagueRow>, ServiceError> {
    let rows = sqlx::query(
        "SELECT l.id, l.name, l.owner_id, l.is_private, l.invite_code, \
                (SELECT COUNT(*) FROM league_members lm WHERE lm.league_id = l.id) AS member_count \
         FROM leagues l WHERE l.is_private = false ORDER BY l.created_at DESC LIMIT $1 OFFSET $2",
    )
    .bind(limit)
    .bind(offset)
    .fetch_all(db)
    .await?;
    let total: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM leagues WHERE is_private = false")
            .fetch_one(db)
            .await?;
    Ok(Paged {
        rows: rows.iter().map(league_from_row).collect(),
        total,
    })
}

pub(crate) async fn membership_exists(
    db: &Pool<Postgres>,
    league_id: Uuid,
    user_id: Uuid,
) -> Result<bool, ServiceError> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM league_members WHERE league_id = $1 AND user_id = $2",
    )
    .bind(league_id)
    .bind(user_id)
    .fetch_one(db)
    .await?;
    Ok(count > 0)
}

// Duplicate membership surfaces as the unique violation -> Conflict.
pub(crate) async fn insert_membership(
    db: &Pool<Postgres>,
    league_id: Uuid,
    user_id: Uuid,
) -> Result<(), ServiceError> {
    sqlx::query("INSERT INTO league_members (league_id, user_id, joined_at) VALUES ($1, $2, NOW())")
        .bind(league_id)
        .bind(user_id)
        .execute(db)
        .await?;
    Ok(())
}

pub(crate) async fn delete_membership(
    db: &Pool<Postgres>,
    league_id: Uuid,
    user_id: Uuid,
) -> Result<u64, ServiceError> {
    let done = sqlx::query("DELETE FROM league_members WHERE league_id = $1 AND user_id = $2")
        .bind(league_id)
        .bind(user_id)
        .execute(db)
        .await?;
    Ok(done.rows_affected())
}

pub(crate) async fn load_user_points(
    tx: &mut Transaction<'_, Postgres>,
) -> Result<Vec<(Uuid, i64)>, ServiceError> {
    let rows = sqlx::query("SELECT id, points FROM users ORDER BY points DESC, id ASC")
        .fetch_all(&mut **tx)
        .await?;
    Ok(rows.iter().map(|r| (r.get("id"), r.get("points"))).collect())
}

pub(crate) async fn load_membership_points(
    tx: &mut Transaction<'_, Postgres>,
) -> Result<Vec<(Uuid, Uuid, i64)>, ServiceError> {
    let rows = sqlx::query(
        "SELECT lm.league_id, u.id AS user_id, u.points \
         FROM league_members lm JOIN users u ON u.id = lm.user_id \
         ORDER BY lm.league_id ASC, u.points DESC, u.id ASC",
    )
    .fetch_all(&mut **tx)
    .await?;
    Ok(rows
        .iter()
        .map(|r| (r.get("league_id"), r.get("user_id"), r.get("points")))
        .collect())
}

#[derive(Debug, Clone)]
pub(crate) struct NewLeaderboardEntry {
    pub(crate) user_id: Uuid,
    pub(crate) league_id: Option<Uuid>,
    pub(crate) points: i64,
    pub(crate) rank: i64,
}

// Wholesale replace: deleting first prunes entries for users who left a
// league; the conflict clause keeps a concurrent refresher last-write-wins
// instead of erroring.
pub(crate) async fn replace_leaderboard_entries(
    tx: &mut Transaction<'_, Postgres>,
    entries: &[NewLeaderboardEntry],
) -> Result<(), ServiceError> {
    sqlx::query("DELETE FROM leaderboard_entries")
        .execute(&mut **tx)
        .await?;
    let now = Utc::now();
    for chunk in entries.chunks(LEADERBOARD_INSERT_CHUNK) {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO leaderboard_entries (id, user_id, league_id, points, rank, updated_at) ",
        );
        qb.push_values(chunk, |mut b, e| {
            b.push_bind(Uuid::new_v4())
                .push_bind(e.user_id)
                .push_bind(e.league_id)
                .push_bind(e.points)
                .push_bind(e.rank)
                .push_bind(now);
        });
        qb.push(
            " ON CONFLICT (user_id, league_id) DO UPDATE SET \
             points = EXCLUDED.points, rank = EXCLUDED.rank, updated_at = EXCLUDED.updated_at",
        );
        qb.build().execute(&mut **tx).await?;
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct LeaderboardEntryRow {
    pub(crate) user_id: Uuid,
    pub(crate) username: String,
    pub(crate) points: i64,
    pub(crate) rank: i64,
}

pub(crate) async fn page_leaderboard(
    db: &Pool<Postgres>,
    league_id: Option<Uuid>,
    limit: i64,
    offset: i64,
) -> Result<Paged<LeaderboardEntryRow>, ServiceError> {
    let rows = if let Some(league_id) = league_id {
        sqlx::query(
            "SELECT le.user_id, u.username, le.points, le.rank \
             FROM leaderboard_entries le JOIN users u ON u.id = le.user_id \
             WHERE le.league_id = $1 ORDER BY le.rank ASC, u.username ASC LIMIT $2 OFFSET $3",
        )
        .bind(league_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(db)
        .await?
    } else {
        sqlx::query(
            "SELECT le.user_id, u.username, le.points, le.rank \
             FROM leaderboard_entries le JOIN users u ON u.id = le.user_id \
             WHERE le.league_id IS NULL ORDER BY le.rank ASC, u.username ASC LIMIT $1 OFFSET $2",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(db)
        .await?
    };
    let total: i64 = if let Some(league_id) = league_id {
        sqlx::query_scalar("SELECT COUNT(*) FROM leaderboard_entries WHERE league_id = $1")
            .bind(league_id)
            .fetch_one(db)
            .await?
    } else {
        sqlx::query_scalar("SELECT COUNT(*) FROM leaderboard_entries WHERE league_id IS NULL")
            .fetch_one(db)
            .await?
    };
    Ok(Paged {
        rows: rows
            .iter()
            .map(|r| LeaderboardEntryRow {
                user_id: r.get("user_id"),
                username: r.get("username"),
                points: r.get("points"),
                rank: r.get("rank"),
            })
            .collect(),
        total,
    })
}

pub(crate) async fn fetch_user_entry(
    db: &Pool<Postgres>,
    user_id: Uuid,
    league_id: Option<Uuid>,
) -> Result<Option<(i64, i64)>, ServiceError> {
    let row = if let Some(league_id) = league_id {
        sqlx::query(
            "SELECT rank, points FROM leaderboard_entries WHERE user_id = $1 AND league_id = $2",
        )
        .bind(user_id)
        .bind(league_id)
        .fetch_optional(db)
        .await?
    } else {
        sqlx::query(
            "SELECT rank, points FROM leaderboard_entries WHERE user_id = $1 AND league_id IS NULL",
        )
        .bind(user_id)
        .fetch_optional(db)
        .await?
    };
    Ok(row.map(|r| (r.get("rank"), r.get("points"))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn match_status_round_trips() {
        for status in [
            MatchStatus::Scheduled,
            MatchStatus::Live,
            MatchStatus::Completed,
            MatchStatus::Cancelled,
        ] {
            assert_eq!(MatchStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(MatchStatus::parse("FINISHED"), None);
    }

    #[test]
    fn match_status_serde_uses_wire_names() {
        let v = serde_json::to_value(MatchStatus::Scheduled).unwrap();
        assert_eq!(v, serde_json::json!("SCHEDULED"));
        let back: MatchStatus = serde_json::from_value(serde_json::json!("COMPLETED")).unwrap();
        assert_eq!(back, MatchStatus::Completed);
    }

    #[test]
    fn prediction_status_parses() {
        assert_eq!(PredictionStatus::parse("PENDING"), Some(PredictionStatus::Pending));
        assert_eq!(
            PredictionStatus::parse("CALCULATED"),
            Some(PredictionStatus::Calculated)
        );
        assert_eq!(PredictionStatus::parse("pending"), None);
    }
}
