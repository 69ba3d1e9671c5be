use std::collections::BTreeMap;
use std::sync::atomic::Ordering;

use uuid::Uuid;

use crate::error::ServiceError;
use crate::fanout::{Scope, EVT_MATCH_RESULT_APPLIED, EVT_POINTS_AWARDED};
use crate::state::{AppState, RefreshCause};
use crate::store::{self, MatchStatus, NewReward};
use crate::tasks::enqueue_leaderboard_refresh;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Outcome {
    HomeWin,
    AwayWin,
    Draw,
}

pub(crate) fn outcome(home: i32, away: i32) -> Outcome {
    if home > away {
        Outcome::HomeWin
    } else if home < away {
        Outcome::AwayWin
    } else {
        Outcome::Draw
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PointsAward {
    pub(crate) points: i64,
    pub(crate) description: &'static str,
}

// Total over all integer score pairs; score sanity is enforced when the
// prediction is created, not here.
pub(crate) fn score_prediction(
    predicted_home: i32,
    predicted_away: i32,
    actual_home: i32,
    actual_away: i32,
) -> PointsAward {
    if predicted_home == actual_home && predicted_away == actual_away {
        return PointsAward {
            points: 3,
            description: "Exact score prediction",
        };
    }
    let predicted = outcome(predicted_home, predicted_away);
    let actual = outcome(actual_home, actual_away);
    if predicted == actual {
        // A draw matches on margin by definition (both differences are 0).
        let margin_matches = (predicted_home - predicted_away) == (actual_home - actual_away);
        if margin_matches {
            return PointsAward {
                points: 2,
                description: "Correct outcome with goal difference",
            };
        }
        return PointsAward {
            points: 1,
            description: "Correct outcome",
        };
    }
    PointsAward {
        points: 0,
        description: "",
    }
}

// Converts a completed match result into point awards exactly once. All
// store writes share one transaction; cache invalidation, fanout, and the
// leaderboard refresh trigger run strictly after the commit.
pub(crate) async fn calculate_points(
    state: &AppState,
    match_id: Uuid,
) -> Result<u64, ServiceError> {
    let _match_guard = state.lock_match(match_id).await;

    let mut tx = state.db.begin().await?;
    let m = store::fetch_match_for_scoring(&mut tx, match_id)
        .await?
        .ok_or_else(|| ServiceError::not_found(format!("match {match_id} not found")))?;
    if m.status != MatchStatus::Completed {
        return Err(ServiceError::invalid_state(format!(
            "match {match_id} is not completed"
        )));
    }
    let (Some(actual_home), Some(actual_away)) = (m.home_score, m.away_score) else {
        return Err(ServiceError::invalid_state(format!(
            "match {match_id} has no final result"
        )));
    };

    let pending = store::pending_predictions_for_match(&mut tx, match_id).await?;
    let mut rewards: Vec<NewReward> = Vec::new();
    let mut credits: BTreeMap<Uuid, i64> = BTreeMap::new();
    let mut awarded: Vec<(Uuid, Uuid, i64)> = Vec::new();
    let mut processed = 0u64;

    for p in &pending {
        let award = score_prediction(p.home_score, p.away_score, actual_home, actual_away);
        let flipped = store::mark_prediction_calculated(&mut tx, p.id, award.points).await?;
        if flipped == 0 {
            // Lost the race to a concurrent pass; that pass owns the award.
            continue;
        }
        processed += 1;
        awarded.push((p.user_id, p.id, award.points));
        if award.points > 0 {
            rewards.push(NewReward {
                id: Uuid::new_v4(),
                user_id: p.user_id,
                prediction_id: p.id,
                points: award.points,
                description: award.description,
            });
            *credits.entry(p.user_id).or_insert(0) += award.points;
        }
    }

    store::insert_rewards(&mut tx, &rewards).await?;
    for (user_id, delta) in &credits {
        store::credit_user_points(&mut tx, *user_id, *delta).await?;
    }
    tx.commit().await?;

    state.perf.scoring_runs.fetch_add(1, Ordering::Relaxed);
    state
        .perf
        .predictions_scored
        .fetch_add(processed, Ordering::Relaxed);
    state
        .perf
        .rewards_created
        .fetch_add(rewards.len() as u64, Ordering::Relaxed);
    tracing::info!(
        "scoring complete match_id={match_id} processed={processed} rewards={} result={actual_home}-{actual_away}",
        rewards.len()
    );

    // Best-effort from here on: invalidate before notifying so a client that
    // reacts to the event re-reads fresh data.
    state.invalidate(&format!("predictions:match:{match_id}:*"));
    state.invalidate("predictions:user:*");
    state.invalidate("rewards:user:*");
    state.invalidate("leaderboard:*");

    state.fanout.publish(
        &Scope::Match(match_id),
        EVT_MATCH_RESULT_APPLIED,
        serde_json::json!({
            "match_id": match_id,
            "home_score": actual_home,
            "away_score": actual_away,
            "predictions_scored": processed,
        }),
    );
    for (user_id, prediction_id, points) in &awarded {
        state.fanout.publish(
            &Scope::User(*user_id),
            EVT_POINTS_AWARDED,
            serde_json::json!({
                "prediction_id": prediction_id,
                "match_id": match_id,
                "points": points,
            }),
        );
    }

    enqueue_leaderboard_refresh(state, RefreshCause::MatchScored(match_id));
    Ok(processed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_score_scores_three() {
        assert_eq!(score_prediction(2, 1, 2, 1).points, 3);
        assert_eq!(score_prediction(0, 0, 0, 0).points, 3);
        assert_eq!(
            score_prediction(2, 1, 2, 1).description,
            "Exact score prediction"
        );
    }

    #[test]
    fn outcome_and_margin_scores_two() {
        // Home win by 2 on both sides, different scorelines.
        assert_eq!(score_prediction(3, 1, 2, 0).points, 2);
        // Away win by 1 on both sides.
        assert_eq!(score_prediction(0, 1, 1, 2).points, 2);
        assert_eq!(
            score_prediction(3, 1, 2, 0).description,
            "Correct outcome with goal difference"
        );
    }

    #[test]
    fn non_exact_draw_scores_two() {
        // Margin is trivially 0 for any pair of draws.
        assert_eq!(score_prediction(1, 1, 2, 2).points, 2);
        assert_eq!(score_prediction(0, 0, 3, 3).points, 2);
    }

    #[test]
    fn outcome_only_scores_one() {
        assert_eq!(score_prediction(2, 0, 1, 0).points, 1);
        assert_eq!(score_prediction(0, 3, 1, 2).points, 1);
        assert_eq!(score_prediction(2, 0, 1, 0).description, "Correct outcome");
    }

    #[test]
    fn wrong_outcome_scores_zero() {
        assert_eq!(score_prediction(1, 0, 0, 1).points, 0);
        assert_eq!(score_prediction(1, 1, 2, 0).points, 0);
        assert_eq!(score_prediction(0, 2, 1, 1).points, 0);
    }

    #[test]
    fn total_over_negative_scores() {
        // Garbage in, deterministic answer out.
        assert_eq!(score_prediction(-1, -1, -1, -1).points, 3);
        assert_eq!(score_prediction(-1, -3, 2, 0).points, 2);
        assert_eq!(score_prediction(-1, -2, 3, 1).points, 1);
    }

    #[test]
    fn completed_match_scenario() {
        // Match finished 2-1: exact, same margin, wrong margin, wrong outcome.
        assert_eq!(score_prediction(2, 1, 2, 1).points, 3);
        assert_eq!(score_prediction(1, 0, 2, 1).points, 2);
        assert_eq!(score_prediction(3, 1, 2, 1).points, 1);
        assert_eq!(score_prediction(0, 2, 2, 1).points, 0);
    }

    #[test]
    fn outcome_classification() {
        assert_eq!(outcome(2, 1), Outcome::HomeWin);
        assert_eq!(outcome(0, 4), Outcome::AwayWin);
        assert_eq!(outcome(2, 2), Outcome::Draw);
    }
}
