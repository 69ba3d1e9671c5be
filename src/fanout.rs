use dashmap::DashMap;
use tokio::sync::broadcast;
use uuid::Uuid;

pub(crate) const EVT_MATCH_RESULT_APPLIED: &str = "match-result-applied";
pub(crate) const EVT_PREDICTION_CONFIRMED: &str = "prediction-confirmed";
pub(crate) const EVT_POINTS_AWARDED: &str = "points-awarded";
pub(crate) const EVT_LEADERBOARD_UPDATED: &str = "leaderboard-updated";

// Rooms are opaque to the transport collaborator; it only ever sees the
// strings produced here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Scope {
    User(Uuid),
    Match(Uuid),
    League(Uuid),
    Global,
}

impl Scope {
    pub(crate) fn room(&self) -> String {
        match self {
            Self::User(id) => format!("user:{id}"),
            Self::Match(id) => format!("match:{id}"),
            Self::League(id) => format!("league:{id}"),
            Self::Global => "global".to_string(),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub(crate) struct FanoutEvent {
    pub(crate) event: String,
    pub(crate) payload: serde_json::Value,
}

pub(crate) struct Fanout {
    rooms: DashMap<String, broadcast::Sender<FanoutEvent>>,
    capacity: usize,
}

impl Fanout {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            rooms: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    pub(crate) fn subscribe(&self, scope: &Scope) -> broadcast::Receiver<FanoutEvent> {
        self.rooms
            .entry(scope.room())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    // Fire-and-forget: a publish must never fail the state change that
    // triggered it.
    pub(crate) fn publish(&self, scope: &Scope, event: &str, payload: serde_json::Value) {
        let room = scope.room();
        let Some(tx) = self.rooms.get(&room) else {
            tracing::debug!("fanout skipped room={room} event={event} (no room)");
            return;
        };
        let msg = FanoutEvent {
            event: event.to_string(),
            payload,
        };
        match tx.send(msg) {
            Ok(receivers) => {
                tracing::debug!("fanout delivered room={room} event={event} receivers={receivers}")
            }
            Err(_) => {
                tracing::warn!("fanout dropped room={room} event={event} (no receivers)")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scope_room_strings() {
        let id = Uuid::nil();
        assert_eq!(
            Scope::User(id).room(),
            "user:00000000-0000-0000-0000-000000000000"
        );
        assert_eq!(
            Scope::Match(id).room(),
            "match:00000000-0000-0000-0000-000000000000"
        );
        assert_eq!(
            Scope::League(id).room(),
            "league:00000000-0000-0000-0000-000000000000"
        );
        assert_eq!(Scope::Global.room(), "global");
    }

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let fanout = Fanout::new(8);
        let user = Uuid::new_v4();
        let mut rx = fanout.subscribe(&Scope::User(user));
        fanout.publish(
            &Scope::User(user),
            EVT_POINTS_AWARDED,
            json!({"points": 3}),
        );
        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.event, EVT_POINTS_AWARDED);
        assert_eq!(msg.payload["points"], 3);
    }

    #[tokio::test]
    async fn publish_is_scoped_to_its_room() {
        let fanout = Fanout::new(8);
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let mut rx_a = fanout.subscribe(&Scope::User(a));
        let mut rx_b = fanout.subscribe(&Scope::User(b));
        fanout.publish(&Scope::User(a), EVT_PREDICTION_CONFIRMED, json!({}));
        assert!(rx_a.recv().await.is_ok());
        assert!(matches!(
            rx_b.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn publish_without_subscribers_does_not_panic() {
        let fanout = Fanout::new(8);
        fanout.publish(&Scope::Global, EVT_LEADERBOARD_UPDATED, json!({}));

        // Room exists but the only receiver is gone: still swallowed.
        let rx = fanout.subscribe(&Scope::Global);
        drop(rx);
        fanout.publish(&Scope::Global, EVT_LEADERBOARD_UPDATED, json!({}));
    }
}
