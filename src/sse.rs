// src/sse.rs
//
// Server-Sent Events endpoint for recording lifecycle events.
//
// ─ Usage ────────────────────────────────────────────────────────────────────
//
//   GET /v1/recordings/events?room_id=<room_id>
//
//   The connection stays open and streams events as they occur in real-time.
//
//   Optional query parameters:
//     room_id   -- filter events to a specific room (omit for all rooms).
//     types     -- comma-separated event types to receive
//                  (e.g. "recordingStarted,recordingStopped").
//
//   Each SSE message has:
//     event: <event_type>       (e.g. "recordingStarted")
//     id:    <event_id>         (e.g. "evt_a1b2c3d4")
//     data:  <json payload>
//
// ────────────────────────────────────────────────────────────────────────────

use axum::{
    extract::{Query, State},
    response::sse::{Event as SseEvent, KeepAlive, Sse},
};
use futures::stream::Stream;
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::events::{EventType, RecorderEvent};

// ─── Query parameters ───────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct SseQuery {
    /// Filter to a specific room.
    pub room_id: Option<String>,

    /// Comma-separated list of event types.
    pub types: Option<String>,
}

impl SseQuery {
    /// Parse the `types` param into a set of `EventType`.
    fn parsed_types(&self) -> Option<Vec<EventType>> {
        self.types.as_ref().map(|s| {
            s.split(',')
                .filter_map(|t| {
                    let trimmed = t.trim();
                    serde_json::from_str::<EventType>(&format!("\"{trimmed}\"")).ok()
                })
                .collect()
        })
    }

    /// Returns `true` if the event matches this query's filters.
    fn matches(&self, event: &RecorderEvent) -> bool {
        if let Some(ref room_id) = self.room_id {
            if event.room_id() != room_id {
                return false;
            }
        }

        if let Some(types) = self.parsed_types() {
            if !types.is_empty() && !types.contains(&event.event_type) {
                return false;
            }
        }

        true
    }
}

// ─── SSE handler ────────────────────────────────────────────────────────────

/// `GET /v1/recordings/events` -- SSE stream of recording lifecycle events.
///
/// The stream emits a heartbeat comment every 15 seconds to keep the
/// connection alive through proxies and load balancers.
pub async fn sse_events(
    State(state): State<Arc<crate::AppState>>,
    Query(query): Query<SseQuery>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let mut rx = state.event_bus.subscribe();

    info!(
        room_id = query.room_id.as_deref().unwrap_or("*"),
        types = query.types.as_deref().unwrap_or("*"),
        "SSE client connected"
    );

    let stream = async_stream::stream! {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if !query.matches(&event) {
                        continue;
                    }

                    let json = match serde_json::to_string(&event) {
                        Ok(j) => j,
                        Err(e) => {
                            warn!("SSE: failed to serialize event: {e}");
                            continue;
                        }
                    };

                    let sse_event = SseEvent::default()
                        .event(event.event_type.as_str())
                        .id(event.id.clone())
                        .data(json);

                    yield Ok(sse_event);
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!("SSE client lagged, skipped {n} events");
                    let warning = SseEvent::default()
                        .event("_warning")
                        .data(format!("{{\"message\":\"lagged, skipped {n} events\"}}"));
                    yield Ok(warning);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                    info!("SSE: event bus closed, ending stream");
                    break;
                }
            }
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("heartbeat"),
    )
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{RecorderEvent, TransitionState};

    #[test]
    fn query_matches_no_filter() {
        let query = SseQuery {
            room_id: None,
            types: None,
        };
        let evt = RecorderEvent::started("1", "room-1", "mixed-1.mp4");
        assert!(query.matches(&evt));
    }

    #[test]
    fn query_matches_room_filter() {
        let query = SseQuery {
            room_id: Some("room-1".to_string()),
            types: None,
        };
        let evt1 = RecorderEvent::started("1", "room-1", "mixed-1.mp4");
        let evt2 = RecorderEvent::started("2", "room-2", "mixed-2.mp4");
        assert!(query.matches(&evt1));
        assert!(!query.matches(&evt2));
    }

    #[test]
    fn query_matches_type_filter() {
        let query = SseQuery {
            room_id: None,
            types: Some("recordingStarted,recordingStopped".to_string()),
        };
        let evt1 = RecorderEvent::started("1", "r", "f.mp4");
        let evt2 = RecorderEvent::state_changed("1", "r", TransitionState::Starting);
        assert!(query.matches(&evt1));
        assert!(!query.matches(&evt2));
    }

    #[test]
    fn query_matches_combined_filters() {
        let query = SseQuery {
            room_id: Some("room-X".to_string()),
            types: Some("recordingError".to_string()),
        };
        let good = RecorderEvent::error("1", "room-X", "boom");
        let wrong_room = RecorderEvent::error("1", "room-Y", "boom");
        let wrong_type = RecorderEvent::started("1", "room-X", "f.mp4");

        assert!(query.matches(&good));
        assert!(!query.matches(&wrong_room));
        assert!(!query.matches(&wrong_type));
    }
}
