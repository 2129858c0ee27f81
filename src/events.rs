// src/events.rs
//
// Recording lifecycle event bus.
//
// Every observable transition of a recording (started, state change while
// starting/stopping/processing, stopped, errored) is represented as a
// `RecorderEvent`.  A single `EventBus` backed by a `tokio::sync::broadcast`
// channel fans out each event to every consumer: the SSE stream and any
// future in-process listener.
//
// ────────────────────────────────────────────────────────────────────────────

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

// ─── Event types ────────────────────────────────────────────────────────────

/// Canonical event type string, used in JSON payloads and SSE `event:` fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "recordingStarted")]
    RecordingStarted,
    #[serde(rename = "recordingStopped")]
    RecordingStopped,
    #[serde(rename = "recordingStateChanged")]
    RecordingStateChanged,
    #[serde(rename = "recordingError")]
    RecordingError,
}

impl EventType {
    /// Stable string representation used in SSE `event:` fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RecordingStarted => "recordingStarted",
            Self::RecordingStopped => "recordingStopped",
            Self::RecordingStateChanged => "recordingStateChanged",
            Self::RecordingError => "recordingError",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Intermediate states ────────────────────────────────────────────────────

/// Transitional state carried by `recordingStateChanged`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransitionState {
    Starting,
    Stopping,
    Processing,
}

// ─── Event payloads ─────────────────────────────────────────────────────────

/// Attached to `recordingStarted`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartedPayload {
    pub recording_id: String,
    pub room_id: String,
    pub file_name: String,
    /// Unix epoch seconds.
    pub timestamp: u64,
}

/// Attached to `recordingStopped`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoppedPayload {
    pub recording_id: String,
    pub room_id: String,
    pub file_name: String,
    pub path: String,
    pub duration_secs: Option<f64>,
    pub timestamp: u64,
}

/// Attached to `recordingStateChanged`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateChangedPayload {
    pub recording_id: String,
    pub room_id: String,
    pub state: TransitionState,
    pub timestamp: u64,
}

/// Attached to `recordingError`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub recording_id: String,
    pub room_id: String,
    pub message: String,
    pub timestamp: u64,
}

/// Type-safe union of all possible payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventPayload {
    Started(StartedPayload),
    Stopped(StoppedPayload),
    StateChanged(StateChangedPayload),
    Error(ErrorPayload),
}

// ─── The event envelope ─────────────────────────────────────────────────────

/// A fully self-describing event, ready for serialisation.
///
/// ```json
/// {
///   "id":         "evt_a1b2c3d4",
///   "type":       "recordingStarted",
///   "created_at": "2026-02-15T14:22:33.123Z",
///   "data": {
///     "recording_id": "...",
///     "room_id":      "...",
///     "file_name":    "mixed-1760000000000.mp4",
///     "timestamp":    1760000000
///   }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecorderEvent {
    /// Globally unique event identifier (format: `evt_<uuid-v4>`).
    pub id: String,

    /// Event type.
    #[serde(rename = "type")]
    pub event_type: EventType,

    /// ISO-8601 timestamp (UTC).
    pub created_at: DateTime<Utc>,

    /// Type-specific payload.
    pub data: EventPayload,
}

fn now_unix() -> u64 {
    Utc::now().timestamp().max(0) as u64
}

impl RecorderEvent {
    // ── Constructors ────────────────────────────────────────────────────

    /// Build a `recordingStarted` event.
    pub fn started(recording_id: &str, room_id: &str, file_name: &str) -> Self {
        Self::new(
            EventType::RecordingStarted,
            EventPayload::Started(StartedPayload {
                recording_id: recording_id.to_string(),
                room_id: room_id.to_string(),
                file_name: file_name.to_string(),
                timestamp: now_unix(),
            }),
        )
    }

    /// Build a `recordingStopped` event.
    pub fn stopped(
        recording_id: &str,
        room_id: &str,
        file_name: &str,
        path: &str,
        duration_secs: Option<f64>,
    ) -> Self {
        Self::new(
            EventType::RecordingStopped,
            EventPayload::Stopped(StoppedPayload {
                recording_id: recording_id.to_string(),
                room_id: room_id.to_string(),
                file_name: file_name.to_string(),
                path: path.to_string(),
                duration_secs,
                timestamp: now_unix(),
            }),
        )
    }

    /// Build a `recordingStateChanged` event.
    pub fn state_changed(recording_id: &str, room_id: &str, state: TransitionState) -> Self {
        Self::new(
            EventType::RecordingStateChanged,
            EventPayload::StateChanged(StateChangedPayload {
                recording_id: recording_id.to_string(),
                room_id: room_id.to_string(),
                state,
                timestamp: now_unix(),
            }),
        )
    }

    /// Build a `recordingError` event.
    pub fn error(recording_id: &str, room_id: &str, message: &str) -> Self {
        Self::new(
            EventType::RecordingError,
            EventPayload::Error(ErrorPayload {
                recording_id: recording_id.to_string(),
                room_id: room_id.to_string(),
                message: message.to_string(),
                timestamp: now_unix(),
            }),
        )
    }

    // ── Private ─────────────────────────────────────────────────────────

    fn new(event_type: EventType, data: EventPayload) -> Self {
        Self {
            id: format!("evt_{}", uuid::Uuid::new_v4()),
            event_type,
            created_at: Utc::now(),
            data,
        }
    }

    /// Extract the `recording_id` from any payload variant.
    pub fn recording_id(&self) -> &str {
        match &self.data {
            EventPayload::Started(p) => &p.recording_id,
            EventPayload::Stopped(p) => &p.recording_id,
            EventPayload::StateChanged(p) => &p.recording_id,
            EventPayload::Error(p) => &p.recording_id,
        }
    }

    /// Extract the `room_id` from any payload variant.
    pub fn room_id(&self) -> &str {
        match &self.data {
            EventPayload::Started(p) => &p.room_id,
            EventPayload::Stopped(p) => &p.room_id,
            EventPayload::StateChanged(p) => &p.room_id,
            EventPayload::Error(p) => &p.room_id,
        }
    }
}

// ─── EventBus ───────────────────────────────────────────────────────────────

/// Broadcast-based fan-out channel for `RecorderEvent`.
///
/// Capacity is generous (1024 events) -- subscribers that lag more than that
/// will skip events (same semantic as `broadcast::RecvError::Lagged`).
///
/// The bus is **cheap to clone** (interior `Arc`).
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<RecorderEvent>,
}

impl EventBus {
    /// Create a new bus with the default capacity.
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1024);
        Self { tx }
    }

    /// Publish an event.  Returns the number of active subscribers that will
    /// receive it.  Silently succeeds even if there are no subscribers.
    pub fn emit(&self, event: RecorderEvent) -> usize {
        debug!(event_type = %event.event_type, event_id = %event.id, "event emitted");
        // broadcast::send returns Err only if there are 0 receivers, which is
        // perfectly normal when no SSE client is connected.
        self.tx.send(event).unwrap_or(0)
    }

    /// Obtain a new receiver.  Each receiver gets an independent copy of every
    /// event published *after* this call.
    pub fn subscribe(&self) -> broadcast::Receiver<RecorderEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_type_serialization() {
        let json = serde_json::to_string(&EventType::RecordingStarted).unwrap();
        assert_eq!(json, "\"recordingStarted\"");

        let parsed: EventType = serde_json::from_str("\"recordingError\"").unwrap();
        assert_eq!(parsed, EventType::RecordingError);
    }

    #[test]
    fn state_serialization() {
        let json = serde_json::to_string(&TransitionState::Stopping).unwrap();
        assert_eq!(json, "\"stopping\"");
    }

    #[test]
    fn event_envelope_json() {
        let evt = RecorderEvent::started("1700000000000", "room-1", "mixed-1700000000000.mp4");
        let json = serde_json::to_string_pretty(&evt).unwrap();
        assert!(json.contains("\"type\": \"recordingStarted\""));
        assert!(json.contains("\"recording_id\": \"1700000000000\""));
        assert!(json.contains("\"room_id\": \"room-1\""));
        assert!(evt.id.starts_with("evt_"));
    }

    #[tokio::test]
    async fn bus_fanout() {
        let bus = EventBus::new();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        let evt = RecorderEvent::error("rec-1", "r1", "muxer crashed");
        let n = bus.emit(evt.clone());
        assert_eq!(n, 2);

        let e1 = rx1.recv().await.unwrap();
        let e2 = rx2.recv().await.unwrap();
        assert_eq!(e1.id, e2.id);
    }

    #[test]
    fn id_extraction() {
        let e = RecorderEvent::state_changed("rec-42", "room-7", TransitionState::Starting);
        assert_eq!(e.recording_id(), "rec-42");
        assert_eq!(e.room_id(), "room-7");

        let e = RecorderEvent::stopped("rec-9", "room-1", "f.webm", "/tmp/f.webm", Some(9.5));
        assert_eq!(e.recording_id(), "rec-9");
    }
}
