// src/registry.rs
//
// The Recording entity and the registry mapping recording ids to live state.
//
// The registry is the only structure shared between recordings; mutations are
// entry-insert on start success and entry-delete after stop quiesces, both
// behind a short-lived lock.  Everything per-recording lives inside the
// `Recording` value and is owned by the orchestrator that created it.
//
// ────────────────────────────────────────────────────────────────────────────

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;

use crate::binder::BoundInput;
use crate::muxer::MuxerSupervisor;
use crate::source::MediaKind;

// ─── Mode ───────────────────────────────────────────────────────────────────

/// How the recording's outputs are organized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordingMode {
    /// One muxer and one file per producer.
    PerParticipant,
    /// One muxer fed by every producer, tiling video and mixing audio.
    Mixed,
}

// ─── Input descriptor ───────────────────────────────────────────────────────

/// One recording input, as persisted next to the output.
#[derive(Debug, Clone, Serialize)]
pub struct InputDescriptor {
    pub kind: MediaKind,
    pub sdp_path: PathBuf,
    pub peer_port: u16,
    pub producer_id: String,
    pub peer_id: String,
}

// ─── Muxer unit ─────────────────────────────────────────────────────────────

/// One supervised muxer process together with the inputs that feed it.
///
/// A mixed recording has exactly one unit with N inputs; a per-participant
/// recording has one unit per producer.
pub struct MuxUnit {
    pub supervisor: MuxerSupervisor,
    pub inputs: Vec<BoundInput>,
    pub output: PathBuf,
}

// ─── Stop summary ───────────────────────────────────────────────────────────

/// The result of a completed stop, shared by concurrent stop callers.
#[derive(Debug, Clone, Serialize)]
pub struct StopSummary {
    pub file_name: String,
    pub path: String,
    pub file_exists: bool,
    /// Probed container duration, seconds.
    pub duration: Option<f64>,
    /// Wall-clock between the muxer-started instant and the stop, seconds.
    /// Only reported for mixed recordings.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_duration: Option<f64>,
    /// Every produced file (per-participant mode lists one per producer).
    pub files: Vec<String>,
}

// ─── Recording ──────────────────────────────────────────────────────────────

/// Live state of one recording, owned by its orchestrator.
pub struct Recording {
    pub id: String,
    pub room_id: String,
    pub user: String,
    pub mode: RecordingMode,

    /// Primary output name: the MP4 file for mixed mode, the per-recording
    /// directory for per-participant mode.
    pub file_name: String,
    /// Absolute/relative path of the primary output.
    pub output_path: PathBuf,
    /// Directory holding the auxiliary SDP documents.
    pub sdp_dir: PathBuf,

    pub started_at: DateTime<Utc>,
    pub started_instant: std::time::Instant,

    pub inputs: Vec<InputDescriptor>,
    pub units: tokio::sync::Mutex<Vec<MuxUnit>>,

    /// The moment the (first) muxer was observed processing frames.
    pub muxer_started_at: std::sync::RwLock<Option<DateTime<Utc>>>,

    /// Cancels the keyframe pump and the monitor task.
    pub timers: CancellationToken,

    /// Latch carrying the stop result; concurrent stops share the first
    /// caller's outcome.
    pub stop_result: OnceCell<StopSummary>,
}

impl Recording {
    pub fn elapsed_secs(&self) -> u64 {
        self.started_instant.elapsed().as_secs()
    }

    /// A recording is active until its stop completes.
    pub fn is_active(&self) -> bool {
        self.stop_result.get().is_none()
    }

    /// Seconds since the muxer was first seen processing frames.
    pub fn expected_duration_secs(&self) -> Option<f64> {
        let started = (*self.muxer_started_at.read().unwrap())?;
        let delta = Utc::now().signed_duration_since(started);
        Some((delta.num_milliseconds().max(0) as f64) / 1000.0)
    }

    /// Serialisable snapshot for the status endpoint.
    pub fn status(&self) -> RecordingStatus {
        RecordingStatus {
            recording_id: self.id.clone(),
            room_id: self.room_id.clone(),
            mode: self.mode,
            active: self.is_active(),
            elapsed_secs: self.elapsed_secs(),
            file_name: self.file_name.clone(),
            input_count: self.inputs.len(),
        }
    }
}

/// Serialisable snapshot for API responses.
#[derive(Debug, Clone, Serialize)]
pub struct RecordingStatus {
    pub recording_id: String,
    pub room_id: String,
    pub mode: RecordingMode,
    pub active: bool,
    pub elapsed_secs: u64,
    pub file_name: String,
    pub input_count: usize,
}

// ─── Registry ───────────────────────────────────────────────────────────────

/// Maps recording id → live recording.
///
/// Ids are unix-millisecond values forced strictly monotonic, so a repeated
/// start in the same millisecond still yields a fresh id.
pub struct RecordingRegistry {
    active: std::sync::RwLock<HashMap<String, Arc<Recording>>>,
    last_id_ms: AtomicU64,
}

impl RecordingRegistry {
    pub fn new() -> Self {
        Self {
            active: std::sync::RwLock::new(HashMap::new()),
            last_id_ms: AtomicU64::new(0),
        }
    }

    /// Allocate a fresh recording id.
    pub fn allocate_id(&self) -> String {
        let now = Utc::now().timestamp_millis().max(0) as u64;
        let id = self
            .last_id_ms
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now.max(last + 1))
            })
            .map(|last| now.max(last + 1))
            .unwrap_or(now);
        id.to_string()
    }

    /// Insert on start success.
    pub fn insert(&self, recording: Arc<Recording>) {
        let mut active = self.active.write().unwrap();
        active.insert(recording.id.clone(), recording);
    }

    pub fn get(&self, id: &str) -> Option<Arc<Recording>> {
        let active = self.active.read().unwrap();
        active.get(id).cloned()
    }

    /// Remove after stop quiesces.  Returns the entry if it was present.
    pub fn remove(&self, id: &str) -> Option<Arc<Recording>> {
        let mut active = self.active.write().unwrap();
        active.remove(id)
    }

    /// Snapshot of every live recording.
    pub fn list(&self) -> Vec<Arc<Recording>> {
        let active = self.active.read().unwrap();
        let mut list: Vec<Arc<Recording>> = active.values().cloned().collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        list
    }

    pub fn count(&self) -> usize {
        self.active.read().unwrap().len()
    }
}

impl Default for RecordingRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn blank_recording(id: &str, room: &str, mode: RecordingMode) -> Recording {
        Recording {
            id: id.to_string(),
            room_id: room.to_string(),
            user: "tester".into(),
            mode,
            file_name: format!("mixed-{id}.mp4"),
            output_path: PathBuf::from(format!("/tmp/mixed-{id}.mp4")),
            sdp_dir: PathBuf::from(format!("/tmp/sdp/{id}")),
            started_at: Utc::now(),
            started_instant: std::time::Instant::now(),
            inputs: Vec::new(),
            units: tokio::sync::Mutex::new(Vec::new()),
            muxer_started_at: std::sync::RwLock::new(None),
            timers: CancellationToken::new(),
            stop_result: OnceCell::new(),
        }
    }

    #[test]
    fn ids_are_strictly_monotonic() {
        let registry = RecordingRegistry::new();
        let a: u64 = registry.allocate_id().parse().unwrap();
        let b: u64 = registry.allocate_id().parse().unwrap();
        let c: u64 = registry.allocate_id().parse().unwrap();
        assert!(a < b && b < c);
    }

    #[test]
    fn insert_get_remove() {
        let registry = RecordingRegistry::new();
        let rec = Arc::new(blank_recording("100", "room-1", RecordingMode::Mixed));

        registry.insert(rec.clone());
        assert_eq!(registry.count(), 1);
        assert!(registry.get("100").is_some());

        let removed = registry.remove("100").unwrap();
        assert_eq!(removed.id, "100");
        assert!(registry.get("100").is_none());
        assert!(registry.remove("100").is_none());
    }

    #[test]
    fn concurrent_recordings_are_disjoint() {
        let registry = RecordingRegistry::new();
        registry.insert(Arc::new(blank_recording("1", "room-a", RecordingMode::Mixed)));
        registry.insert(Arc::new(blank_recording(
            "2",
            "room-b",
            RecordingMode::PerParticipant,
        )));

        let list = registry.list();
        assert_eq!(list.len(), 2);
        assert_ne!(list[0].id, list[1].id);
    }

    #[tokio::test]
    async fn stop_latch_flips_active() {
        let rec = blank_recording("55", "room-1", RecordingMode::Mixed);
        assert!(rec.is_active());

        rec.stop_result
            .set(StopSummary {
                file_name: rec.file_name.clone(),
                path: rec.output_path.to_string_lossy().into_owned(),
                file_exists: true,
                duration: Some(6.0),
                expected_duration: Some(6.2),
                files: vec![],
            })
            .unwrap();

        assert!(!rec.is_active());
        let status = rec.status();
        assert!(!status.active);
        assert_eq!(status.input_count, 0);
    }

    #[test]
    fn status_snapshot() {
        let rec = blank_recording("77", "room-9", RecordingMode::PerParticipant);
        let status = rec.status();
        assert_eq!(status.recording_id, "77");
        assert_eq!(status.room_id, "room-9");
        assert!(status.active);
        assert_eq!(status.mode, RecordingMode::PerParticipant);
    }
}
