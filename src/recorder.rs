// src/recorder.rs
//
// The Recording Orchestrator: turns a room's live producers into durable
// files, in either of two modes.
//
//   Per-participant — one independent muxer per producer, each writing its
//   own WebM under `<root>/per/<room>/<rec_id>/`.
//
//   Mixed — a single muxer fed by every producer, tiling up to four video
//   streams into a grid and mixing all audio into one MP4 at
//   `<root>/mixed-<rec_id>.mp4`.
//
// Within one recording the ordering is strict: endpoint create → transport
// connect → SDP write → muxer spawn → consumer resume → keyframe request.
// On stop the muxer is signalled first and resources are closed second, so
// the container can be finalized.
//
// ────────────────────────────────────────────────────────────────────────────

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::binder::{bind, BoundInput};
use crate::error::RecordError;
use crate::events::TransitionState;
use crate::filter::build_filter_graph;
use crate::muxer::{self, MuxerSupervisor};
use crate::registry::{
    InputDescriptor, MuxUnit, Recording, RecordingMode, StopSummary,
};
use crate::source::{record_sources, MediaKind, RecordSource};
use crate::AppState;

// ─── Tunables ───────────────────────────────────────────────────────────────

/// At most this many video producers participate in the mixed tiling.
const MAX_TILED_VIDEO: usize = 4;

/// Cadence of the keyframe pump.
const KEYFRAME_INTERVAL: Duration = Duration::from_secs(2);

/// Cadence of the per-recording monitor.
const MONITOR_INTERVAL: Duration = Duration::from_secs(2);

/// Cadence of the registry-wide health sweep.
const HEALTH_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// How long the mixed recorder waits for the muxer's first frame before
/// giving up on a muxer-started timestamp.
const MUXER_START_WAIT: Duration = Duration::from_secs(10);

// ─── Start summary ──────────────────────────────────────────────────────────

/// Result of a successful start.
#[derive(Debug, Clone, Serialize)]
pub struct StartSummary {
    pub rec_id: String,
    pub file_name: String,
    pub path: String,
}

// ─── Metadata document (per-participant) ────────────────────────────────────

#[derive(Debug, Serialize)]
struct RecordingMetadata<'a> {
    recording_id: &'a str,
    room_id: &'a str,
    user: &'a str,
    started_at: DateTime<Utc>,
    ended_at: DateTime<Utc>,
    duration_secs: Option<f64>,
    files: &'a [String],
}

// ─── Shared start helpers ───────────────────────────────────────────────────

fn lookup_room(state: &AppState, room_id: &str) -> Result<Arc<crate::room::Room>, RecordError> {
    let rooms = state.rooms.read().unwrap();
    rooms
        .get(room_id)
        .cloned()
        .ok_or_else(|| RecordError::RouterUnready(room_id.to_string()))
}

async fn ensure_dir(dir: &Path) -> Result<(), RecordError> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(RecordError::OutputUnwritable)
}

/// Bind every consumable source; producers outside the capability set are
/// skipped with a warning.  Any other bind failure closes what was already
/// bound and propagates.
async fn bind_sources(
    state: &AppState,
    sources: &[Arc<dyn RecordSource>],
) -> Result<Vec<BoundInput>, RecordError> {
    let mut bound: Vec<BoundInput> = Vec::with_capacity(sources.len());

    for source in sources {
        match bind(source.clone(), &state.allocator).await {
            Ok(input) => bound.push(input),
            Err(RecordError::RouterCannotConsume { producer_id, mime }) => {
                warn!(
                    producer_id = %producer_id,
                    mime = %mime,
                    "skipping producer: recorder cannot consume"
                );
            }
            Err(e) => {
                release_inputs(state, &bound);
                return Err(e);
            }
        }
    }

    Ok(bound)
}

/// Close consumers and give their ports back; endpoints close on drop.
fn release_inputs(state: &AppState, inputs: &[BoundInput]) {
    for input in inputs {
        input.consumer.close();
        state.allocator.release(input.peer_port);
    }
}

fn describe(input: &BoundInput, sdp_path: &Path) -> InputDescriptor {
    InputDescriptor {
        kind: input.kind(),
        sdp_path: sdp_path.to_path_buf(),
        peer_port: input.peer_port,
        producer_id: input.source.producer_id(),
        peer_id: input.source.peer_id(),
    }
}

// ─── Per-participant start ──────────────────────────────────────────────────

/// Start a per-participant recording: one muxer and one WebM per producer.
pub async fn start_per_participant(
    state: &Arc<AppState>,
    room_id: &str,
    user: &str,
) -> Result<StartSummary, RecordError> {
    let room = lookup_room(state, room_id)?;
    let sources = record_sources(&room);
    if sources.is_empty() {
        return Err(RecordError::NoInputs(room_id.to_string()));
    }

    let rec_id = state.registry.allocate_id();
    state.event_bus.emit(crate::events::RecorderEvent::state_changed(
        &rec_id,
        room_id,
        TransitionState::Starting,
    ));

    let rec_dir = state
        .config
        .record_dir
        .join("per")
        .join(room_id)
        .join(&rec_id);
    ensure_dir(&rec_dir).await?;

    let mut units: Vec<MuxUnit> = Vec::new();
    let mut descriptors: Vec<InputDescriptor> = Vec::new();

    for source in &sources {
        let input = match bind(source.clone(), &state.allocator).await {
            Ok(input) => input,
            Err(RecordError::RouterCannotConsume { producer_id, mime }) => {
                warn!(
                    producer_id = %producer_id,
                    mime = %mime,
                    "skipping producer: recorder cannot consume"
                );
                continue;
            }
            Err(e) => {
                abort_units(state, &mut units).await;
                return Err(e);
            }
        };

        let base = format!(
            "{}-{}-{}",
            input.kind(),
            input.source.peer_id(),
            input.source.producer_id()
        );
        let sdp_path = rec_dir.join(format!("{base}.sdp"));
        let output = rec_dir.join(format!("{base}.webm"));

        let sdp = crate::sdp::synthesize(input.codec(), input.peer_port);
        if let Err(e) = tokio::fs::write(&sdp_path, sdp).await {
            release_inputs(state, &[input]);
            abort_units(state, &mut units).await;
            return Err(RecordError::OutputUnwritable(e));
        }

        let args = muxer::per_participant_args(&sdp_path, input.kind(), &output);
        let supervisor = match MuxerSupervisor::spawn(&state.config.ffmpeg_path, &args) {
            Ok(s) => s,
            Err(e) => {
                release_inputs(state, &[input]);
                abort_units(state, &mut units).await;
                return Err(e);
            }
        };

        // The muxer exists and has its arguments: the consumer may flow.
        input.consumer.resume(&input.endpoint);
        if input.kind() == MediaKind::Video {
            input.consumer.request_key_frame();
        }

        descriptors.push(describe(&input, &sdp_path));
        units.push(MuxUnit {
            supervisor,
            inputs: vec![input],
            output,
        });
    }

    if units.is_empty() {
        return Err(RecordError::NoInputs(room_id.to_string()));
    }

    let recording = Arc::new(Recording {
        id: rec_id.clone(),
        room_id: room_id.to_string(),
        user: user.to_string(),
        mode: RecordingMode::PerParticipant,
        file_name: rec_id.clone(),
        output_path: rec_dir.clone(),
        sdp_dir: rec_dir.clone(),
        started_at: Utc::now(),
        started_instant: std::time::Instant::now(),
        inputs: descriptors,
        units: tokio::sync::Mutex::new(units),
        muxer_started_at: std::sync::RwLock::new(None),
        timers: CancellationToken::new(),
        stop_result: OnceCell::new(),
    });

    spawn_keyframe_pump(recording.clone());
    spawn_monitor(state.clone(), recording.clone());

    state.registry.insert(recording.clone());
    state.event_bus.emit(crate::events::RecorderEvent::started(
        &rec_id,
        room_id,
        &recording.file_name,
    ));

    info!(
        rec_id = %rec_id,
        room_id = %room_id,
        inputs = recording.inputs.len(),
        dir = %rec_dir.display(),
        "per-participant recording started"
    );

    Ok(StartSummary {
        rec_id,
        file_name: recording.file_name.clone(),
        path: rec_dir.to_string_lossy().into_owned(),
    })
}

/// Tear down partially started units after a mid-start failure.
async fn abort_units(state: &AppState, units: &mut Vec<MuxUnit>) {
    for unit in units.iter_mut() {
        release_inputs(state, &unit.inputs);
        unit.supervisor.request_quit().await;
        unit.supervisor.finish().await;
    }
    units.clear();
}

// ─── Mixed start ────────────────────────────────────────────────────────────

/// Order the mixed recording's inputs: at most four video producers (in
/// enumeration order) followed by every audio producer.
fn select_mixed_sources(sources: &[Arc<dyn RecordSource>]) -> Vec<Arc<dyn RecordSource>> {
    let videos = sources.iter().filter(|s| s.kind() == MediaKind::Video);
    let audios = sources.iter().filter(|s| s.kind() == MediaKind::Audio);

    let dropped = videos.clone().count().saturating_sub(MAX_TILED_VIDEO);
    if dropped > 0 {
        warn!(dropped, "more than {MAX_TILED_VIDEO} video producers; extra ones are ignored");
    }

    videos
        .take(MAX_TILED_VIDEO)
        .chain(audios)
        .cloned()
        .collect()
}

/// Start a mixed recording: every producer into one MP4.
pub async fn start_mixed(
    state: &Arc<AppState>,
    room_id: &str,
    user: &str,
    width: Option<u32>,
    height: Option<u32>,
) -> Result<StartSummary, RecordError> {
    let room = lookup_room(state, room_id)?;
    let sources = record_sources(&room);
    if sources.is_empty() {
        return Err(RecordError::NoInputs(room_id.to_string()));
    }

    let width = width.unwrap_or(state.config.mixed_width);
    let height = height.unwrap_or(state.config.mixed_height);

    let selected = select_mixed_sources(&sources);

    let rec_id = state.registry.allocate_id();
    state.event_bus.emit(crate::events::RecorderEvent::state_changed(
        &rec_id,
        room_id,
        TransitionState::Starting,
    ));

    ensure_dir(&state.config.record_dir).await?;
    let sdp_dir = state.config.record_dir.join("sdp").join(&rec_id);
    ensure_dir(&sdp_dir).await?;

    let bound = bind_sources(state, &selected).await?;
    if bound.is_empty() {
        return Err(RecordError::NoInputs(room_id.to_string()));
    }

    // Write one SDP per input, videos first (the filter graph indexes inputs
    // the same way).
    let mut sdp_paths: Vec<PathBuf> = Vec::with_capacity(bound.len());
    let mut descriptors: Vec<InputDescriptor> = Vec::with_capacity(bound.len());
    for input in &bound {
        let sdp_path = sdp_dir.join(format!(
            "{}-{}.sdp",
            input.kind().tag(),
            input.source.producer_id()
        ));
        let sdp = crate::sdp::synthesize(input.codec(), input.peer_port);
        if let Err(e) = tokio::fs::write(&sdp_path, sdp).await {
            release_inputs(state, &bound);
            return Err(RecordError::OutputUnwritable(e));
        }
        descriptors.push(describe(input, &sdp_path));
        sdp_paths.push(sdp_path);
    }

    let v = bound.iter().filter(|i| i.kind() == MediaKind::Video).count();
    let a = bound.len() - v;
    let graph = build_filter_graph(v, a, width, height);

    let file_name = format!("mixed-{rec_id}.mp4");
    let output = state.config.record_dir.join(&file_name);
    let args = muxer::mixed_args(&sdp_paths, &graph, &output);

    let mut supervisor = match MuxerSupervisor::spawn(&state.config.ffmpeg_path, &args) {
        Ok(s) => s,
        Err(e) => {
            release_inputs(state, &bound);
            return Err(e);
        }
    };

    // The muxer exists and has its arguments: consumers may flow.
    for input in &bound {
        input.consumer.resume(&input.endpoint);
    }
    for input in &bound {
        if input.kind() == MediaKind::Video {
            input.consumer.request_key_frame();
        }
    }

    let started_watch = supervisor.started_watch();

    let recording = Arc::new(Recording {
        id: rec_id.clone(),
        room_id: room_id.to_string(),
        user: user.to_string(),
        mode: RecordingMode::Mixed,
        file_name: file_name.clone(),
        output_path: output.clone(),
        sdp_dir,
        started_at: Utc::now(),
        started_instant: std::time::Instant::now(),
        inputs: descriptors,
        units: tokio::sync::Mutex::new(vec![MuxUnit {
            supervisor,
            inputs: bound,
            output: output.clone(),
        }]),
        muxer_started_at: std::sync::RwLock::new(None),
        timers: CancellationToken::new(),
        stop_result: OnceCell::new(),
    });

    spawn_started_watcher(recording.clone(), started_watch);
    spawn_keyframe_pump(recording.clone());
    spawn_monitor(state.clone(), recording.clone());

    state.registry.insert(recording.clone());
    state.event_bus.emit(crate::events::RecorderEvent::started(
        &rec_id,
        room_id,
        &file_name,
    ));

    info!(
        rec_id = %rec_id,
        room_id = %room_id,
        video_inputs = v,
        audio_inputs = a,
        file = %output.display(),
        "mixed recording started"
    );

    Ok(StartSummary {
        rec_id,
        file_name,
        path: output.to_string_lossy().into_owned(),
    })
}

// ─── Periodic tasks ─────────────────────────────────────────────────────────

/// Record the instant the muxer is first observed processing frames; used
/// for expected-duration reporting on stop.
fn spawn_started_watcher(
    recording: Arc<Recording>,
    mut rx: tokio::sync::watch::Receiver<Option<DateTime<Utc>>>,
) {
    let timers = recording.timers.clone();
    tokio::spawn(async move {
        let waited = tokio::time::timeout(MUXER_START_WAIT, async {
            loop {
                if let Some(at) = *rx.borrow() {
                    return Some(at);
                }
                tokio::select! {
                    _ = timers.cancelled() => return None,
                    changed = rx.changed() => {
                        if changed.is_err() {
                            return None;
                        }
                    }
                }
            }
        })
        .await;

        if let Ok(Some(at)) = waited {
            *recording.muxer_started_at.write().unwrap() = Some(at);
            info!(rec_id = %recording.id, "muxer-started instant recorded");
        }
    });
}

/// Periodically ask every video consumer for an IDR frame so the muxer can
/// keep opening decodable GOPs.
fn spawn_keyframe_pump(recording: Arc<Recording>) {
    let timers = recording.timers.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(KEYFRAME_INTERVAL);
        ticker.tick().await; // swallow the immediate tick; start already requested an IDR
        loop {
            tokio::select! {
                _ = timers.cancelled() => break,
                _ = ticker.tick() => {
                    let units = recording.units.lock().await;
                    for unit in units.iter() {
                        for input in &unit.inputs {
                            if input.kind() == MediaKind::Video {
                                input.consumer.request_key_frame();
                            }
                        }
                    }
                }
            }
        }
    });
}

/// Watch one recording for fatal runtime conditions: every producer gone, or
/// the muxer escalated/crashed.
fn spawn_monitor(state: Arc<AppState>, recording: Arc<Recording>) {
    let timers = recording.timers.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(MONITOR_INTERVAL);
        let mut crash_reported = false;

        loop {
            tokio::select! {
                _ = timers.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let (total, closed, failed_units, unit_count, diag_errors) = {
                let mut units = recording.units.lock().await;
                let mut total = 0usize;
                let mut closed = 0usize;
                let mut failed = 0usize;
                let mut diag_errors = 0u32;
                let count = units.len();
                for unit in units.iter_mut() {
                    if unit.supervisor.has_failed() {
                        failed += 1;
                    }
                    diag_errors += unit.supervisor.error_count();
                    for input in &unit.inputs {
                        total += 1;
                        if input.consumer.source_closed() {
                            closed += 1;
                        }
                    }
                }
                (total, closed, failed, count, diag_errors)
            };

            if failed_units > 0 && !crash_reported {
                crash_reported = true;
                warn!(
                    rec_id = %recording.id,
                    diag_errors,
                    "muxer reported repeated errors or exited unexpectedly"
                );
                state.event_bus.emit(crate::events::RecorderEvent::error(
                    &recording.id,
                    &recording.room_id,
                    "muxer reported repeated errors or exited unexpectedly",
                ));
            }

            let all_inputs_gone = total > 0 && closed == total;
            let all_muxers_dead = unit_count > 0 && failed_units == unit_count;

            if all_inputs_gone || all_muxers_dead {
                let reason = if all_inputs_gone {
                    "all producers closed"
                } else {
                    "muxer failure"
                };
                error!(rec_id = %recording.id, reason, "recording errored, forcing stop");
                state.event_bus.emit(crate::events::RecorderEvent::error(
                    &recording.id,
                    &recording.room_id,
                    reason,
                ));
                let state = state.clone();
                let rec_id = recording.id.clone();
                tokio::spawn(async move {
                    let _ = force_stop(&state, &rec_id).await;
                });
                break;
            }
        }
    });
}

/// Registry-wide health sweep: force-stop recordings past the stale
/// threshold.
pub fn spawn_health_supervisor(state: Arc<AppState>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        info!(
            interval_secs = HEALTH_SWEEP_INTERVAL.as_secs(),
            stale_after_secs = state.config.stale_after_secs,
            "health supervisor started"
        );

        let mut ticker = tokio::time::interval(HEALTH_SWEEP_INTERVAL);
        loop {
            ticker.tick().await;

            for recording in state.registry.list() {
                if recording.elapsed_secs() <= state.config.stale_after_secs {
                    continue;
                }
                let err = RecordError::Timeout(recording.id.clone());
                warn!(
                    rec_id = %recording.id,
                    elapsed_secs = recording.elapsed_secs(),
                    "stale recording detected"
                );
                state.event_bus.emit(crate::events::RecorderEvent::error(
                    &recording.id,
                    &recording.room_id,
                    &err.to_string(),
                ));
                let _ = force_stop(&state, &recording.id).await;
            }
        }
    })
}

// ─── Stop ───────────────────────────────────────────────────────────────────

/// Stop a recording of the expected mode.
///
/// Idempotent while in progress: a second caller awaits and receives the
/// first caller's result.  After completion the entry is gone and a repeat
/// answers `NotFound`.
pub async fn stop_recording(
    state: &Arc<AppState>,
    rec_id: &str,
    expect_mode: RecordingMode,
) -> Result<StopSummary, RecordError> {
    let recording = state
        .registry
        .get(rec_id)
        .filter(|r| r.mode == expect_mode)
        .ok_or_else(|| RecordError::NotFound(rec_id.to_string()))?;

    let summary = recording
        .stop_result
        .get_or_init(|| do_stop(state.clone(), recording.clone()))
        .await
        .clone();

    state.registry.remove(rec_id);
    Ok(summary)
}

/// Stop regardless of mode; used by the monitor and the health sweep.
async fn force_stop(state: &Arc<AppState>, rec_id: &str) -> Result<StopSummary, RecordError> {
    let recording = state
        .registry
        .get(rec_id)
        .ok_or_else(|| RecordError::NotFound(rec_id.to_string()))?;

    let summary = recording
        .stop_result
        .get_or_init(|| do_stop(state.clone(), recording.clone()))
        .await
        .clone();

    state.registry.remove(rec_id);
    Ok(summary)
}

/// The single stop path.  Best-effort throughout: whatever fails, every
/// resource is released before the summary is produced.
async fn do_stop(state: Arc<AppState>, recording: Arc<Recording>) -> StopSummary {
    state.event_bus.emit(crate::events::RecorderEvent::state_changed(
        &recording.id,
        &recording.room_id,
        TransitionState::Stopping,
    ));

    // Minimum-runtime floor: an immediate stop on a mixed recording would
    // produce an empty container.
    if recording.mode == RecordingMode::Mixed {
        let floor = Duration::from_secs(state.config.mixed_min_runtime_secs);
        let elapsed = recording.started_instant.elapsed();
        if elapsed < floor {
            let hold = floor - elapsed;
            info!(
                rec_id = %recording.id,
                hold_ms = hold.as_millis() as u64,
                "holding stop until minimum runtime"
            );
            tokio::time::sleep(hold).await;
        }
    }

    // Periodic timers go first so nothing races the teardown.
    recording.timers.cancel();

    let expected_duration = recording.expected_duration_secs();

    let mut units = recording.units.lock().await;

    // Muxers are asked to finalize before their input disappears.
    futures::future::join_all(units.iter_mut().map(|u| u.supervisor.request_quit())).await;

    // Now starve them: consumers first, then endpoints (closed on drop),
    // and give the port pairs back.
    for unit in units.iter() {
        release_inputs(&state, &unit.inputs);
    }

    futures::future::join_all(units.iter_mut().map(|u| u.supervisor.finish())).await;

    state.event_bus.emit(crate::events::RecorderEvent::state_changed(
        &recording.id,
        &recording.room_id,
        TransitionState::Processing,
    ));

    // Confirm the outputs are readable and collect their durations.
    let outputs: Vec<PathBuf> = units.iter().map(|u| u.output.clone()).collect();
    drop(units);

    let mut files: Vec<String> = Vec::with_capacity(outputs.len());
    let mut duration: Option<f64> = None;
    for output in &outputs {
        files.push(output.to_string_lossy().into_owned());
        if let Some(d) = muxer::probe_duration(&state.config.ffprobe_path, output).await {
            duration = Some(duration.map_or(d, |cur: f64| cur.max(d)));
        }
    }

    let file_exists = match recording.mode {
        RecordingMode::Mixed => tokio::fs::metadata(&recording.output_path).await.is_ok(),
        RecordingMode::PerParticipant => {
            let mut any = false;
            for output in &outputs {
                if tokio::fs::metadata(output).await.is_ok() {
                    any = true;
                    break;
                }
            }
            any
        }
    };

    match recording.mode {
        RecordingMode::Mixed => {
            // The auxiliary SDP directory is only needed while the muxer runs.
            if let Err(e) = tokio::fs::remove_dir_all(&recording.sdp_dir).await {
                warn!(dir = %recording.sdp_dir.display(), "failed to remove sdp dir: {e}");
            }
        }
        RecordingMode::PerParticipant => {
            let metadata = RecordingMetadata {
                recording_id: &recording.id,
                room_id: &recording.room_id,
                user: &recording.user,
                started_at: recording.started_at,
                ended_at: Utc::now(),
                duration_secs: duration,
                files: &files,
            };
            let path = recording.output_path.join("metadata.json");
            match serde_json::to_vec_pretty(&metadata) {
                Ok(bytes) => {
                    if let Err(e) = tokio::fs::write(&path, bytes).await {
                        warn!(path = %path.display(), "failed to write metadata: {e}");
                    }
                }
                Err(e) => warn!("failed to serialize metadata: {e}"),
            }
        }
    }

    // Release the remaining unit state (endpoints close here).
    recording.units.lock().await.clear();

    let summary = StopSummary {
        file_name: recording.file_name.clone(),
        path: recording.output_path.to_string_lossy().into_owned(),
        file_exists,
        duration,
        expected_duration: match recording.mode {
            RecordingMode::Mixed => expected_duration,
            RecordingMode::PerParticipant => None,
        },
        files,
    };

    state.event_bus.emit(crate::events::RecorderEvent::stopped(
        &recording.id,
        &recording.room_id,
        &summary.file_name,
        &summary.path,
        summary.duration,
    ));

    info!(
        rec_id = %recording.id,
        file_exists,
        duration = ?summary.duration,
        "recording stopped"
    );

    summary
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::test_support::FakeSource;

    fn sources(videos: usize, audios: usize) -> Vec<Arc<dyn RecordSource>> {
        let mut list: Vec<Arc<dyn RecordSource>> = Vec::new();
        for i in 0..videos {
            list.push(Arc::new(FakeSource::video(&format!("pv{i}"), &format!("peer{i}"))));
        }
        for i in 0..audios {
            list.push(Arc::new(FakeSource::audio(&format!("pa{i}"), &format!("peer{i}"))));
        }
        list
    }

    #[test]
    fn selection_caps_video_at_four() {
        let selected = select_mixed_sources(&sources(6, 2));
        let v = selected
            .iter()
            .filter(|s| s.kind() == MediaKind::Video)
            .count();
        let a = selected.len() - v;
        assert_eq!(v, 4);
        assert_eq!(a, 2);
        // First four video producers, in enumeration order.
        assert_eq!(selected[0].producer_id(), "pv0");
        assert_eq!(selected[3].producer_id(), "pv3");
    }

    #[test]
    fn selection_keeps_videos_before_audios() {
        let selected = select_mixed_sources(&sources(2, 3));
        let kinds: Vec<MediaKind> = selected.iter().map(|s| s.kind()).collect();
        assert_eq!(
            kinds,
            vec![
                MediaKind::Video,
                MediaKind::Video,
                MediaKind::Audio,
                MediaKind::Audio,
                MediaKind::Audio,
            ]
        );
    }

    #[test]
    fn selection_passes_audio_only_rooms_through() {
        let selected = select_mixed_sources(&sources(0, 1));
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].kind(), MediaKind::Audio);
    }

    #[test]
    fn metadata_document_shape() {
        let files = vec![
            "/files/per/r1/100/video-alice-p1.webm".to_string(),
            "/files/per/r1/100/audio-alice-p2.webm".to_string(),
        ];
        let metadata = RecordingMetadata {
            recording_id: "100",
            room_id: "r1",
            user: "alice",
            started_at: Utc::now(),
            ended_at: Utc::now(),
            duration_secs: Some(8.1),
            files: &files,
        };

        let json = serde_json::to_value(&metadata).unwrap();
        assert_eq!(json["recording_id"], "100");
        assert_eq!(json["room_id"], "r1");
        assert_eq!(json["duration_secs"], 8.1);
        assert_eq!(json["files"].as_array().unwrap().len(), 2);
        assert!(json["started_at"].is_string());
    }
}
