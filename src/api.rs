// src/api.rs
//
// Control surface: start/stop/status for both recording modes.
//
// Handlers translate requests into orchestrator calls and let the
// orchestrator emit the lifecycle events; errors surface through the shared
// `ApiError` JSON envelope.
//
// ────────────────────────────────────────────────────────────────────────────

use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::ApiError;
use crate::recorder;
use crate::registry::{RecordingMode, RecordingStatus, StopSummary};

// ─── DTOs ───────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct StartRecordingRequest {
    pub room: String,
    pub user: String,
}

#[derive(Deserialize)]
pub struct StartMixedRequest {
    pub room: String,
    pub user: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

#[derive(Serialize)]
pub struct StartRecordingResponse {
    pub rec_id: String,
    pub file_name: String,
}

#[derive(Serialize)]
pub struct StartMixedResponse {
    pub rec_id: String,
    pub file_name: String,
    pub path: String,
}

// ─── Per-participant ────────────────────────────────────────────────────────

/// POST /v1/recordings/start
pub async fn start_recording(
    State(state): State<Arc<crate::AppState>>,
    Json(req): Json<StartRecordingRequest>,
) -> Result<Json<StartRecordingResponse>, ApiError> {
    let summary = recorder::start_per_participant(&state, &req.room, &req.user).await?;
    Ok(Json(StartRecordingResponse {
        rec_id: summary.rec_id,
        file_name: summary.file_name,
    }))
}

/// POST /v1/recordings/:rec_id/stop
pub async fn stop_recording(
    State(state): State<Arc<crate::AppState>>,
    Path(rec_id): Path<String>,
) -> Result<Json<StopSummary>, ApiError> {
    let summary =
        recorder::stop_recording(&state, &rec_id, RecordingMode::PerParticipant).await?;
    Ok(Json(summary))
}

// ─── Mixed ──────────────────────────────────────────────────────────────────

/// POST /v1/recordings/mixed/start
pub async fn start_mixed_recording(
    State(state): State<Arc<crate::AppState>>,
    Json(req): Json<StartMixedRequest>,
) -> Result<Json<StartMixedResponse>, ApiError> {
    let summary =
        recorder::start_mixed(&state, &req.room, &req.user, req.width, req.height).await?;
    Ok(Json(StartMixedResponse {
        rec_id: summary.rec_id,
        file_name: summary.file_name,
        path: summary.path,
    }))
}

/// POST /v1/recordings/mixed/:rec_id/stop
pub async fn stop_mixed_recording(
    State(state): State<Arc<crate::AppState>>,
    Path(rec_id): Path<String>,
) -> Result<Json<StopSummary>, ApiError> {
    let summary = recorder::stop_recording(&state, &rec_id, RecordingMode::Mixed).await?;
    Ok(Json(summary))
}

// ─── Status ─────────────────────────────────────────────────────────────────

/// GET /v1/recordings/:rec_id/status
pub async fn recording_status(
    State(state): State<Arc<crate::AppState>>,
    Path(rec_id): Path<String>,
) -> Result<Json<RecordingStatus>, ApiError> {
    let recording = state
        .registry
        .get(&rec_id)
        .ok_or_else(|| ApiError::not_found(format!("Recording '{rec_id}' not found.")))?;
    Ok(Json(recording.status()))
}

/// GET /v1/recordings
pub async fn list_recordings(
    State(state): State<Arc<crate::AppState>>,
) -> Json<Vec<RecordingStatus>> {
    let list = state
        .registry
        .list()
        .iter()
        .map(|r| r.status())
        .collect();
    Json(list)
}
