mod api;
mod binder;
mod config;
mod error;
mod events;
mod filter;
mod muxer;
mod ports;
mod recorder;
mod registry;
mod room;
mod sdp;
mod sfu;
mod source;
mod sse;

use axum::{
    extract::State,
    http::{HeaderName, HeaderValue, Method},
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use std::collections::HashMap;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

// ─── AppState ───────────────────────────────────────────────────────────────

pub struct AppState {
    pub rooms: std::sync::RwLock<HashMap<String, Arc<room::Room>>>,
    pub registry: registry::RecordingRegistry,
    pub allocator: ports::PortAllocator,
    pub event_bus: events::EventBus,
    pub config: config::Config,
}

// ─── Health endpoint ────────────────────────────────────────────────────────

async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let rooms_active = state.rooms.read().unwrap().len();
    let recordings_active = state.registry.count();

    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "rooms_active": rooms_active,
        "recordings_active": recordings_active,
        "record_dir": state.config.record_dir.display().to_string(),
    }))
}

// ─── CORS configuration ────────────────────────────────────────────────────

fn build_cors_layer(allowed_origins: &str) -> CorsLayer {
    if allowed_origins == "*" {
        warn!("CORS: permissive mode (allow all origins) — not suitable for production");
        CorsLayer::permissive()
    } else {
        let origins: Vec<HeaderValue> = allowed_origins
            .split(',')
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(|s| s.parse::<HeaderValue>().expect("invalid origin header value"))
            .collect();

        info!("CORS: restricted to {} origin(s)", origins.len());

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([Method::GET, Method::POST])
            .allow_headers([HeaderName::from_static("content-type")])
    }
}

// ─── Entry point ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    // Load .env before anything else so RECORDER_LOG_LEVEL is available.
    let _ = dotenvy::dotenv();

    let log_level = std::env::var("RECORDER_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_level)),
        )
        .init();

    let cfg = config::Config::from_env();

    // The output root must exist and be writable before anything records
    // into it.
    if let Err(e) = std::fs::create_dir_all(&cfg.record_dir) {
        warn!(
            dir = %cfg.record_dir.display(),
            "record directory is not writable: {e}"
        );
    }

    let bind_addr = cfg.bind_addr.clone();
    let allowed_origins = cfg.allowed_origins.clone();

    let state = Arc::new(AppState {
        rooms: std::sync::RwLock::new(HashMap::new()),
        registry: registry::RecordingRegistry::new(),
        allocator: ports::PortAllocator::new(cfg.rtp_port_min, cfg.rtp_port_max),
        event_bus: events::EventBus::new(),
        config: cfg,
    });

    // Stale recordings are force-stopped by a periodic sweep.
    let _health_handle = recorder::spawn_health_supervisor(state.clone());

    let cors = build_cors_layer(&allowed_origins);

    let app = Router::new()
        // Health (no auth required)
        .route("/health", get(health_handler))
        // SFU ingest
        .route("/sfu/publish", post(sfu::sfu_publish))
        .route("/v1/rooms", get(sfu::list_rooms))
        // Recording API
        .route("/v1/recordings", get(api::list_recordings))
        .route("/v1/recordings/start", post(api::start_recording))
        .route("/v1/recordings/:rec_id/stop", post(api::stop_recording))
        .route("/v1/recordings/mixed/start", post(api::start_mixed_recording))
        .route(
            "/v1/recordings/mixed/:rec_id/stop",
            post(api::stop_mixed_recording),
        )
        .route("/v1/recordings/:rec_id/status", get(api::recording_status))
        // Server-Sent Events (real-time lifecycle stream)
        .route("/v1/recordings/events", get(sse::sse_events))
        // Middleware
        .layer(cors)
        .with_state(state);

    info!("rtc-recorder listening on http://{bind_addr}");

    let listener = tokio::net::TcpListener::bind(&bind_addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}
