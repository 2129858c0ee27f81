use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

// ─── Domain errors ──────────────────────────────────────────────────────────

/// Everything that can go wrong while starting, running, or stopping a
/// recording.
///
/// Start-time variants are reported synchronously and leave no registry
/// entry.  Runtime variants transition the recording to a terminal state and
/// surface once as a `recordingError` event.
#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    /// The room has no router state yet (nobody has published).
    #[error("room '{0}' has no active router")]
    RouterUnready(String),

    /// The room exists but exposes zero usable producers.
    #[error("room '{0}' has no producers to record")]
    NoInputs(String),

    /// A single producer's codec is outside the recorder's capability set.
    /// Callers skip the producer rather than failing the recording.
    #[error("producer '{producer_id}' codec {mime} cannot be consumed")]
    RouterCannotConsume { producer_id: String, mime: String },

    /// No free loopback UDP port pair after the bounded retry count.
    #[error("no free loopback port pair in {min}-{max} after {attempts} attempts")]
    ResourceExhaustion { min: u16, max: u16, attempts: u32 },

    /// The loopback receive endpoint could not be created.
    #[error("failed to create loopback endpoint: {0}")]
    TransportCreate(std::io::Error),

    /// The loopback endpoint could not be pointed at its peer port.
    #[error("failed to connect loopback endpoint: {0}")]
    TransportConnect(std::io::Error),

    /// The muxer subprocess could not be started.
    #[error("failed to spawn muxer: {0}")]
    MuxerSpawnFailed(std::io::Error),

    /// The muxer exited non-zero before a stop was requested.
    #[error("muxer exited unexpectedly (status {status:?})")]
    MuxerCrash { status: Option<i32> },

    /// The output directory could not be created or written.
    #[error("output directory not writable: {0}")]
    OutputUnwritable(std::io::Error),

    /// Stop or status for a recording id the registry does not know.
    #[error("recording '{0}' not found")]
    NotFound(String),

    /// The health sweep found a recording past the stale threshold.
    #[error("recording '{0}' exceeded the stale threshold")]
    Timeout(String),
}

impl RecordError {
    /// Stable machine-readable code, used in the JSON error envelope and in
    /// `recordingError` event payloads.
    pub fn code(&self) -> &'static str {
        match self {
            Self::RouterUnready(_) => "router_unready",
            Self::NoInputs(_) => "no_inputs",
            Self::RouterCannotConsume { .. } => "router_cannot_consume",
            Self::ResourceExhaustion { .. } => "resource_exhaustion",
            Self::TransportCreate(_) => "transport_create",
            Self::TransportConnect(_) => "transport_connect",
            Self::MuxerSpawnFailed(_) => "muxer_spawn_failed",
            Self::MuxerCrash { .. } => "muxer_crash",
            Self::OutputUnwritable(_) => "output_unwritable",
            Self::NotFound(_) => "not_found",
            Self::Timeout(_) => "timeout",
        }
    }
}

// ─── JSON envelope ──────────────────────────────────────────────────────────

#[derive(Serialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
    status: u16,
}

// ─── ApiError ───────────────────────────────────────────────────────────────

/// Structured API error that serializes to JSON.
///
/// ```json
/// {
///   "error": {
///     "code": "no_inputs",
///     "message": "room 'abc123' has no producers to record",
///     "status": 400
///   }
/// }
/// ```
pub struct ApiError {
    pub code: &'static str,
    pub message: String,
    pub status: StatusCode,
}

impl ApiError {
    /// 404 Not Found with a custom message.
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self {
            code: "not_found",
            message: msg.into(),
            status: StatusCode::NOT_FOUND,
        }
    }

    /// 400 Bad Request with a custom message.
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self {
            code: "bad_request",
            message: msg.into(),
            status: StatusCode::BAD_REQUEST,
        }
    }

    /// 500 Internal Server Error with a custom message.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self {
            code: "internal_server_error",
            message: msg.into(),
            status: StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// 404 — the requested room does not exist.
    pub fn room_not_found(room_id: &str) -> Self {
        Self {
            code: "room_not_found",
            message: format!("Room '{room_id}' does not exist."),
            status: StatusCode::NOT_FOUND,
        }
    }

    /// 400 — the SDP offer is invalid or could not be parsed.
    pub fn invalid_sdp() -> Self {
        Self {
            code: "invalid_sdp",
            message: "The provided SDP is invalid or could not be parsed.".into(),
            status: StatusCode::BAD_REQUEST,
        }
    }

    /// 500 — the WebRTC peer connection could not be established.
    pub fn peer_connection_failed() -> Self {
        Self {
            code: "peer_connection_failed",
            message: "Failed to establish the WebRTC peer connection.".into(),
            status: StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

// ─── RecordError → ApiError dispositions ────────────────────────────────────

impl From<RecordError> for ApiError {
    fn from(err: RecordError) -> Self {
        let status = match &err {
            RecordError::RouterUnready(_) | RecordError::NoInputs(_) => StatusCode::BAD_REQUEST,
            RecordError::NotFound(_) => StatusCode::NOT_FOUND,
            RecordError::ResourceExhaustion { .. } => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            code: err.code(),
            message: err.to_string(),
            status,
        }
    }
}

// ─── IntoResponse ───────────────────────────────────────────────────────────

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        // Log according to severity.
        if self.status.is_server_error() {
            tracing::error!(
                code = self.code,
                status = self.status.as_u16(),
                "{}",
                self.message
            );
        } else if self.status.is_client_error() {
            tracing::warn!(
                code = self.code,
                status = self.status.as_u16(),
                "{}",
                self.message
            );
        }

        let envelope = ErrorEnvelope {
            error: ErrorBody {
                code: self.code,
                message: self.message,
                status: self.status.as_u16(),
            },
        };

        (self.status, Json(envelope)).into_response()
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use axum::response::IntoResponse;

    /// Helper: convert an `ApiError` into its JSON body string.
    async fn body_string(err: ApiError) -> String {
        let response = err.into_response();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn json_structure() {
        let json = body_string(RecordError::NoInputs("abc123".into()).into()).await;
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["error"]["code"], "no_inputs");
        assert!(value["error"]["message"]
            .as_str()
            .unwrap()
            .contains("abc123"));
        assert_eq!(value["error"]["status"], 400);
    }

    #[tokio::test]
    async fn start_time_errors_are_client_errors() {
        let err: ApiError = RecordError::RouterUnready("r1".into()).into();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);

        let err: ApiError = RecordError::NoInputs("r1".into()).into();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn not_found_maps_to_404() {
        let err: ApiError = RecordError::NotFound("rec-1".into()).into();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
        assert_eq!(err.code, "not_found");
    }

    #[tokio::test]
    async fn resource_exhaustion_maps_to_503() {
        let err: ApiError = RecordError::ResourceExhaustion {
            min: 15000,
            max: 55000,
            attempts: 50,
        }
        .into();
        assert_eq!(err.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(err.code, "resource_exhaustion");
    }

    #[test]
    fn codes_are_stable() {
        assert_eq!(
            RecordError::MuxerCrash { status: Some(1) }.code(),
            "muxer_crash"
        );
        assert_eq!(RecordError::Timeout("x".into()).code(), "timeout");
    }
}
