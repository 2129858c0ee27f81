use std::path::PathBuf;
use tracing::info;

// ---------------------------------------------------------------------------
// Recorder configuration — loaded from environment variables
// ---------------------------------------------------------------------------

/// Complete recorder configuration loaded at startup.
///
/// Every field can be set via an environment variable.  The output directory
/// keeps its historical name `RECORD_FILE_LOCATION_PATH`; everything else is
/// prefixed with `RECORDER_`.  Defaults are suitable for local development.
#[derive(Debug, Clone)]
pub struct Config {
    // ── Network ─────────────────────────────────────────────────────────
    /// Address to bind the control listener to.
    pub bind_addr: String,

    // ── Output ──────────────────────────────────────────────────────────
    /// Root directory for recorded files and auxiliary SDP documents.
    pub record_dir: PathBuf,

    // ── External processes ──────────────────────────────────────────────
    /// Path to the muxer binary.
    pub ffmpeg_path: String,
    /// Path to the duration-probe binary.
    pub ffprobe_path: String,

    // ── Loopback RTP ────────────────────────────────────────────────────
    /// Lower bound of the loopback UDP port range handed to muxers.
    pub rtp_port_min: u16,
    /// Upper bound of the loopback UDP port range.
    pub rtp_port_max: u16,

    // ── Lifecycle ───────────────────────────────────────────────────────
    /// Minimum runtime for a mixed recording; stop requests arriving earlier
    /// are held until this many seconds have elapsed.
    pub mixed_min_runtime_secs: u64,
    /// A recording older than this is force-stopped by the health sweep.
    pub stale_after_secs: u64,

    // ── Mixed composition ───────────────────────────────────────────────
    /// Target frame width of the mixed output.
    pub mixed_width: u32,
    /// Target frame height of the mixed output.
    pub mixed_height: u32,

    // ── CORS ────────────────────────────────────────────────────────────
    pub allowed_origins: String,

    // ── Logging ─────────────────────────────────────────────────────────
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Automatically loads a `.env` file if present (via `dotenvy`).
    pub fn from_env() -> Self {
        // Best-effort .env loading — ignore errors.
        let _ = dotenvy::dotenv();

        let bind_addr = env_or("RECORDER_BIND_ADDR", "0.0.0.0:8085");

        let record_dir = PathBuf::from(env_or("RECORD_FILE_LOCATION_PATH", "./files"));

        let ffmpeg_path = env_or("RECORDER_FFMPEG_PATH", "ffmpeg");
        let ffprobe_path = env_or("RECORDER_FFPROBE_PATH", "ffprobe");

        let rtp_port_min = env_u64("RECORDER_RTP_PORT_MIN", 15000) as u16;
        let rtp_port_max = env_u64("RECORDER_RTP_PORT_MAX", 55000) as u16;

        let mixed_min_runtime_secs = env_u64("RECORDER_MIXED_MIN_RUNTIME_SECS", 5);
        let stale_after_secs = env_u64("RECORDER_STALE_AFTER_SECS", 2 * 60 * 60);

        let mixed_width = env_u64("RECORDER_MIXED_WIDTH", 1280) as u32;
        let mixed_height = env_u64("RECORDER_MIXED_HEIGHT", 720) as u32;

        let allowed_origins = env_or("RECORDER_ALLOWED_ORIGINS", "*");
        let log_level = env_or("RECORDER_LOG_LEVEL", "info");

        let config = Config {
            bind_addr,
            record_dir,
            ffmpeg_path,
            ffprobe_path,
            rtp_port_min,
            rtp_port_max,
            mixed_min_runtime_secs,
            stale_after_secs,
            mixed_width,
            mixed_height,
            allowed_origins,
            log_level,
        };

        config.log_summary();
        config
    }

    fn log_summary(&self) {
        info!("──── Recorder Configuration ────");
        info!("  bind_addr          : {}", self.bind_addr);
        info!("  record_dir         : {}", self.record_dir.display());
        info!("  ffmpeg_path        : {}", self.ffmpeg_path);
        info!("  ffprobe_path       : {}", self.ffprobe_path);
        info!(
            "  rtp_port_range     : {}-{}",
            self.rtp_port_min, self.rtp_port_max
        );
        info!("  mixed_min_runtime  : {}s", self.mixed_min_runtime_secs);
        info!("  stale_after        : {}s", self.stale_after_secs);
        info!(
            "  mixed_frame        : {}x{}",
            self.mixed_width, self.mixed_height
        );
        info!(
            "  cors_origins       : {}",
            if self.allowed_origins == "*" {
                "* (permissive)"
            } else {
                &self.allowed_origins
            }
        );
        info!("  log_level          : {}", self.log_level);
        info!("────────────────────────────────");
    }
}

// ---------------------------------------------------------------------------
// Environment helpers
// ---------------------------------------------------------------------------

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_or_returns_default_when_unset() {
        std::env::remove_var("RECORDER_TEST_MISSING");
        assert_eq!(env_or("RECORDER_TEST_MISSING", "fallback"), "fallback");
    }

    #[test]
    fn env_u64_rejects_garbage() {
        std::env::set_var("RECORDER_TEST_GARBAGE", "not-a-number");
        assert_eq!(env_u64("RECORDER_TEST_GARBAGE", 42), 42);
        std::env::remove_var("RECORDER_TEST_GARBAGE");
    }

    #[test]
    fn env_u64_parses_values() {
        std::env::set_var("RECORDER_TEST_NUM", "9000");
        assert_eq!(env_u64("RECORDER_TEST_NUM", 1), 9000);
        std::env::remove_var("RECORDER_TEST_NUM");
    }
}
