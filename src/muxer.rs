// src/muxer.rs
//
// Muxer Supervisor — owns one external ffmpeg process per output file.
//
// The supervisor builds the full argument vector, spawns the process with
// piped stdio, watches its diagnostic stream for the first `frame=` line
// (the "processing started" instant used for duration reporting) and for
// error escalation, and drives the graceful-quit ladder on stop:
//
//   1. wait 300 ms in case the process already exited;
//   2. write `q\n` to stdin, close stdin, wait up to 30 s;
//   3. the caller closes consumers and endpoints (starving the input),
//      then `finish()` waits 5 s more;
//   4. kill.
//
// The child is spawned with kill-on-drop so an orphaned supervisor can never
// leak a muxer process.
//
// ────────────────────────────────────────────────────────────────────────────

use chrono::{DateTime, Utc};
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStderr, ChildStdin, Command};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::RecordError;
use crate::filter::{FilterGraph, FRAME_RATE};
use crate::source::MediaKind;

// ─── Timing constants ───────────────────────────────────────────────────────

/// Grace for a process that finished on its own before stop.
const ALREADY_EXITED_WAIT: Duration = Duration::from_millis(300);
/// Wait after the `q` quit command.
const QUIT_WAIT: Duration = Duration::from_secs(30);
/// Wait after input starvation, before the kill.
const STARVE_WAIT: Duration = Duration::from_secs(5);

/// Diagnostic errors tolerated before the recording is escalated to failed.
const ERROR_ESCALATION_THRESHOLD: u32 = 10;

/// Protocols the muxer may touch: SDP files on disk plus loopback RTP.
const PROTOCOL_WHITELIST: &str = "file,crypto,data,udp,rtp";

// ─── Argument vectors ───────────────────────────────────────────────────────

/// Arguments for a per-participant muxer: one SDP input, one re-encoded
/// track, one WebM output.
pub fn per_participant_args(sdp_path: &Path, kind: MediaKind, output: &Path) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "-y".into(),
        "-protocol_whitelist".into(),
        PROTOCOL_WHITELIST.into(),
        "-i".into(),
        sdp_path.to_string_lossy().into_owned(),
    ];

    match kind {
        MediaKind::Video => {
            args.extend(
                [
                    "-map", "0:v:0", "-c:v", "libvpx", "-b:v", "2M", "-pix_fmt", "yuv420p", "-r",
                    "30",
                ]
                .map(String::from),
            );
        }
        MediaKind::Audio => {
            args.extend(["-map", "0:a:0", "-c:a", "libopus", "-b:a", "128k"].map(String::from));
        }
    }

    args.push(output.to_string_lossy().into_owned());
    args
}

/// Arguments for the mixed muxer: N SDP inputs, the tiling/mixing filter
/// graph, H.264 + AAC into a crash-tolerant MP4.
pub fn mixed_args(sdp_paths: &[std::path::PathBuf], graph: &FilterGraph, output: &Path) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "-y".into(),
        "-protocol_whitelist".into(),
        PROTOCOL_WHITELIST.into(),
    ];

    for sdp in sdp_paths {
        args.push("-i".into());
        args.push(sdp.to_string_lossy().into_owned());
    }

    args.push("-filter_complex".into());
    args.push(graph.filter_complex.clone());

    if let Some(label) = &graph.video_label {
        let gop = FRAME_RATE.to_string();
        args.extend(["-map".into(), format!("[{label}]")]);
        args.extend(
            [
                "-c:v",
                "libx264",
                "-profile:v",
                "baseline",
                "-preset",
                "ultrafast",
                "-tune",
                "zerolatency",
                "-pix_fmt",
                "yuv420p",
            ]
            .map(String::from),
        );
        // One keyframe per second, closed GOPs, no B-frames: a truncated
        // file stays decodable from any second boundary.
        args.extend(["-g".into(), gop.clone(), "-keyint_min".into(), gop]);
        args.extend(["-flags", "+cgop", "-sc_threshold", "0", "-bf", "0"].map(String::from));
    }

    if let Some(label) = &graph.audio_label {
        args.extend(["-map".into(), format!("[{label}]")]);
        args.extend(
            ["-c:a", "aac", "-b:a", "128k", "-ar", "48000", "-ac", "2"].map(String::from),
        );
    }

    // faststart for complete files, fragmentation so a crashed recording is
    // still playable up to the last fragment.
    args.extend(["-movflags".into(), "+faststart+frag_keyframe+empty_moov".into()]);

    args.push(output.to_string_lossy().into_owned());
    args
}

// ─── Diagnostic line classification ─────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineClass {
    /// A `frame=…` progress line; the first one marks "processing started".
    Progress,
    /// A line worth a warning; repeated occurrences escalate to failure.
    Error,
    /// Anything else.
    Noise,
}

/// Classify one line of the muxer's diagnostic stream.
pub fn classify_line(line: &str) -> LineClass {
    if line.starts_with("frame=") || line.contains(" frame=") {
        return LineClass::Progress;
    }
    let lower = line.to_ascii_lowercase();
    if lower.contains("error") || line.contains("Invalid argument") || lower.contains("dropping frame")
    {
        return LineClass::Error;
    }
    LineClass::Noise
}

// ─── MuxerSupervisor ────────────────────────────────────────────────────────

/// Handle to one running muxer process.
pub struct MuxerSupervisor {
    child: Child,
    stdin: Option<ChildStdin>,
    started_rx: watch::Receiver<Option<DateTime<Utc>>>,
    error_count: Arc<AtomicU32>,
    failed: Arc<AtomicBool>,
    quit_requested: bool,
}

impl MuxerSupervisor {
    /// Launch the muxer with the given argument vector.
    ///
    /// stdin stays open for the graceful `q` quit; stderr is consumed by a
    /// dedicated reader task.
    pub fn spawn(ffmpeg_path: &str, args: &[String]) -> Result<Self, RecordError> {
        debug!(path = ffmpeg_path, ?args, "spawning muxer");

        let mut child = Command::new(ffmpeg_path)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(RecordError::MuxerSpawnFailed)?;

        let stdin = child.stdin.take();
        let stderr = child.stderr.take();

        let (started_tx, started_rx) = watch::channel(None);
        let error_count = Arc::new(AtomicU32::new(0));
        let failed = Arc::new(AtomicBool::new(false));

        if let Some(stderr) = stderr {
            tokio::spawn(watch_stderr(
                stderr,
                started_tx,
                error_count.clone(),
                failed.clone(),
            ));
        }

        info!(pid = child.id(), "muxer started");

        Ok(Self {
            child,
            stdin,
            started_rx,
            error_count,
            failed,
            quit_requested: false,
        })
    }

    /// Watch channel that flips to `Some` on the first observed frame.
    pub fn started_watch(&self) -> watch::Receiver<Option<DateTime<Utc>>> {
        self.started_rx.clone()
    }

    /// Whether the diagnostic stream escalated past the error threshold, or
    /// the process exited non-zero before any stop was requested.
    pub fn has_failed(&mut self) -> bool {
        if self.failed.load(Ordering::Relaxed) {
            return true;
        }
        if !self.quit_requested {
            if let Ok(Some(status)) = self.child.try_wait() {
                if !status.success() {
                    warn!(code = ?status.code(), "muxer exited non-zero before stop");
                    self.failed.store(true, Ordering::Relaxed);
                    return true;
                }
            }
        }
        false
    }

    /// Number of diagnostic error lines seen so far.
    pub fn error_count(&self) -> u32 {
        self.error_count.load(Ordering::Relaxed)
    }

    /// Steps 1–2 of the stop ladder: brief grace for an already-finished
    /// process, then the `q` quit command.  Returns `true` once the process
    /// has exited.
    pub async fn request_quit(&mut self) -> bool {
        self.quit_requested = true;

        if tokio::time::timeout(ALREADY_EXITED_WAIT, self.child.wait())
            .await
            .is_ok()
        {
            debug!("muxer had already exited");
            return true;
        }

        if let Some(mut stdin) = self.stdin.take() {
            if let Err(e) = stdin.write_all(b"q\n").await {
                warn!("failed to send quit command to muxer: {e}");
            }
            let _ = stdin.shutdown().await;
            // Dropping stdin closes the pipe.
        }

        match tokio::time::timeout(QUIT_WAIT, self.child.wait()).await {
            Ok(status) => {
                info!(status = ?status.as_ref().ok().and_then(|s| s.code()), "muxer quit gracefully");
                true
            }
            Err(_) => {
                warn!("muxer ignored quit command for {QUIT_WAIT:?}");
                false
            }
        }
    }

    /// Step 3–4 of the stop ladder, called after the caller has starved the
    /// muxer of input: a final grace window, then the kill.
    pub async fn finish(&mut self) -> Option<std::process::ExitStatus> {
        if let Ok(status) = tokio::time::timeout(STARVE_WAIT, self.child.wait()).await {
            return status.ok();
        }

        warn!(pid = self.child.id(), "muxer still running after starvation, killing");
        let _ = self.child.start_kill();
        self.child.wait().await.ok()
    }
}

// ─── stderr watcher ─────────────────────────────────────────────────────────

/// Consume the muxer's diagnostic stream.
///
/// ffmpeg terminates progress lines with `\r`, so the stream is split on
/// both CR and LF rather than read line-wise.
async fn watch_stderr(
    mut stderr: ChildStderr,
    started_tx: watch::Sender<Option<DateTime<Utc>>>,
    error_count: Arc<AtomicU32>,
    failed: Arc<AtomicBool>,
) {
    let mut buf = [0u8; 4096];
    let mut line = String::new();

    loop {
        let n = match stderr.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };

        for &byte in &buf[..n] {
            if byte == b'\n' || byte == b'\r' {
                if !line.is_empty() {
                    handle_line(&line, &started_tx, &error_count, &failed);
                    line.clear();
                }
            } else {
                line.push(byte as char);
            }
        }
    }

    if !line.is_empty() {
        handle_line(&line, &started_tx, &error_count, &failed);
    }
}

fn handle_line(
    line: &str,
    started_tx: &watch::Sender<Option<DateTime<Utc>>>,
    error_count: &AtomicU32,
    failed: &AtomicBool,
) {
    match classify_line(line) {
        LineClass::Progress => {
            if started_tx.borrow().is_none() {
                info!("muxer processing started");
                let _ = started_tx.send(Some(Utc::now()));
            }
        }
        LineClass::Error => {
            warn!("muxer: {line}");
            let seen = error_count.fetch_add(1, Ordering::Relaxed) + 1;
            if seen >= ERROR_ESCALATION_THRESHOLD {
                failed.store(true, Ordering::Relaxed);
            }
        }
        LineClass::Noise => {
            debug!("muxer: {line}");
        }
    }
}

// ─── Duration probe ─────────────────────────────────────────────────────────

/// Parse the probe's JSON output into seconds.
pub fn parse_probe_output(stdout: &str) -> Option<f64> {
    let value: serde_json::Value = serde_json::from_str(stdout).ok()?;
    let duration = &value["format"]["duration"];
    duration
        .as_str()
        .and_then(|s| s.parse::<f64>().ok())
        .or_else(|| duration.as_f64())
}

/// Run the probe subprocess on `file` and report its container duration.
///
/// Returns `None` when the file is missing, unreadable, or carries no
/// duration — the stop flow treats that as "file not playable".
pub async fn probe_duration(ffprobe_path: &str, file: &Path) -> Option<f64> {
    let output = Command::new(ffprobe_path)
        .args([
            "-v",
            "error",
            "-show_entries",
            "format=duration",
            "-of",
            "json",
        ])
        .arg(file)
        .stdin(Stdio::null())
        .output()
        .await;

    match output {
        Ok(out) if out.status.success() => {
            parse_probe_output(&String::from_utf8_lossy(&out.stdout))
        }
        Ok(out) => {
            warn!(
                file = %file.display(),
                code = ?out.status.code(),
                "duration probe failed"
            );
            None
        }
        Err(e) => {
            warn!(file = %file.display(), "duration probe could not run: {e}");
            None
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::build_filter_graph;
    use std::path::PathBuf;

    #[test]
    fn per_participant_video_args() {
        let args = per_participant_args(
            Path::new("/tmp/rec/video-alice-p1.sdp"),
            MediaKind::Video,
            Path::new("/tmp/rec/video-alice-p1.webm"),
        );

        // Whitelist precedes the input.
        let wl = args.iter().position(|a| a == "-protocol_whitelist").unwrap();
        let input = args.iter().position(|a| a == "-i").unwrap();
        assert!(wl < input);
        assert_eq!(args[wl + 1], "file,crypto,data,udp,rtp");

        assert!(args.windows(2).any(|w| w == ["-c:v", "libvpx"]));
        assert!(args.windows(2).any(|w| w == ["-b:v", "2M"]));
        assert!(args.windows(2).any(|w| w == ["-pix_fmt", "yuv420p"]));
        assert!(args.windows(2).any(|w| w == ["-r", "30"]));
        assert_eq!(args.last().unwrap(), "/tmp/rec/video-alice-p1.webm");
    }

    #[test]
    fn per_participant_audio_args() {
        let args = per_participant_args(
            Path::new("/tmp/rec/audio-bob-p2.sdp"),
            MediaKind::Audio,
            Path::new("/tmp/rec/audio-bob-p2.webm"),
        );
        assert!(args.windows(2).any(|w| w == ["-c:a", "libopus"]));
        assert!(args.windows(2).any(|w| w == ["-b:a", "128k"]));
        assert!(args.windows(2).any(|w| w == ["-map", "0:a:0"]));
        assert!(!args.iter().any(|a| a == "-c:v"));
    }

    #[test]
    fn mixed_args_cover_all_inputs_and_both_maps() {
        let sdps = vec![
            PathBuf::from("/tmp/sdp/v-p1.sdp"),
            PathBuf::from("/tmp/sdp/v-p2.sdp"),
            PathBuf::from("/tmp/sdp/a-p1.sdp"),
        ];
        let graph = build_filter_graph(2, 1, 1280, 720);
        let args = mixed_args(&sdps, &graph, Path::new("/tmp/mixed-1.mp4"));

        assert_eq!(args.iter().filter(|a| *a == "-i").count(), 3);
        assert!(args.windows(2).any(|w| w == ["-map", "[vout]"]));
        assert!(args.windows(2).any(|w| w == ["-map", "[aout]"]));
        assert!(args.windows(2).any(|w| w == ["-c:v", "libx264"]));
        assert!(args.windows(2).any(|w| w == ["-profile:v", "baseline"]));
        assert!(args.windows(2).any(|w| w == ["-tune", "zerolatency"]));
        assert!(args.windows(2).any(|w| w == ["-g", "30"]));
        assert!(args.windows(2).any(|w| w == ["-bf", "0"]));
        assert!(args.windows(2).any(|w| w == ["-c:a", "aac"]));
        assert!(args.windows(2).any(|w| w == ["-ar", "48000"]));
        assert!(args
            .windows(2)
            .any(|w| w == ["-movflags", "+faststart+frag_keyframe+empty_moov"]));
        assert_eq!(args.last().unwrap(), "/tmp/mixed-1.mp4");
    }

    #[test]
    fn audio_only_mixed_args_have_no_video_encoder() {
        let sdps = vec![PathBuf::from("/tmp/sdp/a-p1.sdp")];
        let graph = build_filter_graph(0, 1, 1280, 720);
        let args = mixed_args(&sdps, &graph, Path::new("/tmp/mixed-2.mp4"));

        assert!(!args.iter().any(|a| a == "-c:v"));
        assert!(args.windows(2).any(|w| w == ["-map", "[aout]"]));
    }

    #[test]
    fn stderr_classification() {
        assert_eq!(
            classify_line("frame=  142 fps= 30 q=28.0 size=     512kB time=00:00:04.73"),
            LineClass::Progress
        );
        assert_eq!(
            classify_line("[rtp @ 0x55] Error parsing packet"),
            LineClass::Error
        );
        assert_eq!(
            classify_line("av_interleaved_write_frame(): Invalid argument"),
            LineClass::Error
        );
        assert_eq!(
            classify_line("[webm @ 0x55] dropping frame with no timestamp"),
            LineClass::Error
        );
        assert_eq!(
            classify_line("Stream #0:0: Video: vp8, yuv420p, 1280x720"),
            LineClass::Noise
        );
    }

    #[test]
    fn probe_output_parsing() {
        let json = r#"{"format":{"duration":"6.024000"}}"#;
        assert_eq!(parse_probe_output(json), Some(6.024));

        let numeric = r#"{"format":{"duration":9.5}}"#;
        assert_eq!(parse_probe_output(numeric), Some(9.5));

        assert_eq!(parse_probe_output(r#"{"format":{}}"#), None);
        assert_eq!(parse_probe_output("not json"), None);
    }
}
