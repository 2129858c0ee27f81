// src/filter.rs
//
// Filter-graph construction for the mixed recorder.
//
// Building the graph is a pure function of (video count, audio count, frame
// width, frame height) so the exact text handed to the muxer can be
// snapshot-tested.  Inputs are indexed with all video SDPs first, then all
// audio SDPs — the mixed recorder orders its `-i` arguments the same way.
//
// ────────────────────────────────────────────────────────────────────────────

/// Normalized frame rate of every composed cell and of the mixed output.
/// The output GOP length equals this value (one keyframe per second).
pub const FRAME_RATE: u32 = 30;

/// A composed filter graph plus the labels the muxer should map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterGraph {
    /// The full `-filter_complex` expression.
    pub filter_complex: String,
    /// Label of the composed video stream, when there is video.
    pub video_label: Option<String>,
    /// Label of the mixed audio stream, when there is audio.
    pub audio_label: Option<String>,
}

/// Grid geometry for `v` tiled video inputs: (rows, cols).
///
/// At most four inputs participate in the tiling; with three, one cell stays
/// black.
fn grid(v: usize) -> (u32, u32) {
    match v {
        1 => (1, 1),
        2 => (1, 2),
        _ => (2, 2),
    }
}

/// Build the tiling/mixing graph for `v` video and `a` audio inputs at a
/// target frame of `w`×`h`.
///
/// `v` must be at most 4 (the mixed recorder selects the first four video
/// producers); `v + a` must be at least 1.
pub fn build_filter_graph(v: usize, a: usize, w: u32, h: u32) -> FilterGraph {
    debug_assert!(v <= 4, "mixed recorder tiles at most four video inputs");

    let mut chains: Vec<String> = Vec::new();
    let mut video_label = None;
    let mut audio_label = None;

    if v > 0 {
        let (rows, cols) = grid(v);
        let cell_w = w / cols;
        let cell_h = h / rows;

        // Normalize every input to its cell: fit-scale, pad with black,
        // fixed frame rate, square pixels, planar 4:2:0.
        for i in 0..v {
            let out = if v == 1 {
                "vout".to_string()
            } else {
                format!("v{i}")
            };
            chains.push(format!(
                "[{i}:v]scale={cell_w}:{cell_h}:force_original_aspect_ratio=decrease,\
                 pad={cell_w}:{cell_h}:(ow-iw)/2:(oh-ih)/2:color=black,\
                 fps={FRAME_RATE},setsar=1,format=yuv420p[{out}]"
            ));
        }

        if v > 1 {
            // Row-major cell placement: cell k sits at (k % cols, k / cols).
            let layout: Vec<String> = (0..v)
                .map(|k| {
                    let x = (k as u32 % cols) * cell_w;
                    let y = (k as u32 / cols) * cell_h;
                    format!("{x}_{y}")
                })
                .collect();

            let inputs: String = (0..v).map(|i| format!("[v{i}]")).collect();
            let fill = if (v as u32) < rows * cols {
                ":fill=black"
            } else {
                ""
            };
            chains.push(format!(
                "{inputs}xstack=inputs={v}:layout={}{fill}[vout]",
                layout.join("|")
            ));
        }

        video_label = Some("vout".to_string());
    }

    if a > 0 {
        if a == 1 {
            // Single stream: drift-compensated resample, timestamps re-based
            // to zero.
            chains.push(format!(
                "[{v}:a]aresample=async=1,asetpts=PTS-STARTPTS[aout]"
            ));
        } else {
            for j in 0..a {
                let idx = v + j;
                chains.push(format!("[{idx}:a]aresample=async=1[a{j}]"));
            }
            let inputs: String = (0..a).map(|j| format!("[a{j}]")).collect();
            chains.push(format!(
                "{inputs}amix=inputs={a}:duration=longest,asetpts=PTS-STARTPTS[aout]"
            ));
        }
        audio_label = Some("aout".to_string());
    }

    FilterGraph {
        filter_complex: chains.join(";"),
        video_label,
        audio_label,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
