// src/source.rs
//
// The seam between the live SFU state and the recording orchestrator.
//
// The orchestrator never touches `Publisher` or the peer connection directly;
// it sees producers through the object-safe `RecordSource` trait.  That keeps
// the binder, the recorders and the keyframe pump testable against an
// in-memory fake that feeds synthetic RTP.
//
// ────────────────────────────────────────────────────────────────────────────

use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::warn;
use webrtc::rtcp::payload_feedbacks::picture_loss_indication::PictureLossIndication;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecParameters;

use crate::room::{Publisher, Room};

// ─── Media kind ─────────────────────────────────────────────────────────────

/// Producer/consumer media kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Video => "video",
        }
    }

    /// One-letter tag used in auxiliary SDP file names (`v-…`, `a-…`).
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Audio => "a",
            Self::Video => "v",
        }
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Negotiated codec ───────────────────────────────────────────────────────

/// The consumer-side negotiated codec of one recording input.
///
/// Carries exactly what the SDP synthesizer and the muxer need: payload type,
/// codec name, clock rate, channel count (audio) and the raw `fmtp` string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RtpCodec {
    Video {
        payload_type: u8,
        name: String,
        clock_rate: u32,
        fmtp: Option<String>,
    },
    Audio {
        payload_type: u8,
        name: String,
        clock_rate: u32,
        channels: u16,
        fmtp: Option<String>,
    },
}

impl RtpCodec {
    /// Extract the codec from a consumer's negotiated RTP parameters.
    ///
    /// Returns `None` when the mime type does not look like `kind/NAME`.
    pub fn from_parameters(kind: MediaKind, params: &RTCRtpCodecParameters) -> Option<Self> {
        let cap = &params.capability;
        let name = cap.mime_type.split('/').nth(1)?.to_string();
        let fmtp = if cap.sdp_fmtp_line.is_empty() {
            None
        } else {
            Some(cap.sdp_fmtp_line.clone())
        };

        Some(match kind {
            MediaKind::Video => RtpCodec::Video {
                payload_type: params.payload_type,
                name,
                clock_rate: cap.clock_rate,
                fmtp,
            },
            MediaKind::Audio => RtpCodec::Audio {
                payload_type: params.payload_type,
                name,
                clock_rate: cap.clock_rate,
                // Opus is always signalled as 2 channels; default when the
                // capability leaves it unset.
                channels: if cap.channels == 0 { 2 } else { cap.channels },
                fmtp,
            },
        })
    }

    pub fn kind(&self) -> MediaKind {
        match self {
            Self::Video { .. } => MediaKind::Video,
            Self::Audio { .. } => MediaKind::Audio,
        }
    }

    pub fn payload_type(&self) -> u8 {
        match self {
            Self::Video { payload_type, .. } | Self::Audio { payload_type, .. } => *payload_type,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Video { name, .. } | Self::Audio { name, .. } => name,
        }
    }

    pub fn clock_rate(&self) -> u32 {
        match self {
            Self::Video { clock_rate, .. } | Self::Audio { clock_rate, .. } => *clock_rate,
        }
    }

    pub fn fmtp(&self) -> Option<&str> {
        match self {
            Self::Video { fmtp, .. } | Self::Audio { fmtp, .. } => fmtp.as_deref(),
        }
    }
}

// ─── Recorder capabilities ──────────────────────────────────────────────────

/// Codec names the external muxer can ingest from an SDP-described RTP
/// session.  A producer outside this set is skipped with a warning rather
/// than failing the whole recording.
const VIDEO_CODECS: &[&str] = &["VP8", "VP9", "H264"];
const AUDIO_CODECS: &[&str] = &["opus", "PCMU", "PCMA", "G722"];

/// Whether the recorder can consume the given negotiated codec.
pub fn can_ingest(codec: &RtpCodec) -> bool {
    let list = match codec.kind() {
        MediaKind::Video => VIDEO_CODECS,
        MediaKind::Audio => AUDIO_CODECS,
    };
    list.iter().any(|c| c.eq_ignore_ascii_case(codec.name()))
}

// ─── RecordSource ───────────────────────────────────────────────────────────

/// One recordable producer as seen by the orchestrator.
///
/// Implemented by `ProducerHandle` over live publisher tracks and by test
/// fakes.  All methods are synchronous snapshots; `request_key_frame` is
/// fire-and-forget.
pub trait RecordSource: Send + Sync {
    /// Stable producer identifier (unique per track).
    fn producer_id(&self) -> String;

    /// Peer the producer belongs to.
    fn peer_id(&self) -> String;

    fn kind(&self) -> MediaKind;

    /// The consumer-assigned negotiated codec, once RTP has been observed.
    fn codec(&self) -> Option<RtpCodec>;

    /// Independent copy of the producer's RTP stream.
    fn subscribe(&self) -> broadcast::Receiver<webrtc::rtp::packet::Packet>;

    /// Ask the producer to emit an IDR frame.  No-op for audio.
    fn request_key_frame(&self);

    /// Whether the producer has terminated.
    fn is_closed(&self) -> bool;
}

// ─── ProducerHandle — RecordSource over a live publisher track ──────────────

/// Adapter exposing one track of a `Publisher` as a `RecordSource`.
pub struct ProducerHandle {
    publisher: Arc<Publisher>,
    kind: MediaKind,
    producer_id: String,
}

impl ProducerHandle {
    fn new(publisher: Arc<Publisher>, kind: MediaKind, producer_id: String) -> Self {
        Self {
            publisher,
            kind,
            producer_id,
        }
    }
}

impl RecordSource for ProducerHandle {
    fn producer_id(&self) -> String {
        self.producer_id.clone()
    }

    fn peer_id(&self) -> String {
        self.publisher.peer_id.clone()
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn codec(&self) -> Option<RtpCodec> {
        let params = match self.kind {
            MediaKind::Video => self.publisher.video_params.read().unwrap().clone(),
            MediaKind::Audio => self.publisher.audio_params.read().unwrap().clone(),
        };
        params.and_then(|p| RtpCodec::from_parameters(self.kind, &p))
    }

    fn subscribe(&self) -> broadcast::Receiver<webrtc::rtp::packet::Packet> {
        match self.kind {
            MediaKind::Video => self.publisher.video_tx.subscribe(),
            MediaKind::Audio => self.publisher.audio_tx.subscribe(),
        }
    }

    fn request_key_frame(&self) {
        if self.kind != MediaKind::Video {
            return;
        }
        let ssrc = self.publisher.video_ssrc.load(Ordering::Relaxed);
        if ssrc == 0 {
            return;
        }
        let pc = self.publisher.pc.clone();
        let peer_id = self.publisher.peer_id.clone();
        tokio::spawn(async move {
            let pli = PictureLossIndication {
                sender_ssrc: 0,
                media_ssrc: ssrc as u32,
            };
            if let Err(e) = pc.write_rtcp(&[Box::new(pli)]).await {
                warn!("PLI send error for publisher '{peer_id}': {e}");
            }
        });
    }

    fn is_closed(&self) -> bool {
        self.publisher.is_closed()
    }
}

// ─── Source enumeration ─────────────────────────────────────────────────────

/// Enumerate every recordable producer of a room, in stable order
/// (publishers sorted by peer id; video before audio within a publisher).
pub fn record_sources(room: &Room) -> Vec<Arc<dyn RecordSource>> {
    let mut sources: Vec<Arc<dyn RecordSource>> = Vec::new();

    for publisher in room.get_publishers() {
        if publisher.is_closed() {
            continue;
        }
        let video_id = publisher.video_producer_id.read().unwrap().clone();
        if let Some(id) = video_id {
            sources.push(Arc::new(ProducerHandle::new(
                publisher.clone(),
                MediaKind::Video,
                id,
            )));
        }
        let audio_id = publisher.audio_producer_id.read().unwrap().clone();
        if let Some(id) = audio_id {
            sources.push(Arc::new(ProducerHandle::new(
                publisher.clone(),
                MediaKind::Audio,
                id,
            )));
        }
    }

    sources
}

// ─── Test support ───────────────────────────────────────────────────────────

#[cfg(test)]
pub mod test_support {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::sync::atomic::AtomicU32;

    /// In-memory `RecordSource` fed by hand from tests.
    pub struct FakeSource {
        pub producer_id: String,
        pub peer_id: String,
        pub kind: MediaKind,
        pub codec: Option<RtpCodec>,
        pub tx: broadcast::Sender<webrtc::rtp::packet::Packet>,
        pub closed: AtomicBool,
        pub key_frame_requests: AtomicU32,
    }

    impl FakeSource {
        pub fn video(producer_id: &str, peer_id: &str) -> Self {
            Self {
                producer_id: producer_id.to_string(),
                peer_id: peer_id.to_string(),
                kind: MediaKind::Video,
                codec: Some(RtpCodec::Video {
                    payload_type: 96,
                    name: "VP8".into(),
                    clock_rate: 90000,
                    fmtp: None,
                }),
                tx: broadcast::channel(64).0,
                closed: AtomicBool::new(false),
                key_frame_requests: AtomicU32::new(0),
            }
        }

        pub fn audio(producer_id: &str, peer_id: &str) -> Self {
            Self {
                producer_id: producer_id.to_string(),
                peer_id: peer_id.to_string(),
                kind: MediaKind::Audio,
                codec: Some(RtpCodec::Audio {
                    payload_type: 111,
                    name: "opus".into(),
                    clock_rate: 48000,
                    channels: 2,
                    fmtp: Some("minptime=10;useinbandfec=1".into()),
                }),
                tx: broadcast::channel(64).0,
                closed: AtomicBool::new(false),
                key_frame_requests: AtomicU32::new(0),
            }
        }
    }

    impl RecordSource for FakeSource {
        fn producer_id(&self) -> String {
            self.producer_id.clone()
        }

        fn peer_id(&self) -> String {
            self.peer_id.clone()
        }

        fn kind(&self) -> MediaKind {
            self.kind
        }

        fn codec(&self) -> Option<RtpCodec> {
            self.codec.clone()
        }

        fn subscribe(&self) -> broadcast::Receiver<webrtc::rtp::packet::Packet> {
            self.tx.subscribe()
        }

        fn request_key_frame(&self) {
            self.key_frame_requests.fetch_add(1, Ordering::Relaxed);
        }

        fn is_closed(&self) -> bool {
            self.closed.load(Ordering::Relaxed)
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;

    fn params(mime: &str, clock_rate: u32, channels: u16, fmtp: &str, pt: u8) -> RTCRtpCodecParameters {
        RTCRtpCodecParameters {
            capability: RTCRtpCodecCapability {
                mime_type: mime.to_string(),
                clock_rate,
                channels,
                sdp_fmtp_line: fmtp.to_string(),
                ..Default::default()
            },
            payload_type: pt,
            ..Default::default()
        }
    }

    #[test]
    fn video_codec_extraction() {
        let p = params("video/VP8", 90000, 0, "", 96);
        let codec = RtpCodec::from_parameters(MediaKind::Video, &p).unwrap();
        assert_eq!(codec.payload_type(), 96);
        assert_eq!(codec.name(), "VP8");
        assert_eq!(codec.clock_rate(), 90000);
        assert_eq!(codec.fmtp(), None);
    }

    #[test]
    fn audio_codec_defaults_to_two_channels() {
        let p = params("audio/opus", 48000, 0, "minptime=10;useinbandfec=1", 111);
        let codec = RtpCodec::from_parameters(MediaKind::Audio, &p).unwrap();
        match codec {
            RtpCodec::Audio { channels, ref fmtp, .. } => {
                assert_eq!(channels, 2);
                assert_eq!(fmtp.as_deref(), Some("minptime=10;useinbandfec=1"));
            }
            _ => panic!("expected audio codec"),
        }
    }

    #[test]
    fn malformed_mime_is_rejected() {
        let p = params("VP8", 90000, 0, "", 96);
        assert!(RtpCodec::from_parameters(MediaKind::Video, &p).is_none());
    }

    #[test]
    fn capability_set() {
        let vp8 = RtpCodec::Video {
            payload_type: 96,
            name: "VP8".into(),
            clock_rate: 90000,
            fmtp: None,
        };
        assert!(can_ingest(&vp8));

        let opus = RtpCodec::Audio {
            payload_type: 111,
            name: "OPUS".into(),
            clock_rate: 48000,
            channels: 2,
            fmtp: None,
        };
        // Case-insensitive match.
        assert!(can_ingest(&opus));

        let av1 = RtpCodec::Video {
            payload_type: 45,
            name: "AV1".into(),
            clock_rate: 90000,
            fmtp: None,
        };
        assert!(!can_ingest(&av1));
    }
}
