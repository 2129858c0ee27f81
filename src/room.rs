use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecParameters;

// ---------------------------------------------------------------------------
// Publisher
// ---------------------------------------------------------------------------

/// A publisher is a peer that sends media into a room.
///
/// Video and audio RTP packets are forwarded through broadcast channels so
/// that every recording consumer can receive an independent copy.  The full
/// negotiated codec parameters (payload type included) are captured from the
/// first RTP packet of each track; a per-track producer id is minted at the
/// same moment so recordings can name their inputs stably.
pub struct Publisher {
    pub peer_id: String,
    pub pc: Arc<RTCPeerConnection>,

    pub video_tx: broadcast::Sender<webrtc::rtp::packet::Packet>,
    pub audio_tx: broadcast::Sender<webrtc::rtp::packet::Packet>,

    pub video_ssrc: AtomicU64,

    pub video_params: std::sync::RwLock<Option<RTCRtpCodecParameters>>,
    pub audio_params: std::sync::RwLock<Option<RTCRtpCodecParameters>>,

    pub video_producer_id: std::sync::RwLock<Option<String>>,
    pub audio_producer_id: std::sync::RwLock<Option<String>>,

    /// Set when the underlying peer connection fails or closes.  Recording
    /// consumers observe this through `RecordSource::is_closed`.
    pub closed: AtomicBool,
}

impl Publisher {
    /// Create a new `Publisher` bound to the given peer connection.
    ///
    /// The broadcast channels are created with capacities of 300 (video) and
    /// 100 (audio) packets -- enough to absorb short consumer stalls without
    /// blocking the publisher.
    pub fn new(peer_id: String, pc: Arc<RTCPeerConnection>) -> Self {
        let (video_tx, _) = broadcast::channel(300);
        let (audio_tx, _) = broadcast::channel(100);
        Publisher {
            peer_id,
            pc,
            video_tx,
            audio_tx,
            video_ssrc: AtomicU64::new(0),
            video_params: std::sync::RwLock::new(None),
            audio_params: std::sync::RwLock::new(None),
            video_producer_id: std::sync::RwLock::new(None),
            audio_producer_id: std::sync::RwLock::new(None),
            closed: AtomicBool::new(false),
        }
    }

    /// Mark this publisher gone; flowing consumers drain and stop.
    pub fn mark_closed(&self) {
        self.closed.store(true, Ordering::Relaxed);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }
}

// ---------------------------------------------------------------------------
// Room
// ---------------------------------------------------------------------------

/// A room groups the publishers whose media can be recorded together.
pub struct Room {
    pub room_id: String,
    pub publishers: std::sync::RwLock<HashMap<String, Arc<Publisher>>>,
    pub created_at: std::time::Instant,
}

impl Room {
    /// Create an empty room.
    pub fn new(room_id: String) -> Self {
        Room {
            room_id,
            publishers: std::sync::RwLock::new(HashMap::new()),
            created_at: std::time::Instant::now(),
        }
    }

    /// Insert a publisher into the room, replacing any previous entry for the
    /// same peer id.
    pub fn add_publisher(&self, publisher: Arc<Publisher>) {
        let mut pubs = self.publishers.write().unwrap();
        pubs.insert(publisher.peer_id.clone(), publisher);
    }

    /// Remove a publisher by its peer id (no-op if absent).
    pub fn remove_publisher(&self, peer_id: &str) {
        let mut pubs = self.publishers.write().unwrap();
        if let Some(publisher) = pubs.remove(peer_id) {
            publisher.mark_closed();
        }
    }

    /// Snapshot of every publisher currently in the room, in stable
    /// (peer-id) enumeration order.
    pub fn get_publishers(&self) -> Vec<Arc<Publisher>> {
        let pubs = self.publishers.read().unwrap();
        let mut list: Vec<Arc<Publisher>> = pubs.values().cloned().collect();
        list.sort_by(|a, b| a.peer_id.cmp(&b.peer_id));
        list
    }

    /// Current number of publishers.
    pub fn publisher_count(&self) -> usize {
        let pubs = self.publishers.read().unwrap();
        pubs.len()
    }

    /// Build a serialisable summary of this room for API responses.
    pub fn info(&self) -> RoomInfo {
        RoomInfo {
            room_id: self.room_id.clone(),
            publisher_count: self.publisher_count(),
            age_secs: self.created_at.elapsed().as_secs(),
        }
    }
}

// ---------------------------------------------------------------------------
// RoomInfo  (serialisable snapshot for the JSON API)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct RoomInfo {
    pub room_id: String,
    pub publisher_count: usize,
    /// Seconds elapsed since the room was created.
    pub age_secs: u64,
}
