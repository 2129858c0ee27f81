// src/sfu.rs
//
// Publisher-side SFU ingest.
//
// The recorder sits beside the media router; this module is the minimal
// router surface it needs: peers publish their camera/microphone over a
// WebRTC peer connection, incoming RTP is fanned out on per-track broadcast
// channels, and the negotiated codec parameters (payload type included) are
// captured from the first packet of each track.  Everything downstream —
// consumers, endpoints, muxers — hangs off that state through the
// `RecordSource` seam.
//
// ────────────────────────────────────────────────────────────────────────────

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;

use crate::error::ApiError;
use crate::room::{Publisher, Room};

// ─── DTOs ───────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct PublishOffer {
    pub room: String,
    pub peer: String,
    pub sdp: String,
    #[serde(rename = "type")]
    #[allow(dead_code)]
    pub sdp_type: String,
}

#[derive(Serialize)]
pub struct SdpAnswer {
    pub sdp: String,
    #[serde(rename = "type")]
    pub sdp_type: String,
}

// ─── PeerConnection factory ─────────────────────────────────────────────────

/// Create a new `RTCPeerConnection` with the default codec set.
async fn create_peer_connection() -> Result<Arc<RTCPeerConnection>, webrtc::Error> {
    let mut media_engine = MediaEngine::default();
    media_engine.register_default_codecs()?;

    let mut registry = Registry::new();
    registry = register_default_interceptors(registry, &mut media_engine)?;

    let api = APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build();

    let pc = api.new_peer_connection(RTCConfiguration::default()).await?;
    Ok(Arc::new(pc))
}

// ─── ICE gathering helper ───────────────────────────────────────────────────

async fn wait_for_ice(pc: &Arc<RTCPeerConnection>, timeout_secs: u64) {
    let (tx, rx) = tokio::sync::oneshot::channel::<()>();
    let tx = Arc::new(std::sync::Mutex::new(Some(tx)));
    pc.on_ice_gathering_state_change(Box::new(move |state| {
        if state == webrtc::ice_transport::ice_gatherer_state::RTCIceGathererState::Complete {
            if let Some(t) = tx.lock().unwrap().take() {
                let _ = t.send(());
            }
        }
        Box::pin(async {})
    }));
    let _ = tokio::time::timeout(std::time::Duration::from_secs(timeout_secs), rx).await;
}

// ─── SDP exchange helper ────────────────────────────────────────────────────

async fn exchange_sdp(
    pc: &Arc<RTCPeerConnection>,
    offer_sdp: String,
) -> Result<SdpAnswer, ApiError> {
    let sdp_offer = RTCSessionDescription::offer(offer_sdp).map_err(|e| {
        warn!("Invalid SDP offer: {e}");
        ApiError::invalid_sdp()
    })?;

    pc.set_remote_description(sdp_offer).await.map_err(|e| {
        warn!("set_remote_description failed: {e}");
        ApiError::internal("set_remote_description failed")
    })?;

    let answer = pc.create_answer(None).await.map_err(|e| {
        warn!("create_answer failed: {e}");
        ApiError::internal("create_answer failed")
    })?;

    pc.set_local_description(answer).await.map_err(|e| {
        warn!("set_local_description failed: {e}");
        ApiError::internal("set_local_description failed")
    })?;

    wait_for_ice(pc, 10).await;

    let local_desc = pc
        .local_description()
        .await
        .ok_or_else(|| ApiError::internal("local_description unavailable after ICE gathering"))?;

    Ok(SdpAnswer {
        sdp: local_desc.sdp,
        sdp_type: "answer".to_string(),
    })
}

// ─── on_track setup ─────────────────────────────────────────────────────────

/// Forward incoming RTP to the publisher's broadcast channels, capturing
/// negotiated codec parameters and minting a producer id per track.
fn setup_publisher_on_track(pc: &Arc<RTCPeerConnection>, publisher: &Arc<Publisher>, room_id: &str) {
    let pub_clone = publisher.clone();
    let rid = room_id.to_string();
    pc.on_track(Box::new(move |track, _receiver, _transceiver| {
        let publisher = pub_clone.clone();
        let rid = rid.clone();

        Box::pin(async move {
            let kind = track.kind();
            info!(
                "Room '{rid}' — track received: kind={kind}, ssrc={}",
                track.ssrc()
            );

            if kind == RTPCodecType::Video {
                *publisher.video_params.write().unwrap() = Some(track.codec());
                *publisher.video_producer_id.write().unwrap() =
                    Some(format!("p_{}", uuid::Uuid::new_v4()));
                publisher
                    .video_ssrc
                    .store(track.ssrc() as u64, Ordering::Relaxed);

                let tx = publisher.video_tx.clone();
                tokio::spawn(async move {
                    loop {
                        match track.read_rtp().await {
                            Ok((pkt, _)) => {
                                let _ = tx.send(pkt);
                            }
                            Err(e) => {
                                warn!("RTP read error (video): {e}");
                                break;
                            }
                        }
                    }
                });
            } else {
                *publisher.audio_params.write().unwrap() = Some(track.codec());
                *publisher.audio_producer_id.write().unwrap() =
                    Some(format!("p_{}", uuid::Uuid::new_v4()));

                let tx = publisher.audio_tx.clone();
                tokio::spawn(async move {
                    loop {
                        match track.read_rtp().await {
                            Ok((pkt, _)) => {
                                let _ = tx.send(pkt);
                            }
                            Err(e) => {
                                warn!("RTP read error (audio): {e}");
                                break;
                            }
                        }
                    }
                });
            }
        })
    }));
}

// ─── POST /sfu/publish ──────────────────────────────────────────────────────

/// Accept a publisher's SDP offer and start ingesting its media.
///
/// The room is created on first publish; the recorder has no separate room
/// provisioning step.
pub async fn sfu_publish(
    State(state): State<Arc<crate::AppState>>,
    Json(offer): Json<PublishOffer>,
) -> Result<Json<SdpAnswer>, ApiError> {
    let room_id = offer.room.clone();
    let peer_id = offer.peer.clone();

    // Look up or create the room.
    let room = {
        let mut rooms = state.rooms.write().unwrap();
        rooms
            .entry(room_id.clone())
            .or_insert_with(|| Arc::new(Room::new(room_id.clone())))
            .clone()
    };

    let pc = create_peer_connection().await.map_err(|e| {
        warn!("sfu_publish: failed to create PeerConnection: {e}");
        ApiError::peer_connection_failed()
    })?;

    let publisher = Arc::new(Publisher::new(peer_id.clone(), pc.clone()));

    setup_publisher_on_track(&pc, &publisher, &room_id);

    // Remove the publisher when the peer goes away; flowing recording
    // consumers observe the closed flag and drain.
    {
        let room_clone = room.clone();
        let pid = peer_id.clone();
        let rid = room_id.clone();
        let state_clone = state.clone();
        pc.on_peer_connection_state_change(Box::new(move |conn_state| {
            let room = room_clone.clone();
            let pid = pid.clone();
            let rid = rid.clone();
            let state = state_clone.clone();
            Box::pin(async move {
                match conn_state {
                    RTCPeerConnectionState::Failed
                    | RTCPeerConnectionState::Disconnected
                    | RTCPeerConnectionState::Closed => {
                        info!("Publisher '{pid}' disconnected from room '{rid}'");
                        room.remove_publisher(&pid);
                        if room.publisher_count() == 0 {
                            let mut rooms = state.rooms.write().unwrap();
                            rooms.remove(&rid);
                            info!("Room '{rid}' removed (no publishers left)");
                        }
                    }
                    _ => {}
                }
            })
        }));
    }

    let answer = exchange_sdp(&pc, offer.sdp).await?;

    room.add_publisher(publisher);

    info!("Room '{room_id}' — publisher '{peer_id}' connected");
    Ok(Json(answer))
}

// ─── GET /v1/rooms ──────────────────────────────────────────────────────────

/// List the rooms currently known to the ingest surface.
pub async fn list_rooms(
    State(state): State<Arc<crate::AppState>>,
) -> Json<Vec<crate::room::RoomInfo>> {
    let rooms = state.rooms.read().unwrap();
    let mut list: Vec<crate::room::RoomInfo> = rooms.values().map(|r| r.info()).collect();
    list.sort_by(|a, b| a.room_id.cmp(&b.room_id));
    Json(list)
}
