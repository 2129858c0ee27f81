// src/binder.rs
//
// Consumer Binder — creates the loopback receive endpoint for one producer,
// attaches a paused recording consumer to it, and points the endpoint at a
// freshly allocated peer port.
//
// The strict per-input ordering is: endpoint create → consumer create →
// codec extraction → port allocation → endpoint connect.  The consumer stays
// paused until the recorder has spawned the muxer; only then does `resume`
// subscribe to the producer's RTP stream and start relaying packets onto the
// wire.
//
// ────────────────────────────────────────────────────────────────────────────

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use webrtc::util::marshal::Marshal;

use crate::error::RecordError;
use crate::ports::PortAllocator;
use crate::source::{can_ingest, MediaKind, RecordSource, RtpCodec};

// ─── PlainEndpoint ──────────────────────────────────────────────────────────

/// A plain RTP transport on the loopback interface.
///
/// The remote side is statically declared (non-comedia): `connect` fixes the
/// peer RTP port, and RTCP is implied on `peer + 1` (no multiplexing).  The
/// socket closes when the endpoint is dropped.
pub struct PlainEndpoint {
    socket: Arc<UdpSocket>,
    local_port: u16,
    peer_rtp_port: Option<u16>,
}

impl PlainEndpoint {
    /// Bind a fresh UDP socket on 127.0.0.1 with an OS-assigned local port.
    pub async fn bind() -> Result<Self, RecordError> {
        let socket = UdpSocket::bind("127.0.0.1:0")
            .await
            .map_err(RecordError::TransportCreate)?;
        let local_port = socket
            .local_addr()
            .map_err(RecordError::TransportCreate)?
            .port();
        Ok(Self {
            socket: Arc::new(socket),
            local_port,
            peer_rtp_port: None,
        })
    }

    /// Declare the static peer: RTP to `127.0.0.1:port`, RTCP on `port + 1`.
    pub async fn connect(&mut self, port: u16) -> Result<(), RecordError> {
        self.socket
            .connect(("127.0.0.1", port))
            .await
            .map_err(RecordError::TransportConnect)?;
        self.peer_rtp_port = Some(port);
        debug!(
            local = self.local_port,
            peer = port,
            "loopback endpoint connected"
        );
        Ok(())
    }

    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    pub fn peer_rtp_port(&self) -> Option<u16> {
        self.peer_rtp_port
    }

    fn socket(&self) -> Arc<UdpSocket> {
        self.socket.clone()
    }
}

// ─── RecordingConsumer ──────────────────────────────────────────────────────

/// A paused-by-default consumer of one producer's RTP stream.
///
/// `resume` subscribes to the producer and relays every packet to the bound
/// endpoint until the consumer is closed or the producer goes away.  Closing
/// is idempotent; dropping the consumer closes it.
pub struct RecordingConsumer {
    source: Arc<dyn RecordSource>,
    codec: RtpCodec,
    cancel: CancellationToken,
    resumed: AtomicBool,
}

impl RecordingConsumer {
    fn new(source: Arc<dyn RecordSource>, codec: RtpCodec) -> Self {
        Self {
            source,
            codec,
            cancel: CancellationToken::new(),
            resumed: AtomicBool::new(false),
        }
    }

    pub fn kind(&self) -> MediaKind {
        self.codec.kind()
    }

    pub fn codec(&self) -> &RtpCodec {
        &self.codec
    }

    pub fn is_resumed(&self) -> bool {
        self.resumed.load(Ordering::Relaxed)
    }

    /// Ask the underlying producer for an IDR frame.
    pub fn request_key_frame(&self) {
        self.source.request_key_frame();
    }

    /// Whether the underlying producer has terminated.
    pub fn source_closed(&self) -> bool {
        self.source.is_closed()
    }

    /// Start the RTP relay onto `endpoint`.  Packets published before this
    /// call are not delivered (the consumer was paused).
    pub fn resume(&self, endpoint: &PlainEndpoint) {
        if self.resumed.swap(true, Ordering::Relaxed) {
            return;
        }

        let mut rx = self.source.subscribe();
        let socket = endpoint.socket();
        let cancel = self.cancel.clone();
        let producer_id = self.source.producer_id();
        let kind = self.codec.kind();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    result = rx.recv() => {
                        match result {
                            Ok(pkt) => {
                                let bytes = match pkt.marshal() {
                                    Ok(b) => b,
                                    Err(e) => {
                                        warn!("RTP marshal error for producer '{producer_id}': {e}");
                                        continue;
                                    }
                                };
                                if let Err(e) = socket.send(&bytes).await {
                                    warn!("{kind} relay send error for producer '{producer_id}': {e}");
                                    break;
                                }
                            }
                            Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                                warn!("{kind} relay for producer '{producer_id}' lagged, skipped {n} packets");
                            }
                            Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                                info!("producer '{producer_id}' closed, {kind} relay draining");
                                break;
                            }
                        }
                    }
                }
            }
        });
    }

    /// Stop relaying.  Safe to call more than once.
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

impl Drop for RecordingConsumer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// ─── BoundInput ─────────────────────────────────────────────────────────────

/// One fully bound recording input: endpoint + paused consumer + the peer
/// port the muxer will listen on.
pub struct BoundInput {
    pub source: Arc<dyn RecordSource>,
    pub consumer: RecordingConsumer,
    pub endpoint: PlainEndpoint,
    pub peer_port: u16,
}

impl std::fmt::Debug for BoundInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundInput")
            .field("peer_port", &self.peer_port)
            .finish_non_exhaustive()
    }
}

impl BoundInput {
    pub fn kind(&self) -> MediaKind {
        self.consumer.kind()
    }

    pub fn codec(&self) -> &RtpCodec {
        self.consumer.codec()
    }
}

// ─── bind ───────────────────────────────────────────────────────────────────

/// Bind one producer for recording.
///
/// Fails with `RouterCannotConsume` when the producer's codec is outside the
/// recorder's capability set (callers skip the producer); endpoint or
/// connect failures close the partial resources and propagate.
pub async fn bind(
    source: Arc<dyn RecordSource>,
    allocator: &PortAllocator,
) -> Result<BoundInput, RecordError> {
    let codec = match source.codec() {
        Some(c) if can_ingest(&c) => c,
        Some(c) => {
            return Err(RecordError::RouterCannotConsume {
                producer_id: source.producer_id(),
                mime: format!("{}/{}", c.kind(), c.name()),
            })
        }
        None => {
            return Err(RecordError::RouterCannotConsume {
                producer_id: source.producer_id(),
                mime: format!("{}/unknown", source.kind()),
            })
        }
    };

    let mut endpoint = PlainEndpoint::bind().await?;
    let consumer = RecordingConsumer::new(source.clone(), codec);

    let peer_port = allocator.allocate()?;

    if let Err(e) = endpoint.connect(peer_port).await {
        allocator.release(peer_port);
        return Err(e);
    }

    Ok(BoundInput {
        source,
        consumer,
        endpoint,
        peer_port,
    })
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::test_support::FakeSource;
    use bytes::Bytes;
    use std::time::Duration;
    use webrtc::rtp::header::Header;
    use webrtc::rtp::packet::Packet;

    fn rtp_packet(seq: u16) -> Packet {
        Packet {
            header: Header {
                version: 2,
                payload_type: 96,
                sequence_number: seq,
                timestamp: 3000 * seq as u32,
                ssrc: 0x1234_5678,
                ..Default::default()
            },
            payload: Bytes::from_static(&[0xde, 0xad, 0xbe, 0xef]),
        }
    }

    #[tokio::test]
    async fn bind_rejects_unsupported_codec() {
        let mut fake = FakeSource::video("p1", "alice");
        fake.codec = Some(RtpCodec::Video {
            payload_type: 45,
            name: "AV1".into(),
            clock_rate: 90000,
            fmtp: None,
        });
        let allocator = PortAllocator::new(25000, 25100);

        let err = bind(Arc::new(fake), &allocator).await.unwrap_err();
        assert!(matches!(err, RecordError::RouterCannotConsume { .. }));
        // Nothing must stay reserved after a skipped producer.
        assert_eq!(allocator.reserved_count(), 0);
    }

    #[tokio::test]
    async fn bind_rejects_codecless_source() {
        let mut fake = FakeSource::video("p1", "alice");
        fake.codec = None;
        let allocator = PortAllocator::new(25200, 25300);

        let err = bind(Arc::new(fake), &allocator).await.unwrap_err();
        assert!(matches!(err, RecordError::RouterCannotConsume { .. }));
    }

    #[tokio::test]
    async fn paused_consumer_relays_nothing() {
        let fake = Arc::new(FakeSource::video("p1", "alice"));
        let allocator = PortAllocator::new(25400, 25500);

        let input = bind(fake.clone(), &allocator).await.unwrap();
        let listener = tokio::net::UdpSocket::bind(("127.0.0.1", input.peer_port))
            .await
            .unwrap();

        assert!(!input.consumer.is_resumed());

        // Published while paused: must never arrive.
        let _ = fake.tx.send(rtp_packet(1));

        let mut buf = [0u8; 1500];
        let recv = tokio::time::timeout(Duration::from_millis(200), listener.recv(&mut buf)).await;
        assert!(recv.is_err(), "paused consumer must not relay packets");
    }

    #[tokio::test]
    async fn resumed_consumer_relays_rtp_to_peer_port() {
        let fake = Arc::new(FakeSource::video("p1", "alice"));
        let allocator = PortAllocator::new(25600, 25700);

        let input = bind(fake.clone(), &allocator).await.unwrap();
        assert_eq!(input.kind(), MediaKind::Video);
        assert_eq!(input.endpoint.peer_rtp_port(), Some(input.peer_port));
        assert_ne!(input.endpoint.local_port(), 0);

        let listener = tokio::net::UdpSocket::bind(("127.0.0.1", input.peer_port))
            .await
            .unwrap();

        input.consumer.resume(&input.endpoint);
        assert!(input.consumer.is_resumed());
        // Give the relay task a beat to subscribe.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let pkt = rtp_packet(7);
        let expected = pkt.marshal().unwrap();
        fake.tx.send(pkt).unwrap();

        let mut buf = [0u8; 1500];
        let (n, _) = tokio::time::timeout(Duration::from_secs(2), listener.recv_from(&mut buf))
            .await
            .expect("relay timed out")
            .unwrap();
        assert_eq!(&buf[..n], &expected[..]);

        input.consumer.close();
    }

    #[tokio::test]
    async fn close_stops_the_relay() {
        let fake = Arc::new(FakeSource::audio("p2", "bob"));
        let allocator = PortAllocator::new(25800, 25900);

        let input = bind(fake.clone(), &allocator).await.unwrap();
        let listener = tokio::net::UdpSocket::bind(("127.0.0.1", input.peer_port))
            .await
            .unwrap();

        input.consumer.resume(&input.endpoint);
        tokio::time::sleep(Duration::from_millis(50)).await;
        input.consumer.close();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let _ = fake.tx.send(rtp_packet(9));

        let mut buf = [0u8; 1500];
        let recv = tokio::time::timeout(Duration::from_millis(200), listener.recv(&mut buf)).await;
        assert!(recv.is_err(), "closed consumer must not relay packets");
    }
}
