use crate::source::RtpCodec;

// ---------------------------------------------------------------------------
// SDP synthesizer
// ---------------------------------------------------------------------------
//
// The muxer learns what it is about to receive from a session-description
// file, one per recording input.  The document must match the consumer's
// negotiated RTP parameters bit-exactly — payload type, clock rate, channel
// count and codec format parameters — or the muxer will silently discard
// packets.  The consumer side is authoritative: the SFU may renumber payload
// types relative to the producer.

/// Produce a minimal session description for a single loopback RTP input.
///
/// `port` is the peer RTP port the endpoint sends to; RTCP is declared on
/// `port + 1` (non-multiplexed, as the muxer expects).
pub fn synthesize(codec: &RtpCodec, port: u16) -> String {
    let mut sdp = String::with_capacity(256);

    sdp.push_str("v=0\r\n");
    sdp.push_str("o=- 0 0 IN IP4 127.0.0.1\r\n");
    sdp.push_str("s=rtc-recorder\r\n");
    sdp.push_str("c=IN IP4 127.0.0.1\r\n");
    sdp.push_str("t=0 0\r\n");

    let pt = codec.payload_type();

    match codec {
        RtpCodec::Video {
            name, clock_rate, ..
        } => {
            sdp.push_str(&format!("m=video {port} RTP/AVP {pt}\r\n"));
            sdp.push_str(&format!("a=rtpmap:{pt} {name}/{clock_rate}\r\n"));
        }
        RtpCodec::Audio {
            name,
            clock_rate,
            channels,
            ..
        } => {
            sdp.push_str(&format!("m=audio {port} RTP/AVP {pt}\r\n"));
            sdp.push_str(&format!("a=rtpmap:{pt} {name}/{clock_rate}/{channels}\r\n"));
        }
    }

    if let Some(fmtp) = codec.fmtp() {
        sdp.push_str(&format!("a=fmtp:{pt} {fmtp}\r\n"));
    }

    sdp.push_str(&format!("a=rtcp:{} IN IP4 127.0.0.1\r\n", port + 1));
    sdp.push_str("a=recvonly\r\n");

    sdp
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn video_document() {
        let codec = RtpCodec::Video {
            payload_type: 96,
            name: "VP8".into(),
            clock_rate: 90000,
            fmtp: None,
        };
        let sdp = synthesize(&codec, 20000);
        assert_eq!(
            sdp,
            "v=0\r\n\
             o=- 0 0 IN IP4 127.0.0.1\r\n\
             s=rtc-recorder\r\n\
             c=IN IP4 127.0.0.1\r\n\
             t=0 0\r\n\
             m=video 20000 RTP/AVP 96\r\n\
             a=rtpmap:96 VP8/90000\r\n\
             a=rtcp:20001 IN IP4 127.0.0.1\r\n\
             a=recvonly\r\n"
        );
    }

    #[test]
    fn audio_document_with_fmtp() {
        let codec = RtpCodec::Audio {
            payload_type: 111,
            name: "opus".into(),
            clock_rate: 48000,
            channels: 2,
            fmtp: Some("minptime=10;useinbandfec=1".into()),
        };
        let sdp = synthesize(&codec, 30188);
        assert!(sdp.contains("m=audio 30188 RTP/AVP 111\r\n"));
        assert!(sdp.contains("a=rtpmap:111 opus/48000/2\r\n"));
        assert!(sdp.contains("a=fmtp:111 minptime=10;useinbandfec=1\r\n"));
        assert!(sdp.contains("a=rtcp:30189 IN IP4 127.0.0.1\r\n"));
    }

    #[test]
    fn payload_type_follows_consumer() {
        // The SFU may hand the consumer a different payload type than the
        // producer announced; the SDP must carry the consumer's.
        let codec = RtpCodec::Video {
            payload_type: 102,
            name: "H264".into(),
            clock_rate: 90000,
            fmtp: Some("packetization-mode=1;profile-level-id=42e01f".into()),
        };
        let sdp = synthesize(&codec, 40000);
        assert!(sdp.contains("m=video 40000 RTP/AVP 102\r\n"));
        assert!(sdp.contains("a=rtpmap:102 H264/90000\r\n"));
        assert!(sdp.contains("a=fmtp:102 packetization-mode=1;profile-level-id=42e01f\r\n"));
    }

    #[test]
    fn rtcp_is_declared_on_the_next_port() {
        let codec = RtpCodec::Audio {
            payload_type: 0,
            name: "PCMU".into(),
            clock_rate: 8000,
            channels: 1,
            fmtp: None,
        };
        let sdp = synthesize(&codec, 15000);
        assert!(sdp.contains("a=rtcp:15001 IN IP4 127.0.0.1\r\n"));
        assert!(sdp.contains("a=rtpmap:0 PCMU/8000/1\r\n"));
    }
}
