use rand::Rng;
use std::collections::HashSet;
use std::net::UdpSocket;
use std::sync::Mutex;
use tracing::debug;

use crate::error::RecordError;

// ---------------------------------------------------------------------------
// Loopback UDP port-pair allocator
// ---------------------------------------------------------------------------

/// Bounded number of bind probes before giving up with `ResourceExhaustion`.
const MAX_ATTEMPTS: u32 = 64;

/// Hands out loopback UDP ports for muxer inputs.
///
/// `allocate()` returns a port `P` such that both `P` and `P+1` were bindable
/// on 127.0.0.1 at probe time (`P+1` is the RTCP port declared in the SDP).
/// Ports stay reserved in-process until `release()`d, so two concurrent
/// recordings can never be handed the same peer port even though the probe
/// sockets are closed immediately.
pub struct PortAllocator {
    min: u16,
    max: u16,
    reserved: Mutex<HashSet<u16>>,
}

impl PortAllocator {
    /// Create an allocator over `[min, max]`.  The range is clamped so that
    /// `P+1` never overflows.
    pub fn new(min: u16, max: u16) -> Self {
        let max = max.max(min.saturating_add(1)).min(u16::MAX - 1);
        Self {
            min,
            max,
            reserved: Mutex::new(HashSet::new()),
        }
    }

    /// Find a free RTP/RTCP port pair on the loopback interface.
    pub fn allocate(&self) -> Result<u16, RecordError> {
        let mut rng = rand::thread_rng();

        for _ in 0..MAX_ATTEMPTS {
            let candidate: u16 = rng.gen_range(self.min..=self.max);

            {
                let reserved = self.reserved.lock().unwrap();
                if reserved.contains(&candidate) || reserved.contains(&(candidate + 1)) {
                    continue;
                }
            }

            if !probe(candidate) || !probe(candidate + 1) {
                continue;
            }

            let mut reserved = self.reserved.lock().unwrap();
            // Re-check under the lock; another task may have won the race
            // between probe and reservation.
            if reserved.contains(&candidate) || reserved.contains(&(candidate + 1)) {
                continue;
            }
            reserved.insert(candidate);
            reserved.insert(candidate + 1);

            debug!(port = candidate, "loopback port pair allocated");
            return Ok(candidate);
        }

        Err(RecordError::ResourceExhaustion {
            min: self.min,
            max: self.max,
            attempts: MAX_ATTEMPTS,
        })
    }

    /// Return a pair to the pool once the recording that held it is done.
    pub fn release(&self, port: u16) {
        let mut reserved = self.reserved.lock().unwrap();
        reserved.remove(&port);
        reserved.remove(&(port + 1));
    }

    /// Number of ports currently reserved (pairs count as two).
    pub fn reserved_count(&self) -> usize {
        self.reserved.lock().unwrap().len()
    }
}

/// Exclusive bind probe; the socket is dropped (closed) before returning.
fn probe(port: u16) -> bool {
    UdpSocket::bind(("127.0.0.1", port)).is_ok()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocates_within_range() {
        let alloc = PortAllocator::new(21000, 21100);
        let port = alloc.allocate().unwrap();
        assert!((21000..=21100).contains(&port));
    }

    #[test]
    fn pairs_do_not_overlap() {
        let alloc = PortAllocator::new(22000, 22100);
        let a = alloc.allocate().unwrap();
        let b = alloc.allocate().unwrap();
        let c = alloc.allocate().unwrap();

        // No shared RTP or RTCP port between any two allocations.
        let mut all = vec![a, a + 1, b, b + 1, c, c + 1];
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), 6);
    }

    #[test]
    fn release_makes_ports_reusable() {
        let alloc = PortAllocator::new(23000, 23001);
        let a = alloc.allocate().unwrap();
        assert_eq!(alloc.reserved_count(), 2);

        // Range of two ports holds exactly one pair; a second allocate
        // exhausts it.
        assert!(matches!(
            alloc.allocate(),
            Err(RecordError::ResourceExhaustion { .. })
        ));

        alloc.release(a);
        assert_eq!(alloc.reserved_count(), 0);
        let b = alloc.allocate().unwrap();
        assert!((23000..=23001).contains(&b));
    }

    #[test]
    fn occupied_port_is_skipped() {
        // Occupy both possible pairs of a two-port range; the allocator must
        // fail rather than return a port whose pair is taken.
        let alloc = PortAllocator::new(24000, 24001);
        let _rtp_holder = UdpSocket::bind(("127.0.0.1", 24000)).unwrap();
        let _rtcp_holder = UdpSocket::bind(("127.0.0.1", 24002)).unwrap();
        assert!(matches!(
            alloc.allocate(),
            Err(RecordError::ResourceExhaustion { .. })
        ));
    }
}
