//! Fixed-capacity receive ring for stream channels.
//!
//! Incoming frame payloads are queued as whole segments and only copied
//! when the consumer actually reads them. A full ring is backpressure,
//! not data loss: the rejected frame goes unacknowledged and the sender's
//! retry timer resends it.

use bytes::{Buf, Bytes};

/// Circular queue of pending payload segments.
pub(crate) struct SegmentRing {
    slots: Box<[Option<Bytes>]>,
    head: usize,
    len: usize,
}

impl SegmentRing {
    /// Create a ring with room for `capacity` pending segments.
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            slots: vec![None; capacity].into_boxed_slice(),
            head: 0,
            len: 0,
        }
    }

    /// Queue a segment behind everything already pending.
    ///
    /// Returns `false` without queuing when the ring is full.
    pub(crate) fn push(&mut self, segment: Bytes) -> bool {
        if self.len == self.slots.len() {
            return false;
        }

        let tail = (self.head + self.len) % self.slots.len();
        self.slots[tail] = Some(segment);
        self.len += 1;
        true
    }

    /// Copy bytes from the oldest pending segment into `dst`.
    ///
    /// A segment larger than `dst` is partially consumed and keeps its
    /// place at the head; otherwise the whole segment is drained and the
    /// ring advances. Returns the number of bytes copied, 0 when empty.
    pub(crate) fn read(&mut self, dst: &mut [u8]) -> usize {
        if dst.is_empty() {
            return 0;
        }

        let Some(segment) = self.slots[self.head].as_mut() else {
            return 0;
        };

        if segment.len() > dst.len() {
            let n = dst.len();
            dst.copy_from_slice(&segment[..n]);
            segment.advance(n);
            n
        } else {
            let n = segment.len();
            dst[..n].copy_from_slice(segment);
            self.slots[self.head] = None;
            self.head = (self.head + 1) % self.slots.len();
            self.len -= 1;
            n
        }
    }

    /// Number of pending segments.
    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.len
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_ring_reads_zero() {
        let mut ring = SegmentRing::new(4);
        let mut buf = [0u8; 8];
        assert_eq!(ring.read(&mut buf), 0);
    }

    #[test]
    fn test_push_until_full() {
        let mut ring = SegmentRing::new(2);
        assert!(ring.push(Bytes::from_static(b"a")));
        assert!(ring.push(Bytes::from_static(b"b")));
        assert!(!ring.push(Bytes::from_static(b"c")));
        assert_eq!(ring.len(), 2);
    }

    #[test]
    fn test_drains_oldest_first() {
        let mut ring = SegmentRing::new(4);
        ring.push(Bytes::from_static(b"one"));
        ring.push(Bytes::from_static(b"two"));

        let mut buf = [0u8; 8];
        assert_eq!(ring.read(&mut buf), 3);
        assert_eq!(&buf[..3], b"one");
        assert_eq!(ring.read(&mut buf), 3);
        assert_eq!(&buf[..3], b"two");
        assert_eq!(ring.read(&mut buf), 0);
    }

    #[test]
    fn test_partial_consume_keeps_remainder() {
        let mut ring = SegmentRing::new(4);
        ring.push(Bytes::from_static(b"abcdef"));

        let mut buf = [0u8; 4];
        assert_eq!(ring.read(&mut buf), 4);
        assert_eq!(&buf, b"abcd");
        // Remainder stays at the head, in place.
        assert_eq!(ring.len(), 1);
        assert_eq!(ring.read(&mut buf), 2);
        assert_eq!(&buf[..2], b"ef");
        assert_eq!(ring.len(), 0);
    }

    #[test]
    fn test_wraparound() {
        let mut ring = SegmentRing::new(3);
        let mut buf = [0u8; 8];

        for round in 0u8..10 {
            assert!(ring.push(Bytes::copy_from_slice(&[round])));
            assert!(ring.push(Bytes::copy_from_slice(&[round, round])));
            assert_eq!(ring.read(&mut buf), 1);
            assert_eq!(buf[0], round);
            assert_eq!(ring.read(&mut buf), 2);
            assert_eq!(&buf[..2], &[round, round]);
        }
    }

    #[test]
    fn test_slot_freed_after_drain() {
        let mut ring = SegmentRing::new(1);
        ring.push(Bytes::from_static(b"x"));
        assert!(!ring.push(Bytes::from_static(b"y")));

        let mut buf = [0u8; 1];
        ring.read(&mut buf);
        assert!(ring.push(Bytes::from_static(b"y")));
    }
}
