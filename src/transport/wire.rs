//! Frame header encoding and decoding.
//!
//! Two fixed layouts make up every LANES datagram: the outer header
//! (magic + sender identity, sent in the clear) and the secure header
//! (flags + ports + order, always the first bytes of the encrypted
//! region). All multi-byte fields are big-endian on the wire regardless
//! of host endianness, and every read is bounds-checked before any field
//! is touched.

use rand::RngCore;
use rand::rngs::OsRng;

use crate::core::{OUTER_HEADER_SIZE, SECURE_HEADER_SIZE, SOCKET_ID_SIZE, WireError};

/// Persistent 128-bit identity of a socket endpoint.
///
/// A socket carries one as its own identity and authorizes remote
/// endpoints under theirs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SocketId([u8; SOCKET_ID_SIZE]);

impl SocketId {
    /// Generate a new random identity.
    pub fn generate() -> Self {
        let mut id = [0u8; SOCKET_ID_SIZE];
        OsRng.fill_bytes(&mut id);
        Self(id)
    }

    /// Create an identity from raw bytes.
    pub fn from_bytes(bytes: [u8; SOCKET_ID_SIZE]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; SOCKET_ID_SIZE] {
        &self.0
    }
}

impl AsRef<[u8]> for SocketId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Display for SocketId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Frame flags carried in the secure header.
///
/// Unknown bits are preserved round-trip but never interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameFlags(u32);

impl FrameFlags {
    /// No flags set.
    pub const NONE: Self = Self(0);
    /// Frame acknowledges the carried order.
    pub const ACK: Self = Self(0x1);
    /// Frame requests creation of the mirrored channel.
    pub const CREATE_CHANNEL: Self = Self(0x2);
    /// The channel being created is a stream (buffered) channel.
    pub const CHANNEL_AS_STREAM: Self = Self(0x4);
    /// Frame tears the channel down.
    pub const DISCONNECT: Self = Self(0x8);
    /// Frame originates from the side that opened the channel.
    pub const IS_CLIENT_CALL: Self = Self(0x10000);

    /// Create flags from their wire representation.
    pub fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Get the wire representation.
    pub fn bits(self) -> u32 {
        self.0
    }

    /// Check whether every bit of `other` is set in `self`.
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for FrameFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Outer frame header, sent in the clear.
///
/// Wire format (20 bytes):
/// ```text
/// +----------------+----------------------------+
/// | Magic          | Sender identity            |
/// | 4 bytes (BE32) | 16 bytes                   |
/// +----------------+----------------------------+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OuterHeader {
    /// Protocol magic; datagrams with a foreign magic bypass the
    /// protocol entirely.
    pub magic: u32,
    /// Identity of the sending socket.
    pub socket_id: SocketId,
}

impl OuterHeader {
    /// Serialize to bytes.
    pub fn to_bytes(&self) -> [u8; OUTER_HEADER_SIZE] {
        let mut buf = [0u8; OUTER_HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.magic.to_be_bytes());
        buf[4..20].copy_from_slice(self.socket_id.as_bytes());
        buf
    }

    /// Parse from bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        if bytes.len() < OUTER_HEADER_SIZE {
            return Err(WireError::Truncated {
                expected: OUTER_HEADER_SIZE,
                actual: bytes.len(),
            });
        }

        let magic = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);

        let mut id = [0u8; SOCKET_ID_SIZE];
        id.copy_from_slice(&bytes[4..20]);

        Ok(Self {
            magic,
            socket_id: SocketId::from_bytes(id),
        })
    }
}

/// Secure frame header, the fixed prefix of every encrypted region.
///
/// Wire format (12 bytes):
/// ```text
/// +----------------+--------+--------+----------------+
/// | Flags          | Source | Dest   | Order          |
/// | 4 bytes (BE32) | BE16   | BE16   | 4 bytes (BE32) |
/// +----------------+--------+--------+----------------+
/// ```
///
/// Ports are named from the sender's perspective: `source_port` is the
/// sender's local port, `dest_port` the receiver's.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecureHeader {
    /// Frame flags.
    pub flags: FrameFlags,
    /// Sender's channel port.
    pub source_port: u16,
    /// Receiver's channel port.
    pub dest_port: u16,
    /// Per-channel sequence order of this frame.
    pub order: u32,
}

impl SecureHeader {
    /// Serialize to bytes.
    pub fn to_bytes(&self) -> [u8; SECURE_HEADER_SIZE] {
        let mut buf = [0u8; SECURE_HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.flags.bits().to_be_bytes());
        buf[4..6].copy_from_slice(&self.source_port.to_be_bytes());
        buf[6..8].copy_from_slice(&self.dest_port.to_be_bytes());
        buf[8..12].copy_from_slice(&self.order.to_be_bytes());
        buf
    }

    /// Parse from bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        if bytes.len() < SECURE_HEADER_SIZE {
            return Err(WireError::Truncated {
                expected: SECURE_HEADER_SIZE,
                actual: bytes.len(),
            });
        }

        Ok(Self {
            flags: FrameFlags::from_bits(u32::from_be_bytes([
                bytes[0], bytes[1], bytes[2], bytes[3],
            ])),
            source_port: u16::from_be_bytes([bytes[4], bytes[5]]),
            dest_port: u16::from_be_bytes([bytes[6], bytes[7]]),
            order: u32::from_be_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]),
        })
    }
}
