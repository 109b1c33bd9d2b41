//! Protocol constants.
//!
//! These values are fixed by the protocol and MUST NOT be changed:
//! both endpoints derive frame layouts, keys and retry behaviour from them.

use std::time::Duration;

// =============================================================================
// LINK LAYER
// =============================================================================

/// Maximum datagram size the protocol will ever hand to the UDP layer.
pub const MTU: usize = 1400;

// =============================================================================
// WIRE LAYOUT
// =============================================================================

/// Socket identity size (128-bit).
pub const SOCKET_ID_SIZE: usize = 16;

/// Outer header size (magic + sender identity), sent in the clear.
pub const OUTER_HEADER_SIZE: usize = 4 + SOCKET_ID_SIZE;

/// Secure header size (flags + source port + destination port + order),
/// always the first bytes of the encrypted region.
pub const SECURE_HEADER_SIZE: usize = 4 + 2 + 2 + 4;

// =============================================================================
// CRYPTOGRAPHY
// =============================================================================

/// AES-256 key size.
pub const CIPHER_KEY_SIZE: usize = 32;

/// AES block size; every ciphertext is a whole number of blocks.
pub const CIPHER_BLOCK_SIZE: usize = 16;

/// Per-frame initialization vector size, sent in the clear ahead of the
/// ciphertext.
pub const FRAME_IV_SIZE: usize = 16;

/// Fixed application salt for password-based key derivation.
pub const KDF_SALT: [u8; 16] = [
    3, 9, 124, 214, 2, 239, 71, 76, 137, 46, 71, 77, 92, 162, 70, 144,
];

/// PBKDF2 iteration count.
pub const KDF_ITERATIONS: u32 = 10_000;

// =============================================================================
// RELIABLE DELIVERY
// =============================================================================

/// Capacity of a stream channel's receive ring, in pending segments.
pub const RING_CAPACITY: usize = 45;

/// Number of transmissions of one frame before an acknowledged send gives up.
pub const SEND_ATTEMPTS: u32 = 5;

/// Acknowledgement wait for the first attempt.
pub const ACK_WAIT_BASE: Duration = Duration::from_millis(1000);

/// Additional acknowledgement wait per subsequent attempt.
pub const ACK_WAIT_STEP: Duration = Duration::from_millis(500);

/// Default blocking-read timeout for stream channels.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(15);
