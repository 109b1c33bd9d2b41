//! Error types for the LANES protocol.

use thiserror::Error;

/// Errors produced while parsing wire headers.
///
/// The receive pump treats these as noise: the offending datagram is
/// dropped and the pump keeps running.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum WireError {
    /// Input ended before the fixed-layout header did.
    #[error("truncated header: expected at least {expected} bytes, got {actual}")]
    Truncated {
        /// Minimum number of bytes the header needs.
        expected: usize,
        /// Bytes actually available.
        actual: usize,
    },
}

/// Errors in the crypto layer.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CryptoError {
    /// Ciphertext did not decrypt to validly padded plaintext, or was not
    /// a whole number of cipher blocks.
    #[error("decryption failed (wrong key or corrupted frame)")]
    DecryptFailed,

    /// Plaintext would not fit a single datagram after padding.
    #[error("plaintext of {len} bytes exceeds the {max}-byte frame budget")]
    PlaintextTooLarge {
        /// Plaintext length requested.
        len: usize,
        /// Largest plaintext a frame can carry.
        max: usize,
    },
}

/// Errors from the public-address discovery helper.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryError {
    /// The response was shorter than its own length fields claim.
    #[error("malformed discovery response")]
    MalformedResponse,

    /// The response carried no mapped-address attribute.
    #[error("discovery response carried no mapped address")]
    NoMappedAddress,
}

/// Top-level LANES errors.
#[derive(Debug, Error)]
pub enum LanesError {
    /// The socket has not been started, or has been stopped.
    #[error("socket is not started")]
    NotStarted,

    /// A socket cannot authorize its own identity.
    #[error("cannot authorize the socket's own identity")]
    AuthorizeSelf,

    /// The remote identity has not been authorized.
    #[error("remote identity has not been authorized")]
    NotAuthorized,

    /// The peer's local-port pool is exhausted.
    #[error("all channel ports are in use")]
    PortsExhausted,

    /// The channel has been disconnected.
    #[error("channel has been disconnected")]
    Disconnected,

    /// No acknowledgement arrived within the retry budget.
    #[error("the send operation timed out")]
    AckTimeout,

    /// No data arrived within the read timeout.
    #[error("the read operation timed out")]
    ReadTimeout,

    /// A frame payload exceeds the peer's maximum payload size.
    #[error("frame of {len} bytes exceeds the {max}-byte payload limit")]
    FrameTooLarge {
        /// Payload length requested.
        len: usize,
        /// Maximum payload the peer accepts.
        max: usize,
    },

    /// I/O error from the UDP layer.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Crypto error.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Wire parsing error.
    #[error("wire error: {0}")]
    Wire(#[from] WireError),

    /// Address discovery error.
    #[error("discovery error: {0}")]
    Discovery(#[from] DiscoveryError),
}

/// Convenience alias for results carrying a [`LanesError`].
pub type LanesResult<T> = Result<T, LanesError>;
