//! # LANES Protocol
//!
//! **L**ightweight **A**uthenticated **N**etwork **E**xchange **S**treams
//!
//! LANES is a reliable, encrypted, multiplexed messaging transport built
//! directly on raw UDP datagrams. Two endpoints, each identified by a
//! persistent 128-bit identity, exchange discrete messages or ordered
//! byte streams over a single shared UDP socket:
//!
//! - **Multiplexing**: any number of logical channels, each a
//!   (local port, remote port) pair under a peer, share one socket
//!   and one OS port
//! - **Reliability**: per-channel ordering, acknowledgement and
//!   retransmission with stop-and-wait flow control
//! - **Encryption**: per-peer AES-256 derived from a shared password,
//!   sealed independently per frame
//! - **Interop**: datagrams that are not LANES traffic are surfaced to a
//!   side-channel hook, used by the public-address discovery helper
//!
//! ## Modules
//!
//! - [`core`]: constants and error types
//! - [`transport`]: wire codec, channels, peers and the shared socket
//! - [`crypto`]: key derivation and the per-frame cipher
//! - [`discovery`]: public-address discovery over the side channel
//!
//! ## Example
//!
//! ```no_run
//! use lanes_protocol::{LanesSocket, SocketId};
//!
//! # async fn demo() -> Result<(), lanes_protocol::LanesError> {
//! let socket = LanesSocket::new(0x4C414E53, SocketId::generate());
//! socket.start("0.0.0.0:40100".parse().expect("valid address")).await?;
//!
//! // Accept streams opened by remotes.
//! socket.on_stream(|stream| {
//!     println!("stream from {} on port {}", stream.remote_id(), stream.local_port());
//! });
//!
//! // Open a stream towards an authorized remote.
//! let remote = SocketId::generate(); // the peer's persistent identity
//! socket.authorize(remote, "shared password")?;
//! let stream = socket
//!     .open_stream(remote, "203.0.113.7:40100".parse().expect("valid address"), 1)
//!     .await?;
//! stream.write(b"hello across the lane").await?;
//! stream.disconnect().await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod core;
pub mod crypto;
pub mod discovery;
pub mod transport;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::core::*;
    pub use crate::crypto::{FrameCipher, max_payload};
    pub use crate::discovery::public_address;
    pub use crate::transport::{
        Channel, FrameChannel, FrameFlags, LanesSocket, OuterHeader, Peer, SecureHeader,
        SocketId, StreamChannel,
    };
}

// Re-export commonly used items at crate root
pub use core::{CryptoError, DiscoveryError, LanesError, LanesResult, WireError};
pub use transport::{Channel, FrameChannel, LanesSocket, SocketId, StreamChannel};
