//! Ordered byte-stream facade over a channel.

use std::sync::Arc;
use std::time::Duration;

use crate::core::{DEFAULT_READ_TIMEOUT, LanesResult};
use crate::transport::channel::Channel;
use crate::transport::wire::SocketId;

/// An ordered, reliable byte stream between two endpoints.
///
/// Writes are chunked to the peer's frame size and each chunk is
/// retransmitted until acknowledged (stop-and-wait), so bytes arrive
/// exactly once and in order. Reads block until data is buffered, the
/// remote disconnects (`Ok(0)`, end-of-stream), or the read timeout
/// elapses.
pub struct StreamChannel {
    channel: Arc<Channel>,
    read_timeout: Duration,
}

impl StreamChannel {
    pub(crate) fn new(channel: Arc<Channel>) -> Self {
        Self {
            channel,
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }

    /// The underlying channel.
    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    /// Identity of the remote endpoint.
    pub fn remote_id(&self) -> SocketId {
        self.channel.peer().remote_id()
    }

    /// This side's channel port.
    pub fn local_port(&self) -> u16 {
        self.channel.local_port()
    }

    /// The remote side's channel port.
    pub fn remote_port(&self) -> u16 {
        self.channel.remote_port()
    }

    /// Write chunk size that avoids partial frames.
    pub fn preferred_buffer_size(&self) -> usize {
        self.channel.max_payload()
    }

    /// Whether the stream has reached end-of-stream.
    pub fn is_disconnected(&self) -> bool {
        self.channel.is_disconnected()
    }

    /// Current per-wait read timeout.
    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    /// Change the per-wait read timeout.
    pub fn set_read_timeout(&mut self, timeout: Duration) {
        self.read_timeout = timeout;
    }

    /// Read buffered bytes into `dst`.
    ///
    /// Returns the number of bytes read, or `Ok(0)` at end-of-stream.
    /// Fails with [`ReadTimeout`](crate::LanesError::ReadTimeout) when
    /// nothing arrives within the read timeout.
    pub async fn read(&self, dst: &mut [u8]) -> LanesResult<usize> {
        self.channel.read(dst, self.read_timeout).await
    }

    /// Write all of `data` to the stream.
    ///
    /// Blocks on each chunk's acknowledgement; a chunk that exhausts its
    /// retry budget fails the whole write with
    /// [`AckTimeout`](crate::LanesError::AckTimeout).
    pub async fn write(&self, data: &[u8]) -> LanesResult<()> {
        let mut remaining = data;
        while !remaining.is_empty() {
            let sent = self.channel.write_acked(remaining).await?;
            remaining = &remaining[sent..];
        }
        Ok(())
    }

    /// Disconnect the stream and wait for the peer's acknowledgement.
    ///
    /// The channel is terminal afterwards even if the acknowledgement
    /// never arrives.
    pub async fn disconnect(&self) -> LanesResult<()> {
        self.channel.disconnect().await
    }
}
