//! Discrete-message facade over a channel.

use std::sync::Arc;

use bytes::Bytes;

use crate::core::LanesResult;
use crate::transport::channel::Channel;
use crate::transport::wire::SocketId;

/// A channel exchanging discrete messages.
///
/// Each send is one datagram; delivery is best-effort on the data path
/// (no acknowledgement round-trip), and inbound payloads are handed to
/// the registered callback synchronously from the socket's receive pump
/// together with their sequence order.
pub struct FrameChannel {
    channel: Arc<Channel>,
}

impl FrameChannel {
    pub(crate) fn new(channel: Arc<Channel>) -> Self {
        Self { channel }
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

    /// Largest payload one frame can carry.
    pub fn max_payload(&self) -> usize {
        self.channel.max_payload()
    }

    /// Whether the channel has been disconnected.
    pub fn is_disconnected(&self) -> bool {
        self.channel.is_disconnected()
    }

    /// Install the receive callback.
    ///
    /// Runs on the receive pump; keep it short.
    pub fn on_frame<F>(&self, handler: F)
    where
        F: Fn(Bytes, u32) + Send + Sync + 'static,
    {
        self.channel.set_frame_handler(Some(Arc::new(handler)));
    }

    /// Remove the receive callback.
    pub fn clear_on_frame(&self) {
        self.channel.set_frame_handler(None);
    }

    /// Send one discrete message.
    ///
    /// Fails with [`FrameTooLarge`](crate::LanesError::FrameTooLarge) if
    /// `payload` exceeds [`max_payload`](Self::max_payload).
    pub async fn send(&self, payload: &[u8]) -> LanesResult<()> {
        self.channel.write_frame(payload).await
    }

    /// Disconnect the channel and wait for the peer's acknowledgement.
    pub async fn disconnect(&self) -> LanesResult<()> {
        self.channel.disconnect().await
    }
}
