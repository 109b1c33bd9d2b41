//! The physical UDP endpoint and its receive pump.
//!
//! One [`LanesSocket`] owns one UDP socket and multiplexes every
//! authorized peer and every channel over it. A single pump task
//! receives datagrams, peels the clear outer header, decrypts the rest
//! with the sending peer's cipher and routes the frame to the right
//! channel; datagrams that are not LANES traffic at all are surfaced
//! verbatim to a side-channel handler.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tokio::net::UdpSocket;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::core::{
    ACK_WAIT_BASE, ACK_WAIT_STEP, LanesError, LanesResult, MTU, OUTER_HEADER_SIZE,
    SECURE_HEADER_SIZE, SEND_ATTEMPTS,
};
use crate::transport::channel::Channel;
use crate::transport::frames::FrameChannel;
use crate::transport::peer::Peer;
use crate::transport::stream::StreamChannel;
use crate::transport::wire::{FrameFlags, OuterHeader, SecureHeader, SocketId};

/// Callback for accepted incoming stream channels.
pub type StreamAcceptor = dyn Fn(StreamChannel) + Send + Sync;

/// Callback for accepted incoming frame channels.
pub type FramesAcceptor = dyn Fn(FrameChannel) + Send + Sync;

/// Callback for datagrams that are not LANES traffic.
pub type RawHandler = dyn Fn(&[u8], SocketAddr) + Send + Sync;

/// State shared between the public handle, the pump task and every peer.
pub(crate) struct Shared {
    magic: u32,
    socket_id: SocketId,
    io: RwLock<Option<Arc<UdpSocket>>>,
    peers: RwLock<HashMap<SocketId, Arc<Peer>>>,
    on_stream: RwLock<Option<Arc<StreamAcceptor>>>,
    on_frames: RwLock<Option<Arc<FramesAcceptor>>>,
    on_unmatched: RwLock<Option<Arc<RawHandler>>>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl Shared {
    fn io(&self) -> LanesResult<Arc<UdpSocket>> {
        self.io.read().clone().ok_or(LanesError::NotStarted)
    }

    /// Assemble and encrypt one channel frame into a ready datagram.
    fn build_channel_frame(
        &self,
        channel: &Channel,
        flags: FrameFlags,
        order: u32,
        payload: &[u8],
    ) -> LanesResult<Vec<u8>> {
        let header = SecureHeader {
            flags: flags | channel.direction(),
            source_port: channel.local_port(),
            dest_port: channel.remote_port(),
            order,
        };

        let mut plaintext = Vec::with_capacity(SECURE_HEADER_SIZE + payload.len());
        plaintext.extend_from_slice(&header.to_bytes());
        plaintext.extend_from_slice(payload);

        let body = channel.peer().seal(&plaintext)?;

        let outer = OuterHeader {
            magic: self.magic,
            socket_id: self.socket_id,
        };
        let mut datagram = Vec::with_capacity(OUTER_HEADER_SIZE + body.len());
        datagram.extend_from_slice(&outer.to_bytes());
        datagram.extend_from_slice(&body);
        Ok(datagram)
    }

    /// Send one channel frame, optionally blocking on its acknowledgement.
    ///
    /// With an acknowledgement receiver the identical ciphertext is
    /// retransmitted on the standard retry schedule.
    pub(crate) async fn send_channel_frame(
        &self,
        channel: &Channel,
        flags: FrameFlags,
        order: u32,
        payload: &[u8],
        ack: Option<oneshot::Receiver<()>>,
    ) -> LanesResult<()> {
        let datagram = self.build_channel_frame(channel, flags, order, payload)?;
        let addr = channel.remote_addr();
        match ack {
            None => {
                self.io()?.send_to(&datagram, addr).await?;
                Ok(())
            }
            Some(rx) => self.send_with_retry(&datagram, addr, rx).await,
        }
    }

    /// Acknowledge `order` back to the frame's actual sender address.
    async fn send_ack(&self, channel: &Channel, addr: SocketAddr, order: u32, extra: FrameFlags) {
        let result = async {
            let datagram =
                self.build_channel_frame(channel, FrameFlags::ACK | extra, order, &[])?;
            self.io()?.send_to(&datagram, addr).await?;
            LanesResult::Ok(())
        }
        .await;

        if let Err(err) = result {
            debug!(%err, "failed to send acknowledgement");
        }
    }

    /// Transmit `datagram` until `rx` resolves, with growing waits.
    ///
    /// Attempt `i` of [`SEND_ATTEMPTS`] waits `1000 + 500·i` ms;
    /// exhausting every attempt is an [`AckTimeout`](LanesError::AckTimeout).
    pub(crate) async fn send_with_retry<T>(
        &self,
        datagram: &[u8],
        addr: SocketAddr,
        mut rx: oneshot::Receiver<T>,
    ) -> LanesResult<T> {
        let io = self.io()?;
        for attempt in 0..SEND_ATTEMPTS {
            io.send_to(datagram, addr).await?;
            let wait = ACK_WAIT_BASE + ACK_WAIT_STEP * attempt;
            match tokio::time::timeout(wait, &mut rx).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(_)) => return Err(LanesError::AckTimeout),
                Err(_) => {}
            }
        }
        Err(LanesError::AckTimeout)
    }

    /// Demultiplex one received datagram.
    async fn process_datagram(self: &Arc<Self>, data: &[u8], addr: SocketAddr) {
        let outer = match OuterHeader::from_bytes(data) {
            Ok(outer) if outer.magic == self.magic => outer,
            // Foreign or truncated traffic goes verbatim to the
            // side-channel handler.
            _ => {
                let handler = self.on_unmatched.read().clone();
                if let Some(handler) = handler {
                    handler(data, addr);
                }
                return;
            }
        };

        let Some(peer) = self.peers.read().get(&outer.socket_id).cloned() else {
            debug!(sender = %outer.socket_id, "dropping datagram from unauthorized identity");
            return;
        };

        let plain = match peer.open(&data[OUTER_HEADER_SIZE..]) {
            Ok(plain) => plain,
            Err(err) => {
                debug!(sender = %outer.socket_id, %err, "dropping undecryptable datagram");
                return;
            }
        };

        let header = match SecureHeader::from_bytes(&plain) {
            Ok(header) => header,
            Err(err) => {
                debug!(sender = %outer.socket_id, %err, "dropping frame with truncated header");
                return;
            }
        };

        let mut full = Bytes::from(plain);
        let payload = full.split_off(SECURE_HEADER_SIZE);
        let flags = header.flags;

        if flags.contains(FrameFlags::CREATE_CHANNEL) {
            self.handle_create(&peer, addr, header).await;
            return;
        }

        let client_call = flags.contains(FrameFlags::IS_CLIENT_CALL);
        let Some(channel) = peer.lookup(client_call, header.dest_port, header.source_port) else {
            debug!(
                dest = header.dest_port,
                source = header.source_port,
                "no live channel for frame"
            );
            return;
        };

        if flags.contains(FrameFlags::ACK) {
            let order = if flags.contains(FrameFlags::DISCONNECT) {
                None
            } else {
                Some(header.order)
            };
            channel.complete_ack(order);
        } else if flags.contains(FrameFlags::DISCONNECT) {
            channel.mark_disconnected();
            self.send_ack(&channel, addr, 0, FrameFlags::DISCONNECT).await;
        } else if !channel.is_disconnected() {
            if channel.is_buffered() {
                if channel.accept_data(payload, header.order).should_ack() {
                    self.send_ack(&channel, addr, header.order, FrameFlags::NONE).await;
                }
            } else {
                channel.deliver_frame(payload, header.order);
            }
        }
    }

    /// Instantiate the mirrored channel for an inbound create request.
    ///
    /// The request's source/destination ports swap roles: its
    /// destination is our local port. Without a matching acceptor no
    /// channel is registered and no ack is sent, so the opener's retry
    /// budget runs out.
    async fn handle_create(self: &Arc<Self>, peer: &Arc<Peer>, addr: SocketAddr, header: SecureHeader) {
        let buffered = header.flags.contains(FrameFlags::CHANNEL_AS_STREAM);

        if buffered {
            let Some(acceptor) = self.on_stream.read().clone() else {
                debug!("no stream acceptor installed; ignoring create request");
                return;
            };
            let channel = Channel::new(
                peer.clone(),
                addr,
                header.dest_port,
                header.source_port,
                true,
                false,
            );
            peer.register_incoming(&channel);
            self.send_ack(&channel, addr, 0, FrameFlags::NONE).await;
            let facade = StreamChannel::new(channel);
            tokio::spawn(async move { acceptor(facade) });
        } else {
            let Some(acceptor) = self.on_frames.read().clone() else {
                debug!("no frames acceptor installed; ignoring create request");
                return;
            };
            let channel = Channel::new(
                peer.clone(),
                addr,
                header.dest_port,
                header.source_port,
                false,
                false,
            );
            peer.register_incoming(&channel);
            self.send_ack(&channel, addr, 0, FrameFlags::NONE).await;
            let facade = FrameChannel::new(channel);
            tokio::spawn(async move { acceptor(facade) });
        }
    }

    #[cfg(test)]
    pub(crate) fn has_unmatched_handler(&self) -> bool {
        self.on_unmatched.read().is_some()
    }
}

/// One continuous receive loop; malformed input never stops it.
async fn receive_pump(shared: Arc<Shared>, io: Arc<UdpSocket>) {
    let mut buf = vec![0u8; MTU];
    loop {
        match io.recv_from(&mut buf).await {
            Ok((len, addr)) => shared.process_datagram(&buf[..len], addr).await,
            Err(err) => {
                warn!(%err, "receive failed");
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            }
        }
    }
}

/// The shared UDP endpoint of one LANES node.
///
/// Create it with an application-chosen magic and a persistent identity,
/// [`start`](Self::start) it on a bind address, authorize the remote
/// identities you share a password with, then open stream or frame
/// channels towards them. Incoming channels arrive through the
/// [`on_stream`](Self::on_stream) / [`on_frames`](Self::on_frames)
/// acceptors.
pub struct LanesSocket {
    shared: Arc<Shared>,
}

impl LanesSocket {
    /// Create a socket with the given protocol magic and identity.
    pub fn new(magic: u32, socket_id: SocketId) -> Self {
        Self {
            shared: Arc::new(Shared {
                magic,
                socket_id,
                io: RwLock::new(None),
                peers: RwLock::new(HashMap::new()),
                on_stream: RwLock::new(None),
                on_frames: RwLock::new(None),
                on_unmatched: RwLock::new(None),
                pump: Mutex::new(None),
            }),
        }
    }

    /// This socket's identity.
    pub fn socket_id(&self) -> SocketId {
        self.shared.socket_id
    }

    /// This socket's protocol magic.
    pub fn magic(&self) -> u32 {
        self.shared.magic
    }

    /// The bound local address.
    pub fn local_addr(&self) -> LanesResult<SocketAddr> {
        Ok(self.shared.io()?.local_addr()?)
    }

    /// Bind the UDP socket and start the receive pump.
    pub async fn start(&self, bind: SocketAddr) -> LanesResult<()> {
        let io = Arc::new(UdpSocket::bind(bind).await?);
        *self.shared.io.write() = Some(io.clone());

        let shared = self.shared.clone();
        let handle = tokio::spawn(receive_pump(shared, io));
        if let Some(previous) = self.shared.pump.lock().replace(handle) {
            previous.abort();
        }
        Ok(())
    }

    /// Stop the receive pump and release the UDP socket.
    ///
    /// Peers and their channels survive for a later [`start`](Self::start);
    /// operations in flight fail with their usual timeouts.
    pub fn stop(&self) {
        if let Some(handle) = self.shared.pump.lock().take() {
            handle.abort();
        }
        *self.shared.io.write() = None;
    }

    /// Authorize a remote identity with a shared password.
    ///
    /// Re-authorizing an already known identity atomically swaps its
    /// cipher to the new password.
    pub fn authorize(&self, remote_id: SocketId, password: &str) -> LanesResult<()> {
        if remote_id == self.shared.socket_id {
            return Err(LanesError::AuthorizeSelf);
        }

        let mut peers = self.shared.peers.write();
        match peers.get(&remote_id) {
            Some(peer) => peer.set_password(password),
            None => {
                let peer = Peer::new(Arc::downgrade(&self.shared), remote_id, password);
                peers.insert(remote_id, Arc::new(peer));
            }
        }
        Ok(())
    }

    /// Revoke a remote identity.
    ///
    /// Its datagrams are dropped from now on; existing channel handles
    /// fail on their next operation's timeout.
    pub fn unauthorize(&self, remote_id: SocketId) {
        self.shared.peers.write().remove(&remote_id);
    }

    fn peer(&self, remote_id: SocketId) -> LanesResult<Arc<Peer>> {
        self.shared
            .peers
            .read()
            .get(&remote_id)
            .cloned()
            .ok_or(LanesError::NotAuthorized)
    }

    /// Open a stream channel to an authorized remote.
    ///
    /// Blocks until the remote acknowledges the channel; fails with
    /// [`NotAuthorized`](LanesError::NotAuthorized) for unknown
    /// identities and [`AckTimeout`](LanesError::AckTimeout) when the
    /// remote never answers.
    pub async fn open_stream(
        &self,
        remote_id: SocketId,
        addr: SocketAddr,
        remote_port: u16,
    ) -> LanesResult<StreamChannel> {
        self.peer(remote_id)?.open_stream(addr, remote_port).await
    }

    /// Open a frames channel to an authorized remote.
    pub async fn open_frames(
        &self,
        remote_id: SocketId,
        addr: SocketAddr,
        remote_port: u16,
    ) -> LanesResult<FrameChannel> {
        self.peer(remote_id)?.open_frames(addr, remote_port).await
    }

    /// Install the acceptor for incoming stream channels.
    pub fn on_stream<F>(&self, acceptor: F)
    where
        F: Fn(StreamChannel) + Send + Sync + 'static,
    {
        *self.shared.on_stream.write() = Some(Arc::new(acceptor));
    }

    /// Remove the stream acceptor; further requests go unanswered.
    pub fn clear_on_stream(&self) {
        *self.shared.on_stream.write() = None;
    }

    /// Install the acceptor for incoming frame channels.
    pub fn on_frames<F>(&self, acceptor: F)
    where
        F: Fn(FrameChannel) + Send + Sync + 'static,
    {
        *self.shared.on_frames.write() = Some(Arc::new(acceptor));
    }

    /// Remove the frames acceptor.
    pub fn clear_on_frames(&self) {
        *self.shared.on_frames.write() = None;
    }

    /// Install the handler for datagrams that are not LANES traffic.
    ///
    /// Uninstall it again with [`clear_on_unmatched`](Self::clear_on_unmatched)
    /// once the out-of-band exchange is over, so later foreign traffic
    /// does not leak to a stale handler.
    pub fn on_unmatched<F>(&self, handler: F)
    where
        F: Fn(&[u8], SocketAddr) + Send + Sync + 'static,
    {
        *self.shared.on_unmatched.write() = Some(Arc::new(handler));
    }

    /// Remove the raw-datagram handler.
    pub fn clear_on_unmatched(&self) {
        *self.shared.on_unmatched.write() = None;
    }

    /// Send an arbitrary datagram, bypassing the protocol framing.
    pub async fn send_raw(&self, data: &[u8], addr: SocketAddr) -> LanesResult<usize> {
        Ok(self.shared.io()?.send_to(data, addr).await?)
    }

    /// Send an arbitrary datagram until `rx` resolves, with the standard
    /// retry schedule.
    pub(crate) async fn send_raw_with_retry<T>(
        &self,
        data: &[u8],
        addr: SocketAddr,
        rx: oneshot::Receiver<T>,
    ) -> LanesResult<T> {
        self.shared.send_with_retry(data, addr, rx).await
    }

    #[cfg(test)]
    pub(crate) fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }
}

impl Drop for LanesSocket {
    fn drop(&mut self) {
        self.stop();
        self.shared.peers.write().clear();
    }
}
