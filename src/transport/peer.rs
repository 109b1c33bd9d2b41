//! Authorized remote endpoints.
//!
//! A [`Peer`] is one authorized remote identity under a socket: it owns
//! the password-derived cipher, the pool of local channel ports, and the
//! live channel tables used to route inbound frames.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};

use crate::core::{CryptoError, LanesError, LanesResult, MTU, SECURE_HEADER_SIZE};
use crate::crypto::{FrameCipher, max_payload};
use crate::transport::channel::Channel;
use crate::transport::frames::FrameChannel;
use crate::transport::socket::Shared;
use crate::transport::stream::StreamChannel;
use crate::transport::wire::SocketId;

/// Cipher state swapped atomically on every password change.
///
/// `data_size` is the effective maximum payload, fixed at password-set
/// time from the cipher's block size and the link MTU.
struct PeerSecret {
    cipher: FrameCipher,
    data_size: usize,
}

impl PeerSecret {
    fn derive(password: &str) -> Self {
        Self {
            cipher: FrameCipher::from_password(password),
            data_size: max_payload(MTU),
        }
    }
}

/// Pool of 16-bit channel ports for locally opened channels.
///
/// Ports count down from the maximum value; ports released by closed
/// client channels are handed out again before the counter moves.
pub(crate) struct PortPool {
    next: u16,
    reuse: Vec<u16>,
}

impl PortPool {
    fn new() -> Self {
        Self {
            next: u16::MAX,
            reuse: Vec::new(),
        }
    }

    pub(crate) fn allocate(&mut self) -> LanesResult<u16> {
        if let Some(port) = self.reuse.pop() {
            return Ok(port);
        }
        if self.next == 0 {
            return Err(LanesError::PortsExhausted);
        }
        let port = self.next;
        self.next -= 1;
        Ok(port)
    }

    pub(crate) fn release(&mut self, port: u16) {
        self.reuse.push(port);
    }
}

/// Channels keyed by (local port, remote port).
///
/// Entries are weak: the table never keeps a released channel alive, and
/// routing treats a dead entry the same as a missing one.
type ChannelTable = HashMap<(u16, u16), Weak<Channel>>;

/// One authorized remote identity and its channel state.
pub struct Peer {
    socket: Weak<Shared>,
    remote_id: SocketId,
    secret: RwLock<PeerSecret>,
    /// Channels this endpoint opened.
    outgoing: Mutex<ChannelTable>,
    /// Channels the remote opened.
    incoming: Mutex<ChannelTable>,
    ports: Mutex<PortPool>,
}

impl Peer {
    pub(crate) fn new(socket: Weak<Shared>, remote_id: SocketId, password: &str) -> Self {
        Self {
            socket,
            remote_id,
            secret: RwLock::new(PeerSecret::derive(password)),
            outgoing: Mutex::new(HashMap::new()),
            incoming: Mutex::new(HashMap::new()),
            ports: Mutex::new(PortPool::new()),
        }
    }

    /// Identity of the remote endpoint.
    pub fn remote_id(&self) -> SocketId {
        self.remote_id
    }

    /// Re-derive the cipher from a new password.
    ///
    /// The cipher and payload limit swap together under the write lock;
    /// frames sealed before the swap remain decryptable only under the
    /// old password.
    pub(crate) fn set_password(&self, password: &str) {
        *self.secret.write() = PeerSecret::derive(password);
    }

    /// Effective maximum payload per frame.
    pub(crate) fn data_size(&self) -> usize {
        self.secret.read().data_size
    }

    /// Encrypt one frame's plaintext (secure header + payload).
    pub(crate) fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let secret = self.secret.read();
        let max_plaintext = secret.data_size + SECURE_HEADER_SIZE;
        secret.cipher.seal(plaintext, max_plaintext)
    }

    /// Decrypt one frame's encrypted region.
    pub(crate) fn open(&self, body: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.secret.read().cipher.open(body)
    }

    /// The owning socket, while it is alive.
    pub(crate) fn socket(&self) -> LanesResult<Arc<Shared>> {
        self.socket.upgrade().ok_or(LanesError::NotStarted)
    }

    /// Open a stream channel to `remote_port` at `addr`.
    pub(crate) async fn open_stream(
        self: &Arc<Self>,
        addr: SocketAddr,
        remote_port: u16,
    ) -> LanesResult<StreamChannel> {
        let channel = self.create_outgoing(addr, remote_port, true)?;
        channel.establish().await?;
        Ok(StreamChannel::new(channel))
    }

    /// Open a frames channel to `remote_port` at `addr`.
    pub(crate) async fn open_frames(
        self: &Arc<Self>,
        addr: SocketAddr,
        remote_port: u16,
    ) -> LanesResult<FrameChannel> {
        let channel = self.create_outgoing(addr, remote_port, false)?;
        channel.establish().await?;
        Ok(FrameChannel::new(channel))
    }

    /// Allocate a local port and register a client channel under it.
    ///
    /// If the open fails later, dropping the channel returns the port.
    fn create_outgoing(
        self: &Arc<Self>,
        addr: SocketAddr,
        remote_port: u16,
        buffered: bool,
    ) -> LanesResult<Arc<Channel>> {
        let port = self.ports.lock().allocate()?;
        let channel = Channel::new(Arc::clone(self), addr, port, remote_port, buffered, true);
        self.outgoing
            .lock()
            .insert((port, remote_port), Arc::downgrade(&channel));
        Ok(channel)
    }

    /// Register a channel the remote opened.
    pub(crate) fn register_incoming(&self, channel: &Arc<Channel>) {
        self.incoming.lock().insert(
            (channel.local_port(), channel.remote_port()),
            Arc::downgrade(channel),
        );
    }

    /// Resolve a live channel for an inbound frame.
    ///
    /// Frames flagged as client calls were sent by the side that opened
    /// the channel, so they resolve against our incoming table;
    /// everything else against outgoing.
    pub(crate) fn lookup(
        &self,
        client_call: bool,
        local_port: u16,
        remote_port: u16,
    ) -> Option<Arc<Channel>> {
        let table = if client_call {
            self.incoming.lock()
        } else {
            self.outgoing.lock()
        };
        table.get(&(local_port, remote_port)).and_then(Weak::upgrade)
    }

    /// Return a client channel's port to the pool.
    pub(crate) fn release_port(&self, port: u16) {
        self.ports.lock().release(port);
    }
}
