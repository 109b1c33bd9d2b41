//! Per-channel reliable delivery.
//!
//! A channel is one logical bidirectional connection between a
//! (local port, remote port) pair under an authorized peer. Delivery is
//! stop-and-wait: each side keeps one outstanding unacknowledged frame
//! per channel, stamps outbound data with a monotonically increasing
//! order, and accepts inbound data only at the expected order (or
//! re-acknowledges the immediately preceding order when the peer missed
//! our ack).

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{Notify, oneshot};

use crate::core::{LanesError, LanesResult, RING_CAPACITY};
use crate::transport::buffer::SegmentRing;
use crate::transport::peer::Peer;
use crate::transport::wire::FrameFlags;

/// Callback invoked for every payload arriving on a frames channel.
pub type FrameHandler = dyn Fn(Bytes, u32) + Send + Sync;

/// What the receive path decided about an inbound data frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RecvDisposition {
    /// In-order frame, buffered for the consumer.
    Accepted,
    /// Duplicate of the frame delivered last; the peer missed our ack.
    Repeated,
    /// Out-of-window order, or the ring is full; the frame vanishes and
    /// the sender's retry timer recovers.
    Discarded,
}

impl RecvDisposition {
    /// Whether the frame's order must be acknowledged to the sender.
    pub(crate) fn should_ack(self) -> bool {
        matches!(self, Self::Accepted | Self::Repeated)
    }
}

struct RecvState {
    next_order: u32,
    ring: Option<SegmentRing>,
}

struct AckSlot {
    order: u32,
    tx: oneshot::Sender<()>,
}

/// One logical connection under a peer.
///
/// Constructed by the socket layer, either for a local open (client
/// role) or on receipt of a create-channel frame (server role), and
/// handed to the application wrapped in a [`StreamChannel`] or
/// [`FrameChannel`] facade.
///
/// [`StreamChannel`]: crate::transport::stream::StreamChannel
/// [`FrameChannel`]: crate::transport::frames::FrameChannel
pub struct Channel {
    peer: Arc<Peer>,
    remote_addr: SocketAddr,
    local_port: u16,
    remote_port: u16,
    buffered: bool,
    /// Stamped on every outbound frame so the remote resolves the right
    /// routing table; `IS_CLIENT_CALL` on client-opened channels.
    direction: FrameFlags,
    give_back: bool,
    disconnected: AtomicBool,
    recv: Mutex<RecvState>,
    data_ready: Notify,
    send_order: AtomicU32,
    pending_ack: Mutex<Option<AckSlot>>,
    on_frame: Mutex<Option<Arc<FrameHandler>>>,
}

impl Channel {
    pub(crate) fn new(
        peer: Arc<Peer>,
        remote_addr: SocketAddr,
        local_port: u16,
        remote_port: u16,
        buffered: bool,
        client: bool,
    ) -> Arc<Self> {
        Arc::new(Self {
            peer,
            remote_addr,
            local_port,
            remote_port,
            buffered,
            direction: if client {
                FrameFlags::IS_CLIENT_CALL
            } else {
                FrameFlags::NONE
            },
            give_back: client,
            disconnected: AtomicBool::new(false),
            recv: Mutex::new(RecvState {
                next_order: 0,
                ring: buffered.then(|| SegmentRing::new(RING_CAPACITY)),
            }),
            data_ready: Notify::new(),
            send_order: AtomicU32::new(0),
            pending_ack: Mutex::new(None),
            on_frame: Mutex::new(None),
        })
    }

    /// The peer this channel belongs to.
    pub(crate) fn peer(&self) -> &Arc<Peer> {
        &self.peer
    }

    /// UDP address frames are sent to.
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// This side's channel port.
    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    /// The remote side's channel port.
    pub fn remote_port(&self) -> u16 {
        self.remote_port
    }

    /// Whether inbound data is buffered for blocking reads (stream mode).
    pub fn is_buffered(&self) -> bool {
        self.buffered
    }

    /// Whether the channel has reached its terminal state.
    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::Acquire)
    }

    pub(crate) fn direction(&self) -> FrameFlags {
        self.direction
    }

    /// Largest payload one frame to this peer can carry.
    pub fn max_payload(&self) -> usize {
        self.peer.data_size()
    }

    fn ensure_connected(&self) -> LanesResult<()> {
        if self.is_disconnected() {
            return Err(LanesError::Disconnected);
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Receive path (called from the socket's receive pump)
    // -------------------------------------------------------------------------

    /// Run an inbound data frame through the ordering check.
    ///
    /// `order == next` buffers and advances; `order == next - 1` is the
    /// previously delivered frame resent because our ack was lost, so it
    /// is re-acknowledged without being re-buffered; anything else is
    /// dropped. A full ring rejects the frame unacknowledged.
    pub(crate) fn accept_data(&self, segment: Bytes, order: u32) -> RecvDisposition {
        let mut recv = self.recv.lock();

        if recv.next_order == order {
            let Some(ring) = recv.ring.as_mut() else {
                return RecvDisposition::Discarded;
            };
            if ring.push(segment) {
                recv.next_order = recv.next_order.wrapping_add(1);
                drop(recv);
                self.data_ready.notify_one();
                RecvDisposition::Accepted
            } else {
                RecvDisposition::Discarded
            }
        } else if recv.next_order == order.wrapping_add(1) {
            RecvDisposition::Repeated
        } else {
            RecvDisposition::Discarded
        }
    }

    /// Hand a payload to the registered frames callback, if any.
    pub(crate) fn deliver_frame(&self, payload: Bytes, order: u32) {
        let handler = self.on_frame.lock().clone();
        if let Some(handler) = handler {
            handler(payload, order);
        }
    }

    /// Install or clear the frames callback.
    pub(crate) fn set_frame_handler(&self, handler: Option<Arc<FrameHandler>>) {
        *self.on_frame.lock() = handler;
    }

    /// Resolve an inbound acknowledgement against the outstanding send.
    ///
    /// `Some(order)` completes the wait only when it names the
    /// outstanding order (stale acks are ignored); `None` is a
    /// disconnect acknowledgement and always completes it.
    pub(crate) fn complete_ack(&self, order: Option<u32>) {
        let mut slot = self.pending_ack.lock();
        let matches = match (&*slot, order) {
            (Some(pending), Some(order)) => pending.order == order,
            (Some(_), None) => true,
            (None, _) => false,
        };
        if matches {
            if let Some(pending) = slot.take() {
                let _ = pending.tx.send(());
            }
        }
    }

    /// Mark the channel disconnected and wake any blocked reader so it
    /// observes end-of-stream instead of a timeout.
    pub(crate) fn mark_disconnected(&self) {
        self.disconnected.store(true, Ordering::Release);
        self.data_ready.notify_one();
    }

    // -------------------------------------------------------------------------
    // Send path
    // -------------------------------------------------------------------------

    fn arm_ack(&self, order: u32) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        *self.pending_ack.lock() = Some(AckSlot { order, tx });
        rx
    }

    /// Announce this channel to the remote and wait for its acknowledgement.
    pub(crate) async fn establish(&self) -> LanesResult<()> {
        let mut flags = FrameFlags::CREATE_CHANNEL;
        if self.buffered {
            flags = flags | FrameFlags::CHANNEL_AS_STREAM;
        }
        self.control_round(flags).await
    }

    /// Tear the channel down: send the disconnect control frame, wait
    /// for its acknowledgement with the usual retry budget, and leave
    /// the channel in its terminal state either way.
    pub(crate) async fn disconnect(&self) -> LanesResult<()> {
        if self.is_disconnected() {
            return Ok(());
        }
        let result = self.control_round(FrameFlags::DISCONNECT).await;
        self.mark_disconnected();
        result
    }

    // Control frames ride order 0 and leave the send counter alone; the
    // next data frame starts the order sequence.
    async fn control_round(&self, flags: FrameFlags) -> LanesResult<()> {
        let rx = self.arm_ack(0);
        let socket = self.peer.socket()?;
        socket.send_channel_frame(self, flags, 0, &[], Some(rx)).await
    }

    /// Send up to one frame's worth of `data` and wait for the matching
    /// acknowledgement. Returns the number of bytes actually sent.
    pub(crate) async fn write_acked(&self, data: &[u8]) -> LanesResult<usize> {
        self.ensure_connected()?;

        let order = self.send_order.load(Ordering::Acquire);
        let count = data.len().min(self.peer.data_size());
        let rx = self.arm_ack(order);
        let socket = self.peer.socket()?;
        socket
            .send_channel_frame(self, FrameFlags::NONE, order, &data[..count], Some(rx))
            .await?;
        self.send_order.store(order.wrapping_add(1), Ordering::Release);
        Ok(count)
    }

    /// Send one discrete frame without waiting for acknowledgement.
    pub(crate) async fn write_frame(&self, payload: &[u8]) -> LanesResult<()> {
        self.ensure_connected()?;

        let max = self.peer.data_size();
        if payload.len() > max {
            return Err(LanesError::FrameTooLarge {
                len: payload.len(),
                max,
            });
        }

        let order = self.send_order.load(Ordering::Acquire);
        let socket = self.peer.socket()?;
        socket
            .send_channel_frame(self, FrameFlags::NONE, order, payload, None)
            .await?;
        self.send_order.store(order.wrapping_add(1), Ordering::Release);
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Consumer read path (stream channels)
    // -------------------------------------------------------------------------

    /// Copy buffered bytes into `dst`, blocking up to `timeout` per wait
    /// for data to arrive.
    ///
    /// Returns `Ok(0)` once the channel is disconnected (end-of-stream).
    pub(crate) async fn read(&self, dst: &mut [u8], timeout: Duration) -> LanesResult<usize> {
        if dst.is_empty() {
            return Ok(0);
        }

        loop {
            let notified = self.data_ready.notified();

            if self.is_disconnected() {
                return Ok(0);
            }

            {
                let mut recv = self.recv.lock();
                let Some(ring) = recv.ring.as_mut() else {
                    return Ok(0);
                };
                let mut total = 0;
                loop {
                    let n = ring.read(&mut dst[total..]);
                    if n == 0 {
                        break;
                    }
                    total += n;
                    if total == dst.len() {
                        break;
                    }
                }
                if total > 0 {
                    return Ok(total);
                }
            }

            if tokio::time::timeout(timeout, notified).await.is_err() {
                return Err(LanesError::ReadTimeout);
            }
        }
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        if self.give_back {
            self.peer.release_port(self.local_port);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::wire::SocketId;
    use std::sync::Weak;

    fn test_peer() -> Arc<Peer> {
        Arc::new(Peer::new(Weak::new(), SocketId::generate(), "pw"))
    }

    fn test_addr() -> SocketAddr {
        "127.0.0.1:4000".parse().unwrap()
    }

    fn stream_channel() -> Arc<Channel> {
        Channel::new(test_peer(), test_addr(), 100, 200, true, false)
    }

    fn seg(data: &'static [u8]) -> Bytes {
        Bytes::from_static(data)
    }

    #[test]
    fn test_in_order_frames_accepted() {
        let chan = stream_channel();
        assert_eq!(chan.accept_data(seg(b"a"), 0), RecvDisposition::Accepted);
        assert_eq!(chan.accept_data(seg(b"b"), 1), RecvDisposition::Accepted);
        assert_eq!(chan.accept_data(seg(b"c"), 2), RecvDisposition::Accepted);
    }

    #[test]
    fn test_duplicate_reacked_not_rebuffered() {
        let chan = stream_channel();
        assert_eq!(chan.accept_data(seg(b"a"), 0), RecvDisposition::Accepted);
        // The peer missed our ack and resent: acknowledge again, buffer once.
        let dup = chan.accept_data(seg(b"a"), 0);
        assert_eq!(dup, RecvDisposition::Repeated);
        assert!(dup.should_ack());

        let mut buf = [0u8; 16];
        assert_eq!(chan.recv.lock().ring.as_mut().unwrap().read(&mut buf), 1);
        assert_eq!(chan.recv.lock().ring.as_mut().unwrap().read(&mut buf), 0);
    }

    #[test]
    fn test_out_of_window_ignored() {
        let chan = stream_channel();
        let far = chan.accept_data(seg(b"x"), 5);
        assert_eq!(far, RecvDisposition::Discarded);
        assert!(!far.should_ack());
        // Expected order is still 0.
        assert_eq!(chan.accept_data(seg(b"a"), 0), RecvDisposition::Accepted);
    }

    #[test]
    fn test_order_wraps_around() {
        let chan = stream_channel();
        chan.recv.lock().next_order = u32::MAX;
        assert_eq!(chan.accept_data(seg(b"z"), u32::MAX), RecvDisposition::Accepted);
        assert_eq!(chan.recv.lock().next_order, 0);
        // The wrapped-around previous frame still counts as the duplicate.
        assert_eq!(chan.accept_data(seg(b"z"), u32::MAX), RecvDisposition::Repeated);
        assert_eq!(chan.accept_data(seg(b"a"), 0), RecvDisposition::Accepted);
    }

    #[test]
    fn test_full_ring_rejects_without_ack() {
        let chan = stream_channel();
        for order in 0..RING_CAPACITY as u32 {
            assert_eq!(chan.accept_data(seg(b"x"), order), RecvDisposition::Accepted);
        }

        // Ring saturated: the next in-order frame is dropped unacked and
        // the expected order does not advance.
        let full = chan.accept_data(seg(b"y"), RING_CAPACITY as u32);
        assert_eq!(full, RecvDisposition::Discarded);
        assert!(!full.should_ack());

        // Draining one segment makes the resent frame acceptable.
        let mut buf = [0u8; 1];
        assert_eq!(chan.recv.lock().ring.as_mut().unwrap().read(&mut buf), 1);
        assert_eq!(
            chan.accept_data(seg(b"y"), RING_CAPACITY as u32),
            RecvDisposition::Accepted
        );
    }

    #[test]
    fn test_ack_matches_outstanding_order_only() {
        let chan = stream_channel();
        let mut rx = chan.arm_ack(3);

        chan.complete_ack(Some(2));
        assert!(rx.try_recv().is_err());

        chan.complete_ack(Some(3));
        assert!(rx.try_recv().is_ok());

        // A second matching ack finds no outstanding slot.
        chan.complete_ack(Some(3));
    }

    #[test]
    fn test_disconnect_ack_bypasses_order() {
        let chan = stream_channel();
        let mut rx = chan.arm_ack(7);
        chan.complete_ack(None);
        assert!(rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_read_delivers_buffered_bytes() {
        let chan = stream_channel();
        chan.accept_data(seg(b"hello "), 0);
        chan.accept_data(seg(b"world"), 1);

        let mut buf = [0u8; 64];
        let n = chan.read(&mut buf, Duration::from_millis(50)).await.unwrap();
        assert_eq!(&buf[..n], b"hello world");
    }

    #[tokio::test]
    async fn test_read_times_out_when_idle() {
        let chan = stream_channel();
        let mut buf = [0u8; 8];
        let err = chan.read(&mut buf, Duration::from_millis(20)).await;
        assert!(matches!(err, Err(LanesError::ReadTimeout)));
    }

    #[tokio::test]
    async fn test_read_returns_eof_after_disconnect() {
        let chan = stream_channel();
        chan.accept_data(seg(b"pending"), 0);
        chan.mark_disconnected();

        let mut buf = [0u8; 8];
        assert_eq!(chan.read(&mut buf, Duration::from_millis(20)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_disconnect_wakes_blocked_reader() {
        let chan = stream_channel();
        let reader = chan.clone();
        let task = tokio::spawn(async move {
            let mut buf = [0u8; 8];
            reader.read(&mut buf, Duration::from_secs(5)).await
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        chan.mark_disconnected();

        assert_eq!(task.await.unwrap().unwrap(), 0);
    }

    #[test]
    fn test_frames_callback_receives_payload() {
        let chan = Channel::new(test_peer(), test_addr(), 1, 2, false, false);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        chan.set_frame_handler(Some(Arc::new(move |payload: Bytes, order| {
            sink.lock().push((payload.to_vec(), order));
        })));

        chan.deliver_frame(seg(b"ping"), 4);
        assert_eq!(seen.lock().as_slice(), &[(b"ping".to_vec(), 4)]);
    }
}
