//! Transport layer: wire framing, channels, peers and the shared socket.

mod buffer;
pub mod channel;
pub mod frames;
pub mod peer;
pub mod socket;
pub mod stream;
pub mod wire;

pub use channel::{Channel, FrameHandler};
pub use frames::FrameChannel;
pub use peer::Peer;
pub use socket::{FramesAcceptor, LanesSocket, RawHandler, StreamAcceptor};
pub use stream::StreamChannel;
pub use wire::{FrameFlags, OuterHeader, SecureHeader, SocketId};
