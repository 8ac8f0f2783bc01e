//! Signaling: wire protocol and the reconnecting control channel

pub mod channel;
pub mod protocol;

pub use channel::{ChannelEvent, SignalingChannel};
pub use protocol::{
    Camera, IceCandidate, IncomingMessage, OutgoingMessage, PeerMessage, PeerMessageInner,
    PeerRole, PeerStatus, SdpMessage,
};
