//! Signaling: the control channel used to register and negotiate calls.

pub mod channel;
pub mod protocol;
pub mod tcp;

pub use channel::{MockSignaling, MockSignalingHandle, SignalingChannel, SignalingEvent};
pub use protocol::{
    CandidateMessage, Envelope, InboundMessage, OutboundMessage, Registration, SdpMessage,
};
pub use tcp::TcpSignaling;
