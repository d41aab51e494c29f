//! Media transport capability: the peer-connection surface a session drives.
//!
//! Only the interface lives here. [`loopback::LoopbackTransport`] is the
//! in-process implementation bundled with the crate.

pub mod loopback;

use crate::error::Result;
use crate::frame::VideoFrame;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

pub use loopback::{LoopbackRemote, LoopbackTransport};

/// Whether a description is an offer or an answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
}

impl fmt::Display for SdpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SdpKind::Offer => write!(f, "offer"),
            SdpKind::Answer => write!(f, "answer"),
        }
    }
}

/// A session description (SDP blob plus its kind).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    pub sdp: String,
    pub kind: SdpKind,
}

impl SessionDescription {
    pub fn new(sdp: impl Into<String>, kind: SdpKind) -> Self {
        Self {
            sdp: sdp.into(),
            kind,
        }
    }
}

/// One remote ICE candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IceCandidate {
    pub candidate: String,
    pub sdp_mid: String,
    pub sdp_mline_index: u16,
}

/// Data channel lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    Connecting,
    Open,
    Closing,
    Closed,
}

impl fmt::Display for ReadyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReadyState::Connecting => "connecting",
            ReadyState::Open => "open",
            ReadyState::Closing => "closing",
            ReadyState::Closed => "closed",
        };
        write!(f, "{}", name)
    }
}

/// A negotiated data channel.
pub trait DataChannel: Send + Sync {
    fn label(&self) -> &str;

    fn ready_state(&self) -> ReadyState;

    /// Sends a text message. Fails unless the channel is open.
    fn send(&self, message: &str) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Video,
    Audio,
}

/// A remote media track.
#[async_trait::async_trait]
pub trait MediaTrack: Send {
    fn kind(&self) -> TrackKind;

    /// Next decoded frame; `None` once the track has ended. Must be cancel-safe.
    async fn recv(&mut self) -> Option<VideoFrame>;
}

/// Events raised by the transport.
pub enum TransportEvent {
    /// The remote peer added a track.
    Track(Box<dyn MediaTrack>),
    /// The remote peer created a data channel.
    DataChannel(Arc<dyn DataChannel>),
    DataChannelOpen,
    DataChannelClose,
    DataChannelMessage(String),
    /// ICE/DTLS connectivity established.
    Connected,
    /// Unrecoverable transport failure.
    Failed(String),
}

impl fmt::Debug for TransportEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportEvent::Track(track) => write!(f, "Track({:?})", track.kind()),
            TransportEvent::DataChannel(channel) => write!(f, "DataChannel({})", channel.label()),
            TransportEvent::DataChannelOpen => write!(f, "DataChannelOpen"),
            TransportEvent::DataChannelClose => write!(f, "DataChannelClose"),
            TransportEvent::DataChannelMessage(m) => write!(f, "DataChannelMessage({})", m),
            TransportEvent::Connected => write!(f, "Connected"),
            TransportEvent::Failed(reason) => write!(f, "Failed({})", reason),
        }
    }
}

/// Peer-connection capability.
#[async_trait::async_trait]
pub trait MediaTransport: Send {
    async fn create_offer(&mut self) -> Result<SessionDescription>;

    async fn create_answer(&mut self) -> Result<SessionDescription>;

    async fn set_local_description(&mut self, description: SessionDescription) -> Result<()>;

    async fn set_remote_description(&mut self, description: SessionDescription) -> Result<()>;

    /// Applies a remote candidate. Fails if no remote description is set.
    async fn add_ice_candidate(&mut self, candidate: IceCandidate) -> Result<()>;

    fn local_description(&self) -> Option<SessionDescription>;

    /// Next transport event; `None` once the transport is closed. Must be cancel-safe.
    async fn next_event(&mut self) -> Option<TransportEvent>;

    /// Forwards a frame on the outgoing local track.
    fn send_frame(&mut self, frame: VideoFrame) -> Result<()>;

    async fn close(&mut self) -> Result<()>;
}

/// Builds a fresh transport per session attempt.
pub trait TransportFactory: Send + Sync {
    fn create(&self, ice_servers: &[String]) -> Result<Box<dyn MediaTransport>>;
}
