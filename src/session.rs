//! Per-peer session: registration, offer/answer/ICE negotiation, data channel
//! lifecycle and frame processing, all on one event loop.
//!
//! ```text
//! Idle ─connected─▶ Registering ─ack─▶ AwaitingNegotiation ─offer─▶ Negotiating
//!                                                                    │
//!                         connected / track / data channel open ◀────┘
//!                                          │
//!                                          ▼
//!                     Connected ─end call / failure─▶ Closing ─▶ Closed
//! ```
//!
//! Landmark extraction and classification run on the blocking pool. While
//! either is in flight no new frame is taken from the track, so signaling and
//! transport events keep flowing while the media track applies backpressure.

use crate::defaults;
use crate::error::{Result, SigncastError};
use crate::frame::VideoFrame;
use crate::pipeline::classifier::PredictionEvent;
use crate::pipeline::recognizer::{FramePipeline, FrameThrottle, PipelineConfig, run_classifier};
use crate::pose::sample::Sample;
use crate::signaling::{
    CandidateMessage, InboundMessage, OutboundMessage, Registration, SdpMessage, SignalingChannel,
    SignalingEvent,
};
use crate::transport::{
    DataChannel, IceCandidate, MediaTrack, MediaTransport, ReadyState, SdpKind, TrackKind,
    TransportEvent,
};
use std::fmt;
use std::sync::Arc;
use tokio::task::{JoinError, JoinHandle};

/// Message sent once when the data channel opens so the peer can verify it.
pub const DATA_CHANNEL_PROBE: &str = r#"{"test":"DataChannel is working"}"#;

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Registering,
    AwaitingNegotiation,
    Negotiating,
    Connected,
    Closing,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Registering => "registering",
            SessionState::AwaitingNegotiation => "awaiting-negotiation",
            SessionState::Negotiating => "negotiating",
            SessionState::Connected => "connected",
            SessionState::Closing => "closing",
            SessionState::Closed => "closed",
        };
        write!(f, "{}", name)
    }
}

/// Which side produced the offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Answers a remote offer (the usual agent role).
    Responder,
    /// Sent the offer itself.
    Initiator,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataChannelState {
    Absent,
    Connecting,
    Open,
    Closed,
}

/// How a session ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The peer or server sent an explicit end-of-call.
    CallEnded,
}

/// Whether the event loop keeps going after an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Finished(SessionEnd),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Advertised in the `from` field of outgoing negotiation messages.
    pub peer_id: String,
    pub pipeline: PipelineConfig,
    pub target_fps: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            peer_id: defaults::PEER_ID.to_string(),
            pipeline: PipelineConfig::default(),
            target_fps: defaults::TARGET_FPS,
        }
    }
}

/// Generates a 12-character alphanumeric session identifier.
pub fn generate_session_id() -> String {
    uuid::Uuid::new_v4()
        .simple()
        .to_string()
        .chars()
        .take(defaults::SESSION_ID_LEN)
        .collect()
}

struct InFlight<T> {
    generation: u64,
    handle: JoinHandle<T>,
}

type Extraction = (VideoFrame, Result<Sample>);

/// One peer session.
pub struct Session {
    id: String,
    peer_id: String,
    role: Role,
    remote_peer: Option<String>,
    state: SessionState,
    channel_state: DataChannelState,
    channel: Option<Arc<dyn DataChannel>>,
    pending_ice: Vec<IceCandidate>,
    remote_description_set: bool,
    signaling: Box<dyn SignalingChannel>,
    transport: Box<dyn MediaTransport>,
    track: Option<Box<dyn MediaTrack>>,
    throttle: FrameThrottle,
    pipeline: FramePipeline,
    extraction: Option<InFlight<Extraction>>,
    inference: Option<InFlight<Result<PredictionEvent>>>,
}

impl Session {
    pub fn new(
        id: impl Into<String>,
        config: &SessionConfig,
        signaling: Box<dyn SignalingChannel>,
        transport: Box<dyn MediaTransport>,
        pipeline: FramePipeline,
    ) -> Self {
        Self {
            id: id.into(),
            peer_id: config.peer_id.clone(),
            role: Role::Responder,
            remote_peer: None,
            state: SessionState::Idle,
            channel_state: DataChannelState::Absent,
            channel: None,
            pending_ice: Vec::new(),
            remote_description_set: false,
            signaling,
            transport,
            track: None,
            throttle: FrameThrottle::new(config.target_fps),
            pipeline,
            extraction: None,
            inference: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn remote_peer(&self) -> Option<&str> {
        self.remote_peer.as_deref()
    }

    pub fn data_channel_state(&self) -> DataChannelState {
        self.channel_state
    }

    /// Candidates waiting for a remote description.
    pub fn pending_candidates(&self) -> usize {
        self.pending_ice.len()
    }

    pub fn pipeline(&self) -> &FramePipeline {
        &self.pipeline
    }

    /// Runs the session until the call ends or a session-fatal error occurs.
    ///
    /// The transport and signaling channel are torn down on every exit path
    /// and the session ends in [`SessionState::Closed`].
    pub async fn run(&mut self) -> Result<SessionEnd> {
        let result = self.drive().await;
        if let Err(e) = &result {
            log::warn!("[{}] Session failed in state {}: {}", self.id, self.state, e);
        }
        self.close().await;
        result
    }

    async fn drive(&mut self) -> Result<SessionEnd> {
        self.signaling.connect().await?;
        loop {
            let flow = tokio::select! {
                event = self.signaling.next_event() => match event {
                    Some(event) => self.handle_signaling(event).await?,
                    None => return Err(SigncastError::SignalingClosed),
                },
                event = self.transport.next_event() => match event {
                    Some(event) => self.handle_transport(event).await?,
                    None => {
                        return Err(SigncastError::Transport {
                            message: "transport closed unexpectedly".to_string(),
                        });
                    }
                },
                frame = next_frame(&mut self.track, &self.throttle), if self.accepting_frames() => {
                    match frame {
                        Some(frame) => {
                            self.throttle.mark();
                            self.on_frame(frame);
                        }
                        None => {
                            log::info!("[{}] Video track ended", self.id);
                            self.track = None;
                        }
                    }
                    Flow::Continue
                }
                (generation, joined) = join_in_flight(&mut self.extraction) => {
                    self.extraction = None;
                    self.on_extracted(generation, joined);
                    Flow::Continue
                }
                (generation, joined) = join_in_flight(&mut self.inference) => {
                    self.inference = None;
                    self.on_inferred(generation, joined);
                    Flow::Continue
                }
            };
            if let Flow::Finished(end) = flow {
                return Ok(end);
            }
        }
    }

    fn accepting_frames(&self) -> bool {
        self.track.is_some() && self.extraction.is_none() && self.inference.is_none()
    }

    /// Applies one signaling event.
    ///
    /// Negotiation problems are logged and leave the state untouched; only a
    /// lost signaling channel is returned as an error.
    pub async fn handle_signaling(&mut self, event: SignalingEvent) -> Result<Flow> {
        match event {
            SignalingEvent::Connected => self.register().await?,
            SignalingEvent::Disconnected(reason) => {
                return Err(SigncastError::SignalingConnection {
                    message: format!(
                        "disconnected from signaling server ({})",
                        reason.as_deref().unwrap_or("closed by server")
                    ),
                });
            }
            SignalingEvent::Message(message) => return self.handle_message(message).await,
        }
        Ok(Flow::Continue)
    }

    async fn register(&mut self) -> Result<()> {
        if self.state != SessionState::Idle {
            log::debug!("[{}] Ignoring reconnect in state {}", self.id, self.state);
            return Ok(());
        }
        self.state = SessionState::Registering;
        log::info!("[{}] Registering with signaling server", self.id);
        self.signaling
            .emit(OutboundMessage::Register(Registration::server(self.id.clone())))
            .await
    }

    async fn handle_message(&mut self, message: InboundMessage) -> Result<Flow> {
        log::debug!("[{}] Received {} in state {}", self.id, message.name(), self.state);
        match message {
            InboundMessage::RegisterAck { peer_id } => {
                if self.state == SessionState::Registering {
                    self.state = SessionState::AwaitingNegotiation;
                    log::info!(
                        "[{}] Registered{}",
                        self.id,
                        peer_id.map(|p| format!(" as {}", p)).unwrap_or_default()
                    );
                }
            }
            InboundMessage::Offer(offer) => self.on_offer(offer).await?,
            InboundMessage::Answer(answer) => self.on_answer(answer).await,
            InboundMessage::Candidate(candidate) => self.on_candidate(candidate).await,
            InboundMessage::EndCall => {
                log::info!("[{}] Call ended by peer", self.id);
                return Ok(Flow::Finished(SessionEnd::CallEnded));
            }
            InboundMessage::NoAvailableServers => {
                log::info!("[{}] Server reports no available agents", self.id)
            }
        }
        Ok(Flow::Continue)
    }

    async fn on_offer(&mut self, offer: SdpMessage) -> Result<()> {
        if !matches!(
            self.state,
            SessionState::Registering | SessionState::AwaitingNegotiation
        ) {
            log::warn!("[{}] Ignoring offer in state {}", self.id, self.state);
            return Ok(());
        }
        let from = offer.from.clone();
        log::info!(
            "[{}] Offer from {}",
            self.id,
            from.as_deref().unwrap_or("unknown peer")
        );

        if let Err(e) = self.transport.set_remote_description(offer.description()).await {
            log::warn!("[{}] Rejected offer: {}", self.id, e);
            return Ok(());
        }
        self.remote_description_set = true;
        self.role = Role::Responder;
        self.remote_peer = from.clone();
        self.apply_pending_candidates().await;

        let answer = match self.transport.create_answer().await {
            Ok(answer) => answer,
            Err(e) => {
                log::warn!("[{}] Could not create answer: {}", self.id, e);
                return Ok(());
            }
        };
        if let Err(e) = self.transport.set_local_description(answer.clone()).await {
            log::warn!("[{}] Could not apply local answer: {}", self.id, e);
            return Ok(());
        }

        self.signaling
            .emit(OutboundMessage::Answer(SdpMessage {
                sdp: answer.sdp,
                kind: SdpKind::Answer,
                from: Some(self.peer_id.clone()),
                to: from,
            }))
            .await?;
        self.state = SessionState::Negotiating;
        log::info!("[{}] Answer sent", self.id);
        Ok(())
    }

    /// Starts the self-initiated path: creates an offer and sends it to `to`.
    pub async fn start_offer(&mut self, to: &str) -> Result<()> {
        if self.state != SessionState::AwaitingNegotiation {
            return Err(SigncastError::Negotiation {
                message: format!("cannot offer in state {}", self.state),
            });
        }
        let offer = self.transport.create_offer().await?;
        self.transport.set_local_description(offer.clone()).await?;
        self.signaling
            .emit(OutboundMessage::Offer(SdpMessage {
                sdp: offer.sdp,
                kind: SdpKind::Offer,
                from: Some(self.peer_id.clone()),
                to: Some(to.to_string()),
            }))
            .await?;
        self.role = Role::Initiator;
        self.remote_peer = Some(to.to_string());
        self.state = SessionState::Negotiating;
        log::info!("[{}] Offer sent to {}", self.id, to);
        Ok(())
    }

    async fn on_answer(&mut self, answer: SdpMessage) {
        if self.state != SessionState::Negotiating || self.role != Role::Initiator {
            log::warn!(
                "[{}] Ignoring answer in state {} as {:?}",
                self.id,
                self.state,
                self.role
            );
            return;
        }
        if let Err(e) = self.transport.set_remote_description(answer.description()).await {
            log::warn!("[{}] Rejected answer: {}", self.id, e);
            return;
        }
        self.remote_description_set = true;
        self.apply_pending_candidates().await;
        log::info!("[{}] Answer applied, waiting for connectivity", self.id);
    }

    async fn on_candidate(&mut self, message: CandidateMessage) {
        let candidate = message.to_ice();
        if !self.remote_description_set {
            self.pending_ice.push(candidate);
            log::debug!(
                "[{}] Queued ICE candidate ({} pending)",
                self.id,
                self.pending_ice.len()
            );
            return;
        }
        if let Err(e) = self.transport.add_ice_candidate(candidate).await {
            log::warn!("[{}] Could not add ICE candidate: {}", self.id, e);
        }
    }

    async fn apply_pending_candidates(&mut self) {
        let pending = std::mem::take(&mut self.pending_ice);
        if !pending.is_empty() {
            log::debug!("[{}] Applying {} queued ICE candidates", self.id, pending.len());
        }
        for candidate in pending {
            if let Err(e) = self.transport.add_ice_candidate(candidate).await {
                log::warn!("[{}] Could not add queued ICE candidate: {}", self.id, e);
            }
        }
    }

    /// Applies one transport event. Only a transport failure is an error.
    pub async fn handle_transport(&mut self, event: TransportEvent) -> Result<Flow> {
        match event {
            TransportEvent::Track(track) => match track.kind() {
                TrackKind::Video => {
                    log::info!("[{}] Video track received", self.id);
                    self.track = Some(track);
                    self.throttle.reset();
                    self.extraction = None;
                    self.inference = None;
                    self.pipeline.reset();
                    self.promote_connected();
                }
                TrackKind::Audio => log::info!("[{}] Ignoring audio track", self.id),
            },
            TransportEvent::DataChannel(channel) => {
                log::info!("[{}] Data channel established: {}", self.id, channel.label());
                self.channel_state = match channel.ready_state() {
                    ReadyState::Open => DataChannelState::Open,
                    ReadyState::Connecting => DataChannelState::Connecting,
                    ReadyState::Closing | ReadyState::Closed => DataChannelState::Closed,
                };
                self.channel = Some(channel);
            }
            TransportEvent::DataChannelOpen => {
                self.channel_state = DataChannelState::Open;
                log::info!("[{}] Data channel open", self.id);
                if let Some(channel) = &self.channel
                    && let Err(e) = channel.send(DATA_CHANNEL_PROBE)
                {
                    log::warn!("[{}] Could not send data channel probe: {}", self.id, e);
                }
                self.promote_connected();
            }
            TransportEvent::DataChannelClose => {
                self.channel_state = DataChannelState::Closed;
                log::info!("[{}] Data channel closed", self.id);
            }
            TransportEvent::DataChannelMessage(message) => {
                log::info!("[{}] Peer message: {}", self.id, message)
            }
            TransportEvent::Connected => self.promote_connected(),
            TransportEvent::Failed(reason) => {
                return Err(SigncastError::Transport { message: reason });
            }
        }
        Ok(Flow::Continue)
    }

    fn promote_connected(&mut self) {
        if self.state == SessionState::Negotiating {
            self.state = SessionState::Connected;
            log::info!("[{}] Connected", self.id);
        }
    }

    /// Takes one frame from the track.
    ///
    /// Outside `Connected` the frame is only forwarded. Otherwise extraction
    /// moves to the blocking pool and the frame is forwarded once it returns.
    fn on_frame(&mut self, frame: VideoFrame) {
        if self.state != SessionState::Connected {
            self.forward(frame);
            return;
        }
        let normalizer = self.pipeline.normalizer();
        self.extraction = Some(InFlight {
            generation: self.pipeline.generation(),
            handle: tokio::task::spawn_blocking(move || {
                let sample = normalizer.normalize(&frame);
                (frame, sample)
            }),
        });
    }

    fn forward(&mut self, frame: VideoFrame) {
        if let Err(e) = self.transport.send_frame(frame) {
            log::debug!("[{}] Could not forward frame: {}", self.id, e);
        }
    }

    fn on_extracted(
        &mut self,
        generation: u64,
        joined: std::result::Result<Extraction, JoinError>,
    ) {
        let result = match joined {
            Ok((frame, result)) => {
                self.forward(frame);
                result
            }
            Err(e) => Err(SigncastError::Extraction {
                message: format!("extraction task failed: {}", e),
            }),
        };
        if generation != self.pipeline.generation() || self.state != SessionState::Connected {
            log::debug!("[{}] Discarding stale extraction result", self.id);
            return;
        }
        let Some(tensor) = self.pipeline.on_extraction(result) else {
            return;
        };
        let classifier = self.pipeline.classifier();
        self.inference = Some(InFlight {
            generation,
            handle: tokio::task::spawn_blocking(move || {
                run_classifier(classifier.as_ref(), &tensor)
            }),
        });
    }

    fn on_inferred(
        &mut self,
        generation: u64,
        joined: std::result::Result<Result<PredictionEvent>, JoinError>,
    ) {
        if generation != self.pipeline.generation() || self.state != SessionState::Connected {
            log::debug!("[{}] Discarding stale prediction", self.id);
            return;
        }
        let result = joined.unwrap_or_else(|e| {
            Err(SigncastError::Inference {
                message: format!("inference task failed: {}", e),
            })
        });
        let Some(outcome) = self.pipeline.on_prediction(result) else {
            return;
        };
        let channel = match self.channel_state {
            DataChannelState::Open => self.channel.as_deref(),
            _ => None,
        };
        self.pipeline.transmit(&outcome, channel);
    }

    /// Tears down the transport and signaling channel and moves to `Closed`.
    /// Idempotent.
    pub async fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        self.state = SessionState::Closing;
        // In-flight blocking calls finish on their own; their results are dropped.
        self.extraction = None;
        self.inference = None;
        self.track = None;
        if let Err(e) = self.transport.close().await {
            log::warn!("[{}] Error closing transport: {}", self.id, e);
        }
        if let Err(e) = self.signaling.disconnect().await {
            log::warn!("[{}] Error disconnecting signaling: {}", self.id, e);
        }
        self.channel = None;
        self.channel_state = DataChannelState::Closed;
        self.pending_ice.clear();
        self.pipeline.reset();
        self.state = SessionState::Closed;
        log::info!("[{}] Session closed", self.id);
    }
}

async fn next_frame(
    track: &mut Option<Box<dyn MediaTrack>>,
    throttle: &FrameThrottle,
) -> Option<VideoFrame> {
    let Some(track) = track.as_mut() else {
        return std::future::pending().await;
    };
    throttle.wait().await;
    track.recv().await
}

async fn join_in_flight<T>(
    slot: &mut Option<InFlight<T>>,
) -> (u64, std::result::Result<T, JoinError>) {
    match slot {
        Some(in_flight) => (in_flight.generation, (&mut in_flight.handle).await),
        None => std::future::pending().await,
    }
}
