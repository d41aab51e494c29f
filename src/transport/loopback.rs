//! In-process media transport.
//!
//! Synthesizes SDP deterministically and enforces the same ordering rules as
//! a real peer connection (answers need a remote offer, candidates need a
//! remote description). The peer side is driven through [`LoopbackRemote`].

use crate::error::{Result, SigncastError};
use crate::frame::VideoFrame;
use crate::transport::{
    DataChannel, IceCandidate, MediaTrack, MediaTransport, ReadyState, SdpKind,
    SessionDescription, TrackKind, TransportEvent, TransportFactory,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;

static SDP_SESSION_ID: AtomicU64 = AtomicU64::new(1);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Default)]
struct Shared {
    local: Option<SessionDescription>,
    remote: Option<SessionDescription>,
    applied_candidates: Vec<IceCandidate>,
    forwarded_frames: Vec<i64>,
    ice_servers: Vec<String>,
    closed: bool,
    fail_answers: bool,
}

/// Data channel backed by a shared message log.
pub struct LoopbackChannel {
    label: String,
    state: Mutex<ReadyState>,
    sent: Mutex<Vec<String>>,
}

impl LoopbackChannel {
    fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
            state: Mutex::new(ReadyState::Connecting),
            sent: Mutex::new(Vec::new()),
        }
    }

    fn set_state(&self, state: ReadyState) {
        *lock(&self.state) = state;
    }

    /// Messages successfully sent so far.
    pub fn sent(&self) -> Vec<String> {
        lock(&self.sent).clone()
    }
}

impl DataChannel for LoopbackChannel {
    fn label(&self) -> &str {
        &self.label
    }

    fn ready_state(&self) -> ReadyState {
        *lock(&self.state)
    }

    fn send(&self, message: &str) -> Result<()> {
        let state = self.ready_state();
        if state != ReadyState::Open {
            return Err(SigncastError::DataChannelNotOpen {
                state: state.to_string(),
            });
        }
        lock(&self.sent).push(message.to_string());
        Ok(())
    }
}

struct LoopbackTrack {
    kind: TrackKind,
    frames: mpsc::Receiver<VideoFrame>,
}

#[async_trait::async_trait]
impl MediaTrack for LoopbackTrack {
    fn kind(&self) -> TrackKind {
        self.kind
    }

    async fn recv(&mut self) -> Option<VideoFrame> {
        self.frames.recv().await
    }
}

/// Peer-side handle of a [`LoopbackTransport`].
#[derive(Clone)]
pub struct LoopbackRemote {
    events: mpsc::UnboundedSender<TransportEvent>,
    shared: Arc<Mutex<Shared>>,
    channel: Arc<Mutex<Option<Arc<LoopbackChannel>>>>,
}

impl LoopbackRemote {
    /// Announces a data channel and opens it.
    pub fn open_data_channel(&self, label: &str) -> Arc<LoopbackChannel> {
        let channel = Arc::new(LoopbackChannel::new(label));
        *lock(&self.channel) = Some(Arc::clone(&channel));
        self.emit(TransportEvent::DataChannel(
            Arc::clone(&channel) as Arc<dyn DataChannel>
        ));
        channel.set_state(ReadyState::Open);
        self.emit(TransportEvent::DataChannelOpen);
        channel
    }

    /// Closes the current data channel, if any.
    pub fn close_data_channel(&self) {
        if let Some(channel) = lock(&self.channel).as_ref() {
            channel.set_state(ReadyState::Closed);
        }
        self.emit(TransportEvent::DataChannelClose);
    }

    /// Sends a text message from the peer over the data channel.
    pub fn send_message(&self, message: &str) {
        self.emit(TransportEvent::DataChannelMessage(message.to_string()));
    }

    /// Adds a track and returns the sender that feeds its frames.
    pub fn add_track(&self, kind: TrackKind, buffer: usize) -> mpsc::Sender<VideoFrame> {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        self.emit(TransportEvent::Track(Box::new(LoopbackTrack { kind, frames: rx })));
        tx
    }

    /// Signals that connectivity checks succeeded.
    pub fn connect(&self) {
        self.emit(TransportEvent::Connected);
    }

    /// Raises a transport failure.
    pub fn fail(&self, reason: &str) {
        self.emit(TransportEvent::Failed(reason.to_string()));
    }

    /// Makes every subsequent `create_answer` fail.
    pub fn fail_answers(&self) {
        lock(&self.shared).fail_answers = true;
    }

    pub fn data_channel(&self) -> Option<Arc<LoopbackChannel>> {
        lock(&self.channel).clone()
    }

    /// Messages the local side sent over the data channel.
    pub fn received_messages(&self) -> Vec<String> {
        self.data_channel().map(|c| c.sent()).unwrap_or_default()
    }

    pub fn applied_candidates(&self) -> Vec<IceCandidate> {
        lock(&self.shared).applied_candidates.clone()
    }

    /// Timestamps of frames forwarded on the local track.
    pub fn forwarded_frames(&self) -> Vec<i64> {
        lock(&self.shared).forwarded_frames.clone()
    }

    pub fn remote_description(&self) -> Option<SessionDescription> {
        lock(&self.shared).remote.clone()
    }

    pub fn local_description(&self) -> Option<SessionDescription> {
        lock(&self.shared).local.clone()
    }

    pub fn ice_servers(&self) -> Vec<String> {
        lock(&self.shared).ice_servers.clone()
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.shared).closed
    }

    fn emit(&self, event: TransportEvent) {
        if self.events.send(event).is_err() {
            log::debug!("loopback transport dropped; event discarded");
        }
    }
}

/// In-process [`MediaTransport`].
pub struct LoopbackTransport {
    shared: Arc<Mutex<Shared>>,
    events: mpsc::UnboundedReceiver<TransportEvent>,
}

impl LoopbackTransport {
    /// Creates a transport together with its peer-side handle.
    pub fn pair() -> (Self, LoopbackRemote) {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Mutex::new(Shared::default()));
        let remote = LoopbackRemote {
            events: tx,
            shared: Arc::clone(&shared),
            channel: Arc::new(Mutex::new(None)),
        };
        (Self { shared, events: rx }, remote)
    }

    fn synthesize(kind: SdpKind) -> SessionDescription {
        let id = SDP_SESSION_ID.fetch_add(1, Ordering::Relaxed);
        let sdp = format!(
            "v=0\r\no=signcast {} 2 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n\
             a=group:BUNDLE 0 1\r\nm=video 9 UDP/TLS/RTP/SAVPF 96\r\na=mid:0\r\n\
             m=application 9 UDP/DTLS/SCTP webrtc-datachannel\r\na=mid:1\r\n",
            id
        );
        SessionDescription::new(sdp, kind)
    }

    fn ensure_open(shared: &Shared) -> Result<()> {
        if shared.closed {
            return Err(SigncastError::Transport {
                message: "transport is closed".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl MediaTransport for LoopbackTransport {
    async fn create_offer(&mut self) -> Result<SessionDescription> {
        Self::ensure_open(&lock(&self.shared))?;
        Ok(Self::synthesize(SdpKind::Offer))
    }

    async fn create_answer(&mut self) -> Result<SessionDescription> {
        let shared = lock(&self.shared);
        Self::ensure_open(&shared)?;
        if shared.fail_answers {
            return Err(SigncastError::Negotiation {
                message: "answer creation failed".to_string(),
            });
        }
        match &shared.remote {
            Some(remote) if remote.kind == SdpKind::Offer => Ok(Self::synthesize(SdpKind::Answer)),
            _ => Err(SigncastError::Negotiation {
                message: "cannot create answer without a remote offer".to_string(),
            }),
        }
    }

    async fn set_local_description(&mut self, description: SessionDescription) -> Result<()> {
        let mut shared = lock(&self.shared);
        Self::ensure_open(&shared)?;
        shared.local = Some(description);
        Ok(())
    }

    async fn set_remote_description(&mut self, description: SessionDescription) -> Result<()> {
        let mut shared = lock(&self.shared);
        Self::ensure_open(&shared)?;
        if !description.sdp.starts_with("v=0") {
            return Err(SigncastError::Negotiation {
                message: "malformed SDP: missing version line".to_string(),
            });
        }
        if description.kind == SdpKind::Answer
            && shared.local.as_ref().map(|l| l.kind) != Some(SdpKind::Offer)
        {
            return Err(SigncastError::Negotiation {
                message: "received answer without a local offer".to_string(),
            });
        }
        shared.remote = Some(description);
        Ok(())
    }

    async fn add_ice_candidate(&mut self, candidate: IceCandidate) -> Result<()> {
        let mut shared = lock(&self.shared);
        Self::ensure_open(&shared)?;
        if shared.remote.is_none() {
            return Err(SigncastError::Negotiation {
                message: "remote description not set".to_string(),
            });
        }
        shared.applied_candidates.push(candidate);
        Ok(())
    }

    fn local_description(&self) -> Option<SessionDescription> {
        lock(&self.shared).local.clone()
    }

    async fn next_event(&mut self) -> Option<TransportEvent> {
        if lock(&self.shared).closed {
            return None;
        }
        self.events.recv().await
    }

    fn send_frame(&mut self, frame: VideoFrame) -> Result<()> {
        let mut shared = lock(&self.shared);
        Self::ensure_open(&shared)?;
        shared.forwarded_frames.push(frame.pts);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        lock(&self.shared).closed = true;
        self.events.close();
        Ok(())
    }
}

/// Factory handing out loopback transports.
///
/// By default only the newest remote is kept, so a long restart loop holds at
/// most one dead transport. [`LoopbackFactory::recording`] keeps every remote
/// for inspection.
#[derive(Clone, Default)]
pub struct LoopbackFactory {
    remotes: Arc<Mutex<Vec<LoopbackRemote>>>,
    keep_all: bool,
}

impl LoopbackFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// A factory that keeps the remote of every transport it creates.
    pub fn recording() -> Self {
        Self {
            keep_all: true,
            ..Self::default()
        }
    }

    /// Retained remote handles, oldest first.
    pub fn remotes(&self) -> Vec<LoopbackRemote> {
        lock(&self.remotes).clone()
    }

    pub fn latest(&self) -> Option<LoopbackRemote> {
        lock(&self.remotes).last().cloned()
    }
}

impl TransportFactory for LoopbackFactory {
    fn create(&self, ice_servers: &[String]) -> Result<Box<dyn MediaTransport>> {
        let (transport, remote) = LoopbackTransport::pair();
        lock(&transport.shared).ice_servers = ice_servers.to_vec();
        let mut remotes = lock(&self.remotes);
        if !self.keep_all {
            remotes.clear();
        }
        remotes.push(remote);
        Ok(Box::new(transport))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offer() -> SessionDescription {
        LoopbackTransport::synthesize(SdpKind::Offer)
    }

    fn candidate() -> IceCandidate {
        IceCandidate {
            candidate: "candidate:1 1 udp 2122260223 10.0.0.2 54321 typ host".to_string(),
            sdp_mid: "0".to_string(),
            sdp_mline_index: 0,
        }
    }

    #[tokio::test]
    async fn test_answer_requires_remote_offer() {
        let (mut transport, _remote) = LoopbackTransport::pair();
        assert!(transport.create_answer().await.is_err());

        transport.set_remote_description(offer()).await.unwrap();
        let answer = transport.create_answer().await.unwrap();
        assert_eq!(answer.kind, SdpKind::Answer);
        assert!(answer.sdp.starts_with("v=0"));
    }

    #[tokio::test]
    async fn test_candidate_before_remote_description_fails() {
        let (mut transport, remote) = LoopbackTransport::pair();
        assert!(transport.add_ice_candidate(candidate()).await.is_err());
        assert!(remote.applied_candidates().is_empty());

        transport.set_remote_description(offer()).await.unwrap();
        transport.add_ice_candidate(candidate()).await.unwrap();
        assert_eq!(remote.applied_candidates(), vec![candidate()]);
    }

    #[tokio::test]
    async fn test_malformed_sdp_is_rejected() {
        let (mut transport, remote) = LoopbackTransport::pair();
        let bad = SessionDescription::new("garbage", SdpKind::Offer);
        assert!(transport.set_remote_description(bad).await.is_err());
        assert!(remote.remote_description().is_none());
    }

    #[tokio::test]
    async fn test_answer_without_local_offer_is_rejected() {
        let (mut transport, _remote) = LoopbackTransport::pair();
        let answer = SessionDescription::new("v=0\r\n", SdpKind::Answer);
        assert!(transport.set_remote_description(answer).await.is_err());

        let local = transport.create_offer().await.unwrap();
        transport.set_local_description(local).await.unwrap();
        let answer = SessionDescription::new("v=0\r\n", SdpKind::Answer);
        assert!(transport.set_remote_description(answer).await.is_ok());
    }

    #[tokio::test]
    async fn test_data_channel_send_requires_open() {
        let (mut transport, remote) = LoopbackTransport::pair();
        let channel = remote.open_data_channel("chat");
        assert!(matches!(
            transport.next_event().await,
            Some(TransportEvent::DataChannel(_))
        ));
        assert!(matches!(
            transport.next_event().await,
            Some(TransportEvent::DataChannelOpen)
        ));
        channel.send("hi").unwrap();
        remote.close_data_channel();
        assert!(channel.send("late").is_err());
        assert_eq!(remote.received_messages(), vec!["hi"]);
    }

    #[tokio::test]
    async fn test_track_delivers_frames() {
        let (mut transport, remote) = LoopbackTransport::pair();
        let frames = remote.add_track(TrackKind::Video, 4);
        let Some(TransportEvent::Track(mut track)) = transport.next_event().await else {
            panic!("expected a track event");
        };
        frames.send(VideoFrame::solid(1, 1, [0, 0, 0], 42)).await.unwrap();
        assert_eq!(track.recv().await.map(|f| f.pts), Some(42));
        assert_eq!(track.kind(), TrackKind::Video);
    }

    #[tokio::test]
    async fn test_close_ends_event_stream() {
        let (mut transport, remote) = LoopbackTransport::pair();
        transport.close().await.unwrap();
        assert!(transport.next_event().await.is_none());
        assert!(remote.is_closed());
        assert!(transport.send_frame(VideoFrame::solid(1, 1, [0; 3], 0)).is_err());
    }

    #[test]
    fn test_recording_factory_keeps_every_remote() {
        let factory = LoopbackFactory::recording();
        let servers = vec!["stun:example.org:3478".to_string()];
        let _a = factory.create(&servers).unwrap();
        let _b = factory.create(&servers).unwrap();
        assert_eq!(factory.remotes().len(), 2);
        assert_eq!(factory.latest().map(|r| r.ice_servers()), Some(servers));
    }

    #[tokio::test]
    async fn test_default_factory_retains_only_latest_remote() {
        let factory = LoopbackFactory::new();
        for _ in 0..1000 {
            let mut transport = factory.create(&[]).unwrap();
            transport.close().await.unwrap();
        }
        let live = factory.create(&[]).unwrap();
        assert_eq!(factory.remotes().len(), 1);
        let latest = factory.latest().unwrap();
        assert!(!latest.is_closed());
        drop(live);
    }
}
