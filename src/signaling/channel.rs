//! Signaling channel capability and an in-memory mock.

use crate::error::{Result, SigncastError};
use crate::signaling::protocol::{InboundMessage, OutboundMessage};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;

/// Events delivered by a signaling channel.
#[derive(Debug, Clone, PartialEq)]
pub enum SignalingEvent {
    /// The channel is up; the session may register.
    Connected,
    /// The channel dropped. Carries the reason when one is known.
    Disconnected(Option<String>),
    Message(InboundMessage),
}

/// Asynchronous duplex channel to the signaling server.
#[async_trait::async_trait]
pub trait SignalingChannel: Send {
    /// Opens the channel. On success a [`SignalingEvent::Connected`] is queued.
    async fn connect(&mut self) -> Result<()>;

    async fn emit(&mut self, message: OutboundMessage) -> Result<()>;

    /// Next event; `None` once the channel is closed. Must be cancel-safe.
    async fn next_event(&mut self) -> Option<SignalingEvent>;

    async fn disconnect(&mut self) -> Result<()>;
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Default)]
struct MockState {
    emitted: Vec<OutboundMessage>,
    connects: usize,
    connected: bool,
    closed: bool,
}

/// Mock signaling channel for testing
pub struct MockSignaling {
    state: Arc<Mutex<MockState>>,
    tx: mpsc::UnboundedSender<SignalingEvent>,
    rx: mpsc::UnboundedReceiver<SignalingEvent>,
    auto_ack: bool,
    fail_connect: bool,
}

/// Test-side handle of a [`MockSignaling`].
#[derive(Clone)]
pub struct MockSignalingHandle {
    state: Arc<Mutex<MockState>>,
    tx: mpsc::UnboundedSender<SignalingEvent>,
}

impl MockSignaling {
    pub fn new() -> (Self, MockSignalingHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let state = Arc::new(Mutex::new(MockState::default()));
        let handle = MockSignalingHandle {
            state: Arc::clone(&state),
            tx: tx.clone(),
        };
        (
            Self {
                state,
                tx,
                rx,
                auto_ack: false,
                fail_connect: false,
            },
            handle,
        )
    }

    /// Configure the mock to acknowledge registrations by itself
    pub fn with_auto_ack(mut self) -> Self {
        self.auto_ack = true;
        self
    }

    /// Configure the mock to fail on connect
    pub fn with_connect_failure(mut self) -> Self {
        self.fail_connect = true;
        self
    }
}

#[async_trait::async_trait]
impl SignalingChannel for MockSignaling {
    async fn connect(&mut self) -> Result<()> {
        let mut state = lock(&self.state);
        state.connects += 1;
        if self.fail_connect {
            return Err(SigncastError::SignalingConnection {
                message: "mock connection refused".to_string(),
            });
        }
        state.connected = true;
        drop(state);
        let _ = self.tx.send(SignalingEvent::Connected);
        Ok(())
    }

    async fn emit(&mut self, message: OutboundMessage) -> Result<()> {
        let mut state = lock(&self.state);
        if !state.connected || state.closed {
            return Err(SigncastError::SignalingClosed);
        }
        let register = matches!(message, OutboundMessage::Register(_));
        state.emitted.push(message);
        drop(state);
        if register && self.auto_ack {
            let _ = self.tx.send(SignalingEvent::Message(InboundMessage::RegisterAck {
                peer_id: None,
            }));
        }
        Ok(())
    }

    async fn next_event(&mut self) -> Option<SignalingEvent> {
        if lock(&self.state).closed {
            return None;
        }
        self.rx.recv().await
    }

    async fn disconnect(&mut self) -> Result<()> {
        let mut state = lock(&self.state);
        state.connected = false;
        state.closed = true;
        Ok(())
    }
}

impl MockSignalingHandle {
    /// Delivers a server message to the session.
    pub fn push(&self, message: InboundMessage) {
        let _ = self.tx.send(SignalingEvent::Message(message));
    }

    /// Simulates the server dropping the connection.
    pub fn drop_connection(&self, reason: &str) {
        let _ = self.tx.send(SignalingEvent::Disconnected(Some(reason.to_string())));
    }

    /// Everything the session emitted so far.
    pub fn emitted(&self) -> Vec<OutboundMessage> {
        lock(&self.state).emitted.clone()
    }

    pub fn connects(&self) -> usize {
        lock(&self.state).connects
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.state).closed
    }
}
