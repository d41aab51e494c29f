//! Line-delimited JSON signaling client over TCP.

use crate::error::{Result, SigncastError};
use crate::signaling::channel::{SignalingChannel, SignalingEvent};
use crate::signaling::protocol::{OutboundMessage, decode_line, encode_line};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Signaling channel speaking the envelope protocol over a TCP stream.
///
/// A background reader task decodes inbound lines into events, so
/// [`SignalingChannel::next_event`] is a plain channel receive.
pub struct TcpSignaling {
    endpoint: String,
    connect_timeout: Duration,
    writer: Option<OwnedWriteHalf>,
    reader: Option<JoinHandle<()>>,
    tx: mpsc::UnboundedSender<SignalingEvent>,
    rx: mpsc::UnboundedReceiver<SignalingEvent>,
}

impl TcpSignaling {
    pub fn new(endpoint: impl Into<String>, connect_timeout: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            endpoint: endpoint.into(),
            connect_timeout,
            writer: None,
            reader: None,
            tx,
            rx,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

async fn read_loop(reader: OwnedReadHalf, events: mpsc::UnboundedSender<SignalingEvent>) {
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                match decode_line(&line) {
                    Ok(message) => {
                        if events.send(SignalingEvent::Message(message)).is_err() {
                            return;
                        }
                    }
                    Err(e) => log::warn!("Ignoring signaling message: {}", e),
                }
            }
            Ok(None) => {
                let _ = events.send(SignalingEvent::Disconnected(None));
                return;
            }
            Err(e) => {
                let _ = events.send(SignalingEvent::Disconnected(Some(e.to_string())));
                return;
            }
        }
    }
}

#[async_trait::async_trait]
impl SignalingChannel for TcpSignaling {
    async fn connect(&mut self) -> Result<()> {
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&self.endpoint))
            .await
            .map_err(|_| SigncastError::SignalingConnection {
                message: format!(
                    "Timed out after {:?} connecting to {}",
                    self.connect_timeout, self.endpoint
                ),
            })?
            .map_err(|e| SigncastError::SignalingConnection {
                message: format!("Failed to connect to {}: {}", self.endpoint, e),
            })?;
        stream.set_nodelay(true).ok();

        log::info!("Connected to signaling server at {}", self.endpoint);
        // Queued before the reader starts so it precedes any server greeting.
        let _ = self.tx.send(SignalingEvent::Connected);
        let (reader, writer) = stream.into_split();
        self.writer = Some(writer);
        self.reader = Some(tokio::spawn(read_loop(reader, self.tx.clone())));
        Ok(())
    }

    async fn emit(&mut self, message: OutboundMessage) -> Result<()> {
        let writer = self.writer.as_mut().ok_or(SigncastError::SignalingClosed)?;
        let line = encode_line(&message)?;
        writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| SigncastError::SignalingConnection {
                message: format!("Failed to write {}: {}", message.name(), e),
            })?;
        writer
            .flush()
            .await
            .map_err(|e| SigncastError::SignalingConnection {
                message: format!("Failed to flush writer: {}", e),
            })?;
        log::debug!("Sent {} to signaling server", message.name());
        Ok(())
    }

    async fn next_event(&mut self) -> Option<SignalingEvent> {
        self.rx.recv().await
    }

    async fn disconnect(&mut self) -> Result<()> {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        if let Some(mut writer) = self.writer.take() {
            writer.shutdown().await.ok();
        }
        self.rx.close();
        Ok(())
    }
}

impl Drop for TcpSignaling {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}
