//! Agent supervisor: keeps one session alive for the lifetime of the process.
//!
//! Every attempt starts from scratch with a fresh session identifier, a fresh
//! signaling connection, a fresh transport and a fresh recognition pipeline.
//! There is no retry limit; consecutive failures are counted and logged so a
//! crash loop is visible.

use crate::defaults;
use crate::error::Result;
use crate::pipeline::classifier::Classifier;
use crate::pipeline::recognizer::FramePipeline;
use crate::pose::normalizer::{LandmarkSource, SampleNormalizer};
use crate::session::{Session, SessionConfig, generate_session_id};
use crate::signaling::TcpSignaling;
use crate::transport::TransportFactory;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Builds everything one session attempt needs.
pub trait SessionFactory: Send + Sync {
    fn create(&self, session_id: &str) -> Result<Session>;
}

impl<F> SessionFactory for F
where
    F: Fn(&str) -> Result<Session> + Send + Sync,
{
    fn create(&self, session_id: &str) -> Result<Session> {
        self(session_id)
    }
}

/// Factory wiring TCP signaling, a transport factory and a shared classifier.
pub struct StandardSessionFactory {
    pub config: SessionConfig,
    pub endpoint: String,
    pub connect_timeout: Duration,
    pub ice_servers: Vec<String>,
    pub transports: Arc<dyn TransportFactory>,
    pub landmarks: Arc<dyn LandmarkSource>,
    pub classifier: Arc<dyn Classifier>,
}

impl SessionFactory for StandardSessionFactory {
    fn create(&self, session_id: &str) -> Result<Session> {
        let signaling = TcpSignaling::new(self.endpoint.clone(), self.connect_timeout);
        let transport = self.transports.create(&self.ice_servers)?;
        let pipeline = FramePipeline::new(
            self.config.pipeline.clone(),
            SampleNormalizer::new(Arc::clone(&self.landmarks)),
            Arc::clone(&self.classifier),
        );
        Ok(Session::new(
            session_id,
            &self.config,
            Box::new(signaling),
            transport,
            pipeline,
        ))
    }
}

/// Counters collected over the supervisor's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AgentStats {
    pub attempts: u64,
    pub calls_ended: u64,
    pub failures: u64,
    pub consecutive_failures: u64,
}

/// Unbounded restart loop around one session.
pub struct AgentSupervisor {
    factory: Arc<dyn SessionFactory>,
    restart_delay: Duration,
    stats: AgentStats,
}

impl AgentSupervisor {
    pub fn new(factory: Arc<dyn SessionFactory>) -> Self {
        Self {
            factory,
            restart_delay: Duration::ZERO,
            stats: AgentStats::default(),
        }
    }

    /// Pause between attempts. Zero restarts immediately.
    pub fn with_restart_delay(mut self, delay: Duration) -> Self {
        self.restart_delay = delay;
        self
    }

    pub fn stats(&self) -> AgentStats {
        self.stats
    }

    /// Runs sessions back to back until `shutdown` turns true (or its sender
    /// is dropped). A running session is closed before returning.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> AgentStats {
        loop {
            if shutdown_requested(&shutdown) {
                break;
            }
            self.stats.attempts += 1;
            let session_id = generate_session_id();
            log::info!(
                "Starting session {} (attempt {})",
                session_id,
                self.stats.attempts
            );

            let mut session = match self.factory.create(&session_id) {
                Ok(session) => session,
                Err(e) => {
                    self.record_failure(&session_id, &e.to_string());
                    if !self.pause(&mut shutdown).await {
                        break;
                    }
                    continue;
                }
            };

            let result = tokio::select! {
                biased;
                _ = wait_for_shutdown(&mut shutdown) => None,
                result = session.run() => Some(result),
            };
            match result {
                None => {
                    log::info!("Shutdown requested, closing session {}", session_id);
                    session.close().await;
                    break;
                }
                Some(Ok(end)) => {
                    self.stats.calls_ended += 1;
                    self.stats.consecutive_failures = 0;
                    log::info!("Session {} finished ({:?}), restarting", session_id, end);
                }
                Some(Err(e)) => self.record_failure(&session_id, &e.to_string()),
            }

            if !self.pause(&mut shutdown).await {
                break;
            }
        }
        log::info!(
            "Agent stopped after {} attempts ({} failures)",
            self.stats.attempts,
            self.stats.failures
        );
        self.stats
    }

    fn record_failure(&mut self, session_id: &str, error: &str) {
        self.stats.failures += 1;
        self.stats.consecutive_failures += 1;
        let level = if warn_on_failure(self.stats.consecutive_failures) {
            log::Level::Warn
        } else {
            log::Level::Debug
        };
        log::log!(
            level,
            "Session {} failed: {} (consecutive failures: {}), restarting",
            session_id,
            error,
            self.stats.consecutive_failures
        );
    }

    /// Waits out the restart delay. Returns false if shutdown came first.
    async fn pause(&self, shutdown: &mut watch::Receiver<bool>) -> bool {
        if self.restart_delay.is_zero() {
            tokio::task::yield_now().await;
            return !shutdown_requested(shutdown);
        }
        tokio::select! {
            _ = tokio::time::sleep(self.restart_delay) => true,
            _ = wait_for_shutdown(shutdown) => false,
        }
    }
}

/// A crash loop warns for the first few failures, then once every
/// `FAILURE_WARN_EVERY`.
fn warn_on_failure(consecutive: u64) -> bool {
    consecutive <= defaults::FAILURE_WARN_BURST || consecutive % defaults::FAILURE_WARN_EVERY == 0
}

fn shutdown_requested(shutdown: &watch::Receiver<bool>) -> bool {
    *shutdown.borrow() || shutdown.has_changed().is_err()
}

async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}
