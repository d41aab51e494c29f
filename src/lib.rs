//! signcast - streaming sign-gesture recognition agents
//!
//! Each agent negotiates a call over a signaling server, turns the incoming
//! hand-pose stream into a stable token sentence and sends it back over the
//! call's data channel. A pool supervisor keeps N agents alive as separate
//! processes.

#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod agent;
#[cfg(feature = "cli")]
pub mod cli;
pub mod clock;
pub mod config;
pub mod defaults;
pub mod error;
pub mod frame;
pub mod pipeline;
pub mod pool;
pub mod pose;
pub mod session;
pub mod signaling;
pub mod transport;

// Capabilities (source → process → sink)
pub use pipeline::classifier::Classifier;
pub use pose::normalizer::LandmarkSource;
pub use signaling::SignalingChannel;
pub use transport::{DataChannel, MediaTransport, TransportFactory};

// Recognition
pub use pipeline::{FramePipeline, PipelineConfig, RecognitionSmoother, SmootherConfig};

// Lifecycle and supervision
pub use agent::{AgentSupervisor, SessionFactory, StandardSessionFactory};
pub use pool::{PoolSettings, PoolSupervisor, ProcessLauncher};
pub use session::{Session, SessionConfig, SessionState};

// Error handling
pub use error::{Result, SigncastError};

// Config
pub use config::Config;

/// Build version string with optional git commit hash.
///
/// Returns `"0.1.0+abc1234"` when git hash is available, `"0.1.0"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}
