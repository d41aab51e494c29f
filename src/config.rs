use crate::defaults;
use crate::error::{Result, SigncastError};
use crate::pipeline::{PipelineConfig, SmootherConfig, WindowPolicy};
use crate::pool::PoolSettings;
use crate::session::SessionConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub signaling: SignalingConfig,
    pub pipeline: PipelineSection,
    pub recognition: RecognitionConfig,
    pub model: ModelConfig,
    pub pool: PoolConfig,
    pub agent: AgentConfig,
}

/// Signaling server and negotiation settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SignalingConfig {
    /// Signaling server address as host:port.
    pub endpoint: String,
    pub connect_timeout_ms: u64,
    pub peer_id: String,
    pub stun_servers: Vec<String>,
}

/// Frame pipeline settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineSection {
    pub window_capacity: usize,
    pub window_policy: WindowPolicy,
    pub target_fps: u32,
    pub outlier_z: f32,
    pub inference_threads: usize,
}

/// Prediction smoothing settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RecognitionConfig {
    pub cooldown_secs: f64,
    pub repetition_threshold: u32,
    pub history_len: usize,
    pub initial_threshold: f32,
    pub min_threshold: f32,
    pub max_threshold: f32,
}

/// Classifier model location
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct ModelConfig {
    /// Template classifier JSON. Defaults to the user data directory.
    pub templates: Option<PathBuf>,
}

/// Worker pool settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PoolConfig {
    pub workers: usize,
    pub restart_delay_secs: u64,
    pub poll_interval_ms: u64,
    pub shutdown_timeout_secs: u64,
}

/// Per-process agent settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct AgentConfig {
    /// Pause between session attempts; 0 restarts immediately.
    pub restart_delay_ms: u64,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            endpoint: defaults::SIGNALING_ENDPOINT.to_string(),
            connect_timeout_ms: defaults::CONNECT_TIMEOUT_MS,
            peer_id: defaults::PEER_ID.to_string(),
            stun_servers: defaults::STUN_SERVERS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            window_capacity: defaults::WINDOW_CAPACITY,
            window_policy: WindowPolicy::default(),
            target_fps: defaults::TARGET_FPS,
            outlier_z: defaults::OUTLIER_Z,
            inference_threads: defaults::INFERENCE_THREADS,
        }
    }
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            cooldown_secs: defaults::COOLDOWN_SECS,
            repetition_threshold: defaults::REPETITION_THRESHOLD,
            history_len: defaults::HISTORY_LEN,
            initial_threshold: defaults::INITIAL_THRESHOLD,
            min_threshold: defaults::MIN_THRESHOLD,
            max_threshold: defaults::MAX_THRESHOLD,
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: defaults::WORKERS,
            restart_delay_secs: defaults::RESTART_DELAY_SECS,
            poll_interval_ms: defaults::POLL_INTERVAL_MS,
            shutdown_timeout_secs: defaults::SHUTDOWN_TIMEOUT_SECS,
        }
    }
}

impl SignalingConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl RecognitionConfig {
    pub fn smoother(&self) -> SmootherConfig {
        SmootherConfig {
            cooldown: Duration::try_from_secs_f64(
                self.cooldown_secs.clamp(0.0, defaults::MAX_COOLDOWN_SECS),
            )
            .unwrap_or_default(),
            repetition_threshold: self.repetition_threshold,
            history_len: self.history_len,
            initial_threshold: self.initial_threshold,
            min_threshold: self.min_threshold,
            max_threshold: self.max_threshold,
        }
    }
}

impl ModelConfig {
    /// Configured template path, or `<data_dir>/signcast/templates.json`.
    pub fn templates_path(&self) -> Option<PathBuf> {
        self.templates
            .clone()
            .or_else(|| dirs::data_dir().map(|dir| dir.join("signcast").join("templates.json")))
    }
}

impl PoolConfig {
    pub fn settings(&self) -> PoolSettings {
        PoolSettings {
            workers: self.workers,
            restart_delay: Duration::from_secs(self.restart_delay_secs),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            shutdown_timeout: Duration::from_secs(self.shutdown_timeout_secs),
        }
    }
}

impl AgentConfig {
    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_ms)
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Missing fields use default values.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                SigncastError::ConfigFileNotFound {
                    path: path.display().to_string(),
                }
            } else {
                SigncastError::Io(e)
            }
        })?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from a file, or defaults if the file doesn't exist.
    ///
    /// Invalid TOML is still an error.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match Self::load(path) {
            Ok(config) => Ok(config),
            Err(SigncastError::ConfigFileNotFound { .. }) => Ok(Self::default()),
            Err(e) => Err(e),
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - SIGNCAST_ENDPOINT → signaling.endpoint
    /// - SIGNCAST_WORKERS → pool.workers
    /// - SIGNCAST_MODEL → model.templates
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(endpoint) = std::env::var("SIGNCAST_ENDPOINT")
            && !endpoint.is_empty()
        {
            self.signaling.endpoint = endpoint;
        }

        if let Ok(workers) = std::env::var("SIGNCAST_WORKERS")
            && !workers.is_empty()
        {
            match workers.parse() {
                Ok(n) => self.pool.workers = n,
                Err(_) => log::warn!("Ignoring SIGNCAST_WORKERS={:?}: not a number", workers),
            }
        }

        if let Ok(model) = std::env::var("SIGNCAST_MODEL")
            && !model.is_empty()
        {
            self.model.templates = Some(PathBuf::from(model));
        }

        self
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/signcast/config.toml on Linux
    pub fn default_path() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join("signcast").join("config.toml"))
            .ok_or_else(|| SigncastError::Other("Could not determine config directory".into()))
    }

    /// Rejects values no component can work with.
    pub fn validate(&self) -> Result<()> {
        fn invalid(key: &str, message: &str) -> Result<()> {
            Err(SigncastError::ConfigInvalidValue {
                key: key.to_string(),
                message: message.to_string(),
            })
        }

        if self.signaling.endpoint.trim().is_empty() {
            return invalid("signaling.endpoint", "must not be empty");
        }
        if self.pipeline.window_capacity == 0 {
            return invalid("pipeline.window_capacity", "must be at least 1");
        }
        if self.pipeline.inference_threads == 0 {
            return invalid("pipeline.inference_threads", "must be at least 1");
        }
        if self.pipeline.outlier_z.is_nan() || self.pipeline.outlier_z <= 0.0 {
            return invalid("pipeline.outlier_z", "must be positive");
        }
        let r = &self.recognition;
        if !(0.0..=defaults::MAX_COOLDOWN_SECS).contains(&r.cooldown_secs) {
            return invalid(
                "recognition.cooldown_secs",
                &format!("must lie within 0..={} seconds", defaults::MAX_COOLDOWN_SECS),
            );
        }
        if r.history_len == 0 {
            return invalid("recognition.history_len", "must be at least 1");
        }
        if r.min_threshold > r.max_threshold {
            return invalid(
                "recognition.min_threshold",
                "must not exceed recognition.max_threshold",
            );
        }
        if !(0.0..=1.0).contains(&r.min_threshold) || !(0.0..=1.0).contains(&r.max_threshold) {
            return invalid("recognition", "thresholds must lie within 0.0..=1.0");
        }
        if self.pool.workers == 0 {
            return invalid("pool.workers", "must be at least 1");
        }
        if self.pool.poll_interval_ms == 0 {
            return invalid("pool.poll_interval_ms", "must be at least 1");
        }
        let max_wait = defaults::MAX_POOL_WAIT_SECS;
        if self.pool.restart_delay_secs > max_wait {
            return invalid(
                "pool.restart_delay_secs",
                &format!("must not exceed {} seconds", max_wait),
            );
        }
        if self.pool.shutdown_timeout_secs > max_wait {
            return invalid(
                "pool.shutdown_timeout_secs",
                &format!("must not exceed {} seconds", max_wait),
            );
        }
        if self.pool.poll_interval_ms > max_wait * 1000 {
            return invalid(
                "pool.poll_interval_ms",
                &format!("must not exceed {} ms", max_wait * 1000),
            );
        }
        Ok(())
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            window_capacity: self.pipeline.window_capacity,
            window_policy: self.pipeline.window_policy,
            outlier_z: self.pipeline.outlier_z,
            smoother: self.recognition.smoother(),
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            peer_id: self.signaling.peer_id.clone(),
            pipeline: self.pipeline_config(),
            target_fps: self.pipeline.target_fps,
        }
    }
}
