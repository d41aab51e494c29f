//! Error types and reporting for recognition pipeline stages.

use std::fmt;

/// Errors that can occur while processing one frame or window.
#[derive(Debug, Clone)]
pub enum StageError {
    /// Recoverable error: the frame or window is skipped, the pipeline continues.
    Recoverable(String),
    /// Fatal error: the session that owns the pipeline must be torn down.
    Fatal(String),
}

impl fmt::Display for StageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageError::Recoverable(msg) => write!(f, "Recoverable error: {}", msg),
            StageError::Fatal(msg) => write!(f, "Fatal error: {}", msg),
        }
    }
}

impl std::error::Error for StageError {}

/// Trait for reporting stage errors.
pub trait ErrorReporter: Send + Sync {
    /// Reports an error from a stage.
    fn report(&self, stage: &str, error: &StageError);
}

/// Reporter that forwards to the `log` facade.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogReporter;

impl ErrorReporter for LogReporter {
    fn report(&self, stage: &str, error: &StageError) {
        match error {
            StageError::Recoverable(_) => log::warn!("[{}] {}", stage, error),
            StageError::Fatal(_) => log::error!("[{}] {}", stage, error),
        }
    }
}

/// Reporter that records every report, for assertions in tests.
#[derive(Debug, Default)]
pub struct CollectingReporter {
    reports: std::sync::Mutex<Vec<(String, String)>>,
}

impl CollectingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// (stage, message) pairs reported so far.
    pub fn reports(&self) -> Vec<(String, String)> {
        self.reports
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }
}

impl ErrorReporter for CollectingReporter {
    fn report(&self, stage: &str, error: &StageError) {
        if let Ok(mut reports) = self.reports.lock() {
            reports.push((stage.to_string(), error.to_string()));
        }
    }
}
