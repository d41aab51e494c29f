//! Error types for signcast.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SigncastError {
    // Configuration errors
    #[error("Configuration file not found at {path}")]
    ConfigFileNotFound { path: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // Signaling errors
    #[error("Signaling connection failed: {message}")]
    SignalingConnection { message: String },

    #[error("Signaling protocol error: {message}")]
    SignalingProtocol { message: String },

    #[error("Signaling channel closed")]
    SignalingClosed,

    // Negotiation / transport errors
    #[error("Negotiation failed: {message}")]
    Negotiation { message: String },

    #[error("Media transport error: {message}")]
    Transport { message: String },

    #[error("Data channel is not open (state: {state})")]
    DataChannelNotOpen { state: String },

    // Recognition errors
    #[error("Landmark extraction failed: {message}")]
    Extraction { message: String },

    #[error("Classifier inference failed: {message}")]
    Inference { message: String },

    #[error("Classifier model not found at {path}")]
    ModelNotFound { path: String },

    #[error("Invalid classifier model: {message}")]
    InvalidModel { message: String },

    // Supervision errors
    #[error("Failed to spawn worker for slot {slot}: {message}")]
    WorkerSpawn { slot: usize, message: String },

    #[error("Worker control failed: {message}")]
    WorkerControl { message: String },

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // Generic error for cases not covered above
    #[error("{0}")]
    Other(String),
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, SigncastError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_config_invalid_value_display() {
        let error = SigncastError::ConfigInvalidValue {
            key: "pipeline.window_capacity".to_string(),
            message: "must be positive".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Invalid configuration value for pipeline.window_capacity: must be positive"
        );
    }

    #[test]
    fn test_signaling_connection_display() {
        let error = SigncastError::SignalingConnection {
            message: "connection refused".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Signaling connection failed: connection refused"
        );
    }

    #[test]
    fn test_data_channel_not_open_display() {
        let error = SigncastError::DataChannelNotOpen {
            state: "closing".to_string(),
        };
        assert_eq!(error.to_string(), "Data channel is not open (state: closing)");
    }

    #[test]
    fn test_worker_spawn_display() {
        let error = SigncastError::WorkerSpawn {
            slot: 3,
            message: "no such file".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Failed to spawn worker for slot 3: no such file"
        );
    }

    #[test]
    fn test_inference_display() {
        let error = SigncastError::Inference {
            message: "shape mismatch".to_string(),
        };
        assert_eq!(error.to_string(), "Classifier inference failed: shape mismatch");
    }

    #[test]
    fn test_from_io_error() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let error: SigncastError = io_error.into();
        assert!(error.to_string().contains("file not found"));
    }

    #[test]
    fn test_from_toml_error() {
        let toml_error = toml::from_str::<toml::Value>("invalid = toml = syntax").unwrap_err();
        let error: SigncastError = toml_error.into();
        assert!(error.to_string().contains("Configuration error"));
    }

    #[test]
    fn test_from_json_error() {
        let json_error = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let error: SigncastError = json_error.into();
        assert!(error.to_string().starts_with("JSON error"));
    }

    #[test]
    fn test_error_source_chain_io() {
        let io_error = io::Error::new(io::ErrorKind::PermissionDenied, "access denied");
        let error: SigncastError = io_error.into();

        let error_trait: &dyn std::error::Error = &error;
        assert!(error_trait.source().is_some());
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<SigncastError>();
        assert_sync::<SigncastError>();
    }
}
