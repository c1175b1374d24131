//! Error types for the endpoint registry

use crate::models::ErrorInfo;
use thiserror::Error;

/// Endpoint registry error type
#[derive(Error, Debug)]
pub enum Error {
    /// Empty key or malformed request parameters
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// No endpoint registered under the given key
    #[error("Endpoint not found: {0}")]
    NotFound(String),

    /// The distributor rejected or could not accept a snapshot
    #[error("Publish failure: {0}")]
    PublishFailure(String),

    /// The initial snapshot could not be established
    #[error("Startup failure: {0}")]
    StartupFailure(String),

    /// Invalid configuration value
    #[error("Configuration error: {0}")]
    Config(String),

    /// Error reported by a remote registry over the control plane
    #[error("Remote error ({code}): {message}")]
    Remote {
        /// Wire error code
        code: String,
        /// Error message
        message: String,
    },

    /// Client connection was closed or the request was dropped
    #[error("Connection error: {0}")]
    Connection(String),

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML serialization error
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl Error {
    /// Stable error code used on the wire
    pub fn code(&self) -> &str {
        match self {
            Error::InvalidArgument(_) => "invalid_argument",
            Error::NotFound(_) => "not_found",
            Error::PublishFailure(_) => "publish_failure",
            Error::StartupFailure(_) => "startup_failure",
            Error::Config(_) => "config",
            Error::Remote { code, .. } => code,
            _ => "internal",
        }
    }

    /// Convert the error into its wire representation
    pub fn to_info(&self) -> ErrorInfo {
        let message = match self {
            Error::InvalidArgument(m)
            | Error::NotFound(m)
            | Error::PublishFailure(m)
            | Error::StartupFailure(m)
            | Error::Config(m) => m.clone(),
            Error::Remote { message, .. } => message.clone(),
            other => other.to_string(),
        };

        ErrorInfo {
            code: self.code().to_string(),
            message,
            details: None,
        }
    }

    /// Rebuild an error from its wire representation
    pub fn from_info(info: ErrorInfo) -> Self {
        match info.code.as_str() {
            "invalid_argument" => Error::InvalidArgument(info.message),
            "not_found" => Error::NotFound(info.message),
            "publish_failure" => Error::PublishFailure(info.message),
            _ => Error::Remote {
                code: info.code,
                message: info.message,
            },
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_codes_survive_conversion() {
        let err = Error::NotFound("svc-1".to_string());
        let info = err.to_info();
        assert_eq!(info.code, "not_found");
        assert_eq!(info.message, "svc-1");

        match Error::from_info(info) {
            Error::NotFound(key) => assert_eq!(key, "svc-1"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_codes_become_remote() {
        let err = Error::from_info(ErrorInfo {
            code: "internal".to_string(),
            message: "boom".to_string(),
            details: None,
        });
        assert_eq!(err.code(), "internal");
        assert!(matches!(err, Error::Remote { .. }));
    }
}
