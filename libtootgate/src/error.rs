//! Error types for Tootgate

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, TootgateError>;

#[derive(Error, Debug)]
pub enum TootgateError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Timeline error: {0}")]
    Timeline(#[from] TimelineError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl TootgateError {
    /// Returns the appropriate exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            TootgateError::InvalidInput(_) => 3,
            TootgateError::Timeline(TimelineError::Authentication(_)) => 2,
            TootgateError::Timeline(_) => 1,
            TootgateError::Config(_) => 1,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Unknown timezone: {0}")]
    UnknownTimezone(String),
}

/// Failures reported by a [`crate::timeline::RemoteTimeline`] or raised
/// while preparing a call to one.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TimelineError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Media file not found: {}", .0.display())]
    MissingMediaFile(PathBuf),

    #[error("Media upload failed: {0}")]
    Upload(String),

    #[error("Publishing failed: {0}")]
    Publish(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),
}

impl TimelineError {
    /// Short machine-friendly tag used in audit entries and JSON output
    pub fn kind(&self) -> &'static str {
        match self {
            TimelineError::Authentication(_) => "auth_error",
            TimelineError::Transport(_) => "transport_error",
            TimelineError::MissingMediaFile(_) => "missing_media_file",
            TimelineError::Upload(_) => "upload_error",
            TimelineError::Publish(_) => "publish_error",
            TimelineError::RateLimit(_) => "rate_limited",
        }
    }
}
