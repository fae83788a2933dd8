//! Error types for the link crate
//!
//! None of these end the process: workers log them and carry on.

use thiserror::Error;

/// Broker session failures
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("broker refused the connection: {0}")]
    Refused(String),

    #[error("broker did not answer within {0:?}")]
    Timeout(std::time::Duration),

    #[error("broker connection error: {0}")]
    Connection(#[from] Box<rumqttc::ConnectionError>),

    #[error("broker request rejected: {0}")]
    Client(#[from] rumqttc::ClientError),

    #[error("no broker session")]
    NotConnected,

    #[error("could not encode outbound payload: {0}")]
    Encode(String),
}

impl From<rumqttc::ConnectionError> for SessionError {
    fn from(err: rumqttc::ConnectionError) -> Self {
        SessionError::Connection(Box::new(err))
    }
}

/// Why an inbound command produced no actuator request
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("command has no command_name")]
    MissingName,

    #[error("unknown command {0:?}")]
    Unknown(String),

    #[error("invalid parameters for {command}: {reason}")]
    InvalidParams { command: &'static str, reason: String },
}

/// Actuator collaborator refusals
#[derive(Debug, Error)]
pub enum ActuatorError {
    #[error("index {index} out of range (max {max})")]
    OutOfRange { index: usize, max: usize },

    #[error("invalid alarm time {hour:02}:{minute:02}")]
    InvalidTime { hour: u8, minute: u8 },

    #[error("actuator I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode alarms: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("playback request could not reach the UI")]
    UiUnavailable,
}

/// Configuration loading failures
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("could not find a config directory")]
    NoConfigDir,
}
