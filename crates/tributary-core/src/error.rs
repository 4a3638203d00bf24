use std::fmt::Display;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TributaryError {
    /// A call to the stream log (read, ack, append, admin) failed.
    #[error("Transport error during {operation}: {message}")]
    Transport {
        operation: &'static str,
        message: String,
    },

    /// `create_group` was called for a group that already exists.
    #[error("Consumer group '{group}' already exists on stream '{stream}'")]
    GroupExists { stream: String, group: String },

    #[error("Failed to ensure consumer group for stream '{stream}': {reason}")]
    GroupCreation { stream: String, reason: String },

    /// The engine received entries for a stream it never registered.
    #[error("No state registered for stream '{0}'")]
    MissingStreamState(String),

    #[error("Invalid entry id: {0}")]
    InvalidEntryId(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Consumer has been shut down")]
    Shutdown,

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl TributaryError {
    /// Build a transport error for the named stream log operation.
    pub fn transport(operation: &'static str, err: impl Display) -> Self {
        TributaryError::Transport {
            operation,
            message: err.to_string(),
        }
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, TributaryError::Transport { .. })
    }
}

pub type Result<T> = std::result::Result<T, TributaryError>;
