// Error types for the synchronization engine

use crate::connection::ConnectionState;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum SyncError {
    #[error("Message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },
    #[error("Cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: ConnectionState,
    },
    #[error("Codec error: {0}")]
    Codec(String),
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Sync client has shut down")]
    Closed,
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Codec(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
