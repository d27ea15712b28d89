//! Error types for the avatar playback engine

use thiserror::Error;

/// Result type alias for avatar playback operations
pub type AvatarResult<T> = Result<T, AvatarError>;

/// Errors that can occur in the streaming playback engine
///
/// Per-chunk failures (`Protocol`, `Decode`) are isolated: one malformed
/// event or undecodable chunk never aborts the utterance it belongs to.
#[derive(Error, Debug)]
pub enum AvatarError {
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Chunk decode error: {0}")]
    Decode(String),

    #[error("Audio device error: {0}")]
    Device(String),

    #[error("Audio playback error: {0}")]
    Playback(String),

    #[error("Channel send error: {0}")]
    ChannelSend(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for AvatarError {
    fn from(err: serde_json::Error) -> Self {
        AvatarError::Protocol(err.to_string())
    }
}
