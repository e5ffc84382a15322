//! Error types for the Meet client

use thiserror::Error;

/// Errors surfaced by the voice-chat session and its collaborators
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MeetError {
    /// Microphone access was denied or no input device is available
    #[error("Failed to access microphone: {0}")]
    Permission(String),

    /// The live channel failed to open, send or receive
    #[error("WebSocket error: {0}")]
    Transport(String),

    /// A recommendation fetch failed (network or non-2xx)
    #[error("Failed to load recommendations: {0}")]
    Poll(String),

    /// Audio decoding, rendering or device failure
    #[error("Audio error: {0}")]
    Audio(String),

    /// Malformed inbound frame
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("A stream is already active for this session")]
    AlreadyStreaming,
}

impl MeetError {
    /// Whether the error ends the current stream
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            MeetError::Permission(_) | MeetError::Transport(_) | MeetError::AlreadyStreaming
        )
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for MeetError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        MeetError::Transport(err.to_string())
    }
}

impl From<reqwest::Error> for MeetError {
    fn from(err: reqwest::Error) -> Self {
        MeetError::Poll(err.to_string())
    }
}

impl From<serde_json::Error> for MeetError {
    fn from(err: serde_json::Error) -> Self {
        MeetError::Protocol(err.to_string())
    }
}

impl From<base64::DecodeError> for MeetError {
    fn from(err: base64::DecodeError) -> Self {
        MeetError::Protocol(format!("invalid base64 payload: {}", err))
    }
}

impl From<hound::Error> for MeetError {
    fn from(err: hound::Error) -> Self {
        MeetError::Audio(err.to_string())
    }
}

impl From<symphonia::core::errors::Error> for MeetError {
    fn from(err: symphonia::core::errors::Error) -> Self {
        MeetError::Audio(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, MeetError>;
