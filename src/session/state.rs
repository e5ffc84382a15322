use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of the live connection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Streaming,
    /// The last stream ended with a fatal error; a new start is required
    Error,
}

impl ConnectionState {
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;

        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Connecting, Streaming)
                | (Connecting, Error)
                | (Connecting, Disconnected)
                | (Streaming, Disconnected)
                | (Streaming, Error)
                | (Error, Connecting)
                | (Error, Disconnected)
        )
    }

    /// Whether the connection is up and audio is flowing
    pub fn is_connected(self) -> bool {
        self == ConnectionState::Streaming
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConnectionState::Disconnected => "Ready",
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Streaming => "Connected",
            ConnectionState::Error => "Error",
        };
        f.write_str(label)
    }
}
