use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::state::ConnectionState;

/// Statistics about a Meet session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStats {
    /// Connection state at the time of the snapshot
    pub state: ConnectionState,

    /// When the session was created
    pub started_at: DateTime<Utc>,

    /// Total duration in seconds
    pub duration_secs: f64,

    /// Capture blocks sent to the live endpoint
    pub blocks_sent: u64,

    /// Capture blocks discarded because the channel was not open
    pub blocks_dropped: u64,

    /// Synthesized speech chunks received
    pub chunks_received: u64,

    /// Synthesized speech chunks rendered
    pub chunks_played: u64,

    /// Remote turns completed
    pub turns_completed: u64,

    /// Transcript messages received
    pub transcript_messages: usize,

    /// Properties in the current recommendation snapshot
    pub recommendations: usize,
}

/// Who a transcript line is attributed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    Local,
    Remote,
}

impl fmt::Display for Speaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Speaker::Local => f.write_str("You"),
            Speaker::Remote => f.write_str("HomeConnect"),
        }
    }
}

/// A single line of the conversation transcript
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptMessage {
    pub content: String,
    pub sender: Speaker,
    pub timestamp: DateTime<Utc>,
}

impl fmt::Display for TranscriptMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}: {}",
            self.timestamp.format("%H:%M:%S"),
            self.sender,
            self.content
        )
    }
}

/// Append-only conversation log
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    messages: Vec<TranscriptMessage>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: TranscriptMessage) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[TranscriptMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Speaking indicators for both sides of the call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Indicators {
    pub user_speaking: bool,
    pub remote_speaking: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_transcript_line_format() {
        let message = TranscriptMessage {
            content: "Looking for a 2BHK in Pune".to_string(),
            sender: Speaker::Local,
            timestamp: Utc.with_ymd_and_hms(2025, 3, 1, 14, 30, 5).unwrap(),
        };
        assert_eq!(message.to_string(), "[14:30:05] You: Looking for a 2BHK in Pune");
    }

    #[test]
    fn test_transcript_keeps_arrival_order() {
        let mut transcript = Transcript::new();
        for (i, sender) in [Speaker::Local, Speaker::Remote, Speaker::Local].into_iter().enumerate() {
            transcript.push(TranscriptMessage {
                content: format!("line {}", i),
                sender,
                timestamp: Utc::now(),
            });
        }

        assert_eq!(transcript.len(), 3);
        let contents: Vec<_> = transcript.messages().iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["line 0", "line 1", "line 2"]);
        assert_eq!(transcript.messages()[1].sender, Speaker::Remote);
    }

    #[test]
    fn test_speaker_serialization() {
        assert_eq!(serde_json::to_string(&Speaker::Remote).unwrap(), "\"remote\"");
    }
}
