use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::session::StreamConfig;

/// Frame sent to the live endpoint, one JSON object per WebSocket message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Stream settings; always the first frame on a connection
    Config { config: StreamConfig },
    /// Base64 PCM16 mono 16kHz block
    Audio { data: String },
    /// Typed user input
    Text { data: String },
}

impl ClientMessage {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::Config { .. } => "config",
            ClientMessage::Audio { .. } => "audio",
            ClientMessage::Text { .. } => "text",
        }
    }
}

/// Frame received from the live endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Base64 PCM16 mono 24kHz synthesized speech
    Audio { data: String },
    /// Transcript text
    Text { data: TextPayload },
    /// The remote side finished its turn
    TurnComplete {
        #[serde(default)]
        data: bool,
    },
}

impl ServerMessage {
    pub fn parse(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// Text payloads arrive either bare or wrapped as `{"text": ...}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TextPayload {
    Plain(String),
    Wrapped { text: String },
}

impl TextPayload {
    pub fn into_text(self) -> String {
        match self {
            TextPayload::Plain(text) | TextPayload::Wrapped { text } => text,
        }
    }
}

impl From<&str> for TextPayload {
    fn from(text: &str) -> Self {
        TextPayload::Plain(text.to_string())
    }
}
