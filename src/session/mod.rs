//! Meet session management
//!
//! `MeetSession` ties the pieces together for one conversation:
//! - Audio capture, level metering and outbound encoding
//! - The live WebSocket channel and inbound dispatch
//! - Ordered playback of synthesized speech
//! - Transcript collection and speaking indicators
//! - Recommendation polling while connected

mod config;
mod session;
mod state;
mod stats;

pub use config::{detect_language, locale_to_tag, SessionConfig, StreamConfig};
pub use session::{MeetSession, SinkFactory};
pub use state::ConnectionState;
pub use stats::{Indicators, SessionStats, Speaker, Transcript, TranscriptMessage};
