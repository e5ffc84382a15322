pub mod audio;
pub mod config;
pub mod error;
pub mod recommendations;
pub mod session;
pub mod signaling;

pub use audio::{
    AudioBackend, AudioBackendConfig, AudioBackendFactory, AudioBlock, AudioChunk, AudioFile,
    AudioOutput, AudioSink, AudioSource, LevelMeter, PlaybackQueue,
};
pub use config::Config;
pub use error::{MeetError, Result};
pub use recommendations::{
    HttpRecommendationSource, Property, RecommendationPoller, RecommendationSnapshot,
    RecommendationSource,
};
pub use session::{
    ConnectionState, Indicators, MeetSession, SessionConfig, SessionStats, Speaker, StreamConfig,
    TranscriptMessage,
};
pub use signaling::{ClientMessage, ServerMessage, SignalingChannel};
