pub mod backend;
pub mod file;
pub mod level;
pub mod pcm;
pub mod playback;
pub mod resample;
pub mod sink;

#[cfg(feature = "microphone")]
pub mod microphone;

pub use backend::{
    AudioBackend, AudioBackendConfig, AudioBackendFactory, AudioBlock, AudioSource, BlockAssembler,
    CAPTURE_BLOCK_SIZE, CAPTURE_SAMPLE_RATE,
};
pub use file::{AudioFile, FileBackend};
pub use level::{LevelMeter, SPEAKING_THRESHOLD};
pub use playback::{AudioChunk, PlaybackQueue, PLAYBACK_SAMPLE_RATE};
pub use resample::StreamResampler;
pub use sink::{AudioOutput, AudioSink, NullSink, WavSink};
