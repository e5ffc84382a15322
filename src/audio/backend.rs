use async_trait::async_trait;
use std::path::PathBuf;
use tokio::sync::mpsc;

use crate::error::Result;

/// Outbound capture rate expected by the live endpoint
pub const CAPTURE_SAMPLE_RATE: u32 = 16000;

/// Samples per processed block (~32ms at 16kHz)
pub const CAPTURE_BLOCK_SIZE: usize = 512;

/// One fixed-size block of captured mono audio
#[derive(Debug, Clone)]
pub struct AudioBlock {
    /// Time-domain samples in [-1, 1]
    pub samples: Vec<f32>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Block sequence number since capture started
    pub sequence: u64,
}

impl AudioBlock {
    /// Duration covered by this block in milliseconds
    pub fn duration_ms(&self) -> f64 {
        self.samples.len() as f64 * 1000.0 / self.sample_rate as f64
    }
}

/// Regroups arbitrary-length sample runs into fixed-size blocks
#[derive(Debug)]
pub struct BlockAssembler {
    block_size: usize,
    sample_rate: u32,
    pending: Vec<f32>,
    next_sequence: u64,
}

impl BlockAssembler {
    pub fn new(block_size: usize, sample_rate: u32) -> Self {
        Self {
            block_size,
            sample_rate,
            pending: Vec::with_capacity(block_size * 2),
            next_sequence: 0,
        }
    }

    /// Append samples and return every block that is now complete
    pub fn push(&mut self, samples: &[f32]) -> Vec<AudioBlock> {
        self.pending.extend_from_slice(samples);

        let mut blocks = Vec::new();
        while self.pending.len() >= self.block_size {
            let rest = self.pending.split_off(self.block_size);
            let samples = std::mem::replace(&mut self.pending, rest);
            blocks.push(self.make_block(samples));
        }
        blocks
    }

    /// Emit the remaining samples as a zero-padded block
    pub fn flush(&mut self) -> Option<AudioBlock> {
        if self.pending.is_empty() {
            return None;
        }

        let mut samples = std::mem::take(&mut self.pending);
        samples.resize(self.block_size, 0.0);
        Some(self.make_block(samples))
    }

    fn make_block(&mut self, samples: Vec<f32>) -> AudioBlock {
        let block = AudioBlock {
            samples,
            sample_rate: self.sample_rate,
            sequence: self.next_sequence,
        };
        self.next_sequence += 1;
        block
    }
}

/// Configuration for a capture backend
#[derive(Debug, Clone)]
pub struct AudioBackendConfig {
    /// Target sample rate (input is resampled if needed)
    pub sample_rate: u32,
    /// Samples per emitted block
    pub block_size: usize,
}

impl Default for AudioBackendConfig {
    fn default() -> Self {
        Self {
            sample_rate: CAPTURE_SAMPLE_RATE,
            block_size: CAPTURE_BLOCK_SIZE,
        }
    }
}

/// Audio capture backend trait
///
/// Implementations:
/// - Microphone: cpal default input device (feature `microphone`)
/// - File: decoded audio file paced in real time (testing, headless use)
#[async_trait]
pub trait AudioBackend: Send + Sync {
    /// Start capturing audio
    ///
    /// Returns a channel receiver that yields fixed-size blocks. Failing to
    /// acquire the input is reported as [`crate::error::MeetError::Permission`].
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioBlock>>;

    /// Stop capturing and release the input
    async fn stop(&mut self) -> Result<()>;

    /// Check if backend is currently capturing
    fn is_capturing(&self) -> bool;

    /// Get backend name for logging
    fn name(&self) -> &str;
}

/// Audio source type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioSource {
    /// Default microphone
    Microphone,
    /// Audio file (any format symphonia can decode)
    File(PathBuf),
}

impl std::str::FromStr for AudioSource {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "mic" | "microphone" => Ok(AudioSource::Microphone),
            path => Ok(AudioSource::File(PathBuf::from(path))),
        }
    }
}

/// Audio backend factory
pub struct AudioBackendFactory;

impl AudioBackendFactory {
    /// Create a capture backend for the given source
    pub fn create(
        source: AudioSource,
        config: AudioBackendConfig,
    ) -> Result<Box<dyn AudioBackend>> {
        match source {
            AudioSource::Microphone => {
                #[cfg(feature = "microphone")]
                {
                    use super::microphone::MicrophoneBackend;
                    Ok(Box::new(MicrophoneBackend::new(config)))
                }

                #[cfg(not(feature = "microphone"))]
                {
                    let _ = config;
                    Err(crate::error::MeetError::Permission(
                        "microphone capture is not available in this build (enable the `microphone` feature)"
                            .to_string(),
                    ))
                }
            }

            AudioSource::File(path) => {
                use super::file::FileBackend;
                Ok(Box::new(FileBackend::new(path, config)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MeetError;

    #[test]
    fn test_block_duration() {
        let block = AudioBlock {
            samples: vec![0.0; CAPTURE_BLOCK_SIZE],
            sample_rate: CAPTURE_SAMPLE_RATE,
            sequence: 0,
        };
        assert!((block.duration_ms() - 32.0).abs() < 1e-9);
    }

    #[test]
    fn test_assembler_regroups_runs() {
        let mut assembler = BlockAssembler::new(4, 16000);

        assert!(assembler.push(&[0.1, 0.2, 0.3]).is_empty());

        let blocks = assembler.push(&[0.4, 0.5, 0.6, 0.7, 0.8, 0.9]);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].samples, vec![0.1, 0.2, 0.3, 0.4]);
        assert_eq!(blocks[1].samples, vec![0.5, 0.6, 0.7, 0.8]);
        assert_eq!(blocks[1].sequence, 1);

        let last = assembler.flush().unwrap();
        assert_eq!(last.samples, vec![0.9, 0.0, 0.0, 0.0]);
        assert_eq!(last.sequence, 2);
        assert!(assembler.flush().is_none());
    }

    #[test]
    fn test_source_parsing() {
        assert_eq!("mic".parse::<AudioSource>().unwrap(), AudioSource::Microphone);
        assert_eq!(
            "call.wav".parse::<AudioSource>().unwrap(),
            AudioSource::File(PathBuf::from("call.wav"))
        );
    }

    #[cfg(not(feature = "microphone"))]
    #[test]
    fn test_microphone_unavailable_is_permission_error() {
        let result = AudioBackendFactory::create(AudioSource::Microphone, AudioBackendConfig::default());
        assert!(matches!(result, Err(MeetError::Permission(_))));
    }
}
