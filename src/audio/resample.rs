// Streaming sample-rate conversion
//
// Device callbacks hand over buffers of arbitrary length. Samples are
// collected until the resampler has a full input chunk, and whatever is left
// over waits for the next call, so the output is continuous across buffers.

use rubato::{FftFixedIn, Resampler};
use tracing::debug;

use crate::error::{MeetError, Result};

/// Input frames per resampler chunk
const CHUNK_SIZE: usize = 1024;

/// Mono resampler that keeps its state between calls
pub struct StreamResampler {
    from_rate: u32,
    to_rate: u32,
    resampler: Option<FftFixedIn<f32>>,
    pending: Vec<f32>,
}

impl StreamResampler {
    /// Passes samples through unchanged when the rates match
    pub fn new(from_rate: u32, to_rate: u32) -> Result<Self> {
        let resampler = if from_rate == to_rate {
            None
        } else {
            debug!("Initializing resampler: {} Hz -> {} Hz", from_rate, to_rate);
            Some(
                FftFixedIn::<f32>::new(from_rate as usize, to_rate as usize, CHUNK_SIZE, 1, 1)
                    .map_err(|e| MeetError::Audio(format!("Resampler setup failed: {}", e)))?,
            )
        };

        Ok(Self {
            from_rate,
            to_rate,
            resampler,
            pending: Vec::with_capacity(CHUNK_SIZE * 2),
        })
    }

    pub fn from_rate(&self) -> u32 {
        self.from_rate
    }

    pub fn to_rate(&self) -> u32 {
        self.to_rate
    }

    /// Convert the next stretch of input
    ///
    /// Only complete chunks are processed; the remainder is kept for the
    /// next call.
    pub fn process(&mut self, samples: &[f32]) -> Result<Vec<f32>> {
        let Some(resampler) = self.resampler.as_mut() else {
            return Ok(samples.to_vec());
        };

        self.pending.extend_from_slice(samples);

        let mut output = Vec::new();
        loop {
            let needed = resampler.input_frames_next();
            if self.pending.len() < needed {
                break;
            }

            let chunk: Vec<f32> = self.pending.drain(..needed).collect();
            let result = resampler
                .process(&[chunk], None)
                .map_err(|e| MeetError::Audio(format!("Resampling failed: {}", e)))?;
            if let Some(resampled) = result.into_iter().next() {
                output.extend(resampled);
            }
        }

        Ok(output)
    }

    /// Push out the held-back tail, zero-padded to a full chunk
    pub fn flush(&mut self) -> Result<Vec<f32>> {
        let Some(resampler) = self.resampler.as_ref() else {
            return Ok(Vec::new());
        };
        if self.pending.is_empty() {
            return Ok(Vec::new());
        }

        let padded = resampler.input_frames_next();
        let mut tail = std::mem::take(&mut self.pending);
        tail.resize(padded, 0.0);
        self.process(&tail)
    }

    /// Samples waiting for a full chunk
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn reset(&mut self) {
        self.pending.clear();
        if let Some(resampler) = self.resampler.as_mut() {
            resampler.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(rate: u32, seconds: f32) -> Vec<f32> {
        let frames = (rate as f32 * seconds) as usize;
        (0..frames)
            .map(|i| (i as f32 / rate as f32 * 440.0 * std::f32::consts::TAU).sin() * 0.5)
            .collect()
    }

    #[test]
    fn test_matching_rates_pass_through() {
        let mut resampler = StreamResampler::new(16000, 16000).unwrap();
        let input = tone(16000, 0.01);

        assert_eq!(resampler.process(&input).unwrap(), input);
        assert!(resampler.flush().unwrap().is_empty());
    }

    #[test]
    fn test_callback_sized_buffers_match_single_pass() {
        let input = tone(44100, 1.0);

        let mut whole = StreamResampler::new(44100, 16000).unwrap();
        let mut expected = whole.process(&input).unwrap();
        expected.extend(whole.flush().unwrap());

        let mut streamed = StreamResampler::new(44100, 16000).unwrap();
        let mut output = Vec::new();
        for buffer in input.chunks(512) {
            output.extend(streamed.process(buffer).unwrap());
        }
        output.extend(streamed.flush().unwrap());

        assert_eq!(output.len(), expected.len());
        assert_eq!(output, expected);
    }

    #[test]
    fn test_no_samples_lost_across_buffers() {
        let input = tone(48000, 1.0);
        let mut resampler = StreamResampler::new(48000, 16000).unwrap();

        let mut output = Vec::new();
        for buffer in input.chunks(480) {
            output.extend(resampler.process(buffer).unwrap());
        }
        let before_flush = output.len();
        output.extend(resampler.flush().unwrap());

        // At most one input chunk is held back before the flush
        assert!(before_flush >= 16000 - CHUNK_SIZE);
        assert!(output.len() >= 16000);
        assert_eq!(resampler.pending(), 0);
    }

    #[test]
    fn test_reset_discards_pending() {
        let mut resampler = StreamResampler::new(44100, 16000).unwrap();
        resampler.process(&tone(44100, 0.005)).unwrap();
        assert!(resampler.pending() > 0);

        resampler.reset();
        assert_eq!(resampler.pending(), 0);
    }
}
