// Live input level analysis
//
// Mirrors the behaviour of a Web Audio analyser with fftSize 256: the most
// recent 256 samples are Blackman-windowed, transformed, smoothed over time,
// converted to decibels and mapped onto a byte scale. The mean byte value,
// normalized by 128 and clamped to 1, is the level used for the speaking
// indicator.

use std::collections::VecDeque;
use std::f32::consts::PI;

/// Level above which the local user is considered to be speaking
pub const SPEAKING_THRESHOLD: f32 = 0.1;

/// Default analysis window (frequencyBinCount = 128)
pub const DEFAULT_FFT_SIZE: usize = 256;

const SMOOTHING_TIME_CONSTANT: f32 = 0.8;
const MIN_DECIBELS: f32 = -100.0;
const MAX_DECIBELS: f32 = -30.0;

/// Frequency-domain volume meter
#[derive(Debug, Clone)]
pub struct LevelMeter {
    fft_size: usize,
    threshold: f32,
    window: Vec<f32>,
    cos_table: Vec<f32>,
    sin_table: Vec<f32>,
    history: VecDeque<f32>,
    smoothed: Vec<f32>,
}

impl LevelMeter {
    pub fn new(fft_size: usize, threshold: f32) -> Self {
        let n = fft_size as f32;
        let window = (0..fft_size)
            .map(|i| {
                let x = i as f32 / n;
                0.42 - 0.5 * (2.0 * PI * x).cos() + 0.08 * (4.0 * PI * x).cos()
            })
            .collect();
        let cos_table = (0..fft_size).map(|i| (2.0 * PI * i as f32 / n).cos()).collect();
        let sin_table = (0..fft_size).map(|i| (2.0 * PI * i as f32 / n).sin()).collect();

        Self {
            fft_size,
            threshold,
            window,
            cos_table,
            sin_table,
            history: VecDeque::from(vec![0.0; fft_size]),
            smoothed: vec![0.0; fft_size / 2],
        }
    }

    /// Number of frequency bins produced per analysis
    pub fn bin_count(&self) -> usize {
        self.fft_size / 2
    }

    /// Feed a block of time-domain samples and return the normalized level in [0, 1]
    pub fn process(&mut self, samples: &[f32]) -> f32 {
        for &sample in samples {
            self.history.pop_front();
            self.history.push_back(sample);
        }

        let bytes = self.byte_frequency_data();
        let average = bytes.iter().map(|&b| b as f32).sum::<f32>() / bytes.len() as f32;

        (average / 128.0).min(1.0)
    }

    /// Whether a level counts as speech
    pub fn is_speaking(&self, level: f32) -> bool {
        level > self.threshold
    }

    /// Reset smoothing and history, e.g. between streams
    pub fn reset(&mut self) {
        self.history.iter_mut().for_each(|s| *s = 0.0);
        self.smoothed.iter_mut().for_each(|s| *s = 0.0);
    }

    fn byte_frequency_data(&mut self) -> Vec<u8> {
        let n = self.fft_size;
        let windowed: Vec<f32> = self
            .history
            .iter()
            .zip(&self.window)
            .map(|(s, w)| s * w)
            .collect();

        let scale = 255.0 / (MAX_DECIBELS - MIN_DECIBELS);
        let mut bytes = Vec::with_capacity(self.bin_count());

        for k in 0..self.bin_count() {
            let (mut re, mut im) = (0.0f32, 0.0f32);
            for (i, x) in windowed.iter().enumerate() {
                let idx = (k * i) % n;
                re += x * self.cos_table[idx];
                im -= x * self.sin_table[idx];
            }

            let magnitude = (re * re + im * im).sqrt() / n as f32;
            let smoothed = SMOOTHING_TIME_CONSTANT * self.smoothed[k]
                + (1.0 - SMOOTHING_TIME_CONSTANT) * magnitude;
            self.smoothed[k] = smoothed;

            let byte = if smoothed > 0.0 {
                let db = 20.0 * smoothed.log10();
                (scale * (db - MIN_DECIBELS)).clamp(0.0, 255.0) as u8
            } else {
                0
            };
            bytes.push(byte);
        }

        bytes
    }
}

impl Default for LevelMeter {
    fn default() -> Self {
        Self::new(DEFAULT_FFT_SIZE, SPEAKING_THRESHOLD)
    }
}
