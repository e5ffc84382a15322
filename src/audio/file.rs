use async_trait::async_trait;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::backend::{AudioBackend, AudioBackendConfig, AudioBlock, BlockAssembler};
use crate::error::{MeetError, Result};

/// A fully decoded audio file, downmixed to mono
pub struct AudioFile {
    pub path: String,
    pub duration_seconds: f64,
    pub sample_rate: u32,
    pub channels: u16,
    /// Mono samples in [-1, 1]
    pub samples: Vec<f32>,
}

impl AudioFile {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening audio file: {}", path.display());

        let file = File::open(path)
            .map_err(|e| MeetError::Audio(format!("Failed to open {}: {}", path.display(), e)))?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe().format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )?;
        let mut format = probed.format;

        let track = format
            .default_track()
            .ok_or_else(|| MeetError::Audio(format!("No audio track in {}", path.display())))?;
        let track_id = track.id;
        let mut decoder =
            symphonia::default::get_codecs().make(&track.codec_params, &DecoderOptions::default())?;

        let mut sample_rate = track.codec_params.sample_rate.unwrap_or(0);
        let mut channels = track
            .codec_params
            .channels
            .map(|c| c.count() as u16)
            .unwrap_or(0);
        let mut samples = Vec::new();

        loop {
            let packet = match format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    break
                }
                Err(e) => return Err(e.into()),
            };

            if packet.track_id() != track_id {
                continue;
            }

            let decoded = match decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(SymphoniaError::DecodeError(e)) => {
                    warn!("Skipping undecodable packet: {}", e);
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let spec = *decoded.spec();
            sample_rate = spec.rate;
            channels = spec.channels.count() as u16;

            let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
            buffer.copy_interleaved_ref(decoded);
            samples.extend(downmix(buffer.samples(), channels));
        }

        if sample_rate == 0 || channels == 0 {
            return Err(MeetError::Audio(format!(
                "Could not determine audio format of {}",
                path.display()
            )));
        }

        let duration_seconds = samples.len() as f64 / sample_rate as f64;

        info!(
            "Audio file loaded: {:.1}s, {}Hz, {} channels, {} samples",
            duration_seconds,
            sample_rate,
            channels,
            samples.len()
        );

        Ok(Self {
            path: path.display().to_string(),
            duration_seconds,
            sample_rate,
            channels,
            samples,
        })
    }

    /// Mono samples resampled to `target_rate` by linear interpolation
    pub fn resampled(&self, target_rate: u32) -> Vec<f32> {
        resample_linear(&self.samples, self.sample_rate, target_rate)
    }
}

/// Average interleaved channels down to mono
fn downmix(interleaved: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }

    interleaved
        .chunks_exact(channels as usize)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

pub(crate) fn resample_linear(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() {
        return samples.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let out_len = (samples.len() as f64 / ratio).floor() as usize;

    (0..out_len)
        .map(|i| {
            let pos = i as f64 * ratio;
            let idx = pos.floor() as usize;
            let frac = (pos - idx as f64) as f32;
            let a = samples[idx];
            let b = samples.get(idx + 1).copied().unwrap_or(a);
            a + (b - a) * frac
        })
        .collect()
}

/// Capture backend that replays an audio file as if it were a microphone
///
/// Blocks are emitted at the real-time rate of the target sample rate unless
/// pacing is disabled. The final partial block is zero-padded.
pub struct FileBackend {
    path: PathBuf,
    config: AudioBackendConfig,
    paced: bool,
    stop_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl FileBackend {
    pub fn new(path: impl Into<PathBuf>, config: AudioBackendConfig) -> Self {
        Self {
            path: path.into(),
            config,
            paced: true,
            stop_tx: None,
            task: None,
        }
    }

    /// Emit blocks as fast as the consumer accepts them
    pub fn unpaced(mut self) -> Self {
        self.paced = false;
        self
    }
}

#[async_trait]
impl AudioBackend for FileBackend {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioBlock>> {
        if self.is_capturing() {
            return Err(MeetError::Audio("Already capturing".to_string()));
        }

        let path = self.path.clone();
        let target_rate = self.config.sample_rate;
        let samples = tokio::task::spawn_blocking(move || {
            AudioFile::open(&path).map(|file| file.resampled(target_rate))
        })
        .await
        .map_err(|e| MeetError::Audio(format!("File decode task failed: {}", e)))??;

        let block_size = self.config.block_size;
        let block_period =
            Duration::from_secs_f64(block_size as f64 / self.config.sample_rate as f64);
        let paced = self.paced;

        let (tx, rx) = mpsc::channel(32);
        let (stop_tx, mut stop_rx) = oneshot::channel();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(block_period);
            let mut assembler = BlockAssembler::new(block_size, target_rate);
            let mut blocks = assembler.push(&samples);
            blocks.extend(assembler.flush());

            for block in blocks {
                if paced {
                    tokio::select! {
                        _ = ticker.tick() => {}
                        _ = &mut stop_rx => break,
                    }
                } else if stop_rx.try_recv().is_ok() {
                    break;
                }

                if tx.send(block).await.is_err() {
                    debug!("Capture receiver dropped, ending file playback");
                    break;
                }
            }

            info!("File capture finished");
        });

        self.stop_tx = Some(stop_tx);
        self.task = Some(task);

        info!("File capture started: {}", self.path.display());

        Ok(rx)
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }

        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
            info!("File capture stopped");
        }

        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    fn name(&self) -> &str {
        "file"
    }
}
