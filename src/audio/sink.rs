use async_trait::async_trait;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::pcm::float32_to_pcm16;
use super::playback::AudioChunk;
use super::resample::StreamResampler;
use crate::error::{MeetError, Result};

/// Output stage for synthesized speech
///
/// `render` resolves once the chunk has finished playing; the playback
/// driver relies on that to keep chunks from overlapping.
#[async_trait]
pub trait AudioSink: Send {
    async fn render(&mut self, chunk: &AudioChunk) -> Result<()>;

    /// Flush and release the output
    async fn close(&mut self) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &str;
}

/// Where synthesized speech goes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioOutput {
    /// Default output device (feature `microphone`)
    Device,
    /// Discard audio, waiting out each chunk's duration
    Null,
    /// Record to a WAV file
    Wav(PathBuf),
}

impl std::str::FromStr for AudioOutput {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "device" | "speaker" => Ok(AudioOutput::Device),
            "null" | "none" => Ok(AudioOutput::Null),
            path => Ok(AudioOutput::Wav(PathBuf::from(path))),
        }
    }
}

impl AudioOutput {
    /// Open the output; `sample_rate` is the rate WAV recordings are written at
    pub fn create_sink(&self, sample_rate: u32) -> Result<Box<dyn AudioSink>> {
        match self {
            AudioOutput::Device => {
                #[cfg(feature = "microphone")]
                {
                    Ok(Box::new(DeviceSink::new()?))
                }

                #[cfg(not(feature = "microphone"))]
                {
                    Err(MeetError::Audio(
                        "speaker output is not available in this build (enable the `microphone` feature)"
                            .to_string(),
                    ))
                }
            }
            AudioOutput::Null => Ok(Box::new(NullSink::new())),
            AudioOutput::Wav(path) => Ok(Box::new(WavSink::create(path, sample_rate)?)),
        }
    }
}

/// Sink that drops audio after holding for its real-time duration
#[derive(Debug, Default)]
pub struct NullSink {
    instant: bool,
}

impl NullSink {
    pub fn new() -> Self {
        Self { instant: false }
    }

    /// Complete every render immediately
    pub fn instant() -> Self {
        Self { instant: true }
    }
}

#[async_trait]
impl AudioSink for NullSink {
    async fn render(&mut self, chunk: &AudioChunk) -> Result<()> {
        if !self.instant {
            tokio::time::sleep(chunk.duration()).await;
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "null"
    }
}

/// Sink that appends every chunk to a 16-bit mono WAV file
///
/// Chunks arriving at another rate are resampled to the file's rate.
pub struct WavSink {
    path: PathBuf,
    sample_rate: u32,
    writer: Option<hound::WavWriter<BufWriter<File>>>,
    resampler: Option<StreamResampler>,
    samples_written: usize,
}

impl WavSink {
    pub fn create(path: impl AsRef<Path>, sample_rate: u32) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let writer = hound::WavWriter::create(&path, spec).map_err(|e| {
            MeetError::Audio(format!("Failed to create WAV file {:?}: {}", path, e))
        })?;

        info!(
            "Recording synthesized speech to {} at {}Hz",
            path.display(),
            sample_rate
        );

        Ok(Self {
            path,
            sample_rate,
            writer: Some(writer),
            resampler: None,
            samples_written: 0,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn samples_written(&self) -> usize {
        self.samples_written
    }

    fn write(&mut self, samples: &[f32]) -> Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| MeetError::Audio("WAV sink already closed".to_string()))?;
        for sample in float32_to_pcm16(samples) {
            writer.write_sample(sample)?;
        }
        self.samples_written += samples.len();
        Ok(())
    }

    /// Write out whatever the resampler is still holding
    fn flush_resampler(&mut self) -> Result<()> {
        if let Some(mut resampler) = self.resampler.take() {
            let tail = resampler.flush()?;
            self.write(&tail)?;
        }
        Ok(())
    }
}

#[async_trait]
impl AudioSink for WavSink {
    async fn render(&mut self, chunk: &AudioChunk) -> Result<()> {
        if self.writer.is_none() {
            return Err(MeetError::Audio("WAV sink already closed".to_string()));
        }

        if chunk.sample_rate == self.sample_rate {
            self.flush_resampler()?;
            self.write(&chunk.samples)?;
        } else {
            if self
                .resampler
                .as_ref()
                .is_some_and(|r| r.from_rate() != chunk.sample_rate)
            {
                self.flush_resampler()?;
            }
            if self.resampler.is_none() {
                debug!(
                    "Chunk {} arrives at {}Hz, resampling to {}Hz",
                    chunk.sequence, chunk.sample_rate, self.sample_rate
                );
                self.resampler = Some(StreamResampler::new(chunk.sample_rate, self.sample_rate)?);
            }
            let resampled = match self.resampler.as_mut() {
                Some(resampler) => resampler.process(&chunk.samples)?,
                None => Vec::new(),
            };
            self.write(&resampled)?;
        }

        debug!("Wrote chunk {} ({} samples)", chunk.sequence, chunk.samples.len());

        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if self.writer.is_some() {
            self.flush_resampler()?;
        }
        if let Some(writer) = self.writer.take() {
            writer.finalize()?;
            info!(
                "Finalized {} ({} samples)",
                self.path.display(),
                self.samples_written
            );
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "wav"
    }
}

impl Drop for WavSink {
    fn drop(&mut self) {
        if let Some(writer) = self.writer.take() {
            if let Err(e) = writer.finalize() {
                warn!("Failed to finalize WAV writer on drop: {}", e);
            }
        }
    }
}

#[cfg(feature = "microphone")]
pub use device::DeviceSink;

#[cfg(feature = "microphone")]
mod device {
    use async_trait::async_trait;
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use std::collections::VecDeque;
    use std::sync::mpsc as std_mpsc;
    use std::sync::{Arc, Mutex};
    use std::thread::JoinHandle;
    use tracing::{error, info};

    use super::AudioSink;
    use crate::audio::playback::AudioChunk;
    use crate::audio::resample::StreamResampler;
    use crate::error::{MeetError, Result};

    /// Sink that plays chunks on the default output device
    ///
    /// The output stream lives on its own thread and pulls from a shared
    /// sample queue; `render` feeds the queue and waits out the chunk.
    pub struct DeviceSink {
        pending: Arc<Mutex<VecDeque<f32>>>,
        device_rate: u32,
        resampler: Option<StreamResampler>,
        stop_tx: Option<std_mpsc::Sender<()>>,
        thread: Option<JoinHandle<()>>,
    }

    impl DeviceSink {
        pub fn new() -> Result<Self> {
            let pending = Arc::new(Mutex::new(VecDeque::new()));
            let (ready_tx, ready_rx) = std_mpsc::channel::<Result<u32>>();
            let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

            let queue = Arc::clone(&pending);
            let thread = std::thread::spawn(move || {
                let opened = (|| -> Result<(cpal::Stream, u32)> {
                    let host = cpal::default_host();
                    let device = host
                        .default_output_device()
                        .ok_or_else(|| MeetError::Audio("No output device available".to_string()))?;
                    let supported = device
                        .default_output_config()
                        .map_err(|e| MeetError::Audio(e.to_string()))?;
                    let config: cpal::StreamConfig = supported.config();
                    let channels = config.channels as usize;
                    let rate = config.sample_rate.0;

                    let stream = device
                        .build_output_stream(
                            &config,
                            move |output: &mut [f32], _: &cpal::OutputCallbackInfo| {
                                let mut queue = match queue.lock() {
                                    Ok(queue) => queue,
                                    Err(poisoned) => poisoned.into_inner(),
                                };
                                for frame in output.chunks_mut(channels.max(1)) {
                                    let sample = queue.pop_front().unwrap_or(0.0);
                                    frame.iter_mut().for_each(|s| *s = sample);
                                }
                            },
                            |err: cpal::StreamError| error!("Playback stream error: {}", err),
                            None,
                        )
                        .map_err(|e| MeetError::Audio(e.to_string()))?;
                    stream.play().map_err(|e| MeetError::Audio(e.to_string()))?;
                    Ok((stream, rate))
                })();

                match opened {
                    Ok((stream, rate)) => {
                        let _ = ready_tx.send(Ok(rate));
                        let _ = stop_rx.recv();
                        drop(stream);
                        info!("Playback stream released");
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                    }
                }
            });

            let device_rate = ready_rx
                .recv()
                .map_err(|_| MeetError::Audio("Playback thread exited".to_string()))??;

            Ok(Self {
                pending,
                device_rate,
                resampler: None,
                stop_tx: Some(stop_tx),
                thread: Some(thread),
            })
        }
    }

    #[async_trait]
    impl AudioSink for DeviceSink {
        async fn render(&mut self, chunk: &AudioChunk) -> Result<()> {
            // One resampler per inbound rate so consecutive chunks join up
            if self
                .resampler
                .as_ref()
                .map_or(true, |r| r.from_rate() != chunk.sample_rate)
            {
                self.resampler = Some(StreamResampler::new(chunk.sample_rate, self.device_rate)?);
            }
            let resampled = match self.resampler.as_mut() {
                Some(resampler) => resampler.process(&chunk.samples)?,
                None => chunk.samples.clone(),
            };
            {
                let mut queue = match self.pending.lock() {
                    Ok(queue) => queue,
                    Err(poisoned) => poisoned.into_inner(),
                };
                queue.extend(resampled);
            }
            tokio::time::sleep(chunk.duration()).await;
            Ok(())
        }

        async fn close(&mut self) -> Result<()> {
            if let Some(stop_tx) = self.stop_tx.take() {
                let _ = stop_tx.send(());
            }
            if let Some(thread) = self.thread.take() {
                let _ = tokio::task::spawn_blocking(move || thread.join()).await;
            }
            Ok(())
        }

        fn name(&self) -> &str {
            "device"
        }
    }
}
