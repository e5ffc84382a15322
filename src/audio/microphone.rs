// Microphone capture using cpal
//
// cpal::Stream is !Send, so the stream is owned by a dedicated thread that
// lives until stop is requested. The data callback downmixes, resamples to
// the capture rate and regroups samples into fixed-size blocks.

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, StreamConfig};
use std::sync::mpsc as std_mpsc;
use std::thread::JoinHandle;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::backend::{AudioBackend, AudioBackendConfig, AudioBlock, BlockAssembler};
use super::resample::StreamResampler;
use crate::error::{MeetError, Result};

/// Default-input-device capture backend
pub struct MicrophoneBackend {
    config: AudioBackendConfig,
    stop_tx: Option<std_mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl MicrophoneBackend {
    pub fn new(config: AudioBackendConfig) -> Self {
        Self {
            config,
            stop_tx: None,
            thread: None,
        }
    }
}

fn build_input_stream(
    config: &AudioBackendConfig,
    block_tx: mpsc::Sender<AudioBlock>,
) -> Result<cpal::Stream> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| MeetError::Permission("No input device available".to_string()))?;

    let supported = device
        .default_input_config()
        .map_err(|e| MeetError::Permission(e.to_string()))?;
    let sample_format = supported.sample_format();
    let stream_config: StreamConfig = supported.config();

    let device_rate = stream_config.sample_rate.0;
    let channels = stream_config.channels as usize;
    let target_rate = config.sample_rate;

    info!(
        "Microphone: {} ({}Hz, {} channels, {:?})",
        device.name().unwrap_or_default(),
        device_rate,
        channels,
        sample_format
    );

    let mut resampler = StreamResampler::new(device_rate, target_rate)
        .map_err(|e| MeetError::Permission(e.to_string()))?;
    let mut assembler = BlockAssembler::new(config.block_size, target_rate);
    let mut on_samples = move |interleaved: Vec<f32>| {
        let mono: Vec<f32> = interleaved
            .chunks_exact(channels.max(1))
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect();
        let resampled = match resampler.process(&mono) {
            Ok(resampled) => resampled,
            Err(e) => {
                warn!("Dropping microphone buffer: {}", e);
                return;
            }
        };

        for block in assembler.push(&resampled) {
            if block_tx.try_send(block).is_err() {
                debug!("Capture consumer lagging, block discarded");
            }
        }
    };

    let err_fn = |err: cpal::StreamError| error!("Microphone stream error: {}", err);

    let stream = match sample_format {
        SampleFormat::F32 => device.build_input_stream(
            &stream_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| on_samples(data.to_vec()),
            err_fn,
            None,
        ),
        SampleFormat::I16 => device.build_input_stream(
            &stream_config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                on_samples(data.iter().map(|&s| s as f32 / 32768.0).collect())
            },
            err_fn,
            None,
        ),
        SampleFormat::U16 => device.build_input_stream(
            &stream_config,
            move |data: &[u16], _: &cpal::InputCallbackInfo| {
                on_samples(data.iter().map(|&s| (s as f32 - 32768.0) / 32768.0).collect())
            },
            err_fn,
            None,
        ),
        other => {
            return Err(MeetError::Permission(format!(
                "Unsupported input sample format: {:?}",
                other
            )))
        }
    }
    .map_err(|e| MeetError::Permission(e.to_string()))?;

    stream
        .play()
        .map_err(|e| MeetError::Permission(e.to_string()))?;

    Ok(stream)
}

#[async_trait]
impl AudioBackend for MicrophoneBackend {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioBlock>> {
        if self.is_capturing() {
            return Err(MeetError::Audio("Already capturing".to_string()));
        }

        let (block_tx, block_rx) = mpsc::channel(64);
        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<()>>();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
        let config = self.config.clone();

        let thread = std::thread::spawn(move || {
            let stream = match build_input_stream(&config, block_tx) {
                Ok(stream) => stream,
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            let _ = ready_tx.send(Ok(()));

            // Blocks until stop is requested or the backend is dropped
            let _ = stop_rx.recv();
            drop(stream);
            info!("Microphone stream released");
        });

        let ready = tokio::task::spawn_blocking(move || ready_rx.recv())
            .await
            .map_err(|e| MeetError::Permission(e.to_string()))?
            .map_err(|_| MeetError::Permission("Capture thread exited".to_string()))?;

        if let Err(e) = ready {
            let _ = thread.join();
            return Err(e);
        }

        self.stop_tx = Some(stop_tx);
        self.thread = Some(thread);

        info!("Microphone capture started");

        Ok(block_rx)
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }

        if let Some(thread) = self.thread.take() {
            let joined = tokio::task::spawn_blocking(move || thread.join()).await;
            if !matches!(joined, Ok(Ok(()))) {
                warn!("Microphone thread did not shut down cleanly");
            }
            info!("Microphone capture stopped");
        }

        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    fn name(&self) -> &str {
        "microphone"
    }
}
