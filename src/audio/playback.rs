// Strict-FIFO playback of synthesized speech
//
// Chunks are appended by the inbound dispatcher and rendered one at a time
// by a single driver. The driver parks on a Notify when the queue runs dry
// and is woken by the next enqueue, so there is no polling.
//
// The remote-speaking flag is true exactly while a chunk is queued or being
// rendered.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::sink::AudioSink;

/// Sample rate of inbound synthesized speech
pub const PLAYBACK_SAMPLE_RATE: u32 = 24000;

/// One inbound chunk of synthesized speech
#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    /// Receipt order, assigned by the dispatcher
    pub sequence: u64,
}

impl AudioChunk {
    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate as f64)
    }
}

#[derive(Debug, Default)]
struct QueueState {
    chunks: VecDeque<AudioChunk>,
    rendering: bool,
}

/// Owned FIFO of pending chunks plus the remote-speaking indicator
#[derive(Clone)]
pub struct PlaybackQueue {
    state: Arc<Mutex<QueueState>>,
    wake: Arc<Notify>,
    speaking: Arc<watch::Sender<bool>>,
    played: Arc<AtomicU64>,
}

impl PlaybackQueue {
    pub fn new() -> Self {
        let (speaking, _) = watch::channel(false);
        Self {
            state: Arc::new(Mutex::new(QueueState::default())),
            wake: Arc::new(Notify::new()),
            speaking: Arc::new(speaking),
            played: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Append a chunk to the tail and wake the driver if it is idle
    pub async fn enqueue(&self, chunk: AudioChunk) {
        let mut state = self.state.lock().await;
        state.chunks.push_back(chunk);
        self.speaking.send_replace(true);

        if !state.rendering {
            self.wake.notify_one();
        }
    }

    /// Discard all pending chunks, returning how many were dropped
    ///
    /// The chunk currently rendering (if any) is not interrupted here;
    /// cancelling the driver does that.
    pub async fn drain(&self) -> usize {
        let mut state = self.state.lock().await;
        let dropped = state.chunks.len();
        state.chunks.clear();
        if !state.rendering {
            self.speaking.send_replace(false);
        }
        dropped
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.chunks.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Current remote-speaking state
    pub fn is_speaking(&self) -> bool {
        *self.speaking.borrow()
    }

    /// Subscribe to remote-speaking changes
    pub fn subscribe_speaking(&self) -> watch::Receiver<bool> {
        self.speaking.subscribe()
    }

    /// Number of chunks rendered so far
    pub fn played(&self) -> u64 {
        self.played.load(Ordering::SeqCst)
    }

    /// Take the head of the queue, or go idle if there is none
    async fn next_chunk(&self) -> Option<AudioChunk> {
        let mut state = self.state.lock().await;
        match state.chunks.pop_front() {
            Some(chunk) => {
                state.rendering = true;
                Some(chunk)
            }
            None => {
                state.rendering = false;
                self.speaking.send_replace(false);
                None
            }
        }
    }

    /// Playback driver loop
    ///
    /// Renders chunks strictly in queue order until cancelled. Only one
    /// driver may run per queue. The sink is closed when the loop exits.
    pub async fn run(&self, mut sink: Box<dyn AudioSink>, cancel: CancellationToken) {
        info!("Playback driver started ({} sink)", sink.name());

        loop {
            let chunk = tokio::select! {
                _ = cancel.cancelled() => break,
                chunk = self.next_chunk() => chunk,
            };

            match chunk {
                Some(chunk) => {
                    debug!(
                        "Rendering chunk {} ({:.0}ms)",
                        chunk.sequence,
                        chunk.duration().as_secs_f64() * 1000.0
                    );

                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        result = sink.render(&chunk) => {
                            if let Err(e) = result {
                                warn!("Failed to render chunk {}: {}", chunk.sequence, e);
                            }
                        }
                    }

                    self.played.fetch_add(1, Ordering::SeqCst);
                }
                None => {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = self.wake.notified() => {}
                    }
                }
            }
        }

        {
            let mut state = self.state.lock().await;
            state.rendering = false;
            state.chunks.clear();
        }
        self.speaking.send_replace(false);

        if let Err(e) = sink.close().await {
            warn!("Failed to close {} sink: {}", sink.name(), e);
        }

        info!("Playback driver stopped");
    }
}

impl Default for PlaybackQueue {
    fn default() -> Self {
        Self::new()
    }
}
