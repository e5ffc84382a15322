use super::config::SessionConfig;
use super::state::ConnectionState;
use super::stats::{Indicators, SessionStats, Speaker, Transcript, TranscriptMessage};
use crate::audio::pcm::{decode_payload, encode_block};
use crate::audio::{AudioBackend, AudioBlock, AudioChunk, AudioSink, LevelMeter, PlaybackQueue};
use crate::error::{MeetError, Result};
use crate::recommendations::{RecommendationPoller, RecommendationSnapshot, RecommendationSource};
use crate::signaling::{
    ChannelHandle, ClientMessage, InboundEvent, InboundStream, ServerMessage, SignalingChannel,
};
use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Builds a fresh output sink for each stream
pub type SinkFactory = Box<dyn Fn() -> Result<Box<dyn AudioSink>> + Send + Sync>;

const TRANSCRIPT_CHANNEL_CAPACITY: usize = 64;

#[derive(Default)]
struct Counters {
    blocks_sent: AtomicU64,
    blocks_dropped: AtomicU64,
    chunks_received: AtomicU64,
    turns_completed: AtomicU64,
}

/// Resources held while a stream is live
struct ActiveStream {
    cancel: CancellationToken,
    channel: ChannelHandle,
    writer: JoinHandle<()>,
    tasks: Vec<JoinHandle<()>>,
}

struct Inner {
    session_id: String,
    config: SessionConfig,
    backend: Mutex<Box<dyn AudioBackend>>,
    sink_factory: SinkFactory,
    playback: PlaybackQueue,
    poller: Option<RecommendationPoller>,
    state: watch::Sender<ConnectionState>,
    last_error: watch::Sender<Option<MeetError>>,
    user_speaking: watch::Sender<bool>,
    indicators: watch::Sender<Indicators>,
    transcript: Mutex<Transcript>,
    transcript_tx: broadcast::Sender<TranscriptMessage>,
    counters: Counters,
    active: Mutex<Option<ActiveStream>>,
    root: CancellationToken,
    started_at: chrono::DateTime<Utc>,
}

/// A voice-chat session with the HomeConnect assistant
///
/// Owns the session identifier, the capture backend, the playback queue,
/// the optional recommendation poller and at most one live channel.
/// Every way a stream can end (explicit stop, transport error, remote
/// close, drop) goes through the same teardown.
pub struct MeetSession {
    inner: Arc<Inner>,
}

impl MeetSession {
    /// Create a new session
    ///
    /// `recommendations` enables polling when the config also enables it.
    pub fn new(
        config: SessionConfig,
        backend: Box<dyn AudioBackend>,
        sink_factory: SinkFactory,
        recommendations: Option<Arc<dyn RecommendationSource>>,
    ) -> Self {
        let session_id = uuid::Uuid::new_v4().to_string();
        info!("Creating Meet session: {}", session_id);

        let poller = match (recommendations, config.recommendations) {
            (Some(source), Some(poller_config)) => Some(RecommendationPoller::new(
                source,
                session_id.clone(),
                poller_config,
            )),
            _ => None,
        };

        let (transcript_tx, _) = broadcast::channel(TRANSCRIPT_CHANNEL_CAPACITY);

        Self {
            inner: Arc::new(Inner {
                session_id,
                config,
                backend: Mutex::new(backend),
                sink_factory,
                playback: PlaybackQueue::new(),
                poller,
                state: watch::channel(ConnectionState::Disconnected).0,
                last_error: watch::channel(None).0,
                user_speaking: watch::channel(false).0,
                indicators: watch::channel(Indicators::default()).0,
                transcript: Mutex::new(Transcript::new()),
                transcript_tx,
                counters: Counters::default(),
                active: Mutex::new(None),
                root: CancellationToken::new(),
                started_at: Utc::now(),
            }),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// The error that ended the last stream, if any
    pub fn last_error(&self) -> Option<MeetError> {
        self.inner.last_error.borrow().clone()
    }

    pub fn subscribe_indicators(&self) -> watch::Receiver<Indicators> {
        self.inner.indicators.subscribe()
    }

    pub fn is_user_speaking(&self) -> bool {
        *self.inner.user_speaking.borrow()
    }

    pub fn is_remote_speaking(&self) -> bool {
        self.inner.playback.is_speaking()
    }

    /// New transcript lines as they arrive
    pub fn subscribe_transcript(&self) -> broadcast::Receiver<TranscriptMessage> {
        self.inner.transcript_tx.subscribe()
    }

    pub async fn transcript(&self) -> Vec<TranscriptMessage> {
        self.inner.transcript.lock().await.messages().to_vec()
    }

    pub fn recommendations(&self) -> Option<&RecommendationPoller> {
        self.inner.poller.as_ref()
    }

    pub fn recommendation_snapshot(&self) -> Option<RecommendationSnapshot> {
        self.inner.poller.as_ref().and_then(|p| p.snapshot())
    }

    /// Connect, announce the stream config, start capture and the
    /// background tasks
    pub async fn start(&self) -> Result<()> {
        let inner = &self.inner;
        let mut active = inner.active.lock().await;
        if active.is_some() {
            return Err(MeetError::AlreadyStreaming);
        }

        info!("Starting stream for session {}", inner.session_id);
        inner.last_error.send_replace(None);
        inner.set_state(ConnectionState::Connecting);

        let channel = match SignalingChannel::connect(&inner.config.live_url, &inner.session_id).await
        {
            Ok(channel) => channel,
            Err(e) => {
                inner.record_failure(&e);
                return Err(e);
            }
        };
        let SignalingChannel {
            handle,
            inbound,
            writer,
        } = channel;

        // The config frame must precede any audio on the wire
        let announce = handle
            .send(ClientMessage::Config {
                config: inner.config.stream.clone(),
            })
            .await;
        if let Err(e) = announce {
            handle.close();
            let _ = writer.await;
            inner.record_failure(&e);
            return Err(e);
        }

        let started = {
            let mut backend = inner.backend.lock().await;
            let started = backend.start().await;
            if started.is_ok() {
                info!("Capture started ({})", backend.name());
            }
            started
        };
        let blocks = match started {
            Ok(blocks) => blocks,
            Err(e) => {
                error!("Failed to start capture: {}", e);
                handle.close();
                let _ = writer.await;
                inner.record_failure(&e);
                return Err(e);
            }
        };

        let sink = match (inner.sink_factory)() {
            Ok(sink) => sink,
            Err(e) => {
                error!("Failed to open audio output: {}", e);
                if let Err(stop_err) = inner.backend.lock().await.stop().await {
                    warn!("Failed to stop capture: {}", stop_err);
                }
                handle.close();
                let _ = writer.await;
                inner.record_failure(&e);
                return Err(e);
            }
        };

        let cancel = inner.root.child_token();
        inner.set_state(ConnectionState::Streaming);

        let mut tasks = vec![
            tokio::spawn(capture_pump(
                Arc::clone(inner),
                blocks,
                handle.clone(),
                cancel.child_token(),
            )),
            tokio::spawn(dispatch_inbound(
                Arc::clone(inner),
                inbound,
                cancel.child_token(),
            )),
            {
                let playback = inner.playback.clone();
                let token = cancel.child_token();
                tokio::spawn(async move { playback.run(sink, token).await })
            },
            tokio::spawn(indicator_loop(Arc::clone(inner), cancel.child_token())),
        ];

        if let Some(poller) = inner.poller.clone() {
            let token = cancel.child_token();
            tasks.push(tokio::spawn(async move { poller.run(token).await }));
        }

        *active = Some(ActiveStream {
            cancel,
            channel: handle,
            writer,
            tasks,
        });

        info!("Session {} streaming", inner.session_id);

        Ok(())
    }

    /// Send typed text to the assistant
    pub async fn send_text(&self, text: impl Into<String>) -> Result<()> {
        let handle = {
            let active = self.inner.active.lock().await;
            match active.as_ref() {
                Some(stream) => stream.channel.clone(),
                None => return Err(MeetError::Transport("not connected".to_string())),
            }
        };

        handle.send(ClientMessage::Text { data: text.into() }).await
    }

    /// Stop the stream and release every resource
    pub async fn stop(&self) -> Result<SessionStats> {
        info!("Stopping session {}", self.inner.session_id);
        Arc::clone(&self.inner)
            .teardown(ConnectionState::Disconnected)
            .await;
        Ok(self.get_stats().await)
    }

    /// Resolve once the current stream has ended on its own or been stopped
    pub async fn wait_until_ended(&self) -> ConnectionState {
        let mut state = self.inner.state.subscribe();
        let ended = state
            .wait_for(|s| matches!(s, ConnectionState::Disconnected | ConnectionState::Error))
            .await
            .map(|s| *s)
            .unwrap_or(ConnectionState::Disconnected);

        // Teardown holds the lock until the state is final
        drop(self.inner.active.lock().await);
        ended
    }

    /// Whether capture is currently running
    pub async fn is_capturing(&self) -> bool {
        self.inner.backend.lock().await.is_capturing()
    }

    pub async fn get_stats(&self) -> SessionStats {
        let inner = &self.inner;
        let duration = Utc::now().signed_duration_since(inner.started_at);

        SessionStats {
            state: *inner.state.borrow(),
            started_at: inner.started_at,
            duration_secs: duration.num_milliseconds() as f64 / 1000.0,
            blocks_sent: inner.counters.blocks_sent.load(Ordering::SeqCst),
            blocks_dropped: inner.counters.blocks_dropped.load(Ordering::SeqCst),
            chunks_received: inner.counters.chunks_received.load(Ordering::SeqCst),
            chunks_played: inner.playback.played(),
            turns_completed: inner.counters.turns_completed.load(Ordering::SeqCst),
            transcript_messages: inner.transcript.lock().await.len(),
            recommendations: self
                .recommendation_snapshot()
                .map(|s| s.properties.len())
                .unwrap_or(0),
        }
    }
}

impl Drop for MeetSession {
    fn drop(&mut self) {
        self.inner.root.cancel();

        // Capture still needs an explicit stop
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            let inner = Arc::clone(&self.inner);
            runtime.spawn(async move { inner.teardown(ConnectionState::Disconnected).await });
        }
    }
}

impl Inner {
    fn set_state(&self, next: ConnectionState) {
        let current = *self.state.borrow();
        if current == next {
            return;
        }
        if !current.can_transition_to(next) {
            warn!("Ignoring invalid state transition {:?} -> {:?}", current, next);
            return;
        }
        debug!("Connection state {:?} -> {:?}", current, next);
        self.state.send_replace(next);
    }

    fn record_failure(&self, err: &MeetError) {
        error!("Stream failed: {}", err);
        self.last_error.send_replace(Some(err.clone()));
        self.set_state(ConnectionState::Error);
    }

    /// Release everything a stream holds
    ///
    /// Order: cancel the tasks, stop capture, drain playback, clear the
    /// user indicator, close the channel, join. Idempotent.
    async fn teardown(self: Arc<Self>, final_state: ConnectionState) {
        let mut active = self.active.lock().await;
        let Some(stream) = active.take() else {
            return;
        };

        stream.cancel.cancel();

        {
            let mut backend = self.backend.lock().await;
            if let Err(e) = backend.stop().await {
                warn!("Failed to stop capture: {}", e);
            }
        }

        let dropped = self.playback.drain().await;
        if dropped > 0 {
            debug!("Discarded {} pending playback chunks", dropped);
        }

        self.user_speaking.send_replace(false);
        stream.channel.close();

        for task in stream.tasks {
            if let Err(e) = task.await {
                error!("Session task panicked: {}", e);
            }
        }
        if let Err(e) = stream.writer.await {
            error!("Channel writer panicked: {}", e);
        }

        self.indicators.send_replace(Indicators::default());
        self.set_state(final_state);

        info!("Session {} torn down", self.session_id);
    }

    /// Tear down from inside a session task without waiting on itself
    fn end_stream(self: &Arc<Self>, final_state: ConnectionState) {
        let inner = Arc::clone(self);
        tokio::spawn(async move { inner.teardown(final_state).await });
    }
}

/// Feed capture blocks through the level meter and out to the channel
async fn capture_pump(
    inner: Arc<Inner>,
    mut blocks: mpsc::Receiver<AudioBlock>,
    channel: ChannelHandle,
    cancel: CancellationToken,
) {
    let mut meter = LevelMeter::new(
        crate::audio::level::DEFAULT_FFT_SIZE,
        inner.config.speaking_threshold,
    );

    loop {
        let block = tokio::select! {
            _ = cancel.cancelled() => break,
            block = blocks.recv() => match block {
                Some(block) => block,
                None => {
                    info!("Capture stream ended");
                    break;
                }
            },
        };

        let level = meter.process(&block.samples);
        let speaking = meter.is_speaking(level);
        inner.user_speaking.send_if_modified(|current| {
            let changed = *current != speaking;
            *current = speaking;
            changed
        });

        let frame = ClientMessage::Audio {
            data: encode_block(&block.samples),
        };
        if channel.send_if_open(frame) {
            inner.counters.blocks_sent.fetch_add(1, Ordering::SeqCst);
        } else {
            inner.counters.blocks_dropped.fetch_add(1, Ordering::SeqCst);
        }
    }

    inner.user_speaking.send_replace(false);
}

/// Handle inbound frames one at a time, in arrival order
async fn dispatch_inbound(inner: Arc<Inner>, mut inbound: InboundStream, cancel: CancellationToken) {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => return,
            event = inbound.next_event() => event,
        };

        match event {
            Some(InboundEvent::Message(ServerMessage::Audio { data })) => {
                match decode_payload(&data) {
                    Ok(samples) => {
                        let sequence = inner.counters.chunks_received.fetch_add(1, Ordering::SeqCst);
                        inner
                            .playback
                            .enqueue(AudioChunk {
                                samples,
                                sample_rate: inner.config.playback_sample_rate,
                                sequence,
                            })
                            .await;
                    }
                    Err(e) => warn!("Dropping undecodable audio frame: {}", e),
                }
            }
            Some(InboundEvent::Message(ServerMessage::Text { data })) => {
                let sender = if inner.playback.is_speaking() {
                    Speaker::Remote
                } else {
                    Speaker::Local
                };
                let message = TranscriptMessage {
                    content: data.into_text(),
                    sender,
                    timestamp: Utc::now(),
                };
                debug!("Transcript: {}", message);
                inner.transcript.lock().await.push(message.clone());
                let _ = inner.transcript_tx.send(message);
            }
            Some(InboundEvent::Message(ServerMessage::TurnComplete { .. })) => {
                let turns = inner.counters.turns_completed.fetch_add(1, Ordering::SeqCst) + 1;
                debug!("Remote turn {} complete", turns);
            }
            Some(InboundEvent::Malformed(e)) => {
                warn!("Skipping inbound frame: {}", e);
            }
            Some(InboundEvent::Closed) | None => {
                if !cancel.is_cancelled() {
                    info!("Live channel closed by peer");
                    inner.end_stream(ConnectionState::Disconnected);
                }
                return;
            }
            Some(InboundEvent::Failed(e)) => {
                if !cancel.is_cancelled() {
                    let err = match e {
                        MeetError::Transport(_) => e,
                        other => MeetError::Transport(other.to_string()),
                    };
                    error!("Live channel failed: {}", err);
                    inner.last_error.send_replace(Some(err));
                    inner.end_stream(ConnectionState::Error);
                }
                return;
            }
        }
    }
}

/// Republish both speaking flags as one indicator value on every change
async fn indicator_loop(inner: Arc<Inner>, cancel: CancellationToken) {
    let mut user = inner.user_speaking.subscribe();
    let mut remote = inner.playback.subscribe_speaking();

    loop {
        let current = Indicators {
            user_speaking: *user.borrow_and_update(),
            remote_speaking: *remote.borrow_and_update(),
        };
        inner.indicators.send_if_modified(|value| {
            let changed = *value != current;
            *value = current;
            changed
        });

        tokio::select! {
            _ = cancel.cancelled() => break,
            changed = user.changed() => if changed.is_err() { break },
            changed = remote.changed() => if changed.is_err() { break },
        }
    }

    inner.indicators.send_replace(Indicators::default());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::NullSink;
    use async_trait::async_trait;

    struct IdleBackend;

    #[async_trait]
    impl AudioBackend for IdleBackend {
        async fn start(&mut self) -> Result<mpsc::Receiver<AudioBlock>> {
            Ok(mpsc::channel(1).1)
        }

        async fn stop(&mut self) -> Result<()> {
            Ok(())
        }

        fn is_capturing(&self) -> bool {
            false
        }

        fn name(&self) -> &str {
            "idle"
        }
    }

    fn session(config: SessionConfig) -> MeetSession {
        MeetSession::new(
            config,
            Box::new(IdleBackend),
            Box::new(|| -> Result<Box<dyn AudioSink>> { Ok(Box::new(NullSink::instant())) }),
            None,
        )
    }

    #[test]
    fn test_session_ids_are_unique() {
        let a = session(SessionConfig::default());
        let b = session(SessionConfig::default());

        assert_ne!(a.session_id(), b.session_id());
        assert!(uuid::Uuid::parse_str(a.session_id()).is_ok());
    }

    #[test]
    fn test_no_poller_without_source() {
        let session = session(SessionConfig::default());
        assert!(session.recommendations().is_none());
        assert!(session.recommendation_snapshot().is_none());
    }

    #[tokio::test]
    async fn test_stop_before_start_is_noop() {
        let session = session(SessionConfig::default());

        let stats = session.stop().await.unwrap();
        assert_eq!(stats.state, ConnectionState::Disconnected);
        assert_eq!(stats.blocks_sent, 0);
        assert_eq!(session.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_invalid_transition_is_ignored() {
        let session = session(SessionConfig::default());

        session.inner.set_state(ConnectionState::Streaming);
        assert_eq!(session.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_bad_live_url_fails_start() {
        let session = session(SessionConfig {
            live_url: "http://localhost:8000/ws".to_string(),
            ..Default::default()
        });

        let err = session.start().await.unwrap_err();
        assert!(matches!(err, MeetError::Config(_)));
        assert_eq!(session.state(), ConnectionState::Error);
    }
}
