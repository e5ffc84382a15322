//! WebSocket connection to the live endpoint
//!
//! The socket is split in two. Outbound frames go through a bounded queue
//! drained by a writer task; inbound frames are read directly by whoever
//! owns the [`InboundStream`] (the session's dispatcher), so handlers run in
//! arrival order and never re-enter.
//!
//! Closing never waits on the peer. The writer is cancelled, queued frames
//! are discarded and the close handshake gets [`CLOSE_TIMEOUT`] before the
//! socket is dropped.

use futures::stream::SplitStream;
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use super::messages::{ClientMessage, ServerMessage};
use crate::error::{MeetError, Result};

/// Capacity of the outbound frame queue
const OUTBOUND_CAPACITY: usize = 256;

/// How long the close handshake may take before the socket is dropped
pub const CLOSE_TIMEOUT: Duration = Duration::from_millis(500);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Build `{live_url}/{session_id}`, rejecting non-WebSocket schemes
pub fn endpoint_url(live_url: &str, session_id: &str) -> Result<Url> {
    let url = Url::parse(&format!("{}/{}", live_url.trim_end_matches('/'), session_id))
        .map_err(|e| MeetError::Config(format!("invalid live endpoint {:?}: {}", live_url, e)))?;

    match url.scheme() {
        "ws" | "wss" => Ok(url),
        other => Err(MeetError::Config(format!(
            "live endpoint must use ws:// or wss://, got {}://",
            other
        ))),
    }
}

/// Cloneable sending half of the channel
#[derive(Clone)]
pub struct ChannelHandle {
    outbound: mpsc::Sender<ClientMessage>,
    open: Arc<AtomicBool>,
    shutdown: CancellationToken,
}

impl ChannelHandle {
    /// Whether frames are currently accepted
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Queue a frame for sending, waiting for queue space
    ///
    /// Fails instead of waiting once the channel is closed.
    pub async fn send(&self, message: ClientMessage) -> Result<()> {
        if !self.is_open() {
            return Err(MeetError::Transport("channel is not open".to_string()));
        }

        tokio::select! {
            _ = self.shutdown.cancelled() => {
                Err(MeetError::Transport("channel is not open".to_string()))
            }
            sent = self.outbound.send(message) => {
                sent.map_err(|_| MeetError::Transport("channel writer has stopped".to_string()))
            }
        }
    }

    /// Queue a frame without waiting; returns whether it was queued
    ///
    /// A full queue or a closed channel both drop the frame.
    pub fn send_if_open(&self, message: ClientMessage) -> bool {
        if !self.is_open() {
            return false;
        }

        match self.outbound.try_send(message) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(message)) => {
                debug!("Outbound queue full, dropping {} frame", message.kind());
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Stop accepting frames and tell the writer to close the socket
    pub fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
        self.shutdown.cancel();
    }
}

/// Something that happened on the receiving side
#[derive(Debug)]
pub enum InboundEvent {
    Message(ServerMessage),
    /// A frame that could not be understood; the stream continues
    Malformed(MeetError),
    /// The peer closed the connection
    Closed,
    /// The transport failed; the stream is over
    Failed(MeetError),
}

/// Receiving half of the channel
pub struct InboundStream {
    stream: SplitStream<WsStream>,
    writer_errors: mpsc::Receiver<MeetError>,
    open: Arc<AtomicBool>,
}

impl InboundStream {
    /// Wait for the next inbound event
    ///
    /// Returns `None` once the connection has ended and the terminal event
    /// was already delivered.
    pub async fn next_event(&mut self) -> Option<InboundEvent> {
        loop {
            let frame = tokio::select! {
                Some(err) = self.writer_errors.recv() => {
                    self.open.store(false, Ordering::SeqCst);
                    return Some(InboundEvent::Failed(err));
                }
                frame = self.stream.next() => frame,
            };

            match frame {
                Some(Ok(Message::Text(text))) => {
                    return Some(match ServerMessage::parse(&text) {
                        Ok(message) => InboundEvent::Message(message),
                        Err(e) => InboundEvent::Malformed(e),
                    });
                }
                Some(Ok(Message::Binary(bytes))) => {
                    return Some(match std::str::from_utf8(&bytes) {
                        Ok(text) => match ServerMessage::parse(text) {
                            Ok(message) => InboundEvent::Message(message),
                            Err(e) => InboundEvent::Malformed(e),
                        },
                        Err(e) => InboundEvent::Malformed(MeetError::Protocol(e.to_string())),
                    });
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!("Peer sent close frame: {:?}", frame);
                    self.open.store(false, Ordering::SeqCst);
                    return Some(InboundEvent::Closed);
                }
                Some(Ok(_)) => continue, // ping/pong handled by tungstenite
                Some(Err(e)) => {
                    self.open.store(false, Ordering::SeqCst);
                    return Some(InboundEvent::Failed(e.into()));
                }
                None => {
                    if self.open.swap(false, Ordering::SeqCst) {
                        return Some(InboundEvent::Closed);
                    }
                    return None;
                }
            }
        }
    }
}

/// An open connection to the live endpoint
pub struct SignalingChannel {
    pub handle: ChannelHandle,
    pub inbound: InboundStream,
    pub writer: JoinHandle<()>,
}

impl SignalingChannel {
    /// Open the connection for a session
    pub async fn connect(live_url: &str, session_id: &str) -> Result<Self> {
        let url = endpoint_url(live_url, session_id)?;
        info!("Connecting to live endpoint {}", url);

        let (socket, _response) = connect_async(url.as_str()).await?;
        let (sink, stream) = socket.split();

        info!("Live channel open");

        let open = Arc::new(AtomicBool::new(true));
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let (error_tx, error_rx) = mpsc::channel(1);

        let shutdown = CancellationToken::new();

        let writer = tokio::spawn(write_loop(
            sink,
            outbound_rx,
            error_tx,
            Arc::clone(&open),
            shutdown.clone(),
        ));

        Ok(Self {
            handle: ChannelHandle {
                outbound: outbound_tx,
                open: Arc::clone(&open),
                shutdown,
            },
            inbound: InboundStream {
                stream,
                writer_errors: error_rx,
                open,
            },
            writer,
        })
    }
}

async fn write_loop<S>(
    mut sink: S,
    mut outbound: mpsc::Receiver<ClientMessage>,
    errors: mpsc::Sender<MeetError>,
    open: Arc<AtomicBool>,
    shutdown: CancellationToken,
) where
    S: futures::Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
{
    loop {
        let message = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            message = outbound.recv() => match message {
                Some(message) => message,
                None => break,
            },
        };

        if !open.load(Ordering::SeqCst) {
            break;
        }

        let kind = message.kind();
        let json = match message.to_json() {
            Ok(json) => json,
            Err(e) => {
                warn!("Failed to encode {} frame: {}", kind, e);
                continue;
            }
        };

        let sent = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            sent = sink.send(Message::Text(json)) => sent,
        };

        if let Err(e) = sent {
            open.store(false, Ordering::SeqCst);
            let _ = errors.try_send(e.into());
            debug!("Channel writer stopped after send failure");
            return;
        }
        debug!("Sent {} frame", kind);
    }

    // Whatever is still queued is never sent
    outbound.close();
    let discarded = std::iter::from_fn(|| outbound.try_recv().ok()).count();
    if discarded > 0 {
        debug!("Discarded {} queued frames on close", discarded);
    }

    let handshake = async {
        sink.send(Message::Close(None)).await?;
        sink.close().await
    };
    match tokio::time::timeout(CLOSE_TIMEOUT, handshake).await {
        Ok(Ok(())) => debug!("Close handshake sent"),
        Ok(Err(e)) => debug!("Close handshake failed: {}", e),
        Err(_) => warn!("Peer did not take the close frame in time, dropping socket"),
    }

    debug!("Channel writer stopped");
}
