//! WebSocket adapters that connect a browser socket to an agent instance.
//!
//! `WebSocketInput` owns the read half of the socket. Its read loop turns
//! client frames into `BidiInputEvent`s and queues them; the queue outlives the
//! loop, so the loop can be stopped and restarted for a new agent instance
//! without losing frames. A `close` from the client is queued as an end marker,
//! so everything sent before it still reaches the agent. `WebSocketOutput` owns
//! the write half and serializes agent events into wire frames.

use super::protocol::{ClientMessage, ServerMessage};
use async_trait::async_trait;
use axum::extract::ws::Message;
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use std::{fmt::Display, sync::Arc};
use tokio::{
    sync::{Mutex, mpsc},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use voiceops_core::{
    agent::{BidiInput, BidiOutput},
    events::{BidiInputEvent, BidiOutputEvent},
};

/// What a decoded client frame means once the session is running.
#[derive(Debug, PartialEq)]
pub(crate) enum Inbound {
    Event(BidiInputEvent),
    Close,
    Ignore,
}

pub(crate) fn inbound(message: ClientMessage) -> Inbound {
    match message {
        ClientMessage::BidiAudioInput { data } => {
            if let Err(e) = BASE64.decode(data.as_bytes()) {
                warn!(error = %e, "Dropping audio frame with invalid base64 payload");
                return Inbound::Ignore;
            }
            Inbound::Event(BidiInputEvent::pcm_audio(data))
        }
        ClientMessage::BidiTextInput { text } => Inbound::Event(BidiInputEvent::text(text)),
        ClientMessage::Close => Inbound::Close,
        ClientMessage::Config { .. } => {
            debug!("Ignoring config frame outside negotiation");
            Inbound::Ignore
        }
        ClientMessage::Unknown => {
            debug!("Ignoring frame of unknown type");
            Inbound::Ignore
        }
    }
}

/// An entry in the input queue.
#[derive(Debug)]
enum Queued {
    Event(BidiInputEvent),
    /// Nothing follows; the client is gone.
    End,
}

struct Reader<S> {
    cancel: CancellationToken,
    handle: JoinHandle<(S, bool)>,
}

/// Reads client frames into a FIFO queue consumed by the agent.
pub struct WebSocketInput<S> {
    stream: Option<S>,
    queue_tx: mpsc::UnboundedSender<Queued>,
    queue_rx: mpsc::UnboundedReceiver<Queued>,
    reader: Option<Reader<S>>,
    /// Set once the client has closed or dropped the socket.
    finished: bool,
    /// Set once `next` has handed out the end marker.
    ended: bool,
}

impl<S> WebSocketInput<S>
where
    S: Stream<Item = Result<Message, axum::Error>> + Unpin + Send + 'static,
{
    pub fn new(stream: S) -> Self {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        Self {
            stream: Some(stream),
            queue_tx,
            queue_rx,
            reader: None,
            finished: false,
            ended: false,
        }
    }

    /// Queues an event ahead of anything the read loop produces.
    pub fn push(&self, event: BidiInputEvent) {
        // The receiver lives in `self`, so the queue cannot be closed here.
        let _ = self.queue_tx.send(Queued::Event(event));
    }

    pub fn is_running(&self) -> bool {
        self.reader.is_some()
    }
}

#[async_trait]
impl<S> BidiInput for WebSocketInput<S>
where
    S: Stream<Item = Result<Message, axum::Error>> + Unpin + Send + 'static,
{
    async fn start(&mut self, agent_stop: CancellationToken) {
        if self.is_running() {
            debug!("Input read loop already running");
            return;
        }
        if self.ended {
            debug!("Input already drained; stopping agent");
            agent_stop.cancel();
            return;
        }
        if self.finished {
            // The end marker is still queued behind any unread frames.
            debug!("Client already left; serving queued frames only");
            return;
        }
        let Some(stream) = self.stream.take() else {
            warn!("Socket read half is gone; stopping agent");
            agent_stop.cancel();
            return;
        };

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(read_loop(
            stream,
            self.queue_tx.clone(),
            agent_stop,
            cancel.clone(),
        ));
        self.reader = Some(Reader { cancel, handle });
    }

    async fn next(&mut self) -> Option<BidiInputEvent> {
        if self.ended {
            return None;
        }
        match self.queue_rx.recv().await {
            Some(Queued::Event(event)) => Some(event),
            Some(Queued::End) | None => {
                self.ended = true;
                None
            }
        }
    }

    async fn stop(&mut self) {
        let Some(reader) = self.reader.take() else {
            return;
        };
        reader.cancel.cancel();
        match reader.handle.await {
            Ok((stream, finished)) => {
                self.stream = Some(stream);
                self.finished |= finished;
            }
            Err(e) => {
                warn!(error = %e, "Input read loop ended abnormally");
                self.finished = true;
                let _ = self.queue_tx.send(Queued::End);
            }
        }
    }
}

/// Pumps frames until cancelled or the client goes away, then hands the
/// read half back so a later `start` can resume from it. The flag reports
/// whether the client is gone.
///
/// A `close` request only queues the end marker, so the agent finishes what
/// was sent before it. A dropped or failed socket also stops the agent.
async fn read_loop<S>(
    mut stream: S,
    queue: mpsc::UnboundedSender<Queued>,
    agent_stop: CancellationToken,
    cancel: CancellationToken,
) -> (S, bool)
where
    S: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    let departure = loop {
        let frame = tokio::select! {
            biased;
            _ = cancel.cancelled() => break None,
            frame = stream.next() => frame,
        };

        match frame {
            Some(Ok(Message::Text(text))) => {
                let message = match serde_json::from_str::<ClientMessage>(text.as_str()) {
                    Ok(message) => message,
                    Err(e) => {
                        warn!(error = %e, "Dropping malformed client frame");
                        continue;
                    }
                };
                match inbound(message) {
                    Inbound::Event(event) => {
                        if queue.send(Queued::Event(event)).is_err() {
                            break None;
                        }
                    }
                    Inbound::Close => {
                        info!("Client requested close");
                        break Some(Departure::Graceful);
                    }
                    Inbound::Ignore => {}
                }
            }
            Some(Ok(Message::Close(_))) => {
                info!("Client sent close frame");
                break Some(Departure::Graceful);
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                warn!(error = %e, "Error receiving from client WebSocket");
                break Some(Departure::Abrupt);
            }
            None => {
                info!("Client disconnected");
                break Some(Departure::Abrupt);
            }
        }
    };

    let Some(departure) = departure else {
        return (stream, false);
    };
    let _ = queue.send(Queued::End);
    if departure == Departure::Abrupt {
        agent_stop.cancel();
    }
    (stream, true)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Departure {
    Graceful,
    Abrupt,
}

#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    #[error("Failed to serialize frame: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("Failed to send frame: {0}")]
    Send(String),
}

/// Writes agent events to the client. Cloning shares the underlying sink.
pub struct WebSocketOutput<Si> {
    sink: Arc<Mutex<Si>>,
}

impl<Si> Clone for WebSocketOutput<Si> {
    fn clone(&self) -> Self {
        Self {
            sink: self.sink.clone(),
        }
    }
}

impl<Si> WebSocketOutput<Si>
where
    Si: Sink<Message> + Unpin + Send + 'static,
    Si::Error: Display,
{
    pub fn new(sink: Si) -> Self {
        Self {
            sink: Arc::new(Mutex::new(sink)),
        }
    }

    /// Serializes and sends a single frame.
    pub async fn send_message(&self, message: &ServerMessage) -> Result<(), OutputError> {
        let serialized = serde_json::to_string(message)?;
        self.sink
            .lock()
            .await
            .send(Message::Text(serialized.into()))
            .await
            .map_err(|e| OutputError::Send(e.to_string()))
    }

    /// Closes the socket. Used by the connection owner once the session is over.
    pub async fn close(&self) {
        let mut sink = self.sink.lock().await;
        if let Err(e) = sink.send(Message::Close(None)).await {
            debug!(error = %e, "Close frame not delivered");
        }
        if let Err(e) = sink.close().await {
            debug!(error = %e, "Socket already closed");
        }
    }
}

#[async_trait]
impl<Si> BidiOutput for WebSocketOutput<Si>
where
    Si: Sink<Message> + Unpin + Send + 'static,
    Si::Error: Display,
{
    async fn start(&mut self) {}

    async fn send(&mut self, event: BidiOutputEvent) {
        if event.is_internal() {
            debug!(?event, "Dropping internal agent event");
            return;
        }
        let Some(message) = ServerMessage::from_event(event) else {
            return;
        };
        if let Err(e) = self.send_message(&message).await {
            warn!(error = %e, "Failed to deliver frame to client");
        }
    }

    async fn stop(&mut self) {}
}
