//! In-process fakes for exercising the session bridge without a browser or a model.

use crate::state::AppState;
use async_trait::async_trait;
use axum::extract::ws::Message;
use futures::{StreamExt, channel::mpsc};
use serde_json::Value;
use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};
use tokio_util::sync::CancellationToken;
use voiceops_core::{
    agent::{AgentError, AgentFactory, AgentSpec, BidiAgent, BidiInput, BidiOutput, ModelConfig},
    events::{BidiInputEvent, BidiOutputEvent, TranscriptRole},
    history::{HistoryStore, MemoryHistoryStore, SessionHistory, Turn},
};

use super::lifecycle::LifecycleSettings;

pub(crate) type ClientTx = mpsc::UnboundedSender<Result<Message, axum::Error>>;
pub(crate) type ServerStream = mpsc::UnboundedReceiver<Result<Message, axum::Error>>;
pub(crate) type ServerSink = mpsc::UnboundedSender<Message>;
pub(crate) type ClientRx = mpsc::UnboundedReceiver<Message>;

/// Two in-memory channels standing in for the halves of a WebSocket.
pub(crate) fn socket_pair() -> (ClientTx, ServerStream, ServerSink, ClientRx) {
    let (client_tx, server_stream) = mpsc::unbounded();
    let (server_sink, client_rx) = mpsc::unbounded();
    (client_tx, server_stream, server_sink, client_rx)
}

pub(crate) fn text_frame(value: Value) -> Result<Message, axum::Error> {
    Ok(Message::Text(value.to_string().into()))
}

pub(crate) fn closed_socket_error() -> axum::Error {
    axum::Error::new(std::io::Error::new(
        std::io::ErrorKind::ConnectionReset,
        "connection reset by peer",
    ))
}

/// Waits for the next JSON frame, skipping control frames.
pub(crate) async fn next_json(rx: &mut ClientRx) -> Option<Value> {
    while let Some(message) = rx.next().await {
        if let Message::Text(text) = message {
            return serde_json::from_str(text.as_str()).ok();
        }
    }
    None
}

/// Collects every JSON frame until all senders are gone.
pub(crate) async fn drain_json(mut rx: ClientRx) -> Vec<Value> {
    let mut frames = Vec::new();
    while let Some(frame) = next_json(&mut rx).await {
        frames.push(frame);
    }
    frames
}

pub(crate) fn frame_types(frames: &[Value]) -> Vec<String> {
    frames
        .iter()
        .filter_map(|f| f["type"].as_str().map(str::to_string))
        .collect()
}

/// How a failing scripted agent fails.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Failure {
    /// Reported the way the speech model words it, with no structured code.
    StreamLimit,
    Fatal,
}

/// Factory whose first `failures` instances fail and whose later instances echo text.
pub(crate) struct ScriptedFactory {
    failures: usize,
    failure: Failure,
    refuse: bool,
    specs: Mutex<Vec<AgentSpec>>,
    histories: Arc<Mutex<Vec<Vec<Turn>>>>,
}

impl ScriptedFactory {
    fn with(failures: usize, failure: Failure, refuse: bool) -> Self {
        Self {
            failures,
            failure,
            refuse,
            specs: Mutex::new(Vec::new()),
            histories: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub(crate) fn echo() -> Self {
        Self::with(0, Failure::Fatal, false)
    }

    pub(crate) fn failing(failures: usize, failure: Failure) -> Self {
        Self::with(failures, failure, false)
    }

    pub(crate) fn always_failing(failure: Failure) -> Self {
        Self::with(usize::MAX, failure, false)
    }

    pub(crate) fn refusing() -> Self {
        Self::with(0, Failure::Fatal, true)
    }

    pub(crate) fn created(&self) -> usize {
        self.specs.lock().unwrap().len()
    }

    pub(crate) fn specs(&self) -> Vec<AgentSpec> {
        self.specs.lock().unwrap().clone()
    }

    /// History each instance held when its run began.
    pub(crate) fn histories(&self) -> Vec<Vec<Turn>> {
        self.histories.lock().unwrap().clone()
    }
}

#[async_trait]
impl AgentFactory for ScriptedFactory {
    async fn create(
        &self,
        spec: &AgentSpec,
        session: SessionHistory,
    ) -> Result<Box<dyn BidiAgent>, AgentError> {
        if self.refuse {
            return Err(AgentError::model("model endpoint unreachable"));
        }
        let history = session
            .load()
            .await
            .map_err(|e| AgentError::Other(e.into()))?;
        let index = {
            let mut specs = self.specs.lock().unwrap();
            specs.push(spec.clone());
            specs.len() - 1
        };
        let fail = (index < self.failures).then_some(self.failure);

        Ok(Box::new(ScriptedAgent {
            fail,
            model: spec.model.model_id.clone(),
            history,
            histories: self.histories.clone(),
            stop: CancellationToken::new(),
        }))
    }
}

pub(crate) struct ScriptedAgent {
    fail: Option<Failure>,
    model: String,
    history: Vec<Turn>,
    histories: Arc<Mutex<Vec<Vec<Turn>>>>,
    stop: CancellationToken,
}

#[async_trait]
impl BidiAgent for ScriptedAgent {
    async fn run(
        &mut self,
        input: &mut dyn BidiInput,
        output: &mut dyn BidiOutput,
    ) -> Result<(), AgentError> {
        self.histories.lock().unwrap().push(self.history.clone());
        match self.fail {
            Some(Failure::StreamLimit) => {
                return Err(AgentError::model(
                    "ValidationException: Stream length exceeded, please reconnect",
                ));
            }
            Some(Failure::Fatal) => return Err(AgentError::model("model crashed")),
            None => {}
        }

        output
            .send(BidiOutputEvent::ConnectionStart {
                connection_id: "conn-1".into(),
                model: self.model.clone(),
            })
            .await;
        loop {
            let event = tokio::select! {
                biased;
                _ = self.stop.cancelled() => break,
                event = input.next() => event,
            };
            match event {
                Some(BidiInputEvent::TextInput { text }) => {
                    output
                        .send(BidiOutputEvent::ResponseStart {
                            response_id: "r1".into(),
                        })
                        .await;
                    output
                        .send(BidiOutputEvent::TranscriptStream {
                            role: TranscriptRole::Assistant,
                            text: format!("echo: {text}"),
                            is_final: true,
                        })
                        .await;
                    output
                        .send(BidiOutputEvent::ResponseComplete {
                            response_id: "r1".into(),
                            stop_reason: "end_turn".into(),
                        })
                        .await;
                }
                Some(BidiInputEvent::AudioInput { .. }) => {}
                None => break,
            }
        }
        Ok(())
    }

    fn stop_handle(&self) -> CancellationToken {
        self.stop.clone()
    }

    fn history_mut(&mut self) -> &mut Vec<Turn> {
        &mut self.history
    }
}

/// Input with no socket behind it. Counts lifecycle calls.
#[derive(Default)]
pub(crate) struct FakeInput {
    pub(crate) events: VecDeque<BidiInputEvent>,
    pub(crate) starts: usize,
    pub(crate) stops: usize,
}

#[async_trait]
impl BidiInput for FakeInput {
    async fn start(&mut self, _agent_stop: CancellationToken) {
        self.starts += 1;
    }

    async fn next(&mut self) -> Option<BidiInputEvent> {
        self.events.pop_front()
    }

    async fn stop(&mut self) {
        self.stops += 1;
    }
}

#[derive(Default)]
pub(crate) struct RecordingOutput {
    pub(crate) events: Vec<BidiOutputEvent>,
    pub(crate) stops: usize,
}

#[async_trait]
impl BidiOutput for RecordingOutput {
    async fn start(&mut self) {}

    async fn send(&mut self, event: BidiOutputEvent) {
        self.events.push(event);
    }

    async fn stop(&mut self) {
        self.stops += 1;
    }
}

pub(crate) fn app_state(factory: Arc<ScriptedFactory>) -> Arc<AppState> {
    app_state_with_store(factory, Arc::new(MemoryHistoryStore::new()))
}

pub(crate) fn app_state_with_store(
    factory: Arc<ScriptedFactory>,
    history: Arc<dyn HistoryStore>,
) -> Arc<AppState> {
    Arc::new(AppState {
        agents: factory,
        history,
        system_prompt: Arc::new("You help with AWS.".to_string()),
        defaults: ModelConfig::new("test-model", "us-east-1"),
        lifecycle: LifecycleSettings::default(),
    })
}
