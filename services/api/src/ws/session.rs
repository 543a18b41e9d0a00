//! Manages the primary WebSocket connection lifecycle for an agent session.

use super::{
    channels::{Inbound, WebSocketInput, WebSocketOutput, inbound},
    lifecycle::{SessionOutcome, run_session},
    protocol::ClientMessage,
};
use crate::state::AppState;
use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures_util::{Sink, Stream, StreamExt};
use std::{fmt::Display, sync::Arc, time::Duration};
use tracing::{info, instrument, warn};
use uuid::Uuid;
use voiceops_core::{
    agent::{AgentSpec, is_supported_voice},
    events::BidiInputEvent,
    history::{SessionHistory, validate_session_id},
};

/// Axum handler to upgrade an HTTP connection to a WebSocket.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Main handler for an individual WebSocket connection.
#[instrument(name = "ws_session", skip_all, fields(session_id))]
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (sink, stream) = socket.split();
    serve_connection(stream, sink, state).await;
}

/// The session parameters settled at the start of a connection.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Negotiated {
    pub session_id: String,
    pub voice_id: String,
    /// First input frame, when the client skipped configuration.
    pub leading: Option<BidiInputEvent>,
}

/// Negotiates the session, then runs agent instances until the connection ends.
///
/// Returns `None` when the client left before a session could start.
pub(crate) async fn serve_connection<S, Si>(
    mut stream: S,
    sink: Si,
    state: Arc<AppState>,
) -> Option<SessionOutcome>
where
    S: Stream<Item = Result<Message, axum::Error>> + Unpin + Send + 'static,
    Si: Sink<Message> + Unpin + Send + 'static,
    Si::Error: Display,
{
    info!("New WebSocket connection. Awaiting configuration...");
    let Some(negotiated) = negotiate(
        &mut stream,
        state.lifecycle.negotiation_timeout,
        &state.defaults.voice_id,
    )
    .await
    else {
        info!("Client left before the session started");
        return None;
    };

    tracing::Span::current().record("session_id", negotiated.session_id.as_str());
    info!(voice_id = %negotiated.voice_id, "Session configured");

    let spec = AgentSpec {
        session_id: negotiated.session_id.clone(),
        model: state.defaults.clone().with_voice(negotiated.voice_id),
        system_prompt: state.system_prompt.clone(),
    };
    let session = SessionHistory::new(negotiated.session_id, state.history.clone());

    let mut input = WebSocketInput::new(stream);
    if let Some(event) = negotiated.leading {
        input.push(event);
    }
    let mut output = WebSocketOutput::new(sink);

    let outcome = run_session(
        state.agents.as_ref(),
        &spec,
        session,
        &mut input,
        &mut output,
        &state.lifecycle,
    )
    .await;

    output.close().await;
    info!(?outcome, "WebSocket session finished");
    Some(outcome)
}

/// Waits for the optional `config` frame. Anything other than a config frame,
/// including silence, yields defaults. `None` means the client went away.
async fn negotiate<S>(
    stream: &mut S,
    window: Duration,
    default_voice: &str,
) -> Option<Negotiated>
where
    S: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    let defaults = |leading| Negotiated {
        session_id: Uuid::new_v4().to_string(),
        voice_id: default_voice.to_string(),
        leading,
    };

    let frame = match tokio::time::timeout(window, stream.next()).await {
        Ok(frame) => frame,
        Err(_) => {
            info!("No configuration received in time; using defaults");
            return Some(defaults(None));
        }
    };

    let text = match frame {
        Some(Ok(Message::Text(text))) => text,
        Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return None,
        Some(Ok(_)) => return Some(defaults(None)),
    };

    match serde_json::from_str::<ClientMessage>(text.as_str()) {
        Ok(ClientMessage::Config {
            voice_id,
            session_id,
        }) => Some(Negotiated {
            session_id: resolve_session_id(session_id),
            voice_id: resolve_voice(voice_id, default_voice),
            leading: None,
        }),
        Ok(other) => match inbound(other) {
            Inbound::Event(event) => Some(defaults(Some(event))),
            Inbound::Close => None,
            Inbound::Ignore => Some(defaults(None)),
        },
        Err(e) => {
            warn!(error = %e, "Malformed configuration frame; using defaults");
            Some(defaults(None))
        }
    }
}

fn resolve_voice(requested: Option<String>, default_voice: &str) -> String {
    match requested {
        Some(voice) if is_supported_voice(&voice) => voice,
        Some(voice) => {
            warn!(requested = %voice, fallback = default_voice, "Unsupported voice requested");
            default_voice.to_string()
        }
        None => default_voice.to_string(),
    }
}

fn resolve_session_id(requested: Option<String>) -> String {
    match requested {
        Some(id) => match validate_session_id(&id) {
            Ok(()) => id,
            Err(e) => {
                warn!(error = %e, "Rejected client session id; starting a new session");
                Uuid::new_v4().to_string()
            }
        },
        None => Uuid::new_v4().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::test_support::{
        ScriptedFactory, app_state, app_state_with_store, drain_json, frame_types, next_json,
        socket_pair, text_frame,
    };
    use serde_json::json;
    use voiceops_core::history::{FileHistoryStore, HistoryStore, Turn};

    #[tokio::test]
    async fn configured_session_runs_and_closes_cleanly() {
        let factory = Arc::new(ScriptedFactory::echo());
        let (client, stream, sink, mut rx) = socket_pair();
        let server = tokio::spawn(serve_connection(stream, sink, app_state(factory.clone())));

        client
            .unbounded_send(text_frame(json!({"type": "config", "voice_id": "amy", "session_id": "abc"})))
            .unwrap();
        client
            .unbounded_send(text_frame(json!({"type": "bidi_text_input", "text": "list my instances"})))
            .unwrap();

        let mut seen = Vec::new();
        while let Some(frame) = next_json(&mut rx).await {
            let done = frame["type"] == "bidi_response_complete";
            seen.push(frame);
            if done {
                break;
            }
        }
        client
            .unbounded_send(text_frame(json!({"type": "close"})))
            .unwrap();

        assert_eq!(server.await.unwrap(), Some(SessionOutcome::Closed));
        seen.extend(drain_json(rx).await);

        let types = frame_types(&seen);
        assert!(types.contains(&"bidi_response_start".to_string()));
        assert!(types.contains(&"bidi_response_complete".to_string()));
        assert!(!types.contains(&"bidi_error".to_string()));

        let specs = factory.specs();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].session_id, "abc");
        assert_eq!(specs[0].model.voice_id, "amy");
    }

    #[tokio::test]
    async fn text_sent_just_before_close_is_answered() {
        let factory = Arc::new(ScriptedFactory::echo());
        let (client, stream, sink, rx) = socket_pair();
        client
            .unbounded_send(text_frame(json!({"type": "config", "voice_id": "amy", "session_id": "abc"})))
            .unwrap();
        client
            .unbounded_send(text_frame(json!({"type": "bidi_text_input", "text": "list my instances"})))
            .unwrap();
        client
            .unbounded_send(text_frame(json!({"type": "close"})))
            .unwrap();

        let outcome = serve_connection(stream, sink, app_state(factory.clone())).await;
        assert_eq!(outcome, Some(SessionOutcome::Closed));
        drop(client);

        let frames = drain_json(rx).await;
        assert_eq!(
            frame_types(&frames),
            vec![
                "bidi_connection_start",
                "bidi_response_start",
                "bidi_transcript_stream",
                "bidi_response_complete"
            ]
        );
        assert_eq!(frames[2]["text"], "echo: list my instances");
        assert_eq!(factory.specs()[0].model.voice_id, "amy");
    }

    #[tokio::test(start_paused = true)]
    async fn silence_falls_back_to_defaults() {
        let factory = Arc::new(ScriptedFactory::echo());
        let (client, stream, sink, mut rx) = socket_pair();
        let server = tokio::spawn(serve_connection(stream, sink, app_state(factory.clone())));

        let first = next_json(&mut rx).await.unwrap();
        assert_eq!(first["type"], "bidi_connection_start");
        drop(client);
        assert_eq!(server.await.unwrap(), Some(SessionOutcome::Closed));

        let spec = &factory.specs()[0];
        assert_eq!(spec.model.voice_id, "matthew");
        assert!(Uuid::parse_str(&spec.session_id).is_ok());
    }

    #[tokio::test]
    async fn malformed_config_uses_defaults() {
        let mut stream = futures::stream::iter(vec![Ok(Message::Text("{oops".into()))]);
        let negotiated = negotiate(&mut stream, Duration::from_secs(5), "matthew")
            .await
            .unwrap();
        assert_eq!(negotiated.voice_id, "matthew");
        assert!(Uuid::parse_str(&negotiated.session_id).is_ok());
        assert_eq!(negotiated.leading, None);
    }

    #[tokio::test]
    async fn unsupported_voice_and_bad_session_id_are_replaced() {
        let mut stream = futures::stream::iter(vec![text_frame(
            json!({"type": "config", "voice_id": "bob", "session_id": "../etc/passwd"}),
        )]);
        let negotiated = negotiate(&mut stream, Duration::from_secs(5), "tiffany")
            .await
            .unwrap();
        assert_eq!(negotiated.voice_id, "tiffany");
        assert!(Uuid::parse_str(&negotiated.session_id).is_ok());
    }

    #[tokio::test]
    async fn first_input_frame_is_kept() {
        let mut stream = futures::stream::iter(vec![text_frame(
            json!({"type": "bidi_text_input", "text": "hello"}),
        )]);
        let negotiated = negotiate(&mut stream, Duration::from_secs(5), "matthew")
            .await
            .unwrap();
        assert_eq!(negotiated.leading, Some(BidiInputEvent::text("hello")));
    }

    #[tokio::test]
    async fn leaving_during_negotiation_starts_nothing() {
        let factory = Arc::new(ScriptedFactory::echo());
        let (client, stream, sink, _rx) = socket_pair();
        client
            .unbounded_send(text_frame(json!({"type": "close"})))
            .unwrap();
        let outcome = serve_connection(stream, sink, app_state(factory.clone())).await;
        assert_eq!(outcome, None);
        assert_eq!(factory.created(), 0);

        let (client, stream, sink, _rx) = socket_pair();
        drop(client);
        assert_eq!(
            serve_connection(stream, sink, app_state(factory.clone())).await,
            None
        );
        assert_eq!(factory.created(), 0);
    }

    #[tokio::test]
    async fn returning_client_resumes_history() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn HistoryStore> = Arc::new(FileHistoryStore::open(dir.path()).await.unwrap());
        store.append("resume-1", &Turn::user("earlier")).await.unwrap();
        store.append("resume-1", &Turn::assistant("answer")).await.unwrap();

        let factory = Arc::new(ScriptedFactory::echo());
        let (client, stream, sink, _rx) = socket_pair();
        client
            .unbounded_send(text_frame(json!({"type": "config", "session_id": "resume-1"})))
            .unwrap();
        client
            .unbounded_send(text_frame(json!({"type": "close"})))
            .unwrap();

        let outcome = serve_connection(stream, sink, app_state_with_store(factory.clone(), store)).await;
        assert_eq!(outcome, Some(SessionOutcome::Closed));
        assert_eq!(factory.histories()[0].len(), 2);
    }
}
