//! Axum Router Configuration

use crate::{state::AppState, ws::ws_handler};
use axum::{Router, routing::get};
use std::sync::Arc;

/// Creates the main Axum router for the application.
///
/// The bridge listens on `/` for browsers that connect to the bare host and on
/// `/ws` for clients that use an explicit path.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(ws_handler))
        .route("/ws", get(ws_handler))
        .with_state(app_state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::test_support::{ScriptedFactory, app_state};
    use futures::{SinkExt, StreamExt};
    use serde_json::{Value, json};
    use tokio::net::TcpListener;
    use tokio_tungstenite::{connect_async, tungstenite::Message};

    async fn serve(state: Arc<AppState>) -> std::net::SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, create_router(state)).await.unwrap();
        });
        addr
    }

    #[tokio::test]
    async fn browser_round_trip_over_real_socket() {
        let factory = Arc::new(ScriptedFactory::echo());
        let addr = serve(app_state(factory.clone())).await;

        let (mut socket, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
        socket
            .send(Message::Text(
                json!({"type": "config", "voice_id": "amy", "session_id": "abc"})
                    .to_string()
                    .into(),
            ))
            .await
            .unwrap();
        socket
            .send(Message::Text(
                json!({"type": "bidi_text_input", "text": "list my instances"})
                    .to_string()
                    .into(),
            ))
            .await
            .unwrap();

        socket
            .send(Message::Text(json!({"type": "close"}).to_string().into()))
            .await
            .unwrap();

        // Everything sent before the close is answered, then the server hangs up.
        let mut types = Vec::new();
        while let Some(Ok(message)) = socket.next().await {
            if let Message::Text(text) = message {
                let frame: Value = serde_json::from_str(text.as_str()).unwrap();
                types.push(frame["type"].as_str().unwrap_or_default().to_string());
            }
        }
        assert_eq!(
            types,
            vec![
                "bidi_connection_start",
                "bidi_response_start",
                "bidi_transcript_stream",
                "bidi_response_complete"
            ]
        );

        let specs = factory.specs();
        assert_eq!(specs[0].session_id, "abc");
        assert_eq!(specs[0].model.voice_id, "amy");
    }

    #[tokio::test]
    async fn root_path_accepts_sockets() {
        let factory = Arc::new(ScriptedFactory::echo());
        let addr = serve(app_state(factory.clone())).await;

        let (mut socket, _) = connect_async(format!("ws://{addr}/")).await.unwrap();
        socket
            .send(Message::Text(json!({"type": "config"}).to_string().into()))
            .await
            .unwrap();
        let first = socket.next().await.unwrap().unwrap();
        let frame: Value = serde_json::from_str(first.to_text().unwrap()).unwrap();
        assert_eq!(frame["type"], "bidi_connection_start");
        socket.close(None).await.unwrap();
    }
}
