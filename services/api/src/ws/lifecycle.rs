//! Drives agent instances for one connection.
//!
//! A connection keeps a single session (and so a single history) for its whole
//! life, but the agent instance serving it is disposable. When the model closes
//! a stream because it ran too long, the instance is dropped and a fresh one is
//! built from the same session, so the user only notices a restart notice.

use std::time::Duration;
use tracing::{error, info, warn};
use voiceops_core::{
    agent::{AgentFactory, AgentSpec, BidiInput, BidiOutput, FailureKind, classify_failure},
    events::BidiOutputEvent,
    history::{DEFAULT_HISTORY_WINDOW, SessionHistory, cap_history},
};

pub const DEFAULT_NEGOTIATION_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_RECONNECTS: u32 = 50;

/// Tunables for a connection's lifecycle.
#[derive(Debug, Clone, PartialEq)]
pub struct LifecycleSettings {
    /// How long to wait for the optional `config` frame.
    pub negotiation_timeout: Duration,
    /// Reconnects allowed per connection after stream-limit failures. The
    /// session ends with an error on failure number `max_reconnects + 1`.
    pub max_reconnects: u32,
    /// Turns kept in a freshly built instance's live history.
    pub history_window: usize,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            negotiation_timeout: DEFAULT_NEGOTIATION_TIMEOUT,
            max_reconnects: DEFAULT_MAX_RECONNECTS,
            history_window: DEFAULT_HISTORY_WINDOW,
        }
    }
}

/// How a connection's session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// The agent returned normally, usually because the user left.
    Closed,
    /// The agent could not be built or failed in a way a restart cannot fix.
    Failed,
    /// Every allowed reconnect was used up.
    ReconnectsExhausted,
}

/// Runs agent instances for a session until it closes or fails for good.
///
/// Both adapters are stopped before returning, whatever the outcome.
pub async fn run_session(
    factory: &dyn AgentFactory,
    spec: &AgentSpec,
    session: SessionHistory,
    input: &mut dyn BidiInput,
    output: &mut dyn BidiOutput,
    settings: &LifecycleSettings,
) -> SessionOutcome {
    output.start().await;
    let outcome = drive(factory, spec, session, input, output, settings).await;
    input.stop().await;
    output.stop().await;
    outcome
}

async fn drive(
    factory: &dyn AgentFactory,
    spec: &AgentSpec,
    session: SessionHistory,
    input: &mut dyn BidiInput,
    output: &mut dyn BidiOutput,
    settings: &LifecycleSettings,
) -> SessionOutcome {
    let mut reconnects: u32 = 0;

    loop {
        let mut agent = match factory.create(spec, session.clone()).await {
            Ok(agent) => agent,
            Err(e) => {
                error!(error = %e, "Failed to create agent instance");
                output
                    .send(BidiOutputEvent::error(
                        format!("Failed to start the assistant: {e}"),
                        Some("agent_unavailable"),
                    ))
                    .await;
                return SessionOutcome::Failed;
            }
        };
        cap_history(agent.history_mut(), settings.history_window);

        input.start(agent.stop_handle()).await;
        info!(
            instance = reconnects + 1,
            voice_id = %spec.model.voice_id,
            "Agent instance running"
        );

        let error = match agent.run(input, output).await {
            Ok(()) => {
                info!("Agent instance finished cleanly");
                return SessionOutcome::Closed;
            }
            Err(e) => e,
        };

        match classify_failure(&error) {
            FailureKind::StreamLimit if reconnects < settings.max_reconnects => {
                reconnects += 1;
                warn!(
                    attempt = reconnects,
                    max = settings.max_reconnects,
                    error = %error,
                    "Model stream limit reached; reconnecting"
                );
                output.send(BidiOutputEvent::ConnectionRestart).await;
                input.stop().await;
                drop(agent);
            }
            FailureKind::StreamLimit => {
                error!(reconnects, error = %error, "Reconnect budget exhausted");
                output
                    .send(BidiOutputEvent::error(
                        format!("Session ended after {reconnects} reconnects: {error}"),
                        Some("reconnect_limit"),
                    ))
                    .await;
                return SessionOutcome::ReconnectsExhausted;
            }
            FailureKind::Fatal => {
                error!(error = ?error, "Agent instance failed");
                output
                    .send(BidiOutputEvent::error(error.to_string(), Some("agent_error")))
                    .await;
                return SessionOutcome::Failed;
            }
        }
    }
}
