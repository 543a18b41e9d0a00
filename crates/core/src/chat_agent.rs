//! Text Chat Agent
//!
//! A `BidiAgent` driven by an OpenAI-compatible chat model. Each text input is
//! one turn: the turn is persisted, the model decides whether to answer or to
//! call `use_aws`, gated tool calls run through the `ToolExecutor`, and the
//! final answer is streamed back as transcript events.

use crate::{
    agent::{AgentError, AgentFactory, AgentSpec, BidiAgent, BidiInput, BidiOutput, ModelConfig},
    consent::{ConsentGate, Decision},
    events::{BidiInputEvent, BidiOutputEvent, TranscriptRole},
    history::{Role, SessionHistory, Turn},
    llm_client::{LLMAction, LLMClient, ToolCall, collect_reply},
    prompt::Domain,
    tools::{AwsCall, ToolExecutor, USE_AWS_TOOL, use_aws_schema},
};
use anyhow::{Context, Result};
use async_openai::types::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestToolMessageArgs,
    ChatCompletionRequestUserMessageArgs, ChatCompletionTool, ChatCompletionToolArgs,
    FunctionObjectArgs,
};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const UNSUPPORTED_INPUT_CODE: &str = "unsupported_input";

/// Builds `ChatAgent` instances that share one LLM client and tool executor.
pub struct ChatAgentFactory {
    llm: Arc<dyn LLMClient>,
    tools: Arc<dyn ToolExecutor>,
}

impl ChatAgentFactory {
    pub fn new(llm: Arc<dyn LLMClient>, tools: Arc<dyn ToolExecutor>) -> Self {
        Self { llm, tools }
    }
}

#[async_trait]
impl AgentFactory for ChatAgentFactory {
    async fn create(
        &self,
        spec: &AgentSpec,
        session: SessionHistory,
    ) -> Result<Box<dyn BidiAgent>, AgentError> {
        let history = session
            .load()
            .await
            .context("Failed to load session history")?;
        debug!(session_id = %session.session_id(), turns = history.len(), "Creating chat agent");

        Ok(Box::new(ChatAgent {
            connection_id: Uuid::new_v4().to_string(),
            model: spec.model.clone(),
            system_prompt: spec.system_prompt.clone(),
            llm: self.llm.clone(),
            tools: self.tools.clone(),
            session,
            history,
            consent: ConsentGate::new(),
            stop: CancellationToken::new(),
            audio_rejected: false,
        }))
    }
}

pub struct ChatAgent {
    connection_id: String,
    model: ModelConfig,
    system_prompt: Arc<String>,
    llm: Arc<dyn LLMClient>,
    tools: Arc<dyn ToolExecutor>,
    session: SessionHistory,
    history: Vec<Turn>,
    consent: ConsentGate,
    stop: CancellationToken,
    audio_rejected: bool,
}

#[async_trait]
impl BidiAgent for ChatAgent {
    async fn run(
        &mut self,
        input: &mut dyn BidiInput,
        output: &mut dyn BidiOutput,
    ) -> Result<(), AgentError> {
        let stop = self.stop.clone();
        output
            .send(BidiOutputEvent::ConnectionStart {
                connection_id: self.connection_id.clone(),
                model: self.model.model_id.clone(),
            })
            .await;

        let reason = loop {
            let event = tokio::select! {
                biased;
                _ = stop.cancelled() => break "stopped",
                event = input.next() => event,
            };
            match event {
                Some(BidiInputEvent::TextInput { text }) => self.respond(&text, output).await?,
                Some(BidiInputEvent::AudioInput { .. }) => self.reject_audio(output).await,
                None => break "input_closed",
            }
        };

        info!(connection_id = %self.connection_id, reason, "Chat agent finished");
        output
            .send(BidiOutputEvent::ConnectionClose {
                connection_id: self.connection_id.clone(),
                reason: reason.to_string(),
            })
            .await;
        Ok(())
    }

    fn stop_handle(&self) -> CancellationToken {
        self.stop.clone()
    }

    fn history_mut(&mut self) -> &mut Vec<Turn> {
        &mut self.history
    }
}

impl ChatAgent {
    /// Handles one user text turn from start to finish.
    async fn respond(&mut self, text: &str, output: &mut dyn BidiOutput) -> Result<(), AgentError> {
        self.consent.observe_user_turn(text);
        let response_id = Uuid::new_v4().to_string();

        output
            .send(BidiOutputEvent::ResponseStart {
                response_id: response_id.clone(),
            })
            .await;
        output
            .send(BidiOutputEvent::TranscriptStream {
                role: TranscriptRole::User,
                text: text.to_string(),
                is_final: true,
            })
            .await;
        self.remember(Turn::user(text)).await?;

        let reply = self
            .complete(text, output)
            .await
            .map_err(|e| AgentError::model(format!("{e:#}")))?;

        output
            .send(BidiOutputEvent::TranscriptStream {
                role: TranscriptRole::Assistant,
                text: reply.clone(),
                is_final: true,
            })
            .await;
        output
            .send(BidiOutputEvent::ResponseComplete {
                response_id,
                stop_reason: "end_turn".to_string(),
            })
            .await;
        self.remember(Turn::assistant(reply)).await
    }

    async fn remember(&mut self, turn: Turn) -> Result<(), AgentError> {
        self.session
            .append(&turn)
            .await
            .context("Failed to persist turn")?;
        self.history.push(turn);
        Ok(())
    }

    async fn reject_audio(&mut self, output: &mut dyn BidiOutput) {
        if self.audio_rejected {
            return;
        }
        self.audio_rejected = true;
        warn!("Audio input received but the chat model only understands text");
        output
            .send(BidiOutputEvent::error(
                "Audio input is not supported by this model; send bidi_text_input instead.",
                Some(UNSUPPORTED_INPUT_CODE),
            ))
            .await;
    }

    /// Asks the model for a reply, running any tool calls it requests.
    async fn complete(&mut self, query: &str, output: &mut dyn BidiOutput) -> Result<String> {
        let system = format!("{}\n\n{}", self.system_prompt, Domain::route(query).focus());
        let mut messages: Vec<ChatCompletionRequestMessage> = vec![
            ChatCompletionRequestSystemMessageArgs::default()
                .content(system)
                .build()?
                .into(),
        ];
        for turn in &self.history {
            match turn.role {
                Role::User => messages.push(
                    ChatCompletionRequestUserMessageArgs::default()
                        .content(turn.content.clone())
                        .build()?
                        .into(),
                ),
                Role::Assistant => messages.push(
                    ChatCompletionRequestAssistantMessageArgs::default()
                        .content(turn.content.clone())
                        .build()?
                        .into(),
                ),
            }
        }

        let tool_calls = match self
            .llm
            .decide_action(messages.clone(), vec![use_aws_tool()?])
            .await?
        {
            LLMAction::TextResponse(text) => return Ok(text),
            LLMAction::ToolCall(tool_calls) => tool_calls,
        };

        let mut results = Vec::with_capacity(tool_calls.len());
        for call in &tool_calls {
            output
                .send(BidiOutputEvent::ToolUse {
                    tool_use_id: call.id.clone(),
                    name: call.function.name.clone(),
                    input: serde_json::from_str(&call.function.arguments)
                        .unwrap_or_else(|_| Value::String(call.function.arguments.clone())),
                })
                .await;
            let result = self.run_tool(call).await;
            output
                .send(BidiOutputEvent::ToolResult {
                    tool_use_id: call.id.clone(),
                    content: result.clone(),
                })
                .await;
            results.push(result);
        }

        messages.push(
            ChatCompletionRequestAssistantMessageArgs::default()
                .tool_calls(tool_calls.clone())
                .build()?
                .into(),
        );
        for (call, result) in tool_calls.iter().zip(results) {
            messages.push(
                ChatCompletionRequestToolMessageArgs::default()
                    .tool_call_id(call.id.clone())
                    .content(result)
                    .build()?
                    .into(),
            );
        }

        collect_reply(self.llm.stream_after_tools(messages).await?).await
    }

    /// Runs one tool call through the consent gate. Failures become a JSON
    /// error the model can explain to the user.
    async fn run_tool(&mut self, call: &ToolCall) -> String {
        if call.function.name != USE_AWS_TOOL {
            return json!({ "error": format!("Unknown tool '{}'", call.function.name) })
                .to_string();
        }
        let aws_call = match AwsCall::from_arguments(&call.function.arguments) {
            Ok(aws_call) => aws_call,
            Err(e) => return json!({ "error": format!("{e:#}") }).to_string(),
        };

        match self.consent.authorize(&aws_call) {
            Decision::RequireConfirmation => {
                info!(service = %aws_call.service, operation = %aws_call.operation, "Holding dangerous operation for consent");
                json!({
                    "status": "CONFIRMATION_REQUIRED",
                    "message": format!(
                        "{} {} is a dangerous operation. Explain its impact and ask the user \
                         to confirm before calling use_aws again.",
                        aws_call.service, aws_call.operation
                    ),
                })
                .to_string()
            }
            Decision::Allow => match self.tools.execute(&aws_call).await {
                Ok(result) => json!({ "result": result }).to_string(),
                Err(e) => json!({ "error": format!("{e:#}") }).to_string(),
            },
        }
    }
}

fn use_aws_tool() -> Result<ChatCompletionTool> {
    Ok(ChatCompletionToolArgs::default()
        .function(
            FunctionObjectArgs::default()
                .name(USE_AWS_TOOL)
                .description("Call the AWS CLI for the EC2, SSM or Backup services.")
                .parameters(use_aws_schema())
                .build()?,
        )
        .build()?)
}
