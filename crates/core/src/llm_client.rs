//! Chat model access for the assistant.
//!
//! A turn takes one or two model calls: the first either answers outright or
//! asks for `use_aws` calls, and once those have run a second, streamed call
//! phrases the result for the user.

use anyhow::{Result, anyhow};
use async_openai::{
    Client,
    config::OpenAIConfig,
    error::OpenAIError,
    types::{
        ChatCompletionRequestMessage, ChatCompletionTool, CreateChatCompletionRequestArgs,
        CreateChatCompletionResponse,
    },
};
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use std::pin::Pin;

pub type ToolCall = async_openai::types::ChatCompletionMessageToolCall;

#[derive(Debug, Clone)]
pub enum LLMStreamEvent {
    TextChunk(String),
}

/// Reply text as the model produces it.
pub type LLMStream = Pin<Box<dyn Stream<Item = Result<LLMStreamEvent, OpenAIError>> + Send>>;

/// What the model wants to do with a user turn.
#[derive(Debug, Clone)]
pub enum LLMAction {
    /// Answer without touching AWS.
    TextResponse(String),
    /// Run these tool calls first, then answer.
    ToolCall(Vec<ToolCall>),
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LLMClient: Send + Sync {
    /// Asks the model for an answer or for tool calls, offering it `tools`.
    async fn decide_action(
        &self,
        messages: Vec<ChatCompletionRequestMessage>,
        tools: Vec<ChatCompletionTool>,
    ) -> Result<LLMAction>;

    /// Streams the answer to a conversation that ends in tool results.
    async fn stream_after_tools(
        &self,
        conversation: Vec<ChatCompletionRequestMessage>,
    ) -> Result<LLMStream>;
}

/// Joins a streamed answer into the full reply. The first stream error wins.
pub async fn collect_reply(mut stream: LLMStream) -> Result<String> {
    let mut reply = String::new();
    while let Some(event) = stream.next().await {
        let LLMStreamEvent::TextChunk(chunk) = event?;
        reply.push_str(&chunk);
    }
    Ok(reply)
}

/// `LLMClient` over any endpoint speaking the OpenAI chat completions API,
/// which covers both OpenAI and Gemini's compatibility layer.
pub struct OpenAICompatibleClient {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAICompatibleClient {
    pub fn new(config: OpenAIConfig, model: String) -> Self {
        Self {
            client: Client::with_config(config),
            model,
        }
    }
}

#[async_trait]
impl LLMClient for OpenAICompatibleClient {
    async fn decide_action(
        &self,
        messages: Vec<ChatCompletionRequestMessage>,
        tools: Vec<ChatCompletionTool>,
    ) -> Result<LLMAction> {
        let mut request = CreateChatCompletionRequestArgs::default();
        request.model(&self.model).messages(messages);
        if !tools.is_empty() {
            request.tools(tools).tool_choice("auto");
        }

        let response: CreateChatCompletionResponse =
            self.client.chat().create(request.build()?).await?;
        let message = response
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message)
            .ok_or_else(|| anyhow!("model returned no choices"))?;

        match (message.tool_calls, message.content) {
            (Some(tool_calls), _) if !tool_calls.is_empty() => Ok(LLMAction::ToolCall(tool_calls)),
            (_, Some(content)) => Ok(LLMAction::TextResponse(content)),
            _ => Err(anyhow!("model returned neither text nor tool calls")),
        }
    }

    async fn stream_after_tools(
        &self,
        conversation: Vec<ChatCompletionRequestMessage>,
    ) -> Result<LLMStream> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(conversation)
            .stream(true)
            .build()?;

        let stream = self.client.chat().create_stream(request).await?;

        Ok(Box::pin(stream.filter_map(|result| async move {
            match result {
                Ok(response) => response
                    .choices
                    .into_iter()
                    .next()
                    .and_then(|choice| choice.delta.content)
                    .filter(|content| !content.is_empty())
                    .map(|content| Ok(LLMStreamEvent::TextChunk(content))),
                Err(e) => Some(Err(e)),
            }
        })))
    }
}
