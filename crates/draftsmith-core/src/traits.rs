use futures::future::BoxFuture;
use futures::stream::BoxStream;
use serde::de::DeserializeOwned;

use crate::config::ModelConfig;
use crate::error::{DraftsmithError, Result};
use crate::types::*;

/// Streaming chat against one provider.
pub trait LlmClient: Send + Sync + 'static {
    /// Send a chat request and receive a stream of deltas.
    fn chat_stream(
        &self,
        config: &ModelConfig,
        messages: Vec<ChatMessage>,
        tools: &[ToolDefinition],
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<StreamDelta>>>>;
}

/// The only capability handlers and executors need from
/// the text-generation service.
pub trait CompletionPort: Send + Sync + 'static {
    /// Generate plain text for a role-tagged message list.
    fn complete(&self, messages: Vec<ChatMessage>) -> BoxFuture<'_, Result<String>>;

    /// Generate an assistant message that may request tool invocations.
    fn complete_with_tools(
        &self,
        messages: Vec<ChatMessage>,
        tools: &[ToolDefinition],
    ) -> BoxFuture<'_, Result<ChatMessage>>;

    /// Generate a JSON value shaped by `schema`.
    ///
    /// The default asks for bare JSON and extracts the first object from the
    /// reply. Fails with [`DraftsmithError::LlmParse`] when nothing parses.
    fn complete_structured<'a>(
        &'a self,
        mut messages: Vec<ChatMessage>,
        schema: &'a serde_json::Value,
    ) -> BoxFuture<'a, Result<serde_json::Value>> {
        Box::pin(async move {
            messages.push(ChatMessage::system(format!(
                "Respond with ONLY a JSON object matching this JSON Schema, \
                 without markdown or commentary:\n{}",
                schema
            )));
            let text = self.complete(messages).await?;
            serde_json::from_str(extract_json(&text))
                .map_err(|e| DraftsmithError::LlmParse(format!("{}: {}", e, text)))
        })
    }
}

/// A Rust type the completion service can be asked to produce.
pub trait StructuredOutput: DeserializeOwned {
    fn schema() -> serde_json::Value;
}

/// Request a structured value and deserialize it into `T`.
pub async fn complete_as<T: StructuredOutput>(
    port: &dyn CompletionPort,
    messages: Vec<ChatMessage>,
) -> Result<T> {
    let schema = T::schema();
    let value = port.complete_structured(messages, &schema).await?;
    serde_json::from_value(value).map_err(|e| DraftsmithError::LlmParse(e.to_string()))
}

/// One handler exposed to the tool-calling agent.
pub trait Tool: Send + Sync + 'static {
    /// Tool name (used in LLM tool calls).
    fn name(&self) -> &str;

    /// Human-readable description.
    fn description(&self) -> &str;

    /// JSON Schema for tool input.
    fn input_schema(&self) -> serde_json::Value;

    /// Execute the tool with given input and context.
    fn execute(
        &self,
        input: serde_json::Value,
        ctx: ToolContext,
    ) -> BoxFuture<'_, Result<ToolResult>>;

    /// Timeout in seconds for this tool.
    fn timeout_secs(&self) -> u64 {
        60
    }
}

/// Extract JSON from a response that may contain markdown code fences.
pub fn extract_json(text: &str) -> &str {
    let trimmed = text.trim();
    if let Some(start) = trimmed.find("```json") {
        let after = &trimmed[start + 7..];
        if let Some(end) = after.find("```") {
            return after[..end].trim();
        }
    }
    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        if let Some(end) = after.find("```") {
            return after[..end].trim();
        }
    }
    if let Some(start) = trimmed.find('{') {
        if let Some(end) = trimmed.rfind('}') {
            if end > start {
                return &trimmed[start..=end];
            }
        }
    }
    trimmed
}
