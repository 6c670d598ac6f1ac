use std::sync::Arc;

use futures::future::BoxFuture;
use futures::StreamExt;
use tracing::{debug, warn};

use draftsmith_core::config::ModelConfig;
use draftsmith_core::error::Result;
use draftsmith_core::event::EventBus;
use draftsmith_core::traits::{CompletionPort, LlmClient};
use draftsmith_core::types::*;

/// Accumulator for streaming tool call deltas.
#[derive(Debug, Default)]
struct ToolCallAccumulator {
    id: String,
    name: String,
    input_json: String,
}

/// Everything one streamed response produced.
#[derive(Debug, Default)]
struct Collected {
    text: String,
    tool_calls: Vec<ToolCallAccumulator>,
    stop_reason: Option<StopReason>,
}

/// [`CompletionPort`] backed by a streaming [`LlmClient`].
///
/// Text deltas and usage are forwarded to the event bus when one is
/// attached; callers only ever see the assembled response.
pub struct LlmCompleter {
    llm: Arc<dyn LlmClient>,
    config: ModelConfig,
    events: Option<Arc<EventBus>>,
}

impl LlmCompleter {
    pub fn new(llm: impl Into<Arc<dyn LlmClient>>, config: ModelConfig) -> Self {
        Self {
            llm: llm.into(),
            config,
            events: None,
        }
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    fn publish(&self, event: AgentEvent) {
        if let Some(bus) = &self.events {
            bus.publish(event);
        }
    }

    async fn collect(
        &self,
        messages: Vec<ChatMessage>,
        tools: &[ToolDefinition],
    ) -> Result<Collected> {
        let mut stream = self.llm.chat_stream(&self.config, messages, tools).await?;
        let mut out = Collected::default();

        while let Some(delta) = stream.next().await {
            match delta? {
                StreamDelta::TextDelta(text) => {
                    self.publish(AgentEvent::TextDelta(text.clone()));
                    out.text.push_str(&text);
                }
                StreamDelta::ToolUseStart { index, id, name } => {
                    while out.tool_calls.len() <= index {
                        out.tool_calls.push(ToolCallAccumulator::default());
                    }
                    out.tool_calls[index].id = id;
                    out.tool_calls[index].name = name;
                }
                StreamDelta::ToolInputDelta { index, delta } => {
                    if let Some(tc) = out.tool_calls.get_mut(index) {
                        tc.input_json.push_str(&delta);
                    }
                }
                StreamDelta::Stop(reason) => out.stop_reason = Some(reason),
                StreamDelta::Usage {
                    input_tokens,
                    output_tokens,
                } => self.publish(AgentEvent::UsageUpdate {
                    input_tokens,
                    output_tokens,
                }),
            }
        }

        if out.stop_reason == Some(StopReason::MaxTokens) {
            warn!(max_tokens = self.config.max_tokens, "Completion hit max tokens");
        }
        debug!(
            chars = out.text.len(),
            tool_calls = out.tool_calls.len(),
            "Completion finished"
        );
        Ok(out)
    }
}

impl CompletionPort for LlmCompleter {
    fn complete(&self, messages: Vec<ChatMessage>) -> BoxFuture<'_, Result<String>> {
        Box::pin(async move {
            let collected = self.collect(messages, &[]).await?;
            Ok(collected.text.trim().to_string())
        })
    }

    fn complete_with_tools(
        &self,
        messages: Vec<ChatMessage>,
        tools: &[ToolDefinition],
    ) -> BoxFuture<'_, Result<ChatMessage>> {
        let tools = tools.to_vec();
        Box::pin(async move {
            let collected = self.collect(messages, &tools).await?;

            let mut content = Vec::new();
            let text = collected.text.trim();
            if !text.is_empty() {
                content.push(ContentBlock::Text {
                    text: text.to_string(),
                });
            }
            // Unparseable arguments become Null; the tool rejects them with
            // a validation error the model can see.
            for tc in collected.tool_calls.into_iter().filter(|tc| !tc.name.is_empty()) {
                let input = if tc.input_json.trim().is_empty() {
                    serde_json::json!({})
                } else {
                    serde_json::from_str(&tc.input_json).unwrap_or(serde_json::Value::Null)
                };
                content.push(ContentBlock::ToolUse {
                    id: tc.id,
                    name: tc.name,
                    input,
                });
            }

            Ok(ChatMessage {
                role: Role::Assistant,
                content,
                timestamp: Some(chrono::Utc::now()),
            })
        })
    }
}
