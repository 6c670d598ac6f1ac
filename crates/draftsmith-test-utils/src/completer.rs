use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::future::BoxFuture;

use draftsmith_core::error::{DraftsmithError, Result};
use draftsmith_core::state::RouteKind;
use draftsmith_core::traits::CompletionPort;
use draftsmith_core::types::*;

#[derive(Debug, Clone)]
enum Step {
    Text(String),
    Message(ChatMessage),
    Fail(String),
    Delay(Duration, Box<Step>),
    Hang,
}

/// One call observed by a [`ScriptedCompleter`].
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub messages: Vec<ChatMessage>,
    /// Tool names offered with the call; empty for plain completions.
    pub tools: Vec<String>,
}

impl RecordedCall {
    /// All message text of the call joined by newlines.
    pub fn transcript(&self) -> String {
        self.messages
            .iter()
            .map(|m| m.text())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Text of the system messages only.
    pub fn system_text(&self) -> String {
        self.messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.text())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Default)]
struct Inner {
    script: VecDeque<Step>,
    calls: Vec<RecordedCall>,
}

/// A [`CompletionPort`] that replays a fixed script.
///
/// Plain, structured, and tool-calling requests all consume the same queue in
/// call order. An exhausted script fails with [`DraftsmithError::LlmRequest`].
#[derive(Clone, Default)]
pub struct ScriptedCompleter {
    inner: Arc<Mutex<Inner>>,
}

impl ScriptedCompleter {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(self, step: Step) -> Self {
        self.lock().script.push_back(step);
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a plain text response.
    pub fn text(self, text: impl Into<String>) -> Self {
        self.push(Step::Text(text.into()))
    }

    /// Queue a router classification.
    pub fn route(self, kind: RouteKind, rationale: &str) -> Self {
        self.text(
            serde_json::json!({"kind": kind.as_str(), "rationale": rationale}).to_string(),
        )
    }

    /// Queue an assistant message requesting tool calls, given as
    /// `(name, arguments)` pairs. Call ids are generated.
    pub fn tool_calls(self, calls: Vec<(&str, serde_json::Value)>) -> Self {
        let content = calls
            .into_iter()
            .enumerate()
            .map(|(i, (name, input))| ContentBlock::ToolUse {
                id: format!("call_{}_{}", name, i),
                name: name.to_string(),
                input,
            })
            .collect();
        self.push(Step::Message(ChatMessage {
            role: Role::Assistant,
            content,
            timestamp: None,
        }))
    }

    /// Queue a completion-service failure.
    pub fn fail(self, message: impl Into<String>) -> Self {
        self.push(Step::Fail(message.into()))
    }

    /// Queue a text response delivered after `delay`.
    pub fn delayed_text(self, delay: Duration, text: impl Into<String>) -> Self {
        self.push(Step::Delay(delay, Box::new(Step::Text(text.into()))))
    }

    /// Queue a response that never arrives.
    pub fn hang(self) -> Self {
        self.push(Step::Hang)
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.lock().calls.clone()
    }

    pub fn call_count(&self) -> usize {
        self.lock().calls.len()
    }

    /// Steps not consumed yet.
    pub fn remaining(&self) -> usize {
        self.lock().script.len()
    }

    fn next_step(&self, messages: Vec<ChatMessage>, tools: Vec<String>) -> Option<Step> {
        let mut inner = self.lock();
        inner.calls.push(RecordedCall { messages, tools });
        inner.script.pop_front()
    }

    async fn resolve(step: Option<Step>) -> Result<ChatMessage> {
        let mut step = step;
        loop {
            match step {
                None => {
                    return Err(DraftsmithError::LlmRequest(
                        "scripted completer exhausted".into(),
                    ))
                }
                Some(Step::Text(text)) => return Ok(ChatMessage::assistant_text(text)),
                Some(Step::Message(msg)) => return Ok(msg),
                Some(Step::Fail(message)) => return Err(DraftsmithError::LlmRequest(message)),
                Some(Step::Delay(delay, next)) => {
                    tokio::time::sleep(delay).await;
                    step = Some(*next);
                }
                Some(Step::Hang) => futures::future::pending::<()>().await,
            }
        }
    }
}

impl CompletionPort for ScriptedCompleter {
    fn complete(&self, messages: Vec<ChatMessage>) -> BoxFuture<'_, Result<String>> {
        let step = self.next_step(messages, vec![]);
        Box::pin(async move { Ok(Self::resolve(step).await?.text()) })
    }

    fn complete_with_tools(
        &self,
        messages: Vec<ChatMessage>,
        tools: &[ToolDefinition],
    ) -> BoxFuture<'_, Result<ChatMessage>> {
        let names = tools.iter().map(|t| t.name.clone()).collect();
        let step = self.next_step(messages, names);
        Box::pin(Self::resolve(step))
    }
}
