use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use futures::future::BoxFuture;
use futures::stream::BoxStream;

use draftsmith_core::config::ModelConfig;
use draftsmith_core::error::{DraftsmithError, Result};
use draftsmith_core::traits::LlmClient;
use draftsmith_core::types::*;

enum Reply {
    Deltas(Vec<StreamDelta>),
    Fail(String),
}

#[derive(Default)]
struct Inner {
    replies: VecDeque<Reply>,
    calls: usize,
}

/// An [`LlmClient`] that replays scripted delta streams.
///
/// Each response is split into small chunks and closes with a usage report
/// and a stop reason, the way a real provider stream does.
#[derive(Clone, Default)]
pub struct ScriptedLlm {
    inner: Arc<Mutex<Inner>>,
}

impl ScriptedLlm {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(self, reply: Reply) -> Self {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replies
            .push_back(reply);
        self
    }

    /// Queue a text response, streamed in chunks of a few characters.
    pub fn text(self, text: &str) -> Self {
        let chars: Vec<char> = text.chars().collect();
        let mut deltas: Vec<StreamDelta> = chars
            .chunks(4)
            .map(|c| StreamDelta::TextDelta(c.iter().collect()))
            .collect();
        deltas.push(StreamDelta::Usage {
            input_tokens: 10,
            output_tokens: chars.len() as u64,
        });
        deltas.push(StreamDelta::Stop(StopReason::EndTurn));
        self.push(Reply::Deltas(deltas))
    }

    /// Queue a tool-calling response given as `(id, name, raw_json_args)`.
    /// Arguments are streamed in two halves.
    pub fn tool_calls(self, calls: Vec<(&str, &str, &str)>) -> Self {
        let mut deltas = Vec::new();
        for (index, (id, name, args)) in calls.into_iter().enumerate() {
            deltas.push(StreamDelta::ToolUseStart {
                index,
                id: id.to_string(),
                name: name.to_string(),
            });
            let mid = args
                .char_indices()
                .nth(args.chars().count() / 2)
                .map(|(i, _)| i)
                .unwrap_or(args.len());
            for part in [&args[..mid], &args[mid..]] {
                if !part.is_empty() {
                    deltas.push(StreamDelta::ToolInputDelta {
                        index,
                        delta: part.to_string(),
                    });
                }
            }
        }
        deltas.push(StreamDelta::Stop(StopReason::ToolUse));
        self.push(Reply::Deltas(deltas))
    }

    /// Queue a request failure.
    pub fn fail(self, message: &str) -> Self {
        self.push(Reply::Fail(message.to_string()))
    }

    /// Number of `chat_stream` calls made so far.
    pub fn calls(&self) -> usize {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).calls
    }
}

impl LlmClient for ScriptedLlm {
    fn chat_stream(
        &self,
        _config: &ModelConfig,
        _messages: Vec<ChatMessage>,
        _tools: &[ToolDefinition],
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<StreamDelta>>>> {
        let reply = {
            let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            inner.calls += 1;
            inner.replies.pop_front()
        };

        Box::pin(async move {
            match reply {
                Some(Reply::Deltas(deltas)) => {
                    let stream = futures::stream::iter(deltas.into_iter().map(Ok));
                    Ok(Box::pin(stream) as BoxStream<'_, Result<StreamDelta>>)
                }
                Some(Reply::Fail(message)) => Err(DraftsmithError::LlmRequest(message)),
                None => Err(DraftsmithError::LlmRequest("scripted LLM exhausted".into())),
            }
        })
    }
}
