//! The five generation behaviours.
//!
//! Every handler is safe to call without its preconditions: a missing
//! document or draft yields fixed guidance text and no completion call.

use std::sync::OnceLock;

use regex::Regex;
use tracing::debug;

use draftsmith_core::error::Result;
use draftsmith_core::prompts::PromptSet;
use draftsmith_core::state::{sanitize, ConversationState, StateUpdate};
use draftsmith_core::traits::CompletionPort;
use draftsmith_core::types::{ChatMessage, ToolResult};

pub const NO_DOCUMENT: &str = "Please provide a source document first.";
pub const NO_DRAFT: &str = "There is no draft yet. Should I create one first?";
pub const NEW_MAIL_QUESTION: &str = "What should the new email be about? Recipient, purpose, tone?";
const EMPTY_QUESTION: &str = "Could you share the details I need to write this reply?";

/// What a handler produced for the turn.
#[derive(Debug, Clone, PartialEq)]
pub struct HandlerOutput {
    /// Assistant text shown to the user.
    pub message: String,
    /// New working draft, if the handler wrote one.
    pub draft: Option<String>,
    /// `Some(true)` after a clarifying question, `Some(false)` once a normal
    /// answer clears it, `None` to leave the flag alone.
    pub pending_clarification: Option<bool>,
}

impl HandlerOutput {
    fn refusal(message: &str) -> Self {
        Self {
            message: message.to_string(),
            draft: None,
            pending_clarification: None,
        }
    }

    fn answer(message: String) -> Self {
        Self {
            message,
            draft: None,
            pending_clarification: Some(false),
        }
    }

    fn drafted(prefix: &str, draft: String) -> Self {
        Self {
            message: format!("{}\n\n{}", prefix, draft),
            draft: Some(draft),
            pending_clarification: Some(false),
        }
    }

    fn question(question: String) -> Self {
        Self {
            message: question,
            draft: None,
            pending_clarification: Some(true),
        }
    }

    /// True when this output is a clarifying question.
    pub fn is_question(&self) -> bool {
        self.pending_clarification == Some(true)
    }

    pub fn into_update(self) -> StateUpdate {
        StateUpdate::message(ChatMessage::assistant_text(self.message))
            .with_draft(self.draft)
            .with_pending_clarification(self.pending_clarification)
    }

    pub fn into_tool_result(self) -> ToolResult {
        ToolResult::success(self.message)
            .with_draft(self.draft)
            .with_pending_clarification(self.pending_clarification)
    }
}

/// Condense the uploaded document.
pub async fn summarize(
    state: &ConversationState,
    port: &dyn CompletionPort,
    prompts: &PromptSet,
) -> Result<HandlerOutput> {
    let Some(document) = state.document() else {
        return Ok(HandlerOutput::refusal(NO_DOCUMENT));
    };

    let summary = port
        .complete(vec![
            ChatMessage::system(&prompts.summarizer),
            ChatMessage::user(format!("Original email:\n{}", document)),
        ])
        .await?;

    Ok(HandlerOutput::answer(format!("Summary:\n\n{}", summary.trim())))
}

/// Answer the uploaded document, or ask exactly one clarifying question.
///
/// `extra` carries explicit user instructions and forbids asking; `summary`
/// is an optional condensed version of the document to ground the reply.
pub async fn reply(
    state: &ConversationState,
    port: &dyn CompletionPort,
    prompts: &PromptSet,
    extra: Option<&str>,
    summary: Option<&str>,
    history_window: usize,
) -> Result<HandlerOutput> {
    let Some(document) = state.document() else {
        return Ok(HandlerOutput::refusal(NO_DOCUMENT));
    };

    let mut messages = vec![
        ChatMessage::system(&prompts.reply),
        ChatMessage::system(&prompts.reply_decision),
        ChatMessage::system(format!("EMAIL (context for the reply):\n{}", document)),
    ];
    if let Some(summary) = non_blank(summary) {
        messages.push(ChatMessage::system(format!("SUMMARY:\n{}", summary)));
    }
    if let Some(extra) = non_blank(extra) {
        messages.push(ChatMessage::system(format!("USER_INPUT:\n{}", extra)));
        messages.push(ChatMessage::system(
            "NOTE: USER_INPUT is set, so do NOT ask another 'ASK:' question.",
        ));
    }
    if state.pending_clarification {
        messages.push(ChatMessage::system(
            "The user has answered your question. Do not ask again; write the final reply email now.",
        ));
    }
    messages.extend(state.conversation_tail(history_window));

    let text = port.complete(messages).await?;

    if let Some(question) = parse_question(&text) {
        debug!("Reply handler asked a clarifying question");
        return Ok(HandlerOutput::question(question));
    }
    Ok(HandlerOutput::drafted("Draft (reply):", text.trim().to_string()))
}

/// Write a fresh email from a brief, or from the latest user turn.
pub async fn compose_new(
    state: &ConversationState,
    port: &dyn CompletionPort,
    prompts: &PromptSet,
    brief: Option<&str>,
) -> Result<HandlerOutput> {
    let last = state.last_user_text();
    let Some(brief) = non_blank(brief).or_else(|| non_blank(Some(last.as_str()))) else {
        return Ok(HandlerOutput::refusal(NEW_MAIL_QUESTION));
    };

    let email = port
        .complete(vec![
            ChatMessage::system(&prompts.new_mail),
            ChatMessage::user(format!("USER_INPUT:\n{}", brief)),
        ])
        .await?;

    Ok(HandlerOutput::drafted("Draft (new):", email.trim().to_string()))
}

/// Rewrite the current draft according to feedback.
///
/// `None` takes the feedback from the latest user turn. Blank feedback
/// returns the draft unchanged without calling the completion service.
pub async fn revise(
    state: &ConversationState,
    port: &dyn CompletionPort,
    prompts: &PromptSet,
    feedback: Option<&str>,
) -> Result<HandlerOutput> {
    let Some(draft) = state.current_draft() else {
        return Ok(HandlerOutput::refusal(NO_DRAFT));
    };
    let draft = sanitize(draft);

    let feedback = match feedback {
        Some(f) => f.trim().to_string(),
        None => state.last_user_text(),
    };
    if feedback.is_empty() {
        debug!("Empty feedback, keeping draft as is");
        return Ok(HandlerOutput::drafted("Revised draft:", draft));
    }

    let revised = port
        .complete(vec![
            ChatMessage::system(&prompts.revise),
            ChatMessage::user(format!("DRAFT:\n{}\n\nFEEDBACK:\n{}", draft, feedback)),
        ])
        .await?;

    Ok(HandlerOutput::drafted("Revised draft:", revised.trim().to_string()))
}

/// Free-form answer. The document is offered as context only when present.
pub async fn answer_general(
    state: &ConversationState,
    port: &dyn CompletionPort,
    prompts: &PromptSet,
    question: Option<&str>,
    history_window: usize,
) -> Result<HandlerOutput> {
    let last = state.last_user_text();
    let question = non_blank(question)
        .or_else(|| non_blank(Some(last.as_str())))
        .unwrap_or("-");

    let mut messages = vec![
        ChatMessage::system(&prompts.assistant),
        ChatMessage::system(&prompts.general),
    ];
    // Earlier turns only; the question itself goes last.
    let mut history = state.conversation_tail(history_window.saturating_add(1));
    history.pop();
    messages.extend(history);

    let prompt = match state.document() {
        Some(document) => format!(
            "EMAIL (optional, only if relevant):\n{}\n\nQUESTION:\n{}",
            document, question
        ),
        None => question.to_string(),
    };
    messages.push(ChatMessage::user(prompt));

    let answer = port.complete(messages).await?;
    Ok(HandlerOutput::answer(answer.trim().to_string()))
}

fn ask_marker() -> &'static Regex {
    static ASK: OnceLock<Regex> = OnceLock::new();
    ASK.get_or_init(|| Regex::new(r"(?is)^\s*ASK\s*:(.*)$").expect("ask marker pattern is valid"))
}

/// The clarifying question, if `text` opens with the ask marker.
pub fn parse_question(text: &str) -> Option<String> {
    let caps = ask_marker().captures(text)?;
    let rest = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
    let question = rest
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or(EMPTY_QUESTION);
    Some(question.to_string())
}

fn non_blank(s: Option<&str>) -> Option<&str> {
    s.map(str::trim).filter(|s| !s.is_empty())
}
