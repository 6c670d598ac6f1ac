//! Conversation state threaded through every turn.
//!
//! The state is a plain value: nodes receive a borrowed snapshot and return a
//! [`StateUpdate`], and [`ConversationState::apply`] produces the next
//! snapshot without touching the previous one. Messages are append-only.

use serde::{Deserialize, Serialize};

use crate::prompts::ContextFlags;
use crate::traits::StructuredOutput;
use crate::types::{ChatMessage, Role};

/// The handler selected for a turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteKind {
    #[default]
    General,
    Summary,
    Reply,
    New,
    Revise,
}

impl RouteKind {
    pub const ALL: [RouteKind; 5] = [
        RouteKind::General,
        RouteKind::Summary,
        RouteKind::Reply,
        RouteKind::New,
        RouteKind::Revise,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::General => "general",
            Self::Summary => "summary",
            Self::Reply => "reply",
            Self::New => "new",
            Self::Revise => "revise",
        }
    }

    /// Routes that only make sense with a source document.
    pub fn requires_document(&self) -> bool {
        matches!(self, Self::Summary | Self::Reply)
    }

    /// Routes that only make sense with a working draft.
    pub fn requires_draft(&self) -> bool {
        matches!(self, Self::Revise)
    }
}

impl std::fmt::Display for RouteKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Router output for the current turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteDecision {
    #[serde(alias = "type")]
    pub kind: RouteKind,
    #[serde(default, alias = "logic")]
    pub rationale: String,
}

impl RouteDecision {
    pub fn new(kind: RouteKind, rationale: impl Into<String>) -> Self {
        Self {
            kind,
            rationale: rationale.into(),
        }
    }

    /// The decision used whenever classification cannot be completed.
    pub fn fallback() -> Self {
        Self::new(RouteKind::General, "fallback")
    }
}

impl StructuredOutput for RouteDecision {
    fn schema() -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "kind": {
                    "type": "string",
                    "enum": RouteKind::ALL.iter().map(|k| k.as_str()).collect::<Vec<_>>()
                },
                "rationale": {
                    "type": "string",
                    "description": "One sentence explaining the choice"
                }
            },
            "required": ["kind", "rationale"]
        })
    }
}

/// Partial update returned by a graph node.
#[derive(Debug, Clone, Default)]
pub struct StateUpdate {
    pub messages: Vec<ChatMessage>,
    pub draft: Option<String>,
    pub route: Option<RouteDecision>,
    pub pending_clarification: Option<bool>,
}

impl StateUpdate {
    pub fn message(msg: ChatMessage) -> Self {
        Self {
            messages: vec![msg],
            ..Default::default()
        }
    }

    pub fn route(decision: RouteDecision) -> Self {
        Self {
            route: Some(decision),
            ..Default::default()
        }
    }

    pub fn with_draft(mut self, draft: Option<String>) -> Self {
        self.draft = draft;
        self
    }

    pub fn with_pending_clarification(mut self, pending: Option<bool>) -> Self {
        self.pending_clarification = pending;
        self
    }
}

/// The mutable record of one session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationState {
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub uploaded_document: Option<String>,
    #[serde(default)]
    pub draft: Option<String>,
    #[serde(default)]
    pub route: Option<RouteDecision>,
    /// Set when the reply handler asked a clarifying question that the user
    /// has not answered yet.
    #[serde(default)]
    pub pending_clarification: bool,
}

impl ConversationState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a session around a source document. Blank input means no document.
    pub fn with_document(text: &str) -> Self {
        let mut state = Self::new();
        state.uploaded_document = non_blank(sanitize(text));
        state
    }

    /// Replace the source document. Blank input removes it.
    pub fn set_document(&mut self, text: &str) {
        self.uploaded_document = non_blank(sanitize(text));
    }

    pub fn has_document(&self) -> bool {
        is_present(&self.uploaded_document)
    }

    pub fn has_draft(&self) -> bool {
        is_present(&self.draft)
    }

    /// Context flags for routing and agent instructions.
    pub fn flags(&self) -> ContextFlags {
        ContextFlags {
            has_document: self.has_document(),
            has_draft: self.has_draft(),
            awaiting_answer: self.pending_clarification,
        }
    }

    pub fn document(&self) -> Option<&str> {
        self.uploaded_document
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    pub fn current_draft(&self) -> Option<&str> {
        self.draft.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }

    /// Copy of this state with a new user turn appended.
    pub fn with_user_message(&self, text: &str) -> Self {
        let mut next = self.clone();
        next.messages.push(ChatMessage::user(text));
        next
    }

    /// Merge a node's update into a new snapshot.
    ///
    /// Drafts are only replaced by non-blank text; messages are appended in
    /// the order given.
    pub fn apply(&self, update: StateUpdate) -> Self {
        let mut next = self.clone();
        next.messages.extend(update.messages);
        if let Some(draft) = update.draft.and_then(non_blank) {
            next.draft = Some(draft);
        }
        if let Some(route) = update.route {
            next.route = Some(route);
        }
        if let Some(pending) = update.pending_clarification {
            next.pending_clarification = pending;
        }
        next
    }

    /// Drop the turn-scoped route decision.
    pub fn clear_route(&mut self) {
        self.route = None;
    }

    /// Text of the most recent genuine user turn (tool-result carriers skipped).
    pub fn last_user_text(&self) -> String {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User && !m.is_tool_result())
            .map(|m| m.text().trim().to_string())
            .unwrap_or_default()
    }

    /// The last `n` user/assistant text turns, with tool traffic removed.
    pub fn conversation_tail(&self, n: usize) -> Vec<ChatMessage> {
        let turns: Vec<ChatMessage> = self
            .messages
            .iter()
            .filter(|m| !m.is_tool_result())
            .filter_map(|m| {
                let text = m.text();
                if text.trim().is_empty() {
                    None
                } else {
                    Some(ChatMessage {
                        role: m.role.clone(),
                        content: vec![crate::types::ContentBlock::Text { text }],
                        timestamp: m.timestamp,
                    })
                }
            })
            .collect();
        let skip = turns.len().saturating_sub(n);
        turns.into_iter().skip(skip).collect()
    }

    /// Assistant text appended after the first `since` messages.
    pub fn assistant_text_since(&self, since: usize) -> Vec<String> {
        self.messages
            .iter()
            .skip(since)
            .filter(|m| m.role == Role::Assistant)
            .map(|m| m.text())
            .filter(|t| !t.trim().is_empty())
            .collect()
    }
}

/// Normalise pasted email text: unify line endings, strip zero-width marks, trim.
pub fn sanitize(text: &str) -> String {
    text.replace("\r\n", "\n")
        .replace('\r', "\n")
        .replace(['\u{200b}', '\u{200e}', '\u{200f}'], "")
        .trim()
        .to_string()
}

fn is_present(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|s| !s.trim().is_empty())
}

fn non_blank(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ContentBlock;

    #[test]
    fn test_blank_document_is_absent() {
        let state = ConversationState::with_document("   \n\t ");
        assert!(!state.has_document());
        assert!(state.uploaded_document.is_none());

        let state = ConversationState::with_document("Meeting moved to Thursday 10am");
        assert!(state.has_document());
        assert_eq!(state.document(), Some("Meeting moved to Thursday 10am"));
    }

    #[test]
    fn test_set_document_and_flags() {
        let mut state = ConversationState::new();
        state.set_document("Hi\r\nthere");
        assert_eq!(state.document(), Some("Hi\nthere"));
        assert!(state.flags().has_document);
        assert!(!state.flags().has_draft);

        state.set_document("  ");
        assert!(!state.has_document());
    }

    #[test]
    fn test_apply_is_copy_on_append() {
        let s0 = ConversationState::new().with_user_message("hello");
        let s1 = s0.apply(StateUpdate::message(ChatMessage::assistant_text("hi there")));

        assert_eq!(s0.messages.len(), 1);
        assert_eq!(s1.messages.len(), 2);
        assert_eq!(s1.messages[0].text(), "hello");
        assert_eq!(s1.messages[1].text(), "hi there");
    }

    #[test]
    fn test_apply_ignores_blank_draft() {
        let mut s0 = ConversationState::new();
        s0.draft = Some("Subject: X".into());

        let s1 = s0.apply(StateUpdate::default().with_draft(Some("  ".into())));
        assert_eq!(s1.draft.as_deref(), Some("Subject: X"));

        let s2 = s0.apply(StateUpdate::default().with_draft(Some("Subject: Y".into())));
        assert_eq!(s2.draft.as_deref(), Some("Subject: Y"));
    }

    #[test]
    fn test_apply_route_and_flag() {
        let s0 = ConversationState::new();
        let s1 = s0.apply(
            StateUpdate::route(RouteDecision::new(RouteKind::New, "wants a new mail"))
                .with_pending_clarification(Some(true)),
        );
        assert_eq!(s1.route.as_ref().map(|r| r.kind), Some(RouteKind::New));
        assert!(s1.pending_clarification);
        assert!(s0.route.is_none());

        let mut s2 = s1.apply(StateUpdate::default());
        assert!(s2.pending_clarification);
        s2.clear_route();
        assert!(s2.route.is_none());
    }

    #[test]
    fn test_last_user_text_skips_tool_results() {
        let state = ConversationState::new()
            .with_user_message("make it shorter")
            .apply(StateUpdate::message(ChatMessage::tool_results(vec![
                ContentBlock::ToolResult {
                    tool_use_id: "c1".into(),
                    content: "ok".into(),
                    is_error: false,
                },
            ])));
        assert_eq!(state.last_user_text(), "make it shorter");
        assert_eq!(ConversationState::new().last_user_text(), "");
    }

    #[test]
    fn test_conversation_tail_window() {
        let mut state = ConversationState::new();
        for i in 0..5 {
            state = state
                .with_user_message(&format!("q{i}"))
                .apply(StateUpdate::message(ChatMessage::assistant_text(format!("a{i}"))));
        }
        let tail = state.conversation_tail(3);
        let texts: Vec<String> = tail.iter().map(|m| m.text()).collect();
        assert_eq!(texts, vec!["a3", "q4", "a4"]);
    }

    #[test]
    fn test_assistant_text_since() {
        let s0 = ConversationState::new().with_user_message("hi");
        let prev = s0.messages.len();
        let s1 = s0.apply(StateUpdate::message(ChatMessage::assistant_text("hello")));
        assert_eq!(s1.assistant_text_since(prev), vec!["hello".to_string()]);
        assert!(s0.assistant_text_since(prev).is_empty());
    }

    #[test]
    fn test_route_decision_accepts_aliases() {
        let d: RouteDecision =
            serde_json::from_str(r#"{"type": "reply", "logic": "answer the mail"}"#).unwrap();
        assert_eq!(d.kind, RouteKind::Reply);
        assert_eq!(d.rationale, "answer the mail");

        let d: RouteDecision = serde_json::from_str(r#"{"kind": "revise"}"#).unwrap();
        assert_eq!(d.kind, RouteKind::Revise);
        assert!(d.rationale.is_empty());

        assert!(serde_json::from_str::<RouteDecision>(r#"{"kind": "translate"}"#).is_err());
    }

    #[test]
    fn test_route_schema_lists_every_kind() {
        let schema = RouteDecision::schema();
        let kinds = schema["properties"]["kind"]["enum"].as_array().unwrap();
        assert_eq!(kinds.len(), 5);
        assert!(kinds.contains(&serde_json::json!("revise")));
    }

    #[test]
    fn test_route_preconditions() {
        assert!(RouteKind::Summary.requires_document());
        assert!(RouteKind::Reply.requires_document());
        assert!(RouteKind::Revise.requires_draft());
        assert!(!RouteKind::New.requires_document());
        assert!(!RouteKind::General.requires_draft());
    }

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("  a\r\nb\rc\u{200b}  "), "a\nb\nc");
    }
}
