//! Intent classification.
//!
//! The router never fails: any error or timeout degrades to the general
//! route, and routes whose preconditions are unmet are downgraded too.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use draftsmith_core::prompts::{ContextFlags, PromptSet};
use draftsmith_core::state::{ConversationState, RouteDecision, RouteKind};
use draftsmith_core::traits::{complete_as, CompletionPort};
use draftsmith_core::types::ChatMessage;

pub struct Router {
    completer: Arc<dyn CompletionPort>,
    prompts: Arc<PromptSet>,
    timeout: Duration,
    history_window: usize,
}

impl Router {
    pub fn new(
        completer: Arc<dyn CompletionPort>,
        prompts: Arc<PromptSet>,
        timeout_secs: u64,
        history_window: usize,
    ) -> Self {
        Self {
            completer,
            prompts,
            timeout: Duration::from_secs(timeout_secs),
            history_window,
        }
    }

    /// Decide which handler serves the latest user turn.
    pub async fn classify(&self, state: &ConversationState) -> RouteDecision {
        let flags = state.flags();

        let mut messages = vec![ChatMessage::system(self.prompts.router_prompt(flags))];
        messages.extend(state.conversation_tail(self.history_window));

        let request = complete_as::<RouteDecision>(&*self.completer, messages);
        let decision = match tokio::time::timeout(self.timeout, request).await {
            Ok(Ok(decision)) => decision,
            Ok(Err(e)) => {
                warn!(error = %e, "Route classification failed, using fallback");
                return RouteDecision::fallback();
            }
            Err(_) => {
                warn!(
                    timeout_secs = self.timeout.as_secs(),
                    "Route classification timed out, using fallback"
                );
                return RouteDecision::fallback();
            }
        };

        let decision = enforce_preconditions(decision, flags);
        debug!(route = %decision.kind, rationale = %decision.rationale, "Route decided");
        decision
    }
}

/// Downgrade routes whose required context is missing.
pub fn enforce_preconditions(decision: RouteDecision, flags: ContextFlags) -> RouteDecision {
    if decision.kind.requires_document() && !flags.has_document {
        return RouteDecision::new(RouteKind::General, "disallowed without document");
    }
    if decision.kind.requires_draft() && !flags.has_draft {
        return RouteDecision::new(RouteKind::General, "disallowed without draft");
    }
    decision
}
