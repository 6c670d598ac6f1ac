//! Turn execution graphs.
//!
//! Both variants run one user turn over a [`ConversationState`] and expose
//! the turn as a lazy stream of [`Snapshot`]s, one per node transition. The
//! last item is either a snapshot with `is_final` set, which carries the
//! authoritative state, or an error, after which the stream ends.

pub mod agent;
pub mod routing;

use std::future::Future;
use std::sync::Arc;

use futures::stream::BoxStream;
use tokio_util::sync::CancellationToken;

use draftsmith_core::config::AssistantConfig;
use draftsmith_core::error::{DraftsmithError, Result};
use draftsmith_core::event::EventBus;
use draftsmith_core::prompts::PromptSet;
use draftsmith_core::state::ConversationState;
use draftsmith_core::traits::CompletionPort;
use draftsmith_core::types::AgentEvent;

pub use agent::AgentGraph;
pub use routing::RoutingGraph;

/// State after one node ran.
#[derive(Debug, Clone)]
pub struct Snapshot {
    /// Node that produced this state (`router`, a route kind, `agent`, `tools`).
    pub node: String,
    /// Zero-based position of this snapshot within the turn.
    pub step: usize,
    pub state: ConversationState,
    pub is_final: bool,
}

impl Snapshot {
    /// Assistant text appended after the first `since` messages.
    pub fn new_assistant_text(&self, since: usize) -> Vec<String> {
        self.state.assistant_text_since(since)
    }
}

pub type SnapshotStream = BoxStream<'static, Result<Snapshot>>;

/// Collaborators shared by every node of a graph.
pub struct GraphContext {
    pub completer: Arc<dyn CompletionPort>,
    pub prompts: Arc<PromptSet>,
    pub config: AssistantConfig,
    pub events: Arc<EventBus>,
}

impl GraphContext {
    pub fn new(
        completer: Arc<dyn CompletionPort>,
        prompts: PromptSet,
        config: AssistantConfig,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            completer,
            prompts: Arc::new(prompts),
            config,
            events,
        }
    }

    pub(crate) fn node_entered(&self, node: &str, step: usize) {
        self.events.publish(AgentEvent::NodeEntered {
            node: node.to_string(),
            step,
        });
    }
}

/// Run `fut` unless the turn is cancelled first.
pub(crate) async fn cancellable<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(DraftsmithError::Cancelled),
        result = fut => result,
    }
}
