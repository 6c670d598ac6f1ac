use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use draftsmith_core::config::Variant;
use draftsmith_core::state::ConversationState;
use draftsmith_core::types::SessionId;

use crate::graph::{AgentGraph, GraphContext, RoutingGraph, SnapshotStream};

/// The graph that drives every turn, chosen from `[assistant] variant`.
pub enum Orchestrator {
    Routing(RoutingGraph),
    Agent(AgentGraph),
}

impl Orchestrator {
    pub fn new(ctx: Arc<GraphContext>) -> Self {
        let variant = ctx.config.variant;
        info!(?variant, "Building orchestrator");
        match variant {
            Variant::Routing => Self::Routing(RoutingGraph::new(ctx)),
            Variant::Agent => Self::Agent(AgentGraph::new(ctx)),
        }
    }

    pub fn variant(&self) -> Variant {
        match self {
            Self::Routing(_) => Variant::Routing,
            Self::Agent(_) => Variant::Agent,
        }
    }

    /// Run one user turn as a lazy snapshot stream.
    pub fn run_turn(
        &self,
        session_id: SessionId,
        state: ConversationState,
        user_text: &str,
        cancel: CancellationToken,
    ) -> SnapshotStream {
        match self {
            Self::Routing(graph) => graph.run_turn(state, user_text, cancel),
            Self::Agent(graph) => graph.run_turn(session_id, state, user_text, cancel),
        }
    }
}
