use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use draftsmith_core::error::Result;
use draftsmith_core::state::{ConversationState, RouteKind, StateUpdate};
use draftsmith_core::types::AgentEvent;
use draftsmith_tools::handlers::{self, HandlerOutput};

use super::{cancellable, GraphContext, Snapshot, SnapshotStream};
use crate::router::Router;

enum Phase {
    Route(ConversationState),
    Dispatch(ConversationState),
    Done,
}

/// Classify once, then dispatch to exactly one handler.
///
/// `router -> {summary | reply | new | revise | general} -> end`
pub struct RoutingGraph {
    ctx: Arc<GraphContext>,
    router: Arc<Router>,
}

impl RoutingGraph {
    pub fn new(ctx: Arc<GraphContext>) -> Self {
        let router = Router::new(
            ctx.completer.clone(),
            ctx.prompts.clone(),
            ctx.config.router_timeout_secs,
            ctx.config.history_window,
        );
        Self {
            ctx,
            router: Arc::new(router),
        }
    }

    pub fn run_turn(
        &self,
        state: ConversationState,
        user_text: &str,
        cancel: CancellationToken,
    ) -> SnapshotStream {
        let ctx = self.ctx.clone();
        let router = self.router.clone();
        let start = Phase::Route(state.with_user_message(user_text));

        stream::unfold(start, move |phase| {
            let ctx = ctx.clone();
            let router = router.clone();
            let cancel = cancel.clone();
            async move {
                match phase {
                    Phase::Done => None,
                    Phase::Route(state) => {
                        ctx.node_entered("router", 0);
                        let decision = cancellable(&cancel, async {
                            Ok(router.classify(&state).await)
                        })
                        .await;
                        let decision = match decision {
                            Ok(d) => d,
                            Err(e) => return Some((Err(e), Phase::Done)),
                        };
                        ctx.events.publish(AgentEvent::RouteDecided {
                            decision: decision.clone(),
                        });
                        let next = state.apply(StateUpdate::route(decision));
                        let snapshot = Snapshot {
                            node: "router".into(),
                            step: 0,
                            state: next.clone(),
                            is_final: false,
                        };
                        Some((Ok(snapshot), Phase::Dispatch(next)))
                    }
                    Phase::Dispatch(state) => {
                        // A missing route means the router was skipped; answer generally.
                        let kind = state.route.as_ref().map(|r| r.kind).unwrap_or_default();
                        ctx.node_entered(kind.as_str(), 1);

                        let output = cancellable(&cancel, dispatch(&ctx, kind, &state)).await;
                        let output = match output {
                            Ok(out) => out,
                            Err(e) => return Some((Err(e), Phase::Done)),
                        };

                        let mut next = state.apply(output.into_update());
                        next.clear_route();
                        info!(route = %kind, messages = next.messages.len(), "Turn complete");
                        let snapshot = Snapshot {
                            node: kind.as_str().into(),
                            step: 1,
                            state: next,
                            is_final: true,
                        };
                        Some((Ok(snapshot), Phase::Done))
                    }
                }
            }
        })
        .boxed()
    }
}

async fn dispatch(
    ctx: &GraphContext,
    kind: RouteKind,
    state: &ConversationState,
) -> Result<HandlerOutput> {
    debug!(route = %kind, "Dispatching handler");
    let port = &*ctx.completer;
    let prompts = &ctx.prompts;
    let window = ctx.config.history_window;
    match kind {
        RouteKind::Summary => handlers::summarize(state, port, prompts).await,
        RouteKind::Reply => handlers::reply(state, port, prompts, None, None, window).await,
        RouteKind::New => handlers::compose_new(state, port, prompts, None).await,
        RouteKind::Revise => handlers::revise(state, port, prompts, None).await,
        RouteKind::General => handlers::answer_general(state, port, prompts, None, window).await,
    }
}
