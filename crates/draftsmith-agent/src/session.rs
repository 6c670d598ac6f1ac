use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use futures::stream::{self, StreamExt};
use tokio::sync::OwnedMutexGuard;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use draftsmith_core::error::{DraftsmithError, Result};
use draftsmith_core::event::EventBus;
use draftsmith_core::state::ConversationState;
use draftsmith_core::types::{AgentEvent, SessionId};

use crate::graph::{Snapshot, SnapshotStream};
use crate::orchestrator::Orchestrator;

/// Opaque reference to one session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionHandle {
    id: SessionId,
}

impl SessionHandle {
    pub fn id(&self) -> &SessionId {
        &self.id
    }
}

struct SessionSlot {
    state: Arc<tokio::sync::Mutex<ConversationState>>,
    /// Parent of every turn token; replaced after each cancel.
    cancel: Mutex<CancellationToken>,
}

impl SessionSlot {
    fn new() -> Self {
        Self {
            state: Arc::new(tokio::sync::Mutex::new(ConversationState::new())),
            cancel: Mutex::new(CancellationToken::new()),
        }
    }

    fn turn_token(&self) -> CancellationToken {
        self.cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .child_token()
    }

    fn cancel_all(&self) {
        let mut token = self.cancel.lock().unwrap_or_else(PoisonError::into_inner);
        token.cancel();
        *token = CancellationToken::new();
    }
}

/// Isolated sessions over one shared orchestrator.
///
/// A turn holds its session's state lock from its first poll until it ends,
/// so turns of one session run strictly one after another. Only a turn's
/// final snapshot is written back; errors, cancellation and dropped streams
/// leave the previous state in place.
pub struct SessionManager {
    orchestrator: Arc<Orchestrator>,
    events: Arc<EventBus>,
    sessions: Mutex<HashMap<SessionId, Arc<SessionSlot>>>,
}

enum TurnPhase {
    Waiting {
        slot: Arc<SessionSlot>,
        text: String,
    },
    Running {
        guard: OwnedMutexGuard<ConversationState>,
        inner: SnapshotStream,
        steps: usize,
    },
    Done,
}

impl SessionManager {
    pub fn new(orchestrator: Orchestrator, events: Arc<EventBus>) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
            events,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Create an empty session.
    pub fn start_session(&self) -> SessionHandle {
        let id = SessionId::new();
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.clone(), Arc::new(SessionSlot::new()));
        info!(session = %id, "Session started");
        SessionHandle { id }
    }

    fn slot(&self, handle: &SessionHandle) -> Result<Arc<SessionSlot>> {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&handle.id)
            .cloned()
            .ok_or_else(|| DraftsmithError::SessionNotFound(handle.id.to_string()))
    }

    /// Replace the source document. Waits for a running turn to finish.
    pub async fn set_uploaded_document(&self, handle: &SessionHandle, text: &str) -> Result<()> {
        let slot = self.slot(handle)?;
        let mut state = slot.state.lock().await;
        state.set_document(text);
        info!(session = %handle.id, has_document = state.has_document(), "Document set");
        Ok(())
    }

    /// Current committed state.
    pub async fn state(&self, handle: &SessionHandle) -> Result<ConversationState> {
        let slot = self.slot(handle)?;
        let state = slot.state.lock().await;
        Ok(state.clone())
    }

    /// Cancel the running turn and any queued turns of this session.
    pub fn cancel_turn(&self, handle: &SessionHandle) -> Result<()> {
        self.slot(handle)?.cancel_all();
        info!(session = %handle.id, "Turn cancelled");
        Ok(())
    }

    /// Drop all conversation state, cancelling any running turn first.
    pub async fn reset_session(&self, handle: &SessionHandle) -> Result<()> {
        let slot = self.slot(handle)?;
        slot.cancel_all();
        let mut state = slot.state.lock().await;
        *state = ConversationState::new();
        info!(session = %handle.id, "Session reset");
        Ok(())
    }

    /// Run one user turn. Nothing happens until the stream is polled.
    pub fn submit_turn(&self, handle: &SessionHandle, text: &str) -> Result<SnapshotStream> {
        let slot = self.slot(handle)?;
        let cancel = slot.turn_token();
        let orchestrator = self.orchestrator.clone();
        let events = self.events.clone();
        let session_id = handle.id.clone();
        let start = TurnPhase::Waiting {
            slot,
            text: text.to_string(),
        };

        let turn = stream::unfold(start, move |phase| {
            let orchestrator = orchestrator.clone();
            let events = events.clone();
            let session_id = session_id.clone();
            let cancel = cancel.clone();
            async move {
                let (mut guard, mut inner, steps) = match phase {
                    TurnPhase::Done => return None,
                    TurnPhase::Waiting { slot, text } => {
                        let guard = tokio::select! {
                            biased;
                            _ = cancel.cancelled() => {
                                events.publish(AgentEvent::TurnError {
                                    session_id,
                                    error: DraftsmithError::Cancelled.to_string(),
                                });
                                return Some((Err(DraftsmithError::Cancelled), TurnPhase::Done));
                            }
                            guard = slot.state.clone().lock_owned() => guard,
                        };
                        events.publish(AgentEvent::TurnStarted {
                            session_id: session_id.clone(),
                        });
                        let inner = orchestrator.run_turn(
                            session_id.clone(),
                            (*guard).clone(),
                            &text,
                            cancel.clone(),
                        );
                        (guard, inner, 0)
                    }
                    TurnPhase::Running {
                        guard,
                        inner,
                        steps,
                    } => (guard, inner, steps),
                };

                match inner.next().await {
                    Some(Ok(snapshot)) if snapshot.is_final => {
                        *guard = commit(&snapshot);
                        events.publish(AgentEvent::TurnComplete {
                            session_id,
                            steps: steps + 1,
                        });
                        Some((Ok(snapshot), TurnPhase::Done))
                    }
                    Some(Ok(snapshot)) => Some((
                        Ok(snapshot),
                        TurnPhase::Running {
                            guard,
                            inner,
                            steps: steps + 1,
                        },
                    )),
                    Some(Err(e)) => {
                        warn!(session = %session_id, error = %e, "Turn failed, state unchanged");
                        events.publish(AgentEvent::TurnError {
                            session_id,
                            error: e.to_string(),
                        });
                        Some((Err(e), TurnPhase::Done))
                    }
                    None => None,
                }
            }
        });

        Ok(turn.boxed())
    }
}

fn commit(snapshot: &Snapshot) -> ConversationState {
    let mut state = snapshot.state.clone();
    state.clear_route();
    state
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::graph::GraphContext;
    use draftsmith_core::config::{AssistantConfig, Variant};
    use draftsmith_core::prompts::PromptSet;
    use draftsmith_core::state::RouteKind;
    use draftsmith_test_utils::{ScriptedCompleter, SAMPLE_EMAIL};

    fn manager(port: &ScriptedCompleter) -> SessionManager {
        let events = Arc::new(EventBus::default());
        let config = AssistantConfig {
            variant: Variant::Routing,
            ..Default::default()
        };
        let ctx = GraphContext::new(Arc::new(port.clone()), PromptSet::default(), config, events.clone());
        SessionManager::new(Orchestrator::new(Arc::new(ctx)), events)
    }

    async fn drain(stream: SnapshotStream) -> Vec<Result<Snapshot>> {
        stream.collect().await
    }

    #[tokio::test]
    async fn test_turn_commits_final_state() {
        let port = ScriptedCompleter::new()
            .route(RouteKind::Summary, "summary")
            .text("Kickoff next week.");
        let mgr = manager(&port);
        let session = mgr.start_session();
        mgr.set_uploaded_document(&session, SAMPLE_EMAIL).await.unwrap();

        let items = drain(mgr.submit_turn(&session, "summarize it").unwrap()).await;
        assert!(items.iter().all(|i| i.is_ok()));

        let state = mgr.state(&session).await.unwrap();
        assert_eq!(state.messages.len(), 2);
        assert!(state.route.is_none());
        assert!(state.draft.is_none());
    }

    #[tokio::test]
    async fn test_failed_turn_keeps_prior_state() {
        let port = ScriptedCompleter::new()
            .route(RouteKind::General, "chat")
            .fail("HTTP 429 Too Many Requests");
        let mgr = manager(&port);
        let session = mgr.start_session();

        let items = drain(mgr.submit_turn(&session, "hello").unwrap()).await;
        assert!(items.last().unwrap().is_err());
        assert!(mgr.state(&session).await.unwrap().messages.is_empty());
    }

    #[tokio::test]
    async fn test_sessions_are_isolated() {
        let port = ScriptedCompleter::new()
            .route(RouteKind::General, "chat")
            .text("Hi!");
        let mgr = manager(&port);
        let a = mgr.start_session();
        let b = mgr.start_session();
        mgr.set_uploaded_document(&a, SAMPLE_EMAIL).await.unwrap();

        drain(mgr.submit_turn(&a, "hello").unwrap()).await;
        let b_state = mgr.state(&b).await.unwrap();
        assert!(b_state.messages.is_empty());
        assert!(!b_state.has_document());
    }

    #[tokio::test]
    async fn test_unknown_session() {
        let port = ScriptedCompleter::new();
        let mgr = manager(&port);
        let other = manager(&port).start_session();
        assert!(matches!(
            mgr.submit_turn(&other, "hi"),
            Err(DraftsmithError::SessionNotFound(_))
        ));
        assert!(mgr.state(&other).await.is_err());
    }

    #[tokio::test]
    async fn test_reset_clears_everything() {
        let port = ScriptedCompleter::new()
            .route(RouteKind::New, "new")
            .text("Subject: Lunch\n\nHi Sam,");
        let mgr = manager(&port);
        let session = mgr.start_session();
        mgr.set_uploaded_document(&session, SAMPLE_EMAIL).await.unwrap();
        drain(mgr.submit_turn(&session, "invite Sam to lunch").unwrap()).await;
        assert!(mgr.state(&session).await.unwrap().has_draft());

        mgr.reset_session(&session).await.unwrap();
        let state = mgr.state(&session).await.unwrap();
        assert!(state.messages.is_empty());
        assert!(!state.has_draft());
        assert!(!state.has_document());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_discards_partial_turn() {
        let port = ScriptedCompleter::new()
            .route(RouteKind::General, "chat")
            .delayed_text(Duration::from_secs(60), "too late");
        let mgr = Arc::new(manager(&port));
        let session = mgr.start_session();

        let mut stream = mgr.submit_turn(&session, "hello").unwrap();
        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.node, "router");

        mgr.cancel_turn(&session).unwrap();
        assert!(matches!(stream.next().await, Some(Err(DraftsmithError::Cancelled))));
        drop(stream);

        assert!(mgr.state(&session).await.unwrap().messages.is_empty());
        // The handler never started
        assert_eq!(port.remaining(), 1);
    }

    #[tokio::test]
    async fn test_turn_after_cancel_runs() {
        let port = ScriptedCompleter::new()
            .route(RouteKind::General, "chat")
            .text("Hi!");
        let mgr = manager(&port);
        let session = mgr.start_session();
        mgr.cancel_turn(&session).unwrap();

        let items = drain(mgr.submit_turn(&session, "hello").unwrap()).await;
        assert!(items.last().unwrap().is_ok());
        assert_eq!(mgr.state(&session).await.unwrap().messages.len(), 2);
    }

    #[tokio::test]
    async fn test_turns_serialize_per_session() {
        let port = ScriptedCompleter::new()
            .route(RouteKind::General, "chat")
            .text("first answer")
            .route(RouteKind::General, "chat")
            .text("second answer");
        let mgr = manager(&port);
        let session = mgr.start_session();

        let first = mgr.submit_turn(&session, "one").unwrap();
        let second = mgr.submit_turn(&session, "two").unwrap();
        let (a, b) = tokio::join!(drain(first), drain(second));
        assert!(a.last().unwrap().is_ok());
        assert!(b.last().unwrap().is_ok());

        let state = mgr.state(&session).await.unwrap();
        let texts: Vec<String> = state.messages.iter().map(|m| m.text()).collect();
        assert_eq!(texts.len(), 4);
        // Each turn saw the other's committed messages, never interleaved
        assert_eq!(texts[0], "one");
        assert_eq!(texts[1], "first answer");
        assert_eq!(texts[2], "two");
        assert_eq!(texts[3], "second answer");
    }

    #[tokio::test]
    async fn test_turn_events() {
        let port = ScriptedCompleter::new()
            .route(RouteKind::General, "chat")
            .text("Hi!");
        let mgr = manager(&port);
        let mut rx = mgr.events().subscribe();
        let session = mgr.start_session();
        drain(mgr.submit_turn(&session, "hello").unwrap()).await;

        let mut started = false;
        let mut completed = None;
        while let Ok(event) = rx.try_recv() {
            match event {
                AgentEvent::TurnStarted { .. } => started = true,
                AgentEvent::TurnComplete { steps, .. } => completed = Some(steps),
                _ => {}
            }
        }
        assert!(started);
        assert_eq!(completed, Some(2));
    }
}
