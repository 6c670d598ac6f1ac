use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use draftsmith_core::error::Result;
use draftsmith_core::state::{ConversationState, StateUpdate};
use draftsmith_core::types::*;
use draftsmith_tools::ToolRegistry;

use super::{cancellable, GraphContext, Snapshot, SnapshotStream};

/// Loop position. `cycle` counts completed agent invocations.
enum Phase {
    Agent {
        state: ConversationState,
        cycle: usize,
    },
    Tools {
        state: ConversationState,
        cycle: usize,
        request: ChatMessage,
    },
    Done,
}

/// Tool-calling loop: `agent -> (end | tools) -> agent -> ...`.
///
/// The loop is bounded by `max_tool_cycles` agent invocations. When the cap
/// is hit right after a tool cycle, the turn ends with the latest assistant
/// text instead of failing.
pub struct AgentGraph {
    ctx: Arc<GraphContext>,
    tools: Arc<ToolRegistry>,
}

impl AgentGraph {
    pub fn new(ctx: Arc<GraphContext>) -> Self {
        let tools = ToolRegistry::with_handlers().with_timeout(ctx.config.tool_timeout_secs);
        Self::with_tools(ctx, tools)
    }

    pub fn with_tools(ctx: Arc<GraphContext>, tools: ToolRegistry) -> Self {
        Self {
            ctx,
            tools: Arc::new(tools),
        }
    }

    pub fn run_turn(
        &self,
        session_id: SessionId,
        state: ConversationState,
        user_text: &str,
        cancel: CancellationToken,
    ) -> SnapshotStream {
        let ctx = self.ctx.clone();
        let tools = self.tools.clone();
        let cap = ctx.config.tool_cycle_cap();
        let start = Phase::Agent {
            state: state.with_user_message(user_text),
            cycle: 0,
        };

        stream::unfold((start, 0usize), move |(phase, step)| {
            let ctx = ctx.clone();
            let tools = tools.clone();
            let cancel = cancel.clone();
            let session_id = session_id.clone();
            async move {
                match phase {
                    Phase::Done => None,
                    Phase::Agent { state, cycle } => {
                        ctx.node_entered("agent", step);
                        let response = cancellable(&cancel, invoke_agent(&ctx, &tools, &state)).await;
                        let response = match response {
                            Ok(msg) => msg,
                            Err(e) => return Some((Err(e), (Phase::Done, step + 1))),
                        };

                        let next = state.apply(StateUpdate::message(response.clone()));
                        let cycle = cycle + 1;

                        if response.tool_uses().is_empty() {
                            info!(cycles = cycle, "Agent turn complete");
                            let snapshot = Snapshot {
                                node: "agent".into(),
                                step,
                                state: next,
                                is_final: true,
                            };
                            return Some((Ok(snapshot), (Phase::Done, step + 1)));
                        }

                        let snapshot = Snapshot {
                            node: "agent".into(),
                            step,
                            state: next.clone(),
                            is_final: false,
                        };
                        let phase = Phase::Tools {
                            state: next,
                            cycle,
                            request: response,
                        };
                        Some((Ok(snapshot), (phase, step + 1)))
                    }
                    Phase::Tools {
                        state,
                        cycle,
                        request,
                    } => {
                        ctx.node_entered("tools", step);
                        let ran = cancellable(
                            &cancel,
                            run_tools(&ctx, &tools, &session_id, state, &request),
                        )
                        .await;
                        let next = match ran {
                            Ok(next) => next,
                            Err(e) => return Some((Err(e), (Phase::Done, step + 1))),
                        };

                        if cycle >= cap {
                            warn!(cap, "Tool cycle cap reached, ending turn with latest answer");
                            let snapshot = Snapshot {
                                node: "tools".into(),
                                step,
                                state: finish_exhausted(next),
                                is_final: true,
                            };
                            return Some((Ok(snapshot), (Phase::Done, step + 1)));
                        }

                        let snapshot = Snapshot {
                            node: "tools".into(),
                            step,
                            state: next.clone(),
                            is_final: false,
                        };
                        Some((Ok(snapshot), (Phase::Agent { state: next, cycle }, step + 1)))
                    }
                }
            }
        })
        .boxed()
    }
}

/// Build the agent prompt and ask the model for its next move.
async fn invoke_agent(
    ctx: &GraphContext,
    tools: &ToolRegistry,
    state: &ConversationState,
) -> Result<ChatMessage> {
    let mut system = ctx.prompts.agent_prompt(state.flags());
    let mut context = Vec::new();
    if let Some(document) = state.document() {
        context.push(format!("EMAIL:\n{}", document));
    }
    if let Some(draft) = state.current_draft() {
        context.push(format!("DRAFT:\n{}", draft));
    }
    if !context.is_empty() {
        system.push_str("\n\nContext:\n");
        system.push_str(&context.join("\n\n"));
    }

    let mut messages = vec![ChatMessage::system(system)];
    messages.extend(state.messages.iter().cloned());

    ctx.completer
        .complete_with_tools(messages, &tools.definitions())
        .await
}

/// Execute every requested tool in order, applying each result's state
/// effects before the next tool runs, then append one tool-result message.
async fn run_tools(
    ctx: &GraphContext,
    tools: &ToolRegistry,
    session_id: &SessionId,
    mut state: ConversationState,
    request: &ChatMessage,
) -> Result<ConversationState> {
    let mut blocks = Vec::new();

    for (id, name, input) in request.tool_uses() {
        ctx.events.publish(AgentEvent::ToolStart {
            name: name.to_string(),
            input: input.clone(),
        });

        let tool_ctx = ToolContext {
            session_id: session_id.clone(),
            state: state.clone(),
            completer: ctx.completer.clone(),
            prompts: ctx.prompts.clone(),
            history_window: ctx.config.history_window,
        };

        let result = match tools.execute(name, input.clone(), tool_ctx).await {
            Ok(result) => result,
            Err(e) if e.is_completion_failure() => {
                error!(tool = %name, error = %e, "Completion failed inside tool");
                return Err(e);
            }
            Err(e) => {
                warn!(tool = %name, error = %e, "Tool call rejected");
                ToolResult::error(e.to_string())
            }
        };
        debug!(tool = %name, is_error = result.is_error, "Tool finished");

        state = state.apply(
            StateUpdate::default()
                .with_draft(result.draft.clone())
                .with_pending_clarification(result.pending_clarification),
        );
        blocks.push(ContentBlock::ToolResult {
            tool_use_id: id.to_string(),
            content: result.content.clone(),
            is_error: result.is_error,
        });

        ctx.events.publish(AgentEvent::ToolEnd {
            name: name.to_string(),
            result,
        });
    }

    Ok(state.apply(StateUpdate::message(ChatMessage::tool_results(blocks))))
}

/// Close a turn that ran out of cycles.
///
/// The latest assistant message is the answer. If it carried only tool
/// calls, its text is taken from the last successful tool output.
fn finish_exhausted(state: ConversationState) -> ConversationState {
    let latest_has_text = state
        .messages
        .iter()
        .rev()
        .find(|m| m.role == Role::Assistant)
        .is_some_and(|m| !m.text().trim().is_empty());
    if latest_has_text {
        return state;
    }

    let last_output = state
        .messages
        .last()
        .filter(|m| m.is_tool_result())
        .and_then(|m| {
            m.content.iter().rev().find_map(|b| match b {
                ContentBlock::ToolResult {
                    content,
                    is_error: false,
                    ..
                } if !content.trim().is_empty() => Some(content.clone()),
                _ => None,
            })
        });

    match last_output {
        Some(text) => state.apply(StateUpdate::message(ChatMessage::assistant_text(text))),
        None => state,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use draftsmith_core::config::AssistantConfig;
    use draftsmith_core::error::DraftsmithError;
    use draftsmith_core::event::EventBus;
    use draftsmith_core::prompts::PromptSet;
    use draftsmith_test_utils::{state_with_draft, state_with_email, ScriptedCompleter, SAMPLE_DRAFT};
    use serde_json::json;

    fn graph(port: &ScriptedCompleter, max_tool_cycles: usize) -> AgentGraph {
        let config = AssistantConfig {
            max_tool_cycles,
            tool_timeout_secs: 5,
            ..Default::default()
        };
        let ctx = GraphContext::new(
            Arc::new(port.clone()),
            PromptSet::default(),
            config,
            Arc::new(EventBus::default()),
        );
        AgentGraph::new(Arc::new(ctx))
    }

    async fn run(
        graph: &AgentGraph,
        state: ConversationState,
        text: &str,
    ) -> Vec<Result<Snapshot>> {
        graph
            .run_turn(SessionId::from_str("t"), state, text, CancellationToken::new())
            .collect()
            .await
    }

    #[tokio::test]
    async fn test_no_tool_calls_ends_immediately() {
        let port = ScriptedCompleter::new().text("Hello! Shall I draft an email for you?");
        let items = run(&graph(&port, 8), ConversationState::new(), "hi").await;

        assert_eq!(items.len(), 1);
        let last = items[0].as_ref().unwrap();
        assert!(last.is_final);
        assert_eq!(last.node, "agent");
        assert_eq!(
            last.state.messages.last().unwrap().text(),
            "Hello! Shall I draft an email for you?"
        );
        assert_eq!(port.calls()[0].tools, vec!["general", "new", "reply", "revise", "summary"]);
    }

    #[tokio::test]
    async fn test_tool_cycle_then_answer() {
        let port = ScriptedCompleter::new()
            .tool_calls(vec![("summary", json!({}))])
            .text("Kickoff next week.")
            .text("Dana wants a kickoff next week.");
        let items = run(&graph(&port, 8), state_with_email(), "summarize it").await;

        let nodes: Vec<&str> = items.iter().map(|i| i.as_ref().unwrap().node.as_str()).collect();
        assert_eq!(nodes, vec!["agent", "tools", "agent"]);

        let last = items.last().unwrap().as_ref().unwrap();
        assert!(last.is_final);
        // user, tool request, tool results, answer
        assert_eq!(last.state.messages.len(), 4);
        assert!(last.state.messages[2].is_tool_result());
        assert_eq!(last.new_assistant_text(1).last().unwrap(), "Dana wants a kickoff next week.");

        // The second agent call sees the tool result
        let second = &port.calls()[2];
        assert!(second.messages.iter().any(|m| m.is_tool_result()));
    }

    #[tokio::test]
    async fn test_tool_effects_reach_state_and_next_tool() {
        let port = ScriptedCompleter::new()
            .tool_calls(vec![
                ("new", json!({"brief": "invite Sam to lunch"})),
                ("revise", json!({"feedback": "more formal"})),
            ])
            .text("Subject: Lunch\n\nHi Sam,")
            .text("Subject: Lunch invitation\n\nDear Sam,")
            .text("Here is the formal invitation.");
        let items = run(&graph(&port, 8), ConversationState::new(), "invite Sam, formally").await;

        let last = items.last().unwrap().as_ref().unwrap();
        assert_eq!(last.state.draft.as_deref(), Some("Subject: Lunch invitation\n\nDear Sam,"));
        // revise saw the draft written by new in the same cycle
        assert!(port.calls()[2].transcript().contains("DRAFT:\nSubject: Lunch\n\nHi Sam,"));
    }

    #[tokio::test]
    async fn test_cap_exhaustion_synthesizes_from_tool_output() {
        let port = ScriptedCompleter::new()
            .tool_calls(vec![("summary", json!({}))])
            .text("Meeting moved to Thursday 10am.");
        let items = run(&graph(&port, 1), state_with_email(), "summarize it").await;

        assert_eq!(items.len(), 2);
        let last = items[1].as_ref().unwrap();
        assert!(last.is_final);
        assert_eq!(last.node, "tools");
        assert_eq!(
            last.state.messages.last().unwrap().text(),
            "Summary:\n\nMeeting moved to Thursday 10am."
        );
        assert_eq!(port.remaining(), 0);
    }

    #[tokio::test]
    async fn test_loop_terminates_within_cap() {
        let mut port = ScriptedCompleter::new();
        for _ in 0..10 {
            port = port
                .tool_calls(vec![("general", json!({"question": "again?"}))])
                .text("yes");
        }
        let items = run(&graph(&port, 3), ConversationState::new(), "loop forever").await;

        let agent_steps = items
            .iter()
            .filter(|i| i.as_ref().unwrap().node == "agent")
            .count();
        assert_eq!(agent_steps, 3);
        assert!(items.last().unwrap().as_ref().unwrap().is_final);
    }

    #[tokio::test]
    async fn test_bad_arguments_become_error_results() {
        let port = ScriptedCompleter::new()
            .tool_calls(vec![("new", json!({"subject": "x"})), ("translate", json!({}))])
            .text("Sorry, what should the email be about?");
        let items = run(&graph(&port, 8), ConversationState::new(), "write something").await;

        let last = items.last().unwrap().as_ref().unwrap();
        let results = &last.state.messages[2];
        let errors: Vec<bool> = results
            .content
            .iter()
            .map(|b| matches!(b, ContentBlock::ToolResult { is_error: true, .. }))
            .collect();
        assert_eq!(errors, vec![true, true]);
        assert!(last.state.draft.is_none());
    }

    #[tokio::test]
    async fn test_completion_failure_inside_tool_fails_turn() {
        let port = ScriptedCompleter::new()
            .tool_calls(vec![("revise", json!({"feedback": "shorter"}))])
            .fail("HTTP 503");
        let items = run(&graph(&port, 8), state_with_draft(), "shorter").await;

        let err = items.last().unwrap().as_ref().unwrap_err();
        assert!(err.is_completion_failure());
    }

    #[tokio::test]
    async fn test_reply_question_sets_flag_without_draft() {
        let port = ScriptedCompleter::new()
            .tool_calls(vec![("reply", json!({}))])
            .text("ASK: Which slots should I offer?")
            .text("Which slots should I offer?");
        let items = run(&graph(&port, 8), state_with_email(), "answer Dana").await;
        let last = items.last().unwrap().as_ref().unwrap();
        assert!(last.state.pending_clarification);
        assert!(last.state.draft.is_none());

        let port = ScriptedCompleter::new()
            .tool_calls(vec![("reply", json!({}))])
            .text(SAMPLE_DRAFT)
            .text("Here is the reply.");
        let items = run(&graph(&port, 8), last.state.clone(), "Tuesday 10 or Thursday 14").await;
        let last = items.last().unwrap().as_ref().unwrap();
        assert!(!last.state.pending_clarification);
        assert_eq!(last.state.draft.as_deref(), Some(SAMPLE_DRAFT));
        assert!(port.calls()[0].system_text().contains("awaiting_answer=true"));
    }

    #[tokio::test]
    async fn test_cancel_mid_turn() {
        let port = ScriptedCompleter::new()
            .tool_calls(vec![("summary", json!({}))])
            .hang();
        let cancel = CancellationToken::new();
        let mut stream = graph(&port, 8).run_turn(
            SessionId::from_str("t"),
            state_with_email(),
            "summarize it",
            cancel.clone(),
        );

        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.node, "agent");
        cancel.cancel();
        assert!(matches!(stream.next().await, Some(Err(DraftsmithError::Cancelled))));
        assert!(stream.next().await.is_none());
    }

    #[test]
    fn test_finish_exhausted_keeps_existing_text() {
        let state = ConversationState::new()
            .with_user_message("x")
            .apply(StateUpdate::message(ChatMessage::assistant_text("partial answer")));
        let done = finish_exhausted(state.clone());
        assert_eq!(done.messages.len(), state.messages.len());
    }
}
