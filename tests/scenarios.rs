//! End-to-end turns through the session manager with a scripted completion service.

use std::sync::Arc;

use futures::StreamExt;
use serde_json::json;

use draftsmith_agent::{GraphContext, Orchestrator, SessionHandle, SessionManager, Snapshot};
use draftsmith_core::config::Variant;
use draftsmith_core::error::Result;
use draftsmith_core::event::EventBus;
use draftsmith_core::state::RouteKind;
use draftsmith_core::types::{AgentEvent, Role};
use draftsmith_test_utils::{test_config, ScriptedCompleter, SAMPLE_DRAFT, SAMPLE_EMAIL};

fn manager(port: &ScriptedCompleter, variant: Variant) -> SessionManager {
    let config = test_config(variant);
    let events = Arc::new(EventBus::default());
    let ctx = GraphContext::new(
        Arc::new(port.clone()),
        config.prompts,
        config.assistant,
        events.clone(),
    );
    SessionManager::new(Orchestrator::new(Arc::new(ctx)), events)
}

async fn turn(mgr: &SessionManager, session: &SessionHandle, text: &str) -> Vec<Result<Snapshot>> {
    mgr.submit_turn(session, text).unwrap().collect().await
}

fn final_snapshot(items: &[Result<Snapshot>]) -> &Snapshot {
    let last = items.last().expect("at least one item").as_ref().expect("turn succeeded");
    assert!(last.is_final);
    last
}

#[tokio::test]
async fn summarize_uploaded_document() {
    let port = ScriptedCompleter::new()
        .route(RouteKind::Summary, "user asks for a summary")
        .text("Meeting moved to Thursday 10am.");
    let mgr = manager(&port, Variant::Routing);
    let session = mgr.start_session();
    mgr.set_uploaded_document(&session, "Meeting moved to Thursday 10am")
        .await
        .unwrap();

    let items = turn(&mgr, &session, "summarize it").await;
    let nodes: Vec<&str> = items.iter().map(|i| i.as_ref().unwrap().node.as_str()).collect();
    assert_eq!(nodes, vec!["router", "summary"]);

    let state = mgr.state(&session).await.unwrap();
    let answer = state.messages.last().unwrap().text();
    assert!(answer.starts_with("Summary:"));
    assert!(answer.contains("Thursday 10am"));
    assert!(state.draft.is_none());
    // The summarizer saw the document
    assert!(port.calls()[1].transcript().contains("Meeting moved to Thursday 10am"));
}

#[tokio::test]
async fn summarize_without_document_answers_generally() {
    let port = ScriptedCompleter::new()
        .route(RouteKind::Summary, "user asks for a summary")
        .text("I can summarize an email once you share it. Please paste or upload it.");
    let mgr = manager(&port, Variant::Routing);
    let mut rx = mgr.events().subscribe();
    let session = mgr.start_session();

    let items = turn(&mgr, &session, "summarize it").await;
    let last = final_snapshot(&items);
    assert_eq!(last.node, "general");
    assert!(!last.state.messages.last().unwrap().text().starts_with("Summary:"));

    let mut decision = None;
    while let Ok(event) = rx.try_recv() {
        if let AgentEvent::RouteDecided { decision: d } = event {
            decision = Some(d);
        }
    }
    let decision = decision.expect("route decided");
    assert_eq!(decision.kind, RouteKind::General);
    assert_eq!(decision.rationale, "disallowed without document");
}

#[tokio::test]
async fn revise_replaces_draft_with_one_message() {
    let port = ScriptedCompleter::new()
        .route(RouteKind::New, "new mail")
        .text("Betreff: X\n\nHallo Sam, ich wollte fragen, ob du am Freitag Zeit hast.")
        .route(RouteKind::Revise, "feedback on the draft")
        .text("Betreff: X\n\nHallo Sam, Freitag?");
    let mgr = manager(&port, Variant::Routing);
    let session = mgr.start_session();

    turn(&mgr, &session, "write Sam about Friday").await;
    let before = mgr.state(&session).await.unwrap();
    let old_draft = before.draft.clone().expect("draft written");

    let items = turn(&mgr, &session, "make it shorter").await;
    assert_eq!(final_snapshot(&items).node, "revise");

    let after = mgr.state(&session).await.unwrap();
    let new_draft = after.draft.clone().expect("draft kept");
    assert!(new_draft.len() < old_draft.len());
    assert_eq!(after.messages.len(), before.messages.len() + 2);
    let new_assistant = after.messages[before.messages.len()..]
        .iter()
        .filter(|m| m.role == Role::Assistant)
        .count();
    assert_eq!(new_assistant, 1);
    // Earlier messages are untouched
    let texts = |msgs: &[draftsmith_core::types::ChatMessage]| -> Vec<String> {
        msgs.iter().map(|m| m.text()).collect()
    };
    assert_eq!(texts(&after.messages[..before.messages.len()]), texts(&before.messages));
}

#[tokio::test]
async fn reply_asks_once_then_drafts() {
    let port = ScriptedCompleter::new()
        .route(RouteKind::Reply, "reply requested")
        .text("ask: Which two time slots should I offer?")
        .route(RouteKind::Reply, "user answered the question")
        .text(SAMPLE_DRAFT);
    let mgr = manager(&port, Variant::Routing);
    let session = mgr.start_session();
    mgr.set_uploaded_document(&session, SAMPLE_EMAIL).await.unwrap();

    turn(&mgr, &session, "reply to Dana").await;
    let asked = mgr.state(&session).await.unwrap();
    assert!(asked.pending_clarification);
    assert!(asked.draft.is_none());
    assert_eq!(
        asked.messages.last().unwrap().text(),
        "Which two time slots should I offer?"
    );

    turn(&mgr, &session, "Tuesday 10:00 or Thursday 14:00").await;
    let answered = mgr.state(&session).await.unwrap();
    assert!(!answered.pending_clarification);
    assert_eq!(answered.draft.as_deref(), Some(SAMPLE_DRAFT));
    assert!(answered
        .messages
        .last()
        .unwrap()
        .text()
        .starts_with("Draft (reply):"));

    // The router and the reply generation both knew a question was open
    let calls = port.calls();
    assert!(calls[2].system_text().contains("awaiting_answer=true"));
    assert!(calls[3].transcript().contains("Tuesday 10:00 or Thursday 14:00"));
}

#[tokio::test]
async fn router_failure_falls_back_to_general() {
    let port = ScriptedCompleter::new()
        .text("I think this is about a summary, maybe?")
        .text("Happy to help. What would you like to do with your email?");
    let mgr = manager(&port, Variant::Routing);
    let session = mgr.start_session();

    let items = turn(&mgr, &session, "hm").await;
    let router = items[0].as_ref().unwrap();
    let route = router.state.route.clone().expect("route set on router snapshot");
    assert_eq!(route.kind, RouteKind::General);
    assert_eq!(route.rationale, "fallback");
    assert_eq!(final_snapshot(&items).node, "general");
}

#[tokio::test]
async fn agent_variant_full_session() {
    let port = ScriptedCompleter::new()
        // turn 1: summarize
        .tool_calls(vec![("summary", json!({}))])
        .text("Dana asks for two kickoff slots and the budget sheet status.")
        .text("Dana asks for two kickoff slots next week and whether the budget sheet is ready.")
        // turn 2: reply with the user's details
        .tool_calls(vec![("reply", json!({"extra": "Tuesday 10:00 or Thursday 14:00, budget ready"}))])
        .text(SAMPLE_DRAFT)
        .text("I drafted the reply above.");
    let mgr = manager(&port, Variant::Agent);
    let session = mgr.start_session();
    mgr.set_uploaded_document(&session, SAMPLE_EMAIL).await.unwrap();

    let items = turn(&mgr, &session, "what does Dana want?").await;
    final_snapshot(&items);
    let state = mgr.state(&session).await.unwrap();
    assert!(state.draft.is_none());

    let items = turn(&mgr, &session, "reply: Tuesday 10 or Thursday 14, budget is ready").await;
    final_snapshot(&items);
    let state = mgr.state(&session).await.unwrap();
    assert_eq!(state.draft.as_deref(), Some(SAMPLE_DRAFT));
    assert!(state.route.is_none());
    // The reply generation was told not to ask again
    assert!(port.calls()[4].transcript().contains("USER_INPUT:\nTuesday 10:00 or Thursday 14:00"));
    assert_eq!(port.remaining(), 0);
}

#[tokio::test]
async fn failed_turn_keeps_session_usable() {
    let port = ScriptedCompleter::new()
        .route(RouteKind::New, "new mail")
        .fail("HTTP 500: upstream error")
        .route(RouteKind::New, "new mail")
        .text("Subject: Lunch\n\nHi Sam,");
    let mgr = manager(&port, Variant::Routing);
    let session = mgr.start_session();

    let items = turn(&mgr, &session, "invite Sam to lunch").await;
    assert!(items.last().unwrap().as_ref().unwrap_err().is_completion_failure());
    assert!(mgr.state(&session).await.unwrap().messages.is_empty());

    let items = turn(&mgr, &session, "invite Sam to lunch").await;
    final_snapshot(&items);
    let state = mgr.state(&session).await.unwrap();
    assert_eq!(state.messages.len(), 2);
    assert_eq!(state.draft.as_deref(), Some("Subject: Lunch\n\nHi Sam,"));
}
