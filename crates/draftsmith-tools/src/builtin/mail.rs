use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;

use draftsmith_core::error::{DraftsmithError, Result};
use draftsmith_core::traits::Tool;
use draftsmith_core::types::{ToolContext, ToolResult};

use crate::handlers;

/// Deserialize tool arguments, treating a missing payload as `{}`.
fn parse_args<T: DeserializeOwned>(tool: &str, input: serde_json::Value) -> Result<T> {
    let input = if input.is_null() { json!({}) } else { input };
    serde_json::from_value(input)
        .map_err(|e| DraftsmithError::ToolValidation(format!("{}: {}", tool, e)))
}

// ── SummaryTool ─────────────────────────────────────────────────

pub struct SummaryTool;

/// Takes no arguments; the uploaded email comes from the session state.
#[derive(Debug, Default, Deserialize)]
pub struct SummaryArgs {}

impl Tool for SummaryTool {
    fn name(&self) -> &str {
        "summary"
    }

    fn description(&self) -> &str {
        "Write a concise summary of the uploaded email. Requires an uploaded email."
    }

    fn input_schema(&self) -> serde_json::Value {
        json!({ "type": "object", "properties": {} })
    }

    fn execute(
        &self,
        input: serde_json::Value,
        ctx: ToolContext,
    ) -> BoxFuture<'_, Result<ToolResult>> {
        Box::pin(async move {
            let _args: SummaryArgs = parse_args(self.name(), input)?;
            let out = handlers::summarize(&ctx.state, &*ctx.completer, &ctx.prompts).await?;
            Ok(out.into_tool_result())
        })
    }
}

// ── ReplyTool ───────────────────────────────────────────────────

pub struct ReplyTool;

#[derive(Debug, Default, Deserialize)]
pub struct ReplyArgs {
    #[serde(default)]
    pub extra: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
}

impl Tool for ReplyTool {
    fn name(&self) -> &str {
        "reply"
    }

    fn description(&self) -> &str {
        "Write a reply to the uploaded email, optionally guided by extra instructions \
         (tone, dates, points) and/or a short summary. May instead return exactly one \
         clarifying question. Requires an uploaded email."
    }

    fn input_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "extra": {
                    "type": "string",
                    "description": "Additional instructions: tone, dates, points to cover"
                },
                "summary": {
                    "type": "string",
                    "description": "Optional short summary of the email"
                }
            }
        })
    }

    fn execute(
        &self,
        input: serde_json::Value,
        ctx: ToolContext,
    ) -> BoxFuture<'_, Result<ToolResult>> {
        Box::pin(async move {
            let args: ReplyArgs = parse_args(self.name(), input)?;
            let out = handlers::reply(
                &ctx.state,
                &*ctx.completer,
                &ctx.prompts,
                args.extra.as_deref(),
                args.summary.as_deref(),
                ctx.history_window,
            )
            .await?;
            Ok(out.into_tool_result())
        })
    }
}

// ── NewTool ─────────────────────────────────────────────────────

pub struct NewTool;

#[derive(Debug, Deserialize)]
pub struct NewArgs {
    pub brief: String,
}

impl Tool for NewTool {
    fn name(&self) -> &str {
        "new"
    }

    fn description(&self) -> &str {
        "Write a new, independent email from a short brief (recipient, purpose, tone, points)."
    }

    fn input_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "brief": {
                    "type": "string",
                    "description": "Short brief: recipient, purpose, tone, key points"
                }
            },
            "required": ["brief"]
        })
    }

    fn execute(
        &self,
        input: serde_json::Value,
        ctx: ToolContext,
    ) -> BoxFuture<'_, Result<ToolResult>> {
        Box::pin(async move {
            let args: NewArgs = parse_args(self.name(), input)?;
            let out = handlers::compose_new(
                &ctx.state,
                &*ctx.completer,
                &ctx.prompts,
                Some(args.brief.as_str()),
            )
            .await?;
            Ok(out.into_tool_result())
        })
    }
}

// ── ReviseTool ──────────────────────────────────────────────────

pub struct ReviseTool;

#[derive(Debug, Default, Deserialize)]
pub struct ReviseArgs {
    #[serde(default)]
    pub feedback: Option<String>,
}

impl Tool for ReviseTool {
    fn name(&self) -> &str {
        "revise"
    }

    fn description(&self) -> &str {
        "Revise the current draft according to feedback. Requires an existing draft."
    }

    fn input_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "feedback": {
                    "type": "string",
                    "description": "Concrete change requests; defaults to the latest user message"
                }
            }
        })
    }

    fn execute(
        &self,
        input: serde_json::Value,
        ctx: ToolContext,
    ) -> BoxFuture<'_, Result<ToolResult>> {
        Box::pin(async move {
            let args: ReviseArgs = parse_args(self.name(), input)?;
            let out = handlers::revise(
                &ctx.state,
                &*ctx.completer,
                &ctx.prompts,
                args.feedback.as_deref(),
            )
            .await?;
            Ok(out.into_tool_result())
        })
    }
}

// ── GeneralTool ─────────────────────────────────────────────────

pub struct GeneralTool;

#[derive(Debug, Deserialize)]
pub struct GeneralArgs {
    pub question: String,
}

impl Tool for GeneralTool {
    fn name(&self) -> &str {
        "general"
    }

    fn description(&self) -> &str {
        "Answer a general question; uses the uploaded email only when the question concerns it."
    }

    fn input_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "question": {
                    "type": "string",
                    "description": "The free-text question"
                }
            },
            "required": ["question"]
        })
    }

    fn execute(
        &self,
        input: serde_json::Value,
        ctx: ToolContext,
    ) -> BoxFuture<'_, Result<ToolResult>> {
        Box::pin(async move {
            let args: GeneralArgs = parse_args(self.name(), input)?;
            let out = handlers::answer_general(
                &ctx.state,
                &*ctx.completer,
                &ctx.prompts,
                Some(args.question.as_str()),
                ctx.history_window,
            )
            .await?;
            Ok(out.into_tool_result())
        })
    }
}
