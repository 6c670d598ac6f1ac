use std::io::Write;

use draftsmith_core::config::{AppConfig, Variant};
use draftsmith_core::state::{ConversationState, StateUpdate};
use draftsmith_core::types::ChatMessage;

/// An inbound email asking for a meeting slot.
pub const SAMPLE_EMAIL: &str = "From: Dana Weiss <dana@example.com>\n\
Subject: Project kickoff\n\
\n\
Hi,\n\
\n\
could we schedule the kickoff meeting for next week? Please send me two\n\
possible time slots and confirm whether the budget sheet is ready.\n\
\n\
Thanks,\n\
Dana";

/// A finished reply draft.
pub const SAMPLE_DRAFT: &str = "Subject: Re: Project kickoff\n\
\n\
Hello Dana,\n\
\n\
Tuesday 10:00 or Thursday 14:00 both work for us. The budget sheet is ready.\n\
\n\
Best regards,\n\
Alex";

/// Default configuration for the given variant with short timeouts.
pub fn test_config(variant: Variant) -> AppConfig {
    let mut config = AppConfig::default();
    config.assistant.variant = variant;
    config.assistant.router_timeout_secs = 5;
    config.assistant.tool_timeout_secs = 5;
    config
}

/// A state holding [`SAMPLE_EMAIL`] and nothing else.
pub fn state_with_email() -> ConversationState {
    ConversationState::with_document(SAMPLE_EMAIL)
}

/// A state holding [`SAMPLE_EMAIL`] and [`SAMPLE_DRAFT`] after one exchange.
pub fn state_with_draft() -> ConversationState {
    state_with_email()
        .with_user_message("reply to this")
        .apply(
            StateUpdate::message(ChatMessage::assistant_text(format!(
                "Draft (reply):\n\n{}",
                SAMPLE_DRAFT
            )))
            .with_draft(Some(SAMPLE_DRAFT.to_string())),
        )
}

/// Write `content` to a temporary `.toml` file that lives as long as the handle.
pub fn temp_config_file(content: &str) -> std::io::Result<tempfile::NamedTempFile> {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile()?;
    file.write_all(content.as_bytes())?;
    file.flush()?;
    Ok(file)
}
