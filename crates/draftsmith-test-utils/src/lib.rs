//! Test doubles and fixtures shared across Draftsmith crates.

pub mod completer;
pub mod fixtures;
pub mod llm;

pub use completer::{RecordedCall, ScriptedCompleter};
pub use fixtures::*;
pub use llm::ScriptedLlm;
