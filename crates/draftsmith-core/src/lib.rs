pub mod config;
pub mod error;
pub mod event;
pub mod prompts;
pub mod state;
pub mod traits;
pub mod types;

pub use config::AppConfig;
pub use error::{DraftsmithError, Result};
pub use event::EventBus;
pub use prompts::{ContextFlags, PromptSet};
pub use state::{ConversationState, RouteDecision, RouteKind, StateUpdate};
pub use types::*;
