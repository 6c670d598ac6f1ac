use thiserror::Error;

#[derive(Debug, Error)]
pub enum DraftsmithError {
    // Completion service errors
    #[error("LLM request failed: {0}")]
    LlmRequest(String),

    #[error("LLM streaming error: {0}")]
    LlmStream(String),

    #[error("LLM provider not supported: {0}")]
    UnsupportedProvider(String),

    #[error("LLM response parse error: {0}")]
    LlmParse(String),

    // Tool errors
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Tool timeout after {timeout_secs}s: {tool}")]
    ToolTimeout { tool: String, timeout_secs: u64 },

    #[error("Tool input validation failed: {0}")]
    ToolValidation(String),

    // Turn errors
    #[error("Turn cancelled")]
    Cancelled,

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DraftsmithError {
    /// Whether this error came from the completion service itself
    /// (network, auth, rate limit, broken stream).
    ///
    /// A parse failure is not included: the service answered, the answer
    /// just did not fit the requested shape.
    pub fn is_completion_failure(&self) -> bool {
        matches!(
            self,
            Self::LlmRequest(_) | Self::LlmStream(_) | Self::UnsupportedProvider(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, DraftsmithError>;
