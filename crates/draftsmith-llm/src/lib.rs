pub mod completer;
pub mod providers;
pub mod retry;
pub mod streaming;

use draftsmith_core::config::ModelConfig;
use draftsmith_core::error::{DraftsmithError, Result};
use draftsmith_core::traits::LlmClient;
use tracing::{debug, warn};

pub use completer::LlmCompleter;
pub use providers::openai::OpenAiClient;
pub use providers::presets;
pub use retry::RetryingClient;

/// Providers reachable through the OpenAI-compatible chat protocol.
pub const SUPPORTED_PROVIDERS: &[&str] = &[
    "openai",
    "openai-compatible",
    "azure",
    "ollama",
    "vllm",
    "lmstudio",
    "groq",
    "openrouter",
    "together",
    "mistral",
    "deepseek",
];

/// Create an LLM client for the configured provider.
///
/// The chat endpoint is resolved up front so a provider that needs an
/// explicit `base_url` fails here instead of on the first turn. Retries are
/// layered on only when `[model.retry]` is configured.
pub fn create_client(config: &ModelConfig) -> Result<Box<dyn LlmClient>> {
    let provider = presets::provider_key(config);
    if !SUPPORTED_PROVIDERS.contains(&provider.as_str()) {
        return Err(DraftsmithError::UnsupportedProvider(config.provider.clone()));
    }

    let endpoint = presets::resolve_endpoint(config)?;
    let needs_key = presets::get_preset(&provider).is_some_and(|p| p.needs_api_key);
    if needs_key && config.api_key.is_none() {
        warn!(provider = %provider, "No api_key configured; requests will likely be rejected");
    }
    debug!(provider = %provider, endpoint = %endpoint, "Creating LLM client");

    let client: Box<dyn LlmClient> = Box::new(OpenAiClient::new());
    Ok(match &config.retry {
        Some(retry) => {
            debug!(provider = %provider, max_retries = retry.max_retries, "Wrapping client with retries");
            Box::new(RetryingClient::new(client, retry.clone()))
        }
        None => client,
    })
}
