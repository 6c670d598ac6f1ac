use std::collections::HashMap;

use draftsmith_core::config::ModelConfig;
use draftsmith_core::error::{DraftsmithError, Result};

const CHAT_PATH: &str = "/chat/completions";

/// A named provider preset for OpenAI-compatible APIs.
pub struct ProviderPreset {
    pub default_base_url: &'static str,
    pub needs_api_key: bool,
    pub extra_headers: &'static [(&'static str, &'static str)],
}

/// Look up a provider preset by name.
pub fn get_preset(provider: &str) -> Option<ProviderPreset> {
    match provider {
        "openai" => Some(ProviderPreset {
            default_base_url: "https://api.openai.com/v1/chat/completions",
            needs_api_key: true,
            extra_headers: &[],
        }),
        "ollama" => Some(ProviderPreset {
            default_base_url: "http://localhost:11434/v1/chat/completions",
            needs_api_key: false,
            extra_headers: &[],
        }),
        "vllm" => Some(ProviderPreset {
            default_base_url: "http://localhost:8000/v1/chat/completions",
            needs_api_key: false,
            extra_headers: &[],
        }),
        "lmstudio" => Some(ProviderPreset {
            default_base_url: "http://localhost:1234/v1/chat/completions",
            needs_api_key: false,
            extra_headers: &[],
        }),
        "groq" => Some(ProviderPreset {
            default_base_url: "https://api.groq.com/openai/v1/chat/completions",
            needs_api_key: true,
            extra_headers: &[],
        }),
        "openrouter" => Some(ProviderPreset {
            default_base_url: "https://openrouter.ai/api/v1/chat/completions",
            needs_api_key: true,
            extra_headers: &[("X-Title", "Draftsmith")],
        }),
        "together" => Some(ProviderPreset {
            default_base_url: "https://api.together.xyz/v1/chat/completions",
            needs_api_key: true,
            extra_headers: &[],
        }),
        "mistral" => Some(ProviderPreset {
            default_base_url: "https://api.mistral.ai/v1/chat/completions",
            needs_api_key: true,
            extra_headers: &[],
        }),
        "deepseek" => Some(ProviderPreset {
            default_base_url: "https://api.deepseek.com/v1/chat/completions",
            needs_api_key: true,
            extra_headers: &[],
        }),
        _ => None,
    }
}

/// Providers without a fixed endpoint; `base_url` is required.
pub const CUSTOM_ENDPOINT_PROVIDERS: &[&str] = &["openai-compatible", "azure"];

/// List all known preset provider names.
pub fn all_preset_names() -> &'static [&'static str] {
    &[
        "openai",
        "ollama",
        "vllm",
        "lmstudio",
        "groq",
        "openrouter",
        "together",
        "mistral",
        "deepseek",
    ]
}

/// Normalised provider name as used for preset lookup.
pub fn provider_key(config: &ModelConfig) -> String {
    config.provider.trim().to_lowercase()
}

/// Full chat endpoint for `config`.
///
/// An explicit `base_url` wins; it may be an API root (`.../v1`) or the full
/// endpoint. Without one the provider's preset endpoint is used.
pub fn resolve_endpoint(config: &ModelConfig) -> Result<String> {
    if let Some(base) = config.base_url.as_deref().map(str::trim).filter(|b| !b.is_empty()) {
        return Ok(chat_endpoint(base));
    }
    let provider = provider_key(config);
    get_preset(&provider)
        .map(|preset| preset.default_base_url.to_string())
        .ok_or_else(|| {
            DraftsmithError::Config(format!("provider '{}' requires model.base_url", provider))
        })
}

/// Append the chat path to an API root, keeping any query string.
pub fn chat_endpoint(base: &str) -> String {
    let (path, query) = match base.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (base, None),
    };
    let path = path.trim_end_matches('/');
    let mut url = if path.ends_with(CHAT_PATH) {
        path.to_string()
    } else {
        format!("{}{}", path, CHAT_PATH)
    };
    if let Some(query) = query {
        url.push('?');
        url.push_str(query);
    }
    url
}

/// Build extra headers from a preset + user config overrides.
pub fn build_extra_headers(
    preset: Option<&ProviderPreset>,
    user_headers: &HashMap<String, String>,
) -> Vec<(String, String)> {
    let mut headers: Vec<(String, String)> = preset
        .map(|p| p.extra_headers)
        .unwrap_or_default()
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

    for (k, v) in user_headers {
        // User overrides take precedence
        if let Some(pos) = headers.iter().position(|(hk, _)| hk == k) {
            headers[pos].1 = v.clone();
        } else {
            headers.push((k.clone(), v.clone()));
        }
    }

    headers
}
