use std::time::Duration;

use futures::future::BoxFuture;
use futures::stream::BoxStream;
use tracing::warn;

use draftsmith_core::config::{ModelConfig, RetryConfig};
use draftsmith_core::error::{DraftsmithError, Result};
use draftsmith_core::traits::LlmClient;
use draftsmith_core::types::*;

/// An LLM client that retries transient failures when opening a stream.
///
/// Only the request is retried; once a stream is handed out, errors inside
/// it propagate unchanged. Each retry is logged.
pub struct RetryingClient {
    inner: Box<dyn LlmClient>,
    retry_config: RetryConfig,
}

impl RetryingClient {
    pub fn new(inner: Box<dyn LlmClient>, retry_config: RetryConfig) -> Self {
        Self {
            inner,
            retry_config,
        }
    }
}

pub(crate) fn is_retryable(e: &DraftsmithError) -> bool {
    match e {
        DraftsmithError::LlmRequest(msg) => {
            msg.contains("429")
                || msg.contains("500")
                || msg.contains("502")
                || msg.contains("503")
                || msg.contains("timeout")
                || msg.contains("connection")
        }
        DraftsmithError::LlmStream(_) => true,
        _ => false,
    }
}

pub(crate) fn calculate_backoff(attempt: u32, config: &RetryConfig) -> Duration {
    let ms = config
        .initial_backoff_ms
        .saturating_mul(2u64.saturating_pow(attempt))
        .min(config.max_backoff_ms);
    // Jitter between 0.8x and 1.2x
    let jitter = 0.8 + rand::random::<f64>() * 0.4;
    Duration::from_millis((ms as f64 * jitter) as u64)
}

impl LlmClient for RetryingClient {
    fn chat_stream(
        &self,
        config: &ModelConfig,
        messages: Vec<ChatMessage>,
        tools: &[ToolDefinition],
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<StreamDelta>>>> {
        let config = config.clone();
        let tools = tools.to_vec();

        Box::pin(async move {
            let max_retries = self.retry_config.max_retries;
            let mut attempt = 0;

            loop {
                match self.inner.chat_stream(&config, messages.clone(), &tools).await {
                    Ok(stream) => return Ok(stream),
                    Err(e) if is_retryable(&e) && attempt < max_retries => {
                        let backoff = calculate_backoff(attempt, &self.retry_config);
                        warn!(
                            attempt = attempt + 1,
                            max_retries,
                            backoff_ms = backoff.as_millis() as u64,
                            error = %e,
                            "Retrying LLM request"
                        );
                        tokio::time::sleep(backoff).await;
                        attempt += 1;
                    }
                    Err(e) => return Err(e),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use draftsmith_test_utils::ScriptedLlm;
    use futures::StreamExt;

    fn fast_retry(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            initial_backoff_ms: 1,
            max_backoff_ms: 2,
        }
    }

    #[test]
    fn test_retryable_classification() {
        assert!(is_retryable(&DraftsmithError::LlmRequest("HTTP 429 Too Many Requests".into())));
        assert!(is_retryable(&DraftsmithError::LlmStream("reset".into())));
        assert!(!is_retryable(&DraftsmithError::LlmRequest("HTTP 401 Unauthorized".into())));
        assert!(!is_retryable(&DraftsmithError::LlmParse("bad".into())));
    }

    #[test]
    fn test_backoff_is_capped() {
        let config = RetryConfig {
            max_retries: 10,
            initial_backoff_ms: 1000,
            max_backoff_ms: 4000,
        };
        let d = calculate_backoff(8, &config);
        assert!(d <= Duration::from_millis(4800));
    }

    #[tokio::test]
    async fn test_retries_then_succeeds() {
        let llm = ScriptedLlm::new()
            .fail("HTTP 503 Service Unavailable")
            .text("hello");
        let client = RetryingClient::new(Box::new(llm.clone()), fast_retry(2));

        let mut stream = client
            .chat_stream(&ModelConfig::default(), vec![ChatMessage::user("hi")], &[])
            .await
            .unwrap();
        let mut text = String::new();
        while let Some(delta) = stream.next().await {
            if let Ok(StreamDelta::TextDelta(t)) = delta {
                text.push_str(&t);
            }
        }
        assert_eq!(text, "hello");
        assert_eq!(llm.calls(), 2);
    }

    #[tokio::test]
    async fn test_non_retryable_fails_immediately() {
        let llm = ScriptedLlm::new().fail("HTTP 401 Unauthorized").text("never");
        let client = RetryingClient::new(Box::new(llm.clone()), fast_retry(3));

        let result = client
            .chat_stream(&ModelConfig::default(), vec![], &[])
            .await;
        assert!(matches!(result, Err(DraftsmithError::LlmRequest(_))));
        assert_eq!(llm.calls(), 1);
    }
}
