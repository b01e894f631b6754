use std::time::Duration;

use futures::future::BoxFuture;
use futures::stream::BoxStream;
use tracing::{info, warn};

use vellora_core::config::{ModelConfig, RetryConfig};
use vellora_core::error::{Result, VelloraError};
use vellora_core::traits::{LlmClient, OutputSchema};
use vellora_core::types::*;

/// An LLM client that retries failed requests and falls back to alternative providers.
pub struct RetryingClient {
    primary: Box<dyn LlmClient>,
    fallbacks: Vec<(ModelConfig, Box<dyn LlmClient>)>,
    retry_config: RetryConfig,
}

impl RetryingClient {
    pub fn new(
        primary: Box<dyn LlmClient>,
        fallbacks: Vec<(ModelConfig, Box<dyn LlmClient>)>,
        retry_config: RetryConfig,
    ) -> Self {
        Self {
            primary,
            fallbacks,
            retry_config,
        }
    }

    /// Run `call` against the primary with backoff, then each fallback once.
    async fn attempt<'a, T, F>(&'a self, config: &ModelConfig, call: F) -> Result<T>
    where
        F: Fn(&'a dyn LlmClient, &ModelConfig) -> BoxFuture<'a, Result<T>>,
    {
        let max_retries = self.retry_config.max_retries;

        let mut last_err = None;
        for attempt in 0..=max_retries {
            match call(self.primary.as_ref(), config).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    if is_retryable(&e) && attempt < max_retries {
                        let backoff = calculate_backoff(attempt, &self.retry_config);
                        warn!(
                            attempt = attempt + 1,
                            max_retries,
                            backoff_ms = backoff.as_millis() as u64,
                            error = %e,
                            "Retrying LLM request"
                        );
                        tokio::time::sleep(backoff).await;
                        last_err = Some(e);
                        continue;
                    }
                    last_err = Some(e);
                    break;
                }
            }
        }

        if !self.fallbacks.is_empty() {
            info!("Primary LLM exhausted, trying fallback models");
        }
        for (fb_config, fb_client) in &self.fallbacks {
            match call(fb_client.as_ref(), fb_config).await {
                Ok(value) => {
                    info!(
                        model = %fb_config.model_id,
                        provider = %fb_config.provider,
                        "Fell back to alternative model"
                    );
                    return Ok(value);
                }
                Err(e) => {
                    warn!(model = %fb_config.model_id, error = %e, "Fallback model also failed");
                }
            }
        }

        Err(last_err.unwrap_or_else(|| VelloraError::LlmRequest("All providers failed".into())))
    }
}

fn is_retryable(e: &VelloraError) -> bool {
    match e {
        VelloraError::LlmRequest(msg) => {
            msg.contains("429")
                || msg.contains("500")
                || msg.contains("502")
                || msg.contains("503")
                || msg.contains("timeout")
                || msg.contains("connection")
        }
        VelloraError::LlmStream(_) => true,
        _ => false,
    }
}

fn calculate_backoff(attempt: u32, config: &RetryConfig) -> Duration {
    let ms = (config.initial_backoff_ms * 2u64.pow(attempt)).min(config.max_backoff_ms);
    // Jitter: 0.8x to 1.2x
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
            // Fallbacks keep their own model settings but inherit the step's temperature
            let temperature = config.temperature;
            self.attempt(&config, |client, cfg| {
                let mut cfg = cfg.clone();
                cfg.temperature = temperature;
                let messages = messages.clone();
                let tools = tools.clone();
                let fut: BoxFuture<'_, Result<_>> =
                    Box::pin(async move { client.chat_stream(&cfg, messages, &tools).await });
                fut
            })
            .await
        })
    }

    fn chat_structured(
        &self,
        config: &ModelConfig,
        messages: Vec<ChatMessage>,
        schema: &OutputSchema,
    ) -> BoxFuture<'_, Result<serde_json::Value>> {
        let config = config.clone();
        let schema = schema.clone();

        Box::pin(async move {
            let temperature = config.temperature;
            self.attempt(&config, |client, cfg| {
                let mut cfg = cfg.clone();
                cfg.temperature = temperature;
                let messages = messages.clone();
                let schema = schema.clone();
                let fut: BoxFuture<'_, Result<_>> =
                    Box::pin(async move { client.chat_structured(&cfg, messages, &schema).await });
                fut
            })
            .await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_are_retryable() {
        assert!(is_retryable(&VelloraError::LlmRequest("HTTP 503: busy".into())));
        assert!(is_retryable(&VelloraError::LlmStream("reset".into())));
        assert!(!is_retryable(&VelloraError::LlmRequest("HTTP 401: bad key".into())));
        assert!(!is_retryable(&VelloraError::LlmParse("not json".into())));
    }

    #[test]
    fn backoff_is_capped() {
        let config = RetryConfig {
            max_retries: 10,
            initial_backoff_ms: 1000,
            max_backoff_ms: 5000,
        };
        let backoff = calculate_backoff(8, &config);
        assert!(backoff <= Duration::from_millis(6000));
        assert!(backoff >= Duration::from_millis(4000));
    }
}
