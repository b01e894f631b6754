pub mod providers;
pub mod retry;
pub mod streaming;

use vellora_core::config::{AppConfig, ModelConfig};
use vellora_core::traits::LlmClient;

pub use providers::openai::OpenAiClient;
pub use retry::RetryingClient;

/// Create an LLM client based on the provider name.
pub fn create_client(config: &ModelConfig) -> Box<dyn LlmClient> {
    match config.provider.as_str() {
        // Every supported backend speaks the OpenAI chat completions dialect
        "openai" | "ollama" | "groq" | "openrouter" | "vllm" => Box::new(OpenAiClient::new()),
        other => {
            tracing::warn!(provider = %other, "Unknown provider, assuming OpenAI-compatible API");
            Box::new(OpenAiClient::new())
        }
    }
}

/// Build the primary client, wrapped with retries and fallbacks when configured.
pub fn client_from_config(config: &AppConfig) -> Box<dyn LlmClient> {
    let primary = create_client(&config.model);
    if config.model.retry.is_none() && config.fallback_models.is_empty() {
        return primary;
    }

    let fallbacks = config
        .fallback_models
        .iter()
        .map(|fb| (fb.clone(), create_client(fb)))
        .collect();

    Box::new(RetryingClient::new(
        primary,
        fallbacks,
        config.model.retry.clone().unwrap_or_default(),
    ))
}
