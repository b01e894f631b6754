//! Schema-constrained completions decoded into typed records.

use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use tracing::warn;

use vellora_core::config::{ModelConfig, ModelStep};
use vellora_core::error::{Result, VelloraError};
use vellora_core::traits::OutputSchema;
use vellora_core::types::ChatMessage;

use crate::graph::NodeContext;

/// Ask the model for a `T` and decode it.
///
/// A reply that is not valid JSON for `T` is retried once with the schema
/// spelled out in the system prompt. A second miss is reported as
/// [`VelloraError::LlmParse`]. Transport errors are returned immediately.
pub async fn decode<T>(ctx: &NodeContext, step: ModelStep, system: &str, user: &str) -> Result<T>
where
    T: DeserializeOwned + JsonSchema,
{
    let schema_value = serde_json::to_value(schemars::schema_for!(T))?;
    let schema = OutputSchema::new(T::schema_name().to_string(), schema_value.clone());
    let config = ctx.model(step);

    let first = vec![ChatMessage::system(system), ChatMessage::user(user)];
    let err = match attempt::<T>(ctx, &config, first, &schema).await {
        Ok(value) => return Ok(value),
        Err(e) if is_decode_failure(&e) => e,
        Err(e) => return Err(e),
    };

    warn!(
        node = %ctx.node(),
        schema = %schema.name,
        error = %err,
        "Structured reply rejected, retrying with strict instruction"
    );

    let strict = format!(
        "{}\n\nRespond with ONLY a JSON object that validates against this JSON schema. \
         No prose, no markdown, no code fences.\n{}",
        system, schema_value
    );
    let second = vec![ChatMessage::system(strict), ChatMessage::user(user)];
    attempt::<T>(ctx, &config, second, &schema)
        .await
        .map_err(|e| {
            if is_decode_failure(&e) {
                VelloraError::LlmParse(format!("{} rejected twice: {}", schema.name, e))
            } else {
                e
            }
        })
}

async fn attempt<T: DeserializeOwned>(
    ctx: &NodeContext,
    config: &ModelConfig,
    messages: Vec<ChatMessage>,
    schema: &OutputSchema,
) -> Result<T> {
    let value = ctx.llm().chat_structured(config, messages, schema).await?;
    serde_json::from_value(value).map_err(|e| VelloraError::LlmParse(e.to_string()))
}

fn is_decode_failure(e: &VelloraError) -> bool {
    matches!(e, VelloraError::LlmParse(_) | VelloraError::Json(_))
}
