use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, VelloraError};

/// Top-level Vellora configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub model: ModelConfig,
    #[serde(default)]
    pub fallback_models: Vec<ModelConfig>,
    #[serde(default)]
    pub models: ModelProfiles,
    #[serde(default)]
    pub graph: GraphConfig,
    #[serde(default = "AgentLoopConfig::scheduler")]
    pub scheduler: AgentLoopConfig,
    #[serde(default = "AgentLoopConfig::calendar")]
    pub calendar: AgentLoopConfig,
    #[serde(default)]
    pub planner: PlannerConfig,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub web_search: WebSearchConfig,
    #[serde(default)]
    pub youtube: YoutubeConfig,
    #[serde(default)]
    pub google: Option<GoogleConfig>,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub gateway: Option<GatewayConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    pub model_id: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub extra_headers: HashMap<String, String>,
    #[serde(default)]
    pub retry: Option<RetryConfig>,
}

fn default_provider() -> String { "openai".to_string() }
fn default_max_tokens() -> u32 { 4096 }
fn default_temperature() -> f32 { 0.7 }

impl ModelConfig {
    /// Apply a per-step override on top of this model.
    pub fn with_override(&self, ov: &ModelOverride) -> ModelConfig {
        let mut config = self.clone();
        if let Some(ref model_id) = ov.model_id {
            config.model_id = model_id.clone();
        }
        if let Some(temperature) = ov.temperature {
            config.temperature = temperature;
        }
        if let Some(max_tokens) = ov.max_tokens {
            config.max_tokens = max_tokens;
        }
        config
    }
}

/// Retry configuration for LLM requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

fn default_max_retries() -> u32 { 3 }
fn default_initial_backoff() -> u64 { 1000 }
fn default_max_backoff() -> u64 { 30000 }

/// Partial model settings layered over `[model]` for one kind of step.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelOverride {
    #[serde(default)]
    pub model_id: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

impl ModelOverride {
    fn temperature(t: f32) -> Self {
        Self {
            temperature: Some(t),
            ..Default::default()
        }
    }
}

/// The kinds of completion calls the graph makes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelStep {
    Classifier,
    Extractor,
    Planner,
    Agent,
    Response,
    Quiz,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelProfiles {
    #[serde(default = "default_classifier_profile")]
    pub classifier: ModelOverride,
    #[serde(default)]
    pub extractor: ModelOverride,
    #[serde(default = "default_planner_profile")]
    pub planner: ModelOverride,
    #[serde(default = "default_agent_profile")]
    pub agent: ModelOverride,
    #[serde(default)]
    pub response: ModelOverride,
    #[serde(default = "default_quiz_profile")]
    pub quiz: ModelOverride,
}

impl Default for ModelProfiles {
    fn default() -> Self {
        Self {
            classifier: default_classifier_profile(),
            extractor: ModelOverride::default(),
            planner: default_planner_profile(),
            agent: default_agent_profile(),
            response: ModelOverride::default(),
            quiz: default_quiz_profile(),
        }
    }
}

fn default_classifier_profile() -> ModelOverride { ModelOverride::temperature(0.1) }
fn default_planner_profile() -> ModelOverride { ModelOverride::temperature(0.3) }
fn default_agent_profile() -> ModelOverride { ModelOverride::temperature(0.0) }
fn default_quiz_profile() -> ModelOverride { ModelOverride::temperature(0.1) }

impl ModelProfiles {
    /// Resolve the concrete model settings for a step.
    pub fn resolve(&self, base: &ModelConfig, step: ModelStep) -> ModelConfig {
        let ov = match step {
            ModelStep::Classifier => &self.classifier,
            ModelStep::Extractor => &self.extractor,
            ModelStep::Planner => &self.planner,
            ModelStep::Agent => &self.agent,
            ModelStep::Response => &self.response,
            ModelStep::Quiz => &self.quiz,
        };
        base.with_override(ov)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphConfig {
    /// Hard ceiling on node hops per run.
    #[serde(default = "default_max_hops")]
    pub max_hops: usize,
    /// Buffered events between the engine and a slow consumer.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
    /// Timezone assumed when the caller sends none.
    #[serde(default = "default_timezone")]
    pub default_timezone: String,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            max_hops: default_max_hops(),
            event_buffer: default_event_buffer(),
            default_timezone: default_timezone(),
        }
    }
}

fn default_max_hops() -> usize { 16 }
fn default_event_buffer() -> usize { 64 }
fn default_timezone() -> String { "UTC".to_string() }

/// Ceilings for a bounded agent loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentLoopConfig {
    pub max_iterations: usize,
    pub max_duration_secs: u64,
}

impl AgentLoopConfig {
    pub fn scheduler() -> Self {
        Self {
            max_iterations: 3,
            max_duration_secs: 60,
        }
    }

    pub fn calendar() -> Self {
        Self {
            max_iterations: 4,
            max_duration_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannerConfig {
    #[serde(default = "default_web_results")]
    pub web_results: usize,
    #[serde(default = "default_video_results")]
    pub video_results: usize,
    /// Upper bound on transcript characters fed into plan synthesis.
    #[serde(default = "default_excerpt_chars")]
    pub transcript_excerpt_chars: usize,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            web_results: default_web_results(),
            video_results: default_video_results(),
            transcript_excerpt_chars: default_excerpt_chars(),
        }
    }
}

fn default_web_results() -> usize { 5 }
fn default_video_results() -> usize { 3 }
fn default_excerpt_chars() -> usize { 4000 }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Upper bound on transcript characters fed into context extraction.
    #[serde(default = "default_transcript_chars")]
    pub transcript_chars: usize,
    /// Excerpt length used as context when extraction fails.
    #[serde(default = "default_excerpt_chars")]
    pub fallback_chars: usize,
    #[serde(default = "default_language")]
    pub language: String,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            transcript_chars: default_transcript_chars(),
            fallback_chars: default_excerpt_chars(),
            language: default_language(),
        }
    }
}

fn default_transcript_chars() -> usize { 24_000 }
fn default_language() -> String { "en".to_string() }

/// Keyless web search endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSearchConfig {
    #[serde(default = "default_search_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_search_timeout")]
    pub timeout_secs: u64,
}

impl Default for WebSearchConfig {
    fn default() -> Self {
        Self {
            endpoint: default_search_endpoint(),
            timeout_secs: default_search_timeout(),
        }
    }
}

fn default_search_endpoint() -> String { "https://api.duckduckgo.com/".to_string() }
fn default_search_timeout() -> u64 { 10 }

/// Video search and caption download via yt-dlp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct YoutubeConfig {
    #[serde(default = "default_ytdlp")]
    pub ytdlp_path: String,
    #[serde(default = "default_ytdlp_timeout")]
    pub timeout_secs: u64,
}

impl Default for YoutubeConfig {
    fn default() -> Self {
        Self {
            ytdlp_path: default_ytdlp(),
            timeout_secs: default_ytdlp_timeout(),
        }
    }
}

fn default_ytdlp() -> String { "yt-dlp".to_string() }
fn default_ytdlp_timeout() -> u64 { 60 }

/// Google OAuth client used to refresh calendar tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoogleConfig {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String { "https://oauth2.googleapis.com/token".to_string() }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_database")]
    pub database: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database: default_database(),
        }
    }
}

fn default_database() -> String { "~/.vellora/vellora.db".to_string() }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String { "127.0.0.1:8088".to_string() }

impl AppConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| VelloraError::ConfigNotFound(path.display().to_string()))?;

        Self::from_toml_str(&content)
    }

    /// Parse config text, expanding `${ENV_VAR}` references first.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let expanded = expand_env_vars(content);
        toml::from_str(&expanded).map_err(|e| VelloraError::Config(e.to_string()))
    }

    /// Resolve the database path (expand ~).
    pub fn database_path(&self) -> PathBuf {
        let db = &self.storage.database;
        if let Some(rest) = db.strip_prefix("~/") {
            if let Some(home) = dirs_home() {
                return home.join(rest);
            }
        }
        PathBuf::from(db)
    }

    /// Model settings for one kind of step.
    pub fn model_for(&self, step: ModelStep) -> ModelConfig {
        self.models.resolve(&self.model, step)
    }
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                Err(_) => {
                    // Keep original if env var not set
                    result.push_str(&format!("${{{}}}", var_name));
                }
            }
        } else {
            result.push(c);
        }
    }
    result
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_env_vars() {
        std::env::set_var("TEST_VELLORA_VAR", "hello");
        let result = expand_env_vars("key = \"${TEST_VELLORA_VAR}\"");
        assert_eq!(result, "key = \"hello\"");
        std::env::remove_var("TEST_VELLORA_VAR");
    }

    #[test]
    fn test_expand_env_vars_missing() {
        let result = expand_env_vars("key = \"${NONEXISTENT_VELLORA_VAR}\"");
        assert_eq!(result, "key = \"${NONEXISTENT_VELLORA_VAR}\"");
    }

    #[test]
    fn test_defaults_from_minimal_toml() {
        let toml_str = r#"
[model]
model_id = "gpt-4o"
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.model.provider, "openai");
        assert_eq!(config.graph.max_hops, 16);
        assert_eq!(config.scheduler.max_iterations, 3);
        assert_eq!(config.calendar.max_iterations, 4);
        assert_eq!(config.calendar.max_duration_secs, 60);
        assert_eq!(config.planner.transcript_excerpt_chars, 4000);
        assert_eq!(config.web_search.endpoint, "https://api.duckduckgo.com/");
        assert!(config.google.is_none());
        assert!(config.gateway.is_none());
    }

    #[test]
    fn test_step_profiles_override_base_model() {
        let toml_str = r#"
[model]
model_id = "gpt-4o"
temperature = 0.7

[models.classifier]
model_id = "gpt-4o-mini"
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();

        let classifier = config.model_for(ModelStep::Classifier);
        assert_eq!(classifier.model_id, "gpt-4o-mini");
        // A section that sets only model_id drops the built-in temperature default
        assert_eq!(classifier.temperature, 0.7);

        let agent = config.model_for(ModelStep::Agent);
        assert_eq!(agent.model_id, "gpt-4o");
        assert_eq!(agent.temperature, 0.0);

        let quiz = config.model_for(ModelStep::Quiz);
        assert_eq!(quiz.temperature, 0.1);
    }

    #[test]
    fn test_agent_loop_sections() {
        let toml_str = r#"
[model]
model_id = "gpt-4o"

[scheduler]
max_iterations = 5
max_duration_secs = 30
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.scheduler.max_iterations, 5);
        assert_eq!(config.scheduler.max_duration_secs, 30);
        assert_eq!(config.calendar.max_iterations, 4);
    }
}
