use std::sync::Arc;

use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::StreamExt;

use crate::config::ModelConfig;
use crate::error::{Result, VelloraError};
use crate::types::*;

/// JSON schema a structured completion must satisfy.
#[derive(Debug, Clone)]
pub struct OutputSchema {
    pub name: String,
    pub schema: serde_json::Value,
}

impl OutputSchema {
    pub fn new(name: impl Into<String>, schema: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            schema,
        }
    }
}

/// LLM client: streaming chat completions plus structured single-shot output.
pub trait LlmClient: Send + Sync + 'static {
    /// Send a chat request and receive a stream of deltas.
    fn chat_stream(
        &self,
        config: &ModelConfig,
        messages: Vec<ChatMessage>,
        tools: &[ToolDefinition],
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<StreamDelta>>>>;

    /// Ask for a JSON value matching `schema`.
    ///
    /// The default drains `chat_stream` and parses the text. Providers with
    /// native schema enforcement override this.
    fn chat_structured(
        &self,
        config: &ModelConfig,
        messages: Vec<ChatMessage>,
        schema: &OutputSchema,
    ) -> BoxFuture<'_, Result<serde_json::Value>> {
        let config = config.clone();
        let _ = schema;
        Box::pin(async move {
            let mut stream = self.chat_stream(&config, messages, &[]).await?;
            let mut text = String::new();
            while let Some(delta) = stream.next().await {
                if let StreamDelta::TextDelta(chunk) = delta? {
                    text.push_str(&chunk);
                }
            }
            parse_json_reply(&text)
        })
    }
}

/// Parse a model reply as JSON, tolerating markdown code fences around it.
pub fn parse_json_reply(text: &str) -> Result<serde_json::Value> {
    let trimmed = text.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .map(|rest| rest.trim_end().trim_end_matches("```").trim())
        .unwrap_or(trimmed);

    serde_json::from_str(body).map_err(|e| {
        let preview: String = body.chars().take(120).collect();
        VelloraError::LlmParse(format!("{} (reply: {:?})", e, preview))
    })
}

/// A tool exposed to the model inside a bounded agent loop.
pub trait Tool: Send + Sync + 'static {
    /// Tool name (used in LLM tool calls).
    fn name(&self) -> &str;

    /// Human-readable description.
    fn description(&self) -> &str;

    /// JSON Schema for tool input.
    fn input_schema(&self) -> serde_json::Value;

    /// Check arguments before anything runs. An error here means `execute` is never called.
    fn validate(&self, input: &serde_json::Value) -> Result<()> {
        let _ = input;
        Ok(())
    }

    /// Execute the tool with given input and context.
    fn execute(
        &self,
        input: serde_json::Value,
        ctx: ToolContext,
    ) -> BoxFuture<'_, Result<ToolResult>>;

    /// Timeout in seconds for this tool.
    fn timeout_secs(&self) -> u64 {
        30
    }
}

/// One external capability behind a typed async call.
pub trait ToolAdapter: Send + Sync + 'static {
    type Args: Send + 'static;
    type Output: Send + 'static;

    fn name(&self) -> &str;

    fn invoke(&self, args: Self::Args) -> BoxFuture<'_, Result<Self::Output>>;
}

pub type WebSearchAdapter = Arc<dyn ToolAdapter<Args = SearchQuery, Output = Vec<SearchHit>>>;
pub type VideoSearchAdapter = Arc<dyn ToolAdapter<Args = SearchQuery, Output = Vec<VideoHit>>>;
pub type TranscriptAdapter = Arc<dyn ToolAdapter<Args = TranscriptRequest, Output = String>>;
pub type LectureLookupAdapter = Arc<dyn ToolAdapter<Args = String, Output = String>>;
pub type CreateActionAdapter = Arc<dyn ToolAdapter<Args = CreateActionArgs, Output = String>>;
pub type CancelActionAdapter = Arc<dyn ToolAdapter<Args = CancelActionArgs, Output = ()>>;
pub type CalendarEventAdapter =
    Arc<dyn ToolAdapter<Args = CalendarEventRequest, Output = CalendarEventCreated>>;

/// Course and lecture catalog.
pub trait Catalog: Send + Sync + 'static {
    /// Video reference of a lecture, `None` if the lecture is unknown.
    fn video_reference(&self, lecture_id: &str) -> BoxFuture<'_, Result<Option<String>>>;

    /// E-mail addresses of learners enrolled with an instructor.
    fn attendee_emails(&self, instructor_id: &str) -> BoxFuture<'_, Result<Vec<String>>>;
}

/// Per-user scheduled action list.
///
/// Each call is one opaque read-modify-write; two overlapping calls for the
/// same user are not coordinated here.
pub trait ActionStore: Send + Sync + 'static {
    /// Append an action and return its new id.
    fn append_scheduled_action(
        &self,
        user_id: &str,
        action: NewScheduledAction,
    ) -> BoxFuture<'_, Result<String>>;

    /// Remove an action by id. `false` if the id was absent.
    fn remove_scheduled_action(&self, user_id: &str, action_id: &str)
        -> BoxFuture<'_, Result<bool>>;

    fn list_scheduled_actions(&self, user_id: &str) -> BoxFuture<'_, Result<Vec<ScheduledAction>>>;
}

/// Stored OAuth credentials for calendar access.
pub trait CredentialStore: Send + Sync + 'static {
    fn load_tokens(&self, user_id: &str) -> BoxFuture<'_, Result<Option<OAuthTokens>>>;

    fn save_access_token(&self, user_id: &str, access_token: &str) -> BoxFuture<'_, Result<()>>;

    /// Forget stale tokens so the user re-authenticates.
    fn purge_tokens(&self, user_id: &str) -> BoxFuture<'_, Result<()>>;
}

/// An authenticated calendar for one user.
pub trait CalendarService: Send + Sync + 'static {
    /// Insert an event and return the provider's raw event resource.
    fn insert_event(
        &self,
        body: serde_json::Value,
        with_conference: bool,
        notify_attendees: bool,
    ) -> BoxFuture<'_, Result<serde_json::Value>>;
}

/// Resolves a calendar handle for a caller.
pub trait CalendarProvider: Send + Sync + 'static {
    fn calendar_for(&self, user_id: &str) -> BoxFuture<'_, Result<Arc<dyn CalendarService>>>;
}
