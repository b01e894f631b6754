use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Role in a conversation with the completion service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single content block in a message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },

    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },

    #[serde(rename = "tool_result")]
    ToolResult {
        tool_use_id: String,
        content: String,
        is_error: bool,
    },
}

/// A chat message sent to the completion service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: Vec<ContentBlock>,
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: vec![ContentBlock::Text { text: text.into() }],
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: vec![ContentBlock::Text { text: text.into() }],
        }
    }

    pub fn assistant_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: vec![ContentBlock::Text { text: text.into() }],
        }
    }

    pub fn tool_result(
        tool_use_id: impl Into<String>,
        content: impl Into<String>,
        is_error: bool,
    ) -> Self {
        Self {
            role: Role::User,
            content: vec![ContentBlock::ToolResult {
                tool_use_id: tool_use_id.into(),
                content: content.into(),
                is_error,
            }],
        }
    }

    /// Extract all text content from this message.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    /// Extract all tool use blocks from this message.
    pub fn tool_uses(&self) -> Vec<(&str, &str, &serde_json::Value)> {
        self.content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::ToolUse { id, name, input } => {
                    Some((id.as_str(), name.as_str(), input))
                }
                _ => None,
            })
            .collect()
    }
}

/// Stop reason from the LLM.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
}

/// A streaming delta from the LLM.
#[derive(Debug, Clone)]
pub enum StreamDelta {
    /// A chunk of text content.
    TextDelta(String),

    /// Start of a tool use block.
    ToolUseStart {
        index: usize,
        id: String,
        name: String,
    },

    /// A chunk of tool use input JSON.
    ToolInputDelta { index: usize, delta: String },

    /// The response is complete.
    Stop(StopReason),

    /// Usage information.
    Usage {
        input_tokens: u64,
        output_tokens: u64,
    },
}

/// Tool definition for sending to the LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// Result of an LLM-facing tool execution.
#[derive(Debug, Clone)]
pub struct ToolResult {
    pub content: String,
    pub is_error: bool,
}

impl ToolResult {
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: true,
        }
    }
}

/// Context passed to agent-loop tools. Identity comes from the run, never from the model.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub user_id: String,
    pub timezone: String,
    pub now: DateTime<Utc>,
}

/// A single web search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

/// A single video search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoHit {
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub duration_secs: u64,
}

/// A generated study plan. `error` is set when the plan is degraded.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StudyPlan {
    pub topic: String,
    #[serde(default)]
    pub overview: String,
    #[serde(default)]
    pub modules: Vec<PlanModule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub search_results: Vec<SearchHit>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub video_results: Vec<VideoHit>,
}

impl StudyPlan {
    /// A plan carrying only the failure marker and whatever raw material was gathered.
    pub fn degraded(
        topic: impl Into<String>,
        error: impl Into<String>,
        search_results: Vec<SearchHit>,
        video_results: Vec<VideoHit>,
    ) -> Self {
        Self {
            topic: topic.into(),
            overview: String::new(),
            modules: vec![],
            error: Some(error.into()),
            search_results,
            video_results,
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.error.is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanModule {
    pub title: String,
    #[serde(default)]
    pub objectives: Vec<String>,
    #[serde(default)]
    pub resources: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Quiz {
    pub questions: Vec<QuizQuestion>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuizQuestion {
    pub question: String,
    #[serde(default)]
    pub options: Vec<String>,
    pub answer: String,
}

/// Outcome classification of a tool-driven node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    Success,
    Partial,
    Error,
}

/// One executed (or refused) tool call inside an agent loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceStep {
    pub tool: String,
    pub input: serde_json::Value,
    pub output: String,
    pub is_error: bool,
}

/// Result envelope of the most recent tool-driven node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutcome {
    pub status: ToolStatus,
    pub output: String,
    #[serde(default)]
    pub trace: Vec<TraceStep>,
}

impl ToolOutcome {
    pub fn error(output: impl Into<String>) -> Self {
        Self {
            status: ToolStatus::Error,
            output: output.into(),
            trace: vec![],
        }
    }
}

/// A persisted reminder / scheduled action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledAction {
    pub action_id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// ISO 8601 with offset for one-time actions, `HH:MM` for recurring ones.
    pub timestamp: String,
    #[serde(default)]
    pub days_of_week: Vec<String>,
}

/// Fields of a scheduled action before the store assigns an id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewScheduledAction {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub timestamp: String,
    #[serde(default)]
    pub days_of_week: Vec<String>,
}

impl NewScheduledAction {
    pub fn with_id(self, action_id: impl Into<String>) -> ScheduledAction {
        ScheduledAction {
            action_id: action_id.into(),
            title: self.title,
            description: self.description,
            timestamp: self.timestamp,
            days_of_week: self.days_of_week,
        }
    }
}

/// Event details the calendar agent asks to create.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarEventRequest {
    pub summary: String,
    pub start_time: String,
    pub end_time: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub attendees: Vec<String>,
    /// IANA name. Filled from the caller's timezone when the model omits it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    /// Request a video-conference link.
    #[serde(default, rename = "conferenceData")]
    pub conference: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarEventCreated {
    pub event_id: String,
    pub event_link: String,
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meet_link: Option<String>,
}

/// Stored OAuth credentials for a user's calendar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OAuthTokens {
    pub access_token: String,
    pub refresh_token: String,
}

/// Arguments for web and video search adapters.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchQuery {
    pub query: String,
    pub max_results: usize,
}

impl SearchQuery {
    pub fn new(query: impl Into<String>, max_results: usize) -> Self {
        Self {
            query: query.into(),
            max_results,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptRequest {
    pub video_url: String,
    pub language: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateActionArgs {
    pub user_id: String,
    pub action: NewScheduledAction,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CancelActionArgs {
    pub user_id: String,
    pub action_id: String,
}
