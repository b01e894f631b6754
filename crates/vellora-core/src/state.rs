use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::types::{Quiz, SearchHit, StudyPlan, ToolOutcome, VideoHit};

/// Who is talking to the assistant. Selects the entry route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallerRole {
    #[serde(alias = "user")]
    Learner,
    #[serde(alias = "teacher")]
    Instructor,
}

/// Conversation state for one run.
///
/// Moved by value into every node and handed back with the node's
/// transition. Identity fields are private and fixed at construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct State {
    user_id: String,
    role: CallerRole,
    query: String,

    pub lecture_ref: Option<String>,
    pub video_ref: Option<String>,
    pub timezone: String,
    pub timestamp: DateTime<Utc>,

    pub scraped_context: Option<String>,
    pub search_results: Option<Vec<SearchHit>>,
    pub video_results: Option<Vec<VideoHit>>,
    pub derived_plan: Option<StudyPlan>,
    need_quiz: Option<bool>,
    pub tool_result: Option<ToolOutcome>,
    pub quiz: Option<Quiz>,
    response: Option<String>,
    pub error: Option<String>,

    revision: u64,
}

impl State {
    pub fn new(user_id: impl Into<String>, role: CallerRole, query: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            role,
            query: query.into(),
            lecture_ref: None,
            video_ref: None,
            timezone: "UTC".to_string(),
            timestamp: Utc::now(),
            scraped_context: None,
            search_results: None,
            video_results: None,
            derived_plan: None,
            need_quiz: None,
            tool_result: None,
            quiz: None,
            response: None,
            error: None,
            revision: 0,
        }
    }

    /// Set the media hints. Blank strings count as absent.
    pub fn with_media(mut self, lecture_ref: Option<String>, video_ref: Option<String>) -> Self {
        self.lecture_ref = lecture_ref.filter(|s| !s.trim().is_empty());
        self.video_ref = video_ref.filter(|s| !s.trim().is_empty());
        self
    }

    pub fn with_timezone(mut self, timezone: impl Into<String>) -> Self {
        self.timezone = timezone.into();
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn role(&self) -> CallerRole {
        self.role
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    /// The authoritative media hint: lecture reference wins over video reference.
    pub fn has_media_hint(&self) -> bool {
        self.lecture_ref.is_some() || self.video_ref.is_some()
    }

    pub fn set_need_quiz(&mut self, need_quiz: bool) {
        self.need_quiz = Some(need_quiz);
    }

    /// Consume the quiz flag. It is not durable past the first read.
    pub fn take_need_quiz(&mut self) -> Option<bool> {
        self.need_quiz.take()
    }

    pub fn response(&self) -> Option<&str> {
        self.response.as_deref()
    }

    /// Record the final answer. Only the first write sticks.
    pub fn set_response(&mut self, text: impl Into<String>) -> bool {
        if self.response.is_some() {
            warn!(user_id = %self.user_id, "Response already set, ignoring second write");
            return false;
        }
        self.response = Some(text.into());
        true
    }

    /// Record an advisory error. Later errors are appended, not lost.
    pub fn record_error(&mut self, message: impl Into<String>) {
        let message = message.into();
        self.error = Some(match self.error.take() {
            Some(prev) => format!("{}; {}", prev, message),
            None => message,
        });
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Called by the engine after every hop.
    pub fn bump_revision(&mut self) {
        self.revision += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_is_write_once() {
        let mut state = State::new("u1", CallerRole::Learner, "hi");
        assert!(state.set_response("first"));
        assert!(!state.set_response("second"));
        assert_eq!(state.response(), Some("first"));
    }

    #[test]
    fn need_quiz_is_consumed_on_read() {
        let mut state = State::new("u1", CallerRole::Learner, "quiz me");
        state.set_need_quiz(true);
        assert_eq!(state.take_need_quiz(), Some(true));
        assert_eq!(state.take_need_quiz(), None);
    }

    #[test]
    fn blank_media_hints_are_dropped() {
        let state = State::new("u1", CallerRole::Learner, "explain")
            .with_media(Some("  ".into()), Some("abc123".into()));
        assert!(state.lecture_ref.is_none());
        assert_eq!(state.video_ref.as_deref(), Some("abc123"));
        assert!(state.has_media_hint());
    }

    #[test]
    fn errors_accumulate() {
        let mut state = State::new("u1", CallerRole::Instructor, "hello");
        state.record_error("calendar down");
        state.record_error("search down");
        assert_eq!(state.error.as_deref(), Some("calendar down; search down"));
    }

    #[test]
    fn role_accepts_legacy_names() {
        let role: CallerRole = serde_json::from_str("\"teacher\"").unwrap();
        assert_eq!(role, CallerRole::Instructor);
        let role: CallerRole = serde_json::from_str("\"learner\"").unwrap();
        assert_eq!(role, CallerRole::Learner);
    }
}
