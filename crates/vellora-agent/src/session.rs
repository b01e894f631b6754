use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use vellora_core::state::{CallerRole, State};

use crate::graph::{failed_stream, CompiledGraph, EventStream, Graph, GraphEvent};
use crate::nodes::QUIZ;

/// One inbound chat request.
#[derive(Debug, Clone, Deserialize)]
pub struct RunRequest {
    pub user_id: String,
    #[serde(alias = "user_type")]
    pub role: CallerRole,
    pub query: String,
    #[serde(default, alias = "lecture_id")]
    pub lecture_ref: Option<String>,
    #[serde(default, alias = "video_url")]
    pub video_ref: Option<String>,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl RunRequest {
    pub fn new(user_id: impl Into<String>, role: CallerRole, query: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            role,
            query: query.into(),
            lecture_ref: None,
            video_ref: None,
            timezone: None,
            timestamp: None,
        }
    }
}

/// Starts runs against a graph compiled once, and re-frames their events
/// for the wire.
#[derive(Clone)]
pub struct RunSession {
    graph: std::result::Result<CompiledGraph, String>,
    default_timezone: String,
}

impl RunSession {
    pub fn new(graph: &Graph) -> Self {
        let compiled = graph.compile().map_err(|e| {
            error!(error = %e, "Graph failed to compile, every run will fail");
            e.to_string()
        });
        Self {
            graph: compiled,
            default_timezone: graph.config().graph.default_timezone.clone(),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.graph.is_ok()
    }

    /// Build the initial state for a request. Missing clock fields are filled
    /// from the server.
    pub fn initial_state(&self, req: RunRequest) -> State {
        let timezone = req
            .timezone
            .filter(|tz| !tz.trim().is_empty())
            .unwrap_or_else(|| self.default_timezone.clone());
        State::new(req.user_id, req.role, req.query)
            .with_media(req.lecture_ref, req.video_ref)
            .with_timezone(timezone)
            .with_timestamp(req.timestamp.unwrap_or_else(Utc::now))
    }

    pub fn start_run(&self, req: RunRequest) -> EventStream {
        self.start_run_with_cancel(req, CancellationToken::new())
    }

    pub fn start_run_with_cancel(&self, req: RunRequest, cancel: CancellationToken) -> EventStream {
        let state = self.initial_state(req);
        info!(user_id = %state.user_id(), role = ?state.role(), "Run requested");
        match self.graph {
            Ok(ref graph) => graph.run_with_cancel(state, cancel),
            Err(ref reason) => failed_stream(reason.clone()),
        }
    }

    /// Wire frames for one run, ending after `done` or `error`.
    pub fn frames(&self, req: RunRequest) -> impl Stream<Item = String> + Send + 'static {
        self.start_run(req)
            .filter_map(|event| futures::future::ready(to_wire_frame(&event)))
    }
}

/// Serialize one event as a server-sent-event frame. Trace events are dropped.
pub fn to_wire_frame(event: &GraphEvent) -> Option<String> {
    let payload = match event {
        GraphEvent::NodeEntered { .. } => return None,
        GraphEvent::TokenChunk { node, text } => {
            let kind = if node == QUIZ { "quiz" } else { "response" };
            json!({ "type": kind, "content": text })
        }
        GraphEvent::Completed { .. } => json!({ "type": "done", "content": "" }),
        GraphEvent::Failed { reason } => json!({ "type": "error", "content": reason }),
    };
    Some(format!("data: {}\n\n", payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::RoutingTable;
    use crate::nodes::study_graph;
    use crate::testing::{caps, scripted};
    use serde_json::Value;
    use vellora_test_utils::ScriptedReply;

    fn body(frame: &str) -> Value {
        let json = frame
            .strip_prefix("data: ")
            .and_then(|s| s.strip_suffix("\n\n"))
            .unwrap();
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn token_frames_carry_node_kind() {
        let quiz = to_wire_frame(&GraphEvent::TokenChunk {
            node: "quiz".into(),
            text: "Q1".into(),
        })
        .unwrap();
        assert_eq!(body(&quiz), json!({ "type": "quiz", "content": "Q1" }));

        let answer = to_wire_frame(&GraphEvent::TokenChunk {
            node: "response".into(),
            text: "Hi".into(),
        })
        .unwrap();
        assert_eq!(body(&answer)["type"], "response");
    }

    #[test]
    fn trace_events_are_dropped() {
        assert!(to_wire_frame(&GraphEvent::NodeEntered { node: "learner".into() }).is_none());
    }

    #[test]
    fn terminal_frames() {
        let state = State::new("u1", CallerRole::Learner, "hi");
        let done = to_wire_frame(&GraphEvent::Completed { state: Box::new(state) }).unwrap();
        assert_eq!(body(&done), json!({ "type": "done", "content": "" }));

        let failed = to_wire_frame(&GraphEvent::Failed { reason: "hop limit".into() }).unwrap();
        assert_eq!(body(&failed), json!({ "type": "error", "content": "hop limit" }));
    }

    #[test]
    fn request_accepts_legacy_field_names() {
        let req: RunRequest = serde_json::from_value(json!({
            "user_id": "u1",
            "user_type": "teacher",
            "query": "schedule a class",
            "lecture_id": "lec-9"
        }))
        .unwrap();
        assert_eq!(req.role, CallerRole::Instructor);
        assert_eq!(req.lecture_ref.as_deref(), Some("lec-9"));
        assert!(req.video_ref.is_none());
    }

    #[test]
    fn initial_state_fills_clock_and_drops_blank_hints() {
        let session = RunSession::new(&study_graph(caps(scripted([]))));
        let mut req = RunRequest::new("u1", CallerRole::Learner, "hi");
        req.video_ref = Some("   ".into());
        req.timezone = Some("Europe/Berlin".into());

        let state = session.initial_state(req);
        assert!(!state.has_media_hint());
        assert_eq!(state.timezone, "Europe/Berlin");

        let state = session.initial_state(RunRequest::new("u1", CallerRole::Learner, "hi"));
        assert_eq!(state.timezone, "UTC");
    }

    #[tokio::test]
    async fn frames_for_a_plain_learner_question() {
        let llm = scripted([
            ScriptedReply::Json(json!({ "intent": "other" })),
            ScriptedReply::text("Keep practising."),
        ]);
        let session = RunSession::new(&study_graph(caps(llm)));
        assert!(session.is_ready());

        let frames: Vec<String> = session
            .frames(RunRequest::new("u1", CallerRole::Learner, "any tips?"))
            .collect()
            .await;
        let bodies: Vec<Value> = frames.iter().map(|f| body(f)).collect();

        let text: String = bodies
            .iter()
            .filter(|b| b["type"] == "response")
            .map(|b| b["content"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(text, "Keep practising.");
        assert_eq!(bodies.last().unwrap()["type"], "done");
    }

    #[tokio::test]
    async fn broken_graph_reports_one_error_frame() {
        let graph = Graph::new(RoutingTable::new(), caps(scripted([])));
        let session = RunSession::new(&graph);
        assert!(!session.is_ready());

        let frames: Vec<String> = session
            .frames(RunRequest::new("u1", CallerRole::Learner, "hi"))
            .collect()
            .await;
        assert_eq!(frames.len(), 1);
        assert_eq!(body(&frames[0])["type"], "error");
    }
}
