//! Whole runs through the study graph with scripted collaborators.

use std::sync::Arc;

use futures::future::BoxFuture;
use futures::StreamExt;
use serde_json::json;

use vellora_agent::{
    study_graph, Capabilities, EventStream, Graph, GraphEvent, Node, NodeContext, RoutingTable,
    RunRequest, RunSession, Toolbox, Transition,
};
use vellora_core::error::VelloraError;
use vellora_core::state::{CallerRole, State};
use vellora_core::traits::{ActionStore, Catalog};
use vellora_core::types::{SearchHit, SearchQuery, ToolStatus, TranscriptRequest, VideoHit};
use vellora_memory::SqliteStore;
use vellora_test_utils::{
    test_config, ScriptedLlm, ScriptedReply, StubAdapter, StubCalendarProvider,
};
use vellora_tools::builtin::{CancelScheduledAction, CreateScheduledAction, LectureLookup};

fn toolbox(store: Arc<SqliteStore>) -> Toolbox {
    let catalog: Arc<dyn Catalog> = store.clone();
    let actions: Arc<dyn ActionStore> = store;
    Toolbox {
        lecture_lookup: Arc::new(LectureLookup::new(catalog.clone())),
        web_search: Arc::new(StubAdapter::<SearchQuery, Vec<SearchHit>>::returning("web_search", vec![])),
        video_search: Arc::new(StubAdapter::<SearchQuery, Vec<VideoHit>>::returning("video_search", vec![])),
        transcript: Arc::new(StubAdapter::<TranscriptRequest, String>::failing("transcript", || {
            VelloraError::NoCaptions("https://www.youtube.com/watch?v=calc101".into())
        })),
        create_action: Arc::new(CreateScheduledAction::new(actions.clone())),
        cancel_action: Arc::new(CancelScheduledAction::new(actions)),
        calendar: Arc::new(StubCalendarProvider::unavailable()),
        catalog,
    }
}

fn caps(llm: Arc<ScriptedLlm>, tools: Toolbox) -> Capabilities {
    Capabilities {
        llm,
        config: test_config(),
        tools,
    }
}

fn store() -> Arc<SqliteStore> {
    Arc::new(SqliteStore::in_memory().unwrap())
}

async fn collect(stream: EventStream) -> Vec<GraphEvent> {
    stream.collect().await
}

fn path(events: &[GraphEvent]) -> Vec<&str> {
    events
        .iter()
        .filter_map(|e| match e {
            GraphEvent::NodeEntered { node } => Some(node.as_str()),
            _ => None,
        })
        .collect()
}

/// The single `Completed` state of a run that must not have failed.
fn completed(events: &[GraphEvent]) -> &State {
    let failed = events.iter().filter(|e| matches!(e, GraphEvent::Failed { .. })).count();
    assert_eq!(failed, 0, "run failed");

    let finals: Vec<&State> = events
        .iter()
        .filter_map(|e| match e {
            GraphEvent::Completed { state } => Some(state.as_ref()),
            _ => None,
        })
        .collect();
    assert_eq!(finals.len(), 1);
    assert!(matches!(events.last(), Some(GraphEvent::Completed { .. })));
    finals[0]
}

#[tokio::test]
async fn learner_recurring_reminder_goes_through_scheduler() {
    let store = store();
    let llm = Arc::new(ScriptedLlm::new([
        ScriptedReply::Json(json!({ "intent": "schedule" })),
        ScriptedReply::tool_call(
            "create_scheduled_action",
            json!({
                "title": "Review calculus",
                "timestamp": "18:00",
                "days_of_week": ["Monday"]
            }),
        ),
        ScriptedReply::text("Added a weekly calculus review."),
        ScriptedReply::text("Done! I'll remind you to review calculus every Monday at 6pm."),
    ]));
    let graph = study_graph(caps(llm.clone(), toolbox(store.clone())));

    let state = State::new(
        "u1",
        CallerRole::Learner,
        "remind me to review calculus every Monday at 6pm",
    );
    let events = collect(graph.run(state)).await;

    assert_eq!(path(&events), ["entry_router", "learner", "scheduler", "response"]);
    let state = completed(&events);
    assert_eq!(state.tool_result.as_ref().unwrap().status, ToolStatus::Success);
    assert!(!state.response().unwrap().is_empty());

    let saved = store.list_scheduled_actions("u1").await.unwrap();
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].timestamp, "18:00");
    assert_eq!(saved[0].days_of_week, vec!["Monday"]);
    assert_eq!(llm.remaining(), 0);
}

#[tokio::test]
async fn lecture_without_captions_still_answers() {
    let store = store();
    store
        .upsert_lecture("lec-42", "Limits", "https://www.youtube.com/watch?v=calc101")
        .unwrap();
    let llm = Arc::new(ScriptedLlm::new([ScriptedReply::text(
        "I couldn't read that lecture, but here is what limits are about.",
    )]));
    let graph = study_graph(caps(llm.clone(), toolbox(store)));

    let state = State::new("u1", CallerRole::Learner, "explain this")
        .with_media(Some("lec-42".into()), None);
    let events = collect(graph.run(state)).await;

    assert_eq!(path(&events), ["entry_router", "learner", "context_lookup", "response"]);
    let state = completed(&events);
    assert!(state.scraped_context.is_none());
    assert!(state.response().is_some());
    // Only the response was generated; classification was skipped
    assert_eq!(llm.call_count(), 1);
}

#[tokio::test]
async fn instructor_greeting_skips_calendar() {
    let llm = Arc::new(ScriptedLlm::new([
        ScriptedReply::Json(json!({ "need_calendar_action": false })),
        ScriptedReply::text("Hello! How can I help with your class today?"),
    ]));
    let graph = study_graph(caps(llm, toolbox(store())));

    let events = collect(graph.run(State::new("t1", CallerRole::Instructor, "hello"))).await;

    assert_eq!(path(&events), ["entry_router", "instructor", "response"]);
    let state = completed(&events);
    assert!(state.tool_result.is_none());
    assert!(state.response().is_some());
}

struct Dangling;

impl Node for Dangling {
    fn name(&self) -> &str {
        "start"
    }

    fn successors(&self) -> Vec<&str> {
        vec!["ghost"]
    }

    fn run<'a>(&'a self, state: State, _ctx: &'a NodeContext) -> BoxFuture<'a, (Transition, State)> {
        Box::pin(async move { (Transition::goto("ghost"), state) })
    }
}

#[tokio::test]
async fn malformed_graph_fails_once() {
    let routes = RoutingTable::new()
        .route_role(CallerRole::Learner, "start")
        .route_role(CallerRole::Instructor, "start")
        .with_node(Dangling);
    let llm = Arc::new(ScriptedLlm::new([]));
    let graph = Graph::new(routes, caps(llm, toolbox(store())));

    let events = collect(graph.run(State::new("u1", CallerRole::Learner, "hi"))).await;

    assert_eq!(events.len(), 1);
    assert!(matches!(events[0], GraphEvent::Failed { .. }));
}

#[tokio::test]
async fn empty_searches_degrade_the_same_way_every_time() {
    for _ in 0..2 {
        let llm = Arc::new(ScriptedLlm::new([
            ScriptedReply::Json(json!({ "intent": "course_planner" })),
            ScriptedReply::Json(json!({ "topic": "dynamic programming" })),
            ScriptedReply::text("I couldn't find resources right now, but here is a starting point."),
        ]));
        let graph = study_graph(caps(llm, toolbox(store())));

        let events = collect(graph.run(State::new(
            "u1",
            CallerRole::Learner,
            "make me a course on dynamic programming",
        )))
        .await;

        assert_eq!(path(&events), ["entry_router", "learner", "course_planner", "response"]);
        let plan = completed(&events).derived_plan.clone().unwrap();
        assert_eq!(plan.error.as_deref(), Some("no_search_results"));
        assert!(plan.modules.is_empty());
    }
}

#[tokio::test]
async fn lecture_quiz_streams_quiz_frames() {
    let mut tools = toolbox(store());
    tools.lecture_lookup = Arc::new(StubAdapter::<String, String>::returning("lecture_lookup", "calc101".into()));
    tools.transcript = Arc::new(StubAdapter::<TranscriptRequest, String>::returning(
        "transcript",
        "A limit describes the value a function approaches.".into(),
    ));
    let quiz = json!({
        "questions": [{
            "question": "What does a limit describe?",
            "options": ["An approached value", "A derivative", "An integral", "A sum"],
            "answer": "An approached value"
        }]
    });
    let llm = Arc::new(ScriptedLlm::new([
        ScriptedReply::Json(json!({ "context": "Limits and continuity.", "need_quiz": true })),
        ScriptedReply::Json(quiz),
    ]));
    let session = RunSession::new(&study_graph(caps(llm, tools)));

    let mut req = RunRequest::new("u1", CallerRole::Learner, "quiz me on this lecture");
    req.lecture_ref = Some("lec-7".into());
    let frames: Vec<String> = session.frames(req).collect().await;

    let kinds: Vec<String> = frames
        .iter()
        .map(|f| {
            let body: serde_json::Value =
                serde_json::from_str(f.trim_start_matches("data: ").trim_end()).unwrap();
            body["type"].as_str().unwrap().to_string()
        })
        .collect();
    assert!(kinds.len() > 1);
    assert!(kinds[..kinds.len() - 1].iter().all(|k| k == "quiz"));
    assert_eq!(kinds.last().map(String::as_str), Some("done"));
}

#[tokio::test]
async fn every_role_completes_exactly_once() {
    for role in [CallerRole::Learner, CallerRole::Instructor] {
        // Both classifiers fail; each route still ends in a response
        let llm = Arc::new(ScriptedLlm::new([
            ScriptedReply::Error("HTTP 503".into()),
            ScriptedReply::text("Sorry, something went wrong on my side."),
        ]));
        let graph = study_graph(caps(llm, toolbox(store())));

        let events = collect(graph.run(State::new("u1", role, "hi"))).await;
        let state = completed(&events);
        assert!(state.response().is_some());
        assert!(state.error.is_some());
        assert_eq!(path(&events).last(), Some(&"response"));
    }
}
