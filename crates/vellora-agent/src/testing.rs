//! Fixtures shared by the unit tests of this crate.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::mpsc;

use vellora_core::config::AppConfig;
use vellora_core::error::VelloraError;
use vellora_core::state::State;
use vellora_core::types::{SearchHit, SearchQuery, TranscriptRequest, VideoHit};
use vellora_test_utils::{
    test_config, RecordingActionStore, ScriptedLlm, ScriptedReply, StubAdapter, StubCalendarProvider,
    StubCatalog,
};
use vellora_tools::builtin::{CancelScheduledAction, CreateScheduledAction};

use crate::graph::{Capabilities, GraphEvent, Node, NodeContext, Toolbox, Transition};

/// Toolbox where every search comes back empty and every lookup misses.
pub fn toolbox() -> Toolbox {
    let store = Arc::new(RecordingActionStore::new());
    toolbox_with_store(store)
}

pub fn toolbox_with_store(store: Arc<RecordingActionStore>) -> Toolbox {
    Toolbox {
        lecture_lookup: Arc::new(StubAdapter::<String, String>::failing("lecture_lookup", || {
            VelloraError::NotFound("lecture".into())
        })),
        web_search: Arc::new(StubAdapter::<SearchQuery, Vec<SearchHit>>::returning("web_search", vec![])),
        video_search: Arc::new(StubAdapter::<SearchQuery, Vec<VideoHit>>::returning("video_search", vec![])),
        transcript: Arc::new(StubAdapter::<TranscriptRequest, String>::failing("transcript", || {
            VelloraError::NoCaptions("https://youtu.be/none".into())
        })),
        create_action: Arc::new(CreateScheduledAction::new(store.clone())),
        cancel_action: Arc::new(CancelScheduledAction::new(store)),
        calendar: Arc::new(StubCalendarProvider::unavailable()),
        catalog: Arc::new(StubCatalog::new()),
    }
}

/// A scripted model shared between the capabilities and the test.
pub fn scripted(replies: impl IntoIterator<Item = ScriptedReply>) -> Arc<ScriptedLlm> {
    Arc::new(ScriptedLlm::new(replies))
}

pub fn caps(llm: Arc<ScriptedLlm>) -> Capabilities {
    caps_with(llm, toolbox(), test_config())
}

pub fn caps_with(llm: Arc<ScriptedLlm>, tools: Toolbox, config: AppConfig) -> Capabilities {
    Capabilities {
        llm,
        config,
        tools,
    }
}

/// A detached node context plus the receiving end of its token channel.
pub fn context(caps: Capabilities, node: &str) -> (NodeContext, mpsc::Receiver<GraphEvent>) {
    let (tx, rx) = mpsc::channel(512);
    (NodeContext::new(Arc::new(caps), node, tx), rx)
}

/// Text of every token chunk received so far.
pub fn drain_tokens(rx: &mut mpsc::Receiver<GraphEvent>) -> String {
    let mut out = String::new();
    while let Ok(event) = rx.try_recv() {
        if let GraphEvent::TokenChunk { text, .. } = event {
            out.push_str(&text);
        }
    }
    out
}

// ── Minimal nodes for executor tests ────────────────────────────

/// Always goes to `next`.
pub struct Hop {
    name: String,
    next: String,
}

impl Hop {
    pub fn new(name: &str, next: &str) -> Self {
        Self {
            name: name.into(),
            next: next.into(),
        }
    }
}

impl Node for Hop {
    fn name(&self) -> &str {
        &self.name
    }
    fn successors(&self) -> Vec<&str> {
        vec![self.next.as_str()]
    }
    fn run<'a>(&'a self, state: State, _ctx: &'a NodeContext) -> BoxFuture<'a, (Transition, State)> {
        Box::pin(async move { (Transition::goto(&self.next), state) })
    }
}

/// Sets the response to "done" and ends the run.
pub struct Stop {
    name: String,
}

impl Stop {
    pub fn new(name: &str) -> Self {
        Self { name: name.into() }
    }
}

impl Node for Stop {
    fn name(&self) -> &str {
        &self.name
    }
    fn successors(&self) -> Vec<&str> {
        vec![]
    }
    fn run<'a>(&'a self, mut state: State, _ctx: &'a NodeContext) -> BoxFuture<'a, (Transition, State)> {
        Box::pin(async move {
            state.set_response("done");
            (Transition::Terminal, state)
        })
    }
}

/// Routes back to itself forever.
pub struct Loop {
    name: String,
}

impl Loop {
    pub fn new(name: &str) -> Self {
        Self { name: name.into() }
    }
}

impl Node for Loop {
    fn name(&self) -> &str {
        &self.name
    }
    fn successors(&self) -> Vec<&str> {
        vec![self.name.as_str()]
    }
    fn run<'a>(&'a self, state: State, _ctx: &'a NodeContext) -> BoxFuture<'a, (Transition, State)> {
        Box::pin(async move { (Transition::goto(&self.name), state) })
    }
}

/// Declares no successors but routes to `target` anyway.
pub struct Stray {
    name: String,
    target: String,
}

impl Stray {
    pub fn new(name: &str, target: &str) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
        }
    }
}

impl Node for Stray {
    fn name(&self) -> &str {
        &self.name
    }
    fn successors(&self) -> Vec<&str> {
        vec![]
    }
    fn run<'a>(&'a self, state: State, _ctx: &'a NodeContext) -> BoxFuture<'a, (Transition, State)> {
        Box::pin(async move { (Transition::goto(&self.target), state) })
    }
}

/// Emits fixed tokens, then ends the run.
pub struct Talker {
    name: String,
    tokens: Vec<String>,
}

impl Talker {
    pub fn new(name: &str, tokens: &[&str]) -> Self {
        Self {
            name: name.into(),
            tokens: tokens.iter().map(|t| t.to_string()).collect(),
        }
    }
}

impl Node for Talker {
    fn name(&self) -> &str {
        &self.name
    }
    fn successors(&self) -> Vec<&str> {
        vec![]
    }
    fn run<'a>(&'a self, mut state: State, ctx: &'a NodeContext) -> BoxFuture<'a, (Transition, State)> {
        Box::pin(async move {
            for t in &self.tokens {
                ctx.emit_token(t.clone()).await;
            }
            state.set_response(self.tokens.concat());
            (Transition::Terminal, state)
        })
    }
}

/// Never finishes. Flags when its future is dropped.
pub struct Stall {
    name: String,
    dropped: Arc<AtomicBool>,
}

impl Stall {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.into(),
            dropped: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn dropped_flag(&self) -> Arc<AtomicBool> {
        self.dropped.clone()
    }
}

struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

impl Node for Stall {
    fn name(&self) -> &str {
        &self.name
    }
    fn successors(&self) -> Vec<&str> {
        vec![]
    }
    fn run<'a>(&'a self, state: State, _ctx: &'a NodeContext) -> BoxFuture<'a, (Transition, State)> {
        let flag = DropFlag(self.dropped.clone());
        Box::pin(async move {
            let _flag = flag;
            futures::future::pending::<()>().await;
            (Transition::Terminal, state)
        })
    }
}
