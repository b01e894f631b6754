use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::mpsc;

use vellora_core::config::{AppConfig, ModelConfig, ModelStep};
use vellora_core::state::State;
use vellora_core::traits::{
    CalendarProvider, CancelActionAdapter, Catalog, CreateActionAdapter, LectureLookupAdapter,
    LlmClient, TranscriptAdapter, VideoSearchAdapter, WebSearchAdapter,
};

use super::event::GraphEvent;

/// Where a node sends the run next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Goto(String),
    Terminal,
}

impl Transition {
    pub fn goto(node: &str) -> Self {
        Self::Goto(node.to_string())
    }
}

/// A named unit of work in the graph.
///
/// `run` must always hand the state back with a transition. Failures of
/// external calls are recorded in the state, never returned.
pub trait Node: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Every node this one may route to.
    fn successors(&self) -> Vec<&str>;

    fn run<'a>(&'a self, state: State, ctx: &'a NodeContext) -> BoxFuture<'a, (Transition, State)>;
}

/// External capabilities reachable from nodes.
#[derive(Clone)]
pub struct Toolbox {
    pub lecture_lookup: LectureLookupAdapter,
    pub web_search: WebSearchAdapter,
    pub video_search: VideoSearchAdapter,
    pub transcript: TranscriptAdapter,
    pub create_action: CreateActionAdapter,
    pub cancel_action: CancelActionAdapter,
    pub calendar: Arc<dyn CalendarProvider>,
    pub catalog: Arc<dyn Catalog>,
}

/// Everything a node may touch besides the state.
pub struct Capabilities {
    pub llm: Arc<dyn LlmClient>,
    pub config: AppConfig,
    pub tools: Toolbox,
}

/// Per-invocation handle given to a node.
pub struct NodeContext {
    caps: Arc<Capabilities>,
    node: String,
    tx: mpsc::Sender<GraphEvent>,
}

impl NodeContext {
    pub fn new(caps: Arc<Capabilities>, node: impl Into<String>, tx: mpsc::Sender<GraphEvent>) -> Self {
        Self {
            caps,
            node: node.into(),
            tx,
        }
    }

    pub fn node(&self) -> &str {
        &self.node
    }

    pub fn llm(&self) -> &dyn LlmClient {
        self.caps.llm.as_ref()
    }

    pub fn config(&self) -> &AppConfig {
        &self.caps.config
    }

    pub fn tools(&self) -> &Toolbox {
        &self.caps.tools
    }

    /// Model settings for one kind of completion call.
    pub fn model(&self, step: ModelStep) -> ModelConfig {
        self.caps.config.model_for(step)
    }

    /// Forward a chunk of model output to the caller.
    pub async fn emit_token(&self, text: impl Into<String>) {
        let event = GraphEvent::TokenChunk {
            node: self.node.clone(),
            text: text.into(),
        };
        // A closed receiver is noticed by the executor
        let _ = self.tx.send(event).await;
    }
}
