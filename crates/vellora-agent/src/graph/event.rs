use tokio_stream::wrappers::ReceiverStream;

use vellora_core::state::State;

/// Events produced by one graph run, in order.
#[derive(Debug, Clone)]
pub enum GraphEvent {
    /// The executor is about to invoke a node.
    NodeEntered { node: String },

    /// A chunk of model output, forwarded the moment it arrived.
    TokenChunk { node: String, text: String },

    /// A terminal node finished. Always the last event of a successful run.
    Completed { state: Box<State> },

    /// The run was aborted by a routing defect or cancellation.
    Failed { reason: String },
}

impl GraphEvent {
    /// `true` for the event that closes a run.
    pub fn is_final(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Failed { .. })
    }
}

/// The receiving half of a run.
pub type EventStream = ReceiverStream<GraphEvent>;
