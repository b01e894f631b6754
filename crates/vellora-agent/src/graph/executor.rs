use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use vellora_core::config::AppConfig;
use vellora_core::error::{Result, VelloraError};
use vellora_core::state::State;

use super::event::{EventStream, GraphEvent};
use super::node::{Capabilities, Node, NodeContext, Transition};
use super::routing::{RoutingTable, ENTRY_NODE};

/// A routing table bound to its capabilities, not yet validated.
pub struct Graph {
    routes: RoutingTable,
    caps: Arc<Capabilities>,
}

impl Graph {
    pub fn new(routes: RoutingTable, caps: Capabilities) -> Self {
        Self {
            routes,
            caps: Arc::new(caps),
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.caps.config
    }

    /// Validate the routing table and freeze it for execution.
    pub fn compile(&self) -> Result<CompiledGraph> {
        let nodes = self.routes.compile_nodes()?;
        info!(nodes = nodes.len(), "Graph compiled");
        Ok(CompiledGraph {
            nodes: Arc::new(nodes),
            caps: self.caps.clone(),
            max_hops: self.caps.config.graph.max_hops,
            buffer: self.caps.config.graph.event_buffer.max(1),
        })
    }

    /// Compile and run. A compile error yields a stream with a single `Failed`.
    pub fn run(&self, state: State) -> EventStream {
        match self.compile() {
            Ok(graph) => graph.run(state),
            Err(e) => {
                error!(error = %e, "Graph failed to compile");
                failed_stream(e.to_string())
            }
        }
    }
}

/// A stream that only reports `reason` as a failure.
pub fn failed_stream(reason: String) -> EventStream {
    let (tx, rx) = mpsc::channel(1);
    // Capacity 1 and a fresh receiver: this cannot fail
    let _ = tx.try_send(GraphEvent::Failed { reason });
    ReceiverStream::new(rx)
}

/// A validated graph, cheap to share between concurrent runs.
#[derive(Clone)]
pub struct CompiledGraph {
    nodes: Arc<HashMap<String, Arc<dyn Node>>>,
    caps: Arc<Capabilities>,
    max_hops: usize,
    buffer: usize,
}

impl CompiledGraph {
    pub fn config(&self) -> &AppConfig {
        &self.caps.config
    }

    pub fn run(&self, state: State) -> EventStream {
        self.run_with_cancel(state, CancellationToken::new())
    }

    /// Start a run on its own task. Dropping the stream stops the run after
    /// the in-flight node is abandoned; cancelling `cancel` also emits `Failed`.
    pub fn run_with_cancel(&self, state: State, cancel: CancellationToken) -> EventStream {
        let (tx, rx) = mpsc::channel(self.buffer);
        let driver = Driver {
            nodes: self.nodes.clone(),
            caps: self.caps.clone(),
            max_hops: self.max_hops,
            tx,
            cancel,
        };
        tokio::spawn(driver.drive(state));
        ReceiverStream::new(rx)
    }
}

struct Driver {
    nodes: Arc<HashMap<String, Arc<dyn Node>>>,
    caps: Arc<Capabilities>,
    max_hops: usize,
    tx: mpsc::Sender<GraphEvent>,
    cancel: CancellationToken,
}

impl Driver {
    async fn drive(self, mut state: State) {
        let user_id = state.user_id().to_string();
        let mut current = ENTRY_NODE.to_string();
        let mut hops = 0usize;

        info!(user_id = %user_id, role = ?state.role(), "Graph run started");

        loop {
            if self.cancel.is_cancelled() {
                self.fail(VelloraError::Cancelled).await;
                return;
            }

            if hops >= self.max_hops {
                self.fail(VelloraError::HopLimitExceeded(self.max_hops)).await;
                return;
            }

            let node = match self.nodes.get(&current) {
                Some(n) => n.clone(),
                None => {
                    self.fail(VelloraError::UnknownNode(current)).await;
                    return;
                }
            };
            hops += 1;

            debug!(node = %current, hop = hops, "Entering node");
            let entered = GraphEvent::NodeEntered {
                node: current.clone(),
            };
            if self.tx.send(entered).await.is_err() {
                info!(user_id = %user_id, "Event stream dropped, stopping run");
                return;
            }

            let ctx = NodeContext::new(self.caps.clone(), current.clone(), self.tx.clone());
            let (transition, next_state) = tokio::select! {
                out = node.run(state, &ctx) => out,
                _ = self.tx.closed() => {
                    info!(user_id = %user_id, node = %current, "Event stream dropped mid-node, stopping run");
                    return;
                }
                _ = self.cancel.cancelled() => {
                    self.fail(VelloraError::Cancelled).await;
                    return;
                }
            };
            state = next_state;
            state.bump_revision();

            match transition {
                Transition::Terminal => {
                    info!(
                        user_id = %user_id,
                        node = %current,
                        hops,
                        "Graph run complete"
                    );
                    let _ = self
                        .tx
                        .send(GraphEvent::Completed {
                            state: Box::new(state),
                        })
                        .await;
                    return;
                }
                Transition::Goto(next) => {
                    if !node.successors().contains(&next.as_str()) {
                        self.fail(VelloraError::UndeclaredSuccessor {
                            from: current,
                            to: next,
                        })
                        .await;
                        return;
                    }
                    current = next;
                }
            }
        }
    }

    async fn fail(&self, err: VelloraError) {
        if err.is_routing_defect() {
            error!(error = %err, "Graph run aborted");
        } else {
            warn!(error = %err, "Graph run stopped");
        }
        let _ = self
            .tx
            .send(GraphEvent::Failed {
                reason: err.to_string(),
            })
            .await;
    }
}
