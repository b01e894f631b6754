pub mod agent_loop;
pub mod graph;
pub mod nodes;
pub mod session;
pub mod structured;

#[cfg(test)]
pub(crate) mod testing;

pub use agent_loop::AgentLoop;
pub use graph::{
    Capabilities, CompiledGraph, EventStream, Graph, GraphEvent, Node, NodeContext,
    RoutingTable, Toolbox, Transition,
};
pub use nodes::{study_graph, study_routes};
pub use session::{to_wire_frame, RunRequest, RunSession};
