//! Graph runtime: a routing table of named nodes, compiled once and driven
//! hop by hop by the executor.
//!
//! A run starts at the entry router, which dispatches on the caller's role.
//! Every node receives the state by value and hands it back together with a
//! [`Transition`]. The executor forwards token chunks as they are produced
//! and stops at the first terminal transition.
//!
//! Node-local failures never reach the executor; they are recorded in the
//! state and steer the run towards a different node. Only routing defects
//! (unknown node, undeclared successor, hop limit) abort a run.

pub mod event;
pub mod executor;
pub mod node;
pub mod routing;

pub use event::{EventStream, GraphEvent};
pub use executor::{failed_stream, CompiledGraph, Graph};
pub use node::{Capabilities, Node, NodeContext, Toolbox, Transition};
pub use routing::{RoutingTable, ENTRY_NODE};
