use std::collections::HashMap;
use std::sync::Arc;

use vellora_core::error::{Result, VelloraError};
use vellora_core::state::CallerRole;

use super::node::Node;
use crate::nodes::EntryRouter;

/// Name under which the role dispatcher is registered.
pub const ENTRY_NODE: &str = "entry_router";

const ROLES: [CallerRole; 2] = [CallerRole::Learner, CallerRole::Instructor];

/// Node name to implementation, plus the role branches out of the entry point.
#[derive(Default)]
pub struct RoutingTable {
    nodes: HashMap<String, Arc<dyn Node>>,
    role_branches: HashMap<CallerRole, String>,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route callers of `role` to `node` from the entry point.
    pub fn route_role(mut self, role: CallerRole, node: &str) -> Self {
        self.role_branches.insert(role, node.to_string());
        self
    }

    pub fn with_node(mut self, node: impl Node) -> Self {
        self.add_node(Arc::new(node));
        self
    }

    /// Register a node. A later node with the same name replaces the earlier one.
    pub fn add_node(&mut self, node: Arc<dyn Node>) {
        self.nodes.insert(node.name().to_string(), node);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Node>> {
        self.nodes.get(name).cloned()
    }

    /// Registered node names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.nodes.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Check that every role has a branch and every referenced name exists.
    pub fn validate(&self) -> Result<()> {
        for role in ROLES {
            let target = self.role_branches.get(&role).ok_or_else(|| {
                VelloraError::Compile(format!("no entry branch for role {:?}", role))
            })?;
            if !self.nodes.contains_key(target) {
                return Err(VelloraError::Compile(format!(
                    "entry branch for {:?} targets unknown node '{}'",
                    role, target
                )));
            }
        }

        if self.nodes.contains_key(ENTRY_NODE) {
            return Err(VelloraError::Compile(format!(
                "'{}' is reserved for the role dispatcher",
                ENTRY_NODE
            )));
        }

        for name in self.names() {
            let node = &self.nodes[name];
            for successor in node.successors() {
                if !self.nodes.contains_key(successor) {
                    return Err(VelloraError::Compile(format!(
                        "node '{}' declares unknown successor '{}'",
                        name, successor
                    )));
                }
            }
        }

        Ok(())
    }

    /// Validate and produce the node map the executor walks, entry router included.
    pub fn compile_nodes(&self) -> Result<HashMap<String, Arc<dyn Node>>> {
        self.validate()?;
        let mut nodes = self.nodes.clone();
        nodes.insert(
            ENTRY_NODE.to_string(),
            Arc::new(EntryRouter::new(self.role_branches.clone())),
        );
        Ok(nodes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Hop, Stop};

    fn table() -> RoutingTable {
        RoutingTable::new()
            .route_role(CallerRole::Learner, "a")
            .route_role(CallerRole::Instructor, "b")
            .with_node(Hop::new("a", "b"))
            .with_node(Stop::new("b"))
    }

    #[test]
    fn valid_table_compiles_with_entry_router() {
        let nodes = table().compile_nodes().unwrap();
        assert!(nodes.contains_key(ENTRY_NODE));
        assert_eq!(nodes.len(), 3);
    }

    #[test]
    fn missing_role_branch_is_rejected() {
        let routes = RoutingTable::new()
            .route_role(CallerRole::Learner, "b")
            .with_node(Stop::new("b"));
        let err = routes.validate().unwrap_err();
        assert!(err.to_string().contains("Instructor"));
    }

    #[test]
    fn unknown_successor_is_rejected() {
        let routes = table().with_node(Hop::new("a", "ghost"));
        let err = routes.validate().unwrap_err();
        assert!(matches!(err, VelloraError::Compile(_)));
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn branch_to_unknown_node_is_rejected() {
        let routes = table().route_role(CallerRole::Instructor, "missing");
        assert!(routes.validate().is_err());
    }
}
