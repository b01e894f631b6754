use std::collections::HashMap;

use futures::future::BoxFuture;
use tracing::{debug, error};

use vellora_core::state::{CallerRole, State};

use crate::graph::{Node, NodeContext, Transition, ENTRY_NODE};

/// Dispatches on the caller's role. Makes no external call.
pub struct EntryRouter {
    branches: HashMap<CallerRole, String>,
}

impl EntryRouter {
    pub fn new(branches: HashMap<CallerRole, String>) -> Self {
        Self { branches }
    }
}

impl Node for EntryRouter {
    fn name(&self) -> &str {
        ENTRY_NODE
    }

    fn successors(&self) -> Vec<&str> {
        self.branches.values().map(|s| s.as_str()).collect()
    }

    fn run<'a>(&'a self, mut state: State, _ctx: &'a NodeContext) -> BoxFuture<'a, (Transition, State)> {
        Box::pin(async move {
            match self.branches.get(&state.role()) {
                Some(target) => {
                    debug!(role = ?state.role(), target = %target, "Routing by role");
                    (Transition::goto(target), state)
                }
                None => {
                    // Unreachable after a successful compile
                    error!(role = ?state.role(), "No branch for role");
                    state.record_error("no route for caller role");
                    (Transition::Terminal, state)
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{caps, context, scripted};

    #[tokio::test]
    async fn routes_each_role() {
        let router = EntryRouter::new(HashMap::from([
            (CallerRole::Learner, "learner".to_string()),
            (CallerRole::Instructor, "instructor".to_string()),
        ]));
        let llm = scripted([]);
        let (ctx, _rx) = context(caps(llm.clone()), ENTRY_NODE);

        let (t, _) = router.run(State::new("u", CallerRole::Learner, "q"), &ctx).await;
        assert_eq!(t, Transition::goto("learner"));
        let (t, _) = router.run(State::new("u", CallerRole::Instructor, "q"), &ctx).await;
        assert_eq!(t, Transition::goto("instructor"));
        assert_eq!(llm.call_count(), 0);
    }
}
