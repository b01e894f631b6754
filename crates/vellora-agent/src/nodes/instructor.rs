use futures::future::BoxFuture;
use schemars::JsonSchema;
use serde::Deserialize;
use tracing::{info, warn};

use vellora_core::config::ModelStep;
use vellora_core::state::State;

use super::{CALENDAR, INSTRUCTOR, RESPONSE};
use crate::graph::{Node, NodeContext, Transition};
use crate::structured::decode;

const CALENDAR_CHECK_PROMPT: &str = "\
You decide whether an instructor's message asks for a calendar action,
such as scheduling a class, a meeting or an event.
Reply with a JSON object with a single boolean field \"need_calendar_action\".";

#[derive(Debug, Deserialize, JsonSchema)]
struct CalendarDecision {
    need_calendar_action: bool,
}

pub struct InstructorNode;

impl Node for InstructorNode {
    fn name(&self) -> &str {
        INSTRUCTOR
    }

    fn successors(&self) -> Vec<&str> {
        vec![CALENDAR, RESPONSE]
    }

    fn run<'a>(&'a self, mut state: State, ctx: &'a NodeContext) -> BoxFuture<'a, (Transition, State)> {
        Box::pin(async move {
            let user = format!("Query: {}", state.query());
            let need_calendar = match decode::<CalendarDecision>(
                ctx,
                ModelStep::Classifier,
                CALENDAR_CHECK_PROMPT,
                &user,
            )
            .await
            {
                Ok(d) => d.need_calendar_action,
                Err(e) => {
                    warn!(user_id = %state.user_id(), error = %e, "Calendar intent check failed");
                    state.record_error(format!("calendar intent check failed: {}", e));
                    false
                }
            };
            info!(user_id = %state.user_id(), need_calendar, "Instructor intent");

            let next = if need_calendar { CALENDAR } else { RESPONSE };
            (Transition::goto(next), state)
        })
    }
}
