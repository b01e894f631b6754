use futures::future::BoxFuture;
use schemars::JsonSchema;
use serde::Deserialize;
use tracing::{info, warn};

use vellora_core::config::ModelStep;
use vellora_core::state::State;

use super::{CONTEXT_LOOKUP, COURSE_PLANNER, LEARNER, RESPONSE, SCHEDULER};
use crate::graph::{Node, NodeContext, Transition};
use crate::structured::decode;

const CLASSIFIER_PROMPT: &str = "\
You classify a learner's message into exactly one intent.
- \"schedule\": the learner wants to add or cancel a reminder, either one-time or recurring.
- \"course_planner\": the learner wants a study plan or a course outline for a topic.
- \"context_lookup\": the learner asks about a specific lecture or video they are watching.
- \"other\": anything else.
Reply with a JSON object with a single field \"intent\".";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
enum Intent {
    Schedule,
    CoursePlanner,
    ContextLookup,
    Other,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct IntentReply {
    intent: Intent,
}

/// Routes learners: media hints go straight to context lookup, everything
/// else is classified.
pub struct LearnerNode;

impl Node for LearnerNode {
    fn name(&self) -> &str {
        LEARNER
    }

    fn successors(&self) -> Vec<&str> {
        vec![CONTEXT_LOOKUP, COURSE_PLANNER, SCHEDULER, RESPONSE]
    }

    fn run<'a>(&'a self, mut state: State, ctx: &'a NodeContext) -> BoxFuture<'a, (Transition, State)> {
        Box::pin(async move {
            if state.has_media_hint() {
                info!(user_id = %state.user_id(), "Media hint present, skipping classification");
                return (Transition::goto(CONTEXT_LOOKUP), state);
            }

            let user = format!("Query: {}", state.query());
            let intent = match decode::<IntentReply>(ctx, ModelStep::Classifier, CLASSIFIER_PROMPT, &user).await {
                Ok(reply) => reply.intent,
                Err(e) => {
                    warn!(user_id = %state.user_id(), error = %e, "Intent classification failed");
                    state.record_error(format!("intent classification failed: {}", e));
                    Intent::Other
                }
            };
            info!(user_id = %state.user_id(), intent = ?intent, "Learner intent");

            let next = match intent {
                Intent::Schedule => SCHEDULER,
                Intent::CoursePlanner => COURSE_PLANNER,
                Intent::ContextLookup => CONTEXT_LOOKUP,
                Intent::Other => RESPONSE,
            };
            (Transition::goto(next), state)
        })
    }
}
