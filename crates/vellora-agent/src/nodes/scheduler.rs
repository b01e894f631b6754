use futures::future::BoxFuture;
use tracing::warn;

use vellora_core::state::State;
use vellora_core::types::ToolStatus;
use vellora_tools::ToolRegistry;

use super::{clock_lines, tool_context, RESPONSE, SCHEDULER};
use crate::agent_loop::AgentLoop;
use crate::graph::{Node, NodeContext, Transition};

const SCHEDULER_PROMPT: &str = "\
You are the Scheduler Agent. You help learners manage reminders and scheduled actions
with exactly two tools:

1. create_scheduled_action: add a reminder. Needs a title and a timestamp.
   - One-time reminders: an ISO 8601 timestamp with timezone offset, and NO days_of_week.
   - Recurring reminders: an HH:MM timestamp. If the learner wants it every day, omit
     days_of_week. For particular days, pass full English day names, e.g. [\"Monday\", \"Wednesday\"].
2. delete_scheduled_action: cancel a reminder by its action_id.

Rules:
- Only create when the learner explicitly asks to add, schedule or be reminded of something.
- Only delete when the learner explicitly asks to cancel or delete a reminder.
- Resolve relative times (\"tomorrow at 6\") against the current local time and timezone below.
- If the request is missing a detail you need, ask for it in plain language instead of calling a tool.
- After the tool calls, reply with a short confirmation of what was done.";

/// Creates or cancels reminders through a bounded two-tool agent loop.
pub struct SchedulerNode;

impl Node for SchedulerNode {
    fn name(&self) -> &str {
        SCHEDULER
    }

    fn successors(&self) -> Vec<&str> {
        vec![RESPONSE]
    }

    fn run<'a>(&'a self, mut state: State, ctx: &'a NodeContext) -> BoxFuture<'a, (Transition, State)> {
        Box::pin(async move {
            let tools = ToolRegistry::for_scheduler(
                ctx.tools().create_action.clone(),
                ctx.tools().cancel_action.clone(),
            );
            let user = format!("{}\nQuery: {}", clock_lines(&state), state.query());

            let outcome = AgentLoop::new(ctx, &tools, ctx.config().scheduler.clone())
                .run(SCHEDULER_PROMPT, &user, tool_context(&state))
                .await;

            if outcome.status == ToolStatus::Error {
                warn!(user_id = %state.user_id(), error = %outcome.output, "Scheduled action operation failed");
                state.record_error(format!("Scheduled action operation failed: {}", outcome.output));
            }
            state.tool_result = Some(outcome);
            (Transition::goto(RESPONSE), state)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use serde_json::json;
    use vellora_core::state::CallerRole;
    use vellora_test_utils::{test_config, RecordingActionStore, ScriptedReply};

    use crate::testing::{caps_with, context, scripted, toolbox_with_store};

    fn learner(query: &str) -> State {
        State::new("u1", CallerRole::Learner, query).with_timezone("Asia/Kolkata")
    }

    #[tokio::test]
    async fn recurring_reminder_is_stored_for_the_caller() {
        let store = Arc::new(RecordingActionStore::new());
        let llm = scripted([
            ScriptedReply::tool_call(
                "create_scheduled_action",
                json!({
                    "title": "DSA practice",
                    "description": "Solve two problems",
                    "timestamp": "18:30",
                    "days_of_week": ["monday", "Wednesday"]
                }),
            ),
            ScriptedReply::text("Scheduled DSA practice on Monday and Wednesday at 18:30."),
        ]);
        let (ctx, _rx) = context(
            caps_with(llm.clone(), toolbox_with_store(store.clone()), test_config()),
            SCHEDULER,
        );

        let (t, state) = SchedulerNode.run(learner("remind me mon/wed 6:30pm"), &ctx).await;
        assert_eq!(t, Transition::goto(RESPONSE));

        let outcome = state.tool_result.unwrap();
        assert_eq!(outcome.status, ToolStatus::Success);
        let actions = store.actions("u1");
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].days_of_week, vec!["Monday", "Wednesday"]);
        assert!(llm.calls()[0].prompt_text().contains("Asia/Kolkata"));
        assert!((llm.calls()[0].temperature - 0.0).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn prompt_carries_local_wall_clock() {
        let at = chrono::DateTime::parse_from_rfc3339("2025-03-01T12:00:00Z")
            .unwrap()
            .with_timezone(&chrono::Utc);
        let llm = scripted([ScriptedReply::text("What time tomorrow?")]);
        let (ctx, _rx) = context(
            caps_with(llm.clone(), toolbox_with_store(Arc::new(RecordingActionStore::new())), test_config()),
            SCHEDULER,
        );

        SchedulerNode.run(learner("remind me tomorrow").with_timestamp(at), &ctx).await;
        let prompt = llm.calls()[0].prompt_text();
        assert!(prompt.contains("Current local time: Saturday 2025-03-01 17:30 +05:30"));
        assert!(prompt.contains("Current UTC time: 2025-03-01T12:00:00+00:00"));
    }

    #[tokio::test]
    async fn days_on_one_time_reminder_are_refused() {
        let store = Arc::new(RecordingActionStore::new());
        let llm = scripted([ScriptedReply::tool_call(
            "create_scheduled_action",
            json!({
                "title": "Mock interview",
                "timestamp": "2025-03-01T10:00:00+05:30",
                "days_of_week": ["Saturday"]
            }),
        )]);
        let (ctx, _rx) = context(
            caps_with(llm, toolbox_with_store(store.clone()), test_config()),
            SCHEDULER,
        );

        let (t, state) = SchedulerNode.run(learner("remind me"), &ctx).await;
        assert_eq!(t, Transition::goto(RESPONSE));
        assert_eq!(state.tool_result.unwrap().status, ToolStatus::Partial);
        assert_eq!(store.invocations(), 0);
    }

    #[tokio::test]
    async fn model_outage_is_recorded() {
        let llm = scripted([ScriptedReply::Error("HTTP 502".into())]);
        let (ctx, _rx) = context(
            caps_with(llm, toolbox_with_store(Arc::new(RecordingActionStore::new())), test_config()),
            SCHEDULER,
        );

        let (t, state) = SchedulerNode.run(learner("remind me"), &ctx).await;
        assert_eq!(t, Transition::goto(RESPONSE));
        assert_eq!(state.tool_result.unwrap().status, ToolStatus::Error);
        assert!(state.error.unwrap().contains("Scheduled action operation failed"));
    }
}
