use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::{info, warn};

use vellora_core::state::State;
use vellora_core::traits::CalendarEventAdapter;
use vellora_core::types::ToolStatus;
use vellora_tools::builtin::CreateCalendarEvent;
use vellora_tools::ToolRegistry;

use super::{clock_lines, tool_context, CALENDAR, RESPONSE};
use crate::agent_loop::AgentLoop;
use crate::graph::{Node, NodeContext, Transition};

const CALENDAR_PROMPT: &str = "\
You are the Calendar Agent for an instructor. You create events in the instructor's
Google Calendar with the create_calendar_event tool.

- Use YYYY-MM-DD for all-day events and YYYY-MM-DDTHH:MM:SS for timed events,
  interpreted in the instructor's timezone given below. Pass that timezone.
- Resolve relative dates (\"next Friday at 5pm\") against the current local time below.
- Classes, lectures and meetings are online: set conferenceData to true for timed events.
- Invite the enrolled learners listed below as attendees unless the instructor says otherwise.
- If the date or time is missing, ask for it in plain language instead of calling the tool.
- After creating the event, reply with its title, time and links.";

/// Creates calendar events for instructors through a bounded single-tool loop.
pub struct CalendarNode;

impl Node for CalendarNode {
    fn name(&self) -> &str {
        CALENDAR
    }

    fn successors(&self) -> Vec<&str> {
        vec![RESPONSE]
    }

    fn run<'a>(&'a self, mut state: State, ctx: &'a NodeContext) -> BoxFuture<'a, (Transition, State)> {
        Box::pin(async move {
            let calendar = match ctx.tools().calendar.calendar_for(state.user_id()).await {
                Ok(c) => c,
                Err(e) => {
                    warn!(user_id = %state.user_id(), error = %e, "No calendar for instructor");
                    state.record_error(e.to_string());
                    return (Transition::goto(RESPONSE), state);
                }
            };

            let attendees = ctx
                .tools()
                .catalog
                .attendee_emails(state.user_id())
                .await
                .unwrap_or_else(|e| {
                    warn!(user_id = %state.user_id(), error = %e, "Attendee lookup failed");
                    vec![]
                });
            info!(user_id = %state.user_id(), attendees = attendees.len(), "Calendar agent starting");

            let adapter: CalendarEventAdapter = Arc::new(CreateCalendarEvent::new(calendar));
            let tools = ToolRegistry::for_calendar(adapter);
            let attendee_list = if attendees.is_empty() {
                "(none enrolled)".to_string()
            } else {
                attendees.join(", ")
            };
            let user = format!(
                "{}\nEnrolled learners: {}\nQuery: {}",
                clock_lines(&state),
                attendee_list,
                state.query()
            );

            let outcome = AgentLoop::new(ctx, &tools, ctx.config().calendar.clone())
                .run(CALENDAR_PROMPT, &user, tool_context(&state))
                .await;

            if outcome.status == ToolStatus::Error {
                state.record_error(format!("Calendar operation failed: {}", outcome.output));
            }
            state.tool_result = Some(outcome);
            (Transition::goto(RESPONSE), state)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;
    use vellora_core::state::CallerRole;
    use vellora_test_utils::{test_config, ScriptedReply, StubCalendar, StubCalendarProvider, StubCatalog};

    use crate::testing::{caps_with, context, scripted, toolbox};

    fn instructor() -> State {
        State::new("t1", CallerRole::Instructor, "schedule a graph revision class friday 5pm")
            .with_timezone("Asia/Kolkata")
    }

    #[tokio::test]
    async fn unavailable_calendar_skips_the_model() {
        let llm = scripted([]);
        let (ctx, _rx) = context(caps_with(llm.clone(), toolbox(), test_config()), CALENDAR);

        let (t, state) = CalendarNode.run(instructor(), &ctx).await;
        assert_eq!(t, Transition::goto(RESPONSE));
        assert!(state.error.unwrap().contains("Calendar unavailable"));
        assert!(state.tool_result.is_none());
        assert_eq!(llm.call_count(), 0);
    }

    #[tokio::test]
    async fn creates_event_with_meet_link_and_attendees() {
        let calendar = Arc::new(StubCalendar::new());
        let mut tools = toolbox();
        tools.calendar = Arc::new(StubCalendarProvider::available(calendar.clone()));
        tools.catalog = Arc::new(StubCatalog::new().with_attendees("t1", &["a@x.edu", "b@x.edu"]));

        let llm = scripted([
            ScriptedReply::tool_call(
                "create_calendar_event",
                json!({
                    "summary": "Graph revision",
                    "start_time": "2025-03-07T17:00:00",
                    "end_time": "2025-03-07T18:00:00",
                    "timezone": "Asia/Kolkata",
                    "attendees": ["a@x.edu", "b@x.edu"],
                    "conferenceData": true
                }),
            ),
            ScriptedReply::text("Created 'Graph revision' on Friday 17:00 with a Meet link."),
        ]);
        let (ctx, _rx) = context(caps_with(llm.clone(), tools, test_config()), CALENDAR);

        let (t, state) = CalendarNode.run(instructor(), &ctx).await;
        assert_eq!(t, Transition::goto(RESPONSE));

        let outcome = state.tool_result.unwrap();
        assert_eq!(outcome.status, ToolStatus::Success);
        assert!(outcome.trace[0].output.contains("meet.example"));

        let inserted = calendar.inserted();
        assert_eq!(inserted.len(), 1);
        assert!(inserted[0].with_conference);
        assert!(inserted[0].notify_attendees);
        assert!(llm.calls()[0].prompt_text().contains("a@x.edu, b@x.edu"));
        assert_eq!(llm.calls()[0].tool_names, vec!["create_calendar_event"]);
    }

    #[tokio::test]
    async fn local_clock_in_prompt_and_timezone_on_event() {
        let calendar = Arc::new(StubCalendar::new());
        let mut tools = toolbox();
        tools.calendar = Arc::new(StubCalendarProvider::available(calendar.clone()));
        let at = chrono::DateTime::parse_from_rfc3339("2025-03-06T20:00:00Z")
            .unwrap()
            .with_timezone(&chrono::Utc);

        let llm = scripted([
            ScriptedReply::tool_call(
                "create_calendar_event",
                json!({
                    "summary": "Graph revision",
                    "start_time": "2025-03-07T17:00:00",
                    "end_time": "2025-03-07T18:00:00"
                }),
            ),
            ScriptedReply::text("Created 'Graph revision' on Friday 17:00."),
        ]);
        let (ctx, _rx) = context(caps_with(llm.clone(), tools, test_config()), CALENDAR);

        CalendarNode.run(instructor().with_timestamp(at), &ctx).await;

        // 20:00 UTC is already Friday morning in Kolkata
        let prompt = llm.calls()[0].prompt_text();
        assert!(prompt.contains("Current local time: Friday 2025-03-07 01:30 +05:30"));
        assert!(prompt.contains("Current UTC time: 2025-03-06T20:00:00+00:00"));
        assert_eq!(calendar.inserted()[0].body["start"]["timeZone"], "Asia/Kolkata");
    }
}
