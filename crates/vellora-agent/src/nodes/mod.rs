//! The study-assistant nodes and the routing table that wires them together.

mod calendar;
mod context_lookup;
mod course_planner;
mod entry_router;
mod instructor;
mod learner;
mod quiz;
mod response;
mod scheduler;

pub use calendar::CalendarNode;
pub use context_lookup::ContextLookupNode;
pub use course_planner::CoursePlannerNode;
pub use entry_router::EntryRouter;
pub use instructor::InstructorNode;
pub use learner::LearnerNode;
pub use quiz::QuizNode;
pub use response::ResponseNode;
pub use scheduler::SchedulerNode;

use chrono_tz::Tz;
use tracing::warn;

use vellora_core::state::{CallerRole, State};
use vellora_core::types::ToolContext;

use crate::graph::{Capabilities, Graph, RoutingTable};

pub const LEARNER: &str = "learner";
pub const INSTRUCTOR: &str = "instructor";
pub const CONTEXT_LOOKUP: &str = "context_lookup";
pub const COURSE_PLANNER: &str = "course_planner";
pub const SCHEDULER: &str = "scheduler";
pub const CALENDAR: &str = "calendar";
pub const QUIZ: &str = "quiz";
pub const RESPONSE: &str = "response";

/// The full study-assistant routing table.
pub fn study_routes() -> RoutingTable {
    RoutingTable::new()
        .route_role(CallerRole::Learner, LEARNER)
        .route_role(CallerRole::Instructor, INSTRUCTOR)
        .with_node(LearnerNode)
        .with_node(InstructorNode)
        .with_node(ContextLookupNode)
        .with_node(CoursePlannerNode)
        .with_node(SchedulerNode)
        .with_node(CalendarNode)
        .with_node(QuizNode)
        .with_node(ResponseNode)
}

pub fn study_graph(caps: Capabilities) -> Graph {
    Graph::new(study_routes(), caps)
}

/// Identity and clock for agent-loop tools, taken from the run, never from the model.
fn tool_context(state: &State) -> ToolContext {
    ToolContext {
        user_id: state.user_id().to_string(),
        timezone: state.timezone.clone(),
        now: state.timestamp,
    }
}

/// The run's clock for agent prompts: timezone, local wall-clock time, and UTC.
/// Unknown timezone names fall back to UTC.
fn clock_lines(state: &State) -> String {
    let tz = state.timezone.parse::<Tz>().unwrap_or_else(|_| {
        warn!(timezone = %state.timezone, "Unknown timezone, using UTC");
        Tz::UTC
    });
    let local = state.timestamp.with_timezone(&tz);
    format!(
        "Timezone: {}\nCurrent local time: {}\nCurrent UTC time: {}",
        tz.name(),
        local.format("%A %Y-%m-%d %H:%M %:z"),
        state.timestamp.to_rfc3339()
    )
}

/// At most `max_chars` characters of `text`.
fn excerpt(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}
