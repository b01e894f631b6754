use std::sync::Arc;

use chrono::{DateTime, NaiveTime};
use futures::future::BoxFuture;
use serde::Deserialize;
use tracing::info;

use vellora_core::error::{Result, VelloraError};
use vellora_core::traits::{ActionStore, CancelActionAdapter, CreateActionAdapter, Tool, ToolAdapter};
use vellora_core::types::{
    CancelActionArgs, CreateActionArgs, NewScheduledAction, ToolContext, ToolResult,
};

const WEEKDAYS: [&str; 7] = [
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
    "Sunday",
];

/// The two accepted timestamp shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleKind {
    /// ISO 8601 instant with an explicit offset.
    OneTime,
    /// `HH:MM` wall-clock time repeated on the listed days (every day when none).
    Recurring,
}

/// Classify a timestamp, rejecting anything that is neither shape.
pub fn classify_timestamp(timestamp: &str) -> Result<ScheduleKind> {
    let timestamp = timestamp.trim();
    if DateTime::parse_from_rfc3339(timestamp).is_ok() {
        return Ok(ScheduleKind::OneTime);
    }
    if timestamp.len() == 5 && NaiveTime::parse_from_str(timestamp, "%H:%M").is_ok() {
        return Ok(ScheduleKind::Recurring);
    }
    Err(VelloraError::ToolValidation(format!(
        "timestamp '{}' must be ISO 8601 with a timezone offset (one-time) or HH:MM (recurring)",
        timestamp
    )))
}

/// Map day names to their canonical capitalised form.
pub fn normalize_days(days: &[String]) -> Result<Vec<String>> {
    days.iter()
        .map(|day| {
            WEEKDAYS
                .iter()
                .find(|w| w.eq_ignore_ascii_case(day.trim()))
                .map(|w| w.to_string())
                .ok_or_else(|| {
                    VelloraError::ToolValidation(format!(
                        "'{}' is not a day of the week; use full English names like Monday",
                        day
                    ))
                })
        })
        .collect()
}

/// Validate and normalise a proposed scheduled action.
pub fn validate_action(action: &NewScheduledAction) -> Result<NewScheduledAction> {
    if action.title.trim().is_empty() {
        return Err(VelloraError::ToolValidation("title must not be empty".into()));
    }

    let kind = classify_timestamp(&action.timestamp)?;
    let days = normalize_days(&action.days_of_week)?;

    if kind == ScheduleKind::OneTime && !days.is_empty() {
        return Err(VelloraError::ToolValidation(
            "one-time actions take no days_of_week; use an HH:MM timestamp for recurring actions"
                .into(),
        ));
    }

    Ok(NewScheduledAction {
        title: action.title.trim().to_string(),
        description: action.description.clone(),
        timestamp: action.timestamp.trim().to_string(),
        days_of_week: days,
    })
}

// ── Adapters over the action store ──────────────────────────────

/// Append an action to the caller's list.
pub struct CreateScheduledAction {
    store: Arc<dyn ActionStore>,
}

impl CreateScheduledAction {
    pub fn new(store: Arc<dyn ActionStore>) -> Self {
        Self { store }
    }
}

impl ToolAdapter for CreateScheduledAction {
    type Args = CreateActionArgs;
    type Output = String;

    fn name(&self) -> &str {
        "create_scheduled_action"
    }

    fn invoke(&self, args: CreateActionArgs) -> BoxFuture<'_, Result<String>> {
        Box::pin(async move {
            let action_id = self
                .store
                .append_scheduled_action(&args.user_id, args.action)
                .await?;
            info!(user_id = %args.user_id, action_id = %action_id, "Scheduled action created");
            Ok(action_id)
        })
    }
}

/// Remove an action from the caller's list. Absent ids are an error.
pub struct CancelScheduledAction {
    store: Arc<dyn ActionStore>,
}

impl CancelScheduledAction {
    pub fn new(store: Arc<dyn ActionStore>) -> Self {
        Self { store }
    }
}

impl ToolAdapter for CancelScheduledAction {
    type Args = CancelActionArgs;
    type Output = ();

    fn name(&self) -> &str {
        "delete_scheduled_action"
    }

    fn invoke(&self, args: CancelActionArgs) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let removed = self
                .store
                .remove_scheduled_action(&args.user_id, &args.action_id)
                .await?;
            if !removed {
                return Err(VelloraError::NotFound(format!(
                    "scheduled action {}",
                    args.action_id
                )));
            }
            info!(user_id = %args.user_id, action_id = %args.action_id, "Scheduled action cancelled");
            Ok(())
        })
    }
}

// ── Agent-loop tools ────────────────────────────────────────────

/// Model-facing wrapper around [`CreateScheduledAction`]. The user comes from the run.
pub struct CreateScheduledActionTool {
    adapter: CreateActionAdapter,
}

impl CreateScheduledActionTool {
    pub fn new(adapter: CreateActionAdapter) -> Self {
        Self { adapter }
    }
}

#[derive(Deserialize)]
struct CreateInput {
    title: String,
    #[serde(default)]
    description: Option<String>,
    timestamp: String,
    #[serde(default)]
    days_of_week: Option<Vec<String>>,
}

impl CreateInput {
    fn parse(input: &serde_json::Value) -> Result<NewScheduledAction> {
        let p: CreateInput = serde_json::from_value(input.clone())
            .map_err(|e| VelloraError::ToolValidation(e.to_string()))?;
        validate_action(&NewScheduledAction {
            title: p.title,
            description: p.description.unwrap_or_default(),
            timestamp: p.timestamp,
            days_of_week: p.days_of_week.unwrap_or_default(),
        })
    }
}

impl Tool for CreateScheduledActionTool {
    fn name(&self) -> &str {
        "create_scheduled_action"
    }

    fn description(&self) -> &str {
        "Add a new scheduled action (reminder) for the user. Use an HH:MM timestamp with \
         days_of_week for recurring actions, or an ISO 8601 timestamp with timezone offset \
         and no days for a one-time action."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "title": { "type": "string", "description": "Action title" },
                "description": { "type": "string", "description": "Action description" },
                "timestamp": {
                    "type": "string",
                    "description": "HH:MM for recurring actions, or ISO 8601 with timezone offset (e.g. 2025-03-01T18:00:00+05:30) for one-time actions"
                },
                "days_of_week": {
                    "type": "array",
                    "items": { "type": "string", "enum": WEEKDAYS },
                    "description": "Full English day names for recurring actions. Omit for one-time actions."
                }
            },
            "required": ["title", "timestamp"]
        })
    }

    fn validate(&self, input: &serde_json::Value) -> Result<()> {
        CreateInput::parse(input).map(|_| ())
    }

    fn execute(
        &self,
        input: serde_json::Value,
        ctx: ToolContext,
    ) -> BoxFuture<'_, Result<ToolResult>> {
        Box::pin(async move {
            let action = CreateInput::parse(&input)?;
            let title = action.title.clone();
            let action_id = self
                .adapter
                .invoke(CreateActionArgs {
                    user_id: ctx.user_id,
                    action,
                })
                .await?;
            Ok(ToolResult::success(format!(
                "Created scheduled action '{}' with id {}",
                title, action_id
            )))
        })
    }
}

/// Model-facing wrapper around [`CancelScheduledAction`].
pub struct DeleteScheduledActionTool {
    adapter: CancelActionAdapter,
}

impl DeleteScheduledActionTool {
    pub fn new(adapter: CancelActionAdapter) -> Self {
        Self { adapter }
    }
}

#[derive(Deserialize)]
struct DeleteInput {
    action_id: String,
}

impl DeleteInput {
    fn parse(input: &serde_json::Value) -> Result<String> {
        let p: DeleteInput = serde_json::from_value(input.clone())
            .map_err(|e| VelloraError::ToolValidation(e.to_string()))?;
        let id = p.action_id.trim();
        if id.is_empty() {
            return Err(VelloraError::ToolValidation("action_id must not be empty".into()));
        }
        Ok(id.to_string())
    }
}

impl Tool for DeleteScheduledActionTool {
    fn name(&self) -> &str {
        "delete_scheduled_action"
    }

    fn description(&self) -> &str {
        "Cancel a scheduled action and remove it from the user's list permanently."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "action_id": { "type": "string", "description": "Id of the scheduled action" }
            },
            "required": ["action_id"]
        })
    }

    fn validate(&self, input: &serde_json::Value) -> Result<()> {
        DeleteInput::parse(input).map(|_| ())
    }

    fn execute(
        &self,
        input: serde_json::Value,
        ctx: ToolContext,
    ) -> BoxFuture<'_, Result<ToolResult>> {
        Box::pin(async move {
            let action_id = DeleteInput::parse(&input)?;
            self.adapter
                .invoke(CancelActionArgs {
                    user_id: ctx.user_id,
                    action_id: action_id.clone(),
                })
                .await?;
            Ok(ToolResult::success(format!("Cancelled scheduled action {}", action_id)))
        })
    }
}
