use std::collections::HashMap;
use std::sync::Arc;

use vellora_core::error::{Result, VelloraError};
use vellora_core::traits::{CalendarEventAdapter, CancelActionAdapter, CreateActionAdapter, Tool};
use vellora_core::types::{ToolContext, ToolDefinition, ToolResult};

use crate::builtin::{CalendarEventTool, CreateScheduledActionTool, DeleteScheduledActionTool};

/// Tools offered to the model inside one agent loop.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// The scheduler's two tools.
    pub fn for_scheduler(create: CreateActionAdapter, cancel: CancelActionAdapter) -> Self {
        let mut registry = Self::new();
        registry.register(CreateScheduledActionTool::new(create));
        registry.register(DeleteScheduledActionTool::new(cancel));
        registry
    }

    /// The calendar agent's single tool.
    pub fn for_calendar(create_event: CalendarEventAdapter) -> Self {
        let mut registry = Self::new();
        registry.register(CalendarEventTool::new(create_event));
        registry
    }

    /// Register a tool.
    pub fn register(&mut self, tool: impl Tool) {
        let name = tool.name().to_string();
        self.tools.insert(name, Arc::new(tool));
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// List all registered tool names, sorted.
    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Get tool definitions for sending to the LLM.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.list()
            .into_iter()
            .filter_map(|name| self.tools.get(name))
            .map(|t| ToolDefinition {
                name: t.name().to_string(),
                description: t.description().to_string(),
                input_schema: t.input_schema(),
            })
            .collect()
    }

    /// Check arguments for a tool call without running it.
    pub fn validate(&self, name: &str, input: &serde_json::Value) -> Result<()> {
        let tool = self
            .get(name)
            .ok_or_else(|| VelloraError::ToolNotFound(name.to_string()))?;
        tool.validate(input)
    }

    /// Execute a tool by name under its timeout.
    pub async fn execute(
        &self,
        name: &str,
        input: serde_json::Value,
        ctx: ToolContext,
    ) -> Result<ToolResult> {
        let tool = self
            .get(name)
            .ok_or_else(|| VelloraError::ToolNotFound(name.to_string()))?;

        let timeout = std::time::Duration::from_secs(tool.timeout_secs());

        match tokio::time::timeout(timeout, tool.execute(input, ctx)).await {
            Ok(result) => result,
            Err(_) => Err(VelloraError::ToolTimeout {
                tool: name.to_string(),
                timeout_secs: tool.timeout_secs(),
            }),
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::BoxFuture;

    struct SlowTool;

    impl Tool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }
        fn description(&self) -> &str {
            "Never finishes in time"
        }
        fn input_schema(&self) -> serde_json::Value {
            serde_json::json!({ "type": "object" })
        }
        fn execute(
            &self,
            _input: serde_json::Value,
            _ctx: ToolContext,
        ) -> BoxFuture<'_, Result<ToolResult>> {
            Box::pin(async {
                tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                Ok(ToolResult::success("late"))
            })
        }
        fn timeout_secs(&self) -> u64 {
            1
        }
    }

    fn ctx() -> ToolContext {
        ToolContext {
            user_id: "u1".into(),
            timezone: "UTC".into(),
            now: chrono::Utc::now(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn execute_times_out() {
        let mut registry = ToolRegistry::new();
        registry.register(SlowTool);
        let err = registry
            .execute("slow", serde_json::json!({}), ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, VelloraError::ToolTimeout { timeout_secs: 1, .. }));
    }

    #[tokio::test]
    async fn unknown_tool_is_reported() {
        let registry = ToolRegistry::new();
        let err = registry
            .execute("nope", serde_json::json!({}), ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, VelloraError::ToolNotFound(_)));
        assert!(registry.validate("nope", &serde_json::json!({})).is_err());
    }
}
