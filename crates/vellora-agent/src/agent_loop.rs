//! Bounded tool-calling loop: propose, validate, execute, observe, decide.
//!
//! The model proposes tool calls; every call is validated before anything
//! runs, so a bad argument never reaches a system of record. Executed calls
//! are fed back as tool results and the model decides again, until it
//! answers in plain text or a ceiling is hit.

use std::time::Duration;

use futures::StreamExt;
use tracing::{debug, error, info, warn};

use vellora_core::config::{AgentLoopConfig, ModelConfig, ModelStep};
use vellora_core::error::{Result, VelloraError};
use vellora_core::types::{
    ChatMessage, ContentBlock, Role, StreamDelta, ToolContext, ToolDefinition, ToolOutcome,
    ToolResult, ToolStatus, TraceStep,
};
use vellora_tools::ToolRegistry;

use crate::graph::NodeContext;

const NO_OUTPUT: &str = "Operation completed but no specific output generated.";

/// Accumulates a streamed tool call.
#[derive(Default)]
struct ToolCallAccumulator {
    id: String,
    name: String,
    input_json: String,
}

impl ToolCallAccumulator {
    fn input(&self) -> serde_json::Value {
        serde_json::from_str(&self.input_json).unwrap_or(serde_json::Value::Null)
    }
}

/// How the loop ended before being turned into a [`ToolOutcome`].
enum LoopEnd {
    /// The model answered in plain text.
    Answer(String),
    /// A proposed call failed validation; nothing was executed for it.
    Clarify(String),
    /// The iteration ceiling was reached.
    Exhausted(String),
}

pub struct AgentLoop<'a> {
    ctx: &'a NodeContext,
    tools: &'a ToolRegistry,
    limits: AgentLoopConfig,
}

impl<'a> AgentLoop<'a> {
    pub fn new(ctx: &'a NodeContext, tools: &'a ToolRegistry, limits: AgentLoopConfig) -> Self {
        Self { ctx, tools, limits }
    }

    /// Run the loop to completion. Never fails: every ending maps to a status.
    pub async fn run(&self, system: &str, user: &str, tool_ctx: ToolContext) -> ToolOutcome {
        let mut trace = Vec::new();
        let budget = Duration::from_secs(self.limits.max_duration_secs);
        let ended = tokio::time::timeout(budget, self.drive(system, user, &tool_ctx, &mut trace)).await;

        let (status, output) = match ended {
            Ok(Ok(LoopEnd::Answer(text))) if text.trim().is_empty() => {
                (ToolStatus::Partial, NO_OUTPUT.to_string())
            }
            Ok(Ok(LoopEnd::Answer(text))) => (ToolStatus::Success, text),
            Ok(Ok(LoopEnd::Clarify(text))) => (ToolStatus::Partial, text),
            Ok(Ok(LoopEnd::Exhausted(text))) => (ToolStatus::Partial, text),
            Ok(Err(e)) => {
                error!(node = %self.ctx.node(), error = %e, "Agent loop failed");
                (ToolStatus::Error, e.to_string())
            }
            Err(_) => {
                let e = VelloraError::MaxDurationExceeded(self.limits.max_duration_secs);
                warn!(node = %self.ctx.node(), error = %e, "Agent loop timed out");
                (ToolStatus::Error, e.to_string())
            }
        };

        info!(
            node = %self.ctx.node(),
            status = ?status,
            tool_calls = trace.len(),
            "Agent loop finished"
        );
        ToolOutcome {
            status,
            output,
            trace,
        }
    }

    async fn drive(
        &self,
        system: &str,
        user: &str,
        tool_ctx: &ToolContext,
        trace: &mut Vec<TraceStep>,
    ) -> Result<LoopEnd> {
        let config = self.ctx.model(ModelStep::Agent);
        let defs = self.tools.definitions();
        let mut messages = vec![ChatMessage::system(system), ChatMessage::user(user)];

        for iteration in 0..self.limits.max_iterations {
            debug!(node = %self.ctx.node(), iteration, "Agent iteration");

            let (text, calls) = self.propose(&config, &messages, &defs).await?;
            if calls.is_empty() {
                return Ok(LoopEnd::Answer(text));
            }

            let inputs: Vec<serde_json::Value> = calls.iter().map(|c| c.input()).collect();
            for (call, input) in calls.iter().zip(inputs.iter()) {
                if let Err(e) = self.tools.validate(&call.name, input) {
                    warn!(tool = %call.name, error = %e, "Tool call rejected before execution");
                    trace.push(TraceStep {
                        tool: call.name.clone(),
                        input: input.clone(),
                        output: e.to_string(),
                        is_error: true,
                    });
                    return Ok(LoopEnd::Clarify(clarification(&text, &e)));
                }
            }

            let mut blocks = Vec::new();
            if !text.is_empty() {
                blocks.push(ContentBlock::Text { text: text.clone() });
            }
            for (call, input) in calls.iter().zip(inputs.iter()) {
                blocks.push(ContentBlock::ToolUse {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    input: input.clone(),
                });
            }
            messages.push(ChatMessage {
                role: Role::Assistant,
                content: blocks,
            });

            for (call, input) in calls.iter().zip(inputs.into_iter()) {
                let result = match self
                    .tools
                    .execute(&call.name, input.clone(), tool_ctx.clone())
                    .await
                {
                    Ok(r) => r,
                    Err(e) => {
                        error!(tool = %call.name, error = %e, "Tool execution failed");
                        ToolResult::error(e.to_string())
                    }
                };
                trace.push(TraceStep {
                    tool: call.name.clone(),
                    input,
                    output: result.content.clone(),
                    is_error: result.is_error,
                });
                messages.push(ChatMessage::tool_result(
                    &call.id,
                    result.content,
                    result.is_error,
                ));
            }
        }

        warn!(
            node = %self.ctx.node(),
            max_iterations = self.limits.max_iterations,
            "Agent loop hit iteration ceiling"
        );
        let last = trace
            .last()
            .map(|s| format!(" Last tool result: {}", s.output))
            .unwrap_or_default();
        Ok(LoopEnd::Exhausted(format!(
            "Stopped after {} iterations without a final answer.{}",
            self.limits.max_iterations, last
        )))
    }

    /// One model turn: the text it wrote and the tool calls it proposed.
    async fn propose(
        &self,
        config: &ModelConfig,
        messages: &[ChatMessage],
        defs: &[ToolDefinition],
    ) -> Result<(String, Vec<ToolCallAccumulator>)> {
        let mut stream = self
            .ctx
            .llm()
            .chat_stream(config, messages.to_vec(), defs)
            .await?;

        let mut text = String::new();
        let mut calls: Vec<ToolCallAccumulator> = Vec::new();

        while let Some(delta) = stream.next().await {
            match delta? {
                StreamDelta::TextDelta(t) => text.push_str(&t),
                StreamDelta::ToolUseStart { index, id, name } => {
                    while calls.len() <= index {
                        calls.push(ToolCallAccumulator::default());
                    }
                    calls[index].id = id;
                    calls[index].name = name;
                }
                StreamDelta::ToolInputDelta { index, delta } => {
                    if let Some(tc) = calls.get_mut(index) {
                        tc.input_json.push_str(&delta);
                    }
                }
                StreamDelta::Stop(_) | StreamDelta::Usage { .. } => {}
            }
        }

        calls.retain(|c| !c.name.is_empty());
        Ok((text, calls))
    }
}

fn clarification(model_text: &str, err: &VelloraError) -> String {
    if !model_text.trim().is_empty() {
        return model_text.trim().to_string();
    }
    format!(
        "I couldn't do that yet ({}). Could you check the details and try again?",
        err
    )
}
