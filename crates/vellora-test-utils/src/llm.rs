use std::collections::VecDeque;
use std::sync::Mutex;

use futures::future::BoxFuture;
use futures::stream::BoxStream;

use vellora_core::config::ModelConfig;
use vellora_core::error::{Result, VelloraError};
use vellora_core::traits::{parse_json_reply, LlmClient, OutputSchema};
use vellora_core::types::*;

/// One canned model reply.
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    /// Free text, streamed word by word.
    Text(String),
    /// A structured value (or its text when streamed).
    Json(serde_json::Value),
    /// A single tool call.
    ToolCall {
        name: String,
        input: serde_json::Value,
    },
    /// The request fails.
    Error(String),
}

impl ScriptedReply {
    pub fn text(t: impl Into<String>) -> Self {
        Self::Text(t.into())
    }

    pub fn tool_call(name: impl Into<String>, input: serde_json::Value) -> Self {
        Self::ToolCall {
            name: name.into(),
            input,
        }
    }
}

/// What the client was asked.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub structured: bool,
    pub model_id: String,
    pub temperature: f32,
    pub messages: Vec<ChatMessage>,
    pub tool_names: Vec<String>,
}

impl RecordedCall {
    /// All message text joined, for prompt assertions.
    pub fn prompt_text(&self) -> String {
        self.messages
            .iter()
            .map(|m| m.text())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// An LLM client that plays back a fixed script and records every request.
///
/// Replies are consumed in order by both `chat_stream` and `chat_structured`.
/// An exhausted script fails the request.
#[derive(Default)]
pub struct ScriptedLlm {
    replies: Mutex<VecDeque<ScriptedReply>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedLlm {
    pub fn new(replies: impl IntoIterator<Item = ScriptedReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn remaining(&self) -> usize {
        self.replies.lock().unwrap().len()
    }

    fn next(
        &self,
        config: &ModelConfig,
        messages: Vec<ChatMessage>,
        tools: &[ToolDefinition],
        structured: bool,
    ) -> Option<ScriptedReply> {
        self.calls.lock().unwrap().push(RecordedCall {
            structured,
            model_id: config.model_id.clone(),
            temperature: config.temperature,
            messages,
            tool_names: tools.iter().map(|t| t.name.clone()).collect(),
        });
        self.replies.lock().unwrap().pop_front()
    }
}

fn text_deltas(text: &str) -> Vec<Result<StreamDelta>> {
    let mut deltas: Vec<Result<StreamDelta>> = text
        .split_inclusive(' ')
        .map(|w| Ok(StreamDelta::TextDelta(w.to_string())))
        .collect();
    deltas.push(Ok(StreamDelta::Stop(StopReason::EndTurn)));
    deltas
}

impl LlmClient for ScriptedLlm {
    fn chat_stream(
        &self,
        config: &ModelConfig,
        messages: Vec<ChatMessage>,
        tools: &[ToolDefinition],
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<StreamDelta>>>> {
        let reply = self.next(config, messages, tools, false);
        Box::pin(async move {
            let deltas = match reply {
                Some(ScriptedReply::Text(t)) => text_deltas(&t),
                Some(ScriptedReply::Json(v)) => text_deltas(&v.to_string()),
                Some(ScriptedReply::ToolCall { name, input }) => vec![
                    Ok(StreamDelta::ToolUseStart {
                        index: 0,
                        id: format!("call_{}", name),
                        name,
                    }),
                    Ok(StreamDelta::ToolInputDelta {
                        index: 0,
                        delta: input.to_string(),
                    }),
                    Ok(StreamDelta::Stop(StopReason::ToolUse)),
                ],
                Some(ScriptedReply::Error(e)) => return Err(VelloraError::LlmRequest(e)),
                None => return Err(VelloraError::LlmRequest("script exhausted".into())),
            };
            Ok(Box::pin(futures::stream::iter(deltas)) as BoxStream<'_, Result<StreamDelta>>)
        })
    }

    fn chat_structured(
        &self,
        config: &ModelConfig,
        messages: Vec<ChatMessage>,
        _schema: &OutputSchema,
    ) -> BoxFuture<'_, Result<serde_json::Value>> {
        let reply = self.next(config, messages, &[], true);
        Box::pin(async move {
            match reply {
                Some(ScriptedReply::Json(v)) => Ok(v),
                Some(ScriptedReply::Text(t)) => parse_json_reply(&t),
                Some(ScriptedReply::ToolCall { name, .. }) => Err(VelloraError::LlmParse(
                    format!("expected JSON, got tool call {}", name),
                )),
                Some(ScriptedReply::Error(e)) => Err(VelloraError::LlmRequest(e)),
                None => Err(VelloraError::LlmRequest("script exhausted".into())),
            }
        })
    }
}
