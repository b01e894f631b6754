use futures::future::BoxFuture;
use futures::StreamExt;
use tracing::{info, warn};

use vellora_core::config::ModelStep;
use vellora_core::state::State;
use vellora_core::types::{ChatMessage, StreamDelta, ToolStatus};

use super::RESPONSE;
use crate::graph::{Node, NodeContext, Transition};

const PERSONA: &str = "You are Vellora, a placement assistant coach and a personal helping assistant.";

const FALLBACK: &str =
    "I'm sorry, I couldn't put together an answer right now. Please try again in a moment.";

/// Writes the final answer from whatever the run gathered.
pub struct ResponseNode;

impl ResponseNode {
    fn system_prompt(state: &State) -> String {
        let mut prompt = String::from(PERSONA);

        if let Some(ref context) = state.scraped_context {
            prompt.push_str(
                "\n\nThis is the context of the lecture the user is interested in:\n",
            );
            prompt.push_str(context);
            prompt.push_str(
                "\nUse it to answer. If the query is not related to the lecture, say you are not sure.",
            );
        }

        if let Some(ref hits) = state.search_results {
            if !hits.is_empty() {
                prompt.push_str("\n\nThese are web search results for the user's query:\n");
                for hit in hits {
                    prompt.push_str(&format!("- {} ({}): {}\n", hit.title, hit.url, hit.snippet));
                }
            }
        }

        if let Some(ref plan) = state.derived_plan {
            if plan.is_degraded() {
                prompt.push_str(
                    "\n\nA study plan could not be fully generated. Explain this briefly and \
                     offer what you can from the material below.\n",
                );
            } else {
                prompt.push_str("\n\nThis is the study plan prepared for the user. Present it clearly:\n");
            }
            prompt.push_str(&serde_json::to_string_pretty(plan).unwrap_or_default());
        }

        if let Some(ref outcome) = state.tool_result {
            let status = match outcome.status {
                ToolStatus::Success => "succeeded",
                ToolStatus::Partial => "was only partly completed",
                ToolStatus::Error => "failed",
            };
            prompt.push_str(&format!(
                "\n\nThe requested action {}. Its report:\n{}\nTell the user what happened in plain words.",
                status, outcome.output
            ));
        }

        if let Some(ref error) = state.error {
            prompt.push_str(&format!(
                "\n\nSomething went wrong while handling this request: {}\n\
                 Acknowledge it briefly without technical detail.",
                error
            ));
        }

        prompt
    }

    /// Stream the answer, forwarding every chunk. `None` if nothing arrived.
    async fn stream_answer(state: &State, ctx: &NodeContext) -> Option<String> {
        let messages = vec![
            ChatMessage::system(Self::system_prompt(state)),
            ChatMessage::user(state.query()),
        ];
        let config = ctx.model(ModelStep::Response);

        let mut stream = match ctx.llm().chat_stream(&config, messages, &[]).await {
            Ok(s) => s,
            Err(e) => {
                warn!(user_id = %state.user_id(), error = %e, "Response generation failed");
                return None;
            }
        };

        let mut text = String::new();
        while let Some(delta) = stream.next().await {
            match delta {
                Ok(StreamDelta::TextDelta(chunk)) => {
                    ctx.emit_token(chunk.clone()).await;
                    text.push_str(&chunk);
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(user_id = %state.user_id(), error = %e, "Response stream broke off");
                    break;
                }
            }
        }
        (!text.is_empty()).then_some(text)
    }
}

impl Node for ResponseNode {
    fn name(&self) -> &str {
        RESPONSE
    }

    fn successors(&self) -> Vec<&str> {
        vec![]
    }

    fn run<'a>(&'a self, mut state: State, ctx: &'a NodeContext) -> BoxFuture<'a, (Transition, State)> {
        Box::pin(async move {
            match Self::stream_answer(&state, ctx).await {
                Some(text) => {
                    info!(user_id = %state.user_id(), chars = text.len(), "Response complete");
                    state.set_response(text);
                }
                None => {
                    state.record_error("response generation failed");
                    ctx.emit_token(FALLBACK).await;
                    state.set_response(FALLBACK);
                }
            }
            (Transition::Terminal, state)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{caps, context, drain_tokens, scripted};
    use vellora_core::state::CallerRole;
    use vellora_core::types::{SearchHit, StudyPlan, ToolOutcome};
    use vellora_test_utils::ScriptedReply;

    fn learner(query: &str) -> State {
        State::new("u1", CallerRole::Learner, query)
    }

    #[test]
    fn prompt_includes_only_present_context() {
        let bare = ResponseNode::system_prompt(&learner("hi"));
        assert_eq!(bare, PERSONA);

        let mut state = learner("hi");
        state.search_results = Some(vec![SearchHit {
            title: "Rust Book".into(),
            url: "https://doc.rust-lang.org/book".into(),
            snippet: "The Rust Programming Language".into(),
        }]);
        state.tool_result = Some(ToolOutcome::error("store offline"));
        let prompt = ResponseNode::system_prompt(&state);
        assert!(prompt.contains("https://doc.rust-lang.org/book"));
        assert!(prompt.contains("failed"));
        assert!(prompt.contains("store offline"));
        assert!(!prompt.contains("lecture"));
    }

    #[test]
    fn degraded_plan_is_flagged() {
        let mut state = learner("plan");
        state.derived_plan = Some(StudyPlan::degraded("rust", "no_search_results", vec![], vec![]));
        let prompt = ResponseNode::system_prompt(&state);
        assert!(prompt.contains("could not be fully generated"));
        assert!(prompt.contains("no_search_results"));
    }

    #[tokio::test]
    async fn streams_answer_and_sets_response() {
        let llm = scripted([ScriptedReply::text("Practice arrays daily.")]);
        let (ctx, mut rx) = context(caps(llm), RESPONSE);

        let (t, state) = ResponseNode.run(learner("tips?"), &ctx).await;
        assert_eq!(t, Transition::Terminal);
        assert_eq!(state.response(), Some("Practice arrays daily."));
        assert_eq!(drain_tokens(&mut rx), "Practice arrays daily.");
    }

    #[tokio::test]
    async fn outage_yields_apology_token() {
        let llm = scripted([ScriptedReply::Error("HTTP 429".into())]);
        let (ctx, mut rx) = context(caps(llm), RESPONSE);

        let (t, state) = ResponseNode.run(learner("tips?"), &ctx).await;
        assert_eq!(t, Transition::Terminal);
        assert_eq!(state.response(), Some(FALLBACK));
        assert_eq!(drain_tokens(&mut rx), FALLBACK);
    }
}
