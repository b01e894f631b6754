use futures::future::BoxFuture;
use futures::StreamExt;
use tracing::{info, warn};

use vellora_core::config::ModelStep;
use vellora_core::state::State;
use vellora_core::traits::parse_json_reply;
use vellora_core::types::{ChatMessage, Quiz, StreamDelta};

use super::QUIZ;
use crate::graph::{Node, NodeContext, Transition};

const QUIZ_PROMPT: &str = "\
You are a quiz master for placement preparation. Write a short multiple-choice quiz
of 3 to 5 questions on the study material below, matched to what the learner asked.
Each question has four options and exactly one correct answer, which must be one of
the options verbatim.
Reply with ONLY a JSON object:
{\"questions\": [{\"question\": \"...\", \"options\": [\"...\"], \"answer\": \"...\"}]}";

const QUIZ_UNAVAILABLE: &str =
    "Sorry, I couldn't put a quiz together right now. Please ask again in a moment.";

/// Streams a small quiz and keeps a parsed copy in the state.
pub struct QuizNode;

impl QuizNode {
    fn material(state: &State) -> String {
        let mut material = String::new();
        if let Some(ref plan) = state.derived_plan {
            material.push_str("## Study plan\n");
            material.push_str(&serde_json::to_string_pretty(plan).unwrap_or_default());
            material.push('\n');
        }
        if let Some(ref context) = state.scraped_context {
            material.push_str("## Lecture context\n");
            material.push_str(context);
            material.push('\n');
        }
        if material.is_empty() {
            material.push_str("(no material; use the learner's request alone)\n");
        }
        material
    }

    /// Stream the quiz text, forwarding every chunk. `None` if nothing arrived.
    async fn stream_quiz(state: &State, ctx: &NodeContext) -> Option<String> {
        let messages = vec![
            ChatMessage::system(QUIZ_PROMPT),
            ChatMessage::user(format!(
                "{}\nLearner request: {}",
                Self::material(state),
                state.query()
            )),
        ];
        let config = ctx.model(ModelStep::Quiz);

        let mut stream = match ctx.llm().chat_stream(&config, messages, &[]).await {
            Ok(s) => s,
            Err(e) => {
                warn!(user_id = %state.user_id(), error = %e, "Quiz generation failed");
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
                    warn!(user_id = %state.user_id(), error = %e, "Quiz stream broke off");
                    break;
                }
            }
        }
        (!text.is_empty()).then_some(text)
    }
}

impl Node for QuizNode {
    fn name(&self) -> &str {
        QUIZ
    }

    fn successors(&self) -> Vec<&str> {
        vec![]
    }

    fn run<'a>(&'a self, mut state: State, ctx: &'a NodeContext) -> BoxFuture<'a, (Transition, State)> {
        Box::pin(async move {
            let Some(text) = Self::stream_quiz(&state, ctx).await else {
                state.record_error("quiz generation failed");
                ctx.emit_token(QUIZ_UNAVAILABLE).await;
                state.set_response(QUIZ_UNAVAILABLE);
                return (Transition::Terminal, state);
            };

            match parse_json_reply(&text).and_then(|v| serde_json::from_value::<Quiz>(v).map_err(Into::into)) {
                Ok(quiz) => {
                    info!(user_id = %state.user_id(), questions = quiz.questions.len(), "Quiz generated");
                    state.quiz = Some(quiz);
                }
                Err(e) => warn!(user_id = %state.user_id(), error = %e, "Quiz text did not parse"),
            }
            state.set_response(text);
            (Transition::Terminal, state)
        })
    }
}
