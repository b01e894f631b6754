use futures::future::BoxFuture;
use schemars::JsonSchema;
use serde::{Deserialize, Deserializer};
use tracing::{info, warn};

use vellora_core::config::ModelStep;
use vellora_core::error::VelloraError;
use vellora_core::state::State;
use vellora_core::types::TranscriptRequest;
use vellora_tools::builtin::video_url;

use super::{excerpt, CONTEXT_LOOKUP, QUIZ, RESPONSE};
use crate::graph::{Node, NodeContext, Transition};
use crate::structured::decode;

const EXTRACTION_PROMPT: &str = "\
You retrieve the context of a lecture from its transcript, focused on what the learner asks.
Reply with a JSON object with two fields:
- \"context\": the parts of the lecture relevant to the learner's query, as prose.
- \"need_quiz\": true if the learner wants to take a quiz on the lecture, false otherwise.
Give priority to the learner's query when deciding need_quiz.";

#[derive(Debug, Deserialize, JsonSchema)]
struct LectureContext {
    context: String,
    #[serde(deserialize_with = "lenient_bool")]
    #[schemars(with = "bool")]
    need_quiz: bool,
}

/// Models sometimes quote booleans.
fn lenient_bool<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<bool, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Text(String),
    }
    Ok(match Flag::deserialize(d)? {
        Flag::Bool(b) => b,
        Flag::Text(s) => s.trim().eq_ignore_ascii_case("true"),
    })
}

/// Pulls a lecture transcript and extracts the part relevant to the query.
pub struct ContextLookupNode;

impl ContextLookupNode {
    /// The video to read. A lecture reference wins over a raw video reference.
    async fn resolve_video(state: &mut State, ctx: &NodeContext) -> Option<String> {
        if let Some(lecture_id) = state.lecture_ref.clone() {
            return match ctx.tools().lecture_lookup.invoke(lecture_id.clone()).await {
                Ok(video_ref) => Some(video_ref),
                Err(VelloraError::NotFound(_)) => {
                    info!(lecture_id = %lecture_id, "Lecture not in catalog");
                    state.record_error(format!("lecture {} was not found", lecture_id));
                    None
                }
                Err(e) => {
                    warn!(lecture_id = %lecture_id, error = %e, "Lecture lookup failed");
                    state.record_error(format!("lecture lookup failed: {}", e));
                    None
                }
            };
        }
        state.video_ref.clone()
    }
}

impl Node for ContextLookupNode {
    fn name(&self) -> &str {
        CONTEXT_LOOKUP
    }

    fn successors(&self) -> Vec<&str> {
        vec![QUIZ, RESPONSE]
    }

    fn run<'a>(&'a self, mut state: State, ctx: &'a NodeContext) -> BoxFuture<'a, (Transition, State)> {
        Box::pin(async move {
            let Some(video_ref) = Self::resolve_video(&mut state, ctx).await else {
                return (Transition::goto(RESPONSE), state);
            };

            let settings = &ctx.config().context;
            let request = TranscriptRequest {
                video_url: video_url(&video_ref),
                language: settings.language.clone(),
            };
            let transcript = match ctx.tools().transcript.invoke(request).await {
                Ok(t) => t,
                Err(VelloraError::NoCaptions(url)) => {
                    info!(video = %url, "No captions available");
                    state.scraped_context = None;
                    state.record_error("the lecture video has no captions");
                    return (Transition::goto(RESPONSE), state);
                }
                Err(e) => {
                    warn!(video = %video_ref, error = %e, "Failed to fetch captions");
                    state.scraped_context = None;
                    state.record_error(format!("transcript fetch failed: {}", e));
                    return (Transition::goto(RESPONSE), state);
                }
            };
            let transcript = excerpt(&transcript, settings.transcript_chars);

            let user = format!(
                "Video transcript:\n{}\n\nLearner query: {}",
                transcript,
                state.query()
            );
            match decode::<LectureContext>(ctx, ModelStep::Extractor, EXTRACTION_PROMPT, &user).await {
                Ok(found) => {
                    state.scraped_context = Some(found.context);
                    state.set_need_quiz(found.need_quiz);
                }
                Err(e) => {
                    warn!(user_id = %state.user_id(), error = %e, "Context extraction failed, using transcript excerpt");
                    state.scraped_context = Some(excerpt(&transcript, settings.fallback_chars));
                    state.set_need_quiz(false);
                    state.record_error(format!("lecture context extraction failed: {}", e));
                }
            }

            let next = match state.take_need_quiz() {
                Some(true) => QUIZ,
                _ => RESPONSE,
            };
            (Transition::goto(next), state)
        })
    }
}
