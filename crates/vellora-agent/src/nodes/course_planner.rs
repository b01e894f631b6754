use futures::future::BoxFuture;
use schemars::JsonSchema;
use serde::Deserialize;
use tracing::{debug, info, warn};

use vellora_core::config::ModelStep;
use vellora_core::state::State;
use vellora_core::types::{PlanModule, SearchHit, SearchQuery, StudyPlan, TranscriptRequest, VideoHit};

use super::{excerpt, COURSE_PLANNER, RESPONSE};
use crate::graph::{Node, NodeContext, Transition};
use crate::structured::decode;

const NO_SEARCH_RESULTS: &str = "no_search_results";

const TOPIC_PROMPT: &str = "\
Extract the subject the learner wants to study from their message.
Reply with a JSON object with a single field \"topic\": a short search phrase.";

const PLAN_PROMPT: &str = "\
You are a study planner. Build a practical study plan for the topic from the
web results, videos and transcript excerpt you are given. Prefer the given
resources over anything you would invent. Reply with a JSON object with
\"overview\" (a short paragraph) and \"modules\" (an ordered list, each with
\"title\", \"objectives\" and \"resources\" as lists of strings).";

#[derive(Debug, Deserialize, JsonSchema)]
struct TopicReply {
    topic: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct PlanDraft {
    overview: String,
    modules: Vec<DraftModule>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct DraftModule {
    title: String,
    #[serde(default)]
    objectives: Vec<String>,
    #[serde(default)]
    resources: Vec<String>,
}

/// Searches the web and video sources for a topic and synthesizes a study plan.
pub struct CoursePlannerNode;

impl CoursePlannerNode {
    async fn topic(state: &State, ctx: &NodeContext) -> String {
        let user = format!("Message: {}", state.query());
        match decode::<TopicReply>(ctx, ModelStep::Extractor, TOPIC_PROMPT, &user).await {
            Ok(reply) if !reply.topic.trim().is_empty() => reply.topic.trim().to_string(),
            Ok(_) => state.query().to_string(),
            Err(e) => {
                warn!(user_id = %state.user_id(), error = %e, "Topic extraction failed, searching the raw query");
                state.query().to_string()
            }
        }
    }

    /// Both searches run concurrently; a failure of one leaves the other intact.
    async fn search(topic: &str, ctx: &NodeContext) -> (Vec<SearchHit>, Vec<VideoHit>) {
        let settings = &ctx.config().planner;
        let tools = ctx.tools();
        let (web, videos) = tokio::join!(
            tools
                .web_search
                .invoke(SearchQuery::new(topic, settings.web_results)),
            tools
                .video_search
                .invoke(SearchQuery::new(topic, settings.video_results)),
        );

        let web = web.unwrap_or_else(|e| {
            warn!(topic = %topic, error = %e, "Web search failed");
            vec![]
        });
        let videos = videos.unwrap_or_else(|e| {
            warn!(topic = %topic, error = %e, "Video search failed");
            vec![]
        });
        (web, videos)
    }

    /// Transcript excerpt of the top video, if it has captions.
    async fn top_video_excerpt(videos: &[VideoHit], ctx: &NodeContext) -> Option<String> {
        let top = videos.first()?;
        let request = TranscriptRequest {
            video_url: top.url.clone(),
            language: ctx.config().context.language.clone(),
        };
        match ctx.tools().transcript.invoke(request).await {
            Ok(text) => Some(excerpt(&text, ctx.config().planner.transcript_excerpt_chars)),
            Err(e) => {
                debug!(video = %top.url, error = %e, "No transcript for top video");
                None
            }
        }
    }

    fn synthesis_input(topic: &str, web: &[SearchHit], videos: &[VideoHit], transcript: Option<&str>) -> String {
        let mut input = format!("Topic: {}\n\n## Web results\n", topic);
        for hit in web {
            input.push_str(&format!("- {} ({}): {}\n", hit.title, hit.url, hit.snippet));
        }
        input.push_str("\n## Videos\n");
        for video in videos {
            input.push_str(&format!(
                "- {} ({}, {} min): {}\n",
                video.title,
                video.url,
                video.duration_secs / 60,
                video.description
            ));
        }
        if let Some(t) = transcript {
            input.push_str("\n## Transcript excerpt of the first video\n");
            input.push_str(t);
            input.push('\n');
        }
        input
    }
}

impl Node for CoursePlannerNode {
    fn name(&self) -> &str {
        COURSE_PLANNER
    }

    fn successors(&self) -> Vec<&str> {
        vec![RESPONSE]
    }

    fn run<'a>(&'a self, mut state: State, ctx: &'a NodeContext) -> BoxFuture<'a, (Transition, State)> {
        Box::pin(async move {
            let topic = Self::topic(&state, ctx).await;
            let (web, videos) = Self::search(&topic, ctx).await;
            info!(topic = %topic, web = web.len(), videos = videos.len(), "Planner search done");

            state.search_results = Some(web.clone());
            state.video_results = Some(videos.clone());

            if web.is_empty() && videos.is_empty() {
                warn!(topic = %topic, "No search results, skipping synthesis");
                state.derived_plan = Some(StudyPlan::degraded(topic, NO_SEARCH_RESULTS, vec![], vec![]));
                return (Transition::goto(RESPONSE), state);
            }

            let transcript = Self::top_video_excerpt(&videos, ctx).await;
            let input = Self::synthesis_input(&topic, &web, &videos, transcript.as_deref());

            let plan = match decode::<PlanDraft>(ctx, ModelStep::Planner, PLAN_PROMPT, &input).await {
                Ok(draft) => StudyPlan {
                    topic,
                    overview: draft.overview,
                    modules: draft
                        .modules
                        .into_iter()
                        .map(|m| PlanModule {
                            title: m.title,
                            objectives: m.objectives,
                            resources: m.resources,
                        })
                        .collect(),
                    error: None,
                    search_results: vec![],
                    video_results: vec![],
                },
                Err(e) => {
                    warn!(topic = %topic, error = %e, "Plan synthesis failed, keeping raw results");
                    StudyPlan::degraded(topic, e.to_string(), web, videos)
                }
            };
            state.derived_plan = Some(plan);
            (Transition::goto(RESPONSE), state)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use serde_json::json;
    use vellora_core::error::VelloraError;
    use vellora_core::state::CallerRole;
    use vellora_test_utils::{test_config, ScriptedReply, StubAdapter};

    use crate::testing::{caps_with, context, scripted, toolbox};

    fn hit(title: &str) -> SearchHit {
        SearchHit {
            title: title.into(),
            url: format!("https://example.com/{}", title),
            snippet: "snippet".into(),
        }
    }

    fn video(title: &str) -> VideoHit {
        VideoHit {
            title: title.into(),
            url: format!("https://youtu.be/{}", title),
            description: String::new(),
            duration_secs: 600,
        }
    }

    fn learner() -> State {
        State::new("u1", CallerRole::Learner, "plan me a course on graph theory")
    }

    #[tokio::test]
    async fn empty_searches_degrade_without_synthesis() {
        let llm = scripted([ScriptedReply::Json(json!({ "topic": "graph theory" }))]);
        let (ctx, _rx) = context(caps_with(llm.clone(), toolbox(), test_config()), COURSE_PLANNER);

        let (t, state) = CoursePlannerNode.run(learner(), &ctx).await;
        assert_eq!(t, Transition::goto(RESPONSE));
        let plan = state.derived_plan.unwrap();
        assert_eq!(plan.error.as_deref(), Some(NO_SEARCH_RESULTS));
        assert_eq!(plan.topic, "graph theory");
        assert_eq!(llm.call_count(), 1);
    }

    #[tokio::test]
    async fn one_failed_search_does_not_sink_the_other() {
        let mut tools = toolbox();
        tools.web_search = Arc::new(StubAdapter::<SearchQuery, Vec<SearchHit>>::failing("web_search", || {
            VelloraError::ToolExecution {
                tool: "web_search".into(),
                message: "timeout".into(),
            }
        }));
        tools.video_search = Arc::new(StubAdapter::<SearchQuery, Vec<VideoHit>>::returning(
            "video_search",
            vec![video("intro")],
        ));
        let llm = scripted([
            ScriptedReply::Json(json!({ "topic": "graph theory" })),
            ScriptedReply::Json(json!({
                "overview": "Start with definitions.",
                "modules": [{ "title": "Basics", "objectives": ["define a graph"], "resources": ["https://youtu.be/intro"] }]
            })),
        ]);
        let (ctx, _rx) = context(caps_with(llm.clone(), tools, test_config()), COURSE_PLANNER);

        let (_, state) = CoursePlannerNode.run(learner(), &ctx).await;
        let plan = state.derived_plan.unwrap();
        assert!(!plan.is_degraded());
        assert_eq!(plan.modules[0].title, "Basics");
        assert_eq!(state.video_results.unwrap().len(), 1);
        assert!(state.search_results.unwrap().is_empty());
        assert!(llm.calls()[1].prompt_text().contains("https://youtu.be/intro"));
    }

    #[tokio::test]
    async fn synthesis_failure_keeps_raw_results() {
        let mut tools = toolbox();
        tools.web_search = Arc::new(StubAdapter::<SearchQuery, Vec<SearchHit>>::returning(
            "web_search",
            vec![hit("bfs"), hit("dfs")],
        ));
        let llm = scripted([
            ScriptedReply::Error("topic model down".into()),
            ScriptedReply::Error("planner model down".into()),
        ]);
        let (ctx, _rx) = context(caps_with(llm, tools, test_config()), COURSE_PLANNER);

        let (t, state) = CoursePlannerNode.run(learner(), &ctx).await;
        assert_eq!(t, Transition::goto(RESPONSE));
        let plan = state.derived_plan.unwrap();
        assert!(plan.error.unwrap().contains("planner model down"));
        assert_eq!(plan.search_results.len(), 2);
        // Topic extraction failed, so the raw query was searched
        assert_eq!(plan.topic, "plan me a course on graph theory");
    }

    #[test]
    fn synthesis_input_lists_everything() {
        let input = CoursePlannerNode::synthesis_input(
            "rust",
            &[hit("book")],
            &[video("talk")],
            Some("ownership is..."),
        );
        assert!(input.contains("https://example.com/book"));
        assert!(input.contains("10 min"));
        assert!(input.contains("ownership is..."));
    }
}
