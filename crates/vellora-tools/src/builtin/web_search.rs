use std::time::Duration;

use futures::future::BoxFuture;
use serde::Deserialize;
use tracing::{debug, warn};

use vellora_core::config::WebSearchConfig;
use vellora_core::error::Result;
use vellora_core::traits::ToolAdapter;
use vellora_core::types::{SearchHit, SearchQuery};

/// Keyless web search over the DuckDuckGo instant-answer API.
///
/// Never fails: transport or decode problems yield an empty hit list.
pub struct DuckDuckGoSearch {
    endpoint: String,
    http: reqwest::Client,
}

impl DuckDuckGoSearch {
    pub fn new(config: &WebSearchConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            endpoint: config.endpoint.clone(),
            http,
        }
    }

    async fn fetch(&self, query: &str) -> std::result::Result<InstantAnswer, reqwest::Error> {
        self.http
            .get(&self.endpoint)
            .query(&[
                ("q", query),
                ("format", "json"),
                ("no_html", "1"),
                ("skip_disambig", "1"),
            ])
            .send()
            .await?
            .error_for_status()?
            .json::<InstantAnswer>()
            .await
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct InstantAnswer {
    #[serde(default)]
    heading: String,
    #[serde(default)]
    abstract_text: String,
    #[serde(default, rename = "AbstractURL")]
    abstract_url: String,
    #[serde(default)]
    related_topics: Vec<RelatedTopic>,
}

/// Either a plain topic or a named group of topics.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RelatedTopic {
    Topic {
        #[serde(rename = "Text")]
        text: String,
        #[serde(rename = "FirstURL", default)]
        first_url: String,
    },
    Group {
        #[serde(rename = "Topics")]
        topics: Vec<RelatedTopic>,
    },
}

impl InstantAnswer {
    /// Flatten the answer into hits: the abstract first, then related topics.
    pub(crate) fn into_hits(self, max_results: usize) -> Vec<SearchHit> {
        let mut hits = Vec::new();

        if !self.abstract_text.trim().is_empty() {
            hits.push(SearchHit {
                title: self.heading.clone(),
                url: self.abstract_url.clone(),
                snippet: self.abstract_text.clone(),
            });
        }

        let mut stack: Vec<RelatedTopic> = self.related_topics.into_iter().rev().collect();
        while let Some(topic) = stack.pop() {
            match topic {
                RelatedTopic::Topic { text, first_url } => {
                    if text.trim().is_empty() {
                        continue;
                    }
                    let title = text.split(" - ").next().unwrap_or(text.as_str()).to_string();
                    hits.push(SearchHit {
                        title,
                        url: first_url,
                        snippet: text,
                    });
                }
                RelatedTopic::Group { topics } => stack.extend(topics.into_iter().rev()),
            }
        }

        hits.truncate(max_results);
        hits
    }
}

impl ToolAdapter for DuckDuckGoSearch {
    type Args = SearchQuery;
    type Output = Vec<SearchHit>;

    fn name(&self) -> &str {
        "web_search"
    }

    fn invoke(&self, args: SearchQuery) -> BoxFuture<'_, Result<Vec<SearchHit>>> {
        Box::pin(async move {
            match self.fetch(&args.query).await {
                Ok(answer) => {
                    let hits = answer.into_hits(args.max_results);
                    debug!(query = %args.query, hits = hits.len(), "Web search finished");
                    Ok(hits)
                }
                Err(e) => {
                    warn!(query = %args.query, error = %e, "Web search failed, returning no results");
                    Ok(vec![])
                }
            }
        })
    }
}
