//! `websearch`: search the web through DuckDuckGo's instant answer API.

use std::time::Duration;

use agent_core::{
    AgentError,
    error::ToolError,
    tool::{ParameterSchema, Tool, ToolContext, ToolOutput, ToolSchema},
};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};

use super::webfetch::USER_AGENT;

const SEARCH_URL: &str = "https://api.duckduckgo.com/";
const SEARCH_TIMEOUT_SECS: u64 = 20;
const DEFAULT_MAX_RESULTS: usize = 5;
const TITLE_CHARS: usize = 80;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InstantAnswer {
    #[serde(default)]
    heading: String,
    #[serde(default)]
    abstract_text: String,
    #[serde(default, rename = "AbstractURL")]
    abstract_url: String,
    #[serde(default)]
    results: Vec<Topic>,
    #[serde(default)]
    related_topics: Vec<Topic>,
}

/// A result entry, or a named group of them
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Topic {
    Entry {
        #[serde(rename = "Text")]
        text: String,
        #[serde(rename = "FirstURL")]
        first_url: String,
    },
    Group {
        #[serde(rename = "Topics")]
        topics: Vec<Topic>,
    },
}

#[derive(Debug, PartialEq, Eq)]
struct SearchHit {
    title: String,
    url: String,
    snippet: String,
}

impl SearchHit {
    /// Entries read "Title - description"; the title is the part before the dash
    fn from_entry(text: &str, url: &str) -> Self {
        let title = text
            .split_once(" - ")
            .map_or(text, |(title, _)| title)
            .chars()
            .take(TITLE_CHARS)
            .collect();
        Self {
            title,
            url: url.to_string(),
            snippet: text.to_string(),
        }
    }
}

fn flatten(topics: Vec<Topic>, hits: &mut Vec<SearchHit>) {
    for topic in topics {
        match topic {
            Topic::Entry { text, first_url } if !first_url.is_empty() => {
                hits.push(SearchHit::from_entry(&text, &first_url));
            }
            Topic::Entry { .. } => {}
            Topic::Group { topics } => flatten(topics, hits),
        }
    }
}

/// Direct results first, then the abstract, then related topics
fn collect_hits(answer: InstantAnswer, max_results: usize) -> Vec<SearchHit> {
    let mut hits = Vec::new();
    flatten(answer.results, &mut hits);
    if !answer.abstract_url.is_empty() && !answer.abstract_text.is_empty() {
        hits.push(SearchHit {
            title: answer.heading,
            url: answer.abstract_url,
            snippet: answer.abstract_text,
        });
    }
    flatten(answer.related_topics, &mut hits);
    hits.truncate(max_results);
    hits
}

fn render_hits(hits: &[SearchHit]) -> String {
    if hits.is_empty() {
        return "No results found.".into();
    }
    hits.iter()
        .enumerate()
        .map(|(i, hit)| format!("{}. {}\n   URL: {}\n   {}\n", i + 1, hit.title, hit.url, hit.snippet))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Web search returning titles, links and snippets
pub struct WebSearchTool {
    client: Client,
    endpoint: String,
}

impl WebSearchTool {
    pub fn new() -> Result<Self, AgentError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(SEARCH_TIMEOUT_SECS))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| AgentError::Config(format!("websearch client setup failed: {e}")))?;
        Ok(Self {
            client,
            endpoint: SEARCH_URL.into(),
        })
    }

    /// Point at another instant-answer compatible endpoint
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "websearch".into(),
            description: "Search the web for up-to-date information. Returns titles, URLs and \
                          snippets of matching pages; read a page with webfetch."
                .into(),
            parameters: vec![
                ParameterSchema::new("query", "string", "The search query").required(),
                ParameterSchema::new(
                    "max_results",
                    "integer",
                    "Maximum number of results to return (default: 5)",
                ),
            ],
        }
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let query = args["query"].as_str().unwrap_or_default().trim().to_string();
        if query.is_empty() {
            return Err(ToolError::InvalidArguments("query must not be empty".into()));
        }
        let max_results = args
            .get("max_results")
            .and_then(Value::as_u64)
            .and_then(|n| usize::try_from(n).ok())
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_MAX_RESULTS);

        tracing::info!(query = %query, max_results, "Web search");

        let response = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("q", query.as_str()),
                ("format", "json"),
                ("no_html", "1"),
                ("skip_disambig", "1"),
            ])
            .send()
            .await
            .map_err(|e| ToolError::Execution(format!("Search request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ToolError::Execution(format!("Search failed with HTTP {status}")));
        }
        let answer: InstantAnswer = response
            .json()
            .await
            .map_err(|e| ToolError::Execution(format!("Unreadable search response: {e}")))?;

        let hits = collect_hits(answer, max_results);
        Ok(ToolOutput::new(format!("Web search: {query}"), render_hits(&hits))
            .with_metadata(json!({ "query": query, "count": hits.len() })))
    }
}
