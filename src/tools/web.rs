//! `web_search`: Google results through the Serper API.
//!
//! Requires `SERPER_API_KEY`. The key is read per call so a missing key
//! surfaces as a tool error in the conversation rather than at startup.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

use super::{required_str, Tool, ToolGroup};

pub const SERPER_API_KEY_ENV: &str = "SERPER_API_KEY";
const SERPER_URL: &str = "https://google.serper.dev/search";
const NO_RESULTS: &str = "No good Google Search Result was found";

pub struct WebSearchTool {
    results: usize,
    url: String,
    http: reqwest::Client,
}

impl WebSearchTool {
    pub fn new(results: usize) -> Self {
        Self::with_url(results, SERPER_URL)
    }

    pub fn with_url(results: usize, url: &str) -> Self {
        Self {
            results: results.max(1),
            url: url.to_string(),
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
        }
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web with Google for current events or facts not in the user's documents."
    }

    fn group(&self) -> ToolGroup {
        ToolGroup::WebSearch
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {"type": "string", "description": "Search query"}
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, params: Value) -> Result<String> {
        let query = required_str(&params, "query")?;
        let key = match std::env::var(SERPER_API_KEY_ENV) {
            Ok(k) if !k.is_empty() => k,
            _ => bail!("{} environment variable not set", SERPER_API_KEY_ENV),
        };

        let response = self
            .http
            .post(&self.url)
            .header("X-API-KEY", key)
            .json(&json!({"q": query, "num": self.results}))
            .send()
            .await
            .context("web search request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("web search error ({}): {}", status, body);
        }

        let body: Value = response
            .json()
            .await
            .context("failed to parse web search response")?;
        Ok(format_serper_results(&body, self.results))
    }
}

/// Flatten a Serper response into plain text snippets.
pub fn format_serper_results(body: &Value, limit: usize) -> String {
    let mut snippets: Vec<String> = Vec::new();

    if let Some(answer_box) = body.get("answerBox") {
        let answer = ["answer", "snippet"]
            .iter()
            .find_map(|k| answer_box.get(*k).and_then(|v| v.as_str()));
        if let Some(answer) = answer {
            snippets.push(answer.to_string());
        }
    }

    if let Some(kg) = body.get("knowledgeGraph") {
        let title = kg.get("title").and_then(|v| v.as_str());
        let kind = kg.get("type").and_then(|v| v.as_str());
        if let (Some(title), Some(kind)) = (title, kind) {
            snippets.push(format!("{}: {}.", title, kind));
        }
        if let Some(description) = kg.get("description").and_then(|v| v.as_str()) {
            snippets.push(description.to_string());
        }
        if let Some(attributes) = kg.get("attributes").and_then(|v| v.as_object()) {
            for (attribute, value) in attributes {
                if let (Some(title), Some(value)) = (title, value.as_str()) {
                    snippets.push(format!("{} {}: {}.", title, attribute, value));
                }
            }
        }
    }

    if let Some(organic) = body.get("organic").and_then(|v| v.as_array()) {
        for result in organic.iter().take(limit) {
            if let Some(snippet) = result.get("snippet").and_then(|v| v.as_str()) {
                snippets.push(snippet.to_string());
            }
        }
    }

    if snippets.is_empty() {
        NO_RESULTS.to_string()
    } else {
        snippets.join(" ")
    }
}
