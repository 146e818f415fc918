//! `wikipedia`: page summaries from the MediaWiki API.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

use super::{required_str, Tool, ToolGroup};

const NO_RESULTS: &str = "No good Wikipedia Search Result was found";

pub struct WikipediaTool {
    api_url: String,
    top_k: usize,
    max_chars: usize,
    http: reqwest::Client,
}

#[derive(Deserialize)]
struct SearchResponse {
    query: Option<SearchQuery>,
}

#[derive(Deserialize)]
struct SearchQuery {
    #[serde(default)]
    search: Vec<SearchHit>,
}

#[derive(Deserialize)]
struct SearchHit {
    title: String,
}

impl WikipediaTool {
    pub fn new(lang: &str, top_k: usize, max_chars: usize) -> Self {
        Self {
            api_url: format!("https://{}.wikipedia.org/w/api.php", lang),
            top_k: top_k.max(1),
            max_chars,
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .user_agent(concat!("sidekick/", env!("CARGO_PKG_VERSION")))
                .build()
                .unwrap_or_default(),
        }
    }

    async fn get_json(&self, query: &[(&str, &str)]) -> Result<Value> {
        let response = self
            .http
            .get(&self.api_url)
            .query(query)
            .send()
            .await
            .context("wikipedia request failed")?;
        let status = response.status();
        if !status.is_success() {
            bail!("wikipedia error ({})", status);
        }
        response
            .json()
            .await
            .context("failed to parse wikipedia response")
    }

    async fn search_titles(&self, query: &str) -> Result<Vec<String>> {
        let limit = self.top_k.to_string();
        let body = self
            .get_json(&[
                ("action", "query"),
                ("list", "search"),
                ("srsearch", query),
                ("srlimit", limit.as_str()),
                ("format", "json"),
            ])
            .await?;
        let parsed: SearchResponse = serde_json::from_value(body)?;
        Ok(parsed
            .query
            .map(|q| q.search.into_iter().map(|h| h.title).collect())
            .unwrap_or_default())
    }

    async fn summary(&self, title: &str) -> Result<Option<String>> {
        let body = self
            .get_json(&[
                ("action", "query"),
                ("prop", "extracts"),
                ("exintro", "1"),
                ("explaintext", "1"),
                ("redirects", "1"),
                ("titles", title),
                ("format", "json"),
            ])
            .await?;
        Ok(first_extract(&body))
    }
}

fn first_extract(body: &Value) -> Option<String> {
    body.pointer("/query/pages")?
        .as_object()?
        .values()
        .find_map(|page| page.get("extract").and_then(|e| e.as_str()))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Join `(title, summary)` pairs and cap the result at `max_chars` characters.
pub fn format_pages(pages: &[(String, String)], max_chars: usize) -> String {
    if pages.is_empty() {
        return NO_RESULTS.to_string();
    }
    let joined = pages
        .iter()
        .map(|(title, summary)| format!("Page: {}\nSummary: {}", title, summary))
        .collect::<Vec<_>>()
        .join("\n\n");
    joined.chars().take(max_chars).collect()
}

#[async_trait]
impl Tool for WikipediaTool {
    fn name(&self) -> &str {
        "wikipedia"
    }

    fn description(&self) -> &str {
        "Look up general knowledge on Wikipedia. Input is a search query."
    }

    fn group(&self) -> ToolGroup {
        ToolGroup::Wikipedia
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
        let mut pages = Vec::new();
        for title in self.search_titles(query).await? {
            if let Some(summary) = self.summary(&title).await? {
                pages.push((title, summary));
            }
        }
        Ok(format_pages(&pages, self.max_chars))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pages_are_joined_and_truncated() {
        let pages = vec![
            ("Rust".to_string(), "A language.".to_string()),
            ("Ferris".to_string(), "A crab.".to_string()),
        ];
        assert_eq!(
            format_pages(&pages, 4000),
            "Page: Rust\nSummary: A language.\n\nPage: Ferris\nSummary: A crab."
        );
        assert_eq!(format_pages(&pages, 10), "Page: Rust");
        assert_eq!(format_pages(&[], 100), NO_RESULTS);
    }

    #[test]
    fn extract_from_pages_object() {
        let body = json!({"query": {"pages": {"123": {"title": "Rust", "extract": " A language. "}}}});
        assert_eq!(first_extract(&body).as_deref(), Some("A language."));
        assert_eq!(first_extract(&json!({"query": {"pages": {"-1": {"missing": ""}}}})), None);
    }
}
