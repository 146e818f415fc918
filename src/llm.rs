//! Chat-completion capability used by the worker and evaluator nodes.
//!
//! [`ChatModel`] is the seam; [`OpenAiChatModel`] talks to any
//! OpenAI-compatible `/chat/completions` endpoint, with function-calling
//! tools for the worker and `response_format: json_schema` for the
//! evaluator's structured verdict.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::config::LlmConfig;
use crate::messages::{Message, ToolCallRequest};

/// A tool as advertised to the model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON Schema of the arguments object.
    pub parameters: Value,
}

/// One assistant reply: free text plus zero or more tool requests.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssistantTurn {
    pub content: String,
    pub tool_calls: Vec<ToolCallRequest>,
}

impl AssistantTurn {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }

    pub fn into_message(self) -> Message {
        Message::Assistant {
            text: self.content,
            tool_calls: self.tool_calls,
            evaluation: false,
        }
    }
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Free-text completion, optionally with callable tools.
    async fn complete(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[ToolSpec],
    ) -> Result<AssistantTurn>;

    /// Completion constrained to a JSON object matching `schema`.
    async fn complete_structured(
        &self,
        system: &str,
        messages: &[Message],
        schema: &Value,
    ) -> Result<Value>;
}

/// Build the chat model for `model` from `config`.
pub fn create_chat_model(config: &LlmConfig, model: &str) -> Result<Arc<dyn ChatModel>> {
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAiChatModel::new(config, model)?)),
        other => bail!("Unknown llm provider: {}", other),
    }
}

pub struct OpenAiChatModel {
    model: String,
    url: String,
    api_key: Option<String>,
    temperature: f32,
    max_retries: u32,
    timeout: Duration,
    http: reqwest::Client,
}

impl OpenAiChatModel {
    /// `OPENAI_API_KEY` is required for api.openai.com and optional for
    /// other compatible endpoints. A missing key is reported on the first
    /// request, not here.
    pub fn new(config: &LlmConfig, model: &str) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty());
        let timeout = Duration::from_secs(config.timeout_secs);
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build llm http client")?;

        Ok(Self {
            model: model.to_string(),
            url: chat_completions_url(&config.base_url),
            api_key,
            temperature: config.temperature,
            max_retries: config.max_retries,
            timeout,
            http,
        })
    }

    async fn send(&self, payload: &Value) -> Result<ChatCompletionsResponse> {
        if self.api_key.is_none() && self.url.contains("api.openai.com") {
            bail!("OPENAI_API_KEY environment variable not set");
        }
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_secs(1 << (attempt - 1).min(5))).await;
            }

            let mut request = self.http.post(&self.url).json(payload);
            if let Some(key) = &self.api_key {
                request = request.bearer_auth(key);
            }

            let response = match request.send().await {
                Ok(r) => r,
                Err(e) if e.is_timeout() => {
                    last_err = Some(anyhow::anyhow!(
                        "llm request timed out after {:?} (model={})",
                        self.timeout,
                        self.model
                    ));
                    continue;
                }
                Err(e) => {
                    last_err = Some(anyhow::anyhow!(
                        "llm request failed (model={}): {}",
                        self.model,
                        e
                    ));
                    continue;
                }
            };

            let status = response.status();
            let body = response
                .text()
                .await
                .context("failed to read llm response body")?;

            if status.is_success() {
                return serde_json::from_str(&body).with_context(|| {
                    format!("invalid JSON from llm endpoint: {}", truncate_for_error(&body))
                });
            }
            if status.as_u16() == 429 || status.is_server_error() {
                last_err = Some(anyhow::anyhow!(
                    "llm endpoint returned HTTP {}: {}",
                    status,
                    truncate_for_error(&body)
                ));
                continue;
            }
            bail!(
                "llm endpoint returned HTTP {}: {}",
                status,
                truncate_for_error(&body)
            );
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("llm request failed after retries")))
    }
}

#[async_trait]
impl ChatModel for OpenAiChatModel {
    async fn complete(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[ToolSpec],
    ) -> Result<AssistantTurn> {
        let mut payload = json!({
            "model": self.model,
            "messages": wire_messages(system, messages),
            "temperature": self.temperature,
        });
        if !tools.is_empty() {
            payload["tools"] = Value::Array(tools.iter().map(wire_tool).collect());
        }

        let parsed = self.send(&payload).await?;
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("llm response had no choices"))?;
        debug!(
            model = %self.model,
            tool_calls = choice.message.tool_calls.len(),
            "worker completion"
        );
        Ok(choice.message.into_turn())
    }

    async fn complete_structured(
        &self,
        system: &str,
        messages: &[Message],
        schema: &Value,
    ) -> Result<Value> {
        let payload = json!({
            "model": self.model,
            "messages": wire_messages(system, messages),
            "temperature": self.temperature,
            "response_format": {
                "type": "json_schema",
                "json_schema": {
                    "name": "structured_output",
                    "strict": true,
                    "schema": schema,
                }
            }
        });

        let parsed = self.send(&payload).await?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| anyhow::anyhow!("structured response had no content"))?;
        parse_json_object(&content)
    }
}

fn chat_completions_url(base: &str) -> String {
    let base = base.trim().trim_end_matches('/');
    if base.ends_with("/chat/completions") {
        base.to_string()
    } else {
        format!("{}/chat/completions", base)
    }
}

fn truncate_for_error(value: &str) -> String {
    const LIMIT: usize = 400;
    if value.chars().count() <= LIMIT {
        value.to_string()
    } else {
        format!("{}...", value.chars().take(LIMIT).collect::<String>())
    }
}

/// Parse `content` as a JSON object, tolerating prose around it.
pub fn parse_json_object(content: &str) -> Result<Value> {
    if let Ok(v @ Value::Object(_)) = serde_json::from_str::<Value>(content) {
        return Ok(v);
    }
    let start = content.find('{');
    let end = content.rfind('}');
    match (start, end) {
        (Some(s), Some(e)) if e > s => serde_json::from_str(&content[s..=e])
            .with_context(|| format!("invalid JSON object: {}", truncate_for_error(content))),
        _ => bail!("response is not a JSON object: {}", truncate_for_error(content)),
    }
}

fn wire_tool(spec: &ToolSpec) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": spec.name,
            "description": spec.description,
            "parameters": spec.parameters,
        }
    })
}

fn wire_messages(system: &str, messages: &[Message]) -> Vec<Value> {
    let mut out = Vec::with_capacity(messages.len() + 1);
    out.push(json!({"role": "system", "content": system}));
    for message in messages {
        out.push(match message {
            Message::User { text } => json!({"role": "user", "content": text}),
            Message::Assistant {
                text, tool_calls, ..
            } if !tool_calls.is_empty() => json!({
                "role": "assistant",
                "content": text,
                "tool_calls": tool_calls.iter().map(|c| json!({
                    "id": c.id,
                    "type": "function",
                    "function": {
                        "name": c.name,
                        "arguments": c.arguments.to_string(),
                    }
                })).collect::<Vec<_>>(),
            }),
            Message::Assistant { text, .. } => json!({"role": "assistant", "content": text}),
            Message::ToolResult { call_id, text, .. } => json!({
                "role": "tool",
                "tool_call_id": call_id,
                "content": text,
            }),
        });
    }
    out
}

#[derive(Debug, Deserialize)]
struct ChatCompletionsResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ResponseToolCall>,
}

#[derive(Debug, Deserialize)]
struct ResponseToolCall {
    id: String,
    function: ResponseFunction,
}

#[derive(Debug, Deserialize)]
struct ResponseFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

impl ResponseMessage {
    fn into_turn(self) -> AssistantTurn {
        let tool_calls = self
            .tool_calls
            .into_iter()
            .map(|c| {
                let arguments = if c.function.arguments.trim().is_empty() {
                    json!({})
                } else {
                    serde_json::from_str(&c.function.arguments)
                        .unwrap_or(Value::String(c.function.arguments))
                };
                ToolCallRequest {
                    id: c.id,
                    name: c.function.name,
                    arguments,
                }
            })
            .collect();
        AssistantTurn {
            content: self.content.unwrap_or_default(),
            tool_calls,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_building() {
        assert_eq!(
            chat_completions_url("https://api.openai.com/v1/"),
            "https://api.openai.com/v1/chat/completions"
        );
        assert_eq!(
            chat_completions_url("http://localhost:8080/v1/chat/completions"),
            "http://localhost:8080/v1/chat/completions"
        );
    }

    #[test]
    fn tool_calls_are_parsed_with_json_arguments() {
        let body = json!({
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [
                        {"id": "c1", "type": "function",
                         "function": {"name": "search_documents", "arguments": "{\"query\":\"sky\"}"}},
                        {"id": "c2", "type": "function",
                         "function": {"name": "wikipedia", "arguments": ""}}
                    ]
                }
            }]
        });
        let parsed: ChatCompletionsResponse = serde_json::from_value(body).unwrap();
        let turn = parsed.choices.into_iter().next().unwrap().message.into_turn();
        assert_eq!(turn.content, "");
        assert_eq!(turn.tool_calls.len(), 2);
        assert_eq!(turn.tool_calls[0].arguments["query"], "sky");
        assert_eq!(turn.tool_calls[1].arguments, json!({}));
    }

    #[test]
    fn wire_format_covers_every_variant() {
        let messages = vec![
            Message::user("q"),
            Message::Assistant {
                text: String::new(),
                tool_calls: vec![ToolCallRequest {
                    id: "c1".to_string(),
                    name: "t".to_string(),
                    arguments: json!({"a": 1}),
                }],
                evaluation: false,
            },
            Message::ToolResult {
                call_id: "c1".to_string(),
                name: "t".to_string(),
                text: "out".to_string(),
            },
            Message::assistant("done"),
        ];
        let wire = wire_messages("sys", &messages);
        assert_eq!(wire.len(), 5);
        assert_eq!(wire[0]["role"], "system");
        assert_eq!(wire[2]["tool_calls"][0]["function"]["arguments"], "{\"a\":1}");
        assert_eq!(wire[3]["role"], "tool");
        assert_eq!(wire[3]["tool_call_id"], "c1");
        assert_eq!(wire[4]["content"], "done");
    }

    #[test]
    fn json_object_extraction() {
        assert_eq!(parse_json_object("{\"a\": true}").unwrap()["a"], true);
        assert_eq!(
            parse_json_object("Sure! {\"a\": 2} hope that helps").unwrap()["a"],
            2
        );
        assert!(parse_json_object("no json here").is_err());
    }
}
