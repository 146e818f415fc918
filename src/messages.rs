//! Conversation messages and per-thread agent state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Text returned when a run produced no usable assistant message.
pub const NO_RESPONSE: &str = "No response generated";

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    User {
        text: String,
    },
    Assistant {
        text: String,
        #[serde(default)]
        tool_calls: Vec<ToolCallRequest>,
        /// Internal evaluator feedback, hidden from the visible transcript.
        #[serde(default)]
        evaluation: bool,
    },
    ToolResult {
        call_id: String,
        name: String,
        text: String,
    },
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Message::User { text: text.into() }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Message::Assistant {
            text: text.into(),
            tool_calls: Vec::new(),
            evaluation: false,
        }
    }

    pub fn evaluation(text: impl Into<String>) -> Self {
        Message::Assistant {
            text: text.into(),
            tool_calls: Vec::new(),
            evaluation: true,
        }
    }

    pub fn text(&self) -> &str {
        match self {
            Message::User { text }
            | Message::Assistant { text, .. }
            | Message::ToolResult { text, .. } => text,
        }
    }

    pub fn tool_calls(&self) -> &[ToolCallRequest] {
        match self {
            Message::Assistant { tool_calls, .. } => tool_calls,
            Message::User { .. } | Message::ToolResult { .. } => &[],
        }
    }

    pub fn is_evaluation(&self) -> bool {
        matches!(self, Message::Assistant { evaluation: true, .. })
    }

    /// `true` for messages shown to the user (user turns and
    /// non-evaluation assistant replies without pending tool calls).
    pub fn is_visible(&self) -> bool {
        match self {
            Message::User { .. } => true,
            Message::Assistant {
                tool_calls,
                evaluation,
                ..
            } => !evaluation && tool_calls.is_empty(),
            Message::ToolResult { .. } => false,
        }
    }

    /// One-line rendering used in the evaluator's transcript.
    pub fn transcript_line(&self) -> String {
        match self {
            Message::User { text } => format!("User: {}", text),
            Message::Assistant {
                text, tool_calls, ..
            } if !tool_calls.is_empty() => {
                let names: Vec<&str> = tool_calls.iter().map(|c| c.name.as_str()).collect();
                format!("Assistant: {} [called tools: {}]", text, names.join(", "))
            }
            Message::Assistant { text, .. } => format!("Assistant: {}", text),
            Message::ToolResult { name, text, .. } => format!("Tool {}: {}", name, text),
        }
    }
}

/// One structured verdict from the evaluator node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRecord {
    pub feedback: String,
    pub success_criteria_met: bool,
    pub user_input_needed: bool,
    /// Always within `[0, 1]`.
    pub confidence: f64,
    pub timestamp: DateTime<Utc>,
}

/// Per-thread agent state, serialised as-is by the session layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    #[serde(default)]
    pub messages: Vec<Message>,
    pub thread_id: String,
    #[serde(default)]
    pub success_criteria: String,
    #[serde(default)]
    pub criteria_met: bool,
    #[serde(default)]
    pub needs_user_input: bool,
    #[serde(default)]
    pub evaluation_history: Vec<EvaluationRecord>,
    #[serde(default)]
    pub task_metadata: BTreeMap<String, serde_json::Value>,
    /// Worker steps taken in the current run.
    #[serde(default)]
    pub iterations: u32,
}

impl ConversationState {
    pub fn new(thread_id: impl Into<String>, success_criteria: impl Into<String>) -> Self {
        Self {
            messages: Vec::new(),
            thread_id: thread_id.into(),
            success_criteria: success_criteria.into(),
            criteria_met: false,
            needs_user_input: false,
            evaluation_history: Vec::new(),
            task_metadata: BTreeMap::new(),
            iterations: 0,
        }
    }

    /// A state with a freshly minted thread id.
    pub fn fresh(success_criteria: impl Into<String>) -> Self {
        Self::new(uuid::Uuid::new_v4().to_string(), success_criteria)
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// `true` when the last assistant message asked for tools that never
    /// got a result.
    pub fn has_dangling_tool_calls(&self) -> bool {
        let Some(pos) = self
            .messages
            .iter()
            .rposition(|m| matches!(m, Message::Assistant { .. }))
        else {
            return false;
        };
        let calls = self.messages[pos].tool_calls();
        calls.iter().any(|call| {
            !self.messages[pos + 1..].iter().any(|m| {
                matches!(m, Message::ToolResult { call_id, .. } if *call_id == call.id)
            })
        })
    }

    /// The last non-evaluation assistant reply without tool calls.
    pub fn final_answer(&self) -> String {
        self.messages
            .iter()
            .rev()
            .find_map(|m| match m {
                Message::Assistant {
                    text,
                    tool_calls,
                    evaluation: false,
                } if tool_calls.is_empty() && !text.trim().is_empty() => Some(text.clone()),
                _ => None,
            })
            .unwrap_or_else(|| NO_RESPONSE.to_string())
    }

    /// The trailing `n` messages.
    pub fn tail(&self, n: usize) -> &[Message] {
        let start = self.messages.len().saturating_sub(n);
        &self.messages[start..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(id: &str, name: &str) -> ToolCallRequest {
        ToolCallRequest {
            id: id.to_string(),
            name: name.to_string(),
            arguments: serde_json::json!({}),
        }
    }

    #[test]
    fn serialises_with_type_tag() {
        let json = serde_json::to_value(Message::user("hi")).unwrap();
        assert_eq!(json, serde_json::json!({"type": "user", "text": "hi"}));

        let back: Message =
            serde_json::from_value(serde_json::json!({"type": "assistant", "text": "ok"})).unwrap();
        assert_eq!(back, Message::assistant("ok"));
    }

    #[test]
    fn final_answer_skips_evaluations_and_tool_requests() {
        let mut state = ConversationState::new("t", "Answer fully");
        assert_eq!(state.final_answer(), NO_RESPONSE);

        state.push(Message::user("q"));
        state.push(Message::assistant("the answer"));
        state.push(Message::Assistant {
            text: String::new(),
            tool_calls: vec![call("1", "search_documents")],
            evaluation: false,
        });
        state.push(Message::evaluation("Evaluation: good"));
        assert_eq!(state.final_answer(), "the answer");
    }

    #[test]
    fn dangling_tool_calls_detected() {
        let mut state = ConversationState::new("t", "");
        state.push(Message::user("q"));
        assert!(!state.has_dangling_tool_calls());

        state.push(Message::Assistant {
            text: String::new(),
            tool_calls: vec![call("a", "x"), call("b", "y")],
            evaluation: false,
        });
        assert!(state.has_dangling_tool_calls());

        state.push(Message::ToolResult {
            call_id: "a".to_string(),
            name: "x".to_string(),
            text: "ok".to_string(),
        });
        assert!(state.has_dangling_tool_calls());

        state.push(Message::ToolResult {
            call_id: "b".to_string(),
            name: "y".to_string(),
            text: "ok".to_string(),
        });
        assert!(!state.has_dangling_tool_calls());
    }

    #[test]
    fn tail_is_bounded() {
        let mut state = ConversationState::new("t", "");
        for i in 0..10 {
            state.push(Message::user(i.to_string()));
        }
        assert_eq!(state.tail(6).len(), 6);
        assert_eq!(state.tail(6)[0].text(), "4");
        assert_eq!(state.tail(50).len(), 10);
    }

    #[test]
    fn state_roundtrips_through_json() {
        let mut state = ConversationState::fresh("Answer fully");
        state.push(Message::user("hello"));
        state.evaluation_history.push(EvaluationRecord {
            feedback: "fine".to_string(),
            success_criteria_met: true,
            user_input_needed: false,
            confidence: 0.9,
            timestamp: Utc::now(),
        });
        let json = serde_json::to_string(&state).unwrap();
        let back: ConversationState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
    }
}
