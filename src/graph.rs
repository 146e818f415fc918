//! Worker → tools → evaluator state machine.
//!
//! ```text
//!            ┌──────────── tools ◄──────┐
//!            ▼                          │ tool calls
//! start ─► worker ──────────────────────┤
//!            ▲                          │ no tool calls
//!            │ not done                 ▼
//!            └────────────────────── evaluator ──► end
//!                                       (criteria met or user input needed)
//! ```
//!
//! Without an evaluator the worker's first tool-free reply ends the run.
//! Every run is bounded: at most `max_iterations` worker steps and
//! `max_tool_calls_per_turn` tool executions. The state is checkpointed
//! after every node.

use anyhow::{Context, Result};
use chrono::{Local, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::checkpoint::{Checkpointer, MemoryCheckpointer, ThreadGuards};
use crate::config::AgentConfig;
use crate::llm::ChatModel;
use crate::messages::{ConversationState, EvaluationRecord, Message, ToolCallRequest};
use crate::tools::{ToolGroup, ToolRegistry};

/// Prefix of the internal evaluation message appended by the evaluator.
pub const EVALUATION_PREFIX: &str = "💭 Evaluation: ";

const EVALUATOR_SYSTEM: &str = "You are an objective evaluator.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Node {
    Worker,
    Tools,
    Evaluator,
    End,
}

#[derive(Debug, Deserialize)]
struct EvaluatorOutput {
    feedback: String,
    success_criteria_met: bool,
    user_input_needed: bool,
    #[serde(default)]
    confidence: f64,
}

/// A compiled agent graph: models, tools, limits and checkpoint memory.
pub struct AgentGraph {
    worker: Arc<dyn ChatModel>,
    evaluator: Option<Arc<dyn ChatModel>>,
    tools: ToolRegistry,
    config: AgentConfig,
    checkpointer: Arc<dyn Checkpointer>,
    guards: Arc<ThreadGuards>,
}

impl AgentGraph {
    /// A worker-only graph with no tools and in-memory checkpoints.
    pub fn new(worker: Arc<dyn ChatModel>, config: AgentConfig) -> Self {
        Self {
            worker,
            evaluator: None,
            tools: ToolRegistry::new(),
            config,
            checkpointer: Arc::new(MemoryCheckpointer::new()),
            guards: Arc::new(ThreadGuards::new()),
        }
    }

    pub fn with_evaluator(mut self, evaluator: Arc<dyn ChatModel>) -> Self {
        self.evaluator = Some(evaluator);
        self
    }

    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_checkpointer(mut self, checkpointer: Arc<dyn Checkpointer>) -> Self {
        self.checkpointer = checkpointer;
        self
    }

    pub fn with_guards(mut self, guards: Arc<ThreadGuards>) -> Self {
        self.guards = guards;
        self
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Run the graph from `worker` to `end` on `input`'s thread.
    ///
    /// If the thread has a checkpoint, `input.messages` are appended to it.
    /// A checkpoint left with unanswered tool calls is discarded instead.
    pub async fn invoke(&self, input: ConversationState) -> Result<ConversationState> {
        let _guard = self.guards.acquire(&input.thread_id).await;
        let mut state = self.resume(input).await?;
        state.criteria_met = false;
        state.needs_user_input = false;
        state.iterations = 0;

        let mut tool_calls_used = 0usize;
        let mut node = Node::Worker;
        while node != Node::End {
            debug!(thread = %state.thread_id, ?node, "graph step");
            node = match node {
                Node::Worker => {
                    if state.iterations >= self.config.max_iterations {
                        warn!(
                            thread = %state.thread_id,
                            max = self.config.max_iterations,
                            "iteration limit reached, stopping run"
                        );
                        state
                            .task_metadata
                            .insert("stop_reason".to_string(), json!("max_iterations"));
                        Node::End
                    } else {
                        self.worker_step(&mut state, tool_calls_used).await?;
                        self.route_after_worker(&state)
                    }
                }
                Node::Tools => {
                    tool_calls_used += self.tools_step(&mut state, tool_calls_used).await;
                    Node::Worker
                }
                Node::Evaluator => {
                    self.evaluator_step(&mut state).await?;
                    if state.criteria_met || state.needs_user_input {
                        Node::End
                    } else {
                        Node::Worker
                    }
                }
                Node::End => Node::End,
            };
            self.checkpointer
                .save(&state)
                .await
                .context("failed to save checkpoint")?;
        }

        info!(
            thread = %state.thread_id,
            iterations = state.iterations,
            tool_calls = tool_calls_used,
            criteria_met = state.criteria_met,
            "run finished"
        );
        Ok(state)
    }

    async fn resume(&self, input: ConversationState) -> Result<ConversationState> {
        match self.checkpointer.load(&input.thread_id).await? {
            Some(saved) if saved.has_dangling_tool_calls() => {
                warn!(
                    thread = %input.thread_id,
                    "discarding checkpoint with unanswered tool calls"
                );
                self.checkpointer.delete(&input.thread_id).await?;
                Ok(input)
            }
            Some(mut saved) => {
                saved.messages.extend(input.messages);
                saved.success_criteria = input.success_criteria;
                saved.task_metadata.extend(input.task_metadata);
                Ok(saved)
            }
            None => Ok(input),
        }
    }

    fn route_after_worker(&self, state: &ConversationState) -> Node {
        let has_calls = state
            .last()
            .map(|m| !m.tool_calls().is_empty())
            .unwrap_or(false);
        if has_calls {
            Node::Tools
        } else if self.config.use_evaluator && self.evaluator.is_some() {
            Node::Evaluator
        } else {
            Node::End
        }
    }

    async fn worker_step(&self, state: &mut ConversationState, tool_calls_used: usize) -> Result<()> {
        let specs = if tool_calls_used < self.config.max_tool_calls_per_turn {
            self.tools.specs()
        } else {
            Vec::new()
        };
        let system = worker_system_prompt(
            &state.success_criteria,
            &self.disabled_groups(),
            self.config.max_tool_calls_per_turn,
        );

        let turn = self
            .worker
            .complete(&system, &state.messages, &specs)
            .await
            .context("worker completion failed")?;
        state.iterations += 1;
        state.push(turn.into_message());
        Ok(())
    }

    /// Execute the last assistant message's tool calls in order. Returns how
    /// many were actually executed.
    async fn tools_step(&self, state: &mut ConversationState, already_used: usize) -> usize {
        let calls: Vec<ToolCallRequest> = state
            .last()
            .map(|m| m.tool_calls().to_vec())
            .unwrap_or_default();

        let mut executed = 0;
        for call in calls {
            let text = if already_used + executed >= self.config.max_tool_calls_per_turn {
                format!(
                    "Tool call limit reached for this turn ({}). Answer with the information you already have.",
                    self.config.max_tool_calls_per_turn
                )
            } else {
                executed += 1;
                self.dispatch(&call).await
            };
            state.push(Message::ToolResult {
                call_id: call.id,
                name: call.name,
                text,
            });
        }
        executed
    }

    /// Run one tool call. Failures become the result text.
    async fn dispatch(&self, call: &ToolCallRequest) -> String {
        let Some(tool) = self.tools.find(&call.name) else {
            warn!(tool = %call.name, "model requested an unknown tool");
            return format!("Error: no tool named '{}' is available", call.name);
        };

        let timeout = Duration::from_secs(self.config.tool_timeout_secs.max(1));
        match tokio::time::timeout(timeout, tool.execute(call.arguments.clone())).await {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => {
                warn!(tool = %call.name, error = %e, "tool failed");
                format!("Error: {} failed: {:#}", call.name, e)
            }
            Err(_) => {
                warn!(tool = %call.name, ?timeout, "tool timed out");
                format!("Error: {} timed out after {}s", call.name, timeout.as_secs())
            }
        }
    }

    async fn evaluator_step(&self, state: &mut ConversationState) -> Result<()> {
        let Some(evaluator) = &self.evaluator else {
            state.criteria_met = true;
            return Ok(());
        };

        let conversation = state
            .tail(self.config.evaluator_window)
            .iter()
            .map(|m| m.transcript_line())
            .collect::<Vec<_>>()
            .join("\n");
        let last_response = state.last().map(|m| m.text().to_string()).unwrap_or_default();
        let prompt = format!(
            "Evaluate the conversation:\n{}\n Last response:\n{}\nCriteria: {}",
            conversation, last_response, state.success_criteria
        );

        let raw = evaluator
            .complete_structured(EVALUATOR_SYSTEM, &[Message::user(prompt)], &evaluation_schema())
            .await
            .context("evaluator completion failed")?;
        let verdict: EvaluatorOutput =
            serde_json::from_value(raw).context("evaluator returned an unexpected shape")?;

        debug!(
            thread = %state.thread_id,
            met = verdict.success_criteria_met,
            input_needed = verdict.user_input_needed,
            "evaluation"
        );
        state.criteria_met = verdict.success_criteria_met;
        state.needs_user_input = verdict.user_input_needed;
        state.push(Message::evaluation(format!(
            "{}{}",
            EVALUATION_PREFIX, verdict.feedback
        )));
        state.evaluation_history.push(EvaluationRecord {
            feedback: verdict.feedback,
            success_criteria_met: verdict.success_criteria_met,
            user_input_needed: verdict.user_input_needed,
            confidence: verdict.confidence.clamp(0.0, 1.0),
            timestamp: Utc::now(),
        });
        Ok(())
    }

    fn disabled_groups(&self) -> Vec<ToolGroup> {
        ToolGroup::ALL
            .into_iter()
            .filter(|g| !self.tools.tools().iter().any(|t| t.group() == *g))
            .collect()
    }
}

fn worker_system_prompt(success_criteria: &str, disabled: &[ToolGroup], max_tool_calls: usize) -> String {
    let criteria = if success_criteria.trim().is_empty() {
        "Provide a clear, correct answer."
    } else {
        success_criteria
    };
    let disabled_note = if disabled.is_empty() {
        String::new()
    } else {
        let names: Vec<&str> = disabled.iter().map(|g| g.as_str()).collect();
        format!("- Disabled tool groups for this run: {}.\n", names.join(", "))
    };

    format!(
        "You are a helpful assistant with access to several external tools.\n\
         Some tools may be *disabled* depending on user settings. Always use tools only when \
         they are clearly helpful and necessary.\n\n\
         NOTES:\n\
         - If a tool is disabled for this run, do not attempt to call it.\n\
         {}\
         - Use tools sparingly and only when needed to answer the user's question.\n\
         - When using the Python tool, always use print() to show results. Bare expressions will not display values.\n\
         - Whenever you write mathematical expressions in LaTeX, you MUST always use block delimiters with double dollar signs $$ ... $$.\n\
         - In each turn use a tool a maximum of {} times, if you cannot complete the tasks say so and explain what happened.\n\n\
         Success criteria: {}\n\
         Current time: {}\n",
        disabled_note,
        max_tool_calls,
        criteria,
        Local::now().format("%Y-%m-%d %H:%M")
    )
}

fn evaluation_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "feedback": {"type": "string", "description": "Feedback on the assistant's response"},
            "success_criteria_met": {"type": "boolean", "description": "Whether the success criteria have been met"},
            "user_input_needed": {"type": "boolean", "description": "True if more input is needed from the user, or clarifications, or the assistant is stuck"},
            "confidence": {"type": "number", "description": "Confidence in this evaluation, from 0 to 1"}
        },
        "required": ["feedback", "success_criteria_met", "user_input_needed", "confidence"],
        "additionalProperties": false
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{AssistantTurn, ToolSpec};
    use crate::tools::Tool;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Scripted {
        turns: Mutex<VecDeque<AssistantTurn>>,
        verdicts: Mutex<VecDeque<Value>>,
        offered_tools: Mutex<Vec<usize>>,
    }

    impl Scripted {
        fn new(turns: Vec<AssistantTurn>, verdicts: Vec<Value>) -> Arc<Self> {
            Arc::new(Self {
                turns: Mutex::new(turns.into()),
                verdicts: Mutex::new(verdicts.into()),
                offered_tools: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ChatModel for Scripted {
        async fn complete(
            &self,
            _system: &str,
            _messages: &[Message],
            tools: &[ToolSpec],
        ) -> Result<AssistantTurn> {
            self.offered_tools.lock().unwrap().push(tools.len());
            Ok(self
                .turns
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| AssistantTurn::text("out of script")))
        }

        async fn complete_structured(
            &self,
            _system: &str,
            _messages: &[Message],
            _schema: &Value,
        ) -> Result<Value> {
            Ok(self.verdicts.lock().unwrap().pop_front().unwrap_or_else(
                || json!({"feedback": "ok", "success_criteria_met": true, "user_input_needed": false, "confidence": 1.0}),
            ))
        }
    }

    struct Echo;

    #[async_trait]
    impl Tool for Echo {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "echo"
        }
        fn group(&self) -> ToolGroup {
            ToolGroup::Files
        }
        fn parameters_schema(&self) -> Value {
            json!({"type": "object"})
        }
        async fn execute(&self, params: Value) -> Result<String> {
            match params.get("fail") {
                Some(_) => anyhow::bail!("boom"),
                None => Ok(format!("echo:{}", params["v"])),
            }
        }
    }

    fn call(id: &str, v: i64) -> ToolCallRequest {
        ToolCallRequest {
            id: id.to_string(),
            name: "echo".to_string(),
            arguments: json!({"v": v}),
        }
    }

    fn with_calls(calls: Vec<ToolCallRequest>) -> AssistantTurn {
        AssistantTurn {
            content: String::new(),
            tool_calls: calls,
        }
    }

    fn tools() -> ToolRegistry {
        let mut reg = ToolRegistry::new();
        reg.register(Arc::new(Echo));
        reg
    }

    fn start(text: &str) -> ConversationState {
        let mut state = ConversationState::new("t", "Answer fully");
        state.push(Message::user(text));
        state
    }

    #[tokio::test]
    async fn terminates_after_one_cycle_when_criteria_met() {
        let worker = Scripted::new(vec![AssistantTurn::text("Blue.")], vec![]);
        let evaluator = Scripted::new(vec![], vec![]);
        let graph = AgentGraph::new(worker.clone(), AgentConfig::default()).with_evaluator(evaluator);

        let state = graph.invoke(start("sky?")).await.unwrap();
        assert_eq!(state.iterations, 1);
        assert!(state.criteria_met);
        assert_eq!(state.evaluation_history.len(), 1);
        assert_eq!(state.final_answer(), "Blue.");
        assert!(state.last().unwrap().is_evaluation());
        assert!(state.last().unwrap().text().starts_with(EVALUATION_PREFIX));
    }

    #[tokio::test]
    async fn tool_results_follow_request_order() {
        let worker = Scripted::new(
            vec![with_calls(vec![call("a", 1), call("b", 2)]), AssistantTurn::text("done")],
            vec![],
        );
        let graph = AgentGraph::new(worker, AgentConfig::default()).with_tools(tools());

        let state = graph.invoke(start("go")).await.unwrap();
        let results: Vec<(&str, &str)> = state
            .messages
            .iter()
            .filter_map(|m| match m {
                Message::ToolResult { call_id, text, .. } => Some((call_id.as_str(), text.as_str())),
                _ => None,
            })
            .collect();
        assert_eq!(results, vec![("a", "echo:1"), ("b", "echo:2")]);
        // user, assistant(calls), result a, result b, assistant(done)
        assert_eq!(state.messages.len(), 5);
        assert_eq!(state.final_answer(), "done");
    }

    #[tokio::test]
    async fn failing_tool_becomes_result_text() {
        let mut failing = call("x", 0);
        failing.arguments = json!({"fail": true});
        let worker = Scripted::new(vec![with_calls(vec![failing, call("y", 3)]), AssistantTurn::text("ok")], vec![]);
        let graph = AgentGraph::new(worker, AgentConfig::default()).with_tools(tools());

        let state = graph.invoke(start("go")).await.unwrap();
        assert!(state.messages[2].text().contains("boom"));
        assert_eq!(state.messages[3].text(), "echo:3");
    }

    #[tokio::test]
    async fn unknown_tool_is_reported() {
        let mut missing = call("m", 0);
        missing.name = "nope".to_string();
        let worker = Scripted::new(vec![with_calls(vec![missing]), AssistantTurn::text("ok")], vec![]);
        let graph = AgentGraph::new(worker, AgentConfig::default()).with_tools(tools());

        let state = graph.invoke(start("go")).await.unwrap();
        assert!(state.messages[2].text().contains("no tool named 'nope'"));
    }

    #[tokio::test]
    async fn tool_call_limit_is_enforced() {
        let worker = Scripted::new(
            vec![
                with_calls(vec![call("1", 1), call("2", 2), call("3", 3), call("4", 4)]),
                AssistantTurn::text("partial"),
            ],
            vec![],
        );
        let config = AgentConfig {
            max_tool_calls_per_turn: 3,
            ..AgentConfig::default()
        };
        let graph = AgentGraph::new(worker.clone(), config).with_tools(tools());

        let state = graph.invoke(start("go")).await.unwrap();
        assert!(state.messages[5].text().contains("limit reached"));
        // Second worker call is offered no tools.
        assert_eq!(*worker.offered_tools.lock().unwrap(), vec![1, 0]);
    }

    #[tokio::test]
    async fn iteration_limit_stops_a_stubborn_evaluator() {
        let worker = Scripted::new(
            vec![AssistantTurn::text("a"), AssistantTurn::text("b"), AssistantTurn::text("c")],
            vec![],
        );
        let never = json!({"feedback": "no", "success_criteria_met": false, "user_input_needed": false, "confidence": 0.2});
        let evaluator = Scripted::new(vec![], vec![never.clone(), never.clone(), never]);
        let config = AgentConfig {
            max_iterations: 2,
            ..AgentConfig::default()
        };
        let graph = AgentGraph::new(worker, config).with_evaluator(evaluator);

        let state = graph.invoke(start("go")).await.unwrap();
        assert_eq!(state.iterations, 2);
        assert!(!state.criteria_met);
        assert_eq!(state.evaluation_history.len(), 2);
        assert_eq!(state.task_metadata["stop_reason"], "max_iterations");
        assert_eq!(state.final_answer(), "b");
    }

    #[tokio::test]
    async fn user_input_needed_ends_the_run() {
        let worker = Scripted::new(vec![AssistantTurn::text("Which folder?")], vec![]);
        let evaluator = Scripted::new(
            vec![],
            vec![json!({"feedback": "ask", "success_criteria_met": false, "user_input_needed": true, "confidence": 3.0})],
        );
        let graph = AgentGraph::new(worker, AgentConfig::default()).with_evaluator(evaluator);

        let state = graph.invoke(start("summarise")).await.unwrap();
        assert!(state.needs_user_input);
        assert_eq!(state.evaluation_history[0].confidence, 1.0);
    }

    #[tokio::test]
    async fn resumes_from_checkpoint_and_discards_dangling_calls() {
        let checkpointer = Arc::new(MemoryCheckpointer::new());
        let worker = Scripted::new(vec![AssistantTurn::text("first"), AssistantTurn::text("second")], vec![]);
        let graph = AgentGraph::new(worker, AgentConfig::default())
            .with_checkpointer(checkpointer.clone());

        graph.invoke(start("one")).await.unwrap();
        let state = graph.invoke(start("two")).await.unwrap();
        assert_eq!(state.messages.len(), 4);

        let mut dangling = ConversationState::new("t", "Answer fully");
        dangling.push(Message::user("old"));
        dangling.push(with_calls(vec![call("z", 0)]).into_message());
        checkpointer.save(&dangling).await.unwrap();

        let worker = Scripted::new(vec![AssistantTurn::text("fresh")], vec![]);
        let graph = AgentGraph::new(worker, AgentConfig::default()).with_checkpointer(checkpointer);
        let state = graph.invoke(start("three")).await.unwrap();
        assert_eq!(state.messages.len(), 2);
        assert_eq!(state.final_answer(), "fresh");
    }

    #[test]
    fn prompt_mentions_disabled_groups_and_criteria() {
        let prompt = worker_system_prompt("Answer fully", &[ToolGroup::Python], 3);
        assert!(prompt.contains("Disabled tool groups for this run: python."));
        assert!(prompt.contains("Success criteria: Answer fully"));
        assert!(prompt.contains("a maximum of 3 times"));
    }
}
