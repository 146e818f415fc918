//! Test doubles shared by the integration tests.

#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use sidekick::config::Config;
use sidekick::embedding::{Embedder, HashingEmbedder};
use sidekick::llm::{AssistantTurn, ChatModel, ToolSpec};
use sidekick::messages::{Message, ToolCallRequest};
use sidekick::Sidekick;

/// Hashing embedder that counts how many texts it has embedded.
pub struct CountingEmbedder {
    inner: HashingEmbedder,
    pub calls: AtomicUsize,
}

impl CountingEmbedder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: HashingEmbedder::new(64),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Embedder for CountingEmbedder {
    fn model_name(&self) -> &str {
        "hash"
    }

    fn dims(&self) -> usize {
        self.inner.dims()
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(texts.len(), Ordering::SeqCst);
        self.inner.embed(texts).await
    }
}

/// Chat model that replays scripted worker turns and evaluator verdicts.
#[derive(Default)]
pub struct ScriptedChat {
    /// `None` entries make that call fail.
    turns: Mutex<VecDeque<Option<AssistantTurn>>>,
    verdicts: Mutex<VecDeque<Value>>,
    pub fail_worker: bool,
    pub seen: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedChat {
    pub fn new(turns: Vec<AssistantTurn>) -> Arc<Self> {
        Self::with_failures(turns.into_iter().map(Some).collect())
    }

    pub fn with_failures(turns: Vec<Option<AssistantTurn>>) -> Arc<Self> {
        Arc::new(Self {
            turns: Mutex::new(turns.into()),
            ..Self::default()
        })
    }

    pub fn evaluator(verdicts: Vec<Value>) -> Arc<Self> {
        Arc::new(Self {
            verdicts: Mutex::new(verdicts.into()),
            ..Self::default()
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail_worker: true,
            ..Self::default()
        })
    }
}

#[async_trait]
impl ChatModel for ScriptedChat {
    async fn complete(
        &self,
        _system: &str,
        messages: &[Message],
        _tools: &[ToolSpec],
    ) -> Result<AssistantTurn> {
        if self.fail_worker {
            anyhow::bail!("model unavailable");
        }
        self.seen.lock().unwrap().push(messages.to_vec());
        let next = self.turns.lock().unwrap().pop_front();
        match next {
            Some(Some(turn)) => Ok(turn),
            Some(None) => anyhow::bail!("model unavailable"),
            None => Ok(AssistantTurn::text("no more script")),
        }
    }

    async fn complete_structured(
        &self,
        _system: &str,
        _messages: &[Message],
        _schema: &Value,
    ) -> Result<Value> {
        Ok(self.verdicts.lock().unwrap().pop_front().unwrap_or_else(met))
    }
}

pub fn met() -> Value {
    json!({
        "feedback": "The answer is complete.",
        "success_criteria_met": true,
        "user_input_needed": false,
        "confidence": 0.9
    })
}

pub fn tool_call(id: &str, name: &str, arguments: Value) -> AssistantTurn {
    AssistantTurn {
        content: String::new(),
        tool_calls: vec![ToolCallRequest {
            id: id.to_string(),
            name: name.to_string(),
            arguments,
        }],
    }
}

/// Config rooted in `root`, with no delays on release or delete retries.
pub fn test_config(root: &Path) -> Config {
    let mut config = Config::default();
    config.storage.vectorstore_root = root.join("vector_db");
    config.embedding.provider = "hash".to_string();
    config.embedding.dims = Some(64);
    config.delete.release_delay_ms = 0;
    config.delete.delay_ms = 10;
    config.tools.sandbox_dir = root.join("sandbox");
    config
}

pub async fn open(config: Config, embedder: Arc<CountingEmbedder>) -> Sidekick {
    Sidekick::open(
        config,
        embedder,
        ScriptedChat::new(vec![]),
        ScriptedChat::evaluator(vec![]),
    )
    .await
    .unwrap()
}

pub fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}
