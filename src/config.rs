//! TOML configuration.
//!
//! Every section carries serde defaults, so an empty file (or
//! [`Config::default`]) yields a working setup with the OpenAI providers.
//! [`load_config`] reads the file, applies the `VECTORSTORE_ROOT`
//! environment override and validates the numeric limits.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable that overrides `storage.vectorstore_root`.
pub const VECTORSTORE_ROOT_ENV: &str = "VECTORSTORE_ROOT";

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub chunking: ChunkingConfig,
    pub loading: LoadingConfig,
    pub retrieval: RetrievalConfig,
    pub embedding: EmbeddingConfig,
    pub llm: LlmConfig,
    pub agent: AgentConfig,
    pub tools: ToolsConfig,
    pub delete: DeleteConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub vectorstore_root: PathBuf,
    pub manifest_file: String,
    pub sessions_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            vectorstore_root: PathBuf::from("vector_db"),
            manifest_file: "index_manifest.json".to_string(),
            sessions_dir: "sessions".to_string(),
        }
    }
}

impl StorageConfig {
    pub fn manifest_path(&self) -> PathBuf {
        self.vectorstore_root.join(&self.manifest_file)
    }

    pub fn sessions_path(&self) -> PathBuf {
        self.vectorstore_root.join(&self.sessions_dir)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Maximum chunk length in characters.
    pub chunk_size: usize,
    /// Characters shared between neighbouring chunks.
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 600,
            chunk_overlap: 20,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoadingConfig {
    /// Directory names skipped anywhere in a path.
    pub excluded_dirs: Vec<String>,
    /// Extra glob patterns, matched against paths relative to the indexed root.
    pub exclude_globs: Vec<String>,
    pub recursive: bool,
}

impl Default for LoadingConfig {
    fn default() -> Self {
        Self {
            excluded_dirs: default_excluded_dirs(),
            exclude_globs: Vec::new(),
            recursive: true,
        }
    }
}

pub fn default_excluded_dirs() -> Vec<String> {
    vec![
        ".venv".to_string(),
        "venv".to_string(),
        "__pycache__".to_string(),
    ]
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetrievalConfig {
    /// `k` each retriever is built with.
    pub search_k: usize,
    /// Result count used when a search does not ask for one.
    pub default_k: usize,
    /// Characters of each chunk shown in formatted search output.
    pub snippet_chars: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            search_k: 15,
            default_k: 5,
            snippet_chars: 500,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: String,
    pub model: Option<String>,
    pub dims: Option<usize>,
    pub url: Option<String>,
    pub batch_size: usize,
    pub max_retries: u32,
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: Some("text-embedding-3-small".to_string()),
            dims: Some(1536),
            url: None,
            batch_size: 64,
            max_retries: 5,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: String,
    pub model: String,
    /// Model for the evaluator node; falls back to `model`.
    pub evaluator_model: Option<String>,
    pub base_url: String,
    pub temperature: f32,
    pub max_retries: u32,
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            evaluator_model: None,
            base_url: "https://api.openai.com/v1".to_string(),
            temperature: 0.0,
            max_retries: 3,
            timeout_secs: 120,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AgentConfig {
    /// Worker steps allowed per run.
    pub max_iterations: u32,
    /// Tool executions allowed per run.
    pub max_tool_calls_per_turn: usize,
    /// Trailing messages shown to the evaluator.
    pub evaluator_window: usize,
    /// Trailing session messages passed into a run by the chat service.
    pub history_window: usize,
    pub use_evaluator: bool,
    pub success_criteria: String,
    pub tool_timeout_secs: u64,
    /// Index a requested folder on the fly when it has no retriever yet.
    pub auto_index: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            max_tool_calls_per_turn: 3,
            evaluator_window: 6,
            history_window: 12,
            use_evaluator: true,
            success_criteria: "Answer fully".to_string(),
            tool_timeout_secs: 60,
            auto_index: false,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ToolsConfig {
    pub sandbox_dir: PathBuf,
    pub python_bin: String,
    pub python_timeout_secs: u64,
    pub wikipedia_lang: String,
    pub wikipedia_top_k: usize,
    pub wikipedia_max_chars: usize,
    pub web_search_results: usize,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            sandbox_dir: PathBuf::from("sandbox"),
            python_bin: "python3".to_string(),
            python_timeout_secs: 30,
            wikipedia_lang: "en".to_string(),
            wikipedia_top_k: 3,
            wikipedia_max_chars: 4000,
            web_search_results: 5,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DeleteConfig {
    pub max_attempts: u32,
    pub delay_ms: u64,
    /// Pause between releasing a store handle and deleting its directory.
    pub release_delay_ms: u64,
    /// `"manual"` walks the tree file by file after the retries; `"none"` gives up.
    pub fallback: String,
}

impl Default for DeleteConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay_ms: 350,
            release_delay_ms: 350,
            fallback: "manual".to_string(),
        }
    }
}

impl DeleteConfig {
    pub fn release_delay(&self) -> Duration {
        Duration::from_millis(self.release_delay_ms)
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config: Config =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    apply_env_overrides(&mut config);
    validate(&config)?;

    Ok(config)
}

/// Apply environment overrides on top of a parsed (or default) config.
pub fn apply_env_overrides(config: &mut Config) {
    if let Ok(root) = std::env::var(VECTORSTORE_ROOT_ENV) {
        if !root.trim().is_empty() {
            config.storage.vectorstore_root = PathBuf::from(root);
        }
    }
}

pub fn validate(config: &Config) -> Result<()> {
    if config.chunking.chunk_size == 0 {
        anyhow::bail!("chunking.chunk_size must be > 0");
    }
    if config.chunking.chunk_overlap >= config.chunking.chunk_size {
        anyhow::bail!("chunking.chunk_overlap must be smaller than chunking.chunk_size");
    }

    if config.retrieval.search_k == 0 || config.retrieval.default_k == 0 {
        anyhow::bail!("retrieval.search_k and retrieval.default_k must be >= 1");
    }
    if config.retrieval.snippet_chars == 0 {
        anyhow::bail!("retrieval.snippet_chars must be >= 1");
    }

    match config.embedding.provider.as_str() {
        "openai" | "ollama" | "local" | "hash" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be openai, ollama, local, or hash.",
            other
        ),
    }
    if config.embedding.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be >= 1");
    }

    if config.llm.provider != "openai" {
        anyhow::bail!(
            "Unknown llm provider: '{}'. Only openai-compatible endpoints are supported.",
            config.llm.provider
        );
    }

    if config.agent.max_iterations == 0 {
        anyhow::bail!("agent.max_iterations must be >= 1");
    }
    if config.agent.evaluator_window == 0 || config.agent.history_window == 0 {
        anyhow::bail!("agent.evaluator_window and agent.history_window must be >= 1");
    }

    if config.delete.max_attempts == 0 {
        anyhow::bail!("delete.max_attempts must be >= 1");
    }
    match config.delete.fallback.as_str() {
        "manual" | "none" => {}
        other => anyhow::bail!("delete.fallback must be manual or none, got '{}'", other),
    }

    Ok(())
}
