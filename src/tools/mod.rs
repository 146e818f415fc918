//! Agent tools.
//!
//! Every [`Tool`] belongs to exactly one [`ToolGroup`]; callers enable or
//! disable whole groups per run through [`ToolRegistry::select`].
//!
//! | Group | Tools |
//! |-------|-------|
//! | `rag` | `search_documents` |
//! | `files` | `read_file`, `write_file`, `list_directory`, `delete_file`, `copy_file`, `move_file`, `file_search` |
//! | `web_search` | `web_search` |
//! | `python` | `python_repl` |
//! | `wikipedia` | `wikipedia` |

pub mod files;
pub mod python;
pub mod retrieval;
pub mod web;
pub mod wikipedia;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::config::ToolsConfig;
use crate::llm::ToolSpec;
use crate::retrieval::RetrievalService;

/// Capability tag used to enable or disable tools in bulk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolGroup {
    Rag,
    Files,
    WebSearch,
    Python,
    Wikipedia,
}

impl ToolGroup {
    pub const ALL: [ToolGroup; 5] = [
        ToolGroup::Rag,
        ToolGroup::Files,
        ToolGroup::WebSearch,
        ToolGroup::Python,
        ToolGroup::Wikipedia,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ToolGroup::Rag => "rag",
            ToolGroup::Files => "files",
            ToolGroup::WebSearch => "web_search",
            ToolGroup::Python => "python",
            ToolGroup::Wikipedia => "wikipedia",
        }
    }
}

impl fmt::Display for ToolGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ToolGroup {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match ToolGroup::ALL.iter().find(|g| g.as_str() == s) {
            Some(g) => Ok(*g),
            None => bail!(
                "unknown tool group '{}'; expected one of rag, files, web_search, python, wikipedia",
                s
            ),
        }
    }
}

/// A callable capability exposed to the worker model.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Function name the model calls, e.g. `"search_documents"`.
    fn name(&self) -> &str;

    /// One-line description the model uses to decide whether to call it.
    fn description(&self) -> &str;

    fn group(&self) -> ToolGroup;

    /// JSON Schema (`type: "object"`) of the arguments.
    fn parameters_schema(&self) -> Value;

    /// Run the tool. The returned text becomes the tool-result message.
    async fn execute(&self, params: Value) -> Result<String>;

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// Ordered set of tools available to a run.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every built-in tool, wired to `retrieval` and the sandbox settings.
    pub fn with_builtins(retrieval: Arc<RetrievalService>, config: &ToolsConfig) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(retrieval::SearchDocumentsTool::new(retrieval)));
        for tool in files::file_tools(&config.sandbox_dir) {
            registry.register(tool);
        }
        registry.register(Arc::new(web::WebSearchTool::new(config.web_search_results)));
        registry.register(Arc::new(python::PythonReplTool::new(
            &config.python_bin,
            config.python_timeout_secs,
        )));
        registry.register(Arc::new(wikipedia::WikipediaTool::new(
            &config.wikipedia_lang,
            config.wikipedia_top_k,
            config.wikipedia_max_chars,
        )));
        registry
    }

    /// Add a tool. A later tool with the same name shadows an earlier one.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.retain(|t| t.name() != tool.name());
        self.tools.push(tool);
    }

    pub fn tools(&self) -> &[Arc<dyn Tool>] {
        &self.tools
    }

    pub fn find(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.name() == name)
    }

    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools.iter().map(|t| t.spec()).collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.name().to_string()).collect()
    }

    /// The tools whose group tag or name appears in `enabled`.
    ///
    /// `None` keeps every tool; an empty list keeps none.
    pub fn select(&self, enabled: Option<&[String]>) -> ToolRegistry {
        let Some(enabled) = enabled else {
            return self.clone();
        };
        ToolRegistry {
            tools: self
                .tools
                .iter()
                .filter(|t| {
                    enabled
                        .iter()
                        .any(|e| e == t.group().as_str() || e == t.name())
                })
                .cloned()
                .collect(),
        }
    }

    /// Whether any tool in `group` is present.
    pub fn has_group(&self, group: ToolGroup) -> bool {
        self.tools.iter().any(|t| t.group() == group)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// Pull a required string argument out of a tool's parameters.
pub(crate) fn required_str<'a>(params: &'a Value, key: &str) -> Result<&'a str> {
    match params.get(key).and_then(|v| v.as_str()) {
        Some(s) => Ok(s),
        None => bail!("missing required string parameter '{}'", key),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ToolRegistry {
        let tmp = std::env::temp_dir().join("sidekick-tools-test");
        let config = ToolsConfig {
            sandbox_dir: tmp,
            ..ToolsConfig::default()
        };
        ToolRegistry::with_builtins(Arc::new(RetrievalService::new(5, 500)), &config)
    }

    #[test]
    fn builtins_cover_every_group() {
        let reg = registry();
        for group in ToolGroup::ALL {
            assert!(
                reg.tools().iter().any(|t| t.group() == group),
                "no tool in group {}",
                group
            );
        }
        assert!(reg.find("search_documents").is_some());
        assert!(reg.find("python_repl").is_some());
    }

    #[test]
    fn select_by_group_or_name() {
        let reg = registry();
        assert_eq!(reg.select(None).len(), reg.len());
        assert!(reg.select(Some(&[])).is_empty());

        let rag = reg.select(Some(&["rag".to_string()]));
        assert_eq!(rag.names(), vec!["search_documents"]);

        let mixed = reg.select(Some(&["wikipedia".to_string(), "read_file".to_string()]));
        assert_eq!(mixed.names(), vec!["read_file", "wikipedia"]);

        let by_name = reg.select(Some(&["search_documents".to_string()]));
        assert!(by_name.has_group(ToolGroup::Rag));
        assert!(!mixed.has_group(ToolGroup::Rag));
    }

    #[test]
    fn group_parsing() {
        assert_eq!("web_search".parse::<ToolGroup>().unwrap(), ToolGroup::WebSearch);
        assert!("email".parse::<ToolGroup>().is_err());
        assert_eq!(ToolGroup::Python.to_string(), "python");
    }

    #[test]
    fn specs_are_object_schemas() {
        for spec in registry().specs() {
            assert_eq!(spec.parameters["type"], "object", "{}", spec.name);
        }
    }
}
