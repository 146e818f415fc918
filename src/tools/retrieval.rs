//! `search_documents`: semantic search over the user's indexed folders.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

use super::{required_str, Tool, ToolGroup};
use crate::paths::IndexKey;
use crate::retrieval::RetrievalService;

pub struct SearchDocumentsTool {
    retrieval: Arc<RetrievalService>,
    /// When set, only this index is searched, even if it is not registered.
    scope: Option<IndexKey>,
}

impl SearchDocumentsTool {
    /// Searches the current index, else the first registered one.
    pub fn new(retrieval: Arc<RetrievalService>) -> Self {
        Self {
            retrieval,
            scope: None,
        }
    }

    /// Searches only `key`'s index.
    pub fn scoped(retrieval: Arc<RetrievalService>, key: IndexKey) -> Self {
        Self {
            retrieval,
            scope: Some(key),
        }
    }
}

#[async_trait]
impl Tool for SearchDocumentsTool {
    fn name(&self) -> &str {
        "search_documents"
    }

    fn description(&self) -> &str {
        "Search the user's indexed documents and return the most relevant text chunks \
         with their file names. Call this before answering anything that depends on the \
         content of the user's files; do not guess."
    }

    fn group(&self) -> ToolGroup {
        ToolGroup::Rag
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Natural-language question or text to search for"
                },
                "k": {
                    "type": "integer",
                    "description": "Number of chunks to return; 0 uses the default",
                    "minimum": 0
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, params: Value) -> Result<String> {
        let query = required_str(&params, "query")?;
        let k = params
            .get("k")
            .and_then(|v| v.as_u64())
            .map(|k| k as usize)
            .filter(|k| *k > 0);
        Ok(self.retrieval.search(query, k, self.scope.as_ref()).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::SEARCH_ERROR_MARKER;

    #[tokio::test]
    async fn empty_registry_returns_guidance() {
        let tool = SearchDocumentsTool::new(Arc::new(RetrievalService::new(5, 500)));
        let out = tool.execute(json!({"query": "sky", "k": 0})).await.unwrap();
        assert!(out.starts_with(SEARCH_ERROR_MARKER));
        assert!(out.contains("Index a folder first"));
    }

    #[tokio::test]
    async fn scoped_search_never_falls_back() {
        use crate::models::{DocumentMetadata, RetrievedChunk};
        use crate::retrieval::Retriever;

        struct Fixed;

        #[async_trait]
        impl Retriever for Fixed {
            async fn retrieve(&self, _query: &str) -> Result<Vec<RetrievedChunk>> {
                Ok(vec![RetrievedChunk {
                    text: "The sky is blue.".to_string(),
                    metadata: DocumentMetadata {
                        file_name: "secret.txt".to_string(),
                        ..DocumentMetadata::default()
                    },
                    score: 1.0,
                }])
            }
        }

        let retrieval = Arc::new(RetrievalService::new(5, 500));
        let alice = IndexKey::for_dir(std::path::Path::new("/alice_docs"));
        retrieval.register(alice.clone(), Arc::new(Fixed), "/store/a".into(), None);

        let bob = IndexKey::for_dir(std::path::Path::new("/bob_docs"));
        let tool = SearchDocumentsTool::scoped(Arc::clone(&retrieval), bob);
        let out = tool.execute(json!({"query": "sky"})).await.unwrap();
        assert!(out.starts_with(SEARCH_ERROR_MARKER), "{}", out);
        assert!(out.contains("No retriever found for folder"));
        assert!(!out.contains("blue"));

        let tool = SearchDocumentsTool::scoped(retrieval, alice);
        let out = tool.execute(json!({"query": "sky"})).await.unwrap();
        assert!(out.contains("secret.txt"));
    }

    #[tokio::test]
    async fn missing_query_is_an_error() {
        let tool = SearchDocumentsTool::new(Arc::new(RetrievalService::new(5, 500)));
        assert!(tool.execute(json!({})).await.is_err());
    }
}
