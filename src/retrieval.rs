//! Retriever registry and search router.
//!
//! [`RetrievalService`] maps an [`IndexKey`] to its live retriever, the
//! vector-store handle behind it and the persist location. It remembers a
//! "current" key and a default result count, and formats search results
//! as plain strings for the agent's `search_documents` tool.
//!
//! Searches never fail: a missing index, an unknown key or a backend error
//! comes back as a string starting with [`SEARCH_ERROR_MARKER`].

use anyhow::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, warn};

use crate::models::RetrievedChunk;
use crate::paths::IndexKey;
use crate::vectorstore::SqliteVectorStore;

/// Prefix of every failure string returned by [`RetrievalService::search`].
pub const SEARCH_ERROR_MARKER: &str = "❌";

/// Query interface over a vector store.
#[async_trait]
pub trait Retriever: Send + Sync {
    /// Ranked chunks for `query`, best match first.
    async fn retrieve(&self, query: &str) -> Result<Vec<RetrievedChunk>>;
}

#[derive(Default)]
struct Registry {
    retrievers: BTreeMap<IndexKey, Arc<dyn Retriever>>,
    paths: BTreeMap<IndexKey, PathBuf>,
    stores: BTreeMap<IndexKey, Arc<SqliteVectorStore>>,
    current: Option<IndexKey>,
    default_k: usize,
}

pub struct RetrievalService {
    inner: RwLock<Registry>,
    snippet_chars: usize,
}

impl RetrievalService {
    pub fn new(default_k: usize, snippet_chars: usize) -> Self {
        Self {
            inner: RwLock::new(Registry {
                default_k: default_k.max(1),
                ..Registry::default()
            }),
            snippet_chars,
        }
    }

    // A poisoned lock only means another thread panicked mid-update; the
    // maps themselves are always left consistent.
    fn read(&self) -> RwLockReadGuard<'_, Registry> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Registry> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a retriever. Replaces any previous registration for `key`.
    pub fn register(
        &self,
        key: IndexKey,
        retriever: Arc<dyn Retriever>,
        persist_location: PathBuf,
        vectorstore: Option<Arc<SqliteVectorStore>>,
    ) {
        let mut reg = self.write();
        reg.retrievers.insert(key.clone(), retriever);
        reg.paths.insert(key.clone(), persist_location);
        match vectorstore {
            Some(store) => {
                reg.stores.insert(key.clone(), store);
            }
            None => {
                reg.stores.remove(&key);
            }
        }
        debug!(key = %key, "retriever registered");
    }

    /// Take the live store handle for `key`, leaving the retriever and path.
    pub fn pop_vectorstore(&self, key: &IndexKey) -> Option<Arc<SqliteVectorStore>> {
        self.write().stores.remove(key)
    }

    /// Drop the retriever for `key` and return its persist location.
    ///
    /// Clears the current key if it pointed here.
    pub fn unregister(&self, key: &IndexKey) -> Option<PathBuf> {
        let mut reg = self.write();
        reg.retrievers.remove(key);
        reg.stores.remove(key);
        if reg.current.as_ref() == Some(key) {
            reg.current = None;
        }
        reg.paths.remove(key)
    }

    pub fn has(&self, key: &IndexKey) -> bool {
        self.read().retrievers.contains_key(key)
    }

    pub fn set_current(&self, key: Option<IndexKey>) {
        self.write().current = key;
    }

    pub fn current(&self) -> Option<IndexKey> {
        self.read().current.clone()
    }

    /// Resolve a retriever: the explicit `key`, else the current key, else
    /// the first registered one.
    ///
    /// An explicit key that is not registered resolves to `None`.
    pub fn get(&self, key: Option<&IndexKey>) -> Option<Arc<dyn Retriever>> {
        let reg = self.read();
        if let Some(key) = key {
            return reg.retrievers.get(key).cloned();
        }
        if let Some(current) = &reg.current {
            if let Some(r) = reg.retrievers.get(current) {
                return Some(Arc::clone(r));
            }
        }
        reg.retrievers.values().next().cloned()
    }

    pub fn persist_location(&self, key: &IndexKey) -> Option<PathBuf> {
        self.read().paths.get(key).cloned()
    }

    pub fn set_default_k(&self, k: usize) {
        self.write().default_k = k.max(1);
    }

    pub fn default_k(&self) -> usize {
        self.read().default_k
    }

    pub fn indexed_keys(&self) -> Vec<IndexKey> {
        self.read().retrievers.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.read().retrievers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every registration and the current key.
    ///
    /// Returns the store handles so the caller can close them.
    pub fn clear(&self) -> Vec<Arc<SqliteVectorStore>> {
        let mut reg = self.write();
        reg.retrievers.clear();
        reg.paths.clear();
        reg.current = None;
        std::mem::take(&mut reg.stores).into_values().collect()
    }

    /// Search and format the top `k` chunks (`None` uses the default k).
    pub async fn search(&self, query: &str, k: Option<usize>, key: Option<&IndexKey>) -> String {
        let (retriever, k) = {
            let reg = self.read();
            if reg.retrievers.is_empty() {
                return format!(
                    "{} No indexed folder. Index a folder first.",
                    SEARCH_ERROR_MARKER
                );
            }
            let k = k.filter(|k| *k > 0).unwrap_or(reg.default_k);
            drop(reg);
            match self.get(key) {
                Some(r) => (r, k),
                None => {
                    let name = key.map(|k| k.to_string()).unwrap_or_default();
                    return format!(
                        "{} No retriever found for folder: {}",
                        SEARCH_ERROR_MARKER, name
                    );
                }
            }
        };

        let docs = match retriever.retrieve(query).await {
            Ok(docs) => docs,
            Err(e) => {
                warn!(error = %e, "retrieval failed");
                return format!("{} Search error: {}", SEARCH_ERROR_MARKER, e);
            }
        };

        if docs.is_empty() {
            return format!(
                "{} No relevant documents for: '{}'",
                SEARCH_ERROR_MARKER, query
            );
        }

        docs.iter()
            .take(k)
            .enumerate()
            .map(|(i, doc)| {
                let name = if doc.metadata.file_name.is_empty() {
                    "unknown"
                } else {
                    doc.metadata.file_name.as_str()
                };
                let content: String = doc.text.chars().take(self.snippet_chars).collect();
                format!("📄 Doc {} ({}):\n{}\n", i + 1, name, content)
            })
            .collect::<Vec<_>>()
            .join("\n---\n")
    }
}

impl std::fmt::Debug for RetrievalService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let reg = self.read();
        f.debug_struct("RetrievalService")
            .field("keys", &reg.retrievers.keys().collect::<Vec<_>>())
            .field("current", &reg.current)
            .field("default_k", &reg.default_k)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DocumentMetadata;

    struct Fixed(Vec<(&'static str, &'static str)>);

    #[async_trait]
    impl Retriever for Fixed {
        async fn retrieve(&self, _query: &str) -> Result<Vec<RetrievedChunk>> {
            Ok(self
                .0
                .iter()
                .map(|(name, text)| RetrievedChunk {
                    text: text.to_string(),
                    metadata: DocumentMetadata {
                        file_name: name.to_string(),
                        ..DocumentMetadata::default()
                    },
                    score: 1.0,
                })
                .collect())
        }
    }

    struct Failing;

    #[async_trait]
    impl Retriever for Failing {
        async fn retrieve(&self, _query: &str) -> Result<Vec<RetrievedChunk>> {
            anyhow::bail!("backend exploded")
        }
    }

    fn key(s: &str) -> IndexKey {
        IndexKey::from_raw(s)
    }

    #[tokio::test]
    async fn empty_registry_reports_no_index() {
        let svc = RetrievalService::new(5, 500);
        let out = svc.search("anything", None, None).await;
        assert!(out.starts_with(SEARCH_ERROR_MARKER));
        assert!(out.contains("No indexed folder"));
    }

    #[test]
    fn get_resolution_order() {
        let svc = RetrievalService::new(5, 500);
        let a: Arc<dyn Retriever> = Arc::new(Fixed(vec![]));
        let b: Arc<dyn Retriever> = Arc::new(Fixed(vec![]));
        svc.register(key("/a"), a.clone(), PathBuf::from("pa"), None);
        svc.register(key("/b"), b.clone(), PathBuf::from("pb"), None);

        assert!(svc.get(None).is_some());

        svc.set_current(Some(key("/b")));
        assert!(Arc::ptr_eq(&svc.get(None).unwrap(), &b));
        assert!(Arc::ptr_eq(&svc.get(Some(&key("/a"))).unwrap(), &a));
        assert!(svc.get(Some(&key("/missing"))).is_none());
    }

    #[test]
    fn unregister_returns_path_and_clears_current() {
        let svc = RetrievalService::new(5, 500);
        svc.register(key("/a"), Arc::new(Fixed(vec![])), PathBuf::from("pa"), None);
        svc.set_current(Some(key("/a")));
        assert!(svc.pop_vectorstore(&key("/a")).is_none());
        assert!(svc.has(&key("/a")));
        assert_eq!(svc.unregister(&key("/a")), Some(PathBuf::from("pa")));
        assert!(!svc.has(&key("/a")));
        assert_eq!(svc.current(), None);
        assert_eq!(svc.unregister(&key("/a")), None);
    }

    #[test]
    fn register_overwrites() {
        let svc = RetrievalService::new(5, 500);
        svc.register(key("/a"), Arc::new(Fixed(vec![])), PathBuf::from("old"), None);
        svc.register(key("/a"), Arc::new(Fixed(vec![])), PathBuf::from("new"), None);
        assert_eq!(svc.len(), 1);
        assert_eq!(svc.persist_location(&key("/a")), Some(PathBuf::from("new")));
    }

    #[tokio::test]
    async fn search_formats_in_rank_order_and_truncates() {
        let svc = RetrievalService::new(5, 4);
        svc.register(
            key("/a"),
            Arc::new(Fixed(vec![("first.txt", "abcdefgh"), ("second.md", "xyz")])),
            PathBuf::from("pa"),
            None,
        );
        let out = svc.search("q", None, None).await;
        assert_eq!(
            out,
            "📄 Doc 1 (first.txt):\nabcd\n\n---\n📄 Doc 2 (second.md):\nxyz\n"
        );

        let only_one = svc.search("q", Some(1), None).await;
        assert!(only_one.contains("first.txt"));
        assert!(!only_one.contains("second.md"));
    }

    #[tokio::test]
    async fn search_errors_become_strings() {
        let svc = RetrievalService::new(5, 500);
        svc.register(key("/bad"), Arc::new(Failing), PathBuf::from("p"), None);
        svc.register(key("/empty"), Arc::new(Fixed(vec![])), PathBuf::from("p"), None);

        let out = svc.search("q", None, Some(&key("/bad"))).await;
        assert!(out.starts_with(SEARCH_ERROR_MARKER));
        assert!(out.contains("backend exploded"));

        let out = svc.search("q", None, Some(&key("/empty"))).await;
        assert!(out.contains("No relevant documents for: 'q'"));

        let out = svc.search("q", None, Some(&key("/nowhere"))).await;
        assert!(out.contains("No retriever found for folder: /nowhere"));
    }

    #[test]
    fn clear_drops_everything() {
        let svc = RetrievalService::new(5, 500);
        svc.register(key("/a"), Arc::new(Fixed(vec![])), PathBuf::from("pa"), None);
        svc.set_current(Some(key("/a")));
        assert!(svc.clear().is_empty());
        assert!(svc.is_empty());
        assert_eq!(svc.current(), None);
    }
}
