//! The coordinator: index lifecycle, manifest ownership and agent runs.
//!
//! A [`Sidekick`] owns the [`IndexManifest`], the [`RetrievalService`]
//! registry, the built-in tool set and the agent's checkpoint memory. It is
//! created with [`Sidekick::open`], which reloads every manifest entry, and
//! torn down with [`Sidekick::close`], which releases store handles but
//! keeps everything on disk.
//!
//! Per index key the lifecycle is
//! `unknown → indexing → registered → (reindexing → registered)* → removed`.
//! All of `index_path`, `reindex` and `remove_path` hold one async mutex
//! around the manifest, so their check-then-act sequences never interleave.

use anyhow::{Context, Result};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::checkpoint::{Checkpointer, MemoryCheckpointer, ThreadGuards};
use crate::config::Config;
use crate::embedding::{create_embedder, Embedder};
use crate::error::SidekickError;
use crate::graph::AgentGraph;
use crate::indexing::{IndexingService, LoadOptions};
use crate::llm::{create_chat_model, ChatModel};
use crate::manifest::IndexManifest;
use crate::messages::{ConversationState, Message};
use crate::paths::{absolute_path, IndexKey};
use crate::retrieval::RetrievalService;
use crate::tools::retrieval::SearchDocumentsTool;
use crate::tools::{ToolGroup, ToolRegistry};

/// Per-call overrides for [`Sidekick::index_path`]. `None` uses the config.
#[derive(Debug, Clone, Default)]
pub struct IndexOptions {
    pub force_reindex: bool,
    pub chunk_size: Option<usize>,
    pub chunk_overlap: Option<usize>,
    pub recursive: Option<bool>,
}

impl IndexOptions {
    pub fn forced() -> Self {
        Self {
            force_reindex: true,
            ..Self::default()
        }
    }
}

/// Outcome of an index request. `Display` gives the user-facing message.
#[derive(Debug, Clone, PartialEq)]
pub enum IndexStatus {
    InvalidPath(PathBuf),
    AlreadyIndexed(PathBuf),
    NoDocuments(PathBuf),
    ChunkingFailed(String),
    StoreFailed,
    Indexed {
        key: IndexKey,
        chunks: usize,
        documents: usize,
    },
}

impl IndexStatus {
    /// `true` when the path is searchable afterwards.
    pub fn is_ok(&self) -> bool {
        matches!(self, IndexStatus::Indexed { .. } | IndexStatus::AlreadyIndexed(_))
    }
}

impl fmt::Display for IndexStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexStatus::InvalidPath(p) => {
                write!(f, "[ERROR] Invalid path (not found): {}", p.display())
            }
            IndexStatus::AlreadyIndexed(p) => write!(f, "[INFO] Already indexed: {}", p.display()),
            IndexStatus::NoDocuments(_) => write!(f, "❌ No readable documents found"),
            IndexStatus::ChunkingFailed(e) => {
                write!(f, "[ERROR] Error during chunk splitting: {}", e)
            }
            IndexStatus::StoreFailed => write!(f, "[ERROR] Failed to create vectorstore"),
            IndexStatus::Indexed {
                chunks, documents, ..
            } => write!(f, "✅ Indexed {} chunks from {} documents", chunks, documents),
        }
    }
}

/// Outcome of a remove request.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoveStatus {
    Removed(PathBuf),
    /// Unregistered, but the persist directory is still on disk. The
    /// manifest entry is kept so a later remove can retry.
    DeleteUnverified {
        path: PathBuf,
        persist_dir: PathBuf,
        error: String,
    },
    /// Unregistered; there was no persist directory to delete.
    RemovedNoData(PathBuf),
    NotIndexed(PathBuf),
}

impl RemoveStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, RemoveStatus::Removed(_) | RemoveStatus::RemovedNoData(_))
    }
}

impl fmt::Display for RemoveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoveStatus::Removed(p) => write!(f, "🗑️ Removed index: {}", p.display()),
            RemoveStatus::DeleteUnverified {
                persist_dir, error, ..
            } => write!(
                f,
                "⚠️ Unregistered index, but could not delete vectorstore folder on disk.\n\
                 Persist dir: {}\n\
                 Likely Windows file lock or antivirus scanning.\n\
                 Error: {}",
                persist_dir.display(),
                error
            ),
            RemoveStatus::RemovedNoData(p) => write!(
                f,
                "🗑️ Removed index (no persist dir found): {}",
                p.display()
            ),
            RemoveStatus::NotIndexed(p) => write!(f, "[INFO] Not indexed: {}", p.display()),
        }
    }
}

/// One manifest entry as reported by [`Sidekick::list_indexes`].
#[derive(Debug, Clone, PartialEq)]
pub struct IndexInfo {
    pub key: IndexKey,
    pub location: PathBuf,
    /// Whether a live retriever is registered for the key.
    pub loaded: bool,
}

/// A single agent run.
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    pub input: String,
    /// Folder (or file) the `rag` tool should search.
    pub folder: Option<PathBuf>,
    /// Tool groups or names to enable; `None` enables everything.
    pub enabled_tools: Option<Vec<String>>,
    /// Default result count for document search; 0 keeps the current one.
    pub top_k: usize,
    /// Prior visible messages, ending with the current user turn. When
    /// empty the run starts from `input` alone.
    pub history: Vec<Message>,
}

pub struct Sidekick {
    config: Config,
    indexing: IndexingService,
    retrieval: Arc<RetrievalService>,
    manifest: Mutex<IndexManifest>,
    tools: ToolRegistry,
    worker: Arc<dyn ChatModel>,
    evaluator: Arc<dyn ChatModel>,
    checkpointer: Arc<MemoryCheckpointer>,
    guards: Arc<ThreadGuards>,
}

impl Sidekick {
    /// Build the embedder and chat models from `config`, then [`open`](Self::open).
    pub async fn from_config(config: Config) -> Result<Self> {
        let embedder = create_embedder(&config.embedding)?;
        let worker = create_chat_model(&config.llm, &config.llm.model)?;
        let evaluator_model = config
            .llm
            .evaluator_model
            .clone()
            .unwrap_or_else(|| config.llm.model.clone());
        let evaluator = create_chat_model(&config.llm, &evaluator_model)?;
        Self::open(config, embedder, worker, evaluator).await
    }

    /// Create the coordinator and register every loadable manifest entry.
    ///
    /// Entries whose store cannot be opened are logged and skipped; they
    /// stay in the manifest.
    pub async fn open(
        config: Config,
        embedder: Arc<dyn Embedder>,
        worker: Arc<dyn ChatModel>,
        evaluator: Arc<dyn ChatModel>,
    ) -> Result<Self> {
        let root = &config.storage.vectorstore_root;
        tokio::fs::create_dir_all(root)
            .await
            .with_context(|| format!("Failed to create vector store root {}", root.display()))?;

        let retrieval = Arc::new(RetrievalService::new(
            config.retrieval.default_k,
            config.retrieval.snippet_chars,
        ));
        let tools = ToolRegistry::with_builtins(Arc::clone(&retrieval), &config.tools);
        let manifest = IndexManifest::load(&config.storage.manifest_path());

        let sidekick = Self {
            indexing: IndexingService::new(&config, embedder),
            retrieval,
            manifest: Mutex::new(IndexManifest::default()),
            tools,
            worker,
            evaluator,
            checkpointer: Arc::new(MemoryCheckpointer::new()),
            guards: Arc::new(ThreadGuards::new()),
            config,
        };
        sidekick.bootstrap(&manifest).await;
        *sidekick.manifest.lock().await = manifest;
        Ok(sidekick)
    }

    async fn bootstrap(&self, manifest: &IndexManifest) {
        let mut loaded = 0;
        for (key, location) in manifest.iter() {
            match self.indexing.load_vectorstore(location).await {
                Some(store) => {
                    let retriever = store.as_retriever(self.config.retrieval.search_k);
                    self.retrieval
                        .register(key.clone(), retriever, location.clone(), Some(store));
                    loaded += 1;
                }
                None => warn!(key = %key, location = %location.display(), "skipping unloadable index"),
            }
        }
        info!(loaded, total = manifest.len(), "indexes restored from manifest");
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn retrieval(&self) -> &Arc<RetrievalService> {
        &self.retrieval
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// The agent's checkpoint store.
    pub fn checkpointer(&self) -> &MemoryCheckpointer {
        &self.checkpointer
    }

    /// Index a directory or single file.
    ///
    /// Never fails: every outcome, including errors, is an [`IndexStatus`].
    pub async fn index_path(&self, path: &Path, opts: IndexOptions) -> IndexStatus {
        let abs = absolute_path(path);
        if !abs.exists() {
            warn!(path = %abs.display(), "index requested for a missing path");
            return IndexStatus::InvalidPath(abs);
        }
        let key = IndexKey::for_path(&abs);

        let mut manifest = self.manifest.lock().await;

        if self.retrieval.has(&key) && !opts.force_reindex {
            info!(key = %key, "already indexed");
            return IndexStatus::AlreadyIndexed(abs);
        }

        // Forced reindex, or a manifest entry that failed to load: release
        // and delete whatever is there before building anew.
        if self.retrieval.has(&key) || manifest.contains(&key) {
            let old = self.release(&key).await.or_else(|| manifest.get(&key).cloned());
            if let Some(old) = old {
                if !self.indexing.remove_vectorstore(&old).await {
                    warn!(location = %old.display(), "old vector store left on disk");
                }
            }
            manifest.remove(&key);
            self.save_manifest(&manifest);
        }

        let load_opts = LoadOptions {
            recursive: opts.recursive.unwrap_or(self.config.loading.recursive),
            ..LoadOptions::from(&self.config.loading)
        };
        let chunk_size = opts.chunk_size.unwrap_or(self.config.chunking.chunk_size);
        let chunk_overlap = opts
            .chunk_overlap
            .unwrap_or(self.config.chunking.chunk_overlap);

        let (chunks, documents) = match self
            .indexing
            .prepare_chunks(&abs, load_opts, chunk_size, chunk_overlap)
            .await
        {
            Ok(prepared) => prepared,
            Err(e) => {
                error!(path = %abs.display(), error = %e, "chunking failed");
                return IndexStatus::ChunkingFailed(e.to_string());
            }
        };
        if documents == 0 || chunks.is_empty() {
            warn!(path = %abs.display(), "no readable documents");
            return IndexStatus::NoDocuments(abs);
        }

        let Some((store, location)) = self
            .indexing
            .create_vectorstore(&chunks, &key.display_name())
            .await
        else {
            return IndexStatus::StoreFailed;
        };

        let retriever = store.as_retriever(self.config.retrieval.search_k);
        self.retrieval
            .register(key.clone(), retriever, location.clone(), Some(store));
        manifest.insert(key.clone(), location);
        self.save_manifest(&manifest);

        info!(key = %key, chunks = chunks.len(), documents, "indexed");
        IndexStatus::Indexed {
            key,
            chunks: chunks.len(),
            documents,
        }
    }

    /// Force a rebuild of `path`'s index.
    pub async fn reindex(&self, path: Option<&Path>) -> crate::error::Result<IndexStatus> {
        let path = path.ok_or_else(|| {
            SidekickError::InvalidArgument("reindex requires a path".to_string())
        })?;
        Ok(self.index_path(path, IndexOptions::forced()).await)
    }

    /// Unregister `path` and delete its persisted store.
    ///
    /// Works for paths that have since vanished from disk by trying both
    /// the directory and the file key.
    pub async fn remove_path(&self, path: &Path) -> RemoveStatus {
        let abs = absolute_path(path);
        let candidates = if abs.exists() {
            vec![IndexKey::for_path(&abs)]
        } else {
            vec![IndexKey::for_dir(&abs), IndexKey::for_file(&abs)]
        };

        let mut manifest = self.manifest.lock().await;
        let Some(key) = candidates
            .into_iter()
            .find(|k| self.retrieval.has(k) || manifest.contains(k))
        else {
            return RemoveStatus::NotIndexed(abs);
        };

        let location = self
            .release(&key)
            .await
            .or_else(|| manifest.get(&key).cloned());

        let Some(location) = location.filter(|l| l.exists()) else {
            manifest.remove(&key);
            self.save_manifest(&manifest);
            info!(key = %key, "removed index with no persist directory");
            return RemoveStatus::RemovedNoData(abs);
        };

        match self.indexing.try_remove_vectorstore(&location).await {
            Ok(()) => {
                manifest.remove(&key);
                self.save_manifest(&manifest);
                info!(key = %key, location = %location.display(), "index removed");
                RemoveStatus::Removed(abs)
            }
            Err(e) => {
                error!(key = %key, location = %location.display(), error = %e, "persist directory not deleted");
                RemoveStatus::DeleteUnverified {
                    path: abs,
                    persist_dir: location,
                    error: e.to_string(),
                }
            }
        }
    }

    /// Close and drop the live store for `key`, then wait for handles to go.
    async fn release(&self, key: &IndexKey) -> Option<PathBuf> {
        if let Some(store) = self.retrieval.pop_vectorstore(key) {
            store.close().await;
        }
        let location = self.retrieval.unregister(key);
        let delay = self.config.delete.release_delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        location
    }

    fn save_manifest(&self, manifest: &IndexManifest) {
        if let Err(e) = manifest.save(&self.config.storage.manifest_path()) {
            error!(error = %e, "failed to save index manifest");
        }
    }

    pub async fn list_indexes(&self) -> Vec<IndexInfo> {
        let manifest = self.manifest.lock().await;
        manifest
            .iter()
            .map(|(key, location)| IndexInfo {
                key: key.clone(),
                location: location.clone(),
                loaded: self.retrieval.has(key),
            })
            .collect()
    }

    /// Search one folder's index, or the current/first one when `folder`
    /// is `None`.
    pub async fn search(&self, query: &str, k: Option<usize>, folder: Option<&Path>) -> String {
        let key = folder.map(IndexKey::for_path);
        self.retrieval.search(query, k, key.as_ref()).await
    }

    fn graph(&self, tools: ToolRegistry) -> AgentGraph {
        let graph = AgentGraph::new(Arc::clone(&self.worker), self.config.agent.clone())
            .with_tools(tools)
            .with_checkpointer(Arc::clone(&self.checkpointer) as Arc<dyn Checkpointer>)
            .with_guards(Arc::clone(&self.guards));
        if self.config.agent.use_evaluator {
            graph.with_evaluator(Arc::clone(&self.evaluator))
        } else {
            graph
        }
    }

    /// Run the agent once and return its final answer.
    ///
    /// Each run gets a fresh thread id, so a previous failed turn's
    /// half-finished tool calls are never resumed.
    pub async fn run(&self, request: RunRequest) -> Result<String> {
        let state = self.run_state(request).await?;
        Ok(state.final_answer())
    }

    /// Like [`run`](Self::run) but returns the whole final state.
    pub async fn run_state(&self, request: RunRequest) -> Result<ConversationState> {
        let mut tools = self.tools.select(request.enabled_tools.as_deref());
        let rag_enabled = tools.has_group(ToolGroup::Rag);

        match (&request.folder, rag_enabled) {
            (Some(folder), true) => {
                let key = IndexKey::for_path(folder);
                if !self.retrieval.has(&key) && self.config.agent.auto_index {
                    let status = self.index_path(folder, IndexOptions::default()).await;
                    info!(folder = %folder.display(), %status, "auto-index");
                }
                // `current` is shared by concurrent runs; the tool is not.
                tools.register(Arc::new(SearchDocumentsTool::scoped(
                    Arc::clone(&self.retrieval),
                    key.clone(),
                )));
                self.retrieval.set_current(Some(key));
            }
            _ => self.retrieval.set_current(None),
        }
        if request.top_k > 0 {
            self.retrieval.set_default_k(request.top_k);
        }

        let mut state = ConversationState::fresh(self.config.agent.success_criteria.clone());
        state.messages = if request.history.is_empty() {
            vec![Message::user(request.input)]
        } else {
            request.history
        };
        if let Some(folder) = &request.folder {
            state.task_metadata.insert(
                "folder".to_string(),
                serde_json::Value::String(folder.display().to_string()),
            );
        }

        // Thread ids are per run; nothing will load this checkpoint again,
        // whether the run finished or failed.
        let thread_id = state.thread_id.clone();
        let result = self.graph(tools).invoke(state).await;
        if let Err(e) = self.checkpointer.delete(&thread_id).await {
            warn!(thread = %thread_id, error = %e, "checkpoint not deleted");
        }
        result
    }

    /// Release every store handle and clear the registry. Persisted stores
    /// and the manifest are left on disk.
    pub async fn close(&self) {
        let _manifest = self.manifest.lock().await;
        for store in self.retrieval.clear() {
            store.close().await;
        }
        info!("sidekick closed");
    }
}
