//! Indexing pipeline: load → normalise metadata → chunk → embed and persist.
//!
//! Loading, normalisation and chunking are synchronous and CPU/disk bound;
//! async callers run them through `tokio::task::spawn_blocking` (see
//! [`IndexingService::prepare_chunks`]). Store creation and loading are
//! async because they embed and talk to SQLite.
//!
//! None of these operations raise on bad input: missing paths, unsupported
//! files and unreadable stores are logged and yield empty results, `None`
//! or `false`.

use anyhow::{Context, Result};
use chrono::Utc;
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use crate::chunk;
use crate::config::{Config, LoadingConfig};
use crate::embedding::Embedder;
use crate::extract;
use crate::fs_util::{self, RetryPolicy};
use crate::models::{Chunk, Document, UNKNOWN_FILE_NAME};
use crate::paths::{is_excluded_path, normalize_path};
use crate::vectorstore::SqliteVectorStore;

/// Which files a load should pick up.
#[derive(Debug, Clone)]
pub struct LoadOptions {
    pub excluded_dirs: Vec<String>,
    pub exclude_globs: Vec<String>,
    pub recursive: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        LoadOptions::from(&LoadingConfig::default())
    }
}

impl From<&LoadingConfig> for LoadOptions {
    fn from(config: &LoadingConfig) -> Self {
        Self {
            excluded_dirs: config.excluded_dirs.clone(),
            exclude_globs: config.exclude_globs.clone(),
            recursive: config.recursive,
        }
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("Invalid glob: {}", pattern))?);
    }
    Ok(builder.build()?)
}

/// Load every supported document under `path`.
///
/// A directory is walked (recursively unless `opts.recursive` is false)
/// in sorted path order; a single file is loaded if its extension is
/// supported. Paths containing an excluded directory segment are skipped.
/// A missing path yields an empty vector.
pub fn load_documents(path: &Path, opts: &LoadOptions) -> Vec<Document> {
    let path = normalize_path(path);

    if is_excluded_path(&path, &opts.excluded_dirs) {
        info!(path = %path.display(), "path is excluded, nothing to load");
        return Vec::new();
    }
    if path.is_dir() {
        return load_directory(&path, opts);
    }
    if path.is_file() {
        return load_file(&path).into_iter().collect();
    }

    warn!(path = %path.display(), "path not found");
    Vec::new()
}

fn load_directory(root: &Path, opts: &LoadOptions) -> Vec<Document> {
    let globs = match build_globset(&opts.exclude_globs) {
        Ok(g) => g,
        Err(e) => {
            error!(error = %e, "ignoring exclude_globs");
            GlobSet::empty()
        }
    };

    let mut walker = WalkDir::new(root).follow_links(false).sort_by_file_name();
    if !opts.recursive {
        walker = walker.max_depth(1);
    }

    let mut docs = Vec::new();
    for entry in walker
        .into_iter()
        .filter_entry(|e| {
            e.depth() == 0 || !is_excluded_path(Path::new(e.file_name()), &opts.excluded_dirs)
        })
    {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!(error = %e, "skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let file = entry.path();
        if !extract::is_supported(file) {
            continue;
        }
        let relative = file.strip_prefix(root).unwrap_or(file);
        if globs.is_match(relative) {
            debug!(path = %file.display(), "excluded by glob");
            continue;
        }
        if let Some(doc) = load_file(file) {
            docs.push(doc);
        }
    }

    info!(root = %root.display(), documents = docs.len(), "loaded documents");
    docs
}

fn load_file(path: &Path) -> Option<Document> {
    if !extract::is_supported(path) {
        info!(path = %path.display(), "unsupported extension, skipped");
        return None;
    }
    match extract::extract_file(path) {
        Ok(text) => Some(Document::new(text, Some(path.to_path_buf()))),
        Err(e) => {
            error!(path = %path.display(), error = %e, "failed to load file");
            None
        }
    }
}

/// Fill `file_name`, `file_path` and `indexed_at` on every document.
///
/// Documents whose source is missing or no longer exists are kept, with
/// `file_name` falling back to `"unknown"`.
pub fn normalize_document_metadata(docs: Vec<Document>) -> Vec<Document> {
    let now = Utc::now();
    docs.into_iter()
        .map(|mut doc| {
            let src = doc
                .metadata
                .source
                .as_deref()
                .map(normalize_path)
                .unwrap_or_default();
            let valid = !src.as_os_str().is_empty() && src.exists();
            if valid {
                doc.metadata.file_name = src
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| UNKNOWN_FILE_NAME.to_string());
            } else {
                warn!(source = %src.display(), "document has invalid source");
                if doc.metadata.file_name.is_empty() {
                    doc.metadata.file_name = UNKNOWN_FILE_NAME.to_string();
                }
            }
            doc.metadata.file_path = src.to_string_lossy().into_owned();
            doc.metadata.indexed_at = Some(now);
            doc
        })
        .collect()
}

/// Owns the vector-store root and the embedder used for every store.
pub struct IndexingService {
    vectorstore_root: PathBuf,
    embedder: Arc<dyn Embedder>,
    batch_size: usize,
    delete_policy: RetryPolicy,
}

impl IndexingService {
    pub fn new(config: &Config, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            vectorstore_root: config.storage.vectorstore_root.clone(),
            embedder,
            batch_size: config.embedding.batch_size,
            delete_policy: RetryPolicy::from(&config.delete),
        }
    }

    pub fn vectorstore_root(&self) -> &Path {
        &self.vectorstore_root
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    /// Load, normalise and chunk `path` on the blocking pool.
    ///
    /// Returns the chunks and the number of documents loaded.
    pub async fn prepare_chunks(
        &self,
        path: &Path,
        opts: LoadOptions,
        chunk_size: usize,
        chunk_overlap: usize,
    ) -> Result<(Vec<Chunk>, usize)> {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || {
            let docs = normalize_document_metadata(load_documents(&path, &opts));
            let count = docs.len();
            if count == 0 {
                return Ok((Vec::new(), 0));
            }
            let chunks = chunk::chunk_documents(&docs, chunk_size, chunk_overlap)?;
            Ok((chunks, count))
        })
        .await?
    }

    /// Embed and persist `chunks` in a fresh `<hint>_<8 hex>` directory.
    ///
    /// On any failure the store is closed, the directory removed, and
    /// `None` returned.
    pub async fn create_vectorstore(
        &self,
        chunks: &[Chunk],
        name_hint: &str,
    ) -> Option<(Arc<SqliteVectorStore>, PathBuf)> {
        let base = Path::new(name_hint)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| "index".to_string());
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        let location = self
            .vectorstore_root
            .join(format!("{}_{}", base, &suffix[..8]));

        match SqliteVectorStore::create(
            &location,
            chunks,
            Arc::clone(&self.embedder),
            self.batch_size,
        )
        .await
        {
            Ok(store) => {
                info!(location = %location.display(), chunks = chunks.len(), "vector store created");
                Some((Arc::new(store), location))
            }
            Err(e) => {
                error!(location = %location.display(), error = %e, "failed to create vector store");
                if !self.remove_vectorstore(&location).await {
                    warn!(location = %location.display(), "could not clean up partial vector store");
                }
                None
            }
        }
    }

    /// Reopen a persisted store; `None` if it is missing or unreadable.
    pub async fn load_vectorstore(&self, location: &Path) -> Option<Arc<SqliteVectorStore>> {
        if !location.exists() {
            warn!(location = %location.display(), "persist directory does not exist");
            return None;
        }
        match SqliteVectorStore::open(location, Arc::clone(&self.embedder)).await {
            Ok(store) => Some(Arc::new(store)),
            Err(e) => {
                error!(location = %location.display(), error = %e, "failed to load vector store");
                None
            }
        }
    }

    /// Delete a persist directory with the configured retry policy.
    ///
    /// `true` once the directory is verified gone (including when it never
    /// existed).
    pub async fn remove_vectorstore(&self, location: &Path) -> bool {
        match self.try_remove_vectorstore(location).await {
            Ok(()) => true,
            Err(e) => {
                error!(location = %location.display(), error = %e, "failed to remove vector store");
                false
            }
        }
    }

    /// Like [`remove_vectorstore`](Self::remove_vectorstore) but keeps the error.
    pub async fn try_remove_vectorstore(&self, location: &Path) -> Result<()> {
        let location = location.to_path_buf();
        let policy = self.delete_policy.clone();
        tokio::task::spawn_blocking(move || fs_util::delete_dir_verified(&location, &policy))
            .await??;
        Ok(())
    }
}
