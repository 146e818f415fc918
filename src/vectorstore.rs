//! Persisted vector store backed by one SQLite file per index.
//!
//! A persist location is a directory holding `store.sqlite`. The file has a
//! `chunks` table (text, metadata JSON, little-endian f32 embedding blob)
//! and a one-row `store_meta` table recording the embedding model and
//! dimensionality. Queries embed the text and rank every stored vector by
//! cosine similarity in Rust.
//!
//! The pool keeps file handles open until [`SqliteVectorStore::close`] is
//! awaited. Callers must close a store before deleting its directory.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::embedding::{self, Embedder};
use crate::models::{Chunk, DocumentMetadata, RetrievedChunk};
use crate::retrieval::Retriever;

/// File name of the database inside a persist location.
pub const STORE_FILE: &str = "store.sqlite";

pub struct SqliteVectorStore {
    location: PathBuf,
    pool: SqlitePool,
    embedder: Arc<dyn Embedder>,
    closed: AtomicBool,
}

impl std::fmt::Debug for SqliteVectorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteVectorStore")
            .field("location", &self.location)
            .field("model", &self.embedder.model_name())
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish()
    }
}

async fn connect(location: &Path, create: bool) -> Result<SqlitePool> {
    let db_path = location.join(STORE_FILE);
    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
        .create_if_missing(create)
        .journal_mode(SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(4)
        .connect_with(options)
        .await?;

    Ok(pool)
}

impl SqliteVectorStore {
    /// Create a new store at `location`, embed every chunk and persist it.
    ///
    /// `location` must not already contain a store.
    pub async fn create(
        location: &Path,
        chunks: &[Chunk],
        embedder: Arc<dyn Embedder>,
        batch_size: usize,
    ) -> Result<Self> {
        if location.join(STORE_FILE).exists() {
            bail!("a vector store already exists at {}", location.display());
        }
        std::fs::create_dir_all(location)
            .with_context(|| format!("Failed to create {}", location.display()))?;

        let pool = connect(location, true).await?;
        let store = Self {
            location: location.to_path_buf(),
            pool,
            embedder,
            closed: AtomicBool::new(false),
        };

        if let Err(e) = store.populate(chunks, batch_size.max(1)).await {
            store.close().await;
            return Err(e);
        }
        Ok(store)
    }

    async fn populate(&self, chunks: &[Chunk], batch_size: usize) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS store_meta (
                model TEXT NOT NULL,
                dims INTEGER NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chunks (
                id TEXT PRIMARY KEY,
                chunk_index INTEGER NOT NULL,
                file_name TEXT NOT NULL,
                file_path TEXT NOT NULL,
                text TEXT NOT NULL,
                hash TEXT NOT NULL,
                metadata_json TEXT NOT NULL,
                embedding BLOB NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("INSERT INTO store_meta (model, dims, created_at) VALUES (?, ?, ?)")
            .bind(self.embedder.model_name())
            .bind(self.embedder.dims() as i64)
            .bind(chrono::Utc::now().to_rfc3339())
            .execute(&self.pool)
            .await?;

        for batch in chunks.chunks(batch_size) {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let vectors = self.embedder.embed(&texts).await?;
            if vectors.len() != batch.len() {
                bail!(
                    "embedder returned {} vectors for {} chunks",
                    vectors.len(),
                    batch.len()
                );
            }

            let mut tx = self.pool.begin().await?;
            for (chunk, vector) in batch.iter().zip(vectors.iter()) {
                sqlx::query(
                    r#"
                    INSERT OR REPLACE INTO chunks
                        (id, chunk_index, file_name, file_path, text, hash, metadata_json, embedding)
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(&chunk.id)
                .bind(chunk.chunk_index)
                .bind(&chunk.metadata.file_name)
                .bind(&chunk.metadata.file_path)
                .bind(&chunk.text)
                .bind(&chunk.hash)
                .bind(serde_json::to_string(&chunk.metadata)?)
                .bind(embedding::vec_to_blob(vector))
                .execute(&mut *tx)
                .await?;
            }
            tx.commit().await?;
            debug!(batch = batch.len(), "embedded and stored chunk batch");
        }

        Ok(())
    }

    /// Reopen a previously persisted store.
    ///
    /// Fails when the location or its database is missing, or the schema
    /// was never written.
    pub async fn open(location: &Path, embedder: Arc<dyn Embedder>) -> Result<Self> {
        if !location.join(STORE_FILE).is_file() {
            bail!("no vector store at {}", location.display());
        }
        let pool = connect(location, false).await?;

        let meta = sqlx::query("SELECT model, dims FROM store_meta LIMIT 1")
            .fetch_optional(&pool)
            .await;
        let row = match meta {
            Ok(Some(row)) => row,
            Ok(None) => {
                pool.close().await;
                bail!("vector store at {} has no metadata", location.display());
            }
            Err(e) => {
                pool.close().await;
                return Err(e).with_context(|| {
                    format!("vector store at {} is unreadable", location.display())
                });
            }
        };

        let model: String = row.get("model");
        let dims: i64 = row.get("dims");
        if dims as usize != embedder.dims() {
            pool.close().await;
            bail!(
                "vector store at {} has {} dimensions, embedder produces {}",
                location.display(),
                dims,
                embedder.dims()
            );
        }
        if model != embedder.model_name() {
            warn!(
                location = %location.display(),
                stored = %model,
                current = %embedder.model_name(),
                "vector store was built with a different embedding model"
            );
        }

        Ok(Self {
            location: location.to_path_buf(),
            pool,
            embedder,
            closed: AtomicBool::new(false),
        })
    }

    pub fn location(&self) -> &Path {
        &self.location
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub async fn len(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    /// Top `k` chunks by cosine similarity to `query`, best first.
    ///
    /// Ties keep insertion order.
    pub async fn similarity_search(&self, query: &str, k: usize) -> Result<Vec<RetrievedChunk>> {
        if self.is_closed() {
            bail!("vector store at {} is closed", self.location.display());
        }
        let query_vec = embedding::embed_query(self.embedder.as_ref(), query).await?;

        let rows = sqlx::query("SELECT text, metadata_json, embedding FROM chunks ORDER BY rowid")
            .fetch_all(&self.pool)
            .await?;

        let mut results = Vec::with_capacity(rows.len());
        for row in &rows {
            let blob: Vec<u8> = row.get("embedding");
            let metadata_json: String = row.get("metadata_json");
            let metadata: DocumentMetadata =
                serde_json::from_str(&metadata_json).unwrap_or_default();
            results.push(RetrievedChunk {
                text: row.get("text"),
                metadata,
                score: embedding::cosine_similarity(&query_vec, &embedding::blob_to_vec(&blob)),
            });
        }

        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results.truncate(k);

        Ok(results)
    }

    /// Release the pool and its file handles. Safe to call more than once.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
            .execute(&self.pool)
            .await
        {
            debug!(error = %e, "wal checkpoint before close failed");
        }
        self.pool.close().await;
        debug!(location = %self.location.display(), "vector store closed");
    }

    /// A retriever returning the top `k` chunks per query.
    pub fn as_retriever(self: &Arc<Self>, k: usize) -> Arc<dyn Retriever> {
        Arc::new(VectorStoreRetriever {
            store: Arc::clone(self),
            k,
        })
    }
}

/// [`Retriever`] over a shared [`SqliteVectorStore`].
pub struct VectorStoreRetriever {
    store: Arc<SqliteVectorStore>,
    k: usize,
}

#[async_trait]
impl Retriever for VectorStoreRetriever {
    async fn retrieve(&self, query: &str) -> Result<Vec<RetrievedChunk>> {
        self.store.similarity_search(query, self.k).await
    }
}
