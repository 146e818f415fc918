//! Core data models shared by the indexing and retrieval pipeline.
//!
//! A [`Document`] is one loaded file, a [`Chunk`] is the unit that gets
//! embedded and stored, and a [`RetrievedChunk`] is what a retriever hands
//! back for a query.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Placeholder file name for documents whose source is missing or invalid.
pub const UNKNOWN_FILE_NAME: &str = "unknown";

/// Metadata carried by a document and inherited by each of its chunks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    /// Path the loader read the document from, if any.
    pub source: Option<PathBuf>,
    pub file_name: String,
    pub file_path: String,
    pub indexed_at: Option<DateTime<Utc>>,
}

/// A loaded unit of source content.
#[derive(Debug, Clone)]
pub struct Document {
    pub text: String,
    pub metadata: DocumentMetadata,
}

impl Document {
    pub fn new(text: impl Into<String>, source: Option<PathBuf>) -> Self {
        Self {
            text: text.into(),
            metadata: DocumentMetadata {
                source,
                ..DocumentMetadata::default()
            },
        }
    }
}

/// A bounded slice of a document's text.
#[derive(Debug, Clone)]
pub struct Chunk {
    /// Deterministic id derived from the source path, index and text.
    pub id: String,
    /// Position of this chunk within its document, starting at 0.
    pub chunk_index: i64,
    pub text: String,
    /// SHA-256 of `text`.
    pub hash: String,
    pub metadata: DocumentMetadata,
}

/// A chunk returned by a similarity query, best match first.
#[derive(Debug, Clone)]
pub struct RetrievedChunk {
    pub text: String,
    pub metadata: DocumentMetadata,
    pub score: f32,
}
