//! Recursive character text splitter.
//!
//! Text is split on the first separator from `["\n\n", "\n", " ", ""]`
//! that occurs in it. Pieces shorter than `chunk_size` are merged greedily
//! back together, carrying up to `chunk_overlap` characters of trailing
//! context into the next chunk; pieces that are still too long are split
//! again with the remaining separators. Separators stay attached to the
//! start of the piece that follows them, and every emitted chunk is
//! whitespace-trimmed. Lengths are counted in characters, not bytes.
//!
//! The splitter is deterministic: the same text, size and overlap always
//! produce the same chunk boundaries.

use anyhow::{bail, Result};
use sha2::{Digest, Sha256};
use std::collections::VecDeque;
use tracing::warn;

use crate::models::{Chunk, Document};

/// Separators tried in order, coarsest first.
pub const DEFAULT_SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];

/// Splits text into overlapping chunks of bounded character length.
#[derive(Debug, Clone)]
pub struct RecursiveSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl RecursiveSplitter {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            bail!("chunk_size must be > 0");
        }
        if chunk_overlap >= chunk_size {
            bail!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                chunk_overlap,
                chunk_size
            );
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
        })
    }

    pub fn split_text(&self, text: &str) -> Vec<String> {
        self.split_recursive(text, &DEFAULT_SEPARATORS)
    }

    fn split_recursive(&self, text: &str, separators: &[&str]) -> Vec<String> {
        let mut separator = separators.last().copied().unwrap_or("");
        let mut remaining: &[&str] = &[];
        for (i, sep) in separators.iter().enumerate() {
            if sep.is_empty() {
                separator = sep;
                break;
            }
            if text.contains(sep) {
                separator = sep;
                remaining = &separators[i + 1..];
                break;
            }
        }

        let splits = split_keeping_separator(text, separator);

        let mut final_chunks = Vec::new();
        let mut good: Vec<String> = Vec::new();
        for piece in splits {
            if char_len(&piece) < self.chunk_size {
                good.push(piece);
                continue;
            }
            if !good.is_empty() {
                final_chunks.extend(self.merge_splits(&good));
                good.clear();
            }
            if remaining.is_empty() {
                final_chunks.push(piece);
            } else {
                final_chunks.extend(self.split_recursive(&piece, remaining));
            }
        }
        if !good.is_empty() {
            final_chunks.extend(self.merge_splits(&good));
        }
        final_chunks
    }

    /// Greedily join small pieces into chunks, keeping a tail of at most
    /// `chunk_overlap` characters as the head of the next chunk.
    fn merge_splits(&self, splits: &[String]) -> Vec<String> {
        let mut docs = Vec::new();
        let mut current: VecDeque<&str> = VecDeque::new();
        let mut total = 0usize;

        for piece in splits {
            let len = char_len(piece);
            if total + len > self.chunk_size {
                if total > self.chunk_size {
                    warn!(
                        "created a chunk of size {}, which is longer than the specified {}",
                        total, self.chunk_size
                    );
                }
                if !current.is_empty() {
                    push_joined(&mut docs, &current);
                    while total > self.chunk_overlap
                        || (total + len > self.chunk_size && total > 0)
                    {
                        match current.pop_front() {
                            Some(front) => total -= char_len(front),
                            None => break,
                        }
                    }
                }
            }
            current.push_back(piece);
            total += len;
        }
        push_joined(&mut docs, &current);
        docs
    }
}

fn push_joined(docs: &mut Vec<String>, parts: &VecDeque<&str>) {
    let joined: String = parts.iter().copied().collect();
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        docs.push(trimmed.to_string());
    }
}

/// Split on `separator`, re-attaching it to the start of every piece after
/// the first. An empty separator splits into characters. Empty pieces are
/// dropped.
fn split_keeping_separator(text: &str, separator: &str) -> Vec<String> {
    if separator.is_empty() {
        return text.chars().map(String::from).collect();
    }
    let mut out = Vec::new();
    for (i, part) in text.split(separator).enumerate() {
        let piece = if i == 0 {
            part.to_string()
        } else {
            format!("{}{}", separator, part)
        };
        if !piece.is_empty() {
            out.push(piece);
        }
    }
    out
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Split every document into chunks that inherit its metadata.
///
/// Chunk indices restart at 0 for each document.
pub fn chunk_documents(
    docs: &[Document],
    chunk_size: usize,
    chunk_overlap: usize,
) -> Result<Vec<Chunk>> {
    let splitter = RecursiveSplitter::new(chunk_size, chunk_overlap)?;
    let mut chunks = Vec::new();
    for doc in docs {
        for (index, text) in splitter.split_text(&doc.text).into_iter().enumerate() {
            chunks.push(make_chunk(doc, index as i64, text));
        }
    }
    Ok(chunks)
}

fn make_chunk(doc: &Document, index: i64, text: String) -> Chunk {
    let hash = sha256_hex(text.as_bytes());

    let mut id_hasher = Sha256::new();
    id_hasher.update(doc.metadata.file_path.as_bytes());
    id_hasher.update(index.to_le_bytes());
    id_hasher.update(hash.as_bytes());
    let id = format!("{:x}", id_hasher.finalize());

    Chunk {
        id,
        chunk_index: index,
        text,
        hash,
        metadata: doc.metadata.clone(),
    }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}
