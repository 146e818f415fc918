//! Caller-facing error type.
//!
//! Most of the crate works in `anyhow::Result` and translates failures into
//! status values at the service boundary. [`SidekickError`] is reserved for
//! the few places where the caller itself supplied something unusable.

use std::path::PathBuf;

/// Result alias for operations that surface [`SidekickError`].
pub type Result<T> = std::result::Result<T, SidekickError>;

#[derive(Debug, thiserror::Error)]
pub enum SidekickError {
    /// The caller passed an argument that can never succeed
    /// (empty prompt, reindex without a path).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {context}: {source}")]
    Io {
        source: std::io::Error,
        context: String,
    },

    #[error("session file is corrupt: {0}")]
    CorruptSession(PathBuf),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SidekickError {
    pub fn io(source: std::io::Error, context: impl Into<String>) -> Self {
        Self::Io {
            source,
            context: context.into(),
        }
    }
}
