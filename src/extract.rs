//! Text extraction for the file formats the loader understands.
//!
//! Plain-text and source files are decoded as UTF-8 with a Latin-1 fallback
//! so one stray byte does not abort a whole folder. PDFs go through
//! `pdf-extract`. Extraction never panics: failures come back as
//! [`ExtractError`] and the loader skips that file.

use std::path::Path;

/// Extensions loaded as text (markdown, plain text, source code).
pub const TEXT_EXTENSIONS: &[&str] = &[
    "md", "markdown", "txt", "py", "rs", "js", "ts", "go", "java", "c", "h", "cpp", "sh",
];

pub const PDF_EXTENSION: &str = "pdf";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Text,
    Pdf,
}

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("unsupported file type: {0}")]
    Unsupported(String),
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
}

/// Classify `path` by extension (case-insensitive).
pub fn file_kind(path: &Path) -> Option<FileKind> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    if ext == PDF_EXTENSION {
        Some(FileKind::Pdf)
    } else if TEXT_EXTENSIONS.contains(&ext.as_str()) {
        Some(FileKind::Text)
    } else {
        None
    }
}

pub fn is_supported(path: &Path) -> bool {
    file_kind(path).is_some()
}

/// Read `path` and return its text content.
pub fn extract_file(path: &Path) -> Result<String, ExtractError> {
    let kind = file_kind(path)
        .ok_or_else(|| ExtractError::Unsupported(path.display().to_string()))?;
    let bytes = std::fs::read(path).map_err(|source| ExtractError::Read {
        path: path.display().to_string(),
        source,
    })?;
    match kind {
        FileKind::Text => Ok(decode_text(&bytes)),
        FileKind::Pdf => extract_pdf(&bytes),
    }
}

/// UTF-8 first; on failure every byte is mapped to the code point of the
/// same value (ISO-8859-1).
pub fn decode_text(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => bytes.iter().map(|&b| b as char).collect(),
    }
}

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))
}
