//! Path helpers and the [`IndexKey`] type.
//!
//! Normalisation is purely lexical (no symlink resolution), so a key can be
//! computed for paths that have since disappeared from disk.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path, PathBuf};

/// Prefix distinguishing single-file keys from directory keys.
pub const FILE_KEY_PREFIX: &str = "FILE::";

/// Collapse `.` and `..` segments and redundant separators.
///
/// `..` above the root of an absolute path is dropped; on a relative path
/// it is kept.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out: Vec<Component> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.last() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => out.push(component),
            },
            other => out.push(other),
        }
    }
    if out.is_empty() {
        if path.as_os_str().is_empty() {
            return PathBuf::new();
        }
        return PathBuf::from(".");
    }
    out.iter().map(|c| c.as_os_str()).collect()
}

/// Returns `true` if any segment of `path` equals one of `excluded_dirs`.
///
/// Both `/` and `\` count as separators so Windows-style paths stored in
/// manifests or metadata are handled too. An empty path is always excluded.
pub fn is_excluded_path(path: &Path, excluded_dirs: &[String]) -> bool {
    let text = path.to_string_lossy();
    if text.is_empty() {
        return true;
    }
    text.split(['/', '\\'])
        .any(|segment| excluded_dirs.iter().any(|ex| ex == segment))
}

/// `true` when `path` exists and is a directory.
pub fn validate_directory(path: &Path) -> bool {
    if path.as_os_str().is_empty() {
        return false;
    }
    normalize_path(path).is_dir()
}

/// Absolute, lexically normalised form of `path`.
pub fn absolute_path(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return normalize_path(path);
    }
    match std::env::current_dir() {
        Ok(cwd) => normalize_path(&cwd.join(path)),
        Err(_) => normalize_path(path),
    }
}

/// Canonical identifier of one indexed directory or file.
///
/// Directories map to their absolute path, files to `FILE::<absolute path>`,
/// so a file and a directory can never share a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IndexKey(String);

impl IndexKey {
    /// Key for whatever currently lives at `path`.
    ///
    /// Anything that is not an existing regular file is treated as a
    /// directory.
    pub fn for_path(path: &Path) -> Self {
        let abs = absolute_path(path);
        if abs.is_file() {
            Self::for_file(&abs)
        } else {
            Self::for_dir(&abs)
        }
    }

    pub fn for_dir(path: &Path) -> Self {
        Self(absolute_path(path).to_string_lossy().into_owned())
    }

    pub fn for_file(path: &Path) -> Self {
        Self(format!(
            "{}{}",
            FILE_KEY_PREFIX,
            absolute_path(path).to_string_lossy()
        ))
    }

    /// Wrap a key read back from a manifest.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_file(&self) -> bool {
        self.0.starts_with(FILE_KEY_PREFIX)
    }

    /// The filesystem path this key was derived from.
    pub fn path(&self) -> PathBuf {
        PathBuf::from(self.0.strip_prefix(FILE_KEY_PREFIX).unwrap_or(&self.0))
    }

    /// Short human-readable name, used to label persist directories.
    pub fn display_name(&self) -> String {
        self.path()
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "root".to_string())
    }
}

impl fmt::Display for IndexKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
