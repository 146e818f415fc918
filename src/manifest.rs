//! On-disk index manifest.
//!
//! A JSON object mapping each index key to the directory of its persisted
//! vector store. It is read once at startup and rewritten in full after
//! every mutation.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::paths::IndexKey;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexManifest {
    entries: BTreeMap<IndexKey, PathBuf>,
}

impl IndexManifest {
    /// Read the manifest at `path`.
    ///
    /// A missing file is an empty manifest. An unreadable or malformed one
    /// is logged and also treated as empty.
    pub fn load(path: &Path) -> Self {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Self::default(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "could not read index manifest");
                return Self::default();
            }
        };

        match serde_json::from_str::<BTreeMap<IndexKey, PathBuf>>(&content) {
            Ok(entries) => Self { entries },
            Err(e) => {
                warn!(path = %path.display(), error = %e, "index manifest is corrupt, starting empty");
                Self::default()
            }
        }
    }

    /// Write the whole manifest, replacing the file atomically.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(&self.entries)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, path)
            .with_context(|| format!("Failed to replace {}", path.display()))?;
        Ok(())
    }

    pub fn insert(&mut self, key: IndexKey, location: PathBuf) -> Option<PathBuf> {
        self.entries.insert(key, location)
    }

    pub fn remove(&mut self, key: &IndexKey) -> Option<PathBuf> {
        self.entries.remove(key)
    }

    pub fn get(&self, key: &IndexKey) -> Option<&PathBuf> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &IndexKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&IndexKey, &PathBuf)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_empty() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(IndexManifest::load(&tmp.path().join("index_manifest.json")).is_empty());
    }

    #[test]
    fn save_and_load_preserve_json_shape() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("root").join("index_manifest.json");

        let mut manifest = IndexManifest::default();
        manifest.insert(IndexKey::from_raw("/docs"), PathBuf::from("/vdb/docs_1234abcd"));
        manifest.insert(
            IndexKey::from_raw("FILE::/notes.md"),
            PathBuf::from("/vdb/notes.md_deadbeef"),
        );
        manifest.save(&path).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["/docs"], "/vdb/docs_1234abcd");
        assert_eq!(raw["FILE::/notes.md"], "/vdb/notes.md_deadbeef");

        assert_eq!(IndexManifest::load(&path), manifest);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn corrupt_or_wrong_shape_is_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("index_manifest.json");

        std::fs::write(&path, "{ not json").unwrap();
        assert!(IndexManifest::load(&path).is_empty());

        std::fs::write(&path, "[1, 2, 3]").unwrap();
        assert!(IndexManifest::load(&path).is_empty());
    }
}
