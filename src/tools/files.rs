//! File tools confined to a sandbox directory.
//!
//! Every path argument is interpreted relative to the sandbox root. Absolute
//! paths and paths that climb out of the root with `..` are rejected before
//! touching the filesystem.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use globset::Glob;
use serde_json::{json, Value};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;

use super::{required_str, Tool, ToolGroup};

/// The sandbox root shared by all file tools.
#[derive(Debug, Clone)]
pub struct Sandbox {
    root: PathBuf,
}

impl Sandbox {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `relative` inside the sandbox.
    pub fn resolve(&self, relative: &str) -> Result<PathBuf> {
        let rel = Path::new(relative);
        if rel.is_absolute() || rel.has_root() {
            bail!("Access denied: '{}' is outside the sandbox", relative);
        }
        let mut depth: i32 = 0;
        let mut clean = PathBuf::new();
        for component in rel.components() {
            match component {
                Component::CurDir => {}
                Component::ParentDir => {
                    depth -= 1;
                    if depth < 0 {
                        bail!("Access denied: '{}' is outside the sandbox", relative);
                    }
                    clean.pop();
                }
                Component::Normal(part) => {
                    depth += 1;
                    clean.push(part);
                }
                Component::RootDir | Component::Prefix(_) => {
                    bail!("Access denied: '{}' is outside the sandbox", relative);
                }
            }
        }
        Ok(self.root.join(clean))
    }
}

pub fn file_tools(root: &Path) -> Vec<Arc<dyn Tool>> {
    let sandbox = Sandbox::new(root);
    vec![
        Arc::new(ReadFileTool(sandbox.clone())),
        Arc::new(WriteFileTool(sandbox.clone())),
        Arc::new(ListDirectoryTool(sandbox.clone())),
        Arc::new(DeleteFileTool(sandbox.clone())),
        Arc::new(CopyFileTool(sandbox.clone())),
        Arc::new(MoveFileTool(sandbox.clone())),
        Arc::new(FileSearchTool(sandbox)),
    ]
}

fn path_schema(description: &str) -> Value {
    json!({
        "type": "object",
        "properties": {
            "file_path": {"type": "string", "description": description}
        },
        "required": ["file_path"]
    })
}

fn source_destination_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "source_path": {"type": "string", "description": "Path of the file to copy or move"},
            "destination_path": {"type": "string", "description": "Path to write to"}
        },
        "required": ["source_path", "destination_path"]
    })
}

async fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    Ok(())
}

pub struct ReadFileTool(Sandbox);

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a text file from the sandbox directory."
    }

    fn group(&self) -> ToolGroup {
        ToolGroup::Files
    }

    fn parameters_schema(&self) -> Value {
        path_schema("Path of the file, relative to the sandbox")
    }

    async fn execute(&self, params: Value) -> Result<String> {
        let rel = required_str(&params, "file_path")?;
        let path = self.0.resolve(rel)?;
        let bytes = tokio::fs::read(&path)
            .await
            .with_context(|| format!("no such file: {}", rel))?;
        Ok(crate::extract::decode_text(&bytes))
    }
}

pub struct WriteFileTool(Sandbox);

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write text to a file in the sandbox directory, replacing it unless append is true."
    }

    fn group(&self) -> ToolGroup {
        ToolGroup::Files
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": {"type": "string", "description": "Path of the file, relative to the sandbox"},
                "text": {"type": "string", "description": "Content to write"},
                "append": {"type": "boolean", "description": "Append instead of overwriting"}
            },
            "required": ["file_path", "text"]
        })
    }

    async fn execute(&self, params: Value) -> Result<String> {
        let rel = required_str(&params, "file_path")?;
        let text = required_str(&params, "text")?;
        let append = params
            .get("append")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        let path = self.0.resolve(rel)?;
        ensure_parent(&path).await?;

        if append {
            use tokio::io::AsyncWriteExt;
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await?;
            file.write_all(text.as_bytes()).await?;
            file.flush().await?;
        } else {
            tokio::fs::write(&path, text).await?;
        }
        Ok(format!("File written successfully to {}.", rel))
    }
}

pub struct ListDirectoryTool(Sandbox);

#[async_trait]
impl Tool for ListDirectoryTool {
    fn name(&self) -> &str {
        "list_directory"
    }

    fn description(&self) -> &str {
        "List the files and folders in a sandbox directory."
    }

    fn group(&self) -> ToolGroup {
        ToolGroup::Files
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "dir_path": {"type": "string", "description": "Directory relative to the sandbox; defaults to the root"}
            }
        })
    }

    async fn execute(&self, params: Value) -> Result<String> {
        let rel = params
            .get("dir_path")
            .and_then(|v| v.as_str())
            .unwrap_or(".");
        let dir = self.0.resolve(rel)?;
        if !dir.is_dir() {
            return Ok(format!("No files found in directory {}", rel));
        }

        let mut entries = tokio::fs::read_dir(&dir).await?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let mut name = entry.file_name().to_string_lossy().into_owned();
            if entry.file_type().await?.is_dir() {
                name.push('/');
            }
            names.push(name);
        }
        names.sort();

        if names.is_empty() {
            Ok(format!("No files found in directory {}", rel))
        } else {
            Ok(names.join("\n"))
        }
    }
}

pub struct DeleteFileTool(Sandbox);

#[async_trait]
impl Tool for DeleteFileTool {
    fn name(&self) -> &str {
        "delete_file"
    }

    fn description(&self) -> &str {
        "Delete a file from the sandbox directory."
    }

    fn group(&self) -> ToolGroup {
        ToolGroup::Files
    }

    fn parameters_schema(&self) -> Value {
        path_schema("Path of the file to delete, relative to the sandbox")
    }

    async fn execute(&self, params: Value) -> Result<String> {
        let rel = required_str(&params, "file_path")?;
        let path = self.0.resolve(rel)?;
        if !path.is_file() {
            bail!("no such file: {}", rel);
        }
        tokio::fs::remove_file(&path).await?;
        Ok(format!("File deleted successfully: {}.", rel))
    }
}

pub struct CopyFileTool(Sandbox);

#[async_trait]
impl Tool for CopyFileTool {
    fn name(&self) -> &str {
        "copy_file"
    }

    fn description(&self) -> &str {
        "Copy a file within the sandbox directory."
    }

    fn group(&self) -> ToolGroup {
        ToolGroup::Files
    }

    fn parameters_schema(&self) -> Value {
        source_destination_schema()
    }

    async fn execute(&self, params: Value) -> Result<String> {
        let src_rel = required_str(&params, "source_path")?;
        let dst_rel = required_str(&params, "destination_path")?;
        let src = self.0.resolve(src_rel)?;
        let dst = self.0.resolve(dst_rel)?;
        ensure_parent(&dst).await?;
        tokio::fs::copy(&src, &dst)
            .await
            .with_context(|| format!("could not copy {} to {}", src_rel, dst_rel))?;
        Ok(format!("File copied successfully from {} to {}.", src_rel, dst_rel))
    }
}

pub struct MoveFileTool(Sandbox);

#[async_trait]
impl Tool for MoveFileTool {
    fn name(&self) -> &str {
        "move_file"
    }

    fn description(&self) -> &str {
        "Move or rename a file within the sandbox directory."
    }

    fn group(&self) -> ToolGroup {
        ToolGroup::Files
    }

    fn parameters_schema(&self) -> Value {
        source_destination_schema()
    }

    async fn execute(&self, params: Value) -> Result<String> {
        let src_rel = required_str(&params, "source_path")?;
        let dst_rel = required_str(&params, "destination_path")?;
        let src = self.0.resolve(src_rel)?;
        let dst = self.0.resolve(dst_rel)?;
        if !src.is_file() {
            bail!("no such file: {}", src_rel);
        }
        ensure_parent(&dst).await?;
        tokio::fs::rename(&src, &dst)
            .await
            .with_context(|| format!("could not move {} to {}", src_rel, dst_rel))?;
        Ok(format!("File moved successfully from {} to {}.", src_rel, dst_rel))
    }
}

pub struct FileSearchTool(Sandbox);

#[async_trait]
impl Tool for FileSearchTool {
    fn name(&self) -> &str {
        "file_search"
    }

    fn description(&self) -> &str {
        "Recursively find files in the sandbox whose name matches a glob pattern such as *.txt."
    }

    fn group(&self) -> ToolGroup {
        ToolGroup::Files
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "dir_path": {"type": "string", "description": "Directory to search, relative to the sandbox"},
                "pattern": {"type": "string", "description": "File-name glob, e.g. *.md"}
            },
            "required": ["pattern"]
        })
    }

    async fn execute(&self, params: Value) -> Result<String> {
        let pattern = required_str(&params, "pattern")?;
        let rel = params
            .get("dir_path")
            .and_then(|v| v.as_str())
            .unwrap_or(".");
        let dir = self.0.resolve(rel)?;
        let matcher = Glob::new(pattern)
            .with_context(|| format!("invalid pattern: {}", pattern))?
            .compile_matcher();
        let root = self.0.root().to_path_buf();

        let found = tokio::task::spawn_blocking(move || {
            let mut found: Vec<String> = WalkDir::new(&dir)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file() && matcher.is_match(e.file_name()))
                .map(|e| {
                    e.path()
                        .strip_prefix(&root)
                        .unwrap_or(e.path())
                        .to_string_lossy()
                        .into_owned()
                })
                .collect();
            found.sort();
            found
        })
        .await?;

        if found.is_empty() {
            Ok(format!("No files found for pattern {} in directory {}", pattern, rel))
        } else {
            Ok(found.join("\n"))
        }
    }
}
