//! `python_repl`: run a Python snippet in a subprocess.
//!
//! The code goes to the interpreter on stdin. Each call is a fresh process,
//! so no state carries over between calls.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::{required_str, Tool, ToolGroup};

pub struct PythonReplTool {
    python_bin: String,
    timeout: Duration,
}

impl PythonReplTool {
    pub fn new(python_bin: &str, timeout_secs: u64) -> Self {
        Self {
            python_bin: python_bin.to_string(),
            timeout: Duration::from_secs(timeout_secs.max(1)),
        }
    }

    async fn run(&self, code: &str) -> Result<String> {
        let mut child = Command::new(&self.python_bin)
            .arg("-")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to start {}", self.python_bin))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(code.as_bytes()).await?;
            stdin.shutdown().await?;
        }

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(output) => output?,
            Err(_) => return Ok(format!("Execution timed out after {:?}", self.timeout)),
        };

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            if !text.is_empty() && !text.ends_with('\n') {
                text.push('\n');
            }
            text.push_str(&stderr);
        }
        Ok(text)
    }
}

#[async_trait]
impl Tool for PythonReplTool {
    fn name(&self) -> &str {
        "python_repl"
    }

    fn description(&self) -> &str {
        "Execute Python code. Use print() to see results; only printed output is returned."
    }

    fn group(&self) -> ToolGroup {
        ToolGroup::Python
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "code": {"type": "string", "description": "Python source to run"}
            },
            "required": ["code"]
        })
    }

    async fn execute(&self, params: Value) -> Result<String> {
        let code = required_str(&params, "code")?;
        let output = self.run(code).await?;
        Ok(format_execution(code, &output))
    }
}

pub fn format_execution(code: &str, output: &str) -> String {
    let shown = if output.trim().is_empty() {
        "(no output)"
    } else {
        output.trim_end()
    };
    format!(
        "🔧 **Python REPL executed**\n\n📥 **Code:**\n```python\n{}\n```\n\n📤 **Output:**\n```text\n{}\n```",
        code.trim_end(),
        shown
    )
}
