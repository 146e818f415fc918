//! Chat sessions: persistence of [`ConversationState`] per user and scope,
//! and the message-sending service wrapped around [`Sidekick::run`].

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error};

use crate::chunk::sha256_hex;
use crate::error::{Result, SidekickError};
use crate::messages::{ConversationState, Message};
use crate::sidekick::{RunRequest, Sidekick};

/// Saved conversation state, keyed by user and an arbitrary scope string
/// (typically the folder the conversation is about).
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn save(&self, user: &str, scope: &str, state: &ConversationState) -> Result<()>;
    async fn load(&self, user: &str, scope: &str) -> Result<Option<ConversationState>>;
}

/// Stores each session as `<root>/<user>/<sha256(scope)>.json`.
pub struct FileSessionStore {
    root: PathBuf,
}

impl FileSessionStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn session_path(&self, user: &str, scope: &str) -> PathBuf {
        self.root
            .join(sanitize_user(user))
            .join(format!("{}.json", sha256_hex(scope.as_bytes())))
    }
}

fn sanitize_user(user: &str) -> String {
    let cleaned: String = user
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "_".to_string()
    } else {
        cleaned
    }
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| SidekickError::io(e, format!("creating {}", parent.display())))?;
    }
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, bytes)
        .await
        .map_err(|e| SidekickError::io(e, format!("writing {}", tmp.display())))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| SidekickError::io(e, format!("renaming {}", tmp.display())))?;
    Ok(())
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn save(&self, user: &str, scope: &str, state: &ConversationState) -> Result<()> {
        let path = self.session_path(user, scope);
        let json = serde_json::to_vec_pretty(state).map_err(anyhow::Error::from)?;
        write_atomic(&path, &json).await?;
        debug!(user, scope, path = %path.display(), "session saved");
        Ok(())
    }

    async fn load(&self, user: &str, scope: &str) -> Result<Option<ConversationState>> {
        let path = self.session_path(user, scope);
        let bytes = match tokio::fs::read(&path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(SidekickError::io(e, format!("reading {}", path.display()))),
        };
        match serde_json::from_slice(&bytes) {
            Ok(state) => Ok(Some(state)),
            Err(e) => {
                error!(path = %path.display(), error = %e, "corrupt session file");
                Err(SidekickError::CorruptSession(path))
            }
        }
    }
}

/// Per-message settings chosen by the user.
#[derive(Debug, Clone, Default)]
pub struct ChatOptions {
    pub folder: Option<PathBuf>,
    pub enabled_tools: Option<Vec<String>>,
    pub top_k: usize,
}

/// Sends user messages through the coordinator and keeps sessions saved.
pub struct ChatService {
    sidekick: Arc<Sidekick>,
    sessions: Arc<dyn SessionStore>,
    history_window: usize,
}

impl ChatService {
    pub fn new(sidekick: Arc<Sidekick>, sessions: Arc<dyn SessionStore>) -> Self {
        let history_window = sidekick.config().agent.history_window;
        Self {
            sidekick,
            sessions,
            history_window,
        }
    }

    /// Append `prompt` and the assistant's reply to `state`.
    ///
    /// A failed run is recorded as a visible assistant error message rather
    /// than returned, so the user's turn is never lost.
    pub async fn send_message(
        &self,
        mut state: ConversationState,
        prompt: &str,
        options: &ChatOptions,
    ) -> Result<ConversationState> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(SidekickError::InvalidArgument(
                "message must not be empty".to_string(),
            ));
        }
        state.push(Message::user(prompt));

        let visible: Vec<Message> = state
            .messages
            .iter()
            .filter(|m| m.is_visible())
            .cloned()
            .collect();
        let start = visible.len().saturating_sub(self.history_window);
        let request = RunRequest {
            input: prompt.to_string(),
            folder: options.folder.clone(),
            enabled_tools: options.enabled_tools.clone(),
            top_k: options.top_k,
            history: visible[start..].to_vec(),
        };

        match self.sidekick.run_state(request).await {
            Ok(run) => {
                state.push(Message::assistant(run.final_answer()));
                state.criteria_met = run.criteria_met;
                state.needs_user_input = run.needs_user_input;
                state.evaluation_history.extend(run.evaluation_history);
                state.task_metadata.extend(run.task_metadata);
            }
            Err(e) => {
                error!(thread = %state.thread_id, error = %e, "run failed");
                state.criteria_met = false;
                state.needs_user_input = false;
                state.push(Message::assistant(format!("❌ Error: {:#}", e)));
            }
        }
        Ok(state)
    }

    /// Load (or start) the session for `user` and `scope`, send `prompt`,
    /// save the result and return the reply text.
    pub async fn chat(
        &self,
        user: &str,
        scope: &str,
        prompt: &str,
        options: &ChatOptions,
    ) -> Result<(String, ConversationState)> {
        let state = match self.sessions.load(user, scope).await? {
            Some(state) => state,
            None => ConversationState::fresh(self.sidekick.config().agent.success_criteria.clone()),
        };
        let state = self.send_message(state, prompt, options).await?;
        self.sessions.save(user, scope, &state).await?;
        let reply = state.last().map(|m| m.text().to_string()).unwrap_or_default();
        Ok((reply, state))
    }
}
