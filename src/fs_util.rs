//! Verified directory deletion.
//!
//! A vector store directory may still be held open briefly after its handle
//! is released (antivirus scanners, mandatory locking on Windows), so
//! [`delete_dir_verified`] retries `remove_dir_all`, clears read-only bits
//! between attempts, verifies the directory is really gone, and finally
//! falls back to removing files one by one.

use std::path::Path;
use std::time::Duration;

use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::config::DeleteConfig;

/// What to do once every `remove_dir_all` attempt has failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteFallback {
    /// Walk the tree bottom-up and remove entries individually.
    Manual,
    None,
}

/// Bounded retry policy for [`delete_dir_verified`].
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
    pub fallback: DeleteFallback,
}

impl From<&DeleteConfig> for RetryPolicy {
    fn from(config: &DeleteConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            delay: Duration::from_millis(config.delay_ms),
            fallback: if config.fallback == "none" {
                DeleteFallback::None
            } else {
                DeleteFallback::Manual
            },
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("could not delete {path} after {attempts} attempt(s): {reason}")]
pub struct DeleteError {
    pub path: String,
    pub attempts: u32,
    pub reason: String,
}

/// Delete `dir` and verify it no longer exists.
///
/// Blocking; call from `spawn_blocking` inside async code. A directory that
/// is already absent counts as success.
pub fn delete_dir_verified(dir: &Path, policy: &RetryPolicy) -> Result<(), DeleteError> {
    if !dir.exists() {
        return Ok(());
    }

    let mut last_err: Option<String> = None;

    for attempt in 1..=policy.max_attempts {
        match std::fs::remove_dir_all(dir) {
            Ok(()) => {}
            Err(e) => {
                debug!(path = %dir.display(), attempt, error = %e, "remove_dir_all failed");
                last_err = Some(e.to_string());
                clear_readonly(dir);
            }
        }

        if !policy.delay.is_zero() {
            std::thread::sleep(policy.delay);
        }

        if !dir.exists() {
            debug!(path = %dir.display(), attempt, "directory removed");
            return Ok(());
        }
    }

    if policy.fallback == DeleteFallback::Manual {
        warn!(path = %dir.display(), "retries exhausted, removing files individually");
        match force_delete_dir(dir) {
            Ok(()) if !dir.exists() => return Ok(()),
            Ok(()) => {}
            Err(e) => last_err = Some(e.to_string()),
        }
    }

    Err(DeleteError {
        path: dir.display().to_string(),
        attempts: policy.max_attempts,
        reason: last_err.unwrap_or_else(|| "directory still exists".to_string()),
    })
}

/// Make every entry under `dir` writable.
fn clear_readonly(dir: &Path) {
    for entry in WalkDir::new(dir).into_iter().flatten() {
        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        let mut perms = metadata.permissions();
        if perms.readonly() {
            #[allow(clippy::permissions_set_readonly_false)]
            perms.set_readonly(false);
            let _ = std::fs::set_permissions(entry.path(), perms);
        }
    }
}

/// Last-resort bottom-up removal of every file and directory under `dir`.
fn force_delete_dir(dir: &Path) -> std::io::Result<()> {
    clear_readonly(dir);
    for entry in WalkDir::new(dir).contents_first(true) {
        let entry = entry.map_err(std::io::Error::other)?;
        if entry.file_type().is_dir() {
            std::fs::remove_dir(entry.path())?;
        } else {
            std::fs::remove_file(entry.path())?;
        }
    }
    Ok(())
}
