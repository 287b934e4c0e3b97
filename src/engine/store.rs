//! Stack state storage.
//!
//! The store persists one JSON document per stack under
//! `<root>/<project>/<stack>.json`, with a lock file alongside it.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::error::{EngineResult, StateError};

use super::lock::{LOCK_EXPIRY_SECS, LockInfo, generate_holder_id};
use super::state::{STATE_VERSION, StackState};
use super::workspace::StackKey;

/// Attempts at creating the lock file before giving up.
const LOCK_ATTEMPTS: usize = 3;

/// Trait for stack state storage backends.
#[async_trait]
pub trait StackStore: Send + Sync {
    /// Loads the state of a stack.
    ///
    /// Returns `None` if the stack has never been created.
    async fn load(&self, key: &StackKey) -> EngineResult<Option<StackState>>;

    /// Saves the state of a stack.
    async fn save(&self, state: &StackState) -> EngineResult<()>;

    /// Checks if a stack exists.
    async fn exists(&self, key: &StackKey) -> EngineResult<bool>;

    /// Acquires the lock on a stack.
    async fn acquire_lock(&self, key: &StackKey, holder: &str) -> EngineResult<LockInfo>;

    /// Releases the lock on a stack if `lock_id` still holds it.
    async fn release_lock(&self, key: &StackKey, lock_id: &str) -> EngineResult<()>;

    /// Releases the lock without awaiting, for use from `Drop`.
    ///
    /// The lock file is gone when this returns, so the next acquisition
    /// cannot observe it.
    fn release_lock_now(&self, key: &StackKey, lock_id: &str) -> EngineResult<()>;

    /// Gets current lock information if locked.
    async fn lock_info(&self, key: &StackKey) -> EngineResult<Option<LockInfo>>;

    /// Gets the backend type name.
    fn backend_type(&self) -> &'static str;
}

/// File-based stack store.
#[derive(Debug, Clone)]
pub struct LocalStackStore {
    /// Directory holding one subdirectory per project.
    root: PathBuf,
}

impl LocalStackStore {
    /// Creates a store rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory of the store.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn project_dir(&self, key: &StackKey) -> PathBuf {
        self.root.join(&key.project)
    }

    fn state_path(&self, key: &StackKey) -> PathBuf {
        self.project_dir(key).join(format!("{}.json", key.stack))
    }

    fn lock_path(&self, key: &StackKey) -> PathBuf {
        self.project_dir(key).join(format!("{}.lock", key.stack))
    }

    async fn ensure_dir(&self, key: &StackKey) -> EngineResult<()> {
        let dir = self.project_dir(key);
        if !dir.exists() {
            debug!("Creating state directory: {}", dir.display());
            fs::create_dir_all(&dir).await.map_err(|e| {
                StateError::storage(format!("Failed to create state directory: {e}"))
            })?;
        }
        Ok(())
    }

    /// Reads the lock file; `None` if there is none, including one deleted
    /// while being read.
    async fn read_lock_file(&self, key: &StackKey) -> EngineResult<Option<LockInfo>> {
        match fs::read_to_string(self.lock_path(key)).await {
            Ok(content) => parse_lock(&content).map(Some),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StateError::Corrupted {
                message: format!("Failed to read lock file: {e}"),
            }
            .into()),
        }
    }

    /// Creates the lock file; fails if it already exists.
    async fn create_lock_file(&self, key: &StackKey, info: &LockInfo) -> EngineResult<bool> {
        let content = serde_json::to_string_pretty(info)
            .map_err(|e| StateError::serialization(format!("Failed to serialize lock: {e}")))?;

        let file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(self.lock_path(key))
            .await;

        let mut file = match file {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => return Ok(false),
            Err(e) => {
                return Err(StateError::LockFailed {
                    message: format!("Failed to create lock file: {e}"),
                }
                .into());
            }
        };

        file.write_all(content.as_bytes())
            .await
            .map_err(|e| StateError::LockFailed {
                message: format!("Failed to write lock file: {e}"),
            })?;
        file.sync_all().await.map_err(|e| StateError::LockFailed {
            message: format!("Failed to sync lock file: {e}"),
        })?;

        Ok(true)
    }

    async fn delete_lock_file(&self, key: &StackKey) -> EngineResult<()> {
        match fs::remove_file(self.lock_path(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StateError::LockFailed {
                message: format!("Failed to delete lock file: {e}"),
            }
            .into()),
        }
    }
}

fn parse_lock(content: &str) -> EngineResult<LockInfo> {
    serde_json::from_str(content).map_err(|e| {
        StateError::Corrupted {
            message: format!("Failed to parse lock file: {e}"),
        }
        .into()
    })
}

#[async_trait]
impl StackStore for LocalStackStore {
    async fn load(&self, key: &StackKey) -> EngineResult<Option<StackState>> {
        let path = self.state_path(key);
        if !path.exists() {
            debug!("State file does not exist: {}", path.display());
            return Ok(None);
        }

        debug!("Loading state from: {}", path.display());

        let content = fs::read_to_string(&path).await.map_err(|e| StateError::Corrupted {
            message: format!("Failed to read state file: {e}"),
        })?;

        let state: StackState = serde_json::from_str(&content).map_err(|e| StateError::Corrupted {
            message: format!("Failed to parse state file: {e}"),
        })?;

        if state.version != STATE_VERSION {
            return Err(StateError::VersionMismatch {
                expected: STATE_VERSION.to_string(),
                found: state.version,
            }
            .into());
        }

        Ok(Some(state))
    }

    async fn save(&self, state: &StackState) -> EngineResult<()> {
        let key = StackKey::new(&state.stack, &state.project);
        self.ensure_dir(&key).await?;

        let path = self.state_path(&key);
        debug!("Saving state to: {}", path.display());

        let content = serde_json::to_string_pretty(state)
            .map_err(|e| StateError::serialization(format!("Failed to serialize state: {e}")))?;

        // Write to a temporary file first, then rename
        let temp_path = path.with_extension("json.tmp");

        let mut file = fs::File::create(&temp_path).await.map_err(|e| {
            StateError::storage(format!("Failed to create temp state file: {e}"))
        })?;
        file.write_all(content.as_bytes())
            .await
            .map_err(|e| StateError::storage(format!("Failed to write state file: {e}")))?;
        file.sync_all()
            .await
            .map_err(|e| StateError::storage(format!("Failed to sync state file: {e}")))?;

        fs::rename(&temp_path, &path)
            .await
            .map_err(|e| StateError::storage(format!("Failed to rename state file: {e}")))?;

        Ok(())
    }

    async fn exists(&self, key: &StackKey) -> EngineResult<bool> {
        Ok(self.state_path(key).exists())
    }

    async fn acquire_lock(&self, key: &StackKey, holder: &str) -> EngineResult<LockInfo> {
        self.ensure_dir(key).await?;

        let holder_id = if holder.is_empty() {
            generate_holder_id()
        } else {
            holder.to_string()
        };
        let info = LockInfo::new(key, &holder_id);

        for _ in 0..LOCK_ATTEMPTS {
            if self.create_lock_file(key, &info).await? {
                debug!("Acquired lock on {key} (expires in {LOCK_EXPIRY_SECS}s)");
                return Ok(info);
            }

            match self.read_lock_file(key).await? {
                // Released between our create and our read
                None => {}
                Some(existing) if !existing.is_expired() => {
                    debug!(
                        "{key} is locked by {} for another {}s",
                        existing.holder,
                        existing.remaining_secs()
                    );
                    return Err(StateError::LockedByOther {
                        holder: existing.holder,
                        since: existing.acquired_at.to_rfc3339(),
                    }
                    .into());
                }
                Some(_) => {
                    info!("Taking over expired lock on {key}");
                    self.delete_lock_file(key).await?;
                }
            }
        }

        Err(StateError::LockFailed {
            message: format!("Lost the race for the lock on {key}"),
        }
        .into())
    }

    async fn release_lock(&self, key: &StackKey, lock_id: &str) -> EngineResult<()> {
        if let Some(existing) = self.read_lock_file(key).await? {
            if existing.lock_id == lock_id {
                self.delete_lock_file(key).await?;
                debug!("Released lock on {key}");
            } else {
                debug!(
                    "Lock ID mismatch on {key}: expected {lock_id}, found {}",
                    existing.lock_id
                );
            }
        }
        Ok(())
    }

    fn release_lock_now(&self, key: &StackKey, lock_id: &str) -> EngineResult<()> {
        let path = self.lock_path(key);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => {
                return Err(StateError::Corrupted {
                    message: format!("Failed to read lock file: {e}"),
                }
                .into());
            }
        };

        if parse_lock(&content)?.lock_id != lock_id {
            return Ok(());
        }
        match std::fs::remove_file(&path) {
            Ok(()) => {
                debug!("Released lock on {key}");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StateError::LockFailed {
                message: format!("Failed to delete lock file: {e}"),
            }
            .into()),
        }
    }

    async fn lock_info(&self, key: &StackKey) -> EngineResult<Option<LockInfo>> {
        self.read_lock_file(key).await
    }

    fn backend_type(&self) -> &'static str {
        "local"
    }
}
