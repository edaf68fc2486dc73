//! Local file state backend.
//!
//! State lives in `.fngate/state.json` next to the stack file. Writes go
//! through a temporary file and a rename so a crash never leaves a torn
//! state file.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::error::{FngateError, Result, StateError};

use super::lock::{LOCK_EXPIRY_SECS, LockInfo};
use super::store::StateStore;
use super::types::{STATE_VERSION, StackState};

/// Default state directory name.
pub const STATE_DIR: &str = ".fngate";

const STATE_FILE: &str = "state.json";
const LOCK_FILE: &str = "state.lock";

/// File-based state store.
#[derive(Debug, Clone)]
pub struct LocalStateStore {
    base_dir: PathBuf,
    state_path: PathBuf,
    lock_path: PathBuf,
}

fn local_err(action: &str, path: &Path, e: &std::io::Error) -> FngateError {
    FngateError::State(StateError::local(format!(
        "Failed to {action} {}: {e}",
        path.display()
    )))
}

impl LocalStateStore {
    /// Creates a store under `.fngate/` in the current directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the current directory cannot be determined.
    pub fn new() -> Result<Self> {
        let cwd = std::env::current_dir()
            .map_err(|e| FngateError::internal(format!("Cannot determine current directory: {e}")))?;
        Ok(Self::with_base_dir(cwd.join(STATE_DIR)))
    }

    /// Creates a store rooted at `base_dir`.
    #[must_use]
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        let base_dir = base_dir.into();
        Self {
            state_path: base_dir.join(STATE_FILE),
            lock_path: base_dir.join(LOCK_FILE),
            base_dir,
        }
    }

    /// Creates a store writing state to `state_path`; the lock sits beside it.
    #[must_use]
    pub fn with_state_path(state_path: impl Into<PathBuf>) -> Self {
        let state_path = state_path.into();
        let base_dir = state_path
            .parent()
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        Self {
            lock_path: base_dir.join(LOCK_FILE),
            base_dir,
            state_path,
        }
    }

    /// Returns the state file path.
    #[must_use]
    pub fn state_path(&self) -> &Path {
        &self.state_path
    }

    async fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.base_dir)
            .await
            .map_err(|e| local_err("create directory", &self.base_dir, &e))
    }

    async fn read_lock(&self) -> Result<Option<LockInfo>> {
        match fs::read_to_string(&self.lock_path).await {
            Ok(content) => Ok(Some(LockInfo::from_json(&content)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(local_err("read", &self.lock_path, &e)),
        }
    }

    async fn remove_lock(&self) -> Result<()> {
        match fs::remove_file(&self.lock_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(local_err("remove", &self.lock_path, &e)),
        }
    }

    /// Creates the lock file, failing if it already exists.
    async fn create_lock(&self, lock: &LockInfo) -> Result<bool> {
        let content = lock.to_json()?;
        let opened = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.lock_path)
            .await;

        let mut file = match opened {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(false),
            Err(e) => {
                return Err(FngateError::State(StateError::LockFailed {
                    message: format!("Failed to create lock file: {e}"),
                }));
            }
        };

        file.write_all(content.as_bytes()).await.map_err(|e| {
            FngateError::State(StateError::LockFailed {
                message: format!("Failed to write lock file: {e}"),
            })
        })?;
        file.sync_all()
            .await
            .map_err(|e| local_err("sync", &self.lock_path, &e))?;
        Ok(true)
    }
}

#[async_trait]
impl StateStore for LocalStateStore {
    async fn load(&self) -> Result<Option<StackState>> {
        let content = match fs::read_to_string(&self.state_path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("State file does not exist: {}", self.state_path.display());
                return Ok(None);
            }
            Err(e) => return Err(local_err("read", &self.state_path, &e)),
        };

        let state: StackState = serde_json::from_str(&content).map_err(|e| {
            FngateError::State(StateError::Corrupted {
                message: format!("Failed to parse {}: {e}", self.state_path.display()),
            })
        })?;

        if state.version != STATE_VERSION {
            return Err(StateError::VersionMismatch {
                expected: STATE_VERSION.to_string(),
                found: state.version,
            }
            .into());
        }

        info!("Loaded state from {}", self.state_path.display());
        Ok(Some(state))
    }

    async fn save(&self, state: &StackState) -> Result<()> {
        self.ensure_dir().await?;

        let content = serde_json::to_string_pretty(state)
            .map_err(|e| StateError::serialization(format!("Failed to serialize state: {e}")))?;

        let temp_path = self.state_path.with_extension("tmp");
        let mut file = fs::File::create(&temp_path)
            .await
            .map_err(|e| local_err("create", &temp_path, &e))?;
        file.write_all(content.as_bytes())
            .await
            .map_err(|e| local_err("write", &temp_path, &e))?;
        file.sync_all()
            .await
            .map_err(|e| local_err("sync", &temp_path, &e))?;
        drop(file);

        fs::rename(&temp_path, &self.state_path)
            .await
            .map_err(|e| local_err("rename", &temp_path, &e))?;

        info!("Saved state to {}", self.state_path.display());
        Ok(())
    }

    async fn delete(&self) -> Result<()> {
        match fs::remove_file(&self.state_path).await {
            Ok(()) => info!("Deleted state file {}", self.state_path.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(local_err("remove", &self.state_path, &e)),
        }
        self.remove_lock().await
    }

    async fn acquire_lock(&self, holder: &str, operation: &str) -> Result<LockInfo> {
        self.ensure_dir().await?;
        let lock = LockInfo::new(holder).for_operation(operation);

        if !self.create_lock(&lock).await? {
            if let Some(existing) = self.read_lock().await? {
                existing.ensure_expired()?;
                warn!(holder = %existing.holder, "Taking over expired state lock");
            }
            self.remove_lock().await?;
            if !self.create_lock(&lock).await? {
                return Err(StateError::LockFailed {
                    message: "lock was taken concurrently".to_string(),
                }
                .into());
            }
        }

        info!(
            lock_id = %lock.lock_id,
            "Acquired state lock (expires in {LOCK_EXPIRY_SECS}s)"
        );
        Ok(lock)
    }

    async fn release_lock(&self, lock_id: &str) -> Result<()> {
        match self.read_lock().await? {
            Some(existing) if existing.lock_id == lock_id => {
                self.remove_lock().await?;
                info!("Released state lock {lock_id}");
            }
            Some(existing) => {
                debug!("Lock id mismatch: expected {lock_id}, found {}", existing.lock_id);
            }
            None => {}
        }
        Ok(())
    }

    async fn force_unlock(&self) -> Result<()> {
        warn!("Force-removing state lock {}", self.lock_path.display());
        self.remove_lock().await
    }

    async fn lock_info(&self) -> Result<Option<LockInfo>> {
        self.read_lock().await
    }

    fn backend_type(&self) -> &'static str {
        "local"
    }

    fn location(&self) -> String {
        self.state_path.display().to_string()
    }
}
