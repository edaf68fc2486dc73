//! State store trait.

use async_trait::async_trait;

use super::lock::LockInfo;
use super::types::StackState;
use crate::error::Result;

/// A backend that persists [`StackState`] and its lock.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Loads the state, or `None` if nothing was saved yet.
    async fn load(&self) -> Result<Option<StackState>>;

    /// Saves the state.
    async fn save(&self, state: &StackState) -> Result<()>;

    /// Deletes the state and its lock.
    async fn delete(&self) -> Result<()>;

    /// Acquires the lock for `holder` running `operation`.
    ///
    /// An expired lock is taken over. A live one fails with
    /// [`crate::error::StateError::LockedByOther`].
    async fn acquire_lock(&self, holder: &str, operation: &str) -> Result<LockInfo>;

    /// Releases the lock if `lock_id` still owns it.
    async fn release_lock(&self, lock_id: &str) -> Result<()>;

    /// Removes the lock regardless of owner.
    async fn force_unlock(&self) -> Result<()>;

    /// Returns the current lock, expired or not.
    async fn lock_info(&self) -> Result<Option<LockInfo>>;

    /// Returns the backend name.
    fn backend_type(&self) -> &'static str;

    /// Returns where the state lives, for display.
    fn location(&self) -> String;
}

#[async_trait]
impl StateStore for Box<dyn StateStore> {
    async fn load(&self) -> Result<Option<StackState>> {
        (**self).load().await
    }

    async fn save(&self, state: &StackState) -> Result<()> {
        (**self).save(state).await
    }

    async fn delete(&self) -> Result<()> {
        (**self).delete().await
    }

    async fn acquire_lock(&self, holder: &str, operation: &str) -> Result<LockInfo> {
        (**self).acquire_lock(holder, operation).await
    }

    async fn release_lock(&self, lock_id: &str) -> Result<()> {
        (**self).release_lock(lock_id).await
    }

    async fn force_unlock(&self) -> Result<()> {
        (**self).force_unlock().await
    }

    async fn lock_info(&self) -> Result<Option<LockInfo>> {
        (**self).lock_info().await
    }

    fn backend_type(&self) -> &'static str {
        (**self).backend_type()
    }

    fn location(&self) -> String {
        (**self).location()
    }
}
