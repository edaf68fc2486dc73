//! Advisory state lock.
//!
//! A lock is a small JSON record stored next to the state. It expires on its
//! own so a crashed run never blocks the stack for good.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StateError;

/// Lock lifetime in seconds.
pub const LOCK_EXPIRY_SECS: i64 = 300;

/// A held state lock.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LockInfo {
    /// Unique lock identifier, required to release.
    pub lock_id: String,
    /// Who holds the lock.
    pub holder: String,
    /// Operation running under the lock.
    #[serde(default)]
    pub operation: Option<String>,
    /// When the lock was acquired.
    pub acquired_at: DateTime<Utc>,
    /// When the lock expires.
    pub expires_at: DateTime<Utc>,
}

impl LockInfo {
    /// Creates a lock for `holder`, expiring after [`LOCK_EXPIRY_SECS`].
    #[must_use]
    pub fn new(holder: &str) -> Self {
        let now = Utc::now();
        Self {
            lock_id: Uuid::new_v4().to_string(),
            holder: holder.to_string(),
            operation: None,
            acquired_at: now,
            expires_at: now + Duration::seconds(LOCK_EXPIRY_SECS),
        }
    }

    /// Sets the operation label.
    #[must_use]
    pub fn for_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = Some(operation.into());
        self
    }

    /// Checks if the lock has expired.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }

    /// Returns the seconds left before expiry.
    #[must_use]
    pub fn remaining_secs(&self) -> i64 {
        (self.expires_at - Utc::now()).num_seconds().max(0)
    }

    /// Fails with [`StateError::LockedByOther`] unless the lock has expired.
    ///
    /// # Errors
    ///
    /// Returns an error while the lock is still live.
    pub fn ensure_expired(&self) -> Result<(), StateError> {
        if self.is_expired() {
            Ok(())
        } else {
            Err(StateError::LockedByOther {
                holder: self.holder.clone(),
                since: self.acquired_at.to_rfc3339(),
            })
        }
    }

    /// Parses a stored lock record.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Corrupted`] if the record is not valid JSON.
    pub fn from_json(content: &str) -> Result<Self, StateError> {
        serde_json::from_str(content).map_err(|e| StateError::Corrupted {
            message: format!("Failed to parse lock: {e}"),
        })
    }

    /// Serializes the lock record.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, StateError> {
        serde_json::to_string_pretty(self)
            .map_err(|e| StateError::serialization(format!("Failed to serialize lock: {e}")))
    }
}

/// Generates a holder identifier for the current process.
///
/// The format is `<hostname>-<pid>-<8 hex chars>`.
#[must_use]
pub fn generate_holder_id() -> String {
    let hostname = hostname::get()
        .map_or_else(|_| String::from("unknown"), |h| h.to_string_lossy().to_string());
    let pid = std::process::id();
    let suffix = Uuid::new_v4().simple().to_string();

    format!("{hostname}-{pid}-{}", &suffix[..8])
}
