//! Per-resource ledger entries and their state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::provider::ProviderHandle;
use crate::resource::{ResourceId, ResourceKind};

/// Status of one resource within a run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    /// Not started.
    Pending,
    /// Create and readiness wait in flight.
    InProgress,
    /// Created and usable by dependents.
    Ready,
    /// Terminal failure.
    Failed,
    /// Delete and gone wait in flight.
    Deleting,
    /// Deleted; the handle is kept for audit only.
    Deleted,
}

impl EntryStatus {
    /// Returns true if the state machine allows moving to `next`.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::InProgress | Self::Deleting | Self::Deleted)
                | (Self::InProgress, Self::Ready | Self::Failed)
                | (Self::Ready, Self::Deleting)
                | (Self::Deleting, Self::Deleted | Self::Failed | Self::Ready)
        )
    }

    /// Returns true for states that must never survive the end of a run.
    #[must_use]
    pub const fn is_transient(self) -> bool {
        matches!(self, Self::InProgress | Self::Deleting)
    }
}

impl std::fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Ready => "ready",
            Self::Failed => "failed",
            Self::Deleting => "deleting",
            Self::Deleted => "deleted",
        };
        write!(f, "{status}")
    }
}

/// The ledger record of one resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerEntry {
    /// Resource id.
    pub resource_id: ResourceId,
    /// Resource kind.
    pub kind: ResourceKind,
    /// Current status.
    pub status: EntryStatus,
    /// Handle returned by the provider, once known.
    #[serde(default)]
    pub provider_handle: Option<ProviderHandle>,
    /// Error that failed the resource; present iff `status` is `Failed`.
    #[serde(default)]
    pub error: Option<String>,
    /// Error from compensating deletion, kept apart from `error`.
    #[serde(default)]
    pub rollback_error: Option<String>,
    /// Set when a `Failed` resource was created and then deleted by rollback.
    #[serde(default)]
    pub cleaned_up: bool,
    /// Provider calls made for this resource.
    pub attempts: u32,
    /// When work on the resource started.
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    /// When the resource last reached a settled state.
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
}

impl LedgerEntry {
    /// Creates a pending entry.
    #[must_use]
    pub const fn new(resource_id: ResourceId, kind: ResourceKind) -> Self {
        Self {
            resource_id,
            kind,
            status: EntryStatus::Pending,
            provider_handle: None,
            error: None,
            rollback_error: None,
            cleaned_up: false,
            attempts: 0,
            started_at: None,
            finished_at: None,
        }
    }

    /// Returns true if the resource may still exist at the provider.
    #[must_use]
    pub const fn may_exist(&self) -> bool {
        self.provider_handle.is_some()
            && !self.cleaned_up
            && !matches!(self.status, EntryStatus::Deleted)
    }

    /// Returns true if cleanup by hand is needed for this resource.
    #[must_use]
    pub const fn needs_manual_cleanup(&self) -> bool {
        self.rollback_error.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_path_transitions() {
        assert!(EntryStatus::Pending.can_transition_to(EntryStatus::InProgress));
        assert!(EntryStatus::InProgress.can_transition_to(EntryStatus::Ready));
        assert!(EntryStatus::InProgress.can_transition_to(EntryStatus::Failed));
        assert!(!EntryStatus::Pending.can_transition_to(EntryStatus::Ready));
        assert!(!EntryStatus::Failed.can_transition_to(EntryStatus::InProgress));
    }

    #[test]
    fn test_delete_path_transitions() {
        assert!(EntryStatus::Ready.can_transition_to(EntryStatus::Deleting));
        assert!(EntryStatus::Deleting.can_transition_to(EntryStatus::Ready));
        assert!(EntryStatus::Pending.can_transition_to(EntryStatus::Deleted));
        assert!(!EntryStatus::Deleted.can_transition_to(EntryStatus::Deleting));
        assert!(!EntryStatus::InProgress.can_transition_to(EntryStatus::Deleting));
    }

    #[test]
    fn test_transient_states() {
        assert!(EntryStatus::InProgress.is_transient());
        assert!(EntryStatus::Deleting.is_transient());
        assert!(!EntryStatus::Failed.is_transient());
    }
}
