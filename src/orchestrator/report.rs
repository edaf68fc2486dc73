//! Run outcome reporting.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ledger::{EntryStatus, RunLedger, RunOperation};
use crate::provider::ProviderHandle;
use crate::resource::{ResourceId, ResourceKind};

/// Aggregate status of a run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every node reached its goal state.
    Succeeded,
    /// A failure occurred and compensation removed everything created.
    FailedRolledBack,
    /// A failure occurred and at least one resource was left behind.
    FailedPartialState,
}

impl RunStatus {
    /// Returns the process exit code for this status.
    #[must_use]
    pub const fn exit_code(self) -> i32 {
        match self {
            Self::Succeeded => 0,
            Self::FailedRolledBack => 1,
            Self::FailedPartialState => 2,
        }
    }

    /// Returns true if the run succeeded.
    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Succeeded)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = match self {
            Self::Succeeded => "succeeded",
            Self::FailedRolledBack => "failed (rolled back)",
            Self::FailedPartialState => "failed (partial state)",
        };
        write!(f, "{status}")
    }
}

/// One line of the run report.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ReportEntry {
    /// Resource id.
    pub resource_id: ResourceId,
    /// Resource kind.
    pub kind: ResourceKind,
    /// Terminal status.
    pub status: EntryStatus,
    /// Provider handle, if one was recorded.
    pub provider_handle: Option<ProviderHandle>,
    /// Failure, if the resource failed.
    pub error: Option<String>,
    /// Compensation failure, if any.
    pub rollback_error: Option<String>,
    /// Provider calls made.
    pub attempts: u32,
}

/// Structured result of a run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Run identifier.
    pub run_id: Uuid,
    /// Direction of the run.
    pub operation: RunOperation,
    /// Aggregate status.
    pub status: RunStatus,
    /// First failure or interruption, if any.
    pub cause: Option<String>,
    /// Every resource, in execution order.
    pub entries: Vec<ReportEntry>,
    /// Resources that need cleanup by hand.
    pub manual_cleanup: Vec<ResourceId>,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run finished.
    pub finished_at: Option<DateTime<Utc>>,
    /// Full ledger, kept for persistence.
    #[serde(skip)]
    pub ledger: RunLedger,
}

impl RunReport {
    /// Builds a report from a finished ledger, listing entries in `order`.
    #[must_use]
    pub fn from_ledger(
        ledger: RunLedger,
        order: &[ResourceId],
        status: RunStatus,
        cause: Option<String>,
    ) -> Self {
        let entries = order
            .iter()
            .filter_map(|id| ledger.entry(id))
            .map(|e| ReportEntry {
                resource_id: e.resource_id.clone(),
                kind: e.kind,
                status: e.status,
                provider_handle: e.provider_handle.clone(),
                error: e.error.clone(),
                rollback_error: e.rollback_error.clone(),
                attempts: e.attempts,
            })
            .collect();

        Self {
            run_id: ledger.run_id,
            operation: ledger.operation,
            status,
            cause,
            entries,
            manual_cleanup: ledger.manual_cleanup(),
            started_at: ledger.started_at,
            finished_at: ledger.finished_at,
            ledger,
        }
    }

    /// Returns the entry of a resource.
    #[must_use]
    pub fn entry(&self, id: &str) -> Option<&ReportEntry> {
        self.entries.iter().find(|e| e.resource_id.as_str() == id)
    }

    /// Returns the status of a resource.
    #[must_use]
    pub fn status_of(&self, id: &str) -> Option<EntryStatus> {
        self.entry(id).map(|e| e.status)
    }

    /// Returns the process exit code.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        self.status.exit_code()
    }

    /// Returns the resources not deleted by a destroy run.
    #[must_use]
    pub fn remaining(&self) -> Vec<&ResourceId> {
        self.entries
            .iter()
            .filter(|e| e.status != EntryStatus::Deleted)
            .map(|e| &e.resource_id)
            .collect()
    }

    /// Returns the elapsed wall-clock time in milliseconds.
    #[must_use]
    pub fn duration_ms(&self) -> Option<i64> {
        self.finished_at
            .map(|end| (end - self.started_at).num_milliseconds())
    }
}
