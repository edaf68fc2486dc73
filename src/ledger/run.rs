//! The run-scoped ledger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::error::StateError;
use crate::planner::DependencyGraph;
use crate::provider::ProviderHandle;
use crate::resource::{ResourceId, ResourceKind};

use super::entry::{EntryStatus, LedgerEntry};

/// Direction of a run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunOperation {
    /// Create every resource.
    Create,
    /// Delete every resource.
    Destroy,
}

impl std::fmt::Display for RunOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let op = match self {
            Self::Create => "create",
            Self::Destroy => "destroy",
        };
        write!(f, "{op}")
    }
}

/// One recorded status transition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerEvent {
    /// Strictly increasing position in the run.
    pub seq: u64,
    /// Resource that transitioned.
    pub resource_id: ResourceId,
    /// Status entered.
    pub status: EntryStatus,
    /// When the transition was recorded.
    pub at: DateTime<Utc>,
}

/// Record of every resource touched by one run.
///
/// All updates go through `&mut self`, so whoever owns the ledger is its
/// single writer and every transition is linearized in `events`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunLedger {
    /// Run identifier.
    pub run_id: Uuid,
    /// Direction of the run.
    pub operation: RunOperation,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run finished.
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    entries: BTreeMap<ResourceId, LedgerEntry>,
    #[serde(default)]
    events: Vec<LedgerEvent>,
}

impl RunLedger {
    /// Creates a ledger with a pending entry per resource.
    #[must_use]
    pub fn new<I>(operation: RunOperation, resources: I) -> Self
    where
        I: IntoIterator<Item = (ResourceId, ResourceKind)>,
    {
        let entries = resources
            .into_iter()
            .map(|(id, kind)| (id.clone(), LedgerEntry::new(id, kind)))
            .collect();

        Self {
            run_id: Uuid::new_v4(),
            operation,
            started_at: Utc::now(),
            finished_at: None,
            entries,
            events: Vec::new(),
        }
    }

    /// Creates a ledger covering every resource of a graph.
    #[must_use]
    pub fn for_graph(operation: RunOperation, graph: &DependencyGraph) -> Self {
        Self::new(
            operation,
            graph.iter().map(|d| (d.id().clone(), d.kind())),
        )
    }

    /// Returns the entry of a resource.
    #[must_use]
    pub fn entry(&self, id: &ResourceId) -> Option<&LedgerEntry> {
        self.entries.get(id)
    }

    /// Returns the status of a resource.
    #[must_use]
    pub fn status(&self, id: &ResourceId) -> Option<EntryStatus> {
        self.entries.get(id).map(|e| e.status)
    }

    /// Iterates entries in id order.
    pub fn entries(&self) -> impl Iterator<Item = &LedgerEntry> {
        self.entries.values()
    }

    /// Returns the linearized transition history.
    #[must_use]
    pub fn events(&self) -> &[LedgerEvent] {
        &self.events
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the ledger has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Counts entries in a status.
    #[must_use]
    pub fn count(&self, status: EntryStatus) -> usize {
        self.entries.values().filter(|e| e.status == status).count()
    }

    /// Returns every recorded handle, including those of deleted resources.
    #[must_use]
    pub fn handles(&self) -> BTreeMap<ResourceId, ProviderHandle> {
        self.entries
            .iter()
            .filter_map(|(id, e)| e.provider_handle.clone().map(|h| (id.clone(), h)))
            .collect()
    }

    /// Returns the handle of a resource.
    #[must_use]
    pub fn handle(&self, id: &ResourceId) -> Option<&ProviderHandle> {
        self.entries.get(id).and_then(|e| e.provider_handle.as_ref())
    }

    /// Returns resources left `InProgress` or `Deleting`.
    #[must_use]
    pub fn non_terminal(&self) -> Vec<&ResourceId> {
        self.entries
            .values()
            .filter(|e| e.status.is_transient())
            .map(|e| &e.resource_id)
            .collect()
    }

    /// Returns resources whose compensation or deletion needs a human.
    #[must_use]
    pub fn manual_cleanup(&self) -> Vec<ResourceId> {
        self.entries
            .values()
            .filter(|e| e.needs_manual_cleanup())
            .map(|e| e.resource_id.clone())
            .collect()
    }

    /// Marks a resource `InProgress`.
    ///
    /// # Errors
    ///
    /// Returns an error if the resource is unknown or not `Pending`.
    pub fn start(&mut self, id: &ResourceId) -> Result<(), StateError> {
        let entry = self.transition(id, EntryStatus::InProgress)?;
        entry.started_at = Some(Utc::now());
        Ok(())
    }

    /// Marks a resource `Ready` with its handle.
    ///
    /// # Errors
    ///
    /// Returns an error if the handle is empty or the transition is invalid.
    pub fn mark_ready(
        &mut self,
        id: &ResourceId,
        handle: ProviderHandle,
        attempts: u32,
    ) -> Result<(), StateError> {
        if handle.is_empty() {
            return Err(StateError::InvalidTransition {
                resource: id.clone(),
                from: self.describe(id),
                to: String::from("ready (empty handle)"),
            });
        }
        let entry = self.transition(id, EntryStatus::Ready)?;
        entry.provider_handle = Some(handle);
        entry.attempts = entry.attempts.saturating_add(attempts);
        entry.finished_at = Some(Utc::now());
        Ok(())
    }

    /// Marks a resource `Failed`.
    ///
    /// A handle is recorded when the resource was created before failing.
    ///
    /// # Errors
    ///
    /// Returns an error if the transition is invalid.
    pub fn mark_failed(
        &mut self,
        id: &ResourceId,
        error: impl Into<String>,
        handle: Option<ProviderHandle>,
        attempts: u32,
    ) -> Result<(), StateError> {
        let entry = self.transition(id, EntryStatus::Failed)?;
        entry.error = Some(error.into());
        if handle.is_some() {
            entry.provider_handle = handle;
        }
        entry.attempts = entry.attempts.saturating_add(attempts);
        entry.finished_at = Some(Utc::now());
        Ok(())
    }

    /// Marks a resource `Deleting`.
    ///
    /// # Errors
    ///
    /// Returns an error if the resource is not `Pending` or `Ready`.
    pub fn begin_delete(&mut self, id: &ResourceId) -> Result<(), StateError> {
        let entry = self.transition(id, EntryStatus::Deleting)?;
        if entry.started_at.is_none() {
            entry.started_at = Some(Utc::now());
        }
        Ok(())
    }

    /// Marks a resource `Deleted`, keeping its handle for audit.
    ///
    /// # Errors
    ///
    /// Returns an error if the resource is not `Deleting` or `Pending`.
    pub fn mark_deleted(&mut self, id: &ResourceId, attempts: u32) -> Result<(), StateError> {
        let entry = self.transition(id, EntryStatus::Deleted)?;
        entry.attempts = entry.attempts.saturating_add(attempts);
        entry.finished_at = Some(Utc::now());
        Ok(())
    }

    /// Records that a `Failed` resource created before failing was deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if the resource is not `Failed`.
    pub fn mark_cleaned_up(&mut self, id: &ResourceId, attempts: u32) -> Result<(), StateError> {
        if self.status(id) != Some(EntryStatus::Failed) {
            return Err(StateError::InvalidTransition {
                resource: id.clone(),
                from: self.describe(id),
                to: String::from("cleaned up"),
            });
        }
        if let Some(entry) = self.entries.get_mut(id) {
            entry.cleaned_up = true;
            entry.attempts = entry.attempts.saturating_add(attempts);
            entry.finished_at = Some(Utc::now());
        }
        Ok(())
    }

    /// Records a failed compensating deletion, returning the resource to `Ready`.
    ///
    /// # Errors
    ///
    /// Returns an error if the resource is not `Deleting`.
    pub fn restore_ready(
        &mut self,
        id: &ResourceId,
        rollback_error: impl Into<String>,
        attempts: u32,
    ) -> Result<(), StateError> {
        let entry = self.transition(id, EntryStatus::Ready)?;
        entry.rollback_error = Some(rollback_error.into());
        entry.attempts = entry.attempts.saturating_add(attempts);
        entry.finished_at = Some(Utc::now());
        Ok(())
    }

    /// Records a compensation problem without changing status.
    ///
    /// # Errors
    ///
    /// Returns an error if the resource is unknown.
    pub fn note_rollback_error(
        &mut self,
        id: &ResourceId,
        rollback_error: impl Into<String>,
    ) -> Result<(), StateError> {
        let entry = self
            .entries
            .get_mut(id)
            .ok_or_else(|| StateError::UnknownEntry {
                resource: id.clone(),
            })?;
        entry.rollback_error = Some(rollback_error.into());
        Ok(())
    }

    /// Records a handle known before the run, such as one from a prior run.
    ///
    /// # Errors
    ///
    /// Returns an error if the resource is unknown.
    pub fn assign_handle(
        &mut self,
        id: &ResourceId,
        handle: ProviderHandle,
    ) -> Result<(), StateError> {
        let entry = self
            .entries
            .get_mut(id)
            .ok_or_else(|| StateError::UnknownEntry {
                resource: id.clone(),
            })?;
        entry.provider_handle = Some(handle);
        Ok(())
    }

    /// Adds provider calls to a resource without changing status.
    pub fn add_attempts(&mut self, id: &ResourceId, attempts: u32) {
        if let Some(entry) = self.entries.get_mut(id) {
            entry.attempts = entry.attempts.saturating_add(attempts);
        }
    }

    /// Stamps the end of the run.
    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    fn describe(&self, id: &ResourceId) -> String {
        self.status(id)
            .map_or_else(|| String::from("unknown"), |s| s.to_string())
    }

    fn transition(
        &mut self,
        id: &ResourceId,
        next: EntryStatus,
    ) -> Result<&mut LedgerEntry, StateError> {
        let seq = self.events.len() as u64;
        let entry = self
            .entries
            .get_mut(id)
            .ok_or_else(|| StateError::UnknownEntry {
                resource: id.clone(),
            })?;

        if !entry.status.can_transition_to(next) {
            return Err(StateError::InvalidTransition {
                resource: id.clone(),
                from: entry.status.to_string(),
                to: next.to_string(),
            });
        }

        entry.status = next;
        if next != EntryStatus::Failed {
            entry.error = None;
        }
        self.events.push(LedgerEvent {
            seq,
            resource_id: id.clone(),
            status: next,
            at: Utc::now(),
        });
        Ok(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger() -> RunLedger {
        RunLedger::new(
            RunOperation::Create,
            [
                (ResourceId::new("r1"), ResourceKind::Role),
                (ResourceId::new("f1"), ResourceKind::Function),
            ],
        )
    }

    #[test]
    fn test_create_path() {
        let mut ledger = ledger();
        let r1 = ResourceId::new("r1");

        ledger.start(&r1).unwrap();
        ledger
            .mark_ready(&r1, ProviderHandle::new("arn:aws:iam::1:role/r"), 2)
            .unwrap();

        let entry = ledger.entry(&r1).unwrap();
        assert_eq!(entry.status, EntryStatus::Ready);
        assert_eq!(entry.attempts, 2);
        assert!(entry.started_at.is_some());
        assert_eq!(ledger.events().len(), 2);
        assert_eq!(ledger.events()[1].seq, 1);
    }

    #[test]
    fn test_ready_requires_handle() {
        let mut ledger = ledger();
        let r1 = ResourceId::new("r1");
        ledger.start(&r1).unwrap();

        let err = ledger.mark_ready(&r1, ProviderHandle::new(""), 1).unwrap_err();
        assert!(matches!(err, StateError::InvalidTransition { .. }));
        assert_eq!(ledger.status(&r1), Some(EntryStatus::InProgress));
    }

    #[test]
    fn test_invalid_transition_rejected() {
        let mut ledger = ledger();
        let err = ledger
            .mark_ready(&ResourceId::new("f1"), ProviderHandle::new("arn:x"), 1)
            .unwrap_err();
        assert!(matches!(err, StateError::InvalidTransition { .. }));
        assert!(ledger.events().is_empty());
    }

    #[test]
    fn test_unknown_entry() {
        let mut ledger = ledger();
        let err = ledger.start(&ResourceId::new("ghost")).unwrap_err();
        assert!(matches!(err, StateError::UnknownEntry { .. }));
    }

    #[test]
    fn test_failed_keeps_error_and_handle() {
        let mut ledger = ledger();
        let f1 = ResourceId::new("f1");
        ledger.start(&f1).unwrap();
        ledger
            .mark_failed(&f1, "timed out", Some(ProviderHandle::new("arn:fn")), 4)
            .unwrap();

        let entry = ledger.entry(&f1).unwrap();
        assert_eq!(entry.error.as_deref(), Some("timed out"));
        assert!(entry.may_exist());
        assert_eq!(ledger.handles().len(), 1);

        ledger.mark_cleaned_up(&f1, 1).unwrap();
        let entry = ledger.entry(&f1).unwrap();
        assert_eq!(entry.status, EntryStatus::Failed);
        assert!(!entry.may_exist());
        assert_eq!(entry.attempts, 5);
    }

    #[test]
    fn test_rollback_failure_restores_ready() {
        let mut ledger = ledger();
        let r1 = ResourceId::new("r1");
        ledger.start(&r1).unwrap();
        ledger.mark_ready(&r1, ProviderHandle::new("arn:role"), 1).unwrap();
        ledger.begin_delete(&r1).unwrap();
        assert_eq!(ledger.non_terminal(), vec![&r1]);

        ledger.restore_ready(&r1, "delete refused", 1).unwrap();
        assert_eq!(ledger.status(&r1), Some(EntryStatus::Ready));
        assert!(ledger.non_terminal().is_empty());
        assert_eq!(ledger.manual_cleanup(), vec![r1]);
    }

    #[test]
    fn test_deleted_keeps_handle() {
        let mut ledger = ledger();
        let r1 = ResourceId::new("r1");
        ledger.start(&r1).unwrap();
        ledger.mark_ready(&r1, ProviderHandle::new("arn:role"), 1).unwrap();
        ledger.begin_delete(&r1).unwrap();
        ledger.mark_deleted(&r1, 2).unwrap();

        let entry = ledger.entry(&r1).unwrap();
        assert_eq!(entry.status, EntryStatus::Deleted);
        assert_eq!(entry.provider_handle, Some(ProviderHandle::new("arn:role")));
        assert!(!entry.may_exist());
        assert_eq!(entry.attempts, 3);
    }
}
