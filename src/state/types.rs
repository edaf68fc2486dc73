//! Persisted stack state.
//!
//! The state keeps the ledger of the most recent run, which is where the
//! next destroy finds its provider handles, and a bounded history of runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ledger::{LedgerEntry, RunLedger, RunOperation};
use crate::orchestrator::{RunReport, RunStatus};
use crate::provider::ProviderHandle;
use crate::resource::ResourceId;

/// Current version of the state format.
pub const STATE_VERSION: &str = "1";

/// Number of history entries kept.
pub const MAX_HISTORY: usize = 100;

/// State of one deployed stack.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackState {
    /// State format version.
    pub version: String,
    /// Project name.
    pub project: String,
    /// Environment name.
    pub environment: String,
    /// Hash of the configuration used by the last run.
    pub config_hash: String,
    /// Ledger of the last run.
    #[serde(default)]
    pub last_run: Option<RunLedger>,
    /// Recent runs, oldest first.
    #[serde(default)]
    pub history: Vec<RunHistoryEntry>,
    /// When the state was last written.
    pub last_updated: DateTime<Utc>,
}

/// Summary of one past run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunHistoryEntry {
    /// Run identifier.
    pub run_id: Uuid,
    /// When the run finished.
    pub timestamp: DateTime<Utc>,
    /// Direction of the run.
    pub operation: RunOperation,
    /// Aggregate status.
    pub status: RunStatus,
    /// Configuration hash at the time of the run.
    pub config_hash: String,
    /// Resources the run touched.
    pub resources: Vec<ResourceId>,
    /// First failure, if any.
    #[serde(default)]
    pub cause: Option<String>,
}

impl StackState {
    /// Creates an empty state.
    #[must_use]
    pub fn new(project: &str, environment: &str) -> Self {
        Self {
            version: STATE_VERSION.to_string(),
            project: project.to_string(),
            environment: environment.to_string(),
            config_hash: String::new(),
            last_run: None,
            history: Vec::new(),
            last_updated: Utc::now(),
        }
    }

    /// Records a finished run as the latest one.
    pub fn record_run(&mut self, report: &RunReport, config_hash: &str) {
        self.history.push(RunHistoryEntry {
            run_id: report.run_id,
            timestamp: report.finished_at.unwrap_or_else(Utc::now),
            operation: report.operation,
            status: report.status,
            config_hash: config_hash.to_string(),
            resources: report.entries.iter().map(|e| e.resource_id.clone()).collect(),
            cause: report.cause.clone(),
        });
        if self.history.len() > MAX_HISTORY {
            let excess = self.history.len() - MAX_HISTORY;
            self.history.drain(..excess);
        }

        self.config_hash = config_hash.to_string();
        self.last_run = Some(report.ledger.clone());
        self.touch();
    }

    /// Returns resources that may still exist at the provider.
    ///
    /// An entry counts when it has a handle and was not deleted.
    #[must_use]
    pub fn live_resources(&self) -> Vec<&LedgerEntry> {
        self.last_run
            .as_ref()
            .map(|ledger| ledger.entries().filter(|e| e.may_exist()).collect())
            .unwrap_or_default()
    }

    /// Returns every handle recorded by the last run.
    #[must_use]
    pub fn known_handles(&self) -> std::collections::BTreeMap<ResourceId, ProviderHandle> {
        self.last_run
            .as_ref()
            .map(RunLedger::handles)
            .unwrap_or_default()
    }

    /// Checks whether the configuration changed since the last run.
    #[must_use]
    pub fn config_changed(&self, current_hash: &str) -> bool {
        self.config_hash != current_hash
    }

    /// Returns the most recent history entry.
    #[must_use]
    pub fn last_history(&self) -> Option<&RunHistoryEntry> {
        self.history.last()
    }

    /// Updates the last-updated timestamp.
    pub fn touch(&mut self) {
        self.last_updated = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::ResourceKind;

    fn ledger_with_two() -> RunLedger {
        let a = ResourceId::new("a");
        let b = ResourceId::new("b");
        let mut ledger = RunLedger::new(
            RunOperation::Create,
            [(a.clone(), ResourceKind::Gateway), (b.clone(), ResourceKind::Gateway)],
        );
        ledger.start(&a).unwrap();
        ledger.mark_ready(&a, ProviderHandle::new("h-a"), 1).unwrap();
        ledger.start(&b).unwrap();
        ledger.mark_ready(&b, ProviderHandle::new("h-b"), 1).unwrap();
        ledger.begin_delete(&b).unwrap();
        ledger.mark_deleted(&b, 1).unwrap();
        ledger.finish();
        ledger
    }

    fn report(ledger: RunLedger, status: RunStatus) -> RunReport {
        let order = [ResourceId::new("a"), ResourceId::new("b")];
        RunReport::from_ledger(ledger, &order, status, Some("boom".to_string()))
    }

    #[test]
    fn test_new_state_is_empty() {
        let state = StackState::new("shop", "dev");
        assert_eq!(state.version, STATE_VERSION);
        assert!(state.live_resources().is_empty());
        assert!(state.known_handles().is_empty());
        assert!(state.config_changed("abc"));
    }

    #[test]
    fn test_record_run_tracks_live_resources() {
        let mut state = StackState::new("shop", "dev");
        state.record_run(&report(ledger_with_two(), RunStatus::FailedPartialState), "abc");

        let live: Vec<_> = state.live_resources().iter().map(|e| e.resource_id.as_str()).collect();
        assert_eq!(live, vec!["a"]);
        assert_eq!(state.known_handles().len(), 2);
        assert!(!state.config_changed("abc"));

        let last = state.last_history().unwrap();
        assert_eq!(last.status, RunStatus::FailedPartialState);
        assert_eq!(last.cause.as_deref(), Some("boom"));
    }

    #[test]
    fn test_history_is_bounded() {
        let mut state = StackState::new("shop", "dev");
        for _ in 0..(MAX_HISTORY + 5) {
            state.record_run(&report(ledger_with_two(), RunStatus::Succeeded), "abc");
        }
        assert_eq!(state.history.len(), MAX_HISTORY);
    }

    #[test]
    fn test_state_round_trips_through_json() {
        let mut state = StackState::new("shop", "dev");
        state.record_run(&report(ledger_with_two(), RunStatus::Succeeded), "abc");

        let json = serde_json::to_string(&state).unwrap();
        let parsed: StackState = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.live_resources().len(), 1);
        assert_eq!(parsed.history, state.history);
    }
}
