//! The coordinator that walks the dependency graph.
//!
//! A single coordinating task owns the run ledger. It advances the graph
//! frontier, dispatches eligible nodes to a bounded pool of worker tasks,
//! and applies their results one at a time, so every ledger update is
//! linearized.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{FngateError, Result};
use crate::ledger::{EntryStatus, RunLedger, RunOperation};
use crate::planner::DependencyGraph;
use crate::provider::{DependencyHandles, ProviderHandle, ProviderRegistry};
use crate::resource::ResourceId;

use super::config::OrchestratorConfig;
use super::report::{RunReport, RunStatus};
use super::worker::{CreateTask, DeleteTask, NodeOutcome, NodeResult, isolate};

/// Executes create and destroy runs over a dependency graph.
#[derive(Debug, Clone)]
pub struct Orchestrator {
    registry: Arc<ProviderRegistry>,
    config: OrchestratorConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeleteMode {
    /// Compensation after a failed create run.
    Rollback,
    /// A destroy run.
    Destroy,
}

/// Conditions that stop a destroy run from dispatching more work.
struct StopSignal<'a> {
    token: &'a CancellationToken,
    deadline: Option<Instant>,
}

impl StopSignal<'_> {
    fn reason(&self) -> Option<&'static str> {
        if self.token.is_cancelled() {
            return Some("run cancelled");
        }
        match self.deadline {
            Some(at) if Instant::now() >= at => Some("run timed out"),
            _ => None,
        }
    }
}

/// What a deletion pass left behind.
#[derive(Debug, Default)]
struct DeletePass {
    /// Targets never started, with the undeleted dependents holding them.
    blocked: Vec<(ResourceId, Vec<ResourceId>)>,
    /// Why dispatching stopped early, if it did.
    interrupted: Option<&'static str>,
}

impl Orchestrator {
    /// Creates an orchestrator.
    #[must_use]
    pub const fn new(registry: Arc<ProviderRegistry>, config: OrchestratorConfig) -> Self {
        Self { registry, config }
    }

    /// Returns the orchestrator settings.
    #[must_use]
    pub const fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Creates every resource in dependency order.
    ///
    /// On the first terminal failure, cancellation, or run timeout no new
    /// node is started; in-flight nodes settle, then everything created so
    /// far is deleted in reverse dependency order.
    ///
    /// # Errors
    ///
    /// Returns an error if a resource kind has no adapter; this is checked
    /// before any provider call. Node failures are reported in the
    /// [`RunReport`], not as errors.
    pub async fn create(
        &self,
        graph: &DependencyGraph,
        cancel: &CancellationToken,
    ) -> Result<RunReport> {
        self.registry.ensure_covers(&graph.kinds())?;

        let mut ledger = RunLedger::for_graph(RunOperation::Create, graph);
        info!(run_id = %ledger.run_id, resources = graph.len(), "Starting create run");

        let cause = self.create_pass(graph, &mut ledger, cancel).await?;

        let status = match &cause {
            None => RunStatus::Succeeded,
            Some(cause) => {
                warn!(cause = %cause, "Create run failed, rolling back");
                self.rollback(graph, &mut ledger).await?;
                if ledger.manual_cleanup().is_empty() {
                    RunStatus::FailedRolledBack
                } else {
                    RunStatus::FailedPartialState
                }
            }
        };

        Self::finish(ledger, graph.creation_order(), status, cause)
    }

    /// Deletes every resource in reverse dependency order.
    ///
    /// `handles` are the handles recorded by a prior run. Resources with no
    /// recorded handle are marked deleted without a provider call. A failed
    /// deletion does not roll anything back; the report lists what remains.
    ///
    /// # Errors
    ///
    /// Returns an error if a resource kind has no adapter.
    pub async fn destroy(
        &self,
        graph: &DependencyGraph,
        handles: &BTreeMap<ResourceId, ProviderHandle>,
        cancel: &CancellationToken,
    ) -> Result<RunReport> {
        self.registry.ensure_covers(&graph.kinds())?;

        let mut ledger = RunLedger::for_graph(RunOperation::Destroy, graph);
        info!(run_id = %ledger.run_id, resources = graph.len(), "Starting destroy run");

        let order = graph.deletion_order();
        let mut targets = BTreeMap::new();
        for id in &order {
            match handles.get(id) {
                Some(handle) if !handle.is_empty() => {
                    ledger.assign_handle(id, handle.clone())?;
                    targets.insert(id.clone(), handle.clone());
                }
                _ => {
                    debug!(resource = %id, "No recorded handle, nothing to delete");
                    ledger.mark_deleted(id, 0)?;
                }
            }
        }

        let stop = StopSignal {
            token: cancel,
            deadline: self.config.run_timeout.map(|t| Instant::now() + t),
        };
        let pass = self
            .delete_pass(graph, &mut ledger, &targets, DeleteMode::Destroy, Some(&stop))
            .await?;

        let remaining = ledger.len() - ledger.count(EntryStatus::Deleted);
        let (status, cause) = if remaining == 0 {
            (RunStatus::Succeeded, None)
        } else {
            let first_error = order.iter().find_map(|id| {
                ledger
                    .entry(id)
                    .and_then(|e| e.error.as_ref().map(|err| format!("{id}: {err}")))
            });
            let cause = first_error
                .or_else(|| pass.interrupted.map(String::from))
                .unwrap_or_else(|| format!("{remaining} resource(s) not deleted"));
            (RunStatus::FailedPartialState, Some(cause))
        };

        Self::finish(ledger, &order, status, cause)
    }

    /// Runs the creation pass and returns the first failure, if any.
    async fn create_pass(
        &self,
        graph: &DependencyGraph,
        ledger: &mut RunLedger,
        cancel: &CancellationToken,
    ) -> Result<Option<String>> {
        let run_token = cancel.child_token();
        let run_timeout = self.config.run_timeout;
        let expiry = async move {
            match run_timeout {
                Some(timeout) => tokio::time::sleep(timeout).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(expiry);

        let mut waiting: Vec<ResourceId> = graph.creation_order().to_vec();
        let mut tasks: JoinSet<NodeResult> = JoinSet::new();
        let mut cause: Option<String> = None;

        loop {
            if cause.is_none() && run_token.is_cancelled() {
                warn!("Run cancelled before completion");
                cause = Some(String::from("run cancelled"));
            }
            if cause.is_none() {
                self.dispatch_creates(graph, ledger, &mut waiting, &mut tasks, &run_token)?;
            }
            if tasks.is_empty() {
                break;
            }

            tokio::select! {
                joined = tasks.join_next() => {
                    let Some(joined) = joined else { break };
                    let result = joined.map_err(|e| {
                        FngateError::internal(format!("coordinator lost a worker: {e}"))
                    })?;
                    Self::apply_create(ledger, result, &mut cause)?;
                }
                () = run_token.cancelled(), if cause.is_none() => {
                    warn!(in_flight = tasks.len(), "Run cancelled, waiting for in-flight work");
                    cause = Some(String::from("run cancelled"));
                }
                () = &mut expiry, if cause.is_none() && run_timeout.is_some() => {
                    warn!(in_flight = tasks.len(), "Run timed out, waiting for in-flight work");
                    cause = Some(format!(
                        "run timed out after {}s",
                        run_timeout.map_or(0, |t| t.as_secs())
                    ));
                    run_token.cancel();
                }
            }
        }

        Ok(cause)
    }

    /// Starts every waiting node whose dependencies are all `Ready`.
    fn dispatch_creates(
        &self,
        graph: &DependencyGraph,
        ledger: &mut RunLedger,
        waiting: &mut Vec<ResourceId>,
        tasks: &mut JoinSet<NodeResult>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let limit = self.config.max_concurrency.max(1);
        let mut index = 0;

        while index < waiting.len() && tasks.len() < limit {
            let Some(descriptor) = graph.descriptor(&waiting[index]) else {
                waiting.remove(index);
                continue;
            };
            let eligible = descriptor
                .dependencies()
                .iter()
                .all(|dep| ledger.status(dep) == Some(EntryStatus::Ready));
            if !eligible {
                index += 1;
                continue;
            }

            let id = waiting.remove(index);
            let deps: DependencyHandles = descriptor
                .dependencies()
                .iter()
                .filter_map(|dep| ledger.handle(dep).map(|h| (dep.clone(), h.clone())))
                .collect();
            let adapter = self.registry.adapter_for(descriptor.kind())?;

            ledger.start(&id)?;
            debug!(resource = %id, kind = %descriptor.kind(), "Dispatching create");

            let task = CreateTask {
                adapter,
                descriptor: descriptor.clone(),
                deps,
                retry: self.config.retry.clone(),
                ready_timeout: self.config.ready_timeout,
                cancel: cancel.clone(),
            };
            tasks.spawn(isolate(id, false, task.run()));
        }
        Ok(())
    }

    fn apply_create(
        ledger: &mut RunLedger,
        result: NodeResult,
        cause: &mut Option<String>,
    ) -> Result<()> {
        let id = result.id;
        match result.outcome {
            NodeOutcome::Created { handle, attempts } => {
                ledger.mark_ready(&id, handle, attempts)?;
            }
            NodeOutcome::CreateFailed {
                error,
                handle,
                attempts,
            } => {
                error!(resource = %id, attempts, error = %error, "Resource failed");
                if cause.is_none() {
                    *cause = Some(format!("{id}: {error}"));
                }
                ledger.mark_failed(&id, error.to_string(), handle, attempts)?;
            }
            NodeOutcome::Deleted { .. } | NodeOutcome::DeleteFailed { .. } => {
                return Err(FngateError::internal(format!(
                    "deletion outcome for '{id}' during a create pass"
                )));
            }
        }
        Ok(())
    }

    /// Deletes everything the failed run created.
    ///
    /// Targets are `Ready` resources and `Failed` resources that were
    /// created before failing. Compensation ignores cancellation and the
    /// run timeout.
    async fn rollback(&self, graph: &DependencyGraph, ledger: &mut RunLedger) -> Result<()> {
        let targets: BTreeMap<ResourceId, ProviderHandle> = ledger
            .entries()
            .filter(|e| matches!(e.status, EntryStatus::Ready | EntryStatus::Failed))
            .filter_map(|e| {
                e.provider_handle
                    .clone()
                    .map(|handle| (e.resource_id.clone(), handle))
            })
            .collect();

        info!(resources = targets.len(), "Rolling back created resources");
        let pass = self
            .delete_pass(graph, ledger, &targets, DeleteMode::Rollback, None)
            .await?;

        for (id, blockers) in pass.blocked {
            let names: Vec<&str> = blockers.iter().map(ResourceId::as_str).collect();
            warn!(resource = %id, blocked_by = ?names, "Rollback blocked, manual cleanup required");
            ledger.note_rollback_error(&id, format!("blocked by {}", names.join(", ")))?;
        }
        Ok(())
    }

    /// Deletes `targets`, each only after its targeted dependents are gone.
    async fn delete_pass(
        &self,
        graph: &DependencyGraph,
        ledger: &mut RunLedger,
        targets: &BTreeMap<ResourceId, ProviderHandle>,
        mode: DeleteMode,
        stop: Option<&StopSignal<'_>>,
    ) -> Result<DeletePass> {
        let limit = self.config.max_concurrency.max(1);
        let mut waiting: Vec<ResourceId> = graph
            .deletion_order()
            .into_iter()
            .filter(|id| targets.contains_key(id))
            .collect();
        let mut deleted: BTreeSet<ResourceId> = BTreeSet::new();
        let mut tasks: JoinSet<NodeResult> = JoinSet::new();
        let mut pass = DeletePass::default();

        loop {
            if pass.interrupted.is_none() {
                pass.interrupted = stop.and_then(StopSignal::reason);
                if let Some(reason) = pass.interrupted {
                    warn!(reason, "Stopping deletion dispatch");
                }
            }

            let mut index = 0;
            while pass.interrupted.is_none() && index < waiting.len() && tasks.len() < limit {
                let id = &waiting[index];
                let clear = graph
                    .dependents(id)
                    .into_iter()
                    .flatten()
                    .all(|d| !targets.contains_key(d) || deleted.contains(d));
                if !clear {
                    index += 1;
                    continue;
                }

                let id = waiting.remove(index);
                let Some((kind, handle)) = graph
                    .descriptor(&id)
                    .map(|d| d.kind())
                    .zip(targets.get(&id).cloned())
                else {
                    continue;
                };
                let adapter = self.registry.adapter_for(kind)?;

                if ledger.status(&id) != Some(EntryStatus::Failed) {
                    ledger.begin_delete(&id)?;
                }
                debug!(resource = %id, kind = %kind, "Dispatching delete");

                let task = DeleteTask {
                    adapter,
                    id: id.clone(),
                    handle,
                    retry: self.config.retry.clone(),
                    gone_timeout: self.config.gone_timeout,
                };
                tasks.spawn(isolate(id, true, task.run()));
            }

            let Some(joined) = tasks.join_next().await else {
                break;
            };
            let result = joined
                .map_err(|e| FngateError::internal(format!("coordinator lost a worker: {e}")))?;
            Self::apply_delete(ledger, result, mode, &mut deleted)?;
        }

        pass.blocked = waiting
            .into_iter()
            .map(|id| {
                let blockers = graph
                    .dependents(&id)
                    .into_iter()
                    .flatten()
                    .filter(|d| targets.contains_key(*d) && !deleted.contains(*d))
                    .cloned()
                    .collect();
                (id, blockers)
            })
            .collect();
        Ok(pass)
    }

    fn apply_delete(
        ledger: &mut RunLedger,
        result: NodeResult,
        mode: DeleteMode,
        deleted: &mut BTreeSet<ResourceId>,
    ) -> Result<()> {
        let id = result.id;
        let was_failed = ledger.status(&id) == Some(EntryStatus::Failed);

        match result.outcome {
            NodeOutcome::Deleted { attempts } => {
                if was_failed {
                    ledger.mark_cleaned_up(&id, attempts)?;
                } else {
                    ledger.mark_deleted(&id, attempts)?;
                }
                deleted.insert(id);
            }
            NodeOutcome::DeleteFailed { error, attempts } => {
                error!(resource = %id, attempts, error = %error, "Delete failed");
                match mode {
                    DeleteMode::Rollback if was_failed => {
                        ledger.add_attempts(&id, attempts);
                        ledger.note_rollback_error(&id, error.to_string())?;
                    }
                    DeleteMode::Rollback => {
                        ledger.restore_ready(&id, error.to_string(), attempts)?;
                    }
                    DeleteMode::Destroy => {
                        ledger.mark_failed(&id, error.to_string(), None, attempts)?;
                    }
                }
            }
            NodeOutcome::Created { .. } | NodeOutcome::CreateFailed { .. } => {
                return Err(FngateError::internal(format!(
                    "creation outcome for '{id}' during a delete pass"
                )));
            }
        }
        Ok(())
    }

    fn finish(
        mut ledger: RunLedger,
        order: &[ResourceId],
        status: RunStatus,
        cause: Option<String>,
    ) -> Result<RunReport> {
        ledger.finish();

        let unsettled = ledger.non_terminal();
        if !unsettled.is_empty() {
            let names: Vec<&str> = unsettled.iter().map(|id| id.as_str()).collect();
            return Err(FngateError::internal(format!(
                "run ended with unsettled resources: {}",
                names.join(", ")
            )));
        }

        info!(
            run_id = %ledger.run_id,
            operation = %ledger.operation,
            status = %status,
            ready = ledger.count(EntryStatus::Ready),
            deleted = ledger.count(EntryStatus::Deleted),
            failed = ledger.count(EntryStatus::Failed),
            "Run finished"
        );
        Ok(RunReport::from_ledger(ledger, order, status, cause))
    }
}
