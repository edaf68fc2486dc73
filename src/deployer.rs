//! Stack-level apply, destroy and status.
//!
//! The deployer ties a stack file to its persisted state: it takes the
//! state lock, checks what the last run left behind, drives the
//! orchestrator and records the resulting ledger.

use serde::Serialize;
use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{ConfigHasher, StackConfig};
use crate::error::{Result, RunError};
use crate::ledger::EntryStatus;
use crate::orchestrator::{Orchestrator, RunReport};
use crate::planner::{DependencyGraph, ExecutionPlan};
use crate::provider::ProviderHandle;
use crate::resource::{ResourceId, ResourceKind};
use crate::state::{LockInfo, RunHistoryEntry, StackState, StateStore};

/// Runs stack operations against one state store.
pub struct StackDeployer<'a, S: StateStore> {
    config: &'a StackConfig,
    state_store: &'a S,
    orchestrator: &'a Orchestrator,
    holder: String,
    hasher: ConfigHasher,
}

/// A resource the state says may still exist.
#[derive(Debug, Clone, Serialize)]
pub struct LiveResource {
    /// Resource id.
    pub resource_id: ResourceId,
    /// Resource kind.
    pub kind: ResourceKind,
    /// Last recorded status.
    pub status: EntryStatus,
    /// Provider handle.
    pub provider_handle: Option<ProviderHandle>,
    /// Whether someone has to clean it up by hand.
    pub needs_manual_cleanup: bool,
}

/// Snapshot of a stack for `status`.
#[derive(Debug, Clone, Serialize)]
pub struct StackStatus {
    /// Project name.
    pub project: String,
    /// Environment name.
    pub environment: String,
    /// State backend name.
    pub backend: &'static str,
    /// Where the state lives.
    pub location: String,
    /// Whether any state was recorded.
    pub has_state: bool,
    /// Whether the stack file changed since the last run.
    pub config_changed: bool,
    /// Resources that may still exist.
    pub live: Vec<LiveResource>,
    /// Last recorded run.
    pub last_run: Option<RunHistoryEntry>,
    /// Current lock.
    pub lock: Option<LockInfo>,
}

impl<'a, S: StateStore> StackDeployer<'a, S> {
    /// Creates a deployer.
    #[must_use]
    pub fn new(
        config: &'a StackConfig,
        state_store: &'a S,
        orchestrator: &'a Orchestrator,
        holder: impl Into<String>,
    ) -> Self {
        Self {
            config,
            state_store,
            orchestrator,
            holder: holder.into(),
            hasher: ConfigHasher::new(),
        }
    }

    /// Builds the dependency graph of the stack.
    ///
    /// # Errors
    ///
    /// Returns a graph error for duplicate ids, unknown dependencies or cycles.
    pub fn graph(&self) -> Result<DependencyGraph> {
        Ok(DependencyGraph::build(self.config.descriptors())?)
    }

    /// Previews a create or destroy run.
    ///
    /// # Errors
    ///
    /// Returns an error if the graph cannot be built.
    pub fn plan(&self, destroy: bool) -> Result<ExecutionPlan> {
        let graph = self.graph()?;
        Ok(if destroy {
            ExecutionPlan::destroy(&graph)
        } else {
            ExecutionPlan::create(&graph)
        })
    }

    /// Creates the stack.
    ///
    /// # Errors
    ///
    /// Returns an error if the graph is invalid, the lock is held, the state
    /// still has live resources, or the state cannot be read or written.
    pub async fn apply(&self, cancel: &CancellationToken) -> Result<RunReport> {
        let graph = self.graph()?;
        let lock = self.state_store.acquire_lock(&self.holder, "apply").await?;
        let outcome = self.apply_locked(&graph, cancel).await;
        self.release(&lock).await;
        outcome
    }

    async fn apply_locked(
        &self,
        graph: &DependencyGraph,
        cancel: &CancellationToken,
    ) -> Result<RunReport> {
        let mut state = self.load_or_new().await?;

        let live = state.live_resources().len();
        if live > 0 {
            return Err(RunError::AlreadyDeployed { count: live }.into());
        }

        let report = self.orchestrator.create(graph, cancel).await?;
        self.record(&mut state, &report).await?;
        Ok(report)
    }

    /// Deletes every resource recorded by the last run.
    ///
    /// # Errors
    ///
    /// Returns an error if the graph is invalid, the lock is held, nothing
    /// was recorded, a live recorded resource is missing from the stack
    /// file, or the state cannot be read or written.
    pub async fn destroy(&self, cancel: &CancellationToken) -> Result<RunReport> {
        let graph = self.graph()?;
        let lock = self.state_store.acquire_lock(&self.holder, "destroy").await?;
        let outcome = self.destroy_locked(&graph, cancel).await;
        self.release(&lock).await;
        outcome
    }

    async fn destroy_locked(
        &self,
        graph: &DependencyGraph,
        cancel: &CancellationToken,
    ) -> Result<RunReport> {
        let mut state = self.load_or_new().await?;

        let handles: BTreeMap<ResourceId, ProviderHandle> = state.known_handles();
        if handles.is_empty() {
            return Err(RunError::NothingToDestroy.into());
        }

        let orphaned: Vec<ResourceId> = state
            .live_resources()
            .into_iter()
            .filter(|e| graph.descriptor(&e.resource_id).is_none())
            .map(|e| e.resource_id.clone())
            .collect();
        if !orphaned.is_empty() {
            return Err(RunError::OrphanedResources { ids: orphaned }.into());
        }

        let report = self.orchestrator.destroy(graph, &handles, cancel).await?;
        self.record(&mut state, &report).await?;
        Ok(report)
    }

    /// Describes the recorded state of the stack.
    ///
    /// # Errors
    ///
    /// Returns an error if the state or lock cannot be read.
    pub async fn status(&self) -> Result<StackStatus> {
        let state = self.state_store.load().await?;
        let lock = self.state_store.lock_info().await?;
        let current_hash = self.hasher.hash_config(self.config);

        let live = state
            .as_ref()
            .map(|s| {
                s.live_resources()
                    .into_iter()
                    .map(|e| LiveResource {
                        resource_id: e.resource_id.clone(),
                        kind: e.kind,
                        status: e.status,
                        provider_handle: e.provider_handle.clone(),
                        needs_manual_cleanup: e.needs_manual_cleanup(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(StackStatus {
            project: self.config.project.name.clone(),
            environment: self.config.project.environment.clone(),
            backend: self.state_store.backend_type(),
            location: self.state_store.location(),
            has_state: state.is_some(),
            config_changed: state.as_ref().is_some_and(|s| s.config_changed(&current_hash)),
            live,
            last_run: state.as_ref().and_then(|s| s.last_history().cloned()),
            lock,
        })
    }

    async fn load_or_new(&self) -> Result<StackState> {
        let project = &self.config.project;
        Ok(self
            .state_store
            .load()
            .await?
            .unwrap_or_else(|| StackState::new(&project.name, &project.environment)))
    }

    async fn record(&self, state: &mut StackState, report: &RunReport) -> Result<()> {
        let hash = self.hasher.hash_config(self.config);
        state.record_run(report, &hash);
        self.state_store.save(state).await?;
        info!(
            run_id = %report.run_id,
            status = %report.status,
            "Recorded {} run",
            report.operation
        );
        Ok(())
    }

    async fn release(&self, lock: &LockInfo) {
        if let Err(e) = self.state_store.release_lock(&lock.lock_id).await {
            warn!("Failed to release state lock {}: {e}", lock.lock_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigParser;
    use crate::error::FngateError;
    use crate::orchestrator::{OrchestratorConfig, RetryPolicy, RunStatus};
    use crate::provider::{ProviderRegistry, SandboxConfig, SandboxProvider};
    use crate::state::LocalStateStore;
    use std::sync::Arc;
    use tempfile::TempDir;

    const STACK: &str = r"
project:
  name: shop
resources:
  - id: r1
    kind: role
    name: shop-role
  - id: f1
    kind: function
    name: shop-fn
    role: r1
    code: {source: zip_file, path: build/handler.zip}
  - id: g1
    kind: gateway
    name: shop-api
  - id: b1
    kind: gateway_binding
    function: f1
    gateway: g1
    path: /orders
";

    struct Fixture {
        config: StackConfig,
        store: LocalStateStore,
        orchestrator: Orchestrator,
        sandbox: Arc<SandboxProvider>,
        _temp: TempDir,
    }

    fn fixture(yaml: &str) -> Fixture {
        let temp = TempDir::new().unwrap();
        let config = ConfigParser::new().parse_yaml(yaml, None).unwrap();
        let sandbox = Arc::new(SandboxProvider::new(SandboxConfig {
            faults: config.sandbox_config().faults,
            ..SandboxConfig::default()
        }));
        let registry = Arc::new(ProviderRegistry::uniform(sandbox.clone()));
        let orchestrator = Orchestrator::new(
            registry,
            OrchestratorConfig::default().with_retry(RetryPolicy::immediate(2)),
        );
        Fixture {
            config,
            store: LocalStateStore::with_base_dir(temp.path()),
            orchestrator,
            sandbox,
            _temp: temp,
        }
    }

    impl Fixture {
        fn deployer(&self) -> StackDeployer<'_, LocalStateStore> {
            StackDeployer::new(&self.config, &self.store, &self.orchestrator, "test")
        }
    }

    #[tokio::test]
    async fn test_apply_records_state_and_releases_lock() {
        let fx = fixture(STACK);
        let report = fx.deployer().apply(&CancellationToken::new()).await.unwrap();
        assert_eq!(report.status, RunStatus::Succeeded);

        let status = fx.deployer().status().await.unwrap();
        assert!(status.has_state);
        assert!(!status.config_changed);
        assert_eq!(status.live.len(), 4);
        assert!(status.lock.is_none());
        assert_eq!(status.last_run.unwrap().status, RunStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_second_apply_is_refused() {
        let fx = fixture(STACK);
        fx.deployer().apply(&CancellationToken::new()).await.unwrap();

        let err = fx.deployer().apply(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, FngateError::Run(RunError::AlreadyDeployed { count: 4 })));
        assert!(fx.store.lock_info().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_destroy_uses_recorded_handles() {
        let fx = fixture(STACK);
        fx.deployer().apply(&CancellationToken::new()).await.unwrap();

        let report = fx.deployer().destroy(&CancellationToken::new()).await.unwrap();
        assert_eq!(report.status, RunStatus::Succeeded);
        assert!(fx.sandbox.live_resources().await.is_empty());

        let status = fx.deployer().status().await.unwrap();
        assert!(status.live.is_empty());

        let again = fx.deployer().destroy(&CancellationToken::new()).await.unwrap();
        assert_eq!(again.status, RunStatus::Succeeded);

        fx.deployer().apply(&CancellationToken::new()).await.unwrap();
    }

    #[tokio::test]
    async fn test_destroy_refuses_resources_dropped_from_stack_file() {
        let extended = format!("{STACK}  - id: g2\n    kind: gateway\n    name: shop-admin\n");
        let fx = fixture(&extended);
        fx.deployer().apply(&CancellationToken::new()).await.unwrap();

        let trimmed = ConfigParser::new().parse_yaml(STACK, None).unwrap();
        let deployer = StackDeployer::new(&trimmed, &fx.store, &fx.orchestrator, "test");
        let err = deployer.destroy(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(
            &err,
            FngateError::Run(RunError::OrphanedResources { ids }) if ids == &[ResourceId::new("g2")]
        ));
        assert!(err.to_string().contains("g2"));

        assert_eq!(fx.sandbox.live_resources().await.len(), 5);
        assert!(fx.store.lock_info().await.unwrap().is_none());
        let status = deployer.status().await.unwrap();
        assert_eq!(status.live.len(), 5);

        let report = fx.deployer().destroy(&CancellationToken::new()).await.unwrap();
        assert_eq!(report.status, RunStatus::Succeeded);
        assert!(fx.sandbox.live_resources().await.is_empty());

        let again = deployer.destroy(&CancellationToken::new()).await.unwrap();
        assert_eq!(again.status, RunStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_destroy_without_state_is_an_error() {
        let fx = fixture(STACK);
        let err = fx.deployer().destroy(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, FngateError::Run(RunError::NothingToDestroy)));
    }

    #[tokio::test]
    async fn test_rolled_back_apply_leaves_nothing_live() {
        let yaml = format!("{STACK}\nsandbox:\n  faults:\n    - resource: b1\n      type: fail_create\n");
        let fx = fixture(&yaml);

        let report = fx.deployer().apply(&CancellationToken::new()).await.unwrap();
        assert_eq!(report.status, RunStatus::FailedRolledBack);

        let status = fx.deployer().status().await.unwrap();
        assert!(status.live.is_empty());
        assert_eq!(status.last_run.unwrap().status, RunStatus::FailedRolledBack);
    }

    #[tokio::test]
    async fn test_held_lock_blocks_apply() {
        let fx = fixture(STACK);
        let _held = fx.store.acquire_lock("other", "apply").await.unwrap();

        let err = fx.deployer().apply(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(
            err,
            FngateError::State(crate::error::StateError::LockedByOther { .. })
        ));
        assert!(fx.sandbox.events().await.is_empty());
    }

    #[tokio::test]
    async fn test_plan_and_graph_errors() {
        let fx = fixture(STACK);
        let plan = fx.deployer().plan(true).unwrap();
        assert_eq!(plan.step_count(), 4);

        let broken = STACK.replace("role: r1", "role: r9");
        let fx = fixture(&broken);
        assert!(matches!(fx.deployer().plan(false), Err(FngateError::Graph(_))));
    }
}
