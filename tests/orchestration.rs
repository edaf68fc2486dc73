//! End-to-end runs of the orchestrator against the in-memory sandbox.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use fngate_deploy::ledger::EntryStatus;
use fngate_deploy::orchestrator::{Orchestrator, OrchestratorConfig, RetryPolicy, RunStatus};
use fngate_deploy::planner::DependencyGraph;
use fngate_deploy::provider::{
    Fault, ProviderHandle, ProviderRegistry, SandboxConfig, SandboxOp, SandboxProvider,
};
use fngate_deploy::resource::{
    CodeReference, FunctionSpec, GatewayBindingSpec, GatewaySpec, ResourceDescriptor, ResourceId,
    ResourceSpec, RoleSpec,
};
use tokio_util::sync::CancellationToken;

// ============================================================================
// Fixtures
// ============================================================================

fn role(id: &str) -> ResourceDescriptor {
    ResourceDescriptor::new(
        id,
        ResourceSpec::Role(RoleSpec {
            name: String::from("lambda-eks-role"),
            trusted_service: String::from("lambda.amazonaws.com"),
            managed_policy_arns: vec![],
            description: None,
            permissions_boundary: None,
        }),
    )
}

fn function(id: &str, role: &str) -> ResourceDescriptor {
    ResourceDescriptor::new(
        id,
        ResourceSpec::Function(FunctionSpec {
            name: String::from("eks-setup"),
            code: CodeReference::ZipFile {
                path: String::from("function.zip"),
            },
            runtime: String::from("go1.x"),
            handler: String::from("main"),
            role: ResourceId::new(role),
            description: None,
            memory_mb: None,
            timeout_secs: None,
        }),
    )
}

fn gateway(id: &str) -> ResourceDescriptor {
    ResourceDescriptor::new(
        id,
        ResourceSpec::Gateway(GatewaySpec {
            name: format!("{id}-api"),
            description: None,
            stage: String::from("prod"),
        }),
    )
}

fn binding(id: &str, function: &str, gateway: &str) -> ResourceDescriptor {
    ResourceDescriptor::new(
        id,
        ResourceSpec::GatewayBinding(GatewayBindingSpec {
            function: ResourceId::new(function),
            gateway: ResourceId::new(gateway),
            path: String::from("/eks-setup"),
            http_method: String::from("POST"),
        }),
    )
}

/// Role r1, function f1, gateway g1 and binding b1.
fn literal_stack() -> DependencyGraph {
    DependencyGraph::build(vec![
        role("r1"),
        function("f1", "r1"),
        gateway("g1"),
        binding("b1", "f1", "g1"),
    ])
    .unwrap()
}

fn faults(entries: &[(&str, Fault)]) -> BTreeMap<ResourceId, Fault> {
    entries
        .iter()
        .map(|(id, fault)| (ResourceId::new(*id), fault.clone()))
        .collect()
}

struct Harness {
    sandbox: Arc<SandboxProvider>,
    orchestrator: Orchestrator,
}

impl Harness {
    fn new(sandbox: SandboxConfig, config: OrchestratorConfig) -> Self {
        let sandbox = Arc::new(SandboxProvider::new(sandbox));
        let registry = Arc::new(ProviderRegistry::uniform(sandbox.clone()));
        Self {
            sandbox,
            orchestrator: Orchestrator::new(registry, config),
        }
    }

    fn with_faults(entries: &[(&str, Fault)]) -> Self {
        Self::new(
            SandboxConfig {
                faults: faults(entries),
                ..SandboxConfig::default()
            },
            fast_config(),
        )
    }

    async fn create_ops(&self) -> Vec<String> {
        self.sandbox
            .events()
            .await
            .into_iter()
            .filter(|e| e.op == SandboxOp::Create)
            .map(|e| e.resource.to_string())
            .collect()
    }
}

fn fast_config() -> OrchestratorConfig {
    OrchestratorConfig::default()
        .with_retry(RetryPolicy::immediate(3))
        .with_wait_timeouts(Duration::from_millis(60), Duration::from_secs(1))
}

fn ids(list: &[ResourceId]) -> Vec<&str> {
    list.iter().map(ResourceId::as_str).collect()
}

// ============================================================================
// Create runs
// ============================================================================

#[tokio::test]
async fn test_literal_stack_created_in_dependency_order() {
    let harness = Harness::new(SandboxConfig::default(), fast_config().with_concurrency(1));
    let graph = literal_stack();

    let report = harness
        .orchestrator
        .create(&graph, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Succeeded);
    assert_eq!(report.status.exit_code(), 0);
    assert!(report.cause.is_none());
    assert_eq!(harness.create_ops().await, vec!["g1", "r1", "f1", "b1"]);

    for id in ["r1", "f1", "g1", "b1"] {
        let entry = report.entry(id).unwrap();
        assert_eq!(entry.status, EntryStatus::Ready, "{id}");
        assert!(entry.provider_handle.is_some(), "{id}");
    }
    assert!(
        report
            .entry("b1")
            .and_then(|e| e.provider_handle.as_ref())
            .is_some_and(|h| h.as_str().ends_with("/*/POST/eks-setup"))
    );
    assert_eq!(harness.sandbox.live_resources().await.len(), 4);
}

#[tokio::test]
async fn test_transient_create_failures_are_retried() {
    let harness = Harness::with_faults(&[("r1", Fault::TransientCreate { times: 2 })]);
    let graph = literal_stack();

    let report = harness
        .orchestrator
        .create(&graph, &CancellationToken::new())
        .await
        .unwrap();

    let r1 = ResourceId::new("r1");
    assert_eq!(report.status, RunStatus::Succeeded);
    assert_eq!(harness.sandbox.count(SandboxOp::Error, &r1).await, 2);
    assert_eq!(harness.sandbox.count(SandboxOp::Create, &r1).await, 1);
    assert!(report.entry("r1").unwrap().attempts >= 4);
}

#[tokio::test]
async fn test_function_never_ready_rolls_back() {
    let harness = Harness::with_faults(&[("f1", Fault::NeverReady)]);
    let graph = literal_stack();

    let report = harness
        .orchestrator
        .create(&graph, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::FailedRolledBack);
    assert_eq!(report.status.exit_code(), 1);
    assert!(report.cause.as_deref().unwrap().starts_with("f1:"));

    assert_eq!(report.status_of("r1"), Some(EntryStatus::Deleted));
    assert_eq!(report.status_of("g1"), Some(EntryStatus::Deleted));
    assert_eq!(report.status_of("f1"), Some(EntryStatus::Failed));
    assert_eq!(report.status_of("b1"), Some(EntryStatus::Pending));
    assert!(report.manual_cleanup.is_empty());
    assert!(report.ledger.non_terminal().is_empty());

    let f1 = ResourceId::new("f1");
    assert!(report.ledger.entry(&f1).unwrap().cleaned_up);
    assert_eq!(harness.sandbox.count(SandboxOp::Delete, &f1).await, 1);
    assert!(harness.sandbox.live_resources().await.is_empty());
}

#[tokio::test]
async fn test_independent_resources_are_compensated() {
    let harness = Harness::with_faults(&[("x", Fault::FailCreate)]);
    let graph = DependencyGraph::build(vec![gateway("a"), gateway("b"), gateway("x")]).unwrap();

    let report = harness
        .orchestrator
        .create(&graph, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::FailedRolledBack);
    assert_eq!(report.status_of("a"), Some(EntryStatus::Deleted));
    assert_eq!(report.status_of("b"), Some(EntryStatus::Deleted));
    assert_eq!(report.status_of("x"), Some(EntryStatus::Failed));
    assert_eq!(report.entry("x").unwrap().attempts, 1);
    assert!(report.entry("x").unwrap().provider_handle.is_none());
    assert!(harness.sandbox.live_resources().await.is_empty());
}

#[tokio::test]
async fn test_failed_compensation_leaves_partial_state() {
    let harness = Harness::with_faults(&[("b1", Fault::FailCreate), ("g1", Fault::FailDelete)]);
    let graph = literal_stack();

    let report = harness
        .orchestrator
        .create(&graph, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::FailedPartialState);
    assert_eq!(report.status.exit_code(), 2);
    assert_eq!(ids(&report.manual_cleanup), vec!["g1"]);

    let g1 = report.entry("g1").unwrap();
    assert_eq!(g1.status, EntryStatus::Ready);
    assert!(g1.rollback_error.is_some());
    assert!(g1.error.is_none());

    assert_eq!(report.status_of("f1"), Some(EntryStatus::Deleted));
    assert_eq!(report.status_of("r1"), Some(EntryStatus::Deleted));
    assert_eq!(
        harness.sandbox.live_resources().await,
        vec![ResourceId::new("g1")]
    );
}

#[tokio::test]
async fn test_blocked_compensation_is_reported() {
    let harness = Harness::with_faults(&[("b1", Fault::FailCreate), ("f1", Fault::FailDelete)]);
    let graph = literal_stack();

    let report = harness
        .orchestrator
        .create(&graph, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::FailedPartialState);
    assert_eq!(ids(&report.manual_cleanup), vec!["f1", "r1"]);

    let r1 = report.entry("r1").unwrap();
    assert_eq!(r1.status, EntryStatus::Ready);
    assert_eq!(r1.rollback_error.as_deref(), Some("blocked by f1"));
    assert_eq!(
        harness.sandbox.count(SandboxOp::Delete, &ResourceId::new("r1")).await,
        0
    );
    assert_eq!(report.status_of("g1"), Some(EntryStatus::Deleted));
}

#[tokio::test]
async fn test_run_timeout_triggers_rollback() {
    let harness = Harness::new(
        SandboxConfig {
            faults: faults(&[("f1", Fault::NeverReady)]),
            ..SandboxConfig::default()
        },
        OrchestratorConfig::default()
            .with_retry(RetryPolicy::immediate(3))
            .with_wait_timeouts(Duration::from_millis(200), Duration::from_secs(1))
            .with_run_timeout(Some(Duration::from_millis(50))),
    );
    let graph = literal_stack();

    let report = harness
        .orchestrator
        .create(&graph, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::FailedRolledBack);
    assert!(report.cause.as_deref().unwrap().contains("timed out"));
    assert_eq!(report.status_of("b1"), Some(EntryStatus::Pending));
    assert!(report.ledger.non_terminal().is_empty());
    assert!(harness.sandbox.live_resources().await.is_empty());
}

#[tokio::test]
async fn test_cancellation_stops_dispatch_and_rolls_back() {
    let harness = Harness::new(
        SandboxConfig {
            faults: faults(&[("f1", Fault::NeverReady)]),
            ..SandboxConfig::default()
        },
        OrchestratorConfig::default()
            .with_retry(RetryPolicy::immediate(3))
            .with_wait_timeouts(Duration::from_millis(200), Duration::from_secs(1)),
    );
    let graph = literal_stack();
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(40)).await;
        trigger.cancel();
    });

    let report = harness.orchestrator.create(&graph, &cancel).await.unwrap();

    assert_eq!(report.status, RunStatus::FailedRolledBack);
    assert_eq!(report.cause.as_deref(), Some("run cancelled"));
    assert_eq!(report.status_of("b1"), Some(EntryStatus::Pending));
    assert_eq!(
        harness.sandbox.count(SandboxOp::Create, &ResourceId::new("b1")).await,
        0
    );
    assert!(harness.sandbox.live_resources().await.is_empty());
}

#[tokio::test]
async fn test_cancelled_before_start_makes_no_calls() {
    let harness = Harness::with_faults(&[]);
    let graph = literal_stack();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let report = harness.orchestrator.create(&graph, &cancel).await.unwrap();

    assert_eq!(report.status, RunStatus::FailedRolledBack);
    assert!(harness.sandbox.events().await.is_empty());
    assert_eq!(report.ledger.count(EntryStatus::Pending), 4);
}

// ============================================================================
// Scheduling
// ============================================================================

#[tokio::test]
async fn test_nodes_start_only_after_dependencies_are_ready() {
    for _ in 0..5 {
        let harness = Harness::new(
            SandboxConfig {
                max_latency: Some(Duration::from_millis(5)),
                ..SandboxConfig::default()
            },
            fast_config()
                .with_concurrency(4)
                .with_wait_timeouts(Duration::from_secs(1), Duration::from_secs(1)),
        );
        let graph = literal_stack();

        let report = harness
            .orchestrator
            .create(&graph, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.status, RunStatus::Succeeded);

        let events = report.ledger.events();
        for event in events.iter().filter(|e| e.status == EntryStatus::InProgress) {
            for dep in graph.dependencies(&event.resource_id).unwrap() {
                let ready_before = events
                    .iter()
                    .any(|e| &e.resource_id == dep && e.status == EntryStatus::Ready && e.seq < event.seq);
                assert!(ready_before, "{} started before {dep} was ready", event.resource_id);
            }
        }
    }
}

#[tokio::test]
async fn test_concurrency_bound_is_respected() {
    let harness = Harness::new(
        SandboxConfig {
            max_latency: Some(Duration::from_millis(3)),
            ..SandboxConfig::default()
        },
        fast_config()
            .with_concurrency(2)
            .with_wait_timeouts(Duration::from_secs(1), Duration::from_secs(1)),
    );
    let graph =
        DependencyGraph::build((0..6).map(|i| gateway(&format!("gw{i}")))).unwrap();

    let report = harness
        .orchestrator
        .create(&graph, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.status, RunStatus::Succeeded);

    let mut in_flight = BTreeSet::new();
    let mut peak = 0;
    for event in report.ledger.events() {
        match event.status {
            EntryStatus::InProgress => {
                in_flight.insert(event.resource_id.clone());
            }
            EntryStatus::Ready | EntryStatus::Failed => {
                in_flight.remove(&event.resource_id);
            }
            _ => {}
        }
        peak = peak.max(in_flight.len());
    }
    assert_eq!(peak, 2);
}

// ============================================================================
// Destroy runs
// ============================================================================

#[tokio::test]
async fn test_destroy_twice_succeeds() {
    let harness = Harness::with_faults(&[]);
    let graph = literal_stack();
    let cancel = CancellationToken::new();

    let created = harness.orchestrator.create(&graph, &cancel).await.unwrap();
    let handles = created.ledger.handles();
    assert_eq!(handles.len(), 4);

    let first = harness
        .orchestrator
        .destroy(&graph, &handles, &cancel)
        .await
        .unwrap();
    assert_eq!(first.status, RunStatus::Succeeded);
    assert_eq!(first.ledger.count(EntryStatus::Deleted), 4);
    assert!(harness.sandbox.live_resources().await.is_empty());

    let deletes: Vec<String> = harness
        .sandbox
        .events()
        .await
        .into_iter()
        .filter(|e| e.op == SandboxOp::Delete)
        .map(|e| e.resource.to_string())
        .collect();
    assert_eq!(deletes.first().map(String::as_str), Some("b1"));
    assert_eq!(deletes.len(), 4);

    let second = harness
        .orchestrator
        .destroy(&graph, &handles, &cancel)
        .await
        .unwrap();
    assert_eq!(second.status, RunStatus::Succeeded);
    assert_eq!(second.ledger.count(EntryStatus::Deleted), 4);
}

#[tokio::test]
async fn test_destroy_failure_keeps_dependencies() {
    let harness = Harness::with_faults(&[("f1", Fault::FailDelete)]);
    let graph = literal_stack();
    let cancel = CancellationToken::new();

    let created = harness.orchestrator.create(&graph, &cancel).await.unwrap();
    let report = harness
        .orchestrator
        .destroy(&graph, &created.ledger.handles(), &cancel)
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::FailedPartialState);
    assert!(report.cause.as_deref().unwrap().starts_with("f1:"));
    assert_eq!(report.status_of("b1"), Some(EntryStatus::Deleted));
    assert_eq!(report.status_of("g1"), Some(EntryStatus::Deleted));
    assert_eq!(report.status_of("f1"), Some(EntryStatus::Failed));
    assert_eq!(report.status_of("r1"), Some(EntryStatus::Pending));
    let remaining: Vec<&str> = report.remaining().into_iter().map(ResourceId::as_str).collect();
    assert_eq!(remaining, vec!["f1", "r1"]);
    assert_eq!(
        harness.sandbox.live_resources().await,
        vec![ResourceId::new("f1"), ResourceId::new("r1")]
    );
}

/// Creates the literal stack against a sandbox whose deletions take about
/// 100ms to converge, and returns its handles.
async fn deployed_with_slow_deletes() -> (Harness, DependencyGraph, BTreeMap<ResourceId, ProviderHandle>) {
    let harness = Harness::new(
        SandboxConfig {
            gone_after_polls: 20,
            ..SandboxConfig::default()
        },
        fast_config(),
    );
    let graph = literal_stack();
    let created = harness
        .orchestrator
        .create(&graph, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(created.status, RunStatus::Succeeded);
    let handles = created.ledger.handles();
    (harness, graph, handles)
}

#[tokio::test]
async fn test_destroy_cancelled_mid_delete_stops_dispatch() {
    let (harness, graph, handles) = deployed_with_slow_deletes().await;
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(40)).await;
        trigger.cancel();
    });

    let report = harness
        .orchestrator
        .destroy(&graph, &handles, &cancel)
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::FailedPartialState);
    assert_eq!(report.cause.as_deref(), Some("run cancelled"));
    assert_eq!(report.status_of("b1"), Some(EntryStatus::Deleted));
    for id in ["f1", "g1", "r1"] {
        assert_eq!(report.status_of(id), Some(EntryStatus::Pending), "{id}");
        assert_eq!(
            harness.sandbox.count(SandboxOp::Delete, &ResourceId::new(id)).await,
            0
        );
    }
    assert!(report.ledger.non_terminal().is_empty());
    assert_eq!(ids(&harness.sandbox.live_resources().await), vec!["f1", "g1", "r1"]);
}

#[tokio::test]
async fn test_destroy_run_timeout_stops_dispatch() {
    let (harness, graph, handles) = deployed_with_slow_deletes().await;
    let timed = Orchestrator::new(
        Arc::new(ProviderRegistry::uniform(harness.sandbox.clone())),
        fast_config().with_run_timeout(Some(Duration::from_millis(40))),
    );

    let report = timed
        .destroy(&graph, &handles, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::FailedPartialState);
    assert_eq!(report.cause.as_deref(), Some("run timed out"));
    assert_eq!(report.status_of("b1"), Some(EntryStatus::Deleted));
    assert_eq!(report.status_of("f1"), Some(EntryStatus::Pending));
    assert_eq!(report.status_of("g1"), Some(EntryStatus::Pending));
    assert_eq!(report.status_of("r1"), Some(EntryStatus::Pending));
    assert!(report.ledger.non_terminal().is_empty());
    let remaining: Vec<&str> = report.remaining().into_iter().map(ResourceId::as_str).collect();
    assert_eq!(remaining, vec!["f1", "r1", "g1"]);
}

#[tokio::test]
async fn test_transient_delete_failures_are_retried() {
    let harness = Harness::with_faults(&[("g1", Fault::TransientDelete { times: 2 })]);
    let graph = literal_stack();
    let cancel = CancellationToken::new();

    let created = harness.orchestrator.create(&graph, &cancel).await.unwrap();
    let report = harness
        .orchestrator
        .destroy(&graph, &created.ledger.handles(), &cancel)
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Succeeded);
    assert_eq!(
        harness.sandbox.count(SandboxOp::Error, &ResourceId::new("g1")).await,
        2
    );
    assert!(harness.sandbox.live_resources().await.is_empty());
}
