//! In-memory provider used by the CLI dry runs and by tests.
//!
//! The sandbox behaves like a small eventually-consistent cloud: resources
//! become ready after a number of polls, deletions take a few polls to
//! converge, and faults can be injected per resource id. Every call is
//! appended to an ordered operation log.

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::error::{ProviderError, ProviderResult};
use crate::resource::{ResourceDescriptor, ResourceId, ResourceKind, ResourceSpec};

use super::adapter::{DependencyHandles, ProviderAdapter, ProviderHandle};

/// A fault injected for one resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Fault {
    /// `create` fails permanently.
    FailCreate,
    /// `create` fails transiently this many times, then succeeds.
    TransientCreate {
        /// Number of transient failures.
        times: u32,
    },
    /// The resource never becomes ready.
    NeverReady,
    /// The readiness check reports a broken resource.
    BrokenReadiness,
    /// `delete` fails permanently.
    FailDelete,
    /// `delete` fails transiently this many times, then succeeds.
    TransientDelete {
        /// Number of transient failures.
        times: u32,
    },
}

/// Sandbox settings.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Region used in generated handles.
    pub region: String,
    /// Account used in generated handles.
    pub account_id: String,
    /// Polls before a created resource reports ready.
    pub ready_after_polls: u32,
    /// Polls before a deleted resource is gone.
    pub gone_after_polls: u32,
    /// Interval between readiness polls.
    pub poll_interval: Duration,
    /// Upper bound of the random latency added to every call.
    pub max_latency: Option<Duration>,
    /// Faults keyed by resource id.
    pub faults: BTreeMap<ResourceId, Fault>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            region: String::from("us-east-1"),
            account_id: String::from("000000000000"),
            ready_after_polls: 2,
            gone_after_polls: 1,
            poll_interval: Duration::from_millis(5),
            max_latency: None,
            faults: BTreeMap::new(),
        }
    }
}

/// Kinds of sandbox operations recorded in the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SandboxOp {
    /// A resource was created.
    Create,
    /// A resource reported ready.
    Ready,
    /// A binding replaced an existing permission statement.
    ReplacePermission,
    /// A resource deletion was accepted.
    Delete,
    /// A resource finished deleting.
    Gone,
    /// A call failed.
    Error,
}

/// One entry of the sandbox operation log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SandboxEvent {
    /// Position in the log.
    pub seq: u64,
    /// Operation performed.
    pub op: SandboxOp,
    /// Resource the operation touched.
    pub resource: ResourceId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Creating { polls_left: u32 },
    Ready,
    Deleting { polls_left: u32 },
}

#[derive(Debug, Clone)]
struct SandboxResource {
    id: ResourceId,
    kind: ResourceKind,
    name: Option<String>,
    phase: Phase,
    /// Function handle and statement id, for bindings.
    permission: Option<(ProviderHandle, String)>,
}

#[derive(Debug, Default)]
struct SandboxState {
    resources: HashMap<ProviderHandle, SandboxResource>,
    /// Permission statements per function handle: statement id to source ARN.
    permissions: HashMap<ProviderHandle, BTreeMap<String, String>>,
    transient_left: HashMap<ResourceId, u32>,
    log: Vec<SandboxEvent>,
}

impl SandboxState {
    fn record(&mut self, op: SandboxOp, resource: &ResourceId) {
        let seq = self.log.len() as u64;
        self.log.push(SandboxEvent {
            seq,
            op,
            resource: resource.clone(),
        });
    }
}

/// In-memory provider adapter.
#[derive(Debug)]
pub struct SandboxProvider {
    config: SandboxConfig,
    state: Mutex<SandboxState>,
}

impl SandboxProvider {
    /// Creates a sandbox.
    #[must_use]
    pub fn new(config: SandboxConfig) -> Self {
        let transient_left = config
            .faults
            .iter()
            .filter_map(|(id, fault)| match fault {
                Fault::TransientCreate { times } | Fault::TransientDelete { times } => {
                    Some((id.clone(), *times))
                }
                _ => None,
            })
            .collect();

        Self {
            config,
            state: Mutex::new(SandboxState {
                transient_left,
                ..SandboxState::default()
            }),
        }
    }

    /// Returns the operation log.
    pub async fn events(&self) -> Vec<SandboxEvent> {
        self.state.lock().await.log.clone()
    }

    /// Counts logged operations of one kind for a resource.
    pub async fn count(&self, op: SandboxOp, id: &ResourceId) -> usize {
        self.state
            .lock()
            .await
            .log
            .iter()
            .filter(|e| e.op == op && &e.resource == id)
            .count()
    }

    /// Returns the ids of resources that still exist.
    pub async fn live_resources(&self) -> Vec<ResourceId> {
        let state = self.state.lock().await;
        let mut ids: Vec<ResourceId> = state.resources.values().map(|r| r.id.clone()).collect();
        ids.sort();
        ids
    }

    /// Returns the permission statements attached to a function.
    pub async fn permissions(&self, function: &ProviderHandle) -> BTreeMap<String, String> {
        self.state
            .lock()
            .await
            .permissions
            .get(function)
            .cloned()
            .unwrap_or_default()
    }

    fn fault(&self, id: &ResourceId) -> Option<&Fault> {
        self.config.faults.get(id)
    }

    async fn jitter(&self) {
        let Some(max) = self.config.max_latency else {
            return;
        };
        let max_ms = u64::try_from(max.as_millis()).unwrap_or(u64::MAX);
        if max_ms == 0 {
            return;
        }
        let delay = rand::thread_rng().gen_range(0..=max_ms);
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }

    fn handle_for(&self, descriptor: &ResourceDescriptor, deps: &DependencyHandles) -> ProviderResult<ProviderHandle> {
        let region = &self.config.region;
        let account = &self.config.account_id;
        let suffix = Uuid::new_v4().simple().to_string();

        let handle = match descriptor.spec() {
            ResourceSpec::Role(role) => format!("arn:aws:iam::{account}:role/{}", role.name),
            ResourceSpec::Function(function) => {
                format!("arn:aws:lambda:{region}:{account}:function:{}", function.name)
            }
            ResourceSpec::Gateway(_) => {
                format!("arn:aws:apigateway:{region}::/restapis/{}", &suffix[..10])
            }
            ResourceSpec::GatewayBinding(binding) => {
                let gateway = deps.get(&binding.gateway).ok_or_else(|| {
                    ProviderError::permanent(format!("missing handle for gateway '{}'", binding.gateway))
                })?;
                let api_id = gateway.as_str().rsplit('/').next().unwrap_or_default();
                format!(
                    "arn:aws:execute-api:{region}:{account}:{api_id}/*/{}{}",
                    binding.http_method, binding.path
                )
            }
        };
        Ok(ProviderHandle::new(handle))
    }

    /// Checks that every reference of the resource spec resolves to a live, ready resource.
    fn check_references(
        state: &SandboxState,
        descriptor: &ResourceDescriptor,
        deps: &DependencyHandles,
    ) -> ProviderResult<()> {
        for reference in descriptor.spec().references() {
            let handle = deps.get(reference).ok_or_else(|| {
                ProviderError::permanent(format!(
                    "{} requires a handle for '{reference}'",
                    descriptor.label()
                ))
            })?;
            match state.resources.get(handle) {
                Some(r) if r.phase == Phase::Ready => {}
                Some(_) => {
                    return Err(ProviderError::transient(format!(
                        "'{reference}' is not ready yet"
                    )));
                }
                None => {
                    return Err(ProviderError::permanent(format!(
                        "'{reference}' does not exist"
                    )));
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ProviderAdapter for SandboxProvider {
    async fn create(
        &self,
        descriptor: &ResourceDescriptor,
        deps: &DependencyHandles,
    ) -> ProviderResult<ProviderHandle> {
        self.jitter().await;
        let id = descriptor.id();
        let mut state = self.state.lock().await;

        match self.fault(id) {
            Some(Fault::FailCreate) => {
                state.record(SandboxOp::Error, id);
                return Err(ProviderError::permanent(format!(
                    "invalid parameters for {}",
                    descriptor.label()
                )));
            }
            Some(Fault::TransientCreate { .. }) => {
                if let Some(left) = state.transient_left.get_mut(id) {
                    if *left > 0 {
                        *left -= 1;
                        state.record(SandboxOp::Error, id);
                        return Err(ProviderError::transient("rate exceeded"));
                    }
                }
            }
            _ => {}
        }

        Self::check_references(&state, descriptor, deps)?;

        let name = descriptor.spec().name().map(str::to_string);
        if let Some(name) = &name {
            let conflict = state.resources.values().any(|r| {
                r.kind == descriptor.kind()
                    && matches!(r.kind, ResourceKind::Role | ResourceKind::Function)
                    && r.name.as_deref() == Some(name.as_str())
            });
            if conflict {
                state.record(SandboxOp::Error, id);
                return Err(ProviderError::permanent(format!(
                    "{} '{name}' already exists",
                    descriptor.kind()
                )));
            }
        }

        let handle = self.handle_for(descriptor, deps)?;

        let mut permission = None;
        if let ResourceSpec::GatewayBinding(binding) = descriptor.spec() {
            let function = deps.get(&binding.function).cloned().ok_or_else(|| {
                ProviderError::permanent(format!("missing handle for function '{}'", binding.function))
            })?;
            let statement_id = format!("fngate-{id}");
            let statements = state.permissions.entry(function.clone()).or_default();
            let replaced = statements
                .insert(statement_id.clone(), handle.as_str().to_string())
                .is_some();
            if replaced {
                state.record(SandboxOp::ReplacePermission, id);
            }
            permission = Some((function, statement_id));
        }

        state.resources.insert(
            handle.clone(),
            SandboxResource {
                id: id.clone(),
                kind: descriptor.kind(),
                name,
                phase: Phase::Creating {
                    polls_left: self.config.ready_after_polls,
                },
                permission,
            },
        );
        state.record(SandboxOp::Create, id);
        debug!(resource = %id, handle = %handle, "Sandbox resource created");

        Ok(handle)
    }

    async fn wait_until_ready(&self, handle: &ProviderHandle, timeout: Duration) -> ProviderResult<()> {
        self.jitter().await;
        let deadline = Instant::now() + timeout;

        loop {
            {
                let mut state = self.state.lock().await;
                let Some(resource) = state.resources.get_mut(handle) else {
                    return Err(ProviderError::not_found(handle.as_str()));
                };
                let id = resource.id.clone();

                match self.fault(&id) {
                    Some(Fault::BrokenReadiness) => {
                        state.record(SandboxOp::Error, &id);
                        return Err(ProviderError::ReadinessCheckFailed {
                            handle: handle.to_string(),
                            message: String::from("resource entered a failed state"),
                        });
                    }
                    Some(Fault::NeverReady) => {}
                    _ => match resource.phase {
                        Phase::Ready => return Ok(()),
                        Phase::Creating { polls_left } if polls_left <= 1 => {
                            resource.phase = Phase::Ready;
                            state.record(SandboxOp::Ready, &id);
                            return Ok(());
                        }
                        Phase::Creating { polls_left } => {
                            resource.phase = Phase::Creating {
                                polls_left: polls_left - 1,
                            };
                        }
                        Phase::Deleting { .. } => {
                            return Err(ProviderError::ReadinessCheckFailed {
                                handle: handle.to_string(),
                                message: String::from("resource is being deleted"),
                            });
                        }
                    },
                }
            }

            if Instant::now() + self.config.poll_interval > deadline {
                return Err(ProviderError::Timeout {
                    handle: handle.to_string(),
                    expected: String::from("ready"),
                    waited: timeout,
                });
            }
            trace!(handle = %handle, "Sandbox resource not ready yet");
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    async fn delete(&self, handle: &ProviderHandle) -> ProviderResult<()> {
        self.jitter().await;
        let mut state = self.state.lock().await;

        let Some(resource) = state.resources.get(handle).cloned() else {
            return Err(ProviderError::not_found(handle.as_str()));
        };
        if matches!(resource.phase, Phase::Deleting { .. }) {
            return Err(ProviderError::not_found(handle.as_str()));
        }

        match self.fault(&resource.id) {
            Some(Fault::FailDelete) => {
                state.record(SandboxOp::Error, &resource.id);
                return Err(ProviderError::DeleteFailed {
                    handle: handle.to_string(),
                    message: String::from("resource is in use"),
                });
            }
            Some(Fault::TransientDelete { .. }) => {
                if let Some(left) = state.transient_left.get_mut(&resource.id) {
                    if *left > 0 {
                        *left -= 1;
                        state.record(SandboxOp::Error, &resource.id);
                        return Err(ProviderError::transient("rate exceeded"));
                    }
                }
            }
            _ => {}
        }

        let in_use = state.resources.values().any(|other| {
            !matches!(other.phase, Phase::Deleting { .. })
                && other
                    .permission
                    .as_ref()
                    .is_some_and(|(function, _)| function == handle)
        });
        if in_use {
            state.record(SandboxOp::Error, &resource.id);
            return Err(ProviderError::DeleteFailed {
                handle: handle.to_string(),
                message: String::from("function still has bound routes"),
            });
        }

        if let Some((function, statement_id)) = &resource.permission {
            if let Some(statements) = state.permissions.get_mut(function) {
                statements.remove(statement_id);
            }
        }

        if let Some(r) = state.resources.get_mut(handle) {
            r.phase = Phase::Deleting {
                polls_left: self.config.gone_after_polls,
            };
        }
        state.record(SandboxOp::Delete, &resource.id);
        Ok(())
    }

    async fn wait_until_gone(&self, handle: &ProviderHandle, timeout: Duration) -> ProviderResult<()> {
        self.jitter().await;
        let deadline = Instant::now() + timeout;

        loop {
            {
                let mut state = self.state.lock().await;
                let Some(resource) = state.resources.get_mut(handle) else {
                    return Ok(());
                };
                match resource.phase {
                    Phase::Deleting { polls_left } if polls_left <= 1 => {
                        let id = resource.id.clone();
                        state.resources.remove(handle);
                        state.permissions.remove(handle);
                        state.record(SandboxOp::Gone, &id);
                        return Ok(());
                    }
                    Phase::Deleting { polls_left } => {
                        resource.phase = Phase::Deleting {
                            polls_left: polls_left - 1,
                        };
                    }
                    Phase::Creating { .. } | Phase::Ready => {}
                }
            }

            if Instant::now() + self.config.poll_interval > deadline {
                return Err(ProviderError::Timeout {
                    handle: handle.to_string(),
                    expected: String::from("gone"),
                    waited: timeout,
                });
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }
}
