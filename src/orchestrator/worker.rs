//! Per-node work executed on the worker pool.
//!
//! Workers never touch the ledger. They report a [`NodeResult`] back to the
//! coordinator, which applies it.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::ProviderError;
use crate::provider::{DependencyHandles, ProviderAdapter, ProviderHandle};
use crate::resource::{ResourceDescriptor, ResourceId};

use super::config::RetryPolicy;
use super::retry::retry;

/// What happened to one node.
#[derive(Debug)]
pub enum NodeOutcome {
    /// Created and ready.
    Created {
        /// Handle returned by the provider.
        handle: ProviderHandle,
        /// Calls made.
        attempts: u32,
    },
    /// Creation or readiness failed.
    CreateFailed {
        /// Terminal error.
        error: ProviderError,
        /// Handle, if the resource was created before failing.
        handle: Option<ProviderHandle>,
        /// Calls made.
        attempts: u32,
    },
    /// Deleted, or already absent.
    Deleted {
        /// Calls made.
        attempts: u32,
    },
    /// Deletion failed.
    DeleteFailed {
        /// Terminal error.
        error: ProviderError,
        /// Calls made.
        attempts: u32,
    },
}

/// A node outcome tagged with its resource.
#[derive(Debug)]
pub struct NodeResult {
    /// Resource the outcome belongs to.
    pub id: ResourceId,
    /// The outcome.
    pub outcome: NodeOutcome,
}

/// Inputs of a create task.
pub struct CreateTask {
    /// Adapter for the node's kind.
    pub adapter: Arc<dyn ProviderAdapter>,
    /// The node.
    pub descriptor: ResourceDescriptor,
    /// Handles of the node's dependencies.
    pub deps: DependencyHandles,
    /// Retry policy.
    pub retry: RetryPolicy,
    /// Readiness timeout.
    pub ready_timeout: Duration,
    /// Run cancellation.
    pub cancel: CancellationToken,
}

/// Inputs of a delete task.
pub struct DeleteTask {
    /// Adapter for the node's kind.
    pub adapter: Arc<dyn ProviderAdapter>,
    /// The node.
    pub id: ResourceId,
    /// Handle to delete.
    pub handle: ProviderHandle,
    /// Retry policy.
    pub retry: RetryPolicy,
    /// Deletion convergence timeout.
    pub gone_timeout: Duration,
}

impl CreateTask {
    /// Creates the resource, then waits for readiness.
    ///
    /// A successful create is never repeated: readiness failures are
    /// retried on their own against the same handle.
    pub async fn run(self) -> NodeResult {
        let id = self.descriptor.id().clone();
        let adapter = self.adapter.as_ref();
        let cancel = Some(&self.cancel);

        let created = retry(&self.retry, cancel, &id, "create", || {
            adapter.create(&self.descriptor, &self.deps)
        })
        .await;
        let mut attempts = created.calls;

        let handle = match created.result {
            Ok(handle) if handle.is_empty() => {
                return NodeResult {
                    id,
                    outcome: NodeOutcome::CreateFailed {
                        error: ProviderError::permanent("provider returned an empty handle"),
                        handle: None,
                        attempts,
                    },
                };
            }
            Ok(handle) => handle,
            Err(error) => {
                return NodeResult {
                    id,
                    outcome: NodeOutcome::CreateFailed {
                        error,
                        handle: None,
                        attempts,
                    },
                };
            }
        };
        debug!(resource = %id, handle = %handle, "Created, waiting for readiness");

        let ready = retry(&self.retry, cancel, &id, "wait_until_ready", || {
            adapter.wait_until_ready(&handle, self.ready_timeout)
        })
        .await;
        attempts += ready.calls;

        let outcome = match ready.result {
            Ok(()) => {
                info!(resource = %id, kind = %self.descriptor.kind(), attempts, "Resource ready");
                NodeOutcome::Created { handle, attempts }
            }
            Err(error) => NodeOutcome::CreateFailed {
                error,
                handle: Some(handle),
                attempts,
            },
        };
        NodeResult { id, outcome }
    }
}

impl DeleteTask {
    /// Deletes the resource, then waits until it is gone.
    ///
    /// `NotFound` from either step counts as deleted.
    pub async fn run(self) -> NodeResult {
        let adapter = self.adapter.as_ref();

        let deleted = retry(&self.retry, None, &self.id, "delete", || {
            adapter.delete(&self.handle)
        })
        .await;
        let mut attempts = deleted.calls;

        match deleted.result {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                debug!(resource = %self.id, "Already deleted");
                return self.finish(NodeOutcome::Deleted { attempts });
            }
            Err(error) => return self.finish(NodeOutcome::DeleteFailed { error, attempts }),
        }

        let gone = retry(&self.retry, None, &self.id, "wait_until_gone", || {
            adapter.wait_until_gone(&self.handle, self.gone_timeout)
        })
        .await;
        attempts += gone.calls;

        let outcome = match gone.result {
            Ok(()) => NodeOutcome::Deleted { attempts },
            Err(e) if e.is_not_found() => NodeOutcome::Deleted { attempts },
            Err(error) => NodeOutcome::DeleteFailed { error, attempts },
        };
        self.finish(outcome)
    }

    fn finish(&self, outcome: NodeOutcome) -> NodeResult {
        if let NodeOutcome::Deleted { attempts } = &outcome {
            info!(resource = %self.id, handle = %self.handle, attempts, "Resource deleted");
        }
        NodeResult {
            id: self.id.clone(),
            outcome,
        }
    }
}

/// Runs `work` on its own task so a panic becomes a failed outcome.
pub async fn isolate<Fut>(id: ResourceId, deleting: bool, work: Fut) -> NodeResult
where
    Fut: Future<Output = NodeResult> + Send + 'static,
{
    match tokio::spawn(work).await {
        Ok(result) => result,
        Err(join_error) => {
            let error = ProviderError::permanent(format!("worker failed: {join_error}"));
            let outcome = if deleting {
                NodeOutcome::DeleteFailed { error, attempts: 0 }
            } else {
                NodeOutcome::CreateFailed {
                    error,
                    handle: None,
                    attempts: 0,
                }
            };
            NodeResult { id, outcome }
        }
    }
}
