//! The adapter boundary between the orchestrator and a cloud provider.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::ProviderResult;
use crate::resource::{ResourceDescriptor, ResourceId};

/// Opaque provider-side identifier of a created resource, such as an ARN.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderHandle(String);

impl ProviderHandle {
    /// Creates a handle.
    #[must_use]
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    /// Returns the handle as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if the handle is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl std::fmt::Display for ProviderHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Handles of a node's dependencies, resolved from the ledger.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyHandles(BTreeMap<ResourceId, ProviderHandle>);

impl DependencyHandles {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the handle of a dependency.
    pub fn insert(&mut self, id: ResourceId, handle: ProviderHandle) {
        self.0.insert(id, handle);
    }

    /// Returns the handle of a dependency.
    #[must_use]
    pub fn get(&self, id: &ResourceId) -> Option<&ProviderHandle> {
        self.0.get(id)
    }

    /// Returns the number of resolved dependencies.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if nothing was resolved.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates resolved dependencies in id order.
    pub fn iter(&self) -> impl Iterator<Item = (&ResourceId, &ProviderHandle)> {
        self.0.iter()
    }
}

impl FromIterator<(ResourceId, ProviderHandle)> for DependencyHandles {
    fn from_iter<T: IntoIterator<Item = (ResourceId, ProviderHandle)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Operations the orchestrator needs from a provider, per resource kind.
///
/// Implementations translate native errors into [`crate::error::ProviderError`]
/// and must be safe for concurrent use by several graph branches.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Creates the resource and returns its handle.
    ///
    /// `deps` maps every id in the descriptor's `depends_on` to its handle.
    async fn create(
        &self,
        descriptor: &ResourceDescriptor,
        deps: &DependencyHandles,
    ) -> ProviderResult<ProviderHandle>;

    /// Waits until the resource is usable by its dependents.
    async fn wait_until_ready(&self, handle: &ProviderHandle, timeout: Duration)
    -> ProviderResult<()>;

    /// Deletes the resource. `NotFound` means it is already gone.
    async fn delete(&self, handle: &ProviderHandle) -> ProviderResult<()>;

    /// Waits until the deletion has converged.
    async fn wait_until_gone(&self, handle: &ProviderHandle, timeout: Duration)
    -> ProviderResult<()>;
}
