//! Resource identity and descriptors.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

use super::spec::{ResourceKind, ResourceSpec};

/// Identifier of a resource, unique within a run.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(String);

impl ResourceId {
    /// Creates an identifier from a caller-assigned string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh identifier of the form `<kind>-<8 hex>`.
    #[must_use]
    pub fn generate(kind: ResourceKind) -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        Self(format!("{kind}-{}", &suffix[..8]))
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResourceId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ResourceId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Immutable description of one resource to create or delete.
///
/// `depends_on` always includes the ids referenced by the resource spec itself, so a
/// function can never be scheduled ahead of its role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceDescriptor {
    id: ResourceId,
    spec: ResourceSpec,
    depends_on: BTreeSet<ResourceId>,
}

impl ResourceDescriptor {
    /// Creates a descriptor, seeding `depends_on` from the resource spec's references.
    #[must_use]
    pub fn new(id: impl Into<ResourceId>, spec: ResourceSpec) -> Self {
        let depends_on = spec.references().into_iter().cloned().collect();
        Self {
            id: id.into(),
            spec,
            depends_on,
        }
    }

    /// Creates a descriptor with a generated identifier.
    #[must_use]
    pub fn with_generated_id(spec: ResourceSpec) -> Self {
        let id = ResourceId::generate(spec.kind());
        Self::new(id, spec)
    }

    /// Adds explicit dependencies on top of the implied ones.
    #[must_use]
    pub fn depends_on<I, T>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<ResourceId>,
    {
        self.depends_on.extend(ids.into_iter().map(Into::into));
        self
    }

    /// Returns the identifier.
    #[must_use]
    pub const fn id(&self) -> &ResourceId {
        &self.id
    }

    /// Returns the kind.
    #[must_use]
    pub const fn kind(&self) -> ResourceKind {
        self.spec.kind()
    }

    /// Returns the kind-specific attributes.
    #[must_use]
    pub const fn spec(&self) -> &ResourceSpec {
        &self.spec
    }

    /// Returns the ids this resource depends on.
    #[must_use]
    pub const fn dependencies(&self) -> &BTreeSet<ResourceId> {
        &self.depends_on
    }

    /// Returns a short `kind/id` label for logs.
    #[must_use]
    pub fn label(&self) -> String {
        format!("{}/{}", self.kind(), self.id)
    }
}
