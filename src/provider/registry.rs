//! Lookup of provider adapters by resource kind.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use crate::error::RunError;
use crate::resource::ResourceKind;

use super::adapter::ProviderAdapter;

/// Maps each resource kind to the adapter that manages it.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    adapters: HashMap<ResourceKind, Arc<dyn ProviderAdapter>>,
}

impl ProviderRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry that routes every kind to one adapter.
    #[must_use]
    pub fn uniform(adapter: Arc<dyn ProviderAdapter>) -> Self {
        let mut registry = Self::new();
        for kind in [
            ResourceKind::Role,
            ResourceKind::Function,
            ResourceKind::Gateway,
            ResourceKind::GatewayBinding,
        ] {
            registry.register(kind, Arc::clone(&adapter));
        }
        registry
    }

    /// Registers the adapter for a kind, replacing any previous one.
    pub fn register(&mut self, kind: ResourceKind, adapter: Arc<dyn ProviderAdapter>) {
        self.adapters.insert(kind, adapter);
    }

    /// Returns the adapter for a kind.
    ///
    /// # Errors
    ///
    /// Returns `MissingAdapter` if no adapter is registered.
    pub fn adapter_for(&self, kind: ResourceKind) -> Result<Arc<dyn ProviderAdapter>, RunError> {
        self.adapters
            .get(&kind)
            .cloned()
            .ok_or(RunError::MissingAdapter { kind })
    }

    /// Checks that every kind has an adapter.
    ///
    /// # Errors
    ///
    /// Returns `MissingAdapter` for the first uncovered kind.
    pub fn ensure_covers(&self, kinds: &BTreeSet<ResourceKind>) -> Result<(), RunError> {
        for kind in kinds {
            if !self.adapters.contains_key(kind) {
                return Err(RunError::MissingAdapter { kind: *kind });
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<String> = self.adapters.keys().map(ToString::to_string).collect();
        kinds.sort();
        f.debug_struct("ProviderRegistry")
            .field("adapters", &kinds)
            .finish()
    }
}
