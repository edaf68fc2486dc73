//! Provider adapters.
//!
//! This module defines the boundary the orchestrator drives for every
//! resource kind, the registry that routes kinds to adapters, and an
//! in-memory sandbox implementation.

mod adapter;
mod registry;
mod sandbox;

pub use adapter::{DependencyHandles, ProviderAdapter, ProviderHandle};
pub use registry::ProviderRegistry;
pub use sandbox::{Fault, SandboxConfig, SandboxEvent, SandboxOp, SandboxProvider};

#[cfg(test)]
pub use adapter::MockProviderAdapter;
