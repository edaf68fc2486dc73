//! Error types for the fngate deployment system.
//!
//! This module provides the error hierarchy for every stage of a run:
//! configuration, graph construction, provider calls, run orchestration
//! and persisted state.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::resource::{ResourceId, ResourceKind};

/// The main error type for the fngate deployment system.
#[derive(Debug, Error)]
pub enum FngateError {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// State management errors.
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// Dependency graph errors.
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    /// Provider adapter errors that escaped a run.
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Run-level errors raised before or outside node execution.
    #[error("Run error: {0}")]
    Run(#[from] RunError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file was not found.
    #[error("Configuration file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The configuration file could not be parsed.
    #[error("Failed to parse configuration: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// Validation failed.
    #[error("Configuration validation failed: {message}")]
    ValidationError {
        /// Description of the validation error.
        message: String,
        /// Field that failed validation.
        field: Option<String>,
    },

    /// Environment variable is missing.
    #[error("Missing environment variable: {name}")]
    MissingEnvVar {
        /// Name of the missing variable.
        name: String,
    },
}

/// Dependency graph construction errors.
///
/// These are raised before any provider call is made.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GraphError {
    /// Two descriptors share the same identifier.
    #[error("Duplicate resource id: {id}")]
    DuplicateId {
        /// The duplicated identifier.
        id: ResourceId,
    },

    /// A descriptor depends on an identifier that is not part of the set.
    #[error("Resource '{resource}' depends on unknown resource '{missing}'")]
    UnknownDependency {
        /// Descriptor holding the dangling reference.
        resource: ResourceId,
        /// The identifier that could not be resolved.
        missing: ResourceId,
    },

    /// The dependency relation contains a cycle.
    #[error("Dependency cycle detected: {}", format_cycle(.cycle))]
    CycleDetected {
        /// One offending cycle, in dependency order.
        cycle: Vec<ResourceId>,
    },
}

/// Coarse classification of provider failures, used by retry and rollback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Retry with backoff.
    Transient,
    /// Fail immediately.
    Permanent,
    /// The resource does not exist; success for deletions.
    NotFound,
}

/// Errors reported by provider adapters.
///
/// Adapters translate their native errors into this taxonomy; the
/// orchestrator never looks past it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    /// Retryable failure (throttling, eventual-consistency lag).
    #[error("Transient provider failure: {message}")]
    Transient {
        /// Description of the failure.
        message: String,
    },

    /// Non-retryable failure (invalid input, authorization denial).
    #[error("Permanent provider failure: {message}")]
    Permanent {
        /// Description of the failure.
        message: String,
    },

    /// Convergence was not observed in time.
    #[error("Timed out after {waited:?} waiting for {handle} to become {expected}")]
    Timeout {
        /// Handle of the resource being waited on.
        handle: String,
        /// State that was not reached.
        expected: String,
        /// How long the adapter waited.
        waited: Duration,
    },

    /// The resource does not exist.
    #[error("Resource not found: {handle}")]
    NotFound {
        /// Handle that could not be found.
        handle: String,
    },

    /// The readiness check itself reported a broken resource.
    #[error("Readiness check failed for {handle}: {message}")]
    ReadinessCheckFailed {
        /// Handle of the resource.
        handle: String,
        /// Description of the failure.
        message: String,
    },

    /// The provider refused or failed the deletion.
    #[error("Delete failed for {handle}: {message}")]
    DeleteFailed {
        /// Handle of the resource.
        handle: String,
        /// Description of the failure.
        message: String,
    },

    /// The call was abandoned because the run was cancelled.
    #[error("Operation cancelled: {operation}")]
    Cancelled {
        /// Operation that was abandoned.
        operation: String,
    },
}

/// Run-level errors raised before or outside node execution.
#[derive(Debug, Error)]
pub enum RunError {
    /// No adapter is registered for a kind present in the graph.
    #[error("No provider adapter registered for resource kind '{kind}'")]
    MissingAdapter {
        /// Kind without an adapter.
        kind: ResourceKind,
    },

    /// The persisted state still holds live resources.
    #[error("Stack already has {count} live resource(s); destroy it before applying again")]
    AlreadyDeployed {
        /// Number of live resources.
        count: usize,
    },

    /// There is no recorded run to destroy.
    #[error("No recorded deployment to destroy")]
    NothingToDestroy,

    /// Live resources recorded in state are missing from the stack file.
    #[error(
        "Recorded resource(s) {} still exist but are no longer in the stack file; restore them before destroying",
        join_ids(.ids)
    )]
    OrphanedResources {
        /// Ids without a descriptor.
        ids: Vec<ResourceId>,
    },
}

fn join_ids(ids: &[ResourceId]) -> String {
    ids.iter().map(ResourceId::as_str).collect::<Vec<_>>().join(", ")
}

/// State management errors.
#[derive(Debug, Error)]
pub enum StateError {
    /// State is corrupted.
    #[error("State is corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// State lock acquisition failed.
    #[error("Failed to acquire state lock: {message}")]
    LockFailed {
        /// Description of the lock failure.
        message: String,
    },

    /// State lock is held by another process.
    #[error("State is locked by another process (lock holder: {holder}, since: {since})")]
    LockedByOther {
        /// Identifier of the lock holder.
        holder: String,
        /// When the lock was acquired.
        since: String,
    },

    /// Local filesystem backend error.
    #[error("Local state backend error: {message}")]
    LocalError {
        /// Description of the filesystem error.
        message: String,
    },

    /// S3 backend error.
    #[error("S3 state backend error: {message}")]
    S3Error {
        /// Description of the S3 error.
        message: String,
    },

    /// Serialization error.
    #[error("State serialization error: {message}")]
    SerializationError {
        /// Description of the serialization error.
        message: String,
    },

    /// State version mismatch.
    #[error("State version mismatch: expected {expected}, found {found}")]
    VersionMismatch {
        /// Expected state version.
        expected: String,
        /// Found state version.
        found: String,
    },

    /// A ledger entry was asked to make a transition its state machine forbids.
    #[error("Invalid ledger transition for '{resource}': {from} -> {to}")]
    InvalidTransition {
        /// Resource whose entry was updated.
        resource: ResourceId,
        /// Current status.
        from: String,
        /// Requested status.
        to: String,
    },

    /// A ledger update named a resource that is not part of the run.
    #[error("Resource '{resource}' is not tracked by this run")]
    UnknownEntry {
        /// The unknown resource.
        resource: ResourceId,
    },
}

/// Result type alias for fngate operations.
pub type Result<T> = std::result::Result<T, FngateError>;

/// Result type alias for provider adapter calls.
pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

fn format_cycle(cycle: &[ResourceId]) -> String {
    cycle
        .iter()
        .map(ResourceId::as_str)
        .collect::<Vec<_>>()
        .join(" -> ")
}

impl FngateError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns true if this error is retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Provider(e) => e.is_retryable(),
            Self::State(StateError::LockFailed { .. }) => true,
            _ => false,
        }
    }
}

impl ConfigError {
    /// Creates a validation error for a specific field.
    #[must_use]
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: Some(field.into()),
        }
    }
}

impl ProviderError {
    /// Creates a transient error.
    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }

    /// Creates a permanent error.
    #[must_use]
    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent {
            message: message.into(),
        }
    }

    /// Creates a not-found error for a handle.
    #[must_use]
    pub fn not_found(handle: impl Into<String>) -> Self {
        Self::NotFound {
            handle: handle.into(),
        }
    }

    /// Classifies this error for retry and deletion handling.
    ///
    /// `Timeout` counts as transient; it only becomes terminal once the
    /// retry budget is spent.
    #[must_use]
    pub const fn classify(&self) -> ErrorClass {
        match self {
            Self::Transient { .. } | Self::Timeout { .. } => ErrorClass::Transient,
            Self::NotFound { .. } => ErrorClass::NotFound,
            Self::Permanent { .. }
            | Self::ReadinessCheckFailed { .. }
            | Self::DeleteFailed { .. }
            | Self::Cancelled { .. } => ErrorClass::Permanent,
        }
    }

    /// Returns true if the call may be retried.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self.classify(), ErrorClass::Transient)
    }

    /// Returns true if the resource was reported missing.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl StateError {
    /// Creates an S3 error with the given message.
    #[must_use]
    pub fn s3(message: impl Into<String>) -> Self {
        Self::S3Error {
            message: message.into(),
        }
    }

    /// Creates a local backend error with the given message.
    #[must_use]
    pub fn local(message: impl Into<String>) -> Self {
        Self::LocalError {
            message: message.into(),
        }
    }

    /// Creates a serialization error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::SerializationError {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_is_transient() {
        let err = ProviderError::Timeout {
            handle: String::from("arn:fn"),
            expected: String::from("ready"),
            waited: Duration::from_secs(5),
        };
        assert_eq!(err.classify(), ErrorClass::Transient);
        assert!(err.is_retryable());
    }

    #[test]
    fn test_classification() {
        assert_eq!(ProviderError::transient("throttled").classify(), ErrorClass::Transient);
        assert_eq!(ProviderError::permanent("bad input").classify(), ErrorClass::Permanent);
        assert_eq!(ProviderError::not_found("arn:x").classify(), ErrorClass::NotFound);
        assert!(!ProviderError::permanent("denied").is_retryable());
    }

    #[test]
    fn test_cycle_display() {
        let err = GraphError::CycleDetected {
            cycle: vec![
                ResourceId::new("a"),
                ResourceId::new("b"),
                ResourceId::new("a"),
            ],
        };
        assert_eq!(err.to_string(), "Dependency cycle detected: a -> b -> a");
    }

    #[test]
    fn test_wrapped_provider_error_retryable() {
        let err = FngateError::from(ProviderError::transient("slow down"));
        assert!(err.is_retryable());
        assert!(!FngateError::internal("boom").is_retryable());
    }
}
