// ============================================================================
// Linting
// ============================================================================

#![forbid(unsafe_code)]               // Unsafe code is forbidden
#![warn(missing_docs)]                // Public items must be documented
#![warn(dead_code)]                   // Unused code is flagged
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention
#![warn(unused_imports)]              // Unused imports are flagged
#![warn(unused_variables)]            // Unused variables are flagged
#![deny(unused_must_use)]             // Results and futures must be handled
#![deny(nonstandard_style)]           // Non-standard code style is forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::print_stdout)]
#![warn(clippy::todo)]
#![warn(clippy::unimplemented)]
#![warn(clippy::redundant_clone)]

#![deny(overflowing_literals)]
#![deny(arithmetic_overflow)]

// ============================================================================
// Crate Documentation
// ============================================================================

//! # fngate
//!
//! Dependency-ordered provisioning and teardown of a small serverless
//! stack: an execution role, a function running under it, an HTTP gateway,
//! and the binding that routes the gateway to the function.
//!
//! ## How a run works
//!
//! 1. **Graph**: resource descriptors are checked for duplicate ids,
//!    unknown dependencies and cycles, then ordered topologically.
//! 2. **Create**: independent resources are created concurrently, up to a
//!    bound. A resource starts only once every dependency is ready.
//! 3. **Rollback**: on the first terminal failure nothing new starts;
//!    whatever was created is deleted in reverse dependency order.
//! 4. **Report**: every resource ends in a terminal ledger state, and the
//!    run ends `succeeded`, `failed (rolled back)` or `failed (partial
//!    state)`, mapped to exit codes 0, 1 and 2.
//!
//! ## Modules
//!
//! - [`resource`]: Resource ids, kinds and descriptors
//! - [`planner`]: Dependency graph and execution plans
//! - [`provider`]: Provider adapter boundary, registry and sandbox
//! - [`ledger`]: Per-run record of every resource
//! - [`orchestrator`]: Create, rollback and destroy runs
//! - [`state`]: Persisted stack state and locking
//! - [`config`]: Stack file parsing and validation
//! - [`deployer`]: Stack-level apply, destroy and status
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! project:
//!   name: orders
//!
//! resources:
//!   - id: role
//!     kind: role
//!     name: orders-role
//!   - id: handler
//!     kind: function
//!     name: orders-handler
//!     role: role
//!     code: {source: zip_file, path: build/handler.zip}
//!   - id: api
//!     kind: gateway
//!     name: orders-api
//!   - id: route
//!     kind: gateway_binding
//!     function: handler
//!     gateway: api
//!     path: /orders
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod cli;
pub mod config;
pub mod deployer;
pub mod error;
pub mod ledger;
pub mod orchestrator;
pub mod planner;
pub mod provider;
pub mod resource;
pub mod state;

// ============================================================================
// Re-exports
// ============================================================================

pub use config::{ConfigHasher, ConfigParser, ConfigValidator, StackConfig};
pub use deployer::{StackDeployer, StackStatus};
pub use error::{FngateError, Result};
pub use ledger::{EntryStatus, RunLedger};
pub use orchestrator::{Orchestrator, OrchestratorConfig, RunReport, RunStatus};
pub use planner::{DependencyGraph, ExecutionPlan};
pub use provider::{ProviderAdapter, ProviderHandle, ProviderRegistry, SandboxProvider};
pub use resource::{ResourceDescriptor, ResourceId, ResourceKind, ResourceSpec};
pub use state::{LocalStateStore, S3StateStore, StackState, StateStore};
