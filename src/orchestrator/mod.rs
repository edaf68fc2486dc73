//! Run orchestration.
//!
//! The orchestrator walks a [`crate::planner::DependencyGraph`], creating
//! resources in dependency order with bounded concurrency, waiting for
//! readiness, and compensating with reverse-order deletion when a run
//! fails. It also drives destroy runs.

mod config;
mod engine;
mod report;
mod retry;
mod worker;

pub use config::{
    DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_CONCURRENCY, DEFAULT_RUN_TIMEOUT, DEFAULT_WAIT_TIMEOUT,
    OrchestratorConfig, RetryPolicy,
};
pub use engine::Orchestrator;
pub use report::{ReportEntry, RunReport, RunStatus};
