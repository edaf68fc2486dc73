//! Planning module for runs.
//!
//! This module validates resource descriptors into a dependency graph and
//! derives the creation and deletion orders and previewable plans from it.

mod graph;
mod plan;

pub use graph::DependencyGraph;
pub use plan::{ActionType, ExecutionPlan, PlannedStep};
