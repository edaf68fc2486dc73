//! Execution plan types and construction.
//!
//! A plan is a preview of what a create or destroy run will do, derived
//! from a validated graph. It is printed by `fngate plan` and has no
//! influence on scheduling.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::resource::{ResourceId, ResourceKind};

use super::graph::DependencyGraph;

/// A complete execution plan.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionPlan {
    /// When the plan was created.
    pub created_at: DateTime<Utc>,
    /// Whether this plan creates or deletes.
    pub action: ActionType,
    /// Planned steps in execution order.
    pub steps: Vec<PlannedStep>,
}

/// A single planned step.
#[derive(Debug, Clone, Serialize)]
pub struct PlannedStep {
    /// Step number, starting at 1.
    pub number: usize,
    /// Action performed.
    pub action: ActionType,
    /// Resource the step acts on.
    pub resource: ResourceId,
    /// Kind of the resource.
    pub kind: ResourceKind,
    /// Step numbers that must complete first.
    pub after: Vec<usize>,
}

/// Types of actions in a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionType {
    /// Create and wait for readiness.
    Create,
    /// Delete and wait until gone.
    Delete,
}

impl ExecutionPlan {
    /// Creates a plan for a create run.
    #[must_use]
    pub fn create(graph: &DependencyGraph) -> Self {
        let order = graph.creation_order().to_vec();
        Self::from_order(graph, &order, ActionType::Create, |id| graph.dependencies(id))
    }

    /// Creates a plan for a destroy run.
    #[must_use]
    pub fn destroy(graph: &DependencyGraph) -> Self {
        let order = graph.deletion_order();
        Self::from_order(graph, &order, ActionType::Delete, |id| graph.dependents(id))
    }

    fn from_order<'g, F>(
        graph: &'g DependencyGraph,
        order: &[ResourceId],
        action: ActionType,
        prerequisites: F,
    ) -> Self
    where
        F: Fn(&ResourceId) -> Option<&'g std::collections::BTreeSet<ResourceId>>,
    {
        let number_of = |id: &ResourceId| order.iter().position(|o| o == id).map(|i| i + 1);

        let steps = order
            .iter()
            .enumerate()
            .filter_map(|(i, id)| {
                let descriptor = graph.descriptor(id)?;
                let mut after: Vec<usize> = prerequisites(id)
                    .into_iter()
                    .flatten()
                    .filter_map(number_of)
                    .collect();
                after.sort_unstable();
                Some(PlannedStep {
                    number: i + 1,
                    action,
                    resource: id.clone(),
                    kind: descriptor.kind(),
                    after,
                })
            })
            .collect();

        Self {
            created_at: Utc::now(),
            action,
            steps,
        }
    }

    /// Returns true if the plan is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Returns the number of steps.
    #[must_use]
    pub fn step_count(&self) -> usize {
        self.steps.len()
    }
}

impl PlannedStep {
    /// Returns a human-readable description of the step.
    #[must_use]
    pub fn description(&self) -> String {
        match self.action {
            ActionType::Create => format!("Create {} '{}'", self.kind, self.resource),
            ActionType::Delete => format!("Delete {} '{}'", self.kind, self.resource),
        }
    }
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Delete => "delete",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for PlannedStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())?;
        if !self.after.is_empty() {
            let after: Vec<String> = self.after.iter().map(ToString::to_string).collect();
            write!(f, " (after {})", after.join(", "))?;
        }
        Ok(())
    }
}

impl std::fmt::Display for ExecutionPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.steps.is_empty() {
            return write!(f, "No resources");
        }

        writeln!(f, "Execution Plan ({} steps):", self.steps.len())?;
        for step in &self.steps {
            writeln!(f, "  {}. {step}", step.number)?;
        }
        Ok(())
    }
}
