//! Dependency graph construction and ordering.
//!
//! The graph is built once per run from the caller's descriptors. Building
//! is a pure function of its input: it either returns a fully validated
//! graph or an error, never a partial graph.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::error::GraphError;
use crate::resource::{ResourceDescriptor, ResourceId, ResourceKind};

/// A validated, acyclic dependency graph of resources.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    descriptors: BTreeMap<ResourceId, ResourceDescriptor>,
    dependents: BTreeMap<ResourceId, BTreeSet<ResourceId>>,
    order: Vec<ResourceId>,
    positions: HashMap<ResourceId, usize>,
}

impl DependencyGraph {
    /// Builds a graph from a set of descriptors.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateId` if two descriptors share an id, then
    /// `UnknownDependency` for a dangling reference, then `CycleDetected`.
    pub fn build<I>(descriptors: I) -> Result<Self, GraphError>
    where
        I: IntoIterator<Item = ResourceDescriptor>,
    {
        let mut by_id = BTreeMap::new();
        for descriptor in descriptors {
            let id = descriptor.id().clone();
            if by_id.contains_key(&id) {
                return Err(GraphError::DuplicateId { id });
            }
            by_id.insert(id, descriptor);
        }

        for (id, descriptor) in &by_id {
            if let Some(missing) = descriptor
                .dependencies()
                .iter()
                .find(|dep| !by_id.contains_key(*dep))
            {
                return Err(GraphError::UnknownDependency {
                    resource: id.clone(),
                    missing: missing.clone(),
                });
            }
        }

        for (id, descriptor) in &by_id {
            if descriptor.dependencies().contains(id) {
                return Err(GraphError::CycleDetected {
                    cycle: vec![id.clone()],
                });
            }
        }

        let mut dependents: BTreeMap<ResourceId, BTreeSet<ResourceId>> = by_id
            .keys()
            .map(|id| (id.clone(), BTreeSet::new()))
            .collect();
        for (id, descriptor) in &by_id {
            for dep in descriptor.dependencies() {
                if let Some(set) = dependents.get_mut(dep) {
                    set.insert(id.clone());
                }
            }
        }

        let order = topological_order(&by_id, &dependents);
        if order.len() < by_id.len() {
            let placed: BTreeSet<&ResourceId> = order.iter().collect();
            let cycle = find_cycle(&by_id, &placed);
            return Err(GraphError::CycleDetected { cycle });
        }

        let positions = order
            .iter()
            .enumerate()
            .map(|(i, id)| (id.clone(), i))
            .collect();

        Ok(Self {
            descriptors: by_id,
            dependents,
            order,
            positions,
        })
    }

    /// Returns the creation order: topological, ties broken by ascending id.
    #[must_use]
    pub fn creation_order(&self) -> &[ResourceId] {
        &self.order
    }

    /// Returns the deletion order: the exact reverse of the creation order.
    #[must_use]
    pub fn deletion_order(&self) -> Vec<ResourceId> {
        self.order.iter().rev().cloned().collect()
    }

    /// Returns the descriptor for an id.
    #[must_use]
    pub fn descriptor(&self, id: &ResourceId) -> Option<&ResourceDescriptor> {
        self.descriptors.get(id)
    }

    /// Returns the ids a resource depends on.
    #[must_use]
    pub fn dependencies(&self, id: &ResourceId) -> Option<&BTreeSet<ResourceId>> {
        self.descriptors.get(id).map(ResourceDescriptor::dependencies)
    }

    /// Returns the ids that depend on a resource.
    #[must_use]
    pub fn dependents(&self, id: &ResourceId) -> Option<&BTreeSet<ResourceId>> {
        self.dependents.get(id)
    }

    /// Returns the index of a resource in the creation order.
    #[must_use]
    pub fn position(&self, id: &ResourceId) -> Option<usize> {
        self.positions.get(id).copied()
    }

    /// Returns the number of resources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Returns true if the graph has no resources.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Iterates descriptors in creation order.
    pub fn iter(&self) -> impl Iterator<Item = &ResourceDescriptor> {
        self.order.iter().filter_map(|id| self.descriptors.get(id))
    }

    /// Returns the distinct kinds present in the graph.
    #[must_use]
    pub fn kinds(&self) -> BTreeSet<ResourceKind> {
        self.descriptors.values().map(ResourceDescriptor::kind).collect()
    }
}

/// Kahn's algorithm with an ordered frontier.
fn topological_order(
    by_id: &BTreeMap<ResourceId, ResourceDescriptor>,
    dependents: &BTreeMap<ResourceId, BTreeSet<ResourceId>>,
) -> Vec<ResourceId> {
    let mut remaining: HashMap<&ResourceId, usize> = by_id
        .iter()
        .map(|(id, d)| (id, d.dependencies().len()))
        .collect();

    let mut frontier: BTreeSet<&ResourceId> = remaining
        .iter()
        .filter(|(_, count)| **count == 0)
        .map(|(id, _)| *id)
        .collect();

    let mut order = Vec::with_capacity(by_id.len());
    while let Some(id) = frontier.pop_first() {
        order.push(id.clone());
        let Some(children) = dependents.get(id) else {
            continue;
        };
        for child in children {
            if let Some(count) = remaining.get_mut(child) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    frontier.insert(child);
                }
            }
        }
    }
    order
}

/// Finds one cycle among the nodes Kahn's algorithm could not place.
///
/// Every unplaced node has at least one unplaced dependency, so walking the
/// smallest unplaced dependency from the smallest unplaced node must revisit
/// a node. The cycle is rotated to start at its smallest id and closed.
fn find_cycle(
    by_id: &BTreeMap<ResourceId, ResourceDescriptor>,
    placed: &BTreeSet<&ResourceId>,
) -> Vec<ResourceId> {
    let Some(start) = by_id.keys().find(|id| !placed.contains(id)) else {
        return Vec::new();
    };

    let mut path: Vec<&ResourceId> = Vec::new();
    let mut seen: HashMap<&ResourceId, usize> = HashMap::new();
    let mut current = start;

    loop {
        if let Some(&index) = seen.get(current) {
            let mut cycle: Vec<ResourceId> = path[index..].iter().map(|id| (*id).clone()).collect();
            let min_at = cycle
                .iter()
                .enumerate()
                .min_by(|a, b| a.1.cmp(b.1))
                .map_or(0, |(i, _)| i);
            cycle.rotate_left(min_at);
            if let Some(first) = cycle.first().cloned() {
                cycle.push(first);
            }
            return cycle;
        }

        seen.insert(current, path.len());
        path.push(current);

        let next = by_id.get(current).and_then(|d| {
            d.dependencies()
                .iter()
                .find(|dep| !placed.contains(dep))
        });
        match next {
            Some(dep) => current = dep,
            None => return path.into_iter().cloned().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{
        CodeReference, FunctionSpec, GatewayBindingSpec, GatewaySpec, ResourceSpec, RoleSpec,
    };
    use proptest::prelude::*;

    fn node(id: &str, deps: &[&str]) -> ResourceDescriptor {
        ResourceDescriptor::new(
            id,
            ResourceSpec::Gateway(GatewaySpec {
                name: id.to_string(),
                description: None,
                stage: String::from("prod"),
            }),
        )
        .depends_on(deps.iter().copied())
    }

    fn ids(list: &[ResourceId]) -> Vec<&str> {
        list.iter().map(ResourceId::as_str).collect()
    }

    fn scenario() -> Vec<ResourceDescriptor> {
        vec![
            ResourceDescriptor::new(
                "r1",
                ResourceSpec::Role(RoleSpec {
                    name: String::from("lambda-eks-role"),
                    trusted_service: String::from("lambda.amazonaws.com"),
                    managed_policy_arns: vec![],
                    description: None,
                    permissions_boundary: None,
                }),
            ),
            ResourceDescriptor::new(
                "f1",
                ResourceSpec::Function(FunctionSpec {
                    name: String::from("eks-setup"),
                    code: CodeReference::ZipFile {
                        path: String::from("function.zip"),
                    },
                    runtime: String::from("go1.x"),
                    handler: String::from("main"),
                    role: ResourceId::new("r1"),
                    description: None,
                    memory_mb: None,
                    timeout_secs: None,
                }),
            ),
            ResourceDescriptor::new(
                "g1",
                ResourceSpec::Gateway(GatewaySpec {
                    name: String::from("eks-setup"),
                    description: None,
                    stage: String::from("prod"),
                }),
            ),
            ResourceDescriptor::new(
                "b1",
                ResourceSpec::GatewayBinding(GatewayBindingSpec {
                    function: ResourceId::new("f1"),
                    gateway: ResourceId::new("g1"),
                    path: String::from("/eks-setup"),
                    http_method: String::from("POST"),
                }),
            ),
        ]
    }

    #[test]
    fn test_literal_scenario_orders() {
        let graph = DependencyGraph::build(scenario()).unwrap();
        assert_eq!(ids(graph.creation_order()), vec!["g1", "r1", "f1", "b1"]);
        assert_eq!(ids(&graph.deletion_order()), vec!["b1", "f1", "r1", "g1"]);
        assert_eq!(graph.len(), 4);
        assert_eq!(graph.position(&ResourceId::new("f1")), Some(2));

        let dependents = graph.dependents(&ResourceId::new("f1")).unwrap();
        assert!(dependents.contains(&ResourceId::new("b1")));
    }

    #[test]
    fn test_duplicate_id() {
        let err = DependencyGraph::build(vec![node("a", &[]), node("a", &[])]).unwrap_err();
        assert_eq!(
            err,
            GraphError::DuplicateId {
                id: ResourceId::new("a")
            }
        );
    }

    #[test]
    fn test_unknown_dependency() {
        let err = DependencyGraph::build(vec![node("a", &["ghost"])]).unwrap_err();
        assert_eq!(
            err,
            GraphError::UnknownDependency {
                resource: ResourceId::new("a"),
                missing: ResourceId::new("ghost"),
            }
        );
    }

    #[test]
    fn test_duplicate_reported_before_unknown() {
        let err =
            DependencyGraph::build(vec![node("a", &["ghost"]), node("a", &[])]).unwrap_err();
        assert!(matches!(err, GraphError::DuplicateId { .. }));
    }

    #[test]
    fn test_self_dependency() {
        let err = DependencyGraph::build(vec![node("a", &["a"])]).unwrap_err();
        assert_eq!(
            err,
            GraphError::CycleDetected {
                cycle: vec![ResourceId::new("a")]
            }
        );
    }

    #[test]
    fn test_cycle_is_closed_and_rotated() {
        let err = DependencyGraph::build(vec![
            node("c", &["a"]),
            node("b", &["c"]),
            node("a", &["b"]),
            node("z", &["c"]),
        ])
        .unwrap_err();

        let GraphError::CycleDetected { cycle } = err else {
            panic!("expected cycle");
        };
        assert_eq!(ids(&cycle), vec!["a", "b", "c", "a"]);
    }

    #[test]
    fn test_empty_graph() {
        let graph = DependencyGraph::build(Vec::new()).unwrap();
        assert!(graph.is_empty());
        assert!(graph.deletion_order().is_empty());
    }

    fn dag_strategy() -> impl Strategy<Value = Vec<ResourceDescriptor>> {
        (1usize..12)
            .prop_flat_map(|n| {
                (
                    Just((0..n).collect::<Vec<_>>()).prop_shuffle(),
                    prop::collection::vec(any::<bool>(), n * n),
                )
            })
            .prop_map(|(names, edges)| {
                let n = names.len();
                (0..n)
                    .map(|i| {
                        let deps: Vec<String> = (0..i)
                            .filter(|j| edges[i * n + j])
                            .map(|j| format!("n{:02}", names[j]))
                            .collect();
                        let id = format!("n{:02}", names[i]);
                        ResourceDescriptor::new(
                            id.as_str(),
                            ResourceSpec::Gateway(GatewaySpec {
                                name: id.clone(),
                                description: None,
                                stage: String::from("prod"),
                            }),
                        )
                        .depends_on(deps)
                    })
                    .collect()
            })
    }

    proptest! {
        #[test]
        fn prop_creation_order_is_topological(descriptors in dag_strategy()) {
            let graph = DependencyGraph::build(descriptors.clone()).unwrap();
            let order = graph.creation_order();
            prop_assert_eq!(order.len(), descriptors.len());

            for d in &descriptors {
                let at = graph.position(d.id()).unwrap();
                for dep in d.dependencies() {
                    prop_assert!(graph.position(dep).unwrap() < at);
                }
            }

            let mut reversed = graph.deletion_order();
            reversed.reverse();
            prop_assert_eq!(reversed.as_slice(), order);
        }

        #[test]
        fn prop_cycles_are_rejected(
            descriptors in dag_strategy(),
            ring in 2usize..6,
        ) {
            let mut all = descriptors;
            for i in 0..ring {
                let next = format!("ring{}", (i + 1) % ring);
                all.push(node(&format!("ring{i}"), &[next.as_str()]));
            }

            let err = DependencyGraph::build(all.clone()).unwrap_err();
            let GraphError::CycleDetected { cycle } = err else {
                return Err(TestCaseError::fail("expected a cycle"));
            };
            prop_assert!(cycle.len() >= 3);
            prop_assert_eq!(cycle.first(), cycle.last());

            for pair in cycle.windows(2) {
                let from = all.iter().find(|d| d.id() == &pair[0]).unwrap();
                prop_assert!(from.dependencies().contains(&pair[1]));
            }
        }
    }
}
