//! Dependency graph ordering for plugin loads.

use std::collections::{BTreeMap, BTreeSet};

/// Result of a topological sort.
pub struct TopoSort {
    /// Nodes in dependency order: every node follows all its dependencies.
    pub sorted: Vec<String>,

    /// Nodes that could not be ordered because they sit on a cycle (or
    /// depend on one), with their unsatisfied dependencies.
    pub error_set: BTreeMap<String, BTreeSet<String>>,
}

/// Topologically sort `dependencies` (node → set of nodes it depends on).
///
/// The order is deterministic: among the nodes ready in the same round, the
/// lexicographically smaller id comes first.
pub fn topological_sort(dependencies: &BTreeMap<String, BTreeSet<String>>) -> TopoSort {
    let mut remaining = dependencies.clone();
    let mut sorted = Vec::new();
    let mut done: BTreeSet<String> = BTreeSet::new();

    loop {
        let ready: Vec<String> = remaining
            .iter()
            .filter(|(_, deps)| deps.iter().all(|d| done.contains(d)))
            .map(|(id, _)| id.clone())
            .collect();

        if ready.is_empty() {
            break;
        }

        for id in ready {
            remaining.remove(&id);
            done.insert(id.clone());
            sorted.push(id);
        }
    }

    let error_set = remaining
        .into_iter()
        .map(|(id, deps)| {
            let unsatisfied = deps.into_iter().filter(|d| !done.contains(d)).collect();
            (id, unsatisfied)
        })
        .collect();

    TopoSort { sorted, error_set }
}
