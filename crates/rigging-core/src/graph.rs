//! Dependency graph resolution
//!
//! Expands a set of requested fixture names to its transitive dependency
//! closure, then produces the instantiation order (dependencies first) or a
//! [`ComposeError::CyclicDependency`] carrying the offending chain. Cycle
//! detection runs before any setup executes.

use indexmap::IndexMap;
use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::errors::{ComposeError, Result};
use crate::registry::FixtureRegistry;

/// Compute the instantiation order for `requested` plus every transitive
/// dependency, dependencies first
///
/// Deterministic for a given registry and request: names are discovered in
/// request order and registry declaration order.
pub(crate) fn instantiation_order(
    registry: &FixtureRegistry,
    requested: &[String],
) -> Result<Vec<String>> {
    // Transitive closure, discovery-ordered.
    let mut indices: IndexMap<String, u32> = IndexMap::new();
    let mut queue: Vec<String> = Vec::new();
    for name in requested {
        if registry.get(name).is_none() {
            return Err(ComposeError::unknown(name.clone()));
        }
        if !indices.contains_key(name) {
            indices.insert(name.clone(), indices.len() as u32);
            queue.push(name.clone());
        }
    }
    while let Some(name) = queue.pop() {
        let def = registry
            .get(&name)
            .ok_or_else(|| ComposeError::unknown(name.clone()))?;
        for dep in def.dependencies() {
            if dep == &name {
                return Err(ComposeError::CyclicDependency {
                    chain: vec![name.clone(), name.clone()],
                });
            }
            if registry.get(dep).is_none() {
                return Err(ComposeError::unknown(dep.clone()));
            }
            if !indices.contains_key(dep) {
                indices.insert(dep.clone(), indices.len() as u32);
                queue.push(dep.clone());
            }
        }
    }

    let mut graph: DiGraphMap<u32, ()> = DiGraphMap::new();
    for &idx in indices.values() {
        graph.add_node(idx);
    }
    for (name, &idx) in &indices {
        let def = registry
            .get(name)
            .ok_or_else(|| ComposeError::unknown(name.clone()))?;
        for dep in def.dependencies() {
            let dep_idx = indices
                .get(dep)
                .copied()
                .ok_or_else(|| ComposeError::internal(format!("dependency `{dep}` not indexed")))?;
            graph.add_edge(dep_idx, idx, ());
        }
    }

    let names: Vec<String> = indices.keys().cloned().collect();
    match toposort(&graph, None) {
        Ok(order) => Ok(order
            .into_iter()
            .map(|idx| names[idx as usize].clone())
            .collect()),
        Err(cycle) => Err(ComposeError::CyclicDependency {
            chain: cycle_chain(&graph, cycle.node_id(), &names),
        }),
    }
}

/// Walk the graph from a node known to sit on a cycle and extract one
/// concrete chain back to it, for the error message
fn cycle_chain(graph: &DiGraphMap<u32, ()>, start: u32, names: &[String]) -> Vec<String> {
    let mut stack: Vec<(u32, Vec<u32>)> = vec![(start, vec![start])];
    let mut visited = std::collections::BTreeSet::new();
    while let Some((node, path)) = stack.pop() {
        for next in graph.neighbors(node) {
            if next == start {
                let mut chain: Vec<String> =
                    path.iter().map(|&i| names[i as usize].clone()).collect();
                chain.push(names[start as usize].clone());
                return chain;
            }
            if visited.insert(next) {
                let mut extended = path.clone();
                extended.push(next);
                stack.push((next, extended));
            }
        }
    }
    // Unreachable for a true cycle; still name the node.
    vec![names[start as usize].clone()]
}
