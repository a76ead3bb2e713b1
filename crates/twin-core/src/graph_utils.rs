use crate::{BusId, Network};
use petgraph::graph::NodeIndex;
use petgraph::visit::EdgeRef;
use std::collections::{HashSet, VecDeque};

/// Breadth-first walk over in-service elements, starting from `roots`.
fn reachable(
    network: &Network,
    roots: &[NodeIndex],
    visited: &mut HashSet<NodeIndex>,
) -> Vec<NodeIndex> {
    let graph = network.graph();
    let mut queue: VecDeque<NodeIndex> = roots.iter().copied().collect();
    let mut members = Vec::new();
    while let Some(node) = queue.pop_front() {
        if !visited.insert(node) {
            continue;
        }
        members.push(node);
        for edge in graph.edges(node) {
            if !edge.weight().in_service() {
                continue;
            }
            let neighbor = if edge.source() == node {
                edge.target()
            } else {
                edge.source()
            };
            if !visited.contains(&neighbor) {
                queue.push_back(neighbor);
            }
        }
    }
    members
}

/// Electrically connected groups of buses, ignoring out-of-service elements.
///
/// Islands are ordered by their lowest bus index and members keep Y-bus order.
pub fn islands(network: &Network) -> Vec<Vec<BusId>> {
    let graph = network.graph();
    let mut visited = HashSet::new();
    let mut islands = Vec::new();
    for start in graph.node_indices() {
        if visited.contains(&start) {
            continue;
        }
        let mut members = reachable(network, &[start], &mut visited);
        members.sort_by_key(|node| node.index());
        islands.push(members.into_iter().map(|n| graph[n].id.clone()).collect());
    }
    islands
}

/// Buses with no in-service path to any of `roots`, in Y-bus order.
///
/// Unknown root ids are ignored.
pub fn unreachable_buses(network: &Network, roots: &[BusId]) -> Vec<BusId> {
    let starts: Vec<NodeIndex> = roots.iter().filter_map(|id| network.node_index(id)).collect();
    let mut visited = HashSet::new();
    reachable(network, &starts, &mut visited);
    network
        .graph()
        .node_indices()
        .filter(|node| !visited.contains(node))
        .map(|node| network.graph()[node].id.clone())
        .collect()
}
