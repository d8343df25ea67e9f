//! Neighbourhood expansion
//!
//! Breadth-first expansion from a seed set, ignoring edge direction. Used to find
//! the entities whose embeddings are affected by a batch of new facts.

use super::common::{GraphView, NodeId};
use std::collections::{HashMap, VecDeque};

/// Nodes reached from a seed set within a hop budget
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Neighbourhood {
    /// Reached nodes in ascending id order (seeds included)
    pub nodes: Vec<NodeId>,
    /// Hop distance of every reached node from the nearest seed
    pub distances: HashMap<NodeId, usize>,
}

impl Neighbourhood {
    pub fn contains(&self, node: NodeId) -> bool {
        self.distances.contains_key(&node)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Undirected BFS distances from `seeds`, stopping at `max_hops`.
///
/// Seeds missing from the view are still reported at distance 0 so callers never
/// lose a node they asked about.
pub fn hop_distances(
    view: &GraphView,
    seeds: impl IntoIterator<Item = NodeId>,
    max_hops: usize,
) -> HashMap<NodeId, usize> {
    let mut distances: HashMap<NodeId, usize> = HashMap::new();
    let mut queue = VecDeque::new();

    for seed in seeds {
        if distances.insert(seed, 0).is_none() {
            if let Some(idx) = view.index_of(seed) {
                queue.push_back(idx);
            }
        }
    }

    while let Some(current_idx) = queue.pop_front() {
        let depth = distances[&view.index_to_node[current_idx]];
        if depth >= max_hops {
            continue;
        }

        let neighbours = view
            .successors(current_idx)
            .iter()
            .chain(view.predecessors(current_idx).iter());
        for &next_idx in neighbours {
            let next = view.index_to_node[next_idx];
            if !distances.contains_key(&next) {
                distances.insert(next, depth + 1);
                queue.push_back(next_idx);
            }
        }
    }

    distances
}

/// Seeds plus every node within `max_hops` undirected hops of them
pub fn neighbourhood(
    view: &GraphView,
    seeds: impl IntoIterator<Item = NodeId>,
    max_hops: usize,
) -> Neighbourhood {
    let distances = hop_distances(view, seeds, max_hops);
    let mut nodes: Vec<NodeId> = distances.keys().copied().collect();
    nodes.sort_unstable();
    Neighbourhood { nodes, distances }
}
