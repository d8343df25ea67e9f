//! Shared utilities for graph algorithms
//!
//! Provides a read-only, optimized view of the fact graph topology for algorithm execution.

use std::collections::HashMap;

/// Node Identifier type (u64)
pub type NodeId = u64;

/// A dense, integer-indexed view of the graph topology using Compressed Sparse Row (CSR) format.
///
/// Relation labels are not kept: a fact `(h, r, t)` contributes one `h -> t` edge.
/// Parallel edges produced by different relations are collapsed.
#[derive(Debug, Clone)]
pub struct GraphView {
    /// Number of nodes
    pub node_count: usize,
    /// Mapping from dense index (0..N) back to NodeId
    pub index_to_node: Vec<NodeId>,
    /// Mapping from NodeId to dense index
    pub node_to_index: HashMap<NodeId, usize>,

    /// Outgoing edges CSR structure
    /// Offsets into `out_targets`. Size = node_count + 1
    pub out_offsets: Vec<usize>,
    /// Contiguous array of target node indices
    pub out_targets: Vec<usize>,

    /// Incoming edges CSR structure (Compressed Sparse Column effectively)
    /// Offsets into `in_sources`. Size = node_count + 1
    pub in_offsets: Vec<usize>,
    /// Contiguous array of source node indices
    pub in_sources: Vec<usize>,
}

impl GraphView {
    /// Get outgoing neighbors (successors) of a node
    pub fn successors(&self, idx: usize) -> &[usize] {
        let start = self.out_offsets[idx];
        let end = self.out_offsets[idx + 1];
        &self.out_targets[start..end]
    }

    /// Get incoming neighbors (predecessors) of a node
    pub fn predecessors(&self, idx: usize) -> &[usize] {
        let start = self.in_offsets[idx];
        let end = self.in_offsets[idx + 1];
        &self.in_sources[start..end]
    }

    /// Dense index of a node, if present in the view
    pub fn index_of(&self, node: NodeId) -> Option<usize> {
        self.node_to_index.get(&node).copied()
    }

    /// Build a view over `nodes` from a list of directed `(source, target)` pairs.
    ///
    /// Edges that reference a node outside `nodes` are skipped. Neighbour lists are
    /// sorted and deduplicated so traversal order is deterministic.
    pub fn from_edges(nodes: &[NodeId], edges: impl IntoIterator<Item = (NodeId, NodeId)>) -> Self {
        let node_count = nodes.len();
        let index_to_node = nodes.to_vec();
        let node_to_index: HashMap<NodeId, usize> = nodes
            .iter()
            .enumerate()
            .map(|(idx, &id)| (id, idx))
            .collect();

        let mut outgoing = vec![Vec::new(); node_count];
        let mut incoming = vec![Vec::new(); node_count];
        for (source, target) in edges {
            let (Some(&s), Some(&t)) = (node_to_index.get(&source), node_to_index.get(&target)) else {
                continue;
            };
            outgoing[s].push(t);
            incoming[t].push(s);
        }

        let mut out_offsets = Vec::with_capacity(node_count + 1);
        let mut out_targets = Vec::new();
        out_offsets.push(0);
        for mut neighbors in outgoing {
            neighbors.sort_unstable();
            neighbors.dedup();
            out_targets.extend(neighbors);
            out_offsets.push(out_targets.len());
        }

        let mut in_offsets = Vec::with_capacity(node_count + 1);
        let mut in_sources = Vec::new();
        in_offsets.push(0);
        for mut sources in incoming {
            sources.sort_unstable();
            sources.dedup();
            in_sources.extend(sources);
            in_offsets.push(in_sources.len());
        }

        GraphView {
            node_count,
            index_to_node,
            node_to_index,
            out_offsets,
            out_targets,
            in_offsets,
            in_sources,
        }
    }
}
