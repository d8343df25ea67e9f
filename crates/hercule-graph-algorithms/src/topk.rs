//! Bounded top-k selection
//!
//! Keeps the `k` highest scores with a min-heap of size `k`. Ties are broken by the
//! lower node id, so the output order is total and deterministic.

use super::common::NodeId;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// A node with its score
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ScoredNode {
    pub node: NodeId,
    pub score: f64,
}

impl ScoredNode {
    pub fn new(node: NodeId, score: f64) -> Self {
        Self { node, score }
    }

    /// Ranking order: higher score first, then lower node id. NaN sorts last.
    pub fn rank_cmp(&self, other: &Self) -> Ordering {
        match (self.score.is_nan(), other.score.is_nan()) {
            (true, false) => return Ordering::Greater,
            (false, true) => return Ordering::Less,
            _ => {}
        }
        other
            .score
            .partial_cmp(&self.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| self.node.cmp(&other.node))
    }
}

/// Heap entry ordered so that the *worst* ranked element sits on top
struct Worst(ScoredNode);

impl PartialEq for Worst {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Worst {}

impl PartialOrd for Worst {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Worst {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.rank_cmp(&other.0)
    }
}

/// Select the `k` best scored nodes, best first
pub fn top_k(scores: impl IntoIterator<Item = ScoredNode>, k: usize) -> Vec<ScoredNode> {
    if k == 0 {
        return Vec::new();
    }

    let mut heap: BinaryHeap<Worst> = BinaryHeap::with_capacity(k + 1);
    for candidate in scores {
        if heap.len() < k {
            heap.push(Worst(candidate));
            continue;
        }
        let replace = heap
            .peek()
            .map(|worst| candidate.rank_cmp(&worst.0) == Ordering::Less)
            .unwrap_or(false);
        if replace {
            heap.pop();
            heap.push(Worst(candidate));
        }
    }

    let mut result: Vec<ScoredNode> = heap.into_iter().map(|w| w.0).collect();
    result.sort_by(|a, b| a.rank_cmp(b));
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_top_k_orders_by_score() {
        let scores = vec![
            ScoredNode::new(1, 0.1),
            ScoredNode::new(2, 0.9),
            ScoredNode::new(3, 0.5),
            ScoredNode::new(4, 0.7),
        ];
        let best = top_k(scores, 2);
        assert_eq!(best.iter().map(|s| s.node).collect::<Vec<_>>(), vec![2, 4]);
    }

    #[test]
    fn test_ties_prefer_lower_id() {
        let scores = vec![
            ScoredNode::new(9, 1.0),
            ScoredNode::new(3, 1.0),
            ScoredNode::new(5, 1.0),
            ScoredNode::new(1, 0.2),
        ];
        let best = top_k(scores, 3);
        assert_eq!(best.iter().map(|s| s.node).collect::<Vec<_>>(), vec![3, 5, 9]);
    }

    #[test]
    fn test_nan_ranks_last() {
        let scores = vec![ScoredNode::new(1, f64::NAN), ScoredNode::new(2, -5.0)];
        let best = top_k(scores, 1);
        assert_eq!(best[0].node, 2);
    }

    #[test]
    fn test_k_larger_than_input() {
        let best = top_k(vec![ScoredNode::new(1, 0.0)], 10);
        assert_eq!(best.len(), 1);
        assert!(top_k(Vec::new(), 0).is_empty());
    }
}
