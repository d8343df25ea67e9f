//! Rank-based link prediction evaluation
//!
//! For a held-out fact (h, r, t) the true tail is ranked among all candidate tails
//! of (h, r, ?) and the true head among all candidate heads of (?, r, t).
//!
//! - **Filtered**: candidates forming another known fact are skipped, so a model is
//!   not penalised for ranking a different true answer first.
//! - **Kind-restricted**: candidates come from the relation's declared range
//!   (domain for heads), falling back to the kind of the true answer when the
//!   relation is unconstrained and the answer is classified.
//!
//! Ties are ordered by ascending entity id, the same order inference uses.

use crate::graph::{Catalog, EntityId, EntityKind, FactKey, RelationSignature, TripleStore};
use crate::kge::scoring::ScoringFunction;
use crate::kge::snapshot::EmbeddingSnapshot;
use ndarray::Array2;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Rank metrics over a set of queries
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RankMetrics {
    /// Mean reciprocal rank
    pub mrr: f32,
    /// Mean rank
    pub mr: f32,
    pub hits_at_1: f32,
    pub hits_at_3: f32,
    pub hits_at_10: f32,
    /// Head and tail queries evaluated
    pub num_queries: usize,
}

impl RankMetrics {
    pub fn from_ranks(ranks: &[usize]) -> Self {
        if ranks.is_empty() {
            return Self::default();
        }

        let n = ranks.len() as f32;
        let hits = |k: usize| ranks.iter().filter(|&&r| r <= k).count() as f32 / n;
        Self {
            mrr: ranks.iter().map(|&r| 1.0 / r as f32).sum::<f32>() / n,
            mr: ranks.iter().map(|&r| r as f32).sum::<f32>() / n,
            hits_at_1: hits(1),
            hits_at_3: hits(3),
            hits_at_10: hits(10),
            num_queries: ranks.len(),
        }
    }

    pub fn summary(&self) -> String {
        format!(
            "MRR: {:.4} | MR: {:.1} | H@1: {:.3} | H@3: {:.3} | H@10: {:.3} (n={})",
            self.mrr, self.mr, self.hits_at_1, self.hits_at_3, self.hits_at_10, self.num_queries
        )
    }
}

/// Filtered ranker over a set of embedding tables
pub(crate) struct Evaluator<'a> {
    store: &'a TripleStore,
    scoring: ScoringFunction,
    entities: &'a Array2<f32>,
    relations: &'a Array2<f32>,
}

impl<'a> Evaluator<'a> {
    pub(crate) fn new(
        store: &'a TripleStore,
        scoring: ScoringFunction,
        entities: &'a Array2<f32>,
        relations: &'a Array2<f32>,
    ) -> Self {
        Self {
            store,
            scoring,
            entities,
            relations,
        }
    }

    fn score(&self, key: &FactKey) -> f32 {
        self.scoring.score(
            self.entities.row(key.head.index()),
            self.relations.row(key.relation.index()),
            self.entities.row(key.tail.index()),
        )
    }

    fn signature(&self, key: &FactKey) -> RelationSignature {
        self.store
            .catalog()
            .lookup_relation(key.relation)
            .map(|r| r.signature)
            .unwrap_or_default()
    }

    /// Filtered rank of the true tail of `key`
    pub(crate) fn rank_tail(&self, key: &FactKey) -> usize {
        let pool = candidate_pool(self.store.catalog(), self.signature(key).range, key.tail, self.entities.nrows());
        self.rank(key, key.tail, &pool, |candidate| FactKey::new(key.head, key.relation, candidate))
    }

    /// Filtered rank of the true head of `key`
    pub(crate) fn rank_head(&self, key: &FactKey) -> usize {
        let pool = candidate_pool(self.store.catalog(), self.signature(key).domain, key.head, self.entities.nrows());
        self.rank(key, key.head, &pool, |candidate| FactKey::new(candidate, key.relation, key.tail))
    }

    fn rank(
        &self,
        key: &FactKey,
        answer: EntityId,
        pool: &[EntityId],
        corrupt: impl Fn(EntityId) -> FactKey,
    ) -> usize {
        let target = self.score(key);
        1 + pool
            .iter()
            .copied()
            .filter(|&candidate| candidate != answer)
            .filter(|&candidate| {
                let corrupted = corrupt(candidate);
                if self.store.contains(&corrupted) {
                    return false;
                }
                let score = self.score(&corrupted);
                score > target || (score == target && candidate < answer)
            })
            .count()
    }

    /// Head and tail ranks of every fact, in input order
    pub(crate) fn metrics(&self, facts: &[FactKey]) -> RankMetrics {
        let ranks: Vec<usize> = facts
            .par_iter()
            .flat_map_iter(|key| [self.rank_tail(key), self.rank_head(key)])
            .collect();
        RankMetrics::from_ranks(&ranks)
    }
}

/// Filtered metrics of a published snapshot over every stored fact it has rows
/// for. Facts about entities or relations added after the snapshot was trained
/// are skipped.
pub fn evaluate_snapshot(store: &TripleStore, snapshot: &EmbeddingSnapshot) -> RankMetrics {
    let keys: Vec<FactKey> = store
        .facts()
        .iter()
        .map(|fact| fact.key)
        .filter(|key| {
            key.head.index() < snapshot.entity_count()
                && key.tail.index() < snapshot.entity_count()
                && key.relation.index() < snapshot.relation_count()
        })
        .collect();
    Evaluator::new(store, snapshot.scoring(), snapshot.entity_table(), snapshot.relation_table()).metrics(&keys)
}

/// Candidates for a slot: declared kind, else the answer's kind if classified,
/// else every entity. Ids without an embedding row are left out.
fn candidate_pool(catalog: &Catalog, declared: Option<EntityKind>, answer: EntityId, rows: usize) -> Vec<EntityId> {
    let kind = declared.or_else(|| catalog.kind_of(answer).ok().filter(EntityKind::is_classified));
    match kind {
        Some(kind) => catalog
            .entities_of_kind(kind)
            .iter()
            .copied()
            .filter(|id| id.index() < rows)
            .collect(),
        None => (0..rows.min(catalog.entity_count()) as u32).map(EntityId::new).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{MergePolicy, RawFact};
    use ndarray::array;

    #[test]
    fn test_rank_metrics_from_ranks() {
        let metrics = RankMetrics::from_ranks(&[1, 2, 4, 20]);
        assert!((metrics.mrr - (1.0 + 0.5 + 0.25 + 0.05) / 4.0).abs() < 1e-6);
        assert_eq!(metrics.hits_at_1, 0.25);
        assert_eq!(metrics.hits_at_3, 0.5);
        assert_eq!(metrics.hits_at_10, 0.75);
        assert_eq!(metrics.num_queries, 4);
        assert_eq!(RankMetrics::from_ranks(&[]), RankMetrics::default());
    }

    /// Vaccine-A treats Measles and Cholera; ORS is an unrelated drug.
    fn store() -> TripleStore {
        let mut store = TripleStore::new();
        store
            .add_facts(
                &[
                    RawFact::typed("Vaccine-A", EntityKind::Drug, "treats", "Measles", EntityKind::Disease),
                    RawFact::typed("Vaccine-A", EntityKind::Drug, "treats", "Cholera", EntityKind::Disease),
                    RawFact::typed("ORS", EntityKind::Drug, "treats", "Dengue", EntityKind::Disease),
                ],
                MergePolicy::Max,
            )
            .unwrap();
        store
    }

    #[test]
    fn test_filtered_tail_rank() {
        let store = store();
        // ids: Vaccine-A 0, Measles 1, Cholera 2, ORS 3, Dengue 4
        let entities = array![[0.0f32], [0.5], [1.0], [5.0], [0.9]];
        let relations = array![[1.0f32]];
        let evaluator = Evaluator::new(&store, ScoringFunction::TransE, &entities, &relations);

        // Cholera scores best for (Vaccine-A, treats, ?) but is a known fact and is
        // filtered; Dengue still beats Measles.
        let key = store.key_for_names("Vaccine-A", "treats", "Measles").unwrap();
        assert_eq!(evaluator.rank_tail(&key), 2);

        let key = store.key_for_names("Vaccine-A", "treats", "Cholera").unwrap();
        assert_eq!(evaluator.rank_tail(&key), 1);
    }

    #[test]
    fn test_ties_rank_lower_id_first() {
        let store = store();
        let entities = array![[0.0f32], [1.0], [1.0], [5.0], [1.0]];
        let relations = array![[1.0f32]];
        let evaluator = Evaluator::new(&store, ScoringFunction::TransE, &entities, &relations);

        // Dengue (4) ties with Measles (1) but has the higher id
        let key = store.key_for_names("Vaccine-A", "treats", "Measles").unwrap();
        assert_eq!(evaluator.rank_tail(&key), 1);
    }
}
