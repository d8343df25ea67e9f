//! In-memory triple store
//!
//! Holds the multi-relational graph as deduplicated `(head, relation, tail)` facts.
//! Uses hash maps for O(1) lookup:
//! - index: FactKey -> position in `facts`
//! - by_relation: RelationId -> positions (per-relation fact lists)
//!
//! `add_facts` is atomic per batch: every record is validated against the catalog
//! before anything is written.

use super::catalog::{canonical_name, Catalog};
use super::error::{GraphError, GraphResult};
use super::fact::{Fact, FactKey, IngestReport, MergePolicy, RawFact};
use super::schema::RelationSignature;
use super::types::{BatchId, EntityId, EntityKind, RelationId};
use chrono::{DateTime, Utc};
use hercule_graph_algorithms::{neighbourhood, GraphView};
use rand::Rng;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, info};

/// Draw budget per requested negative before sampling gives up
const MAX_DRAWS_PER_NEGATIVE: usize = 10;

/// How replacement entities are drawn when corrupting a fact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NegativeStrategy {
    /// Any entity in the catalog
    #[default]
    Uniform,
    /// Only entities with the same kind as the replaced one (harder negatives)
    KindConstrained,
}

/// A validated record waiting to be written
struct PlannedFact {
    head: String,
    head_kind: EntityKind,
    relation: String,
    tail: String,
    tail_kind: EntityKind,
    confidence: f32,
    timestamp: Option<DateTime<Utc>>,
}

/// Deduplicated fact storage with its catalog
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TripleStore {
    /// Entity/relation registry
    catalog: Catalog,

    /// Facts in insertion order
    facts: Vec<Fact>,

    /// Deduplication index
    index: FxHashMap<FactKey, usize>,

    /// Fact positions per relation id
    by_relation: Vec<Vec<usize>>,

    /// Last batch that changed the store
    current_batch: BatchId,
}

impl TripleStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self::default()
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Declare a relation signature before (or after) facts use it
    pub fn declare_relation(&mut self, name: &str, signature: RelationSignature) -> GraphResult<RelationId> {
        // Tightening a relation must not leave violating facts behind
        if let Some(existing) = self.catalog.resolve_relation(name) {
            for fact in self.facts_for_relation(existing) {
                let head = self.catalog.lookup(fact.key.head)?;
                let tail = self.catalog.lookup(fact.key.tail)?;
                if !signature.admits(head.kind, tail.kind) {
                    return Err(GraphError::SignatureViolation {
                        head: head.name.clone(),
                        head_kind: head.kind,
                        relation: canonical_name(name),
                        tail: tail.name.clone(),
                        tail_kind: tail.kind,
                        signature,
                    });
                }
            }
        }

        let id = self.catalog.declare_relation(name, signature)?;
        self.ensure_relation_slot(id);
        Ok(id)
    }

    /// Extend the catalog with the entities and relations of `vocabulary`, which
    /// must agree with this catalog on every id both of them know.
    ///
    /// Used when a snapshot trained elsewhere starts serving: afterwards every
    /// snapshot id resolves to the same name here. Nothing is written on a
    /// mismatch.
    pub fn adopt_vocabulary(&mut self, vocabulary: &Catalog) -> GraphResult<()> {
        for (ours, theirs) in self.catalog.entities().iter().zip(vocabulary.entities()) {
            if ours.name != theirs.name || ours.kind != theirs.kind {
                return Err(GraphError::VocabularyMismatch(format!(
                    "entity {} is '{}' ({}) here, '{}' ({}) in the imported vocabulary",
                    ours.id, ours.name, ours.kind, theirs.name, theirs.kind
                )));
            }
        }
        for (ours, theirs) in self.catalog.relations().iter().zip(vocabulary.relations()) {
            if ours.name != theirs.name {
                return Err(GraphError::VocabularyMismatch(format!(
                    "relation {} is '{}' here, '{}' in the imported vocabulary",
                    ours.id, ours.name, theirs.name
                )));
            }
        }

        let known_entities = self.catalog.entity_count();
        for entity in vocabulary.entities().iter().skip(known_entities) {
            self.catalog.resolve_or_create(&entity.name, entity.kind)?;
        }
        let known_relations = self.catalog.relation_count();
        for relation in vocabulary.relations().iter().skip(known_relations) {
            let id = self.catalog.declare_relation(&relation.name, relation.signature)?;
            self.ensure_relation_slot(id);
        }

        debug!(
            "Adopted vocabulary: {} entities, {} relations",
            self.catalog.entity_count(),
            self.catalog.relation_count()
        );
        Ok(())
    }

    /// Ingest a batch of raw facts.
    ///
    /// Repeated observations merge into the existing fact according to `policy`.
    /// Nothing is written if any record fails validation.
    pub fn add_facts(&mut self, batch: &[RawFact], policy: MergePolicy) -> GraphResult<IngestReport> {
        let planned = self.plan_batch(batch)?;

        let batch_id = self.current_batch.next();
        let entities_before = self.catalog.entity_count();
        let relations_before = self.catalog.relation_count();
        let mut report = IngestReport::default();
        let mut touched_entities = BTreeSet::new();
        let mut touched_relations = BTreeSet::new();

        for plan in planned {
            let head = self.catalog.resolve_or_create(&plan.head, plan.head_kind)?;
            let tail = self.catalog.resolve_or_create(&plan.tail, plan.tail_kind)?;
            let relation = self.catalog.resolve_or_create_relation(&plan.relation)?;
            self.ensure_relation_slot(relation);
            let key = FactKey::new(head, relation, tail);

            match self.index.get(&key) {
                Some(&pos) => {
                    let fact = &mut self.facts[pos];
                    if policy.merge(fact, plan.confidence, plan.timestamp) {
                        fact.last_batch = batch_id;
                        report.updated += 1;
                    } else {
                        report.unchanged += 1;
                        continue;
                    }
                }
                None => {
                    let pos = self.facts.len();
                    self.facts.push(Fact {
                        key,
                        confidence: plan.confidence,
                        timestamp: plan.timestamp,
                        observations: 1,
                        first_batch: batch_id,
                        last_batch: batch_id,
                    });
                    self.index.insert(key, pos);
                    self.by_relation[relation.index()].push(pos);
                    report.added += 1;
                }
            }

            touched_entities.insert(head);
            touched_entities.insert(tail);
            touched_relations.insert(relation);
        }

        report.new_entities = (entities_before..self.catalog.entity_count())
            .map(|i| EntityId::new(i as u32))
            .collect();
        report.new_relations = (relations_before..self.catalog.relation_count())
            .map(|i| RelationId::new(i as u32))
            .collect();
        report.touched_entities = touched_entities.into_iter().collect();
        report.touched_relations = touched_relations.into_iter().collect();

        if report.changed() {
            self.current_batch = batch_id;
            report.batch = Some(batch_id);
            info!(
                "Ingested {}: {} added, {} updated, {} unchanged, {} new entities",
                batch_id,
                report.added,
                report.updated,
                report.unchanged,
                report.new_entities.len()
            );
        } else {
            debug!("Batch of {} records changed nothing", batch.len());
        }

        Ok(report)
    }

    /// Validate every record and decide entity kinds without touching the store
    fn plan_batch(&self, batch: &[RawFact]) -> GraphResult<Vec<PlannedFact>> {
        let mut pending: FxHashMap<String, EntityKind> = FxHashMap::default();
        let mut planned = Vec::with_capacity(batch.len());

        for (i, raw) in batch.iter().enumerate() {
            if !raw.confidence.is_finite() || !(0.0..=1.0).contains(&raw.confidence) {
                return Err(GraphError::InvalidConfidence(raw.confidence));
            }

            let head = canonical_name(&raw.head_name);
            let tail = canonical_name(&raw.tail_name);
            let relation = canonical_name(&raw.relation_name);
            if head.is_empty() || tail.is_empty() || relation.is_empty() {
                return Err(GraphError::EmptyName(i));
            }

            let head_kind = self.classify(&head, raw.head_kind, &mut pending)?;
            let tail_kind = self.classify(&tail, raw.tail_kind, &mut pending)?;

            if let Some(relation_id) = self.catalog.resolve_relation(&relation) {
                let signature = self.catalog.lookup_relation(relation_id)?.signature;
                if !signature.admits(head_kind, tail_kind) {
                    return Err(GraphError::SignatureViolation {
                        head,
                        head_kind,
                        relation,
                        tail,
                        tail_kind,
                        signature,
                    });
                }
            }

            planned.push(PlannedFact {
                head,
                head_kind,
                relation,
                tail,
                tail_kind,
                confidence: raw.confidence,
                timestamp: raw.timestamp,
            });
        }

        Ok(planned)
    }

    /// Kind of a (canonical) name: catalog entry, then declared kind, then the
    /// `Kind::` prefix, then `Other`.
    fn classify(
        &self,
        name: &str,
        declared: Option<EntityKind>,
        pending: &mut FxHashMap<String, EntityKind>,
    ) -> GraphResult<EntityKind> {
        let existing = match self.catalog.resolve(name) {
            Some(id) => Some(self.catalog.kind_of(id)?),
            None => pending.get(name).copied(),
        };

        match (existing, declared) {
            (Some(existing), Some(requested)) if existing != requested => Err(GraphError::KindConflict {
                name: name.to_string(),
                existing,
                requested,
            }),
            (Some(existing), _) => Ok(existing),
            (None, declared) => {
                let kind = declared
                    .or_else(|| EntityKind::from_prefixed_name(name))
                    .unwrap_or(EntityKind::Other);
                pending.insert(name.to_string(), kind);
                Ok(kind)
            }
        }
    }

    fn ensure_relation_slot(&mut self, relation: RelationId) {
        if self.by_relation.len() <= relation.index() {
            self.by_relation.resize_with(relation.index() + 1, Vec::new);
        }
    }

    /// Produce up to `k` corrupted copies of `triple` that are not stored facts.
    ///
    /// Head or tail is replaced with probability 1/2 each. Fewer than `k` negatives
    /// are returned when the replacement pool is too small.
    pub fn sample_negatives<R: Rng + ?Sized>(
        &self,
        triple: &FactKey,
        k: usize,
        strategy: NegativeStrategy,
        rng: &mut R,
    ) -> GraphResult<Vec<FactKey>> {
        let head_kind = self.catalog.kind_of(triple.head)?;
        let tail_kind = self.catalog.kind_of(triple.tail)?;

        if strategy == NegativeStrategy::KindConstrained {
            for (entity, kind) in [(triple.head, head_kind), (triple.tail, tail_kind)] {
                if !kind.is_classified() {
                    let name = self.catalog.lookup(entity)?.name.clone();
                    return Err(GraphError::UnknownEntityKind(name));
                }
            }
        }

        let entity_count = self.catalog.entity_count();
        let mut negatives = Vec::with_capacity(k);
        if k == 0 || entity_count < 2 {
            return Ok(negatives);
        }

        let mut seen = FxHashSet::default();
        for _ in 0..k * MAX_DRAWS_PER_NEGATIVE {
            if negatives.len() == k {
                break;
            }

            let corrupt_head = rng.gen_bool(0.5);
            let (kind, original) = if corrupt_head {
                (head_kind, triple.head)
            } else {
                (tail_kind, triple.tail)
            };

            let replacement = match strategy {
                NegativeStrategy::Uniform => EntityId::new(rng.gen_range(0..entity_count) as u32),
                NegativeStrategy::KindConstrained => {
                    let pool = self.catalog.entities_of_kind(kind);
                    if pool.len() < 2 {
                        continue;
                    }
                    pool[rng.gen_range(0..pool.len())]
                }
            };
            if replacement == original {
                continue;
            }

            let candidate = if corrupt_head {
                FactKey::new(replacement, triple.relation, triple.tail)
            } else {
                FactKey::new(triple.head, triple.relation, replacement)
            };
            if self.index.contains_key(&candidate) || !seen.insert(candidate) {
                continue;
            }
            negatives.push(candidate);
        }

        Ok(negatives)
    }

    /// Number of facts
    pub fn len(&self) -> usize {
        self.facts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }

    /// Facts in insertion order
    pub fn facts(&self) -> &[Fact] {
        &self.facts
    }

    pub fn get(&self, key: &FactKey) -> Option<&Fact> {
        self.index.get(key).map(|&pos| &self.facts[pos])
    }

    pub fn contains(&self, key: &FactKey) -> bool {
        self.index.contains_key(key)
    }

    /// Key of a fact given by names, if all three names and the fact exist
    pub fn key_for_names(&self, head: &str, relation: &str, tail: &str) -> Option<FactKey> {
        let key = FactKey::new(
            self.catalog.resolve(head)?,
            self.catalog.resolve_relation(relation)?,
            self.catalog.resolve(tail)?,
        );
        self.contains(&key).then_some(key)
    }

    pub fn facts_for_relation(&self, relation: RelationId) -> impl Iterator<Item = &Fact> {
        self.by_relation
            .get(relation.index())
            .into_iter()
            .flatten()
            .map(move |&pos| &self.facts[pos])
    }

    /// Fact count per relation, indexed by relation id
    pub fn relation_counts(&self) -> Vec<usize> {
        (0..self.catalog.relation_count())
            .map(|i| self.by_relation.get(i).map_or(0, Vec::len))
            .collect()
    }

    /// Last batch that changed the store
    pub fn current_batch(&self) -> BatchId {
        self.current_batch
    }

    /// Earliest and latest batch represented in the stored facts
    pub fn batch_range(&self) -> Option<(BatchId, BatchId)> {
        let first = self.facts.iter().map(|f| f.first_batch).min()?;
        Some((first, self.current_batch))
    }

    /// CSR topology view (relation labels dropped) for the algorithms crate
    pub fn graph_view(&self) -> GraphView {
        let nodes: Vec<u64> = (0..self.catalog.entity_count() as u64).collect();
        let edges = self
            .facts
            .iter()
            .map(|f| (f.key.head.as_u32() as u64, f.key.tail.as_u32() as u64));
        GraphView::from_edges(&nodes, edges)
    }

    /// Seeds plus every entity within `hops` undirected hops, ascending
    pub fn neighbours(&self, seeds: &[EntityId], hops: usize) -> Vec<EntityId> {
        let view = self.graph_view();
        neighbourhood(&view, seeds.iter().map(|e| e.as_u32() as u64), hops)
            .nodes
            .into_iter()
            .map(|n| EntityId::new(n as u32))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn outbreak_batch() -> Vec<RawFact> {
        vec![
            RawFact::typed("Measles", EntityKind::Disease, "reported-in", "Country::NGA", EntityKind::Country),
            RawFact::typed("Cholera", EntityKind::Disease, "reported-in", "Country::YEM", EntityKind::Country),
            RawFact::typed("Vaccine-A", EntityKind::Drug, "treats", "Measles", EntityKind::Disease),
            RawFact::typed("ORS", EntityKind::Drug, "treats", "Cholera", EntityKind::Disease),
        ]
    }

    #[test]
    fn test_add_facts_counts() {
        let mut store = TripleStore::new();
        let report = store.add_facts(&outbreak_batch(), MergePolicy::Max).unwrap();

        assert_eq!(report.added, 4);
        assert_eq!(report.updated, 0);
        assert_eq!(report.batch, Some(BatchId(1)));
        assert_eq!(report.new_entities.len(), 6);
        assert_eq!(report.new_relations.len(), 2);
        assert_eq!(store.len(), 4);
        assert_eq!(store.relation_counts(), vec![2, 2]);
    }

    #[test]
    fn test_repeated_observation_updates_not_duplicates() {
        let mut store = TripleStore::new();
        store.add_facts(&outbreak_batch(), MergePolicy::Max).unwrap();

        let stronger = vec![RawFact::new("Measles", "reported-in", "Country::NGA").with_confidence(1.0)];
        let weaker = vec![RawFact::new("Measles", "reported-in", "Country::NGA").with_confidence(0.3)];

        let report = store.add_facts(&weaker, MergePolicy::Max).unwrap();
        assert_eq!((report.added, report.updated, report.unchanged), (0, 0, 1));
        assert_eq!(report.batch, None);

        let report = store.add_facts(&stronger, MergePolicy::WeightedAverage).unwrap();
        assert_eq!(report.updated, 1);
        assert_eq!(store.len(), 4);
        assert_eq!(store.current_batch(), BatchId(2));
    }

    #[test]
    fn test_batch_is_atomic_on_kind_conflict() {
        let mut store = TripleStore::new();
        store.add_facts(&outbreak_batch(), MergePolicy::Max).unwrap();
        let before = store.clone();

        let batch = vec![
            RawFact::typed("Ebola", EntityKind::Disease, "reported-in", "Country::COD", EntityKind::Country),
            RawFact::typed("Measles", EntityKind::Drug, "treats", "Ebola", EntityKind::Disease),
        ];
        let err = store.add_facts(&batch, MergePolicy::Max).unwrap_err();

        assert!(matches!(err, GraphError::KindConflict { .. }));
        assert_eq!(store, before);
    }

    #[test]
    fn test_conflict_inside_one_batch() {
        let mut store = TripleStore::new();
        let batch = vec![
            RawFact::typed("Lagos Depot", EntityKind::Facility, "supplied-by", "Shipment-7", EntityKind::Shipment),
            RawFact::typed("Shipment-7", EntityKind::Drug, "treats", "Measles", EntityKind::Disease),
        ];
        assert!(matches!(
            store.add_facts(&batch, MergePolicy::Max),
            Err(GraphError::KindConflict { .. })
        ));
        assert!(store.is_empty());
        assert_eq!(store.catalog().entity_count(), 0);
    }

    #[test]
    fn test_kind_classification_from_prefix() {
        let mut store = TripleStore::new();
        store
            .add_facts(
                &[RawFact::new("Country::NGA", "has_active_outbreak", "DOID:8622")],
                MergePolicy::Max,
            )
            .unwrap();

        let catalog = store.catalog();
        let nga = catalog.resolve("Country::NGA").unwrap();
        let doid = catalog.resolve("DOID:8622").unwrap();
        assert_eq!(catalog.kind_of(nga).unwrap(), EntityKind::Country);
        assert_eq!(catalog.kind_of(doid).unwrap(), EntityKind::Other);
    }

    #[test]
    fn test_signature_violation_rejected() {
        let mut store = TripleStore::new();
        store
            .declare_relation("reported-in", RelationSignature::new(EntityKind::Disease, EntityKind::Country))
            .unwrap();

        let bad = vec![RawFact::typed("Vaccine-A", EntityKind::Drug, "reported-in", "Country::NGA", EntityKind::Country)];
        assert!(matches!(
            store.add_facts(&bad, MergePolicy::Max),
            Err(GraphError::SignatureViolation { .. })
        ));
        assert!(store.is_empty());
    }

    #[test]
    fn test_invalid_confidence_rejected() {
        let mut store = TripleStore::new();
        let bad = vec![RawFact::new("a", "r", "b").with_confidence(1.5)];
        assert_eq!(
            store.add_facts(&bad, MergePolicy::Max).unwrap_err(),
            GraphError::InvalidConfidence(1.5)
        );
        let nan = vec![RawFact::new("a", "r", "b").with_confidence(f32::NAN)];
        assert!(store.add_facts(&nan, MergePolicy::Max).is_err());
    }

    #[test]
    fn test_sample_negatives_are_unseen_corruptions() {
        let mut store = TripleStore::new();
        store.add_facts(&outbreak_batch(), MergePolicy::Max).unwrap();
        let positive = store.facts()[0].key;

        let mut rng = StdRng::seed_from_u64(7);
        let negatives = store
            .sample_negatives(&positive, 4, NegativeStrategy::Uniform, &mut rng)
            .unwrap();

        assert!(!negatives.is_empty());
        for negative in &negatives {
            assert!(!store.contains(negative));
            assert_eq!(negative.relation, positive.relation);
            assert!(negative.head == positive.head || negative.tail == positive.tail);
        }
    }

    #[test]
    fn test_kind_constrained_negatives_keep_kind() {
        let mut store = TripleStore::new();
        store.add_facts(&outbreak_batch(), MergePolicy::Max).unwrap();
        let catalog = store.catalog();
        let positive = store.key_for_names("Vaccine-A", "treats", "Measles").unwrap();

        let mut rng = StdRng::seed_from_u64(11);
        let negatives = store
            .sample_negatives(&positive, 8, NegativeStrategy::KindConstrained, &mut rng)
            .unwrap();

        assert!(!negatives.is_empty());
        for negative in negatives {
            assert_eq!(catalog.kind_of(negative.head).unwrap(), EntityKind::Drug);
            assert_eq!(catalog.kind_of(negative.tail).unwrap(), EntityKind::Disease);
        }
    }

    #[test]
    fn test_kind_constrained_requires_classified_entities() {
        let mut store = TripleStore::new();
        store
            .add_facts(&[RawFact::new("mystery", "co-occurs-with", "Measles")], MergePolicy::Max)
            .unwrap();
        let positive = store.facts()[0].key;

        let mut rng = StdRng::seed_from_u64(1);
        let err = store
            .sample_negatives(&positive, 2, NegativeStrategy::KindConstrained, &mut rng)
            .unwrap_err();
        assert_eq!(err, GraphError::UnknownEntityKind("mystery".to_string()));
    }

    #[test]
    fn test_neighbours() {
        let mut store = TripleStore::new();
        store.add_facts(&outbreak_batch(), MergePolicy::Max).unwrap();
        let catalog = store.catalog();
        let measles = catalog.resolve("Measles").unwrap();
        let nga = catalog.resolve("Country::NGA").unwrap();
        let vaccine = catalog.resolve("Vaccine-A").unwrap();

        let mut expected = vec![measles, nga, vaccine];
        expected.sort();
        assert_eq!(store.neighbours(&[measles], 1), expected);
    }

    #[test]
    fn test_adopt_vocabulary_extends_empty_store() {
        let mut trained = TripleStore::new();
        trained
            .declare_relation("treats", RelationSignature::new(EntityKind::Drug, EntityKind::Disease))
            .unwrap();
        trained.add_facts(&outbreak_batch(), MergePolicy::Max).unwrap();

        let mut fresh = TripleStore::new();
        fresh.adopt_vocabulary(trained.catalog()).unwrap();
        assert_eq!(fresh.catalog(), trained.catalog());
        assert!(fresh.is_empty());

        // Ingest now resolves to the adopted ids
        fresh.add_facts(&outbreak_batch(), MergePolicy::Max).unwrap();
        assert_eq!(fresh.catalog().entity_count(), 6);
        assert_eq!(fresh.relation_counts(), trained.relation_counts());
    }

    #[test]
    fn test_adopt_vocabulary_rejects_conflicting_ids() {
        let mut trained = TripleStore::new();
        trained.add_facts(&outbreak_batch(), MergePolicy::Max).unwrap();

        let mut other = TripleStore::new();
        other
            .add_facts(
                &[RawFact::typed("Cholera", EntityKind::Disease, "reported-in", "Country::YEM", EntityKind::Country)],
                MergePolicy::Max,
            )
            .unwrap();
        let before = other.clone();

        let err = other.adopt_vocabulary(trained.catalog()).unwrap_err();
        assert!(matches!(err, GraphError::VocabularyMismatch(_)));
        assert_eq!(other, before);
    }
}
