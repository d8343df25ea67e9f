//! Link prediction and multi-hop inference over published snapshots
//!
//! The engine never mutates anything: it reads the registry's current `Arc`
//! snapshot per query, so a concurrent publish only affects later queries.

use super::cache::ResultCache;
use super::query::{Candidate, Hop, HopDirection, PartialTriple, PathQuery, PathScoring, QueryKey, Ranking};
use super::{InferenceError, InferenceResult};
use crate::graph::{EntityId, EntityKind, RelationId};
use crate::kge::{EmbeddingSnapshot, SnapshotRegistry};
use hercule_graph_algorithms::{top_k, ScoredNode};
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Inference configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    /// Intermediate entities kept per hop
    pub beam_width: usize,
    /// Softmax temperature for confidence calibration
    pub temperature: f32,
    /// Cached rankings (0 disables the cache)
    pub cache_capacity: usize,
    /// Allow a path to pass through the same entity twice
    pub allow_revisits: bool,
    pub path_scoring: PathScoring,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            beam_width: 10,
            temperature: 1.0,
            cache_capacity: 1024,
            allow_revisits: false,
            path_scoring: PathScoring::SumLog,
        }
    }
}

/// One scored candidate of a single hop
struct Expansion {
    entity: EntityId,
    score: f32,
    log_confidence: f32,
}

/// Partial path in the beam
struct BeamEntry {
    path: Vec<EntityId>,
    log_sum: f32,
}

/// Log of the softmax of `scores / temperature`
fn log_softmax(scores: &[f32], temperature: f32) -> Vec<f32> {
    let t = temperature.max(f32::EPSILON);
    let max = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    if !max.is_finite() {
        return vec![f32::NEG_INFINITY; scores.len()];
    }
    let log_norm = scores.iter().map(|s| ((s - max) / t).exp()).sum::<f32>().ln();
    scores.iter().map(|s| (s - max) / t - log_norm).collect()
}

/// Query engine over the registry's current snapshot
pub struct InferenceEngine {
    registry: Arc<SnapshotRegistry>,
    config: InferenceConfig,
    cache: Option<ResultCache>,
}

impl InferenceEngine {
    pub fn new(registry: Arc<SnapshotRegistry>, config: InferenceConfig) -> Self {
        let cache = ResultCache::new(config.cache_capacity);
        Self {
            registry,
            config,
            cache,
        }
    }

    pub fn config(&self) -> &InferenceConfig {
        &self.config
    }

    fn snapshot(&self) -> InferenceResult<Arc<EmbeddingSnapshot>> {
        self.registry.current().ok_or(InferenceError::NoSnapshot)
    }

    /// Top-k completions of a partial triple against the current snapshot
    pub fn infer(&self, query: PartialTriple, k: usize) -> InferenceResult<Ranking> {
        let snapshot = self.snapshot()?;
        self.cached(snapshot.version(), QueryKey::Single(query, k), || {
            self.infer_with(&snapshot, query, k)
        })
    }

    /// Top-k ends of a hop chain against the current snapshot
    pub fn infer_path(&self, query: &PathQuery, k: usize) -> InferenceResult<Ranking> {
        let snapshot = self.snapshot()?;
        self.cached(snapshot.version(), QueryKey::Path(query.clone(), k), || {
            self.infer_path_with(&snapshot, query, k)
        })
    }

    /// (head, relation, ?) by names
    pub fn infer_tail_by_name(&self, head: &str, relation: &str, k: usize) -> InferenceResult<Ranking> {
        let snapshot = self.snapshot()?;
        let query = PartialTriple::Tail {
            head: resolve_entity(&snapshot, head)?,
            relation: resolve_relation(&snapshot, relation)?,
        };
        self.cached(snapshot.version(), QueryKey::Single(query, k), || {
            self.infer_with(&snapshot, query, k)
        })
    }

    /// (?, relation, tail) by names
    pub fn infer_head_by_name(&self, relation: &str, tail: &str, k: usize) -> InferenceResult<Ranking> {
        let snapshot = self.snapshot()?;
        let query = PartialTriple::Head {
            relation: resolve_relation(&snapshot, relation)?,
            tail: resolve_entity(&snapshot, tail)?,
        };
        self.cached(snapshot.version(), QueryKey::Single(query, k), || {
            self.infer_with(&snapshot, query, k)
        })
    }

    /// Hop chain by names
    pub fn infer_path_by_name(
        &self,
        start: &str,
        hops: &[(&str, HopDirection)],
        k: usize,
    ) -> InferenceResult<Ranking> {
        let snapshot = self.snapshot()?;
        let hops = hops
            .iter()
            .map(|&(relation, direction)| {
                Ok(Hop {
                    relation: resolve_relation(&snapshot, relation)?,
                    direction,
                })
            })
            .collect::<InferenceResult<Vec<_>>>()?;
        let query = PathQuery::new(resolve_entity(&snapshot, start)?, hops);
        self.cached(snapshot.version(), QueryKey::Path(query.clone(), k), || {
            self.infer_path_with(&snapshot, &query, k)
        })
    }

    /// Drop every cached ranking
    pub fn clear_cache(&self) {
        if let Some(cache) = &self.cache {
            cache.clear();
        }
    }

    /// Number of cached rankings
    pub fn cached_results(&self) -> usize {
        self.cache.as_ref().map_or(0, ResultCache::len)
    }

    fn cached(
        &self,
        version: u64,
        key: QueryKey,
        compute: impl FnOnce() -> InferenceResult<Ranking>,
    ) -> InferenceResult<Ranking> {
        let Some(cache) = &self.cache else {
            return compute();
        };
        if let Some(hit) = cache.get(version, &key) {
            debug!("Cache hit for {:?} on v{}", key, version);
            return Ok(hit);
        }
        let ranking = compute()?;
        cache.put(version, key, ranking.clone());
        Ok(ranking)
    }

    /// Top-k completions of a partial triple against a given snapshot (uncached)
    pub fn infer_with(&self, snapshot: &EmbeddingSnapshot, query: PartialTriple, k: usize) -> InferenceResult<Ranking> {
        let hop = Hop {
            relation: query.relation(),
            direction: query.direction(),
        };
        let targets = check_chain(snapshot, query.bound(), std::slice::from_ref(&hop))?;
        let expansions = self.expand(snapshot, query.bound(), hop, targets[0]);

        // Pools are in ascending id order, so the index doubles as the tie-breaker
        let ranked = top_k(
            expansions
                .iter()
                .enumerate()
                .map(|(i, e)| ScoredNode::new(i as u64, e.score as f64)),
            k,
        );

        let catalog = snapshot.catalog();
        let candidates = ranked
            .into_iter()
            .enumerate()
            .map(|(rank, scored)| {
                let expansion = &expansions[scored.node as usize];
                let entity = catalog.lookup(expansion.entity)?;
                Ok(Candidate {
                    entity: expansion.entity,
                    name: entity.name.clone(),
                    kind: entity.kind,
                    score: expansion.score,
                    confidence: expansion.log_confidence.exp(),
                    rank: rank + 1,
                    path: Vec::new(),
                })
            })
            .collect::<InferenceResult<Vec<_>>>()?;

        Ok(Ranking {
            snapshot_version: snapshot.version(),
            candidates,
        })
    }

    /// Beam search over a hop chain against a given snapshot (uncached).
    ///
    /// Keeps the `beam_width` best partial paths after every intermediate hop and
    /// the `k` best after the last one. An entity reached by several paths keeps
    /// the best of them.
    pub fn infer_path_with(&self, snapshot: &EmbeddingSnapshot, query: &PathQuery, k: usize) -> InferenceResult<Ranking> {
        let targets = check_chain(snapshot, query.start, &query.hops)?;

        let mut beam = vec![BeamEntry {
            path: vec![query.start],
            log_sum: 0.0,
        }];

        for (i, (hop, target)) in query.hops.iter().zip(&targets).enumerate() {
            let width = if i + 1 == query.hops.len() {
                k
            } else {
                self.config.beam_width.max(1)
            };

            let mut best: FxHashMap<EntityId, BeamEntry> = FxHashMap::default();
            for entry in &beam {
                let Some(&from) = entry.path.last() else {
                    continue;
                };
                for expansion in self.expand(snapshot, from, *hop, *target) {
                    if !self.config.allow_revisits && entry.path.contains(&expansion.entity) {
                        continue;
                    }
                    let log_sum = entry.log_sum + expansion.log_confidence;
                    if best.get(&expansion.entity).is_some_and(|b| b.log_sum >= log_sum) {
                        continue;
                    }
                    let mut path = entry.path.clone();
                    path.push(expansion.entity);
                    best.insert(expansion.entity, BeamEntry { path, log_sum });
                }
            }

            let ranked = top_k(
                best.iter()
                    .map(|(entity, entry)| ScoredNode::new(entity.as_u32() as u64, entry.log_sum as f64)),
                width,
            );
            beam = ranked
                .into_iter()
                .filter_map(|scored| best.remove(&EntityId::new(scored.node as u32)))
                .collect();
            debug!("Hop {}: {} paths kept", i + 1, beam.len());
            if beam.is_empty() {
                break;
            }
        }

        let catalog = snapshot.catalog();
        let candidates = beam
            .into_iter()
            .enumerate()
            .map(|(rank, entry)| {
                let id = entry.path.last().copied().unwrap_or(query.start);
                let entity = catalog.lookup(id)?;
                Ok(Candidate {
                    entity: id,
                    name: entity.name.clone(),
                    kind: entity.kind,
                    score: self.config.path_scoring.aggregate(entry.log_sum),
                    confidence: entry.log_sum.exp(),
                    rank: rank + 1,
                    path: entry.path,
                })
            })
            .collect::<InferenceResult<Vec<_>>>()?;

        Ok(Ranking {
            snapshot_version: snapshot.version(),
            candidates,
        })
    }

    /// Score every kind-compatible candidate for one hop from `from`, in ascending
    /// id order, with softmax-calibrated log-confidences.
    fn expand(
        &self,
        snapshot: &EmbeddingSnapshot,
        from: EntityId,
        hop: Hop,
        target: Option<EntityKind>,
    ) -> Vec<Expansion> {
        let pool = candidate_pool(snapshot, target);
        let scores: Vec<f32> = pool
            .par_iter()
            .map(|&candidate| {
                let score = match hop.direction {
                    HopDirection::Forward => snapshot.score(from, hop.relation, candidate),
                    HopDirection::Inverse => snapshot.score(candidate, hop.relation, from),
                };
                score.unwrap_or(f32::NEG_INFINITY)
            })
            .collect();
        let log_confidences = log_softmax(&scores, self.config.temperature);

        pool.into_iter()
            .zip(scores)
            .zip(log_confidences)
            .map(|((entity, score), log_confidence)| Expansion {
                entity,
                score,
                log_confidence,
            })
            .collect()
    }
}

/// Entities of `kind` (all entities when unconstrained), ascending
fn candidate_pool(snapshot: &EmbeddingSnapshot, kind: Option<EntityKind>) -> Vec<EntityId> {
    let rows = snapshot.entity_count();
    match kind {
        Some(kind) => snapshot
            .catalog()
            .entities_of_kind(kind)
            .iter()
            .copied()
            .filter(|id| id.index() < rows)
            .collect(),
        None => (0..rows as u32).map(EntityId::new).collect(),
    }
}

/// Validate a hop chain from `start`, returning the kind each hop must produce.
///
/// An unconstrained hop produces whatever kind the next hop consumes, so the
/// beam never carries an entity the next relation cannot start from.
fn check_chain(snapshot: &EmbeddingSnapshot, start: EntityId, hops: &[Hop]) -> InferenceResult<Vec<Option<EntityKind>>> {
    if hops.is_empty() {
        return Err(InferenceError::IncompatibleQuery("the hop chain is empty".to_string()));
    }

    let catalog = snapshot.catalog();
    if start.index() >= snapshot.entity_count() {
        return Err(InferenceError::UnknownId(start));
    }
    let start_entity = catalog.lookup(start).map_err(|_| InferenceError::UnknownId(start))?;

    let mut current = Some(start_entity.kind);
    let mut targets = Vec::with_capacity(hops.len());
    for (i, hop) in hops.iter().enumerate() {
        if hop.relation.index() >= snapshot.relation_count() {
            return Err(InferenceError::UnknownRelation(hop.relation.to_string()));
        }
        let relation = catalog
            .lookup_relation(hop.relation)
            .map_err(|_| InferenceError::UnknownRelation(hop.relation.to_string()))?;
        let (source, target) = hop.kinds(&relation.signature);

        if let (Some(have), Some(need)) = (current, source) {
            if have != need {
                let subject = if i == 0 {
                    format!("start entity '{}'", start_entity.name)
                } else {
                    format!("hop {}", i)
                };
                return Err(InferenceError::IncompatibleQuery(format!(
                    "{} yields {} but '{}' ({:?}) expects {}",
                    subject, have, relation.name, hop.direction, need
                )));
            }
        }

        if current.is_none() && i > 0 {
            targets[i - 1] = source;
        }
        targets.push(target);
        current = target;
    }
    Ok(targets)
}

fn resolve_entity(snapshot: &EmbeddingSnapshot, name: &str) -> InferenceResult<EntityId> {
    snapshot
        .catalog()
        .resolve(name)
        .ok_or_else(|| InferenceError::UnknownEntity(name.to_string()))
}

fn resolve_relation(snapshot: &EmbeddingSnapshot, name: &str) -> InferenceResult<RelationId> {
    snapshot
        .catalog()
        .resolve_relation(name)
        .ok_or_else(|| InferenceError::UnknownRelation(name.to_string()))
}
