//! Margin-ranking trainer
//!
//! Each epoch shuffles the training facts, resamples negatives and walks the facts
//! in mini-batches. Gradients of a mini-batch are computed in parallel over fixed
//! size chunks; every chunk yields sparse per-row accumulators which are reduced in
//! chunk order and applied by a single writer. With a fixed seed the whole run is
//! deterministic regardless of the rayon pool size.
//!
//! After every epoch the filtered MRR on the held-out slice decides whether the
//! parameters are checkpointed; training stops after `patience` epochs without
//! improvement or at `max_epochs`, and the best checkpoint is what gets published.

use crate::graph::{BatchId, EntityId, FactKey, GraphError, NegativeStrategy, RelationId, TripleStore};
use crate::kge::cancel::CancellationToken;
use crate::kge::evaluation::Evaluator;
use crate::kge::scoring::{normalize, ScoringFunction};
use crate::kge::snapshot::{EmbeddingSnapshot, SnapshotMetadata, TrainingKind};
use chrono::Utc;
use ndarray::{concatenate, Array2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Positives per parallel gradient chunk. Fixed so that the reduction order does
/// not depend on the number of worker threads.
const GRADIENT_CHUNK: usize = 32;

/// Training errors
#[derive(Error, Debug)]
pub enum TrainingError {
    /// Not enough facts to train on
    #[error("Insufficient training data: {0}")]
    InsufficientData(String),

    /// Loss or parameters became non-finite
    #[error("Training diverged at epoch {epoch} (loss {loss})")]
    DivergedTraining { epoch: usize, loss: f32 },

    /// Cancellation observed at an epoch boundary
    #[error("Training cancelled before epoch {0}")]
    Cancelled(usize),

    /// Catalog or store error
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    /// Fine-tune base does not match the model or the catalog
    #[error("Incompatible base snapshot: {0}")]
    IncompatibleSnapshot(String),
}

pub type TrainingResult<T> = Result<T, TrainingError>;

/// Embedding model configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub scoring: ScoringFunction,
    /// Embedding dimension `d`
    pub dim: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            scoring: ScoringFunction::TransE,
            dim: 32,
        }
    }
}

/// Training loop configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Hard cap on epochs
    pub max_epochs: usize,
    /// Epochs without validation improvement before stopping
    pub patience: usize,
    /// Positives per mini-batch
    pub batch_size: usize,
    pub learning_rate: f32,
    pub margin: f32,
    pub negatives_per_positive: usize,
    pub negative_strategy: NegativeStrategy,
    /// L2 weight decay on updated rows
    pub l2_regularization: f32,
    /// Keep TransE entity rows at unit length
    pub normalize_entities: bool,
    /// Share of facts held out for validation
    pub validation_fraction: f32,
    /// Cap on facts ranked per validation pass
    pub validation_sample: usize,
    /// Relations with fewer facts make training fail
    pub min_facts_per_relation: usize,
    pub seed: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            max_epochs: 200,
            patience: 10,
            batch_size: 128,
            learning_rate: 0.01,
            margin: 1.0,
            negatives_per_positive: 4,
            negative_strategy: NegativeStrategy::Uniform,
            l2_regularization: 0.0,
            normalize_entities: true,
            validation_fraction: 0.1,
            validation_sample: 256,
            min_facts_per_relation: 1,
            seed: 42,
        }
    }
}

/// Progress of one epoch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochReport {
    pub epoch: usize,
    /// Mean weighted margin loss over all (positive, negative) pairs
    pub loss: f32,
    /// Validation MRR after the epoch
    pub mrr: f32,
    /// Whether this epoch produced the new best checkpoint
    pub improved: bool,
}

/// Callback invoked after every epoch
pub type EpochObserver = Arc<dyn Fn(&EpochReport) + Send + Sync>;

#[derive(Debug, Clone)]
struct Parameters {
    entities: Array2<f32>,
    relations: Array2<f32>,
}

/// Rows allowed to change; `None` means everything is trainable
struct UpdateMask {
    entities: Vec<bool>,
    relations: Vec<bool>,
}

impl UpdateMask {
    fn entity(mask: &Option<UpdateMask>, row: usize) -> bool {
        mask.as_ref().map_or(true, |m| m.entities.get(row).copied().unwrap_or(false))
    }

    fn relation(mask: &Option<UpdateMask>, row: usize) -> bool {
        mask.as_ref().map_or(true, |m| m.relations.get(row).copied().unwrap_or(false))
    }
}

/// A positive with its weight and sampled negatives
struct Sample {
    positive: FactKey,
    weight: f32,
    negatives: Vec<FactKey>,
}

/// Sparse gradients of one chunk
#[derive(Default)]
struct GradientChunk {
    entities: FxHashMap<usize, Vec<f32>>,
    relations: FxHashMap<usize, Vec<f32>>,
    loss: f32,
    pairs: usize,
    non_finite: bool,
}

fn add_into(map: &mut FxHashMap<usize, Vec<f32>>, row: usize, grad: &[f32]) {
    let slot = map.entry(row).or_insert_with(|| vec![0.0; grad.len()]);
    for (s, g) in slot.iter_mut().zip(grad) {
        *s += g;
    }
}

struct Outcome {
    params: Parameters,
    epochs: usize,
    final_loss: f32,
    best_mrr: f32,
}

/// Embedding trainer
#[derive(Clone)]
pub struct Trainer {
    model: ModelConfig,
    config: TrainingConfig,
    observer: Option<EpochObserver>,
}

// Observer closures have no Debug
impl fmt::Debug for Trainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Trainer")
            .field("model", &self.model)
            .field("config", &self.config)
            .field("observer", &self.observer.is_some())
            .finish()
    }
}

impl Trainer {
    pub fn new(model: ModelConfig, config: TrainingConfig) -> Self {
        Self {
            model,
            config,
            observer: None,
        }
    }

    /// Attach a per-epoch progress callback
    pub fn with_observer(mut self, observer: EpochObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn model(&self) -> &ModelConfig {
        &self.model
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    /// Train from scratch on every fact in `store`
    pub fn train(&self, store: &TripleStore, cancel: &CancellationToken) -> TrainingResult<EmbeddingSnapshot> {
        self.check_data(store)?;

        let catalog = store.catalog();
        let scoring = self.model.scoring;
        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let params = Parameters {
            entities: scoring.init_entities(catalog.entity_count(), self.model.dim, &mut rng),
            relations: scoring.init_relations(catalog.relation_count(), self.model.dim, &mut rng),
        };

        info!(
            "Starting full training: {} facts, {} entities, {} relations, {} d={}",
            store.len(),
            catalog.entity_count(),
            catalog.relation_count(),
            scoring,
            self.model.dim
        );

        let facts: Vec<usize> = (0..store.len()).collect();
        let outcome = self.run(store, params, &facts, None, self.config.max_epochs, &mut rng, cancel)?;
        Ok(self.snapshot(store, &facts, outcome, TrainingKind::Full, None))
    }

    /// Bounded update of `base`.
    ///
    /// Rows for entities and relations the base has not seen are appended with a
    /// fresh initialisation. Training uses only facts touching the active set, and
    /// only active rows (plus the appended ones) change.
    pub fn fine_tune(
        &self,
        store: &TripleStore,
        base: &EmbeddingSnapshot,
        active_entities: &[EntityId],
        active_relations: &[RelationId],
        epochs: usize,
        cancel: &CancellationToken,
    ) -> TrainingResult<EmbeddingSnapshot> {
        self.check_base(store, base)?;

        let catalog = store.catalog();
        let scoring = self.model.scoring;
        let mut rng = StdRng::seed_from_u64(self.config.seed ^ base.version());

        let new_entities = catalog.entity_count() - base.entity_count();
        let new_relations = catalog.relation_count() - base.relation_count();
        let appended_entities = scoring.init_entities(new_entities, self.model.dim, &mut rng);
        let appended_relations = scoring.init_relations(new_relations, self.model.dim, &mut rng);
        let params = Parameters {
            entities: concatenate(Axis(0), &[base.entity_table().view(), appended_entities.view()])
                .map_err(|e| TrainingError::IncompatibleSnapshot(e.to_string()))?,
            relations: concatenate(Axis(0), &[base.relation_table().view(), appended_relations.view()])
                .map_err(|e| TrainingError::IncompatibleSnapshot(e.to_string()))?,
        };

        let mut mask = UpdateMask {
            entities: vec![false; catalog.entity_count()],
            relations: vec![false; catalog.relation_count()],
        };
        mask.entities[base.entity_count()..].fill(true);
        mask.relations[base.relation_count()..].fill(true);
        for entity in active_entities {
            if let Some(slot) = mask.entities.get_mut(entity.index()) {
                *slot = true;
            }
        }
        for relation in active_relations {
            if let Some(slot) = mask.relations.get_mut(relation.index()) {
                *slot = true;
            }
        }

        let facts: Vec<usize> = store
            .facts()
            .iter()
            .enumerate()
            .filter(|(_, fact)| {
                mask.entities[fact.key.head.index()]
                    || mask.entities[fact.key.tail.index()]
                    || mask.relations[fact.key.relation.index()]
            })
            .map(|(i, _)| i)
            .collect();
        if facts.is_empty() {
            return Err(TrainingError::InsufficientData(
                "no facts touch the active entities or relations".to_string(),
            ));
        }

        info!(
            "Starting fine-tune of v{}: {} facts, {} new entities, {} new relations, {} epochs",
            base.version(),
            facts.len(),
            new_entities,
            new_relations,
            epochs
        );

        let outcome = self.run(store, params, &facts, Some(mask), epochs, &mut rng, cancel)?;
        Ok(self.snapshot(store, &facts, outcome, TrainingKind::FineTune, Some(base.version())))
    }

    fn check_data(&self, store: &TripleStore) -> TrainingResult<()> {
        if store.is_empty() {
            return Err(TrainingError::InsufficientData("the triple store holds no facts".to_string()));
        }
        let catalog = store.catalog();
        for (relation, count) in catalog.relations().iter().zip(store.relation_counts()) {
            if count < self.config.min_facts_per_relation {
                return Err(TrainingError::InsufficientData(format!(
                    "relation '{}' has {} facts, {} required",
                    relation.name, count, self.config.min_facts_per_relation
                )));
            }
        }
        Ok(())
    }

    fn check_base(&self, store: &TripleStore, base: &EmbeddingSnapshot) -> TrainingResult<()> {
        if base.scoring() != self.model.scoring || base.dim() != self.model.dim {
            return Err(TrainingError::IncompatibleSnapshot(format!(
                "snapshot is {} d={}, model is {} d={}",
                base.scoring(),
                base.dim(),
                self.model.scoring,
                self.model.dim
            )));
        }

        let catalog = store.catalog();
        if base.entity_count() > catalog.entity_count() || base.relation_count() > catalog.relation_count() {
            return Err(TrainingError::IncompatibleSnapshot(
                "snapshot vocabulary is larger than the catalog".to_string(),
            ));
        }
        for entity in base.catalog().entities() {
            if catalog.lookup(entity.id)?.name != entity.name {
                return Err(TrainingError::IncompatibleSnapshot(format!(
                    "entity {} is '{}' in the snapshot",
                    entity.id, entity.name
                )));
            }
        }
        Ok(())
    }

    /// Hold out validation facts. A fact is only held out while its head, tail
    /// and relation each keep at least one training fact.
    fn split(&self, store: &TripleStore, facts: &[usize], rng: &mut StdRng) -> (Vec<usize>, Vec<FactKey>) {
        let mut shuffled = facts.to_vec();
        shuffled.shuffle(rng);

        let quota = (self.config.validation_fraction * facts.len() as f32).floor() as usize;
        let mut entity_uses: FxHashMap<EntityId, usize> = FxHashMap::default();
        let mut relation_uses: FxHashMap<RelationId, usize> = FxHashMap::default();
        for &i in facts {
            let key = store.facts()[i].key;
            *entity_uses.entry(key.head).or_default() += 1;
            if key.tail != key.head {
                *entity_uses.entry(key.tail).or_default() += 1;
            }
            *relation_uses.entry(key.relation).or_default() += 1;
        }

        let mut train = Vec::with_capacity(facts.len());
        let mut validation = Vec::with_capacity(quota);
        for i in shuffled {
            let key = store.facts()[i].key;
            let keeps_support = entity_uses[&key.head] > 1 && entity_uses[&key.tail] > 1 && relation_uses[&key.relation] > 1;
            if validation.len() < quota && keeps_support {
                *entity_uses.entry(key.head).or_default() -= 1;
                if key.tail != key.head {
                    *entity_uses.entry(key.tail).or_default() -= 1;
                }
                *relation_uses.entry(key.relation).or_default() -= 1;
                validation.push(key);
            } else {
                train.push(i);
            }
        }

        if validation.is_empty() {
            validation = train.iter().map(|&i| store.facts()[i].key).collect();
        }
        validation.truncate(self.config.validation_sample.max(1));
        (train, validation)
    }

    #[allow(clippy::too_many_arguments)]
    fn run(
        &self,
        store: &TripleStore,
        mut params: Parameters,
        facts: &[usize],
        mask: Option<UpdateMask>,
        max_epochs: usize,
        rng: &mut StdRng,
        cancel: &CancellationToken,
    ) -> TrainingResult<Outcome> {
        let (mut train, validation) = self.split(store, facts, rng);
        debug!("{} training facts, {} validation facts", train.len(), validation.len());

        let mut best: Option<(f32, Parameters)> = None;
        let mut stale = 0;
        let mut final_loss = 0.0;
        let mut epochs = 0;

        for epoch in 1..=max_epochs {
            if cancel.is_cancelled() {
                warn!("Training cancelled before epoch {}", epoch);
                return Err(TrainingError::Cancelled(epoch));
            }

            train.shuffle(rng);
            let mut epoch_loss = 0.0f32;
            let mut epoch_pairs = 0usize;

            for batch in train.chunks(self.config.batch_size.max(1)) {
                let samples = batch
                    .iter()
                    .map(|&i| {
                        let fact = &store.facts()[i];
                        let negatives = store.sample_negatives(
                            &fact.key,
                            self.config.negatives_per_positive,
                            self.config.negative_strategy,
                            rng,
                        )?;
                        Ok(Sample {
                            positive: fact.key,
                            weight: fact.confidence,
                            negatives,
                        })
                    })
                    .collect::<Result<Vec<_>, GraphError>>()?;

                let (loss, pairs) = self.step(&mut params, &samples, &mask, epoch)?;
                epoch_loss += loss;
                epoch_pairs += pairs;
            }

            let loss = if epoch_pairs > 0 { epoch_loss / epoch_pairs as f32 } else { 0.0 };
            if !loss.is_finite() {
                warn!("Loss became non-finite at epoch {}", epoch);
                return Err(TrainingError::DivergedTraining { epoch, loss });
            }
            final_loss = loss;
            epochs = epoch;

            let metrics = Evaluator::new(store, self.model.scoring, &params.entities, &params.relations)
                .metrics(&validation);
            let best_mrr = best.as_ref().map(|(mrr, _)| *mrr);
            let improved = best_mrr.map_or(true, |mrr| metrics.mrr > mrr);
            if improved {
                best = Some((metrics.mrr, params.clone()));
                stale = 0;
            } else {
                // A tie keeps the later parameters, which have seen more updates
                if best_mrr == Some(metrics.mrr) {
                    best = Some((metrics.mrr, params.clone()));
                }
                stale += 1;
            }

            debug!("Epoch {}: loss {:.5}, {}", epoch, loss, metrics.summary());
            if let Some(observer) = &self.observer {
                observer(&EpochReport {
                    epoch,
                    loss,
                    mrr: metrics.mrr,
                    improved,
                });
            }

            if stale >= self.config.patience.max(1) {
                info!("Early stopping at epoch {} after {} epochs without improvement", epoch, stale);
                break;
            }
        }

        let (best_mrr, params) = best.unwrap_or((0.0, params));
        info!("Training finished after {} epochs: loss {:.5}, best MRR {:.4}", epochs, final_loss, best_mrr);
        Ok(Outcome {
            params,
            epochs,
            final_loss,
            best_mrr,
        })
    }

    /// One mini-batch: parallel gradients, ordered reduction, single-writer apply.
    /// Returns the summed loss and the number of pairs.
    fn step(
        &self,
        params: &mut Parameters,
        samples: &[Sample],
        mask: &Option<UpdateMask>,
        epoch: usize,
    ) -> TrainingResult<(f32, usize)> {
        let current: &Parameters = params;
        let chunks: Vec<GradientChunk> = samples
            .par_chunks(GRADIENT_CHUNK)
            .map(|chunk| self.chunk_gradients(current, chunk))
            .collect();

        let mut entity_grads: FxHashMap<usize, Vec<f32>> = FxHashMap::default();
        let mut relation_grads: FxHashMap<usize, Vec<f32>> = FxHashMap::default();
        let mut loss = 0.0f32;
        let mut pairs = 0usize;
        for chunk in chunks {
            if chunk.non_finite {
                warn!("Non-finite score in epoch {}", epoch);
                return Err(TrainingError::DivergedTraining { epoch, loss: f32::NAN });
            }
            loss += chunk.loss;
            pairs += chunk.pairs;
            for (row, grad) in &chunk.entities {
                add_into(&mut entity_grads, *row, grad);
            }
            for (row, grad) in &chunk.relations {
                add_into(&mut relation_grads, *row, grad);
            }
        }
        if pairs == 0 {
            return Ok((0.0, 0));
        }

        let lr = self.config.learning_rate;
        let l2 = self.config.l2_regularization;
        let scale = lr / pairs as f32;
        let renormalize = self.config.normalize_entities && self.model.scoring.normalizes_entities();
        let mut finite = true;

        for (row, grad) in entity_grads {
            if !UpdateMask::entity(mask, row) {
                continue;
            }
            let mut values = params.entities.row_mut(row);
            for (p, g) in values.iter_mut().zip(&grad) {
                let decay = lr * l2 * *p;
                *p -= scale * g + decay;
            }
            if renormalize {
                normalize(values.view_mut());
            }
            finite &= values.iter().all(|v| v.is_finite());
        }

        // Phases of RotatE are not decayed
        let relation_l2 = if self.model.scoring == ScoringFunction::RotatE { 0.0 } else { l2 };
        for (row, grad) in relation_grads {
            if !UpdateMask::relation(mask, row) {
                continue;
            }
            let mut values = params.relations.row_mut(row);
            for (p, g) in values.iter_mut().zip(&grad) {
                let decay = lr * relation_l2 * *p;
                *p -= scale * g + decay;
            }
            finite &= values.iter().all(|v| v.is_finite());
        }

        if !finite {
            warn!("Parameters became non-finite in epoch {}", epoch);
            return Err(TrainingError::DivergedTraining {
                epoch,
                loss: loss / pairs as f32,
            });
        }
        Ok((loss, pairs))
    }

    fn chunk_gradients(&self, params: &Parameters, samples: &[Sample]) -> GradientChunk {
        let scoring = self.model.scoring;
        let margin = self.config.margin;
        let score = |key: &FactKey| {
            scoring.score(
                params.entities.row(key.head.index()),
                params.relations.row(key.relation.index()),
                params.entities.row(key.tail.index()),
            )
        };

        let mut acc = GradientChunk::default();
        for sample in samples {
            let positive = score(&sample.positive);
            for negative in &sample.negatives {
                acc.pairs += 1;
                let violation = margin + score(negative) - positive;
                if !violation.is_finite() {
                    acc.non_finite = true;
                    continue;
                }
                if violation > 0.0 {
                    acc.loss += sample.weight * violation;
                    self.accumulate(params, &mut acc, &sample.positive, -sample.weight);
                    self.accumulate(params, &mut acc, negative, sample.weight);
                }
            }
        }
        acc
    }

    fn accumulate(&self, params: &Parameters, acc: &mut GradientChunk, key: &FactKey, coeff: f32) {
        let h = params.entities.row(key.head.index());
        let r = params.relations.row(key.relation.index());
        let t = params.entities.row(key.tail.index());
        let mut gh = vec![0.0; h.len()];
        let mut gr = vec![0.0; r.len()];
        let mut gt = vec![0.0; t.len()];
        self.model
            .scoring
            .accumulate_gradients(h, r, t, coeff, &mut gh, &mut gr, &mut gt);

        add_into(&mut acc.entities, key.head.index(), &gh);
        add_into(&mut acc.relations, key.relation.index(), &gr);
        add_into(&mut acc.entities, key.tail.index(), &gt);
    }

    fn snapshot(
        &self,
        store: &TripleStore,
        facts: &[usize],
        outcome: Outcome,
        kind: TrainingKind,
        parent_version: Option<u64>,
    ) -> EmbeddingSnapshot {
        let batch_range = facts
            .iter()
            .map(|&i| &store.facts()[i])
            .fold(None, |range: Option<(BatchId, BatchId)>, fact| {
                Some(match range {
                    None => (fact.first_batch, fact.last_batch),
                    Some((lo, hi)) => (lo.min(fact.first_batch), hi.max(fact.last_batch)),
                })
            });

        EmbeddingSnapshot::new(
            self.model.scoring,
            self.model.dim,
            outcome.params.entities,
            outcome.params.relations,
            store.catalog().clone(),
            SnapshotMetadata {
                run_id: Uuid::new_v4(),
                kind,
                parent_version,
                batch_range,
                fact_count: facts.len(),
                epochs: outcome.epochs,
                final_loss: outcome.final_loss,
                best_mrr: outcome.best_mrr,
                seed: self.config.seed,
                created_at: Utc::now(),
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{EntityKind, MergePolicy, RawFact};
    use std::sync::Mutex;

    fn outbreak_store() -> TripleStore {
        let mut store = TripleStore::new();
        let mut batch = Vec::new();
        for (disease, country, drug) in [
            ("Measles", "Country::NGA", "Vaccine-A"),
            ("Cholera", "Country::YEM", "ORS"),
            ("Dengue", "Country::BRA", "Analgesic-D"),
            ("Ebola", "Country::COD", "Antiviral-E"),
        ] {
            batch.push(RawFact::typed(disease, EntityKind::Disease, "reported-in", country, EntityKind::Country));
            batch.push(RawFact::typed(drug, EntityKind::Drug, "treats", disease, EntityKind::Disease));
        }
        store.add_facts(&batch, MergePolicy::Max).unwrap();
        store
    }

    fn quick_config() -> TrainingConfig {
        TrainingConfig {
            max_epochs: 20,
            patience: 20,
            batch_size: 4,
            learning_rate: 0.05,
            validation_fraction: 0.0,
            ..TrainingConfig::default()
        }
    }

    #[test]
    fn test_training_is_deterministic() {
        let store = outbreak_store();
        let trainer = Trainer::new(ModelConfig { dim: 8, ..ModelConfig::default() }, quick_config());
        let cancel = CancellationToken::new();

        let a = trainer.train(&store, &cancel).unwrap();
        let b = trainer.train(&store, &cancel).unwrap();
        assert_eq!(a.entity_table(), b.entity_table());
        assert_eq!(a.relation_table(), b.relation_table());
        assert_eq!(a.metadata().final_loss, b.metadata().final_loss);
    }

    #[test]
    fn test_empty_store_is_insufficient() {
        let trainer = Trainer::new(ModelConfig::default(), TrainingConfig::default());
        let result = trainer.train(&TripleStore::new(), &CancellationToken::new());
        assert!(matches!(result, Err(TrainingError::InsufficientData(_))));
    }

    #[test]
    fn test_min_facts_per_relation() {
        let store = outbreak_store();
        let config = TrainingConfig {
            min_facts_per_relation: 5,
            ..quick_config()
        };
        let result = Trainer::new(ModelConfig::default(), config).train(&store, &CancellationToken::new());
        assert!(matches!(result, Err(TrainingError::InsufficientData(_))));
    }

    #[test]
    fn test_observer_sees_every_epoch() {
        let store = outbreak_store();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let trainer = Trainer::new(ModelConfig { dim: 8, ..ModelConfig::default() }, quick_config())
            .with_observer(Arc::new(move |report: &EpochReport| sink.lock().unwrap().push(report.epoch)));

        let snapshot = trainer.train(&store, &CancellationToken::new()).unwrap();
        let epochs = seen.lock().unwrap().clone();
        assert_eq!(epochs.len(), snapshot.metadata().epochs);
        assert_eq!(epochs.first(), Some(&1));
    }

    #[test]
    fn test_cancelled_before_first_epoch() {
        let store = outbreak_store();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = Trainer::new(ModelConfig::default(), quick_config()).train(&store, &cancel);
        assert!(matches!(result, Err(TrainingError::Cancelled(1))));
    }

    #[test]
    fn test_divergence_is_reported() {
        let store = outbreak_store();
        let model = ModelConfig {
            scoring: ScoringFunction::DistMult,
            dim: 8,
        };
        let config = TrainingConfig {
            learning_rate: 1e30,
            ..quick_config()
        };
        let result = Trainer::new(model, config).train(&store, &CancellationToken::new());
        assert!(matches!(result, Err(TrainingError::DivergedTraining { .. })));
    }

    #[test]
    fn test_fine_tune_only_touches_active_rows() {
        let mut store = outbreak_store();
        let trainer = Trainer::new(ModelConfig { dim: 8, ..ModelConfig::default() }, quick_config());
        let cancel = CancellationToken::new();
        let base = trainer.train(&store, &cancel).unwrap().with_version(1);

        let report = store
            .add_facts(
                &[RawFact::typed("Zika", EntityKind::Disease, "reported-in", "Country::BRA", EntityKind::Country)],
                MergePolicy::Max,
            )
            .unwrap();
        let tuned = trainer
            .fine_tune(&store, &base, &report.touched_entities, &report.touched_relations, 3, &cancel)
            .unwrap();

        assert_eq!(tuned.entity_count(), base.entity_count() + 1);
        assert_eq!(tuned.metadata().parent_version, Some(1));
        assert_eq!(tuned.metadata().kind, TrainingKind::FineTune);

        let measles = store.catalog().resolve("Measles").unwrap();
        assert_eq!(tuned.entity(measles), base.entity(measles));
    }

    #[test]
    fn test_fine_tune_rejects_other_model() {
        let store = outbreak_store();
        let cancel = CancellationToken::new();
        let base = Trainer::new(ModelConfig { dim: 8, ..ModelConfig::default() }, quick_config())
            .train(&store, &cancel)
            .unwrap();

        let other = Trainer::new(ModelConfig { dim: 16, ..ModelConfig::default() }, quick_config());
        assert!(matches!(
            other.fine_tune(&store, &base, &[], &[], 1, &cancel),
            Err(TrainingError::IncompatibleSnapshot(_))
        ));
    }
}
