//! Incremental update manager
//!
//! Owns the triple store and decides, per ingested batch, whether the current
//! snapshot can be fine-tuned or a full retrain is required. Drift is the share of
//! the entities and relations now in the catalog that the current snapshot has
//! never seen, relative to the snapshot's vocabulary size:
//!
//! ```text
//! drift = (new entities + new relations) / (snapshot entities + snapshot relations)
//! ```
//!
//! Ids are dense, so "unseen" is simply "id beyond the snapshot's tables", and
//! drift accumulates until the next publish.

use super::state::{LifecycleEvent, LifecycleState};
use super::{UpdateError, UpdateResult};
use crate::graph::{
    BatchId, EntityId, IngestReport, MergePolicy, RawFact, RelationId, RelationSignature, TripleStore,
};
use crate::kge::{CancellationToken, EmbeddingSnapshot, SnapshotRegistry, Trainer, TrainingError};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard};
use tracing::{info, warn};

/// Update policy configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateConfig {
    /// Drift above this triggers a full retrain
    pub drift_threshold: f32,
    /// Epoch cap of a fine-tune run
    pub fine_tune_epochs: usize,
    /// Neighbourhood radius added around touched entities when fine-tuning
    pub neighbourhood_hops: usize,
    pub merge_policy: MergePolicy,
    /// Train as part of `ingest_batch`; otherwise plans wait for `run_pending`
    pub execute_immediately: bool,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            drift_threshold: 0.1,
            fine_tune_epochs: 5,
            neighbourhood_hops: 1,
            merge_policy: MergePolicy::Max,
            execute_immediately: true,
        }
    }
}

/// Kind of training an update needs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateKind {
    FineTune,
    FullRetrain,
}

/// Training decided for one or more batches
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdatePlan {
    pub kind: UpdateKind,
    /// Drift against the current snapshot (1.0 when none exists)
    pub drift: f32,
    /// Touched entities and their neighbourhood, ascending
    pub active_entities: Vec<EntityId>,
    /// Touched relations, ascending
    pub active_relations: Vec<RelationId>,
    /// Latest batch covered by the plan
    pub batch: BatchId,
}

impl UpdatePlan {
    /// Fold a newer plan into this one. A full retrain wins over a fine-tune.
    fn absorb(&mut self, newer: UpdatePlan) {
        if newer.kind == UpdateKind::FullRetrain {
            self.kind = UpdateKind::FullRetrain;
        }
        self.drift = newer.drift;
        self.batch = newer.batch;
        self.active_entities.extend(newer.active_entities);
        self.active_entities.sort_unstable();
        self.active_entities.dedup();
        self.active_relations.extend(newer.active_relations);
        self.active_relations.sort_unstable();
        self.active_relations.dedup();
    }
}

/// What happened to a batch after ingestion
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateDecision {
    /// The batch changed nothing
    NoChange,
    /// Training deferred until `run_pending`
    Scheduled(UpdatePlan),
    /// Training ran and published a snapshot
    Published {
        plan: UpdatePlan,
        snapshot: Arc<EmbeddingSnapshot>,
    },
}

/// Result of `ingest_batch`
#[derive(Debug, Clone, PartialEq)]
pub struct BatchOutcome {
    pub report: IngestReport,
    pub decision: UpdateDecision,
}

/// Store owner and train / fine-tune / retrain coordinator
pub struct UpdateManager {
    store: RwLock<TripleStore>,
    registry: Arc<SnapshotRegistry>,
    trainer: Trainer,
    config: UpdateConfig,
    state: Mutex<LifecycleState>,
    pending: Mutex<Option<UpdatePlan>>,
    /// Serialises training runs
    training: Mutex<()>,
}

impl UpdateManager {
    pub fn new(trainer: Trainer, config: UpdateConfig, registry: Arc<SnapshotRegistry>) -> Self {
        let state = if registry.current().is_some() {
            LifecycleState::Published
        } else {
            LifecycleState::Idle
        };
        Self {
            store: RwLock::new(TripleStore::new()),
            registry,
            trainer,
            config,
            state: Mutex::new(state),
            pending: Mutex::new(None),
            training: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &UpdateConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<SnapshotRegistry> {
        &self.registry
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Read access to the store
    pub fn store(&self) -> RwLockReadGuard<'_, TripleStore> {
        self.store.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Plan waiting for `run_pending`
    pub fn pending(&self) -> Option<UpdatePlan> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Declare a relation signature on the store
    pub fn declare_relation(&self, name: &str, signature: RelationSignature) -> UpdateResult<RelationId> {
        let mut store = self.store.write().unwrap_or_else(PoisonError::into_inner);
        Ok(store.declare_relation(name, signature)?)
    }

    /// Current drift of the catalog against the serving snapshot
    pub fn drift(&self) -> Option<f32> {
        let snapshot = self.registry.current()?;
        Some(drift(&self.store(), &snapshot))
    }

    /// Ingest a batch and run (or schedule) the training it calls for
    pub fn ingest_batch(&self, facts: &[RawFact]) -> UpdateResult<BatchOutcome> {
        self.ingest_batch_with(facts, &CancellationToken::new())
    }

    /// [`ingest_batch`](Self::ingest_batch) with a cancellation token for the
    /// training it may start
    pub fn ingest_batch_with(&self, facts: &[RawFact], cancel: &CancellationToken) -> UpdateResult<BatchOutcome> {
        let (report, plan) = {
            let mut store = self.store.write().unwrap_or_else(PoisonError::into_inner);
            let report = store.add_facts(facts, self.config.merge_policy)?;
            if !report.changed() {
                return Ok(BatchOutcome {
                    report,
                    decision: UpdateDecision::NoChange,
                });
            }
            let plan = self.plan(&store, &report);
            (report, plan)
        };

        info!(
            "Batch {:?}: drift {:.3} -> {:?}",
            report.batch, plan.drift, plan.kind
        );

        // Fold into whatever is already waiting
        let plan = {
            let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            let merged = match pending.take() {
                Some(mut earlier) => {
                    earlier.absorb(plan);
                    earlier
                }
                None => plan,
            };
            if !self.config.execute_immediately {
                *pending = Some(merged.clone());
                return Ok(BatchOutcome {
                    report,
                    decision: UpdateDecision::Scheduled(merged),
                });
            }
            merged
        };

        let snapshot = self.execute_or_requeue(plan.clone(), cancel)?;
        Ok(BatchOutcome {
            report,
            decision: UpdateDecision::Published { plan, snapshot },
        })
    }

    /// Execute the pending plan
    pub fn run_pending(&self, cancel: &CancellationToken) -> UpdateResult<Arc<EmbeddingSnapshot>> {
        let plan = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(UpdateError::NothingPending)?;
        self.execute_or_requeue(plan, cancel)
    }

    /// Retrain from scratch on the whole store, regardless of drift. Clears any
    /// pending plan.
    pub fn train_full(&self, cancel: &CancellationToken) -> UpdateResult<Arc<EmbeddingSnapshot>> {
        let plan = UpdatePlan {
            kind: UpdateKind::FullRetrain,
            drift: self.drift().unwrap_or(1.0),
            active_entities: Vec::new(),
            active_relations: Vec::new(),
            batch: self.store().current_batch(),
        };
        let previous = self.pending.lock().unwrap_or_else(PoisonError::into_inner).take();
        match self.execute(&plan, cancel) {
            Ok(snapshot) => Ok(snapshot),
            Err(err) => {
                if let Some(previous) = previous {
                    self.requeue(previous);
                }
                Err(err)
            }
        }
    }

    /// Publish a snapshot trained elsewhere (typically an imported export).
    ///
    /// The snapshot must match the trainer's scoring function and dimension, and
    /// its vocabulary must agree with the store on every shared id. Entities and
    /// relations only the snapshot knows are added to the catalog, so later
    /// batches fine-tune it like any other published snapshot.
    pub fn adopt(&self, snapshot: EmbeddingSnapshot) -> UpdateResult<Arc<EmbeddingSnapshot>> {
        let _training = self.training.lock().unwrap_or_else(PoisonError::into_inner);

        let model = self.trainer.model();
        if snapshot.scoring() != model.scoring || snapshot.dim() != model.dim {
            return Err(TrainingError::IncompatibleSnapshot(format!(
                "snapshot is {} d={}, model is {} d={}",
                snapshot.scoring(),
                snapshot.dim(),
                model.scoring,
                model.dim
            ))
            .into());
        }

        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let next = state.transition(LifecycleEvent::Adopt)?;

        self.store
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .adopt_vocabulary(snapshot.catalog())?;
        let published = self.registry.publish(snapshot);

        info!(
            "Lifecycle {} --{}--> {} (snapshot v{})",
            *state,
            LifecycleEvent::Adopt,
            next,
            published.version()
        );
        *state = next;
        Ok(published)
    }

    /// Serve an older snapshot again
    pub fn rollback(&self, version: u64) -> UpdateResult<Arc<EmbeddingSnapshot>> {
        Ok(self.registry.rollback(version)?)
    }

    fn plan(&self, store: &TripleStore, report: &IngestReport) -> UpdatePlan {
        let (kind, drift) = match self.registry.current() {
            None => (UpdateKind::FullRetrain, 1.0),
            Some(snapshot) => {
                let drift = drift(store, &snapshot);
                let kind = if drift > self.config.drift_threshold {
                    UpdateKind::FullRetrain
                } else {
                    UpdateKind::FineTune
                };
                (kind, drift)
            }
        };

        UpdatePlan {
            kind,
            drift,
            active_entities: store.neighbours(&report.touched_entities, self.config.neighbourhood_hops),
            active_relations: report.touched_relations.clone(),
            batch: report.batch.unwrap_or_else(|| store.current_batch()),
        }
    }

    fn requeue(&self, plan: UpdatePlan) {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        *pending = Some(match pending.take() {
            Some(newer) => {
                let mut plan = plan;
                plan.absorb(newer);
                plan
            }
            None => plan,
        });
    }

    /// Run a plan; on failure it goes back to the pending slot for a later
    /// `run_pending`
    fn execute_or_requeue(&self, plan: UpdatePlan, cancel: &CancellationToken) -> UpdateResult<Arc<EmbeddingSnapshot>> {
        match self.execute(&plan, cancel) {
            Ok(snapshot) => Ok(snapshot),
            Err(err) => {
                self.requeue(plan);
                Err(err)
            }
        }
    }

    fn transition(&self, event: LifecycleEvent) -> UpdateResult<LifecycleState> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let next = state.transition(event)?;
        info!("Lifecycle {} --{}--> {}", *state, event, next);
        *state = next;
        Ok(next)
    }

    fn execute(&self, plan: &UpdatePlan, cancel: &CancellationToken) -> UpdateResult<Arc<EmbeddingSnapshot>> {
        let _training = self.training.lock().unwrap_or_else(PoisonError::into_inner);

        // Train on a copy so ingestion is not blocked for the whole run
        let store = self.store().clone();
        let base = self.registry.current();

        let event = match (&base, plan.kind) {
            (None, _) => LifecycleEvent::StartTraining,
            (Some(_), UpdateKind::FineTune) => LifecycleEvent::StartFineTune,
            (Some(_), UpdateKind::FullRetrain) => LifecycleEvent::StartFullRetrain,
        };
        self.transition(event)?;

        let result = match (&base, plan.kind) {
            (Some(base), UpdateKind::FineTune) => self.trainer.fine_tune(
                &store,
                base,
                &plan.active_entities,
                &plan.active_relations,
                self.config.fine_tune_epochs,
                cancel,
            ),
            _ => self.trainer.train(&store, cancel),
        };

        match result {
            Ok(snapshot) => {
                let published = self.registry.publish(snapshot);
                self.transition(LifecycleEvent::Publish)?;
                Ok(published)
            }
            Err(err) => {
                warn!("{:?} failed, keeping the current snapshot: {}", plan.kind, err);
                self.transition(LifecycleEvent::Fail)?;
                Err(err.into())
            }
        }
    }
}

/// Share of the catalog vocabulary unknown to `snapshot`
pub fn drift(store: &TripleStore, snapshot: &EmbeddingSnapshot) -> f32 {
    let catalog = store.catalog();
    let novel = catalog.entity_count().saturating_sub(snapshot.entity_count())
        + catalog.relation_count().saturating_sub(snapshot.relation_count());
    let vocabulary = snapshot.vocabulary_size();
    if vocabulary == 0 {
        return 1.0;
    }
    novel as f32 / vocabulary as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::EntityKind;
    use crate::kge::{ModelConfig, RegistryConfig, ScoringFunction, TrainingConfig};

    fn trainer() -> Trainer {
        Trainer::new(
            ModelConfig {
                dim: 8,
                ..ModelConfig::default()
            },
            TrainingConfig {
                max_epochs: 5,
                batch_size: 8,
                validation_fraction: 0.0,
                ..TrainingConfig::default()
            },
        )
    }

    fn manager(config: UpdateConfig) -> UpdateManager {
        UpdateManager::new(trainer(), config, Arc::new(SnapshotRegistry::new(RegistryConfig::default())))
    }

    fn first_batch() -> Vec<RawFact> {
        vec![
            RawFact::typed("Measles", EntityKind::Disease, "reported-in", "Country::NGA", EntityKind::Country),
            RawFact::typed("Cholera", EntityKind::Disease, "reported-in", "Country::YEM", EntityKind::Country),
            RawFact::typed("Vaccine-A", EntityKind::Drug, "treats", "Measles", EntityKind::Disease),
            RawFact::typed("ORS", EntityKind::Drug, "treats", "Cholera", EntityKind::Disease),
        ]
    }

    #[test]
    fn test_first_batch_trains_and_publishes() {
        let manager = manager(UpdateConfig::default());
        assert_eq!(manager.state(), LifecycleState::Idle);

        let outcome = manager.ingest_batch(&first_batch()).unwrap();
        match outcome.decision {
            UpdateDecision::Published { plan, snapshot } => {
                assert_eq!(plan.kind, UpdateKind::FullRetrain);
                assert_eq!(snapshot.version(), 1);
            }
            other => panic!("unexpected decision {other:?}"),
        }
        assert_eq!(manager.state(), LifecycleState::Published);
        assert_eq!(manager.drift(), Some(0.0));
    }

    #[test]
    fn test_unchanged_batch_is_no_change() {
        let manager = manager(UpdateConfig::default());
        manager.ingest_batch(&first_batch()).unwrap();
        let outcome = manager.ingest_batch(&first_batch()).unwrap();
        assert_eq!(outcome.decision, UpdateDecision::NoChange);
        assert_eq!(manager.registry().current_version(), Some(1));
    }

    #[test]
    fn test_small_drift_fine_tunes() {
        let manager = manager(UpdateConfig {
            drift_threshold: 0.5,
            ..UpdateConfig::default()
        });
        manager.ingest_batch(&first_batch()).unwrap();

        let outcome = manager
            .ingest_batch(&[RawFact::typed("Zika", EntityKind::Disease, "reported-in", "Country::NGA", EntityKind::Country)])
            .unwrap();
        let UpdateDecision::Published { plan, snapshot } = outcome.decision else {
            panic!("expected a publish");
        };
        assert_eq!(plan.kind, UpdateKind::FineTune);
        assert_eq!(snapshot.metadata().parent_version, Some(1));

        // Touched NGA pulls in Measles; the Cholera component stays frozen
        let store = manager.store();
        let measles = store.catalog().resolve("Measles").unwrap();
        let cholera = store.catalog().resolve("Cholera").unwrap();
        assert!(plan.active_entities.contains(&measles));
        assert!(!plan.active_entities.contains(&cholera));
        let before = snapshot.entity(cholera).unwrap().to_owned();
        let base = manager.registry().get(1).unwrap();
        assert_eq!(before, base.entity(cholera).unwrap().to_owned());
    }

    #[test]
    fn test_deferred_plans_accumulate() {
        let manager = manager(UpdateConfig {
            execute_immediately: false,
            ..UpdateConfig::default()
        });
        let outcome = manager.ingest_batch(&first_batch()).unwrap();
        assert!(matches!(outcome.decision, UpdateDecision::Scheduled(_)));
        assert!(manager.registry().current().is_none());

        manager
            .ingest_batch(&[RawFact::typed("Zika", EntityKind::Disease, "reported-in", "Country::BRA", EntityKind::Country)])
            .unwrap();
        let pending = manager.pending().unwrap();
        assert_eq!(pending.kind, UpdateKind::FullRetrain);
        assert_eq!(pending.batch, BatchId(2));

        let snapshot = manager.run_pending(&CancellationToken::new()).unwrap();
        assert_eq!(snapshot.entity_count(), 8);
        assert!(matches!(
            manager.run_pending(&CancellationToken::new()),
            Err(UpdateError::NothingPending)
        ));
    }

    #[test]
    fn test_cancelled_training_keeps_state() {
        let manager = manager(UpdateConfig::default());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = manager.ingest_batch_with(&first_batch(), &cancel).unwrap_err();
        assert!(matches!(err, UpdateError::Training(TrainingError::Cancelled(_))));
        assert_eq!(manager.state(), LifecycleState::Idle);
        assert!(manager.pending().is_some());
    }

    #[test]
    fn test_adopt_into_fresh_manager() {
        let source = manager(UpdateConfig::default());
        source.ingest_batch(&first_batch()).unwrap();
        let trained = (*source.registry().current().unwrap()).clone();

        let target = manager(UpdateConfig {
            drift_threshold: 0.5,
            ..UpdateConfig::default()
        });
        let adopted = target.adopt(trained).unwrap();
        assert_eq!(adopted.version(), 1);
        assert_eq!(target.state(), LifecycleState::Published);
        assert_eq!(target.store().catalog(), adopted.catalog());
        assert_eq!(target.drift(), Some(0.0));

        // The facts behind the snapshot arrive later and fine-tune it
        let outcome = target.ingest_batch(&first_batch()).unwrap();
        let UpdateDecision::Published { plan, snapshot } = outcome.decision else {
            panic!("expected a publish");
        };
        assert_eq!(plan.kind, UpdateKind::FineTune);
        assert_eq!(snapshot.metadata().parent_version, Some(1));
        assert_eq!(target.state(), LifecycleState::Published);
    }

    #[test]
    fn test_adopt_rejects_foreign_vocabulary() {
        let source = manager(UpdateConfig::default());
        source.ingest_batch(&first_batch()).unwrap();
        let trained = (*source.registry().current().unwrap()).clone();

        let target = manager(UpdateConfig::default());
        target
            .ingest_batch(&[RawFact::typed("Ebola", EntityKind::Disease, "reported-in", "Country::COD", EntityKind::Country)])
            .unwrap();

        let err = target.adopt(trained).unwrap_err();
        assert!(matches!(err, UpdateError::Graph(crate::graph::GraphError::VocabularyMismatch(_))));
        assert_eq!(target.registry().current_version(), Some(1));
        assert_eq!(target.store().catalog().entity_count(), 2);
        assert_eq!(target.state(), LifecycleState::Published);
    }

    #[test]
    fn test_adopt_rejects_other_model_shape() {
        let source = UpdateManager::new(
            Trainer::new(
                ModelConfig {
                    dim: 8,
                    scoring: ScoringFunction::DistMult,
                    ..ModelConfig::default()
                },
                TrainingConfig {
                    max_epochs: 2,
                    validation_fraction: 0.0,
                    ..TrainingConfig::default()
                },
            ),
            UpdateConfig::default(),
            Arc::new(SnapshotRegistry::new(RegistryConfig::default())),
        );
        source.ingest_batch(&first_batch()).unwrap();
        let trained = (*source.registry().current().unwrap()).clone();

        let target = manager(UpdateConfig::default());
        let err = target.adopt(trained).unwrap_err();
        assert!(matches!(err, UpdateError::Training(TrainingError::IncompatibleSnapshot(_))));
        assert_eq!(target.state(), LifecycleState::Idle);
        assert!(target.registry().current().is_none());
    }
}
