//! Engine facade
//!
//! Wires one snapshot registry into an update manager (the writer side) and an
//! inference engine (the reader side). Queries always see the last published
//! snapshot while training runs on a copy of the store.

use crate::config::EngineConfig;
use crate::error::HerculeResult;
use crate::graph::{RawFact, RelationId, RelationSignature, TripleStore};
use crate::inference::{HopDirection, InferenceEngine, PartialTriple, PathQuery, Ranking};
use crate::kge::{evaluate_snapshot, CancellationToken, EmbeddingSnapshot, EpochObserver, RankMetrics, SnapshotRegistry, Trainer};
use crate::update::{BatchOutcome, LifecycleState, UpdateManager};
use std::path::Path;
use std::sync::{Arc, RwLockReadGuard};
use tracing::info;

/// Knowledge graph embedding engine
pub struct Hercule {
    config: EngineConfig,
    registry: Arc<SnapshotRegistry>,
    updates: UpdateManager,
    inference: InferenceEngine,
}

impl Hercule {
    /// Engine with the given configuration (validated first)
    pub fn from_config(config: EngineConfig) -> HerculeResult<Self> {
        Self::build(config, None)
    }

    /// Like [`from_config`](Self::from_config), reporting every training epoch
    /// to `observer`
    pub fn with_observer(config: EngineConfig, observer: EpochObserver) -> HerculeResult<Self> {
        Self::build(config, Some(observer))
    }

    fn build(config: EngineConfig, observer: Option<EpochObserver>) -> HerculeResult<Self> {
        config.validate()?;

        let registry = Arc::new(SnapshotRegistry::new(config.registry.clone()));
        let mut trainer = Trainer::new(config.model.clone(), config.training.clone());
        if let Some(observer) = observer {
            trainer = trainer.with_observer(observer);
        }
        let updates = UpdateManager::new(trainer, config.update.clone(), Arc::clone(&registry));
        let inference = InferenceEngine::new(Arc::clone(&registry), config.inference.clone());

        info!(
            "Engine ready: {} d={}, drift threshold {}",
            config.model.scoring, config.model.dim, config.update.drift_threshold
        );
        Ok(Self {
            config,
            registry,
            updates,
            inference,
        })
    }

    /// Engine from a YAML or JSON config file
    pub fn from_file(path: impl AsRef<Path>) -> HerculeResult<Self> {
        Self::from_config(EngineConfig::from_file(path)?)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<SnapshotRegistry> {
        &self.registry
    }

    pub fn updates(&self) -> &UpdateManager {
        &self.updates
    }

    pub fn inference(&self) -> &InferenceEngine {
        &self.inference
    }

    pub fn store(&self) -> RwLockReadGuard<'_, TripleStore> {
        self.updates.store()
    }

    pub fn state(&self) -> LifecycleState {
        self.updates.state()
    }

    pub fn current_snapshot(&self) -> Option<Arc<EmbeddingSnapshot>> {
        self.registry.current()
    }

    pub fn declare_relation(&self, name: &str, signature: RelationSignature) -> HerculeResult<RelationId> {
        Ok(self.updates.declare_relation(name, signature)?)
    }

    /// Ingest a batch; trains and publishes unless updates are deferred
    pub fn ingest(&self, facts: &[RawFact]) -> HerculeResult<BatchOutcome> {
        Ok(self.updates.ingest_batch(facts)?)
    }

    /// Full retrain on the current store
    pub fn train(&self, cancel: &CancellationToken) -> HerculeResult<Arc<EmbeddingSnapshot>> {
        Ok(self.updates.train_full(cancel)?)
    }

    /// Execute a deferred update
    pub fn run_pending(&self, cancel: &CancellationToken) -> HerculeResult<Arc<EmbeddingSnapshot>> {
        Ok(self.updates.run_pending(cancel)?)
    }

    pub fn rollback(&self, version: u64) -> HerculeResult<Arc<EmbeddingSnapshot>> {
        Ok(self.updates.rollback(version)?)
    }

    pub fn infer(&self, query: PartialTriple, k: usize) -> HerculeResult<Ranking> {
        Ok(self.inference.infer(query, k)?)
    }

    pub fn infer_tail(&self, head: &str, relation: &str, k: usize) -> HerculeResult<Ranking> {
        Ok(self.inference.infer_tail_by_name(head, relation, k)?)
    }

    pub fn infer_head(&self, relation: &str, tail: &str, k: usize) -> HerculeResult<Ranking> {
        Ok(self.inference.infer_head_by_name(relation, tail, k)?)
    }

    pub fn infer_path(&self, query: &PathQuery, k: usize) -> HerculeResult<Ranking> {
        Ok(self.inference.infer_path(query, k)?)
    }

    pub fn infer_path_by_name(&self, start: &str, hops: &[(&str, HopDirection)], k: usize) -> HerculeResult<Ranking> {
        Ok(self.inference.infer_path_by_name(start, hops, k)?)
    }

    /// Filtered rank metrics of the current snapshot over every stored fact
    pub fn evaluate(&self) -> Option<RankMetrics> {
        let snapshot = self.registry.current()?;
        Some(evaluate_snapshot(&self.store(), &snapshot))
    }

    /// Write the current snapshot to `path`
    pub fn export_current(&self, path: impl AsRef<Path>) -> HerculeResult<Option<u64>> {
        let Some(snapshot) = self.registry.current() else {
            return Ok(None);
        };
        snapshot.save(path)?;
        Ok(Some(snapshot.version()))
    }

    /// Load an exported snapshot and serve it under the next version. The
    /// snapshot's vocabulary is merged into the store catalog, so ingestion
    /// afterwards fine-tunes it.
    pub fn import_snapshot(&self, path: impl AsRef<Path>) -> HerculeResult<Arc<EmbeddingSnapshot>> {
        let snapshot = EmbeddingSnapshot::load(path)?;
        Ok(self.updates.adopt(snapshot)?)
    }
}
