//! Knowledge graph embeddings
//!
//! This module turns the triple store into dense vectors:
//! - Scoring functions with analytic gradients (TransE, DistMult, RotatE)
//! - Margin-ranking training with early stopping and fine-tuning
//! - Filtered, kind-restricted rank evaluation
//! - Immutable snapshots and a versioned registry with rollback

pub mod cancel;
pub mod evaluation;
pub mod registry;
pub mod scoring;
pub mod snapshot;
pub mod trainer;

pub use cancel::CancellationToken;
pub use evaluation::{evaluate_snapshot, RankMetrics};
pub use registry::{RegistryConfig, SnapshotRegistry};
pub use scoring::ScoringFunction;
pub use snapshot::{EmbeddingSnapshot, SnapshotError, SnapshotMetadata, SnapshotResult, TrainingKind};
pub use trainer::{
    EpochObserver, EpochReport, ModelConfig, Trainer, TrainingConfig, TrainingError, TrainingResult,
};
