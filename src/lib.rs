//! Hercule
//!
//! Knowledge graph embedding training and transitive inference for outbreak and
//! supply-chain surveillance.
//!
//! # Architecture
//!
//! - `graph`: typed triple store with an entity/relation catalog and kind constraints
//! - `kge`: TransE / DistMult / RotatE training, evaluation, versioned snapshots
//! - `inference`: kind-safe link prediction and beam search over relation chains
//! - `update`: drift-driven fine-tune / full retrain lifecycle
//! - `config`: YAML / JSON engine configuration
//!
//! Topology helpers (neighbourhoods, top-k selection) live in the
//! `hercule-graph-algorithms` workspace crate.
//!
//! ## Example Usage
//!
//! ```rust
//! use hercule::{EngineConfig, EntityKind, Hercule, HopDirection, RawFact, RelationSignature};
//!
//! let mut config = EngineConfig::default();
//! config.model.dim = 8;
//! config.training.max_epochs = 20;
//! let engine = Hercule::from_config(config).unwrap();
//!
//! engine.declare_relation("reported-in", RelationSignature::new(EntityKind::Disease, EntityKind::Country)).unwrap();
//! engine.declare_relation("treats", RelationSignature::new(EntityKind::Drug, EntityKind::Disease)).unwrap();
//! engine.ingest(&[
//!     RawFact::typed("Measles", EntityKind::Disease, "reported-in", "Country::NGA", EntityKind::Country),
//!     RawFact::typed("Vaccine-A", EntityKind::Drug, "treats", "Measles", EntityKind::Disease),
//! ]).unwrap();
//!
//! // Which drugs treat what is reported in Nigeria?
//! let ranking = engine
//!     .infer_path_by_name(
//!         "Country::NGA",
//!         &[("reported-in", HopDirection::Inverse), ("treats", HopDirection::Inverse)],
//!         1,
//!     )
//!     .unwrap();
//! assert_eq!(ranking.names(), vec!["Vaccine-A"]);
//! ```

#![allow(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod graph;
pub mod hercule;
pub mod inference;
pub mod kge;
pub mod update;

// Re-export main types for convenience
pub use graph::{
    Catalog, Entity, EntityId, EntityKind, Fact, FactKey, GraphError, GraphResult, IngestReport,
    MergePolicy, NegativeStrategy, RawFact, RelationId, RelationSignature, TripleStore,
};

pub use kge::{
    CancellationToken, EmbeddingSnapshot, RankMetrics, ScoringFunction, SnapshotError,
    SnapshotRegistry, Trainer, TrainingConfig, TrainingError,
};

pub use inference::{
    Candidate, Hop, HopDirection, InferenceConfig, InferenceEngine, InferenceError, PartialTriple,
    PathQuery, PathScoring, Ranking,
};

pub use update::{
    LifecycleState, UpdateConfig, UpdateDecision, UpdateError, UpdateKind, UpdateManager,
};

pub use config::{ConfigError, EngineConfig};
pub use error::{HerculeError, HerculeResult};
pub use hercule::Hercule;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get version string
pub fn version() -> &'static str {
    VERSION
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        let ver = version();
        assert!(!ver.is_empty());
        assert_eq!(ver, "0.3.0");
    }
}
