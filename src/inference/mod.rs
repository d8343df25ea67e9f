//! Inference over embedding snapshots
//!
//! Kind-filtered link prediction with calibrated confidences, and beam search over
//! multi-hop relation chains.

mod cache;
pub mod engine;
pub mod query;

pub use engine::{InferenceConfig, InferenceEngine};
pub use query::{Candidate, Hop, HopDirection, PartialTriple, PathQuery, PathScoring, Ranking};

use crate::graph::EntityId;
use thiserror::Error;

/// Inference errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InferenceError {
    /// Kinds along the query do not line up
    #[error("Incompatible query: {0}")]
    IncompatibleQuery(String),

    /// Entity name not in the snapshot vocabulary
    #[error("Unknown entity: {0}")]
    UnknownEntity(String),

    /// Relation not in the snapshot vocabulary
    #[error("Unknown relation: {0}")]
    UnknownRelation(String),

    /// Entity id outside the snapshot
    #[error("Unknown entity id: {0}")]
    UnknownId(EntityId),

    /// Nothing has been published yet
    #[error("No snapshot has been published")]
    NoSnapshot,
}

pub type InferenceResult<T> = Result<T, InferenceError>;

impl From<crate::graph::GraphError> for InferenceError {
    fn from(err: crate::graph::GraphError) -> Self {
        match err {
            crate::graph::GraphError::UnknownId(id) => InferenceError::UnknownId(id),
            crate::graph::GraphError::UnknownRelationId(id) => InferenceError::UnknownRelation(id.to_string()),
            other => InferenceError::IncompatibleQuery(other.to_string()),
        }
    }
}
