//! Incremental updates
//!
//! Batch ingestion, drift measurement, and the lifecycle that decides between a
//! bounded fine-tune and a full retrain.

pub mod manager;
pub mod state;

pub use manager::{drift, BatchOutcome, UpdateConfig, UpdateDecision, UpdateKind, UpdateManager, UpdatePlan};
pub use state::{LifecycleEvent, LifecycleState};

use crate::graph::GraphError;
use crate::kge::{SnapshotError, TrainingError};
use thiserror::Error;

/// Update errors
#[derive(Error, Debug)]
pub enum UpdateError {
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("Training error: {0}")]
    Training(#[from] TrainingError),

    #[error("Snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),

    /// Event not allowed in the current lifecycle state
    #[error("Invalid lifecycle transition: {event} in state {from}")]
    InvalidTransition {
        from: LifecycleState,
        event: LifecycleEvent,
    },

    #[error("No update is pending")]
    NothingPending,
}

pub type UpdateResult<T> = Result<T, UpdateError>;
