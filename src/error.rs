//! Crate-level error type

use crate::config::ConfigError;
use crate::graph::GraphError;
use crate::inference::InferenceError;
use crate::kge::{SnapshotError, TrainingError};
use crate::update::UpdateError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HerculeError {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Training(#[from] TrainingError),

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error(transparent)]
    Inference(#[from] InferenceError),

    #[error(transparent)]
    Update(#[from] UpdateError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type HerculeResult<T> = Result<T, HerculeError>;
