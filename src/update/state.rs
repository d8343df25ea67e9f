//! Training lifecycle state machine
//!
//! ```text
//! Idle --StartTraining--> Training --Publish--> Published
//! Published --StartFineTune--> FineTuning --Publish--> Published
//! Published --StartFullRetrain--> FullRetrain --Publish--> Published
//! Training --Fail--> Idle
//! FineTuning | FullRetrain --Fail--> Published
//! Idle | Published --Adopt--> Published
//! ```

use super::{UpdateError, UpdateResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where the engine is in its train / publish cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum LifecycleState {
    /// Nothing published yet
    #[default]
    Idle,
    /// First training run
    Training,
    /// A snapshot is serving queries
    Published,
    /// Bounded update of the current snapshot
    FineTuning,
    /// Full retrain while the current snapshot keeps serving
    FullRetrain,
}

/// Input of the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LifecycleEvent {
    StartTraining,
    StartFineTune,
    StartFullRetrain,
    Publish,
    Fail,
    /// Serve an imported snapshot
    Adopt,
}

impl LifecycleState {
    /// Next state, or `InvalidTransition` when the event is not allowed here
    pub fn transition(self, event: LifecycleEvent) -> UpdateResult<LifecycleState> {
        use LifecycleEvent::*;
        use LifecycleState::*;

        match (self, event) {
            (Idle, StartTraining) => Ok(Training),
            (Published, StartFineTune) => Ok(FineTuning),
            (Published, StartFullRetrain) => Ok(FullRetrain),
            (Training | FineTuning | FullRetrain, Publish) => Ok(Published),
            (Training, Fail) => Ok(Idle),
            (FineTuning | FullRetrain, Fail) => Ok(Published),
            (Idle | Published, Adopt) => Ok(Published),
            (from, event) => Err(UpdateError::InvalidTransition { from, event }),
        }
    }

    /// Whether a training run is in flight
    pub fn is_training(&self) -> bool {
        matches!(
            self,
            LifecycleState::Training | LifecycleState::FineTuning | LifecycleState::FullRetrain
        )
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}
