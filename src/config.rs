//! Engine configuration
//!
//! Every section has working defaults, so a config file only needs the values it
//! changes:
//!
//! ```yaml
//! model:
//!   scoring: rotate
//!   dim: 64
//! training:
//!   learning_rate: 0.05
//!   negative_strategy: kind_constrained
//! update:
//!   drift_threshold: 0.2
//! ```

use crate::inference::InferenceConfig;
use crate::kge::{ModelConfig, RegistryConfig, TrainingConfig};
use crate::update::UpdateConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Parsed but unusable value
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Complete engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub model: ModelConfig,
    pub training: TrainingConfig,
    pub inference: InferenceConfig,
    pub update: UpdateConfig,
    pub registry: RegistryConfig,
}

impl EngineConfig {
    /// Parse and validate YAML
    pub fn from_yaml_str(source: &str) -> ConfigResult<Self> {
        let config: EngineConfig = serde_yaml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate JSON
    pub fn from_json_str(source: &str) -> ConfigResult<Self> {
        let config: EngineConfig = serde_json::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a `.json` file as JSON and anything else as YAML
    pub fn from_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)?;
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::from_json_str(&source),
            _ => Self::from_yaml_str(&source),
        }
    }

    pub fn to_yaml_string(&self) -> ConfigResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> ConfigResult<()> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        if self.model.dim == 0 {
            return invalid("model.dim must be positive");
        }

        let training = &self.training;
        if training.batch_size == 0 {
            return invalid("training.batch_size must be positive");
        }
        if !(training.learning_rate.is_finite() && training.learning_rate > 0.0) {
            return invalid("training.learning_rate must be a positive number");
        }
        if !(training.margin.is_finite() && training.margin > 0.0) {
            return invalid("training.margin must be a positive number");
        }
        if training.negatives_per_positive == 0 {
            return invalid("training.negatives_per_positive must be positive");
        }
        if !(training.l2_regularization.is_finite() && training.l2_regularization >= 0.0) {
            return invalid("training.l2_regularization must not be negative");
        }
        if !(0.0..1.0).contains(&training.validation_fraction) {
            return invalid("training.validation_fraction must be in [0, 1)");
        }

        let inference = &self.inference;
        if inference.beam_width == 0 {
            return invalid("inference.beam_width must be positive");
        }
        if !(inference.temperature.is_finite() && inference.temperature > 0.0) {
            return invalid("inference.temperature must be a positive number");
        }

        if !(self.update.drift_threshold.is_finite() && self.update.drift_threshold >= 0.0) {
            return invalid("update.drift_threshold must not be negative");
        }
        if self.update.fine_tune_epochs == 0 {
            return invalid("update.fine_tune_epochs must be positive");
        }

        if self.registry.max_history == 0 {
            return invalid("registry.max_history must be positive");
        }

        Ok(())
    }
}
