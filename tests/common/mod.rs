//! Shared fixtures for integration tests

#![allow(dead_code)]

use hercule::{EngineConfig, EntityKind, Hercule, NegativeStrategy, RawFact, RelationSignature};
use std::sync::Once;

static INIT: Once = Once::new();

/// Route warnings and errors from `tracing` through the test harness
pub fn init_tracing() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::WARN)
            .with_test_writer()
            .try_init();
    });
}

/// Small, fast configuration for tests
pub fn small_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.model.dim = 8;
    config.training.max_epochs = 20;
    config.training.batch_size = 8;
    config.training.validation_fraction = 0.0;
    config
}

/// Configuration that trains the outbreak fixture to separation
pub fn converging_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.model.dim = 16;
    config.training.max_epochs = 500;
    config.training.patience = 500;
    config.training.learning_rate = 0.1;
    config.training.negatives_per_positive = 8;
    config.training.negative_strategy = NegativeStrategy::KindConstrained;
    config.training.validation_fraction = 0.0;
    config.inference.temperature = 0.1;
    config
}

pub fn declare_outbreak_schema(engine: &Hercule) {
    engine
        .declare_relation("reported-in", RelationSignature::new(EntityKind::Disease, EntityKind::Country))
        .unwrap();
    engine
        .declare_relation("treats", RelationSignature::new(EntityKind::Drug, EntityKind::Disease))
        .unwrap();
}

/// Two disconnected outbreak chains: Vaccine-A treats Measles, which is reported in
/// Nigeria; ORS treats Cholera, which is reported in Yemen.
pub fn outbreak_facts() -> Vec<RawFact> {
    vec![
        RawFact::typed("Measles", EntityKind::Disease, "reported-in", "Country::NGA", EntityKind::Country),
        RawFact::typed("Cholera", EntityKind::Disease, "reported-in", "Country::YEM", EntityKind::Country),
        RawFact::typed("Vaccine-A", EntityKind::Drug, "treats", "Measles", EntityKind::Disease),
        RawFact::typed("ORS", EntityKind::Drug, "treats", "Cholera", EntityKind::Disease),
    ]
}

/// Supply-chain facts layered on the outbreak fixture
pub fn supply_facts() -> Vec<RawFact> {
    vec![
        RawFact::typed("Facility::Pune", EntityKind::Facility, "produces", "Vaccine-A", EntityKind::Drug),
        RawFact::typed("Facility::Pune", EntityKind::Facility, "located-in", "Country::IND", EntityKind::Country),
        RawFact::typed("Facility::Basel", EntityKind::Facility, "produces", "ORS", EntityKind::Drug),
        RawFact::typed("Facility::Basel", EntityKind::Facility, "located-in", "Country::CHE", EntityKind::Country),
    ]
}
