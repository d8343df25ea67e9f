mod common;

use common::{init_tracing, outbreak_facts, small_config, supply_facts};
use hercule::{
    EntityKind, GraphError, Hercule, HerculeError, MergePolicy, NegativeStrategy, RawFact, TripleStore,
    UpdateDecision, UpdateError,
};
use rand::rngs::StdRng;
use rand::SeedableRng;

fn deferred_engine() -> Hercule {
    let mut config = small_config();
    config.update.execute_immediately = false;
    Hercule::from_config(config).unwrap()
}

#[test]
fn test_batch_is_all_or_nothing() {
    init_tracing();
    let engine = deferred_engine();
    engine.ingest(&outbreak_facts()).unwrap();
    let before = engine.store().clone();

    // The last fact re-registers Measles as a country
    let mut batch = supply_facts();
    batch.push(RawFact::typed("Measles", EntityKind::Country, "borders", "Country::NGA", EntityKind::Country));

    let err = engine.ingest(&batch).unwrap_err();
    assert!(matches!(
        err,
        HerculeError::Update(UpdateError::Graph(GraphError::KindConflict { .. }))
    ));
    assert_eq!(*engine.store(), before);
}

#[test]
fn test_reingesting_is_idempotent_under_max() {
    init_tracing();
    let engine = deferred_engine();
    let first = engine.ingest(&outbreak_facts()).unwrap();
    assert_eq!(first.report.added, 4);

    let again = engine.ingest(&outbreak_facts()).unwrap();
    assert_eq!(again.decision, UpdateDecision::NoChange);
    assert_eq!(again.report.unchanged, 4);
    assert_eq!(again.report.batch, None);
    assert_eq!(engine.store().len(), 4);
    assert_eq!(engine.store().current_batch(), first.report.batch.unwrap());
}

#[test]
fn test_weighted_average_merges_observations() {
    let mut store = TripleStore::new();
    let fact = |confidence| {
        RawFact::typed("Measles", EntityKind::Disease, "reported-in", "Country::NGA", EntityKind::Country)
            .with_confidence(confidence)
    };
    store.add_facts(&[fact(1.0)], MergePolicy::WeightedAverage).unwrap();
    let report = store.add_facts(&[fact(0.5)], MergePolicy::WeightedAverage).unwrap();

    assert_eq!(report.updated, 1);
    let key = store.key_for_names("Measles", "reported-in", "Country::NGA").unwrap();
    let stored = store.get(&key).unwrap();
    assert!((stored.confidence - 0.75).abs() < 1e-6);
    assert_eq!(stored.observations, 2);
}

#[test]
fn test_names_are_canonicalised() {
    let mut store = TripleStore::new();
    store
        .add_facts(
            &[RawFact::typed("  Yellow   fever ", EntityKind::Disease, "reported-in", "Country::BRA", EntityKind::Country)],
            MergePolicy::Max,
        )
        .unwrap();
    assert!(store.catalog().resolve("Yellow fever").is_some());
}

#[test]
fn test_negatives_are_valid_corruptions() {
    let mut store = TripleStore::new();
    store.add_facts(&outbreak_facts(), MergePolicy::Max).unwrap();
    store.add_facts(&supply_facts(), MergePolicy::Max).unwrap();
    let mut rng = StdRng::seed_from_u64(7);

    for fact in store.facts() {
        let key = fact.key;
        for strategy in [NegativeStrategy::Uniform, NegativeStrategy::KindConstrained] {
            let negatives = store.sample_negatives(&key, 4, strategy, &mut rng).unwrap();
            assert!(negatives.len() <= 4);
            for negative in negatives {
                assert!(!store.contains(&negative), "{negative:?} is a stored fact");
                assert_eq!(negative.relation, key.relation);
                // Exactly one side is replaced
                assert!((negative.head == key.head) != (negative.tail == key.tail));

                if strategy == NegativeStrategy::KindConstrained {
                    let catalog = store.catalog();
                    assert_eq!(catalog.kind_of(negative.head).unwrap(), catalog.kind_of(key.head).unwrap());
                    assert_eq!(catalog.kind_of(negative.tail).unwrap(), catalog.kind_of(key.tail).unwrap());
                }
            }
        }
    }
}

#[test]
fn test_unclassified_entities_reject_kind_constrained_sampling() {
    let mut store = TripleStore::new();
    store
        .add_facts(&[RawFact::new("Measles", "linked-to", "mystery-cluster")], MergePolicy::Max)
        .unwrap();
    let key = store.facts()[0].key;
    let mut rng = StdRng::seed_from_u64(1);

    assert!(store.sample_negatives(&key, 2, NegativeStrategy::Uniform, &mut rng).is_ok());
    assert!(matches!(
        store.sample_negatives(&key, 2, NegativeStrategy::KindConstrained, &mut rng),
        Err(GraphError::UnknownEntityKind(_))
    ));
}
