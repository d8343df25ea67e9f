//! Multi-relational knowledge graph
//!
//! This module implements the typed triple model:
//! - Entities with a stable id and a semantic kind (Disease, Country, Drug, ...)
//! - Relations with optional domain/range signatures
//! - Deduplicated facts carrying confidence and batch provenance
//! - Atomic batch ingestion with negative sampling for training

pub mod catalog;
pub mod error;
pub mod fact;
pub mod schema;
pub mod store;
pub mod types;

// Re-export main types
pub use catalog::{canonical_name, Catalog, Entity};
pub use error::{GraphError, GraphResult};
pub use fact::{Fact, FactKey, IngestReport, MergePolicy, RawFact};
pub use schema::{Relation, RelationSignature};
pub use store::{NegativeStrategy, TripleStore};
pub use types::{BatchId, EntityId, EntityKind, RelationId};
