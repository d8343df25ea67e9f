//! Errors raised by the catalog and the triple store
//!
//! These indicate a data-quality problem upstream and are always surfaced to the
//! caller, never resolved silently.

use super::schema::RelationSignature;
use super::types::{EntityId, EntityKind, RelationId};
use thiserror::Error;

/// Errors that can occur during catalog and triple store operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GraphError {
    #[error("Entity kind cannot be classified: {0}")]
    UnknownEntityKind(String),

    #[error("Entity '{name}' already exists as {existing}, cannot register it as {requested}")]
    KindConflict {
        name: String,
        existing: EntityKind,
        requested: EntityKind,
    },

    #[error("Unknown entity id {0}")]
    UnknownId(EntityId),

    #[error("Unknown relation id {0}")]
    UnknownRelationId(RelationId),

    #[error("Relation '{name}' is declared as {existing}, cannot redeclare it as {requested}")]
    SignatureConflict {
        name: String,
        existing: RelationSignature,
        requested: RelationSignature,
    },

    #[error("Fact ({head} {head_kind}) -[{relation}]-> ({tail} {tail_kind}) violates signature {signature}")]
    SignatureViolation {
        head: String,
        head_kind: EntityKind,
        relation: String,
        tail: String,
        tail_kind: EntityKind,
        signature: RelationSignature,
    },

    #[error("Confidence {0} is outside [0, 1]")]
    InvalidConfidence(f32),

    #[error("Empty name in fact #{0}")]
    EmptyName(usize),

    /// Empty entity or relation name passed to the catalog directly
    #[error("Entity and relation names must not be empty")]
    BlankName,

    /// An imported vocabulary assigns a shared id to a different name
    #[error("Vocabulary mismatch: {0}")]
    VocabularyMismatch(String),
}

pub type GraphResult<T> = Result<T, GraphError>;
