//! Facts: raw records from extraction and their deduplicated stored form

use super::types::{BatchId, EntityId, EntityKind, RelationId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

fn default_confidence() -> f32 {
    1.0
}

/// A fact record as delivered by the extraction collaborator
///
/// Kinds are optional: an omitted kind is taken from the catalog, then from a
/// `Kind::name` prefix, and finally defaults to `Other`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawFact {
    pub head_name: String,
    #[serde(default)]
    pub head_kind: Option<EntityKind>,
    pub relation_name: String,
    pub tail_name: String,
    #[serde(default)]
    pub tail_kind: Option<EntityKind>,
    /// Ingestion day of the observation
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    /// Source confidence in [0, 1]
    #[serde(default = "default_confidence")]
    pub confidence: f32,
}

impl RawFact {
    pub fn new(head: impl Into<String>, relation: impl Into<String>, tail: impl Into<String>) -> Self {
        Self {
            head_name: head.into(),
            head_kind: None,
            relation_name: relation.into(),
            tail_name: tail.into(),
            tail_kind: None,
            timestamp: None,
            confidence: default_confidence(),
        }
    }

    /// Fact with both entity kinds declared
    pub fn typed(
        head: impl Into<String>,
        head_kind: EntityKind,
        relation: impl Into<String>,
        tail: impl Into<String>,
        tail_kind: EntityKind,
    ) -> Self {
        Self::new(head, relation, tail).with_kinds(head_kind, tail_kind)
    }

    pub fn with_kinds(mut self, head_kind: EntityKind, tail_kind: EntityKind) -> Self {
        self.head_kind = Some(head_kind);
        self.tail_kind = Some(tail_kind);
        self
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn observed_at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

/// Deduplication key of a fact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FactKey {
    pub head: EntityId,
    pub relation: RelationId,
    pub tail: EntityId,
}

impl FactKey {
    pub fn new(head: EntityId, relation: RelationId, tail: EntityId) -> Self {
        Self { head, relation, tail }
    }

    pub fn involves(&self, entity: EntityId) -> bool {
        self.head == entity || self.tail == entity
    }
}

/// A stored, deduplicated fact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fact {
    pub key: FactKey,
    pub confidence: f32,
    pub timestamp: Option<DateTime<Utc>>,
    /// Observations folded into `confidence` by weighted averaging
    pub observations: u32,
    /// Batch that first added the fact
    pub first_batch: BatchId,
    /// Batch that last changed the fact
    pub last_batch: BatchId,
}

/// How a repeated observation's confidence is merged into the stored fact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MergePolicy {
    /// Keep the larger of the stored and observed confidence
    #[default]
    Max,
    /// Running mean over all observations
    WeightedAverage,
}

impl MergePolicy {
    /// Merge an observation into a stored fact, returning whether anything changed
    pub(crate) fn merge(&self, fact: &mut Fact, confidence: f32, timestamp: Option<DateTime<Utc>>) -> bool {
        let before_confidence = fact.confidence;
        let before_timestamp = fact.timestamp;

        match self {
            MergePolicy::Max => {
                fact.confidence = fact.confidence.max(confidence);
            }
            MergePolicy::WeightedAverage => {
                let n = fact.observations as f32;
                fact.confidence = (fact.confidence * n + confidence) / (n + 1.0);
                fact.observations += 1;
            }
        }

        fact.timestamp = match (fact.timestamp, timestamp) {
            (Some(old), Some(new)) => Some(old.max(new)),
            (old, new) => old.or(new),
        };

        matches!(self, MergePolicy::WeightedAverage)
            || fact.confidence != before_confidence
            || fact.timestamp != before_timestamp
    }
}

/// Outcome of one `add_facts` call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IngestReport {
    /// Batch id assigned to the call; `None` when nothing changed
    pub batch: Option<BatchId>,
    /// Facts that did not exist before
    pub added: usize,
    /// Existing facts whose confidence or timestamp changed
    pub updated: usize,
    /// Records that matched an existing fact without changing it
    pub unchanged: usize,
    /// Entities created by this batch
    pub new_entities: Vec<EntityId>,
    /// Relations created by this batch
    pub new_relations: Vec<RelationId>,
    /// Entities appearing in added or updated facts, ascending
    pub touched_entities: Vec<EntityId>,
    /// Relations appearing in added or updated facts, ascending
    pub touched_relations: Vec<RelationId>,
}

impl IngestReport {
    pub fn changed(&self) -> bool {
        self.added + self.updated > 0
    }
}
