//! Query and result types

use crate::graph::{EntityId, EntityKind, RelationId, RelationSignature};
use serde::{Deserialize, Serialize};

/// A triple with exactly one unbound slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PartialTriple {
    /// (head, relation, ?)
    Tail { head: EntityId, relation: RelationId },
    /// (?, relation, tail)
    Head { relation: RelationId, tail: EntityId },
}

impl PartialTriple {
    pub fn relation(&self) -> RelationId {
        match self {
            PartialTriple::Tail { relation, .. } | PartialTriple::Head { relation, .. } => *relation,
        }
    }

    /// The entity that is given
    pub fn bound(&self) -> EntityId {
        match self {
            PartialTriple::Tail { head, .. } => *head,
            PartialTriple::Head { tail, .. } => *tail,
        }
    }

    /// Direction in which the relation is traversed from the bound entity
    pub fn direction(&self) -> HopDirection {
        match self {
            PartialTriple::Tail { .. } => HopDirection::Forward,
            PartialTriple::Head { .. } => HopDirection::Inverse,
        }
    }
}

/// Traversal direction of a hop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HopDirection {
    /// From head to tail
    Forward,
    /// From tail to head; scored as head prediction
    Inverse,
}

/// One step of a multi-hop query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Hop {
    pub relation: RelationId,
    pub direction: HopDirection,
}

impl Hop {
    pub fn forward(relation: RelationId) -> Self {
        Self {
            relation,
            direction: HopDirection::Forward,
        }
    }

    pub fn inverse(relation: RelationId) -> Self {
        Self {
            relation,
            direction: HopDirection::Inverse,
        }
    }

    /// (kind required where the hop starts, kind produced where it ends)
    pub fn kinds(&self, signature: &RelationSignature) -> (Option<EntityKind>, Option<EntityKind>) {
        match self.direction {
            HopDirection::Forward => (signature.domain, signature.range),
            HopDirection::Inverse => (signature.range, signature.domain),
        }
    }
}

/// Chain of hops from a bound start entity
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PathQuery {
    pub start: EntityId,
    pub hops: Vec<Hop>,
}

impl PathQuery {
    pub fn new(start: EntityId, hops: Vec<Hop>) -> Self {
        Self { start, hops }
    }
}

/// How per-hop confidences combine into a path score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PathScoring {
    /// Sum of per-hop log-confidences
    #[default]
    SumLog,
    /// Product of per-hop confidences
    Product,
}

impl PathScoring {
    /// Path score from the summed log-confidence
    pub fn aggregate(&self, log_sum: f32) -> f32 {
        match self {
            PathScoring::SumLog => log_sum,
            PathScoring::Product => log_sum.exp(),
        }
    }
}

/// A ranked candidate entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub entity: EntityId,
    pub name: String,
    pub kind: EntityKind,
    /// Raw model score (single hop) or aggregated path score (multi-hop)
    pub score: f32,
    /// Softmax-calibrated confidence in (0, 1]; for paths the product over hops
    pub confidence: f32,
    /// 1-based position
    pub rank: usize,
    /// Entities visited from the start entity, inclusive (multi-hop only)
    pub path: Vec<EntityId>,
}

/// Inference result: ranked candidates plus the snapshot that produced them
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ranking {
    pub snapshot_version: u64,
    pub candidates: Vec<Candidate>,
}

impl Ranking {
    pub fn top(&self) -> Option<&Candidate> {
        self.candidates.first()
    }

    pub fn names(&self) -> Vec<&str> {
        self.candidates.iter().map(|c| c.name.as_str()).collect()
    }
}

/// Cache key: the query plus the requested depth
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum QueryKey {
    Single(PartialTriple, usize),
    Path(PathQuery, usize),
}
