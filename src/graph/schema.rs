//! Relation types and their domain/range constraint table

use super::types::{EntityKind, RelationId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Domain/range constraint of a binary relation. `None` accepts any kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct RelationSignature {
    pub domain: Option<EntityKind>,
    pub range: Option<EntityKind>,
}

impl RelationSignature {
    pub fn new(domain: EntityKind, range: EntityKind) -> Self {
        Self {
            domain: Some(domain),
            range: Some(range),
        }
    }

    pub fn unconstrained() -> Self {
        Self::default()
    }

    pub fn is_constrained(&self) -> bool {
        self.domain.is_some() || self.range.is_some()
    }

    pub fn admits_head(&self, kind: EntityKind) -> bool {
        self.domain.map_or(true, |domain| domain == kind)
    }

    pub fn admits_tail(&self, kind: EntityKind) -> bool {
        self.range.map_or(true, |range| range == kind)
    }

    pub fn admits(&self, head: EntityKind, tail: EntityKind) -> bool {
        self.admits_head(head) && self.admits_tail(tail)
    }

    /// Signature of the relation read backwards (tail to head)
    pub fn inverse(&self) -> Self {
        Self {
            domain: self.range,
            range: self.domain,
        }
    }
}

impl fmt::Display for RelationSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let side = |kind: Option<EntityKind>| kind.map_or("*", |k| k.as_str());
        write!(f, "{} -> {}", side(self.domain), side(self.range))
    }
}

/// A named predicate with its signature
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relation {
    pub id: RelationId,
    pub name: String,
    pub signature: RelationSignature,
}
