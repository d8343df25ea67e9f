//! Core type definitions for the knowledge graph

use super::error::GraphError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Unique identifier for an entity
///
/// Ids are dense and assigned in creation order, so they double as row indices
/// into embedding tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub struct EntityId(pub u32);

impl EntityId {
    pub fn new(id: u32) -> Self {
        EntityId(id)
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }

    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityId({})", self.0)
    }
}

impl From<u32> for EntityId {
    fn from(id: u32) -> Self {
        EntityId(id)
    }
}

/// Unique identifier for a relation type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub struct RelationId(pub u32);

impl RelationId {
    pub fn new(id: u32) -> Self {
        RelationId(id)
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }

    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for RelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RelationId({})", self.0)
    }
}

impl From<u32> for RelationId {
    fn from(id: u32) -> Self {
        RelationId(id)
    }
}

/// Ingestion batch counter. Batch 0 means "nothing ingested yet".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord, Default)]
pub struct BatchId(pub u64);

impl BatchId {
    pub fn next(&self) -> Self {
        BatchId(self.0 + 1)
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "batch#{}", self.0)
    }
}

/// Entity kind tag
///
/// Closed set: compatibility checks against relation signatures are exhaustive
/// matches, never string comparisons. `Other` marks an entity that could not be
/// kind-classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub enum EntityKind {
    Disease,
    Country,
    Drug,
    Facility,
    OutbreakEvent,
    Shipment,
    Other,
}

impl EntityKind {
    pub const ALL: [EntityKind; 7] = [
        EntityKind::Disease,
        EntityKind::Country,
        EntityKind::Drug,
        EntityKind::Facility,
        EntityKind::OutbreakEvent,
        EntityKind::Shipment,
        EntityKind::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Disease => "Disease",
            EntityKind::Country => "Country",
            EntityKind::Drug => "Drug",
            EntityKind::Facility => "Facility",
            EntityKind::OutbreakEvent => "OutbreakEvent",
            EntityKind::Shipment => "Shipment",
            EntityKind::Other => "Other",
        }
    }

    /// Whether the kind carries semantic information
    pub fn is_classified(&self) -> bool {
        !matches!(self, EntityKind::Other)
    }

    /// Classify a name that follows the `Kind::identifier` convention of the
    /// extraction pipeline (`Country::NGA`, `Compound::DB00001`).
    pub fn from_prefixed_name(name: &str) -> Option<EntityKind> {
        let (prefix, rest) = name.split_once("::")?;
        if rest.trim().is_empty() {
            return None;
        }
        prefix.parse::<EntityKind>().ok().filter(|kind| kind.is_classified())
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = GraphError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .chars()
            .filter(|c| !matches!(c, '-' | '_' | ' '))
            .collect::<String>()
            .to_ascii_lowercase();

        match normalized.as_str() {
            "disease" => Ok(EntityKind::Disease),
            "country" => Ok(EntityKind::Country),
            "drug" | "compound" => Ok(EntityKind::Drug),
            "facility" => Ok(EntityKind::Facility),
            "outbreakevent" | "outbreak" => Ok(EntityKind::OutbreakEvent),
            "shipment" => Ok(EntityKind::Shipment),
            "other" => Ok(EntityKind::Other),
            _ => Err(GraphError::UnknownEntityKind(s.to_string())),
        }
    }
}
