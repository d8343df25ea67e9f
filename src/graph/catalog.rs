//! Entity and relation catalog
//!
//! Assigns stable, dense integer ids to entities and relation types and keeps the
//! canonical name <-> id mappings. Ids never change once assigned: re-ingesting a
//! name resolves to the id it was given the first time.

use super::error::{GraphError, GraphResult};
use super::schema::{Relation, RelationSignature};
use super::types::{EntityId, EntityKind, RelationId};
use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::OnceLock;
use tracing::debug;

/// A catalogued entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    pub name: String,
    pub kind: EntityKind,
}

/// Canonical form of an entity or relation name: trimmed, inner whitespace runs
/// collapsed to one space, case preserved.
pub fn canonical_name(name: &str) -> String {
    static WHITESPACE: OnceLock<Regex> = OnceLock::new();
    let re = WHITESPACE.get_or_init(|| Regex::new(r"\s+").expect("static regex"));
    re.replace_all(name.trim(), " ").into_owned()
}

/// Name <-> id registry for entities and relations
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    /// Entities indexed by id
    entities: Vec<Entity>,
    /// Canonical name -> id
    entity_index: IndexMap<String, EntityId>,
    /// Kind -> ids in ascending order
    kind_index: BTreeMap<EntityKind, Vec<EntityId>>,
    /// Relations indexed by id
    relations: Vec<Relation>,
    /// Canonical relation name -> id
    relation_index: IndexMap<String, RelationId>,
    /// Bumped whenever the relation set or a signature changes
    relation_version: u64,
}

impl Catalog {
    /// Create an empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve `name` to its id, creating the entity with `kind` if it is new.
    ///
    /// Fails with `KindConflict` when the name is already registered under another
    /// kind.
    pub fn resolve_or_create(&mut self, name: &str, kind: EntityKind) -> GraphResult<EntityId> {
        let name = canonical_name(name);
        if name.is_empty() {
            return Err(GraphError::BlankName);
        }

        if let Some(&id) = self.entity_index.get(&name) {
            let existing = self.entities[id.index()].kind;
            if existing != kind {
                return Err(GraphError::KindConflict {
                    name,
                    existing,
                    requested: kind,
                });
            }
            return Ok(id);
        }

        let id = EntityId::new(self.entities.len() as u32);
        debug!("Registered entity {} '{}' as {}", id, name, kind);
        self.entity_index.insert(name.clone(), id);
        self.kind_index.entry(kind).or_default().push(id);
        self.entities.push(Entity { id, name, kind });
        Ok(id)
    }

    /// Resolve a name without creating anything
    pub fn resolve(&self, name: &str) -> Option<EntityId> {
        self.entity_index.get(&canonical_name(name)).copied()
    }

    /// Reverse mapping: id -> entity
    pub fn lookup(&self, id: EntityId) -> GraphResult<&Entity> {
        self.entities.get(id.index()).ok_or(GraphError::UnknownId(id))
    }

    pub fn kind_of(&self, id: EntityId) -> GraphResult<EntityKind> {
        self.lookup(id).map(|entity| entity.kind)
    }

    /// Entity ids of one kind, ascending
    pub fn entities_of_kind(&self, kind: EntityKind) -> &[EntityId] {
        self.kind_index.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Resolve a relation name, registering it unconstrained if it is new
    pub fn resolve_or_create_relation(&mut self, name: &str) -> GraphResult<RelationId> {
        let name = canonical_name(name);
        if name.is_empty() {
            return Err(GraphError::BlankName);
        }
        if let Some(&id) = self.relation_index.get(&name) {
            return Ok(id);
        }
        Ok(self.insert_relation(name, RelationSignature::unconstrained()))
    }

    /// Declare a relation with a domain/range constraint.
    ///
    /// Declaring the same signature twice is a no-op. An unconstrained relation
    /// that was auto-registered by ingestion may be tightened once; any other
    /// change fails with `SignatureConflict`.
    pub fn declare_relation(&mut self, name: &str, signature: RelationSignature) -> GraphResult<RelationId> {
        let name = canonical_name(name);
        if name.is_empty() {
            return Err(GraphError::BlankName);
        }

        let Some(&id) = self.relation_index.get(&name) else {
            return Ok(self.insert_relation(name, signature));
        };

        let existing = self.relations[id.index()].signature;
        if existing == signature {
            return Ok(id);
        }
        if existing.is_constrained() {
            return Err(GraphError::SignatureConflict {
                name,
                existing,
                requested: signature,
            });
        }

        self.relations[id.index()].signature = signature;
        self.relation_version += 1;
        debug!("Constrained relation '{}' to {}", name, signature);
        Ok(id)
    }

    fn insert_relation(&mut self, name: String, signature: RelationSignature) -> RelationId {
        let id = RelationId::new(self.relations.len() as u32);
        debug!("Registered relation {} '{}' ({})", id, name, signature);
        self.relation_index.insert(name.clone(), id);
        self.relations.push(Relation { id, name, signature });
        self.relation_version += 1;
        id
    }

    pub fn resolve_relation(&self, name: &str) -> Option<RelationId> {
        self.relation_index.get(&canonical_name(name)).copied()
    }

    pub fn lookup_relation(&self, id: RelationId) -> GraphResult<&Relation> {
        self.relations
            .get(id.index())
            .ok_or(GraphError::UnknownRelationId(id))
    }

    pub fn relations(&self) -> &[Relation] {
        &self.relations
    }

    pub fn relation_count(&self) -> usize {
        self.relations.len()
    }

    /// Version of the relation set
    pub fn relation_version(&self) -> u64 {
        self.relation_version
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_or_create_is_stable() {
        let mut catalog = Catalog::new();
        let measles = catalog.resolve_or_create("Measles", EntityKind::Disease).unwrap();
        let nga = catalog.resolve_or_create("Country::NGA", EntityKind::Country).unwrap();
        let again = catalog.resolve_or_create("  Measles ", EntityKind::Disease).unwrap();

        assert_eq!(measles, EntityId::new(0));
        assert_eq!(nga, EntityId::new(1));
        assert_eq!(measles, again);
        assert_eq!(catalog.entity_count(), 2);
    }

    #[test]
    fn test_kind_conflict_is_surfaced() {
        let mut catalog = Catalog::new();
        catalog.resolve_or_create("Georgia", EntityKind::Country).unwrap();
        let err = catalog
            .resolve_or_create("Georgia", EntityKind::Facility)
            .unwrap_err();

        assert_eq!(
            err,
            GraphError::KindConflict {
                name: "Georgia".to_string(),
                existing: EntityKind::Country,
                requested: EntityKind::Facility,
            }
        );
        assert_eq!(catalog.entity_count(), 1);
    }

    #[test]
    fn test_lookup_unknown_id() {
        let catalog = Catalog::new();
        assert_eq!(
            catalog.lookup(EntityId::new(3)).unwrap_err(),
            GraphError::UnknownId(EntityId::new(3))
        );
    }

    #[test]
    fn test_blank_names_rejected() {
        let mut catalog = Catalog::new();
        assert_eq!(
            catalog.resolve_or_create(" \t ", EntityKind::Disease).unwrap_err(),
            GraphError::BlankName
        );
        assert_eq!(catalog.resolve_or_create_relation("").unwrap_err(), GraphError::BlankName);
        assert_eq!(
            catalog.declare_relation("  ", RelationSignature::unconstrained()).unwrap_err(),
            GraphError::BlankName
        );
        assert_eq!(catalog.entity_count(), 0);
        assert_eq!(catalog.relation_count(), 0);
    }

    #[test]
    fn test_canonical_name() {
        assert_eq!(canonical_name("  Yellow   fever\t"), "Yellow fever");
        assert_eq!(canonical_name("Country::NGA"), "Country::NGA");
    }

    #[test]
    fn test_kind_index() {
        let mut catalog = Catalog::new();
        let a = catalog.resolve_or_create("A", EntityKind::Drug).unwrap();
        catalog.resolve_or_create("B", EntityKind::Disease).unwrap();
        let c = catalog.resolve_or_create("C", EntityKind::Drug).unwrap();

        assert_eq!(catalog.entities_of_kind(EntityKind::Drug), &[a, c]);
        assert!(catalog.entities_of_kind(EntityKind::Shipment).is_empty());
    }

    #[test]
    fn test_relation_versioning() {
        let mut catalog = Catalog::new();
        assert_eq!(catalog.relation_version(), 0);

        let treats = catalog
            .declare_relation("treats", RelationSignature::new(EntityKind::Drug, EntityKind::Disease))
            .unwrap();
        assert_eq!(catalog.relation_version(), 1);

        // Same declaration again changes nothing
        catalog
            .declare_relation("treats", RelationSignature::new(EntityKind::Drug, EntityKind::Disease))
            .unwrap();
        assert_eq!(catalog.relation_version(), 1);

        let co = catalog.resolve_or_create_relation("co-occurs-with").unwrap();
        assert_ne!(treats, co);
        assert_eq!(catalog.relation_version(), 2);

        // Auto-registered relations can be tightened once
        catalog
            .declare_relation("co-occurs-with", RelationSignature::new(EntityKind::Disease, EntityKind::Disease))
            .unwrap();
        assert_eq!(catalog.relation_version(), 3);

        let err = catalog
            .declare_relation("treats", RelationSignature::unconstrained())
            .unwrap_err();
        assert!(matches!(err, GraphError::SignatureConflict { .. }));
    }
}
