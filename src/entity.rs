//! The heterogeneous entity model watched by the multiplexer.
//!
//! Entities form a closed set of kinds, each with a stable id within its
//! kind. The pair of projections is the [`EntityKey`], unique within a
//! snapshot. The set is extended by adding a variant to [`EntityInfo`];
//! dispatch stays static.

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

/// The kind of a watched entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Machine,
    Service,
    Unit,
    Relation,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Machine => "machine",
            EntityKind::Service => "service",
            EntityKind::Unit => "unit",
            EntityKind::Relation => "relation",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Uniform key over the heterogeneous entity variants: `(kind, id)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityKey {
    pub kind: EntityKind,
    pub id: String,
}

impl EntityKey {
    pub fn new(
        kind: EntityKind,
        id: impl Into<String>,
    ) -> Self {
        Self { kind, id: id.into() }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.id)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineInfo {
    pub id: String,
    pub instance_id: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub name: String,
    pub exposed: bool,
    pub charm_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitInfo {
    pub name: String,
    pub service: String,
    pub machine_id: Option<String>,
    pub public_address: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationInfo {
    pub key: String,
}

/// One watched entity value.
///
/// Internally tagged so the serialized form carries its kind alongside the
/// variant fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum EntityInfo {
    Machine(MachineInfo),
    Service(ServiceInfo),
    Unit(UnitInfo),
    Relation(RelationInfo),
}

impl EntityInfo {
    pub fn kind(&self) -> EntityKind {
        match self {
            EntityInfo::Machine(_) => EntityKind::Machine,
            EntityInfo::Service(_) => EntityKind::Service,
            EntityInfo::Unit(_) => EntityKind::Unit,
            EntityInfo::Relation(_) => EntityKind::Relation,
        }
    }

    /// The entity's stable id within its kind.
    pub fn id(&self) -> &str {
        match self {
            EntityInfo::Machine(m) => &m.id,
            EntityInfo::Service(s) => &s.name,
            EntityInfo::Unit(u) => &u.name,
            EntityInfo::Relation(r) => &r.key,
        }
    }

    pub fn key(&self) -> EntityKey {
        EntityKey::new(self.kind(), self.id())
    }
}

/// A per-entity change record delivered to state watchers.
///
/// When `removed` is set, only the key projection of `entity` is required
/// to be meaningful.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delta {
    pub entity: EntityInfo,
    #[serde(default)]
    pub removed: bool,
}

impl Delta {
    /// A delta carrying a new or updated entity value.
    pub fn updated(entity: EntityInfo) -> Self {
        Self { entity, removed: false }
    }

    /// A removal tombstone for the given entity.
    pub fn removed(entity: EntityInfo) -> Self {
        Self { entity, removed: true }
    }
}
