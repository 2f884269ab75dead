//! Core relationship data types.

use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// Subject relation marking "the entity itself" rather than a userset.
pub const ELLIPSIS: &str = "...";

/// An entity reference (e.g., "doc:1").
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Entity {
    /// The type portion (e.g., "doc").
    pub entity_type: String,
    /// The ID portion (e.g., "1").
    pub id: String,
}

impl Entity {
    /// Creates a new Entity from type and ID.
    pub fn new(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }

    /// Parses an entity from "type:id" format.
    pub fn parse(value: &str) -> Result<Self, &'static str> {
        match value.split_once(':') {
            Some((entity_type, id)) if !entity_type.is_empty() && !id.is_empty() => {
                Ok(Self::new(entity_type, id))
            }
            Some(_) => Err("entity type and id cannot be empty"),
            None => Err("entity must be in 'type:id' format"),
        }
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.entity_type, self.id)
    }
}

/// The subject of a check or tuple.
///
/// A subject with a relation (other than [`ELLIPSIS`]) is a userset such as
/// `group:eng#member`. Equality and hashing treat an absent relation, an
/// empty relation and the ellipsis as the same thing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subject {
    pub subject_type: String,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relation: Option<String>,
}

impl Subject {
    /// Creates a literal subject (e.g., "user:alice").
    pub fn new(subject_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            subject_type: subject_type.into(),
            id: id.into(),
            relation: None,
        }
    }

    /// Creates a userset subject (e.g., "group:eng#member").
    pub fn userset(
        subject_type: impl Into<String>,
        id: impl Into<String>,
        relation: impl Into<String>,
    ) -> Self {
        let relation = relation.into();
        Self {
            subject_type: subject_type.into(),
            id: id.into(),
            relation: (!relation.is_empty() && relation != ELLIPSIS).then_some(relation),
        }
    }

    /// Parses "type:id" or "type:id#relation".
    pub fn parse(value: &str) -> Result<Self, &'static str> {
        let (entity, relation) = match value.split_once('#') {
            Some((entity, relation)) => (entity, Some(relation)),
            None => (value, None),
        };
        let entity = Entity::parse(entity)?;
        Ok(match relation {
            Some(relation) => Self::userset(entity.entity_type, entity.id, relation),
            None => Self::new(entity.entity_type, entity.id),
        })
    }

    /// The relation with the self marker normalized away.
    pub fn normalized_relation(&self) -> Option<&str> {
        self.relation
            .as_deref()
            .filter(|r| !r.is_empty() && *r != ELLIPSIS)
    }

    /// True when the subject stands for a set of subjects.
    pub fn is_userset(&self) -> bool {
        self.normalized_relation().is_some()
    }

    /// The entity part of the subject.
    pub fn entity(&self) -> Entity {
        Entity::new(self.subject_type.clone(), self.id.clone())
    }
}

impl PartialEq for Subject {
    fn eq(&self, other: &Self) -> bool {
        self.subject_type == other.subject_type
            && self.id == other.id
            && self.normalized_relation() == other.normalized_relation()
    }
}

impl Eq for Subject {}

impl Hash for Subject {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.subject_type.hash(state);
        self.id.hash(state);
        self.normalized_relation().hash(state);
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.normalized_relation() {
            Some(relation) => write!(f, "{}:{}#{}", self.subject_type, self.id, relation),
            None => write!(f, "{}:{}", self.subject_type, self.id),
        }
    }
}

/// A stored relationship fact: `entity#relation@subject`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tuple {
    pub entity: Entity,
    pub relation: String,
    pub subject: Subject,
}

impl Tuple {
    /// Creates a new Tuple.
    pub fn new(entity: Entity, relation: impl Into<String>, subject: Subject) -> Self {
        Self {
            entity,
            relation: relation.into(),
            subject,
        }
    }

    /// Parses "type:id#relation@subject".
    pub fn parse(value: &str) -> Result<Self, &'static str> {
        let (left, subject) = value
            .split_once('@')
            .ok_or("tuple must be in 'entity#relation@subject' format")?;
        let (entity, relation) = left
            .split_once('#')
            .ok_or("tuple must be in 'entity#relation@subject' format")?;
        if relation.is_empty() {
            return Err("tuple relation cannot be empty");
        }
        Ok(Self::new(
            Entity::parse(entity)?,
            relation,
            Subject::parse(subject)?,
        ))
    }
}

impl fmt::Display for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}@{}", self.entity, self.relation, self.subject)
    }
}

/// An attribute value attached to an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    pub entity: Entity,
    pub name: String,
    pub value: serde_json::Value,
}

impl Attribute {
    pub fn new(entity: Entity, name: impl Into<String>, value: serde_json::Value) -> Self {
        Self {
            entity,
            name: name.into(),
            value,
        }
    }
}

/// Selects tuples of one relation on a set of entities of one type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TupleFilter {
    pub entity_type: String,
    /// Empty means every entity of the type.
    pub entity_ids: Vec<String>,
    pub relation: String,
}

impl TupleFilter {
    /// Filter for the tuples of `relation` on a single entity.
    pub fn for_entity(entity: &Entity, relation: impl Into<String>) -> Self {
        Self {
            entity_type: entity.entity_type.clone(),
            entity_ids: vec![entity.id.clone()],
            relation: relation.into(),
        }
    }

    /// Returns true if the tuple is selected by this filter.
    pub fn matches(&self, tuple: &Tuple) -> bool {
        tuple.entity.entity_type == self.entity_type
            && tuple.relation == self.relation
            && (self.entity_ids.is_empty() || self.entity_ids.contains(&tuple.entity.id))
    }
}
