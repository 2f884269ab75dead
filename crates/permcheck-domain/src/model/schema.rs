//! Schema definitions: relations, attributes and permission rewrite trees.
//!
//! A permission is a tree of [`Child`] nodes. Branches are union or
//! intersection rewrites; leaves follow a relation on the same entity, hop
//! across a tupleset relation, or call a rule. Exclusion is a flag on any
//! child, so `a not b` is an intersection of `a` and an excluded `b`.

use serde::{Deserialize, Serialize};

/// How a name on an entity definition is resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceKind {
    /// Stored relationship tuples.
    Relation,
    /// Computed from a rewrite tree.
    Permission,
    /// Stored attribute value.
    Attribute,
}

/// Definition of one entity type in a tenant's schema.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityDefinition {
    pub name: String,
    #[serde(default)]
    pub relations: Vec<RelationDefinition>,
    #[serde(default)]
    pub permissions: Vec<PermissionDefinition>,
    #[serde(default)]
    pub attributes: Vec<AttributeDefinition>,
}

impl EntityDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Adds a relation whose allowed subjects are given as "type" or
    /// "type#relation" references.
    pub fn with_relation(mut self, name: impl Into<String>, allowed: &[&str]) -> Self {
        self.relations.push(RelationDefinition {
            name: name.into(),
            allowed_subjects: allowed.iter().map(|s| s.to_string()).collect(),
        });
        self
    }

    pub fn with_permission(mut self, name: impl Into<String>, child: Child) -> Self {
        self.permissions.push(PermissionDefinition {
            name: name.into(),
            child: Some(child),
        });
        self
    }

    pub fn with_attribute(mut self, name: impl Into<String>, attribute_type: AttributeType) -> Self {
        self.attributes.push(AttributeDefinition {
            name: name.into(),
            attribute_type,
        });
        self
    }

    /// Classifies `name`. Relations shadow permissions, which shadow attributes.
    pub fn reference_kind(&self, name: &str) -> Option<ReferenceKind> {
        if self.relations.iter().any(|r| r.name == name) {
            Some(ReferenceKind::Relation)
        } else if self.permissions.iter().any(|p| p.name == name) {
            Some(ReferenceKind::Permission)
        } else if self.attributes.iter().any(|a| a.name == name) {
            Some(ReferenceKind::Attribute)
        } else {
            None
        }
    }

    pub fn permission(&self, name: &str) -> Option<&PermissionDefinition> {
        self.permissions.iter().find(|p| p.name == name)
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeDefinition> {
        self.attributes.iter().find(|a| a.name == name)
    }
}

/// A stored relation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationDefinition {
    pub name: String,
    #[serde(default)]
    pub allowed_subjects: Vec<String>,
}

/// A computed permission. A permission without a child is malformed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermissionDefinition {
    pub name: String,
    #[serde(default)]
    pub child: Option<Child>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeDefinition {
    pub name: String,
    pub attribute_type: AttributeType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeType {
    Boolean,
    String,
    Integer,
    Double,
}

/// A node of a permission rewrite tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Child {
    /// Inverts this node's result before the parent merges it.
    #[serde(default)]
    pub exclusion: bool,
    pub kind: ChildKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChildKind {
    Rewrite(Rewrite),
    Leaf(Leaf),
    /// Any kind this build does not know about.
    #[serde(other)]
    Unspecified,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rewrite {
    pub operation: RewriteOperation,
    #[serde(default)]
    pub children: Vec<Child>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RewriteOperation {
    Union,
    Intersection,
    #[serde(other)]
    Unspecified,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "leaf", rename_all = "snake_case")]
pub enum Leaf {
    /// Another relation or permission on the same entity.
    ComputedUserSet { relation: String },
    /// Follow `tupleset` to related entities and evaluate `computed` there.
    #[serde(rename = "tuple_to_userset", alias = "tuple_to_user_set")]
    TupleToUserSet { tupleset: String, computed: String },
    /// Delegate to a named rule over the listed attribute names.
    Call {
        rule_name: String,
        #[serde(default)]
        arguments: Vec<String>,
    },
    #[serde(other)]
    Unspecified,
}

impl Child {
    pub fn union(children: Vec<Child>) -> Self {
        Self::rewrite(RewriteOperation::Union, children)
    }

    pub fn intersection(children: Vec<Child>) -> Self {
        Self::rewrite(RewriteOperation::Intersection, children)
    }

    pub fn rewrite(operation: RewriteOperation, children: Vec<Child>) -> Self {
        Self {
            exclusion: false,
            kind: ChildKind::Rewrite(Rewrite {
                operation,
                children,
            }),
        }
    }

    pub fn computed(relation: impl Into<String>) -> Self {
        Self::leaf(Leaf::ComputedUserSet {
            relation: relation.into(),
        })
    }

    pub fn tuple_to_userset(tupleset: impl Into<String>, computed: impl Into<String>) -> Self {
        Self::leaf(Leaf::TupleToUserSet {
            tupleset: tupleset.into(),
            computed: computed.into(),
        })
    }

    pub fn call(rule_name: impl Into<String>, arguments: &[&str]) -> Self {
        Self::leaf(Leaf::Call {
            rule_name: rule_name.into(),
            arguments: arguments.iter().map(|a| a.to_string()).collect(),
        })
    }

    pub fn leaf(leaf: Leaf) -> Self {
        Self {
            exclusion: false,
            kind: ChildKind::Leaf(leaf),
        }
    }

    /// Marks this node as excluded (`not`).
    pub fn excluded(mut self) -> Self {
        self.exclusion = true;
        self
    }
}
