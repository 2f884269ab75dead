//! Data model: entities, subjects, relationship tuples and the schema
//! rewrite trees the evaluator walks.

mod schema;
mod types;

pub use schema::{
    AttributeDefinition, AttributeType, Child, ChildKind, EntityDefinition, Leaf,
    PermissionDefinition, ReferenceKind, RelationDefinition, Rewrite, RewriteOperation,
};
pub use types::{Attribute, Entity, Subject, Tuple, TupleFilter, ELLIPSIS};
