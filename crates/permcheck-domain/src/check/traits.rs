//! Collaborator traits consumed by the check engine, and the engine's own
//! public contract.

use std::collections::HashMap;

use async_trait::async_trait;
use futures::stream::BoxStream;
use tokio_util::sync::CancellationToken;

use crate::error::DomainResult;
use crate::model::{Attribute, Entity, EntityDefinition, Tuple, TupleFilter};

use super::types::{CheckRequest, CheckResponse};

/// Lazy, forward-only sequence of tuples.
pub type TupleStream = BoxStream<'static, DomainResult<Tuple>>;

/// Schema access needed by the engine.
#[async_trait]
pub trait SchemaReader: Send + Sync {
    /// Reads the definition of `entity_type` at schema `version`.
    async fn read_entity_definition(
        &self,
        tenant_id: &str,
        entity_type: &str,
        version: &str,
    ) -> DomainResult<EntityDefinition>;

    /// Returns the tenant's current schema version.
    async fn head_version(&self, tenant_id: &str) -> DomainResult<String>;
}

/// Relationship and attribute access needed by the engine.
#[async_trait]
pub trait RelationshipReader: Send + Sync {
    /// Streams tuples matching `filter` as of `snap_token`.
    async fn query_relationships(
        &self,
        tenant_id: &str,
        filter: &TupleFilter,
        snap_token: &str,
    ) -> DomainResult<TupleStream>;

    /// Reads one attribute as of `snap_token`.
    ///
    /// Default implementation reports no attributes. Override for
    /// attribute-based permissions.
    async fn query_single_attribute(
        &self,
        _tenant_id: &str,
        _entity: &Entity,
        _name: &str,
        _snap_token: &str,
    ) -> DomainResult<Option<Attribute>> {
        Ok(None)
    }

    /// Returns the tenant's current snapshot token.
    async fn head_snapshot(&self, tenant_id: &str) -> DomainResult<String>;
}

/// Enumerates candidate ids for lookups.
#[async_trait]
pub trait CandidateReader: Send + Sync {
    /// Ids of every entity of `entity_type` present as of `snap_token`.
    async fn entity_ids(
        &self,
        tenant_id: &str,
        entity_type: &str,
        snap_token: &str,
    ) -> DomainResult<Vec<String>>;

    /// Ids of every subject of `subject_type` present as of `snap_token`.
    async fn subject_ids(
        &self,
        tenant_id: &str,
        subject_type: &str,
        snap_token: &str,
    ) -> DomainResult<Vec<String>>;
}

/// A rule invocation from a `Call` leaf.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleCall {
    pub tenant_id: String,
    pub entity: Entity,
    pub rule_name: String,
    /// Argument name to attribute value; missing attributes are `Null`.
    pub arguments: HashMap<String, serde_json::Value>,
}

/// Evaluates named rules for `Call` leaves.
#[async_trait]
pub trait RuleEvaluator: Send + Sync {
    async fn evaluate(&self, call: &RuleCall) -> DomainResult<bool>;
}

/// Decides whether a subject holds a permission on an entity.
#[async_trait]
pub trait Checker: Send + Sync {
    /// Evaluates `request`. Cancelling `token` cancels every sub-check.
    async fn check(
        &self,
        token: &CancellationToken,
        request: CheckRequest,
    ) -> DomainResult<CheckResponse>;
}
