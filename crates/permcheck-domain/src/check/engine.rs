//! The check engine.
//!
//! Resolves one (entity, permission, subject) triple against a tenant's
//! schema and relationship data at a single snapshot:
//! - relations are answered from stored and contextual tuples, with userset
//!   indirection fanned out through [`union`] and memoized per fingerprint
//! - permissions are answered by evaluating their rewrite tree, one
//!   [`CheckNode`] per tree node
//! - boolean attributes are answered from stored or contextual attributes
//!
//! Recursion is bounded only by the request's depth counter, which every
//! hop decrements by one.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::cache::{CacheKey, ResultCache};
use crate::error::{DomainError, DomainResult};
use crate::model::{
    AttributeType, Child, ChildKind, Entity, EntityDefinition, Leaf, ReferenceKind,
    RewriteOperation, Tuple, TupleFilter,
};

use super::combinator::{union, BoxFuture, Evaluation};
use super::config::CheckConfig;
use super::node::{CheckNode, NodeKind};
use super::traits::{Checker, RelationshipReader, RuleCall, RuleEvaluator, SchemaReader, TupleStream};
use super::types::{CheckRequest, CheckResponse, CheckResult};

/// Upper bound for a single cache get or set. A slower cache is treated as
/// unavailable.
const CACHE_OP_TIMEOUT_MS: u64 = 10;
const CACHE_OP_TIMEOUT: Duration = Duration::from_millis(CACHE_OP_TIMEOUT_MS);

/// Cache effectiveness counters for one engine.
#[derive(Debug, Default)]
pub struct CacheMetrics {
    /// Direct relation checks answered from the cache.
    pub hits: AtomicU64,
    /// Direct relation checks evaluated and then stored.
    pub misses: AtomicU64,
    /// Direct relation checks that bypassed the cache because the request
    /// carried contextual data.
    pub skips: AtomicU64,
}

impl CacheMetrics {
    /// Returns a snapshot of the current metrics.
    pub fn snapshot(&self) -> CacheMetricsSnapshot {
        CacheMetricsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            skips: self.skips.load(Ordering::Relaxed),
        }
    }

    /// Returns hits / (hits + misses), or 0.0 before any lookup.
    pub fn hit_ratio(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

/// A point-in-time snapshot of cache metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheMetricsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub skips: u64,
}

/// Permission check engine.
///
/// Cheap to clone: every field is shared. Clones are handed to the
/// evaluation tasks spawned by the combinators.
pub struct CheckEngine<S, D> {
    schema: Arc<S>,
    data: Arc<D>,
    cache: Option<Arc<dyn ResultCache>>,
    rules: Option<Arc<dyn RuleEvaluator>>,
    config: CheckConfig,
    cache_metrics: Arc<CacheMetrics>,
}

impl<S, D> Clone for CheckEngine<S, D> {
    fn clone(&self) -> Self {
        Self {
            schema: Arc::clone(&self.schema),
            data: Arc::clone(&self.data),
            cache: self.cache.clone(),
            rules: self.rules.clone(),
            config: self.config.clone(),
            cache_metrics: Arc::clone(&self.cache_metrics),
        }
    }
}

impl<S, D> CheckEngine<S, D>
where
    S: SchemaReader + 'static,
    D: RelationshipReader + 'static,
{
    pub fn new(schema: Arc<S>, data: Arc<D>) -> Self {
        Self {
            schema,
            data,
            cache: None,
            rules: None,
            config: CheckConfig::default(),
            cache_metrics: Arc::new(CacheMetrics::default()),
        }
    }

    pub fn with_config(mut self, config: CheckConfig) -> Self {
        self.config = config;
        self
    }

    /// Memoizes direct relation checks in `cache`.
    ///
    /// Requests carrying contextual tuples or attributes never read or
    /// write the cache.
    pub fn with_cache(mut self, cache: Arc<dyn ResultCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Evaluator for `Call` leaves. Without one, rule calls fail.
    pub fn with_rule_evaluator(mut self, rules: Arc<dyn RuleEvaluator>) -> Self {
        self.rules = Some(rules);
        self
    }

    pub fn config(&self) -> &CheckConfig {
        &self.config
    }

    pub fn cache_metrics(&self) -> &CacheMetrics {
        &self.cache_metrics
    }

    /// Boxed entry point for recursive evaluation.
    pub(super) fn invoke(
        &self,
        token: CancellationToken,
        request: CheckRequest,
    ) -> BoxFuture<'static, DomainResult<CheckResponse>> {
        let engine = self.clone();
        Box::pin(async move { engine.resolve(&token, request).await })
    }

    async fn resolve(
        &self,
        token: &CancellationToken,
        mut request: CheckRequest,
    ) -> DomainResult<CheckResponse> {
        if request.metadata.depth == 0 {
            return Err(DomainError::DepthExceeded);
        }
        if request.metadata.snap_token.is_empty() {
            request.metadata.snap_token =
                guarded(token, self.data.head_snapshot(&request.tenant_id)).await?;
        }
        if request.metadata.schema_version.is_empty() {
            request.metadata.schema_version =
                guarded(token, self.schema.head_version(&request.tenant_id)).await?;
        }

        let exclusion = request.metadata.exclusion;
        if request.is_self_reference() {
            return Ok(CheckResponse::allowed(0).excluded_if(exclusion));
        }

        let definition = guarded(
            token,
            self.schema.read_entity_definition(
                &request.tenant_id,
                &request.entity.entity_type,
                &request.metadata.schema_version,
            ),
        )
        .await?;

        let response = match definition.reference_kind(&request.permission) {
            Some(ReferenceKind::Relation) => self.check_relation(token, &request).await?,
            Some(ReferenceKind::Permission) => {
                self.check_permission(token, &definition, request).await?
            }
            Some(ReferenceKind::Attribute) => {
                self.check_attribute(token, &definition, &request).await?
            }
            None => {
                return Err(DomainError::ReferenceNotFound {
                    entity_type: request.entity.entity_type,
                    name: request.permission,
                })
            }
        };

        Ok(response.excluded_if(exclusion))
    }

    /// Direct relation check behind the memoization cache.
    ///
    /// The cache stores the raw result; exclusion is applied by the caller.
    async fn check_relation(
        &self,
        token: &CancellationToken,
        request: &CheckRequest,
    ) -> DomainResult<CheckResponse> {
        let cache = match &self.cache {
            Some(cache) if request.context.is_empty() => cache,
            Some(_) => {
                self.cache_metrics.skips.fetch_add(1, Ordering::Relaxed);
                return self.evaluate_relation(token, request).await;
            }
            None => return self.evaluate_relation(token, request).await,
        };

        let key = CacheKey::new(
            request.tenant_id.clone(),
            request.entity.clone(),
            request.permission.clone(),
            request.subject.clone(),
            request.metadata.snap_token.clone(),
            request.metadata.schema_version.clone(),
        );

        match timeout(CACHE_OP_TIMEOUT, cache.get(&key)).await {
            Ok(Some(allowed)) => {
                self.cache_metrics.hits.fetch_add(1, Ordering::Relaxed);
                debug!(entity = %request.entity, relation = %request.permission, "cache hit");
                return Ok(CheckResponse::new(CheckResult::from_allowed(allowed), 0));
            }
            Ok(None) => {
                self.cache_metrics.misses.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                self.cache_metrics.misses.fetch_add(1, Ordering::Relaxed);
                warn!(timeout_ms = CACHE_OP_TIMEOUT_MS, "cache get timed out");
            }
        }

        let response = self.evaluate_relation(token, request).await?;
        if timeout(CACHE_OP_TIMEOUT, cache.set(key, response.can.is_allowed()))
            .await
            .is_err()
        {
            warn!(timeout_ms = CACHE_OP_TIMEOUT_MS, "cache set timed out");
        }
        Ok(response)
    }

    /// Counts as one relation-level evaluation.
    async fn evaluate_relation(
        &self,
        token: &CancellationToken,
        request: &CheckRequest,
    ) -> DomainResult<CheckResponse> {
        Ok(self
            .check_direct_relation(token, request)
            .await?
            .with_added_checks(1))
    }

    /// Scans the relation's tuples. An exact subject match wins immediately;
    /// userset subjects are queued and combined by union.
    async fn check_direct_relation(
        &self,
        token: &CancellationToken,
        request: &CheckRequest,
    ) -> DomainResult<CheckResponse> {
        let filter = TupleFilter::for_entity(&request.entity, request.permission.clone());
        let mut tuples = self.query_relationships(token, request, &filter).await?;

        let mut seen = HashSet::new();
        let mut pending = Vec::new();
        while let Some(tuple) = next_tuple(token, &mut tuples).await? {
            if !seen.insert(tuple.subject.clone()) {
                continue;
            }
            if tuple.subject == request.subject {
                return Ok(CheckResponse::allowed(0));
            }
            if let Some(relation) = tuple.subject.normalized_relation() {
                let sub = request.sub_request(
                    tuple.subject.entity(),
                    relation,
                    request.subject.clone(),
                );
                pending.push(CheckNode::invoke(self.clone(), sub));
            }
        }

        union(token, pending, self.config.concurrency_limit).await
    }

    async fn check_permission(
        &self,
        token: &CancellationToken,
        definition: &EntityDefinition,
        request: CheckRequest,
    ) -> DomainResult<CheckResponse> {
        let child = definition
            .permission(&request.permission)
            .and_then(|p| p.child.as_ref())
            .ok_or_else(|| DomainError::UndefinedChildKind {
                permission: request.permission.clone(),
            })?;

        let request = Arc::new(request);
        self.build_node(&request, child)
            .evaluate(token.clone())
            .await
    }

    /// Builds the evaluation tree for `child`. Malformed nodes become
    /// failing nodes so the error surfaces only if the node is evaluated.
    fn build_node(&self, request: &Arc<CheckRequest>, child: &Child) -> CheckNode<S, D> {
        let kind = match &child.kind {
            ChildKind::Rewrite(rewrite) => {
                let children = rewrite
                    .children
                    .iter()
                    .map(|c| self.build_node(request, c))
                    .collect();
                match rewrite.operation {
                    RewriteOperation::Union => NodeKind::Union(children),
                    RewriteOperation::Intersection => NodeKind::Intersection(children),
                    RewriteOperation::Unspecified => NodeKind::Fail(DomainError::UndefinedChildType {
                        permission: request.permission.clone(),
                    }),
                }
            }
            ChildKind::Leaf(Leaf::ComputedUserSet { relation }) => NodeKind::ComputedUserSet {
                relation: relation.clone(),
            },
            ChildKind::Leaf(Leaf::TupleToUserSet { tupleset, computed }) => {
                NodeKind::TupleToUserSet {
                    tupleset: tupleset.clone(),
                    computed: computed.clone(),
                }
            }
            ChildKind::Leaf(Leaf::Call {
                rule_name,
                arguments,
            }) => NodeKind::Call {
                rule_name: rule_name.clone(),
                arguments: arguments.clone(),
            },
            ChildKind::Leaf(Leaf::Unspecified) | ChildKind::Unspecified => {
                NodeKind::Fail(DomainError::UndefinedChildKind {
                    permission: request.permission.clone(),
                })
            }
        };
        CheckNode::new(self.clone(), Arc::clone(request), kind, child.exclusion)
    }

    /// Follows `tupleset` from the request's entity and evaluates `computed`
    /// on every related entity, combined by union.
    pub(super) async fn check_tuple_to_userset(
        &self,
        token: &CancellationToken,
        request: &CheckRequest,
        tupleset: &str,
        computed: &str,
    ) -> DomainResult<CheckResponse> {
        let filter = TupleFilter::for_entity(&request.entity, tupleset);
        let mut tuples = self.query_relationships(token, request, &filter).await?;

        let mut seen = HashSet::new();
        let mut related = Vec::new();
        while let Some(tuple) = next_tuple(token, &mut tuples).await? {
            let entity = tuple.subject.entity();
            if seen.insert(entity.clone()) {
                let sub = request.sub_request(entity, computed, request.subject.clone());
                related.push(CheckNode::invoke(self.clone(), sub));
            }
        }

        union(token, related, self.config.concurrency_limit).await
    }

    pub(super) async fn check_call(
        &self,
        token: &CancellationToken,
        request: &CheckRequest,
        rule_name: &str,
        arguments: &[String],
    ) -> DomainResult<CheckResponse> {
        let rules = self
            .rules
            .as_ref()
            .ok_or_else(|| DomainError::RuleEvaluation {
                message: format!("no rule evaluator configured for rule '{rule_name}'"),
            })?;

        let mut values = HashMap::with_capacity(arguments.len());
        for name in arguments {
            let value = self
                .attribute_value(token, request, &request.entity, name)
                .await?
                .unwrap_or(serde_json::Value::Null);
            values.insert(name.clone(), value);
        }

        let call = RuleCall {
            tenant_id: request.tenant_id.clone(),
            entity: request.entity.clone(),
            rule_name: rule_name.to_string(),
            arguments: values,
        };
        let allowed = guarded(token, rules.evaluate(&call)).await?;
        Ok(CheckResponse::new(CheckResult::from_allowed(allowed), 0))
    }

    /// A boolean attribute used directly as a permission. Missing means
    /// denied.
    async fn check_attribute(
        &self,
        token: &CancellationToken,
        definition: &EntityDefinition,
        request: &CheckRequest,
    ) -> DomainResult<CheckResponse> {
        if let Some(attribute) = definition.attribute(&request.permission) {
            if attribute.attribute_type != AttributeType::Boolean {
                return Err(DomainError::RuleEvaluation {
                    message: format!(
                        "attribute '{}' on '{}' is not boolean",
                        request.permission, request.entity.entity_type
                    ),
                });
            }
        }

        match self
            .attribute_value(token, request, &request.entity, &request.permission)
            .await?
        {
            Some(serde_json::Value::Bool(allowed)) => {
                Ok(CheckResponse::new(CheckResult::from_allowed(allowed), 0))
            }
            None | Some(serde_json::Value::Null) => Ok(CheckResponse::denied(0)),
            Some(other) => Err(DomainError::RuleEvaluation {
                message: format!(
                    "attribute '{}' on {} holds non-boolean value {other}",
                    request.permission, request.entity
                ),
            }),
        }
    }

    /// Contextual value first, then the stored one.
    async fn attribute_value(
        &self,
        token: &CancellationToken,
        request: &CheckRequest,
        entity: &Entity,
        name: &str,
    ) -> DomainResult<Option<serde_json::Value>> {
        if let Some(attribute) = request.context.attribute(entity, name) {
            return Ok(Some(attribute.value.clone()));
        }
        let stored = guarded(
            token,
            self.data.query_single_attribute(
                &request.tenant_id,
                entity,
                name,
                &request.metadata.snap_token,
            ),
        )
        .await?;
        Ok(stored.map(|attribute| attribute.value))
    }

    /// Stored tuples at the request's snapshot, preceded by any matching
    /// contextual tuples.
    async fn query_relationships(
        &self,
        token: &CancellationToken,
        request: &CheckRequest,
        filter: &TupleFilter,
    ) -> DomainResult<TupleStream> {
        let stored = guarded(
            token,
            self.data.query_relationships(
                &request.tenant_id,
                filter,
                &request.metadata.snap_token,
            ),
        )
        .await?;

        let contextual: Vec<DomainResult<Tuple>> = request
            .context
            .tuples
            .iter()
            .filter(|t| filter.matches(t))
            .cloned()
            .map(Ok)
            .collect();
        if contextual.is_empty() {
            return Ok(stored);
        }
        Ok(stream::iter(contextual).chain(stored).boxed())
    }
}

#[async_trait]
impl<S, D> Checker for CheckEngine<S, D>
where
    S: SchemaReader + 'static,
    D: RelationshipReader + 'static,
{
    #[instrument(
        skip(self, token, request),
        fields(
            tenant_id = %request.tenant_id,
            entity = %request.entity,
            permission = %request.permission,
            subject = %request.subject,
        )
    )]
    async fn check(
        &self,
        token: &CancellationToken,
        mut request: CheckRequest,
    ) -> DomainResult<CheckResponse> {
        metrics::counter!("permcheck_checks_total").increment(1);
        request.metadata.depth = request.metadata.depth.min(self.config.max_depth);

        let child = token.child_token();
        let _guard = child.clone().drop_guard();
        match timeout(self.config.timeout, self.invoke(child, request)).await {
            Ok(result) => {
                if let Ok(response) = &result {
                    debug!(
                        can = %response.can,
                        check_count = response.metadata.check_count,
                        "check complete"
                    );
                }
                result
            }
            Err(_) => {
                let duration_ms = u64::try_from(self.config.timeout.as_millis()).unwrap_or(u64::MAX);
                warn!(duration_ms, "check timed out");
                Err(DomainError::Timeout { duration_ms })
            }
        }
    }
}

/// Races a collaborator call against cancellation.
async fn guarded<T, F>(token: &CancellationToken, future: F) -> DomainResult<T>
where
    F: Future<Output = DomainResult<T>>,
{
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(DomainError::Cancelled),
        result = future => result,
    }
}

async fn next_tuple(
    token: &CancellationToken,
    tuples: &mut TupleStream,
) -> DomainResult<Option<Tuple>> {
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(DomainError::Cancelled),
        next = tuples.next() => next.transpose(),
    }
}
