//! Mock collaborators for engine testing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tokio::sync::RwLock;

use crate::cache::{CacheKey, CheckCache, CheckCacheConfig, ResultCache};
use crate::check::{RelationshipReader, RuleCall, RuleEvaluator, SchemaReader, TupleStream};
use crate::error::{DomainError, DomainResult};
use crate::model::{Attribute, Entity, EntityDefinition, Tuple, TupleFilter};

pub const TENANT: &str = "t1";

/// Mock schema reader serving one schema version per tenant.
pub struct MockSchemaReader {
    definitions: RwLock<HashMap<(String, String), EntityDefinition>>,
}

impl MockSchemaReader {
    pub fn new() -> Self {
        Self {
            definitions: RwLock::new(HashMap::new()),
        }
    }

    pub async fn add_definition(&self, tenant_id: &str, definition: EntityDefinition) {
        self.definitions
            .write()
            .await
            .insert((tenant_id.to_string(), definition.name.clone()), definition);
    }
}

#[async_trait]
impl SchemaReader for MockSchemaReader {
    async fn read_entity_definition(
        &self,
        tenant_id: &str,
        entity_type: &str,
        version: &str,
    ) -> DomainResult<EntityDefinition> {
        if version != "v1" {
            return Err(DomainError::SchemaNotFound {
                tenant_id: tenant_id.to_string(),
                version: version.to_string(),
            });
        }
        self.definitions
            .read()
            .await
            .get(&(tenant_id.to_string(), entity_type.to_string()))
            .cloned()
            .ok_or_else(|| DomainError::ReferenceNotFound {
                entity_type: entity_type.to_string(),
                name: entity_type.to_string(),
            })
    }

    async fn head_version(&self, _tenant_id: &str) -> DomainResult<String> {
        Ok("v1".to_string())
    }
}

/// Mock relationship reader with call counters and optional latency or
/// failure injection.
pub struct MockRelationshipReader {
    tuples: RwLock<Vec<Tuple>>,
    attributes: RwLock<Vec<Attribute>>,
    pub query_count: AtomicUsize,
    pub head_snapshot_count: AtomicUsize,
    /// Relationship queries currently executing.
    pub in_flight: Arc<AtomicUsize>,
    latency: Option<Duration>,
    fail_relation: Option<String>,
}

impl MockRelationshipReader {
    pub fn new() -> Self {
        Self {
            tuples: RwLock::new(Vec::new()),
            attributes: RwLock::new(Vec::new()),
            query_count: AtomicUsize::new(0),
            head_snapshot_count: AtomicUsize::new(0),
            in_flight: Arc::new(AtomicUsize::new(0)),
            latency: None,
            fail_relation: None,
        }
    }

    /// Every relationship query sleeps for `latency` first.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Queries for `relation` fail with a storage error.
    pub fn failing_on(mut self, relation: &str) -> Self {
        self.fail_relation = Some(relation.to_string());
        self
    }

    pub async fn add_tuple(&self, tuple: &str) {
        let tuple = Tuple::parse(tuple).unwrap();
        self.tuples.write().await.push(tuple);
    }

    pub async fn remove_tuple(&self, tuple: &str) {
        let tuple = Tuple::parse(tuple).unwrap();
        self.tuples.write().await.retain(|t| *t != tuple);
    }

    pub async fn add_attribute(&self, entity: &str, name: &str, value: serde_json::Value) {
        let attribute = Attribute::new(Entity::parse(entity).unwrap(), name, value);
        self.attributes.write().await.push(attribute);
    }

    pub fn queries(&self) -> usize {
        self.query_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RelationshipReader for MockRelationshipReader {
    async fn query_relationships(
        &self,
        _tenant_id: &str,
        filter: &TupleFilter,
        _snap_token: &str,
    ) -> DomainResult<TupleStream> {
        self.query_count.fetch_add(1, Ordering::SeqCst);
        let _in_flight = InFlight::enter(&self.in_flight);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if self.fail_relation.as_deref() == Some(filter.relation.as_str()) {
            return Err(DomainError::Storage {
                message: format!("query for '{}' failed", filter.relation),
            });
        }
        let matching: Vec<DomainResult<Tuple>> = self
            .tuples
            .read()
            .await
            .iter()
            .filter(|t| filter.matches(t))
            .cloned()
            .map(Ok)
            .collect();
        Ok(stream::iter(matching).boxed())
    }

    async fn query_single_attribute(
        &self,
        _tenant_id: &str,
        entity: &Entity,
        name: &str,
        _snap_token: &str,
    ) -> DomainResult<Option<Attribute>> {
        Ok(self
            .attributes
            .read()
            .await
            .iter()
            .find(|a| a.entity == *entity && a.name == name)
            .cloned())
    }

    async fn head_snapshot(&self, _tenant_id: &str) -> DomainResult<String> {
        self.head_snapshot_count.fetch_add(1, Ordering::SeqCst);
        Ok("1".to_string())
    }
}

/// Decrements the gauge when dropped, including when the query future is
/// cancelled mid-sleep.
struct InFlight(Arc<AtomicUsize>);

impl InFlight {
    fn enter(gauge: &Arc<AtomicUsize>) -> Self {
        gauge.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(gauge))
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Cache wrapper that counts lookups and stores.
pub struct SpyCache {
    inner: CheckCache,
    pub gets: AtomicUsize,
    pub sets: AtomicUsize,
}

impl SpyCache {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: CheckCache::new(CheckCacheConfig::default()),
            gets: AtomicUsize::new(0),
            sets: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl ResultCache for SpyCache {
    async fn get(&self, key: &CacheKey) -> Option<bool> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.inner.get(key).await
    }

    async fn set(&self, key: CacheKey, allowed: bool) {
        self.sets.fetch_add(1, Ordering::SeqCst);
        self.inner.set(key, allowed).await;
    }
}

/// Rule evaluator implementing `is_weekday(day_of_week)` and
/// `check_balance(balance)`.
pub struct MockRuleEvaluator;

#[async_trait]
impl RuleEvaluator for MockRuleEvaluator {
    async fn evaluate(&self, call: &RuleCall) -> DomainResult<bool> {
        match call.rule_name.as_str() {
            "is_weekday" => Ok(call
                .arguments
                .get("day_of_week")
                .and_then(|v| v.as_str())
                .is_some_and(|day| !matches!(day, "saturday" | "sunday"))),
            "check_balance" => Ok(call
                .arguments
                .get("balance")
                .and_then(|v| v.as_f64())
                .is_some_and(|balance| balance >= 100.0)),
            other => Err(DomainError::RuleEvaluation {
                message: format!("unknown rule '{other}'"),
            }),
        }
    }
}
