//! Memoization of direct relation checks.
//!
//! The evaluator depends only on the [`ResultCache`] trait so tests can
//! inject a spy. [`CheckCache`] is the production implementation, backed by
//! Moka's async cache:
//! - Lock-free concurrent reads
//! - Automatic TTL-based eviction
//! - Memory-bounded storage
//!
//! # Key Design
//!
//! A [`CacheKey`] is the fingerprint of one direct relation check:
//! `(tenant, entity, relation, subject, snapshot token, schema version)`.
//! Because the snapshot token is part of the key, a new snapshot never
//! observes an entry written under an older one. Entries for old snapshots
//! simply age out.
//!
//! # Example
//!
//! ```rust,ignore
//! use permcheck_domain::cache::{CacheKey, CheckCache, CheckCacheConfig, ResultCache};
//! use permcheck_domain::model::{Entity, Subject};
//!
//! let cache = CheckCache::new(CheckCacheConfig::default());
//! let key = CacheKey::new("t1", Entity::new("doc", "1"), "owner", Subject::new("user", "1"), "4", "v1");
//! cache.set(key.clone(), true).await;
//!
//! assert_eq!(cache.get(&key).await, Some(true));
//! ```

use std::time::Duration;

use async_trait::async_trait;
use moka::future::Cache;

use crate::model::{Entity, Subject};

/// Concurrent memoization of direct relation results.
///
/// A miss is `None`, never an error.
#[async_trait]
pub trait ResultCache: Send + Sync {
    async fn get(&self, key: &CacheKey) -> Option<bool>;

    async fn set(&self, key: CacheKey, allowed: bool);
}

/// Configuration for the check cache.
#[derive(Debug, Clone)]
pub struct CheckCacheConfig {
    /// Whether caching is enabled. A disabled cache never stores entries.
    pub enabled: bool,
    /// Maximum number of entries in the cache.
    pub max_capacity: u64,
    /// TTL for cache entries.
    pub default_ttl: Duration,
}

impl Default for CheckCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_capacity: 100_000,
            default_ttl: Duration::from_secs(60),
        }
    }
}

impl CheckCacheConfig {
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Sets the maximum capacity.
    pub fn with_max_capacity(mut self, max_capacity: u64) -> Self {
        self.max_capacity = max_capacity;
        self
    }

    /// Sets the default TTL.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }
}

/// Fingerprint of one direct relation check.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub tenant_id: String,
    pub entity: Entity,
    pub relation: String,
    pub subject: Subject,
    pub snap_token: String,
    pub schema_version: String,
}

impl CacheKey {
    pub fn new(
        tenant_id: impl Into<String>,
        entity: Entity,
        relation: impl Into<String>,
        subject: Subject,
        snap_token: impl Into<String>,
        schema_version: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            entity,
            relation: relation.into(),
            subject,
            snap_token: snap_token.into(),
            schema_version: schema_version.into(),
        }
    }
}

/// Moka-backed [`ResultCache`] with TTL and capacity eviction.
///
/// There is no explicit invalidation: a write moves the snapshot token, so
/// stale entries are never looked up again and age out by TTL or capacity.
pub struct CheckCache {
    cache: Cache<CacheKey, bool>,
    config: CheckCacheConfig,
}

impl std::fmt::Debug for CheckCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckCache")
            .field("config", &self.config)
            .field("entry_count", &self.cache.entry_count())
            .finish()
    }
}

impl CheckCache {
    /// Creates a new check cache with the given configuration.
    pub fn new(config: CheckCacheConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.max_capacity)
            .time_to_live(config.default_ttl)
            .build();

        Self { cache, config }
    }

    pub fn config(&self) -> &CheckCacheConfig {
        &self.config
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Returns the approximate number of entries in the cache.
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }

    /// Runs pending maintenance tasks. Useful for testing TTL behavior.
    pub async fn run_pending_tasks(&self) {
        self.cache.run_pending_tasks().await;
    }
}

#[async_trait]
impl ResultCache for CheckCache {
    /// Records `permcheck_cache_hits_total` / `permcheck_cache_misses_total`.
    async fn get(&self, key: &CacheKey) -> Option<bool> {
        if !self.config.enabled {
            return None;
        }
        let result = self.cache.get(key).await;
        if result.is_some() {
            metrics::counter!("permcheck_cache_hits_total").increment(1);
        } else {
            metrics::counter!("permcheck_cache_misses_total").increment(1);
        }
        result
    }

    async fn set(&self, key: CacheKey, allowed: bool) {
        if !self.config.enabled {
            return;
        }
        self.cache.insert(key, allowed).await;
    }
}

/// Registers check cache metrics descriptions.
///
/// Call once during application startup. Optional, but gives the recorder
/// human readable descriptions.
pub fn register_check_cache_metrics() {
    metrics::describe_counter!(
        "permcheck_cache_hits_total",
        "Total number of direct relation check cache hits"
    );
    metrics::describe_counter!(
        "permcheck_cache_misses_total",
        "Total number of direct relation check cache misses"
    );
    metrics::describe_counter!(
        "permcheck_checks_total",
        "Total number of top-level permission checks"
    );
}
