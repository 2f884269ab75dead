//! Performance benchmarks for permission checks.
//!
//! Run with: cargo bench -p permcheck-domain --bench check_benchmark
//!
//! These benchmarks measure:
//! - Direct relation checks
//! - Union fan-out over userset tuples of growing width
//! - Warm result cache versus no cache

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use futures::stream::{self, StreamExt};
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;

use permcheck_domain::check::{
    CheckEngine, CheckRequest, Checker, RelationshipReader, SchemaReader, TupleStream,
};
use permcheck_domain::error::{DomainError, DomainResult};
use permcheck_domain::model::{Child, Entity, EntityDefinition, Subject, Tuple, TupleFilter};
use permcheck_domain::{CheckCache, CheckCacheConfig};

const TENANT: &str = "bench";

// =============================================================================
// Benchmark-specific readers
// =============================================================================

struct BenchSchemaReader {
    definitions: HashMap<String, EntityDefinition>,
}

#[async_trait]
impl SchemaReader for BenchSchemaReader {
    async fn read_entity_definition(
        &self,
        _tenant_id: &str,
        entity_type: &str,
        _version: &str,
    ) -> DomainResult<EntityDefinition> {
        self.definitions
            .get(entity_type)
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

/// Tuples keyed by "entity_type:entity_id#relation" for O(1) lookups.
#[derive(Default)]
struct BenchTupleReader {
    tuples: HashMap<String, Vec<Tuple>>,
}

impl BenchTupleReader {
    fn add(&mut self, tuple: &str) {
        let Ok(tuple) = Tuple::parse(tuple) else {
            return;
        };
        let key = format!("{}#{}", tuple.entity, tuple.relation);
        self.tuples.entry(key).or_default().push(tuple);
    }
}

#[async_trait]
impl RelationshipReader for BenchTupleReader {
    async fn query_relationships(
        &self,
        _tenant_id: &str,
        filter: &TupleFilter,
        _snap_token: &str,
    ) -> DomainResult<TupleStream> {
        let tuples: Vec<DomainResult<Tuple>> = filter
            .entity_ids
            .iter()
            .filter_map(|id| {
                self.tuples
                    .get(&format!("{}:{}#{}", filter.entity_type, id, filter.relation))
            })
            .flatten()
            .cloned()
            .map(Ok)
            .collect();
        Ok(stream::iter(tuples).boxed())
    }

    async fn head_snapshot(&self, _tenant_id: &str) -> DomainResult<String> {
        Ok("1".to_string())
    }
}

type BenchEngine = CheckEngine<BenchSchemaReader, BenchTupleReader>;

/// `doc.read = owner or viewer`, viewers are `width` groups and the target
/// user sits in the last one.
fn create_setup(width: usize) -> BenchEngine {
    let schema = BenchSchemaReader {
        definitions: [
            EntityDefinition::new("user"),
            EntityDefinition::new("group").with_relation("member", &["user"]),
            EntityDefinition::new("doc")
                .with_relation("owner", &["user"])
                .with_relation("viewer", &["user", "group#member"])
                .with_permission(
                    "read",
                    Child::union(vec![Child::computed("owner"), Child::computed("viewer")]),
                ),
        ]
        .into_iter()
        .map(|d| (d.name.clone(), d))
        .collect(),
    };

    let mut tuples = BenchTupleReader::default();
    tuples.add("doc:1#owner@user:owner");
    for i in 0..width {
        tuples.add(&format!("doc:1#viewer@group:g{i}#member"));
    }
    tuples.add(&format!("group:g{}#member@user:target", width.saturating_sub(1)));

    CheckEngine::new(Arc::new(schema), Arc::new(tuples))
}

fn read_request(user: &str) -> CheckRequest {
    CheckRequest::new(
        TENANT,
        Entity::new("doc", "1"),
        "read",
        Subject::new("user", user),
    )
}

// =============================================================================
// Benchmarks
// =============================================================================

fn bench_direct_relation(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let engine = create_setup(1);
    let token = CancellationToken::new();

    let mut group = c.benchmark_group("check_direct");
    group.throughput(Throughput::Elements(1));
    group.bench_function("owner", |b| {
        b.to_async(&rt).iter(|| async {
            let result = engine.check(&token, black_box(read_request("owner"))).await;
            black_box(result)
        })
    });
    group.finish();
}

fn bench_union_fan_out(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let token = CancellationToken::new();

    let mut group = c.benchmark_group("check_fan_out");
    group.throughput(Throughput::Elements(1));
    for width in [10usize, 100, 500] {
        let engine = create_setup(width);
        group.bench_with_input(BenchmarkId::from_parameter(width), &width, |b, _| {
            b.to_async(&rt).iter(|| async {
                let result = engine.check(&token, black_box(read_request("target"))).await;
                black_box(result)
            })
        });
    }
    group.finish();
}

fn bench_result_cache(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let token = CancellationToken::new();
    let uncached = create_setup(100);
    let cached = create_setup(100).with_cache(Arc::new(CheckCache::new(CheckCacheConfig::default())));

    let mut group = c.benchmark_group("check_cache");
    group.throughput(Throughput::Elements(1));
    group.bench_function("no_cache", |b| {
        b.to_async(&rt).iter(|| async {
            black_box(uncached.check(&token, read_request("target")).await)
        })
    });
    group.bench_function("warm_cache", |b| {
        b.to_async(&rt).iter(|| async {
            black_box(cached.check(&token, read_request("target")).await)
        })
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_direct_relation,
    bench_union_fan_out,
    bench_result_cache
);
criterion_main!(benches);
