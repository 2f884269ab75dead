//! Check engine integration tests against the in-memory store.
//!
//! These tests drive `CheckEngine` end to end over `MemoryStore`, covering
//! rewrite evaluation, snapshot pinning and result caching across writes.

use std::sync::Arc;

use permcheck_domain::check::{CheckEngine, CheckRequest, CheckResult, Checker};
use permcheck_domain::model::{Child, Entity, EntityDefinition, Subject, Tuple};
use permcheck_domain::{CheckCache, CheckCacheConfig, DomainError};
use permcheck_storage::MemoryStore;
use tokio_util::sync::CancellationToken;

const TENANT: &str = "acme";

type Engine = CheckEngine<MemoryStore, MemoryStore>;

fn tuples(values: &[&str]) -> Vec<Tuple> {
    values.iter().map(|v| Tuple::parse(v).unwrap()).collect()
}

fn request(entity: &str, permission: &str, subject: &str) -> CheckRequest {
    CheckRequest::new(
        TENANT,
        Entity::parse(entity).unwrap(),
        permission,
        Subject::parse(subject).unwrap(),
    )
}

async fn can(engine: &Engine, request: CheckRequest) -> CheckResult {
    engine
        .check(&CancellationToken::new(), request)
        .await
        .unwrap()
        .can
}

/// `doc.view = (owner or parent.editor or team#member viewer) and not banned`
fn seeded_store() -> Arc<MemoryStore> {
    let store = MemoryStore::new_shared();
    store
        .write_schema(
            TENANT,
            "2024-01",
            vec![
                EntityDefinition::new("user"),
                EntityDefinition::new("team").with_relation("member", &["user", "team#member"]),
                EntityDefinition::new("folder").with_relation("editor", &["user"]),
                EntityDefinition::new("doc")
                    .with_relation("owner", &["user"])
                    .with_relation("parent", &["folder"])
                    .with_relation("viewer", &["user", "team#member"])
                    .with_relation("banned", &["user"])
                    .with_permission(
                        "view",
                        Child::intersection(vec![
                            Child::union(vec![
                                Child::computed("owner"),
                                Child::tuple_to_userset("parent", "editor"),
                                Child::computed("viewer"),
                            ]),
                            Child::computed("banned").excluded(),
                        ]),
                    ),
            ],
        )
        .unwrap();
    store
        .write_tuples(
            TENANT,
            &tuples(&[
                "doc:readme#owner@user:alice",
                "doc:readme#parent@folder:eng",
                "folder:eng#editor@user:bob",
                "doc:readme#viewer@team:core#member",
                "team:core#member@team:infra#member",
                "team:infra#member@user:carol",
                "doc:readme#banned@user:mallory",
                "doc:readme#viewer@user:mallory",
            ]),
        )
        .unwrap();
    store
}

fn engine(store: &Arc<MemoryStore>) -> Engine {
    CheckEngine::new(Arc::clone(store), Arc::clone(store))
}

// ========== Section 1: Evaluation ==========

#[tokio::test]
async fn test_view_permission_resolves_every_branch() {
    let store = seeded_store();
    let engine = engine(&store);

    for user in ["user:alice", "user:bob", "user:carol"] {
        assert_eq!(
            can(&engine, request("doc:readme", "view", user)).await,
            CheckResult::Allowed,
            "{user} should view the doc"
        );
    }
    assert_eq!(
        can(&engine, request("doc:readme", "view", "user:dave")).await,
        CheckResult::Denied
    );
}

#[tokio::test]
async fn test_banned_viewer_is_denied() {
    let store = seeded_store();
    let engine = engine(&store);

    assert_eq!(
        can(&engine, request("doc:readme", "viewer", "user:mallory")).await,
        CheckResult::Allowed
    );
    assert_eq!(
        can(&engine, request("doc:readme", "view", "user:mallory")).await,
        CheckResult::Denied
    );
}

#[tokio::test]
async fn test_unknown_tenant_is_schema_not_found() {
    let store = seeded_store();
    let engine = engine(&store);
    let request = CheckRequest::new(
        "other",
        Entity::new("doc", "readme"),
        "view",
        Subject::new("user", "alice"),
    );

    let result = engine.check(&CancellationToken::new(), request).await;

    assert!(matches!(result, Err(DomainError::SchemaNotFound { .. })));
}

// ========== Section 2: Snapshots ==========

#[tokio::test]
async fn test_check_pinned_to_old_snapshot_ignores_later_delete() {
    let store = seeded_store();
    let engine = engine(&store);
    let before = store
        .write_tuples(TENANT, &tuples(&["doc:notes#owner@user:alice"]))
        .unwrap();
    store
        .delete_tuples(TENANT, &tuples(&["doc:notes#owner@user:alice"]))
        .unwrap();

    let pinned = request("doc:notes", "view", "user:alice").with_snap_token(before);
    let head = request("doc:notes", "view", "user:alice");

    assert_eq!(can(&engine, pinned).await, CheckResult::Allowed);
    assert_eq!(can(&engine, head).await, CheckResult::Denied);
}

#[tokio::test]
async fn test_cached_result_does_not_leak_into_newer_snapshot() {
    let store = seeded_store();
    let cache = Arc::new(CheckCache::new(CheckCacheConfig::default()));
    let engine = engine(&store).with_cache(cache);

    assert_eq!(
        can(&engine, request("doc:readme", "view", "user:erin")).await,
        CheckResult::Denied
    );

    store
        .write_tuples(TENANT, &tuples(&["doc:readme#viewer@user:erin"]))
        .unwrap();

    assert_eq!(
        can(&engine, request("doc:readme", "view", "user:erin")).await,
        CheckResult::Allowed
    );
}

#[tokio::test]
async fn test_repeated_check_is_served_from_cache() {
    let store = seeded_store();
    let cache = Arc::new(CheckCache::new(CheckCacheConfig::default()));
    let engine = engine(&store).with_cache(cache);

    let first = engine
        .check(&CancellationToken::new(), request("doc:readme", "owner", "user:alice"))
        .await
        .unwrap();
    let second = engine
        .check(&CancellationToken::new(), request("doc:readme", "owner", "user:alice"))
        .await
        .unwrap();

    assert_eq!(first.can, CheckResult::Allowed);
    assert_eq!(second.can, CheckResult::Allowed);
    assert_eq!(second.metadata.check_count, 0);
    assert_eq!(engine.cache_metrics().snapshot().hits, 1);
}
