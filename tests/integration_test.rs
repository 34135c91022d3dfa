//! Integration tests for graph-cache-kit
//!
//! These tests drive the public `Store` API end to end: normalization on
//! write, denormalization on read, layered caches, optimistic updates,
//! cascading removal and watcher notifications.

use graph_cache_kit::cache::{
    BlobCache, BlobStore, CacheHeaders, InMemoryBlobStore, MemoryCache, MemoryCacheConfig,
    NormalizedCache,
};
use graph_cache_kit::merger::{ConnectionRecordMerger, DefaultRecordMerger};
use graph_cache_kit::normalizer::ConnectionMetadataGenerator;
use graph_cache_kit::record::FieldValue;
use graph_cache_kit::resolver::TypePolicyResolver;
use graph_cache_kit::selection::{Argument, CompiledField, CompiledType, InputValue, Operation, Selection};
use graph_cache_kit::{CacheKey, Error, MutationId, Record, Result, Store};
use serde_json::{json, Map, Value};
use std::sync::Arc;

// ============================================================================
// Test schema
// ============================================================================

fn scalar(name: &str) -> Selection {
    CompiledField::new(name, CompiledType::scalar("String")).into()
}

fn data(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

/// `query Hero { hero { id name friends { id name } } }`
fn hero_query() -> Operation {
    Operation::query(
        "Hero",
        vec![CompiledField::new("hero", CompiledType::object("Character"))
            .selections(vec![
                scalar("id"),
                scalar("name"),
                CompiledField::new("friends", CompiledType::list(CompiledType::object("Character")))
                    .selections(vec![scalar("id"), scalar("name")])
                    .into(),
            ])
            .into()],
    )
}

/// `mutation Rename { renameCharacter { id name } }`
fn rename_mutation() -> Operation {
    Operation::mutation(
        "Rename",
        vec![CompiledField::new("renameCharacter", CompiledType::object("Character"))
            .selections(vec![scalar("id"), scalar("name")])
            .into()],
    )
}

fn hero_data() -> Map<String, Value> {
    data(json!({
        "hero": {
            "id": "2001",
            "name": "R2-D2",
            "friends": [
                {"id": "1000", "name": "Luke Skywalker"},
                {"id": "1002", "name": "Han Solo"}
            ]
        }
    }))
}

fn store_by_id(cache: impl NormalizedCache + 'static) -> Store {
    Store::builder()
        .cache(cache)
        .identity_resolver(TypePolicyResolver::new().with_fallback_field("id"))
        .build()
        .expect("store with a cache should build")
}

fn init_logging() {
    env_logger::Builder::from_default_env()
        .is_test(true)
        .try_init()
        .ok();
}

fn headers() -> CacheHeaders {
    CacheHeaders::default()
}

/// Blob store whose every call fails.
struct UnavailableBlobStore;

impl BlobStore for UnavailableBlobStore {
    fn get(&self, _key: &str) -> Result<Option<Vec<u8>>> {
        Err(Error::StorageError("disk unavailable".into()))
    }

    fn put(&self, _key: &str, _bytes: Vec<u8>) -> Result<()> {
        Err(Error::StorageError("disk unavailable".into()))
    }

    fn delete(&self, _key: &str) -> Result<bool> {
        Err(Error::StorageError("disk unavailable".into()))
    }

    fn keys(&self) -> Result<Vec<String>> {
        Err(Error::StorageError("disk unavailable".into()))
    }

    fn clear(&self) -> Result<()> {
        Err(Error::StorageError("disk unavailable".into()))
    }
}

/// Blob store that refuses to persist one key.
struct RejectingBlobStore {
    inner: InMemoryBlobStore,
    rejected: &'static str,
}

impl BlobStore for RejectingBlobStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.inner.get(key)
    }

    fn put(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
        if key == self.rejected {
            return Err(Error::StorageError(format!("cannot persist {}", key)));
        }
        self.inner.put(key, bytes)
    }

    fn delete(&self, key: &str) -> Result<bool> {
        self.inner.delete(key)
    }

    fn keys(&self) -> Result<Vec<String>> {
        self.inner.keys()
    }

    fn clear(&self) -> Result<()> {
        self.inner.clear()
    }
}

// ============================================================================
// Tests
// ============================================================================

/// Test 1: End-to-End Write and Read
///
/// Verifies the complete normalize → merge → denormalize flow:
/// - Response data is split into one record per identified object
/// - Reading the same operation back reproduces the response exactly
#[tokio::test]
async fn test_end_to_end_write_and_read() {
    init_logging();
    let store = store_by_id(MemoryCache::unbounded());
    let op = hero_query();

    let changed = store
        .write(&op, &hero_data(), &headers())
        .await
        .expect("write should succeed");
    assert!(changed.contains("QUERY_ROOT.hero"));
    assert!(changed.contains("Character:2001.name"));
    assert!(changed.contains("Character:1002.name"));

    let hero = store.read_record("Character:2001").await.expect("hero record");
    assert_eq!(
        hero.get("friends"),
        Some(&FieldValue::List(vec![
            FieldValue::Reference(CacheKey::new("Character:1000")),
            FieldValue::Reference(CacheKey::new("Character:1002")),
        ]))
    );

    let read = store
        .read_operation(&op, &headers())
        .await
        .expect("read should hit");
    assert_eq!(read, hero_data());
}

/// Test 2: Overlapping Operations Share Entities
///
/// A mutation that returns an entity already cached by a query updates
/// what the query reads, and watchers are told which fields changed.
#[tokio::test]
async fn test_mutation_updates_query_result() {
    let store = store_by_id(MemoryCache::unbounded());
    store.write(&hero_query(), &hero_data(), &headers()).await.unwrap();

    let mut watcher = store.subscribe().await;
    let changed = store
        .write(
            &rename_mutation(),
            &data(json!({"renameCharacter": {"id": "1002", "name": "Han"}})),
            &headers(),
        )
        .await
        .unwrap();
    assert!(changed.contains("Character:1002.name"));
    assert!(!changed.contains("Character:1002.id"));

    let notified = watcher.recv().await.expect("watcher should be notified");
    assert_eq!(notified, changed);

    let read = store.read_operation(&hero_query(), &headers()).await.unwrap();
    assert_eq!(read["hero"]["friends"][1]["name"], json!("Han"));
}

/// Test 3: Unchanged Writes Are Silent
///
/// Writing the same data twice reports nothing the second time and
/// delivers nothing to watchers.
#[tokio::test]
async fn test_identical_write_reports_nothing() {
    let store = store_by_id(MemoryCache::unbounded());
    store.write(&hero_query(), &hero_data(), &headers()).await.unwrap();

    let mut watcher = store.subscribe().await;
    let changed = store.write(&hero_query(), &hero_data(), &headers()).await.unwrap();
    assert!(changed.is_empty());
    assert!(watcher.try_recv().is_none());
}

/// Test 4: Optimistic Updates Roll Back Exactly
///
/// Two optimistic writes stack over a committed value. Rolling back the
/// newer one reveals the older, rolling back the older reveals the
/// committed value.
#[tokio::test]
async fn test_optimistic_rollback_order() {
    let store = store_by_id(MemoryCache::unbounded());
    let op = rename_mutation();
    let query = Operation::fragment("Character", vec![scalar("id"), scalar("name")]);
    let key = CacheKey::new("Character:1000");

    store
        .write(&op, &data(json!({"renameCharacter": {"id": "1000", "name": "v0"}})), &headers())
        .await
        .unwrap();

    let (u1, u2) = (MutationId::new(), MutationId::new());
    store
        .write_optimistic(&op, &data(json!({"renameCharacter": {"id": "1000", "name": "v1"}})), u1)
        .await
        .unwrap();
    store
        .write_optimistic(&op, &data(json!({"renameCharacter": {"id": "1000", "name": "v2"}})), u2)
        .await
        .unwrap();

    let name = |read: Map<String, Value>| read["name"].clone();
    assert_eq!(name(store.read(&query, &key, &headers()).await.unwrap()), json!("v2"));

    store.rollback_optimistic(u2).await;
    assert_eq!(name(store.read(&query, &key, &headers()).await.unwrap()), json!("v1"));

    store.rollback_optimistic(u1).await;
    assert_eq!(name(store.read(&query, &key, &headers()).await.unwrap()), json!("v0"));

    // Rolling back the older write first leaves the newer one visible.
    let (u3, u4) = (MutationId::new(), MutationId::new());
    store
        .write_optimistic(&op, &data(json!({"renameCharacter": {"id": "1000", "name": "v3"}})), u3)
        .await
        .unwrap();
    store
        .write_optimistic(&op, &data(json!({"renameCharacter": {"id": "1000", "name": "v4"}})), u4)
        .await
        .unwrap();
    store.rollback_optimistic(u3).await;
    assert_eq!(name(store.read(&query, &key, &headers()).await.unwrap()), json!("v4"));
    store.rollback_optimistic(u4).await;
    assert_eq!(name(store.read(&query, &key, &headers()).await.unwrap()), json!("v0"));
}

/// Test 5: Optimistic Write Over An Uncached Record
///
/// Once rolled back, a record that only ever existed optimistically is a
/// miss again.
#[tokio::test]
async fn test_optimistic_only_record_disappears_on_rollback() {
    let store = store_by_id(MemoryCache::unbounded());
    let query = Operation::fragment("Character", vec![scalar("name")]);
    let key = CacheKey::new("Character:7");
    let id = MutationId::new();

    let mut watcher = store.subscribe().await;
    store
        .write_optimistic(
            &rename_mutation(),
            &data(json!({"renameCharacter": {"id": "7", "name": "Pending"}})),
            id,
        )
        .await
        .unwrap();
    assert!(store.read(&query, &key, &headers()).await.is_ok());
    assert!(watcher.recv().await.unwrap().contains("Character:7.name"));

    let changed = store.rollback_optimistic(id).await;
    assert!(changed.contains("Character:7.name"));
    assert!(watcher.recv().await.unwrap().contains("Character:7.name"));

    let err = store.read(&query, &key, &headers()).await.unwrap_err();
    assert!(err.is_cache_miss());
}

/// Test 6: Cascading Removal
///
/// Removing with cascade deletes everything reachable from the target,
/// terminates on cycles, and leaves unrelated records alone.
#[tokio::test]
async fn test_cascade_removal_with_cycle() {
    let mut cache = MemoryCache::unbounded();
    let merger = DefaultRecordMerger;
    let records = vec![
        Record::new("a").with_field("next", CacheKey::new("b")),
        Record::new("b").with_field("next", CacheKey::new("a")),
        Record::new("self").with_field("me", CacheKey::new("self")),
        Record::new("other").with_field("value", 1),
    ];
    cache.merge_many(records, &headers(), &merger).unwrap();
    let store = Store::new(cache);

    assert!(store.remove("a", true).await.unwrap());
    assert!(store.read_record("a").await.is_none());
    assert!(store.read_record("b").await.is_none());
    assert!(store.read_record("other").await.is_some());

    assert!(store.remove("self", true).await.unwrap());
    assert!(store.read_record("self").await.is_none());
    assert!(!store.remove("missing", true).await.unwrap());
}

/// Test 7: Removal Without Cascade
///
/// Removing a referenced record without cascade leaves a dangling
/// reference, and reads through it miss.
#[tokio::test]
async fn test_dangling_reference_reads_as_miss() {
    let store = store_by_id(MemoryCache::unbounded());
    store.write(&hero_query(), &hero_data(), &headers()).await.unwrap();

    assert!(store.remove("Character:1000", false).await.unwrap());
    assert!(store.read_record("Character:2001").await.is_some());

    let err = store.read_operation(&hero_query(), &headers()).await.unwrap_err();
    assert_eq!(err, Error::record_miss("Character:1000"));
}

/// Test 8: Pattern Removal
#[tokio::test]
async fn test_remove_matching_pattern() {
    let store = store_by_id(MemoryCache::unbounded());
    store.write(&hero_query(), &hero_data(), &headers()).await.unwrap();

    let removed = store.remove_matching("character:100_").await.unwrap();
    assert_eq!(removed, 2);
    assert!(store.read_record("Character:2001").await.is_some());
    assert!(store.read_record("Character:1000").await.is_none());

    // Regex metacharacters match literally.
    assert_eq!(store.remove_matching("[").await, Ok(0));
}

/// Test 9: Size-Bounded Eviction
///
/// With a 2000-byte bound, inserting records of about 1100, 1100 and 10
/// bytes evicts the first and keeps the last two.
#[tokio::test]
async fn test_size_bound_evicts_oldest() {
    let cache = MemoryCache::new(MemoryCacheConfig::default().with_max_size_bytes(2000)).unwrap();
    let store = Store::new(cache);
    let merger = DefaultRecordMerger;

    let mut cache = MemoryCache::new(MemoryCacheConfig::default().with_max_size_bytes(2000)).unwrap();
    for (key, len) in [("big1", 1090), ("big2", 1090), ("small", 1)] {
        cache
            .merge(Record::new(key).with_field("blob", "x".repeat(len)), &headers(), &merger)
            .unwrap();
    }
    assert!(cache.total_size() <= 2000);
    assert!(cache.read("big1", &headers()).unwrap().is_none());
    assert!(cache.read("big2", &headers()).unwrap().is_some());
    assert!(cache.read("small", &headers()).unwrap().is_some());

    // The store never holds more than its bound either.
    let op = Operation::query("Blob", vec![scalar("blob")]);
    store
        .write(&op, &data(json!({"blob": "x".repeat(3000)})), &headers())
        .await
        .unwrap();
    let layers = store.dump().await;
    let memory = layers.iter().find(|(name, _)| name == "MemoryCache").unwrap();
    assert!(memory.1.is_empty());
}

/// Test 10: Chained Persistent Layer Survives Restart
///
/// A second store over a fresh memory cache chained to the same blob
/// table reads what the first store wrote, then serves it from memory.
#[tokio::test]
async fn test_chained_blob_layer_survives_restart() {
    init_logging();
    let blobs = InMemoryBlobStore::new();

    let first = store_by_id(MemoryCache::unbounded().chain(BlobCache::new(blobs.clone())));
    first.write(&hero_query(), &hero_data(), &headers()).await.unwrap();
    assert!(blobs.contains("Character:2001"));
    assert!(blobs.contains("QUERY_ROOT"));
    drop(first);

    let second = store_by_id(MemoryCache::unbounded().chain(BlobCache::new(blobs.clone())));
    let read = second.read_operation(&hero_query(), &headers()).await.unwrap();
    assert_eq!(read, hero_data());

    let layers = second.dump().await;
    let memory = layers.iter().find(|(name, _)| name == "MemoryCache").unwrap();
    assert!(memory.1.contains_key("Character:2001"));
}

/// Test 11: Storage Failures
///
/// A failing persistence layer is reported on writes and absorbed as a
/// miss on reads.
#[tokio::test]
async fn test_storage_failure_reported_on_write_absorbed_on_read() {
    init_logging();
    let store = store_by_id(BlobCache::new(UnavailableBlobStore));

    let err = store
        .write(&hero_query(), &hero_data(), &headers())
        .await
        .unwrap_err();
    assert_eq!(err, Error::StorageError("disk unavailable".into()));

    let err = store.read_operation(&hero_query(), &headers()).await.unwrap_err();
    assert!(err.is_cache_miss());
}

/// Test 12: Cache Headers
///
/// `do_not_store` writes nothing; `evict_after_read` serves one read.
#[tokio::test]
async fn test_cache_headers() {
    let store = store_by_id(MemoryCache::unbounded());

    let changed = store
        .write(&hero_query(), &hero_data(), &headers().do_not_store())
        .await
        .unwrap();
    assert!(changed.is_empty());
    assert!(store.read_operation(&hero_query(), &headers()).await.is_err());

    store.write(&hero_query(), &hero_data(), &headers()).await.unwrap();
    let evicting = headers().evict_after_read();
    assert!(store.read_operation(&hero_query(), &evicting).await.is_ok());
    assert!(store.read_operation(&hero_query(), &evicting).await.is_err());
}

/// Test 13: Connection Pagination
///
/// Pages fetched `after` the cached end cursor are appended to the cached
/// connection; the merged window reads back as one list.
#[tokio::test]
async fn test_connection_pages_are_appended() {
    let store = Store::builder()
        .cache(MemoryCache::unbounded())
        .identity_resolver(TypePolicyResolver::new().with_fallback_field("id"))
        .record_merger(ConnectionRecordMerger::connections())
        .metadata_generator(ConnectionMetadataGenerator::new(["FriendsConnection"]))
        .embedded_types(["FriendsConnection", "FriendsEdge", "PageInfo"])
        .build()
        .unwrap();

    let page_query = |after: Value| {
        let mut variables = Map::new();
        variables.insert("after".to_string(), after);
        Operation::query(
            "Friends",
            vec![CompiledField::new("friendsConnection", CompiledType::object("FriendsConnection"))
                .argument(Argument::new("first", json!(2)).pagination())
                .argument(Argument::new("after", InputValue::variable("after")).pagination())
                .selections(vec![
                    CompiledField::new("edges", CompiledType::list(CompiledType::object("FriendsEdge")))
                        .selections(vec![
                            scalar("cursor"),
                            CompiledField::new("node", CompiledType::object("Character"))
                                .selections(vec![scalar("id"), scalar("name")])
                                .into(),
                        ])
                        .into(),
                    CompiledField::new("pageInfo", CompiledType::object("PageInfo"))
                        .selections(vec![
                            scalar("startCursor"),
                            scalar("endCursor"),
                            CompiledField::new("hasNextPage", CompiledType::scalar("Boolean")).into(),
                        ])
                        .into(),
                ])
                .into()],
        )
        .with_variables(variables)
    };
    let edge = |cursor: &str, id: &str, name: &str| {
        json!({"cursor": cursor, "node": {"id": id, "name": name}})
    };

    store
        .write(
            &page_query(Value::Null),
            &data(json!({"friendsConnection": {
                "edges": [edge("c1", "1", "Luke"), edge("c2", "2", "Leia")],
                "pageInfo": {"startCursor": "c1", "endCursor": "c2", "hasNextPage": true}
            }})),
            &headers(),
        )
        .await
        .unwrap();
    store
        .write(
            &page_query(json!("c2")),
            &data(json!({"friendsConnection": {
                "edges": [edge("c3", "3", "Han")],
                "pageInfo": {"startCursor": "c3", "endCursor": "c3", "hasNextPage": false}
            }})),
            &headers(),
        )
        .await
        .unwrap();

    let read = store
        .read_operation(&page_query(json!("c2")), &headers())
        .await
        .unwrap();
    assert_eq!(
        Value::Object(read),
        json!({"friendsConnection": {
            "edges": [edge("c1", "1", "Luke"), edge("c2", "2", "Leia"), edge("c3", "3", "Han")],
            "pageInfo": {"startCursor": "c1", "endCursor": "c3", "hasNextPage": false}
        }})
    );
    assert!(store.read_record("Character:3").await.is_some());
}

/// Test 14: Concurrent Writers
///
/// Many tasks writing through clones of one store all land, and every
/// write reaches the watcher exactly once.
#[tokio::test]
async fn test_concurrent_writes() {
    let store = store_by_id(MemoryCache::unbounded());
    let mut watcher = store.subscribe().await;
    let op = Arc::new(rename_mutation());

    let mut handles = Vec::new();
    for i in 0..10 {
        let store = store.clone();
        let op = Arc::clone(&op);
        handles.push(tokio::spawn(async move {
            let payload = data(json!({"renameCharacter": {"id": i.to_string(), "name": format!("c{}", i)}}));
            store.write(&op, &payload, &CacheHeaders::default()).await
        }));
    }
    for handle in handles {
        handle.await.expect("task panicked").expect("write failed");
    }

    for i in 0..10 {
        let record = store
            .read_record(&format!("Character:{}", i))
            .await
            .expect("record written");
        assert_eq!(record.get("name"), Some(&FieldValue::from(format!("c{}", i))));
    }

    let mut notifications = 0;
    while watcher.try_recv().is_some() {
        notifications += 1;
    }
    assert_eq!(notifications, 10);
}

/// Test 15: Unsubscribed Watchers Stop Receiving
#[tokio::test]
async fn test_unsubscribe() {
    let store = store_by_id(MemoryCache::unbounded());
    let mut kept = store.subscribe().await;
    let mut dropped = store.subscribe().await;
    assert!(store.unsubscribe(dropped.id()).await);
    assert!(!store.unsubscribe(dropped.id()).await);

    store.write(&hero_query(), &hero_data(), &headers()).await.unwrap();
    assert!(kept.try_recv().is_some());
    assert!(dropped.recv().await.is_none());
}

/// Test 16: Failed Chained Write Leaves Nothing Behind
///
/// When the persistent layer behind a memory cache rejects a write, the
/// memory cache keeps nothing either and watchers hear nothing.
#[tokio::test]
async fn test_failed_chained_write_is_not_half_applied() {
    init_logging();
    let store = store_by_id(MemoryCache::unbounded().chain(BlobCache::new(UnavailableBlobStore)));
    let mut watcher = store.subscribe().await;

    let err = store
        .write(&hero_query(), &hero_data(), &headers())
        .await
        .unwrap_err();
    assert_eq!(err, Error::StorageError("disk unavailable".into()));

    assert!(watcher.try_recv().is_none());
    assert!(store.read_record("Character:1000").await.is_none());
    let err = store.read_operation(&hero_query(), &headers()).await.unwrap_err();
    assert!(err.is_cache_miss());
}

/// Test 17: Partially Applied Writes Are Announced
///
/// Records merged before a failing one stay in both layers, and watchers
/// are told about them before the error is returned.
#[tokio::test]
async fn test_partial_write_notifies_applied_records() {
    init_logging();
    let persisted = InMemoryBlobStore::new();
    let blob = BlobCache::new(RejectingBlobStore {
        inner: persisted.clone(),
        rejected: "Character:1002",
    });
    let store = store_by_id(MemoryCache::unbounded().chain(blob));
    let mut watcher = store.subscribe().await;

    let err = store
        .write(&hero_query(), &hero_data(), &headers())
        .await
        .unwrap_err();
    assert_eq!(err, Error::StorageError("cannot persist Character:1002".into()));

    let changed = watcher.try_recv().expect("applied records should be announced");
    let expected: Vec<String> = vec!["Character:1000.id".into(), "Character:1000.name".into()];
    assert_eq!(changed.into_iter().collect::<Vec<_>>(), expected);
    assert!(watcher.try_recv().is_none());

    assert!(persisted.contains("Character:1000"));
    assert!(!persisted.contains("Character:1002"));
    assert!(store.read_record("Character:1000").await.is_some());
    assert!(store.read_record("Character:1002").await.is_none());
}

/// Test 18: Removals Notify Watchers
///
/// Cascading removal, pattern removal and clear each announce the fields
/// they took out. Keys held by both layers are counted once.
#[tokio::test]
async fn test_removals_notify_watchers() {
    let persisted = InMemoryBlobStore::new();
    let store = store_by_id(MemoryCache::unbounded().chain(BlobCache::new(persisted.clone())));
    store.write(&hero_query(), &hero_data(), &headers()).await.unwrap();
    let mut watcher = store.subscribe().await;

    assert_eq!(store.remove_matching("character:1002").await, Ok(1));
    let changed = watcher.try_recv().expect("pattern removal should be announced");
    assert!(changed.contains("Character:1002.name"));
    assert!(!persisted.contains("Character:1002"));

    assert!(store.remove("Character:2001", true).await.unwrap());
    let changed = watcher.try_recv().expect("cascading removal should be announced");
    assert!(changed.contains("Character:2001.friends"));
    assert!(changed.contains("Character:1000.name"));
    assert!(!changed.iter().any(|key| key.starts_with("QUERY_ROOT")));

    store.clear().await.unwrap();
    let changed = watcher.try_recv().expect("clear should be announced");
    assert!(changed.contains("QUERY_ROOT.hero"));
    assert!(persisted.is_empty());
}
