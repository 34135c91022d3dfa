//! Property-based tests for normalization, merging and storage.
//!
//! These tests use proptest to check properties of the cache over randomly
//! generated responses and record graphs.
//!
//! # Properties Tested
//!
//! 1. **Roundtrip Property**: read(write(data)) == data for entity graphs
//! 2. **Change Property**: a merge reports exactly the fields whose value changed
//! 3. **Idempotence Property**: merging the same record twice reports nothing
//! 4. **Cascade Property**: cascading removal deletes exactly the reachable set
//! 5. **Envelope Property**: stored records decode back unchanged

use graph_cache_kit::cache::{CacheHeaders, MemoryCache, NormalizedCache};
use graph_cache_kit::key::field_key;
use graph_cache_kit::merger::DefaultRecordMerger;
use graph_cache_kit::normalizer::{normalize, Policies};
use graph_cache_kit::reader::CacheReader;
use graph_cache_kit::record::FieldValue;
use graph_cache_kit::resolver::TypePolicyResolver;
use graph_cache_kit::selection::{CompiledField, CompiledType, Operation, Selection};
use graph_cache_kit::serialization::{decode_record, encode_record, CACHE_MAGIC};
use graph_cache_kit::{CacheKey, ChangedKeys, Record};
use proptest::prelude::*;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;

// ============================================================================
// Generators
// ============================================================================

/// A user: name, optional age, view count, indices of friends.
type UserSpec = (String, Option<i64>, u64, Vec<usize>);

fn arb_users() -> impl Strategy<Value = Vec<UserSpec>> {
    prop::collection::vec(
        (
            "[a-zA-Z ]{0,12}",
            proptest::option::of(0i64..120),
            prop_oneof![0u64..1000, (i64::MAX as u64 + 1)..=u64::MAX],
            prop::collection::vec(0usize..8, 0..4),
        ),
        1..8,
    )
}

fn arb_scalar() -> impl Strategy<Value = FieldValue> {
    prop_oneof![
        Just(FieldValue::Null),
        any::<bool>().prop_map(FieldValue::Boolean),
        any::<i64>().prop_map(FieldValue::Int),
        (i64::MAX as u64 + 1..=u64::MAX).prop_map(FieldValue::UInt),
        (-1.0e6f64..1.0e6).prop_map(FieldValue::Float),
        "[a-z0-9]{0,16}".prop_map(FieldValue::String),
        "[A-Z][a-z]{0,5}:[0-9]{1,4}".prop_map(|k| FieldValue::Reference(CacheKey::new(k))),
    ]
}

fn arb_value() -> impl Strategy<Value = FieldValue> {
    arb_scalar().prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(FieldValue::List),
            prop::collection::btree_map("[a-z]{1,6}", inner, 0..4).prop_map(FieldValue::Object),
        ]
    })
}

/// Fields drawn from a small name pool so two records overlap.
fn arb_fields() -> impl Strategy<Value = BTreeMap<String, FieldValue>> {
    prop::collection::btree_map("[a-e]", arb_scalar(), 0..5)
}

fn arb_record() -> impl Strategy<Value = Record> {
    ("[A-Z][a-z]{0,5}:[0-9]{1,4}", prop::collection::btree_map("[a-z]{1,8}", arb_value(), 0..6))
        .prop_map(|(key, fields)| {
            let mut record = Record::new(key);
            record.fields = fields;
            record
        })
}

/// A record graph: node count and directed edges.
fn arb_graph() -> impl Strategy<Value = (usize, Vec<(usize, usize)>)> {
    (1usize..12).prop_flat_map(|n| (Just(n), prop::collection::vec((0..n, 0..n), 0..24)))
}

// ============================================================================
// Helpers
// ============================================================================

fn scalar(name: &str, type_name: &str) -> Selection {
    CompiledField::new(name, CompiledType::scalar(type_name)).into()
}

/// `query Users { users { id name age views friends { id name } } }`
fn users_query() -> Operation {
    Operation::query(
        "Users",
        vec![CompiledField::new("users", CompiledType::list(CompiledType::object("User")))
            .selections(vec![
                scalar("id", "ID"),
                scalar("name", "String"),
                scalar("age", "Int"),
                scalar("views", "Long"),
                CompiledField::new("friends", CompiledType::list(CompiledType::object("User")))
                    .selections(vec![scalar("id", "ID"), scalar("name", "String")])
                    .into(),
            ])
            .into()],
    )
}

fn users_data(users: &[UserSpec]) -> Map<String, Value> {
    let list: Vec<Value> = users
        .iter()
        .enumerate()
        .map(|(i, (name, age, views, friends))| {
            let friends: Vec<Value> = friends
                .iter()
                .map(|f| {
                    let j = f % users.len();
                    json!({"id": format!("u{}", j), "name": users[j].0})
                })
                .collect();
            json!({"id": format!("u{}", i), "name": name, "age": age, "views": views, "friends": friends})
        })
        .collect();
    let mut data = Map::new();
    data.insert("users".to_string(), Value::Array(list));
    data
}

fn policies() -> Policies {
    Policies {
        identity_resolver: Arc::new(TypePolicyResolver::new().with_fallback_field("id")),
        ..Policies::default()
    }
}

fn reachable(n: usize, edges: &[(usize, usize)]) -> BTreeSet<usize> {
    let mut seen = BTreeSet::from([0]);
    let mut queue = VecDeque::from([0]);
    while let Some(node) = queue.pop_front() {
        for &(from, to) in edges {
            if from == node && to < n && seen.insert(to) {
                queue.push_back(to);
            }
        }
    }
    seen
}

// ============================================================================
// Property 1: Roundtrip Property
// ============================================================================

proptest! {
    /// Property: reading back what was written reproduces the response,
    /// even when entities appear several times in it.
    #[test]
    fn prop_write_read_roundtrip(users in arb_users()) {
        let op = users_query();
        let data = users_data(&users);
        let policies = policies();
        let headers = CacheHeaders::default();

        let records = normalize(&op, &data, &op.root_key(), &policies)
            .expect("well-shaped data should normalize");
        let mut cache = MemoryCache::unbounded();
        cache
            .merge_many(records, &headers, &DefaultRecordMerger)
            .expect("in-memory merge should not fail");
        prop_assert_eq!(cache.len(), users.len() + 1);

        let mut load = |key: &str| cache.read(key, &headers).ok().flatten();
        let read = CacheReader::new(&op, &policies, &headers, &mut load)
            .read(&op, &op.root_key())
            .expect("everything written should be readable");
        prop_assert_eq!(read, data);
    }
}

// ============================================================================
// Properties 2 & 3: Change and Idempotence
// ============================================================================

proptest! {
    /// Property: a merge reports exactly the fields it changed
    #[test]
    fn prop_merge_reports_exact_changes(first in arb_fields(), second in arb_fields()) {
        let mut cache = MemoryCache::unbounded();
        let headers = CacheHeaders::default();
        let record = |fields: &BTreeMap<String, FieldValue>| {
            let mut record = Record::new("Item:1");
            record.fields = fields.clone();
            record
        };

        let changed = cache.merge(record(&first), &headers, &DefaultRecordMerger).unwrap();
        let expected: ChangedKeys = first.keys().map(|f| field_key("Item:1", f)).collect();
        prop_assert_eq!(changed, expected);

        let changed = cache.merge(record(&second), &headers, &DefaultRecordMerger).unwrap();
        let expected: ChangedKeys = second
            .iter()
            .filter(|(name, value)| first.get(*name) != Some(*value))
            .map(|(name, _)| field_key("Item:1", name))
            .collect();
        prop_assert_eq!(changed, expected);
    }

    /// Property: merging the same record twice reports nothing the second time
    #[test]
    fn prop_merge_idempotent(record in arb_record()) {
        let mut cache = MemoryCache::unbounded();
        let headers = CacheHeaders::default();

        cache.merge(record.clone(), &headers, &DefaultRecordMerger).unwrap();
        let changed = cache.merge(record.clone(), &headers, &DefaultRecordMerger).unwrap();
        prop_assert!(changed.is_empty());

        let stored = cache.read(record.key.as_str(), &headers).unwrap();
        prop_assert_eq!(stored.map(|r| r.fields), Some(record.fields));
    }
}

// ============================================================================
// Property 4: Cascade Property
// ============================================================================

proptest! {
    /// Property: cascading removal terminates on any graph, cycles included,
    /// and removes exactly the records reachable from the target
    #[test]
    fn prop_cascade_removes_reachable_set((n, edges) in arb_graph()) {
        let mut cache = MemoryCache::unbounded();
        let headers = CacheHeaders::default();
        for node in 0..n {
            let links: Vec<FieldValue> = edges
                .iter()
                .filter(|(from, _)| *from == node)
                .map(|(_, to)| FieldValue::Reference(CacheKey::new(format!("r{}", to))))
                .collect();
            cache
                .merge(
                    Record::new(format!("r{}", node)).with_field("links", FieldValue::List(links)),
                    &headers,
                    &DefaultRecordMerger,
                )
                .unwrap();
        }

        let removed = cache.remove("r0", true).unwrap();

        let expected = reachable(n, &edges);
        let removed_keys: BTreeSet<String> = expected.iter().map(|node| format!("r{}", node)).collect();
        prop_assert_eq!(&removed.keys, &removed_keys);
        for node in 0..n {
            let present = cache.read(&format!("r{}", node), &headers).unwrap().is_some();
            prop_assert_eq!(present, !expected.contains(&node), "node r{}", node);
        }
    }
}

// ============================================================================
// Property 5: Envelope Property
// ============================================================================

proptest! {
    /// Property: every stored record starts with the magic header and
    /// decodes back to itself
    #[test]
    fn prop_record_encoding_roundtrip(record in arb_record()) {
        let bytes = encode_record(&record).expect("encoding should not fail");
        prop_assert_eq!(&bytes[..4], &CACHE_MAGIC[..]);

        let decoded = decode_record(&bytes).expect("decoding own output should not fail");
        prop_assert_eq!(decoded, record);
    }
}
