//! Strategies combining an existing record with an incoming one.
//!
//! | Merger | Behavior |
//! |--------|----------|
//! | [`DefaultRecordMerger`] | Incoming field replaces existing when structurally unequal |
//! | [`FieldRecordMerger`] | Per-field merge through a [`FieldMerger`] |
//! | [`ConnectionRecordMerger`] | Cursor-based pagination: append/prepend edges, else replace |

use crate::key::field_key;
use crate::record::{ChangedKeys, FieldMetadata, FieldValue, Record};
use std::collections::BTreeMap;

/// Metadata key of the first cursor of the cached window.
pub const START_CURSOR: &str = "startCursor";
/// Metadata key of the last cursor of the cached window.
pub const END_CURSOR: &str = "endCursor";
/// Metadata key of the `before` argument the page was fetched with.
pub const BEFORE: &str = "before";
/// Metadata key of the `after` argument the page was fetched with.
pub const AFTER: &str = "after";

/// Pluggable record merge strategy, selected at store construction.
pub trait RecordMerger: Send + Sync {
    /// Merge `incoming` into `existing`.
    ///
    /// Returns the merged record and the `"<key>.<field>"` paths whose value
    /// changed. Timestamps are stamped on every incoming field when
    /// `timestamp` is set.
    fn merge(&self, existing: &Record, incoming: &Record, timestamp: Option<i64>) -> (Record, ChangedKeys);
}

/// Replace-on-change merge.
///
/// Equality is structural: a field whose new value differs in any way
/// (including list order) is reported, even when a consumer would deem the
/// two values equivalent.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultRecordMerger;

impl RecordMerger for DefaultRecordMerger {
    fn merge(&self, existing: &Record, incoming: &Record, timestamp: Option<i64>) -> (Record, ChangedKeys) {
        existing.merged_with(incoming, timestamp)
    }
}

/// A field value together with its metadata.
#[derive(Clone, Debug, PartialEq)]
pub struct FieldInfo {
    pub value: FieldValue,
    pub metadata: FieldMetadata,
}

/// Merge logic for one field present on both sides.
pub trait FieldMerger: Send + Sync {
    fn merge_field(&self, existing: FieldInfo, incoming: FieldInfo) -> FieldInfo;
}

/// Record merger delegating fields present on both sides to a [`FieldMerger`].
#[derive(Clone, Debug, Default)]
pub struct FieldRecordMerger<F> {
    field_merger: F,
}

impl<F: FieldMerger> FieldRecordMerger<F> {
    pub fn new(field_merger: F) -> Self {
        FieldRecordMerger { field_merger }
    }
}

impl<F: FieldMerger> RecordMerger for FieldRecordMerger<F> {
    fn merge(&self, existing: &Record, incoming: &Record, timestamp: Option<i64>) -> (Record, ChangedKeys) {
        let mut merged = existing.clone();
        let mut changed = ChangedKeys::new();

        for (name, incoming_value) in &incoming.fields {
            let incoming_meta = incoming.metadata.get(name).cloned().unwrap_or_default();
            let info = match existing.fields.get(name) {
                Some(existing_value) => self.field_merger.merge_field(
                    FieldInfo {
                        value: existing_value.clone(),
                        metadata: existing.metadata.get(name).cloned().unwrap_or_default(),
                    },
                    FieldInfo {
                        value: incoming_value.clone(),
                        metadata: incoming_meta,
                    },
                ),
                None => FieldInfo {
                    value: incoming_value.clone(),
                    metadata: incoming_meta,
                },
            };

            if existing.fields.get(name) != Some(&info.value) {
                changed.insert(field_key(existing.key.as_str(), name));
            }
            merged.fields.insert(name.clone(), info.value);
            if info.metadata.is_empty() {
                merged.metadata.remove(name);
            } else {
                merged.metadata.insert(name.clone(), info.metadata);
            }
            if let Some(ts) = timestamp.or_else(|| incoming.timestamps.get(name).copied()) {
                merged.timestamps.insert(name.clone(), ts);
            }
        }
        merged.mutation_id = incoming.mutation_id;

        (merged, changed)
    }
}

/// Cursor-based pagination over embedded connection values.
///
/// Applies when both sides are embedded objects carrying an `edges` list and
/// the existing side has cursor metadata. A page fetched `after` the cached
/// window's end cursor is appended, a page fetched `before` its start cursor
/// is prepended; any other page replaces the window.
#[derive(Clone, Copy, Debug, Default)]
pub struct ConnectionFieldMerger;

fn cursor<'a>(meta: &'a FieldMetadata, name: &str) -> Option<&'a str> {
    meta.get(name).and_then(FieldValue::as_str)
}

fn edges_of(value: &FieldValue) -> Option<&Vec<FieldValue>> {
    match value {
        FieldValue::Object(map) => match map.get("edges") {
            Some(FieldValue::List(edges)) => Some(edges),
            _ => None,
        },
        _ => None,
    }
}

impl FieldMerger for ConnectionFieldMerger {
    fn merge_field(&self, existing: FieldInfo, incoming: FieldInfo) -> FieldInfo {
        let (Some(existing_edges), Some(incoming_edges), FieldValue::Object(incoming_map)) = (
            edges_of(&existing.value),
            edges_of(&incoming.value),
            &incoming.value,
        ) else {
            return incoming;
        };

        let existing_start = cursor(&existing.metadata, START_CURSOR);
        let existing_end = cursor(&existing.metadata, END_CURSOR);
        let after = cursor(&incoming.metadata, AFTER);
        let before = cursor(&incoming.metadata, BEFORE);

        let appending = after.is_some() && after == existing_end;
        let prepending = !appending && before.is_some() && before == existing_start;
        if !appending && !prepending {
            debug!("Connection page is disjoint from cached window, replacing");
            return incoming;
        }

        let (edges, start, end) = if appending {
            let mut edges = existing_edges.clone();
            edges.extend(incoming_edges.iter().cloned());
            (edges, existing_start, cursor(&incoming.metadata, END_CURSOR))
        } else {
            let mut edges = incoming_edges.clone();
            edges.extend(existing_edges.iter().cloned());
            (edges, cursor(&incoming.metadata, START_CURSOR), existing_end)
        };

        let mut value: BTreeMap<String, FieldValue> = incoming_map.clone();
        value.insert("edges".to_string(), FieldValue::List(edges));
        if let (Some(FieldValue::Object(existing_info)), Some(FieldValue::Object(page_info))) = (
            object_fields(&existing.value).and_then(|m| m.get("pageInfo")),
            incoming_map.get("pageInfo"),
        ) {
            let mut merged_info = page_info.clone();
            // The kept end of the window keeps its own cursor and flag.
            let (kept_cursor, kept_flag) = if appending {
                (START_CURSOR, "hasPreviousPage")
            } else {
                (END_CURSOR, "hasNextPage")
            };
            for name in [kept_cursor, kept_flag] {
                if let Some(v) = existing_info.get(name) {
                    merged_info.insert(name.to_string(), v.clone());
                }
            }
            value.insert("pageInfo".to_string(), FieldValue::Object(merged_info));
        }

        let mut metadata = FieldMetadata::new();
        if let Some(start) = start {
            metadata.insert(START_CURSOR.to_string(), FieldValue::from(start));
        }
        if let Some(end) = end {
            metadata.insert(END_CURSOR.to_string(), FieldValue::from(end));
        }

        FieldInfo {
            value: FieldValue::Object(value),
            metadata,
        }
    }
}

fn object_fields(value: &FieldValue) -> Option<&BTreeMap<String, FieldValue>> {
    match value {
        FieldValue::Object(map) => Some(map),
        _ => None,
    }
}

/// Record merger for paginated connections.
pub type ConnectionRecordMerger = FieldRecordMerger<ConnectionFieldMerger>;

impl ConnectionRecordMerger {
    pub fn connections() -> Self {
        FieldRecordMerger::new(ConnectionFieldMerger)
    }
}
