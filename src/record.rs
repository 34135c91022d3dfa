//! Flattened storage units of the normalized cache.

use crate::error::{Error, Result};
use crate::key::{field_key, CacheKey};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Set of `"<recordKey>.<field>"` paths changed by a write.
pub type ChangedKeys = BTreeSet<String>;

/// Per-field opaque annotations (pagination cursors, arguments).
pub type FieldMetadata = BTreeMap<String, FieldValue>;

/// Identifier of one optimistic mutation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MutationId(Uuid);

impl MutationId {
    pub fn new() -> Self {
        MutationId(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        MutationId(uuid)
    }
}

impl Default for MutationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MutationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Seconds since the unix epoch.
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Value of one record field.
///
/// The variants are tagged on the wire, so a persisted record keeps the
/// distinction between scalars, references, lists and embedded objects.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    Null,
    Boolean(bool),
    Int(i64),
    /// Integer above `i64::MAX`.
    UInt(u64),
    Float(f64),
    String(String),
    /// By-key link to another record.
    Reference(CacheKey),
    List(Vec<FieldValue>),
    /// Embedded object without an identity of its own.
    Object(BTreeMap<String, FieldValue>),
}

impl FieldValue {
    /// Convert a JSON scalar (or a JSON blob used as a custom scalar).
    pub fn from_json(value: &Value) -> FieldValue {
        match value {
            Value::Null => FieldValue::Null,
            Value::Bool(b) => FieldValue::Boolean(*b),
            Value::Number(n) => match (n.as_i64(), n.as_u64()) {
                (Some(i), _) => FieldValue::Int(i),
                (None, Some(u)) => FieldValue::UInt(u),
                (None, None) => FieldValue::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => FieldValue::String(s.clone()),
            Value::Array(items) => FieldValue::List(items.iter().map(FieldValue::from_json).collect()),
            Value::Object(map) => FieldValue::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), FieldValue::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Convert back to JSON. References cannot be expressed as scalars.
    pub fn to_json(&self) -> Result<Value> {
        Ok(match self {
            FieldValue::Null => Value::Null,
            FieldValue::Boolean(b) => Value::Bool(*b),
            FieldValue::Int(i) => Value::Number((*i).into()),
            FieldValue::UInt(u) => Value::Number((*u).into()),
            FieldValue::Float(f) => Number::from_f64(*f).map(Value::Number).ok_or_else(|| {
                Error::NormalizationError(format!("non-finite float {} cannot be read", f))
            })?,
            FieldValue::String(s) => Value::String(s.clone()),
            FieldValue::Reference(key) => {
                return Err(Error::NormalizationError(format!(
                    "reference to {} where a scalar was expected",
                    key
                )))
            }
            FieldValue::List(items) => {
                Value::Array(items.iter().map(|v| v.to_json()).collect::<Result<_>>()?)
            }
            FieldValue::Object(map) => {
                let mut out = Map::new();
                for (k, v) in map {
                    out.insert(k.clone(), v.to_json()?);
                }
                Value::Object(out)
            }
        })
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    /// Collect every reference held directly or inside lists/embedded objects.
    pub fn collect_references(&self, out: &mut Vec<CacheKey>) {
        match self {
            FieldValue::Reference(key) => out.push(key.clone()),
            FieldValue::List(items) => items.iter().for_each(|v| v.collect_references(out)),
            FieldValue::Object(map) => map.values().for_each(|v| v.collect_references(out)),
            _ => {}
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::String(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::String(s)
    }
}

impl From<i64> for FieldValue {
    fn from(i: i64) -> Self {
        FieldValue::Int(i)
    }
}

impl From<i32> for FieldValue {
    fn from(i: i32) -> Self {
        FieldValue::Int(i64::from(i))
    }
}

impl From<bool> for FieldValue {
    fn from(b: bool) -> Self {
        FieldValue::Boolean(b)
    }
}

impl From<CacheKey> for FieldValue {
    fn from(key: CacheKey) -> Self {
        FieldValue::Reference(key)
    }
}

/// A named bag of fields for one entity or embedded object.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub key: CacheKey,
    pub fields: BTreeMap<String, FieldValue>,
    /// Per-field annotations, keyed by field storage key.
    pub metadata: BTreeMap<String, FieldMetadata>,
    /// Last write time of each field, in unix seconds.
    pub timestamps: BTreeMap<String, i64>,
    /// Set only on records produced by an optimistic write.
    pub mutation_id: Option<MutationId>,
}

impl Record {
    pub fn new(key: impl Into<CacheKey>) -> Self {
        Record {
            key: key.into(),
            fields: BTreeMap::new(),
            metadata: BTreeMap::new(),
            timestamps: BTreeMap::new(),
            mutation_id: None,
        }
    }

    /// Builder-style field setter.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn with_metadata(mut self, field: impl Into<String>, metadata: FieldMetadata) -> Self {
        self.metadata.insert(field.into(), metadata);
        self
    }

    pub fn with_mutation_id(mut self, id: MutationId) -> Self {
        self.mutation_id = Some(id);
        self
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// `__typename` stored on the record, if any.
    pub fn typename(&self) -> Option<&str> {
        self.fields.get("__typename").and_then(FieldValue::as_str)
    }

    /// Changed-key paths of every field in this record.
    pub fn field_keys(&self) -> ChangedKeys {
        self.fields
            .keys()
            .map(|f| field_key(self.key.as_str(), f))
            .collect()
    }

    /// Keys of every record this record links to.
    pub fn references(&self) -> Vec<CacheKey> {
        let mut out = Vec::new();
        for value in self.fields.values() {
            value.collect_references(&mut out);
        }
        out
    }

    /// Overlay `incoming` on this record field by field.
    ///
    /// Every incoming field that is absent here or structurally unequal
    /// overwrites the existing value and is reported as changed. When a
    /// timestamp is given it is stamped on every incoming field, changed or
    /// not. Incoming metadata replaces metadata of the same field.
    pub fn merged_with(&self, incoming: &Record, timestamp: Option<i64>) -> (Record, ChangedKeys) {
        let mut merged = self.clone();
        let mut changed = ChangedKeys::new();

        for (name, value) in &incoming.fields {
            let differs = merged.fields.get(name).map_or(true, |old| old != value);
            if differs {
                merged.fields.insert(name.clone(), value.clone());
                changed.insert(field_key(self.key.as_str(), name));
            }
        }
        for (name, meta) in &incoming.metadata {
            merged.metadata.insert(name.clone(), meta.clone());
        }
        for (name, ts) in &incoming.timestamps {
            merged.timestamps.insert(name.clone(), *ts);
        }
        if let Some(ts) = timestamp {
            for name in incoming.fields.keys() {
                merged.timestamps.insert(name.clone(), ts);
            }
        }
        merged.mutation_id = incoming.mutation_id;

        (merged, changed)
    }
}
