//! Response data → records.
//!
//! The normalizer walks an operation's selection tree alongside the response
//! data. Every composite value that is not of an embedded type becomes its
//! own [`Record`] and is replaced in its parent by a reference. Keys come
//! from the [`IdentityResolver`] in this order: object content, field
//! arguments, then the positional path `parentKey.fieldStorageKey` (with
//! `.index` appended for list elements).
//!
//! List elements are keyed all-or-nothing: either every element gets a
//! resolver key or every element falls back to its positional key.

use crate::error::{Error, Result};
use crate::key::CacheKey;
use crate::merger::{AFTER, BEFORE, END_CURSOR, START_CURSOR};
use crate::record::{FieldMetadata, FieldValue, Record};
use crate::resolver::{DefaultIdentityResolver, IdentityResolver};
use crate::scalar::ScalarAdapters;
use crate::selection::{collect_fields, CompiledField, CompiledType, Operation, Selection, Variables};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

/// Produces per-field metadata while normalizing.
pub trait MetadataGenerator: Send + Sync {
    fn metadata_for(&self, field: &CompiledField, arguments: &Map<String, Value>, value: &Value) -> FieldMetadata;
}

/// Attaches no metadata.
#[derive(Clone, Copy, Debug, Default)]
pub struct EmptyMetadataGenerator;

impl MetadataGenerator for EmptyMetadataGenerator {
    fn metadata_for(&self, _field: &CompiledField, _arguments: &Map<String, Value>, _value: &Value) -> FieldMetadata {
        FieldMetadata::new()
    }
}

/// Records the cursor window of connection fields.
///
/// For a field whose type is one of the configured connection types, the
/// metadata holds `startCursor`/`endCursor` from `pageInfo` and the
/// `before`/`after` arguments the page was fetched with. Pair it with
/// [`ConnectionRecordMerger`](crate::merger::ConnectionRecordMerger) and
/// mark the connection types as embedded.
#[derive(Clone, Debug, Default)]
pub struct ConnectionMetadataGenerator {
    connection_types: HashSet<String>,
}

impl ConnectionMetadataGenerator {
    pub fn new<S: Into<String>>(connection_types: impl IntoIterator<Item = S>) -> Self {
        ConnectionMetadataGenerator {
            connection_types: connection_types.into_iter().map(Into::into).collect(),
        }
    }
}

impl MetadataGenerator for ConnectionMetadataGenerator {
    fn metadata_for(&self, field: &CompiledField, arguments: &Map<String, Value>, value: &Value) -> FieldMetadata {
        let mut metadata = FieldMetadata::new();
        if !self.connection_types.contains(field.field_type.leaf_name()) {
            return metadata;
        }
        let page_info = value.get("pageInfo").and_then(Value::as_object);
        for name in [START_CURSOR, END_CURSOR] {
            if let Some(cursor) = page_info.and_then(|info| info.get(name)).and_then(Value::as_str) {
                metadata.insert(name.to_string(), FieldValue::from(cursor));
            }
        }
        for name in [BEFORE, AFTER] {
            if let Some(cursor) = arguments.get(name).and_then(Value::as_str) {
                metadata.insert(name.to_string(), FieldValue::from(cursor));
            }
        }
        metadata
    }
}

/// Strategies shared by normalization and cache reads.
#[derive(Clone)]
pub struct Policies {
    pub identity_resolver: Arc<dyn IdentityResolver>,
    pub metadata_generator: Arc<dyn MetadataGenerator>,
    pub scalar_adapters: ScalarAdapters,
    /// Types stored inline in their parent record.
    pub embedded_types: HashSet<String>,
}

impl Default for Policies {
    fn default() -> Self {
        Policies {
            identity_resolver: Arc::new(DefaultIdentityResolver),
            metadata_generator: Arc::new(EmptyMetadataGenerator),
            scalar_adapters: ScalarAdapters::new(),
            embedded_types: HashSet::new(),
        }
    }
}

impl std::fmt::Debug for Policies {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Policies")
            .field("scalar_adapters", &self.scalar_adapters)
            .field("embedded_types", &self.embedded_types)
            .finish_non_exhaustive()
    }
}

/// Flatten `data` for `operation` into records, the root stored at `root_key`.
///
/// Records reached more than once in the same response are merged, so the
/// result holds one record per key.
///
/// # Errors
/// Returns `Error::NormalizationError` when the data does not have the
/// shape the selection tree declares.
///
/// # Example
///
/// ```
/// use graph_cache_kit::normalizer::{normalize, Policies};
/// use graph_cache_kit::selection::{CompiledField, CompiledType, Operation};
/// use graph_cache_kit::CacheKey;
/// use serde_json::json;
///
/// let op = Operation::query("Hero", vec![CompiledField::new("hero", CompiledType::object("Character"))
///     .selections(vec![CompiledField::new("name", CompiledType::scalar("String")).into()])
///     .into()]);
/// let data = json!({"hero": {"name": "R2-D2"}});
///
/// let records = normalize(&op, data.as_object().unwrap(), &CacheKey::root(), &Policies::default()).unwrap();
/// let keys: Vec<_> = records.iter().map(|r| r.key.as_str()).collect();
/// assert_eq!(keys, vec!["QUERY_ROOT", "QUERY_ROOT.hero"]);
/// ```
pub fn normalize(
    operation: &Operation,
    data: &Map<String, Value>,
    root_key: &CacheKey,
    policies: &Policies,
) -> Result<Vec<Record>> {
    let mut normalizer = Normalizer {
        policies,
        variables: &operation.variables,
        records: BTreeMap::new(),
    };
    normalizer.normalize_record(root_key, &operation.root_type, data, &operation.selection_refs())?;
    debug!(
        "Normalized {} into {} records",
        operation.name,
        normalizer.records.len()
    );
    Ok(normalizer.records.into_values().collect())
}

struct Normalizer<'a> {
    policies: &'a Policies,
    variables: &'a Variables,
    records: BTreeMap<String, Record>,
}

/// Fields of one object plus the metadata generated for them.
struct Fields {
    values: BTreeMap<String, FieldValue>,
    metadata: BTreeMap<String, FieldMetadata>,
}

impl<'a> Normalizer<'a> {
    fn normalize_record(
        &mut self,
        key: &CacheKey,
        static_type: &str,
        object: &Map<String, Value>,
        selections: &[&Selection],
    ) -> Result<()> {
        let fields = self.normalize_fields(key, static_type, object, selections)?;
        let mut record = Record::new(key.clone());
        record.fields = fields.values;
        record.metadata = fields.metadata;

        match self.records.get_mut(key.as_str()) {
            Some(existing) => *existing = existing.merged_with(&record, None).0,
            None => {
                self.records.insert(key.as_str().to_string(), record);
            }
        }
        Ok(())
    }

    fn normalize_fields(
        &mut self,
        path: &CacheKey,
        static_type: &str,
        object: &Map<String, Value>,
        selections: &[&Selection],
    ) -> Result<Fields> {
        let typename = typename_of(object).unwrap_or(static_type);
        let mut fields = Fields {
            values: BTreeMap::new(),
            metadata: BTreeMap::new(),
        };
        if let Some(name) = typename_of(object) {
            fields.values.insert("__typename".to_string(), FieldValue::from(name));
        }

        for group in collect_fields(selections, typename, self.variables) {
            let field = group.field;
            // Fields absent from the data are left untouched in the cache.
            let Some(value) = object.get(field.response_name()) else {
                continue;
            };
            let storage = field.storage_key(self.variables);
            let arguments = field.resolved_arguments(self.variables);
            let normalized = self.normalize_value(
                &path.child(&storage),
                field,
                &arguments,
                &field.field_type,
                &group.selections,
                value,
                Slot::Field,
            )?;
            let metadata = self
                .policies
                .metadata_generator
                .metadata_for(field, &arguments, value);
            if !metadata.is_empty() {
                fields.metadata.insert(storage.clone(), metadata);
            }
            fields.values.insert(storage, normalized);
        }
        Ok(fields)
    }

    #[allow(clippy::too_many_arguments)]
    fn normalize_value(
        &mut self,
        path: &CacheKey,
        field: &CompiledField,
        arguments: &Map<String, Value>,
        field_type: &CompiledType,
        selections: &[&Selection],
        value: &Value,
        slot: Slot,
    ) -> Result<FieldValue> {
        match field_type {
            CompiledType::NonNull(inner) => {
                if value.is_null() {
                    return Err(Error::NormalizationError(format!(
                        "null for non-null field at {}",
                        path
                    )));
                }
                self.normalize_value(path, field, arguments, inner, selections, value, slot)
            }
            _ if value.is_null() => Ok(FieldValue::Null),
            CompiledType::List(inner) => {
                let items = value.as_array().ok_or_else(|| {
                    Error::NormalizationError(format!("expected a list at {}", path))
                })?;
                let mut keys = self.list_keys(field, arguments, inner, items);
                let mut out = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    let key = keys.as_mut().and_then(|k| k.get_mut(i)).and_then(Option::take);
                    out.push(self.normalize_value(
                        &path.index(i),
                        field,
                        arguments,
                        inner,
                        selections,
                        item,
                        Slot::Element(key),
                    )?);
                }
                Ok(FieldValue::List(out))
            }
            CompiledType::Named { name, kind } if kind.is_composite() => {
                let object = value.as_object().ok_or_else(|| {
                    Error::NormalizationError(format!("expected an object at {}", path))
                })?;
                let typename = typename_of(object).unwrap_or(name);
                if self.policies.embedded_types.contains(typename) {
                    let fields = self.normalize_fields(path, name, object, selections)?;
                    return Ok(FieldValue::Object(fields.values));
                }

                let resolver = &self.policies.identity_resolver;
                let key = match slot {
                    Slot::Element(Some(key)) => Some(key),
                    Slot::Element(None) => None,
                    Slot::Field => resolver
                        .key_for_object(typename, object)
                        .or_else(|| resolver.key_for_field(field, arguments)),
                }
                .unwrap_or_else(|| path.clone());
                self.normalize_record(&key, name, object, selections)?;
                Ok(FieldValue::Reference(key))
            }
            CompiledType::Named { name, .. } => {
                self.policies.scalar_adapters.adapter_for(name).to_cache(value)
            }
        }
    }

    /// Keys for the composite elements of one list, or `None` for positional keys.
    ///
    /// Null elements get no key and never force the positional fallback.
    fn list_keys(
        &self,
        field: &CompiledField,
        arguments: &Map<String, Value>,
        element_type: &CompiledType,
        items: &[Value],
    ) -> Option<Vec<Option<CacheKey>>> {
        let (element_name, kind) = element_type.leaf();
        if !kind.is_composite() || matches!(unwrap_non_null(element_type), CompiledType::List(_)) {
            return None;
        }
        if self.policies.embedded_types.contains(element_name) {
            return None;
        }

        let resolver = &self.policies.identity_resolver;
        let by_content: Option<Vec<Option<CacheKey>>> = items
            .iter()
            .map(|item| match item {
                Value::Null => Some(None),
                Value::Object(object) => resolver
                    .key_for_object(typename_of(object).unwrap_or(element_name), object)
                    .map(Some),
                _ => None,
            })
            .collect();
        if by_content.is_some() {
            return by_content;
        }

        match resolver.keys_for_list_field(field, arguments) {
            Some(keys) if keys.len() == items.len() => Some(keys.into_iter().map(Some).collect()),
            Some(keys) => {
                debug!(
                    "Field {} resolved {} keys for {} elements, using positional keys",
                    field.name,
                    keys.len(),
                    items.len()
                );
                None
            }
            None => None,
        }
    }
}

/// Where a composite value sits, which decides how its key is resolved.
enum Slot {
    /// Directly under a field: content, then field arguments, then path.
    Field,
    /// Inside a list: the key chosen for the whole list, else the path.
    Element(Option<CacheKey>),
}

fn typename_of(object: &Map<String, Value>) -> Option<&str> {
    object.get("__typename").and_then(Value::as_str)
}

fn unwrap_non_null(field_type: &CompiledType) -> &CompiledType {
    match field_type {
        CompiledType::NonNull(inner) => unwrap_non_null(inner),
        other => other,
    }
}
