//! Records → response data.
//!
//! [`CacheReader`] walks a selection tree from a root key, following
//! references into other records and reconstructing the JSON data the
//! operation would have returned. Any missing record, missing field or
//! stale field fails the whole read with [`Error::CacheMiss`]; partial
//! results are never returned.

use crate::cache::CacheHeaders;
use crate::error::{Error, Result};
use crate::key::CacheKey;
use crate::normalizer::Policies;
use crate::record::{unix_now, FieldValue, Record};
use crate::selection::{collect_fields, CompiledField, CompiledType, Operation, Selection, Variables};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};

/// Denormalizer over a record loader.
///
/// The loader returns the visible record for a key (the store passes one
/// that reads its cache chain and lays the optimistic journal over it).
/// Each key is loaded at most once per reader.
pub struct CacheReader<'a> {
    policies: &'a Policies,
    variables: &'a Variables,
    load: &'a mut dyn FnMut(&str) -> Option<Record>,
    loaded: HashMap<String, Record>,
    max_stale: Option<i64>,
    now: i64,
}

impl<'a> CacheReader<'a> {
    pub fn new(
        operation: &'a Operation,
        policies: &'a Policies,
        headers: &CacheHeaders,
        load: &'a mut dyn FnMut(&str) -> Option<Record>,
    ) -> Self {
        CacheReader {
            policies,
            variables: &operation.variables,
            load,
            loaded: HashMap::new(),
            max_stale: headers
                .max_stale
                .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX)),
            now: unix_now(),
        }
    }

    /// Read `operation`'s selections starting at `root_key`.
    ///
    /// # Errors
    /// Returns `Error::CacheMiss` for the first missing path, or
    /// `Error::NormalizationError` when a stored value does not fit the
    /// selection type.
    pub fn read(&mut self, operation: &Operation, root_key: &CacheKey) -> Result<Map<String, Value>> {
        self.read_record(root_key.as_str(), &operation.root_type, &operation.selection_refs())
    }

    fn record(&mut self, key: &str) -> Result<Record> {
        if let Some(record) = self.loaded.get(key) {
            return Ok(record.clone());
        }
        let record = (self.load)(key).ok_or_else(|| Error::record_miss(key))?;
        self.loaded.insert(key.to_string(), record.clone());
        Ok(record)
    }

    fn read_record(&mut self, key: &str, static_type: &str, selections: &[&Selection]) -> Result<Map<String, Value>> {
        let record = self.record(key)?;
        self.read_fields(key, &record.fields, Some(&record.timestamps), static_type, selections)
    }

    fn read_fields(
        &mut self,
        key: &str,
        fields: &BTreeMap<String, FieldValue>,
        timestamps: Option<&BTreeMap<String, i64>>,
        static_type: &str,
        selections: &[&Selection],
    ) -> Result<Map<String, Value>> {
        let typename = fields
            .get("__typename")
            .and_then(FieldValue::as_str)
            .unwrap_or(static_type)
            .to_string();
        let mut out = Map::new();

        for group in collect_fields(selections, &typename, self.variables) {
            let field = group.field;
            if field.name == "__typename" && !fields.contains_key("__typename") {
                out.insert(field.response_name().to_string(), Value::String(typename.clone()));
                continue;
            }

            let storage = field.storage_key(self.variables);
            let value = match fields.get(&storage) {
                Some(value) => value.clone(),
                None => self
                    .policy_value(field)
                    .ok_or_else(|| Error::field_miss(key, &storage))?,
            };
            if let (Some(max_stale), Some(written)) = (
                self.max_stale,
                timestamps.and_then(|t| t.get(&storage)),
            ) {
                if self.now.saturating_sub(*written) > max_stale {
                    debug!("Field {}.{} is stale", key, storage);
                    return Err(Error::field_miss(key, &storage));
                }
            }

            let path = format!("{}.{}", key, storage);
            let data = self.read_value(&path, &field.field_type, &group.selections, &value)?;
            out.insert(field.response_name().to_string(), data);
        }
        Ok(out)
    }

    /// Reference(s) the identity resolver derives from the field arguments.
    fn policy_value(&self, field: &CompiledField) -> Option<FieldValue> {
        if !field.field_type.is_composite() {
            return None;
        }
        let arguments = field.resolved_arguments(self.variables);
        let resolver = &self.policies.identity_resolver;
        if is_list(&field.field_type) {
            let keys = resolver.keys_for_list_field(field, &arguments)?;
            Some(FieldValue::List(keys.into_iter().map(FieldValue::Reference).collect()))
        } else {
            resolver
                .key_for_field(field, &arguments)
                .map(FieldValue::Reference)
        }
    }

    fn read_value(
        &mut self,
        path: &str,
        field_type: &CompiledType,
        selections: &[&Selection],
        value: &FieldValue,
    ) -> Result<Value> {
        match (field_type, value) {
            (_, FieldValue::Null) => Ok(Value::Null),
            (CompiledType::NonNull(inner), _) => self.read_value(path, inner, selections, value),
            (CompiledType::List(inner), FieldValue::List(items)) => items
                .iter()
                .enumerate()
                .map(|(i, item)| self.read_value(&format!("{}.{}", path, i), inner, selections, item))
                .collect::<Result<Vec<_>>>()
                .map(Value::Array),
            (CompiledType::Named { name, kind }, FieldValue::Reference(key)) if kind.is_composite() => {
                self.read_record(key.as_str(), name, selections).map(Value::Object)
            }
            (CompiledType::Named { name, kind }, FieldValue::Object(fields)) if kind.is_composite() => {
                self.read_fields(path, fields, None, name, selections).map(Value::Object)
            }
            (CompiledType::Named { name, kind }, _) if !kind.is_composite() => {
                self.policies.scalar_adapters.adapter_for(name).from_cache(value)
            }
            _ => Err(Error::NormalizationError(format!(
                "stored value at {} does not match its selection type",
                path
            ))),
        }
    }
}

fn is_list(field_type: &CompiledType) -> bool {
    match field_type {
        CompiledType::NonNull(inner) => is_list(inner),
        CompiledType::List(_) => true,
        CompiledType::Named { .. } => false,
    }
}
