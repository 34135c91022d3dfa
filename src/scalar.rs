//! Scalar (de)serialization between response JSON and record fields.

use crate::error::Result;
use crate::record::FieldValue;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Converts one scalar type between its response form and its cached form.
pub trait ScalarAdapter: Send + Sync {
    fn to_cache(&self, value: &Value) -> Result<FieldValue>;
    fn from_cache(&self, value: &FieldValue) -> Result<Value>;
}

/// Stores scalars as their JSON shape. Used for every built-in scalar and
/// for custom scalars without a registered adapter.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonScalarAdapter;

impl ScalarAdapter for JsonScalarAdapter {
    fn to_cache(&self, value: &Value) -> Result<FieldValue> {
        Ok(FieldValue::from_json(value))
    }

    fn from_cache(&self, value: &FieldValue) -> Result<Value> {
        value.to_json()
    }
}

/// Registry of custom scalar adapters, keyed by scalar type name.
#[derive(Clone, Default)]
pub struct ScalarAdapters {
    adapters: HashMap<String, Arc<dyn ScalarAdapter>>,
}

impl ScalarAdapters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, type_name: impl Into<String>, adapter: impl ScalarAdapter + 'static) -> Self {
        self.adapters.insert(type_name.into(), Arc::new(adapter));
        self
    }

    pub fn adapter_for(&self, type_name: &str) -> &dyn ScalarAdapter {
        match self.adapters.get(type_name) {
            Some(adapter) => adapter.as_ref(),
            None => &JsonScalarAdapter,
        }
    }
}

impl std::fmt::Debug for ScalarAdapters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScalarAdapters")
            .field("types", &self.adapters.keys().collect::<Vec<_>>())
            .finish()
    }
}
