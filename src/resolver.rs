//! Object-identity resolution.
//!
//! An [`IdentityResolver`] decides which [`CacheKey`] an object gets. When it
//! returns `None` the normalizer falls back to a positional key: the parent
//! key plus the field storage key (plus the index for list elements).

use crate::key::CacheKey;
use crate::selection::CompiledField;
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Pluggable identity strategy, selected at store construction.
pub trait IdentityResolver: Send + Sync {
    /// Key of an object about to be written, from its content.
    fn key_for_object(&self, _type_name: &str, _object: &Map<String, Value>) -> Option<CacheKey> {
        None
    }

    /// Key of the object a field points to, from the field arguments alone.
    ///
    /// Consulted on writes after [`key_for_object`](Self::key_for_object)
    /// and on reads when the parent record holds no value for the field, so
    /// a query can hit a record written by a different query.
    fn key_for_field(&self, _field: &CompiledField, _arguments: &Map<String, Value>) -> Option<CacheKey> {
        None
    }

    /// Per-element keys of a list field, from the field arguments alone.
    fn keys_for_list_field(
        &self,
        _field: &CompiledField,
        _arguments: &Map<String, Value>,
    ) -> Option<Vec<CacheKey>> {
        None
    }
}

/// No custom identity: every object gets a positional key.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultIdentityResolver;

impl IdentityResolver for DefaultIdentityResolver {}

/// Derives keys from configured key fields, `Type:v1+v2`.
///
/// # Example
///
/// ```
/// use graph_cache_kit::resolver::{IdentityResolver, TypePolicyResolver};
/// use serde_json::json;
///
/// let resolver = TypePolicyResolver::new()
///     .with_type("Book", ["isbn"])
///     .with_fallback_field("id");
///
/// let book = json!({"isbn": "978-0", "title": "Dune"});
/// let key = resolver.key_for_object("Book", book.as_object().unwrap());
/// assert_eq!(key.unwrap().as_str(), "Book:978-0");
///
/// let user = json!({"id": 7});
/// let key = resolver.key_for_object("User", user.as_object().unwrap());
/// assert_eq!(key.unwrap().as_str(), "User:7");
/// ```
#[derive(Clone, Debug, Default)]
pub struct TypePolicyResolver {
    key_fields: HashMap<String, Vec<String>>,
    fallback_field: Option<String>,
}

impl TypePolicyResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Key objects of `type_name` by the given fields, in order.
    pub fn with_type<S: Into<String>>(
        mut self,
        type_name: impl Into<String>,
        fields: impl IntoIterator<Item = S>,
    ) -> Self {
        self.key_fields
            .insert(type_name.into(), fields.into_iter().map(Into::into).collect());
        self
    }

    /// Key objects of any other type by this field when present (typically `id`).
    pub fn with_fallback_field(mut self, field: impl Into<String>) -> Self {
        self.fallback_field = Some(field.into());
        self
    }
}

/// Render a key component. Strings are used raw, everything else as JSON.
fn key_component(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

impl IdentityResolver for TypePolicyResolver {
    fn key_for_object(&self, type_name: &str, object: &Map<String, Value>) -> Option<CacheKey> {
        if let Some(fields) = self.key_fields.get(type_name) {
            let values = fields
                .iter()
                .map(|f| object.get(f).and_then(key_component))
                .collect::<Option<Vec<String>>>()?;
            return Some(CacheKey::from_type(type_name, &values));
        }
        let field = self.fallback_field.as_ref()?;
        let value = object.get(field).and_then(key_component)?;
        Some(CacheKey::from_type(type_name, &[value]))
    }
}

#[derive(Clone, Debug)]
struct FieldPolicy {
    type_name: String,
    key_args: Vec<String>,
}

/// Maps field arguments to keys: `book(isbn: "978-0")` → `Book:978-0`.
///
/// Objects themselves are keyed by the wrapped [`TypePolicyResolver`].
/// A field policy with a single list-valued key argument yields one key
/// per element for list fields (`books(isbns: [..])`).
#[derive(Clone, Debug, Default)]
pub struct FieldPolicyResolver {
    types: TypePolicyResolver,
    fields: HashMap<String, FieldPolicy>,
}

impl FieldPolicyResolver {
    pub fn new(types: TypePolicyResolver) -> Self {
        FieldPolicyResolver {
            types,
            fields: HashMap::new(),
        }
    }

    /// Resolve field `field_name` to `type_name` keyed by the given arguments.
    pub fn with_field<S: Into<String>>(
        mut self,
        field_name: impl Into<String>,
        type_name: impl Into<String>,
        key_args: impl IntoIterator<Item = S>,
    ) -> Self {
        self.fields.insert(
            field_name.into(),
            FieldPolicy {
                type_name: type_name.into(),
                key_args: key_args.into_iter().map(Into::into).collect(),
            },
        );
        self
    }
}

impl IdentityResolver for FieldPolicyResolver {
    fn key_for_object(&self, type_name: &str, object: &Map<String, Value>) -> Option<CacheKey> {
        self.types.key_for_object(type_name, object)
    }

    fn key_for_field(&self, field: &CompiledField, arguments: &Map<String, Value>) -> Option<CacheKey> {
        let policy = self.fields.get(&field.name)?;
        let values = policy
            .key_args
            .iter()
            .map(|a| arguments.get(a).and_then(key_component))
            .collect::<Option<Vec<String>>>()?;
        Some(CacheKey::from_type(&policy.type_name, &values))
    }

    fn keys_for_list_field(
        &self,
        field: &CompiledField,
        arguments: &Map<String, Value>,
    ) -> Option<Vec<CacheKey>> {
        let policy = self.fields.get(&field.name)?;
        let [arg] = policy.key_args.as_slice() else {
            return None;
        };
        let items = arguments.get(arg)?.as_array()?;
        items
            .iter()
            .map(|v| key_component(v).map(|k| CacheKey::from_type(&policy.type_name, &[k])))
            .collect()
    }
}
