//! Cache key management utilities.
//!
//! A [`CacheKey`] is the global identity of a [`Record`](crate::record::Record).
//! Keys are built either from a type name plus discriminating values
//! (`"User:42"`), from a root sentinel (`"QUERY_ROOT"`), or positionally
//! from a parent key and a field storage key (`"QUERY_ROOT.hero({\"episode\":\"JEDI\"})"`).

use crate::error::Result;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::borrow::Borrow;
use std::collections::BTreeMap;
use std::fmt;

/// Global identity string for a record.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey(String);

impl CacheKey {
    /// Sentinel key of the query root object.
    pub const QUERY_ROOT: &'static str = "QUERY_ROOT";
    /// Sentinel key of the mutation root object.
    pub const MUTATION_ROOT: &'static str = "MUTATION_ROOT";
    /// Sentinel key of the subscription root object.
    pub const SUBSCRIPTION_ROOT: &'static str = "SUBSCRIPTION_ROOT";

    pub fn new(key: impl Into<String>) -> Self {
        CacheKey(key.into())
    }

    /// Key of the query root.
    pub fn root() -> Self {
        CacheKey(Self::QUERY_ROOT.to_string())
    }

    /// Build an identity key from a type name and ordered discriminating values.
    ///
    /// `CacheKey::from_type("User", &["42"])` → `"User:42"`.
    pub fn from_type<S: AsRef<str>>(type_name: &str, values: &[S]) -> Self {
        let joined: Vec<&str> = values.iter().map(|v| v.as_ref()).collect();
        CacheKey(format!("{}:{}", type_name, joined.join("+")))
    }

    /// Positional key of a field below this key.
    pub fn child(&self, storage_key: &str) -> Self {
        CacheKey(format!("{}.{}", self.0, storage_key))
    }

    /// Positional key of a list element below this key.
    pub fn index(&self, index: usize) -> Self {
        CacheKey(format!("{}.{}", self.0, index))
    }

    pub fn is_root(&self) -> bool {
        matches!(
            self.0.as_str(),
            Self::QUERY_ROOT | Self::MUTATION_ROOT | Self::SUBSCRIPTION_ROOT
        )
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CacheKey {
    fn from(s: &str) -> Self {
        CacheKey(s.to_string())
    }
}

impl From<String> for CacheKey {
    fn from(s: String) -> Self {
        CacheKey(s)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for CacheKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Key of a single field of a record, as reported in changed-key sets.
///
/// Format: `"<recordKey>.<fieldStorageKey>"`.
pub fn field_key(record_key: &str, field: &str) -> String {
    format!("{}.{}", record_key, field)
}

/// Build the storage key of a field from its name and resolved arguments.
///
/// Argument-less fields are stored under their name. Otherwise the
/// canonical JSON of the arguments is appended: `name({"a":1,"b":"x"})`.
/// Object keys are sorted at every depth so that declaration order never
/// changes the key.
pub fn storage_key(name: &str, arguments: &Map<String, Value>) -> String {
    if arguments.is_empty() {
        return name.to_string();
    }
    let canonical = canonicalize(&Value::Object(arguments.clone()));
    format!("{}({})", name, canonical)
}

/// Rebuild a JSON value with object keys in sorted order.
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<&String, Value> =
                map.iter().map(|(k, v)| (k, canonicalize(v))).collect();
            let mut out = Map::new();
            for (k, v) in sorted {
                out.insert(k.clone(), v);
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// Compile a key pattern with SQL `LIKE` semantics.
///
/// `%` matches any run of characters, `_` matches exactly one, `\` escapes
/// the next character. Matching is case-insensitive and anchored.
pub fn like_pattern(pattern: &str) -> Result<Regex> {
    let mut expr = String::from("(?is)^");
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '%' => expr.push_str(".*"),
            '_' => expr.push('.'),
            '\\' => {
                if let Some(escaped) = chars.next() {
                    expr.push_str(&regex::escape(&escaped.to_string()));
                }
            }
            other => expr.push_str(&regex::escape(&other.to_string())),
        }
    }
    expr.push('$');
    Ok(Regex::new(&expr)?)
}
