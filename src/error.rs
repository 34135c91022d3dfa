//! Error types for the normalized cache.

use std::fmt;

/// Result type for cache operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the normalized cache.
///
/// All store, cache and fetch operations return `Result<T>`.
/// Different error variants represent different failure modes:
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// Cache miss: a record, a field or a referenced record was not found.
    ///
    /// Not an exceptional condition. Reads return it when the cache cannot
    /// fully satisfy a selection tree, and fetch policies use it to decide
    /// whether to fall back to the network.
    CacheMiss {
        /// Key of the record being read
        key: String,
        /// Field storage key that could not be resolved, if the record itself was found
        field: Option<String>,
    },

    /// Configuration error detected at construction time.
    ///
    /// Common causes:
    /// - Both a size bound and an entry-count bound on one `MemoryCache`
    /// - A zero-sized bound
    /// - A `StoreBuilder` without a cache
    ///
    /// **Recovery:** Fix configuration and rebuild.
    ConfigError(String),

    /// Underlying persistence failure (blob table unavailable, write rejected).
    ///
    /// Read paths downgrade this to a `CacheMiss` after logging it.
    /// Write paths report it to the caller.
    StorageError(String),

    /// Serialization failed when encoding a record for storage.
    SerializationError(String),

    /// Deserialization failed when decoding a stored record.
    ///
    /// **Recovery:** The entry should be removed and refetched.
    DeserializationError(String),

    /// Invalid stored entry: corrupted envelope or bad magic.
    InvalidCacheEntry(String),

    /// Schema version mismatch between code and stored records.
    VersionMismatch {
        /// Expected schema version (from compiled code)
        expected: u32,
        /// Found schema version (from stored entry)
        found: u32,
    },

    /// Opaque transport failure coming from the network layer.
    ///
    /// Fetch policies propagate it unchanged or fall back on it.
    NetworkError(String),

    /// Response data does not match the shape of the selection tree.
    NormalizationError(String),

    /// Generic error with custom message.
    Other(String),
}

impl Error {
    /// Build a miss for a whole record.
    pub fn record_miss(key: impl Into<String>) -> Self {
        Error::CacheMiss {
            key: key.into(),
            field: None,
        }
    }

    /// Build a miss for one field of a record.
    pub fn field_miss(key: impl Into<String>, field: impl Into<String>) -> Self {
        Error::CacheMiss {
            key: key.into(),
            field: Some(field.into()),
        }
    }

    pub fn is_cache_miss(&self) -> bool {
        matches!(self, Error::CacheMiss { .. })
    }

    /// Whether this error comes from the storage boundary (persistence or codec).
    pub fn is_storage(&self) -> bool {
        matches!(
            self,
            Error::StorageError(_)
                | Error::SerializationError(_)
                | Error::DeserializationError(_)
                | Error::InvalidCacheEntry(_)
                | Error::VersionMismatch { .. }
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::CacheMiss { key, field: None } => write!(f, "Cache miss: no record for {}", key),
            Error::CacheMiss {
                key,
                field: Some(field),
            } => write!(f, "Cache miss: no field {} on {}", field, key),
            Error::ConfigError(msg) => write!(f, "Config error: {}", msg),
            Error::StorageError(msg) => write!(f, "Storage error: {}", msg),
            Error::SerializationError(msg) => write!(f, "Serialization error: {}", msg),
            Error::DeserializationError(msg) => write!(f, "Deserialization error: {}", msg),
            Error::InvalidCacheEntry(msg) => {
                write!(f, "Invalid cache entry: {}", msg)
            }
            Error::VersionMismatch { expected, found } => {
                write!(
                    f,
                    "Cache version mismatch: expected {}, found {}",
                    expected, found
                )
            }
            Error::NetworkError(msg) => write!(f, "Network error: {}", msg),
            Error::NormalizationError(msg) => write!(f, "Normalization error: {}", msg),
            Error::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

// ============================================================================
// Conversions from other error types
// ============================================================================

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        if e.is_io() {
            Error::StorageError(e.to_string())
        } else if e.is_syntax() || e.is_eof() {
            Error::DeserializationError(e.to_string())
        } else {
            Error::SerializationError(e.to_string())
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::StorageError(e.to_string())
    }
}

impl From<regex::Error> for Error {
    fn from(e: regex::Error) -> Self {
        Error::ConfigError(format!("invalid pattern: {}", e))
    }
}

impl From<String> for Error {
    fn from(e: String) -> Self {
        Error::Other(e)
    }
}

impl From<&str> for Error {
    fn from(e: &str) -> Self {
        Error::Other(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::ConfigError("Test".to_string());
        assert_eq!(err.to_string(), "Config error: Test");
    }

    #[test]
    fn test_cache_miss_display() {
        assert_eq!(
            Error::record_miss("User:1").to_string(),
            "Cache miss: no record for User:1"
        );
        assert_eq!(
            Error::field_miss("User:1", "name").to_string(),
            "Cache miss: no field name on User:1"
        );
    }

    #[test]
    fn test_error_from_string() {
        let err: Error = "test error".into();
        assert!(matches!(err, Error::Other(_)));
    }

    #[test]
    fn test_error_classification() {
        assert!(Error::record_miss("k").is_cache_miss());
        assert!(Error::StorageError("disk".into()).is_storage());
        assert!(Error::VersionMismatch {
            expected: 1,
            found: 2
        }
        .is_storage());
        assert!(!Error::NetworkError("down".into()).is_storage());
    }
}
