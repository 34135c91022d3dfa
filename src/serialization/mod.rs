//! Postcard-based record serialization with versioned envelopes.
//!
//! Persisted cache layers store one blob per record key. Every blob follows
//! this format:
//! ```text
//! ┌─────────────────┬─────────────────┬──────────────────────────┐
//! │  MAGIC (4 bytes)│VERSION (varint) │POSTCARD PAYLOAD (N bytes)│
//! └─────────────────┴─────────────────┴──────────────────────────┘
//!   "GCKR"              u32                postcard::to_allocvec(Record)
//! ```
//!
//! `FieldValue` is an enum, so the payload carries a variant tag for every
//! value: scalars, references, lists and embedded objects survive a round
//! trip unchanged. Cascading deletes on a persisted layer rely on this to
//! rediscover outgoing references.
//!
//! The in-memory layer uses [`encoded_size`] for its byte accounting.

use crate::error::{Error, Result};
use crate::record::Record;
use serde::{Deserialize, Serialize};

/// Magic header for stored records: b"GCKR"
pub const CACHE_MAGIC: [u8; 4] = *b"GCKR";

/// Current record schema version.
///
/// **CRITICAL:** Increment when `Record` or `FieldValue` change shape.
/// Blobs written with another version are rejected and read as misses.
pub const CURRENT_SCHEMA_VERSION: u32 = 2;

/// Versioned envelope for stored records.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CacheEnvelope<T> {
    /// Magic header: must be b"GCKR"
    pub magic: [u8; 4],
    /// Schema version: must match CURRENT_SCHEMA_VERSION
    pub version: u32,
    pub payload: T,
}

impl<T> CacheEnvelope<T> {
    pub fn new(payload: T) -> Self {
        Self {
            magic: CACHE_MAGIC,
            version: CURRENT_SCHEMA_VERSION,
            payload,
        }
    }
}

/// Serialize a value with envelope for storage.
///
/// # Errors
///
/// Returns `Error::SerializationError` if Postcard serialization fails.
pub fn serialize_for_cache<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let envelope = CacheEnvelope::new(value);
    postcard::to_allocvec(&envelope).map_err(|e| {
        log::error!("Record serialization failed: {}", e);
        Error::SerializationError(e.to_string())
    })
}

/// Deserialize a value from storage with validation.
///
/// # Errors
///
/// - `Error::InvalidCacheEntry`: Invalid magic header
/// - `Error::VersionMismatch`: Schema version mismatch
/// - `Error::DeserializationError`: Corrupted Postcard payload
pub fn deserialize_from_cache<'de, T: Deserialize<'de>>(bytes: &'de [u8]) -> Result<T> {
    let envelope: CacheEnvelope<T> = postcard::from_bytes(bytes).map_err(|e| {
        log::error!("Record deserialization failed: {}", e);
        Error::DeserializationError(e.to_string())
    })?;

    if envelope.magic != CACHE_MAGIC {
        log::warn!(
            "Invalid cache entry: expected magic {:?}, got {:?}",
            CACHE_MAGIC,
            envelope.magic
        );
        return Err(Error::InvalidCacheEntry(format!(
            "Invalid magic: expected {:?}, got {:?}",
            CACHE_MAGIC, envelope.magic
        )));
    }

    if envelope.version != CURRENT_SCHEMA_VERSION {
        log::warn!(
            "Cache version mismatch: expected {}, got {}",
            CURRENT_SCHEMA_VERSION,
            envelope.version
        );
        return Err(Error::VersionMismatch {
            expected: CURRENT_SCHEMA_VERSION,
            found: envelope.version,
        });
    }

    Ok(envelope.payload)
}

pub fn encode_record(record: &Record) -> Result<Vec<u8>> {
    serialize_for_cache(record)
}

pub fn decode_record(bytes: &[u8]) -> Result<Record> {
    deserialize_from_cache(bytes)
}

/// Encoded byte size of a record, envelope included.
pub fn encoded_size(record: &Record) -> Result<usize> {
    encode_record(record).map(|bytes| bytes.len())
}
