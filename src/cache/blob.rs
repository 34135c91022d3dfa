//! Persisted cache layer over a byte-blob store.
//!
//! Each record is stored as one postcard envelope under its key. The blob
//! store is the seam for real persistence; [`InMemoryBlobStore`] is a
//! thread-safe `DashMap` implementation used for tests and as a secondary
//! in-process layer.

use super::{remove_reachable, CacheHeaders, NormalizedCache, Removed};
use crate::error::{Error, Result};
use crate::key::like_pattern;
use crate::merger::RecordMerger;
use crate::record::{ChangedKeys, Record};
use crate::serialization::{decode_record, encode_record};
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Byte storage keyed by record key.
pub trait BlobStore: Send + Sync {
    /// # Errors
    /// Returns `Error::StorageError` if the store is unavailable.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// # Errors
    /// Returns `Error::StorageError` if the write fails.
    fn put(&self, key: &str, bytes: Vec<u8>) -> Result<()>;

    /// Returns whether the key existed.
    ///
    /// # Errors
    /// Returns `Error::StorageError` if the delete fails.
    fn delete(&self, key: &str) -> Result<bool>;

    /// # Errors
    /// Returns `Error::StorageError` if the store is unavailable.
    fn keys(&self) -> Result<Vec<String>>;

    /// # Errors
    /// Returns `Error::StorageError` if the store is unavailable.
    fn clear(&self) -> Result<()>;
}

/// Thread-safe in-process blob store.
///
/// Clones share the same table.
#[derive(Clone, Debug, Default)]
pub struct InMemoryBlobStore {
    table: Arc<DashMap<String, Vec<u8>>>,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.table.contains_key(key)
    }
}

impl BlobStore for InMemoryBlobStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.table.get(key).map(|entry| entry.value().clone()))
    }

    fn put(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
        self.table.insert(key.to_string(), bytes);
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.table.remove(key).is_some())
    }

    fn keys(&self) -> Result<Vec<String>> {
        Ok(self.table.iter().map(|entry| entry.key().clone()).collect())
    }

    fn clear(&self) -> Result<()> {
        self.table.clear();
        Ok(())
    }
}

/// Normalized cache layer that persists records into a [`BlobStore`].
pub struct BlobCache<S: BlobStore> {
    store: S,
    next: Option<Box<dyn NormalizedCache>>,
}

impl<S: BlobStore> BlobCache<S> {
    pub fn new(store: S) -> Self {
        BlobCache { store, next: None }
    }

    pub fn chain(mut self, next: impl NormalizedCache + 'static) -> Self {
        self.next = Some(Box::new(next));
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Load and decode one record. Undecodable blobs are misses.
    fn load(&self, key: &str) -> Result<Option<Record>> {
        let Some(bytes) = self.store.get(key)? else {
            return Ok(None);
        };
        match decode_record(&bytes) {
            Ok(record) => Ok(Some(record)),
            Err(
                e @ (Error::InvalidCacheEntry(_)
                | Error::VersionMismatch { .. }
                | Error::DeserializationError(_)),
            ) => {
                warn!("⚠ Blob for {} is unreadable, treating as miss: {}", key, e);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn take(&self, key: &str) -> Result<Option<Record>> {
        let record = self.load(key)?;
        let existed = self.store.delete(key)?;
        if existed && record.is_none() {
            // Unreadable blob: gone, but no references to follow.
            return Ok(Some(Record::new(key)));
        }
        Ok(record)
    }
}

impl<S: BlobStore> NormalizedCache for BlobCache<S> {
    fn merge(
        &mut self,
        record: Record,
        headers: &CacheHeaders,
        merger: &dyn RecordMerger,
    ) -> Result<ChangedKeys> {
        if headers.do_not_store {
            return Ok(ChangedKeys::new());
        }
        let key = record.key.as_str().to_string();
        let existing = match self.load(&key)? {
            Some(record) => Some(record),
            None => match self.next.as_mut() {
                Some(next) => next.read(&key, &CacheHeaders::default()).unwrap_or_else(|e| {
                    warn!("⚠ Chained cache read failed for {}: {}", key, e);
                    None
                }),
                None => None,
            },
        };
        let base = existing.unwrap_or_else(|| Record::new(record.key.clone()));
        let (merged, mut changed) = merger.merge(&base, &record, headers.write_timestamp());

        let bytes = encode_record(&merged)?;
        let size = bytes.len();
        if let Some(next) = self.next.as_mut() {
            changed.extend(next.merge(record, headers, merger)?);
        }
        self.store.put(&key, bytes)?;
        debug!("✓ Blob MERGE {} ({} bytes)", key, size);
        Ok(changed)
    }

    fn read(&mut self, key: &str, headers: &CacheHeaders) -> Result<Option<Record>> {
        if let Some(record) = self.load(key)? {
            debug!("✓ Blob READ {} -> HIT", key);
            if headers.evict_after_read {
                self.store.delete(key)?;
            }
            return Ok(Some(record));
        }
        debug!("✓ Blob READ {} -> MISS", key);

        let Some(next) = self.next.as_mut() else {
            return Ok(None);
        };
        let loaded = next.read(key, headers).unwrap_or_else(|e| {
            warn!("⚠ Chained cache read failed for {}, treating as miss: {}", key, e);
            None
        });
        if let (Some(record), false) = (&loaded, headers.evict_after_read) {
            match encode_record(record) {
                Ok(bytes) => {
                    if let Err(e) = self.store.put(key, bytes) {
                        warn!("⚠ Could not promote {}: {}", key, e);
                    }
                }
                Err(e) => warn!("⚠ Could not promote {}: {}", key, e),
            }
        }
        Ok(loaded)
    }

    fn remove(&mut self, key: &str, cascade: bool) -> Result<Removed> {
        let mut removed = match self.next.as_mut() {
            Some(next) => next.remove(key, cascade)?,
            None => Removed::default(),
        };
        removed.extend(remove_reachable(key, cascade, |k| self.take(k))?);
        debug!(
            "✓ Blob REMOVE {} (cascade: {}) -> {} removed",
            key,
            cascade,
            removed.len()
        );
        Ok(removed)
    }

    fn remove_matching(&mut self, pattern: &str) -> Result<Removed> {
        let regex = like_pattern(pattern)?;
        let mut removed = match self.next.as_mut() {
            Some(next) => next.remove_matching(pattern)?,
            None => Removed::default(),
        };
        for key in self.store.keys()? {
            if !regex.is_match(&key) {
                continue;
            }
            if let Some(record) = self.take(&key)? {
                removed.absorb(&record);
            }
        }
        debug!("✓ Blob REMOVE_MATCHING {} -> {} removed", pattern, removed.len());
        Ok(removed)
    }

    fn clear(&mut self) -> Result<Removed> {
        let mut removed = match self.next.as_mut() {
            Some(next) => next.clear()?,
            None => Removed::default(),
        };
        for key in self.store.keys()? {
            let record = self.load(&key)?.unwrap_or_else(|| Record::new(key));
            removed.absorb(&record);
        }
        self.store.clear()?;
        warn!("⚠ Blob CLEAR executed - all records removed!");
        Ok(removed)
    }

    fn dump(&self) -> Vec<(String, BTreeMap<String, Record>)> {
        let mut records = BTreeMap::new();
        match self.store.keys() {
            Ok(keys) => {
                for key in keys {
                    if let Ok(Some(record)) = self.load(&key) {
                        records.insert(key, record);
                    }
                }
            }
            Err(e) => warn!("⚠ Blob dump failed: {}", e),
        }
        let mut layers = vec![("BlobCache".to_string(), records)];
        if let Some(next) = &self.next {
            layers.extend(next.dump());
        }
        layers
    }
}
