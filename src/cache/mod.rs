//! Normalized cache layers.

use crate::error::Result;
use crate::key::CacheKey;
use crate::merger::RecordMerger;
use crate::record::{unix_now, ChangedKeys, Record};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::time::Duration;

pub mod blob;
pub mod memory;

pub use blob::{BlobCache, BlobStore, InMemoryBlobStore};
pub use memory::{CacheStats, MemoryCache, MemoryCacheConfig};

/// Per-operation cache options.
///
/// # Example
///
/// ```
/// use graph_cache_kit::cache::CacheHeaders;
/// use std::time::Duration;
///
/// let headers = CacheHeaders::default()
///     .track_freshness()
///     .max_stale(Duration::from_secs(60));
/// assert!(headers.track_freshness);
/// ```
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CacheHeaders {
    /// Remove each record right after it was read.
    pub evict_after_read: bool,
    /// Make merges a no-op: nothing written, nothing reported changed.
    pub do_not_store: bool,
    /// Stamp written fields with the write time.
    pub track_freshness: bool,
    /// Treat fields written longer ago than this as missing on read.
    pub max_stale: Option<Duration>,
}

impl CacheHeaders {
    pub fn evict_after_read(mut self) -> Self {
        self.evict_after_read = true;
        self
    }

    pub fn do_not_store(mut self) -> Self {
        self.do_not_store = true;
        self
    }

    pub fn track_freshness(mut self) -> Self {
        self.track_freshness = true;
        self
    }

    pub fn max_stale(mut self, max_stale: Duration) -> Self {
        self.max_stale = Some(max_stale);
        self
    }

    /// Timestamp to stamp on written fields, if freshness is tracked.
    pub fn write_timestamp(&self) -> Option<i64> {
        self.track_freshness.then(unix_now)
    }
}

/// Records taken out of the cache by one removal.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Removed {
    /// Keys of the removed records.
    pub keys: BTreeSet<String>,
    /// Field paths the removed records held, as watchers see them.
    pub changed: ChangedKeys,
}

impl Removed {
    /// Account for one removed record.
    pub fn absorb(&mut self, record: &Record) {
        self.keys.insert(record.key.as_str().to_string());
        self.changed.extend(record.field_keys());
    }

    pub fn extend(&mut self, other: Removed) {
        self.keys.extend(other.keys);
        self.changed.extend(other.changed);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    /// Number of distinct records removed.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Key→record storage with merge/read/remove operations.
///
/// Layers may chain to a `next` layer: merges write through, read misses
/// fall through. Methods take `&mut self`; the owning store serializes all
/// access behind one lock.
pub trait NormalizedCache: Send {
    /// Merge one record, returning the changed field paths.
    ///
    /// A chained layer is written before this one, so a failed merge leaves
    /// this layer untouched.
    ///
    /// # Errors
    /// Returns `Err` when this layer or a chained layer fails to persist.
    fn merge(
        &mut self,
        record: Record,
        headers: &CacheHeaders,
        merger: &dyn RecordMerger,
    ) -> Result<ChangedKeys>;

    /// Merge several records in order.
    ///
    /// # Errors
    /// Returns `Err` when this layer or a chained layer fails to persist.
    /// Records before the failing one stay merged.
    fn merge_many(
        &mut self,
        records: Vec<Record>,
        headers: &CacheHeaders,
        merger: &dyn RecordMerger,
    ) -> Result<ChangedKeys> {
        let mut changed = ChangedKeys::new();
        for record in records {
            changed.extend(self.merge(record, headers, merger)?);
        }
        Ok(changed)
    }

    /// Read one record.
    ///
    /// # Errors
    /// Returns `Err` if this layer's storage fails. Callers on read paths
    /// treat that as a miss.
    fn read(&mut self, key: &str, headers: &CacheHeaders) -> Result<Option<Record>>;

    /// Read several records. Only found keys are returned.
    ///
    /// # Errors
    /// Returns `Err` if this layer's storage fails.
    fn read_many(&mut self, keys: &[CacheKey], headers: &CacheHeaders) -> Result<Vec<Record>> {
        let mut found = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(record) = self.read(key.as_str(), headers)? {
                found.push(record);
            }
        }
        Ok(found)
    }

    /// Remove a record; with `cascade`, also every record reachable from it.
    ///
    /// The target existed in some layer iff `Removed::contains(key)`.
    ///
    /// # Errors
    /// Returns `Err` if a layer fails to delete.
    fn remove(&mut self, key: &str, cascade: bool) -> Result<Removed>;

    /// Remove every record whose key matches a `LIKE` pattern.
    ///
    /// # Errors
    /// Returns `Err` for an invalid pattern or a failing layer.
    fn remove_matching(&mut self, pattern: &str) -> Result<Removed>;

    /// Remove everything from this layer and the chained ones.
    ///
    /// # Errors
    /// Returns `Err` if a layer fails to clear.
    fn clear(&mut self) -> Result<Removed>;

    /// Records per layer, for diagnostics.
    fn dump(&self) -> Vec<(String, BTreeMap<String, Record>)>;
}

/// Remove `root` and, with `cascade`, every record reachable from it.
///
/// `take` removes one record from the layer and returns it. Keys already
/// visited in this call are never revisited, so reference cycles terminate.
/// Nothing is removed when `root` does not exist.
pub(crate) fn remove_reachable<F>(root: &str, cascade: bool, mut take: F) -> Result<Removed>
where
    F: FnMut(&str) -> Result<Option<Record>>,
{
    let mut removed = Removed::default();
    let Some(record) = take(root)? else {
        return Ok(removed);
    };
    removed.absorb(&record);
    if !cascade {
        return Ok(removed);
    }

    let mut visited: HashSet<String> = HashSet::new();
    visited.insert(root.to_string());
    let mut pending: Vec<CacheKey> = record.references();

    while let Some(key) = pending.pop() {
        if !visited.insert(key.as_str().to_string()) {
            continue;
        }
        if let Some(record) = take(key.as_str())? {
            debug!("Cascade removed {}", key);
            pending.extend(record.references());
            removed.absorb(&record);
        }
    }
    Ok(removed)
}
