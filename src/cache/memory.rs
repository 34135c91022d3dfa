//! In-memory normalized cache with chaining and eviction.
//!
//! Records live in a recency-ordered index: the front is the least recently
//! used entry. Every merge recomputes the written record's encoded size and
//! every read moves the entry to the back. When a bound is exceeded the
//! sweep pops entries from the front until the bound holds again. The sweep
//! works on the index directly and never goes back through `merge`/`read`.

use super::{remove_reachable, CacheHeaders, NormalizedCache, Removed};
use crate::error::{Error, Result};
use crate::key::like_pattern;
use crate::merger::RecordMerger;
use crate::record::{ChangedKeys, Record};
use crate::serialization::encoded_size;
use indexmap::IndexMap;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// Bounds and expiry of a [`MemoryCache`].
///
/// A size bound and an entry-count bound are mutually exclusive.
///
/// # Example
///
/// ```
/// use graph_cache_kit::cache::{MemoryCache, MemoryCacheConfig};
/// use std::time::Duration;
///
/// let config = MemoryCacheConfig::default()
///     .with_max_size_bytes(10 * 1024 * 1024)
///     .with_expire_after_write(Duration::from_secs(3600));
/// let cache = MemoryCache::new(config).unwrap();
/// assert!(cache.is_empty());
///
/// let conflicting = MemoryCacheConfig::default()
///     .with_max_size_bytes(1024)
///     .with_max_entries(10);
/// assert!(MemoryCache::new(conflicting).is_err());
/// ```
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MemoryCacheConfig {
    pub max_size_bytes: Option<usize>,
    pub max_entries: Option<usize>,
    pub expire_after_write: Option<Duration>,
    pub expire_after_access: Option<Duration>,
}

impl MemoryCacheConfig {
    pub fn with_max_size_bytes(mut self, bytes: usize) -> Self {
        self.max_size_bytes = Some(bytes);
        self
    }

    pub fn with_max_entries(mut self, entries: usize) -> Self {
        self.max_entries = Some(entries);
        self
    }

    pub fn with_expire_after_write(mut self, ttl: Duration) -> Self {
        self.expire_after_write = Some(ttl);
        self
    }

    pub fn with_expire_after_access(mut self, ttl: Duration) -> Self {
        self.expire_after_access = Some(ttl);
        self
    }

    /// # Errors
    /// Returns `Error::ConfigError` for conflicting or zero bounds.
    pub fn validate(&self) -> Result<()> {
        if self.max_size_bytes.is_some() && self.max_entries.is_some() {
            return Err(Error::ConfigError(
                "max_size_bytes and max_entries cannot both be set".to_string(),
            ));
        }
        if self.max_size_bytes == Some(0) || self.max_entries == Some(0) {
            return Err(Error::ConfigError("cache bounds must be positive".to_string()));
        }
        if self.expire_after_write == Some(Duration::ZERO)
            || self.expire_after_access == Some(Duration::ZERO)
        {
            return Err(Error::ConfigError("expiry durations must be positive".to_string()));
        }
        Ok(())
    }
}

struct CacheEntry {
    record: Record,
    size: usize,
    written_at: Instant,
    accessed_at: Instant,
}

impl CacheEntry {
    fn new(record: Record, size: usize) -> Self {
        let now = Instant::now();
        CacheEntry {
            record,
            size,
            written_at: now,
            accessed_at: now,
        }
    }

    fn is_expired(&self, config: &MemoryCacheConfig, now: Instant) -> bool {
        config
            .expire_after_write
            .is_some_and(|ttl| now.duration_since(self.written_at) > ttl)
            || config
                .expire_after_access
                .is_some_and(|ttl| now.duration_since(self.accessed_at) > ttl)
    }
}

/// Bounded in-memory layer.
///
/// Merges write through to the chained layer; read misses fall through to
/// it and hits from it are promoted here (without leaving the chained layer).
pub struct MemoryCache {
    config: MemoryCacheConfig,
    entries: IndexMap<String, CacheEntry>,
    total_size: usize,
    next: Option<Box<dyn NormalizedCache>>,
}

impl MemoryCache {
    /// Create a memory cache with the given bounds.
    ///
    /// # Errors
    /// Returns `Error::ConfigError` if the configuration is invalid.
    pub fn new(config: MemoryCacheConfig) -> Result<Self> {
        config.validate()?;
        Ok(MemoryCache {
            config,
            entries: IndexMap::new(),
            total_size: 0,
            next: None,
        })
    }

    /// Memory cache without bounds or expiry.
    pub fn unbounded() -> Self {
        MemoryCache {
            config: MemoryCacheConfig::default(),
            entries: IndexMap::new(),
            total_size: 0,
            next: None,
        }
    }

    /// Attach the layer misses fall through to.
    pub fn chain(mut self, next: impl NormalizedCache + 'static) -> Self {
        self.next = Some(Box::new(next));
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Bytes currently tracked for this layer.
    pub fn total_size(&self) -> usize {
        self.total_size
    }

    pub fn stats(&self) -> CacheStats {
        let now = Instant::now();
        CacheStats {
            total_entries: self.entries.len(),
            expired_entries: self
                .entries
                .values()
                .filter(|e| e.is_expired(&self.config, now))
                .count(),
            total_bytes: self.total_size,
        }
    }

    /// Print cache statistics to debug log.
    pub fn log_stats(&self) {
        let stats = self.stats();
        debug!(
            "Memory cache stats: {} entries ({} expired), {} bytes",
            stats.total_entries, stats.expired_entries, stats.total_bytes
        );
    }

    fn remove_entry(&mut self, key: &str) -> Option<CacheEntry> {
        let entry = self.entries.shift_remove(key)?;
        self.total_size -= entry.size;
        Some(entry)
    }

    fn purge_if_expired(&mut self, key: &str) {
        let now = Instant::now();
        let expired = self
            .entries
            .get(key)
            .is_some_and(|e| e.is_expired(&self.config, now));
        if expired {
            self.remove_entry(key);
            debug!("✓ Memory EXPIRE {}", key);
        }
    }

    /// Insert at the most-recently-used end, replacing any previous entry.
    fn put(&mut self, record: Record, size: usize) {
        let key = record.key.as_str().to_string();
        self.remove_entry(&key);
        self.total_size += size;
        self.entries.insert(key, CacheEntry::new(record, size));
        self.evict_to_bounds();
    }

    fn evict_to_bounds(&mut self) {
        if let Some(max) = self.config.max_size_bytes {
            while self.total_size > max {
                if !self.evict_oldest() {
                    break;
                }
            }
        }
        if let Some(max) = self.config.max_entries {
            while self.entries.len() > max {
                if !self.evict_oldest() {
                    break;
                }
            }
        }
    }

    fn evict_oldest(&mut self) -> bool {
        match self.entries.shift_remove_index(0) {
            Some((key, entry)) => {
                self.total_size -= entry.size;
                debug!("✓ Memory EVICT {} ({} bytes)", key, entry.size);
                true
            }
            None => false,
        }
    }

    fn read_next(&mut self, key: &str, headers: &CacheHeaders) -> Option<Record> {
        let next = self.next.as_mut()?;
        match next.read(key, headers) {
            Ok(record) => record,
            Err(e) => {
                warn!("⚠ Chained cache read failed for {}, treating as miss: {}", key, e);
                None
            }
        }
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl NormalizedCache for MemoryCache {
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
        self.purge_if_expired(&key);

        let existing = match self.entries.get(&key) {
            Some(entry) => Some(entry.record.clone()),
            None => self.read_next(&key, &CacheHeaders::default()),
        };
        let base = existing.unwrap_or_else(|| Record::new(record.key.clone()));
        let (merged, mut changed) = merger.merge(&base, &record, headers.write_timestamp());

        let size = encoded_size(&merged)?;
        if let Some(next) = self.next.as_mut() {
            changed.extend(next.merge(record, headers, merger)?);
        }
        self.put(merged, size);
        debug!("✓ Memory MERGE {} ({} bytes, {} changed)", key, size, changed.len());
        Ok(changed)
    }

    fn read(&mut self, key: &str, headers: &CacheHeaders) -> Result<Option<Record>> {
        self.purge_if_expired(key);

        if let Some(index) = self.entries.get_index_of(key) {
            if let Some((k, mut entry)) = self.entries.shift_remove_index(index) {
                debug!("✓ Memory READ {} -> HIT", key);
                if headers.evict_after_read {
                    self.total_size -= entry.size;
                    return Ok(Some(entry.record));
                }
                entry.accessed_at = Instant::now();
                let record = entry.record.clone();
                self.entries.insert(k, entry);
                return Ok(Some(record));
            }
        }

        debug!("✓ Memory READ {} -> MISS", key);
        let loaded = self.read_next(key, headers);
        if let Some(record) = &loaded {
            if !headers.evict_after_read {
                match encoded_size(record) {
                    Ok(size) => self.put(record.clone(), size),
                    Err(e) => warn!("⚠ Could not promote {}: {}", key, e),
                }
            }
        }
        Ok(loaded)
    }

    fn remove(&mut self, key: &str, cascade: bool) -> Result<Removed> {
        let mut removed = match self.next.as_mut() {
            Some(next) => next.remove(key, cascade)?,
            None => Removed::default(),
        };
        removed.extend(remove_reachable(key, cascade, |k| {
            Ok(self.remove_entry(k).map(|entry| entry.record))
        })?);
        debug!(
            "✓ Memory REMOVE {} (cascade: {}) -> {} removed",
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
        let mut freed = 0;
        self.entries.retain(|key, entry| {
            if regex.is_match(key) {
                freed += entry.size;
                removed.absorb(&entry.record);
                false
            } else {
                true
            }
        });
        self.total_size -= freed;
        debug!("✓ Memory REMOVE_MATCHING {} -> {} removed", pattern, removed.len());
        Ok(removed)
    }

    fn clear(&mut self) -> Result<Removed> {
        let mut removed = match self.next.as_mut() {
            Some(next) => next.clear()?,
            None => Removed::default(),
        };
        for entry in self.entries.values() {
            removed.absorb(&entry.record);
        }
        self.entries.clear();
        self.total_size = 0;
        warn!("⚠ Memory CLEAR executed - all records removed!");
        Ok(removed)
    }

    fn dump(&self) -> Vec<(String, BTreeMap<String, Record>)> {
        let records = self
            .entries
            .iter()
            .map(|(k, e)| (k.clone(), e.record.clone()))
            .collect();
        let mut layers = vec![("MemoryCache".to_string(), records)];
        if let Some(next) = &self.next {
            layers.extend(next.dump());
        }
        layers
    }
}

/// Memory cache statistics.
#[derive(Clone, Debug)]
pub struct CacheStats {
    pub total_entries: usize,
    pub expired_entries: usize,
    pub total_bytes: usize,
}
