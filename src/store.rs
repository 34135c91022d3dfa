//! Store façade: cache chain, optimistic overlay and watchers behind one lock.

use crate::cache::{CacheHeaders, NormalizedCache, Removed};
use crate::error::{Error, Result};
use crate::key::CacheKey;
use crate::merger::{DefaultRecordMerger, RecordMerger};
use crate::normalizer::{normalize, MetadataGenerator, Policies};
use crate::observability::{CacheMetrics, NoOpMetrics};
use crate::optimistic::OptimisticCache;
use crate::reader::CacheReader;
use crate::record::{ChangedKeys, MutationId, Record};
use crate::resolver::IdentityResolver;
use crate::scalar::ScalarAdapters;
use crate::selection::Operation;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::Mutex;

/// Identifier of one watcher registration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WatcherId(u64);

impl fmt::Display for WatcherId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "watcher-{}", self.0)
    }
}

/// Receiving end of a watcher registration.
///
/// Every changed-key set published by the store arrives here, in the order
/// the writes were applied. Sets may name fields whose value did not
/// actually change.
#[derive(Debug)]
pub struct Subscription {
    id: WatcherId,
    receiver: UnboundedReceiver<ChangedKeys>,
}

impl Subscription {
    pub fn id(&self) -> WatcherId {
        self.id
    }

    /// Wait for the next changed-key set. `None` once unsubscribed.
    pub async fn recv(&mut self) -> Option<ChangedKeys> {
        self.receiver.recv().await
    }

    /// Next changed-key set if one is already queued.
    pub fn try_recv(&mut self) -> Option<ChangedKeys> {
        self.receiver.try_recv().ok()
    }
}

struct StoreInner {
    cache: Box<dyn NormalizedCache>,
    optimistic: OptimisticCache,
    watchers: Vec<(WatcherId, UnboundedSender<ChangedKeys>)>,
    next_watcher: u64,
}

impl StoreInner {
    /// Deliver `changed` to every live watcher, dropping closed ones.
    fn publish(&mut self, changed: &ChangedKeys) {
        if changed.is_empty() {
            return;
        }
        self.watchers
            .retain(|(id, sender)| match sender.send(changed.clone()) {
                Ok(()) => true,
                Err(_) => {
                    debug!("Dropping closed {}", id);
                    false
                }
            });
    }

    /// Announce what a removal took out of the journals and the cache.
    ///
    /// Journals are gone even when the cache fails, so their fields are
    /// announced before the error is returned.
    fn settle_removal(&mut self, journaled: Removed, result: Result<Removed>) -> Result<Removed> {
        let mut removed = journaled;
        let outcome = result.map(|committed| removed.extend(committed));
        self.publish(&removed.changed);
        outcome.map(|()| removed)
    }
}

struct StoreConfig {
    policies: Policies,
    merger: Arc<dyn RecordMerger>,
    metrics: Arc<dyn CacheMetrics>,
}

/// Normalized cache shared by every operation of a client.
///
/// `Store` is `Clone`; clones share the same cache (cheap, just an `Arc`
/// increment). All bookkeeping runs under one async mutex, held only for
/// the in-memory work of each call and never across network I/O.
///
/// # Example
///
/// ```
/// use graph_cache_kit::cache::{CacheHeaders, MemoryCache};
/// use graph_cache_kit::selection::{CompiledField, CompiledType, Operation};
/// use graph_cache_kit::Store;
/// use serde_json::json;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> graph_cache_kit::Result<()> {
/// let store = Store::new(MemoryCache::unbounded());
/// let op = Operation::query("Hello", vec![CompiledField::new("hello", CompiledType::scalar("String")).into()]);
///
/// let data = json!({"hello": "world"});
/// let changed = store.write(&op, data.as_object().unwrap(), &CacheHeaders::default()).await?;
/// assert!(changed.contains("QUERY_ROOT.hello"));
///
/// let read = store.read_operation(&op, &CacheHeaders::default()).await?;
/// assert_eq!(serde_json::Value::Object(read), data);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Store {
    inner: Arc<Mutex<StoreInner>>,
    config: Arc<StoreConfig>,
}

impl Store {
    /// Store over `cache` with default policies.
    pub fn new(cache: impl NormalizedCache + 'static) -> Self {
        Store::from_parts(
            Box::new(cache),
            StoreConfig {
                policies: Policies::default(),
                merger: Arc::new(DefaultRecordMerger),
                metrics: Arc::new(NoOpMetrics),
            },
        )
    }

    pub fn builder() -> StoreBuilder {
        StoreBuilder::default()
    }

    fn from_parts(cache: Box<dyn NormalizedCache>, config: StoreConfig) -> Self {
        Store {
            inner: Arc::new(Mutex::new(StoreInner {
                cache,
                optimistic: OptimisticCache::new(),
                watchers: Vec::new(),
                next_watcher: 0,
            })),
            config: Arc::new(config),
        }
    }

    pub fn policies(&self) -> &Policies {
        &self.config.policies
    }

    /// Normalize `data` for `operation` and merge it under the operation root.
    ///
    /// Watchers are notified of the changed set before this returns.
    ///
    /// # Errors
    /// Returns `Error::NormalizationError` for data that does not fit the
    /// selections, or the error of a cache layer that failed to persist.
    pub async fn write(
        &self,
        operation: &Operation,
        data: &Map<String, Value>,
        headers: &CacheHeaders,
    ) -> Result<ChangedKeys> {
        self.write_at(operation, &operation.root_key(), data, headers)
            .await
    }

    /// Like [`write`](Self::write) with the selections rooted at `key`.
    ///
    /// # Errors
    /// Same as [`write`](Self::write).
    pub async fn write_fragment(
        &self,
        fragment: &Operation,
        key: &CacheKey,
        data: &Map<String, Value>,
        headers: &CacheHeaders,
    ) -> Result<ChangedKeys> {
        self.write_at(fragment, key, data, headers).await
    }

    async fn write_at(
        &self,
        operation: &Operation,
        root_key: &CacheKey,
        data: &Map<String, Value>,
        headers: &CacheHeaders,
    ) -> Result<ChangedKeys> {
        let start = Instant::now();
        let records = normalize(operation, data, root_key, &self.config.policies)?;

        let mut inner = self.inner.lock().await;
        let mut changed = ChangedKeys::new();
        let mut failure = None;
        for record in records {
            match inner.cache.merge(record, headers, self.config.merger.as_ref()) {
                Ok(keys) => changed.extend(keys),
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }
        // Records merged before a failure stay merged and are announced.
        inner.publish(&changed);
        drop(inner);

        if let Some(e) = failure {
            error!(
                "Cache write for {} failed after {} changed fields: {}",
                operation.name,
                changed.len(),
                e
            );
            self.config
                .metrics
                .record_error(root_key.as_str(), &e.to_string());
            return Err(e);
        }

        self.config
            .metrics
            .record_write(&operation.name, changed.len(), start.elapsed());
        Ok(changed)
    }

    /// Denormalize `operation`'s selections from `root_key`.
    ///
    /// Failing cache layers are logged and read as misses.
    ///
    /// # Errors
    /// Returns `Error::CacheMiss` when any selected path is missing.
    pub async fn read(
        &self,
        operation: &Operation,
        root_key: &CacheKey,
        headers: &CacheHeaders,
    ) -> Result<Map<String, Value>> {
        let start = Instant::now();
        let metrics = &self.config.metrics;
        let mut guard = self.inner.lock().await;
        let StoreInner {
            cache, optimistic, ..
        } = &mut *guard;

        let mut load = |key: &str| {
            let committed = match cache.read(key, headers) {
                Ok(record) => record,
                Err(e) => {
                    warn!("⚠ Cache read of {} failed, treating as miss: {}", key, e);
                    metrics.record_error(key, &e.to_string());
                    None
                }
            };
            optimistic.overlay(key, committed)
        };
        let result = CacheReader::new(operation, &self.config.policies, headers, &mut load)
            .read(operation, root_key);
        drop(guard);

        match &result {
            Ok(_) => metrics.record_hit(&operation.name, start.elapsed()),
            Err(e) if e.is_cache_miss() => {
                debug!("Read of {} missed: {}", operation.name, e);
                metrics.record_miss(&operation.name, start.elapsed());
            }
            Err(e) => metrics.record_error(root_key.as_str(), &e.to_string()),
        }
        result
    }

    /// [`read`](Self::read) from the operation's own root.
    ///
    /// # Errors
    /// Same as [`read`](Self::read).
    pub async fn read_operation(
        &self,
        operation: &Operation,
        headers: &CacheHeaders,
    ) -> Result<Map<String, Value>> {
        self.read(operation, &operation.root_key(), headers).await
    }

    /// Visible record at `key`, optimistic writes included.
    pub async fn read_record(&self, key: &str) -> Option<Record> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        let committed = inner
            .cache
            .read(key, &CacheHeaders::default())
            .unwrap_or_else(|e| {
                warn!("⚠ Cache read of {} failed, treating as miss: {}", key, e);
                None
            });
        inner.optimistic.overlay(key, committed)
    }

    /// Remove `key` (and with `cascade` everything it reaches) from every
    /// layer, optimistic journals included.
    ///
    /// Watchers are notified of the removed fields. Returns whether `key`
    /// existed anywhere.
    ///
    /// # Errors
    /// Returns the error of a cache layer that failed to delete.
    pub async fn remove(&self, key: &str, cascade: bool) -> Result<bool> {
        let start = Instant::now();
        let mut inner = self.inner.lock().await;
        let journaled = inner.optimistic.remove(key, cascade);
        let result = inner.cache.remove(key, cascade);
        let removed = inner.settle_removal(journaled, result)?;
        drop(inner);
        self.config.metrics.record_remove(key, start.elapsed());
        Ok(removed.contains(key))
    }

    /// Remove every record whose key matches a `LIKE` pattern.
    ///
    /// Watchers are notified of the removed fields. Returns the number of
    /// distinct keys removed.
    ///
    /// # Errors
    /// Returns `Error::ConfigError` for an invalid pattern, or the error of
    /// a failing layer.
    pub async fn remove_matching(&self, pattern: &str) -> Result<usize> {
        let start = Instant::now();
        let mut inner = self.inner.lock().await;
        let journaled = inner.optimistic.remove_matching(pattern)?;
        let result = inner.cache.remove_matching(pattern);
        let removed = inner.settle_removal(journaled, result)?;
        drop(inner);
        self.config.metrics.record_remove(pattern, start.elapsed());
        Ok(removed.len())
    }

    /// Drop every record and every optimistic journal.
    ///
    /// Watchers are notified of every field that was visible.
    ///
    /// # Errors
    /// Returns the error of a layer that failed to clear.
    pub async fn clear(&self) -> Result<()> {
        let start = Instant::now();
        let mut inner = self.inner.lock().await;
        let journaled = inner.optimistic.clear();
        let result = inner.cache.clear();
        inner.settle_removal(journaled, result)?;
        drop(inner);
        self.config.metrics.record_remove("%", start.elapsed());
        Ok(())
    }

    /// Register a watcher.
    pub async fn subscribe(&self) -> Subscription {
        let (sender, receiver) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock().await;
        let id = WatcherId(inner.next_watcher);
        inner.next_watcher += 1;
        inner.watchers.push((id, sender));
        debug!("Registered {}", id);
        Subscription { id, receiver }
    }

    /// Returns whether the watcher was registered.
    pub async fn unsubscribe(&self, id: WatcherId) -> bool {
        let mut inner = self.inner.lock().await;
        let before = inner.watchers.len();
        inner.watchers.retain(|(watcher, _)| *watcher != id);
        before != inner.watchers.len()
    }

    /// Notify watchers of `changed`. Empty sets are not delivered.
    pub async fn publish(&self, changed: &ChangedKeys) {
        self.inner.lock().await.publish(changed);
    }

    /// Write `data` as tentative records of mutation `id`.
    ///
    /// Nothing reaches the cache chain; reads see the records until
    /// [`rollback_optimistic`](Self::rollback_optimistic) is called.
    ///
    /// # Errors
    /// Returns `Error::NormalizationError` for data that does not fit the selections.
    pub async fn write_optimistic(
        &self,
        operation: &Operation,
        data: &Map<String, Value>,
        id: MutationId,
    ) -> Result<ChangedKeys> {
        let start = Instant::now();
        let records = normalize(operation, data, &operation.root_key(), &self.config.policies)?;

        let mut inner = self.inner.lock().await;
        let mut changed = ChangedKeys::new();
        for record in records {
            changed.extend(inner.optimistic.merge_optimistic(record.with_mutation_id(id)));
        }
        inner.publish(&changed);
        drop(inner);

        self.config
            .metrics
            .record_write(&operation.name, changed.len(), start.elapsed());
        Ok(changed)
    }

    /// Undo every optimistic write of mutation `id`. Unknown ids are a no-op.
    pub async fn rollback_optimistic(&self, id: MutationId) -> ChangedKeys {
        let mut inner = self.inner.lock().await;
        let changed = inner.optimistic.rollback(id);
        inner.publish(&changed);
        changed
    }

    /// Records of every layer, the optimistic overlay first.
    pub async fn dump(&self) -> Vec<(String, BTreeMap<String, Record>)> {
        let inner = self.inner.lock().await;
        let mut layers = vec![("OptimisticCache".to_string(), inner.optimistic.dump())];
        layers.extend(inner.cache.dump());
        layers
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("policies", &self.config.policies)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Store`].
///
/// A cache chain is required; every strategy has a default.
///
/// ```
/// use graph_cache_kit::cache::{BlobCache, InMemoryBlobStore, MemoryCache, MemoryCacheConfig};
/// use graph_cache_kit::resolver::TypePolicyResolver;
/// use graph_cache_kit::Store;
///
/// let cache = MemoryCache::new(MemoryCacheConfig::default().with_max_entries(10_000))
///     .unwrap()
///     .chain(BlobCache::new(InMemoryBlobStore::new()));
/// let store = Store::builder()
///     .cache(cache)
///     .identity_resolver(TypePolicyResolver::new().with_fallback_field("id"))
///     .build()
///     .unwrap();
/// # let _ = store;
///
/// assert!(Store::builder().build().is_err());
/// ```
#[derive(Default)]
pub struct StoreBuilder {
    cache: Option<Box<dyn NormalizedCache>>,
    policies: Policies,
    merger: Option<Arc<dyn RecordMerger>>,
    metrics: Option<Arc<dyn CacheMetrics>>,
}

impl StoreBuilder {
    pub fn cache(mut self, cache: impl NormalizedCache + 'static) -> Self {
        self.cache = Some(Box::new(cache));
        self
    }

    pub fn identity_resolver(mut self, resolver: impl IdentityResolver + 'static) -> Self {
        self.policies.identity_resolver = Arc::new(resolver);
        self
    }

    pub fn record_merger(mut self, merger: impl RecordMerger + 'static) -> Self {
        self.merger = Some(Arc::new(merger));
        self
    }

    pub fn metadata_generator(mut self, generator: impl MetadataGenerator + 'static) -> Self {
        self.policies.metadata_generator = Arc::new(generator);
        self
    }

    /// Types whose objects are stored inline instead of as records.
    pub fn embedded_types<S: Into<String>>(mut self, types: impl IntoIterator<Item = S>) -> Self {
        self.policies
            .embedded_types
            .extend(types.into_iter().map(Into::into));
        self
    }

    pub fn scalar_adapters(mut self, adapters: ScalarAdapters) -> Self {
        self.policies.scalar_adapters = adapters;
        self
    }

    pub fn metrics(mut self, metrics: impl CacheMetrics + 'static) -> Self {
        self.metrics = Some(Arc::new(metrics));
        self
    }

    /// # Errors
    /// Returns `Error::ConfigError` when no cache was given.
    pub fn build(self) -> Result<Store> {
        let cache = self
            .cache
            .ok_or_else(|| Error::ConfigError("a store needs a cache".to_string()))?;
        Ok(Store::from_parts(
            cache,
            StoreConfig {
                policies: self.policies,
                merger: self.merger.unwrap_or_else(|| Arc::new(DefaultRecordMerger)),
                metrics: self.metrics.unwrap_or_else(|| Arc::new(NoOpMetrics)),
            },
        ))
    }
}
