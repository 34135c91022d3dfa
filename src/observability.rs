//! Metrics hooks for store operations.
//!
//! Implement [`CacheMetrics`] to feed store activity into your monitoring
//! system and hand it to [`StoreBuilder::metrics`](crate::store::StoreBuilder::metrics):
//!
//! ```ignore
//! use graph_cache_kit::observability::CacheMetrics;
//! use std::time::Duration;
//!
//! struct PrometheusMetrics;
//!
//! impl CacheMetrics for PrometheusMetrics {
//!     fn record_hit(&self, _operation: &str, _duration: Duration) {
//!         // counter!("graph_cache_hits").inc();
//!     }
//!     // ... implement other methods
//! }
//!
//! // let store = Store::builder()
//! //     .cache(MemoryCache::unbounded())
//! //     .metrics(PrometheusMetrics)
//! //     .build()?;
//! ```
//!
//! The default methods log through the `log` crate. [`NoOpMetrics`], the
//! store default, discards everything.
//!
//! | Method | Called when |
//! |--------|-------------|
//! | `record_hit` | an operation read was fully satisfied by the cache |
//! | `record_miss` | an operation read failed with a cache miss |
//! | `record_write` | records were merged (regular or optimistic) |
//! | `record_remove` | a remove, pattern remove or clear ran |
//! | `record_error` | a cache layer failed; reads absorb it as a miss |

use std::time::Duration;

/// Trait for store metrics collection.
pub trait CacheMetrics: Send + Sync {
    /// Record an operation read served from the cache.
    fn record_hit(&self, operation: &str, duration: Duration) {
        debug!("Cache HIT: {} took {:?}", operation, duration);
    }

    /// Record an operation read that missed.
    fn record_miss(&self, operation: &str, duration: Duration) {
        debug!("Cache MISS: {} took {:?}", operation, duration);
    }

    /// Record a write and how many field paths it changed.
    fn record_write(&self, operation: &str, changed: usize, duration: Duration) {
        debug!(
            "Cache WRITE: {} changed {} fields, took {:?}",
            operation, changed, duration
        );
    }

    /// Record a removal.
    fn record_remove(&self, key: &str, duration: Duration) {
        debug!("Cache REMOVE: {} took {:?}", key, duration);
    }

    /// Record a layer failure.
    fn record_error(&self, key: &str, error: &str) {
        warn!("Cache ERROR for {}: {}", key, error);
    }
}

/// Default metrics implementation (no-op).
#[derive(Clone, Copy, Debug, Default)]
pub struct NoOpMetrics;

impl CacheMetrics for NoOpMetrics {
    fn record_hit(&self, _operation: &str, _duration: Duration) {}
    fn record_miss(&self, _operation: &str, _duration: Duration) {}
    fn record_write(&self, _operation: &str, _changed: usize, _duration: Duration) {}
    fn record_remove(&self, _key: &str, _duration: Duration) {}
    fn record_error(&self, _key: &str, _error: &str) {}
}
