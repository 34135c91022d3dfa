//! # graph-cache-kit
//!
//! A normalized response cache for GraphQL clients.
//!
//! Responses are flattened into keyed [`Record`]s linked by reference, so
//! overlapping queries and mutations observe and update the same entities.
//!
//! ## Features
//!
//! - **Normalization:** pluggable object identity ([`resolver`]), embedded
//!   types, pagination-aware field keys
//! - **Merging:** replace-on-change by default, cursor-based connection merge
//! - **Layered storage:** memory cache with size/count/TTL eviction chained
//!   to a persisted blob cache
//! - **Optimistic updates:** journaled per key, rolled back exactly
//! - **Watchers:** changed-field notifications in write order
//! - **Fetch policies:** cache-first, cache-only, network-first,
//!   network-only and cache-and-network over any transport
//!
//! ## Quick Start
//!
//! ```ignore
//! use graph_cache_kit::{
//!     cache::{MemoryCache, MemoryCacheConfig},
//!     fetch::{FetchPolicy, FetchPolicyInterceptor, GraphQlRequest},
//!     resolver::TypePolicyResolver,
//!     Store,
//! };
//!
//! // 1. Build the store
//! let store = Store::builder()
//!     .cache(MemoryCache::new(MemoryCacheConfig::default().with_max_size_bytes(10 << 20))?)
//!     .identity_resolver(TypePolicyResolver::new().with_fallback_field("id"))
//!     .build()?;
//!
//! // 2. Put it in front of your transport
//! let client = FetchPolicyInterceptor::new(store.clone(), HttpTransport::new(url));
//!
//! // 3. Execute operations produced by your code generator
//! let mut results = Box::pin(client.execute(
//!     GraphQlRequest::new(hero_query()).fetch_policy(FetchPolicy::CacheAndNetwork),
//! ));
//! while let Some(result) = results.next().await {
//!     render(result?);
//! }
//!
//! // 4. Watch for changes
//! let mut watcher = store.subscribe().await;
//! while let Some(changed) = watcher.recv().await {
//!     refetch_if_affected(&changed);
//! }
//! ```

#[macro_use]
extern crate log;

pub mod cache;
pub mod error;
pub mod fetch;
pub mod key;
pub mod merger;
pub mod normalizer;
pub mod observability;
pub mod optimistic;
pub mod reader;
pub mod record;
pub mod resolver;
pub mod scalar;
pub mod selection;
pub mod serialization;
pub mod store;

// Re-exports for convenience
pub use cache::{CacheHeaders, NormalizedCache, Removed};
pub use error::{Error, Result};
pub use fetch::{FetchPolicy, FetchPolicyInterceptor, GraphQlRequest, GraphQlResponse, NetworkTransport};
pub use key::CacheKey;
pub use merger::RecordMerger;
pub use record::{ChangedKeys, FieldValue, MutationId, Record};
pub use resolver::IdentityResolver;
pub use store::{Store, StoreBuilder, Subscription};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
