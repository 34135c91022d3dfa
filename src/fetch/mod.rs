//! Fetch policies and the pipeline that sequences cache and network.
//!
//! # The Five Policies
//!
//! Every request runs under one of five policies:
//!
//! ```
//! use graph_cache_kit::fetch::FetchPolicy;
//!
//! // 1. Cache, network on miss (default)
//! let _p = FetchPolicy::CacheFirst;
//!
//! // 2. Cache only, a miss is an error
//! let _p = FetchPolicy::CacheOnly;
//!
//! // 3. Network, cache on network failure
//! let _p = FetchPolicy::NetworkFirst;
//!
//! // 4. Network only
//! let _p = FetchPolicy::NetworkOnly;
//!
//! // 5. Cache if present, then network
//! let _p = FetchPolicy::CacheAndNetwork;
//! ```
//!
//! # Decision Table
//!
//! | Policy | Steps | Cache hit | Cache miss | Network failure |
//! |--------|-------|-----------|------------|-----------------|
//! | **CacheFirst** | cache, network | emit, stop | go to network | emitted |
//! | **CacheOnly** | cache | emit | miss emitted | n/a |
//! | **NetworkFirst** | network, cache | emitted after failure | network error emitted | fall back to cache |
//! | **NetworkOnly** | network | n/a | n/a | emitted |
//! | **CacheAndNetwork** | cache, network | emit, continue | continue silently | emitted |
//!
//! Results read from the cache carry `is_from_cache = true`. Network data is
//! written through the [`Store`](crate::Store) before it is emitted.

pub mod interceptor;
pub mod network;

pub use interceptor::FetchPolicyInterceptor;
pub use network::{GraphQlError, GraphQlRequest, GraphQlResponse, MockTransport, NetworkTransport};

/// One phase of a fetch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FetchStep {
    ReadCache,
    ReadNetwork,
}

/// Policy controlling whether and when a request consults cache and network.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum FetchPolicy {
    /// **CacheFirst**: read the cache; go to the network only on a miss.
    ///
    /// A network failure after the miss is emitted.
    #[default]
    CacheFirst,

    /// **CacheOnly**: read the cache and nothing else.
    ///
    /// A miss is emitted as `Error::CacheMiss`.
    CacheOnly,

    /// **NetworkFirst**: go to the network; read the cache only if it fails.
    ///
    /// When the cache misses too, the original network error is emitted.
    NetworkFirst,

    /// **NetworkOnly**: go to the network and nothing else.
    NetworkOnly,

    /// **CacheAndNetwork**: emit the cached result if there is one, then
    /// always go to the network.
    ///
    /// The cached result is always emitted before the network result.
    CacheAndNetwork,
}

impl FetchPolicy {
    /// Ordered steps of this policy.
    pub fn steps(self) -> &'static [FetchStep] {
        use FetchStep::{ReadCache, ReadNetwork};
        match self {
            FetchPolicy::CacheFirst => &[ReadCache, ReadNetwork],
            FetchPolicy::CacheOnly => &[ReadCache],
            FetchPolicy::NetworkFirst => &[ReadNetwork, ReadCache],
            FetchPolicy::NetworkOnly => &[ReadNetwork],
            FetchPolicy::CacheAndNetwork => &[ReadCache, ReadNetwork],
        }
    }

    /// Whether a successful result at `step` ends the fetch.
    pub fn stops_after(self, step: FetchStep) -> bool {
        match self {
            FetchPolicy::CacheAndNetwork => step == FetchStep::ReadNetwork,
            _ => true,
        }
    }
}

impl std::fmt::Display for FetchPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchPolicy::CacheFirst => write!(f, "CacheFirst"),
            FetchPolicy::CacheOnly => write!(f, "CacheOnly"),
            FetchPolicy::NetworkFirst => write!(f, "NetworkFirst"),
            FetchPolicy::NetworkOnly => write!(f, "NetworkOnly"),
            FetchPolicy::CacheAndNetwork => write!(f, "CacheAndNetwork"),
        }
    }
}
