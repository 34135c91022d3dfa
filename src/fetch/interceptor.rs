//! Fetch-policy interceptor: main entry point for executing requests.

use crate::error::{Error, Result};
use crate::fetch::network::{GraphQlRequest, GraphQlResponse, NetworkTransport};
use crate::fetch::{FetchPolicy, FetchStep};
use crate::record::MutationId;
use crate::store::Store;
use futures::stream::{self, Stream, StreamExt};
use std::sync::Arc;

/// Runs requests through their fetch policy against a store and a transport.
///
/// `execute` returns a stream of results in policy order. Dropping the
/// stream cancels it: an in-flight network call is abandoned and its data
/// is never written.
///
/// # Example
///
/// ```
/// use futures::StreamExt;
/// use graph_cache_kit::cache::MemoryCache;
/// use graph_cache_kit::fetch::{FetchPolicy, FetchPolicyInterceptor, GraphQlRequest, GraphQlResponse, MockTransport};
/// use graph_cache_kit::selection::{CompiledField, CompiledType, Operation};
/// use graph_cache_kit::Store;
/// use serde_json::json;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let op = Operation::query("Hello", vec![CompiledField::new("hello", CompiledType::scalar("String")).into()]);
/// let network = MockTransport::new()
///     .respond(Ok(GraphQlResponse::from_network("Hello", json!({"hello": "world"}).as_object().cloned())));
/// let interceptor = FetchPolicyInterceptor::new(Store::new(MemoryCache::unbounded()), network);
///
/// // First run misses the cache and goes to the network.
/// let first = interceptor.execute_all(GraphQlRequest::new(op.clone())).await;
/// assert!(!first[0].as_ref().unwrap().is_from_cache);
///
/// // Second run is served from the cache.
/// let mut results = Box::pin(interceptor.execute(GraphQlRequest::new(op)));
/// let second = results.next().await.unwrap().unwrap();
/// assert!(second.is_from_cache);
/// assert!(results.next().await.is_none());
/// # }
/// ```
pub struct FetchPolicyInterceptor<N> {
    store: Store,
    network: Arc<N>,
}

impl<N> Clone for FetchPolicyInterceptor<N> {
    fn clone(&self) -> Self {
        FetchPolicyInterceptor {
            store: self.store.clone(),
            network: Arc::clone(&self.network),
        }
    }
}

impl<N: NetworkTransport + 'static> FetchPolicyInterceptor<N> {
    pub fn new(store: Store, network: N) -> Self {
        FetchPolicyInterceptor {
            store,
            network: Arc::new(network),
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn network(&self) -> &N {
        &self.network
    }

    /// Execute `request`, emitting results in the order its policy defines.
    pub fn execute(&self, request: GraphQlRequest) -> impl Stream<Item = Result<GraphQlResponse>> + 'static {
        debug!(
            "Executing {} with {}",
            request.operation.name, request.fetch_policy
        );
        let fetch = Fetch {
            store: self.store.clone(),
            network: Arc::clone(&self.network),
            request,
            step: 0,
            started: false,
            finished: false,
            network_error: None,
            optimistic: None,
        };
        stream::unfold(fetch, Fetch::advance)
    }

    /// Execute `request` and collect every emitted result.
    pub async fn execute_all(&self, request: GraphQlRequest) -> Vec<Result<GraphQlResponse>> {
        self.execute(request).collect().await
    }
}

/// State of one request between emissions.
struct Fetch<N> {
    store: Store,
    network: Arc<N>,
    request: GraphQlRequest,
    step: usize,
    started: bool,
    finished: bool,
    /// Held back by `NetworkFirst` until the cache fallback also missed.
    network_error: Option<Error>,
    optimistic: Option<OptimisticWrite>,
}

impl<N: NetworkTransport> Fetch<N> {
    async fn advance(mut self) -> Option<(Result<GraphQlResponse>, Self)> {
        if !self.started {
            self.started = true;
            self.apply_optimistic().await;
        }
        let policy = self.request.fetch_policy;

        loop {
            if self.finished {
                self.end_optimistic().await;
                return None;
            }
            let Some(&step) = policy.steps().get(self.step) else {
                self.finished = true;
                self.end_optimistic().await;
                let error = self.network_error.take();
                return error.map(|e| (Err(e), self));
            };
            self.step += 1;

            let result = match step {
                FetchStep::ReadCache => self.read_cache().await,
                FetchStep::ReadNetwork => self.read_network().await,
            };
            match (step, result) {
                (_, Ok(response)) => {
                    if policy.stops_after(step) {
                        self.finished = true;
                        self.network_error = None;
                    }
                    return Some((Ok(response), self));
                }
                (FetchStep::ReadNetwork, Err(e)) if policy == FetchPolicy::NetworkFirst => {
                    debug!("Network failed for {}, trying cache: {}", self.request.operation.name, e);
                    self.network_error = Some(e);
                }
                (FetchStep::ReadNetwork, Err(e)) => {
                    self.finished = true;
                    return Some((Err(e), self));
                }
                (FetchStep::ReadCache, Err(e)) => {
                    if policy == FetchPolicy::CacheOnly {
                        self.finished = true;
                        return Some((Err(e), self));
                    }
                    debug!("Cache miss for {}: {}", self.request.operation.name, e);
                }
            }
        }
    }

    async fn read_cache(&self) -> Result<GraphQlResponse> {
        let operation = &self.request.operation;
        let data = self
            .store
            .read_operation(operation, &self.request.cache_headers)
            .await?;
        Ok(GraphQlResponse::from_cache(&operation.name, data))
    }

    async fn read_network(&mut self) -> Result<GraphQlResponse> {
        let result = self.network.execute(&self.request).await;
        self.end_optimistic().await;

        let mut response = result?;
        response.is_from_cache = false;
        if let Some(data) = &response.data {
            let written = self
                .store
                .write(&self.request.operation, data, &self.request.cache_headers)
                .await;
            if let Err(e) = written {
                warn!(
                    "⚠ Could not cache response of {}: {}",
                    self.request.operation.name, e
                );
                response.cache_write_error = Some(e);
            }
        }
        Ok(response)
    }

    async fn apply_optimistic(&mut self) {
        let Some(data) = self.request.optimistic_data.as_ref() else {
            return;
        };
        let id = MutationId::new();
        match self
            .store
            .write_optimistic(&self.request.operation, data, id)
            .await
        {
            Ok(_) => {
                self.optimistic = Some(OptimisticWrite {
                    store: self.store.clone(),
                    id,
                    active: true,
                })
            }
            Err(e) => warn!(
                "⚠ Optimistic data of {} was not applied: {}",
                self.request.operation.name, e
            ),
        }
    }

    async fn end_optimistic(&mut self) {
        if let Some(mut write) = self.optimistic.take() {
            write.active = false;
            write.store.rollback_optimistic(write.id).await;
        }
    }
}

/// Optimistic write pending rollback; rolled back in the background if dropped.
struct OptimisticWrite {
    store: Store,
    id: MutationId,
    active: bool,
}

impl Drop for OptimisticWrite {
    fn drop(&mut self) {
        if !self.active {
            return;
        }
        let (store, id) = (self.store.clone(), self.id);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    store.rollback_optimistic(id).await;
                });
            }
            Err(_) => warn!("⚠ Optimistic write {} dropped outside a runtime, not rolled back", id),
        }
    }
}
