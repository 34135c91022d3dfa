//! Network boundary: requests, responses and the transport trait.
//!
//! The transport itself (HTTP, WebSocket, batching, retries) lives outside
//! this crate. Implement [`NetworkTransport`] over it, or use
//! [`MockTransport`] in tests:
//!
//! ```
//! use graph_cache_kit::fetch::{GraphQlRequest, GraphQlResponse, MockTransport, NetworkTransport};
//! use graph_cache_kit::selection::Operation;
//! use serde_json::json;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let transport = MockTransport::new()
//!     .respond(Ok(GraphQlResponse::from_network("Hero", json!({"hero": null}).as_object().cloned())));
//!
//! let request = GraphQlRequest::new(Operation::query("Hero", vec![]));
//! let response = transport.execute(&request).await.unwrap();
//! assert!(!response.is_from_cache);
//! assert_eq!(transport.calls(), 1);
//! # }
//! ```

use crate::cache::CacheHeaders;
use crate::error::{Error, Result};
use crate::fetch::FetchPolicy;
use crate::selection::Operation;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// One entry of a response's `errors` list.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GraphQlError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<Vec<Value>>,
}

impl GraphQlError {
    pub fn new(message: impl Into<String>) -> Self {
        GraphQlError {
            message: message.into(),
            path: None,
        }
    }
}

/// An operation plus how it should be fetched.
#[derive(Clone, Debug)]
pub struct GraphQlRequest {
    pub operation: Arc<Operation>,
    pub fetch_policy: FetchPolicy,
    pub cache_headers: CacheHeaders,
    /// Data shown optimistically until the network phase ends.
    pub optimistic_data: Option<Map<String, Value>>,
}

impl GraphQlRequest {
    pub fn new(operation: Operation) -> Self {
        GraphQlRequest {
            operation: Arc::new(operation),
            fetch_policy: FetchPolicy::default(),
            cache_headers: CacheHeaders::default(),
            optimistic_data: None,
        }
    }

    pub fn fetch_policy(mut self, policy: FetchPolicy) -> Self {
        self.fetch_policy = policy;
        self
    }

    pub fn cache_headers(mut self, headers: CacheHeaders) -> Self {
        self.cache_headers = headers;
        self
    }

    pub fn optimistic_data(mut self, data: Map<String, Value>) -> Self {
        self.optimistic_data = Some(data);
        self
    }
}

/// One emitted result.
#[derive(Clone, Debug, PartialEq)]
pub struct GraphQlResponse {
    pub operation_name: String,
    pub data: Option<Map<String, Value>>,
    pub errors: Vec<GraphQlError>,
    /// `true` when the data was read from the cache.
    pub is_from_cache: bool,
    /// Set when network data could not be written to the cache.
    pub cache_write_error: Option<Error>,
}

impl GraphQlResponse {
    pub fn from_network(operation_name: impl Into<String>, data: Option<Map<String, Value>>) -> Self {
        GraphQlResponse {
            operation_name: operation_name.into(),
            data,
            errors: Vec::new(),
            is_from_cache: false,
            cache_write_error: None,
        }
    }

    pub fn from_cache(operation_name: impl Into<String>, data: Map<String, Value>) -> Self {
        GraphQlResponse {
            operation_name: operation_name.into(),
            data: Some(data),
            errors: Vec::new(),
            is_from_cache: true,
            cache_write_error: None,
        }
    }

    pub fn with_errors(mut self, errors: Vec<GraphQlError>) -> Self {
        self.errors = errors;
        self
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// Executes operations against a server.
///
/// Return `Err(Error::NetworkError(..))` for transport failures. A response
/// that carries GraphQL `errors` is still `Ok`.
#[allow(async_fn_in_trait)]
pub trait NetworkTransport: Send + Sync {
    /// # Errors
    /// Returns `Err` if the request could not be completed.
    async fn execute(&self, request: &GraphQlRequest) -> Result<GraphQlResponse>;
}

/// Scripted transport for tests.
///
/// Answers each call with the next queued result and counts calls. An empty
/// queue answers with a network error.
#[derive(Debug, Default)]
pub struct MockTransport {
    responses: Mutex<VecDeque<Result<GraphQlResponse>>>,
    calls: AtomicUsize,
    delay: Option<Duration>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the result of one call.
    pub fn respond(mut self, result: Result<GraphQlResponse>) -> Self {
        self.responses.get_mut().push_back(result);
        self
    }

    /// Wait this long before answering each call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of calls made so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl NetworkTransport for MockTransport {
    async fn execute(&self, request: &GraphQlRequest) -> Result<GraphQlResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.responses.lock().await.pop_front();
        next.unwrap_or_else(|| {
            Err(Error::NetworkError(format!(
                "no response queued for {}",
                request.operation.name
            )))
        })
    }
}
