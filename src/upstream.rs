//! HTTP client for forwarding requests to worker containers
//!
//! A plain pooled client: no retries and no timeout beyond the client's own
//! defaults. Failures are reported back to the router, which decides what to
//! do with the container.

use http_body_util::combinators::BoxBody;
use hyper::body::{Bytes, Incoming};
use hyper::{Request, Response};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Body type of requests sent upstream
pub type ProxyBody = BoxBody<Bytes, BoxError>;

/// Error type for upstream dispatch
#[derive(Debug)]
pub enum UpstreamError {
    /// Error from the HTTP client (connect, protocol)
    Client(hyper_util::client::legacy::Error),
}

impl std::fmt::Display for UpstreamError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UpstreamError::Client(e) => write!(f, "Client error: {}", e),
        }
    }
}

impl std::error::Error for UpstreamError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            UpstreamError::Client(e) => Some(e),
        }
    }
}

impl From<hyper_util::client::legacy::Error> for UpstreamError {
    fn from(err: hyper_util::client::legacy::Error) -> Self {
        UpstreamError::Client(err)
    }
}

/// Failure of the inbound request body while it was being streamed upstream.
///
/// Wraps the client's error so dispatch failures caused by the caller can be
/// told apart from failures of the container.
#[derive(Debug)]
pub struct InboundBodyError(pub BoxError);

impl std::fmt::Display for InboundBodyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "inbound request body failed: {}", self.0)
    }
}

impl std::error::Error for InboundBodyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.0.as_ref())
    }
}

/// Whether `err` or anything in its source chain is an [`InboundBodyError`]
pub fn caused_by_inbound_body(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        if e.is::<InboundBodyError>() {
            return true;
        }
        current = e.source();
    }
    false
}

/// Counters for upstream traffic
#[derive(Debug, Default)]
pub struct UpstreamStats {
    pub total_requests: AtomicU64,
    pub failed_requests: AtomicU64,
}

impl UpstreamStats {
    pub fn record_request(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failed_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }

    pub fn get_failed_requests(&self) -> u64 {
        self.failed_requests.load(Ordering::Relaxed)
    }
}

pub struct UpstreamClient {
    client: Client<HttpConnector, ProxyBody>,
    stats: Arc<UpstreamStats>,
}

impl UpstreamClient {
    pub fn new() -> Self {
        let mut connector = HttpConnector::new();
        connector.set_nodelay(true);
        connector.enforce_http(true);

        let client = Client::builder(TokioExecutor::new()).build(connector);
        debug!("Upstream client initialized");

        Self {
            client,
            stats: Arc::new(UpstreamStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<UpstreamStats> {
        Arc::clone(&self.stats)
    }

    /// Send a request whose URI already points at the container
    pub async fn send(&self, req: Request<ProxyBody>) -> Result<Response<Incoming>, UpstreamError> {
        self.stats.record_request();

        match self.client.request(req).await {
            Ok(response) => Ok(response),
            Err(e) => {
                self.stats.record_failure();
                Err(e.into())
            }
        }
    }
}

impl Default for UpstreamClient {
    fn default() -> Self {
        Self::new()
    }
}
