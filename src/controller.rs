//! The request controller: one container pool behind one reader/writer lock
//!
//! Lifecycle operations (`init`, `stop`, `shutdown`, and the dynamic wake-up
//! in the router) take the write lock. Request handling holds the read lock
//! from selection until the response body has been written, so a wake-up or
//! shutdown waits for in-flight requests to drain.

use crate::config::{ControllerConfig, ControllerMode};
use crate::error::ControllerError;
use crate::pool::{ContainerStatus, Pool};
use crate::runtime::ContainerRuntime;
use crate::selection::{IndexSource, RandomIndex};
use crate::upstream::{UpstreamClient, UpstreamStats};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::{info, warn};

pub struct RequestController {
    pub(crate) config: ControllerConfig,
    pub(crate) runtime: Arc<dyn ContainerRuntime>,
    /// Shared so the router can hand an owned read guard to the response body
    pub(crate) pool: Arc<RwLock<Pool>>,
    pub(crate) index_source: Box<dyn IndexSource>,
    pub(crate) upstream: UpstreamClient,
    /// Informational only
    last_request: Mutex<Instant>,
}

impl RequestController {
    /// Build a controller. Rejects invalid configuration; touches no containers.
    pub fn new(
        config: ControllerConfig,
        runtime: Arc<dyn ContainerRuntime>,
    ) -> Result<Self, ControllerError> {
        config.validate().map_err(ControllerError::InvalidConfig)?;

        Ok(Self {
            config,
            runtime,
            pool: Arc::new(RwLock::new(Pool::new())),
            index_source: Box::new(RandomIndex::new()),
            upstream: UpstreamClient::new(),
            last_request: Mutex::new(Instant::now()),
        })
    }

    /// Replace the random probe source (builder pattern)
    pub fn with_index_source(mut self, source: impl IndexSource + 'static) -> Self {
        self.index_source = Box::new(source);
        self
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn mode(&self) -> ControllerMode {
        self.config.mode
    }

    /// Provision the pool and, in static mode, start every container.
    ///
    /// Errors leave whatever was already created in the pool; call
    /// [`shutdown`](Self::shutdown) to tear it down.
    pub async fn init(&self) -> Result<(), ControllerError> {
        let mut pool = self.pool.write().await;
        if !pool.is_empty() {
            return Err(ControllerError::AlreadyInitialized);
        }

        info!(
            deployment = %self.config.deployment,
            image = %self.config.image_reference(),
            containers = self.config.container_amount,
            mode = %self.config.mode,
            "Initializing container pool"
        );

        pool.provision(self.runtime.as_ref(), &self.config, self.config.container_amount)
            .await?;

        if self.config.mode == ControllerMode::Static {
            pool.start_all(self.runtime.as_ref()).await?;
        }

        info!(
            deployment = %self.config.deployment,
            ready = pool.ready_count(),
            "Container pool initialized"
        );
        Ok(())
    }

    /// Stop every started container, escalating to a kill when `hard`.
    pub async fn stop(&self, hard: bool) -> Result<(), ControllerError> {
        let mut pool = self.pool.write().await;
        pool.stop_all(self.runtime.as_ref(), hard).await
    }

    /// Kill and remove every container in the pool.
    pub async fn shutdown(&self) -> Result<(), ControllerError> {
        let mut pool = self.pool.write().await;
        info!(
            deployment = %self.config.deployment,
            containers = pool.len(),
            "Cleaning up container pool"
        );

        pool.cleanup(self.runtime.as_ref()).await.map_err(|e| {
            warn!(deployment = %self.config.deployment, error = %e, "Pool cleanup failed");
            e
        })
    }

    /// Copy of every container's state, in pool order
    pub async fn snapshot(&self) -> Vec<ContainerStatus> {
        self.pool.read().await.snapshot()
    }

    /// When the last request was dispatched (construction time if none yet)
    pub fn last_request(&self) -> Instant {
        *self.last_request.lock()
    }

    pub(crate) fn touch(&self) {
        *self.last_request.lock() = Instant::now();
    }

    pub fn upstream_stats(&self) -> Arc<UpstreamStats> {
        self.upstream.stats()
    }
}
