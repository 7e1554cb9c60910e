//! Container runtime contract used by the controller
//!
//! The controller never keeps runtime state of its own beyond what it learns
//! through these calls; the pool is the single source of truth for which
//! containers are started and where they live.

use async_trait::async_trait;

/// Label identifying containers created by this orchestrator
pub const ORCHESTRATOR_LABEL: &str = "orchestrator";
/// Value of [`ORCHESTRATOR_LABEL`]
pub const ORCHESTRATOR_NAME: &str = "fpmgate";
/// Label carrying the deployment name
pub const DEPLOYMENT_LABEL: &str = "deployment";

/// What the controller needs to know about a container after starting it
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerDetails {
    /// Address on the container network, empty when the runtime reports none
    pub ip_address: String,
    pub running: bool,
}

/// Operations the controller requires from a container runtime
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Create a non-privileged container labelled with [`ORCHESTRATOR_LABEL`]
    /// and [`DEPLOYMENT_LABEL`]. The container is not started.
    async fn create_container(
        &self,
        name: &str,
        image: &str,
        deployment: &str,
    ) -> anyhow::Result<String>;

    async fn start_container(&self, id: &str) -> anyhow::Result<()>;

    async fn inspect_container(&self, id: &str) -> anyhow::Result<ContainerDetails>;

    /// Stop gracefully
    async fn stop_container(&self, id: &str) -> anyhow::Result<()>;

    /// Terminate immediately
    async fn kill_container(&self, id: &str) -> anyhow::Result<()>;

    /// Remove without forcing and without deleting volumes
    async fn remove_container(&self, id: &str) -> anyhow::Result<()>;
}
