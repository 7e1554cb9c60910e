//! Docker implementation of the container runtime

use crate::runtime::{
    ContainerDetails, ContainerRuntime, DEPLOYMENT_LABEL, ORCHESTRATOR_LABEL, ORCHESTRATOR_NAME,
};
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, KillContainerOptions, ListContainersOptions,
    RemoveContainerOptions, StartContainerOptions, StopContainerOptions,
};
use bollard::models::HostConfig;
use bollard::Docker;
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Seconds bollard waits on a daemon response
const DOCKER_TIMEOUT_SECS: u64 = 120;

/// A container found by label, as reported by the daemon
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelledContainer {
    pub id: String,
    pub names: Vec<String>,
    pub state: Option<String>,
}

/// Talks to the Docker Engine API
pub struct DockerRuntime {
    client: Docker,
}

impl DockerRuntime {
    /// Connect to the Docker daemon and verify it answers.
    ///
    /// An explicit `host` wins; otherwise bollard's local defaults apply,
    /// which honour DOCKER_HOST.
    pub async fn connect(host: Option<&str>) -> anyhow::Result<Self> {
        let client = match host {
            Some(host) => Self::connect_to_host(host)?,
            None => Docker::connect_with_local_defaults().map_err(|e| {
                anyhow::anyhow!(
                    "Cannot connect to Docker daemon: {}. \
                     Set DOCKER_HOST or docker.host in the configuration.",
                    e
                )
            })?,
        };

        client.ping().await.map_err(|e| {
            anyhow::anyhow!(
                "Docker daemon is not responding: {}. Ensure dockerd (or a compatible daemon) is running.",
                e
            )
        })?;

        debug!("Connected to Docker daemon");
        Ok(Self { client })
    }

    fn connect_to_host(host: &str) -> anyhow::Result<Docker> {
        if let Some(socket_path) = host.strip_prefix("unix://") {
            Docker::connect_with_socket(socket_path, DOCKER_TIMEOUT_SECS, bollard::API_DEFAULT_VERSION)
                .map_err(|e| anyhow::anyhow!("Cannot connect to Unix socket '{}': {}", socket_path, e))
        } else if host.starts_with("tcp://") || host.starts_with("http://") {
            Docker::connect_with_http(host, DOCKER_TIMEOUT_SECS, bollard::API_DEFAULT_VERSION)
                .map_err(|e| anyhow::anyhow!("Cannot connect to TCP endpoint '{}': {}", host, e))
        } else {
            anyhow::bail!(
                "Invalid docker host format: '{}'. Expected 'unix:///path/to/socket' or 'tcp://host:port'",
                host
            )
        }
    }

    /// List every container (running or not) carrying this orchestrator's
    /// label and the given deployment label.
    pub async fn list_deployment_containers(
        &self,
        deployment: &str,
    ) -> anyhow::Result<Vec<LabelledContainer>> {
        let mut filters = HashMap::new();
        filters.insert(
            "label".to_string(),
            vec![
                format!("{}={}", ORCHESTRATOR_LABEL, ORCHESTRATOR_NAME),
                format!("{}={}", DEPLOYMENT_LABEL, deployment),
            ],
        );

        let options = ListContainersOptions {
            all: true,
            filters,
            ..Default::default()
        };

        let containers = self
            .client
            .list_containers(Some(options))
            .await
            .map_err(|e| anyhow::anyhow!("Unable to list containers: {}", e))?;

        Ok(containers
            .into_iter()
            .map(|c| LabelledContainer {
                id: c.id.unwrap_or_default(),
                names: c.names.unwrap_or_default(),
                state: c.state,
            })
            .collect())
    }
}

/// Labels attached to every container created for `deployment`
pub fn container_labels(deployment: &str) -> HashMap<String, String> {
    HashMap::from([
        (ORCHESTRATOR_LABEL.to_string(), ORCHESTRATOR_NAME.to_string()),
        (DEPLOYMENT_LABEL.to_string(), deployment.to_string()),
    ])
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn create_container(
        &self,
        name: &str,
        image: &str,
        deployment: &str,
    ) -> anyhow::Result<String> {
        let host_config = HostConfig {
            privileged: Some(false),
            ..Default::default()
        };

        let container_config = Config {
            image: Some(image.to_string()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            labels: Some(container_labels(deployment)),
            host_config: Some(host_config),
            ..Default::default()
        };

        let create_options = CreateContainerOptions {
            name: name.to_string(),
            platform: None,
        };

        let response = self
            .client
            .create_container(Some(create_options), container_config)
            .await
            .map_err(|e| {
                anyhow::anyhow!(
                    "Failed to create container '{}' from image '{}': {}",
                    name, image, e
                )
            })?;

        for warning in &response.warnings {
            warn!(container = name, container_id = %response.id, warning = %warning, "Docker warning on create");
        }

        Ok(response.id)
    }

    async fn start_container(&self, id: &str) -> anyhow::Result<()> {
        debug!(container_id = id, "Starting Docker container");
        self.client
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to start container {}: {}", id, e))
    }

    async fn inspect_container(&self, id: &str) -> anyhow::Result<ContainerDetails> {
        let info = self
            .client
            .inspect_container(id, None)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to fetch details for container {}: {}", id, e))?;

        Ok(ContainerDetails {
            ip_address: info
                .network_settings
                .and_then(|n| n.ip_address)
                .unwrap_or_default(),
            running: info.state.and_then(|s| s.running).unwrap_or(false),
        })
    }

    async fn stop_container(&self, id: &str) -> anyhow::Result<()> {
        match self
            .client
            .stop_container(id, None::<StopContainerOptions>)
            .await
        {
            Ok(_) => {
                info!(container_id = id, "Stopped Docker container");
                Ok(())
            }
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 304, ..
            }) => {
                debug!(container_id = id, "Container was already stopped");
                Ok(())
            }
            Err(e) => Err(anyhow::anyhow!("Failed to stop container {}: {}", id, e)),
        }
    }

    async fn kill_container(&self, id: &str) -> anyhow::Result<()> {
        let options = KillContainerOptions { signal: "SIGKILL" };

        self.client
            .kill_container(id, Some(options))
            .await
            .map_err(|e| anyhow::anyhow!("Failed to kill container {}: {}", id, e))?;
        info!(container_id = id, "Killed Docker container");
        Ok(())
    }

    async fn remove_container(&self, id: &str) -> anyhow::Result<()> {
        let options = RemoveContainerOptions {
            v: false,
            force: false,
            ..Default::default()
        };

        self.client
            .remove_container(id, Some(options))
            .await
            .map_err(|e| anyhow::anyhow!("Failed to remove container {}: {}", id, e))?;
        debug!(container_id = id, "Removed Docker container");
        Ok(())
    }
}
