//! Pool lifecycle: provisioning, starting, stopping and teardown
//!
//! All operations walk the pool in creation order and stop at the first
//! runtime error. Nothing is rolled back: a failure leaves the pool exactly as
//! far as the loop got.

use crate::config::ControllerConfig;
use crate::error::{ControllerError, RuntimeOp};
use crate::pool::{ManagedContainer, Pool};
use crate::runtime::ContainerRuntime;
use tracing::{debug, info, warn};

impl Pool {
    /// Create `n` containers and append them to the pool, not started.
    pub async fn provision(
        &mut self,
        runtime: &dyn ContainerRuntime,
        config: &ControllerConfig,
        n: usize,
    ) -> Result<(), ControllerError> {
        let image = config.image_reference();

        for _ in 0..n {
            let name = self.next_name(&config.deployment);
            let id = runtime
                .create_container(&name, &image, &config.deployment)
                .await
                .map_err(|e| ControllerError::runtime(RuntimeOp::Create, &name, e))?;

            info!(
                deployment = %config.deployment,
                container = %name,
                container_id = %id,
                image = %image,
                "Created container"
            );
            self.containers.push(ManagedContainer::created(name, id));
        }

        Ok(())
    }

    /// Start every container that is not started yet and record its address.
    pub async fn start_all(&mut self, runtime: &dyn ContainerRuntime) -> Result<(), ControllerError> {
        for container in self.containers.iter_mut() {
            if container.is_started() {
                continue;
            }

            runtime
                .start_container(container.id())
                .await
                .map_err(|e| ControllerError::runtime(RuntimeOp::Start, container.name(), e))?;

            let details = runtime
                .inspect_container(container.id())
                .await
                .map_err(|e| ControllerError::runtime(RuntimeOp::Inspect, container.name(), e))?;

            if details.ip_address.is_empty() {
                warn!(container = %container.name(), "Runtime reported no network address");
            }
            if !details.running {
                // Kept as started; a failed dispatch will quarantine it
                warn!(container = %container.name(), "Container is not running after start");
            }

            info!(
                container = %container.name(),
                address = %details.ip_address,
                "Started container"
            );
            container.mark_started(details.ip_address);
        }

        Ok(())
    }

    /// Stop every started container.
    ///
    /// With `hard`, a failed graceful stop escalates to a kill. A failed kill
    /// aborts the loop and leaves that container marked started.
    pub async fn stop_all(
        &mut self,
        runtime: &dyn ContainerRuntime,
        hard: bool,
    ) -> Result<(), ControllerError> {
        for container in self.containers.iter_mut() {
            if !container.is_started() {
                continue;
            }

            if let Err(e) = runtime.stop_container(container.id()).await {
                if !hard {
                    return Err(ControllerError::runtime(RuntimeOp::Stop, container.name(), e));
                }

                warn!(
                    container = %container.name(),
                    error = %e,
                    "Graceful stop failed, killing container"
                );
                runtime
                    .kill_container(container.id())
                    .await
                    .map_err(|e| ControllerError::runtime(RuntimeOp::Kill, container.name(), e))?;
            }

            info!(container = %container.name(), "Stopped container");
            container.mark_stopped();
        }

        Ok(())
    }

    /// Kill started containers and remove every container in the pool.
    pub async fn cleanup(&mut self, runtime: &dyn ContainerRuntime) -> Result<(), ControllerError> {
        for container in self.containers.iter_mut() {
            if container.is_started() {
                runtime
                    .kill_container(container.id())
                    .await
                    .map_err(|e| ControllerError::runtime(RuntimeOp::Kill, container.name(), e))?;
                container.mark_stopped();
                debug!(container = %container.name(), "Killed container");
            }

            runtime
                .remove_container(container.id())
                .await
                .map_err(|e| ControllerError::runtime(RuntimeOp::Remove, container.name(), e))?;
            info!(container = %container.name(), "Removed container");
        }

        Ok(())
    }
}
