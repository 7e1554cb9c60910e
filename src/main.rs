use fpmgate::config::Config;
use fpmgate::controller::RequestController;
use fpmgate::docker::DockerRuntime;
use fpmgate::listener::Frontend;
use fpmgate::{PKG_NAME, VERSION};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("fpmgate=debug".parse().expect("valid log directive")),
        )
        .init();

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = Config::load(&config_path).map_err(|e| {
        error!(path = %config_path.display(), error = %e, "Failed to load configuration");
        e
    })?;

    info!(path = %config_path.display(), "Configuration loaded");
    print_startup_banner(&config);

    let runtime = Arc::new(DockerRuntime::connect(config.docker.host.as_deref()).await?);

    match runtime
        .list_deployment_containers(&config.controller.deployment)
        .await
    {
        Ok(leftovers) if !leftovers.is_empty() => {
            for container in &leftovers {
                warn!(
                    container_id = %container.id,
                    names = ?container.names,
                    state = ?container.state,
                    "Container from a previous run is still present"
                );
            }
        }
        Ok(_) => {}
        Err(e) => warn!(error = %e, "Could not check for leftover containers"),
    }

    let controller = Arc::new(RequestController::new(config.controller.clone(), runtime)?);

    if let Err(e) = controller.init().await {
        error!(error = %e, "Failed to initialize container pool");
        if let Err(cleanup) = controller.shutdown().await {
            warn!(error = %cleanup, "Cleanup after failed initialization was incomplete");
        }
        return Err(e.into());
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let frontend = Frontend::new(config.listener.clone(), Arc::clone(&controller), shutdown_rx);
    let mut frontend_handle = tokio::spawn(frontend.run());

    tokio::select! {
        _ = wait_for_signal() => {
            let _ = shutdown_tx.send(true);
            let _ = tokio::time::timeout(Duration::from_secs(5), frontend_handle).await;
        }
        result = &mut frontend_handle => {
            match result {
                Ok(Ok(())) => warn!("Frontend stopped unexpectedly"),
                Ok(Err(e)) => error!(error = %e, "Frontend error"),
                Err(e) => error!(error = %e, "Frontend task failed"),
            }
        }
    }

    info!("Removing container pool...");
    if let Err(e) = controller.shutdown().await {
        error!(error = %e, "Container cleanup failed");
    }

    info!("Shutdown complete");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, "Failed to install SIGTERM handler, waiting for Ctrl+C only");
            let _ = tokio::signal::ctrl_c().await;
            info!("Received SIGINT (Ctrl+C), shutting down...");
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received SIGINT (Ctrl+C), shutting down...");
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down...");
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Received Ctrl+C, shutting down...");
}

fn print_startup_banner(config: &Config) {
    info!(name = PKG_NAME, version = VERSION, "Starting request controller");
    info!(listener = %config.listener, "Listener configuration");
    info!(
        deployment = %config.controller.deployment,
        image = %config.controller.image_reference(),
        container_port = config.controller.container_port,
        containers = config.controller.container_amount,
        mode = %config.controller.mode,
        idle_seconds = config.controller.idle_seconds,
        "Controller configuration"
    );
    info!(
        docker_host = config.docker.host.as_deref().unwrap_or("(local default)"),
        "Docker configuration"
    );
}
