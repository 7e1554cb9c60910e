//! fpmgate - routes requests to a pool of disposable worker containers
//!
//! This library provides a request controller that:
//! - Provisions a fixed-size pool of containers from one image through a
//!   pluggable container runtime (Docker via bollard in production)
//! - Starts the pool eagerly (static mode) or on the first request (dynamic mode)
//! - Forwards each request to a randomly chosen ready container
//! - Quarantines containers that fail to serve a request
//! - Serves the router over a Unix domain socket or TCP

pub mod config;
pub mod controller;
pub mod docker;
pub mod error;
pub mod lifecycle;
pub mod listener;
pub mod pool;
pub mod proxy;
pub mod runtime;
pub mod selection;
pub mod upstream;

pub use config::{Config, ControllerConfig, ControllerMode, ListenerConfig};
pub use controller::RequestController;
pub use error::ControllerError;
pub use runtime::{ContainerDetails, ContainerRuntime};

/// Package name from Cargo.toml
pub const PKG_NAME: &str = env!("CARGO_PKG_NAME");

/// Package version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
