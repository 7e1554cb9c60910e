use crate::error::ControllerError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Top-level configuration file
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Socket the router listens on
    pub listener: ListenerConfig,

    /// Docker daemon connection
    #[serde(default)]
    pub docker: DockerConfig,

    /// Container pool and routing settings
    pub controller: ControllerConfig,
}

/// Where the router accepts connections
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ListenerConfig {
    /// Unix domain socket, optionally chowned to `owner:group` after binding
    Unix {
        path: PathBuf,
        owner: Option<String>,
        group: Option<String>,
    },
    /// TCP socket
    Tcp {
        #[serde(default = "default_bind_address")]
        bind: String,
        port: u16,
    },
}

impl ListenerConfig {
    /// Resolve the TCP socket address, `None` for Unix listeners
    pub fn socket_addr(&self) -> Option<Result<SocketAddr, String>> {
        match self {
            ListenerConfig::Unix { .. } => None,
            ListenerConfig::Tcp { bind, port } => Some(
                format!("{}:{}", bind, port)
                    .parse()
                    .map_err(|e| format!("Invalid listener address {}:{}: {}", bind, port, e)),
            ),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        match self {
            ListenerConfig::Unix { path, .. } => {
                if path.as_os_str().is_empty() {
                    return Err("Listener: unix socket 'path' must not be empty".to_string());
                }
            }
            ListenerConfig::Tcp { port, .. } => {
                if *port == 0 {
                    return Err("Listener: 'port' must be greater than 0".to_string());
                }
                if let Some(Err(e)) = self.socket_addr() {
                    return Err(format!("Listener: {}", e));
                }
            }
        }
        Ok(())
    }
}

impl fmt::Display for ListenerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListenerConfig::Unix { path, .. } => write!(f, "unix:{}", path.display()),
            ListenerConfig::Tcp { bind, port } => write!(f, "tcp:{}:{}", bind, port),
        }
    }
}

/// Docker daemon connection settings
#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
pub struct DockerConfig {
    /// Docker host URL (`unix://...` or `tcp://...`). Falls back to DOCKER_HOST
    /// and the local socket when unset.
    pub host: Option<String>,
}

/// Operating mode of the request controller
#[derive(Debug, Deserialize, Serialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ControllerMode {
    /// Every container is started during initialization and kept running
    Static,
    /// The pool starts dormant and is woken by the first request that sees it stopped
    #[default]
    Dynamic,
}

impl ControllerMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ControllerMode::Static => "static",
            ControllerMode::Dynamic => "dynamic",
        }
    }
}

impl fmt::Display for ControllerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ControllerMode {
    type Err = ControllerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "static" => Ok(ControllerMode::Static),
            "dynamic" => Ok(ControllerMode::Dynamic),
            other => Err(ControllerError::InvalidConfig(format!(
                "Invalid controller mode: {}",
                other
            ))),
        }
    }
}

/// Configuration of a single deployment's container pool
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ControllerConfig {
    /// Deployment name, used as container name prefix and label value
    pub deployment: String,

    /// Image name without tag
    pub image: String,

    /// Image tag (default: latest)
    #[serde(default = "default_image_tag")]
    pub tag: String,

    /// Port the workers listen on inside their containers
    pub container_port: u16,

    /// Number of containers provisioned at startup (default: 1)
    #[serde(default = "default_container_amount")]
    pub container_amount: usize,

    /// "static" or "dynamic" (default: dynamic)
    #[serde(default)]
    pub mode: ControllerMode,

    /// Idle time before a dynamic pool may be stopped. Reserved; nothing acts on it yet.
    #[serde(default = "default_idle_seconds")]
    pub idle_seconds: u64,
}

impl ControllerConfig {
    /// Config with a single dynamic container and default idle time
    pub fn new(deployment: &str, image: &str, tag: &str, container_port: u16) -> Self {
        Self {
            deployment: deployment.to_string(),
            image: image.to_string(),
            tag: tag.to_string(),
            container_port,
            container_amount: default_container_amount(),
            mode: ControllerMode::default(),
            idle_seconds: default_idle_seconds(),
        }
    }

    /// Set the number of containers (builder pattern)
    pub fn with_amount(mut self, container_amount: usize) -> Self {
        self.container_amount = container_amount;
        self
    }

    /// Set the controller mode (builder pattern)
    pub fn with_mode(mut self, mode: ControllerMode) -> Self {
        self.mode = mode;
        self
    }

    /// Full image reference passed to the runtime, `<image>:<tag>`
    pub fn image_reference(&self) -> String {
        format!("{}:{}", self.image, self.tag)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.deployment.trim().is_empty() {
            return Err("Controller: 'deployment' must not be empty".to_string());
        }
        if self.image.trim().is_empty() {
            return Err(format!(
                "Controller '{}': 'image' must not be empty",
                self.deployment
            ));
        }
        if self.tag.trim().is_empty() {
            return Err(format!(
                "Controller '{}': 'tag' must not be empty",
                self.deployment
            ));
        }
        if self.container_port == 0 {
            return Err(format!(
                "Controller '{}': 'container_port' must be greater than 0",
                self.deployment
            ));
        }
        Ok(())
    }
}

// Default value functions
fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_image_tag() -> String {
    "latest".to_string()
}

fn default_container_amount() -> usize {
    1
}

fn default_idle_seconds() -> u64 {
    60
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate all configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        let errors: Vec<String> = [self.listener.validate(), self.controller.validate()]
            .into_iter()
            .filter_map(Result::err)
            .collect();

        if !errors.is_empty() {
            anyhow::bail!("Configuration errors:\n  - {}", errors.join("\n  - "));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_config() {
        let toml = r#"
[listener]
type = "unix"
path = "/run/fpmgate.sock"
owner = "www-data"
group = "www-data"

[docker]
host = "unix:///var/run/docker.sock"

[controller]
deployment = "shop"
image = "php"
tag = "8.3-fpm"
container_port = 9000
container_amount = 3
mode = "static"
idle_seconds = 120
"#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(
            config.listener,
            ListenerConfig::Unix {
                path: PathBuf::from("/run/fpmgate.sock"),
                owner: Some("www-data".to_string()),
                group: Some("www-data".to_string()),
            }
        );
        assert_eq!(config.docker.host.as_deref(), Some("unix:///var/run/docker.sock"));
        assert_eq!(config.controller.deployment, "shop");
        assert_eq!(config.controller.container_amount, 3);
        assert_eq!(config.controller.mode, ControllerMode::Static);
        assert_eq!(config.controller.idle_seconds, 120);
        assert_eq!(config.controller.image_reference(), "php:8.3-fpm");
        config.validate().unwrap();
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let toml = r#"
[listener]
type = "tcp"
port = 9001

[controller]
deployment = "api"
image = "worker"
container_port = 8080
"#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(
            config.listener,
            ListenerConfig::Tcp {
                bind: "127.0.0.1".to_string(),
                port: 9001
            }
        );
        assert!(config.docker.host.is_none());
        assert_eq!(config.controller.tag, "latest");
        assert_eq!(config.controller.container_amount, 1);
        assert_eq!(config.controller.mode, ControllerMode::Dynamic);
        assert_eq!(config.controller.idle_seconds, 60);
    }

    #[test]
    fn test_invalid_mode_is_rejected() {
        let toml = r#"
[listener]
type = "tcp"
port = 9001

[controller]
deployment = "api"
image = "worker"
container_port = 8080
mode = "elastic"
"#;

        assert!(toml::from_str::<Config>(toml).is_err());
    }

    #[test]
    fn test_mode_from_str() {
        assert_eq!("static".parse::<ControllerMode>().unwrap(), ControllerMode::Static);
        assert_eq!("dynamic".parse::<ControllerMode>().unwrap(), ControllerMode::Dynamic);

        let err = "Dynamic".parse::<ControllerMode>().unwrap_err();
        assert!(matches!(err, ControllerError::InvalidConfig(_)));
        assert!(err.to_string().contains("Invalid controller mode: Dynamic"));
    }

    #[test]
    fn test_controller_config_new() {
        let config = ControllerConfig::new("shop", "php", "8-fpm", 9000);
        assert_eq!(config.container_amount, 1);
        assert_eq!(config.mode, ControllerMode::Dynamic);
        assert_eq!(config.idle_seconds, 60);
        assert_eq!(config.image_reference(), "php:8-fpm");

        let config = config.with_amount(4).with_mode(ControllerMode::Static);
        assert_eq!(config.container_amount, 4);
        assert_eq!(config.mode, ControllerMode::Static);
    }

    #[test]
    fn test_controller_validation() {
        assert!(ControllerConfig::new("shop", "php", "8", 9000).validate().is_ok());
        assert!(ControllerConfig::new("", "php", "8", 9000).validate().is_err());
        assert!(ControllerConfig::new("shop", " ", "8", 9000).validate().is_err());
        assert!(ControllerConfig::new("shop", "php", "", 9000).validate().is_err());

        let err = ControllerConfig::new("shop", "php", "8", 0).validate().unwrap_err();
        assert!(err.contains("container_port"));
    }

    #[test]
    fn test_listener_validation() {
        let tcp = ListenerConfig::Tcp {
            bind: "0.0.0.0".to_string(),
            port: 0,
        };
        assert!(tcp.validate().is_err());

        let tcp = ListenerConfig::Tcp {
            bind: "not-an-ip".to_string(),
            port: 9000,
        };
        assert!(tcp.validate().unwrap_err().contains("Invalid listener address"));

        let unix = ListenerConfig::Unix {
            path: PathBuf::new(),
            owner: None,
            group: None,
        };
        assert!(unix.validate().is_err());
        assert!(unix.socket_addr().is_none());
    }

    #[test]
    fn test_validate_collects_all_errors() {
        let config = Config {
            listener: ListenerConfig::Tcp {
                bind: "127.0.0.1".to_string(),
                port: 0,
            },
            docker: DockerConfig::default(),
            controller: ControllerConfig::new("shop", "php", "8", 0),
        };

        let message = config.validate().unwrap_err().to_string();
        assert!(message.contains("'port'"));
        assert!(message.contains("container_port"));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[listener]
type = "tcp"
bind = "0.0.0.0"
port = 9000

[controller]
deployment = "shop"
image = "php"
container_port = 9000
"#
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.listener.to_string(), "tcp:0.0.0.0:9000");
        assert_eq!(config.controller.deployment, "shop");
    }

    #[test]
    fn test_load_rejects_invalid_values() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[listener]
type = "tcp"
port = 9000

[controller]
deployment = ""
image = "php"
container_port = 9000
"#
        )
        .unwrap();

        let err = Config::load(file.path()).unwrap_err();
        assert!(err.to_string().contains("Configuration errors"));
    }
}
