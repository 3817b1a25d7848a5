//! Configuration loading and validation for the VIP client

use crate::types::{ClientConfig, DEFAULT_QUEUE_DEPTH, DEFAULT_RELAY_WORKERS};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use validator::{Validate, ValidationError, ValidationErrors};

/// Environment variable naming an explicit configuration file
pub const CONFIG_ENV: &str = "VIP_CLIENT_CONFIG";

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration file not found in search paths")]
    FileNotFound,

    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(#[from] validator::ValidationErrors),
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub client: ClientSettings,

    pub coordinator: CoordinatorSettings,

    #[serde(default)]
    pub relay: RelaySettings,

    #[serde(default)]
    pub metrics: MetricsSettings,

    #[serde(default)]
    pub logging: LoggingSettings,
}

impl Validate for Config {
    fn validate(&self) -> Result<(), ValidationErrors> {
        self.client.validate()?;
        self.coordinator.validate()?;
        self.relay.validate()?;
        self.metrics.validate()?;

        // The coordinator answers every HEALTH, so a read timeout at or below
        // the health interval would declare a healthy session dead
        if self.coordinator.read_timeout <= self.coordinator.health_interval {
            let mut errors = ValidationErrors::new();
            errors.add(
                "read_timeout",
                ValidationError::new("read_timeout_not_above_health_interval"),
            );
            return Err(errors);
        }
        Ok(())
    }
}

/// Node identity and addresses
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ClientSettings {
    #[validate(length(min = 1), custom = "validate_node_name")]
    pub name: String,

    /// Virtual service address attached to loopback
    pub vip: Ipv4Addr,

    /// Address on the data interface
    pub data_ip: IpAddr,
}

/// Coordinator connection settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CoordinatorSettings {
    #[validate(custom = "validate_host_port")]
    pub address: String,

    #[serde(default = "default_connect_timeout", with = "humantime_serde")]
    #[validate(custom = "validate_timeout")]
    pub connect_timeout: Duration,

    #[serde(default = "default_read_timeout", with = "humantime_serde")]
    #[validate(custom = "validate_timeout")]
    pub read_timeout: Duration,

    #[serde(default = "default_health_interval", with = "humantime_serde")]
    #[validate(custom = "validate_health_interval")]
    pub health_interval: Duration,
}

/// Capture and relay sizing
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct RelaySettings {
    #[validate(range(min = 1, max = 1024))]
    pub workers: usize,

    #[validate(range(min = 1, max = 65536))]
    pub queue_depth: usize,

    #[serde(with = "humantime_serde")]
    #[validate(custom = "validate_poll_interval")]
    pub poll_interval: Duration,

    /// IP protocol number the capture socket listens for
    pub capture_protocol: u8,
}

/// Metrics endpoint settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct MetricsSettings {
    pub enabled: bool,

    #[validate(custom = "validate_listen_addr")]
    pub listen_addr: String,
}

/// Logging settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingSettings {
    pub level: Option<String>,
    pub format: Option<String>,
}

// Default implementations

fn default_connect_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_read_timeout() -> Duration {
    Duration::from_secs(15)
}

fn default_health_interval() -> Duration {
    Duration::from_secs(5)
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            workers: DEFAULT_RELAY_WORKERS,
            queue_depth: DEFAULT_QUEUE_DEPTH,
            poll_interval: Duration::from_millis(250),
            capture_protocol: libc::IPPROTO_TCP as u8,
        }
    }
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: "127.0.0.1:9102".to_string(),
        }
    }
}

// Custom validators

fn validate_node_name(name: &str) -> Result<(), ValidationError> {
    // Names travel as a single protocol token
    if name.is_empty() || name.chars().any(char::is_whitespace) {
        return Err(ValidationError::new("node_name_invalid"));
    }
    Ok(())
}

fn validate_host_port(address: &str) -> Result<(), ValidationError> {
    let Some((host, port)) = address.rsplit_once(':') else {
        return Err(ValidationError::new("address_missing_port"));
    };
    if host.is_empty() {
        return Err(ValidationError::new("address_missing_host"));
    }
    match port.parse::<u16>() {
        Ok(port) if port > 0 => Ok(()),
        _ => Err(ValidationError::new("address_invalid_port")),
    }
}

fn validate_listen_addr(address: &str) -> Result<(), ValidationError> {
    address
        .parse::<SocketAddr>()
        .map(|_| ())
        .map_err(|_| ValidationError::new("listen_addr_invalid"))
}

fn validate_timeout(timeout: &Duration) -> Result<(), ValidationError> {
    let millis = timeout.as_millis();
    if millis < 10 || millis > 300_000 {
        return Err(ValidationError::new("timeout_out_of_range"));
    }
    Ok(())
}

fn validate_health_interval(interval: &Duration) -> Result<(), ValidationError> {
    let millis = interval.as_millis();
    if millis < 10 || millis > 60_000 {
        return Err(ValidationError::new("health_interval_out_of_range"));
    }
    Ok(())
}

fn validate_poll_interval(interval: &Duration) -> Result<(), ValidationError> {
    let millis = interval.as_millis();
    if millis < 1 || millis > 5_000 {
        return Err(ValidationError::new("poll_interval_out_of_range"));
    }
    Ok(())
}

// Configuration loading implementation

impl Config {
    /// Load configuration from `VIP_CLIENT_CONFIG` or the default search paths
    pub fn load() -> Result<Self, ConfigError> {
        let path = match std::env::var_os(CONFIG_ENV) {
            Some(path) => PathBuf::from(path),
            None => Self::find_config_file().ok_or(ConfigError::FileNotFound)?,
        };
        tracing::info!("Loading configuration from: {}", path.display());
        Self::load_from_file(&path)
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&contents)
    }

    /// Parse and validate a YAML document
    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Find configuration file in standard locations
    fn find_config_file() -> Option<PathBuf> {
        let mut paths = vec![PathBuf::from("/etc/seesaw/vip-client.yaml")];

        if let Some(home_path) = Self::home_config_path() {
            paths.push(home_path);
        }

        paths.push(PathBuf::from("./vip-client.yaml"));

        paths.into_iter().find(|p: &PathBuf| p.exists() && p.is_file())
    }

    /// Get home directory config path
    fn home_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".config/seesaw/vip-client.yaml"))
    }

    /// Convert to the runtime ClientConfig
    pub fn to_client_config(&self) -> ClientConfig {
        ClientConfig {
            name: self.client.name.clone(),
            vip: IpAddr::V4(self.client.vip),
            data_ip: self.client.data_ip,
            health_interval: self.coordinator.health_interval,
            read_timeout: self.coordinator.read_timeout,
            relay_workers: self.relay.workers,
            queue_depth: self.relay.queue_depth,
            poll_interval: self.relay.poll_interval,
        }
    }
}
