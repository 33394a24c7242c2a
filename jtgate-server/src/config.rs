//! Gateway configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via JTGATE_CONFIG)
//! 3. Environment variables

use jtgate_core::FailurePolicy;
use jtgate_protocol::codec::DEFAULT_MAX_FRAME_LEN;
use jtgate_protocol::subpackage::{DEFAULT_MAX_BUFFERED, DEFAULT_MAX_PENDING};
use jtgate_protocol::{DEFAULT_PORT, MAX_BODY_LEN, MIN_FRAME_LEN};
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Gateway configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Terminal listener configuration.
    pub network: NetworkConfig,
    /// Session tracking configuration.
    pub session: SessionConfig,
    /// Processing chain configuration.
    pub pipeline: PipelineConfig,
    /// Metrics configuration.
    pub metrics: MetricsConfig,
}

impl Config {
    /// Loads configuration from file, then applies environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var("JTGATE_CONFIG") {
            Ok(path) => Self::from_file(path)?,
            Err(_) => Self::default(),
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::Parse(path.to_path_buf(), e.to_string()))
    }

    /// Loads configuration from environment variables only.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    fn apply_env_overrides(&mut self) {
        self.network.apply_env_overrides();
        self.session.apply_env_overrides();
        self.pipeline.apply_env_overrides();
        self.metrics.apply_env_overrides();
    }

    /// Rejects settings the gateway cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.network.idle_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "network.idle_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.network.max_connections == 0 {
            return Err(ConfigError::Validation(
                "network.max_connections must be greater than zero".to_string(),
            ));
        }
        if self.network.max_pending_subpackages == 0 {
            return Err(ConfigError::Validation(
                "network.max_pending_subpackages must be greater than zero".to_string(),
            ));
        }
        if self.network.max_subpackage_bytes < MAX_BODY_LEN {
            return Err(ConfigError::Validation(format!(
                "network.max_subpackage_bytes must be at least {}",
                MAX_BODY_LEN
            )));
        }
        if self.session.timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "session.timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.session.sweep_interval_secs == 0 {
            return Err(ConfigError::Validation(
                "session.sweep_interval_secs must be greater than zero".to_string(),
            ));
        }
        if self.network.max_frame_bytes < MIN_FRAME_LEN {
            return Err(ConfigError::Validation(format!(
                "network.max_frame_bytes must be at least {}",
                MIN_FRAME_LEN
            )));
        }
        Ok(())
    }

    /// Saves configuration to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = serde_yaml::to_string(self)
            .map_err(|e| ConfigError::Parse(path.to_path_buf(), e.to_string()))?;
        std::fs::write(path, content).map_err(|e| ConfigError::Io(path.to_path_buf(), e))
    }
}

/// Terminal listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address to bind to.
    #[serde(with = "socket_addr_serde")]
    pub bind_addr: SocketAddr,
    /// Idle connection timeout in seconds.
    pub idle_timeout_secs: u64,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Largest buffered frame before it is dropped as oversized.
    pub max_frame_bytes: usize,
    /// Incomplete subpackaged messages a connection may hold.
    pub max_pending_subpackages: usize,
    /// Body bytes a connection may hold for incomplete subpackaged messages.
    pub max_subpackage_bytes: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            idle_timeout_secs: 300,
            max_connections: 10_000,
            max_frame_bytes: DEFAULT_MAX_FRAME_LEN,
            max_pending_subpackages: DEFAULT_MAX_PENDING,
            max_subpackage_bytes: DEFAULT_MAX_BUFFERED,
        }
    }
}

impl NetworkConfig {
    fn apply_env_overrides(&mut self) {
        env_parse("JTGATE_BIND", &mut self.bind_addr);
        env_parse("JTGATE_IDLE_TIMEOUT", &mut self.idle_timeout_secs);
        env_parse("JTGATE_MAX_CONNECTIONS", &mut self.max_connections);
        env_parse("JTGATE_MAX_FRAME_BYTES", &mut self.max_frame_bytes);
        env_parse("JTGATE_MAX_PENDING_SUBPACKAGES", &mut self.max_pending_subpackages);
        env_parse("JTGATE_MAX_SUBPACKAGE_BYTES", &mut self.max_subpackage_bytes);
    }

    /// Returns idle timeout as Duration.
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

/// Session tracking configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Sessions idle longer than this are swept.
    pub timeout_secs: u64,
    /// How often the sweeper runs.
    pub sweep_interval_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 1800,
            sweep_interval_secs: 60,
        }
    }
}

impl SessionConfig {
    fn apply_env_overrides(&mut self) {
        env_parse("JTGATE_SESSION_TIMEOUT", &mut self.timeout_secs);
        env_parse("JTGATE_SWEEP_INTERVAL", &mut self.sweep_interval_secs);
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Processing chain configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Fail messages that break a validation rule instead of warning.
    pub strict_validation: bool,
    /// Keep running stages after a stage reports FAILED.
    pub continue_on_failure: bool,
    /// Keep running stages after a stage errors or panics.
    pub continue_on_error: bool,
    /// Re-runs allowed for a stage that asks to retry.
    pub max_retries: u32,
    /// Delay between retries in milliseconds.
    pub retry_backoff_ms: u64,
    /// Partial subpackaged messages older than this are discarded.
    pub subpackage_timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            strict_validation: false,
            continue_on_failure: false,
            continue_on_error: false,
            max_retries: 2,
            retry_backoff_ms: 0,
            subpackage_timeout_secs: 60,
        }
    }
}

impl PipelineConfig {
    fn apply_env_overrides(&mut self) {
        env_flag("JTGATE_STRICT_VALIDATION", &mut self.strict_validation);
        env_flag("JTGATE_CONTINUE_ON_FAILURE", &mut self.continue_on_failure);
        env_flag("JTGATE_CONTINUE_ON_ERROR", &mut self.continue_on_error);
        env_parse("JTGATE_MAX_RETRIES", &mut self.max_retries);
    }

    pub fn failure_policy(&self) -> FailurePolicy {
        FailurePolicy {
            continue_on_failure: self.continue_on_failure,
            continue_on_error: self.continue_on_error,
            max_retries: self.max_retries,
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
        }
    }

    pub fn subpackage_timeout(&self) -> Duration {
        Duration::from_secs(self.subpackage_timeout_secs)
    }
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Enable the metrics and operator HTTP server.
    pub enabled: bool,
    /// Address to bind the metrics server to.
    #[serde(with = "socket_addr_serde")]
    pub bind_addr: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 9808)),
        }
    }
}

impl MetricsConfig {
    fn apply_env_overrides(&mut self) {
        env_flag("JTGATE_METRICS_ENABLED", &mut self.enabled);
        env_parse("JTGATE_METRICS_BIND", &mut self.bind_addr);
    }
}

/// Overwrites `target` when the variable is set and parses.
fn env_parse<T: FromStr>(name: &str, target: &mut T) {
    if let Ok(value) = std::env::var(name) {
        match value.parse() {
            Ok(parsed) => *target = parsed,
            Err(_) => tracing::warn!("Ignoring unparseable {}={}", name, value),
        }
    }
}

fn env_flag(name: &str, target: &mut bool) {
    if let Ok(value) = std::env::var(name) {
        *target = value == "1" || value.eq_ignore_ascii_case("true");
    }
}

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{}': {}", .0.display(), .1)]
    Io(PathBuf, #[source] std::io::Error),

    #[error("failed to parse config file '{}': {}", .0.display(), .1)]
    Parse(PathBuf, String),

    #[error("configuration validation failed: {0}")]
    Validation(String),
}

/// Serializes `SocketAddr` as a plain string in YAML.
mod socket_addr_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::net::SocketAddr;

    pub fn serialize<S>(addr: &SocketAddr, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&addr.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<SocketAddr, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
