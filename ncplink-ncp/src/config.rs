//! Co-processor configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via NCPLINK_CONFIG)
//! 3. Environment variables

use crate::state::NetworkParams;
use ncplink_bus::{BusConfig, SerialParams};
use ncplink_protocol::DEFAULT_PORT;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Co-processor configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Physical link configuration.
    pub link: LinkConfig,
    /// Queue sizing and timeouts.
    pub bus: BusSettings,
    /// Initial network parameters.
    pub network: NetworkParams,
    /// Metrics configuration.
    pub metrics: MetricsConfig,
}

impl Config {
    /// Loads configuration from file, then applies environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("NCPLINK_CONFIG") {
            config = Self::from_file(&path)?;
        }

        config.apply_env_overrides();
        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        let config: Config = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        Ok(config)
    }

    /// Loads configuration from environment variables only.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Applies overrides from any key lookup, using the environment
    /// variable names as keys.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        self.link.apply_overrides(&lookup);
        self.bus.apply_overrides(&lookup);
        self.metrics.apply_overrides(&lookup);

        if let Some(pan_id) = lookup("NCPLINK_PAN_ID").and_then(|v| parse_u16(&v)) {
            self.network.pan_id = pan_id;
        }
        if let Some(channel) = lookup("NCPLINK_CHANNEL").and_then(|v| v.trim().parse().ok()) {
            self.network.channel = channel;
        }
    }

    /// Saves configuration to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = serde_yaml::to_string(self)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        std::fs::write(path, content).map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        Ok(())
    }

    /// Checks cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.link.validate()?;
        self.bus.validate()?;
        if !(11..=26).contains(&self.network.channel) {
            return Err(ConfigError::ValidationError(format!(
                "channel {} outside 11..=26",
                self.network.channel
            )));
        }
        Ok(())
    }
}

/// How the co-processor reaches its host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkMode {
    /// Accept host connections on a TCP socket.
    #[default]
    Tcp,
    /// Read and write a serial device or pty.
    Device,
}

/// Link configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    pub mode: LinkMode,
    /// Address to bind to in TCP mode.
    #[serde(with = "socket_addr_serde")]
    pub bind_addr: SocketAddr,
    /// Device path in device mode.
    pub device: Option<PathBuf>,
    /// Line settings, passed through untouched.
    pub serial: SerialParams,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            mode: LinkMode::Tcp,
            bind_addr: SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)),
            device: None,
            serial: SerialParams::default(),
        }
    }
}

impl LinkConfig {
    fn apply_overrides(&mut self, lookup: &impl Fn(&str) -> Option<String>) {
        if let Some(mode) = lookup("NCPLINK_LINK_MODE") {
            match mode.to_lowercase().as_str() {
                "tcp" => self.mode = LinkMode::Tcp,
                "device" | "serial" => self.mode = LinkMode::Device,
                _ => {}
            }
        }

        if let Some(addr) = lookup("NCPLINK_BIND") {
            if let Ok(parsed) = addr.parse() {
                self.bind_addr = parsed;
            }
        }

        if let Some(path) = lookup("NCPLINK_DEVICE") {
            self.device = Some(PathBuf::from(path));
        }

        if let Some(baud) = lookup("NCPLINK_BAUD") {
            if let Ok(rate) = baud.parse() {
                self.serial.baud_rate = rate;
            }
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.mode == LinkMode::Device && self.device.is_none() {
            return Err(ConfigError::ValidationError(
                "device mode but link.device not set".to_string(),
            ));
        }
        Ok(())
    }
}

/// Queue sizing and timeouts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusSettings {
    /// Inbound byte queue capacity.
    pub inbound_capacity: usize,
    /// Outbound byte queue capacity.
    pub outbound_capacity: usize,
    /// Bound on how long a write waits for outbound space, in milliseconds.
    pub output_timeout_ms: u64,
    /// Size of a single link read.
    pub read_buffer_size: usize,
    /// Engine events buffered before new ones are dropped.
    pub event_queue_len: usize,
    /// APS events held per mailbox for polling hosts.
    pub aps_mailbox_depth: usize,
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            inbound_capacity: ncplink_bus::bus::DEFAULT_QUEUE_CAPACITY,
            outbound_capacity: ncplink_bus::bus::DEFAULT_QUEUE_CAPACITY,
            output_timeout_ms: 50,
            read_buffer_size: ncplink_bus::bus::DEFAULT_READ_BUFFER_SIZE,
            event_queue_len: 60,
            aps_mailbox_depth: crate::handler::DEFAULT_MAILBOX_DEPTH,
        }
    }
}

impl BusSettings {
    fn apply_overrides(&mut self, lookup: &impl Fn(&str) -> Option<String>) {
        if let Some(ms) = lookup("NCPLINK_OUTPUT_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            self.output_timeout_ms = ms;
        }
        if let Some(n) = lookup("NCPLINK_INBOUND_CAPACITY").and_then(|v| v.parse().ok()) {
            self.inbound_capacity = n;
        }
        if let Some(n) = lookup("NCPLINK_OUTBOUND_CAPACITY").and_then(|v| v.parse().ok()) {
            self.outbound_capacity = n;
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.inbound_capacity == 0 || self.outbound_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "queue capacities must be non-zero".to_string(),
            ));
        }
        if self.event_queue_len == 0 {
            return Err(ConfigError::ValidationError(
                "event_queue_len must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns output timeout as Duration.
    pub fn output_timeout(&self) -> Duration {
        Duration::from_millis(self.output_timeout_ms)
    }

    /// Builds the bus configuration, carrying the link's serial settings.
    pub fn bus_config(&self, serial: &SerialParams) -> BusConfig {
        BusConfig::new()
            .with_capacity(self.inbound_capacity, self.outbound_capacity)
            .with_output_timeout(self.output_timeout())
            .with_read_buffer_size(self.read_buffer_size)
            .with_serial(serial.clone())
    }
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Enable metrics HTTP server.
    #[serde(default)]
    pub enabled: bool,
    /// Address to bind the metrics server to.
    #[serde(with = "socket_addr_serde")]
    pub bind_addr: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 9540)),
        }
    }
}

impl MetricsConfig {
    fn apply_overrides(&mut self, lookup: &impl Fn(&str) -> Option<String>) {
        if let Some(enabled) = lookup("NCPLINK_METRICS_ENABLED") {
            self.enabled = enabled == "1" || enabled.to_lowercase() == "true";
        }
        if let Some(addr) = lookup("NCPLINK_METRICS_BIND") {
            if let Ok(parsed) = addr.parse() {
                self.bind_addr = parsed;
            }
        }
    }
}

/// Parses a decimal or `0x`-prefixed hexadecimal u16.
fn parse_u16(value: &str) -> Option<u16> {
    let value = value.trim();
    match value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
    {
        Some(hex) => u16::from_str_radix(hex, 16).ok(),
        None => value.parse().ok(),
    }
}

/// Configuration error.
#[derive(Debug)]
pub enum ConfigError {
    IoError(PathBuf, std::io::Error),
    ParseError(PathBuf, String),
    ValidationError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(path, e) => {
                write!(f, "failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::ValidationError(msg) => {
                write!(f, "configuration validation failed: {}", msg)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Custom serde module for SocketAddr (to handle as string in YAML).
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

#[cfg(test)]
mod tests {
    use super::*;
    use ncplink_protocol::DeviceRole;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.link.mode, LinkMode::Tcp);
        assert_eq!(config.link.bind_addr.port(), 5540);
        assert_eq!(config.bus.inbound_capacity, 20480);
        assert_eq!(config.bus.output_timeout(), Duration::from_millis(50));
        assert_eq!(config.bus.event_queue_len, 60);
        assert_eq!(config.network.role, DeviceRole::Coordinator);
        assert!(!config.metrics.enabled);
        assert_eq!(config.metrics.bind_addr.port(), 9540);
        config.validate().unwrap();
    }

    #[test]
    fn test_yaml_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ncp.yaml");

        let mut config = Config::default();
        config.link.mode = LinkMode::Device;
        config.link.device = Some(PathBuf::from("/dev/ttyUSB0"));
        config.link.serial.baud_rate = 460_800;
        config.network.pan_id = 0xBEEF;
        config.save(&path).unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded.link.mode, LinkMode::Device);
        assert_eq!(loaded.link.device, config.link.device);
        assert_eq!(loaded.link.serial.baud_rate, 460_800);
        assert_eq!(loaded.network, config.network);
        loaded.validate().unwrap();
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let yaml = "link:\n  mode: tcp\n  bind_addr: \"0.0.0.0:6000\"\nnetwork:\n  channel: 20\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.link.bind_addr.port(), 6000);
        assert_eq!(config.network.channel, 20);
        assert_eq!(config.network.frame_counter, 0x1388);
        assert_eq!(config.bus.outbound_capacity, 20480);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = Config::from_file("/nonexistent/ncplink.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::IoError(..)));
        assert!(err.to_string().contains("failed to read config file"));
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            ("NCPLINK_LINK_MODE", "device"),
            ("NCPLINK_DEVICE", "/dev/pts/3"),
            ("NCPLINK_BAUD", "230400"),
            ("NCPLINK_OUTPUT_TIMEOUT_MS", "250"),
            ("NCPLINK_INBOUND_CAPACITY", "4096"),
            ("NCPLINK_PAN_ID", "0x1a2b"),
            ("NCPLINK_CHANNEL", "15"),
            ("NCPLINK_METRICS_ENABLED", "true"),
            ("NCPLINK_METRICS_BIND", "0.0.0.0:9999"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_overrides(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.link.mode, LinkMode::Device);
        assert_eq!(config.link.device, Some(PathBuf::from("/dev/pts/3")));
        assert_eq!(config.link.serial.baud_rate, 230_400);
        assert_eq!(config.bus.output_timeout_ms, 250);
        assert_eq!(config.bus.inbound_capacity, 4096);
        assert_eq!(config.network.pan_id, 0x1A2B);
        assert_eq!(config.network.channel, 15);
        assert!(config.metrics.enabled);
        assert_eq!(config.metrics.bind_addr.port(), 9999);
        config.validate().unwrap();
    }

    #[test]
    fn test_parse_u16() {
        assert_eq!(parse_u16("4660"), Some(0x1234));
        assert_eq!(parse_u16("0X1234"), Some(0x1234));
        assert_eq!(parse_u16("0x10000"), None);
        assert_eq!(parse_u16("pan"), None);
    }

    #[test]
    fn test_validation() {
        let mut config = Config::default();
        config.link.mode = LinkMode::Device;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));

        let mut config = Config::default();
        config.bus.inbound_capacity = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.network.channel = 27;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bus_config_carries_serial() {
        let config = Config::default();
        let bus = config.bus.bus_config(&config.link.serial);
        assert_eq!(bus.inbound_capacity, 20480);
        assert_eq!(bus.serial.baud_rate, 115_200);
        assert_eq!(bus.output_timeout, Duration::from_millis(50));
    }
}
