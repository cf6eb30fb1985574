//! # Client Configuration
//!
//! Configuration for the printer endpoint, exchange timings, connectivity
//! debouncing and the input limits the front end enforces.
//!
//! ## Example: TOML Configuration
//!
//! ```toml
//! [printer]
//! host = "192.168.1.50"
//! port = 8080
//! name = "Two Trees Bluer"
//!
//! [connection]
//! settle_delay_ms = 3000
//!
//! [client]
//! failures_to_disconnect = 3
//! ```
//!
//! Every field has a default, so a file containing only `[printer] host = ...`
//! is a complete configuration.

// src/config.rs - Single configuration file
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::connection::{Endpoint, ExchangeTimings};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Main configuration struct: printer endpoint, connection timings, client and limits.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub printer: PrinterConfig,
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
}

/// Where the printer lives.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PrinterConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub name: Option<String>,
}

impl Default for PrinterConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            name: None,
        }
    }
}

/// Per-exchange socket timings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConnectionConfig {
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    #[serde(default = "default_banner_lines")]
    pub banner_lines: usize,
    #[serde(default = "default_drain_chunk_size")]
    pub drain_chunk_size: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            read_timeout_ms: default_read_timeout_ms(),
            settle_delay_ms: default_settle_delay_ms(),
            banner_lines: default_banner_lines(),
            drain_chunk_size: default_drain_chunk_size(),
        }
    }
}

/// Connectivity debouncing and polling.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClientConfig {
    #[serde(default = "default_failures_to_disconnect")]
    pub failures_to_disconnect: u32,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            failures_to_disconnect: default_failures_to_disconnect(),
            poll_interval_secs: default_poll_interval_secs(),
        }
    }
}

/// Input bounds for target temperatures, applied by the front end only.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LimitsConfig {
    #[serde(default = "default_min_temp")]
    pub bed_min_temp: f64,
    #[serde(default = "default_bed_max_temp")]
    pub bed_max_temp: f64,
    #[serde(default = "default_min_temp")]
    pub extruder_min_temp: f64,
    #[serde(default = "default_extruder_max_temp")]
    pub extruder_max_temp: f64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            bed_min_temp: default_min_temp(),
            bed_max_temp: default_bed_max_temp(),
            extruder_min_temp: default_min_temp(),
            extruder_max_temp: default_extruder_max_temp(),
        }
    }
}

impl Config {
    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.printer.host.clone(), self.printer.port)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.client.poll_interval_secs)
    }

    /// Reject values that would make the client misbehave.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.printer.host.trim().is_empty() {
            return Err(ConfigError::Invalid("printer.host must not be empty".to_string()));
        }
        if self.printer.port == 0 {
            return Err(ConfigError::Invalid("printer.port must be non-zero".to_string()));
        }
        if self.connection.drain_chunk_size == 0 {
            return Err(ConfigError::Invalid(
                "connection.drain_chunk_size must be non-zero".to_string(),
            ));
        }
        if self.client.failures_to_disconnect == 0 {
            return Err(ConfigError::Invalid(
                "client.failures_to_disconnect must be at least 1".to_string(),
            ));
        }
        if self.client.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "client.poll_interval_secs must be at least 1".to_string(),
            ));
        }
        if self.limits.bed_min_temp > self.limits.bed_max_temp {
            return Err(ConfigError::Invalid(format!(
                "limits.bed_min_temp ({}) exceeds limits.bed_max_temp ({})",
                self.limits.bed_min_temp, self.limits.bed_max_temp
            )));
        }
        if self.limits.extruder_min_temp > self.limits.extruder_max_temp {
            return Err(ConfigError::Invalid(format!(
                "limits.extruder_min_temp ({}) exceeds limits.extruder_max_temp ({})",
                self.limits.extruder_min_temp, self.limits.extruder_max_temp
            )));
        }
        Ok(())
    }
}

impl ConnectionConfig {
    pub fn timings(&self) -> ExchangeTimings {
        ExchangeTimings {
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            read_timeout: Duration::from_millis(self.read_timeout_ms),
            settle_delay: Duration::from_millis(self.settle_delay_ms),
            banner_lines: self.banner_lines,
            drain_chunk_size: self.drain_chunk_size,
        }
    }
}

fn default_host() -> String { "192.168.1.50".to_string() }
fn default_port() -> u16 { 8080 }
fn default_connect_timeout_ms() -> u64 { 2000 }
fn default_read_timeout_ms() -> u64 { 4000 }
fn default_settle_delay_ms() -> u64 { 4000 }
fn default_banner_lines() -> usize { 4 }
fn default_drain_chunk_size() -> usize { 10_000 }
fn default_failures_to_disconnect() -> u32 { 3 }
fn default_poll_interval_secs() -> u64 { 30 }
fn default_min_temp() -> f64 { 0.0 }
fn default_bed_max_temp() -> f64 { 80.0 }
fn default_extruder_max_temp() -> f64 { 250.0 }

/// Load and validate a TOML configuration file.
pub fn load_config(path: &str) -> Result<Config, ConfigError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) => {
            tracing::error!("Failed to read config file '{}': {}", path, e);
            return Err(ConfigError::Io(e));
        }
    };
    let config: Config = match toml::from_str(&contents) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Failed to parse config TOML: {}", e);
            return Err(ConfigError::Toml(e));
        }
    };
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config: Config = toml::from_str("[printer]\nhost = \"10.0.0.7\"\n").unwrap();
        assert_eq!(config.printer.host, "10.0.0.7");
        assert_eq!(config.printer.port, 8080);
        assert_eq!(config.client.failures_to_disconnect, 3);
        assert_eq!(config.connection.timings(), ExchangeTimings::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_overrides() {
        let toml_str = r#"
            [printer]
            host = "bluer.local"
            port = 23
            name = "Bluer"

            [connection]
            settle_delay_ms = 1500
            banner_lines = 2

            [limits]
            bed_max_temp = 100.0
        "#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.endpoint(), Endpoint::new("bluer.local", 23));
        assert_eq!(config.printer.name.as_deref(), Some("Bluer"));
        let timings = config.connection.timings();
        assert_eq!(timings.settle_delay, Duration::from_millis(1500));
        assert_eq!(timings.banner_lines, 2);
        assert_eq!(timings.read_timeout, Duration::from_secs(4));
        assert_eq!(config.limits.bed_max_temp, 100.0);
        assert_eq!(config.limits.extruder_max_temp, 250.0);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = Config::default();
        config.printer.host = " ".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = Config::default();
        config.client.failures_to_disconnect = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let config: Config = toml::from_str("[client]\npoll_interval_secs = 0\n").unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = Config::default();
        config.limits.extruder_min_temp = 300.0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_unknown_types_fail_to_parse() {
        let result: Result<Config, _> = toml::from_str("[printer]\nport = \"eighty\"\n");
        assert!(result.is_err());
    }
}
