use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Smallest identifier modulus accepted; below this, wrap-around within an
/// entity's lifetime stops being theoretical.
pub const MIN_ID_MODULUS: u64 = 1 << 32;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub coordinator: CoordinatorConfig,
    pub sfu: SfuConfig,
    pub gateway: GatewayConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Timeout for every request the coordinator sends to a worker
    pub request_timeout_ms: u64,
    /// Identifier counters wrap at this modulus
    pub id_modulus: u64,
    /// Capabilities handed to clients as part of the space configuration
    pub space_capabilities: serde_json::Value,
}

impl CoordinatorConfig {
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 5_000,
            id_modulus: 1 << 53,
            space_capabilities: serde_json::json!({
                "codecs": [
                    {
                        "kind": "audio",
                        "mimeType": "audio/opus",
                        "clockRate": 48000,
                        "channels": 2
                    },
                    {
                        "kind": "video",
                        "mimeType": "video/VP8",
                        "clockRate": 90000
                    }
                ]
            }),
        }
    }
}

/// In-process media worker settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SfuConfig {
    /// First UDP port handed to transports
    pub rtc_min_port: u16,
    /// Last UDP port handed to transports (inclusive)
    pub rtc_max_port: u16,
    /// Address advertised in ICE candidates
    pub announced_ip: String,
    /// Maximum number of routers hosted by the worker (0 = unlimited)
    pub max_routers: usize,
}

impl Default for SfuConfig {
    fn default() -> Self {
        Self {
            rtc_min_port: 40000,
            rtc_max_port: 49999,
            announced_ip: "127.0.0.1".to_string(),
            max_routers: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Maximum connections per space (0 = unlimited)
    pub max_connections_per_space: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_connections_per_space: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "pretty"
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

impl Config {
    /// Load configuration from an optional file, then environment overrides
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
            }
        }

        // Override with environment variables (CONFER_COORDINATOR__REQUEST_TIMEOUT_MS, etc.)
        builder = builder.add_source(
            Environment::with_prefix("CONFER")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Load from environment variables only
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Load from file path
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        Self::load(Some(path))
    }

    /// Check the configuration, collecting every problem found
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.coordinator.request_timeout_ms == 0 {
            errors.push("coordinator.request_timeout_ms must be greater than 0".to_string());
        }
        if self.coordinator.id_modulus < MIN_ID_MODULUS {
            errors.push(format!(
                "coordinator.id_modulus must be at least {MIN_ID_MODULUS}, got {}",
                self.coordinator.id_modulus
            ));
        }
        if self.sfu.rtc_min_port == 0 || self.sfu.rtc_min_port > self.sfu.rtc_max_port {
            errors.push(format!(
                "sfu port range {}-{} is empty",
                self.sfu.rtc_min_port, self.sfu.rtc_max_port
            ));
        }
        if self.sfu.announced_ip.parse::<std::net::IpAddr>().is_err() {
            errors.push(format!(
                "sfu.announced_ip '{}' is not an IP address",
                self.sfu.announced_ip
            ));
        }
        if !matches!(self.logging.format.as_str(), "json" | "pretty") {
            errors.push(format!(
                "logging.format must be 'json' or 'pretty', got '{}'",
                self.logging.format
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.coordinator.request_timeout(), Duration::from_secs(5));
        assert!(config.coordinator.id_modulus >= MIN_ID_MODULUS);
    }

    #[test]
    fn test_validate_collects_all_errors() {
        let mut config = Config::default();
        config.coordinator.request_timeout_ms = 0;
        config.coordinator.id_modulus = 1 << 16;
        config.sfu.rtc_min_port = 50000;
        config.sfu.rtc_max_port = 40000;

        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 3);
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml = "coordinator:\n  request_timeout_ms: 250\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.coordinator.request_timeout_ms, 250);
        assert_eq!(config.coordinator.id_modulus, 1 << 53);
        assert_eq!(config.sfu.rtc_min_port, 40000);
    }
}
