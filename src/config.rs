//! Device and gateway configuration
//!
//! Loaded from a TOML file. Secrets are never stored in the file: the
//! `[device]` section names the environment variable that holds them and the
//! value is resolved at runtime.

use crate::connection::ConnectionSettings;
use crate::credentials::{DeviceIdentity, DEFAULT_APP_ID};
use crate::gateway::GatewayProfile;
use crate::protocol::{topics, Attribute, Classify, DeviceRecord, MAX_TOPIC_LEN};
use crate::transport::mqtt::BrokerAddress;
use crate::transport::{BufferOptions, ConnectOptions};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LinkConfig {
    pub device: DeviceSection,
    pub mqtt: MqttSection,
    /// Gateway layer (optional; plain devices omit it)
    pub gateway: Option<GatewaySection>,
}

/// Device identity section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceSection {
    pub product_id: String,
    pub device_name: String,
    /// Environment variable containing the base64 shared secret
    pub secret_env: Option<String>,
    #[serde(default = "default_app_id")]
    pub app_id: String,
}

fn default_app_id() -> String {
    DEFAULT_APP_ID.to_string()
}

/// MQTT section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MqttSection {
    /// Broker URL (tcp://, ssl://, mqtt:// or mqtts://)
    pub broker_url: String,
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout_secs: u64,
    #[serde(default = "default_true")]
    pub automatic_reconnect: bool,
    #[serde(default = "default_true")]
    pub clean_session: bool,
    #[serde(default = "default_max_topic_len")]
    pub max_topic_len: usize,
    /// Offline publish buffer (disabled when absent)
    pub buffer: Option<BufferSection>,
}

fn default_keep_alive() -> u64 {
    240
}

fn default_connection_timeout() -> u64 {
    8
}

fn default_true() -> bool {
    true
}

fn default_max_topic_len() -> usize {
    MAX_TOPIC_LEN
}

/// Offline publish buffer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BufferSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_buffer_size")]
    pub size: usize,
    /// Accepted but not applied: a full request channel refuses new publishes
    #[serde(default)]
    pub delete_oldest: bool,
}

fn default_buffer_size() -> usize {
    1024
}

/// Gateway section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GatewaySection {
    /// Event topic root (default: `{product_id}/{device_name}`)
    pub topic_root: Option<String>,
    pub name: String,
    #[serde(default)]
    pub device_type: String,
    #[serde(default)]
    pub manufacturer: String,
    #[serde(default)]
    pub subdevices: Vec<SubdeviceSection>,
}

/// Sub-device profile registered at startup
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubdeviceSection {
    pub product_id: String,
    pub device_name: String,
    pub name: Option<String>,
    pub alias_id: Option<i64>,
    /// Defaults to the product id
    pub device_type: Option<String>,
    /// Defaults to the gateway's manufacturer
    pub manufacturer: Option<String>,
    pub vaddr: Option<String>,
    #[serde(default)]
    pub attributes: Vec<Attribute>,
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl LinkConfig {
    /// Load configuration from a TOML file and validate it
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: LinkConfig = toml::from_str(content)?;
        config.validate()?;
        for warning in config.warnings() {
            warn!("{}", warning);
        }
        Ok(config)
    }

    /// Settings that parse but have no effect
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if let Some(buffer) = &self.mqtt.buffer {
            if buffer.enabled && buffer.delete_oldest {
                warnings.push(
                    "mqtt.buffer.delete_oldest is not supported; publishes are refused when the buffer is full"
                        .to_string(),
                );
            }
        }
        warnings
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_identifier("device.product_id", &self.device.product_id)?;
        validate_identifier("device.device_name", &self.device.device_name)?;

        BrokerAddress::parse(&self.mqtt.broker_url).map_err(|_| {
            ConfigError::InvalidConfig(format!(
                "broker_url '{}' must use tcp://, ssl://, mqtt:// or mqtts://",
                self.mqtt.broker_url
            ))
        })?;

        if self.mqtt.max_topic_len == 0 {
            return Err(ConfigError::InvalidConfig(
                "mqtt.max_topic_len must be greater than zero".to_string(),
            ));
        }

        if let Some(buffer) = &self.mqtt.buffer {
            if buffer.enabled && buffer.size == 0 {
                return Err(ConfigError::InvalidConfig(
                    "mqtt.buffer.size must be greater than zero when enabled".to_string(),
                ));
            }
        }

        if let Some(gateway) = &self.gateway {
            for subdev in &gateway.subdevices {
                validate_identifier("gateway.subdevices.product_id", &subdev.product_id)?;
                validate_identifier("gateway.subdevices.device_name", &subdev.device_name)?;
            }
        }

        Ok(())
    }

    /// Get the device secret from its environment variable
    ///
    /// `Ok(None)` when no `secret_env` is configured.
    pub fn get_device_secret(&self) -> Result<Option<String>, ConfigError> {
        match &self.device.secret_env {
            Some(name) => std::env::var(name)
                .map(Some)
                .map_err(|_| ConfigError::EnvVarNotFound(name.clone())),
            None => Ok(None),
        }
    }

    /// Device identity with the secret resolved from the environment
    pub fn identity(&self) -> Result<DeviceIdentity, ConfigError> {
        let mut identity = DeviceIdentity::new(&self.device.product_id, &self.device.device_name)
            .with_app_id(&self.device.app_id);
        if let Some(secret) = self.get_device_secret()? {
            identity = identity.with_secret(secret);
        }
        Ok(identity)
    }

    pub fn connection_settings(&self) -> Result<ConnectionSettings, ConfigError> {
        let settings = ConnectionSettings::new(&self.mqtt.broker_url, self.identity()?)
            .with_max_topic_len(self.mqtt.max_topic_len);
        Ok(match self.buffer_options() {
            Some(buffer) => settings.with_buffer(buffer),
            None => settings,
        })
    }

    pub fn connect_options(&self) -> ConnectOptions {
        ConnectOptions {
            keep_alive: Duration::from_secs(self.mqtt.keep_alive_secs),
            connection_timeout: Duration::from_secs(self.mqtt.connection_timeout_secs),
            automatic_reconnect: self.mqtt.automatic_reconnect,
            clean_session: self.mqtt.clean_session,
        }
    }

    pub fn buffer_options(&self) -> Option<BufferOptions> {
        self.mqtt.buffer.as_ref().map(|buffer| BufferOptions {
            enabled: buffer.enabled,
            size: buffer.size,
            delete_oldest: buffer.delete_oldest,
        })
    }

    pub fn gateway_profile(&self) -> Option<GatewayProfile> {
        self.gateway.as_ref().map(|gateway| {
            let profile = GatewayProfile::new(&gateway.name)
                .with_device_type(&gateway.device_type)
                .with_manufacturer(&gateway.manufacturer);
            match &gateway.topic_root {
                Some(root) => profile.with_topic_root(root),
                None => profile,
            }
        })
    }

    /// Sub-device records keyed by (product id, device name)
    pub fn subdevice_records(&self) -> Vec<(String, String, DeviceRecord)> {
        let Some(gateway) = &self.gateway else {
            return Vec::new();
        };
        gateway
            .subdevices
            .iter()
            .map(|subdev| {
                let record = DeviceRecord {
                    device_id: format!(
                        "{}#{}#{}",
                        self.device.device_name, subdev.product_id, subdev.device_name
                    ),
                    host_id: self.device.device_name.clone(),
                    classify: Classify::Sub,
                    name: subdev.name.clone().unwrap_or_else(|| subdev.device_name.clone()),
                    alias_id: subdev.alias_id,
                    device_type: subdev
                        .device_type
                        .clone()
                        .unwrap_or_else(|| subdev.product_id.clone()),
                    manufacturer_name: subdev
                        .manufacturer
                        .clone()
                        .unwrap_or_else(|| gateway.manufacturer.clone()),
                    vaddr: subdev.vaddr.clone(),
                    attributes: subdev.attributes.clone(),
                };
                (subdev.product_id.clone(), subdev.device_name.clone(), record)
            })
            .collect()
    }

    /// Create a test configuration for unit testing
    #[cfg(test)]
    pub fn test_config() -> Self {
        let toml_content = r#"
[device]
product_id = "PID"
device_name = "gw-1"

[mqtt]
broker_url = "tcp://localhost:1883"
"#;
        toml::from_str(toml_content).expect("Test config should parse")
    }
}

/// Identifiers become topic levels, so they must not contain separators or wildcards
fn validate_identifier(field: &str, value: &str) -> Result<(), ConfigError> {
    topics::validate_identifier(value)
        .map_err(|e| ConfigError::InvalidIdentifier(format!("{field} '{value}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_defaults() {
        let config = LinkConfig::test_config();
        assert_eq!(config.device.app_id, DEFAULT_APP_ID);
        assert_eq!(config.mqtt.keep_alive_secs, 240);
        assert_eq!(config.mqtt.connection_timeout_secs, 8);
        assert!(config.mqtt.automatic_reconnect);
        assert!(config.mqtt.clean_session);
        assert_eq!(config.mqtt.max_topic_len, MAX_TOPIC_LEN);
        assert!(config.mqtt.buffer.is_none());
        assert!(config.gateway.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_full_config() {
        let toml_content = r#"
[device]
product_id = "PID"
device_name = "gw-1"
secret_env = "GATELINK_TEST_SECRET_UNSET"
app_id = "42"

[mqtt]
broker_url = "ssl://broker.example.com:8883"
keep_alive_secs = 60
automatic_reconnect = false

[mqtt.buffer]
size = 16

[gateway]
name = "hall gateway"
device_type = "gw"
manufacturer = "ACME"

[[gateway.subdevices]]
product_id = "lamp"
device_name = "l-1"
alias_id = 6002
vaddr = "LIGHT-11"
attributes = [{ index = "1001", value = "1" }]
"#;
        let config = LinkConfig::from_toml_str(toml_content).unwrap();
        assert_eq!(config.device.app_id, "42");
        assert_eq!(config.mqtt.keep_alive_secs, 60);

        let buffer = config.buffer_options().unwrap();
        assert!(buffer.enabled);
        assert_eq!(buffer.size, 16);
        assert!(!buffer.delete_oldest);
        assert!(config.warnings().is_empty());

        let options = config.connect_options();
        assert!(!options.automatic_reconnect);
        assert_eq!(options.keep_alive, Duration::from_secs(60));

        let profile = config.gateway_profile().unwrap();
        assert_eq!(profile.manufacturer, "ACME");
        assert!(profile.topic_root.is_none());

        let records = config.subdevice_records();
        assert_eq!(records.len(), 1);
        let (pid, dev, record) = &records[0];
        assert_eq!((pid.as_str(), dev.as_str()), ("lamp", "l-1"));
        assert_eq!(record.device_id, "gw-1#lamp#l-1");
        assert_eq!(record.device_type, "lamp");
        assert_eq!(record.manufacturer_name, "ACME");
        assert_eq!(record.classify, Classify::Sub);
        assert_eq!(record.attributes, vec![Attribute::new("1001", "1")]);
    }

    #[test]
    fn test_invalid_identifiers() {
        for bad in ["", "a/b", "a+b", "a#", "a b"] {
            assert!(matches!(
                validate_identifier("device.product_id", bad),
                Err(ConfigError::InvalidIdentifier(_))
            ));
        }
        assert!(validate_identifier("device.product_id", "PID-01_x").is_ok());
    }

    #[test]
    fn test_invalid_broker_scheme() {
        let toml_content = r#"
[device]
product_id = "PID"
device_name = "gw-1"

[mqtt]
broker_url = "http://localhost:1883"
"#;
        assert!(matches!(
            LinkConfig::from_toml_str(toml_content),
            Err(ConfigError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_missing_secret_env() {
        let mut config = LinkConfig::test_config();
        assert_eq!(config.get_device_secret().unwrap(), None);

        config.device.secret_env = Some("GATELINK_TEST_SECRET_DEFINITELY_UNSET".to_string());
        assert!(matches!(
            config.identity(),
            Err(ConfigError::EnvVarNotFound(_))
        ));
    }

    #[test]
    fn test_zero_buffer_rejected() {
        let mut config = LinkConfig::test_config();
        config.mqtt.buffer = Some(BufferSection {
            enabled: true,
            size: 0,
            delete_oldest: false,
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_delete_oldest_is_reported_as_unsupported() {
        let mut config = LinkConfig::test_config();
        config.mqtt.buffer = Some(BufferSection {
            enabled: true,
            size: 8,
            delete_oldest: true,
        });
        assert!(config.validate().is_ok());
        let warnings = config.warnings();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("delete_oldest"));

        config.mqtt.buffer = Some(BufferSection {
            enabled: false,
            size: 8,
            delete_oldest: true,
        });
        assert!(config.warnings().is_empty());
    }
}
