//! Configuration system for the telemetry device
//!
//! Device identity, broker endpoint, credential file locations, and publish
//! cadence are loaded from a TOML file. Credential contents themselves are
//! loaded separately by [`crate::identity::DeviceIdentity`].

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Top-level device configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceConfig {
    pub device: DeviceSection,
    pub mqtt: MqttSection,
    #[serde(default)]
    pub telemetry: TelemetrySection,
}

/// Device section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceSection {
    /// Thing name used as the MQTT client id and in the data topic
    /// (must match [a-zA-Z0-9._-]+)
    pub thing_name: String,
}

/// MQTT section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MqttSection {
    /// Broker hostname, e.g. `abc123-ats.iot.us-east-1.amazonaws.com`
    pub endpoint: String,
    /// Broker port (default: 8883)
    #[serde(default = "default_port")]
    pub port: u16,
    /// Path to the device certificate (PEM)
    pub cert_path: PathBuf,
    /// Path to the device private key (PEM)
    pub key_path: PathBuf,
    /// Path to the trust root certificate (PEM)
    pub ca_path: PathBuf,
    /// Keep-alive ping interval in seconds (default: 30)
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
}

/// Telemetry section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TelemetrySection {
    /// Publish cadence in seconds (default: 5)
    #[serde(default = "default_publish_interval_secs")]
    pub publish_interval_secs: u64,
}

impl Default for TelemetrySection {
    fn default() -> Self {
        Self {
            publish_interval_secs: default_publish_interval_secs(),
        }
    }
}

fn default_port() -> u16 {
    8883
}

fn default_keep_alive_secs() -> u64 {
    30
}

fn default_publish_interval_secs() -> u64 {
    5
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Invalid thing name: {0}")]
    InvalidThingName(String),
}

impl DeviceConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: DeviceConfig = toml::from_str(&content)?;

        validate_thing_name(&config.device.thing_name)?;

        Ok(config)
    }

    /// Create a test configuration for unit testing
    #[cfg(test)]
    pub fn test_config() -> Self {
        let toml_content = r#"
[device]
thing_name = "test-device"

[mqtt]
endpoint = "localhost"
port = 8883
cert_path = "device.cert.pem"
key_path = "device.private.key"
ca_path = "root-CA.crt"
"#;
        toml::from_str(toml_content).expect("Test config should parse")
    }
}

/// Validate thing name format
fn validate_thing_name(thing_name: &str) -> Result<(), ConfigError> {
    let valid_chars = thing_name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-');

    if thing_name.is_empty() || !valid_chars {
        return Err(ConfigError::InvalidThingName(format!(
            "Thing name '{thing_name}' must match pattern [a-zA-Z0-9._-]+"
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_config() {
        let toml_content = r#"
[device]
thing_name = "rachet"

[mqtt]
endpoint = "abc123-ats.iot.us-east-1.amazonaws.com"
port = 8883
cert_path = "certs/rachet.cert.pem"
key_path = "certs/rachet.private.key"
ca_path = "certs/root-CA.crt"
keep_alive_secs = 30

[telemetry]
publish_interval_secs = 5
"#;

        let config: DeviceConfig = toml::from_str(toml_content).unwrap();
        assert_eq!(config.device.thing_name, "rachet");
        assert_eq!(
            config.mqtt.endpoint,
            "abc123-ats.iot.us-east-1.amazonaws.com"
        );
        assert_eq!(config.mqtt.port, 8883);
        assert_eq!(config.mqtt.cert_path, PathBuf::from("certs/rachet.cert.pem"));
        assert_eq!(config.mqtt.keep_alive_secs, 30);
        assert_eq!(config.telemetry.publish_interval_secs, 5);
    }

    #[test]
    fn test_minimal_config_defaults() {
        let toml_content = r#"
[device]
thing_name = "minimal"

[mqtt]
endpoint = "localhost"
cert_path = "device.cert.pem"
key_path = "device.private.key"
ca_path = "root-CA.crt"
"#;

        let config: DeviceConfig = toml::from_str(toml_content).unwrap();
        assert_eq!(config.mqtt.port, 8883);
        assert_eq!(config.mqtt.keep_alive_secs, 30);
        assert_eq!(config.telemetry.publish_interval_secs, 5);
    }

    #[test]
    fn test_invalid_thing_name() {
        assert!(validate_thing_name("invalid@device").is_err());
        assert!(validate_thing_name("").is_err());
        assert!(validate_thing_name("valid-device_123.test").is_ok());
    }

    #[test]
    fn test_load_from_file() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[device]
thing_name = "file-device"

[mqtt]
endpoint = "localhost"
cert_path = "device.cert.pem"
key_path = "device.private.key"
ca_path = "root-CA.crt"
"#
        )
        .unwrap();

        let config = DeviceConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.device.thing_name, "file-device");
    }

    #[test]
    fn test_load_from_file_rejects_bad_thing_name() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[device]
thing_name = "bad name!"

[mqtt]
endpoint = "localhost"
cert_path = "device.cert.pem"
key_path = "device.private.key"
ca_path = "root-CA.crt"
"#
        )
        .unwrap();

        let result = DeviceConfig::load_from_file(file.path());
        assert!(matches!(result, Err(ConfigError::InvalidThingName(_))));
    }

    #[test]
    fn test_missing_section_fails() {
        let toml_content = r#"
[device]
thing_name = "no-mqtt"
"#;
        let result: Result<DeviceConfig, _> = toml::from_str(toml_content);
        assert!(result.is_err());
    }
}
