//! Device configuration system
//!
//! Configuration is a TOML file with one section per collaborator. Secrets
//! (the time service key, and optionally the device key location) are never
//! written in the file itself: the file names environment variables that are
//! resolved at use time.

use crate::protocol::{DeviceIdentity, TopicScheme};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Main device configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceConfig {
    pub device: DeviceSection,
    #[serde(default)]
    pub mqtt: MqttSection,
    #[serde(default)]
    pub token: TokenSection,
    #[serde(default)]
    pub time_service: TimeServiceSection,
}

/// Device section - identity and key location
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceSection {
    /// Cloud project identifier, also the token audience
    pub project_id: String,
    /// Cloud region, e.g. "us-central1"
    pub cloud_region: String,
    /// Device registry identifier
    pub registry_id: String,
    /// Device identifier within the registry
    pub device_id: String,
    /// Path to the RSA private key (PEM), relative to the config file
    pub private_key_path: Option<PathBuf>,
    /// Environment variable holding the PEM-encoded private key
    pub private_key_env: Option<String>,
}

/// MQTT section - broker endpoint and session tuning
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MqttSection {
    #[serde(default = "default_broker_host")]
    pub broker_host: String,
    #[serde(default = "default_broker_port")]
    pub broker_port: u16,
    /// Requested keep-alive in seconds; the session clamps out-of-quota values
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
    #[serde(default)]
    pub topic_scheme: TopicScheme,
    /// How long a single pump waits for broker traffic
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
}

fn default_broker_host() -> String {
    "mqtt.googleapis.com".to_string()
}

fn default_broker_port() -> u16 {
    8883
}

fn default_keep_alive() -> u64 {
    1140 // 19 minutes
}

fn default_poll_timeout_ms() -> u64 {
    1000
}

impl Default for MqttSection {
    fn default() -> Self {
        Self {
            broker_host: default_broker_host(),
            broker_port: default_broker_port(),
            keep_alive_secs: default_keep_alive(),
            topic_scheme: TopicScheme::default(),
            poll_timeout_ms: default_poll_timeout_ms(),
        }
    }
}

/// Token section - lifetime of issued JWTs
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TokenSection {
    /// Token time-to-live in seconds (default: 43200 = 12 hours)
    #[serde(default = "default_ttl")]
    pub ttl_secs: u64,
    /// Reissue the token this many seconds before it expires
    #[serde(default = "default_refresh_margin")]
    pub refresh_margin_secs: u64,
}

fn default_ttl() -> u64 {
    43200
}

fn default_refresh_margin() -> u64 {
    300
}

impl Default for TokenSection {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl(),
            refresh_margin_secs: default_refresh_margin(),
        }
    }
}

/// Time service section - network time used for token timestamps
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimeServiceSection {
    /// Environment variable containing the time service username
    #[serde(default = "default_username_env")]
    pub username_env: String,
    /// Environment variable containing the time service key
    #[serde(default = "default_key_env")]
    pub key_env: String,
    /// Optional IANA timezone; the service guesses from the client IP otherwise
    pub timezone: Option<String>,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_username_env() -> String {
    "AIO_USERNAME".to_string()
}

fn default_key_env() -> String {
    "AIO_KEY".to_string()
}

fn default_base_url() -> String {
    "https://io.adafruit.com/api/v2".to_string()
}

fn default_timeout_secs() -> u64 {
    10
}

impl Default for TimeServiceSection {
    fn default() -> Self {
        Self {
            username_env: default_username_env(),
            key_env: default_key_env(),
            timezone: None,
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
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
    #[error("Invalid device identity: {0}")]
    InvalidIdentity(String),
    #[error("Missing credentials: {0}")]
    MissingCredentials(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl DeviceConfig {
    /// Load configuration from a TOML file and validate it
    ///
    /// A relative `private_key_path` is resolved against the directory of the
    /// configuration file.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config = Self::from_toml_str(&content)?;

        if let Some(key_path) = &config.device.private_key_path {
            if key_path.is_relative() {
                if let Some(parent) = path.parent() {
                    config.device.private_key_path = Some(parent.join(key_path));
                }
            }
        }

        Ok(config)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: DeviceConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field constraints
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.identity()?;

        if self.token.ttl_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "token.ttl_secs must be greater than 0".to_string(),
            ));
        }

        if self.token.refresh_margin_secs >= self.token.ttl_secs {
            return Err(ConfigError::InvalidConfig(format!(
                "token.refresh_margin_secs ({}) must be smaller than token.ttl_secs ({})",
                self.token.refresh_margin_secs, self.token.ttl_secs
            )));
        }

        if self.device.private_key_path.is_none() && self.device.private_key_env.is_none() {
            return Err(ConfigError::MissingCredentials(
                "device.private_key_path or device.private_key_env must be set".to_string(),
            ));
        }

        Ok(())
    }

    /// Build the immutable device identity from the device section
    pub fn identity(&self) -> Result<DeviceIdentity, ConfigError> {
        DeviceIdentity::new(
            &self.device.project_id,
            &self.device.cloud_region,
            &self.device.registry_id,
            &self.device.device_id,
        )
    }

    /// Helper method to get environment variable with error propagation
    fn get_env_var_required(env_var_name: &str) -> Result<String, ConfigError> {
        std::env::var(env_var_name)
            .map_err(|_| ConfigError::EnvVarNotFound(env_var_name.to_string()))
    }

    /// Read the raw private key bytes from the configured file or variable
    pub fn load_private_key_bytes(&self) -> Result<Vec<u8>, ConfigError> {
        if let Some(path) = &self.device.private_key_path {
            return Ok(std::fs::read(path)?);
        }
        match &self.device.private_key_env {
            Some(env_name) => Ok(Self::get_env_var_required(env_name)?.into_bytes()),
            None => Err(ConfigError::MissingCredentials(
                "no private key source configured".to_string(),
            )),
        }
    }

    /// Time service username from environment, if set
    pub fn get_time_service_username(&self) -> Option<String> {
        std::env::var(&self.time_service.username_env).ok()
    }

    /// Time service key from environment, if set
    pub fn get_time_service_key(&self) -> Option<String> {
        std::env::var(&self.time_service.key_env).ok()
    }

    /// Create a test configuration for unit testing
    #[cfg(test)]
    pub fn test_config() -> Self {
        let toml_content = r#"
[device]
project_id = "proj"
cloud_region = "us-central1"
registry_id = "reg1"
device_id = "dev1"
private_key_path = "rsa_private.pem"
"#;
        Self::from_toml_str(toml_content).expect("Test config should parse")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = DeviceConfig::test_config();

        assert_eq!(config.device.project_id, "proj");
        assert_eq!(config.mqtt.broker_host, "mqtt.googleapis.com");
        assert_eq!(config.mqtt.broker_port, 8883);
        assert_eq!(config.mqtt.keep_alive_secs, 1140);
        assert_eq!(config.mqtt.topic_scheme, TopicScheme::DevicePath);
        assert_eq!(config.token.ttl_secs, 43200);
        assert_eq!(config.time_service.username_env, "AIO_USERNAME");
        assert_eq!(config.time_service.timezone, None);
    }

    #[test]
    fn test_full_config() {
        let toml_content = r#"
[device]
project_id = "proj"
cloud_region = "europe-west1"
registry_id = "reg1"
device_id = "dev1"
private_key_env = "DEVICE_KEY"

[mqtt]
broker_host = "localhost"
broker_port = 1883
keep_alive_secs = 600
topic_scheme = "device-id"
poll_timeout_ms = 50

[token]
ttl_secs = 3600
refresh_margin_secs = 60

[time_service]
username_env = "TIME_USER"
key_env = "TIME_KEY"
timezone = "Europe/Paris"
base_url = "http://localhost:9999/api/v2"
timeout_secs = 3
"#;

        let config = DeviceConfig::from_toml_str(toml_content).unwrap();
        assert_eq!(config.mqtt.broker_port, 1883);
        assert_eq!(config.mqtt.keep_alive_secs, 600);
        assert_eq!(config.mqtt.topic_scheme, TopicScheme::DeviceId);
        assert_eq!(config.token.ttl_secs, 3600);
        assert_eq!(config.time_service.timezone.as_deref(), Some("Europe/Paris"));
        assert_eq!(config.device.private_key_env.as_deref(), Some("DEVICE_KEY"));
    }

    #[test]
    fn test_identity_from_config() {
        let config = DeviceConfig::test_config();
        let identity = config.identity().unwrap();
        assert_eq!(
            identity.path(),
            "projects/proj/locations/us-central1/registries/reg1/devices/dev1"
        );
    }

    #[test]
    fn test_invalid_identity_rejected() {
        let toml_content = r#"
[device]
project_id = ""
cloud_region = "us-central1"
registry_id = "reg1"
device_id = "dev1"
private_key_path = "key.pem"
"#;
        let result = DeviceConfig::from_toml_str(toml_content);
        assert!(matches!(result, Err(ConfigError::InvalidIdentity(_))));
    }

    #[test]
    fn test_zero_ttl_rejected() {
        let toml_content = r#"
[device]
project_id = "proj"
cloud_region = "us-central1"
registry_id = "reg1"
device_id = "dev1"
private_key_path = "key.pem"

[token]
ttl_secs = 0
"#;
        let result = DeviceConfig::from_toml_str(toml_content);
        assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
    }

    #[test]
    fn test_refresh_margin_must_be_below_ttl() {
        let toml_content = r#"
[device]
project_id = "proj"
cloud_region = "us-central1"
registry_id = "reg1"
device_id = "dev1"
private_key_path = "key.pem"

[token]
ttl_secs = 60
refresh_margin_secs = 60
"#;
        let result = DeviceConfig::from_toml_str(toml_content);
        assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
    }

    #[test]
    fn test_missing_key_source_rejected() {
        let toml_content = r#"
[device]
project_id = "proj"
cloud_region = "us-central1"
registry_id = "reg1"
device_id = "dev1"
"#;
        let result = DeviceConfig::from_toml_str(toml_content);
        assert!(matches!(result, Err(ConfigError::MissingCredentials(_))));
    }

    #[test]
    fn test_missing_key_env_var() {
        let mut config = DeviceConfig::test_config();
        config.device.private_key_path = None;
        config.device.private_key_env = Some("IOTCORE_TEST_KEY_THAT_DOES_NOT_EXIST".to_string());

        let result = config.load_private_key_bytes();
        assert!(matches!(result, Err(ConfigError::EnvVarNotFound(_))));
    }
}
