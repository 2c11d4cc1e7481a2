//! Configuration loading and validation tests
//!
//! Tests focus on the behavior of loading device configuration from disk:
//! defaults, key resolution relative to the config file, and validation errors.

mod test_helpers;

use iotcore_device::auth::SigningKey;
use iotcore_device::config::{ConfigError, DeviceConfig};
use iotcore_device::protocol::TopicScheme;
use std::io::Write;
use tempfile::{tempdir, NamedTempFile};

#[test]
fn test_config_loads_successfully_from_valid_toml() {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(
        temp_file,
        r#"
[device]
project_id = "proj"
cloud_region = "us-central1"
registry_id = "reg1"
device_id = "dev1"
private_key_path = "/etc/device/rsa_private.pem"

[mqtt]
keep_alive_secs = 900
topic_scheme = "device-path"
"#
    )
    .unwrap();

    let config = DeviceConfig::load_from_file(temp_file.path()).unwrap();

    assert_eq!(config.device.device_id, "dev1");
    assert_eq!(config.mqtt.keep_alive_secs, 900);
    assert_eq!(config.mqtt.topic_scheme, TopicScheme::DevicePath);
    assert_eq!(config.mqtt.broker_host, "mqtt.googleapis.com");
    assert_eq!(config.token.ttl_secs, 43200);
    assert_eq!(
        config.device.private_key_path.as_deref(),
        Some(std::path::Path::new("/etc/device/rsa_private.pem"))
    );
    assert_eq!(
        config.identity().unwrap().path(),
        test_helpers::DEVICE_PATH
    );
}

#[test]
fn test_relative_key_path_resolves_against_config_dir() {
    let dir = tempdir().unwrap();
    std::fs::write(dir.path().join("rsa_private.pem"), test_helpers::PRIVATE_PEM).unwrap();

    let config_path = dir.path().join("device.toml");
    std::fs::write(
        &config_path,
        r#"
[device]
project_id = "proj"
cloud_region = "us-central1"
registry_id = "reg1"
device_id = "dev1"
private_key_path = "rsa_private.pem"
"#,
    )
    .unwrap();

    let config = DeviceConfig::load_from_file(&config_path).unwrap();
    assert_eq!(
        config.device.private_key_path,
        Some(dir.path().join("rsa_private.pem"))
    );

    let key_bytes = config.load_private_key_bytes().unwrap();
    assert!(SigningKey::from_pem(&key_bytes).is_ok());
}

#[test]
fn test_missing_key_file_is_an_io_error() {
    let dir = tempdir().unwrap();
    let config_path = dir.path().join("device.toml");
    std::fs::write(
        &config_path,
        r#"
[device]
project_id = "proj"
cloud_region = "us-central1"
registry_id = "reg1"
device_id = "dev1"
private_key_path = "absent.pem"
"#,
    )
    .unwrap();

    let config = DeviceConfig::load_from_file(&config_path).unwrap();
    assert!(matches!(
        config.load_private_key_bytes(),
        Err(ConfigError::FileRead(_))
    ));
}

#[test]
fn test_config_fails_with_missing_device_section() {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(
        temp_file,
        r#"
[mqtt]
broker_host = "localhost"
"#
    )
    .unwrap();

    let result = DeviceConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::TomlParse(_))));
}

#[test]
fn test_config_fails_with_invalid_toml() {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(temp_file, "[device\nproject_id = ").unwrap();

    let result = DeviceConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::TomlParse(_))));
}

#[test]
fn test_config_fails_when_file_missing() {
    let result = DeviceConfig::load_from_file(std::path::Path::new("/nonexistent/device.toml"));
    assert!(matches!(result, Err(ConfigError::FileRead(_))));
}

#[test]
fn test_identity_with_wildcard_rejected() {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(
        temp_file,
        r#"
[device]
project_id = "proj"
cloud_region = "us-central1"
registry_id = "reg1"
device_id = "dev+1"
private_key_path = "key.pem"
"#
    )
    .unwrap();

    let result = DeviceConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::InvalidIdentity(_))));
}

#[test]
fn test_unknown_topic_scheme_rejected() {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(
        temp_file,
        r#"
[device]
project_id = "proj"
cloud_region = "us-central1"
registry_id = "reg1"
device_id = "dev1"
private_key_path = "key.pem"

[mqtt]
topic_scheme = "short"
"#
    )
    .unwrap();

    let result = DeviceConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::TomlParse(_))));
}

#[test]
fn test_config_round_trips_through_toml() {
    let dir = tempdir().unwrap();
    let config_path = dir.path().join("device.toml");
    std::fs::write(
        &config_path,
        r#"
[device]
project_id = "proj"
cloud_region = "us-central1"
registry_id = "reg1"
device_id = "dev1"
private_key_env = "DEVICE_KEY_PEM"

[time_service]
timezone = "America/New_York"
"#,
    )
    .unwrap();

    let config = DeviceConfig::load_from_file(&config_path).unwrap();
    let rendered = toml::to_string_pretty(&config).unwrap();
    let reparsed = DeviceConfig::from_toml_str(&rendered).unwrap();

    assert_eq!(reparsed, config);
}
