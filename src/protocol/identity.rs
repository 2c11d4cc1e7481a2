//! Device identity and the canonical device path

use crate::config::ConfigError;
use std::fmt;

/// Immutable identity of one device within a cloud registry
///
/// The identity is the single owner of the device identifier: every topic and
/// client id is derived from a value of this type passed explicitly.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceIdentity {
    project_id: String,
    region: String,
    registry_id: String,
    device_id: String,
}

impl DeviceIdentity {
    pub fn new(
        project_id: &str,
        region: &str,
        registry_id: &str,
        device_id: &str,
    ) -> Result<Self, ConfigError> {
        validate_component("project_id", project_id)?;
        validate_component("cloud_region", region)?;
        validate_component("registry_id", registry_id)?;
        validate_component("device_id", device_id)?;

        Ok(Self {
            project_id: project_id.to_string(),
            region: region.to_string(),
            registry_id: registry_id.to_string(),
            device_id: device_id.to_string(),
        })
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn registry_id(&self) -> &str {
        &self.registry_id
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Canonical device path, also used as the MQTT client id:
    /// `projects/{project}/locations/{region}/registries/{registry}/devices/{device}`
    pub fn path(&self) -> String {
        format!(
            "projects/{}/locations/{}/registries/{}/devices/{}",
            self.project_id, self.region, self.registry_id, self.device_id
        )
    }

    /// MQTT client id presented to the broker
    pub fn client_id(&self) -> String {
        self.path()
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())
    }
}

fn validate_component(name: &str, value: &str) -> Result<(), ConfigError> {
    if value.is_empty() {
        return Err(ConfigError::InvalidIdentity(format!("{name} cannot be empty")));
    }

    if let Some(ch) = value
        .chars()
        .find(|c| matches!(c, '/' | '+' | '#') || c.is_whitespace() || c.is_control())
    {
        return Err(ConfigError::InvalidIdentity(format!(
            "{name} contains invalid character {ch:?}"
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_path() {
        let identity = DeviceIdentity::new("proj", "us-central1", "reg1", "dev1").unwrap();
        assert_eq!(
            identity.path(),
            "projects/proj/locations/us-central1/registries/reg1/devices/dev1"
        );
        assert_eq!(identity.client_id(), identity.path());
        assert_eq!(identity.to_string(), identity.path());
    }

    #[test]
    fn test_identity_accessors() {
        let identity = DeviceIdentity::new("proj", "asia-east1", "reg", "dev").unwrap();
        assert_eq!(identity.project_id(), "proj");
        assert_eq!(identity.region(), "asia-east1");
        assert_eq!(identity.registry_id(), "reg");
        assert_eq!(identity.device_id(), "dev");
    }

    #[test]
    fn test_empty_components_rejected() {
        assert!(DeviceIdentity::new("", "r", "reg", "dev").is_err());
        assert!(DeviceIdentity::new("p", "", "reg", "dev").is_err());
        assert!(DeviceIdentity::new("p", "r", "", "dev").is_err());
        assert!(DeviceIdentity::new("p", "r", "reg", "").is_err());
    }

    #[test]
    fn test_topic_breaking_characters_rejected() {
        for bad in ["a/b", "a+b", "a#b", "a b", "a\nb"] {
            let result = DeviceIdentity::new("proj", "us-central1", "reg1", bad);
            assert!(
                matches!(result, Err(ConfigError::InvalidIdentity(_))),
                "device id {bad:?} should be rejected"
            );
        }
    }
}
