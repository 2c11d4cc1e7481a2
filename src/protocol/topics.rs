//! Topic resolution for device telemetry, state, config and commands
//!
//! Every topic is the device prefix followed by a fixed suffix and, for the
//! kinds that allow it, a single subfolder. Resolution is pure: no I/O and no
//! shared state.

use super::identity::DeviceIdentity;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Addressable topic kinds for a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TopicKind {
    /// Cloud to device configuration
    Config,
    /// Cloud to device commands
    Commands,
    /// Every command subfolder (`commands/#`), for subscriptions
    CommandsWildcard,
    /// Device to cloud telemetry
    Events,
    /// Device to cloud state reports
    State,
}

impl TopicKind {
    pub fn suffix(self) -> &'static str {
        match self {
            TopicKind::Config => "config",
            TopicKind::Commands => "commands",
            TopicKind::CommandsWildcard => "commands/#",
            TopicKind::Events => "events",
            TopicKind::State => "state",
        }
    }

    /// State reports are unidirectional status messages and the wildcard
    /// must remain the last topic level.
    pub fn allows_subfolder(self) -> bool {
        !matches!(self, TopicKind::State | TopicKind::CommandsWildcard)
    }
}

/// Prefix convention used in front of the topic suffix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TopicScheme {
    /// `projects/{p}/locations/{r}/registries/{g}/devices/{d}/...`
    #[default]
    DevicePath,
    /// `/devices/{d}/...`, the short form accepted by the MQTT bridge
    DeviceId,
}

/// A resolved topic string
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicPath(String);

impl TopicPath {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for TopicPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for TopicPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Topic resolution errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TopicError {
    #[error("Subfolders are not supported for {kind:?} topics")]
    SubfolderNotAllowed { kind: TopicKind },
    #[error("Invalid subfolder '{0}': must be non-empty and free of wildcards")]
    InvalidSubfolder(String),
}

/// Resolve a topic under the canonical device path
pub fn resolve(
    identity: &DeviceIdentity,
    kind: TopicKind,
    subfolder: Option<&str>,
) -> Result<TopicPath, TopicError> {
    resolve_with(TopicScheme::DevicePath, identity, kind, subfolder)
}

/// Resolve a topic under the prefix selected by `scheme`
pub fn resolve_with(
    scheme: TopicScheme,
    identity: &DeviceIdentity,
    kind: TopicKind,
    subfolder: Option<&str>,
) -> Result<TopicPath, TopicError> {
    let prefix = match scheme {
        TopicScheme::DevicePath => identity.path(),
        TopicScheme::DeviceId => format!("/devices/{}", identity.device_id()),
    };

    match subfolder {
        None => Ok(TopicPath(format!("{prefix}/{}", kind.suffix()))),
        Some(_) if !kind.allows_subfolder() => Err(TopicError::SubfolderNotAllowed { kind }),
        Some(folder) => {
            validate_subfolder(folder)?;
            Ok(TopicPath(format!("{prefix}/{}/{folder}", kind.suffix())))
        }
    }
}

fn validate_subfolder(folder: &str) -> Result<(), TopicError> {
    let invalid = folder.is_empty()
        || folder.starts_with('/')
        || folder.ends_with('/')
        || folder.contains("//")
        || folder.contains(['+', '#', '\0']);
    if invalid {
        return Err(TopicError::InvalidSubfolder(folder.to_string()));
    }
    Ok(())
}
