//! Device identity and topic conventions of the Cloud IoT Core MQTT bridge

pub mod identity;
pub mod topics;

pub use identity::DeviceIdentity;
pub use topics::{resolve, resolve_with, TopicError, TopicKind, TopicPath, TopicScheme};
