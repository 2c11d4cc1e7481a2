//! iotcore-device
//!
//! Short-lived JWT authentication and MQTT session management for devices
//! connecting to the Cloud IoT Core MQTT bridge.
//!
//! # Overview
//!
//! - [`time`] synchronizes an injectable clock from a network time service
//! - [`auth`] issues RS256-signed device tokens
//! - [`protocol`] holds the device identity and resolves topics
//! - [`session`] drives the connect/publish/subscribe/disconnect state machine
//! - [`transport`] abstracts the broker connection, with a rumqttc implementation
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use iotcore_device::auth::{SigningKey, TokenSigner};
//! use iotcore_device::protocol::{DeviceIdentity, TopicKind};
//! use iotcore_device::session::Session;
//! use iotcore_device::time::{Clock, SyncedClock};
//! use iotcore_device::transport::mqtt::{BrokerEndpoint, RumqttTransport};
//! use iotcore_device::transport::QoS;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let identity = DeviceIdentity::new("proj", "us-central1", "reg1", "dev1")?;
//! let key = SigningKey::from_pem(&std::fs::read("rsa_private.pem")?)?;
//! let clock: Arc<dyn Clock> = Arc::new(SyncedClock::new());
//! let transport = RumqttTransport::new(BrokerEndpoint::new("mqtt.googleapis.com", 8883));
//!
//! let mut session = Session::new(identity, TokenSigner::new(key, 43200), transport, clock.clone());
//! session.reissue_token(clock.now())?;
//! session.connect().await?;
//! session.publish(TopicKind::Events, b"21.5".to_vec(), None, QoS::AtLeastOnce).await?;
//! session.disconnect().await?;
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod config;
pub mod error;
pub mod observability;
pub mod protocol;
pub mod session;
pub mod testing;
pub mod time;
pub mod transport;

pub use auth::{issue_token, SignError, SigningKey, Token, TokenSigner};
pub use config::{ConfigError, DeviceConfig};
pub use error::{DeviceError, DeviceResult, Recovery};
pub use protocol::{resolve, DeviceIdentity, TopicError, TopicKind, TopicPath, TopicScheme};
pub use session::{Session, SessionError, SessionState};
pub use time::{Clock, TimeError, TimeSource, Timestamp};
pub use transport::{QoS, Transport, TransportError, TransportEvent};
