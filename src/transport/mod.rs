//! Transport abstraction for the broker connection
//!
//! The session drives a [`Transport`] through connect, publish, subscribe and
//! disconnect calls and pulls broker traffic out of it with [`Transport::pump`].
//! Production code uses the rumqttc-backed [`mqtt::RumqttTransport`]; tests use
//! [`crate::testing::mocks::MockTransport`].

use std::fmt;
use std::time::Duration;
use thiserror::Error;

pub mod mqtt;

pub use mqtt::RumqttTransport;

/// Delivery guarantee requested for a publish or subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum QoS {
    /// Fire and forget
    #[default]
    AtMostOnce,
    /// Acknowledged delivery
    AtLeastOnce,
}

impl QoS {
    pub fn level(self) -> u8 {
        match self {
            QoS::AtMostOnce => 0,
            QoS::AtLeastOnce => 1,
        }
    }
}

impl TryFrom<u8> for QoS {
    type Error = TransportError;

    fn try_from(level: u8) -> Result<Self, Self::Error> {
        match level {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            other => Err(TransportError::UnsupportedQoS(other)),
        }
    }
}

/// Parameters of a single broker connection attempt
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectParams {
    pub client_id: String,
    pub username: String,
    /// Device token; never logged
    pub password: String,
    pub keep_alive: Duration,
}

impl fmt::Debug for ConnectParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectParams")
            .field("client_id", &self.client_id)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("keep_alive", &self.keep_alive)
            .finish()
    }
}

/// Broker traffic surfaced by [`Transport::pump`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Connection acknowledgment; 0 is success
    ConnAck(u8),
    /// The connection was closed by the broker or the network
    Disconnected(String),
    /// Inbound message on a subscribed topic
    Message { topic: String, payload: Vec<u8> },
    /// Subscription acknowledgment with one code per requested filter
    SubAck { packet_id: u16, return_codes: Vec<u8> },
}

/// Transport errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Connection lost: {0}")]
    ConnectionLost(String),
    #[error("Publish failed: {0}")]
    PublishFailed(String),
    #[error("Subscribe failed: {0}")]
    SubscribeFailed(String),
    #[error("Disconnect failed: {0}")]
    DisconnectFailed(String),
    #[error("Transport is not connected")]
    NotConnected,
    #[error("Timed out after {0:?}")]
    Timeout(Duration),
    #[error("Unsupported QoS level {0}")]
    UnsupportedQoS(u8),
}

/// Broker connection capability
#[async_trait::async_trait]
pub trait Transport: Send {
    /// Open the network connection and send the connect packet
    ///
    /// The acknowledgment is reported later through [`Transport::pump`].
    async fn connect(&mut self, params: &ConnectParams) -> Result<(), TransportError>;

    /// Close the connection and wait until the transport is idle
    async fn disconnect(&mut self) -> Result<(), TransportError>;

    async fn publish(&mut self, topic: &str, payload: Vec<u8>, qos: QoS)
        -> Result<(), TransportError>;

    async fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<(), TransportError>;

    /// Process pending network traffic and return the events it produced
    async fn pump(&mut self) -> Result<Vec<TransportEvent>, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qos_levels() {
        assert_eq!(QoS::AtMostOnce.level(), 0);
        assert_eq!(QoS::AtLeastOnce.level(), 1);
        assert_eq!(QoS::try_from(1), Ok(QoS::AtLeastOnce));
        assert_eq!(QoS::try_from(2), Err(TransportError::UnsupportedQoS(2)));
        assert_eq!(QoS::default(), QoS::AtMostOnce);
    }

    #[test]
    fn test_connect_params_debug_hides_password() {
        let params = ConnectParams {
            client_id: "projects/p/locations/r/registries/g/devices/d".to_string(),
            username: "unused".to_string(),
            password: "eyJhbGciOiJSUzI1NiJ9.secret.sig".to_string(),
            keep_alive: Duration::from_secs(1140),
        };

        let debug = format!("{params:?}");
        assert!(!debug.contains("secret"));
        assert!(debug.contains("unused"));
    }
}
