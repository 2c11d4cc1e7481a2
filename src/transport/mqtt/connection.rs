//! Pure connection configuration for the MQTT bridge
//!
//! Builds rumqttc options from the broker endpoint and the per-attempt
//! [`ConnectParams`], and maps connect return codes to their wire values.

use crate::config::MqttSection;
use crate::transport::{ConnectParams, QoS};
use rumqttc::{ConnectReturnCode, MqttOptions, QoS as RumqttQoS, Transport as RumqttcTransport};
use std::time::Duration;

/// Largest packet the bridge accepts (256 KiB)
pub const MAX_PACKET_SIZE: usize = 256 * 1024;

/// Broker endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerEndpoint {
    pub host: String,
    pub port: u16,
    /// The bridge only accepts TLS; plain TCP is for local brokers
    pub tls: bool,
    pub poll_timeout: Duration,
}

impl BrokerEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            tls: true,
            poll_timeout: Duration::from_millis(1000),
        }
    }

    /// Plain TCP endpoint, for brokers running next to the device
    pub fn insecure(host: impl Into<String>, port: u16) -> Self {
        Self {
            tls: false,
            ..Self::new(host, port)
        }
    }

    pub fn from_config(config: &MqttSection) -> Self {
        Self {
            host: config.broker_host.clone(),
            port: config.broker_port,
            tls: config.broker_port != 1883,
            poll_timeout: Duration::from_millis(config.poll_timeout_ms),
        }
    }
}

/// Pure function to configure MQTT options for one connection attempt
pub fn configure_mqtt_options(endpoint: &BrokerEndpoint, params: &ConnectParams) -> MqttOptions {
    let mut mqtt_options = MqttOptions::new(&params.client_id, &endpoint.host, endpoint.port);

    if endpoint.tls {
        mqtt_options.set_transport(RumqttcTransport::tls_with_default_config());
    }

    // The bridge ignores the username and authenticates the token in the password
    mqtt_options.set_credentials(&params.username, &params.password);
    mqtt_options.set_keep_alive(params.keep_alive);
    mqtt_options.set_clean_session(true);
    mqtt_options.set_max_packet_size(MAX_PACKET_SIZE, MAX_PACKET_SIZE);

    mqtt_options
}

/// Wire value of a connect return code
pub fn connect_return_code(code: ConnectReturnCode) -> u8 {
    match code {
        ConnectReturnCode::Success => 0,
        ConnectReturnCode::RefusedProtocolVersion => 1,
        ConnectReturnCode::BadClientId => 2,
        ConnectReturnCode::ServiceUnavailable => 3,
        ConnectReturnCode::BadUserNamePassword => 4,
        ConnectReturnCode::NotAuthorized => 5,
    }
}

pub fn to_rumqtt_qos(qos: QoS) -> RumqttQoS {
    match qos {
        QoS::AtMostOnce => RumqttQoS::AtMostOnce,
        QoS::AtLeastOnce => RumqttQoS::AtLeastOnce,
    }
}
