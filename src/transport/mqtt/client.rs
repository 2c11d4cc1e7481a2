//! Impure I/O operations for the MQTT transport
//!
//! The rumqttc event loop is driven from [`Transport::pump`] only; nothing runs
//! in the background. A connection that fails is dropped instead of letting
//! rumqttc reconnect with a possibly expired token.

use super::connection::{configure_mqtt_options, to_rumqtt_qos, BrokerEndpoint};
use super::message_handler::{route_connection_error, route_mqtt_event, EventRoute};
use crate::transport::{ConnectParams, QoS, Transport, TransportError, TransportEvent};
use async_trait::async_trait;
use rumqttc::{AsyncClient, EventLoop};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Capacity of the request channel between client and event loop
const REQUEST_CAPACITY: usize = 64;

/// Upper bound on waiting for the disconnect packet to be flushed
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// rumqttc-backed transport
pub struct RumqttTransport {
    endpoint: BrokerEndpoint,
    client: Option<AsyncClient>,
    event_loop: Option<EventLoop>,
    awaiting_connack: bool,
}

impl RumqttTransport {
    pub fn new(endpoint: BrokerEndpoint) -> Self {
        Self {
            endpoint,
            client: None,
            event_loop: None,
            awaiting_connack: false,
        }
    }

    pub fn endpoint(&self) -> &BrokerEndpoint {
        &self.endpoint
    }

    fn client(&self) -> Result<&AsyncClient, TransportError> {
        self.client.as_ref().ok_or(TransportError::NotConnected)
    }

    fn teardown(&mut self) {
        self.client = None;
        self.event_loop = None;
        self.awaiting_connack = false;
    }
}

#[async_trait]
impl Transport for RumqttTransport {
    async fn connect(&mut self, params: &ConnectParams) -> Result<(), TransportError> {
        if self.client.is_some() {
            return Err(TransportError::ConnectionFailed(
                "Connection already open".to_string(),
            ));
        }

        let mqtt_options = configure_mqtt_options(&self.endpoint, params);
        let (client, event_loop) = AsyncClient::new(mqtt_options, REQUEST_CAPACITY);

        info!(
            host = %self.endpoint.host,
            port = self.endpoint.port,
            tls = self.endpoint.tls,
            "Opening MQTT connection"
        );

        self.client = Some(client);
        self.event_loop = Some(event_loop);
        self.awaiting_connack = true;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        let (Some(client), Some(mut event_loop)) = (self.client.take(), self.event_loop.take())
        else {
            self.teardown();
            return Ok(());
        };
        self.awaiting_connack = false;

        client
            .try_disconnect()
            .map_err(|e| TransportError::DisconnectFailed(e.to_string()))?;

        // Drive the event loop until the disconnect packet is written
        let flushed = tokio::time::timeout(DISCONNECT_TIMEOUT, async {
            loop {
                match event_loop.poll().await {
                    Ok(event) => {
                        if route_mqtt_event(&event) == EventRoute::DisconnectSent {
                            return Ok(());
                        }
                    }
                    Err(e) => return Err(TransportError::DisconnectFailed(e.to_string())),
                }
            }
        })
        .await;

        match flushed {
            Ok(result) => result,
            Err(_) => {
                warn!("MQTT disconnect was not flushed in time, dropping connection");
                Err(TransportError::Timeout(DISCONNECT_TIMEOUT))
            }
        }
    }

    async fn publish(
        &mut self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
    ) -> Result<(), TransportError> {
        self.client()?
            .try_publish(topic, to_rumqtt_qos(qos), false, payload)
            .map_err(|e| TransportError::PublishFailed(e.to_string()))
    }

    async fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<(), TransportError> {
        self.client()?
            .try_subscribe(topic, to_rumqtt_qos(qos))
            .map_err(|e| TransportError::SubscribeFailed(e.to_string()))
    }

    async fn pump(&mut self) -> Result<Vec<TransportEvent>, TransportError> {
        let poll_timeout = self.endpoint.poll_timeout;
        let awaiting_connack = self.awaiting_connack;
        let event_loop = self
            .event_loop
            .as_mut()
            .ok_or(TransportError::NotConnected)?;

        // The handshake is bounded by rumqttc's own connection timeout; cutting
        // it short would restart the TLS handshake on the next pump.
        let polled = if awaiting_connack {
            event_loop.poll().await
        } else {
            match tokio::time::timeout(poll_timeout, event_loop.poll()).await {
                Ok(polled) => polled,
                Err(_) => return Ok(Vec::new()),
            }
        };

        match polled {
            Ok(event) => match route_mqtt_event(&event) {
                EventRoute::Forward(forwarded) => {
                    if matches!(forwarded, TransportEvent::ConnAck(_)) {
                        self.awaiting_connack = false;
                    }
                    if matches!(forwarded, TransportEvent::Disconnected(_)) {
                        self.teardown();
                    }
                    Ok(vec![forwarded])
                }
                EventRoute::DisconnectSent | EventRoute::Infrastructure => Ok(Vec::new()),
            },
            Err(e) => {
                debug!(error = %e, "MQTT event loop error");
                self.teardown();
                Ok(vec![route_connection_error(&e)])
            }
        }
    }
}
