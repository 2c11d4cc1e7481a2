//! Pure routing of rumqttc events into transport events

use super::connection::connect_return_code;
use crate::transport::TransportEvent;
use rumqttc::{ConnectionError, Event, Outgoing, Packet, SubscribeReasonCode};
use tracing::debug;

/// SubAck failure code
pub const SUBACK_FAILURE: u8 = 0x80;

/// Routing decision for one rumqttc event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventRoute {
    /// Surface to the session
    Forward(TransportEvent),
    /// The disconnect packet left the client
    DisconnectSent,
    /// Keep-alive pings, acks and other outgoing traffic
    Infrastructure,
}

/// Pure routing decision for an event loop event
pub fn route_mqtt_event(event: &Event) -> EventRoute {
    match event {
        Event::Incoming(incoming) => match incoming {
            Packet::ConnAck(connack) => {
                EventRoute::Forward(TransportEvent::ConnAck(connect_return_code(connack.code)))
            }
            Packet::Publish(publish) => EventRoute::Forward(TransportEvent::Message {
                topic: publish.topic.clone(),
                payload: publish.payload.to_vec(),
            }),
            Packet::SubAck(suback) => EventRoute::Forward(TransportEvent::SubAck {
                packet_id: suback.pkid,
                return_codes: suback
                    .return_codes
                    .iter()
                    .map(|code| match code {
                        SubscribeReasonCode::Success(qos) => *qos as u8,
                        SubscribeReasonCode::Failure => SUBACK_FAILURE,
                    })
                    .collect(),
            }),
            Packet::Disconnect => EventRoute::Forward(TransportEvent::Disconnected(
                "Broker sent disconnect".to_string(),
            )),
            other => {
                debug!(packet = ?other, "Infrastructure packet");
                EventRoute::Infrastructure
            }
        },
        Event::Outgoing(Outgoing::Disconnect) => EventRoute::DisconnectSent,
        Event::Outgoing(_) => EventRoute::Infrastructure,
    }
}

/// Pure routing decision for an event loop error
///
/// A refused connection is an acknowledgment with a non-zero code; every
/// other error ends the connection.
pub fn route_connection_error(error: &ConnectionError) -> TransportEvent {
    match error {
        ConnectionError::ConnectionRefused(code) => {
            TransportEvent::ConnAck(connect_return_code(*code))
        }
        other => TransportEvent::Disconnected(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rumqttc::{ConnAck, ConnectReturnCode, Publish, QoS, SubAck};

    #[test]
    fn test_route_connack() {
        let success = Event::Incoming(Packet::ConnAck(ConnAck {
            session_present: false,
            code: ConnectReturnCode::Success,
        }));
        assert_eq!(
            route_mqtt_event(&success),
            EventRoute::Forward(TransportEvent::ConnAck(0))
        );
    }

    #[test]
    fn test_route_publish() {
        let publish = Event::Incoming(Packet::Publish(Publish::new(
            "/devices/dev1/config",
            QoS::AtLeastOnce,
            b"{\"led\":true}".to_vec(),
        )));

        assert_eq!(
            route_mqtt_event(&publish),
            EventRoute::Forward(TransportEvent::Message {
                topic: "/devices/dev1/config".to_string(),
                payload: b"{\"led\":true}".to_vec(),
            })
        );
    }

    #[test]
    fn test_route_suback_codes() {
        let suback = Event::Incoming(Packet::SubAck(SubAck::new(
            7,
            vec![
                SubscribeReasonCode::Success(QoS::AtLeastOnce),
                SubscribeReasonCode::Success(QoS::AtMostOnce),
                SubscribeReasonCode::Failure,
            ],
        )));

        assert_eq!(
            route_mqtt_event(&suback),
            EventRoute::Forward(TransportEvent::SubAck {
                packet_id: 7,
                return_codes: vec![1, 0, SUBACK_FAILURE],
            })
        );
    }

    #[test]
    fn test_route_infrastructure() {
        assert_eq!(
            route_mqtt_event(&Event::Incoming(Packet::PingResp)),
            EventRoute::Infrastructure
        );
        assert_eq!(
            route_mqtt_event(&Event::Outgoing(Outgoing::PingReq)),
            EventRoute::Infrastructure
        );
        assert_eq!(
            route_mqtt_event(&Event::Outgoing(Outgoing::Disconnect)),
            EventRoute::DisconnectSent
        );
    }

    #[test]
    fn test_route_connection_refused() {
        let error = ConnectionError::ConnectionRefused(ConnectReturnCode::NotAuthorized);
        assert_eq!(route_connection_error(&error), TransportEvent::ConnAck(5));
    }

    #[test]
    fn test_route_network_error() {
        let error = ConnectionError::NetworkTimeout;
        assert!(matches!(
            route_connection_error(&error),
            TransportEvent::Disconnected(_)
        ));
    }
}
