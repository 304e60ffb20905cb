//! Pure routing of rumqttc events
//!
//! Each [`Event`] polled from the rumqttc event loop is reduced to an
//! [`EventRoute`] that the client's I/O loop acts on.

use crate::transport::{qos_level, Message};
use rumqttc::{Event, Outgoing, Packet, Publish, SubscribeReasonCode};

/// Granted-QoS code reported for a refused subscription
pub const SUBSCRIBE_FAILURE_CODE: u8 = 0x80;

/// Routing decisions for MQTT events
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventRoute {
    /// CONNACK received, session established
    ConnectionAcknowledged,
    /// Inbound application message
    MessageReceived { topic: String, message: Message },
    /// PUBLISH written to the socket
    PublishWritten { pkid: u16 },
    PublishAcknowledged { pkid: u16 },
    PublishCompleted { pkid: u16 },
    SubscribeWritten { pkid: u16 },
    SubscriptionConfirmed { pkid: u16, granted_qos: Vec<u8> },
    UnsubscribeWritten { pkid: u16 },
    UnsubscriptionConfirmed { pkid: u16 },
    /// DISCONNECT written, session closing
    DisconnectWritten,
    /// Broker closed the session
    BrokerDisconnected,
    /// Keep-alive and other bookkeeping packets
    Infrastructure,
}

/// Pure message routing decisions based on MQTT events
pub struct MessageHandler;

impl MessageHandler {
    /// Route MQTT event to appropriate handler (pure routing decision)
    pub fn route_mqtt_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(packet) => match packet {
                Packet::ConnAck(_) => EventRoute::ConnectionAcknowledged,
                Packet::Publish(publish) => {
                    let (topic, message) = Self::inbound_message(publish);
                    EventRoute::MessageReceived { topic, message }
                }
                Packet::PubAck(ack) => EventRoute::PublishAcknowledged { pkid: ack.pkid },
                Packet::PubComp(comp) => EventRoute::PublishCompleted { pkid: comp.pkid },
                Packet::SubAck(suback) => EventRoute::SubscriptionConfirmed {
                    pkid: suback.pkid,
                    granted_qos: Self::granted_codes(&suback.return_codes),
                },
                Packet::UnsubAck(unsuback) => {
                    EventRoute::UnsubscriptionConfirmed { pkid: unsuback.pkid }
                }
                Packet::Disconnect => EventRoute::BrokerDisconnected,
                _ => EventRoute::Infrastructure,
            },
            Event::Outgoing(outgoing) => match outgoing {
                Outgoing::Publish(pkid) => EventRoute::PublishWritten { pkid: *pkid },
                Outgoing::Subscribe(pkid) => EventRoute::SubscribeWritten { pkid: *pkid },
                Outgoing::Unsubscribe(pkid) => EventRoute::UnsubscribeWritten { pkid: *pkid },
                Outgoing::Disconnect => EventRoute::DisconnectWritten,
                _ => EventRoute::Infrastructure,
            },
        }
    }

    /// Convert an inbound PUBLISH into a topic and [`Message`] (pure function)
    pub fn inbound_message(publish: &Publish) -> (String, Message) {
        let message = Message::new(publish.payload.clone())
            .with_id(publish.pkid)
            .with_qos(publish.qos)
            .with_retain(publish.retain);
        (publish.topic.clone(), message)
    }

    /// SUBACK return codes as numeric granted QoS, 0x80 for refusals (pure function)
    pub fn granted_codes(return_codes: &[SubscribeReasonCode]) -> Vec<u8> {
        return_codes
            .iter()
            .map(|code| match code {
                SubscribeReasonCode::Success(qos) => qos_level(*qos),
                SubscribeReasonCode::Failure => SUBSCRIBE_FAILURE_CODE,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rumqttc::{ConnAck, ConnectReturnCode, PubAck, QoS, SubAck};

    #[test]
    fn test_route_connack() {
        let event = Event::Incoming(Packet::ConnAck(ConnAck::new(
            ConnectReturnCode::Success,
            false,
        )));
        assert_eq!(
            MessageHandler::route_mqtt_event(&event),
            EventRoute::ConnectionAcknowledged
        );
    }

    #[test]
    fn test_route_inbound_publish() {
        let mut publish = Publish::new("a/b", QoS::AtLeastOnce, b"hello".to_vec());
        publish.pkid = 42;
        let event = Event::Incoming(Packet::Publish(publish));

        match MessageHandler::route_mqtt_event(&event) {
            EventRoute::MessageReceived { topic, message } => {
                assert_eq!(topic, "a/b");
                assert_eq!(message.id, 42);
                assert_eq!(message.qos, QoS::AtLeastOnce);
                assert_eq!(&message.payload[..], b"hello");
            }
            other => panic!("unexpected route {other:?}"),
        }
    }

    #[test]
    fn test_route_acks() {
        let event = Event::Incoming(Packet::PubAck(PubAck::new(7)));
        assert_eq!(
            MessageHandler::route_mqtt_event(&event),
            EventRoute::PublishAcknowledged { pkid: 7 }
        );

        let suback = SubAck::new(
            3,
            vec![
                SubscribeReasonCode::Success(QoS::AtLeastOnce),
                SubscribeReasonCode::Failure,
            ],
        );
        assert_eq!(
            MessageHandler::route_mqtt_event(&Event::Incoming(Packet::SubAck(suback))),
            EventRoute::SubscriptionConfirmed {
                pkid: 3,
                granted_qos: vec![1, SUBSCRIBE_FAILURE_CODE]
            }
        );
    }

    #[test]
    fn test_route_outgoing() {
        assert_eq!(
            MessageHandler::route_mqtt_event(&Event::Outgoing(Outgoing::Publish(0))),
            EventRoute::PublishWritten { pkid: 0 }
        );
        assert_eq!(
            MessageHandler::route_mqtt_event(&Event::Outgoing(Outgoing::Disconnect)),
            EventRoute::DisconnectWritten
        );
        assert_eq!(
            MessageHandler::route_mqtt_event(&Event::Outgoing(Outgoing::PingReq)),
            EventRoute::Infrastructure
        );
    }
}
