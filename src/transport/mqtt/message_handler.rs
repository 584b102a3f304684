//! Pure message routing and processing logic for MQTT events
//!
//! This module contains pure functions for classifying rumqttc events,
//! interpreting broker acknowledgment reason codes, and matching topic filters.

use super::acks::AckKind;
use super::connection::TransportError;
use rumqttc::v5::mqttbytes::v5::{Packet, PubAckReason, SubscribeReasonCode, UnsubAckReason};
use rumqttc::v5::{ConnectionError, Event, StateError};
use rumqttc::Outgoing;

/// Pure message routing decisions based on MQTT events
pub struct MessageHandler;

impl MessageHandler {
    /// Route MQTT event to appropriate handler (pure routing decision)
    pub fn route_mqtt_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(incoming) => match incoming {
                Packet::ConnAck(_) => EventRoute::ConnectionAcknowledged,
                Packet::Publish(publish) => EventRoute::MessageReceived {
                    topic: String::from_utf8_lossy(&publish.topic).to_string(),
                    payload: publish.payload.to_vec(),
                },
                Packet::PubAck(ack) => EventRoute::PublishAcknowledged {
                    packet_id: ack.pkid,
                    result: Self::validate_publish_ack(&ack.reason),
                },
                Packet::PubComp(comp) => EventRoute::PublishAcknowledged {
                    packet_id: comp.pkid,
                    result: Ok(()),
                },
                Packet::SubAck(suback) => EventRoute::SubscriptionAcknowledged {
                    packet_id: suback.pkid,
                    result: Self::validate_subscription_success(&suback.return_codes),
                },
                Packet::UnsubAck(unsuback) => EventRoute::UnsubscribeAcknowledged {
                    packet_id: unsuback.pkid,
                    result: Self::validate_unsubscribe_success(&unsuback.reasons),
                },
                Packet::Disconnect(_) => EventRoute::Disconnected,
                other => EventRoute::InfrastructureEvent(format!("{other:?}")),
            },
            Event::Outgoing(outgoing) => match outgoing {
                Outgoing::Publish(packet_id) => EventRoute::PublishSent(*packet_id),
                Outgoing::Subscribe(packet_id) => EventRoute::SubscribeSent(*packet_id),
                Outgoing::Unsubscribe(packet_id) => EventRoute::UnsubscribeSent(*packet_id),
                Outgoing::Disconnect => EventRoute::DisconnectSent,
                _ => EventRoute::OutgoingEvent,
            },
        }
    }

    /// Validate a PubAck reason code (pure function)
    pub fn validate_publish_ack(reason: &PubAckReason) -> Result<(), TransportError> {
        match reason {
            PubAckReason::Success | PubAckReason::NoMatchingSubscribers => Ok(()),
            failure => Err(TransportError::PublishRejected(format!("{failure:?}"))),
        }
    }

    /// Validate subscription success from SubAck (pure function)
    pub fn validate_subscription_success(
        return_codes: &[SubscribeReasonCode],
    ) -> Result<(), TransportError> {
        let failures: Vec<_> = return_codes
            .iter()
            .filter(|code| !matches!(code, SubscribeReasonCode::Success(_)))
            .collect();

        if failures.is_empty() {
            Ok(())
        } else {
            Err(TransportError::SubscriptionRejected(format!("{failures:?}")))
        }
    }

    /// Validate unsubscribe success from UnsubAck (pure function)
    pub fn validate_unsubscribe_success(reasons: &[UnsubAckReason]) -> Result<(), TransportError> {
        let failures: Vec<_> = reasons
            .iter()
            .filter(|reason| !matches!(reason, UnsubAckReason::Success))
            .collect();

        if failures.is_empty() {
            Ok(())
        } else {
            Err(TransportError::UnsubscribeRejected(format!("{failures:?}")))
        }
    }

    /// Extract a broker refusal from an event loop error (pure function)
    ///
    /// rumqttc reports a refused PubAck, PubRec, SubAck or UnsubAck as a
    /// connection error instead of an event. The refused request still
    /// deserves the broker's reason rather than a generic link failure.
    pub fn classify_ack_rejection(error: &ConnectionError) -> Option<(AckKind, TransportError)> {
        let ConnectionError::MqttState(state) = error else {
            return None;
        };
        match state {
            StateError::PubAckFail { reason } => Some((
                AckKind::Publish,
                TransportError::PublishRejected(format!("{reason:?}")),
            )),
            StateError::PubRecFail { reason } => Some((
                AckKind::Publish,
                TransportError::PublishRejected(format!("{reason:?}")),
            )),
            StateError::SubFail { reason } => Some((
                AckKind::Subscribe,
                TransportError::SubscriptionRejected(format!("{:?}", [reason])),
            )),
            StateError::UnsubFail { reason } => Some((
                AckKind::Unsubscribe,
                TransportError::UnsubscribeRejected(format!("{:?}", [reason])),
            )),
            _ => None,
        }
    }

    /// Check whether a topic name matches a subscription filter (pure function)
    ///
    /// Implements MQTT wildcard rules: `+` matches exactly one level, a trailing
    /// `#` matches any number of remaining levels (including none), and topics
    /// starting with `$` are never matched by a leading wildcard.
    pub fn topic_matches(filter: &str, topic: &str) -> bool {
        if topic.starts_with('$') && (filter.starts_with('+') || filter.starts_with('#')) {
            return false;
        }

        let mut filter_levels = filter.split('/');
        let mut topic_levels = topic.split('/');

        loop {
            match (filter_levels.next(), topic_levels.next()) {
                (Some("#"), _) => return filter_levels.next().is_none(),
                (Some("+"), Some(_)) => continue,
                (Some(expected), Some(actual)) if expected == actual => continue,
                (None, None) => return true,
                _ => return false,
            }
        }
    }
}

/// Routing decisions for MQTT events
#[derive(Debug, Clone, PartialEq)]
pub enum EventRoute {
    /// Connection acknowledged - ready to publish/subscribe
    ConnectionAcknowledged,
    /// Message received on a subscribed topic
    MessageReceived { topic: String, payload: Vec<u8> },
    /// Broker completed (or refused) a publish
    PublishAcknowledged {
        packet_id: u16,
        result: Result<(), TransportError>,
    },
    /// Broker answered a subscribe request
    SubscriptionAcknowledged {
        packet_id: u16,
        result: Result<(), TransportError>,
    },
    /// Broker answered an unsubscribe request
    UnsubscribeAcknowledged {
        packet_id: u16,
        result: Result<(), TransportError>,
    },
    /// MQTT broker disconnected
    Disconnected,
    /// A publish was written to the network with this packet id
    PublishSent(u16),
    /// A subscribe was written to the network with this packet id
    SubscribeSent(u16),
    /// An unsubscribe was written to the network with this packet id
    UnsubscribeSent(u16),
    /// Our DISCONNECT was written to the network
    DisconnectSent,
    /// Other infrastructure events (pings etc.)
    InfrastructureEvent(String),
    /// Outgoing events not tracked by the session
    OutgoingEvent,
}
