//! Pure connection state management for the MQTT session
//!
//! This module contains pure functions for connection state management,
//! broker URL handling, and translating session options into rumqttc options.

use crate::transport::{QosLevel, SessionOptions};
use rumqttc::v5::{mqttbytes::QoS, MqttOptions};
use rumqttc::Transport as RumqttcTransport;
use thiserror::Error;
use url::Url;

/// Connection state for an MQTT session
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    /// Not connected - never opened, or closed
    Disconnected,
    /// Initial handshake in progress
    Connecting,
    /// Successfully connected and ready for operations
    Connected,
    /// Link dropped and the session is retrying (attempt count)
    Reconnecting(u32),
    /// Link dropped with reason, before the next retry begins
    ConnectionLost(String),
}

/// Reconnection backoff configuration
///
/// Retries are unlimited; once the pattern is exhausted every further attempt
/// waits `sustained_delay` milliseconds.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Backoff pattern in milliseconds
    pub backoff_pattern: Vec<u64>,
    /// Delay to use after pattern is exhausted
    pub sustained_delay: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            backoff_pattern: vec![25, 50, 100, 250], // 25ms, 50ms, 100ms, 250ms pattern
            sustained_delay: 250,                    // Stay at 250ms after pattern exhausted
        }
    }
}

impl ReconnectConfig {
    /// Calculate backoff delay for given attempt (1-based)
    pub fn calculate_backoff_delay(&self, attempt: u32) -> u64 {
        let index = attempt.saturating_sub(1) as usize;
        self.backoff_pattern
            .get(index)
            .copied()
            .unwrap_or(self.sustained_delay)
    }
}

/// Transport errors reported by a session
///
/// Errors are `Clone` so a single link failure can be delivered to every
/// request still waiting for an acknowledgment.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TransportError {
    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Connection lost: {0}")]
    ConnectionLost(String),
    #[error("Not connected - current state: {state:?}")]
    NotConnected { state: ConnectionState },
    #[error("Session already started")]
    AlreadyStarted,
    #[error("Request could not be queued: {0}")]
    RequestFailed(String),
    #[error("Publish rejected by broker: {0}")]
    PublishRejected(String),
    #[error("Subscription rejected by broker: {0}")]
    SubscriptionRejected(String),
    #[error("Unsubscribe rejected by broker: {0}")]
    UnsubscribeRejected(String),
    #[error("Timed out waiting for {0}")]
    Timeout(&'static str),
}

/// Broker address extracted from an endpoint URL
#[derive(Debug, Clone, PartialEq)]
pub struct BrokerAddress {
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

/// Parse a broker endpoint such as `mqtt://host:1883` or `mqtts://host`
pub fn parse_broker_url(endpoint: &str) -> Result<BrokerAddress, TransportError> {
    let url =
        Url::parse(endpoint).map_err(|_| TransportError::InvalidBrokerUrl(endpoint.to_string()))?;

    let tls = match url.scheme() {
        "mqtt" | "tcp" => false,
        "mqtts" | "ssl" => true,
        _ => return Err(TransportError::InvalidBrokerUrl(endpoint.to_string())),
    };

    let host = url
        .host_str()
        .filter(|host| !host.is_empty())
        .ok_or_else(|| TransportError::InvalidBrokerUrl(endpoint.to_string()))?;
    let port = url.port().unwrap_or(if tls { 8883 } else { 1883 });

    Ok(BrokerAddress {
        host: host.to_string(),
        port,
        tls,
    })
}

/// Pure function to configure rumqttc options from session options
pub fn configure_mqtt_options(options: &SessionOptions) -> Result<MqttOptions, TransportError> {
    let address = parse_broker_url(&options.endpoint)?;

    let mut mqtt_options = MqttOptions::new(&options.client_id, address.host, address.port);

    if address.tls {
        mqtt_options.set_transport(RumqttcTransport::tls_with_default_config());
    }

    if !options.username.is_empty() {
        mqtt_options.set_credentials(&options.username, &options.password);
    }

    mqtt_options.set_keep_alive(options.keep_alive);
    mqtt_options.set_clean_start(true);
    mqtt_options.set_max_packet_size(Some(256 * 1024));

    Ok(mqtt_options)
}

/// Map a QoS level onto the rumqttc representation
pub fn to_mqtt_qos(qos: QosLevel) -> QoS {
    match qos {
        QosLevel::AtMostOnce => QoS::AtMostOnce,
        QosLevel::AtLeastOnce => QoS::AtLeastOnce,
        QosLevel::ExactlyOnce => QoS::ExactlyOnce,
    }
}
