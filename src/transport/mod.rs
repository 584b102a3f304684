//! Transport layer for the publish/subscribe client
//!
//! This module provides the session abstraction the client controller drives,
//! the lifecycle observer it registers, and the MQTT implementation.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

pub mod mqtt;

pub use mqtt::{ConnectionState, ReconnectConfig, TransportError};

/// Callback receiving the raw payload of every message delivered on a subscription
pub type MessageCallback = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// Delivery guarantee tier for a subscription or publication
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum QosLevel {
    #[default]
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

impl TryFrom<u8> for QosLevel {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(QosLevel::AtMostOnce),
            1 => Ok(QosLevel::AtLeastOnce),
            2 => Ok(QosLevel::ExactlyOnce),
            other => Err(format!("QoS level must be 0, 1 or 2, got {other}")),
        }
    }
}

impl From<QosLevel> for u8 {
    fn from(qos: QosLevel) -> Self {
        match qos {
            QosLevel::AtMostOnce => 0,
            QosLevel::AtLeastOnce => 1,
            QosLevel::ExactlyOnce => 2,
        }
    }
}

impl fmt::Display for QosLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", u8::from(*self))
    }
}

/// Everything a session needs to open its connection
#[derive(Debug, Clone, PartialEq)]
pub struct SessionOptions {
    pub endpoint: String,
    pub client_id: String,
    pub username: String,
    pub password: String,
    /// Always true when built by the client controller
    pub auto_reconnect: bool,
    pub keep_alive: Duration,
    pub connect_timeout: Duration,
    pub reconnect: ReconnectConfig,
}

/// Lifecycle callbacks a session fires on connection state transitions
///
/// Callbacks receive the session that fired them so they can issue further
/// requests (e.g. resubscribe) without holding their own handle to it.
#[async_trait::async_trait]
pub trait SessionObserver: Send + Sync {
    /// Fired on every successful handshake, initial and after reconnection
    async fn on_connect(&self, session: &dyn Session);

    /// Fired once when an established link drops unexpectedly
    async fn on_connection_lost(&self, session: &dyn Session, cause: &TransportError);

    /// Fired before each reconnection attempt
    async fn on_reconnecting(&self, session: &dyn Session, attempt: u32);
}

/// Session trait for broker communication
///
/// This trait abstracts the physical connection so the client controller can
/// be exercised against a mock in tests and against MQTT in production.
#[async_trait::async_trait]
pub trait Session: Send + Sync {
    /// Build a configured but unopened session. No network I/O happens here.
    fn build(
        options: SessionOptions,
        observer: Arc<dyn SessionObserver>,
    ) -> Result<Self, TransportError>
    where
        Self: Sized;

    /// Perform the initial handshake, blocking until it succeeds or fails
    async fn connect(&self) -> Result<(), TransportError>;

    /// Disconnect after allowing in-flight acknowledgments up to `linger`
    async fn disconnect(&self, linger: Duration) -> Result<(), TransportError>;

    /// Subscribe to `topic`, waiting for the broker's acknowledgment
    async fn subscribe(
        &self,
        topic: &str,
        qos: QosLevel,
        on_message: MessageCallback,
    ) -> Result<(), TransportError>;

    /// Unsubscribe from `topic`, waiting for the broker's acknowledgment
    async fn unsubscribe(&self, topic: &str) -> Result<(), TransportError>;

    /// Publish `payload` on `topic`, waiting for the broker's acknowledgment
    async fn publish(
        &self,
        topic: &str,
        qos: QosLevel,
        retain: bool,
        payload: &[u8],
    ) -> Result<(), TransportError>;

    /// Current connection state
    fn connection_state(&self) -> ConnectionState;

    /// Check if the session is currently connected
    fn is_connected(&self) -> bool {
        matches!(self.connection_state(), ConnectionState::Connected)
    }
}
