//! MQTT v5 session implementation
//!
//! This module separates pure functions from I/O operations for better
//! testability.
//!
//! # Architecture
//!
//! - [`connection`] - Pure connection state, errors and option building
//! - [`message_handler`] - Pure event routing, ack validation and topic matching
//! - [`health_monitor`] - Pure reconnection decisions and state transitions
//! - [`acks`] - Correlation of in-flight requests with broker acknowledgments
//! - [`session`] - Impure I/O operations and coordination
//!
//! # Usage
//!
//! ```rust,no_run
//! use mqttlink::transport::mqtt::MqttSession;
//! use mqttlink::transport::{QosLevel, Session, SessionObserver, SessionOptions};
//! use mqttlink::transport::{ReconnectConfig, TransportError};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! struct Quiet;
//!
//! #[async_trait::async_trait]
//! impl SessionObserver for Quiet {
//!     async fn on_connect(&self, _session: &dyn Session) {}
//!     async fn on_connection_lost(&self, _session: &dyn Session, _cause: &TransportError) {}
//!     async fn on_reconnecting(&self, _session: &dyn Session, _attempt: u32) {}
//! }
//!
//! # tokio_test::block_on(async {
//! let options = SessionOptions {
//!     endpoint: "mqtt://localhost:1883".to_string(),
//!     client_id: "sensor-gateway".to_string(),
//!     username: String::new(),
//!     password: String::new(),
//!     auto_reconnect: true,
//!     keep_alive: Duration::from_secs(60),
//!     connect_timeout: Duration::from_secs(30),
//!     reconnect: ReconnectConfig::default(),
//! };
//!
//! let session = MqttSession::build(options, Arc::new(Quiet))?;
//! session.connect().await?;
//! session.publish("sensors/temp", QosLevel::AtLeastOnce, true, b"21.5").await?;
//! session.disconnect(Duration::ZERO).await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod acks;
pub mod connection;
pub mod health_monitor;
pub mod message_handler;
pub mod session;

// Re-export public types for convenience
pub use connection::{BrokerAddress, ConnectionState, ReconnectConfig, TransportError};
pub use health_monitor::{ConnectionEvent, HealthMonitor, ReconnectionDecision};
pub use message_handler::{EventRoute, MessageHandler};
pub use session::MqttSession;
