//! mqttlink - MQTT publish/subscribe client
//!
//! A connection-lifecycle and publish/subscribe manager for a single logical
//! client of an MQTT broker.
//!
//! # Overview
//!
//! This crate provides:
//! - A client controller with a `connect / subscribe / produce / close` surface
//! - Subscription replay after the session reconnects
//! - An MQTT v5 session with automatic reconnection and acknowledgment tracking
//! - TOML configuration with environment overrides
//!
//! # Quick Start
//!
//! ```rust
//! use mqttlink::ClientConfig;
//! use mqttlink::config::BrokerSettings;
//! use mqttlink::transport::QosLevel;
//!
//! let config = ClientConfig::from_toml_str(r#"
//! [broker]
//! endpoint = "mqtt://localhost:1883"
//! client_id = "sensor-gateway"
//!
//! [topics]
//! producer = "sensors/out"
//! consumer = "sensors/+/temp"
//! consumer_qos = 1
//! "#).unwrap();
//!
//! assert_eq!(config.consumer_qos(), QosLevel::AtLeastOnce);
//! assert_eq!(config.producer_topic(), Some("sensors/out"));
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod observability;
pub mod testing;
pub mod transport;

pub use client::PubSubClient;
pub use config::{BrokerSettings, ClientConfig, ConfigError};
pub use error::{ClientError, ClientResult, TopicRole};
pub use transport::mqtt::MqttSession;
pub use transport::{QosLevel, Session, SessionObserver, TransportError};
