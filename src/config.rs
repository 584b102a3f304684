//! Configuration for the publish/subscribe client
//!
//! The client controller reads its settings through the [`BrokerSettings`]
//! trait. [`ClientConfig`] is the TOML-backed implementation used by the
//! command-line tool; tests and embedders can supply their own.

use crate::transport::mqtt::connection::parse_broker_url;
use crate::transport::{QosLevel, ReconnectConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Environment variable consulted for the instance identity by default
pub const DEFAULT_INSTANCE_ID_ENV: &str = "POD_NAME";

/// Read-only provider of everything the client controller needs
pub trait BrokerSettings: Send + Sync {
    /// Default client identity, used when the instance id variable is unset
    fn client_id(&self) -> &str;

    /// Broker URL, e.g. `mqtt://localhost:1883`
    fn endpoint(&self) -> &str;

    fn username(&self) -> String;

    fn password(&self) -> String;

    /// Topic `produce` publishes to
    fn producer_topic(&self) -> Option<&str>;

    /// Topic `subscribe` listens on
    fn consumer_topic(&self) -> Option<&str>;

    fn consumer_qos(&self) -> QosLevel;

    /// Name of the environment variable that overrides the client identity
    fn instance_id_env(&self) -> &str {
        DEFAULT_INSTANCE_ID_ENV
    }

    /// Connection tuning
    fn connection(&self) -> ConnectionSection {
        ConnectionSection::default()
    }
}

/// Main client configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientConfig {
    pub broker: BrokerSection,
    #[serde(default)]
    pub topics: TopicsSection,
    #[serde(default)]
    pub connection: ConnectionSection,
}

/// Broker section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BrokerSection {
    /// MQTT broker URL with protocol and port
    pub endpoint: String,
    /// Client identifier (must match [a-zA-Z0-9._-]+)
    pub client_id: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// Environment variable containing username, overrides `username` when set
    pub username_env: Option<String>,
    /// Environment variable containing password, overrides `password` when set
    pub password_env: Option<String>,
    /// Environment variable containing the instance identity
    #[serde(default = "default_instance_id_env")]
    pub instance_id_env: String,
}

fn default_instance_id_env() -> String {
    DEFAULT_INSTANCE_ID_ENV.to_string()
}

/// Topics section
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TopicsSection {
    pub producer: Option<String>,
    pub consumer: Option<String>,
    #[serde(default)]
    pub consumer_qos: QosLevel,
}

/// Connection tuning section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectionSection {
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// How long close waits for in-flight acknowledgments before disconnecting
    #[serde(default)]
    pub disconnect_linger_ms: u64,
    #[serde(default = "default_backoff")]
    pub reconnect_backoff_ms: Vec<u64>,
    #[serde(default = "default_sustained")]
    pub reconnect_sustained_ms: u64,
}

fn default_keep_alive() -> u64 {
    60
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_backoff() -> Vec<u64> {
    ReconnectConfig::default().backoff_pattern
}

fn default_sustained() -> u64 {
    ReconnectConfig::default().sustained_delay
}

impl Default for ConnectionSection {
    fn default() -> Self {
        Self {
            keep_alive_secs: default_keep_alive(),
            connect_timeout_secs: default_connect_timeout(),
            disconnect_linger_ms: 0,
            reconnect_backoff_ms: default_backoff(),
            reconnect_sustained_ms: default_sustained(),
        }
    }
}

impl ConnectionSection {
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn disconnect_linger(&self) -> Duration {
        Duration::from_millis(self.disconnect_linger_ms)
    }

    pub fn reconnect_config(&self) -> ReconnectConfig {
        ReconnectConfig {
            backoff_pattern: self.reconnect_backoff_ms.clone(),
            sustained_delay: self.reconnect_sustained_ms,
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Invalid client ID format: {0}")]
    InvalidClientId(String),
    #[error("Invalid broker endpoint: {0}")]
    InvalidEndpoint(String),
    #[error("Invalid topic: {0}")]
    InvalidTopic(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ClientConfig {
    /// Load configuration from a TOML file and validate it
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML text and validate it
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: ClientConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check field formats that serde cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        parse_broker_url(&self.broker.endpoint)
            .map_err(|e| ConfigError::InvalidEndpoint(e.to_string()))?;
        validate_client_id(&self.broker.client_id)?;

        if let Some(producer) = &self.topics.producer {
            validate_topic_name(producer)?;
        }
        if let Some(consumer) = &self.topics.consumer {
            if consumer.is_empty() {
                return Err(ConfigError::InvalidTopic(
                    "consumer topic must not be empty".to_string(),
                ));
            }
        }

        if self.connection.reconnect_sustained_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "reconnect_sustained_ms must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }

    /// Helper method to get environment variable with consistent error handling
    fn get_env_var_optional(env_var_name: Option<&String>) -> Option<String> {
        env_var_name
            .and_then(|name| std::env::var(name).ok())
            .filter(|value| !value.is_empty())
    }
}

impl BrokerSettings for ClientConfig {
    fn client_id(&self) -> &str {
        &self.broker.client_id
    }

    fn endpoint(&self) -> &str {
        &self.broker.endpoint
    }

    fn username(&self) -> String {
        Self::get_env_var_optional(self.broker.username_env.as_ref())
            .unwrap_or_else(|| self.broker.username.clone())
    }

    fn password(&self) -> String {
        Self::get_env_var_optional(self.broker.password_env.as_ref())
            .unwrap_or_else(|| self.broker.password.clone())
    }

    fn producer_topic(&self) -> Option<&str> {
        self.topics.producer.as_deref()
    }

    fn consumer_topic(&self) -> Option<&str> {
        self.topics.consumer.as_deref()
    }

    fn consumer_qos(&self) -> QosLevel {
        self.topics.consumer_qos
    }

    fn instance_id_env(&self) -> &str {
        &self.broker.instance_id_env
    }

    fn connection(&self) -> ConnectionSection {
        self.connection.clone()
    }
}

/// Validate client ID format
fn validate_client_id(client_id: &str) -> Result<(), ConfigError> {
    let valid_chars = client_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-');

    if client_id.is_empty() || !valid_chars {
        return Err(ConfigError::InvalidClientId(format!(
            "Client ID '{client_id}' must match pattern [a-zA-Z0-9._-]+"
        )));
    }

    Ok(())
}

/// Publish topics may not be empty or contain wildcards
fn validate_topic_name(topic: &str) -> Result<(), ConfigError> {
    if topic.is_empty() {
        return Err(ConfigError::InvalidTopic(
            "producer topic must not be empty".to_string(),
        ));
    }
    if topic.contains(['+', '#']) {
        return Err(ConfigError::InvalidTopic(format!(
            "producer topic '{topic}' must not contain wildcards"
        )));
    }
    Ok(())
}
