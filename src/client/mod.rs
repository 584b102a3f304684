//! Publish/subscribe client controller
//!
//! [`PubSubClient`] owns exactly one session for its whole lifetime and gives
//! callers a small `connect / subscribe / produce / close` surface. The
//! session reconnects on its own; the controller only reacts to its lifecycle
//! callbacks and restores the consumer subscription after a reconnect.
//!
//! ```rust,no_run
//! use mqttlink::{ClientConfig, PubSubClient};
//! use std::path::Path;
//!
//! # tokio_test::block_on(async {
//! let config = ClientConfig::load_from_file(Path::new("mqttlink.toml"))?;
//! let client = PubSubClient::new(config)?;
//! client.connect().await?;
//! client
//!     .subscribe(|payload: &[u8]| println!("{}", String::from_utf8_lossy(payload)))
//!     .await;
//! client.produce(b"hello").await?;
//! client.close().await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

mod resubscribe;

use crate::config::BrokerSettings;
use crate::error::{ClientError, ClientResult, TopicRole};
use crate::mqtt_span;
use crate::transport::mqtt::MqttSession;
use crate::transport::{ConnectionState, MessageCallback, QosLevel, Session, SessionOptions};
use resubscribe::ClientCore;
use std::sync::Arc;
use tracing::{info, warn, Instrument};

/// Where the client identity came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientIdSource {
    /// The instance id environment variable
    Environment,
    /// The configured default
    Configured,
}

/// Pick the client identity: a non-empty instance id wins over the configured default
pub fn resolve_client_id(instance_id: Option<String>, configured: &str) -> (String, ClientIdSource) {
    match instance_id.filter(|id| !id.is_empty()) {
        Some(id) => (id, ClientIdSource::Environment),
        None => (configured.to_string(), ClientIdSource::Configured),
    }
}

/// Client controller over a single broker session
pub struct PubSubClient<S: Session = MqttSession> {
    core: Arc<ClientCore>,
    session: S,
}

impl PubSubClient<MqttSession> {
    /// Build a controller over an MQTT session. No network I/O happens here.
    pub fn new(settings: impl BrokerSettings + 'static) -> ClientResult<Self> {
        Self::with_session(settings)
    }
}

impl<S: Session> PubSubClient<S> {
    /// Build a controller over any session implementation
    pub fn with_session(settings: impl BrokerSettings + 'static) -> ClientResult<Self> {
        let settings: Arc<dyn BrokerSettings> = Arc::new(settings);

        let instance_env = settings.instance_id_env();
        let (client_id, source) =
            resolve_client_id(std::env::var(instance_env).ok(), settings.client_id());
        if source == ClientIdSource::Configured {
            info!(
                env = %instance_env,
                client_id = %client_id,
                "Instance id not set, using configured client id"
            );
        }

        if settings.producer_topic().is_none() {
            warn!(client_id = %client_id, "No producer topic configured, produce will fail");
        }
        if settings.consumer_topic().is_none() {
            warn!(client_id = %client_id, "No consumer topic configured, subscribe will be skipped");
        }

        let connection = settings.connection();
        let options = SessionOptions {
            endpoint: settings.endpoint().to_string(),
            client_id: client_id.clone(),
            username: settings.username(),
            password: settings.password(),
            auto_reconnect: true,
            keep_alive: connection.keep_alive(),
            connect_timeout: connection.connect_timeout(),
            reconnect: connection.reconnect_config(),
        };

        let core = Arc::new(ClientCore::new(settings, client_id));
        let session = S::build(options, core.clone())?;

        Ok(Self { core, session })
    }

    /// Client identity presented to the broker
    pub fn client_id(&self) -> &str {
        self.core.client_id()
    }

    /// The underlying session
    pub fn session(&self) -> &S {
        &self.session
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.session.connection_state()
    }

    /// True between a reconnection attempt starting and the next successful handshake
    pub fn is_reconnecting(&self) -> bool {
        self.core.is_reconnecting()
    }

    /// Open the session, blocking until the initial handshake succeeds or fails
    pub async fn connect(&self) -> ClientResult<()> {
        let span = mqtt_span!(operation = "connect", client_id = %self.client_id());
        async {
            self.session.connect().await?;
            Ok::<(), ClientError>(())
        }
        .instrument(span)
        .await
    }

    /// Register `handler` for the consumer topic and subscribe
    ///
    /// The handler replaces any previous one and is replayed after every
    /// reconnect. Subscribe failures are logged, not returned.
    pub async fn subscribe<F>(&self, handler: F)
    where
        F: Fn(&[u8]) + Send + Sync + 'static,
    {
        let handler: MessageCallback = Arc::new(handler);
        self.core.store_handler(handler.clone());

        let span = mqtt_span!(operation = "subscribe", client_id = %self.client_id());
        self.core
            .subscribe_on(&self.session, handler)
            .instrument(span)
            .await;
    }

    /// Publish `payload` on the producer topic at least once, retained
    pub async fn produce(&self, payload: &[u8]) -> ClientResult<()> {
        let topic = self
            .core
            .settings()
            .producer_topic()
            .ok_or(ClientError::TopicNotConfigured(TopicRole::Producer))?;

        let span = mqtt_span!(operation = "produce", topic = %topic, bytes = payload.len());
        async {
            self.session
                .publish(topic, QosLevel::AtLeastOnce, true, payload)
                .await?;
            Ok::<(), ClientError>(())
        }
        .instrument(span)
        .await
    }

    /// Unsubscribe from the consumer topic, then disconnect
    ///
    /// Unsubscribe failures are logged; a disconnect failure is returned.
    pub async fn close(&self) -> ClientResult<()> {
        let span = mqtt_span!(operation = "close", client_id = %self.client_id());
        async {
            match self.core.consumer_topic() {
                Ok(topic) => {
                    if let Err(e) = self.session.unsubscribe(topic).await {
                        warn!(topic = %topic, error = %e, "Failed to unsubscribe from consumer topic");
                    }
                }
                Err(e) => warn!(error = %e, "Skipping unsubscribe"),
            }

            let linger = self.core.settings().connection().disconnect_linger();
            self.session.disconnect(linger).await?;
            info!("Client closed");
            Ok::<(), ClientError>(())
        }
        .instrument(span)
        .await
    }
}
