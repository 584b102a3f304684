//! Reconnection tracking and subscription replay
//!
//! [`ClientCore`] is the state the controller shares with its session: it is
//! registered as the session's observer, remembers whether the session is
//! mid-reconnection, and replays the consumer subscription once the session
//! reconnects.

use crate::config::BrokerSettings;
use crate::error::{ClientError, ClientResult, TopicRole};
use crate::lifecycle_span;
use crate::transport::{MessageCallback, Session, SessionObserver, TransportError};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{error, info, warn, Instrument};

pub(crate) struct ClientCore {
    settings: Arc<dyn BrokerSettings>,
    client_id: String,
    reconnecting: AtomicBool,
    handler: Mutex<Option<MessageCallback>>,
}

impl ClientCore {
    pub(crate) fn new(settings: Arc<dyn BrokerSettings>, client_id: String) -> Self {
        Self {
            settings,
            client_id,
            reconnecting: AtomicBool::new(false),
            handler: Mutex::new(None),
        }
    }

    pub(crate) fn settings(&self) -> &dyn BrokerSettings {
        self.settings.as_ref()
    }

    pub(crate) fn client_id(&self) -> &str {
        &self.client_id
    }

    pub(crate) fn is_reconnecting(&self) -> bool {
        self.reconnecting.load(Ordering::SeqCst)
    }

    /// Replace the stored handler
    pub(crate) fn store_handler(&self, handler: MessageCallback) {
        *self
            .handler
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handler);
    }

    pub(crate) fn handler(&self) -> Option<MessageCallback> {
        self.handler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn consumer_topic(&self) -> ClientResult<&str> {
        self.settings
            .consumer_topic()
            .ok_or(ClientError::TopicNotConfigured(TopicRole::Consumer))
    }

    /// Subscribe `handler` on the consumer topic. Failures are logged, never returned.
    pub(crate) async fn subscribe_on(&self, session: &dyn Session, handler: MessageCallback) {
        let topic = match self.consumer_topic() {
            Ok(topic) => topic,
            Err(e) => {
                warn!(client_id = %self.client_id, error = %e, "Skipping subscribe");
                return;
            }
        };
        let qos = self.settings.consumer_qos();

        match session.subscribe(topic, qos, handler).await {
            Ok(()) => info!(topic = %topic, qos = %qos, "Subscribed to consumer topic"),
            Err(e) => error!(topic = %topic, error = %e, "Failed to subscribe to consumer topic"),
        }
    }
}

#[async_trait]
impl SessionObserver for ClientCore {
    async fn on_connect(&self, session: &dyn Session) {
        info!(client_id = %self.client_id, endpoint = %self.settings.endpoint(), "Connected to broker");

        if !self.reconnecting.swap(false, Ordering::SeqCst) {
            return;
        }

        let Some(handler) = self.handler() else {
            return;
        };

        let span = lifecycle_span!(event = "resubscribe", client_id = %self.client_id);
        async {
            info!("Reconnected, restoring consumer subscription");
            self.subscribe_on(session, handler).await;
        }
        .instrument(span)
        .await;
    }

    async fn on_connection_lost(&self, _session: &dyn Session, cause: &TransportError) {
        warn!(client_id = %self.client_id, cause = %cause, "Connection to broker lost");
    }

    async fn on_reconnecting(&self, _session: &dyn Session, attempt: u32) {
        self.reconnecting.store(true, Ordering::SeqCst);
        info!(client_id = %self.client_id, attempt, "Reconnecting to broker");
    }
}
