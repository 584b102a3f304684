//! Mock implementations for testing
//!
//! Provides a mock [`Session`] that records every call, lets tests script
//! failures, and fires lifecycle callbacks on demand, so the client
//! controller can be exercised without a broker.

use crate::transport::mqtt::MessageHandler;
use crate::transport::{
    ConnectionState, MessageCallback, QosLevel, Session, SessionObserver, SessionOptions,
    TransportError,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// A call made on a [`MockSession`]
#[derive(Debug, Clone, PartialEq)]
pub enum SessionCall {
    Connect,
    Disconnect {
        linger: Duration,
    },
    Subscribe {
        topic: String,
        qos: QosLevel,
    },
    Unsubscribe {
        topic: String,
    },
    Publish {
        topic: String,
        qos: QosLevel,
        retain: bool,
        payload: Vec<u8>,
    },
}

#[derive(Default)]
struct ScriptedFailures {
    connect: Option<TransportError>,
    disconnect: Option<TransportError>,
    subscribe: Option<TransportError>,
    unsubscribe: Option<TransportError>,
    publish: Option<TransportError>,
}

struct MockSessionState {
    options: SessionOptions,
    observer: Arc<dyn SessionObserver>,
    calls: Mutex<Vec<SessionCall>>,
    subscriptions: Mutex<HashMap<String, MessageCallback>>,
    state: Mutex<ConnectionState>,
    failures: Mutex<ScriptedFailures>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Mock session for testing
///
/// Clones share state, so a test can keep a handle while the controller owns
/// another.
#[derive(Clone)]
pub struct MockSession {
    inner: Arc<MockSessionState>,
}

impl MockSession {
    /// Options the session was built with
    pub fn options(&self) -> SessionOptions {
        self.inner.options.clone()
    }

    /// Every call made so far, in order
    pub fn calls(&self) -> Vec<SessionCall> {
        lock(&self.inner.calls).clone()
    }

    pub fn clear_calls(&self) {
        lock(&self.inner.calls).clear();
    }

    /// Number of subscribe calls made so far
    pub fn subscribe_count(&self) -> usize {
        lock(&self.inner.calls)
            .iter()
            .filter(|call| matches!(call, SessionCall::Subscribe { .. }))
            .count()
    }

    /// Payloads published so far
    pub fn published(&self) -> Vec<Vec<u8>> {
        lock(&self.inner.calls)
            .iter()
            .filter_map(|call| match call {
                SessionCall::Publish { payload, .. } => Some(payload.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn fail_connect_with(&self, error: TransportError) {
        lock(&self.inner.failures).connect = Some(error);
    }

    pub fn fail_disconnect_with(&self, error: TransportError) {
        lock(&self.inner.failures).disconnect = Some(error);
    }

    pub fn fail_subscribe_with(&self, error: TransportError) {
        lock(&self.inner.failures).subscribe = Some(error);
    }

    pub fn fail_unsubscribe_with(&self, error: TransportError) {
        lock(&self.inner.failures).unsubscribe = Some(error);
    }

    pub fn fail_publish_with(&self, error: TransportError) {
        lock(&self.inner.failures).publish = Some(error);
    }

    pub fn clear_failures(&self) {
        *lock(&self.inner.failures) = ScriptedFailures::default();
    }

    fn set_state(&self, state: ConnectionState) {
        *lock(&self.inner.state) = state;
    }

    fn record(&self, call: SessionCall) {
        lock(&self.inner.calls).push(call);
    }

    /// Simulate a successful handshake and fire `on_connect`
    pub async fn fire_connect(&self) {
        self.set_state(ConnectionState::Connected);
        let observer = Arc::clone(&self.inner.observer);
        observer.on_connect(self).await;
    }

    /// Simulate an established link dropping and fire `on_connection_lost`
    ///
    /// Subscriptions are forgotten, as with a clean-start broker session.
    pub async fn fire_connection_lost(&self, cause: TransportError) {
        self.set_state(ConnectionState::ConnectionLost(cause.to_string()));
        lock(&self.inner.subscriptions).clear();
        let observer = Arc::clone(&self.inner.observer);
        observer.on_connection_lost(self, &cause).await;
    }

    /// Simulate a reconnection attempt starting and fire `on_reconnecting`
    pub async fn fire_reconnecting(&self, attempt: u32) {
        self.set_state(ConnectionState::Reconnecting(attempt));
        let observer = Arc::clone(&self.inner.observer);
        observer.on_reconnecting(self, attempt).await;
    }

    /// Loss, one reconnection attempt, then a successful handshake
    pub async fn simulate_reconnect(&self) {
        self.fire_connection_lost(TransportError::ConnectionLost("simulated".to_string()))
            .await;
        self.fire_reconnecting(1).await;
        self.fire_connect().await;
    }

    /// Topic filters currently subscribed
    pub fn subscribed_topics(&self) -> Vec<String> {
        lock(&self.inner.subscriptions).keys().cloned().collect()
    }

    /// Deliver an inbound message to matching subscriptions, returning how many received it
    pub fn deliver(&self, topic: &str, payload: &[u8]) -> usize {
        let callbacks: Vec<MessageCallback> = lock(&self.inner.subscriptions)
            .iter()
            .filter(|(filter, _)| MessageHandler::topic_matches(filter, topic))
            .map(|(_, callback)| Arc::clone(callback))
            .collect();

        for callback in &callbacks {
            callback(payload);
        }
        callbacks.len()
    }
}

#[async_trait]
impl Session for MockSession {
    fn build(
        options: SessionOptions,
        observer: Arc<dyn SessionObserver>,
    ) -> Result<Self, TransportError> {
        Ok(MockSession {
            inner: Arc::new(MockSessionState {
                options,
                observer,
                calls: Mutex::new(Vec::new()),
                subscriptions: Mutex::new(HashMap::new()),
                state: Mutex::new(ConnectionState::Disconnected),
                failures: Mutex::new(ScriptedFailures::default()),
            }),
        })
    }

    async fn connect(&self) -> Result<(), TransportError> {
        self.record(SessionCall::Connect);
        let failure = lock(&self.inner.failures).connect.clone();
        if let Some(error) = failure {
            self.set_state(ConnectionState::Disconnected);
            return Err(error);
        }
        self.fire_connect().await;
        Ok(())
    }

    async fn disconnect(&self, linger: Duration) -> Result<(), TransportError> {
        self.record(SessionCall::Disconnect { linger });
        let failure = lock(&self.inner.failures).disconnect.clone();
        if let Some(error) = failure {
            return Err(error);
        }
        self.set_state(ConnectionState::Disconnected);
        Ok(())
    }

    async fn subscribe(
        &self,
        topic: &str,
        qos: QosLevel,
        on_message: MessageCallback,
    ) -> Result<(), TransportError> {
        self.record(SessionCall::Subscribe {
            topic: topic.to_string(),
            qos,
        });
        let failure = lock(&self.inner.failures).subscribe.clone();
        if let Some(error) = failure {
            return Err(error);
        }
        lock(&self.inner.subscriptions).insert(topic.to_string(), on_message);
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), TransportError> {
        self.record(SessionCall::Unsubscribe {
            topic: topic.to_string(),
        });
        let failure = lock(&self.inner.failures).unsubscribe.clone();
        if let Some(error) = failure {
            return Err(error);
        }
        lock(&self.inner.subscriptions).remove(topic);
        Ok(())
    }

    async fn publish(
        &self,
        topic: &str,
        qos: QosLevel,
        retain: bool,
        payload: &[u8],
    ) -> Result<(), TransportError> {
        self.record(SessionCall::Publish {
            topic: topic.to_string(),
            qos,
            retain,
            payload: payload.to_vec(),
        });
        let failure = lock(&self.inner.failures).publish.clone();
        if let Some(error) = failure {
            return Err(error);
        }
        Ok(())
    }

    fn connection_state(&self) -> ConnectionState {
        lock(&self.inner.state).clone()
    }
}
