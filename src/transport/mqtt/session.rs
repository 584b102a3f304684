//! Impure I/O operations for the MQTT session
//!
//! This module handles network communication, async coordination, and
//! integration with the rumqttc client. Two tasks run per connection:
//!
//! - the event loop supervisor polls rumqttc, correlates acknowledgments and
//!   drives reconnection with backoff
//! - the dispatcher fires lifecycle callbacks and delivers inbound messages,
//!   one at a time and in arrival order
//!
//! Acknowledgments are resolved on the supervisor, so a callback running on
//! the dispatcher may issue requests and wait for their acks.
//!
//! Whenever the supervisor stops, the network link is dropped and the rumqttc
//! event loop is handed back to the session so it can be connected again.

use super::acks::{AckKind, AckTracker};
use super::connection::{
    configure_mqtt_options, to_mqtt_qos, ConnectionState, ReconnectConfig, TransportError,
};
use super::health_monitor::{ConnectionEvent, HealthMonitor, ReconnectionDecision};
use super::message_handler::{EventRoute, MessageHandler};
use crate::transport::{MessageCallback, QosLevel, Session, SessionObserver, SessionOptions};
use async_trait::async_trait;
use rumqttc::v5::{AsyncClient, EventLoop, Request};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Capacity of the request channel between the client and the event loop
const REQUEST_CAPACITY: usize = 64;

/// How long to wait for the event loop to stop before aborting it
const GRACEFUL_SHUTDOWN: Duration = Duration::from_secs(2);

/// Poll interval while waiting for in-flight acknowledgments to drain
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// How long a queued DISCONNECT gets to reach the network
const DISCONNECT_FLUSH: Duration = Duration::from_secs(1);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Events forwarded from the event loop supervisor to the dispatcher
#[derive(Debug)]
enum SessionEvent {
    Connected,
    ConnectFailed(TransportError),
    ConnectionLost(TransportError),
    Reconnecting(u32),
    Message { topic: String, payload: Vec<u8> },
}

/// Handles of the tasks serving one connection
struct SessionRun {
    shutdown_tx: watch::Sender<bool>,
    event_loop_task: JoinHandle<()>,
    dispatcher_task: JoinHandle<()>,
}

struct SessionInner {
    endpoint: String,
    client_id: String,
    client: AsyncClient,
    event_loop: Arc<Mutex<Option<EventLoop>>>,
    observer: Arc<dyn SessionObserver>,
    subscriptions: RwLock<HashMap<String, MessageCallback>>,
    acks: Arc<Mutex<AckTracker>>,
    state_tx: watch::Sender<ConnectionState>,
    closing: Arc<AtomicBool>,
    run: Mutex<Option<SessionRun>>,
    auto_reconnect: bool,
    connect_timeout: Duration,
    reconnect_config: ReconnectConfig,
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        // Async disconnect is impossible here; only make sure no task outlives the session
        if let Some(run) = lock(&self.run).take() {
            let _ = run.shutdown_tx.send(true);
            run.event_loop_task.abort();
            run.dispatcher_task.abort();
        }
    }
}

/// MQTT v5 session backed by rumqttc
///
/// Cloning is cheap; all clones share one connection.
#[derive(Clone)]
pub struct MqttSession {
    inner: Arc<SessionInner>,
}

impl MqttSession {
    /// Client identifier presented to the broker
    pub fn client_id(&self) -> &str {
        &self.inner.client_id
    }

    /// Broker endpoint this session connects to
    pub fn endpoint(&self) -> &str {
        &self.inner.endpoint
    }

    fn apply_event(&self, event: ConnectionEvent) {
        let next = HealthMonitor::determine_next_state(&event);
        let previous = self.inner.state_tx.send_replace(next.clone());
        if previous != next {
            HealthMonitor::log_state_transition(&previous, &next);
        }
    }

    /// Check connection state before operations
    fn check_connection_state(&self) -> Result<(), TransportError> {
        let state = self.connection_state();
        if !HealthMonitor::can_issue_requests(&state) {
            return Err(TransportError::NotConnected { state });
        }
        Ok(())
    }

    /// Queue a request and its ack waiter atomically so waiters stay in request order
    fn submit<F>(
        &self,
        kind: AckKind,
        request: F,
    ) -> Result<oneshot::Receiver<Result<(), TransportError>>, TransportError>
    where
        F: FnOnce(&AsyncClient) -> Result<(), rumqttc::v5::ClientError>,
    {
        let mut acks = lock(&self.inner.acks);
        let waiter = acks.enqueue(kind);
        if let Err(e) = request(&self.inner.client) {
            acks.cancel_last(kind);
            return Err(TransportError::RequestFailed(e.to_string()));
        }
        Ok(waiter)
    }

    async fn await_ack(
        waiter: oneshot::Receiver<Result<(), TransportError>>,
        what: &'static str,
    ) -> Result<(), TransportError> {
        waiter.await.unwrap_or_else(|_| {
            Err(TransportError::ConnectionLost(format!(
                "session stopped while waiting for {what}"
            )))
        })
    }

    async fn wait_for_idle_acks(&self) {
        while !lock(&self.inner.acks).is_idle() {
            tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
        }
    }

    fn take_run(&self) -> Option<SessionRun> {
        lock(&self.inner.run).take()
    }

    /// Stop a connection's tasks, giving the event loop a chance to exit cleanly
    ///
    /// With a nonzero `flush` the event loop first gets that long to stop on
    /// its own, which it does once a queued DISCONNECT has been written.
    async fn stop_run(run: SessionRun, flush: Duration) {
        let SessionRun {
            shutdown_tx,
            mut event_loop_task,
            dispatcher_task,
        } = run;

        let flushed = if flush.is_zero() {
            None
        } else {
            match tokio::time::timeout(flush, &mut event_loop_task).await {
                Ok(joined) => Some(joined),
                Err(_) => {
                    warn!("DISCONNECT was not written within {:?}", flush);
                    None
                }
            }
        };

        let _ = shutdown_tx.send(true);
        let stopped = match flushed {
            Some(joined) => Ok(joined),
            None => tokio::time::timeout(GRACEFUL_SHUTDOWN, &mut event_loop_task).await,
        };
        match stopped {
            Ok(Ok(())) => debug!("Event loop task shut down gracefully"),
            Ok(Err(e)) if !e.is_cancelled() => warn!("Event loop task ended with error: {}", e),
            Err(_) => {
                warn!("Event loop task didn't shut down gracefully, forcing abort");
                event_loop_task.abort();
            }
            _ => {}
        }

        // The dispatcher drains once the event loop drops its sender
        if tokio::time::timeout(GRACEFUL_SHUTDOWN, dispatcher_task)
            .await
            .is_err()
        {
            warn!("Dispatcher task didn't drain in time");
        }
    }

    /// Deliver an inbound message to every subscription whose filter matches
    fn deliver(&self, topic: &str, payload: &[u8]) {
        let callbacks: Vec<MessageCallback> = self
            .inner
            .subscriptions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(filter, _)| MessageHandler::topic_matches(filter, topic))
            .map(|(_, callback)| Arc::clone(callback))
            .collect();

        if callbacks.is_empty() {
            debug!(topic = %topic, "Dropping message with no matching subscription");
            return;
        }

        for callback in callbacks {
            callback(payload);
        }
    }

    async fn dispatch(
        &self,
        event: SessionEvent,
        handshake_tx: &mut Option<oneshot::Sender<Result<(), TransportError>>>,
    ) {
        match event {
            SessionEvent::Connected => {
                self.apply_event(ConnectionEvent::ConnAckReceived);
                self.inner.observer.on_connect(self).await;
                if let Some(tx) = handshake_tx.take() {
                    let _ = tx.send(Ok(()));
                }
            }
            SessionEvent::ConnectFailed(error) => {
                self.apply_event(ConnectionEvent::ConnectFailed(error.to_string()));
                if let Some(tx) = handshake_tx.take() {
                    let _ = tx.send(Err(error));
                }
            }
            SessionEvent::ConnectionLost(error) => {
                self.apply_event(ConnectionEvent::LinkLost(error.to_string()));
                self.inner.observer.on_connection_lost(self, &error).await;
            }
            SessionEvent::Reconnecting(attempt) => {
                self.apply_event(ConnectionEvent::ReconnectionStarted(attempt));
                self.inner.observer.on_reconnecting(self, attempt).await;
            }
            SessionEvent::Message { topic, payload } => {
                debug!(topic = %topic, bytes = payload.len(), "Received MQTT message");
                self.deliver(&topic, &payload);
            }
        }
    }

    /// Dispatcher task body. Holds only a weak handle so an abandoned session can drop.
    async fn run_dispatcher(
        session: Weak<SessionInner>,
        mut events: mpsc::UnboundedReceiver<SessionEvent>,
        handshake_tx: oneshot::Sender<Result<(), TransportError>>,
    ) {
        let mut handshake_tx = Some(handshake_tx);
        while let Some(event) = events.recv().await {
            let Some(inner) = session.upgrade() else {
                break;
            };
            MqttSession { inner }.dispatch(event, &mut handshake_tx).await;
        }
    }
}

/// State owned by the event loop supervisor task
struct EventLoopSupervisor {
    client_id: String,
    slot: Arc<Mutex<Option<EventLoop>>>,
    acks: Arc<Mutex<AckTracker>>,
    closing: Arc<AtomicBool>,
    events: mpsc::UnboundedSender<SessionEvent>,
    shutdown_rx: watch::Receiver<bool>,
    auto_reconnect: bool,
    reconnect_config: ReconnectConfig,
}

impl EventLoopSupervisor {
    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    /// Apply a routed event
    fn process_event_route(&self, route: EventRoute, connected: &mut bool) {
        match route {
            EventRoute::ConnectionAcknowledged => {
                *connected = true;
                self.emit(SessionEvent::Connected);
            }
            EventRoute::MessageReceived { topic, payload } => {
                self.emit(SessionEvent::Message { topic, payload });
            }
            EventRoute::PublishSent(packet_id) => lock(&self.acks).bind(AckKind::Publish, packet_id),
            EventRoute::SubscribeSent(packet_id) => {
                lock(&self.acks).bind(AckKind::Subscribe, packet_id)
            }
            EventRoute::UnsubscribeSent(packet_id) => {
                lock(&self.acks).bind(AckKind::Unsubscribe, packet_id)
            }
            EventRoute::PublishAcknowledged { packet_id, result } => {
                lock(&self.acks).resolve(AckKind::Publish, packet_id, result)
            }
            EventRoute::SubscriptionAcknowledged { packet_id, result } => {
                tracing::debug!(target: "mqtt_transport", "Subscription acknowledged: {:?}", result);
                lock(&self.acks).resolve(AckKind::Subscribe, packet_id, result)
            }
            EventRoute::UnsubscribeAcknowledged { packet_id, result } => {
                lock(&self.acks).resolve(AckKind::Unsubscribe, packet_id, result)
            }
            EventRoute::DisconnectSent => {
                debug!("DISCONNECT sent, waiting for the broker to close the link");
            }
            EventRoute::Disconnected => {
                info!("MQTT broker sent DISCONNECT");
            }
            EventRoute::InfrastructureEvent(event_str) => {
                tracing::debug!(target: "mqtt_transport", "MQTT event: {}", event_str);
            }
            EventRoute::OutgoingEvent => {}
        }
    }

    /// Handle events rumqttc buffered before the error it just returned
    ///
    /// rumqttc keeps them for the next connection, but they describe this one:
    /// acks for requests whose waiters are about to fail, or the write of a
    /// request whose flush broke the link.
    fn drain_buffered_events(&self, event_loop: &mut EventLoop, connected: &mut bool) {
        while let Some(event) = event_loop.state.events.pop_front() {
            let route = MessageHandler::route_mqtt_event(&event);
            self.process_event_route(route, connected);
        }
    }

    /// Fail the request the broker refused with the broker's reason
    ///
    /// rumqttc drops a refused packet from its state before reporting the
    /// error, so it is the one awaited packet it will not write again.
    fn resolve_rejection(&self, event_loop: &EventLoop, kind: AckKind, rejection: TransportError) {
        let retransmitted: HashSet<u16> = event_loop
            .pending
            .iter()
            .filter_map(|request| match request {
                Request::Publish(publish) => Some(publish.pkid),
                Request::PubRel(release) => Some(release.pkid),
                _ => None,
            })
            .collect();

        let mut acks = lock(&self.acks);
        let refused: Vec<u16> = acks
            .awaiting(kind)
            .into_iter()
            .filter(|packet_id| kind != AckKind::Publish || !retransmitted.contains(packet_id))
            .collect();

        match refused.as_slice() {
            [packet_id] => {
                warn!(packet_id = *packet_id, "Broker refused {:?} request: {}", kind, rejection);
                acks.resolve(kind, *packet_id, Err(rejection));
            }
            _ => warn!(
                "Broker refused a {:?} request that cannot be told apart from {} others: {}",
                kind,
                refused.len().saturating_sub(1),
                rejection
            ),
        }
    }

    /// Perform interruptible sleep with shutdown monitoring
    /// Returns true if sleep completed, false if shutdown requested
    async fn interruptible_sleep(mut shutdown_rx: watch::Receiver<bool>, delay_ms: u64) -> bool {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    info!("Shutdown signal received during reconnection delay, stopping");
                    return false;
                }
                true
            }
            _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => true,
        }
    }

    async fn run(mut self, mut event_loop: EventLoop) {
        info!(client_id = %self.client_id, "Starting MQTT event loop");

        let mut connected = false;
        let mut ever_connected = false;
        let mut reconnect_attempts = 0u32;

        loop {
            let polled = tokio::select! {
                changed = self.shutdown_rx.changed() => {
                    if changed.is_err() || *self.shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping event loop");
                        break;
                    }
                    continue;
                }
                polled = event_loop.poll() => polled,
            };

            match polled {
                Ok(event) => {
                    let route = MessageHandler::route_mqtt_event(&event);
                    if matches!(route, EventRoute::ConnectionAcknowledged) {
                        ever_connected = true;
                        reconnect_attempts = 0;
                    }
                    let disconnect_sent = matches!(route, EventRoute::DisconnectSent);
                    self.process_event_route(route, &mut connected);

                    if disconnect_sent && self.closing.load(Ordering::SeqCst) {
                        break;
                    }
                }
                Err(e) => {
                    self.drain_buffered_events(&mut event_loop, &mut connected);
                    if let Some((kind, rejection)) = MessageHandler::classify_ack_rejection(&e) {
                        self.resolve_rejection(&event_loop, kind, rejection);
                    }

                    let reason = e.to_string();
                    lock(&self.acks).fail_all(&TransportError::ConnectionLost(reason.clone()));

                    if self.closing.load(Ordering::SeqCst) {
                        debug!("Connection closed after client disconnect: {}", reason);
                        break;
                    }

                    if !ever_connected {
                        // The initial attempt is not retried; hand the event loop back
                        // so a later connect() can try again.
                        error!(client_id = %self.client_id, "MQTT connection failed: {}", reason);
                        *lock(&self.slot) = Some(event_loop);
                        self.emit(SessionEvent::ConnectFailed(TransportError::ConnectionFailed(
                            reason,
                        )));
                        return;
                    }

                    if connected {
                        connected = false;
                        self.emit(SessionEvent::ConnectionLost(TransportError::ConnectionLost(
                            reason,
                        )));
                    } else {
                        debug!("Reconnection attempt {} failed: {}", reconnect_attempts, reason);
                    }

                    let decision = HealthMonitor::should_attempt_reconnection(
                        reconnect_attempts,
                        &self.reconnect_config,
                        self.auto_reconnect,
                        *self.shutdown_rx.borrow(),
                    );

                    match decision {
                        ReconnectionDecision::Proceed { attempt, delay_ms } => {
                            reconnect_attempts = attempt;
                            self.emit(SessionEvent::Reconnecting(attempt));
                            debug!("Attempting reconnection {} after {}ms delay", attempt, delay_ms);

                            if !Self::interruptible_sleep(self.shutdown_rx.clone(), delay_ms).await
                            {
                                break;
                            }
                        }
                        ReconnectionDecision::AbortShutdownRequested => {
                            info!("Shutdown signal received, stopping reconnection");
                            break;
                        }
                        ReconnectionDecision::AbortDisabled => {
                            warn!("Automatic reconnect disabled, stopping event loop");
                            break;
                        }
                    }
                }
            }
        }

        // Close the socket; unacknowledged requests stay queued for the next connect
        event_loop.clean();
        event_loop
            .pending
            .retain(|request| !matches!(request, Request::Disconnect));
        lock(&self.acks).fail_all(&TransportError::ConnectionLost(
            "event loop stopped".to_string(),
        ));

        // Hand the event loop back so the session can be connected again
        *lock(&self.slot) = Some(event_loop);
        if !ever_connected {
            self.emit(SessionEvent::ConnectFailed(TransportError::ConnectionFailed(
                "connection attempt cancelled".to_string(),
            )));
        }

        info!(client_id = %self.client_id, "MQTT event loop stopped");
    }
}

#[async_trait]
impl Session for MqttSession {
    fn build(
        options: SessionOptions,
        observer: Arc<dyn SessionObserver>,
    ) -> Result<Self, TransportError> {
        let mqtt_options = configure_mqtt_options(&options)?;
        let (client, event_loop) = AsyncClient::new(mqtt_options, REQUEST_CAPACITY);
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);

        Ok(MqttSession {
            inner: Arc::new(SessionInner {
                endpoint: options.endpoint,
                client_id: options.client_id,
                client,
                event_loop: Arc::new(Mutex::new(Some(event_loop))),
                observer,
                subscriptions: RwLock::new(HashMap::new()),
                acks: Arc::new(Mutex::new(AckTracker::new())),
                state_tx,
                closing: Arc::new(AtomicBool::new(false)),
                run: Mutex::new(None),
                auto_reconnect: options.auto_reconnect,
                connect_timeout: options.connect_timeout,
                reconnect_config: options.reconnect,
            }),
        })
    }

    async fn connect(&self) -> Result<(), TransportError> {
        let event_loop = lock(&self.inner.event_loop)
            .take()
            .ok_or(TransportError::AlreadyStarted)?;

        self.inner.closing.store(false, Ordering::SeqCst);
        self.apply_event(ConnectionEvent::ConnectStarted);

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (handshake_tx, handshake_rx) = oneshot::channel();

        let supervisor = EventLoopSupervisor {
            client_id: self.inner.client_id.clone(),
            slot: Arc::clone(&self.inner.event_loop),
            acks: Arc::clone(&self.inner.acks),
            closing: Arc::clone(&self.inner.closing),
            events: events_tx,
            shutdown_rx,
            auto_reconnect: self.inner.auto_reconnect,
            reconnect_config: self.inner.reconnect_config.clone(),
        };

        let event_loop_task = tokio::spawn(supervisor.run(event_loop));
        let dispatcher_task = tokio::spawn(Self::run_dispatcher(
            Arc::downgrade(&self.inner),
            events_rx,
            handshake_tx,
        ));

        *lock(&self.inner.run) = Some(SessionRun {
            shutdown_tx,
            event_loop_task,
            dispatcher_task,
        });

        info!(endpoint = %self.inner.endpoint, "Connecting to MQTT broker");

        let outcome = match tokio::time::timeout(self.inner.connect_timeout, handshake_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(TransportError::ConnectionFailed(
                "session stopped before the handshake completed".to_string(),
            )),
            Err(_) => Err(TransportError::Timeout("ConnAck")),
        };

        if outcome.is_err() {
            if let Some(run) = self.take_run() {
                Self::stop_run(run, Duration::ZERO).await;
            }
            self.apply_event(ConnectionEvent::Closed);
        }

        outcome
    }

    async fn disconnect(&self, linger: Duration) -> Result<(), TransportError> {
        let Some(run) = self.take_run() else {
            debug!("Disconnect requested on a session that is not running");
            return Ok(());
        };

        if tokio::time::timeout(linger, self.wait_for_idle_acks())
            .await
            .is_err()
        {
            debug!("Linger period elapsed with acknowledgments still pending");
        }

        self.inner.closing.store(true, Ordering::SeqCst);
        let mut flush = Duration::ZERO;
        if self.is_connected() {
            match self.inner.client.disconnect().await {
                Ok(()) => flush = DISCONNECT_FLUSH,
                Err(e) => warn!("Failed to send DISCONNECT: {}", e),
            }
        }

        Self::stop_run(run, flush).await;

        lock(&self.inner.acks).fail_all(&TransportError::ConnectionLost(
            "client disconnected".to_string(),
        ));
        self.apply_event(ConnectionEvent::Closed);
        info!(client_id = %self.inner.client_id, "MQTT session disconnected");
        Ok(())
    }

    async fn subscribe(
        &self,
        topic: &str,
        qos: QosLevel,
        on_message: MessageCallback,
    ) -> Result<(), TransportError> {
        self.check_connection_state()?;

        // Register first so messages arriving right after the SubAck are delivered
        self.inner
            .subscriptions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(topic.to_string(), on_message);

        let waiter = self.submit(AckKind::Subscribe, |client| {
            client.try_subscribe(topic.to_string(), to_mqtt_qos(qos))
        });

        let result = match waiter {
            Ok(waiter) => Self::await_ack(waiter, "SubAck").await,
            Err(e) => Err(e),
        };

        if result.is_err() {
            self.inner
                .subscriptions
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(topic);
        }
        result
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), TransportError> {
        self.check_connection_state()?;

        let waiter = self.submit(AckKind::Unsubscribe, |client| {
            client.try_unsubscribe(topic.to_string())
        })?;
        Self::await_ack(waiter, "UnsubAck").await?;

        self.inner
            .subscriptions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(topic);
        Ok(())
    }

    async fn publish(
        &self,
        topic: &str,
        qos: QosLevel,
        retain: bool,
        payload: &[u8],
    ) -> Result<(), TransportError> {
        self.check_connection_state()?;

        let waiter = self.submit(AckKind::Publish, |client| {
            client.try_publish(topic.to_string(), to_mqtt_qos(qos), retain, payload.to_vec())
        })?;
        Self::await_ack(waiter, "PubAck").await
    }

    fn connection_state(&self) -> ConnectionState {
        self.inner.state_tx.borrow().clone()
    }
}
