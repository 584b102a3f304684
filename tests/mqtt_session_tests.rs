//! Integration tests for the MQTT session and the controller over it
//!
//! Tests that need no broker run by default. Tests marked `#[ignore]` expect
//! a broker at `localhost:1883` and run with `cargo test -- --ignored`.

use async_trait::async_trait;
use mqttlink::config::ClientConfig;
use mqttlink::transport::mqtt::MqttSession;
use mqttlink::transport::{
    ConnectionState, QosLevel, ReconnectConfig, Session, SessionObserver, SessionOptions,
    TransportError,
};
use mqttlink::{ClientError, PubSubClient};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Default)]
struct CountingObserver {
    connects: AtomicUsize,
    losses: AtomicUsize,
}

#[async_trait]
impl SessionObserver for CountingObserver {
    async fn on_connect(&self, _session: &dyn Session) {
        self.connects.fetch_add(1, Ordering::SeqCst);
    }

    async fn on_connection_lost(&self, _session: &dyn Session, _cause: &TransportError) {
        self.losses.fetch_add(1, Ordering::SeqCst);
    }

    async fn on_reconnecting(&self, _session: &dyn Session, _attempt: u32) {}
}

fn session_options(endpoint: &str, client_id: &str) -> SessionOptions {
    SessionOptions {
        endpoint: endpoint.to_string(),
        client_id: client_id.to_string(),
        username: String::new(),
        password: String::new(),
        auto_reconnect: true,
        keep_alive: Duration::from_secs(30),
        connect_timeout: Duration::from_secs(5),
        reconnect: ReconnectConfig::default(),
    }
}

fn client_config(endpoint: &str, client_id: &str, instance_env: &str) -> ClientConfig {
    ClientConfig::from_toml_str(&format!(
        r#"
[broker]
endpoint = "{endpoint}"
client_id = "{client_id}"
instance_id_env = "{instance_env}"

[topics]
producer = "mqttlink/test/{client_id}"
consumer = "mqttlink/test/{client_id}"
consumer_qos = 1

[connection]
connect_timeout_secs = 5
"#
    ))
    .expect("test config should be valid")
}

#[tokio::test]
async fn test_session_creation_with_tls_endpoint() {
    let observer = Arc::new(CountingObserver::default());
    let session = MqttSession::build(
        session_options("mqtts://localhost:8883", "tls-session"),
        observer,
    )
    .expect("TLS session should build");

    assert!(!session.is_connected());
    assert_eq!(session.endpoint(), "mqtts://localhost:8883");
}

#[tokio::test]
async fn test_client_creation_with_invalid_endpoint_fails() {
    let mut config = client_config("mqtt://localhost:1883", "bad-endpoint", "MQTTLINK_IT_ENV_BAD");
    config.broker.endpoint = "ftp://localhost".to_string();

    let result = PubSubClient::new(config);

    assert!(matches!(
        result,
        Err(ClientError::Transport(TransportError::InvalidBrokerUrl(_)))
    ));
}

#[tokio::test]
async fn test_produce_before_connect_fails() {
    let client = PubSubClient::new(client_config(
        "mqtt://localhost:1883",
        "not-connected",
        "MQTTLINK_IT_ENV_NOT_CONNECTED",
    ))
    .unwrap();

    let result = client.produce(b"early").await;

    assert!(matches!(
        result,
        Err(ClientError::Transport(TransportError::NotConnected {
            state: ConnectionState::Disconnected
        }))
    ));
}

#[tokio::test]
async fn test_connect_to_unreachable_broker_fails() {
    let client = PubSubClient::new(client_config(
        "mqtt://127.0.0.1:1",
        "unreachable",
        "MQTTLINK_IT_ENV_UNREACHABLE",
    ))
    .unwrap();

    let result = client.connect().await;

    assert!(result.is_err(), "Initial connect is not retried");
    assert_eq!(client.connection_state(), ConnectionState::Disconnected);
    assert!(client.close().await.is_ok(), "Closing an unopened session is a no-op");
}

#[tokio::test]
#[ignore = "requires an MQTT broker on localhost:1883"]
async fn test_roundtrip_through_broker() {
    let client = PubSubClient::new(client_config(
        "mqtt://localhost:1883",
        "roundtrip-client",
        "MQTTLINK_IT_ENV_ROUNDTRIP",
    ))
    .unwrap();
    client.connect().await.expect("broker should accept connection");

    let (tx, mut rx) = mpsc::unbounded_channel();
    client
        .subscribe(move |payload: &[u8]| {
            let _ = tx.send(payload.to_vec());
        })
        .await;

    client.produce(b"ping").await.expect("publish should be acknowledged");

    let received = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("message should arrive")
        .expect("channel open");
    assert_eq!(received, b"ping".to_vec());

    client.close().await.expect("close should succeed");
    assert_eq!(client.connection_state(), ConnectionState::Disconnected);
}

#[tokio::test]
#[ignore = "requires an MQTT broker on localhost:1883"]
async fn test_session_reconnects_after_close_and_connect() {
    let observer = Arc::new(CountingObserver::default());
    let session = MqttSession::build(
        session_options("mqtt://localhost:1883", "reconnect-session"),
        observer.clone(),
    )
    .unwrap();

    session.connect().await.expect("first connect");
    session
        .publish("mqttlink/test/qos0", QosLevel::AtMostOnce, false, b"x")
        .await
        .expect("QoS 0 publish resolves on write");
    session.disconnect(Duration::from_millis(100)).await.unwrap();

    session.connect().await.expect("session can be reopened");
    assert_eq!(observer.connects.load(Ordering::SeqCst), 2);
    assert_eq!(observer.losses.load(Ordering::SeqCst), 0);
    session.disconnect(Duration::ZERO).await.unwrap();
}
