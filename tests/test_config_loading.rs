//! Configuration loading and validation tests
//!
//! Tests focus on BEHAVIOR of configuration loading, validation, and error handling.

use mqttlink::config::{BrokerSettings, ClientConfig, ConfigError};
use mqttlink::transport::QosLevel;
use std::io::Write;
use std::path::Path;
use std::time::Duration;
use tempfile::NamedTempFile;

fn write_config(content: &str) -> NamedTempFile {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(temp_file, "{content}").unwrap();
    temp_file
}

#[test]
fn test_config_loads_successfully_from_valid_toml() {
    let temp_file = write_config(
        r#"
[broker]
endpoint = "mqtt://broker.local:1883"
client_id = "edge-gateway"

[topics]
producer = "plant/line1/out"
consumer = "plant/line1/in"
consumer_qos = 2
"#,
    );

    let config = ClientConfig::load_from_file(temp_file.path()).unwrap();

    assert_eq!(config.endpoint(), "mqtt://broker.local:1883");
    assert_eq!(config.client_id(), "edge-gateway");
    assert_eq!(config.producer_topic(), Some("plant/line1/out"));
    assert_eq!(config.consumer_topic(), Some("plant/line1/in"));
    assert_eq!(config.consumer_qos(), QosLevel::ExactlyOnce);
}

#[test]
fn test_config_defaults_for_optional_sections() {
    let temp_file = write_config(
        r#"
[broker]
endpoint = "mqtts://broker.local"
client_id = "edge-gateway"
"#,
    );

    let config = ClientConfig::load_from_file(temp_file.path()).unwrap();
    let connection = config.connection();

    assert_eq!(config.instance_id_env(), "POD_NAME");
    assert_eq!(config.consumer_qos(), QosLevel::AtMostOnce);
    assert_eq!(connection.keep_alive(), Duration::from_secs(60));
    assert_eq!(connection.connect_timeout(), Duration::from_secs(30));
    assert_eq!(connection.disconnect_linger(), Duration::ZERO);
    assert_eq!(connection.reconnect_config().sustained_delay, 250);
}

#[test]
fn test_config_missing_file_fails() {
    let result = ClientConfig::load_from_file(Path::new("/nonexistent/mqttlink.toml"));
    assert!(matches!(result, Err(ConfigError::FileRead(_))));
}

#[test]
fn test_config_malformed_toml_fails() {
    let temp_file = write_config("[broker\nendpoint = ");
    let result = ClientConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::TomlParse(_))));
}

#[test]
fn test_config_missing_broker_section_fails() {
    let temp_file = write_config(
        r#"
[topics]
producer = "out"
"#,
    );
    let result = ClientConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::TomlParse(_))));
}

#[test]
fn test_config_invalid_client_id_fails() {
    let temp_file = write_config(
        r#"
[broker]
endpoint = "mqtt://localhost:1883"
client_id = "has spaces"
"#,
    );
    let result = ClientConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::InvalidClientId(_))));
}

#[test]
fn test_config_endpoint_without_host_fails() {
    let temp_file = write_config(
        r#"
[broker]
endpoint = "mqtt://"
client_id = "client"
"#,
    );
    let result = ClientConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::InvalidEndpoint(_))));
}

#[test]
fn test_config_wildcard_producer_fails() {
    let temp_file = write_config(
        r#"
[broker]
endpoint = "mqtt://localhost:1883"
client_id = "client"

[topics]
producer = "sensors/#"
"#,
    );
    let result = ClientConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::InvalidTopic(_))));
}

#[test]
fn test_config_empty_consumer_fails() {
    let temp_file = write_config(
        r#"
[broker]
endpoint = "mqtt://localhost:1883"
client_id = "client"

[topics]
consumer = ""
"#,
    );
    let result = ClientConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::InvalidTopic(_))));
}

#[test]
fn test_config_zero_sustained_delay_fails() {
    let temp_file = write_config(
        r#"
[broker]
endpoint = "mqtt://localhost:1883"
client_id = "client"

[connection]
reconnect_sustained_ms = 0
"#,
    );
    let result = ClientConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
}

#[test]
fn test_config_roundtrips_through_toml() {
    let temp_file = write_config(
        r#"
[broker]
endpoint = "mqtt://localhost:1883"
client_id = "client"

[topics]
consumer = "a/+/c"
consumer_qos = 1
"#,
    );
    let config = ClientConfig::load_from_file(temp_file.path()).unwrap();

    let rendered = toml::to_string_pretty(&config).unwrap();
    let reparsed = ClientConfig::from_toml_str(&rendered).unwrap();

    assert_eq!(config, reparsed);
}
