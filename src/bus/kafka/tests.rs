use super::*;
use serde_json::json;

#[test]
fn test_topic_for_event() {
    let config = KafkaTransportConfig::new("localhost:9092");
    assert_eq!(config.topic_for("ORDER.CREATED"), "ORDER");
}

#[test]
fn test_topic_with_custom_prefix() {
    let config = KafkaTransportConfig::new("localhost:9092").with_topic_prefix("cwf.");
    assert_eq!(config.topic_for("ORDER.CREATED"), "cwf.ORDER");
}

#[test]
fn test_default_config() {
    let config = KafkaTransportConfig::new("localhost:9092");
    assert_eq!(config.bootstrap_servers, "localhost:9092");
    assert!(config.group_id.is_none());
    assert_eq!(config.polling_interval, Duration::from_millis(1000));
    assert_eq!(config.auto_offset_reset, "latest");
}

#[test]
fn test_from_config_section() {
    let section = KafkaConfig {
        bootstrap_servers: "kafka:9092".to_string(),
        topic_prefix: "cwf.".to_string(),
        group_id: Some("monitor".to_string()),
        polling_interval_ms: 250,
        ..Default::default()
    };
    let config = KafkaTransportConfig::from_config(&section);

    assert_eq!(config.bootstrap_servers, "kafka:9092");
    assert_eq!(config.topic_prefix, "cwf.");
    assert_eq!(config.group_id.as_deref(), Some("monitor"));
    assert_eq!(config.polling_interval, Duration::from_millis(250));
}

#[test]
fn test_sasl_config() {
    let config =
        KafkaTransportConfig::new("localhost:9092").with_sasl("user", "pass", "SCRAM-SHA-256");

    assert_eq!(config.sasl_username, Some("user".to_string()));
    assert_eq!(config.sasl_password, Some("pass".to_string()));
    assert_eq!(config.sasl_mechanism, Some("SCRAM-SHA-256".to_string()));
    assert_eq!(config.security_protocol, Some("SASL_SSL".to_string()));

    let client = config.build_producer_config();
    assert_eq!(client.get("sasl.username"), Some("user"));
    assert_eq!(client.get("security.protocol"), Some("SASL_SSL"));
}

#[test]
fn test_consumer_config() {
    let config = KafkaTransportConfig::new("localhost:9092")
        .with_ssl_ca("/etc/ssl/ca.pem")
        .with_auto_offset_reset("earliest");
    let client = config.build_consumer_config("node-1");

    assert_eq!(client.get("group.id"), Some("node-1"));
    assert_eq!(client.get("enable.auto.commit"), Some("false"));
    assert_eq!(client.get("auto.offset.reset"), Some("earliest"));
    assert_eq!(client.get("ssl.ca.location"), Some("/etc/ssl/ca.pem"));
    assert_eq!(client.get("sasl.mechanism"), None);
}

#[test]
fn test_decode_record() {
    let envelope = Envelope::new("ORDER.CREATED", json!({"id": 3}));
    let bytes = envelope.to_json().unwrap();

    let decoded = decode_record(Some(&bytes)).unwrap();
    assert_eq!(decoded, envelope);
}

#[test]
fn test_decode_record_without_value() {
    assert!(matches!(decode_record(None), Err(BusError::Decode(_))));
    assert!(matches!(
        decode_record(Some(b"garbage")),
        Err(BusError::Decode(_))
    ));
}

#[test]
fn test_group_id_defaults_to_endpoint() {
    let transport = KafkaTransport::new(KafkaTransportConfig::new("localhost:9092")).unwrap();
    let sink = Arc::new(crate::test_utils::RecordingSink::new());
    let identity = PublisherInfo::builder().endpoint_id("node-7").build();
    transport.attach(sink, Arc::new(identity));

    assert_eq!(transport.group_id(), "node-7");

    let explicit = KafkaTransport::new(
        KafkaTransportConfig::new("localhost:9092").with_group_id("monitor"),
    )
    .unwrap();
    assert_eq!(explicit.group_id(), "monitor");
}
