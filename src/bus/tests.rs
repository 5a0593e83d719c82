use super::*;
use crate::test_utils::RecordingSink;
use serde_json::json;

#[test]
fn test_messaging_config_default() {
    let config = MessagingConfig::default();
    assert_eq!(config.messaging_type, MessagingType::Channel);
    assert_eq!(config.amqp.url, "amqp://localhost:5672");
    assert_eq!(config.amqp.exchange, DEFAULT_EXCHANGE);
    assert_eq!(config.kafka.polling_interval_ms, DEFAULT_POLLING_INTERVAL_MS);
}

#[test]
fn test_messaging_type_deserializes_lowercase() {
    let config: MessagingConfig = serde_yaml::from_str("type: kafka\nkafka:\n  topic_prefix: cwf.\n")
        .expect("valid yaml");
    assert_eq!(config.messaging_type, MessagingType::Kafka);
    assert_eq!(config.kafka.topic_prefix, "cwf.");
    assert_eq!(config.kafka.bootstrap_servers, "localhost:9092");
}

#[test]
fn test_sink_slot_drops_without_attachment() {
    let slot = SinkSlot::default();
    assert!(!slot.deliver(Envelope::new("PING", json!(null))));
    assert!(slot.identity().is_none());
}

#[test]
fn test_sink_slot_delivers_to_attached_sink() {
    let slot = SinkSlot::default();
    let sink = Arc::new(RecordingSink::default());
    let identity = Arc::new(PublisherInfo::builder().endpoint_id("node-1").build());
    slot.attach(sink.clone(), identity);

    assert!(slot.deliver(Envelope::new("PING", json!(1))));
    assert_eq!(sink.event_names(), vec!["PING".to_string()]);
    assert_eq!(
        slot.identity().and_then(|i| i.endpoint_id().map(String::from)),
        Some("node-1".to_string())
    );

    slot.detach();
    assert!(!slot.deliver(Envelope::new("PING", json!(2))));
}

#[tokio::test]
async fn test_init_transport_channel() {
    let broker = ChannelBroker::new();
    let transport = init_transport(&MessagingConfig::default(), &broker)
        .await
        .expect("channel transport");
    assert_eq!(transport.kind(), "channel");
}

#[tokio::test]
async fn test_init_transport_jms_requires_factory() {
    let config = MessagingConfig {
        messaging_type: MessagingType::Jms,
        ..Default::default()
    };
    let result = init_transport(&config, &ChannelBroker::new()).await;
    assert!(result.is_err());
}
