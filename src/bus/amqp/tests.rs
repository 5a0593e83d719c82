use super::*;
use serde_json::json;

#[test]
fn test_config_defaults() {
    let config = AmqpConfig::new("amqp://localhost:5672");
    assert_eq!(config.exchange, DEFAULT_EXCHANGE);
    assert_eq!(config.pool_size, 10);

    let config = config.with_exchange("cwf.events").with_pool_size(2);
    assert_eq!(config.exchange, "cwf.events");
    assert_eq!(config.pool_size, 2);
}

#[test]
fn test_queue_naming() {
    assert_eq!(queue_name("ORDER.CREATED", "node-1"), "ORDER.CREATED@node-1");
    assert_eq!(binding_key("ORDER"), "ORDER.#");
}

#[test]
fn test_properties_carry_envelope_metadata() {
    let envelope = Envelope::new("ORDER", json!(1)).decorate("node-1", Recipients::parse("a,b"));
    let properties = envelope_properties(&envelope);

    assert_eq!(header(&properties, SENDER_PROPERTY).as_deref(), Some("node-1"));
    assert_eq!(header(&properties, RECIPIENTS_PROPERTY).as_deref(), Some("a,b"));
    assert_eq!(
        properties.message_id().as_ref().map(|id| id.as_str()),
        Some(envelope.id.as_str())
    );
    assert_eq!(
        properties.content_type().as_ref().map(|ct| ct.as_str()),
        Some(CONTENT_TYPE)
    );
}

#[test]
fn test_broadcast_has_no_recipients_header() {
    let envelope = Envelope::new("ORDER", json!(1)).decorate("node-1", Recipients::all());
    let properties = envelope_properties(&envelope);
    assert_eq!(header(&properties, RECIPIENTS_PROPERTY), None);
}

#[test]
fn test_decode_delivery_restores_envelope() {
    let envelope = Envelope::new("ORDER.CREATED", json!({"id": 7}))
        .decorate("node-1", Recipients::parse("node-2"));
    let properties = envelope_properties(&envelope);
    let body = serde_json::to_vec(&envelope.payload).unwrap();

    let decoded = decode_delivery("ORDER.CREATED", &properties, &body).unwrap();

    assert_eq!(decoded.id, envelope.id);
    assert_eq!(decoded.event_name, "ORDER.CREATED");
    assert_eq!(decoded.payload, json!({"id": 7}));
    assert_eq!(decoded.sender.as_deref(), Some("node-1"));
    assert_eq!(decoded.recipients, Recipients::parse("node-2"));
    assert_eq!(decoded.created.timestamp(), envelope.created.timestamp());
}

#[test]
fn test_decode_delivery_without_properties() {
    let decoded = decode_delivery("PING", &BasicProperties::default(), b"\"hi\"").unwrap();
    assert!(decoded.sender.is_none());
    assert!(decoded.recipients.is_broadcast());
    assert!(!decoded.id.is_empty());
}

#[test]
fn test_decode_delivery_rejects_garbage() {
    let result = decode_delivery("ORDER", &BasicProperties::default(), b"{not json");
    assert!(matches!(result, Err(BusError::Decode(_))));
}
