use super::*;
use crate::test_utils::{make_envelope, RecordingSink};
use serde_json::json;
use std::time::Duration;

fn attached(broker: &ChannelBroker) -> (ChannelTransport, Arc<RecordingSink>) {
    let transport = ChannelTransport::new(broker);
    let sink = Arc::new(RecordingSink::new());
    transport.attach(sink.clone(), Arc::new(PublisherInfo::default()));
    (transport, sink)
}

#[tokio::test]
async fn test_channel_publish_no_receivers() {
    let broker = ChannelBroker::new();
    let transport = ChannelTransport::new(&broker);

    // Should not error even with no receivers
    let result = transport.publish(Envelope::new("ORDER", json!(1))).await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_channel_subscribe_and_receive() {
    let broker = ChannelBroker::new();
    let (subscriber, sink) = attached(&broker);
    let publisher = ChannelTransport::new(&broker);

    assert!(subscriber.subscribe("ORDER").await.unwrap());
    publisher
        .publish(make_envelope("ORDER.CREATED", json!({"id": 1}), "node-1", ""))
        .await
        .unwrap();

    assert!(sink.wait_for(1, Duration::from_secs(1)).await);
    assert_eq!(sink.event_names(), vec!["ORDER.CREATED".to_string()]);
}

#[tokio::test]
async fn test_channel_hierarchy_filter() {
    let broker = ChannelBroker::new();
    let (subscriber, sink) = attached(&broker);
    let publisher = ChannelTransport::new(&broker);

    subscriber.subscribe("ORDER.CREATED").await.unwrap();

    publisher.publish(Envelope::new("ORDER", json!(1))).await.unwrap();
    publisher.publish(Envelope::new("ORDERS", json!(2))).await.unwrap();
    publisher
        .publish(Envelope::new("ORDER.CREATED.BULK", json!(3)))
        .await
        .unwrap();

    assert!(sink.wait_for(1, Duration::from_secs(1)).await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(sink.event_names(), vec!["ORDER.CREATED.BULK".to_string()]);
}

#[tokio::test]
async fn test_channel_subscribe_is_idempotent() {
    let broker = ChannelBroker::new();
    let transport = ChannelTransport::new(&broker);

    assert!(transport.subscribe("ORDER").await.unwrap());
    assert!(!transport.subscribe("ORDER").await.unwrap());
    assert_eq!(broker.receiver_count(), 1);

    assert!(transport.unsubscribe("ORDER").await.unwrap());
    assert!(!transport.unsubscribe("ORDER").await.unwrap());
    assert!(transport.subscriptions().is_empty());
}

#[tokio::test]
async fn test_channel_unsubscribe_stops_delivery() {
    let broker = ChannelBroker::new();
    let (subscriber, sink) = attached(&broker);

    subscriber.subscribe("ORDER").await.unwrap();
    subscriber.unsubscribe("ORDER").await.unwrap();
    subscriber.publish(Envelope::new("ORDER", json!(1))).await.unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(sink.is_empty());
}

#[tokio::test]
async fn test_channel_shutdown_releases_everything() {
    let broker = ChannelBroker::new();
    let (transport, sink) = attached(&broker);

    transport.subscribe("ORDER").await.unwrap();
    transport.subscribe("INVENTORY").await.unwrap();
    transport.shutdown().await;
    transport.shutdown().await;

    assert!(transport.subscriptions().is_empty());

    let publisher = ChannelTransport::new(&broker);
    publisher.publish(Envelope::new("ORDER", json!(1))).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(sink.is_empty());
}
