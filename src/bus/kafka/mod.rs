//! Kafka transport.
//!
//! Events travel on one topic per top-level segment of the event name
//! (`{topic_prefix}{segment}`), keyed by the full event name, with the JSON
//! envelope as value. Delivery filtering by hierarchy and recipients is left
//! to the dispatcher.
//!
//! The consumer is created on first subscribe and drained by a dedicated
//! polling thread ([`MessagePoller`]).

mod poller;
mod topics;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::consumer::{BaseConsumer, Consumer};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::ClientConfig;
use tracing::{debug, info};
use uuid::Uuid;

use super::{BusError, KafkaConfig, MessageSink, Result, SinkSlot, Transport};
use crate::envelope::Envelope;
use crate::publisher::PublisherInfo;
use crate::registry::{Subscription, SubscriptionRegistry};

pub use poller::{ConsumerState, MessagePoller};
pub use topics::{topic_for, TopicSet};

/// Configuration for Kafka connection.
#[derive(Clone, Debug)]
pub struct KafkaTransportConfig {
    /// Kafka bootstrap servers (comma-separated).
    pub bootstrap_servers: String,
    /// Prefix prepended to every topic name.
    pub topic_prefix: String,
    /// Consumer group ID. `None` uses the dispatcher's endpoint id.
    pub group_id: Option<String>,
    /// Sleep between poll cycles.
    pub polling_interval: Duration,
    /// Where a new consumer group starts reading (`latest` or `earliest`).
    pub auto_offset_reset: String,
    /// SASL username (optional, for authenticated clusters).
    pub sasl_username: Option<String>,
    /// SASL password (optional, for authenticated clusters).
    pub sasl_password: Option<String>,
    /// SASL mechanism (PLAIN, SCRAM-SHA-256, SCRAM-SHA-512).
    pub sasl_mechanism: Option<String>,
    /// Security protocol (PLAINTEXT, SSL, SASL_PLAINTEXT, SASL_SSL).
    pub security_protocol: Option<String>,
    /// SSL CA certificate path (for SSL connections).
    pub ssl_ca_location: Option<String>,
}

impl KafkaTransportConfig {
    pub fn new(bootstrap_servers: impl Into<String>) -> Self {
        Self {
            bootstrap_servers: bootstrap_servers.into(),
            topic_prefix: String::new(),
            group_id: None,
            polling_interval: Duration::from_millis(super::DEFAULT_POLLING_INTERVAL_MS),
            auto_offset_reset: "latest".to_string(),
            sasl_username: None,
            sasl_password: None,
            sasl_mechanism: None,
            security_protocol: None,
            ssl_ca_location: None,
        }
    }

    /// Build from the `messaging.kafka` configuration section.
    pub fn from_config(config: &KafkaConfig) -> Self {
        Self {
            bootstrap_servers: config.bootstrap_servers.clone(),
            topic_prefix: config.topic_prefix.clone(),
            group_id: config.group_id.clone(),
            polling_interval: Duration::from_millis(config.polling_interval_ms),
            auto_offset_reset: "latest".to_string(),
            sasl_username: config.sasl_username.clone(),
            sasl_password: config.sasl_password.clone(),
            sasl_mechanism: config.sasl_mechanism.clone(),
            security_protocol: config.security_protocol.clone(),
            ssl_ca_location: config.ssl_ca_location.clone(),
        }
    }

    /// Add SASL authentication.
    pub fn with_sasl(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
        mechanism: impl Into<String>,
    ) -> Self {
        self.sasl_username = Some(username.into());
        self.sasl_password = Some(password.into());
        self.sasl_mechanism = Some(mechanism.into());
        self.security_protocol = Some("SASL_SSL".to_string());
        self
    }

    /// Set security protocol.
    pub fn with_security_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.security_protocol = Some(protocol.into());
        self
    }

    /// Set SSL CA certificate location.
    pub fn with_ssl_ca(mut self, ca_location: impl Into<String>) -> Self {
        self.ssl_ca_location = Some(ca_location.into());
        self
    }

    /// Set topic prefix.
    pub fn with_topic_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.topic_prefix = prefix.into();
        self
    }

    pub fn with_group_id(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    pub fn with_polling_interval(mut self, interval: Duration) -> Self {
        self.polling_interval = interval;
        self
    }

    pub fn with_auto_offset_reset(mut self, reset: impl Into<String>) -> Self {
        self.auto_offset_reset = reset.into();
        self
    }

    /// Topic an event is published on.
    pub fn topic_for(&self, event_name: &str) -> String {
        topic_for(&self.topic_prefix, event_name)
    }

    /// Build a ClientConfig for producers.
    fn build_producer_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config.set("bootstrap.servers", &self.bootstrap_servers);
        config.set("message.timeout.ms", "5000");
        config.set("acks", "all");

        self.apply_security_config(&mut config);
        config
    }

    /// Build a ClientConfig for consumers.
    fn build_consumer_config(&self, group_id: &str) -> ClientConfig {
        let mut config = ClientConfig::new();
        config.set("bootstrap.servers", &self.bootstrap_servers);
        config.set("group.id", group_id);
        config.set("enable.auto.commit", "false");
        config.set("auto.offset.reset", &self.auto_offset_reset);

        self.apply_security_config(&mut config);
        config
    }

    /// Apply security settings to a ClientConfig.
    fn apply_security_config(&self, config: &mut ClientConfig) {
        if let Some(ref protocol) = self.security_protocol {
            config.set("security.protocol", protocol);
        }

        if let Some(ref mechanism) = self.sasl_mechanism {
            config.set("sasl.mechanism", mechanism);
        }

        if let Some(ref username) = self.sasl_username {
            config.set("sasl.username", username);
        }

        if let Some(ref password) = self.sasl_password {
            config.set("sasl.password", password);
        }

        if let Some(ref ca_location) = self.ssl_ca_location {
            config.set("ssl.ca.location", ca_location);
        }
    }
}

/// Decode a record value into an envelope.
pub fn decode_record(payload: Option<&[u8]>) -> Result<Envelope> {
    let payload = payload.ok_or_else(|| BusError::Decode("record has no value".to_string()))?;
    Envelope::from_json(payload).map_err(|e| BusError::Decode(e.to_string()))
}

/// Resubscribe the consumer to the current topic set, or unsubscribe it
/// when the set is empty.
fn update_subscriptions(state: &mut ConsumerState) -> Result<()> {
    let topics = state.topics.topics();
    if topics.is_empty() {
        state.consumer.unsubscribe();
        debug!("Unsubscribed from all Kafka topics");
        return Ok(());
    }

    let topic_refs: Vec<&str> = topics.iter().map(|s| s.as_str()).collect();
    state
        .consumer
        .subscribe(&topic_refs)
        .map_err(|e| BusError::Subscribe(format!("Failed to subscribe to topics: {}", e)))?;

    info!(topics = ?topics, "Subscribed to Kafka topics");
    Ok(())
}

/// Consumer shared by every subscription of one transport.
struct KafkaConsumer {
    state: Arc<Mutex<ConsumerState>>,
    poller: MessagePoller,
}

/// One event name in the consumer's topic set.
pub struct KafkaSubscription {
    event_name: String,
    state: Arc<Mutex<ConsumerState>>,
}

#[async_trait]
impl Subscription for KafkaSubscription {
    async fn close(self) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.topics.remove(&self.event_name) {
            update_subscriptions(&mut state)?;
        }
        Ok(())
    }
}

/// Kafka transport using rdkafka.
pub struct KafkaTransport {
    config: KafkaTransportConfig,
    producer: FutureProducer,
    consumer: Mutex<Option<Arc<KafkaConsumer>>>,
    registry: SubscriptionRegistry<KafkaSubscription>,
    sink: Arc<SinkSlot>,
}

impl KafkaTransport {
    /// Create the transport and its producer. The consumer is created on
    /// first subscribe, once the dispatcher identity is known.
    pub fn new(config: KafkaTransportConfig) -> Result<Self> {
        let producer: FutureProducer = config
            .build_producer_config()
            .create()
            .map_err(|e| BusError::Connection(format!("Failed to create Kafka producer: {}", e)))?;

        info!(
            bootstrap_servers = %config.bootstrap_servers,
            topic_prefix = %config.topic_prefix,
            "Connected to Kafka"
        );

        Ok(Self {
            config,
            producer,
            consumer: Mutex::new(None),
            registry: SubscriptionRegistry::new(),
            sink: Arc::new(SinkSlot::default()),
        })
    }

    fn group_id(&self) -> String {
        self.config
            .group_id
            .clone()
            .or_else(|| {
                self.sink
                    .identity()
                    .and_then(|identity| identity.endpoint_id().map(String::from))
            })
            .unwrap_or_else(|| Uuid::new_v4().to_string())
    }

    /// Return the consumer, creating it and its poller on first use.
    fn consumer(&self) -> Result<Arc<KafkaConsumer>> {
        let mut slot = self.consumer.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(consumer) = slot.as_ref() {
            return Ok(Arc::clone(consumer));
        }

        let group_id = self.group_id();
        let consumer: BaseConsumer = self
            .config
            .build_consumer_config(&group_id)
            .create()
            .map_err(|e| BusError::Connection(format!("Failed to create Kafka consumer: {}", e)))?;

        let state = Arc::new(Mutex::new(ConsumerState {
            consumer,
            topics: TopicSet::new(self.config.topic_prefix.clone()),
        }));
        let poller = MessagePoller::start(
            Arc::clone(&state),
            Arc::clone(&self.sink),
            self.config.polling_interval,
        )
        .map_err(|e| BusError::Connection(format!("Failed to start message poller: {}", e)))?;

        info!(group_id = %group_id, "Created Kafka consumer");
        let consumer = Arc::new(KafkaConsumer { state, poller });
        *slot = Some(Arc::clone(&consumer));
        Ok(consumer)
    }

    fn create_subscription(&self, event_name: &str) -> Result<KafkaSubscription> {
        let consumer = self.consumer()?;
        {
            let mut state = consumer.state.lock().unwrap_or_else(|e| e.into_inner());
            if state.topics.add(event_name) {
                if let Err(e) = update_subscriptions(&mut state) {
                    state.topics.remove(event_name);
                    return Err(e);
                }
            }
        }
        consumer.poller.wake();

        Ok(KafkaSubscription {
            event_name: event_name.to_string(),
            state: Arc::clone(&consumer.state),
        })
    }

    /// Topics the consumer is subscribed to.
    pub fn topics(&self) -> Vec<String> {
        self.consumer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|consumer| {
                consumer
                    .state
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .topics
                    .topics()
            })
            .unwrap_or_default()
    }

    /// Names with a stored subscription.
    pub fn subscriptions(&self) -> Vec<String> {
        self.registry.names()
    }
}

#[async_trait]
impl Transport for KafkaTransport {
    fn kind(&self) -> &'static str {
        "kafka"
    }

    fn node_id(&self) -> Option<String> {
        Some(self.config.bootstrap_servers.clone())
    }

    fn attach(&self, sink: Arc<dyn MessageSink>, identity: Arc<PublisherInfo>) {
        self.sink.attach(sink, identity);
    }

    async fn subscribe(&self, event_name: &str) -> Result<bool> {
        self.registry
            .subscribe(event_name, || async { self.create_subscription(event_name) })
            .await
    }

    async fn unsubscribe(&self, event_name: &str) -> Result<bool> {
        self.registry.unsubscribe(event_name).await
    }

    #[tracing::instrument(name = "bus.publish", skip_all, fields(event = %envelope.event_name))]
    async fn publish(&self, envelope: Envelope) -> Result<()> {
        let topic = self.config.topic_for(&envelope.event_name);
        let payload = envelope.to_json()?;

        let record = FutureRecord::to(&topic)
            .key(&envelope.event_name)
            .payload(&payload);

        self.producer
            .send(record, Duration::from_secs(5))
            .await
            .map_err(|(e, _)| BusError::Publish(format!("Failed to publish: {}", e)))?;

        debug!(
            topic = %topic,
            key = %envelope.event_name,
            "Published event to Kafka"
        );
        Ok(())
    }

    async fn shutdown(&self) {
        let closed = self.registry.remove_all().await;
        let consumer = self
            .consumer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(consumer) = consumer {
            consumer.poller.terminate();
        }
        self.sink.detach();
        debug!(closed, "Kafka transport shut down");
    }
}

impl Drop for KafkaTransport {
    fn drop(&mut self) {
        if let Some(consumer) = self
            .consumer
            .get_mut()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            consumer.poller.terminate();
        }
    }
}

#[cfg(test)]
mod tests;
