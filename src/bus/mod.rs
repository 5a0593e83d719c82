//! Transport bindings for remote event delivery.
//!
//! This module contains:
//! - `Transport` trait: Publish, subscribe and receive over a messaging backbone
//! - `MessageSink` trait: Inbound delivery target (the dispatcher)
//! - Bus configuration types and the `init_transport` factory
//! - Implementations: AMQP (RabbitMQ), Kafka, JMS-style topics, Channel, Mock

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{info, trace};

use crate::envelope::Envelope;
use crate::publisher::PublisherInfo;

// Implementation modules
#[cfg(feature = "amqp")]
pub mod amqp;
pub mod channel;
pub mod jms;
#[cfg(feature = "kafka")]
pub mod kafka;
pub mod mock;

// Re-exports
#[cfg(feature = "amqp")]
pub use amqp::{AmqpConfig, AmqpTransport};
pub use channel::{ChannelBroker, ChannelTransport};
pub use jms::{InMemoryTopicBroker, JmsTransport};
#[cfg(feature = "kafka")]
pub use kafka::{KafkaTransport, KafkaTransportConfig};
pub use mock::MockTransport;

// ============================================================================
// Traits
// ============================================================================

/// Result type for bus operations.
pub type Result<T> = std::result::Result<T, BusError>;

/// Errors that can occur during bus operations.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Subscribe failed: {0}")]
    Subscribe(String),

    #[error("Declare failed for '{name}': {message}")]
    Declare { name: String, message: String },

    #[error("Failed to decode message: {0}")]
    Decode(String),

    #[error("Unsupported message: {0}")]
    UnsupportedMessage(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Transport is closed")]
    Closed,

    #[error("{0}")]
    ConfigurationRequired(String),
}

/// Inbound delivery target.
///
/// Transports call this from their own consumer task or thread, once per
/// received message, in arrival order.
pub trait MessageSink: Send + Sync {
    fn on_message(&self, envelope: Envelope);
}

/// A messaging backbone binding.
///
/// Implementations:
/// - `AmqpTransport`: RabbitMQ via AMQP, one queue per subscribed event
/// - `KafkaTransport`: Kafka, one topic per top-level event name, polled
/// - `JmsTransport`: Selector-based topics over a `TopicConnectionFactory`
/// - `ChannelTransport`: In-process broadcast channel
/// - `MockTransport`: Recording mock for testing
#[async_trait]
pub trait Transport: Send + Sync {
    /// Short transport name for logging.
    fn kind(&self) -> &'static str;

    /// Establish the connection eagerly. Transports that connect lazily
    /// may treat this as a no-op.
    async fn connect(&self) -> Result<()> {
        Ok(())
    }

    /// Transport-specific node id (exchange name, client id), if any.
    fn node_id(&self) -> Option<String> {
        None
    }

    /// Bind the inbound sink and the local identity used for queue naming
    /// and broker-side selectors. Called once by the dispatcher before any
    /// subscription is made.
    fn attach(&self, sink: Arc<dyn MessageSink>, identity: Arc<PublisherInfo>);

    /// Subscribe to an event name. Returns false if already subscribed.
    async fn subscribe(&self, event_name: &str) -> Result<bool>;

    /// Unsubscribe from an event name. Returns false if not subscribed.
    async fn unsubscribe(&self, event_name: &str) -> Result<bool>;

    /// Publish a decorated envelope.
    async fn publish(&self, envelope: Envelope) -> Result<()>;

    /// Release every subscription and stop background consumers.
    /// Must be idempotent.
    async fn shutdown(&self);
}

/// Sink and identity bound to a transport by the dispatcher.
#[derive(Clone)]
pub struct Attachment {
    pub sink: Arc<dyn MessageSink>,
    pub identity: Arc<PublisherInfo>,
}

/// Shared holder for a transport's attachment.
#[derive(Default)]
pub struct SinkSlot {
    inner: RwLock<Option<Attachment>>,
}

impl SinkSlot {
    pub fn attach(&self, sink: Arc<dyn MessageSink>, identity: Arc<PublisherInfo>) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        *inner = Some(Attachment { sink, identity });
    }

    pub fn detach(&self) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        *inner = None;
    }

    pub fn get(&self) -> Option<Attachment> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn identity(&self) -> Option<Arc<PublisherInfo>> {
        self.get().map(|a| a.identity)
    }

    /// Hand an envelope to the attached sink. Returns false if nothing is
    /// attached (the message is dropped).
    pub fn deliver(&self, envelope: Envelope) -> bool {
        match self.get() {
            Some(attachment) => {
                attachment.sink.on_message(envelope);
                true
            }
            None => {
                trace!(event = %envelope.event_name, "No sink attached, dropping message");
                false
            }
        }
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// Messaging type discriminator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessagingType {
    /// In-process broadcast channel.
    #[default]
    Channel,
    /// AMQP/RabbitMQ messaging.
    Amqp,
    /// Kafka messaging.
    Kafka,
    /// JMS-style topics (needs an explicit connection factory).
    Jms,
}

/// Messaging configuration (discriminated union).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MessagingConfig {
    /// Messaging type discriminator.
    #[serde(rename = "type")]
    pub messaging_type: MessagingType,
    /// AMQP-specific configuration.
    pub amqp: AmqpBusConfig,
    /// Kafka-specific configuration.
    pub kafka: KafkaConfig,
}

/// AMQP-specific configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AmqpBusConfig {
    /// AMQP connection URL.
    pub url: String,
    /// Topic exchange events are published to.
    pub exchange: String,
}

impl Default for AmqpBusConfig {
    fn default() -> Self {
        Self {
            url: "amqp://localhost:5672".to_string(),
            exchange: DEFAULT_EXCHANGE.to_string(),
        }
    }
}

/// Default exchange for event delivery.
pub const DEFAULT_EXCHANGE: &str = "eventwire.events";

/// Kafka-specific configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct KafkaConfig {
    /// Kafka bootstrap servers (comma-separated).
    pub bootstrap_servers: String,
    /// Prefix prepended to every topic name.
    pub topic_prefix: String,
    /// Consumer group ID. Defaults to the dispatcher's endpoint id so every
    /// dispatcher sees every record.
    pub group_id: Option<String>,
    /// Poll interval for the background poller, in milliseconds.
    pub polling_interval_ms: u64,
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

/// Default poll interval for the Kafka poller.
pub const DEFAULT_POLLING_INTERVAL_MS: u64 = 1000;

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            bootstrap_servers: "localhost:9092".to_string(),
            topic_prefix: String::new(),
            group_id: None,
            polling_interval_ms: DEFAULT_POLLING_INTERVAL_MS,
            sasl_username: None,
            sasl_password: None,
            sasl_mechanism: None,
            security_protocol: None,
            ssl_ca_location: None,
        }
    }
}

// ============================================================================
// Factory
// ============================================================================

/// Initialize a transport based on configuration.
///
/// Returns the appropriate Transport implementation based on messaging_type.
/// Requires the corresponding feature to be enabled:
/// - AMQP: `--features amqp`
/// - Kafka: `--features kafka`
///
/// The channel transport joins `broker`; JMS needs a connection factory and
/// must be constructed directly with [`JmsTransport::new`].
pub async fn init_transport(
    config: &MessagingConfig,
    broker: &ChannelBroker,
) -> std::result::Result<Arc<dyn Transport>, Box<dyn std::error::Error + Send + Sync>> {
    match config.messaging_type {
        MessagingType::Channel => {
            let transport = ChannelTransport::new(broker);
            info!(messaging_type = "channel", "Transport initialized");
            Ok(Arc::new(transport))
        }
        MessagingType::Amqp => {
            #[cfg(feature = "amqp")]
            {
                let amqp_config =
                    AmqpConfig::new(&config.amqp.url).with_exchange(&config.amqp.exchange);
                let transport = AmqpTransport::new(amqp_config).await?;
                info!(messaging_type = "amqp", "Transport initialized");
                Ok(Arc::new(transport))
            }

            #[cfg(not(feature = "amqp"))]
            {
                Err("AMQP support requires the 'amqp' feature. Rebuild with --features amqp".into())
            }
        }
        MessagingType::Kafka => {
            #[cfg(feature = "kafka")]
            {
                let kafka_config = KafkaTransportConfig::from_config(&config.kafka);
                let transport = KafkaTransport::new(kafka_config)?;
                info!(messaging_type = "kafka", "Transport initialized");
                Ok(Arc::new(transport))
            }

            #[cfg(not(feature = "kafka"))]
            {
                Err("Kafka support requires the 'kafka' feature. Rebuild with --features kafka".into())
            }
        }
        MessagingType::Jms => Err(BusError::ConfigurationRequired(
            "JMS transport requires a topic connection factory; construct JmsTransport directly"
                .to_string(),
        )
        .into()),
    }
}

#[cfg(test)]
mod tests;
