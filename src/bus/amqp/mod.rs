//! AMQP (RabbitMQ) transport.
//!
//! Events are published to a topic exchange with the event name as routing
//! key. Each subscribed event gets its own queue, bound with `<event>.#` so
//! it receives the event and every descendant. Queue names carry the
//! dispatcher's endpoint id so each dispatcher has its own copy.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backon::{BackoffBuilder, ExponentialBuilder};
use chrono::{DateTime, Utc};
use deadpool_lapin::{Manager, Pool, PoolError};
use futures::StreamExt;
use lapin::{
    options::{
        BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicPublishOptions,
        BasicRejectOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
    },
    types::{AMQPValue, FieldTable},
    BasicProperties, Channel, ExchangeKind,
};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

use super::{BusError, MessageSink, Result, SinkSlot, Transport, DEFAULT_EXCHANGE};
use crate::envelope::{Envelope, Recipients, RECIPIENTS_PROPERTY, SENDER_PROPERTY};
use crate::publisher::PublisherInfo;
use crate::registry::{Subscription, SubscriptionRegistry};

const CONTENT_TYPE: &str = "application/json";

/// Configuration for AMQP connection.
#[derive(Clone, Debug)]
pub struct AmqpConfig {
    /// AMQP connection URL (e.g., amqp://localhost:5672).
    pub url: String,
    /// Topic exchange events are published to.
    pub exchange: String,
    /// Maximum pooled connections.
    pub pool_size: usize,
}

impl AmqpConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            exchange: DEFAULT_EXCHANGE.to_string(),
            pool_size: 10,
        }
    }

    pub fn with_exchange(mut self, exchange: impl Into<String>) -> Self {
        self.exchange = exchange.into();
        self
    }

    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }
}

/// Queue a dispatcher consumes `event_name` from.
pub fn queue_name(event_name: &str, endpoint_id: &str) -> String {
    format!("{}@{}", event_name, endpoint_id)
}

/// Binding that matches the event and all of its descendants.
pub fn binding_key(event_name: &str) -> String {
    format!("{}.#", event_name)
}

/// Message properties for an outgoing envelope: `sender` and `recipients`
/// headers, message id, timestamp and content type.
pub fn envelope_properties(envelope: &Envelope) -> BasicProperties {
    let mut headers = FieldTable::default();
    if let Some(sender) = &envelope.sender {
        headers.insert(
            SENDER_PROPERTY.into(),
            AMQPValue::LongString(sender.clone().into()),
        );
    }
    if let Some(recipients) = envelope.recipients.to_header() {
        headers.insert(
            RECIPIENTS_PROPERTY.into(),
            AMQPValue::LongString(recipients.into()),
        );
    }

    BasicProperties::default()
        .with_content_type(CONTENT_TYPE.into())
        .with_delivery_mode(2) // persistent
        .with_message_id(envelope.id.clone().into())
        .with_timestamp(envelope.created.timestamp().max(0) as u64)
        .with_headers(headers)
}

fn header(properties: &BasicProperties, name: &str) -> Option<String> {
    properties.headers().as_ref().and_then(|headers| {
        headers.inner().get(name).and_then(|value| match value {
            AMQPValue::LongString(s) => std::str::from_utf8(s.as_bytes()).ok().map(String::from),
            AMQPValue::ShortString(s) => Some(s.as_str().to_string()),
            _ => None,
        })
    })
}

/// Rebuild an envelope from a delivery's routing key, properties and body.
pub fn decode_delivery(
    routing_key: &str,
    properties: &BasicProperties,
    data: &[u8],
) -> Result<Envelope> {
    let payload = serde_json::from_slice(data)
        .map_err(|e| BusError::Decode(format!("payload for '{}': {}", routing_key, e)))?;

    let created = properties
        .timestamp()
        .and_then(|ts| DateTime::<Utc>::from_timestamp(ts as i64, 0))
        .unwrap_or_else(Utc::now);

    Ok(Envelope {
        id: properties
            .message_id()
            .as_ref()
            .map(|id| id.as_str().to_string())
            .unwrap_or_else(|| Uuid::new_v4().to_string()),
        event_name: routing_key.to_string(),
        payload,
        sender: header(properties, SENDER_PROPERTY),
        recipients: Recipients::from_header(header(properties, RECIPIENTS_PROPERTY).as_deref()),
        created,
    })
}

/// One queue consumer.
pub struct AmqpSubscription {
    queue: String,
    channel: Channel,
    consumer_tag: String,
    task: JoinHandle<()>,
}

#[async_trait]
impl Subscription for AmqpSubscription {
    async fn close(self) -> Result<()> {
        let cancelled = self
            .channel
            .basic_cancel(&self.consumer_tag, BasicCancelOptions::default())
            .await;
        self.task.abort();
        cancelled.map_err(|e| {
            BusError::Subscribe(format!("Failed to cancel consumer on '{}': {}", self.queue, e))
        })?;

        self.channel
            .close(200, "OK")
            .await
            .map_err(|e| BusError::Connection(format!("Failed to close channel: {}", e)))?;
        debug!(queue = %self.queue, "Consumer closed");
        Ok(())
    }
}

/// AMQP transport using RabbitMQ.
pub struct AmqpTransport {
    pool: Pool,
    config: AmqpConfig,
    declare_lock: AsyncMutex<()>,
    registry: SubscriptionRegistry<AmqpSubscription>,
    sink: Arc<SinkSlot>,
    fallback_endpoint: String,
}

impl AmqpTransport {
    /// Create a new AMQP transport and declare the exchange.
    pub async fn new(config: AmqpConfig) -> Result<Self> {
        let manager = Manager::new(config.url.clone(), Default::default());
        let pool = Pool::builder(manager)
            .max_size(config.pool_size)
            .build()
            .map_err(|e| BusError::Connection(format!("Failed to create pool: {}", e)))?;

        // Verify connection
        let conn = pool
            .get()
            .await
            .map_err(|e| BusError::Connection(format!("Failed to connect: {}", e)))?;

        let channel = conn
            .create_channel()
            .await
            .map_err(|e| BusError::Connection(format!("Failed to create channel: {}", e)))?;

        channel
            .exchange_declare(
                &config.exchange,
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| BusError::Declare {
                name: config.exchange.clone(),
                message: e.to_string(),
            })?;

        info!(
            exchange = %config.exchange,
            url = %config.url,
            "Connected to AMQP"
        );

        Ok(Self {
            pool,
            config,
            declare_lock: AsyncMutex::new(()),
            registry: SubscriptionRegistry::new(),
            sink: Arc::new(SinkSlot::default()),
            fallback_endpoint: Uuid::new_v4().to_string(),
        })
    }

    /// Get a channel from the pool.
    async fn get_channel(&self) -> Result<Channel> {
        let conn = self.pool.get().await.map_err(|e: PoolError| {
            BusError::Connection(format!("Failed to get connection from pool: {}", e))
        })?;

        conn.create_channel()
            .await
            .map_err(|e| BusError::Connection(format!("Failed to create channel: {}", e)))
    }

    fn endpoint_id(&self) -> String {
        self.sink
            .identity()
            .and_then(|identity| identity.endpoint_id().map(String::from))
            .unwrap_or_else(|| self.fallback_endpoint.clone())
    }

    /// Passive declare on a throwaway channel; a missing queue closes the
    /// channel it was checked on.
    async fn queue_exists(&self, queue: &str) -> bool {
        let Ok(channel) = self.get_channel().await else {
            return false;
        };
        let exists = channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    passive: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .is_ok();
        if exists {
            let _ = channel.close(200, "OK").await;
        }
        exists
    }

    /// Make sure the queue for `event_name` exists and is bound.
    ///
    /// Creation happens under a transport-wide lock with a second existence
    /// check, so concurrent subscribers never race on the declaration.
    async fn declare_event_queue(&self, channel: &Channel, event_name: &str) -> Result<String> {
        let queue = queue_name(event_name, &self.endpoint_id());
        let declare_error = |e: lapin::Error| BusError::Declare {
            name: queue.clone(),
            message: e.to_string(),
        };

        if !self.queue_exists(&queue).await {
            let _declaring = self.declare_lock.lock().await;
            if !self.queue_exists(&queue).await {
                channel
                    .queue_declare(
                        &queue,
                        QueueDeclareOptions {
                            durable: true,
                            exclusive: false,
                            auto_delete: true,
                            ..Default::default()
                        },
                        FieldTable::default(),
                    )
                    .await
                    .map_err(declare_error)?;
                debug!(queue = %queue, "Declared event queue");
            }
        }

        let routing_key = binding_key(event_name);
        channel
            .queue_bind(
                &queue,
                &self.config.exchange,
                &routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(declare_error)?;

        info!(
            queue = %queue,
            routing_key = %routing_key,
            "Bound queue to exchange"
        );
        Ok(queue)
    }

    async fn create_subscription(&self, event_name: &str) -> Result<AmqpSubscription> {
        let channel = self.get_channel().await?;
        let queue = self.declare_event_queue(&channel, event_name).await?;
        let consumer_tag = format!("eventwire-{}", Uuid::new_v4());

        let mut consumer = channel
            .basic_consume(
                &queue,
                &consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| BusError::Subscribe(format!("Failed to start consumer: {}", e)))?;

        let sink = Arc::clone(&self.sink);
        let consumer_queue = queue.clone();
        let task = tokio::spawn(async move {
            while let Some(delivery) = consumer.next().await {
                match delivery {
                    Ok(delivery) => Self::process_delivery(delivery, &sink).await,
                    Err(e) => {
                        error!(queue = %consumer_queue, error = %e, "Consumer delivery error");
                        break;
                    }
                }
            }
            debug!(queue = %consumer_queue, "Consumer stream ended");
        });

        Ok(AmqpSubscription {
            queue,
            channel,
            consumer_tag,
            task,
        })
    }

    /// Process a single delivery from the consumer.
    async fn process_delivery(delivery: lapin::message::Delivery, sink: &SinkSlot) {
        let routing_key = delivery.routing_key.as_str().to_string();
        match decode_delivery(&routing_key, &delivery.properties, &delivery.data) {
            Ok(envelope) => {
                let consume_span = tracing::info_span!("bus.consume", routing_key = %routing_key);
                async {
                    sink.deliver(envelope);
                }
                .instrument(consume_span)
                .await;

                if let Err(e) = delivery.ack(BasicAckOptions::default()).await {
                    error!(error = %e, "Failed to ack message");
                }
            }
            Err(e) => {
                warn!(routing_key = %routing_key, error = %e, "Failed to decode delivery");
                // Reject message (don't requeue malformed messages)
                if let Err(e) = delivery
                    .reject(BasicRejectOptions { requeue: false })
                    .await
                {
                    warn!(routing_key = %routing_key, error = %e, "Failed to reject message");
                }
            }
        }
    }

    /// Publish with exponential backoff, taking a fresh channel per attempt.
    async fn send_event(&self, envelope: &Envelope) -> Result<()> {
        const MAX_RETRIES: usize = 5;

        let payload = serde_json::to_vec(&envelope.payload)?;
        let routing_key = envelope.event_name.as_str();

        // Exponential backoff with jitter to prevent thundering herd
        let backoff = ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_secs(5))
            .with_max_times(MAX_RETRIES)
            .with_jitter()
            .build();

        let mut last_error = None;

        for (attempt, delay) in std::iter::once(Duration::ZERO).chain(backoff).enumerate() {
            if attempt > 0 {
                tokio::time::sleep(delay).await;
            }

            let channel = match self.get_channel().await {
                Ok(ch) => ch,
                Err(e) => {
                    error!(
                        attempt = attempt + 1,
                        max_retries = MAX_RETRIES,
                        error = %e,
                        "Failed to get channel, retrying..."
                    );
                    last_error = Some(e);
                    continue;
                }
            };

            let published = match channel
                .basic_publish(
                    &self.config.exchange,
                    routing_key,
                    BasicPublishOptions::default(),
                    &payload,
                    envelope_properties(envelope),
                )
                .await
            {
                Ok(confirm) => confirm.await.map(|_| ()).map_err(|e| {
                    BusError::Publish(format!("Publish confirmation failed: {}", e))
                }),
                Err(e) => Err(BusError::Publish(format!("Failed to publish: {}", e))),
            };
            let _ = channel.close(200, "OK").await;

            match published {
                Ok(()) => {
                    debug!(
                        exchange = %self.config.exchange,
                        routing_key = %routing_key,
                        "Published event"
                    );
                    return Ok(());
                }
                Err(e) => {
                    error!(
                        attempt = attempt + 1,
                        max_retries = MAX_RETRIES,
                        error = %e,
                        "Publish failed, retrying..."
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| BusError::Publish("Max retries exceeded".to_string())))
    }

    /// Names with a live consumer.
    pub fn subscriptions(&self) -> Vec<String> {
        self.registry.names()
    }
}

#[async_trait]
impl Transport for AmqpTransport {
    fn kind(&self) -> &'static str {
        "amqp"
    }

    fn node_id(&self) -> Option<String> {
        Some(self.config.exchange.clone())
    }

    fn attach(&self, sink: Arc<dyn MessageSink>, identity: Arc<PublisherInfo>) {
        self.sink.attach(sink, identity);
    }

    async fn subscribe(&self, event_name: &str) -> Result<bool> {
        self.registry
            .subscribe(event_name, || self.create_subscription(event_name))
            .await
    }

    async fn unsubscribe(&self, event_name: &str) -> Result<bool> {
        self.registry.unsubscribe(event_name).await
    }

    #[tracing::instrument(name = "bus.publish", skip_all, fields(event = %envelope.event_name))]
    async fn publish(&self, envelope: Envelope) -> Result<()> {
        self.send_event(&envelope).await
    }

    async fn shutdown(&self) {
        let closed = self.registry.remove_all().await;
        self.sink.detach();
        debug!(closed, "AMQP transport shut down");
    }
}

#[cfg(test)]
mod tests;
