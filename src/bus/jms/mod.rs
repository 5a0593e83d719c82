//! Selector-based topic transport.
//!
//! Events are published to the topic named after the first segment of the
//! event name, with the full name as the message type. Each subscription is
//! a topic subscriber with a selector restricting it to the event hierarchy
//! and to messages addressed to this node.
//!
//! The broker is reached through the [`TopicConnectionFactory`] family of
//! traits. [`InMemoryTopicBroker`] implements them in-process.
//!
//! The connection is opened lazily and reopened on demand when it is found
//! closed; every stored subscription is then reasserted on the new
//! connection. There is no background reconnect loop.

mod memory;
mod message;
mod selector;

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use super::{BusError, MessageSink, Result, SinkSlot, Transport};
use crate::envelope::Envelope;
use crate::event_name;
use crate::publisher::PublisherInfo;
use crate::registry::{Subscription, SubscriptionRegistry};

pub use memory::InMemoryTopicBroker;
pub use message::{decode_message, decorate_message, MessageBody, TopicMessage};
pub use selector::MessageSelector;

/// Opens connections to a topic broker.
#[async_trait]
pub trait TopicConnectionFactory: Send + Sync {
    async fn create_connection(&self) -> Result<Arc<dyn TopicConnection>>;
}

/// An open broker connection.
#[async_trait]
pub trait TopicConnection: Send + Sync {
    /// Broker-assigned client id.
    fn client_id(&self) -> String;

    fn is_open(&self) -> bool;

    async fn publish(&self, topic: &str, message: TopicMessage) -> Result<()>;

    /// Start delivering messages on `topic` that satisfy `selector` to
    /// `listener`.
    async fn create_subscriber(
        &self,
        topic: &str,
        selector: Option<MessageSelector>,
        listener: Arc<dyn TopicListener>,
    ) -> Result<Box<dyn TopicSubscriber>>;

    async fn close(&self);
}

/// A live topic subscriber.
#[async_trait]
pub trait TopicSubscriber: Send + Sync {
    /// False once the owning connection closed.
    fn is_open(&self) -> bool;

    async fn close(&self) -> Result<()>;
}

/// Receives messages for a subscriber.
pub trait TopicListener: Send + Sync {
    fn on_message(&self, message: TopicMessage);
}

/// Registry handle wrapping a topic subscriber.
pub struct JmsSubscription(Box<dyn TopicSubscriber>);

#[async_trait]
impl Subscription for JmsSubscription {
    async fn close(self) -> Result<()> {
        self.0.close().await
    }

    fn is_stale(&self) -> bool {
        !self.0.is_open()
    }
}

/// Decodes topic messages and hands them to the dispatcher.
struct SinkListener {
    sink: Arc<SinkSlot>,
}

impl TopicListener for SinkListener {
    fn on_message(&self, message: TopicMessage) {
        match decode_message(&message) {
            Ok(envelope) => {
                self.sink.deliver(envelope);
            }
            Err(BusError::UnsupportedMessage(reason)) => {
                warn!(event = %message.jms_type, reason = %reason, "Ignoring unsupported message type");
            }
            Err(e) => {
                warn!(event = %message.jms_type, error = %e, "Failed to decode topic message");
            }
        }
    }
}

/// Topic transport over a [`TopicConnectionFactory`].
pub struct JmsTransport {
    factory: Arc<dyn TopicConnectionFactory>,
    connection: AsyncMutex<Option<Arc<dyn TopicConnection>>>,
    client_id: RwLock<Option<String>>,
    registry: SubscriptionRegistry<JmsSubscription>,
    sink: Arc<SinkSlot>,
}

impl JmsTransport {
    pub fn new(factory: Arc<dyn TopicConnectionFactory>) -> Self {
        Self {
            factory,
            connection: AsyncMutex::new(None),
            client_id: RwLock::new(None),
            registry: SubscriptionRegistry::new(),
            sink: Arc::new(SinkSlot::default()),
        }
    }

    /// Return the open connection, (re)connecting if needed.
    ///
    /// After a new connection is made every stored subscription is
    /// reasserted on it.
    async fn connection(&self) -> Result<Arc<dyn TopicConnection>> {
        let connection = {
            let mut current = self.connection.lock().await;
            if let Some(connection) = current.as_ref().filter(|c| c.is_open()) {
                return Ok(Arc::clone(connection));
            }

            let connection = self.factory.create_connection().await?;
            let client_id = connection.client_id();
            info!(client_id = %client_id, "Connected to topic broker");
            *self.client_id.write().unwrap_or_else(|e| e.into_inner()) = Some(client_id);
            *current = Some(Arc::clone(&connection));
            connection
        };

        if !self.registry.is_empty() {
            self.assert_subscriptions(&connection).await;
        }
        Ok(connection)
    }

    /// Recreate every stored subscription on `connection`.
    async fn assert_subscriptions(&self, connection: &Arc<dyn TopicConnection>) -> usize {
        let restored = self
            .registry
            .reassert(|name| self.create_subscriber(Arc::clone(connection), name))
            .await;
        debug!(restored, "Reasserted topic subscriptions");
        restored
    }

    async fn create_subscriber(
        &self,
        connection: Arc<dyn TopicConnection>,
        event_name: String,
    ) -> Result<JmsSubscription> {
        let identity = self.sink.identity().unwrap_or_default();
        let selector = MessageSelector::new(&event_name, identity.identity_values());
        let topic = event_name::topic_name(&event_name);
        debug!(topic = %topic, selector = %selector, "Creating topic subscriber");

        let listener = Arc::new(SinkListener {
            sink: Arc::clone(&self.sink),
        });
        let subscriber = connection
            .create_subscriber(topic, Some(selector), listener)
            .await?;
        Ok(JmsSubscription(subscriber))
    }

    /// Names with a stored subscription.
    pub fn subscriptions(&self) -> Vec<String> {
        self.registry.names()
    }
}

#[async_trait]
impl Transport for JmsTransport {
    fn kind(&self) -> &'static str {
        "jms"
    }

    /// Try to connect so the client id is known. A failure is logged and
    /// retried on first use.
    async fn connect(&self) -> Result<()> {
        if let Err(e) = self.connection().await {
            warn!(error = %e, "Topic broker unavailable, will connect on first use");
        }
        Ok(())
    }

    fn node_id(&self) -> Option<String> {
        self.client_id
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn attach(&self, sink: Arc<dyn MessageSink>, identity: Arc<PublisherInfo>) {
        self.sink.attach(sink, identity);
    }

    async fn subscribe(&self, event_name: &str) -> Result<bool> {
        // A stored subscriber is reasserted on reconnect, even while the
        // broker is unreachable.
        if self.registry.contains(event_name).await {
            return Ok(false);
        }
        let connection = self.connection().await?;
        self.registry
            .subscribe(event_name, || {
                self.create_subscriber(connection, event_name.to_string())
            })
            .await
    }

    async fn unsubscribe(&self, event_name: &str) -> Result<bool> {
        self.registry.unsubscribe(event_name).await
    }

    #[tracing::instrument(name = "bus.publish", skip_all, fields(event = %envelope.event_name))]
    async fn publish(&self, envelope: Envelope) -> Result<()> {
        let connection = self.connection().await?;
        let message = decorate_message(&envelope)?;
        connection
            .publish(event_name::topic_name(&envelope.event_name), message)
            .await?;
        debug!(event = %envelope.event_name, "Published event to topic");
        Ok(())
    }

    async fn shutdown(&self) {
        let closed = self.registry.remove_all().await;
        if let Some(connection) = self.connection.lock().await.take() {
            connection.close().await;
        }
        self.sink.detach();
        debug!(closed, "Topic transport shut down");
    }
}
