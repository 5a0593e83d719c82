//! In-memory channel-based transport for single-process deployments.
//!
//! Uses a tokio broadcast channel shared through a [`ChannelBroker`].
//! Every transport joined to the same broker sees every published envelope
//! and forwards the ones covered by its subscriptions.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::{MessageSink, Result, SinkSlot, Transport};
use crate::envelope::Envelope;
use crate::event_name;
use crate::publisher::PublisherInfo;
use crate::registry::{Subscription, SubscriptionRegistry};

/// Channel capacity for broadcast.
const CHANNEL_CAPACITY: usize = 1024;

/// Shared in-process message fabric.
#[derive(Clone)]
pub struct ChannelBroker {
    sender: broadcast::Sender<Arc<Envelope>>,
}

impl ChannelBroker {
    pub fn new() -> Self {
        Self::with_capacity(CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Number of transports currently consuming.
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for ChannelBroker {
    fn default() -> Self {
        Self::new()
    }
}

/// Names the consumer task forwards.
type ActiveNames = Arc<RwLock<HashSet<String>>>;

/// Registry handle for one subscribed event name.
pub struct ChannelSubscription {
    name: String,
    active: ActiveNames,
}

impl ChannelSubscription {
    fn open(name: &str, active: &ActiveNames) -> Self {
        active
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.to_string());
        Self {
            name: name.to_string(),
            active: Arc::clone(active),
        }
    }
}

#[async_trait]
impl Subscription for ChannelSubscription {
    async fn close(self) -> Result<()> {
        self.active
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.name);
        Ok(())
    }
}

/// In-process transport over a [`ChannelBroker`].
pub struct ChannelTransport {
    sender: broadcast::Sender<Arc<Envelope>>,
    registry: SubscriptionRegistry<ChannelSubscription>,
    active: ActiveNames,
    sink: Arc<SinkSlot>,
    consumer: Mutex<Option<JoinHandle<()>>>,
}

impl ChannelTransport {
    /// Create a transport joined to `broker`.
    pub fn new(broker: &ChannelBroker) -> Self {
        Self {
            sender: broker.sender.clone(),
            registry: SubscriptionRegistry::new(),
            active: Arc::new(RwLock::new(HashSet::new())),
            sink: Arc::new(SinkSlot::default()),
            consumer: Mutex::new(None),
        }
    }

    /// Start the consumer task if it is not running.
    ///
    /// The receiver is created before returning so nothing published after
    /// the first subscribe completes is missed.
    fn ensure_consuming(&self) {
        let mut consumer = self.consumer.lock().unwrap_or_else(|e| e.into_inner());
        if consumer.is_some() {
            return;
        }

        let mut receiver = self.sender.subscribe();
        let active = Arc::clone(&self.active);
        let sink = Arc::clone(&self.sink);

        *consumer = Some(tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(envelope) => {
                        let wanted = {
                            let names = active.read().unwrap_or_else(|e| e.into_inner());
                            event_name::any_matches(
                                names.iter().map(String::as_str),
                                &envelope.event_name,
                            )
                        };
                        if !wanted {
                            continue;
                        }

                        debug!(event = %envelope.event_name, "Received event via channel");
                        sink.deliver(Envelope::clone(&envelope));
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        error!(skipped = n, "Channel consumer lagged, skipped messages");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!("Channel closed, stopping consumer");
                        break;
                    }
                }
            }
        }));

        info!("Channel consumer started");
    }

    /// Names with a live subscription.
    pub fn subscriptions(&self) -> Vec<String> {
        self.registry.names()
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    fn kind(&self) -> &'static str {
        "channel"
    }

    fn attach(&self, sink: Arc<dyn MessageSink>, identity: Arc<PublisherInfo>) {
        self.sink.attach(sink, identity);
    }

    async fn subscribe(&self, event_name: &str) -> Result<bool> {
        let active = &self.active;
        let created = self
            .registry
            .subscribe(event_name, || async {
                Ok(ChannelSubscription::open(event_name, active))
            })
            .await?;
        if created {
            self.ensure_consuming();
        }
        Ok(created)
    }

    async fn unsubscribe(&self, event_name: &str) -> Result<bool> {
        self.registry.unsubscribe(event_name).await
    }

    #[tracing::instrument(name = "bus.publish", skip_all, fields(event = %envelope.event_name))]
    async fn publish(&self, envelope: Envelope) -> Result<()> {
        let event = envelope.event_name.clone();

        // Send to channel (ignore error if no receivers)
        match self.sender.send(Arc::new(envelope)) {
            Ok(receiver_count) => {
                debug!(event = %event, receivers = receiver_count, "Published event to channel");
            }
            Err(_) => {
                debug!(event = %event, "Published event (no receivers)");
            }
        }

        Ok(())
    }

    async fn shutdown(&self) {
        let closed = self.registry.remove_all().await;
        if let Some(consumer) = self
            .consumer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            consumer.abort();
        }
        self.sink.detach();
        debug!(closed, "Channel transport shut down");
    }
}

#[cfg(test)]
mod tests;
