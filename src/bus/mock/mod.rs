//! Mock transport implementation for testing.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{BusError, MessageSink, Result, SinkSlot, Transport};
use crate::envelope::Envelope;
use crate::publisher::PublisherInfo;

/// Mock transport for testing.
///
/// Records published envelopes and active subscriptions. Inbound traffic is
/// injected with [`MockTransport::deliver`].
#[derive(Default)]
pub struct MockTransport {
    published: RwLock<Vec<Envelope>>,
    subscriptions: RwLock<BTreeSet<String>>,
    fail_on_publish: RwLock<bool>,
    fail_on_subscribe: RwLock<bool>,
    fail_on_connect: RwLock<bool>,
    shutdowns: RwLock<usize>,
    node_id: Option<String>,
    sink: SinkSlot,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_node_id(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = Some(node_id.into());
        self
    }

    pub async fn set_fail_on_publish(&self, fail: bool) {
        *self.fail_on_publish.write().await = fail;
    }

    pub async fn set_fail_on_subscribe(&self, fail: bool) {
        *self.fail_on_subscribe.write().await = fail;
    }

    pub async fn set_fail_on_connect(&self, fail: bool) {
        *self.fail_on_connect.write().await = fail;
    }

    pub async fn published_count(&self) -> usize {
        self.published.read().await.len()
    }

    pub async fn published(&self) -> Vec<Envelope> {
        self.published.read().await.clone()
    }

    pub async fn take_published(&self) -> Vec<Envelope> {
        std::mem::take(&mut *self.published.write().await)
    }

    pub async fn subscriptions(&self) -> Vec<String> {
        self.subscriptions.read().await.iter().cloned().collect()
    }

    pub async fn shutdown_count(&self) -> usize {
        *self.shutdowns.read().await
    }

    /// Identity bound by the dispatcher, if attached.
    pub fn identity(&self) -> Option<Arc<PublisherInfo>> {
        self.sink.identity()
    }

    /// Inject an inbound envelope as if it arrived from the broker.
    /// Returns false if no sink is attached.
    pub fn deliver(&self, envelope: Envelope) -> bool {
        self.sink.deliver(envelope)
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn kind(&self) -> &'static str {
        "mock"
    }

    async fn connect(&self) -> Result<()> {
        if *self.fail_on_connect.read().await {
            return Err(BusError::Connection("Mock connect failure".to_string()));
        }
        Ok(())
    }

    fn node_id(&self) -> Option<String> {
        self.node_id.clone()
    }

    fn attach(&self, sink: Arc<dyn MessageSink>, identity: Arc<PublisherInfo>) {
        self.sink.attach(sink, identity);
    }

    async fn subscribe(&self, event_name: &str) -> Result<bool> {
        if *self.fail_on_subscribe.read().await {
            return Err(BusError::Subscribe("Mock subscribe failure".to_string()));
        }
        Ok(self.subscriptions.write().await.insert(event_name.to_string()))
    }

    async fn unsubscribe(&self, event_name: &str) -> Result<bool> {
        Ok(self.subscriptions.write().await.remove(event_name))
    }

    async fn publish(&self, envelope: Envelope) -> Result<()> {
        if *self.fail_on_publish.read().await {
            return Err(BusError::Publish("Mock publish failure".to_string()));
        }
        self.published.write().await.push(envelope);
        Ok(())
    }

    async fn shutdown(&self) {
        self.subscriptions.write().await.clear();
        *self.shutdowns.write().await += 1;
        self.sink.detach();
    }
}
