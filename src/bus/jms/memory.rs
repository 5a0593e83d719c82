//! In-process topic broker.
//!
//! Implements the topic connection traits without a server: every
//! subscriber gets its own delivery task (its "session"), selectors are
//! evaluated at publish time, and connections can be dropped or refused to
//! exercise reconnect handling.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use super::message::TopicMessage;
use super::selector::MessageSelector;
use super::{TopicConnection, TopicConnectionFactory, TopicListener, TopicSubscriber};
use crate::bus::{BusError, Result};

struct Registration {
    connection_id: u64,
    topic: String,
    selector: Option<MessageSelector>,
    queue: mpsc::UnboundedSender<TopicMessage>,
}

#[derive(Default)]
struct BrokerState {
    registrations: HashMap<u64, Registration>,
    connections: HashMap<u64, Arc<AtomicBool>>,
}

#[derive(Default)]
struct BrokerInner {
    state: Mutex<BrokerState>,
    next_id: AtomicU64,
    refuse_connections: AtomicBool,
}

impl BrokerInner {
    fn state(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn remove_connection(&self, connection_id: u64) {
        let mut state = self.state();
        state.connections.remove(&connection_id);
        state
            .registrations
            .retain(|_, r| r.connection_id != connection_id);
    }
}

/// Shared in-process topic broker. Clones share the same topics.
#[derive(Clone, Default)]
pub struct InMemoryTopicBroker {
    inner: Arc<BrokerInner>,
}

impl InMemoryTopicBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse new connections until reset.
    pub fn set_refuse_connections(&self, refuse: bool) {
        self.inner.refuse_connections.store(refuse, Ordering::SeqCst);
    }

    /// Close every open connection, as a broker restart would.
    pub fn drop_connections(&self) {
        let mut state = self.inner.state();
        for open in state.connections.values() {
            open.store(false, Ordering::SeqCst);
        }
        state.connections.clear();
        state.registrations.clear();
        debug!("In-memory broker dropped all connections");
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.state().registrations.len()
    }

    pub fn connection_count(&self) -> usize {
        self.inner.state().connections.len()
    }
}

#[async_trait]
impl TopicConnectionFactory for InMemoryTopicBroker {
    async fn create_connection(&self) -> Result<Arc<dyn TopicConnection>> {
        if self.inner.refuse_connections.load(Ordering::SeqCst) {
            return Err(BusError::Connection(
                "in-memory broker refused connection".to_string(),
            ));
        }

        let id = self.inner.next_id();
        let open = Arc::new(AtomicBool::new(true));
        self.inner.state().connections.insert(id, Arc::clone(&open));

        Ok(Arc::new(MemoryConnection {
            id,
            client_id: format!("memory-client-{}", id),
            open,
            broker: Arc::clone(&self.inner),
        }))
    }
}

struct MemoryConnection {
    id: u64,
    client_id: String,
    open: Arc<AtomicBool>,
    broker: Arc<BrokerInner>,
}

impl MemoryConnection {
    fn ensure_open(&self) -> Result<()> {
        if self.open.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BusError::Closed)
        }
    }
}

#[async_trait]
impl TopicConnection for MemoryConnection {
    fn client_id(&self) -> String {
        self.client_id.clone()
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn publish(&self, topic: &str, message: TopicMessage) -> Result<()> {
        self.ensure_open()?;

        let state = self.broker.state();
        let mut delivered = 0;
        for registration in state.registrations.values() {
            if registration.topic != topic {
                continue;
            }
            if let Some(selector) = &registration.selector {
                if !selector.matches(&message) {
                    continue;
                }
            }
            if registration.queue.send(message.clone()).is_ok() {
                delivered += 1;
            }
        }

        trace!(topic = %topic, delivered, "Published to in-memory topic");
        Ok(())
    }

    async fn create_subscriber(
        &self,
        topic: &str,
        selector: Option<MessageSelector>,
        listener: Arc<dyn TopicListener>,
    ) -> Result<Box<dyn TopicSubscriber>> {
        self.ensure_open()?;

        let (queue, mut incoming) = mpsc::unbounded_channel::<TopicMessage>();
        tokio::spawn(async move {
            while let Some(message) = incoming.recv().await {
                listener.on_message(message);
            }
        });

        let id = self.broker.next_id();
        self.broker.state().registrations.insert(
            id,
            Registration {
                connection_id: self.id,
                topic: topic.to_string(),
                selector,
                queue,
            },
        );

        Ok(Box::new(MemorySubscriber {
            id,
            open: Arc::clone(&self.open),
            broker: Arc::clone(&self.broker),
        }))
    }

    async fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
        self.broker.remove_connection(self.id);
    }
}

struct MemorySubscriber {
    id: u64,
    open: Arc<AtomicBool>,
    broker: Arc<BrokerInner>,
}

#[async_trait]
impl TopicSubscriber for MemorySubscriber {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<()> {
        self.broker.state().registrations.remove(&self.id);
        Ok(())
    }
}
