//! Global event dispatcher.
//!
//! Bridges a local event dispatcher and a remote messaging transport.
//! Outbound events are decorated with this node's endpoint id and the
//! requested recipients and published. Inbound messages are filtered
//! centrally (duplicates, event hierarchy, recipients) before they reach
//! local subscribers.
//!
//! Lifecycle: `Uninitialized` → `init()` → `Active` → `destroy()` → `Destroyed`.

mod inbound;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, Mutex as AsyncMutex, RwLock as AsyncRwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::bus::{BusError, Transport};
use crate::config::DispatcherConfig;
use crate::delivered::DeliveredCache;
use crate::envelope::{Envelope, Recipients};
use crate::identity::{AnonymousIdentity, IdentityProvider};
use crate::ping::{PingFilter, PingRequest, PING_REQUEST_EVENT};
use crate::publisher::PublisherInfo;

use inbound::{Inbound, Routing};

/// Event announcing that a dispatcher joined the fabric.
pub const CONNECT_EVENT: &str = "CONNECT";
/// Event announcing that a dispatcher left the fabric.
pub const DISCONNECT_EVENT: &str = "DISCONNECT";

/// Errors from dispatcher lifecycle operations.
#[derive(Debug, thiserror::Error)]
pub enum DispatcherError {
    #[error("Invalid dispatcher state: {0:?}")]
    InvalidState(DispatcherState),

    #[error("Transport error: {0}")]
    Transport(#[from] BusError),
}

/// Dispatcher lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
    Uninitialized,
    Active,
    Destroyed,
}

/// Remote event operations exposed to the application.
#[async_trait]
pub trait EventDispatcher: Send + Sync {
    /// Identity of this node.
    fn publisher_info(&self) -> Arc<PublisherInfo>;

    /// Start or stop receiving `event_name` (and its descendants) from
    /// remote publishers. Failures are logged, never returned.
    async fn subscribe_remote_event(&self, event_name: &str, subscribe: bool);

    /// Publish an event to `recipients` (empty for every subscriber).
    /// Failures are logged, never returned.
    async fn fire_remote_event(&self, event_name: &str, payload: Value, recipients: Recipients);

    /// Ask matching dispatchers to report their identity on `response_event`.
    async fn ping(&self, response_event: &str, filters: Vec<PingFilter>, recipients: Recipients);
}

/// The application's in-process event bus.
pub trait LocalEventDispatcher: Send + Sync {
    /// Called once the global dispatcher is active.
    fn set_global_event_dispatcher(&self, dispatcher: Arc<dyn EventDispatcher>);

    /// Called when the global dispatcher is destroyed.
    fn clear_global_event_dispatcher(&self) {}

    /// Deliver a remote event to local subscribers.
    fn fire_local_event(
        &self,
        event_name: &str,
        payload: &Value,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// Setup and teardown around each inbound message.
pub trait MessageProcessingHooks: Send + Sync {
    /// Return false to skip the message.
    fn begin_message_processing(&self) -> bool {
        true
    }

    fn end_message_processing(&self) {}
}

/// Hooks that do nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHooks;

impl MessageProcessingHooks for NoopHooks {}

/// Global event dispatcher over a single transport.
pub struct GlobalEventDispatcher {
    config: DispatcherConfig,
    transport: Arc<dyn Transport>,
    local: Arc<dyn LocalEventDispatcher>,
    identity: Arc<dyn IdentityProvider>,
    hooks: Arc<dyn MessageProcessingHooks>,
    state: Mutex<DispatcherState>,
    /// Held for writing by `init`/`destroy` and for reading by every remote
    /// operation, so none of them straddles a lifecycle transition.
    lifecycle: AsyncRwLock<()>,
    /// Serializes routing and transport updates for one event name.
    name_locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    info: Mutex<Arc<PublisherInfo>>,
    routing: Arc<Routing>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl GlobalEventDispatcher {
    pub fn new(
        config: DispatcherConfig,
        transport: Arc<dyn Transport>,
        local: Arc<dyn LocalEventDispatcher>,
    ) -> Self {
        Self {
            config,
            transport,
            local,
            identity: Arc::new(AnonymousIdentity),
            hooks: Arc::new(NoopHooks),
            state: Mutex::new(DispatcherState::Uninitialized),
            lifecycle: AsyncRwLock::new(()),
            name_locks: Mutex::new(HashMap::new()),
            info: Mutex::new(Arc::new(PublisherInfo::default())),
            routing: Arc::new(Routing::default()),
            pump: Mutex::new(None),
        }
    }

    pub fn with_identity(mut self, identity: Arc<dyn IdentityProvider>) -> Self {
        self.identity = identity;
        self
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn MessageProcessingHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn state(&self) -> DispatcherState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: DispatcherState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }

    fn is_active(&self, operation: &str) -> bool {
        let state = self.state();
        if state == DispatcherState::Active {
            return true;
        }
        warn!(operation = %operation, state = ?state, "Dispatcher not active, ignoring");
        false
    }

    fn endpoint_id(&self) -> String {
        self.publisher_info()
            .endpoint_id()
            .unwrap_or_default()
            .to_string()
    }

    fn name_lock(&self, event_name: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.name_locks.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(locks.entry(event_name.to_string()).or_default())
    }

    /// Names of the remote events this node is subscribed to.
    pub fn subscriptions(&self) -> Vec<String> {
        self.routing.names()
    }

    fn build_publisher_info(&self) -> PublisherInfo {
        let mut builder = PublisherInfo::builder().endpoint_id(Uuid::new_v4().to_string());

        if let Some(user) = self.identity.authenticated_user() {
            builder = builder.user_id(user.id).user_name(user.full_name);
        }
        if let Some(app_name) = &self.config.app_name {
            builder = builder.app_name(app_name.as_str());
        }
        if let Some(node_id) = self.transport.node_id() {
            builder = builder.node_id(node_id);
        }

        builder.build()
    }

    /// Connect the transport and start receiving.
    ///
    /// Fails with [`DispatcherError::InvalidState`] unless the dispatcher is
    /// uninitialized, or with the transport error if connecting fails (the
    /// dispatcher then stays uninitialized).
    pub async fn init(self: &Arc<Self>) -> Result<(), DispatcherError> {
        let _lifecycle = self.lifecycle.write().await;

        let state = self.state();
        if state != DispatcherState::Uninitialized {
            return Err(DispatcherError::InvalidState(state));
        }

        self.transport.connect().await?;

        let info = Arc::new(self.build_publisher_info());
        *self.info.lock().unwrap_or_else(|e| e.into_inner()) = Arc::clone(&info);

        let (outbound, mut queued) = mpsc::unbounded_channel::<Envelope>();
        let transport = Arc::clone(&self.transport);
        let pump = tokio::spawn(async move {
            while let Some(envelope) = queued.recv().await {
                let event = envelope.event_name.clone();
                if let Err(e) = transport.publish(envelope).await {
                    warn!(event = %event, error = %e, "Failed to publish queued event");
                }
            }
        });
        *self.pump.lock().unwrap_or_else(|e| e.into_inner()) = Some(pump);

        let inbound = Inbound::new(
            Arc::clone(&self.local),
            Arc::clone(&self.hooks),
            Arc::clone(&self.routing),
            Arc::clone(&info),
            DeliveredCache::new(self.config.duplicate_window()),
            outbound,
        );
        self.transport.attach(Arc::new(inbound), Arc::clone(&info));

        self.routing.set_active(true);
        self.set_state(DispatcherState::Active);
        self.local
            .set_global_event_dispatcher(Arc::clone(self) as Arc<dyn EventDispatcher>);

        self.start_ping_handling().await;

        info!(
            endpoint_id = %info.endpoint_id().unwrap_or_default(),
            transport = self.transport.kind(),
            "Global event dispatcher initialized"
        );

        if self.config.announce_status {
            self.announce(CONNECT_EVENT).await;
        }

        Ok(())
    }

    /// Stop receiving and release every subscription. Idempotent.
    pub async fn destroy(&self) {
        let _lifecycle = self.lifecycle.write().await;

        match self.state() {
            DispatcherState::Destroyed => return,
            DispatcherState::Uninitialized => {
                self.set_state(DispatcherState::Destroyed);
                return;
            }
            DispatcherState::Active => {}
        }

        if self.config.announce_status {
            self.announce(DISCONNECT_EVENT).await;
        }

        self.stop_ping_handling().await;
        self.routing.set_active(false);
        self.set_state(DispatcherState::Destroyed);

        self.transport.shutdown().await;
        self.routing.clear();

        if let Some(pump) = self.pump.lock().unwrap_or_else(|e| e.into_inner()).take() {
            pump.abort();
        }

        self.local.clear_global_event_dispatcher();
        info!(transport = self.transport.kind(), "Global event dispatcher destroyed");
    }

    async fn start_ping_handling(&self) {
        self.routing.set_ping_active(true);
        if let Err(e) = self.transport.subscribe(PING_REQUEST_EVENT).await {
            warn!(error = %e, "Failed to subscribe to ping requests");
        }
    }

    async fn stop_ping_handling(&self) {
        self.routing.set_ping_active(false);
        if self.routing.is_subscribed(PING_REQUEST_EVENT) {
            return;
        }
        if let Err(e) = self.transport.unsubscribe(PING_REQUEST_EVENT).await {
            debug!(error = %e, "Failed to unsubscribe from ping requests");
        }
    }

    async fn announce(&self, event_name: &str) {
        let info = self.publisher_info();
        match serde_json::to_value(info.as_ref()) {
            Ok(payload) => self.publish(event_name, payload, Recipients::all()).await,
            Err(e) => warn!(event = %event_name, error = %e, "Failed to encode status event"),
        }
    }

    async fn publish(&self, event_name: &str, payload: Value, recipients: Recipients) {
        let envelope = Envelope::new(event_name, payload).decorate(self.endpoint_id(), recipients);
        debug!(
            event = %event_name,
            recipients = %envelope.recipients,
            "Firing remote event"
        );
        if let Err(e) = self.transport.publish(envelope).await {
            error!(event = %event_name, error = %e, "Failed to fire remote event");
        }
    }
}

#[async_trait]
impl EventDispatcher for GlobalEventDispatcher {
    fn publisher_info(&self) -> Arc<PublisherInfo> {
        self.info.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    async fn subscribe_remote_event(&self, event_name: &str, subscribe: bool) {
        let _lifecycle = self.lifecycle.read().await;
        if !self.is_active("subscribe_remote_event") {
            return;
        }

        let name_lock = self.name_lock(event_name);
        let _name = name_lock.lock().await;

        if subscribe {
            let added = self.routing.add(event_name);
            match self.transport.subscribe(event_name).await {
                Ok(true) => debug!(event = %event_name, "Subscribed to remote event"),
                Ok(false) => debug!(event = %event_name, "Already subscribed to remote event"),
                Err(e) => {
                    // An earlier successful subscribe keeps its routing entry
                    if added {
                        self.routing.remove(event_name);
                    }
                    error!(event = %event_name, error = %e, "Failed to subscribe to remote event");
                }
            }
        } else {
            self.routing.remove(event_name);
            if event_name == PING_REQUEST_EVENT && self.routing.ping_active() {
                return;
            }
            match self.transport.unsubscribe(event_name).await {
                Ok(true) => debug!(event = %event_name, "Unsubscribed from remote event"),
                Ok(false) => debug!(event = %event_name, "Was not subscribed to remote event"),
                Err(e) => {
                    error!(event = %event_name, error = %e, "Failed to unsubscribe from remote event")
                }
            }
        }
    }

    async fn fire_remote_event(&self, event_name: &str, payload: Value, recipients: Recipients) {
        let _lifecycle = self.lifecycle.read().await;
        if !self.is_active("fire_remote_event") {
            return;
        }
        self.publish(event_name, payload, recipients).await;
    }

    async fn ping(&self, response_event: &str, filters: Vec<PingFilter>, recipients: Recipients) {
        let _lifecycle = self.lifecycle.read().await;
        if !self.is_active("ping") {
            return;
        }
        let request = PingRequest::new(response_event, filters, self.endpoint_id());
        match serde_json::to_value(&request) {
            Ok(payload) => self.publish(PING_REQUEST_EVENT, payload, recipients).await,
            Err(e) => warn!(error = %e, "Failed to encode ping request"),
        }
    }
}
