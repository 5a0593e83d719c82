//! Inbound message path.
//!
//! Transports hand every received envelope to [`Inbound`], which decides
//! whether the local node wants it and forwards it to local subscribers.
//! It holds no reference back to the dispatcher; ping answers leave through
//! the outbound queue drained by the dispatcher's pump task.

use std::collections::HashSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use tokio::sync::mpsc;
use tracing::{debug, error, trace};

use super::{LocalEventDispatcher, MessageProcessingHooks};
use crate::bus::MessageSink;
use crate::delivered::DeliveredCache;
use crate::envelope::Envelope;
use crate::event_name;
use crate::filter;
use crate::ping;
use crate::publisher::PublisherInfo;

/// Event names the local node listens to, shared between the dispatcher
/// (which updates it) and the inbound path (which reads it).
#[derive(Default)]
pub(crate) struct Routing {
    subscribed: RwLock<HashSet<String>>,
    ping_active: AtomicBool,
    active: AtomicBool,
}

impl Routing {
    pub(crate) fn add(&self, event_name: &str) -> bool {
        self.subscribed
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(event_name.to_string())
    }

    pub(crate) fn remove(&self, event_name: &str) -> bool {
        self.subscribed
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(event_name)
    }

    pub(crate) fn clear(&self) {
        self.subscribed
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    /// Returns true if a local subscription covers `event_name`.
    pub(crate) fn is_subscribed(&self, event_name: &str) -> bool {
        let subscribed = self.subscribed.read().unwrap_or_else(|e| e.into_inner());
        event_name::any_matches(subscribed.iter().map(String::as_str), event_name)
    }

    pub(crate) fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .subscribed
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub(crate) fn set_ping_active(&self, active: bool) {
        self.ping_active.store(active, Ordering::SeqCst);
    }

    pub(crate) fn ping_active(&self) -> bool {
        self.ping_active.load(Ordering::SeqCst)
    }

    pub(crate) fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::SeqCst);
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

/// The dispatcher's [`MessageSink`].
pub(crate) struct Inbound {
    local: Arc<dyn LocalEventDispatcher>,
    hooks: Arc<dyn MessageProcessingHooks>,
    routing: Arc<Routing>,
    info: Arc<PublisherInfo>,
    delivered: DeliveredCache,
    outbound: mpsc::UnboundedSender<Envelope>,
}

impl Inbound {
    pub(crate) fn new(
        local: Arc<dyn LocalEventDispatcher>,
        hooks: Arc<dyn MessageProcessingHooks>,
        routing: Arc<Routing>,
        info: Arc<PublisherInfo>,
        delivered: DeliveredCache,
        outbound: mpsc::UnboundedSender<Envelope>,
    ) -> Self {
        Self {
            local,
            hooks,
            routing,
            info,
            delivered,
            outbound,
        }
    }

    fn process(&self, envelope: Envelope) {
        if !self.delivered.first_delivery(&envelope.id) {
            trace!(event = %envelope.event_name, id = %envelope.id, "Duplicate message dropped");
            return;
        }

        let is_ping = self.routing.ping_active() && ping::is_ping_request(&envelope.event_name);
        let is_local = self.routing.is_subscribed(&envelope.event_name);
        if !is_ping && !is_local {
            trace!(event = %envelope.event_name, "No local subscription, dropping message");
            return;
        }

        if !filter::accepts(&envelope.recipients, self.info.identity_values()) {
            trace!(
                event = %envelope.event_name,
                recipients = %envelope.recipients,
                "Message not addressed to this node"
            );
            return;
        }

        if is_ping {
            self.answer_ping(&envelope);
        }

        if is_local {
            self.deliver_locally(&envelope);
        }
    }

    fn answer_ping(&self, envelope: &Envelope) {
        let routing = &self.routing;
        let Some(response) =
            ping::response_for(envelope, &self.info, &|name| routing.is_subscribed(name))
        else {
            return;
        };

        let sender = self.info.endpoint_id().unwrap_or_default().to_string();
        let recipients = response.recipients.clone();
        let response = response.decorate(sender, recipients);
        debug!(
            event = %response.event_name,
            requestor = %response.recipients,
            "Answering ping"
        );
        if self.outbound.send(response).is_err() {
            debug!("Outbound queue closed, ping answer dropped");
        }
    }

    fn deliver_locally(&self, envelope: &Envelope) {
        let result = catch_unwind(AssertUnwindSafe(|| {
            self.local
                .fire_local_event(&envelope.event_name, &envelope.payload)
        }));

        match result {
            Ok(Ok(())) => {
                trace!(event = %envelope.event_name, "Delivered locally");
            }
            Ok(Err(e)) => {
                error!(event = %envelope.event_name, error = %e, "Local event delivery failed");
            }
            Err(panic) => {
                let panic_msg = if let Some(s) = panic.downcast_ref::<&str>() {
                    s.to_string()
                } else if let Some(s) = panic.downcast_ref::<String>() {
                    s.clone()
                } else {
                    "Unknown panic".to_string()
                };
                error!(event = %envelope.event_name, panic = %panic_msg, "Local event delivery panicked");
            }
        }
    }
}

impl MessageSink for Inbound {
    fn on_message(&self, envelope: Envelope) {
        if !self.routing.is_active() {
            trace!(event = %envelope.event_name, "Dispatcher inactive, dropping message");
            return;
        }

        if !self.hooks.begin_message_processing() {
            trace!(event = %envelope.event_name, "Message processing declined");
            return;
        }

        self.process(envelope);
        self.hooks.end_message_processing();
    }
}
