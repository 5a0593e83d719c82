//! Test utilities and recording implementations.
//!
//! This module provides recording implementations of the dispatcher's
//! collaborators for testing without a real application or broker.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;

use crate::bus::MessageSink;
use crate::dispatcher::{EventDispatcher, LocalEventDispatcher};
use crate::envelope::{Envelope, Recipients};

/// Sink that records every envelope it receives.
#[derive(Default)]
pub struct RecordingSink {
    received: Mutex<Vec<Envelope>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn envelopes(&self) -> Vec<Envelope> {
        self.received
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn event_names(&self) -> Vec<String> {
        self.envelopes()
            .into_iter()
            .map(|e| e.event_name)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.received.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait until at least `count` envelopes arrived.
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> bool {
        wait_until(timeout, || self.len() >= count).await
    }
}

impl MessageSink for RecordingSink {
    fn on_message(&self, envelope: Envelope) {
        self.received
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(envelope);
    }
}

/// Local event dispatcher that records delivered events.
#[derive(Default)]
pub struct RecordingLocalDispatcher {
    events: Mutex<Vec<(String, Value)>>,
    global: Mutex<Option<Arc<dyn EventDispatcher>>>,
    fail_on_fire: Mutex<bool>,
}

impl RecordingLocalDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_on_fire(&self, fail: bool) {
        *self.fail_on_fire.lock().unwrap_or_else(|e| e.into_inner()) = fail;
    }

    pub fn events(&self) -> Vec<(String, Value)> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn event_names(&self) -> Vec<String> {
        self.events().into_iter().map(|(name, _)| name).collect()
    }

    pub fn count(&self) -> usize {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// The global dispatcher currently registered, if any.
    pub fn global(&self) -> Option<Arc<dyn EventDispatcher>> {
        self.global.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Wait until at least `count` events were delivered.
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> bool {
        wait_until(timeout, || self.count() >= count).await
    }
}

impl LocalEventDispatcher for RecordingLocalDispatcher {
    fn set_global_event_dispatcher(&self, dispatcher: Arc<dyn EventDispatcher>) {
        *self.global.lock().unwrap_or_else(|e| e.into_inner()) = Some(dispatcher);
    }

    fn clear_global_event_dispatcher(&self) {
        *self.global.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }

    fn fire_local_event(
        &self,
        event_name: &str,
        payload: &Value,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        if *self.fail_on_fire.lock().unwrap_or_else(|e| e.into_inner()) {
            return Err("Recording dispatcher failure".into());
        }
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((event_name.to_string(), payload.clone()));
        Ok(())
    }
}

/// Build a decorated envelope as a remote dispatcher would publish it.
pub fn make_envelope(event_name: &str, payload: Value, sender: &str, recipients: &str) -> Envelope {
    Envelope::new(event_name, payload).decorate(sender, Recipients::parse(recipients))
}

/// Poll `condition` every 10ms until it holds or `timeout` elapses.
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
