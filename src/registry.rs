//! Subscription registry.
//!
//! Maps an event/channel name to the live transport handle that owns the
//! consumer resource. Subscribe and unsubscribe are idempotent. Calls for the
//! same name are serialized by a per-name async lock; calls for different
//! names only share a short synchronous map lock.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, warn};

use crate::bus::Result;

/// A live transport-level subscription.
#[async_trait]
pub trait Subscription: Send + 'static {
    /// Release the underlying consumer resource.
    async fn close(self) -> Result<()>;

    /// True once the connection behind the handle is gone. Only stale
    /// handles are recreated by [`SubscriptionRegistry::reassert`].
    fn is_stale(&self) -> bool {
        true
    }
}

/// Per-name slot. `None` means the name is known but has no live handle
/// (creation in progress, or a failed reassert).
type Slot<S> = Arc<AsyncMutex<Option<S>>>;

/// Concurrent name → subscription map.
pub struct SubscriptionRegistry<S> {
    entries: Mutex<HashMap<String, Slot<S>>>,
}

impl<S> Default for SubscriptionRegistry<S> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<S: Subscription> SubscriptionRegistry<S> {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, Slot<S>>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn slot(&self, name: &str) -> Slot<S> {
        self.entries()
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(None)))
            .clone()
    }

    fn existing(&self, name: &str) -> Option<Slot<S>> {
        self.entries().get(name).cloned()
    }

    fn is_current(&self, name: &str, slot: &Slot<S>) -> bool {
        self.entries()
            .get(name)
            .is_some_and(|current| Arc::ptr_eq(current, slot))
    }

    fn discard_if_current(&self, name: &str, slot: &Slot<S>) {
        let mut entries = self.entries();
        if entries
            .get(name)
            .is_some_and(|current| Arc::ptr_eq(current, slot))
        {
            entries.remove(name);
        }
    }

    /// Create a subscription for `name` unless one is already live.
    ///
    /// Returns `Ok(false)` without calling `create` when the name is already
    /// subscribed. Errors from `create` propagate and leave no entry behind.
    pub async fn subscribe<F, Fut>(&self, name: &str, create: F) -> Result<bool>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<S>>,
    {
        // A slot removed while we waited for its lock is stale; retry on the
        // current one.
        let (slot, mut guard) = loop {
            let slot = self.slot(name);
            let guard = Arc::clone(&slot).lock_owned().await;
            if self.is_current(name, &slot) {
                break (slot, guard);
            }
        };

        if guard.is_some() {
            debug!(name = %name, "Already subscribed");
            return Ok(false);
        }

        debug!(name = %name, "Subscribing");
        match create().await {
            Ok(handle) => {
                *guard = Some(handle);
                Ok(true)
            }
            Err(e) => {
                self.discard_if_current(name, &slot);
                Err(e)
            }
        }
    }

    /// Close and remove the subscription for `name`.
    ///
    /// Returns `Ok(false)` when nothing is subscribed. The entry is removed
    /// even if closing the handle fails; the close error is returned.
    pub async fn unsubscribe(&self, name: &str) -> Result<bool> {
        let Some(slot) = self.existing(name) else {
            return Ok(false);
        };

        let mut guard = slot.lock().await;
        if !self.is_current(name, &slot) {
            return Ok(false);
        }

        let result = match guard.take() {
            Some(handle) => {
                debug!(name = %name, "Unsubscribing");
                handle.close().await.map(|_| true)
            }
            None => Ok(false),
        };
        self.discard_if_current(name, &slot);
        result
    }

    /// Close every subscription, best effort.
    ///
    /// Every entry is attempted and removed; close failures are logged and
    /// do not stop the remaining closes. Returns the number of handles that
    /// were closed successfully.
    pub async fn remove_all(&self) -> usize {
        let drained: Vec<(String, Slot<S>)> = self.entries().drain().collect();
        let mut closed = 0;

        for (name, slot) in drained {
            let handle = slot.lock().await.take();
            if let Some(handle) = handle {
                match handle.close().await {
                    Ok(()) => closed += 1,
                    Err(e) => debug!(name = %name, error = %e, "Error closing subscriber"),
                }
            }
        }

        closed
    }

    /// Recreate every stored subscription, e.g. after a reconnect.
    ///
    /// Stale handles are dropped without closing (their connection is gone);
    /// live ones are kept. Stops at the first failure; the failed name stays
    /// known so a later reassert retries it. Returns the number of
    /// subscriptions restored.
    pub async fn reassert<F, Fut>(&self, mut create: F) -> usize
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<S>>,
    {
        let snapshot: Vec<(String, Slot<S>)> = self
            .entries()
            .iter()
            .map(|(name, slot)| (name.clone(), Arc::clone(slot)))
            .collect();
        let mut restored = 0;

        for (name, slot) in snapshot {
            let mut guard = slot.lock().await;
            if !self.is_current(&name, &slot) || guard.as_ref().is_some_and(|h| !h.is_stale()) {
                continue;
            }
            guard.take();

            match create(name.clone()).await {
                Ok(handle) => {
                    *guard = Some(handle);
                    restored += 1;
                }
                Err(e) => {
                    warn!(name = %name, error = %e, "Failed to reassert subscription");
                    break;
                }
            }
        }

        restored
    }

    /// Returns true if `name` has a live subscription.
    pub async fn contains(&self, name: &str) -> bool {
        match self.existing(name) {
            Some(slot) => slot.lock().await.is_some(),
            None => false,
        }
    }

    /// Names known to the registry.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}

#[cfg(test)]
mod tests;
