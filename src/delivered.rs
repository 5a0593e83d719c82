//! Duplicate suppression for inbound messages.
//!
//! A message published to `A.B` reaches every queue bound with `A.#` and
//! `A.B.#`, so a dispatcher subscribed to both sees it twice. Message ids
//! seen within the window are dropped.

use std::time::Duration;

use moka::sync::Cache;

/// Default retention window for delivered message ids.
pub const DEFAULT_DUPLICATE_WINDOW: Duration = Duration::from_secs(30);

/// Upper bound on remembered ids.
const MAX_TRACKED_IDS: u64 = 100_000;

/// Time-windowed set of delivered message ids.
pub struct DeliveredCache {
    seen: Option<Cache<String, ()>>,
}

impl DeliveredCache {
    /// A zero window disables suppression.
    pub fn new(window: Duration) -> Self {
        let seen = (!window.is_zero()).then(|| {
            Cache::builder()
                .max_capacity(MAX_TRACKED_IDS)
                .time_to_live(window)
                .build()
        });
        Self { seen }
    }

    /// Record `id`. Returns false if it was already seen within the window.
    pub fn first_delivery(&self, id: &str) -> bool {
        match &self.seen {
            Some(seen) if !id.is_empty() => seen.entry(id.to_string()).or_insert(()).is_fresh(),
            _ => true,
        }
    }

    pub fn len(&self) -> usize {
        self.seen.as_ref().map_or(0, |seen| {
            seen.run_pending_tasks();
            seen.entry_count() as usize
        })
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for DeliveredCache {
    fn default() -> Self {
        Self::new(DEFAULT_DUPLICATE_WINDOW)
    }
}
