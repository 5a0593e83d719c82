//! Event names grouped by the topic that carries them.

use std::collections::{BTreeMap, BTreeSet};

use crate::event_name;

/// Topic carrying `event_name`: the prefix plus its first segment.
pub fn topic_for(prefix: &str, event_name: &str) -> String {
    format!("{}{}", prefix, event_name::topic_name(event_name))
}

/// Subscribed event names keyed by topic.
///
/// Several events share a topic (every event under `ORDER` travels on the
/// `ORDER` topic), so the consumer only needs resubscribing when the set of
/// distinct topics changes.
#[derive(Debug, Default, Clone)]
pub struct TopicSet {
    prefix: String,
    topics: BTreeMap<String, BTreeSet<String>>,
}

impl TopicSet {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            topics: BTreeMap::new(),
        }
    }

    pub fn topic_for(&self, event_name: &str) -> String {
        topic_for(&self.prefix, event_name)
    }

    /// Add an event. Returns true if its topic was not present before.
    pub fn add(&mut self, event_name: &str) -> bool {
        let topic = self.topic_for(event_name);
        let events = self.topics.entry(topic).or_default();
        let added_topic = events.is_empty();
        events.insert(event_name.to_string());
        added_topic
    }

    /// Remove an event. Returns true if that emptied its topic.
    pub fn remove(&mut self, event_name: &str) -> bool {
        let topic = self.topic_for(event_name);
        let Some(events) = self.topics.get_mut(&topic) else {
            return false;
        };
        if !events.remove(event_name) {
            return false;
        }
        if events.is_empty() {
            self.topics.remove(&topic);
            return true;
        }
        false
    }

    pub fn contains(&self, event_name: &str) -> bool {
        self.topics
            .get(&self.topic_for(event_name))
            .is_some_and(|events| events.contains(event_name))
    }

    /// Distinct topics, sorted.
    pub fn topics(&self) -> Vec<String> {
        self.topics.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }
}
