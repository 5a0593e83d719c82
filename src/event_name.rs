//! Dot-hierarchical event names.
//!
//! Event names form a hierarchy: `ORDER` is the parent of `ORDER.CREATED`.
//! A subscription to a parent receives every descendant, never the reverse.

/// Separator between hierarchy levels.
pub const LEVEL_SEPARATOR: char = '.';

/// Check whether an event received under `received` is covered by a
/// subscription to `subscribed`.
///
/// Matching rules:
/// - Exact match: "ORDER" matches "ORDER"
/// - Hierarchical: "ORDER" matches "ORDER.CREATED" (prefix match with dot separator)
/// - "ORDER.CREATED" does not match "ORDER", and "ORDER" does not match "ORDERS"
pub fn matches(subscribed: &str, received: &str) -> bool {
    if subscribed == received {
        return true;
    }
    received.starts_with(subscribed)
        && received[subscribed.len()..].starts_with(LEVEL_SEPARATOR)
}

/// Returns true if any of the subscribed names covers `received`.
pub fn any_matches<'a, I>(subscribed: I, received: &str) -> bool
where
    I: IntoIterator<Item = &'a str>,
{
    subscribed.into_iter().any(|s| matches(s, received))
}

/// Topic name for transports that only support flat topics: the first
/// dot-delimited segment of the event name.
pub fn topic_name(event_name: &str) -> &str {
    event_name
        .split_once(LEVEL_SEPARATOR)
        .map(|(head, _)| head)
        .unwrap_or(event_name)
}
