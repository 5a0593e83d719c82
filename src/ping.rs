//! Liveness pings.
//!
//! A ping is an ordinary remote event (`PING.REQUEST`) carrying a
//! [`PingRequest`]. Every active dispatcher that receives it and satisfies
//! all of its filters answers with its own [`PublisherInfo`] on the
//! requested response event, addressed to the requesting endpoint only.

use serde::{Deserialize, Serialize};

use crate::envelope::{Envelope, Recipients};
use crate::event_name;
use crate::publisher::PublisherInfo;

/// Event name ping requests are published under.
pub const PING_REQUEST_EVENT: &str = "PING.REQUEST";

/// Restricts which dispatchers answer a ping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PingFilter {
    /// Only dispatchers running this application answer.
    AppName(String),
    /// Only dispatchers subscribed to this event answer.
    SentinelEvent(String),
    /// Only dispatchers with this publisher attribute answer.
    Attribute { key: String, value: String },
}

impl PingFilter {
    /// `is_subscribed` reports whether the local dispatcher would receive
    /// the given event name.
    pub fn matches(&self, info: &PublisherInfo, is_subscribed: &dyn Fn(&str) -> bool) -> bool {
        match self {
            PingFilter::AppName(name) => info
                .app_name()
                .is_some_and(|app| app.eq_ignore_ascii_case(name)),
            PingFilter::SentinelEvent(event) => is_subscribed(event),
            PingFilter::Attribute { key, value } => info.get(key) == Some(value.as_str()),
        }
    }
}

/// Payload of a `PING.REQUEST` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PingRequest {
    /// Event the responders publish their identity under.
    pub response_event: String,
    /// All must match for a dispatcher to answer.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<PingFilter>,
    /// Endpoint id of the requesting dispatcher.
    pub requestor: String,
}

impl PingRequest {
    pub fn new(
        response_event: impl Into<String>,
        filters: Vec<PingFilter>,
        requestor: impl Into<String>,
    ) -> Self {
        Self {
            response_event: response_event.into(),
            filters,
            requestor: requestor.into(),
        }
    }

    pub fn accepts(&self, info: &PublisherInfo, is_subscribed: &dyn Fn(&str) -> bool) -> bool {
        self.filters.iter().all(|f| f.matches(info, is_subscribed))
    }
}

/// Returns true if `event_name` is a ping request.
pub fn is_ping_request(event_name: &str) -> bool {
    event_name::matches(PING_REQUEST_EVENT, event_name)
}

/// Build the answer to a ping, or `None` if this node should stay silent.
///
/// The returned envelope is addressed to the requestor but not yet
/// decorated with a sender.
pub fn response_for(
    envelope: &Envelope,
    info: &PublisherInfo,
    is_subscribed: &dyn Fn(&str) -> bool,
) -> Option<Envelope> {
    let request: PingRequest = match serde_json::from_value(envelope.payload.clone()) {
        Ok(request) => request,
        Err(e) => {
            tracing::debug!(error = %e, "Ignoring malformed ping request");
            return None;
        }
    };

    if request.response_event.is_empty() || !request.accepts(info, is_subscribed) {
        return None;
    }

    let payload = serde_json::to_value(info).ok()?;
    let mut response = Envelope::new(request.response_event, payload);
    response.recipients = Recipients::parse(&request.requestor);
    Some(response)
}
