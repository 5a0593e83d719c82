//! Message envelope shared by every transport.
//!
//! Transports materialize the envelope in their native representation
//! (AMQP headers, JMS string properties, a JSON record for Kafka), but the
//! metadata names are the same everywhere: `sender` and `recipients`.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Metadata name carrying the sender's endpoint id.
pub const SENDER_PROPERTY: &str = "sender";
/// Metadata name carrying the recipient list.
pub const RECIPIENTS_PROPERTY: &str = "recipients";
/// Metadata name carrying the message id (for duplicate suppression).
pub const MESSAGE_ID_PROPERTY: &str = "messageId";

/// Delimiter between recipient ids.
const RECIPIENT_DELIMITER: char = ',';

/// Ordered list of recipient ids. Empty means "all subscribers".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Recipients(Vec<String>);

impl Recipients {
    /// Broadcast to every subscriber.
    pub fn all() -> Self {
        Self(Vec::new())
    }

    /// Parse a comma-delimited recipient list. Blank entries are dropped.
    pub fn parse(list: &str) -> Self {
        Self(
            list.split(RECIPIENT_DELIMITER)
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }

    /// Parse an optional header value; `None` means broadcast.
    pub fn from_header(value: Option<&str>) -> Self {
        value.map(Self::parse).unwrap_or_default()
    }

    pub fn is_broadcast(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// Comma-delimited form (`a,b`), or `None` for broadcast.
    pub fn to_header(&self) -> Option<String> {
        if self.is_broadcast() {
            None
        } else {
            Some(self.0.join(","))
        }
    }

    /// Comma-delimited form wrapped in leading/trailing commas (`,a,b,`), so
    /// a `LIKE '%,id,%'` selector never matches a partial id.
    pub fn to_delimited(&self) -> Option<String> {
        self.to_header().map(|joined| format!(",{},", joined))
    }
}

impl From<&str> for Recipients {
    fn from(list: &str) -> Self {
        Self::parse(list)
    }
}

impl From<Option<&str>> for Recipients {
    fn from(list: Option<&str>) -> Self {
        Self::from_header(list)
    }
}

impl From<String> for Recipients {
    fn from(list: String) -> Self {
        Self::parse(&list)
    }
}

impl From<Vec<String>> for Recipients {
    fn from(list: Vec<String>) -> Self {
        Self(list.into_iter().filter(|r| !r.is_empty()).collect())
    }
}

impl From<&[&str]> for Recipients {
    fn from(list: &[&str]) -> Self {
        Self(
            list.iter()
                .filter(|r| !r.is_empty())
                .map(|r| r.to_string())
                .collect(),
        )
    }
}

impl fmt::Display for Recipients {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_header() {
            Some(list) => f.write_str(&list),
            None => f.write_str("*"),
        }
    }
}

/// A named event in flight between dispatchers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Unique id assigned at publish time.
    pub id: String,
    /// Dot-hierarchical event name.
    pub event_name: String,
    /// Event data.
    pub payload: Value,
    /// Endpoint id of the publishing dispatcher.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    /// Targeted recipients; empty means broadcast.
    #[serde(default, skip_serializing_if = "Recipients::is_broadcast")]
    pub recipients: Recipients,
    /// Publish time.
    pub created: DateTime<Utc>,
}

impl Envelope {
    /// Create a new broadcast envelope with a fresh id.
    pub fn new(event_name: impl Into<String>, payload: Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            event_name: event_name.into(),
            payload,
            sender: None,
            recipients: Recipients::all(),
            created: Utc::now(),
        }
    }

    /// Stamp sender and recipients onto the envelope just before it leaves
    /// the process.
    pub fn decorate(mut self, sender: impl Into<String>, recipients: Recipients) -> Self {
        self.sender = Some(sender.into());
        self.recipients = recipients;
        self
    }

    /// Topic for flat-topic transports.
    pub fn topic(&self) -> &str {
        crate::event_name::topic_name(&self.event_name)
    }

    /// Encode as a JSON record (Kafka value, channel payload).
    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    /// Decode a JSON record.
    pub fn from_json(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_recipients() {
        let recipients = Recipients::parse("node-1, node-2,,");
        assert_eq!(recipients.as_slice(), &["node-1", "node-2"]);
        assert!(!recipients.is_broadcast());
    }

    #[test]
    fn test_empty_recipients_is_broadcast() {
        assert!(Recipients::parse("").is_broadcast());
        assert!(Recipients::from_header(None).is_broadcast());
        assert!(Recipients::from(Vec::<String>::new()).is_broadcast());
    }

    #[test]
    fn test_recipient_rendering() {
        let recipients = Recipients::from(&["id1", "id2"][..]);
        assert_eq!(recipients.to_header().as_deref(), Some("id1,id2"));
        assert_eq!(recipients.to_delimited().as_deref(), Some(",id1,id2,"));
        assert_eq!(Recipients::all().to_delimited(), None);
        assert_eq!(Recipients::all().to_string(), "*");
    }

    #[test]
    fn test_decorate() {
        let envelope = Envelope::new("ORDER.CREATED", json!({"id": 7}))
            .decorate("node-1", Recipients::parse("node-2"));
        assert_eq!(envelope.sender.as_deref(), Some("node-1"));
        assert_eq!(envelope.recipients.as_slice(), &["node-2"]);
        assert_eq!(envelope.topic(), "ORDER");
    }

    #[test]
    fn test_json_record_preserves_fields() {
        let envelope = Envelope::new("PING", json!("hello"))
            .decorate("node-1", Recipients::parse("node-2,node-3"));
        let decoded = Envelope::from_json(&envelope.to_json().unwrap()).unwrap();
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn test_json_record_rejects_garbage() {
        assert!(Envelope::from_json(b"not json").is_err());
    }
}
