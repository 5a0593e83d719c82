//! Topic message model and envelope mapping.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::bus::{BusError, Result};
use crate::envelope::{
    Envelope, Recipients, MESSAGE_ID_PROPERTY, RECIPIENTS_PROPERTY, SENDER_PROPERTY,
};

/// Message body variants a topic can carry.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageBody {
    /// Serialized object (JSON bytes).
    Object(Vec<u8>),
    /// Plain text.
    Text(String),
    /// Raw bytes. Not understood by the dispatcher.
    Bytes(Vec<u8>),
}

/// A message as published to, and received from, a topic.
#[derive(Debug, Clone, PartialEq)]
pub struct TopicMessage {
    /// Message type; carries the full event name.
    pub jms_type: String,
    /// String properties used for routing and selectors.
    pub properties: HashMap<String, String>,
    pub body: MessageBody,
    pub timestamp: DateTime<Utc>,
}

impl TopicMessage {
    pub fn new(jms_type: impl Into<String>, body: MessageBody) -> Self {
        Self {
            jms_type: jms_type.into(),
            properties: HashMap::new(),
            body,
            timestamp: Utc::now(),
        }
    }

    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    pub fn property(&self, name: &str) -> Option<&str> {
        self.properties.get(name).map(String::as_str)
    }
}

/// Build the topic message for an outgoing envelope.
///
/// The type is the event name; `sender`, `recipients` (as `,id1,id2,`,
/// absent for broadcast) and `messageId` become string properties.
pub fn decorate_message(envelope: &Envelope) -> Result<TopicMessage> {
    let body = serde_json::to_vec(&envelope.payload)?;
    let mut message = TopicMessage::new(envelope.event_name.clone(), MessageBody::Object(body))
        .with_property(MESSAGE_ID_PROPERTY, envelope.id.clone());
    message.timestamp = envelope.created;

    if let Some(sender) = &envelope.sender {
        message = message.with_property(SENDER_PROPERTY, sender.clone());
    }
    if let Some(recipients) = envelope.recipients.to_delimited() {
        message = message.with_property(RECIPIENTS_PROPERTY, recipients);
    }

    Ok(message)
}

/// Rebuild the envelope from a received topic message.
pub fn decode_message(message: &TopicMessage) -> Result<Envelope> {
    let payload = match &message.body {
        MessageBody::Object(bytes) => serde_json::from_slice(bytes)
            .map_err(|e| BusError::Decode(format!("object body: {}", e)))?,
        MessageBody::Text(text) => Value::String(text.clone()),
        MessageBody::Bytes(_) => {
            return Err(BusError::UnsupportedMessage(format!(
                "bytes message for event '{}'",
                message.jms_type
            )))
        }
    };

    Ok(Envelope {
        id: message
            .property(MESSAGE_ID_PROPERTY)
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string()),
        event_name: message.jms_type.clone(),
        payload,
        sender: message.property(SENDER_PROPERTY).map(str::to_string),
        recipients: Recipients::from_header(message.property(RECIPIENTS_PROPERTY)),
        created: message.timestamp,
    })
}
