//! Broker-side message selectors.
//!
//! A selector narrows what a topic subscriber receives: the event name or
//! one of its descendants, addressed to everyone or to one of the local
//! identity values. Rendered as JMS selector syntax for brokers that
//! evaluate it, and evaluated directly by the in-memory broker.

use std::fmt;

use super::message::TopicMessage;
use crate::envelope::RECIPIENTS_PROPERTY;
use crate::event_name::LEVEL_SEPARATOR;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageSelector {
    event_name: String,
    identities: Vec<String>,
}

impl MessageSelector {
    pub fn new<'a, I>(event_name: &str, identities: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        Self {
            event_name: event_name.to_string(),
            identities: identities.into_iter().map(str::to_string).collect(),
        }
    }

    pub fn event_name(&self) -> &str {
        &self.event_name
    }

    /// Evaluate the selector against a message.
    pub fn matches(&self, message: &TopicMessage) -> bool {
        let type_matches = message.jms_type == self.event_name
            || message
                .jms_type
                .strip_prefix(self.event_name.as_str())
                .is_some_and(|rest| rest.starts_with(LEVEL_SEPARATOR));
        if !type_matches {
            return false;
        }

        match message.property(RECIPIENTS_PROPERTY) {
            None => true,
            Some(recipients) => self
                .identities
                .iter()
                .any(|id| recipients.contains(&format!(",{},", id))),
        }
    }
}

/// Escape character for `LIKE` patterns.
const LIKE_ESCAPE: char = '\\';

fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Escape `LIKE` wildcards so `value` matches literally.
fn like_literal(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '%' | '_') || c == LIKE_ESCAPE {
            escaped.push(LIKE_ESCAPE);
        }
        escaped.push(c);
    }
    escaped
}

fn like(pattern: &str) -> String {
    format!("{} ESCAPE {}", quote(pattern), quote(&LIKE_ESCAPE.to_string()))
}

impl fmt::Display for MessageSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "(JMSType = {} OR JMSType LIKE {}) AND ({} IS NULL",
            quote(&self.event_name),
            like(&format!("{}{}%", like_literal(&self.event_name), LEVEL_SEPARATOR)),
            RECIPIENTS_PROPERTY
        )?;
        for id in &self.identities {
            write!(
                f,
                " OR {} LIKE {}",
                RECIPIENTS_PROPERTY,
                like(&format!("%,{},%", like_literal(id)))
            )?;
        }
        f.write_str(")")
    }
}
