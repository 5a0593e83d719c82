//! Identity of a node participating in the messaging fabric.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Attribute key for the authenticated user's id.
pub const USER_ID: &str = "userId";
/// Attribute key for the authenticated user's display name.
pub const USER_NAME: &str = "userName";
/// Attribute key for the application name.
pub const APP_NAME: &str = "appName";
/// Attribute key for the process-unique endpoint id.
pub const ENDPOINT_ID: &str = "endpointId";
/// Attribute key for the transport node id.
pub const NODE_ID: &str = "nodeId";

/// Immutable description of a publisher/subscriber node.
///
/// Used both to decorate outgoing messages (the endpoint id becomes the
/// sender) and to filter incoming ones (attribute values are matched against
/// recipient lists).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PublisherInfo {
    attributes: BTreeMap<String, String>,
}

impl PublisherInfo {
    pub fn builder() -> PublisherInfoBuilder {
        PublisherInfoBuilder::default()
    }

    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    pub fn endpoint_id(&self) -> Option<&str> {
        self.get(ENDPOINT_ID)
    }

    pub fn user_id(&self) -> Option<&str> {
        self.get(USER_ID)
    }

    pub fn user_name(&self) -> Option<&str> {
        self.get(USER_NAME)
    }

    pub fn app_name(&self) -> Option<&str> {
        self.get(APP_NAME)
    }

    pub fn node_id(&self) -> Option<&str> {
        self.get(NODE_ID)
    }

    /// Values a recipient list may address this node by.
    ///
    /// Every attribute value except the display name.
    pub fn identity_values(&self) -> impl Iterator<Item = &str> {
        self.attributes
            .iter()
            .filter(|(key, _)| key.as_str() != USER_NAME)
            .map(|(_, value)| value.as_str())
    }
}

/// Builder for [`PublisherInfo`]. Empty values are not recorded.
#[derive(Debug, Default)]
pub struct PublisherInfoBuilder {
    attributes: BTreeMap<String, String>,
}

impl PublisherInfoBuilder {
    pub fn endpoint_id(self, value: impl Into<String>) -> Self {
        self.attribute(ENDPOINT_ID, value)
    }

    pub fn user_id(self, value: impl Into<String>) -> Self {
        self.attribute(USER_ID, value)
    }

    pub fn user_name(self, value: impl Into<String>) -> Self {
        self.attribute(USER_NAME, value)
    }

    /// Commas delimit recipient lists, so they are replaced by spaces.
    pub fn app_name(self, value: impl Into<String>) -> Self {
        let value = value.into().replace(',', " ");
        self.attribute(APP_NAME, value)
    }

    pub fn node_id(self, value: impl Into<String>) -> Self {
        self.attribute(NODE_ID, value)
    }

    /// Transport-specific or custom attribute.
    pub fn attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let value = value.into();
        if !value.is_empty() {
            self.attributes.insert(key.into(), value);
        }
        self
    }

    pub fn build(self) -> PublisherInfo {
        PublisherInfo {
            attributes: self.attributes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> PublisherInfo {
        PublisherInfo::builder()
            .endpoint_id("node-1")
            .user_id("42")
            .user_name("Doe, Jane")
            .app_name("charts,viewer")
            .build()
    }

    #[test]
    fn test_accessors() {
        let info = sample();
        assert_eq!(info.endpoint_id(), Some("node-1"));
        assert_eq!(info.user_id(), Some("42"));
        assert_eq!(info.app_name(), Some("charts viewer"));
        assert_eq!(info.node_id(), None);
    }

    #[test]
    fn test_identity_values_exclude_display_name() {
        let info = sample();
        let values: Vec<&str> = info.identity_values().collect();
        assert!(values.contains(&"node-1"));
        assert!(values.contains(&"42"));
        assert!(!values.contains(&"Doe, Jane"));
    }

    #[test]
    fn test_empty_values_skipped() {
        let info = PublisherInfo::builder().endpoint_id("a").node_id("").build();
        assert_eq!(info.attributes().len(), 1);
    }

    #[test]
    fn test_equality_is_attribute_equality() {
        assert_eq!(sample(), sample());
        let other = PublisherInfo::builder().endpoint_id("node-2").build();
        assert_ne!(sample(), other);
    }
}
