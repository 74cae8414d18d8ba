use serde::{Deserialize, Serialize};

use crate::event_type::EventType;

/// Namespace used for primary topics unless configured otherwise.
pub const DEFAULT_NAMESPACE: &str = "raw";

/// Prefix shared by every dead-letter topic.
pub const DEAD_LETTER_NAMESPACE: &str = "dlq";

/// The four event streams of the saga.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventDomain {
    Order,
    Inventory,
    Payment,
    Delivery,
}

impl EventDomain {
    pub const ALL: [EventDomain; 4] = [
        EventDomain::Order,
        EventDomain::Inventory,
        EventDomain::Payment,
        EventDomain::Delivery,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventDomain::Order => "order",
            EventDomain::Inventory => "inventory",
            EventDomain::Payment => "payment",
            EventDomain::Delivery => "delivery",
        }
    }
}

impl std::fmt::Display for EventDomain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Topic naming: `{namespace}.{domain}-events` for primary streams and
/// `dlq.{domain}-events` for their dead-letter twins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    namespace: String,
}

impl Topics {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn primary(&self, domain: EventDomain) -> String {
        format!("{}.{}-events", self.namespace, domain)
    }

    pub fn dead_letter(&self, domain: EventDomain) -> String {
        format!("{DEAD_LETTER_NAMESPACE}.{domain}-events")
    }

    /// Topic an event of the given type is published to.
    pub fn for_event(&self, event_type: EventType) -> String {
        self.primary(event_type.domain())
    }

    /// Every primary topic, in saga order.
    pub fn all_primary(&self) -> Vec<String> {
        EventDomain::ALL.iter().map(|d| self.primary(*d)).collect()
    }
}

impl Default for Topics {
    fn default() -> Self {
        Self::new(DEFAULT_NAMESPACE)
    }
}

/// Dead-letter topic paired with a primary topic.
///
/// The namespace segment is replaced with `dlq`; a topic without a
/// namespace gets the prefix prepended.
pub fn dead_letter_topic(topic: &str) -> String {
    let stream = topic.split_once('.').map_or(topic, |(_, rest)| rest);
    format!("{DEAD_LETTER_NAMESPACE}.{stream}")
}
