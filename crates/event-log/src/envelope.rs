use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use uuid::Uuid;

use crate::{EnvelopeError, EventLogError, EventType, OrderId, Result};

/// Schema version stamped on envelopes that do not set one.
pub const DEFAULT_SCHEMA_VERSION: u32 = 1;

/// Unique identifier for an event, generated by its producer.
///
/// The payment service uses it as the idempotency key of the charge
/// triggered by the event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Uuid);

impl EventId {
    /// Creates a new random event ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates an event ID from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for EventId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

fn default_schema_version() -> u32 {
    DEFAULT_SCHEMA_VERSION
}

/// The message every producer and consumer exchanges.
///
/// Serialized as a single camelCase JSON object. `orderId` doubles as the
/// partition key; `correlationId` identifies the saga the event belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    #[serde(default)]
    pub event_id: EventId,

    /// `domain.action` name, see [`EventType`].
    pub event_type: String,

    #[serde(default = "default_schema_version")]
    pub schema_version: u32,

    #[serde(default = "Utc::now")]
    pub occurred_at: DateTime<Utc>,

    #[serde(default = "Utc::now")]
    pub produced_at: DateTime<Utc>,

    pub order_id: OrderId,

    #[serde(default)]
    pub correlation_id: Option<String>,

    #[serde(default)]
    pub producer: String,

    #[serde(default)]
    pub payload: serde_json::Value,
}

impl EventEnvelope {
    /// Creates a new event envelope builder.
    pub fn builder() -> EventEnvelopeBuilder {
        EventEnvelopeBuilder::default()
    }

    /// The known event type, or `None` for types this build does not understand.
    pub fn kind(&self) -> Option<EventType> {
        EventType::parse(&self.event_type)
    }

    /// Saga correlation id, falling back to the order id when the
    /// producer did not propagate one.
    pub fn correlation_id(&self) -> &str {
        self.correlation_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .unwrap_or(self.order_id.as_str())
    }

    /// Deserializes the payload into its typed schema.
    pub fn payload_as<T: DeserializeOwned>(&self) -> std::result::Result<T, serde_json::Error> {
        T::deserialize(&self.payload)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parses a wire record, rejecting envelopes with blank mandatory fields.
    pub fn from_json(raw: &str) -> Result<Self> {
        let envelope: EventEnvelope = serde_json::from_str(raw)?;
        if envelope.event_type.trim().is_empty() {
            return Err(EventLogError::Envelope(EnvelopeError::MissingField(
                "eventType",
            )));
        }
        if envelope.order_id.as_str().trim().is_empty() {
            return Err(EventLogError::Envelope(EnvelopeError::MissingField(
                "orderId",
            )));
        }
        Ok(envelope)
    }
}

/// Builder for constructing event envelopes.
#[derive(Debug, Default)]
pub struct EventEnvelopeBuilder {
    event_id: Option<EventId>,
    event_type: Option<String>,
    schema_version: Option<u32>,
    occurred_at: Option<DateTime<Utc>>,
    produced_at: Option<DateTime<Utc>>,
    order_id: Option<OrderId>,
    correlation_id: Option<String>,
    producer: Option<String>,
    payload: Option<serde_json::Value>,
}

impl EventEnvelopeBuilder {
    /// Sets the event ID. If not set, a new ID will be generated.
    pub fn event_id(mut self, id: EventId) -> Self {
        self.event_id = Some(id);
        self
    }

    pub fn event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    pub fn schema_version(mut self, version: u32) -> Self {
        self.schema_version = Some(version);
        self
    }

    /// Sets the business time of the event. Defaults to now.
    pub fn occurred_at(mut self, at: DateTime<Utc>) -> Self {
        self.occurred_at = Some(at);
        self
    }

    /// Sets the publication time. Defaults to now.
    pub fn produced_at(mut self, at: DateTime<Utc>) -> Self {
        self.produced_at = Some(at);
        self
    }

    pub fn order_id(mut self, order_id: impl Into<OrderId>) -> Self {
        self.order_id = Some(order_id.into());
        self
    }

    pub fn correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn producer(mut self, producer: impl Into<String>) -> Self {
        self.producer = Some(producer.into());
        self
    }

    /// Sets the payload from a serializable value.
    pub fn payload<T: Serialize>(mut self, payload: &T) -> std::result::Result<Self, serde_json::Error> {
        self.payload = Some(serde_json::to_value(payload)?);
        Ok(self)
    }

    /// Sets the payload from a raw JSON value.
    pub fn payload_raw(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Builds the envelope.
    ///
    /// Fails when `event_type` or `order_id` is missing or blank.
    pub fn build(self) -> std::result::Result<EventEnvelope, EnvelopeError> {
        let event_type = self
            .event_type
            .filter(|t| !t.trim().is_empty())
            .ok_or(EnvelopeError::MissingField("eventType"))?;
        let order_id = self
            .order_id
            .filter(|id| !id.as_str().trim().is_empty())
            .ok_or(EnvelopeError::MissingField("orderId"))?;

        let now = Utc::now();
        Ok(EventEnvelope {
            event_id: self.event_id.unwrap_or_default(),
            event_type,
            schema_version: self.schema_version.unwrap_or(DEFAULT_SCHEMA_VERSION),
            occurred_at: self.occurred_at.unwrap_or(now),
            produced_at: self.produced_at.unwrap_or(now),
            order_id,
            correlation_id: self.correlation_id,
            producer: self.producer.unwrap_or_default(),
            payload: self.payload.unwrap_or(serde_json::Value::Null),
        })
    }
}
