use chrono::{DateTime, Utc};
use common::{EventId, SagaId};
use serde::{Deserialize, Serialize};

/// Wire schema version produced by this codec. Decoding rejects anything else.
pub const SCHEMA_VERSION: u16 = 1;

/// An event envelope: a domain event plus the correlation metadata the
/// coordinator needs to route it to a saga instance.
///
/// The payload stays opaque JSON; its shape is validated per event type at
/// decode time rather than baked into this struct.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Unique identifier for this event occurrence. Stable across
    /// redeliveries.
    pub event_id: EventId,

    /// The type of the event (e.g., "order.created", "payment.authorized").
    pub event_type: String,

    /// The saga this event belongs to. Stable across the saga's lifetime.
    pub correlation_id: SagaId,

    /// The event that caused this one, for lineage tracing.
    pub causation_id: Option<EventId>,

    /// When the event occurred at its producer.
    pub occurred_at: DateTime<Utc>,

    /// Delivery attempt counter. Starts at 1; the bus raises it on
    /// redelivery.
    pub delivery_attempt: u32,

    /// Wire schema version the producer encoded with.
    pub schema_version: u16,

    /// The event payload as JSON.
    pub payload: serde_json::Value,
}

impl EventEnvelope {
    /// Creates a new event envelope builder.
    pub fn builder() -> EventEnvelopeBuilder {
        EventEnvelopeBuilder::default()
    }

    /// Returns the saga id this event correlates to.
    pub fn saga_id(&self) -> SagaId {
        self.correlation_id
    }
}

/// Builder for constructing event envelopes.
#[derive(Debug, Default)]
pub struct EventEnvelopeBuilder {
    event_id: Option<EventId>,
    event_type: Option<String>,
    correlation_id: Option<SagaId>,
    causation_id: Option<EventId>,
    occurred_at: Option<DateTime<Utc>>,
    delivery_attempt: Option<u32>,
    payload: Option<serde_json::Value>,
}

impl EventEnvelopeBuilder {
    /// Sets the event ID. If not set, a new ID will be generated.
    pub fn event_id(mut self, id: EventId) -> Self {
        self.event_id = Some(id);
        self
    }

    /// Sets the event type.
    pub fn event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    /// Sets the correlation ID (the saga id).
    pub fn correlation_id(mut self, id: SagaId) -> Self {
        self.correlation_id = Some(id);
        self
    }

    /// Sets the causation ID (the event that caused this one).
    pub fn causation_id(mut self, id: EventId) -> Self {
        self.causation_id = Some(id);
        self
    }

    /// Sets the occurrence time. If not set, the current time will be used.
    pub fn occurred_at(mut self, at: DateTime<Utc>) -> Self {
        self.occurred_at = Some(at);
        self
    }

    /// Sets the delivery attempt counter. If not set, defaults to 1.
    pub fn delivery_attempt(mut self, attempt: u32) -> Self {
        self.delivery_attempt = Some(attempt);
        self
    }

    /// Sets the payload from a serializable value.
    pub fn payload<T: Serialize>(mut self, payload: &T) -> Result<Self, serde_json::Error> {
        self.payload = Some(serde_json::to_value(payload)?);
        Ok(self)
    }

    /// Sets the payload from a raw JSON value.
    pub fn payload_raw(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Builds the event envelope.
    ///
    /// # Panics
    ///
    /// Panics if required fields (event_type, correlation_id, payload) are
    /// not set.
    pub fn build(self) -> EventEnvelope {
        EventEnvelope {
            event_id: self.event_id.unwrap_or_default(),
            event_type: self.event_type.expect("event_type is required"),
            correlation_id: self.correlation_id.expect("correlation_id is required"),
            causation_id: self.causation_id,
            occurred_at: self.occurred_at.unwrap_or_else(Utc::now),
            delivery_attempt: self.delivery_attempt.unwrap_or(1),
            schema_version: SCHEMA_VERSION,
            payload: self.payload.expect("payload is required"),
        }
    }

    /// Tries to build the event envelope, returning None if required fields
    /// are missing.
    pub fn try_build(self) -> Option<EventEnvelope> {
        Some(EventEnvelope {
            event_id: self.event_id.unwrap_or_default(),
            event_type: self.event_type?,
            correlation_id: self.correlation_id?,
            causation_id: self.causation_id,
            occurred_at: self.occurred_at.unwrap_or_else(Utc::now),
            delivery_attempt: self.delivery_attempt.unwrap_or(1),
            schema_version: SCHEMA_VERSION,
            payload: self.payload?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_builder_fills_defaults() {
        let saga_id = SagaId::new();
        let payload = serde_json::json!({"order_id": "42"});

        let envelope = EventEnvelope::builder()
            .event_type("order.created")
            .correlation_id(saga_id)
            .payload_raw(payload.clone())
            .build();

        assert_eq!(envelope.event_type, "order.created");
        assert_eq!(envelope.correlation_id, saga_id);
        assert_eq!(envelope.payload, payload);
        assert_eq!(envelope.delivery_attempt, 1);
        assert_eq!(envelope.schema_version, SCHEMA_VERSION);
        assert!(envelope.causation_id.is_none());
    }

    #[test]
    fn envelope_builder_carries_causation() {
        let cause = EventId::new();
        let envelope = EventEnvelope::builder()
            .event_type("payment.authorized")
            .correlation_id(SagaId::new())
            .causation_id(cause)
            .payload_raw(serde_json::json!({}))
            .build();

        assert_eq!(envelope.causation_id, Some(cause));
    }

    #[test]
    fn envelope_try_build_returns_none_on_missing_fields() {
        let result = EventEnvelope::builder().try_build();
        assert!(result.is_none());
    }

    #[test]
    fn envelope_serialization_roundtrip() {
        let envelope = EventEnvelope::builder()
            .event_type("order.created")
            .correlation_id(SagaId::new())
            .payload_raw(serde_json::json!({"order_id": "42"}))
            .build();

        let json = serde_json::to_string(&envelope).unwrap();
        let deserialized: EventEnvelope = serde_json::from_str(&json).unwrap();

        assert_eq!(deserialized.event_id, envelope.event_id);
        assert_eq!(deserialized.event_type, envelope.event_type);
        assert_eq!(deserialized.correlation_id, envelope.correlation_id);
        assert_eq!(deserialized.payload, envelope.payload);
    }
}
