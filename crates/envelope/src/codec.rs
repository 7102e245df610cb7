//! Wire codec with schema-version gating and per-event-type payload
//! validation.

use std::collections::HashMap;

use crate::envelope::{EventEnvelope, SCHEMA_VERSION};
use crate::error::{CodecError, DecodeError};

/// Validation rules for one event type's payload.
///
/// Payloads are opaque JSON on the wire; a schema pins down the minimum a
/// consumer relies on: the payload must be an object carrying the required
/// top-level fields.
#[derive(Debug, Clone, Default)]
pub struct PayloadSchema {
    required_fields: Vec<String>,
}

impl PayloadSchema {
    /// Creates a schema requiring the given top-level payload fields.
    pub fn required(fields: &[&str]) -> Self {
        Self {
            required_fields: fields.iter().map(|f| f.to_string()).collect(),
        }
    }

    /// Returns the required field names.
    pub fn required_fields(&self) -> &[String] {
        &self.required_fields
    }

    fn validate(&self, event_type: &str, payload: &serde_json::Value) -> Result<(), DecodeError> {
        let Some(object) = payload.as_object() else {
            return Err(DecodeError::PayloadValidation {
                event_type: event_type.to_string(),
                reason: "payload must be a JSON object".to_string(),
            });
        };

        for field in &self.required_fields {
            if !object.contains_key(field) {
                return Err(DecodeError::PayloadValidation {
                    event_type: event_type.to_string(),
                    reason: format!("missing required payload field '{field}'"),
                });
            }
        }

        Ok(())
    }
}

/// Encodes and decodes event envelopes to and from wire bytes.
///
/// Decoding is strict: malformed JSON, an unsupported schema version, or
/// missing correlation metadata all fail with a [`DecodeError`]. Encoding a
/// well-formed envelope does not fail. Both directions are pure transforms.
#[derive(Debug, Clone, Default)]
pub struct EnvelopeCodec {
    schemas: HashMap<String, PayloadSchema>,
}

impl EnvelopeCodec {
    /// Creates a codec with no payload schemas registered.
    ///
    /// Event types without a registered schema pass through with their
    /// payload opaque.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a payload schema for an event type.
    pub fn with_payload_schema(mut self, event_type: impl Into<String>, schema: PayloadSchema) -> Self {
        self.schemas.insert(event_type.into(), schema);
        self
    }

    /// Encodes an envelope into wire bytes.
    pub fn encode(&self, envelope: &EventEnvelope) -> Result<Vec<u8>, CodecError> {
        Ok(serde_json::to_vec(envelope)?)
    }

    /// Decodes wire bytes into an envelope.
    ///
    /// Fails with [`DecodeError`] on malformed JSON, an unknown schema
    /// version, missing correlation metadata, or a payload that violates its
    /// event type's registered schema.
    pub fn decode(&self, bytes: &[u8]) -> Result<EventEnvelope, DecodeError> {
        let value: serde_json::Value = serde_json::from_slice(bytes)?;

        let Some(object) = value.as_object() else {
            return Err(DecodeError::MissingMetadata {
                field: "event_type",
            });
        };

        // Correlation metadata must be present before the typed parse so the
        // error names the missing field instead of a generic serde message.
        for field in ["event_id", "event_type", "correlation_id", "occurred_at", "payload"] {
            if !object.contains_key(field) {
                return Err(DecodeError::MissingMetadata { field });
            }
        }

        let schema_version = object
            .get("schema_version")
            .and_then(|v| v.as_u64())
            .ok_or(DecodeError::MissingMetadata {
                field: "schema_version",
            })? as u16;

        if schema_version != SCHEMA_VERSION {
            return Err(DecodeError::UnsupportedSchemaVersion {
                found: schema_version,
                supported: SCHEMA_VERSION,
            });
        }

        let envelope: EventEnvelope = serde_json::from_value(value)?;

        if let Some(schema) = self.schemas.get(&envelope.event_type) {
            schema.validate(&envelope.event_type, &envelope.payload)?;
        }

        Ok(envelope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::SagaId;

    fn sample_envelope() -> EventEnvelope {
        EventEnvelope::builder()
            .event_type("order.created")
            .correlation_id(SagaId::new())
            .payload_raw(serde_json::json!({"order_id": "42", "total_cents": 4200}))
            .build()
    }

    #[test]
    fn encode_decode_roundtrip() {
        let codec = EnvelopeCodec::new();
        let envelope = sample_envelope();

        let bytes = codec.encode(&envelope).unwrap();
        let decoded = codec.decode(&bytes).unwrap();

        assert_eq!(decoded.event_id, envelope.event_id);
        assert_eq!(decoded.event_type, envelope.event_type);
        assert_eq!(decoded.correlation_id, envelope.correlation_id);
        assert_eq!(decoded.payload, envelope.payload);
    }

    #[test]
    fn decode_rejects_malformed_bytes() {
        let codec = EnvelopeCodec::new();
        let result = codec.decode(b"not json at all {{");
        assert!(matches!(result, Err(DecodeError::Malformed(_))));
    }

    #[test]
    fn decode_rejects_unknown_schema_version() {
        let codec = EnvelopeCodec::new();
        let envelope = sample_envelope();
        let mut value = serde_json::to_value(&envelope).unwrap();
        value["schema_version"] = serde_json::json!(99);

        let result = codec.decode(&serde_json::to_vec(&value).unwrap());
        assert!(matches!(
            result,
            Err(DecodeError::UnsupportedSchemaVersion {
                found: 99,
                supported: SCHEMA_VERSION
            })
        ));
    }

    #[test]
    fn decode_rejects_missing_correlation_id() {
        let codec = EnvelopeCodec::new();
        let envelope = sample_envelope();
        let mut value = serde_json::to_value(&envelope).unwrap();
        value.as_object_mut().unwrap().remove("correlation_id");

        let result = codec.decode(&serde_json::to_vec(&value).unwrap());
        assert!(matches!(
            result,
            Err(DecodeError::MissingMetadata {
                field: "correlation_id"
            })
        ));
    }

    #[test]
    fn decode_validates_registered_payload_schema() {
        let codec = EnvelopeCodec::new()
            .with_payload_schema("order.created", PayloadSchema::required(&["order_id"]));

        // Valid payload passes
        let envelope = sample_envelope();
        let bytes = codec.encode(&envelope).unwrap();
        assert!(codec.decode(&bytes).is_ok());

        // Missing required field fails
        let bad = EventEnvelope::builder()
            .event_type("order.created")
            .correlation_id(SagaId::new())
            .payload_raw(serde_json::json!({"something_else": true}))
            .build();
        let bytes = codec.encode(&bad).unwrap();
        let result = codec.decode(&bytes);
        assert!(matches!(result, Err(DecodeError::PayloadValidation { .. })));
    }

    #[test]
    fn decode_rejects_non_object_payload_for_registered_type() {
        let codec = EnvelopeCodec::new()
            .with_payload_schema("order.created", PayloadSchema::required(&["order_id"]));

        let bad = EventEnvelope::builder()
            .event_type("order.created")
            .correlation_id(SagaId::new())
            .payload_raw(serde_json::json!("just a string"))
            .build();
        let bytes = codec.encode(&bad).unwrap();
        assert!(matches!(
            codec.decode(&bytes),
            Err(DecodeError::PayloadValidation { .. })
        ));
    }

    #[test]
    fn unregistered_event_types_pass_opaque() {
        let codec = EnvelopeCodec::new()
            .with_payload_schema("order.created", PayloadSchema::required(&["order_id"]));

        let other = EventEnvelope::builder()
            .event_type("inventory.adjusted")
            .correlation_id(SagaId::new())
            .payload_raw(serde_json::json!([1, 2, 3]))
            .build();
        let bytes = codec.encode(&other).unwrap();
        assert!(codec.decode(&bytes).is_ok());
    }
}
