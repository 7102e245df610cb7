use thiserror::Error;

/// Errors that can occur when encoding an envelope.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The envelope could not be serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors that can occur when decoding wire bytes into an envelope.
///
/// Every variant marks the message as poison: it is dead-lettered and
/// acknowledged, never retried.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The bytes were not valid JSON, or did not match the envelope shape.
    #[error("Malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The message was encoded with a schema version this codec does not
    /// understand.
    #[error("Unsupported schema version {found} (supported: {supported})")]
    UnsupportedSchemaVersion { found: u16, supported: u16 },

    /// A required piece of correlation metadata is absent.
    #[error("Missing required metadata field '{field}'")]
    MissingMetadata { field: &'static str },

    /// The payload violated the schema registered for its event type.
    #[error("Invalid payload for event type '{event_type}': {reason}")]
    PayloadValidation { event_type: String, reason: String },
}
