//! Event envelope model and wire codec.
//!
//! Every message crossing the event bus is an [`EventEnvelope`]: a typed
//! domain event payload wrapped with the correlation metadata the saga
//! coordinator needs (event id, correlation id, causation id, occurrence
//! time, delivery attempt). The [`EnvelopeCodec`] turns envelopes into bytes
//! and back, rejecting unknown schema versions and payloads that fail their
//! per-event-type validation.

pub mod codec;
pub mod envelope;
pub mod error;

pub use codec::{EnvelopeCodec, PayloadSchema};
pub use envelope::{EventEnvelope, EventEnvelopeBuilder, SCHEMA_VERSION};
pub use error::{CodecError, DecodeError};
