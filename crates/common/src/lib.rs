//! Shared identifier newtypes used across the saga coordination core.

mod types;

pub use types::{EventId, SagaId};
