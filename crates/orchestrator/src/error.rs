//! Orchestrator error types.

use envelope::CodecError;
use event_bus::BusError;
use saga_store::StoreError;
use thiserror::Error;

/// A step registry configuration problem.
///
/// The only fatal error class in the system, and only at startup: an
/// ambiguous registry must abort the process before it consumes a single
/// message.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// The registry has no step definitions.
    #[error("Step registry has no definitions")]
    Empty,

    /// Two definitions share the same (saga type, event, required step)
    /// key.
    #[error(
        "Ambiguous step definition for saga type '{saga_type}' on event '{on_event}' (requires {requires_step:?})"
    )]
    AmbiguousStep {
        saga_type: String,
        on_event: String,
        requires_step: Option<String>,
    },

    /// Two saga types both initiate on the same event.
    #[error("Ambiguous initiating event '{on_event}': claimed by '{first}' and '{second}'")]
    AmbiguousInitiator {
        on_event: String,
        first: String,
        second: String,
    },

    /// A saga-initiating definition must be a forward step.
    #[error("Initiating definition for saga type '{saga_type}' on event '{on_event}' must be a forward step")]
    NonForwardInitiator { saga_type: String, on_event: String },
}

/// Errors escaping a transition.
///
/// Everything here is transient infrastructure trouble: the worker nacks
/// the message and lets the bus redeliver. Per-message problems (poison
/// messages, version-conflict exhaustion) are contained inside the
/// transition and dead-lettered instead.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Saga store error.
    #[error("Saga store error: {0}")]
    Store(#[from] StoreError),

    /// Event bus error.
    #[error("Event bus error: {0}")]
    Bus(#[from] BusError),

    /// Outbound envelope encoding error.
    #[error("Envelope encoding error: {0}")]
    Codec(#[from] CodecError),
}

/// Convenience type alias for orchestrator results.
pub type Result<T> = std::result::Result<T, OrchestratorError>;
