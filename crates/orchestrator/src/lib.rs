//! Choreographed saga coordination over an event bus.
//!
//! This crate is the coordination core: it consumes domain events from the
//! bus, resolves each one against a declarative step registry, advances the
//! matching saga instance, and publishes the resulting forward or
//! compensation commands. Every state change is persisted through the saga
//! store's compare-and-swap, which is the only coordination between
//! concurrent workers.
//!
//! A transition runs in a fixed order: decode, resolve, dedupe, execute,
//! persist, acknowledge. Poison messages are dead-lettered; a step failure
//! walks the completed history in reverse and publishes each step's
//! compensation command.

pub mod deadline;
pub mod error;
pub mod idempotency;
pub mod observer;
pub mod orchestrator;
pub mod order_fulfillment;
pub mod registry;
pub mod worker;

pub use deadline::DeadlineTracker;
pub use error::{ConfigurationError, OrchestratorError, Result};
pub use idempotency::{Freshness, IdempotencyKey, IdempotencyStore, InMemoryIdempotencyStore};
pub use observer::{NoOpObserver, TracingObserver, TransitionObserver, TransitionRecord};
pub use orchestrator::{Orchestrator, TransitionOutcome};
pub use registry::{CommandSpec, StepDefinition, StepKind, StepRegistry};
pub use worker::Worker;
