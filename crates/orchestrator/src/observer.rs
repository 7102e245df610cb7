//! Transition observability collaborator.

use common::SagaId;

/// One structured record per transition, handed to the observability
/// collaborator.
#[derive(Debug, Clone)]
pub struct TransitionRecord {
    /// The operation processed: the inbound event type.
    pub operation: String,
    /// The saga the transition applied to.
    pub saga_id: SagaId,
    /// The correlation id carried by the triggering event.
    pub correlation_id: SagaId,
    /// The transition outcome name.
    pub outcome: &'static str,
    /// Wall-clock duration of the transition in milliseconds.
    pub duration_ms: u64,
}

/// Receives a record for every transition the orchestrator performs.
pub trait TransitionObserver: Send + Sync {
    /// Records one transition.
    fn record(&self, record: TransitionRecord);
}

/// Observer that emits structured tracing events.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl TransitionObserver for TracingObserver {
    fn record(&self, record: TransitionRecord) {
        tracing::info!(
            operation = %record.operation,
            saga_id = %record.saga_id,
            correlation_id = %record.correlation_id,
            outcome = record.outcome,
            duration_ms = record.duration_ms,
            "saga transition"
        );
    }
}

/// Observer that discards records, for benches and tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpObserver;

impl TransitionObserver for NoOpObserver {
    fn record(&self, _record: TransitionRecord) {}
}
