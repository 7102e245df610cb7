//! Per-step completion deadlines.
//!
//! A forward step that awaits a completion event may carry a timeout; the
//! tracker remembers the deadline and the monitor sweep turns expiry into
//! the same compensation path a failure event takes. Deadlines live in
//! process memory: after a crash they are effectively re-armed by the bus
//! redelivering the unacknowledged message.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use common::SagaId;

#[derive(Debug, Clone)]
struct PendingDeadline {
    step_name: String,
    expires_at: Instant,
}

/// Tracks the completion deadline of each saga's current step.
#[derive(Clone, Default)]
pub struct DeadlineTracker {
    pending: Arc<Mutex<HashMap<SagaId, PendingDeadline>>>,
}

impl DeadlineTracker {
    /// Creates an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms (or re-arms) the deadline for a saga's current step.
    pub fn arm(&self, saga_id: SagaId, step_name: impl Into<String>, timeout: Duration) {
        let mut pending = self.pending.lock().unwrap();
        pending.insert(
            saga_id,
            PendingDeadline {
                step_name: step_name.into(),
                expires_at: Instant::now() + timeout,
            },
        );
    }

    /// Clears the deadline for a saga, if any.
    pub fn disarm(&self, saga_id: SagaId) {
        self.pending.lock().unwrap().remove(&saga_id);
    }

    /// Removes and returns all expired deadlines as `(saga_id, step_name)`.
    pub fn take_expired(&self) -> Vec<(SagaId, String)> {
        let now = Instant::now();
        let mut pending = self.pending.lock().unwrap();

        let expired: Vec<SagaId> = pending
            .iter()
            .filter(|(_, deadline)| deadline.expires_at <= now)
            .map(|(saga_id, _)| *saga_id)
            .collect();

        expired
            .into_iter()
            .filter_map(|saga_id| {
                pending
                    .remove(&saga_id)
                    .map(|deadline| (saga_id, deadline.step_name))
            })
            .collect()
    }

    /// Returns the number of armed deadlines.
    pub fn armed_count(&self) -> usize {
        self.pending.lock().unwrap().len()
    }
}
