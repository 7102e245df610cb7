//! The per-saga state record.

use chrono::{DateTime, Utc};
use common::SagaId;
use serde::{Deserialize, Serialize};

use crate::status::SagaStatus;

/// Version number for a saga instance, used for optimistic concurrency
/// control.
///
/// Versions start at 1 when the instance is created and increment by 1 on
/// every persisted mutation.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Version(i64);

impl Version {
    /// Creates a version from a raw value.
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// Returns the pre-creation version (0).
    pub fn initial() -> Self {
        Self(0)
    }

    /// Returns the version of a freshly created instance (1).
    pub fn first() -> Self {
        Self(1)
    }

    /// Returns the next version.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// Returns the raw version value.
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for Version {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl From<Version> for i64 {
    fn from(version: Version) -> Self {
        version.0
    }
}

/// A command to publish when rolling back a completed step.
///
/// Snapshotted into the step's history record at execution time, so the
/// rollback walk replays exactly what was promised even if the registry
/// changes between deploys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompensationCommand {
    /// Routing key the compensation is published under.
    pub routing_key: String,
    /// Event type of the compensation command.
    pub event_type: String,
}

impl CompensationCommand {
    /// Creates a compensation command.
    pub fn new(routing_key: impl Into<String>, event_type: impl Into<String>) -> Self {
        Self {
            routing_key: routing_key.into(),
            event_type: event_type.into(),
        }
    }
}

/// How a recorded step turned out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", content = "detail")]
pub enum StepOutcome {
    /// The forward step completed.
    Completed,
    /// The step failed; the reason is kept for the operator.
    Failed { reason: String },
    /// The step's compensation command was published.
    Compensated,
}

/// One entry in a saga's append-only history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    /// The step name.
    pub step_name: String,
    /// When the record was appended.
    pub recorded_at: DateTime<Utc>,
    /// The step's outcome.
    pub outcome: StepOutcome,
    /// Compensation command snapshotted for completed steps.
    pub compensation: Option<CompensationCommand>,
}

/// The durable record of one saga execution.
///
/// History is append-only: records are never rewritten, so the sequence of
/// records is the audit trail an operator reads to understand a stuck
/// transaction. The orchestrator is the only writer; all mutation is
/// persisted through the store's compare-and-swap.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaInstance {
    saga_id: SagaId,
    saga_type: String,
    current_step: Option<String>,
    status: SagaStatus,
    failure_reason: Option<String>,
    history: Vec<StepRecord>,
    version: Version,
}

impl SagaInstance {
    /// Creates a fresh instance in `Running` at version 1.
    pub fn new(saga_id: SagaId, saga_type: impl Into<String>) -> Self {
        Self {
            saga_id,
            saga_type: saga_type.into(),
            current_step: None,
            status: SagaStatus::Running,
            failure_reason: None,
            history: Vec::new(),
            version: Version::first(),
        }
    }

    /// Reassembles an instance from its persisted parts.
    pub(crate) fn from_parts(
        saga_id: SagaId,
        saga_type: String,
        current_step: Option<String>,
        status: SagaStatus,
        failure_reason: Option<String>,
        history: Vec<StepRecord>,
        version: Version,
    ) -> Self {
        Self {
            saga_id,
            saga_type,
            current_step,
            status,
            failure_reason,
            history,
            version,
        }
    }

    // -- Queries --

    /// Returns the saga id.
    pub fn saga_id(&self) -> SagaId {
        self.saga_id
    }

    /// Returns the saga type.
    pub fn saga_type(&self) -> &str {
        &self.saga_type
    }

    /// Returns the last-applied step name, if any step has applied yet.
    pub fn current_step(&self) -> Option<&str> {
        self.current_step.as_deref()
    }

    /// Returns the saga status.
    pub fn status(&self) -> SagaStatus {
        self.status
    }

    /// Returns the failure reason, if the saga failed or was aborted.
    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    /// Returns the append-only history.
    pub fn history(&self) -> &[StepRecord] {
        &self.history
    }

    /// Returns the current version.
    pub fn version(&self) -> Version {
        self.version
    }

    /// Overwrites the version after a successful persist.
    pub fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    /// Returns the completed steps that carry a compensation command and
    /// have not been compensated yet, most recent first, in rollback walk
    /// order. Steps with a later `Compensated` record are skipped, so an
    /// interrupted walk resumes where it left off.
    pub fn compensatable_steps(&self) -> Vec<(String, CompensationCommand)> {
        let compensated: std::collections::HashSet<&str> = self
            .history
            .iter()
            .filter(|record| matches!(record.outcome, StepOutcome::Compensated))
            .map(|record| record.step_name.as_str())
            .collect();

        self.history
            .iter()
            .rev()
            .filter(|record| matches!(record.outcome, StepOutcome::Completed))
            .filter(|record| !compensated.contains(record.step_name.as_str()))
            .filter_map(|record| {
                record
                    .compensation
                    .clone()
                    .map(|command| (record.step_name.clone(), command))
            })
            .collect()
    }

    // -- Mutations (persisted via compare-and-swap) --

    /// Records a completed forward step and advances the current step.
    pub fn record_step_completed(
        &mut self,
        step_name: impl Into<String>,
        compensation: Option<CompensationCommand>,
    ) {
        let step_name = step_name.into();
        self.history.push(StepRecord {
            step_name: step_name.clone(),
            recorded_at: Utc::now(),
            outcome: StepOutcome::Completed,
            compensation,
        });
        self.current_step = Some(step_name);
    }

    /// Records a failed step. The current step is left unchanged.
    pub fn record_step_failed(&mut self, step_name: impl Into<String>, reason: impl Into<String>) {
        self.history.push(StepRecord {
            step_name: step_name.into(),
            recorded_at: Utc::now(),
            outcome: StepOutcome::Failed {
                reason: reason.into(),
            },
            compensation: None,
        });
    }

    /// Records that a completed step's compensation command was published.
    pub fn record_step_compensated(&mut self, step_name: impl Into<String>) {
        self.history.push(StepRecord {
            step_name: step_name.into(),
            recorded_at: Utc::now(),
            outcome: StepOutcome::Compensated,
            compensation: None,
        });
    }

    /// Moves the saga into `Compensating`.
    pub fn begin_compensation(&mut self) {
        self.status = SagaStatus::Compensating;
    }

    /// Marks the saga `Completed`.
    pub fn complete(&mut self) {
        self.status = SagaStatus::Completed;
    }

    /// Marks the saga `Failed` with the given reason.
    pub fn fail(&mut self, reason: impl Into<String>) {
        self.status = SagaStatus::Failed;
        self.failure_reason = Some(reason.into());
    }

    /// Marks the saga `Aborted` with the given reason.
    pub fn abort(&mut self, reason: impl Into<String>) {
        self.status = SagaStatus::Aborted;
        self.failure_reason = Some(reason.into());
    }
}
