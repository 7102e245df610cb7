//! Saga lifecycle status.

use serde::{Deserialize, Serialize};

/// The status of a saga instance in its lifecycle.
///
/// Status only moves forward:
/// ```text
/// Running ──┬──► Completed
///           └──► Compensating ──┬──► Failed
///                               └──► Aborted
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SagaStatus {
    /// Forward steps are being applied.
    Running,

    /// A step failed or an abort was requested; compensations are in
    /// progress.
    Compensating,

    /// All forward steps completed successfully (terminal).
    Completed,

    /// Compensation finished after a step failure (terminal).
    Failed,

    /// Compensation finished after an explicit abort request (terminal).
    Aborted,
}

impl SagaStatus {
    /// Returns true if forward steps may still be applied.
    pub fn can_advance(&self) -> bool {
        matches!(self, SagaStatus::Running)
    }

    /// Returns true if the saga can enter compensation.
    pub fn can_compensate(&self) -> bool {
        matches!(self, SagaStatus::Running)
    }

    /// Returns true if this is a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SagaStatus::Completed | SagaStatus::Failed | SagaStatus::Aborted
        )
    }

    /// Returns the status name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaStatus::Running => "Running",
            SagaStatus::Compensating => "Compensating",
            SagaStatus::Completed => "Completed",
            SagaStatus::Failed => "Failed",
            SagaStatus::Aborted => "Aborted",
        }
    }

    /// Parses a status from its string name.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "Running" => Some(SagaStatus::Running),
            "Compensating" => Some(SagaStatus::Compensating),
            "Completed" => Some(SagaStatus::Completed),
            "Failed" => Some(SagaStatus::Failed),
            "Aborted" => Some(SagaStatus::Aborted),
            _ => None,
        }
    }
}

impl std::fmt::Display for SagaStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
