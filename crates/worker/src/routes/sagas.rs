//! Saga status endpoint.
//!
//! The durable saga record (status, current step, history) is what an
//! operator inspects instead of a stack trace when a transaction looks
//! stuck.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use common::SagaId;
use saga_store::{SagaStore, StepOutcome, StepRecord};
use serde::Serialize;

use crate::error::ApiError;

/// Shared application state accessible from all handlers.
pub struct AppState<S: SagaStore> {
    pub store: S,
}

#[derive(Serialize)]
pub struct SagaStatusResponse {
    pub saga_id: String,
    pub saga_type: String,
    pub status: String,
    pub current_step: Option<String>,
    pub failure_reason: Option<String>,
    pub version: i64,
    pub history: Vec<StepRecordResponse>,
}

#[derive(Serialize)]
pub struct StepRecordResponse {
    pub step_name: String,
    pub recorded_at: String,
    pub outcome: String,
    pub detail: Option<String>,
}

impl From<&StepRecord> for StepRecordResponse {
    fn from(record: &StepRecord) -> Self {
        let (outcome, detail) = match &record.outcome {
            StepOutcome::Completed => ("completed".to_string(), None),
            StepOutcome::Failed { reason } => ("failed".to_string(), Some(reason.clone())),
            StepOutcome::Compensated => ("compensated".to_string(), None),
        };
        Self {
            step_name: record.step_name.clone(),
            recorded_at: record.recorded_at.to_rfc3339(),
            outcome,
            detail,
        }
    }
}

/// GET /sagas/{id} — returns the durable record of one saga.
#[tracing::instrument(skip(state))]
pub async fn get<S: SagaStore>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<SagaStatusResponse>, ApiError> {
    let uuid = uuid::Uuid::parse_str(&id)
        .map_err(|_| ApiError::BadRequest(format!("invalid saga id '{id}'")))?;
    let saga_id = SagaId::from_uuid(uuid);

    let instance = state
        .store
        .load(saga_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("saga {saga_id} not found")))?;

    Ok(Json(SagaStatusResponse {
        saga_id: instance.saga_id().to_string(),
        saga_type: instance.saga_type().to_string(),
        status: instance.status().to_string(),
        current_step: instance.current_step().map(String::from),
        failure_reason: instance.failure_reason().map(String::from),
        version: instance.version().as_i64(),
        history: instance.history().iter().map(StepRecordResponse::from).collect(),
    }))
}
