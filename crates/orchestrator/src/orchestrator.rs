//! The saga transition state machine.

use std::sync::Arc;
use std::time::Duration;

use common::SagaId;
use envelope::{EnvelopeCodec, EventEnvelope};
use event_bus::{DeadLetter, DeadLetterSink, Delivery, EventBus};
use saga_store::{CompensationCommand, SagaInstance, SagaStore, StoreError, Version};
use tokio::sync::watch;

use crate::deadline::DeadlineTracker;
use crate::error::{OrchestratorError, Result};
use crate::idempotency::{Freshness, IdempotencyKey, IdempotencyStore};
use crate::observer::{TracingObserver, TransitionObserver, TransitionRecord};
use crate::registry::{CommandSpec, StepDefinition, StepKind, StepRegistry};

/// How a single delivery was disposed of.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// A forward step applied and the saga advanced.
    Advanced { step: String },
    /// The terminal forward step applied; the saga completed.
    Completed { step: String },
    /// Compensation ran to completion; the saga failed.
    Failed,
    /// Compensation ran after an explicit abort request.
    Aborted,
    /// The event was already processed for this step; nothing re-executed.
    Duplicate,
    /// No step definition matched; the event is irrelevant here.
    NoMatchingStep,
    /// The instance is already terminal (or compensating); forward progress
    /// is not possible and the event was dropped.
    Ignored,
    /// The message was handed to the dead-letter collaborator.
    DeadLettered,
}

impl TransitionOutcome {
    /// Returns the outcome name for observability records.
    pub fn as_str(&self) -> &'static str {
        match self {
            TransitionOutcome::Advanced { .. } => "advanced",
            TransitionOutcome::Completed { .. } => "completed",
            TransitionOutcome::Failed => "failed",
            TransitionOutcome::Aborted => "aborted",
            TransitionOutcome::Duplicate => "duplicate",
            TransitionOutcome::NoMatchingStep => "no_matching_step",
            TransitionOutcome::Ignored => "ignored",
            TransitionOutcome::DeadLettered => "dead_lettered",
        }
    }
}

/// Internal split between a retryable version conflict and everything else.
enum TransitionError {
    Conflict(StoreError),
    Fatal(OrchestratorError),
}

impl TransitionError {
    fn from_store(err: StoreError) -> Self {
        match err {
            conflict @ StoreError::VersionConflict { .. } => TransitionError::Conflict(conflict),
            other => TransitionError::Fatal(other.into()),
        }
    }
}

/// Drives saga transitions for incoming deliveries.
///
/// One transition per delivery: decode, resolve the step, dedupe, execute,
/// persist through compare-and-swap. The caller acknowledges the delivery
/// only after this returns Ok; a crash in between leaves the message
/// unacknowledged and the bus redelivers, which is exactly why the
/// idempotency guard exists.
///
/// Multiple orchestrator instances may run concurrently with no shared
/// state beyond the store; version conflicts are retried locally up to
/// `max_cas_retries`, then the delivery is dead-lettered with an
/// operator-visible alert.
pub struct Orchestrator<S, B, D, I>
where
    S: SagaStore,
    B: EventBus,
    D: DeadLetterSink,
    I: IdempotencyStore,
{
    registry: Arc<StepRegistry>,
    codec: EnvelopeCodec,
    store: S,
    bus: B,
    dead_letters: D,
    idempotency: I,
    observer: Arc<dyn TransitionObserver>,
    deadlines: DeadlineTracker,
    max_cas_retries: u32,
}

impl<S, B, D, I> Orchestrator<S, B, D, I>
where
    S: SagaStore,
    B: EventBus,
    D: DeadLetterSink,
    I: IdempotencyStore,
{
    /// Creates a new orchestrator.
    pub fn new(
        registry: Arc<StepRegistry>,
        codec: EnvelopeCodec,
        store: S,
        bus: B,
        dead_letters: D,
        idempotency: I,
    ) -> Self {
        Self {
            registry,
            codec,
            store,
            bus,
            dead_letters,
            idempotency,
            observer: Arc::new(TracingObserver),
            deadlines: DeadlineTracker::new(),
            max_cas_retries: 5,
        }
    }

    /// Replaces the transition observer.
    pub fn with_observer(mut self, observer: Arc<dyn TransitionObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Sets the bound on local version-conflict retries.
    pub fn with_max_cas_retries(mut self, max_cas_retries: u32) -> Self {
        self.max_cas_retries = max_cas_retries;
        self
    }

    /// Returns the step registry.
    pub fn registry(&self) -> &StepRegistry {
        &self.registry
    }

    /// Returns the deadline tracker.
    pub fn deadlines(&self) -> &DeadlineTracker {
        &self.deadlines
    }

    /// Processes one delivery through the full transition algorithm.
    ///
    /// Ok means the delivery can be acknowledged: the transition either
    /// committed, was a benign drop, or was dead-lettered. Err means
    /// transient infrastructure trouble: nack and let the bus redeliver.
    #[tracing::instrument(skip(self, delivery), fields(routing_key = %delivery.routing_key, attempt = delivery.attempt))]
    pub async fn handle_delivery(&self, delivery: &Delivery) -> Result<TransitionOutcome> {
        let started = std::time::Instant::now();
        metrics::counter!("saga_events_received_total").increment(1);

        let mut envelope = match self.codec.decode(&delivery.body) {
            Ok(envelope) => envelope,
            Err(err) => {
                // Poison message: dead-letter and acknowledge, never retry.
                metrics::counter!("saga_poison_messages_total").increment(1);
                tracing::warn!(error = %err, "dead-lettering undecodable message");
                self.dead_letters
                    .send(DeadLetter::new(
                        err.to_string(),
                        delivery.routing_key.clone(),
                        delivery.body.clone(),
                    ))
                    .await?;
                return Ok(TransitionOutcome::DeadLettered);
            }
        };
        envelope.delivery_attempt = delivery.attempt;

        let outcome = self.run_transition(&envelope, delivery).await?;

        self.observer.record(TransitionRecord {
            operation: envelope.event_type.clone(),
            saga_id: envelope.correlation_id,
            correlation_id: envelope.correlation_id,
            outcome: outcome.as_str(),
            duration_ms: started.elapsed().as_millis() as u64,
        });
        metrics::histogram!("saga_transition_duration_seconds")
            .record(started.elapsed().as_secs_f64());

        Ok(outcome)
    }

    /// Dead-letters a delivery the worker has given up on.
    pub async fn dead_letter(&self, delivery: &Delivery, reason: impl Into<String>) -> Result<()> {
        self.dead_letters
            .send(DeadLetter::new(
                reason,
                delivery.routing_key.clone(),
                delivery.body.clone(),
            ))
            .await?;
        Ok(())
    }

    /// Runs the transition with bounded version-conflict retries.
    async fn run_transition(
        &self,
        envelope: &EventEnvelope,
        delivery: &Delivery,
    ) -> Result<TransitionOutcome> {
        let mut marked: Vec<IdempotencyKey> = Vec::new();
        let mut conflicts = 0u32;

        loop {
            match self.try_transition(envelope, &mut marked).await {
                Ok(outcome) => return Ok(outcome),
                Err(TransitionError::Conflict(err)) => {
                    conflicts += 1;
                    metrics::counter!("saga_cas_conflicts_total").increment(1);
                    if conflicts > self.max_cas_retries {
                        // Fatal to the instance, not the process.
                        metrics::counter!("saga_cas_retries_exhausted_total").increment(1);
                        tracing::error!(
                            saga_id = %envelope.correlation_id,
                            conflicts,
                            error = %err,
                            "version-conflict retries exhausted; dead-lettering event"
                        );
                        self.dead_letter(delivery, format!("version-conflict retries exhausted: {err}"))
                            .await?;
                        return Ok(TransitionOutcome::DeadLettered);
                    }
                    tracing::debug!(
                        saga_id = %envelope.correlation_id,
                        conflicts,
                        "version conflict, reloading and retrying transition"
                    );
                }
                Err(TransitionError::Fatal(err)) => return Err(err),
            }
        }
    }

    /// One attempt at the transition: load, resolve, dedupe, execute,
    /// persist.
    async fn try_transition(
        &self,
        envelope: &EventEnvelope,
        marked: &mut Vec<IdempotencyKey>,
    ) -> std::result::Result<TransitionOutcome, TransitionError> {
        let saga_id = envelope.correlation_id;

        let instance = match self
            .store
            .load(saga_id)
            .await
            .map_err(TransitionError::from_store)?
        {
            Some(instance) => instance,
            None => {
                let Some(definition) = self.registry.initiating(&envelope.event_type) else {
                    return Ok(TransitionOutcome::NoMatchingStep);
                };
                match self.store.create(saga_id, &definition.saga_type).await {
                    Ok(instance) => {
                        tracing::info!(
                            %saga_id,
                            saga_type = %definition.saga_type,
                            "saga instance created"
                        );
                        instance
                    }
                    // Lost the creation race; the reload on retry sees the
                    // winner's row.
                    Err(err @ StoreError::AlreadyExists(_)) => {
                        return Err(TransitionError::Conflict(err));
                    }
                    Err(other) => return Err(TransitionError::from_store(other)),
                }
            }
        };

        if instance.status().is_terminal() {
            return Ok(TransitionOutcome::Ignored);
        }

        let Some(definition) = self.registry.resolve(
            instance.saga_type(),
            &envelope.event_type,
            instance.current_step(),
        ) else {
            return Ok(TransitionOutcome::NoMatchingStep);
        };

        let key = IdempotencyKey::new(saga_id, &definition.step_name, envelope.event_id);
        if !marked.contains(&key) {
            match self.idempotency.check_and_mark(key.clone()).await {
                Freshness::Duplicate => {
                    metrics::counter!("saga_duplicate_events_total").increment(1);
                    tracing::debug!(%saga_id, step = %definition.step_name, "duplicate delivery");
                    return Ok(TransitionOutcome::Duplicate);
                }
                // Remember the mark: a conflict retry of this same delivery
                // must not mistake its own mark for a duplicate.
                Freshness::Fresh => marked.push(key),
            }
        }

        match definition.kind {
            StepKind::Forward => {
                if !instance.status().can_advance() {
                    return Ok(TransitionOutcome::Ignored);
                }
                self.apply_forward(instance, definition, envelope).await
            }
            StepKind::Failure => {
                let reason = failure_reason(definition, envelope);
                self.apply_compensation(instance, &definition.step_name, reason, false, envelope)
                    .await
            }
            StepKind::Abort => {
                let reason = failure_reason(definition, envelope);
                self.apply_compensation(instance, &definition.step_name, reason, true, envelope)
                    .await
            }
        }
    }

    /// Applies a forward step: dispatch the action, record completion,
    /// persist.
    async fn apply_forward(
        &self,
        mut instance: SagaInstance,
        definition: &StepDefinition,
        envelope: &EventEnvelope,
    ) -> std::result::Result<TransitionOutcome, TransitionError> {
        let saga_id = instance.saga_id();

        if let Some(action) = &definition.action
            && let Err(err) = self.publish_command(action, envelope).await
        {
            // ActionDispatchFailure: the forward command could not be
            // handed to the bus, so the saga rolls back.
            metrics::counter!("saga_action_dispatch_failures_total").increment(1);
            tracing::warn!(
                %saga_id,
                step = %definition.step_name,
                error = %err,
                "action dispatch failed, compensating"
            );
            let reason = format!("action '{}' dispatch failed: {err}", action.event_type);
            return self
                .apply_compensation(instance, &definition.step_name, reason, false, envelope)
                .await;
        }

        let expected = instance.version();
        instance.record_step_completed(
            &definition.step_name,
            definition
                .compensation
                .as_ref()
                .map(|compensation| {
                    CompensationCommand::new(&compensation.routing_key, &compensation.event_type)
                }),
        );
        if definition.is_terminal {
            instance.complete();
        }

        let new_version = self.cas(&instance, expected).await?;
        instance.set_version(new_version);

        self.deadlines.disarm(saga_id);
        if definition.is_terminal {
            metrics::counter!("saga_completed_total").increment(1);
            tracing::info!(%saga_id, step = %definition.step_name, "saga completed");
            Ok(TransitionOutcome::Completed {
                step: definition.step_name.clone(),
            })
        } else {
            if let Some(timeout) = definition.timeout {
                self.deadlines.arm(saga_id, &definition.step_name, timeout);
            }
            tracing::info!(%saga_id, step = %definition.step_name, "saga advanced");
            Ok(TransitionOutcome::Advanced {
                step: definition.step_name.clone(),
            })
        }
    }

    /// Rolls the saga back: record the failure, persist `Compensating`,
    /// walk completed steps in reverse publishing their compensation
    /// commands, persist the terminal status.
    async fn apply_compensation(
        &self,
        mut instance: SagaInstance,
        failed_step: &str,
        reason: String,
        aborting: bool,
        envelope: &EventEnvelope,
    ) -> std::result::Result<TransitionOutcome, TransitionError> {
        let saga_id = instance.saga_id();
        self.deadlines.disarm(saga_id);

        let mut expected = instance.version();
        if instance.status().can_compensate() {
            instance.record_step_failed(failed_step, &reason);
            instance.begin_compensation();
            expected = self.cas(&instance, expected).await?;
            instance.set_version(expected);
        }
        // Already Compensating: an interrupted walk is being resumed; the
        // failure record is in place and compensated steps are skipped
        // below.

        for (step_name, command) in instance.compensatable_steps() {
            match self
                .publish_command(&CommandSpec::new(&command.routing_key, &command.event_type), envelope)
                .await
            {
                Ok(()) => {
                    metrics::counter!("saga_compensations_published_total").increment(1);
                    tracing::info!(%saga_id, step = %step_name, command = %command.event_type, "compensation published");
                    instance.record_step_compensated(&step_name);
                }
                Err(err) => {
                    // The walk keeps going; redelivery of this message is
                    // the retry mechanism for the skipped compensation.
                    tracing::warn!(%saga_id, step = %step_name, error = %err, "compensation publish failed");
                    instance.record_step_failed(
                        &step_name,
                        format!("compensation publish failed: {err}"),
                    );
                }
            }
        }

        if aborting {
            instance.abort(&reason);
        } else {
            instance.fail(&reason);
        }

        let new_version = self.cas(&instance, expected).await?;
        instance.set_version(new_version);

        if aborting {
            metrics::counter!("saga_aborted_total").increment(1);
            tracing::warn!(%saga_id, %reason, "saga aborted");
            Ok(TransitionOutcome::Aborted)
        } else {
            metrics::counter!("saga_failed_total").increment(1);
            tracing::warn!(%saga_id, %reason, "saga failed");
            Ok(TransitionOutcome::Failed)
        }
    }

    /// Publishes an outbound command correlated to the triggering event.
    async fn publish_command(
        &self,
        command: &CommandSpec,
        cause: &EventEnvelope,
    ) -> Result<()> {
        // Commands carry the triggering payload so downstream services get
        // the business context without a lookup.
        let outbound = EventEnvelope::builder()
            .event_type(command.event_type.as_str())
            .correlation_id(cause.correlation_id)
            .causation_id(cause.event_id)
            .payload_raw(cause.payload.clone())
            .build();

        let bytes = self.codec.encode(&outbound)?;
        self.bus.publish(&command.routing_key, bytes).await?;
        tracing::debug!(
            saga_id = %cause.correlation_id,
            command = %command.event_type,
            routing_key = %command.routing_key,
            "command published"
        );
        Ok(())
    }

    async fn cas(
        &self,
        instance: &SagaInstance,
        expected: Version,
    ) -> std::result::Result<Version, TransitionError> {
        self.store
            .compare_and_swap(instance, expected)
            .await
            .map_err(TransitionError::from_store)
    }

    /// Handles every armed deadline that has expired, treating each as an
    /// action failure for its step.
    pub async fn sweep_deadlines(&self) {
        for (saga_id, step_name) in self.deadlines.take_expired() {
            metrics::counter!("saga_step_timeouts_total").increment(1);
            if let Err(err) = self.expire_step(saga_id, &step_name).await {
                tracing::error!(
                    %saga_id,
                    step = %step_name,
                    error = %err,
                    "deadline expiry handling failed"
                );
            }
        }
    }

    /// Fails a saga whose current step missed its completion deadline.
    async fn expire_step(&self, saga_id: SagaId, step_name: &str) -> Result<()> {
        let reason = format!("step '{step_name}' timed out awaiting completion");
        // Timeout expiry has no inbound message; synthesize the envelope the
        // compensation commands will be correlated to.
        let envelope = EventEnvelope::builder()
            .event_type("saga.step.timed-out")
            .correlation_id(saga_id)
            .payload_raw(serde_json::json!({ "step": step_name }))
            .build();

        let mut conflicts = 0u32;
        loop {
            let Some(instance) = self
                .store
                .load(saga_id)
                .await?
                .filter(|instance| {
                    !instance.status().is_terminal()
                        && instance.current_step() == Some(step_name)
                })
            else {
                // A real completion or failure event won the race.
                return Ok(());
            };

            match self
                .apply_compensation(instance, step_name, reason.clone(), false, &envelope)
                .await
            {
                Ok(outcome) => {
                    tracing::warn!(%saga_id, step = %step_name, outcome = outcome.as_str(), "step deadline expired");
                    return Ok(());
                }
                Err(TransitionError::Conflict(_)) if conflicts < self.max_cas_retries => {
                    conflicts += 1;
                }
                Err(TransitionError::Conflict(err)) => {
                    tracing::error!(%saga_id, error = %err, "timeout handling lost every retry");
                    return Ok(());
                }
                Err(TransitionError::Fatal(err)) => return Err(err),
            }
        }
    }

    /// Runs the deadline monitor until shutdown is signalled.
    pub async fn run_deadline_monitor(&self, tick: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(tick);
        loop {
            tokio::select! {
                _ = interval.tick() => self.sweep_deadlines().await,
                _ = shutdown.changed() => {
                    tracing::info!("deadline monitor shutting down");
                    break;
                }
            }
        }
    }
}

/// Builds a human-readable failure reason from a rejection event.
fn failure_reason(definition: &StepDefinition, envelope: &EventEnvelope) -> String {
    match envelope.payload.get("reason").and_then(|value| value.as_str()) {
        Some(reason) => format!("{}: {reason}", definition.on_event),
        None => format!("{} received", definition.on_event),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_names_are_stable() {
        assert_eq!(
            TransitionOutcome::Advanced {
                step: "AwaitPayment".into()
            }
            .as_str(),
            "advanced"
        );
        assert_eq!(TransitionOutcome::Failed.as_str(), "failed");
        assert_eq!(TransitionOutcome::Duplicate.as_str(), "duplicate");
        assert_eq!(TransitionOutcome::NoMatchingStep.as_str(), "no_matching_step");
    }

    #[test]
    fn failure_reason_prefers_payload_reason() {
        let definition = StepDefinition::failure(
            "OrderFulfillment",
            "fulfillment.failed",
            "AwaitFulfillment",
            "FulfillmentFailed",
        );
        let envelope = EventEnvelope::builder()
            .event_type("fulfillment.failed")
            .correlation_id(SagaId::new())
            .payload_raw(serde_json::json!({"reason": "carrier unavailable"}))
            .build();

        assert_eq!(
            failure_reason(&definition, &envelope),
            "fulfillment.failed: carrier unavailable"
        );

        let bare = EventEnvelope::builder()
            .event_type("fulfillment.failed")
            .correlation_id(SagaId::new())
            .payload_raw(serde_json::json!({}))
            .build();
        assert_eq!(failure_reason(&definition, &bare), "fulfillment.failed received");
    }
}
