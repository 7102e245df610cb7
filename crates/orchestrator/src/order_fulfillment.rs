//! The order fulfillment saga definition.
//!
//! Choreography: the payment and fulfillment services react to the commands
//! published here and answer with completion or failure events carrying the
//! same correlation id.
//!
//! ```text
//! order.created ──► AwaitPayment ──(payment.authorized)──► AwaitFulfillment
//!     │                 │                                      │
//!     │         payment.rejected                     fulfillment.completed ──► Delivered
//!     │                 │                                      │
//!     └── order.cancel.requested              fulfillment.failed ──► refund walk
//! ```

use std::time::Duration;

use envelope::{EnvelopeCodec, PayloadSchema};

use crate::error::ConfigurationError;
use crate::registry::{CommandSpec, StepDefinition, StepRegistry};

/// The saga type identifier for order fulfillment.
pub const SAGA_TYPE: &str = "OrderFulfillment";

/// Event: a new order was placed. Initiates the saga.
pub const EVENT_ORDER_CREATED: &str = "order.created";
/// Event: the payment service authorized the charge.
pub const EVENT_PAYMENT_AUTHORIZED: &str = "payment.authorized";
/// Event: the payment service rejected the charge.
pub const EVENT_PAYMENT_REJECTED: &str = "payment.rejected";
/// Event: the fulfillment service shipped the order.
pub const EVENT_FULFILLMENT_COMPLETED: &str = "fulfillment.completed";
/// Event: the fulfillment service could not ship the order.
pub const EVENT_FULFILLMENT_FAILED: &str = "fulfillment.failed";
/// Event: an explicit cancellation request for the order.
pub const EVENT_CANCEL_REQUESTED: &str = "order.cancel.requested";

/// Command published to charge the customer.
pub const COMMAND_AUTHORIZE_PAYMENT: &str = "payment.authorize";
/// Command published to ship the order.
pub const COMMAND_REQUEST_FULFILLMENT: &str = "fulfillment.request";
/// Compensation command reversing a charge.
pub const COMMAND_REFUND_PAYMENT: &str = "payment.refund";

/// Step name: awaiting payment authorization.
pub const STEP_AWAIT_PAYMENT: &str = "AwaitPayment";
/// Step name: awaiting fulfillment.
pub const STEP_AWAIT_FULFILLMENT: &str = "AwaitFulfillment";
/// Step name: terminal, the order is delivered.
pub const STEP_DELIVERED: &str = "Delivered";
/// Step name recorded when payment is rejected.
pub const STEP_PAYMENT_REJECTED: &str = "PaymentRejected";
/// Step name recorded when fulfillment fails.
pub const STEP_FULFILLMENT_FAILED: &str = "FulfillmentFailed";
/// Step name recorded when the order is cancelled on request.
pub const STEP_CANCEL_REQUESTED: &str = "CancelRequested";

/// Builds the order fulfillment step definitions.
///
/// `step_timeout` caps how long the saga waits for each step's completion
/// signal; expiry triggers compensation.
pub fn step_definitions(step_timeout: Option<Duration>) -> Vec<StepDefinition> {
    let mut await_payment =
        StepDefinition::forward(SAGA_TYPE, EVENT_ORDER_CREATED, STEP_AWAIT_PAYMENT)
            .with_action(CommandSpec::topic(COMMAND_AUTHORIZE_PAYMENT));
    let mut await_fulfillment =
        StepDefinition::forward(SAGA_TYPE, EVENT_PAYMENT_AUTHORIZED, STEP_AWAIT_FULFILLMENT)
            .requires(STEP_AWAIT_PAYMENT)
            .with_action(CommandSpec::topic(COMMAND_REQUEST_FULFILLMENT))
            .with_compensation(CommandSpec::topic(COMMAND_REFUND_PAYMENT));

    if let Some(timeout) = step_timeout {
        await_payment = await_payment.with_timeout(timeout);
        await_fulfillment = await_fulfillment.with_timeout(timeout);
    }

    vec![
        await_payment,
        await_fulfillment,
        StepDefinition::forward(SAGA_TYPE, EVENT_FULFILLMENT_COMPLETED, STEP_DELIVERED)
            .requires(STEP_AWAIT_FULFILLMENT)
            .terminal(),
        StepDefinition::failure(
            SAGA_TYPE,
            EVENT_PAYMENT_REJECTED,
            STEP_AWAIT_PAYMENT,
            STEP_PAYMENT_REJECTED,
        ),
        StepDefinition::failure(
            SAGA_TYPE,
            EVENT_FULFILLMENT_FAILED,
            STEP_AWAIT_FULFILLMENT,
            STEP_FULFILLMENT_FAILED,
        ),
        StepDefinition::abort(
            SAGA_TYPE,
            EVENT_CANCEL_REQUESTED,
            STEP_AWAIT_PAYMENT,
            STEP_CANCEL_REQUESTED,
        ),
        StepDefinition::abort(
            SAGA_TYPE,
            EVENT_CANCEL_REQUESTED,
            STEP_AWAIT_FULFILLMENT,
            STEP_CANCEL_REQUESTED,
        ),
    ]
}

/// Builds the validated step registry for order fulfillment.
pub fn registry(step_timeout: Option<Duration>) -> Result<StepRegistry, ConfigurationError> {
    StepRegistry::build(step_definitions(step_timeout))
}

/// Builds the envelope codec with this saga's payload schemas.
pub fn codec() -> EnvelopeCodec {
    EnvelopeCodec::new()
        .with_payload_schema(EVENT_ORDER_CREATED, PayloadSchema::required(&["order_id"]))
        .with_payload_schema(
            EVENT_PAYMENT_AUTHORIZED,
            PayloadSchema::required(&["order_id", "payment_id"]),
        )
        .with_payload_schema(
            EVENT_PAYMENT_REJECTED,
            PayloadSchema::required(&["order_id"]),
        )
        .with_payload_schema(
            EVENT_FULFILLMENT_COMPLETED,
            PayloadSchema::required(&["order_id"]),
        )
        .with_payload_schema(
            EVENT_FULFILLMENT_FAILED,
            PayloadSchema::required(&["order_id"]),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_builds_without_ambiguity() {
        let registry = registry(None).unwrap();
        assert_eq!(registry.len(), 7);
    }

    #[test]
    fn order_created_initiates() {
        let registry = registry(None).unwrap();
        let definition = registry.initiating(EVENT_ORDER_CREATED).unwrap();
        assert_eq!(definition.step_name, STEP_AWAIT_PAYMENT);
        assert_eq!(
            definition.action.as_ref().unwrap().event_type,
            COMMAND_AUTHORIZE_PAYMENT
        );
    }

    #[test]
    fn payment_authorized_advances_from_await_payment_only() {
        let registry = registry(None).unwrap();

        let definition = registry
            .resolve(SAGA_TYPE, EVENT_PAYMENT_AUTHORIZED, Some(STEP_AWAIT_PAYMENT))
            .unwrap();
        assert_eq!(definition.step_name, STEP_AWAIT_FULFILLMENT);
        assert_eq!(
            definition.compensation.as_ref().unwrap().event_type,
            COMMAND_REFUND_PAYMENT
        );

        assert!(
            registry
                .resolve(SAGA_TYPE, EVENT_PAYMENT_AUTHORIZED, Some(STEP_AWAIT_FULFILLMENT))
                .is_none()
        );
    }

    #[test]
    fn fulfillment_completed_is_terminal() {
        let registry = registry(None).unwrap();
        let definition = registry
            .resolve(
                SAGA_TYPE,
                EVENT_FULFILLMENT_COMPLETED,
                Some(STEP_AWAIT_FULFILLMENT),
            )
            .unwrap();
        assert!(definition.is_terminal);
    }

    #[test]
    fn cancel_is_valid_at_both_waiting_steps() {
        let registry = registry(None).unwrap();
        assert!(
            registry
                .resolve(SAGA_TYPE, EVENT_CANCEL_REQUESTED, Some(STEP_AWAIT_PAYMENT))
                .is_some()
        );
        assert!(
            registry
                .resolve(SAGA_TYPE, EVENT_CANCEL_REQUESTED, Some(STEP_AWAIT_FULFILLMENT))
                .is_some()
        );
        assert!(
            registry
                .resolve(SAGA_TYPE, EVENT_CANCEL_REQUESTED, Some(STEP_DELIVERED))
                .is_none()
        );
    }

    #[test]
    fn timeouts_apply_to_waiting_steps() {
        let timeout = Duration::from_secs(30);
        let definitions = step_definitions(Some(timeout));

        let await_payment = definitions
            .iter()
            .find(|definition| definition.step_name == STEP_AWAIT_PAYMENT)
            .unwrap();
        assert_eq!(await_payment.timeout, Some(timeout));

        let delivered = definitions
            .iter()
            .find(|definition| definition.step_name == STEP_DELIVERED)
            .unwrap();
        assert!(delivered.timeout.is_none());
    }

    #[test]
    fn codec_enforces_order_created_payload() {
        use common::SagaId;
        use envelope::EventEnvelope;

        let codec = codec();
        let good = EventEnvelope::builder()
            .event_type(EVENT_ORDER_CREATED)
            .correlation_id(SagaId::new())
            .payload_raw(serde_json::json!({"order_id": "42"}))
            .build();
        assert!(codec.decode(&codec.encode(&good).unwrap()).is_ok());

        let bad = EventEnvelope::builder()
            .event_type(EVENT_ORDER_CREATED)
            .correlation_id(SagaId::new())
            .payload_raw(serde_json::json!({}))
            .build();
        assert!(codec.decode(&codec.encode(&bad).unwrap()).is_err());
    }
}
