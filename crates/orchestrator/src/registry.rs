//! Declarative mapping from incoming events to saga step transitions.

use std::collections::HashMap;
use std::time::Duration;

use crate::error::ConfigurationError;

/// An outbound command published to the bus as part of a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// Routing key the command is published under.
    pub routing_key: String,
    /// Event type of the command envelope.
    pub event_type: String,
}

impl CommandSpec {
    /// Creates a command spec with distinct routing key and event type.
    pub fn new(routing_key: impl Into<String>, event_type: impl Into<String>) -> Self {
        Self {
            routing_key: routing_key.into(),
            event_type: event_type.into(),
        }
    }

    /// Creates a command spec whose routing key equals its event type, the
    /// common case on a topic exchange.
    pub fn topic(event_type: impl Into<String>) -> Self {
        let event_type = event_type.into();
        Self {
            routing_key: event_type.clone(),
            event_type,
        }
    }
}

/// What an incoming event means for the saga it matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    /// A forward step: execute the action and advance.
    Forward,
    /// A downstream rejection: roll back completed steps and fail.
    Failure,
    /// An explicit abort request: roll back completed steps and abort.
    Abort,
}

/// One entry in the step registry: static configuration loaded at startup,
/// never mutated at runtime.
#[derive(Debug, Clone)]
pub struct StepDefinition {
    /// The saga type this definition belongs to.
    pub saga_type: String,
    /// The event type that triggers this definition.
    pub on_event: String,
    /// The step the saga must currently be at for this definition to apply.
    /// `None` marks a saga-initiating definition.
    pub requires_step: Option<String>,
    /// The step name recorded when this definition applies.
    pub step_name: String,
    /// What the event means for the saga.
    pub kind: StepKind,
    /// Forward command to publish when the step applies.
    pub action: Option<CommandSpec>,
    /// Command to publish when this step is rolled back.
    pub compensation: Option<CommandSpec>,
    /// Whether completing this step completes the saga.
    pub is_terminal: bool,
    /// Deadline for the step's completion signal; expiry is treated as an
    /// action failure.
    pub timeout: Option<Duration>,
}

impl StepDefinition {
    /// Creates a saga-initiating forward step. Chain [`Self::requires`] to
    /// turn it into a mid-saga step.
    pub fn forward(
        saga_type: impl Into<String>,
        on_event: impl Into<String>,
        step_name: impl Into<String>,
    ) -> Self {
        Self {
            saga_type: saga_type.into(),
            on_event: on_event.into(),
            requires_step: None,
            step_name: step_name.into(),
            kind: StepKind::Forward,
            action: None,
            compensation: None,
            is_terminal: false,
            timeout: None,
        }
    }

    /// Creates a failure step: the event signals a downstream rejection at
    /// the given step.
    pub fn failure(
        saga_type: impl Into<String>,
        on_event: impl Into<String>,
        requires_step: impl Into<String>,
        step_name: impl Into<String>,
    ) -> Self {
        Self {
            saga_type: saga_type.into(),
            on_event: on_event.into(),
            requires_step: Some(requires_step.into()),
            step_name: step_name.into(),
            kind: StepKind::Failure,
            action: None,
            compensation: None,
            is_terminal: false,
            timeout: None,
        }
    }

    /// Creates an abort step: the event is an explicit cancellation request
    /// valid at the given step.
    pub fn abort(
        saga_type: impl Into<String>,
        on_event: impl Into<String>,
        requires_step: impl Into<String>,
        step_name: impl Into<String>,
    ) -> Self {
        Self {
            saga_type: saga_type.into(),
            on_event: on_event.into(),
            requires_step: Some(requires_step.into()),
            step_name: step_name.into(),
            kind: StepKind::Abort,
            action: None,
            compensation: None,
            is_terminal: false,
            timeout: None,
        }
    }

    /// Restricts this definition to a current step.
    pub fn requires(mut self, step: impl Into<String>) -> Self {
        self.requires_step = Some(step.into());
        self
    }

    /// Sets the forward command to publish.
    pub fn with_action(mut self, action: CommandSpec) -> Self {
        self.action = Some(action);
        self
    }

    /// Sets the compensation command for rollback.
    pub fn with_compensation(mut self, compensation: CommandSpec) -> Self {
        self.compensation = Some(compensation);
        self
    }

    /// Marks this step as completing the saga.
    pub fn terminal(mut self) -> Self {
        self.is_terminal = true;
        self
    }

    /// Sets the completion deadline for this step.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Returns true if this definition starts a new saga instance.
    pub fn is_initiating(&self) -> bool {
        self.requires_step.is_none()
    }
}

type StepKey = (String, String, Option<String>);

/// Read-only lookup from `(saga_type, event_type, current_step)` to the
/// matching step definition.
///
/// Built once at process start and shared immutably afterwards. An
/// ambiguous configuration (two definitions claiming the same composite
/// key, or two saga types initiating on the same event) is rejected at
/// build time, never discovered at runtime.
#[derive(Debug)]
pub struct StepRegistry {
    steps: HashMap<StepKey, StepDefinition>,
    initiating: HashMap<String, StepKey>,
}

impl StepRegistry {
    /// Builds a registry from step definitions, validating the
    /// configuration.
    pub fn build(definitions: Vec<StepDefinition>) -> Result<Self, ConfigurationError> {
        if definitions.is_empty() {
            return Err(ConfigurationError::Empty);
        }

        let mut steps: HashMap<StepKey, StepDefinition> = HashMap::new();
        let mut initiating: HashMap<String, StepKey> = HashMap::new();

        for definition in definitions {
            if definition.is_initiating() {
                if definition.kind != StepKind::Forward {
                    return Err(ConfigurationError::NonForwardInitiator {
                        saga_type: definition.saga_type.clone(),
                        on_event: definition.on_event.clone(),
                    });
                }
                if let Some(existing) = initiating.get(&definition.on_event) {
                    return Err(ConfigurationError::AmbiguousInitiator {
                        on_event: definition.on_event.clone(),
                        first: existing.0.clone(),
                        second: definition.saga_type.clone(),
                    });
                }
            }

            let key = (
                definition.saga_type.clone(),
                definition.on_event.clone(),
                definition.requires_step.clone(),
            );
            if steps.contains_key(&key) {
                return Err(ConfigurationError::AmbiguousStep {
                    saga_type: key.0,
                    on_event: key.1,
                    requires_step: key.2,
                });
            }

            if definition.is_initiating() {
                initiating.insert(definition.on_event.clone(), key.clone());
            }
            steps.insert(key, definition);
        }

        Ok(Self { steps, initiating })
    }

    /// Resolves the definition for an event arriving at a saga's current
    /// step.
    ///
    /// `None` means the event is irrelevant to this saga at this step, a
    /// normal outcome, acknowledged and dropped by the caller.
    pub fn resolve(
        &self,
        saga_type: &str,
        event_type: &str,
        current_step: Option<&str>,
    ) -> Option<&StepDefinition> {
        let key = (
            saga_type.to_string(),
            event_type.to_string(),
            current_step.map(String::from),
        );
        self.steps.get(&key)
    }

    /// Returns the saga-initiating definition for an event type, if one is
    /// registered.
    pub fn initiating(&self, event_type: &str) -> Option<&StepDefinition> {
        self.initiating
            .get(event_type)
            .and_then(|key| self.steps.get(key))
    }

    /// Returns the distinct event types this registry reacts to: the
    /// subscription topics a worker needs.
    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self
            .steps
            .values()
            .map(|definition| definition.on_event.clone())
            .collect();
        topics.sort();
        topics.dedup();
        topics
    }

    /// Returns the number of registered definitions.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Returns true if no definitions are registered.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_definitions() -> Vec<StepDefinition> {
        vec![
            StepDefinition::forward("OrderFulfillment", "order.created", "AwaitPayment")
                .with_action(CommandSpec::topic("payment.authorize")),
            StepDefinition::forward("OrderFulfillment", "payment.authorized", "AwaitFulfillment")
                .requires("AwaitPayment")
                .with_action(CommandSpec::topic("fulfillment.request"))
                .with_compensation(CommandSpec::topic("payment.refund")),
            StepDefinition::forward("OrderFulfillment", "fulfillment.completed", "Delivered")
                .requires("AwaitFulfillment")
                .terminal(),
            StepDefinition::failure(
                "OrderFulfillment",
                "fulfillment.failed",
                "AwaitFulfillment",
                "FulfillmentFailed",
            ),
        ]
    }

    #[test]
    fn build_accepts_valid_configuration() {
        let registry = StepRegistry::build(sample_definitions()).unwrap();
        assert_eq!(registry.len(), 4);
    }

    #[test]
    fn build_rejects_empty_configuration() {
        let result = StepRegistry::build(Vec::new());
        assert!(matches!(result, Err(ConfigurationError::Empty)));
    }

    #[test]
    fn build_rejects_duplicate_composite_key() {
        let mut definitions = sample_definitions();
        definitions.push(
            StepDefinition::forward("OrderFulfillment", "payment.authorized", "SomewhereElse")
                .requires("AwaitPayment"),
        );

        let result = StepRegistry::build(definitions);
        assert!(matches!(result, Err(ConfigurationError::AmbiguousStep { .. })));
    }

    #[test]
    fn build_rejects_two_initiators_for_one_event() {
        let definitions = vec![
            StepDefinition::forward("OrderFulfillment", "order.created", "AwaitPayment"),
            StepDefinition::forward("GiftWrapping", "order.created", "AwaitWrap"),
        ];

        let result = StepRegistry::build(definitions);
        assert!(matches!(
            result,
            Err(ConfigurationError::AmbiguousInitiator { .. })
        ));
    }

    #[test]
    fn build_rejects_non_forward_initiator() {
        let mut definition = StepDefinition::forward("OrderFulfillment", "order.created", "X");
        definition.kind = StepKind::Failure;

        let result = StepRegistry::build(vec![definition]);
        assert!(matches!(
            result,
            Err(ConfigurationError::NonForwardInitiator { .. })
        ));
    }

    #[test]
    fn resolve_matches_on_current_step() {
        let registry = StepRegistry::build(sample_definitions()).unwrap();

        let definition = registry
            .resolve("OrderFulfillment", "payment.authorized", Some("AwaitPayment"))
            .unwrap();
        assert_eq!(definition.step_name, "AwaitFulfillment");

        // Same event at the wrong step does not match
        assert!(
            registry
                .resolve("OrderFulfillment", "payment.authorized", Some("Delivered"))
                .is_none()
        );
        assert!(
            registry
                .resolve("OrderFulfillment", "payment.authorized", None)
                .is_none()
        );
    }

    #[test]
    fn resolve_unknown_event_returns_none() {
        let registry = StepRegistry::build(sample_definitions()).unwrap();
        assert!(
            registry
                .resolve("OrderFulfillment", "inventory.adjusted", Some("AwaitPayment"))
                .is_none()
        );
    }

    #[test]
    fn initiating_lookup() {
        let registry = StepRegistry::build(sample_definitions()).unwrap();

        let definition = registry.initiating("order.created").unwrap();
        assert_eq!(definition.step_name, "AwaitPayment");
        assert!(definition.is_initiating());

        assert!(registry.initiating("payment.authorized").is_none());
    }

    #[test]
    fn topics_are_distinct_and_sorted() {
        let registry = StepRegistry::build(sample_definitions()).unwrap();
        assert_eq!(
            registry.topics(),
            vec![
                "fulfillment.completed",
                "fulfillment.failed",
                "order.created",
                "payment.authorized",
            ]
        );
    }
}
