//! The worker receive loop.
//!
//! A blocking receive-loop per worker task with explicit acknowledgment, in
//! place of broker-callback reentrancy. Any number of workers may run
//! concurrently; they coordinate only through the saga store's
//! compare-and-swap.

use std::sync::Arc;

use event_bus::{DeadLetterSink, Delivery, EventBus, Subscription, TopicPattern};
use saga_store::SagaStore;
use tokio::sync::watch;

use crate::error::Result;
use crate::idempotency::IdempotencyStore;
use crate::orchestrator::Orchestrator;

/// Consumes deliveries from the bus and drives them through the
/// orchestrator.
pub struct Worker<S, B, D, I>
where
    S: SagaStore,
    B: EventBus,
    D: DeadLetterSink,
    I: IdempotencyStore,
{
    orchestrator: Arc<Orchestrator<S, B, D, I>>,
    bus: B,
    max_delivery_attempts: u32,
}

impl<S, B, D, I> Worker<S, B, D, I>
where
    S: SagaStore,
    B: EventBus,
    D: DeadLetterSink,
    I: IdempotencyStore,
{
    /// Creates a worker consuming from the given bus.
    pub fn new(orchestrator: Arc<Orchestrator<S, B, D, I>>, bus: B) -> Self {
        Self {
            orchestrator,
            bus,
            max_delivery_attempts: 10,
        }
    }

    /// Sets how many delivery attempts a message gets before it is
    /// dead-lettered.
    pub fn with_max_delivery_attempts(mut self, max_delivery_attempts: u32) -> Self {
        self.max_delivery_attempts = max_delivery_attempts;
        self
    }

    /// Runs the receive loop until shutdown is signalled or the bus closes.
    ///
    /// Subscribes to every event type the registry reacts to. Each delivery
    /// is acknowledged only after its transition persisted; transient
    /// failures nack so the bus redelivers with a raised attempt counter.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let patterns: Vec<TopicPattern> = self
            .orchestrator
            .registry()
            .topics()
            .iter()
            .map(|topic| TopicPattern::new(topic.as_str()))
            .collect();

        let mut subscription = self.bus.subscribe(&patterns).await?;
        tracing::info!(topics = patterns.len(), "worker subscribed");

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    tracing::info!("worker shutting down");
                    break;
                }
                maybe = subscription.recv() => {
                    let Some(delivery) = maybe else {
                        tracing::info!("bus closed, worker stopping");
                        break;
                    };
                    self.dispatch(subscription.as_mut(), delivery).await?;
                }
            }
        }

        Ok(())
    }

    /// Disposes of one delivery: ack on success or a contained error, nack
    /// for redelivery on transient trouble, dead-letter when the attempt
    /// budget is spent.
    async fn dispatch(
        &self,
        subscription: &mut dyn Subscription,
        delivery: Delivery,
    ) -> Result<()> {
        match self.orchestrator.handle_delivery(&delivery).await {
            Ok(outcome) => {
                tracing::debug!(
                    routing_key = %delivery.routing_key,
                    outcome = outcome.as_str(),
                    "delivery processed"
                );
                subscription.ack(delivery.delivery_tag).await?;
            }
            Err(err) => {
                tracing::error!(
                    routing_key = %delivery.routing_key,
                    attempt = delivery.attempt,
                    error = %err,
                    "transition failed"
                );
                if delivery.attempt >= self.max_delivery_attempts {
                    self.orchestrator
                        .dead_letter(&delivery, format!("delivery attempts exhausted: {err}"))
                        .await?;
                    subscription.ack(delivery.delivery_tag).await?;
                } else {
                    subscription.nack(delivery.delivery_tag).await?;
                }
            }
        }
        Ok(())
    }
}
