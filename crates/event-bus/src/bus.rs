use std::pin::Pin;

use async_trait::async_trait;
use futures_core::Stream;

use crate::error::Result;
use crate::topic::TopicPattern;

/// A single message handed to a subscriber.
///
/// The body is opaque bytes; decoding belongs to the envelope codec, not the
/// transport.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Tag identifying this delivery for ack/nack. Unique per subscription.
    pub delivery_tag: u64,

    /// The routing key the message was published under.
    pub routing_key: String,

    /// The message body.
    pub body: Vec<u8>,

    /// Delivery attempt counter. 1 on first delivery; the bus raises it each
    /// time the message is redelivered after a nack.
    pub attempt: u32,
}

/// Core trait for event bus implementations.
///
/// Delivery semantics are at-least-once: a message is redelivered until a
/// subscriber acknowledges it. Ordering holds per routing key, not globally.
/// All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publishes a message to the given routing key.
    async fn publish(&self, routing_key: &str, body: Vec<u8>) -> Result<()>;

    /// Opens a subscription receiving every message whose routing key
    /// matches any of the given patterns.
    async fn subscribe(&self, patterns: &[TopicPattern]) -> Result<Box<dyn Subscription>>;
}

/// A consumer-side handle on a pattern subscription.
#[async_trait]
pub trait Subscription: Send {
    /// Receives the next delivery. Returns None when the bus is closed.
    async fn recv(&mut self) -> Option<Delivery>;

    /// Acknowledges a delivery. The message will not be redelivered.
    async fn ack(&mut self, delivery_tag: u64) -> Result<()>;

    /// Negatively acknowledges a delivery. The message is requeued and
    /// redelivered with its attempt counter raised.
    async fn nack(&mut self, delivery_tag: u64) -> Result<()>;
}

/// A stream of deliveries.
pub type DeliveryStream = Pin<Box<dyn Stream<Item = Delivery> + Send>>;

/// Adapts a subscription into a [`DeliveryStream`].
///
/// Each delivery is acknowledged as it is yielded; use the subscription
/// directly when explicit ack/nack control is needed.
pub fn into_stream(subscription: Box<dyn Subscription>) -> DeliveryStream {
    Box::pin(futures_util::stream::unfold(
        subscription,
        |mut subscription| async move {
            let delivery = subscription.recv().await?;
            // Auto-ack; errors only occur on a closed bus, where the stream
            // ends on the next recv anyway.
            let _ = subscription.ack(delivery.delivery_tag).await;
            Some((delivery, subscription))
        },
    ))
}
