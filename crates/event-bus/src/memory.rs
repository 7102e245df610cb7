use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

use crate::bus::{Delivery, EventBus, Subscription};
use crate::error::{BusError, Result};
use crate::topic::TopicPattern;

struct SubscriberEntry {
    patterns: Vec<TopicPattern>,
    tx: UnboundedSender<Delivery>,
}

#[derive(Default)]
struct Inner {
    subscribers: Vec<SubscriberEntry>,
}

/// In-memory event bus implementation for tests and local runs.
///
/// Mirrors broker semantics the coordinator depends on: topic-pattern
/// routing, per-routing-key ordering, and at-least-once delivery: a nacked
/// message is requeued on the same subscription with its attempt counter
/// raised.
#[derive(Clone, Default)]
pub struct InMemoryEventBus {
    inner: Arc<RwLock<Inner>>,
    next_tag: Arc<AtomicU64>,
    published: Arc<AtomicU64>,
}

impl InMemoryEventBus {
    /// Creates a new empty in-memory bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of messages published so far.
    pub fn published_count(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl EventBus for InMemoryEventBus {
    async fn publish(&self, routing_key: &str, body: Vec<u8>) -> Result<()> {
        let inner = self.inner.read().await;
        self.published.fetch_add(1, Ordering::Relaxed);

        for subscriber in inner
            .subscribers
            .iter()
            .filter(|s| s.patterns.iter().any(|p| p.matches(routing_key)))
        {
            let delivery = Delivery {
                delivery_tag: self.next_tag.fetch_add(1, Ordering::Relaxed),
                routing_key: routing_key.to_string(),
                body: body.clone(),
                attempt: 1,
            };
            // A dropped subscription simply stops receiving; publishing to
            // the remaining subscribers is not an error.
            let _ = subscriber.tx.send(delivery);
        }

        Ok(())
    }

    async fn subscribe(&self, patterns: &[TopicPattern]) -> Result<Box<dyn Subscription>> {
        let (tx, rx) = unbounded_channel();
        let mut inner = self.inner.write().await;
        inner.subscribers.push(SubscriberEntry {
            patterns: patterns.to_vec(),
            tx: tx.clone(),
        });

        Ok(Box::new(InMemorySubscription {
            rx,
            requeue_tx: tx,
            unacked: HashMap::new(),
        }))
    }
}

/// Subscription handle produced by [`InMemoryEventBus`].
pub struct InMemorySubscription {
    rx: UnboundedReceiver<Delivery>,
    requeue_tx: UnboundedSender<Delivery>,
    unacked: HashMap<u64, Delivery>,
}

impl InMemorySubscription {
    /// Returns the number of deliveries received but not yet acked or
    /// nacked.
    pub fn unacked_count(&self) -> usize {
        self.unacked.len()
    }
}

#[async_trait]
impl Subscription for InMemorySubscription {
    async fn recv(&mut self) -> Option<Delivery> {
        let delivery = self.rx.recv().await?;
        self.unacked.insert(delivery.delivery_tag, delivery.clone());
        Some(delivery)
    }

    async fn ack(&mut self, delivery_tag: u64) -> Result<()> {
        self.unacked
            .remove(&delivery_tag)
            .map(|_| ())
            .ok_or(BusError::UnknownDeliveryTag(delivery_tag))
    }

    async fn nack(&mut self, delivery_tag: u64) -> Result<()> {
        let mut delivery = self
            .unacked
            .remove(&delivery_tag)
            .ok_or(BusError::UnknownDeliveryTag(delivery_tag))?;

        delivery.attempt += 1;
        tracing::debug!(
            routing_key = %delivery.routing_key,
            attempt = delivery.attempt,
            "requeueing nacked delivery"
        );
        self.requeue_tx
            .send(delivery)
            .map_err(|_| BusError::Closed)
    }
}
