//! Deduplication of redelivered events.
//!
//! The bus delivers at least once; the guard makes step side effects happen
//! at most once. Records are ephemeral (the durable protection against
//! replays is the store's version check), so a TTL keeps the table from
//! growing without bound.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use common::{EventId, SagaId};

/// Identifies one execution of one step for one event occurrence.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdempotencyKey {
    /// The saga the step belongs to.
    pub saga_id: SagaId,
    /// The resolved step name.
    pub step_name: String,
    /// The triggering event occurrence.
    pub event_id: EventId,
}

impl IdempotencyKey {
    /// Creates a key.
    pub fn new(saga_id: SagaId, step_name: impl Into<String>, event_id: EventId) -> Self {
        Self {
            saga_id,
            step_name: step_name.into(),
            event_id,
        }
    }
}

/// Result of a check-and-mark.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// First sighting; the step may execute.
    Fresh,
    /// Already executed for this event; acknowledge without re-executing.
    Duplicate,
}

/// Atomic check-then-mark store.
///
/// The check and the mark are one operation so two concurrent deliveries of
/// the same redelivered message cannot both observe `Fresh`.
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Marks the key as seen, reporting whether it was already present.
    async fn check_and_mark(&self, key: IdempotencyKey) -> Freshness;
}

/// In-memory idempotency store with TTL-based expiry.
#[derive(Clone)]
pub struct InMemoryIdempotencyStore {
    seen: Arc<Mutex<HashMap<IdempotencyKey, Instant>>>,
    ttl: Duration,
}

impl InMemoryIdempotencyStore {
    /// Creates a store whose records expire after `ttl`.
    pub fn new(ttl: Duration) -> Self {
        Self {
            seen: Arc::new(Mutex::new(HashMap::new())),
            ttl,
        }
    }

    /// Removes expired records. Call periodically; correctness does not
    /// depend on it, only memory use.
    pub fn purge_expired(&self) {
        let ttl = self.ttl;
        self.seen
            .lock()
            .unwrap()
            .retain(|_, marked_at| marked_at.elapsed() < ttl);
    }

    /// Returns the number of live records.
    pub fn len(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    /// Returns true if no records are held.
    pub fn is_empty(&self) -> bool {
        self.seen.lock().unwrap().is_empty()
    }
}

impl Default for InMemoryIdempotencyStore {
    fn default() -> Self {
        // One hour covers any realistic redelivery window.
        Self::new(Duration::from_secs(3600))
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryIdempotencyStore {
    async fn check_and_mark(&self, key: IdempotencyKey) -> Freshness {
        let mut seen = self.seen.lock().unwrap();
        match seen.get(&key) {
            Some(marked_at) if marked_at.elapsed() < self.ttl => Freshness::Duplicate,
            _ => {
                seen.insert(key, Instant::now());
                Freshness::Fresh
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> IdempotencyKey {
        IdempotencyKey::new(SagaId::new(), "AwaitPayment", EventId::new())
    }

    #[tokio::test]
    async fn first_sighting_is_fresh_second_is_duplicate() {
        let store = InMemoryIdempotencyStore::default();
        let key = key();

        assert_eq!(store.check_and_mark(key.clone()).await, Freshness::Fresh);
        assert_eq!(store.check_and_mark(key).await, Freshness::Duplicate);
    }

    #[tokio::test]
    async fn distinct_keys_are_independent() {
        let store = InMemoryIdempotencyStore::default();
        let saga_id = SagaId::new();
        let event_id = EventId::new();

        let a = IdempotencyKey::new(saga_id, "StepA", event_id);
        let b = IdempotencyKey::new(saga_id, "StepB", event_id);
        let c = IdempotencyKey::new(saga_id, "StepA", EventId::new());

        assert_eq!(store.check_and_mark(a).await, Freshness::Fresh);
        assert_eq!(store.check_and_mark(b).await, Freshness::Fresh);
        assert_eq!(store.check_and_mark(c).await, Freshness::Fresh);
    }

    #[tokio::test]
    async fn expired_records_read_as_fresh() {
        let store = InMemoryIdempotencyStore::new(Duration::from_millis(10));
        let key = key();

        assert_eq!(store.check_and_mark(key.clone()).await, Freshness::Fresh);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(store.check_and_mark(key).await, Freshness::Fresh);
    }

    #[tokio::test]
    async fn purge_drops_only_expired_records() {
        let store = InMemoryIdempotencyStore::new(Duration::from_millis(10));

        store.check_and_mark(key()).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        store.check_and_mark(key()).await;

        store.purge_expired();
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn concurrent_marks_exactly_one_fresh() {
        let store = InMemoryIdempotencyStore::default();
        let key = key();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            let key = key.clone();
            handles.push(tokio::spawn(
                async move { store.check_and_mark(key).await },
            ));
        }

        let mut fresh = 0;
        for handle in handles {
            if handle.await.unwrap() == Freshness::Fresh {
                fresh += 1;
            }
        }
        assert_eq!(fresh, 1);
    }
}
