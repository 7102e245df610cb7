//! Dead-letter sink for messages the coordinator gives up on.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::error::Result;

/// A message routed out of normal processing, with the reason it was
/// abandoned.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    /// Why the message was dead-lettered (decode failure, retries
    /// exhausted).
    pub reason: String,

    /// The routing key the message arrived under.
    pub routing_key: String,

    /// The original message body, untouched.
    pub body: Vec<u8>,

    /// When the message was dead-lettered.
    pub dead_lettered_at: DateTime<Utc>,
}

impl DeadLetter {
    /// Creates a dead letter stamped with the current time.
    pub fn new(reason: impl Into<String>, routing_key: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            reason: reason.into(),
            routing_key: routing_key.into(),
            body,
            dead_lettered_at: Utc::now(),
        }
    }
}

/// Receives envelopes that failed decode or exhausted retries.
///
/// An external collaborator in production (a broker dead-letter exchange, an
/// ops queue); consumed here, not implemented beyond the in-memory sink.
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    /// Hands a message over to the dead-letter collaborator.
    async fn send(&self, letter: DeadLetter) -> Result<()>;
}

/// In-memory dead-letter sink for tests and local runs.
#[derive(Clone, Default)]
pub struct InMemoryDeadLetterSink {
    letters: Arc<RwLock<Vec<DeadLetter>>>,
}

impl InMemoryDeadLetterSink {
    /// Creates a new empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of dead letters received.
    pub async fn len(&self) -> usize {
        self.letters.read().await.len()
    }

    /// Returns true if no dead letters have been received.
    pub async fn is_empty(&self) -> bool {
        self.letters.read().await.is_empty()
    }

    /// Returns a copy of all dead letters received so far.
    pub async fn letters(&self) -> Vec<DeadLetter> {
        self.letters.read().await.clone()
    }
}

#[async_trait]
impl DeadLetterSink for InMemoryDeadLetterSink {
    async fn send(&self, letter: DeadLetter) -> Result<()> {
        tracing::warn!(
            reason = %letter.reason,
            routing_key = %letter.routing_key,
            "message dead-lettered"
        );
        self.letters.write().await.push(letter);
        Ok(())
    }
}
