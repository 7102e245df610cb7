//! Event bus adapter: the topic-based publish/subscribe contract the saga
//! coordinator runs on.
//!
//! The broker itself is an external collaborator; this crate specifies the
//! contract the coordinator consumes (durable topic publish, pattern
//! subscription with explicit acknowledgment, at-least-once redelivery) and
//! ships an in-memory implementation with the same semantics for tests and
//! local runs. Routing keys follow AMQP topic-exchange matching: `*`
//! substitutes exactly one word, `#` zero or more.

pub mod bus;
pub mod dead_letter;
pub mod error;
pub mod memory;
pub mod topic;

pub use bus::{Delivery, DeliveryStream, EventBus, Subscription, into_stream};
pub use dead_letter::{DeadLetter, DeadLetterSink, InMemoryDeadLetterSink};
pub use error::{BusError, Result};
pub use memory::{InMemoryEventBus, InMemorySubscription};
pub use topic::TopicPattern;
