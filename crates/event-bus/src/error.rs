use thiserror::Error;

/// Errors that can occur when interacting with the event bus.
#[derive(Debug, Error)]
pub enum BusError {
    /// The bus connection is closed; no further publishes or deliveries.
    #[error("Event bus is closed")]
    Closed,

    /// An ack or nack referenced a delivery tag this subscription does not
    /// hold.
    #[error("Unknown delivery tag: {0}")]
    UnknownDeliveryTag(u64),
}

/// Result type for bus operations.
pub type Result<T> = std::result::Result<T, BusError>;
