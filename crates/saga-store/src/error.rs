use thiserror::Error;

use common::SagaId;

use crate::instance::Version;

/// Errors that can occur when interacting with the saga store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The saga instance was not found.
    #[error("Saga not found: {0}")]
    NotFound(SagaId),

    /// An instance with this id already exists.
    #[error("Saga already exists: {0}")]
    AlreadyExists(SagaId),

    /// A stale write was rejected by the compare-and-swap.
    #[error("Version conflict for saga {saga_id}: expected version {expected}, found {actual}")]
    VersionConflict {
        saga_id: SagaId,
        expected: Version,
        actual: Version,
    },

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for saga store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
