use async_trait::async_trait;

use common::SagaId;

use crate::instance::{SagaInstance, Version};
use crate::error::Result;

/// Core trait for saga store implementations.
///
/// The store is the single shared mutable resource between concurrent
/// orchestrator workers; its compare-and-swap contract is what makes
/// lock-free coordination safe. All implementations must be thread-safe
/// (Send + Sync).
#[async_trait]
pub trait SagaStore: Send + Sync {
    /// Loads the instance for a saga id.
    ///
    /// Returns None if no instance exists.
    async fn load(&self, saga_id: SagaId) -> Result<Option<SagaInstance>>;

    /// Creates a fresh `Running` instance at version 1.
    ///
    /// Fails with `AlreadyExists` if an instance with this id is present.
    async fn create(&self, saga_id: SagaId, saga_type: &str) -> Result<SagaInstance>;

    /// Atomically persists the instance if its stored version still equals
    /// `expected_version`.
    ///
    /// On success the stored version becomes `expected_version + 1`, which
    /// is returned. Fails with `VersionConflict` if another writer committed
    /// first; the caller reloads and retries. No lost updates: of two
    /// writers racing on the same saga id, exactly one succeeds.
    async fn compare_and_swap(
        &self,
        instance: &SagaInstance,
        expected_version: Version,
    ) -> Result<Version>;
}
