use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use common::SagaId;

use crate::error::{Result, StoreError};
use crate::instance::{SagaInstance, Version};
use crate::store::SagaStore;

/// In-memory saga store implementation for testing.
///
/// Provides the same compare-and-swap semantics as the PostgreSQL
/// implementation; the write lock makes the version check and the write a
/// single atomic step.
#[derive(Clone, Default)]
pub struct InMemorySagaStore {
    sagas: Arc<RwLock<HashMap<SagaId, SagaInstance>>>,
}

impl InMemorySagaStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of saga instances stored.
    pub async fn saga_count(&self) -> usize {
        self.sagas.read().await.len()
    }

    /// Clears all stored instances.
    pub async fn clear(&self) {
        self.sagas.write().await.clear();
    }
}

#[async_trait]
impl SagaStore for InMemorySagaStore {
    async fn load(&self, saga_id: SagaId) -> Result<Option<SagaInstance>> {
        Ok(self.sagas.read().await.get(&saga_id).cloned())
    }

    async fn create(&self, saga_id: SagaId, saga_type: &str) -> Result<SagaInstance> {
        let mut sagas = self.sagas.write().await;
        if sagas.contains_key(&saga_id) {
            return Err(StoreError::AlreadyExists(saga_id));
        }

        let instance = SagaInstance::new(saga_id, saga_type);
        sagas.insert(saga_id, instance.clone());
        metrics::counter!("saga_instances_created_total").increment(1);
        Ok(instance)
    }

    async fn compare_and_swap(
        &self,
        instance: &SagaInstance,
        expected_version: Version,
    ) -> Result<Version> {
        let mut sagas = self.sagas.write().await;
        let saga_id = instance.saga_id();

        let current = sagas
            .get(&saga_id)
            .ok_or(StoreError::NotFound(saga_id))?;

        if current.version() != expected_version {
            metrics::counter!("saga_store_version_conflicts_total").increment(1);
            return Err(StoreError::VersionConflict {
                saga_id,
                expected: expected_version,
                actual: current.version(),
            });
        }

        let new_version = expected_version.next();
        let mut updated = instance.clone();
        updated.set_version(new_version);
        sagas.insert(saga_id, updated);
        Ok(new_version)
    }
}
