use async_trait::async_trait;
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use common::SagaId;

use crate::error::{Result, StoreError};
use crate::instance::{SagaInstance, StepRecord, Version};
use crate::status::SagaStatus;
use crate::store::SagaStore;

/// PostgreSQL-backed saga store implementation.
///
/// One row per saga instance; the compare-and-swap is a single `UPDATE`
/// guarded by the version column, so concurrent writers are serialized by
/// the row lock and losers see zero rows affected.
#[derive(Clone)]
pub struct PostgresSagaStore {
    pool: PgPool,
}

impl PostgresSagaStore {
    /// Creates a new PostgreSQL saga store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    fn row_to_instance(row: PgRow) -> Result<SagaInstance> {
        let history_json: serde_json::Value = row.try_get("history")?;
        let history: Vec<StepRecord> = serde_json::from_value(history_json)?;

        let status_name: String = row.try_get("status")?;
        let status = SagaStatus::parse(&status_name).ok_or_else(|| {
            StoreError::Serialization(serde::de::Error::custom(format!(
                "unknown saga status '{status_name}'"
            )))
        })?;

        Ok(SagaInstance::from_parts(
            SagaId::from_uuid(row.try_get::<Uuid, _>("saga_id")?),
            row.try_get("saga_type")?,
            row.try_get("current_step")?,
            status,
            row.try_get("failure_reason")?,
            history,
            Version::new(row.try_get("version")?),
        ))
    }
}

#[async_trait]
impl SagaStore for PostgresSagaStore {
    async fn load(&self, saga_id: SagaId) -> Result<Option<SagaInstance>> {
        let row: Option<PgRow> = sqlx::query(
            r#"
            SELECT saga_id, saga_type, current_step, status, failure_reason, history, version
            FROM sagas
            WHERE saga_id = $1
            "#,
        )
        .bind(saga_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_instance).transpose()
    }

    async fn create(&self, saga_id: SagaId, saga_type: &str) -> Result<SagaInstance> {
        let instance = SagaInstance::new(saga_id, saga_type);
        let history_json = serde_json::to_value(instance.history())?;

        sqlx::query(
            r#"
            INSERT INTO sagas (saga_id, saga_type, current_step, status, failure_reason, history, version)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(saga_id.as_uuid())
        .bind(instance.saga_type())
        .bind(instance.current_step())
        .bind(instance.status().as_str())
        .bind(instance.failure_reason())
        .bind(history_json)
        .bind(instance.version().as_i64())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.constraint() == Some("sagas_pkey")
            {
                return StoreError::AlreadyExists(saga_id);
            }
            StoreError::Database(e)
        })?;

        metrics::counter!("saga_instances_created_total").increment(1);
        Ok(instance)
    }

    async fn compare_and_swap(
        &self,
        instance: &SagaInstance,
        expected_version: Version,
    ) -> Result<Version> {
        let saga_id = instance.saga_id();
        let new_version = expected_version.next();
        let history_json = serde_json::to_value(instance.history())?;

        let result = sqlx::query(
            r#"
            UPDATE sagas
            SET saga_type = $2,
                current_step = $3,
                status = $4,
                failure_reason = $5,
                history = $6,
                version = $7,
                updated_at = now()
            WHERE saga_id = $1 AND version = $8
            "#,
        )
        .bind(saga_id.as_uuid())
        .bind(instance.saga_type())
        .bind(instance.current_step())
        .bind(instance.status().as_str())
        .bind(instance.failure_reason())
        .bind(history_json)
        .bind(new_version.as_i64())
        .bind(expected_version.as_i64())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            metrics::counter!("saga_store_version_conflicts_total").increment(1);
            // Distinguish a missing row from a stale version for the error.
            let actual: Option<i64> =
                sqlx::query_scalar("SELECT version FROM sagas WHERE saga_id = $1")
                    .bind(saga_id.as_uuid())
                    .fetch_optional(&self.pool)
                    .await?;

            return match actual {
                None => Err(StoreError::NotFound(saga_id)),
                Some(actual) => Err(StoreError::VersionConflict {
                    saga_id,
                    expected: expected_version,
                    actual: Version::new(actual),
                }),
            };
        }

        Ok(new_version)
    }
}
