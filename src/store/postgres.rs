//! PostgreSQL execution store.
//!
//! The full record is stored as JSONB alongside the columns the list and
//! stats queries filter on. Upserts replace the whole document keyed by
//! execution_id.

use super::{Execution, ExecutionFilter, ExecutionStore};
use crate::errors::StoreError;
use async_trait::async_trait;
use sqlx::PgPool;
use std::sync::Arc;

pub struct PostgresExecutionStore {
    pool: Arc<PgPool>,
}

impl PostgresExecutionStore {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Create the executions table and its indexes if they do not exist.
    pub async fn initialize_schema(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS executions (
                execution_id TEXT PRIMARY KEY,
                task_id TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                record JSONB NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await
        .map_err(|e| Self::db_error("create_table", e))?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_executions_task_created
            ON executions (task_id, created_at DESC)
            "#,
        )
        .execute(self.pool.as_ref())
        .await
        .map_err(|e| Self::db_error("create_index", e))?;

        Ok(())
    }

    fn db_error(operation: &str, source: sqlx::Error) -> StoreError {
        StoreError::DatabaseFailed {
            operation: operation.to_string(),
            source,
        }
    }

    fn decode(record: serde_json::Value) -> Result<Execution, StoreError> {
        serde_json::from_value(record).map_err(|e| StoreError::SerializationFailed {
            details: e.to_string(),
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ExecutionRow {
    record: serde_json::Value,
}

#[async_trait]
impl ExecutionStore for PostgresExecutionStore {
    async fn upsert(&self, execution: &Execution) -> Result<(), StoreError> {
        let record =
            serde_json::to_value(execution).map_err(|e| StoreError::SerializationFailed {
                details: e.to_string(),
            })?;

        sqlx::query(
            r#"
            INSERT INTO executions (execution_id, task_id, status, created_at, record)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (execution_id) DO UPDATE SET
                status = EXCLUDED.status,
                record = EXCLUDED.record,
                updated_at = NOW()
            "#,
        )
        .bind(&execution.execution_id)
        .bind(&execution.task_id)
        .bind(execution.status.as_str())
        .bind(execution.created_at)
        .bind(record)
        .execute(self.pool.as_ref())
        .await
        .map_err(|e| Self::db_error("upsert", e))?;

        Ok(())
    }

    async fn get(&self, execution_id: &str) -> Result<Option<Execution>, StoreError> {
        let row = sqlx::query_as::<_, ExecutionRow>(
            r#"
            SELECT record FROM executions WHERE execution_id = $1
            "#,
        )
        .bind(execution_id)
        .fetch_optional(self.pool.as_ref())
        .await
        .map_err(|e| Self::db_error("get", e))?;

        row.map(|r| Self::decode(r.record)).transpose()
    }

    async fn list(&self, filter: &ExecutionFilter) -> Result<Vec<Execution>, StoreError> {
        let limit = filter.effective_limit().min(i64::MAX as usize) as i64;
        let rows = sqlx::query_as::<_, ExecutionRow>(
            r#"
            SELECT record FROM executions
            WHERE ($1::TEXT IS NULL OR task_id = $1)
              AND ($2::TEXT IS NULL OR status = $2)
            ORDER BY created_at DESC
            LIMIT $3
            "#,
        )
        .bind(filter.task_id.as_deref())
        .bind(filter.status.map(|s| s.as_str()))
        .bind(limit)
        .fetch_all(self.pool.as_ref())
        .await
        .map_err(|e| Self::db_error("list", e))?;

        rows.into_iter().map(|r| Self::decode(r.record)).collect()
    }
}
