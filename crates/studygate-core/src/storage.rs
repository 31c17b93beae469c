use crate::error::CoreError;
use crate::store::{MemorySubscriptionStore, SubscriptionStore, UpsertOutcome};
use crate::types::{SubscriptionRecord, SubscriptionStatus};
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use std::sync::Arc;

/// Subscription persistence backend configuration.
#[derive(Debug, Clone)]
pub enum StorageConfig {
    /// Keep all subscription records in process memory only.
    Memory,
    /// Persist records in PostgreSQL, one row per principal.
    Postgres {
        database_url: String,
        max_connections: u32,
    },
}

impl StorageConfig {
    pub fn memory() -> Self {
        Self::Memory
    }

    pub fn postgres(database_url: impl Into<String>, max_connections: u32) -> Self {
        Self::Postgres {
            database_url: database_url.into(),
            max_connections,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Postgres { .. } => "postgres",
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Memory
    }
}

/// Build the configured store, ensuring the schema exists for the postgres
/// backend before any request traffic arrives.
pub async fn bootstrap_store(
    config: StorageConfig,
) -> Result<Arc<dyn SubscriptionStore>, CoreError> {
    match config {
        StorageConfig::Memory => Ok(Arc::new(MemorySubscriptionStore::new())),
        StorageConfig::Postgres {
            database_url,
            max_connections,
        } => {
            let store = PostgresSubscriptionStore::connect(&database_url, max_connections).await?;
            store.ensure_schema().await?;
            Ok(Arc::new(store))
        }
    }
}

/// Single-table PostgreSQL store keyed by principal.
///
/// The conditional upsert runs in one statement so the row lock makes
/// same-principal races resolve atomically; the WHERE clause mirrors
/// `ledger::event_order` (COLLATE "C" keeps the event-id tie-break bytewise).
#[derive(Debug, Clone)]
pub struct PostgresSubscriptionStore {
    pool: PgPool,
}

impl PostgresSubscriptionStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, CoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect(database_url)
            .await
            .map_err(|e| CoreError::Storage(format!("postgres connect failed: {e}")))?;

        Ok(Self { pool })
    }

    pub async fn ensure_schema(&self) -> Result<(), CoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS subscription_records (
                principal_id TEXT PRIMARY KEY,
                provider_subscription_id TEXT NOT NULL,
                provider_customer_id TEXT NOT NULL,
                status TEXT NOT NULL,
                period_start TIMESTAMPTZ NULL,
                period_end TIMESTAMPTZ NULL,
                last_updated_at TIMESTAMPTZ NOT NULL,
                last_event_id TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| CoreError::Storage(format!("postgres schema create failed: {e}")))?;

        Ok(())
    }
}

#[async_trait]
impl SubscriptionStore for PostgresSubscriptionStore {
    async fn get(&self, principal_id: &str) -> Result<Option<SubscriptionRecord>, CoreError> {
        let row = sqlx::query(
            r#"
            SELECT
                principal_id,
                provider_subscription_id,
                provider_customer_id,
                status,
                period_start,
                period_end,
                last_updated_at,
                last_event_id
            FROM subscription_records
            WHERE principal_id = $1
            "#,
        )
        .bind(principal_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| CoreError::Storage(format!("postgres select failed: {e}")))?;

        row.map(decode_record).transpose()
    }

    async fn upsert(&self, record: SubscriptionRecord) -> Result<UpsertOutcome, CoreError> {
        let updated = sqlx::query(
            r#"
            INSERT INTO subscription_records (
                principal_id,
                provider_subscription_id,
                provider_customer_id,
                status,
                period_start,
                period_end,
                last_updated_at,
                last_event_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (principal_id) DO UPDATE SET
                provider_subscription_id = excluded.provider_subscription_id,
                provider_customer_id = excluded.provider_customer_id,
                status = excluded.status,
                period_start = excluded.period_start,
                period_end = excluded.period_end,
                last_updated_at = excluded.last_updated_at,
                last_event_id = excluded.last_event_id
            WHERE excluded.last_updated_at > subscription_records.last_updated_at
               OR (excluded.last_updated_at = subscription_records.last_updated_at
                   AND excluded.last_event_id COLLATE "C"
                       > subscription_records.last_event_id COLLATE "C")
            "#,
        )
        .bind(&record.principal_id)
        .bind(&record.provider_subscription_id)
        .bind(&record.provider_customer_id)
        .bind(record.status.as_str())
        .bind(record.period_start)
        .bind(record.period_end)
        .bind(record.last_updated_at)
        .bind(&record.last_event_id)
        .execute(&self.pool)
        .await
        .map_err(|e| CoreError::Storage(format!("postgres upsert failed: {e}")))?;

        if updated.rows_affected() > 0 {
            return Ok(UpsertOutcome::Applied);
        }

        // The conditional update declined; distinguish exact replay from a
        // stale loser by re-reading the stored ordering pair.
        let stored = self.get(&record.principal_id).await?;
        match stored {
            Some(current)
                if current.last_updated_at == record.last_updated_at
                    && current.last_event_id == record.last_event_id =>
            {
                Ok(UpsertOutcome::Duplicate)
            }
            _ => Ok(UpsertOutcome::RejectedStale),
        }
    }

    async fn remove(&self, principal_id: &str) -> Result<bool, CoreError> {
        let deleted = sqlx::query("DELETE FROM subscription_records WHERE principal_id = $1")
            .bind(principal_id)
            .execute(&self.pool)
            .await
            .map_err(|e| CoreError::Storage(format!("postgres delete failed: {e}")))?;

        Ok(deleted.rows_affected() > 0)
    }
}

fn decode_record(row: sqlx::postgres::PgRow) -> Result<SubscriptionRecord, CoreError> {
    let status_label: String = row
        .try_get("status")
        .map_err(|e| CoreError::Storage(format!("postgres decode status failed: {e}")))?;
    let status = SubscriptionStatus::from_provider_label(&status_label).ok_or_else(|| {
        CoreError::Storage(format!("unknown status '{status_label}' in postgres"))
    })?;

    Ok(SubscriptionRecord {
        principal_id: row
            .try_get("principal_id")
            .map_err(|e| CoreError::Storage(format!("postgres decode principal_id failed: {e}")))?,
        provider_subscription_id: row.try_get("provider_subscription_id").map_err(|e| {
            CoreError::Storage(format!("postgres decode provider_subscription_id failed: {e}"))
        })?,
        provider_customer_id: row.try_get("provider_customer_id").map_err(|e| {
            CoreError::Storage(format!("postgres decode provider_customer_id failed: {e}"))
        })?,
        status,
        period_start: row
            .try_get("period_start")
            .map_err(|e| CoreError::Storage(format!("postgres decode period_start failed: {e}")))?,
        period_end: row
            .try_get("period_end")
            .map_err(|e| CoreError::Storage(format!("postgres decode period_end failed: {e}")))?,
        last_updated_at: row.try_get("last_updated_at").map_err(|e| {
            CoreError::Storage(format!("postgres decode last_updated_at failed: {e}"))
        })?,
        last_event_id: row
            .try_get("last_event_id")
            .map_err(|e| CoreError::Storage(format!("postgres decode last_event_id failed: {e}")))?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_backend_bootstraps_empty() {
        let store = bootstrap_store(StorageConfig::memory()).await.unwrap();
        assert!(store.get("anyone").await.unwrap().is_none());
    }

    #[test]
    fn storage_config_labels() {
        assert_eq!(StorageConfig::memory().label(), "memory");
        assert_eq!(
            StorageConfig::postgres("postgres://localhost/studygate", 5).label(),
            "postgres"
        );
    }
}
