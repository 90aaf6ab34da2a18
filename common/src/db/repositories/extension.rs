// Extension store: durable extension rows plus the transactions that keep
// them atomic with their trigger rows

use crate::db::repositories::trigger;
use crate::db::DbPool;
use crate::errors::DatabaseError;
use crate::models::{ExtensionData, ExtensionKind, ExtensionRecord, TriggerDeclaration};
use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::Row;
use tracing::instrument;

/// Durable store for extension records. Create and delete span the
/// `extensions` and `triggers` relations in one transaction.
#[async_trait]
pub trait ExtensionStore: Send + Sync {
    /// Insert the extension row and its trigger rows as one durable unit.
    /// A colliding extension id is a silent no-op (insert-if-absent).
    async fn create(
        &self,
        record: &ExtensionRecord,
        triggers: &[TriggerDeclaration],
    ) -> Result<(), DatabaseError>;

    async fn find_by_id(&self, extension_id: &str)
        -> Result<Option<ExtensionRecord>, DatabaseError>;

    /// Batch load; ids without a row are skipped
    async fn find_by_ids(
        &self,
        extension_ids: &[String],
    ) -> Result<Vec<ExtensionRecord>, DatabaseError>;

    /// Delete trigger rows then the extension row in one transaction.
    /// Returns the number of trigger rows removed; absent ids are a no-op.
    async fn delete(&self, extension_id: &str) -> Result<u64, DatabaseError>;
}

/// Extension store backed by PostgreSQL
pub struct PostgresExtensionStore {
    pool: DbPool,
}

impl PostgresExtensionStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn record_from_row(row: &PgRow) -> Result<ExtensionRecord, DatabaseError> {
        let kind: String = row.try_get("extension")?;
        let kind = kind
            .parse::<ExtensionKind>()
            .map_err(DatabaseError::QueryFailed)?;

        let data: serde_json::Value = row.try_get("data")?;
        let data: ExtensionData = serde_json::from_value(data)
            .map_err(|e| DatabaseError::QueryFailed(format!("Failed to parse data blob: {}", e)))?;

        let options: serde_json::Value = row.try_get("options")?;
        let options = serde_json::from_value(options).map_err(|e| {
            DatabaseError::QueryFailed(format!("Failed to parse options blob: {}", e))
        })?;

        Ok(ExtensionRecord {
            extension_id: row.try_get("extension_id")?,
            kind,
            function: row.try_get("function")?,
            data,
            options,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[async_trait]
impl ExtensionStore for PostgresExtensionStore {
    #[instrument(skip(self, record, triggers), fields(extension_id = %record.extension_id))]
    async fn create(
        &self,
        record: &ExtensionRecord,
        triggers: &[TriggerDeclaration],
    ) -> Result<(), DatabaseError> {
        let data = serde_json::to_value(&record.data).map_err(|e| {
            DatabaseError::QueryFailed(format!("Failed to serialize data blob: {}", e))
        })?;
        let options = serde_json::to_value(&record.options).map_err(|e| {
            DatabaseError::QueryFailed(format!("Failed to serialize options blob: {}", e))
        })?;

        let mut tx = self.pool.pool().begin().await?;

        sqlx::query(
            r#"
            INSERT INTO extensions (extension_id, extension, function, data, options, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (extension_id) DO NOTHING
            "#,
        )
        .bind(&record.extension_id)
        .bind(record.kind.as_str())
        .bind(&record.function)
        .bind(data)
        .bind(options)
        .bind(record.created_at)
        .execute(&mut *tx)
        .await?;

        trigger::insert_declarations(&mut *tx, &record.extension_id, triggers).await?;

        tx.commit().await?;

        tracing::info!(extension_id = %record.extension_id, "Extension persisted");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn find_by_id(
        &self,
        extension_id: &str,
    ) -> Result<Option<ExtensionRecord>, DatabaseError> {
        let row = sqlx::query(
            r#"
            SELECT extension_id, extension, function, data, options, created_at
            FROM extensions
            WHERE extension_id = $1
            "#,
        )
        .bind(extension_id)
        .fetch_optional(self.pool.pool())
        .await?;

        row.as_ref().map(Self::record_from_row).transpose()
    }

    #[instrument(skip(self, extension_ids), fields(count = extension_ids.len()))]
    async fn find_by_ids(
        &self,
        extension_ids: &[String],
    ) -> Result<Vec<ExtensionRecord>, DatabaseError> {
        if extension_ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            r#"
            SELECT extension_id, extension, function, data, options, created_at
            FROM extensions
            WHERE extension_id = ANY($1)
            ORDER BY extension_id
            "#,
        )
        .bind(extension_ids)
        .fetch_all(self.pool.pool())
        .await?;

        rows.iter().map(Self::record_from_row).collect()
    }

    #[instrument(skip(self))]
    async fn delete(&self, extension_id: &str) -> Result<u64, DatabaseError> {
        let mut tx = self.pool.pool().begin().await?;

        let removed = trigger::delete_declarations(&mut *tx, extension_id).await?;

        sqlx::query("DELETE FROM extensions WHERE extension_id = $1")
            .bind(extension_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        tracing::info!(extension_id, trigger_rows = removed, "Extension deleted");
        Ok(removed)
    }
}
