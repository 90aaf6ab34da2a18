// Trigger index: which extensions fire for which trigger targets

use crate::db::DbPool;
use crate::errors::DatabaseError;
use crate::models::{TriggerDeclaration, TriggerType};
use async_trait::async_trait;
use sqlx::{PgConnection, Row};
use tracing::instrument;

/// Read side of the trigger index
#[async_trait]
pub trait TriggerIndex: Send + Sync {
    /// Stored rows grouped by trigger type, targets aggregated per type
    async fn triggers_for_extension(
        &self,
        extension_id: &str,
    ) -> Result<Vec<TriggerDeclaration>, DatabaseError>;

    /// Extension ids registered for a trigger type; exact target match when
    /// `target` is given, all ids of that type otherwise
    async fn extensions_for_trigger(
        &self,
        trigger_type: TriggerType,
        target: Option<&str>,
    ) -> Result<Vec<String>, DatabaseError>;

    /// One entry per distinct target with every extension id registered on
    /// it. Lets the scheduler issue one query per target rather than one
    /// per extension.
    async fn extensions_grouped_by_target(
        &self,
        trigger_type: TriggerType,
    ) -> Result<Vec<(String, Vec<String>)>, DatabaseError>;
}

/// Trigger index backed by the `triggers` relation
pub struct PostgresTriggerIndex {
    pool: DbPool,
}

impl PostgresTriggerIndex {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TriggerIndex for PostgresTriggerIndex {
    #[instrument(skip(self))]
    async fn triggers_for_extension(
        &self,
        extension_id: &str,
    ) -> Result<Vec<TriggerDeclaration>, DatabaseError> {
        let rows = sqlx::query(
            r#"
            SELECT trigger_type, array_agg(trigger_on ORDER BY trigger_on) AS trigger_on
            FROM triggers
            WHERE extension_id = $1
            GROUP BY trigger_type
            ORDER BY trigger_type
            "#,
        )
        .bind(extension_id)
        .fetch_all(self.pool.pool())
        .await?;

        let mut triggers = Vec::with_capacity(rows.len());
        for row in rows {
            let trigger_type: String = row.try_get("trigger_type")?;
            let trigger_type = trigger_type
                .parse::<TriggerType>()
                .map_err(DatabaseError::QueryFailed)?;
            triggers.push(TriggerDeclaration {
                trigger_type,
                trigger_on: row.try_get("trigger_on")?,
            });
        }

        tracing::debug!(extension_id, count = triggers.len(), "Loaded trigger declarations");
        Ok(triggers)
    }

    #[instrument(skip(self))]
    async fn extensions_for_trigger(
        &self,
        trigger_type: TriggerType,
        target: Option<&str>,
    ) -> Result<Vec<String>, DatabaseError> {
        let rows = match target {
            Some(target) => {
                sqlx::query(
                    r#"
                    SELECT DISTINCT extension_id
                    FROM triggers
                    WHERE trigger_type = $1 AND trigger_on = $2
                    ORDER BY extension_id
                    "#,
                )
                .bind(trigger_type.as_str())
                .bind(target)
                .fetch_all(self.pool.pool())
                .await?
            }
            None => {
                sqlx::query(
                    r#"
                    SELECT DISTINCT extension_id
                    FROM triggers
                    WHERE trigger_type = $1
                    ORDER BY extension_id
                    "#,
                )
                .bind(trigger_type.as_str())
                .fetch_all(self.pool.pool())
                .await?
            }
        };

        let mut extension_ids = Vec::with_capacity(rows.len());
        for row in rows {
            extension_ids.push(row.try_get("extension_id")?);
        }
        Ok(extension_ids)
    }

    #[instrument(skip(self))]
    async fn extensions_grouped_by_target(
        &self,
        trigger_type: TriggerType,
    ) -> Result<Vec<(String, Vec<String>)>, DatabaseError> {
        let rows = sqlx::query(
            r#"
            SELECT trigger_on, array_agg(DISTINCT extension_id ORDER BY extension_id) AS extension_ids
            FROM triggers
            WHERE trigger_type = $1
            GROUP BY trigger_on
            ORDER BY trigger_on
            "#,
        )
        .bind(trigger_type.as_str())
        .fetch_all(self.pool.pool())
        .await?;

        let mut groups = Vec::with_capacity(rows.len());
        for row in rows {
            groups.push((row.try_get("trigger_on")?, row.try_get("extension_ids")?));
        }

        tracing::debug!(
            trigger_type = %trigger_type,
            groups = groups.len(),
            "Grouped extensions by trigger target"
        );
        Ok(groups)
    }
}

/// Insert one row per declared target, idempotently. Runs inside the
/// caller's transaction so trigger rows commit with the extension row.
pub(crate) async fn insert_declarations(
    conn: &mut PgConnection,
    extension_id: &str,
    triggers: &[TriggerDeclaration],
) -> Result<(), DatabaseError> {
    for declaration in triggers {
        for target in &declaration.trigger_on {
            sqlx::query(
                r#"
                INSERT INTO triggers (extension_id, trigger_type, trigger_on)
                VALUES ($1, $2, $3)
                ON CONFLICT (extension_id, trigger_type, trigger_on) DO NOTHING
                "#,
            )
            .bind(extension_id)
            .bind(declaration.trigger_type.as_str())
            .bind(target)
            .execute(&mut *conn)
            .await?;
        }
    }
    Ok(())
}

/// Delete every trigger row of an extension; 0 removed is a valid outcome
pub(crate) async fn delete_declarations(
    conn: &mut PgConnection,
    extension_id: &str,
) -> Result<u64, DatabaseError> {
    let result = sqlx::query("DELETE FROM triggers WHERE extension_id = $1")
        .bind(extension_id)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}
