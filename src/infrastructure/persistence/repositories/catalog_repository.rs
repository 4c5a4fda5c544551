use crate::domain::forecasting::types::CatalogEntry;
use crate::domain::repositories::{CatalogRepository, CatalogTable};
use crate::infrastructure::persistence::database::Database;
use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use tracing::info;

/// Lookup tables for currency pairs, periods and prediction models.
/// Table names come from `CatalogTable`, never from callers.
pub struct SqliteCatalogRepository {
    database: Database,
}

impl SqliteCatalogRepository {
    pub fn new(database: Database) -> Self {
        Self { database }
    }
}

#[async_trait]
impl CatalogRepository for SqliteCatalogRepository {
    async fn find(&self, table: CatalogTable, name: &str) -> Result<Option<CatalogEntry>> {
        let row = sqlx::query_as::<_, (i64, String, bool)>(&format!(
            "SELECT id, name, enabled FROM {} WHERE name = $1 AND enabled = 1",
            table.table_name()
        ))
        .bind(name)
        .fetch_optional(&self.database.pool)
        .await
        .context(format!("Failed to look up {} {}", table.kind(), name))?;

        Ok(row.map(|(id, name, enabled)| CatalogEntry { id, name, enabled }))
    }

    async fn register(&self, table: CatalogTable, name: &str) -> Result<i64> {
        let (id,): (i64,) = sqlx::query_as(&format!(
            r#"
            INSERT INTO {} (name, enabled) VALUES ($1, 1)
            ON CONFLICT(name) DO UPDATE SET enabled = 1
            RETURNING id
            "#,
            table.table_name()
        ))
        .bind(name)
        .fetch_one(&self.database.pool)
        .await
        .context(format!("Failed to register {} {}", table.kind(), name))?;

        info!("Registered {} {} (id {})", table.kind(), name, id);
        Ok(id)
    }

    async fn set_enabled(&self, table: CatalogTable, name: &str, enabled: bool) -> Result<()> {
        let result = sqlx::query(&format!(
            "UPDATE {} SET enabled = $1 WHERE name = $2",
            table.table_name()
        ))
        .bind(enabled)
        .bind(name)
        .execute(&self.database.pool)
        .await
        .context(format!("Failed to update {} {}", table.kind(), name))?;

        if result.rows_affected() == 0 {
            bail!("Unknown {}: {}", table.kind(), name);
        }
        Ok(())
    }
}
