use anyhow::{Context, Result};

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tokio::fs;
use tracing::info;

/// Shared SQLite pool holding the catalog and prediction tables
#[derive(Clone)]
pub struct Database {
    pub pool: SqlitePool,
}

impl Database {
    pub async fn new(db_url: &str, max_connections: u32) -> Result<Self> {
        // Ensure the directory exists if it's a file path
        if let Some(path_part) = db_url.strip_prefix("sqlite://") {
            let path = Path::new(path_part);
            if let Some(parent) = path.parent()
                && !parent.as_os_str().is_empty()
                && !parent.exists()
            {
                fs::create_dir_all(parent)
                    .await
                    .context("Failed to create database directory")?;
            }
        }

        let in_memory = db_url.contains(":memory:");
        let mut options = SqliteConnectOptions::from_str(db_url)
            .context("Invalid database URL")?
            .create_if_missing(true);
        if !in_memory {
            options = options.journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);
        }

        // Each connection to an in-memory database is a separate database,
        // so the pool must keep exactly one connection alive.
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None::<Duration>)
                .max_lifetime(None::<Duration>)
        } else {
            SqlitePoolOptions::new().max_connections(max_connections.max(1))
        };

        let pool = pool_options
            .connect_with(options)
            .await
            .context("Failed to connect to SQLite database")?;

        info!("Connected to database: {}", db_url);

        let db = Self { pool };
        db.init().await?;

        Ok(db)
    }

    /// Fresh in-memory database with the schema applied
    pub async fn in_memory() -> Result<Self> {
        Self::new("sqlite::memory:", 1).await
    }

    /// Initialize database schema
    async fn init(&self) -> Result<()> {
        let mut conn = self.pool.acquire().await?;

        for table in ["currency_pairs", "periods", "prediction_models"] {
            sqlx::query(&format!(
                r#"
                CREATE TABLE IF NOT EXISTS {} (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL UNIQUE,
                    enabled BOOLEAN NOT NULL DEFAULT 1,
                    created_at INTEGER DEFAULT (strftime('%s', 'now'))
                );
                "#,
                table
            ))
            .execute(&mut *conn)
            .await
            .context(format!("Failed to create {} table", table))?;
        }

        // Dates are unix seconds of the target bucket start
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS predictions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                currency_pair_id INTEGER NOT NULL REFERENCES currency_pairs(id),
                period_id INTEGER NOT NULL REFERENCES periods(id),
                prediction_model_id INTEGER NOT NULL REFERENCES prediction_models(id),
                date INTEGER NOT NULL,
                value REAL NOT NULL,
                last_live_value REAL NOT NULL,
                created_at INTEGER DEFAULT (strftime('%s', 'now')),
                updated_at INTEGER NOT NULL,
                UNIQUE (currency_pair_id, period_id, prediction_model_id, date)
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create predictions table")?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_predictions_key_date
            ON predictions (currency_pair_id, period_id, prediction_model_id, date);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create predictions index")?;

        info!("Database schema initialized");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_init_is_repeatable() {
        let db = Database::in_memory().await.unwrap();
        db.init().await.unwrap();

        let tables: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )
        .fetch_all(&db.pool)
        .await
        .unwrap();
        let names: Vec<&str> = tables.iter().map(|(n,)| n.as_str()).collect();
        assert_eq!(
            names,
            vec!["currency_pairs", "periods", "prediction_models", "predictions"]
        );
    }

    #[tokio::test]
    async fn test_file_database_creates_parent_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("predictions.db");
        let url = format!("sqlite://{}", path.display());

        let db = Database::new(&url, 2).await.unwrap();
        assert!(path.exists());
        db.pool.close().await;
    }
}
