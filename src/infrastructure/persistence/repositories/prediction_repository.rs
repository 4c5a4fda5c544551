use crate::domain::forecasting::types::{CachedPrediction, PredictionKey};
use crate::domain::repositories::PredictionStore;
use crate::infrastructure::persistence::database::Database;
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

type PredictionRow = (i64, i64, i64, i64, f64, f64, i64);

pub struct SqlitePredictionStore {
    database: Database,
}

impl SqlitePredictionStore {
    pub fn new(database: Database) -> Self {
        Self { database }
    }

    fn map_row(row: PredictionRow) -> Result<CachedPrediction> {
        let (currency_pair_id, period_id, prediction_model_id, date, value, live, updated) = row;
        Ok(CachedPrediction {
            currency_pair_id,
            period_id,
            prediction_model_id,
            date: from_unix(date)?,
            value,
            last_live_value: live,
            updated_at: from_unix(updated)?,
        })
    }
}

fn from_unix(secs: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0).ok_or_else(|| anyhow!("Invalid stored timestamp {}", secs))
}

#[async_trait]
impl PredictionStore for SqlitePredictionStore {
    async fn lookup_batch(
        &self,
        key: PredictionKey,
        anchor: DateTime<Utc>,
        n: usize,
    ) -> Result<Vec<CachedPrediction>> {
        let rows = sqlx::query_as::<_, PredictionRow>(
            r#"
            SELECT currency_pair_id, period_id, prediction_model_id,
                   date, value, last_live_value, updated_at
            FROM predictions
            WHERE currency_pair_id = $1 AND period_id = $2 AND prediction_model_id = $3
              AND date >= $4
            ORDER BY date ASC
            LIMIT $5
            "#,
        )
        .bind(key.currency_pair_id)
        .bind(key.period_id)
        .bind(key.prediction_model_id)
        .bind(anchor.timestamp())
        .bind(n as i64)
        .fetch_all(&self.database.pool)
        .await
        .context(format!("Failed to look up predictions for {}", key))?;

        rows.into_iter().map(Self::map_row).collect()
    }

    /// `updated_at` only moves when the stored value or fingerprint changes
    async fn upsert(
        &self,
        key: PredictionKey,
        date: DateTime<Utc>,
        value: f64,
        live_value: f64,
    ) -> Result<CachedPrediction> {
        let row = sqlx::query_as::<_, PredictionRow>(
            r#"
            INSERT INTO predictions (
                currency_pair_id,
                period_id,
                prediction_model_id,
                date,
                value,
                last_live_value,
                updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT(currency_pair_id, period_id, prediction_model_id, date) DO UPDATE SET
                updated_at = CASE
                    WHEN predictions.value = excluded.value
                     AND predictions.last_live_value = excluded.last_live_value
                    THEN predictions.updated_at
                    ELSE excluded.updated_at
                END,
                value = excluded.value,
                last_live_value = excluded.last_live_value
            RETURNING currency_pair_id, period_id, prediction_model_id,
                      date, value, last_live_value, updated_at
            "#,
        )
        .bind(key.currency_pair_id)
        .bind(key.period_id)
        .bind(key.prediction_model_id)
        .bind(date.timestamp())
        .bind(value)
        .bind(live_value)
        .bind(Utc::now().timestamp())
        .fetch_one(&self.database.pool)
        .await
        .context(format!("Failed to upsert prediction for {} at {}", key, date))?;

        debug!("Upserted prediction {} {} = {}", key, date, value);
        Self::map_row(row)
    }

    async fn lookup_history(
        &self,
        key: PredictionKey,
        before: DateTime<Utc>,
    ) -> Result<Vec<CachedPrediction>> {
        let rows = sqlx::query_as::<_, PredictionRow>(
            r#"
            SELECT currency_pair_id, period_id, prediction_model_id,
                   date, value, last_live_value, updated_at
            FROM predictions
            WHERE currency_pair_id = $1 AND period_id = $2 AND prediction_model_id = $3
              AND date < $4
            ORDER BY date ASC
            "#,
        )
        .bind(key.currency_pair_id)
        .bind(key.period_id)
        .bind(key.prediction_model_id)
        .bind(before.timestamp())
        .fetch_all(&self.database.pool)
        .await
        .context(format!("Failed to load prediction history for {}", key))?;

        rows.into_iter().map(Self::map_row).collect()
    }

    async fn count(&self, key: PredictionKey) -> Result<usize> {
        let (count,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM predictions
            WHERE currency_pair_id = $1 AND period_id = $2 AND prediction_model_id = $3
            "#,
        )
        .bind(key.currency_pair_id)
        .bind(key.period_id)
        .bind(key.prediction_model_id)
        .fetch_one(&self.database.pool)
        .await
        .context("Failed to count predictions")?;
        Ok(count as usize)
    }
}
