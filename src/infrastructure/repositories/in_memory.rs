//! In-Memory Repository Implementations
//!
//! Thread-safe, in-memory implementations of `PredictionStore` and
//! `CatalogRepository`, with the same ordering and idempotency rules as the
//! SQLite ones. Used by tests and for runs without a database file.

use crate::domain::forecasting::types::{CachedPrediction, CatalogEntry, PredictionKey};
use crate::domain::repositories::{CatalogRepository, CatalogTable, PredictionStore};
use anyhow::{Result, bail};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

type RowKey = (i64, i64, i64, DateTime<Utc>);

fn row_key(key: PredictionKey, date: DateTime<Utc>) -> RowKey {
    (
        key.currency_pair_id,
        key.period_id,
        key.prediction_model_id,
        date,
    )
}

/// In-memory implementation of PredictionStore
pub struct InMemoryPredictionStore {
    rows: Arc<RwLock<BTreeMap<RowKey, CachedPrediction>>>,
}

impl InMemoryPredictionStore {
    pub fn new() -> Self {
        Self {
            rows: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }
}

impl Default for InMemoryPredictionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PredictionStore for InMemoryPredictionStore {
    async fn lookup_batch(
        &self,
        key: PredictionKey,
        anchor: DateTime<Utc>,
        n: usize,
    ) -> Result<Vec<CachedPrediction>> {
        let rows = self.rows.read().await;
        Ok(rows
            .range(row_key(key, anchor)..)
            .take_while(|(_, row)| row.key() == key)
            .take(n)
            .map(|(_, row)| row.clone())
            .collect())
    }

    async fn upsert(
        &self,
        key: PredictionKey,
        date: DateTime<Utc>,
        value: f64,
        live_value: f64,
    ) -> Result<CachedPrediction> {
        let mut rows = self.rows.write().await;
        let row = rows
            .entry(row_key(key, date))
            .and_modify(|row| {
                if row.value != value || row.last_live_value != live_value {
                    row.value = value;
                    row.last_live_value = live_value;
                    row.updated_at = Utc::now();
                }
            })
            .or_insert_with(|| CachedPrediction {
                currency_pair_id: key.currency_pair_id,
                period_id: key.period_id,
                prediction_model_id: key.prediction_model_id,
                date,
                value,
                last_live_value: live_value,
                updated_at: Utc::now(),
            });
        Ok(row.clone())
    }

    async fn lookup_history(
        &self,
        key: PredictionKey,
        before: DateTime<Utc>,
    ) -> Result<Vec<CachedPrediction>> {
        let rows = self.rows.read().await;
        Ok(rows
            .range(row_key(key, DateTime::<Utc>::MIN_UTC)..row_key(key, before))
            .map(|(_, row)| row.clone())
            .collect())
    }

    async fn count(&self, key: PredictionKey) -> Result<usize> {
        let rows = self.rows.read().await;
        Ok(rows.values().filter(|row| row.key() == key).count())
    }
}

/// In-memory implementation of CatalogRepository
#[derive(Default)]
pub struct InMemoryCatalog {
    tables: Arc<RwLock<HashMap<CatalogTable, Vec<CatalogEntry>>>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog with the given pairs and periods plus the named models, all enabled
    pub async fn seeded(pairs: &[&str], periods: &[&str], models: &[&str]) -> Result<Self> {
        let catalog = Self::new();
        for (table, names) in [
            (CatalogTable::CurrencyPairs, pairs),
            (CatalogTable::Periods, periods),
            (CatalogTable::PredictionModels, models),
        ] {
            for name in names {
                catalog.register(table, name).await?;
            }
        }
        Ok(catalog)
    }
}

#[async_trait]
impl CatalogRepository for InMemoryCatalog {
    async fn find(&self, table: CatalogTable, name: &str) -> Result<Option<CatalogEntry>> {
        let tables = self.tables.read().await;
        Ok(tables
            .get(&table)
            .and_then(|entries| entries.iter().find(|e| e.name == name && e.enabled))
            .cloned())
    }

    async fn register(&self, table: CatalogTable, name: &str) -> Result<i64> {
        let mut tables = self.tables.write().await;
        let entries = tables.entry(table).or_default();
        if let Some(entry) = entries.iter_mut().find(|e| e.name == name) {
            entry.enabled = true;
            return Ok(entry.id);
        }
        let id = entries.len() as i64 + 1;
        entries.push(CatalogEntry {
            id,
            name: name.to_string(),
            enabled: true,
        });
        Ok(id)
    }

    async fn set_enabled(&self, table: CatalogTable, name: &str, enabled: bool) -> Result<()> {
        let mut tables = self.tables.write().await;
        match tables
            .get_mut(&table)
            .and_then(|entries| entries.iter_mut().find(|e| e.name == name))
        {
            Some(entry) => {
                entry.enabled = enabled;
                Ok(())
            }
            None => bail!("Unknown {}: {}", table.kind(), name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn key(model: i64) -> PredictionKey {
        PredictionKey {
            currency_pair_id: 1,
            period_id: 1,
            prediction_model_id: model,
        }
    }

    fn day(d: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap() + Duration::days(d)
    }

    #[tokio::test]
    async fn test_lookup_batch_is_ordered_and_scoped_to_key() {
        let store = InMemoryPredictionStore::new();
        for d in [3, 1, 2, 0] {
            store.upsert(key(1), day(d), d as f64, 1.0).await.unwrap();
        }
        store.upsert(key(2), day(1), 99.0, 1.0).await.unwrap();

        let batch = store.lookup_batch(key(1), day(1), 5).await.unwrap();
        let dates: Vec<_> = batch.iter().map(|r| r.date).collect();
        assert_eq!(dates, vec![day(1), day(2), day(3)]);

        let limited = store.lookup_batch(key(1), day(0), 2).await.unwrap();
        assert_eq!(limited.len(), 2);

        let history = store.lookup_history(key(1), day(2)).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(store.count(key(2)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_repeated_upsert_is_idempotent() {
        let store = InMemoryPredictionStore::new();
        let first = store.upsert(key(1), day(0), 1.1, 1.0).await.unwrap();
        let again = store.upsert(key(1), day(0), 1.1, 1.0).await.unwrap();
        assert_eq!(first, again);
        assert_eq!(store.count(key(1)).await.unwrap(), 1);

        let moved = store.upsert(key(1), day(0), 1.2, 1.05).await.unwrap();
        assert_eq!(moved.value, 1.2);
        assert_eq!(moved.last_live_value, 1.05);
        assert_eq!(store.count(key(1)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_catalog_hides_disabled_entries() {
        let catalog = InMemoryCatalog::seeded(&["EURUSD", "GBPUSD"], &["D1"], &["LSTM"])
            .await
            .unwrap();
        let gbp = catalog
            .find(CatalogTable::CurrencyPairs, "GBPUSD")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(gbp.id, 2);

        catalog
            .set_enabled(CatalogTable::CurrencyPairs, "GBPUSD", false)
            .await
            .unwrap();
        assert!(
            catalog
                .find(CatalogTable::CurrencyPairs, "GBPUSD")
                .await
                .unwrap()
                .is_none()
        );
        assert_eq!(
            catalog
                .register(CatalogTable::CurrencyPairs, "GBPUSD")
                .await
                .unwrap(),
            2
        );
        assert!(
            catalog
                .set_enabled(CatalogTable::Periods, "W1", true)
                .await
                .is_err()
        );
    }
}
