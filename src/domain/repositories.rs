//! Repository Pattern Abstractions
//!
//! Persistence seams for the forecast cache:
//! - `PredictionStore`: keyed forecast rows with a live-close fingerprint
//! - `CatalogRepository`: enabled currency pairs, periods and prediction models
//!
//! Both have a SQLite implementation (`infrastructure::persistence`) and an
//! in-memory one (`infrastructure::repositories`) used by tests.

use crate::domain::forecasting::types::{CachedPrediction, CatalogEntry, PredictionKey};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Cached forecasts keyed by (pair, period, model, date)
#[async_trait]
pub trait PredictionStore: Send + Sync {
    /// Up to `n` rows with `date >= anchor`, ordered by date ascending
    async fn lookup_batch(
        &self,
        key: PredictionKey,
        anchor: DateTime<Utc>,
        n: usize,
    ) -> Result<Vec<CachedPrediction>>;

    /// Insert or overwrite the row for (key, date). Repeating a call with the
    /// same arguments leaves the store unchanged.
    async fn upsert(
        &self,
        key: PredictionKey,
        date: DateTime<Utc>,
        value: f64,
        live_value: f64,
    ) -> Result<CachedPrediction>;

    /// All rows with `date < before`, ordered by date ascending
    async fn lookup_history(
        &self,
        key: PredictionKey,
        before: DateTime<Utc>,
    ) -> Result<Vec<CachedPrediction>>;

    /// Total number of stored rows for a key
    async fn count(&self, key: PredictionKey) -> Result<usize>;
}

/// Named lookup tables. Only enabled entries are returned by `find`.
#[async_trait]
pub trait CatalogRepository: Send + Sync {
    async fn find(&self, table: CatalogTable, name: &str) -> Result<Option<CatalogEntry>>;

    /// Insert an entry if missing and mark it enabled; returns its id
    async fn register(&self, table: CatalogTable, name: &str) -> Result<i64>;

    async fn set_enabled(&self, table: CatalogTable, name: &str, enabled: bool) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CatalogTable {
    CurrencyPairs,
    Periods,
    PredictionModels,
}

impl CatalogTable {
    pub fn table_name(&self) -> &'static str {
        match self {
            CatalogTable::CurrencyPairs => "currency_pairs",
            CatalogTable::Periods => "periods",
            CatalogTable::PredictionModels => "prediction_models",
        }
    }

    /// Human readable kind, used in `UnsupportedKey` errors
    pub fn kind(&self) -> &'static str {
        match self {
            CatalogTable::CurrencyPairs => "currency pair",
            CatalogTable::Periods => "period",
            CatalogTable::PredictionModels => "prediction model",
        }
    }
}
