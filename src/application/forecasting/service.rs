use super::feature_pipeline::{FeaturePipeline, validate_bars};
use super::forecaster::{Forecaster, Window};
use super::single_flight::KeyedLocks;
use crate::application::ml::model_registry::ModelRegistry;
use crate::config::ForecastEnvConfig;
use crate::domain::errors::{ForecastError, ForecastResult};
use crate::domain::forecasting::types::{
    Bar, CacheState, CachedPrediction, ForecastPoint, PredictionKey,
};
use crate::domain::market::period::Period;
use crate::domain::repositories::{CatalogRepository, CatalogTable, PredictionStore};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One forecast call: recent bars for a pair/period plus an optional sentiment score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastRequest {
    pub pair: String,
    pub period: Period,
    pub bars: Vec<Bar>,
    /// Falls back to the configured default when absent
    pub steps: Option<usize>,
    pub sentiment: Option<f64>,
}

/// A forecast series as served, with the cache state it was found in
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForecastSeries {
    pub model: String,
    pub state: CacheState,
    pub points: Vec<ForecastPoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForecastResponse {
    pub pair: String,
    pub period: Period,
    pub live_value: f64,
    pub plain: ForecastSeries,
    pub sentiment: ForecastSeries,
}

/// Resolved catalog ids for one request
struct ResolvedKeys {
    plain: PredictionKey,
    sentiment: PredictionKey,
}

/// Serves forecasts from the prediction cache, regenerating any series whose
/// cached batch is missing or was produced against a different live close.
pub struct ForecastService {
    store: Arc<dyn PredictionStore>,
    catalog: Arc<dyn CatalogRepository>,
    models: Arc<dyn ModelRegistry>,
    pipeline: FeaturePipeline,
    config: ForecastEnvConfig,
    in_flight: KeyedLocks<(i64, i64)>,
}

impl ForecastService {
    pub fn new(
        store: Arc<dyn PredictionStore>,
        catalog: Arc<dyn CatalogRepository>,
        models: Arc<dyn ModelRegistry>,
        config: ForecastEnvConfig,
    ) -> ForecastResult<Self> {
        config
            .validate()
            .map_err(|e| ForecastError::invalid(format!("invalid forecast config: {:#}", e)))?;
        let pipeline = FeaturePipeline::new(config.indicator_params(), config.warmup_policy)?;
        Ok(Self {
            store,
            catalog,
            models,
            pipeline,
            config,
            in_flight: KeyedLocks::new(),
        })
    }

    pub async fn forecast(&self, request: ForecastRequest) -> ForecastResult<ForecastResponse> {
        let steps = request.steps.unwrap_or(self.config.steps);
        if steps == 0 || steps > self.config.max_steps {
            return Err(ForecastError::invalid(format!(
                "steps must be between 1 and {}, got {}",
                self.config.max_steps, steps
            )));
        }
        if let Some(score) = request.sentiment
            && !score.is_finite()
        {
            return Err(ForecastError::invalid(format!(
                "sentiment must be finite, got {}",
                score
            )));
        }
        validate_bars(&request.bars)?;
        let last_bar = *request
            .bars
            .last()
            .ok_or_else(|| ForecastError::invalid("no bars supplied"))?;

        let pair = normalize_pair(&request.pair)?;
        let period = request.period;
        let dates = period
            .forecast_dates(last_bar.time, steps)
            .map_err(|e| ForecastError::invalid(e.to_string()))?;
        let anchor = *dates
            .first()
            .ok_or_else(|| ForecastError::invalid("no forecast dates"))?;
        let keys = self.resolve_keys(&pair, period).await?;

        let live_value = last_bar.close;

        // Concurrent callers for the same pair and period wait here, then see
        // whatever the first caller wrote.
        let _guard = self
            .in_flight
            .lock(&(keys.plain.currency_pair_id, keys.plain.period_id))
            .await;

        let plain_batch = self.lookup(keys.plain, anchor, steps).await?;
        let sentiment_batch = self.lookup(keys.sentiment, anchor, steps).await?;
        let plain_state = CacheState::classify(&plain_batch, steps, live_value);
        let sentiment_state = CacheState::classify(&sentiment_batch, steps, live_value);
        info!(
            "Forecast {} {}: plain={} sentiment={} (live={}, anchor={})",
            pair, period, plain_state, sentiment_state, live_value, anchor
        );

        if plain_state == CacheState::Fresh && sentiment_state == CacheState::Fresh {
            return Ok(ForecastResponse {
                pair,
                period,
                live_value,
                plain: self.cached_series(&self.config.plain_model_name, &plain_batch),
                sentiment: self.cached_series(&self.config.sentiment_model_name, &sentiment_batch),
            });
        }

        let (forecaster, window) = self.prepare(&pair, period, &request.bars)?;

        // Without a sentiment score the sentiment series equals the plain one,
        // so a single rollout serves both.
        let need_plain = plain_state != CacheState::Fresh
            || (sentiment_state != CacheState::Fresh && request.sentiment.is_none());
        let need_sentiment = sentiment_state != CacheState::Fresh && request.sentiment.is_some();

        let (plain_points, sentiment_points) = tokio::try_join!(
            spawn_rollout(
                need_plain,
                forecaster.clone(),
                window.clone(),
                dates.clone(),
                None
            ),
            spawn_rollout(
                need_sentiment,
                forecaster,
                window,
                dates.clone(),
                request.sentiment
            ),
        )?;

        let plain = match plain_state {
            CacheState::Fresh => self.cached_series(&self.config.plain_model_name, &plain_batch),
            state => {
                let points = plain_points.clone().unwrap_or_default();
                self.persist(keys.plain, &points, live_value).await?;
                ForecastSeries {
                    model: self.config.plain_model_name.clone(),
                    state,
                    points,
                }
            }
        };

        let sentiment = match sentiment_state {
            CacheState::Fresh => {
                self.cached_series(&self.config.sentiment_model_name, &sentiment_batch)
            }
            state => {
                let points = sentiment_points.or(plain_points).unwrap_or_default();
                self.persist(keys.sentiment, &points, live_value).await?;
                ForecastSeries {
                    model: self.config.sentiment_model_name.clone(),
                    state,
                    points,
                }
            }
        };

        Ok(ForecastResponse {
            pair,
            period,
            live_value,
            plain,
            sentiment,
        })
    }

    /// Stored predictions for `model_name` dated strictly before `before`
    pub async fn past_predictions(
        &self,
        pair: &str,
        period: Period,
        model_name: &str,
        before: DateTime<Utc>,
    ) -> ForecastResult<Vec<CachedPrediction>> {
        let pair = normalize_pair(pair)?;
        let key = PredictionKey {
            currency_pair_id: self.catalog_id(CatalogTable::CurrencyPairs, &pair).await?,
            period_id: self.catalog_id(CatalogTable::Periods, period.as_str()).await?,
            prediction_model_id: self
                .catalog_id(CatalogTable::PredictionModels, model_name)
                .await?,
        };
        self.store
            .lookup_history(key, before)
            .await
            .map_err(ForecastError::persistence("lookup history"))
    }

    async fn resolve_keys(&self, pair: &str, period: Period) -> ForecastResult<ResolvedKeys> {
        let currency_pair_id = self.catalog_id(CatalogTable::CurrencyPairs, pair).await?;
        let period_id = self
            .catalog_id(CatalogTable::Periods, period.as_str())
            .await?;
        let plain_model_id = self
            .catalog_id(CatalogTable::PredictionModels, &self.config.plain_model_name)
            .await?;
        let sentiment_model_id = self
            .catalog_id(
                CatalogTable::PredictionModels,
                &self.config.sentiment_model_name,
            )
            .await?;

        Ok(ResolvedKeys {
            plain: PredictionKey {
                currency_pair_id,
                period_id,
                prediction_model_id: plain_model_id,
            },
            sentiment: PredictionKey {
                currency_pair_id,
                period_id,
                prediction_model_id: sentiment_model_id,
            },
        })
    }

    async fn catalog_id(&self, table: CatalogTable, name: &str) -> ForecastResult<i64> {
        let entry = self
            .catalog
            .find(table, name)
            .await
            .map_err(ForecastError::persistence("catalog lookup"))?;
        entry.map(|e| e.id).ok_or_else(|| {
            warn!("Rejected unknown or disabled {}: {}", table.kind(), name);
            ForecastError::UnsupportedKey {
                kind: table.kind(),
                name: name.to_string(),
            }
        })
    }

    async fn lookup(
        &self,
        key: PredictionKey,
        anchor: DateTime<Utc>,
        steps: usize,
    ) -> ForecastResult<Vec<CachedPrediction>> {
        self.store
            .lookup_batch(key, anchor, steps)
            .await
            .map_err(ForecastError::persistence("lookup batch"))
    }

    /// Loads the model and builds the normalized input window from `bars`
    fn prepare(
        &self,
        pair: &str,
        period: Period,
        bars: &[Bar],
    ) -> ForecastResult<(Forecaster, Window)> {
        let name = format!("{} {}", pair, period);
        let handle = self
            .models
            .resolve(pair, period)
            .map_err(|source| ForecastError::ModelUnavailable {
                name: name.clone(),
                source,
            })?
            .ok_or(ForecastError::UnsupportedKey { kind: "model", name })?;
        let forecaster = Forecaster::new(&handle, self.config.sentiment_policy());

        let features = self.pipeline.derive(bars)?;
        let length = forecaster.sequence_length();
        if features.len() < length {
            return Err(ForecastError::InsufficientData {
                required: self.pipeline.warmup_rows() + length,
                available: bars.len(),
            });
        }
        debug!(
            "Derived {} feature rows from {} bars for {} (window {})",
            features.len(),
            bars.len(),
            forecaster.model_name(),
            length
        );

        let window = forecaster.prepare_window(&features)?;
        Ok((forecaster, window))
    }

    /// Upserts points in step order. Rows written before a failure stay written.
    async fn persist(
        &self,
        key: PredictionKey,
        points: &[ForecastPoint],
        live_value: f64,
    ) -> ForecastResult<()> {
        for point in points {
            self.store
                .upsert(key, point.date, point.value, live_value)
                .await
                .map_err(ForecastError::persistence("upsert"))?;
        }
        info!("Stored {} predictions for {}", points.len(), key);
        Ok(())
    }

    fn cached_series(&self, model: &str, batch: &[CachedPrediction]) -> ForecastSeries {
        ForecastSeries {
            model: model.to_string(),
            state: CacheState::Fresh,
            points: batch
                .iter()
                .enumerate()
                .map(|(step_index, row)| ForecastPoint {
                    step_index,
                    value: row.value,
                    date: row.date,
                })
                .collect(),
        }
    }
}

fn normalize_pair(pair: &str) -> ForecastResult<String> {
    let pair = pair.trim().to_uppercase();
    if pair.is_empty() {
        return Err(ForecastError::invalid("currency pair must not be empty"));
    }
    Ok(pair)
}

/// Runs a rollout on the blocking pool, or nothing when `enabled` is false
async fn spawn_rollout(
    enabled: bool,
    forecaster: Forecaster,
    window: Window,
    dates: Vec<DateTime<Utc>>,
    sentiment: Option<f64>,
) -> ForecastResult<Option<Vec<ForecastPoint>>> {
    if !enabled {
        return Ok(None);
    }
    tokio::task::spawn_blocking(move || forecaster.rollout(&window, &dates, sentiment))
        .await
        .map_err(|e| ForecastError::Regressor {
            step: 0,
            source: anyhow::anyhow!("rollout task failed: {}", e),
        })?
        .map(Some)
}
