use crate::domain::ml::feature_registry::FEATURE_COUNT;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One OHLCV observation for a fixed period bucket.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Bar {
    pub time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    pub fn is_finite(&self) -> bool {
        [self.open, self.high, self.low, self.close, self.volume]
            .iter()
            .all(|v| v.is_finite())
    }
}

/// Model input row. Field order is the positional contract shared with the
/// normalizer and regressor artifacts (see `feature_registry::FEATURE_NAMES`).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct FeatureVector {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub rsi: f64,
    pub macd: f64,
    pub signal: f64,
    pub histogram: f64,
}

impl FeatureVector {
    pub fn to_array(&self) -> [f64; FEATURE_COUNT] {
        [
            self.open,
            self.high,
            self.low,
            self.close,
            self.volume,
            self.rsi,
            self.macd,
            self.signal,
            self.histogram,
        ]
    }

    pub fn from_array(values: [f64; FEATURE_COUNT]) -> Self {
        let [open, high, low, close, volume, rsi, macd, signal, histogram] = values;
        Self {
            open,
            high,
            low,
            close,
            volume,
            rsi,
            macd,
            signal,
            histogram,
        }
    }

    /// Copy of this row with the close field replaced.
    pub fn with_close(&self, close: f64) -> Self {
        Self { close, ..*self }
    }

    pub fn is_finite(&self) -> bool {
        self.to_array().iter().all(|v| v.is_finite())
    }
}

/// One forecasted close. `step_index` 0 is the nearest future bucket.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ForecastPoint {
    pub step_index: usize,
    pub value: f64,
    pub date: DateTime<Utc>,
}

/// Identifies one cached forecast series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PredictionKey {
    pub currency_pair_id: i64,
    pub period_id: i64,
    pub prediction_model_id: i64,
}

impl fmt::Display for PredictionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "pair={} period={} model={}",
            self.currency_pair_id, self.period_id, self.prediction_model_id
        )
    }
}

/// Persisted forecast row, unique on (key, date).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CachedPrediction {
    pub currency_pair_id: i64,
    pub period_id: i64,
    pub prediction_model_id: i64,
    pub date: DateTime<Utc>,
    pub value: f64,
    /// Actual close observed when the batch was generated. Staleness fingerprint.
    pub last_live_value: f64,
    pub updated_at: DateTime<Utc>,
}

impl CachedPrediction {
    pub fn key(&self) -> PredictionKey {
        PredictionKey {
            currency_pair_id: self.currency_pair_id,
            period_id: self.period_id,
            prediction_model_id: self.prediction_model_id,
        }
    }
}

/// Outcome of checking a cached batch against the current live close.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CacheState {
    Miss,
    Stale,
    Fresh,
}

impl CacheState {
    pub fn classify(batch: &[CachedPrediction], n: usize, live_value: f64) -> Self {
        if batch.len() < n {
            CacheState::Miss
        } else if is_fresh(batch, n, live_value) {
            CacheState::Fresh
        } else {
            CacheState::Stale
        }
    }
}

impl fmt::Display for CacheState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheState::Miss => write!(f, "MISS"),
            CacheState::Stale => write!(f, "STALE"),
            CacheState::Fresh => write!(f, "FRESH"),
        }
    }
}

/// True iff the batch holds exactly `n` rows and was generated against
/// `live_value`. Any movement of the live close invalidates the whole batch.
pub fn is_fresh(batch: &[CachedPrediction], n: usize, live_value: f64) -> bool {
    batch.len() == n
        && batch
            .first()
            .is_some_and(|first| first.last_live_value == live_value)
}

/// Enabled catalog row (currency pair, period or prediction model).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub id: i64,
    pub name: String,
    pub enabled: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ml::feature_registry::CLOSE_INDEX;
    use chrono::TimeZone;

    fn row(live: f64, day: u32) -> CachedPrediction {
        CachedPrediction {
            currency_pair_id: 1,
            period_id: 1,
            prediction_model_id: 1,
            date: Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap(),
            value: 1.1,
            last_live_value: live,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_feature_vector_array_order() {
        let fv = FeatureVector {
            open: 1.0,
            high: 2.0,
            low: 3.0,
            close: 4.0,
            volume: 5.0,
            rsi: 6.0,
            macd: 7.0,
            signal: 8.0,
            histogram: 9.0,
        };
        let arr = fv.to_array();
        assert_eq!(arr[CLOSE_INDEX], 4.0);
        assert_eq!(FeatureVector::from_array(arr), fv);
        assert_eq!(fv.with_close(42.0).close, 42.0);
        assert_eq!(fv.with_close(42.0).open, 1.0);
    }

    #[test]
    fn test_classify_states() {
        let batch = vec![row(1.05, 1), row(1.05, 2), row(1.05, 3)];
        assert_eq!(CacheState::classify(&batch, 3, 1.05), CacheState::Fresh);
        assert_eq!(CacheState::classify(&batch, 3, 1.06), CacheState::Stale);
        assert_eq!(CacheState::classify(&batch[..2], 3, 1.05), CacheState::Miss);
        assert_eq!(CacheState::classify(&batch[..2], 3, 9.99), CacheState::Miss);
        assert_eq!(CacheState::classify(&[], 3, 1.05), CacheState::Miss);
    }

    #[test]
    fn test_fingerprint_only_checks_first_row() {
        let batch = vec![row(1.05, 1), row(2.0, 2)];
        assert!(is_fresh(&batch, 2, 1.05));
        assert!(!is_fresh(&batch, 3, 1.05));
    }
}
