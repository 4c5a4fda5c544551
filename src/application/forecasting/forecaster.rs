use crate::application::ml::model_registry::ModelHandle;
use crate::application::ml::normalizer::Normalizer;
use crate::application::ml::regressor::Regressor;
use crate::domain::errors::{ForecastError, ForecastResult};
use crate::domain::forecasting::types::{FeatureVector, ForecastPoint};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::debug;

/// How a sentiment score perturbs reported forecast values
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SentimentPolicy {
    pub bias_factor: f64,
    pub clamp_min: f64,
    pub clamp_max: f64,
}

impl Default for SentimentPolicy {
    fn default() -> Self {
        Self {
            bias_factor: 0.1,
            clamp_min: -1.0,
            clamp_max: 1.0,
        }
    }
}

impl SentimentPolicy {
    /// Additive bias in raw price units
    pub fn bias(&self, sentiment: f64) -> f64 {
        sentiment.max(self.clamp_min).min(self.clamp_max) * self.bias_factor
    }
}

/// Fixed-length sliding window of normalized feature rows, oldest first
#[derive(Debug, Clone, PartialEq)]
pub struct Window {
    rows: Vec<FeatureVector>,
}

impl Window {
    pub fn new(rows: Vec<FeatureVector>) -> Self {
        Self { rows }
    }

    pub fn rows(&self) -> &[FeatureVector] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn last(&self) -> Option<&FeatureVector> {
        self.rows.last()
    }

    /// Drop the oldest row and append `row`
    fn slide(&mut self, row: FeatureVector) {
        if !self.rows.is_empty() {
            self.rows.remove(0);
        }
        self.rows.push(row);
    }
}

/// Autoregressive multi-step forecaster over one model handle.
/// Cheap to clone; rollouts never share mutable state.
#[derive(Clone)]
pub struct Forecaster {
    regressor: Arc<dyn Regressor>,
    normalizer: Arc<dyn Normalizer>,
    sentiment: SentimentPolicy,
}

impl Forecaster {
    pub fn new(handle: &ModelHandle, sentiment: SentimentPolicy) -> Self {
        Self {
            regressor: Arc::clone(&handle.regressor),
            normalizer: Arc::clone(&handle.normalizer),
            sentiment,
        }
    }

    pub fn sequence_length(&self) -> usize {
        self.regressor.sequence_length()
    }

    pub fn model_name(&self) -> &str {
        self.regressor.name()
    }

    /// Normalizes the trailing `sequence_length` feature rows into a window
    pub fn prepare_window(&self, features: &[FeatureVector]) -> ForecastResult<Window> {
        let length = self.sequence_length();
        if length == 0 || features.len() < length {
            return Err(ForecastError::ShapeMismatch {
                what: "feature rows for window",
                expected: length,
                actual: features.len(),
            });
        }

        let rows = features[features.len() - length..]
            .iter()
            .map(|row| {
                let normalized = self
                    .normalizer
                    .forward(row)
                    .map_err(|source| ForecastError::Normalizer { source })?;
                if !normalized.is_finite() {
                    return Err(ForecastError::Normalizer {
                        source: anyhow::anyhow!("non-finite normalized row {:?}", normalized),
                    });
                }
                Ok(normalized)
            })
            .collect::<ForecastResult<Vec<_>>>()?;
        Ok(Window::new(rows))
    }

    /// Rolls the window forward one step per entry in `dates`.
    ///
    /// Each step feeds the current window to the regressor, denormalizes the
    /// predicted close through the last row, then slides in a synthetic row
    /// carrying the unbiased normalized prediction. A sentiment score only
    /// shifts the reported values; it never enters the recurrence.
    pub fn rollout(
        &self,
        window: &Window,
        dates: &[DateTime<Utc>],
        sentiment: Option<f64>,
    ) -> ForecastResult<Vec<ForecastPoint>> {
        let expected = self.sequence_length();
        if window.len() != expected {
            return Err(ForecastError::ShapeMismatch {
                what: "window length",
                expected,
                actual: window.len(),
            });
        }
        let bias = sentiment.map(|s| self.sentiment.bias(s));

        let mut current = window.clone();
        let mut points = Vec::with_capacity(dates.len());
        for (step, date) in dates.iter().enumerate() {
            let predicted = self
                .regressor
                .predict(current.rows())
                .map_err(|source| ForecastError::Regressor { step, source })?;
            if !predicted.is_finite() {
                return Err(ForecastError::Regressor {
                    step,
                    source: anyhow::anyhow!("non-finite prediction {}", predicted),
                });
            }

            let last = *current.last().ok_or(ForecastError::ShapeMismatch {
                what: "window length",
                expected,
                actual: 0,
            })?;
            let synthetic = last.with_close(predicted);
            let raw = self
                .normalizer
                .inverse(&synthetic)
                .map_err(|source| ForecastError::Normalizer { source })?
                .close;

            let value = match bias {
                Some(b) => raw + b,
                None => raw,
            };
            debug!(step, predicted, raw, value, "rollout step");

            current.slide(synthetic);
            points.push(ForecastPoint {
                step_index: step,
                value,
                date: *date,
            });
        }
        Ok(points)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ml::normalizer::MinMaxNormalizer;
    use crate::infrastructure::mock::MockRegressor;
    use chrono::{Duration, TimeZone};

    const SEQ: usize = 4;

    fn forecaster(regressor: MockRegressor) -> Forecaster {
        // close spans 1.0..2.0 so normalized close = raw close - 1.0
        let mut min = vec![0.0; 9];
        let mut max = vec![1.0; 9];
        min[3] = 1.0;
        max[3] = 2.0;
        let handle = ModelHandle {
            regressor: Arc::new(regressor),
            normalizer: Arc::new(MinMaxNormalizer::new(min, max, (0.0, 1.0)).unwrap()),
        };
        Forecaster::new(&handle, SentimentPolicy::default())
    }

    fn features() -> Vec<FeatureVector> {
        (0..6)
            .map(|i| FeatureVector {
                close: 1.1 + 0.01 * i as f64,
                rsi: 0.5,
                ..Default::default()
            })
            .collect()
    }

    fn dates(n: usize) -> Vec<DateTime<Utc>> {
        let start = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        (0..n).map(|i| start + Duration::days(i as i64)).collect()
    }

    #[test]
    fn test_prepare_window_takes_trailing_rows() {
        let f = forecaster(MockRegressor::new(SEQ, 0.0));
        let window = f.prepare_window(&features()).unwrap();
        assert_eq!(window.len(), SEQ);
        // Last feature close 1.15 normalizes to 0.15
        assert!((window.last().unwrap().close - 0.15).abs() < 1e-12);

        let err = f.prepare_window(&features()[..3]).unwrap_err();
        assert!(matches!(err, ForecastError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_rollout_feeds_predictions_back() {
        let f = forecaster(MockRegressor::new(SEQ, 0.01));
        let window = f.prepare_window(&features()).unwrap();
        let points = f.rollout(&window, &dates(5), None).unwrap();

        assert_eq!(points.len(), 5);
        for (i, p) in points.iter().enumerate() {
            assert_eq!(p.step_index, i);
            assert_eq!(p.date, dates(5)[i]);
            // Each step adds the drift on top of the previous synthetic close
            let expected = 1.15 + 0.01 * (i as f64 + 1.0);
            assert!((p.value - expected).abs() < 1e-9, "{} vs {}", p.value, expected);
        }
    }

    #[test]
    fn test_rollout_is_deterministic() {
        let f = forecaster(MockRegressor::new(SEQ, 0.003));
        let window = f.prepare_window(&features()).unwrap();
        let a = f.rollout(&window, &dates(5), None).unwrap();
        let b = f.rollout(&window, &dates(5), None).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_zero_sentiment_matches_plain() {
        let f = forecaster(MockRegressor::new(SEQ, 0.003));
        let window = f.prepare_window(&features()).unwrap();
        let plain = f.rollout(&window, &dates(5), None).unwrap();
        let neutral = f.rollout(&window, &dates(5), Some(0.0)).unwrap();
        for (a, b) in plain.iter().zip(&neutral) {
            assert_eq!(a.value - b.value, 0.0);
        }
    }

    #[test]
    fn test_sentiment_is_clamped_and_additive() {
        let f = forecaster(MockRegressor::new(SEQ, 0.003));
        let window = f.prepare_window(&features()).unwrap();
        let plain = f.rollout(&window, &dates(5), None).unwrap();
        let max = f.rollout(&window, &dates(5), Some(1.0)).unwrap();
        let over = f.rollout(&window, &dates(5), Some(5.0)).unwrap();
        let min = f.rollout(&window, &dates(5), Some(-1.0)).unwrap();
        let under = f.rollout(&window, &dates(5), Some(-5.0)).unwrap();

        assert_eq!(max, over);
        assert_eq!(min, under);
        for i in 0..5 {
            // Bias does not compound across steps
            assert!((max[i].value - plain[i].value - 0.1).abs() < 1e-12);
            assert!((min[i].value - plain[i].value + 0.1).abs() < 1e-12);
        }
    }

    #[test]
    fn test_bias_with_unusable_bounds_does_not_panic() {
        let inverted = SentimentPolicy {
            bias_factor: 0.1,
            clamp_min: 1.0,
            clamp_max: -1.0,
        };
        assert!((inverted.bias(0.5) + 0.1).abs() < 1e-12);

        let nan_bounds = SentimentPolicy {
            bias_factor: 0.1,
            clamp_min: f64::NAN,
            clamp_max: f64::NAN,
        };
        assert!((nan_bounds.bias(0.5) - 0.05).abs() < 1e-12);
    }

    #[test]
    fn test_rollout_does_not_mutate_input_window() {
        let f = forecaster(MockRegressor::new(SEQ, 0.02));
        let window = f.prepare_window(&features()).unwrap();
        let before = window.clone();
        f.rollout(&window, &dates(3), Some(0.5)).unwrap();
        assert_eq!(window, before);
    }

    #[test]
    fn test_regressor_failure_propagates_with_step() {
        let f = forecaster(MockRegressor::failing(SEQ));
        let window = f.prepare_window(&features()).unwrap();
        let err = f.rollout(&window, &dates(3), None).unwrap_err();
        assert!(matches!(err, ForecastError::Regressor { step: 0, .. }));
    }

    #[test]
    fn test_window_length_mismatch() {
        let f = forecaster(MockRegressor::new(SEQ, 0.0));
        let window = Window::new(features()[..2].to_vec());
        let err = f.rollout(&window, &dates(3), None).unwrap_err();
        assert!(matches!(
            err,
            ForecastError::ShapeMismatch {
                expected: 4,
                actual: 2,
                ..
            }
        ));
    }
}
