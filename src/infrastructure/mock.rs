use crate::application::ml::regressor::Regressor;
use crate::domain::forecasting::types::{Bar, FeatureVector};
use anyhow::{Result, bail};
use chrono::{DateTime, Duration, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Deterministic regressor: next normalized close = last normalized close + drift.
/// Counts invocations so tests can assert cache hits skip inference.
pub struct MockRegressor {
    sequence_length: usize,
    drift: f64,
    fail: bool,
    calls: AtomicUsize,
}

impl MockRegressor {
    pub fn new(sequence_length: usize, drift: f64) -> Self {
        Self {
            sequence_length,
            drift,
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    /// Regressor whose every prediction errors
    pub fn failing(sequence_length: usize) -> Self {
        Self {
            fail: true,
            ..Self::new(sequence_length, 0.0)
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Regressor for MockRegressor {
    fn predict(&self, window: &[FeatureVector]) -> Result<f64> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            bail!("mock regressor failure");
        }
        match window.last() {
            Some(last) => Ok(last.close + self.drift),
            None => bail!("empty window"),
        }
    }

    fn sequence_length(&self) -> usize {
        self.sequence_length
    }

    fn name(&self) -> &str {
        "Mock Drift Regressor"
    }
}

/// Daily bars with closes `start, start + step, ...`, stamped from `first_time`.
pub fn linear_bars(count: usize, start: f64, step: f64, first_time: DateTime<Utc>) -> Vec<Bar> {
    (0..count)
        .map(|i| {
            let close = start + step * i as f64;
            Bar {
                time: first_time + Duration::days(i as i64),
                open: close - step / 2.0,
                high: close + 0.0005,
                low: close - 0.0005,
                close,
                volume: 10_000.0,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_regressor_counts_calls() {
        let regressor = MockRegressor::new(2, 0.5);
        let window = vec![
            FeatureVector::default(),
            FeatureVector {
                close: 1.0,
                ..Default::default()
            },
        ];
        assert_eq!(regressor.predict(&window).unwrap(), 1.5);
        assert_eq!(regressor.calls(), 1);

        let failing = MockRegressor::failing(2);
        assert!(failing.predict(&window).is_err());
        assert_eq!(failing.calls(), 1);
    }
}
