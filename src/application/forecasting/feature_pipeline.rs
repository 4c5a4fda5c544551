use crate::domain::errors::{ForecastError, ForecastResult};
use crate::domain::forecasting::types::{Bar, FeatureVector};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ta::Next;
use ta::indicators::SimpleMovingAverage;

/// When an EMA based indicator is considered defined.
///
/// `Strict` waits for `span` observations per EMA (and `signal` defined MACD
/// values for the signal line). `Lenient` treats every EMA as defined from its
/// first input. Whatever policy the model was trained with must be used here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WarmupPolicy {
    Strict,
    Lenient,
}

impl FromStr for WarmupPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "strict" => Ok(WarmupPolicy::Strict),
            "lenient" => Ok(WarmupPolicy::Lenient),
            _ => anyhow::bail!("Invalid warm-up policy: {}. Must be 'strict' or 'lenient'", s),
        }
    }
}

impl fmt::Display for WarmupPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WarmupPolicy::Strict => write!(f, "strict"),
            WarmupPolicy::Lenient => write!(f, "lenient"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndicatorParams {
    pub rsi_window: usize,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
}

impl Default for IndicatorParams {
    fn default() -> Self {
        Self {
            rsi_window: 14,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
        }
    }
}

/// Span-adjusted exponentially weighted mean:
/// `y_t = sum((1-a)^i * x_{t-i}) / sum((1-a)^i)` with `a = 2 / (span + 1)`.
struct AdjustedEma {
    decay: f64,
    weighted_sum: f64,
    weight_total: f64,
    seen: usize,
    min_periods: usize,
}

impl AdjustedEma {
    fn new(span: usize, min_periods: usize) -> Self {
        let alpha = 2.0 / (span as f64 + 1.0);
        Self {
            decay: 1.0 - alpha,
            weighted_sum: 0.0,
            weight_total: 0.0,
            seen: 0,
            min_periods: min_periods.max(1),
        }
    }

    fn next(&mut self, x: f64) -> Option<f64> {
        self.weighted_sum = x + self.decay * self.weighted_sum;
        self.weight_total = 1.0 + self.decay * self.weight_total;
        self.seen += 1;
        (self.seen >= self.min_periods).then(|| self.weighted_sum / self.weight_total)
    }
}

/// Rolling-mean RSI. The first price delta is taken as zero, so the value is
/// defined once `window` rows have been seen.
struct RollingRsi {
    gains: SimpleMovingAverage,
    losses: SimpleMovingAverage,
    window: usize,
    prev_close: Option<f64>,
    seen: usize,
}

impl RollingRsi {
    fn new(window: usize) -> ForecastResult<Self> {
        let sma = || {
            SimpleMovingAverage::new(window)
                .map_err(|e| ForecastError::invalid(format!("RSI window {}: {:?}", window, e)))
        };
        Ok(Self {
            gains: sma()?,
            losses: sma()?,
            window,
            prev_close: None,
            seen: 0,
        })
    }

    fn next(&mut self, close: f64) -> Option<f64> {
        let delta = self.prev_close.map_or(0.0, |prev| close - prev);
        self.prev_close = Some(close);
        self.seen += 1;

        let avg_gain = self.gains.next(delta.max(0.0));
        let avg_loss = self.losses.next((-delta).max(0.0));
        if self.seen < self.window {
            return None;
        }
        Some(rsi_from_averages(avg_gain, avg_loss))
    }
}

fn rsi_from_averages(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        100.0
    } else {
        100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
    }
}

/// Derives model feature rows (OHLCV + RSI + MACD family) from raw bars,
/// dropping warm-up rows where any indicator is still undefined.
#[derive(Debug, Clone, Copy)]
pub struct FeaturePipeline {
    params: IndicatorParams,
    policy: WarmupPolicy,
}

impl FeaturePipeline {
    pub fn new(params: IndicatorParams, policy: WarmupPolicy) -> ForecastResult<Self> {
        let IndicatorParams {
            rsi_window,
            macd_fast,
            macd_slow,
            macd_signal,
        } = params;
        if rsi_window == 0 || macd_fast == 0 || macd_slow == 0 || macd_signal == 0 {
            return Err(ForecastError::invalid(format!(
                "Indicator windows must be > 0: {:?}",
                params
            )));
        }
        Ok(Self { params, policy })
    }

    pub fn with_policy(policy: WarmupPolicy) -> Self {
        Self {
            params: IndicatorParams::default(),
            policy,
        }
    }

    /// Leading rows dropped from every derivation
    pub fn warmup_rows(&self) -> usize {
        let p = &self.params;
        let rsi = p.rsi_window - 1;
        let macd = match self.policy {
            WarmupPolicy::Strict => p.macd_fast.max(p.macd_slow) - 1 + p.macd_signal - 1,
            WarmupPolicy::Lenient => 0,
        };
        rsi.max(macd)
    }

    /// Fewest bars that yield at least one feature row
    pub fn min_bars(&self) -> usize {
        self.warmup_rows() + 1
    }

    /// Output has `bars.len() - warmup_rows()` rows, in input order.
    pub fn derive(&self, bars: &[Bar]) -> ForecastResult<Vec<FeatureVector>> {
        if bars.len() < self.min_bars() {
            return Err(ForecastError::InsufficientData {
                required: self.min_bars(),
                available: bars.len(),
            });
        }

        let p = &self.params;
        let (fast_min, slow_min, signal_min) = match self.policy {
            WarmupPolicy::Strict => (p.macd_fast, p.macd_slow, p.macd_signal),
            WarmupPolicy::Lenient => (1, 1, 1),
        };
        let mut rsi = RollingRsi::new(p.rsi_window)?;
        let mut fast = AdjustedEma::new(p.macd_fast, fast_min);
        let mut slow = AdjustedEma::new(p.macd_slow, slow_min);
        let mut signal = AdjustedEma::new(p.macd_signal, signal_min);

        let mut rows = Vec::with_capacity(bars.len().saturating_sub(self.warmup_rows()));
        for bar in bars {
            let rsi_val = rsi.next(bar.close);
            let macd_val = match (fast.next(bar.close), slow.next(bar.close)) {
                (Some(f), Some(s)) => Some(f - s),
                _ => None,
            };
            // Signal EMA only consumes defined MACD values
            let signal_val = macd_val.and_then(|m| signal.next(m));

            if let (Some(rsi), Some(macd), Some(signal)) = (rsi_val, macd_val, signal_val) {
                let row = FeatureVector {
                    open: bar.open,
                    high: bar.high,
                    low: bar.low,
                    close: bar.close,
                    volume: bar.volume,
                    rsi,
                    macd,
                    signal,
                    histogram: macd - signal,
                };
                if row.is_finite() {
                    rows.push(row);
                }
            }
        }

        if rows.is_empty() {
            return Err(ForecastError::InsufficientData {
                required: self.min_bars(),
                available: bars.len(),
            });
        }
        Ok(rows)
    }
}

impl Default for FeaturePipeline {
    fn default() -> Self {
        Self::with_policy(WarmupPolicy::Strict)
    }
}

/// Rejects empty, non-finite or non-increasing bar sequences
pub fn validate_bars(bars: &[Bar]) -> ForecastResult<()> {
    if bars.is_empty() {
        return Err(ForecastError::invalid("no bars supplied"));
    }
    if let Some(i) = bars.iter().position(|b| !b.is_finite()) {
        return Err(ForecastError::invalid(format!(
            "bar {} has a non-finite value",
            i
        )));
    }
    if let Some(i) = bars.windows(2).position(|w| w[1].time <= w[0].time) {
        return Err(ForecastError::invalid(format!(
            "bar times must be strictly increasing (bar {} at {})",
            i + 1,
            bars[i + 1].time
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::mock::linear_bars;
    use chrono::{TimeZone, Utc};

    fn bars(count: usize, start: f64, step: f64) -> Vec<Bar> {
        linear_bars(count, start, step, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
    }

    #[test]
    fn test_warmup_rows_per_policy() {
        assert_eq!(FeaturePipeline::with_policy(WarmupPolicy::Strict).warmup_rows(), 33);
        assert_eq!(FeaturePipeline::with_policy(WarmupPolicy::Lenient).warmup_rows(), 13);
    }

    #[test]
    fn test_derive_drops_warmup_rows() {
        let input = bars(40, 1.0, 0.001);
        for policy in [WarmupPolicy::Strict, WarmupPolicy::Lenient] {
            let pipeline = FeaturePipeline::with_policy(policy);
            let rows = pipeline.derive(&input).unwrap();
            assert_eq!(rows.len(), 40 - pipeline.warmup_rows());
            // Rows keep input order and carry the raw OHLCV of their bar
            assert_eq!(rows.last().unwrap().close, input[39].close);
            assert_eq!(rows[0].close, input[pipeline.warmup_rows()].close);
        }
    }

    #[test]
    fn test_rsi_monotonic_increase_is_100() {
        let rows = FeaturePipeline::with_policy(WarmupPolicy::Lenient)
            .derive(&bars(60, 1.0, 0.001))
            .unwrap();
        for row in rows {
            assert_eq!(row.rsi, 100.0);
        }
    }

    #[test]
    fn test_rsi_monotonic_decrease_is_0() {
        let rows = FeaturePipeline::with_policy(WarmupPolicy::Lenient)
            .derive(&bars(60, 2.0, -0.001))
            .unwrap();
        for row in rows {
            assert!(row.rsi.abs() < 1e-9, "rsi = {}", row.rsi);
        }
    }

    #[test]
    fn test_flat_prices_do_not_divide_by_zero() {
        let rows = FeaturePipeline::default().derive(&bars(40, 1.2, 0.0)).unwrap();
        for row in rows {
            assert_eq!(row.rsi, 100.0);
            assert!(row.macd.abs() < 1e-12);
            assert!(row.histogram.abs() < 1e-12);
        }
    }

    #[test]
    fn test_rsi_mixed_moves() {
        // Alternating +2/-1 moves: avg gain / avg loss -> 1 : 0.5 over even windows
        let mut input = bars(30, 1.0, 0.0);
        let mut close = 10.0;
        for (i, bar) in input.iter_mut().enumerate() {
            if i > 0 {
                close += if i % 2 == 1 { 2.0 } else { -1.0 };
            }
            bar.close = close;
        }
        let rows = FeaturePipeline::with_policy(WarmupPolicy::Lenient)
            .derive(&input)
            .unwrap();
        // Last window of 14 deltas covers i = 16..=29: 7 gains of 2, 7 losses of 1
        let rsi = rows.last().unwrap().rsi;
        let expected = 100.0 - 100.0 / (1.0 + 2.0);
        assert!((rsi - expected).abs() < 1e-9, "rsi = {}", rsi);
    }

    #[test]
    fn test_adjusted_ema_matches_closed_form() {
        let mut ema = AdjustedEma::new(3, 1);
        let xs = [1.0, 2.0, 3.0];
        let mut last = None;
        for x in xs {
            last = ema.next(x);
        }
        // alpha = 0.5: weights 1, 0.5, 0.25 on 3, 2, 1
        let expected = (3.0 + 0.5 * 2.0 + 0.25 * 1.0) / (1.0 + 0.5 + 0.25);
        assert!((last.unwrap() - expected).abs() < 1e-12);
    }

    #[test]
    fn test_strict_ema_waits_for_span() {
        let mut ema = AdjustedEma::new(3, 3);
        assert!(ema.next(1.0).is_none());
        assert!(ema.next(1.0).is_none());
        assert!(ema.next(1.0).is_some());
    }

    #[test]
    fn test_insufficient_data() {
        let pipeline = FeaturePipeline::default();
        let err = pipeline.derive(&bars(20, 1.0, 0.001)).unwrap_err();
        assert!(matches!(
            err,
            ForecastError::InsufficientData {
                required: 34,
                available: 20
            }
        ));
    }

    #[test]
    fn test_validate_bars() {
        let mut input = bars(5, 1.0, 0.01);
        assert!(validate_bars(&input).is_ok());
        assert!(validate_bars(&[]).is_err());

        input[3].time = input[2].time;
        assert!(validate_bars(&input).is_err());

        let mut input = bars(5, 1.0, 0.01);
        input[1].high = f64::NAN;
        assert!(validate_bars(&input).is_err());
    }

    #[test]
    fn test_warmup_policy_parsing() {
        assert_eq!("STRICT".parse::<WarmupPolicy>().unwrap(), WarmupPolicy::Strict);
        assert_eq!("lenient".parse::<WarmupPolicy>().unwrap(), WarmupPolicy::Lenient);
        assert!("loose".parse::<WarmupPolicy>().is_err());
    }
}
