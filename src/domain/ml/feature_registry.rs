use crate::domain::forecasting::types::FeatureVector;

/// Ordered list of feature names.
/// This order MUST match the column order the scaler and model were fitted on.
/// Any change here is a breaking change for stored model artifacts.
pub const FEATURE_NAMES: &[&str] = &[
    "open",
    "high",
    "low",
    "close",
    "volume",
    "rsi",
    "macd",
    "signal",
    "histogram",
];

pub const FEATURE_COUNT: usize = 9;

/// Position of the close field in `FEATURE_NAMES`.
pub const CLOSE_INDEX: usize = 3;

/// Flattens a window (oldest row first) into a single row-major vector
/// for regressors that take one flat sample per prediction.
pub fn window_to_vector(window: &[FeatureVector]) -> Vec<f64> {
    window.iter().flat_map(|row| row.to_array()).collect()
}
