use crate::domain::forecasting::types::FeatureVector;
use anyhow::Result;

/// Sequence model: a normalized window of feature rows (oldest first)
/// in, one normalized next-step close out.
///
/// Implementations must be deterministic for a given window; the forecast
/// cache assumes that regenerating from the same input converges.
pub trait Regressor: Send + Sync {
    /// Predict the normalized close of the bucket following the window
    fn predict(&self, window: &[FeatureVector]) -> Result<f64>;

    /// Window length (rows) the model was trained on
    fn sequence_length(&self) -> usize;

    /// Get model name/type
    fn name(&self) -> &str;
}
