// Feature derivation, rollout and the cached forecast service
pub mod forecasting;

// Model artifacts: regressors, normalizers and their registry
pub mod ml;
