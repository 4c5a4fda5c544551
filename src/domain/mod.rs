// Forecast value types and cache states
pub mod forecasting;

// Market periods and bucket alignment
pub mod market;

// Feature layout shared with model artifacts
pub mod ml;

// Repository traits
pub mod repositories;

// Domain-specific error types
pub mod errors;
