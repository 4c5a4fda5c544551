use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Pipeline stage a forecast failure originated from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Stage {
    Request,
    Features,
    Rollout,
    Store,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Request => write!(f, "request"),
            Stage::Features => write!(f, "feature derivation"),
            Stage::Rollout => write!(f, "rollout"),
            Stage::Store => write!(f, "prediction store"),
        }
    }
}

/// Errors surfaced by feature derivation, rollout and the prediction store
#[derive(Debug, Error)]
pub enum ForecastError {
    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: String },

    #[error("Insufficient data: need at least {required} bars, got {available}")]
    InsufficientData { required: usize, available: usize },

    #[error("Unsupported {kind}: {name}")]
    UnsupportedKey { kind: &'static str, name: String },

    #[error("Shape mismatch in {what}: expected {expected}, got {actual}")]
    ShapeMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("Regressor failed at step {step}: {source}")]
    Regressor {
        step: usize,
        #[source]
        source: anyhow::Error,
    },

    #[error("Normalizer failed: {source}")]
    Normalizer {
        #[source]
        source: anyhow::Error,
    },

    #[error("Model for {name} could not be loaded: {source}")]
    ModelUnavailable {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Persistence error during {operation}: {source}")]
    Persistence {
        operation: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

impl ForecastError {
    pub fn stage(&self) -> Stage {
        match self {
            ForecastError::InvalidRequest { .. } | ForecastError::UnsupportedKey { .. } => {
                Stage::Request
            }
            ForecastError::InsufficientData { .. } => Stage::Features,
            ForecastError::ShapeMismatch { .. }
            | ForecastError::Regressor { .. }
            | ForecastError::Normalizer { .. }
            | ForecastError::ModelUnavailable { .. } => Stage::Rollout,
            ForecastError::Persistence { .. } => Stage::Store,
        }
    }

    /// Client errors (bad input or unknown keys) as opposed to server-side failures
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ForecastError::InvalidRequest { .. }
                | ForecastError::InsufficientData { .. }
                | ForecastError::UnsupportedKey { .. }
        )
    }

    pub fn invalid(reason: impl Into<String>) -> Self {
        ForecastError::InvalidRequest {
            reason: reason.into(),
        }
    }

    pub fn persistence(operation: &'static str) -> impl FnOnce(anyhow::Error) -> Self {
        move |source| ForecastError::Persistence { operation, source }
    }
}

pub type ForecastResult<T> = Result<T, ForecastError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insufficient_data_formatting() {
        let error = ForecastError::InsufficientData {
            required: 38,
            available: 20,
        };

        let msg = error.to_string();
        assert!(msg.contains("38"));
        assert!(msg.contains("20"));
        assert_eq!(error.stage(), Stage::Features);
        assert!(error.is_client_error());
    }

    #[test]
    fn test_persistence_error_keeps_operation() {
        let error = ForecastError::persistence("upsert")(anyhow::anyhow!("disk full"));
        let msg = error.to_string();
        assert!(msg.contains("upsert"));
        assert!(msg.contains("disk full"));
        assert_eq!(error.stage(), Stage::Store);
        assert!(!error.is_client_error());
    }

    #[test]
    fn test_rollout_stage_errors() {
        let error = ForecastError::Regressor {
            step: 2,
            source: anyhow::anyhow!("nan output"),
        };
        assert_eq!(error.stage(), Stage::Rollout);
        assert!(error.to_string().contains("step 2"));

        let error = ForecastError::UnsupportedKey {
            kind: "currency pair",
            name: "XXXYYY".to_string(),
        };
        assert_eq!(error.stage(), Stage::Request);
        assert_eq!(error.to_string(), "Unsupported currency pair: XXXYYY");
    }
}
