//! Forecast configuration parsing from environment variables.
//!
//! This module handles rollout length, sentiment bias and feature warm-up settings.

use crate::application::forecasting::feature_pipeline::{IndicatorParams, WarmupPolicy};
use crate::application::forecasting::forecaster::SentimentPolicy;
use anyhow::{Context, Result, bail};
use std::env;
use std::str::FromStr;

/// Forecast environment configuration
#[derive(Debug, Clone)]
pub struct ForecastEnvConfig {
    /// Steps forecast when a request does not specify a count
    pub steps: usize,
    /// Largest step count a single request may ask for
    pub max_steps: usize,
    pub sentiment_bias_factor: f64,
    pub sentiment_clamp_min: f64,
    pub sentiment_clamp_max: f64,
    pub warmup_policy: WarmupPolicy,

    // Indicators
    pub rsi_period: usize,
    pub macd_fast_period: usize,
    pub macd_slow_period: usize,
    pub macd_signal_period: usize,

    // Catalog names under which each series is cached
    pub plain_model_name: String,
    pub sentiment_model_name: String,
}

impl Default for ForecastEnvConfig {
    fn default() -> Self {
        Self {
            steps: 5,
            max_steps: 365,
            sentiment_bias_factor: 0.1,
            sentiment_clamp_min: -1.0,
            sentiment_clamp_max: 1.0,
            warmup_policy: WarmupPolicy::Strict,
            rsi_period: 14,
            macd_fast_period: 12,
            macd_slow_period: 26,
            macd_signal_period: 9,
            plain_model_name: "LSTM".to_string(),
            sentiment_model_name: "LSTM + Sentiment".to_string(),
        }
    }
}

impl ForecastEnvConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let warmup_policy = env::var("FEATURE_WARMUP")
            .unwrap_or_else(|_| defaults.warmup_policy.to_string())
            .parse::<WarmupPolicy>()
            .context("Failed to parse FEATURE_WARMUP")?;

        let config = Self {
            steps: Self::parse("FORECAST_STEPS", defaults.steps)?,
            max_steps: Self::parse("MAX_FORECAST_STEPS", defaults.max_steps)?,
            sentiment_bias_factor: Self::parse(
                "SENTIMENT_BIAS_FACTOR",
                defaults.sentiment_bias_factor,
            )?,
            sentiment_clamp_min: Self::parse("SENTIMENT_CLAMP_MIN", defaults.sentiment_clamp_min)?,
            sentiment_clamp_max: Self::parse("SENTIMENT_CLAMP_MAX", defaults.sentiment_clamp_max)?,
            warmup_policy,
            rsi_period: Self::parse("RSI_PERIOD", defaults.rsi_period)?,
            macd_fast_period: Self::parse("MACD_FAST_PERIOD", defaults.macd_fast_period)?,
            macd_slow_period: Self::parse("MACD_SLOW_PERIOD", defaults.macd_slow_period)?,
            macd_signal_period: Self::parse("MACD_SIGNAL_PERIOD", defaults.macd_signal_period)?,
            plain_model_name: env::var("PLAIN_MODEL_NAME").unwrap_or(defaults.plain_model_name),
            sentiment_model_name: env::var("SENTIMENT_MODEL_NAME")
                .unwrap_or(defaults.sentiment_model_name),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.steps == 0 {
            bail!("FORECAST_STEPS must be > 0");
        }
        if self.steps > self.max_steps {
            bail!(
                "FORECAST_STEPS ({}) must not exceed MAX_FORECAST_STEPS ({})",
                self.steps,
                self.max_steps
            );
        }
        for (key, value) in [
            ("SENTIMENT_BIAS_FACTOR", self.sentiment_bias_factor),
            ("SENTIMENT_CLAMP_MIN", self.sentiment_clamp_min),
            ("SENTIMENT_CLAMP_MAX", self.sentiment_clamp_max),
        ] {
            if !value.is_finite() {
                bail!("{} must be finite, got {}", key, value);
            }
        }
        if self.sentiment_clamp_min > self.sentiment_clamp_max {
            bail!(
                "SENTIMENT_CLAMP_MIN ({}) must not exceed SENTIMENT_CLAMP_MAX ({})",
                self.sentiment_clamp_min,
                self.sentiment_clamp_max
            );
        }
        if self.plain_model_name == self.sentiment_model_name {
            bail!("PLAIN_MODEL_NAME and SENTIMENT_MODEL_NAME must differ");
        }
        Ok(())
    }

    pub fn sentiment_policy(&self) -> SentimentPolicy {
        SentimentPolicy {
            bias_factor: self.sentiment_bias_factor,
            clamp_min: self.sentiment_clamp_min,
            clamp_max: self.sentiment_clamp_max,
        }
    }

    pub fn indicator_params(&self) -> IndicatorParams {
        IndicatorParams {
            rsi_window: self.rsi_period,
            macd_fast: self.macd_fast_period,
            macd_slow: self.macd_slow_period,
            macd_signal: self.macd_signal_period,
        }
    }

    fn parse<T: FromStr>(key: &str, default: T) -> Result<T>
    where
        T: ToString,
        <T as FromStr>::Err: std::error::Error + Send + Sync + 'static,
    {
        env::var(key)
            .unwrap_or_else(|_| default.to_string())
            .parse::<T>()
            .context(format!("Failed to parse {}", key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forecast_config_defaults() {
        let config = ForecastEnvConfig::default();
        assert_eq!(config.steps, 5);
        assert_eq!(config.sentiment_policy(), SentimentPolicy::default());
        assert_eq!(config.indicator_params(), IndicatorParams::default());
        assert_eq!(config.warmup_policy, WarmupPolicy::Strict);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_inverted_clamp() {
        let config = ForecastEnvConfig {
            sentiment_clamp_min: 1.0,
            sentiment_clamp_max: -1.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_non_finite_sentiment_settings() {
        let nan_clamp = ForecastEnvConfig {
            sentiment_clamp_min: f64::NAN,
            ..Default::default()
        };
        assert!(nan_clamp.validate().is_err());

        let infinite_bias = ForecastEnvConfig {
            sentiment_bias_factor: f64::INFINITY,
            ..Default::default()
        };
        assert!(infinite_bias.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_default_steps_above_limit() {
        let config = ForecastEnvConfig {
            steps: 10,
            max_steps: 5,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_shared_model_name() {
        let config = ForecastEnvConfig {
            sentiment_model_name: "LSTM".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
