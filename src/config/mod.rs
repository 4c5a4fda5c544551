//! Configuration module for fxcast.
//!
//! This module provides structured configuration loading from environment variables,
//! organized by concern: Forecast, Persistence and Model artifacts.

mod forecast_config;
mod persistence_config;

pub use forecast_config::ForecastEnvConfig;
pub use persistence_config::{ModelEnvConfig, PersistenceEnvConfig};

use anyhow::{Context, Result};

/// Main application configuration.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub forecast: ForecastEnvConfig,
    pub persistence: PersistenceEnvConfig,
    pub models: ModelEnvConfig,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            forecast: ForecastEnvConfig::from_env().context("Failed to load forecast config")?,
            persistence: PersistenceEnvConfig::from_env()
                .context("Failed to load persistence config")?,
            models: ModelEnvConfig::from_env(),
        })
    }
}
