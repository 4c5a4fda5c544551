//! Persistence and model artifact configuration parsing from environment variables.

use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;

/// Persistence environment configuration
#[derive(Debug, Clone)]
pub struct PersistenceEnvConfig {
    pub database_url: String,
    pub max_connections: u32,
}

impl Default for PersistenceEnvConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://data/predictions.db".to_string(),
            max_connections: 5,
        }
    }
}

impl PersistenceEnvConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            database_url: env::var("DATABASE_URL").unwrap_or(defaults.database_url),
            max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                .unwrap_or_else(|_| defaults.max_connections.to_string())
                .parse::<u32>()
                .context("Failed to parse DATABASE_MAX_CONNECTIONS")?,
        })
    }
}

/// Model artifact environment configuration
#[derive(Debug, Clone)]
pub struct ModelEnvConfig {
    pub models_dir: PathBuf,
}

impl Default for ModelEnvConfig {
    fn default() -> Self {
        Self {
            models_dir: PathBuf::from("models"),
        }
    }
}

impl ModelEnvConfig {
    pub fn from_env() -> Self {
        Self {
            models_dir: env::var("MODELS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| Self::default().models_dir),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_persistence_config_defaults() {
        let config = PersistenceEnvConfig::default();
        assert_eq!(config.database_url, "sqlite://data/predictions.db");
        assert_eq!(config.max_connections, 5);
        assert_eq!(ModelEnvConfig::default().models_dir, PathBuf::from("models"));
    }
}
