use super::normalizer::{MinMaxNormalizer, Normalizer};
use super::regressor::Regressor;
use super::smartcore_regressor::SmartCoreRegressor;
use crate::domain::market::period::Period;
use anyhow::{Result, anyhow};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use tracing::{info, warn};

/// Regressor and normalizer fitted together for one (pair, period)
#[derive(Clone)]
pub struct ModelHandle {
    pub regressor: Arc<dyn Regressor>,
    pub normalizer: Arc<dyn Normalizer>,
}

/// Resolves the model pair for a currency pair and period.
/// `Ok(None)` means no model exists for that key.
pub trait ModelRegistry: Send + Sync {
    fn resolve(&self, pair: &str, period: Period) -> Result<Option<ModelHandle>>;
}

type HandleCache = RwLock<HashMap<(String, Period), ModelHandle>>;

fn read_cached(cache: &HandleCache, key: &(String, Period)) -> Result<Option<ModelHandle>> {
    let map = cache
        .read()
        .map_err(|e| anyhow!("Model cache lock poisoned: {}", e))?;
    Ok(map.get(key).cloned())
}

/// Fixed set of handles registered up front
#[derive(Default)]
pub struct StaticModelRegistry {
    handles: HandleCache,
}

impl StaticModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, pair: &str, period: Period, handle: ModelHandle) -> Result<()> {
        let mut map = self
            .handles
            .write()
            .map_err(|e| anyhow!("Model cache lock poisoned: {}", e))?;
        map.insert((pair.to_uppercase(), period), handle);
        Ok(())
    }
}

impl ModelRegistry for StaticModelRegistry {
    fn resolve(&self, pair: &str, period: Period) -> Result<Option<ModelHandle>> {
        read_cached(&self.handles, &(pair.to_uppercase(), period))
    }
}

/// Loads artifacts from `{models_dir}/{PAIR}/{PERIOD}/model.json` and
/// `scaler.json`, keeping loaded handles for the life of the registry.
pub struct FsModelRegistry {
    models_dir: PathBuf,
    cache: HandleCache,
}

impl FsModelRegistry {
    pub fn new(models_dir: impl Into<PathBuf>) -> Self {
        Self {
            models_dir: models_dir.into(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    fn artifact_dir(&self, pair: &str, period: Period) -> PathBuf {
        self.models_dir.join(pair).join(period.as_str())
    }
}

impl ModelRegistry for FsModelRegistry {
    fn resolve(&self, pair: &str, period: Period) -> Result<Option<ModelHandle>> {
        let key = (pair.to_uppercase(), period);
        if let Some(handle) = read_cached(&self.cache, &key)? {
            return Ok(Some(handle));
        }

        let dir = self.artifact_dir(&key.0, period);
        let model_path = dir.join("model.json");
        let scaler_path = dir.join("scaler.json");
        if !model_path.exists() || !scaler_path.exists() {
            warn!("No model artifacts for {} {} under {:?}", key.0, period, dir);
            return Ok(None);
        }

        let handle = ModelHandle {
            regressor: Arc::new(SmartCoreRegressor::from_file(&model_path)?),
            normalizer: Arc::new(MinMaxNormalizer::from_file(&scaler_path)?),
        };
        info!("Loaded model artifacts for {} {}", key.0, period);

        let mut map = self
            .cache
            .write()
            .map_err(|e| anyhow!("Model cache lock poisoned: {}", e))?;
        Ok(Some(map.entry(key).or_insert(handle).clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::mock::MockRegressor;

    fn handle() -> ModelHandle {
        ModelHandle {
            regressor: Arc::new(MockRegressor::new(4, 0.01)),
            normalizer: Arc::new(
                MinMaxNormalizer::new(vec![0.0; 9], vec![1.0; 9], (0.0, 1.0)).unwrap(),
            ),
        }
    }

    #[test]
    fn test_static_registry_is_case_insensitive_on_pair() {
        let registry = StaticModelRegistry::new();
        registry.register("eurusd", Period::D1, handle()).unwrap();

        let found = registry.resolve("EURUSD", Period::D1).unwrap();
        assert_eq!(found.map(|h| h.regressor.sequence_length()), Some(4));
        assert!(registry.resolve("EURUSD", Period::H4).unwrap().is_none());
    }

    #[test]
    fn test_fs_registry_missing_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let registry = FsModelRegistry::new(dir.path());
        assert!(registry.resolve("AUDUSD", Period::D1).unwrap().is_none());
    }

    #[test]
    fn test_fs_registry_reports_corrupt_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let artifact_dir = dir.path().join("AUDUSD").join("D1");
        std::fs::create_dir_all(&artifact_dir).unwrap();
        std::fs::write(artifact_dir.join("model.json"), "{not json").unwrap();
        std::fs::write(artifact_dir.join("scaler.json"), "{}").unwrap();

        let registry = FsModelRegistry::new(dir.path());
        assert!(registry.resolve("audusd", Period::D1).is_err());
    }
}
