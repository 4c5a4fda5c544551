use super::regressor::Regressor;
use crate::domain::forecasting::types::FeatureVector;
use crate::domain::ml::feature_registry::{FEATURE_COUNT, window_to_vector};
use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};
use smartcore::ensemble::random_forest_regressor::RandomForestRegressor;
use smartcore::linalg::basic::matrix::DenseMatrix;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tracing::info;

pub type ForestModel = RandomForestRegressor<f64, f64, DenseMatrix<f64>, Vec<f64>>;

/// On-disk model artifact: the fitted forest plus the window length it was
/// trained on. One sample is the flattened `sequence_length x 9` window.
#[derive(Serialize, Deserialize)]
pub struct ModelArtifact {
    pub sequence_length: usize,
    pub model: ForestModel,
}

pub struct SmartCoreRegressor {
    model: ForestModel,
    sequence_length: usize,
}

impl SmartCoreRegressor {
    pub fn new(model: ForestModel, sequence_length: usize) -> Self {
        Self {
            model,
            sequence_length,
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let file =
            File::open(path).with_context(|| format!("Failed to open model file {:?}", path))?;

        let artifact: ModelArtifact = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("Failed to deserialize ML model {:?}", path))?;
        if artifact.sequence_length == 0 {
            bail!("Model {:?} declares a zero sequence length", path);
        }

        info!(
            "Loaded random forest from {:?} (sequence_length={})",
            path, artifact.sequence_length
        );
        Ok(Self::new(artifact.model, artifact.sequence_length))
    }
}

impl Regressor for SmartCoreRegressor {
    fn predict(&self, window: &[FeatureVector]) -> Result<f64> {
        if window.len() != self.sequence_length {
            bail!(
                "Window has {} rows, model expects {}",
                window.len(),
                self.sequence_length
            );
        }

        let input_vec = window_to_vector(window);
        debug_assert_eq!(input_vec.len(), self.sequence_length * FEATURE_COUNT);

        let input_matrix = DenseMatrix::from_2d_vec(&vec![input_vec])
            .map_err(|e| anyhow!("Matrix creation failed: {}", e))?;

        let predictions = self
            .model
            .predict(&input_matrix)
            .map_err(|e| anyhow!("Prediction failed: {}", e))?;

        predictions
            .first()
            .copied()
            .ok_or_else(|| anyhow!("No prediction returned"))
    }

    fn sequence_length(&self) -> usize {
        self.sequence_length
    }

    fn name(&self) -> &str {
        "SmartCore Random Forest"
    }
}
