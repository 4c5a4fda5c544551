use crate::domain::forecasting::types::FeatureVector;
use crate::domain::ml::feature_registry::FEATURE_COUNT;
use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Invertible transform between raw feature units and model input space.
/// `inverse(forward(x))` must reproduce `x` within floating-point tolerance.
pub trait Normalizer: Send + Sync {
    fn forward(&self, row: &FeatureVector) -> Result<FeatureVector>;

    fn inverse(&self, row: &FeatureVector) -> Result<FeatureVector>;
}

fn default_feature_range() -> (f64, f64) {
    (0.0, 1.0)
}

/// Stored form of a fitted scaler
#[derive(Deserialize)]
struct ScalerParams {
    data_min: Vec<f64>,
    data_max: Vec<f64>,
    #[serde(default = "default_feature_range")]
    feature_range: (f64, f64),
}

/// Per-column min/max scaling, compatible with the scaler fitted offline.
///
/// Columns whose observed range is zero get a unit scale so the transform
/// stays invertible. Deserializing validates the bounds and derives the
/// per-column transform.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "ScalerParams")]
pub struct MinMaxNormalizer {
    data_min: Vec<f64>,
    data_max: Vec<f64>,
    feature_range: (f64, f64),
    #[serde(skip)]
    scale: Vec<f64>,
    #[serde(skip)]
    offset: Vec<f64>,
}

impl MinMaxNormalizer {
    pub fn new(data_min: Vec<f64>, data_max: Vec<f64>, feature_range: (f64, f64)) -> Result<Self> {
        let mut normalizer = Self {
            data_min,
            data_max,
            feature_range,
            scale: Vec::new(),
            offset: Vec::new(),
        };
        normalizer.prepare()?;
        Ok(normalizer)
    }

    /// Fit column bounds on raw rows
    pub fn fit(rows: &[FeatureVector]) -> Result<Self> {
        if rows.is_empty() {
            bail!("Cannot fit normalizer on zero rows");
        }
        let mut data_min = vec![f64::INFINITY; FEATURE_COUNT];
        let mut data_max = vec![f64::NEG_INFINITY; FEATURE_COUNT];
        for row in rows {
            for (i, v) in row.to_array().iter().enumerate() {
                data_min[i] = data_min[i].min(*v);
                data_max[i] = data_max[i].max(*v);
            }
        }
        Self::new(data_min, data_max, default_feature_range())
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("Failed to open scaler file {:?}", path))?;
        serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("Failed to deserialize scaler {:?}", path))
    }

    fn prepare(&mut self) -> Result<()> {
        if self.data_min.len() != FEATURE_COUNT || self.data_max.len() != FEATURE_COUNT {
            bail!(
                "Scaler expects {} columns, got min={} max={}",
                FEATURE_COUNT,
                self.data_min.len(),
                self.data_max.len()
            );
        }
        let (lo, hi) = self.feature_range;
        if !(hi - lo).is_finite() || hi <= lo {
            bail!("Invalid feature range ({}, {})", lo, hi);
        }

        self.scale = self
            .data_min
            .iter()
            .zip(&self.data_max)
            .map(|(min, max)| {
                let range = max - min;
                let range = if range.abs() < f64::EPSILON { 1.0 } else { range };
                (hi - lo) / range
            })
            .collect();
        self.offset = self
            .data_min
            .iter()
            .zip(&self.scale)
            .map(|(min, scale)| lo - min * scale)
            .collect();
        Ok(())
    }
}

impl TryFrom<ScalerParams> for MinMaxNormalizer {
    type Error = anyhow::Error;

    fn try_from(params: ScalerParams) -> Result<Self> {
        Self::new(params.data_min, params.data_max, params.feature_range)
    }
}

impl Normalizer for MinMaxNormalizer {
    fn forward(&self, row: &FeatureVector) -> Result<FeatureVector> {
        let mut values = row.to_array();
        for (i, v) in values.iter_mut().enumerate() {
            *v = *v * self.scale[i] + self.offset[i];
        }
        Ok(FeatureVector::from_array(values))
    }

    fn inverse(&self, row: &FeatureVector) -> Result<FeatureVector> {
        let mut values = row.to_array();
        for (i, v) in values.iter_mut().enumerate() {
            *v = (*v - self.offset[i]) / self.scale[i];
        }
        Ok(FeatureVector::from_array(values))
    }
}
