pub mod model_registry;
pub mod normalizer;
pub mod regressor;
pub mod smartcore_regressor;

pub use model_registry::{FsModelRegistry, ModelHandle, ModelRegistry, StaticModelRegistry};
pub use normalizer::{MinMaxNormalizer, Normalizer};
pub use regressor::Regressor;
