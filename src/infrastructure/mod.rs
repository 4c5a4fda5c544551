pub mod mock;
pub mod persistence;
pub mod repositories;

pub use persistence::Database;
pub use repositories::{InMemoryCatalog, InMemoryPredictionStore};
