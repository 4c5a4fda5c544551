pub mod catalog_repository;
pub mod prediction_repository;

pub use catalog_repository::SqliteCatalogRepository;
pub use prediction_repository::SqlitePredictionStore;
