pub mod feature_pipeline;
pub mod forecaster;
pub mod service;
pub mod single_flight;

pub use feature_pipeline::{FeaturePipeline, IndicatorParams, WarmupPolicy};
pub use forecaster::{Forecaster, SentimentPolicy, Window};
pub use service::{ForecastRequest, ForecastResponse, ForecastSeries, ForecastService};
