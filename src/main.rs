//! fxcast - cached multi-step currency forecasts
//!
//! Reads recent bars from a CSV file, serves the plain and sentiment-biased
//! forecasts for one pair/period and prints them as JSON.
//!
//! # Usage
//! ```sh
//! fxcast --bars data/eurusd_d1.csv --pair EURUSD --period D1 --sentiment 0.4
//! ```
//!
//! # Environment Variables
//! - `DATABASE_URL` - SQLite database holding the prediction cache
//! - `MODELS_DIR` - Root of the `{PAIR}/{PERIOD}/model.json` artifacts
//! - `FORECAST_STEPS`, `FEATURE_WARMUP`, `SENTIMENT_*` - see `config`

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, NaiveDate, Utc};
use clap::Parser;
use fxcast::application::forecasting::{ForecastRequest, ForecastService};
use fxcast::application::ml::FsModelRegistry;
use fxcast::config::Config;
use fxcast::domain::forecasting::types::Bar;
use fxcast::domain::market::Period;
use fxcast::domain::repositories::{CatalogRepository, CatalogTable};
use fxcast::infrastructure::persistence::{
    Database, SqliteCatalogRepository, SqlitePredictionStore,
};
use serde::Deserialize;
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{Level, info};
use tracing_subscriber::prelude::*;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// CSV of bars with columns time,open,high,low,close,volume
    #[arg(long)]
    bars: PathBuf,

    /// Currency pair, e.g. EURUSD
    #[arg(long)]
    pair: String,

    /// Bar period (M1, M5, M15, M30, H1, H4, D1, W1)
    #[arg(long, default_value = "D1")]
    period: Period,

    /// Number of future buckets (defaults to FORECAST_STEPS)
    #[arg(long)]
    steps: Option<usize>,

    /// Sentiment score in [-1, 1]; values outside are clamped
    #[arg(long, allow_hyphen_values = true)]
    sentiment: Option<f64>,

    /// Register the pair, period and both model names before forecasting
    #[arg(long)]
    register: bool,
}

#[derive(Debug, Deserialize)]
struct BarRecord {
    time: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .with_context(|| format!("Unrecognized bar time: {}", raw))?;
    date.and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc())
        .ok_or_else(|| anyhow!("Invalid bar date: {}", raw))
}

fn load_bars(path: &PathBuf) -> Result<Vec<Bar>> {
    let file = File::open(path).with_context(|| format!("Failed to open {:?}", path))?;
    let mut rdr = csv::Reader::from_reader(BufReader::new(file));

    let mut bars = Vec::new();
    for (line, record) in rdr.deserialize::<BarRecord>().enumerate() {
        let record = record.with_context(|| format!("Malformed bar on row {}", line + 1))?;
        bars.push(Bar {
            time: parse_time(&record.time)?,
            open: record.open,
            high: record.high,
            low: record.low,
            close: record.close,
            volume: record.volume,
        });
    }
    Ok(bars)
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Logs go to stderr so stdout stays clean JSON
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(stderr_layer)
        .init();

    let args = Args::parse();
    info!("fxcast {} starting...", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;
    info!(
        "Configuration loaded: steps={}, warmup={}, database={}, models={:?}",
        config.forecast.steps,
        config.forecast.warmup_policy,
        config.persistence.database_url,
        config.models.models_dir
    );

    let database = Database::new(
        &config.persistence.database_url,
        config.persistence.max_connections,
    )
    .await?;
    let catalog = Arc::new(SqliteCatalogRepository::new(database.clone()));
    let store = Arc::new(SqlitePredictionStore::new(database));

    if args.register {
        let pair = args.pair.trim().to_uppercase();
        catalog.register(CatalogTable::CurrencyPairs, &pair).await?;
        catalog
            .register(CatalogTable::Periods, args.period.as_str())
            .await?;
        for model in [
            &config.forecast.plain_model_name,
            &config.forecast.sentiment_model_name,
        ] {
            catalog
                .register(CatalogTable::PredictionModels, model)
                .await?;
        }
    }

    let bars = load_bars(&args.bars)?;
    info!("Loaded {} bars from {:?}", bars.len(), args.bars);

    let service = ForecastService::new(
        store,
        catalog,
        Arc::new(FsModelRegistry::new(config.models.models_dir.clone())),
        config.forecast.clone(),
    )?;

    let response = service
        .forecast(ForecastRequest {
            pair: args.pair,
            period: args.period,
            bars,
            steps: args.steps,
            sentiment: args.sentiment,
        })
        .await
        .map_err(|e| anyhow!("Forecast failed during {}: {}", e.stage(), e))?;

    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}
