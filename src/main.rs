//! mlsignal - ML trading signal service
//!
//! Trains directional models and anomaly detectors on engineered features,
//! scores the latest candles, emits ML signals and grades past predictions.
//!
//! # Usage
//! ```sh
//! mlsignal migrate
//! mlsignal import-features --input rows.csv
//! mlsignal cycle --train
//! mlsignal run
//! ```
//!
//! Configuration comes from the environment (and `.env`); see `Config::from_env`.

use anyhow::Result;
use chrono::Utc;
use clap::{Parser, Subcommand};
use mlsignal::application::system::{Application, CancellationToken};
use mlsignal::config::{Config, LogFormat, ObservabilityEnvConfig};
use mlsignal::domain::repositories::ModelRegistry;
use mlsignal::infrastructure::persistence::Database;
use mlsignal::infrastructure::persistence::feature_import::read_feature_csv;
use mlsignal::infrastructure::persistence::repositories::{
    SqliteFeatureStore, SqliteModelRegistry,
};
use serde::Serialize;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

#[derive(Parser)]
#[command(author, version, about = "ML signal training and inference service", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database schema
    Migrate,
    /// Load feature rows from a CSV export into the feature store
    ImportFeatures {
        #[arg(short, long)]
        input: PathBuf,
    },
    /// Train every model family once and apply the promotion gates
    Train,
    /// Score the latest feature rows with the active models
    Infer,
    /// Grade due predictions against realised candles
    Resolve,
    /// Refresh, infer and resolve once (and train with --train)
    Cycle {
        #[arg(long)]
        train: bool,
    },
    /// Run the scheduler until Ctrl+C
    Run,
    /// List registry versions of a model key
    Models {
        #[arg(short, long)]
        key: String,
    },
    /// Print the Prometheus metrics after one cycle
    Metrics,
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (pretty, json) = match format {
        LogFormat::Pretty => (
            Some(tracing_subscriber::fmt::layer().with_target(false)),
            None,
        ),
        LogFormat::Json => (None, Some(tracing_subscriber::fmt::layer().json())),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(pretty)
        .with(json)
        .init();
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(ObservabilityEnvConfig::from_env().log_format);
    let config = Config::from_env()?;

    info!("mlsignal {} starting...", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Migrate => {
            Database::new(&config.database_url).await?;
            info!("Schema ready at {}", config.database_url);
        }
        Commands::ImportFeatures { input } => {
            let db = Database::new(&config.database_url).await?;
            let rows = read_feature_csv(&input)?;
            let stored = SqliteFeatureStore::new(db.pool.clone())
                .upsert_rows(&rows)
                .await?;
            info!("Imported {} feature rows from {:?}", stored, input);
        }
        Commands::Models { key } => {
            let db = Database::new(&config.database_url).await?;
            let registry = SqliteModelRegistry::new(db.pool.clone());
            let versions = registry.list_model_versions(&key).await?;
            if versions.is_empty() {
                println!("No versions registered for {}", key);
            }
            for v in versions {
                println!(
                    "{:<12} v{:<4} {} {}..{} {}",
                    v.model_key,
                    v.version,
                    if v.is_active { "ACTIVE  " } else { "inactive" },
                    v.trained_from.format("%Y-%m-%d"),
                    v.trained_to.format("%Y-%m-%d"),
                    v.metrics_json
                );
            }
        }
        Commands::Train => {
            let app = Application::build(config).await?;
            let report = app
                .signal_service()
                .train(Utc::now(), &CancellationToken::new())
                .await?;
            print_json(&report)?;
        }
        Commands::Infer => {
            let app = Application::build(config).await?;
            let report = app
                .signal_service()
                .infer(&CancellationToken::new())
                .await?;
            print_json(&report)?;
        }
        Commands::Resolve => {
            let app = Application::build(config).await?;
            let report = app
                .signal_service()
                .resolve(Utc::now(), &CancellationToken::new())
                .await?;
            print_json(&report)?;
        }
        Commands::Cycle { train } => {
            let app = Application::build(config).await?;
            let report = app.run_cycle(train, &CancellationToken::new()).await;
            print_json(&report)?;
            if let Some(err) = report.first_error {
                anyhow::bail!("Cycle failed: {}", err);
            }
        }
        Commands::Run => {
            let app = Application::build(config).await?;
            info!("Scheduler running. Press Ctrl+C to shutdown.");
            app.start().await?;
        }
        Commands::Metrics => {
            let app = Application::build(config).await?;
            app.run_cycle(false, &CancellationToken::new()).await;
            print!("{}", app.metrics().render());
        }
    }

    Ok(())
}
