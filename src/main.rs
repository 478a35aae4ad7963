//! CLI entry point for the bike-sharing analytics service.
//!
//! Provides subcommands for serving the HTTP API, loading a dataset from a
//! file or URL, training a model against the loaded data, and printing store
//! statistics.

use anyhow::{Context, Result};
use bikeshare_ml::analytics::aggregate;
use bikeshare_ml::config::AppConfig;
use bikeshare_ml::fetch::{self, BasicClient};
use bikeshare_ml::loader::BulkLoader;
use bikeshare_ml::ml::{self, Algorithm, ModelKind, TrainOptions};
use bikeshare_ml::registry::ModelRegistry;
use bikeshare_ml::server::{self, AppState};
use bikeshare_ml::store::RecordStore;
use clap::{Parser, Subcommand};
use std::ffi::OsStr;
use std::path::Path;
use tracing::info;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "bikeshare_ml")]
#[command(about = "Bike-sharing usage analytics and demand models", long_about = None)]
struct Cli {
    /// Database URL (overrides DATABASE_URL)
    #[arg(long, global = true)]
    database_url: Option<String>,

    /// Directory holding model artifacts (overrides MODEL_PATH)
    #[arg(long, global = true)]
    model_path: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the HTTP API
    Serve {
        /// Address to bind (overrides BIND_ADDR)
        #[arg(short, long)]
        bind: Option<String>,
    },
    /// Replace the stored records with a CSV from a file or URL
    Load {
        /// Path to file or URL to fetch
        #[arg(value_name = "FILE_OR_URL")]
        source: String,

        /// Rows per insert transaction
        #[arg(short, long)]
        batch_size: Option<usize>,
    },
    /// Train a model on the stored records and publish it
    Train {
        /// rental, peak or weather
        kind: ModelKind,

        /// Algorithm variant, e.g. random_forest
        #[arg(short, long)]
        model_type: Option<Algorithm>,

        /// Skip cross-validation
        #[arg(long, default_value_t = false)]
        no_cv: bool,

        /// Percentile for the peak threshold
        #[arg(long)]
        percentile: Option<f64>,
    },
    /// Print record counts and aggregate summaries
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/bikeshare_ml.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("bikeshare_ml.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse()?));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse()?));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();

    let mut config = AppConfig::from_env()?;
    if let Some(url) = cli.database_url {
        config.database_url = url;
    }
    if let Some(path) = cli.model_path {
        config.model_dir = path.into();
    }

    let store = RecordStore::connect(&config.database_url)
        .await
        .with_context(|| format!("opening {}", config.database_url))?;

    match cli.command {
        Commands::Serve { bind } => {
            if let Some(bind) = bind {
                config.bind_addr = bind;
            }
            let addr = config.bind_addr.clone();
            server::serve(AppState::new(store, config), &addr).await?;
        }
        Commands::Load { source, batch_size } => {
            let loader =
                BulkLoader::new(store, batch_size.unwrap_or(config.default_batch_size))?;
            let report = if fetch::is_http_url(&source) {
                loader.load_url(&BasicClient::new(), &source).await?
            } else {
                let bytes = std::fs::read(&source).with_context(|| format!("reading {source}"))?;
                loader.load_bytes(&bytes).await?
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Train {
            kind,
            model_type,
            no_cv,
            percentile,
        } => {
            let algorithm = model_type.unwrap_or(kind.default_algorithm());
            let mut options = TrainOptions::for_kind(kind, config.min_training_rows);
            options.cross_validate &= !no_cv;
            if let Some(p) = percentile {
                options.peak_percentile = p;
            }

            let records = store.snapshot().await?;
            let registry = ModelRegistry::new(config.model_dir.clone());
            let published = tokio::task::spawn_blocking(move || {
                let artifact = ml::train(kind, algorithm, &records, &options)?;
                registry.publish(artifact)
            })
            .await??;
            info!(%kind, %algorithm, dir = %config.model_dir.display(), "Model saved");
            println!("{}", serde_json::to_string_pretty(&published.info())?);
        }
        Commands::Stats => {
            let summary = serde_json::json!({
                "total_records": store.count().await?,
                "date_range": store.date_range().await?,
                "count_statistics": store.count_statistics().await?,
            });
            println!("{}", serde_json::to_string_pretty(&summary)?);
            if store.count().await? > 0 {
                let hourly = aggregate::hourly(&store).await?;
                let daily = aggregate::daily(&store).await?;
                let weather = aggregate::weather(&store).await?;
                println!("{}", serde_json::to_string_pretty(&hourly.summary)?);
                println!("{}", serde_json::to_string_pretty(&daily.comparison)?);
                println!("{}", serde_json::to_string_pretty(&weather.summary)?);
            }
        }
    }

    Ok(())
}
