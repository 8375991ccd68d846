use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use user_import::{
    config::Config,
    database::Database,
    errors::ImportError,
    importer::{ImportEngine, ImportSettings},
    repositories::UserRepository,
};

#[derive(Parser)]
#[command(name = "user-import")]
#[command(version)]
#[command(about = "Bulk import of users from a CSV export into the user store")]
#[command(long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// CSV file to import (overrides config file)
    #[arg(short, long, value_name = "PATH")]
    input: Option<PathBuf>,

    /// Database URL (overrides config file)
    #[arg(short = 'd', long, value_name = "URL")]
    database_url: Option<String>,

    /// Records per transaction
    #[arg(short, long, value_name = "N")]
    batch_size: Option<usize>,

    /// Concurrent committer workers
    #[arg(short, long, value_name = "N")]
    workers: Option<usize>,

    /// Passphrase behind the shared default credential
    #[arg(long, value_name = "SECRET")]
    passphrase: Option<String>,

    /// Log level
    #[arg(short = 'v', long, default_value = "info")]
    log_level: String,

    /// Print the summary as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries only the summary
    let log_filter = format!("user_import={}", cli.log_level);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    info!("Starting user import v{}", env!("CARGO_PKG_VERSION"));

    let mut config = Config::load(&cli.config)?;

    // Override config with CLI arguments
    if let Some(input) = cli.input {
        config.import.input_path = input;
    }
    if let Some(database_url) = cli.database_url {
        config.database.url = database_url;
    }
    if let Some(batch_size) = cli.batch_size {
        config.import.batch_size = batch_size;
    }
    if let Some(workers) = cli.workers {
        config.import.workers = workers;
    }
    if let Some(passphrase) = cli.passphrase {
        config.import.default_passphrase = passphrase;
    }
    config.validate()?;

    let settings = ImportSettings::from_config(&config)?;
    info!(
        "Using database: {} (batch size {}, {} workers)",
        config.database.url, settings.batch_size, settings.workers
    );

    let database = Database::new(&config.database, settings.workers)
        .await
        .map_err(|e| ImportError::store_connect(e.to_string()))?;
    database
        .migrate()
        .await
        .map_err(|e| ImportError::store_connect(e.to_string()))?;
    info!("Database connection established and migrations applied");

    let store = Arc::new(UserRepository::new(database.pool()));
    let engine = ImportEngine::new(store, settings);

    let cancel = engine.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing in-flight batches");
            cancel.cancel();
        }
    });

    let result = engine.run_file(&config.import.input_path).await;
    database.close().await;
    let report = result?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", report);
    }

    Ok(())
}
