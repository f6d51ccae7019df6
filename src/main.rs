// Entry point for the stock quote sync tool.
mod kis {
    // Client for the brokerage REST API.
    pub mod api_caller;
    // Response structures for the brokerage API.
    pub mod response;
}
// HTTP client module.
mod http {
    // HTTP client implementation.
    pub mod client;
}
// Data models and errors.
mod model;
// Daily quote fetch.
mod quotes;
// One-time migration from the relational source.
mod migrate;
// Setup checks.
mod doctor;
// Read back of the document store.
mod verify;
mod accumulator;
mod cancel;
mod config;
mod dispatcher;
mod instruments;
mod normalize;
mod period;
mod report;
mod retry;
// Data storage module.
mod store {
    /// JSON document store.
    pub mod documents;
    /// Legacy relational source.
    pub mod source;
    /// SQLite database interaction.
    pub mod sqlite;
}
// module storing defaults
mod constants;

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use dotenv::dotenv;

use crate::{
    cancel::CancelFlag,
    config::Config,
    http::client::HttpClient,
    kis::api_caller::KisClient,
    migrate::MigrationOptions,
    model::SyncError,
    quotes::RunOptions,
    report::RunStatus,
    retry::RetryPolicy,
    store::{documents::SqliteDocumentStore, source::SourceDb},
};

// Command-line argument parser.
#[derive(Parser, Debug)]
#[command(about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

// Subcommands for the application.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Fetch the latest daily bar for every instrument.
    FetchDaily {
        #[arg(long)]
        symbols_file: Option<String>,
    },
    /// Copy the relational history into the document store.
    Migrate {
        #[arg(long)]
        limit: Option<u32>,
        #[arg(long)]
        offset: Option<u32>,
    },
    /// Summarise what the document store holds.
    Verify,
    /// Check the environment before a run.
    Doctor,
}

fn open_store(config: &Config) -> model::Result<SqliteDocumentStore> {
    let conn = store::sqlite::init_connection(&config.store_path)?;
    Ok(SqliteDocumentStore::new(conn)?)
}

async fn fetch_daily(config: &Config, symbols_file: Option<&str>, cancel: &CancelFlag) -> model::Result<RunStatus> {
    let credentials = config.require_kis()?.clone();
    let store = open_store(config)?;
    let instruments =
        instruments::resolve(config.instrument_override.as_deref(), symbols_file, &store)?;

    let http = HttpClient::new(constants::SOURCE_TIMEOUT).map_err(|e| SyncError::Configuration(e.to_string()))?;
    let client = KisClient::new(&http, credentials);
    let options = RunOptions {
        batch_size: config.batch_size,
        retry: RetryPolicy::default(),
    };

    let report = quotes::pull_and_save(&client, &store, &instruments, options, cancel).await;
    Ok(report.status())
}

async fn run_migration(
    config: &Config,
    limit: Option<u32>,
    offset: Option<u32>,
    cancel: &CancelFlag,
) -> model::Result<RunStatus> {
    let source = SourceDb::open(config.require_source_db()?)?;
    let store = open_store(config)?;
    let options = MigrationOptions {
        limit,
        offset,
        default_user_id: config.default_user_id.clone(),
        run: RunOptions {
            batch_size: config.batch_size,
            retry: RetryPolicy::default(),
        },
    };

    let (report, tally) = migrate::migrate(&source, &store, &options, cancel).await?;
    if let (Some(limit), Some(next)) = (
        limit,
        migrate::next_chunk_offset(limit, offset, tally.instruments_listed),
    ) {
        log::info!("next chunk: stock_sync migrate --limit {limit} --offset {next}");
    }
    Ok(report.status())
}

#[tokio::main]
// Main function entry point.
async fn main() -> ExitCode {
    dotenv().ok();

    env_logger::init();

    let args = Args::parse();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            log::error!("{err}");
            return ExitCode::FAILURE;
        }
    };

    let cancel = CancelFlag::new();
    cancel.cancel_on_ctrl_c();

    let status = match args.command {
        Commands::FetchDaily { symbols_file } => fetch_daily(&config, symbols_file.as_deref(), &cancel).await,
        Commands::Migrate { limit, offset } => run_migration(&config, limit, offset, &cancel).await,
        Commands::Verify => open_store(&config).and_then(|store| {
            verify::verify(&store)?.log();
            Ok(RunStatus::Success)
        }),
        Commands::Doctor => {
            let passed = doctor::report(&doctor::run_checks(&config));
            Ok(if passed { RunStatus::Success } else { RunStatus::Failure })
        }
    };

    match status {
        Ok(RunStatus::Failure | RunStatus::PartialFailure) => ExitCode::FAILURE,
        Ok(_) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{err}");
            ExitCode::FAILURE
        }
    }
}
