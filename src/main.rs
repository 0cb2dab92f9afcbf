mod analyzer;
mod config;
mod ingest;
mod model;
mod normalizer;
mod parser;
mod pipeline;
mod scraper;
mod storage;
mod utils;

use clap::{Args, Parser, Subcommand};
use config::{AppConfig, ConfigError, load_config};
use ingest::{IngestBatch, IngestError, ingest_batch};
use model::{
    OpportunityStatus, ParserError, RunParams, ScraperError, StorageError, TriggerType, ValidationError,
};
use parser::HtmlListingParser;
use pipeline::{Pipeline, PipelineError};
use crate::scraper::{HttpPageFetcher, PageFetcher};
use serde::Serialize;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use storage::{ListingQuery, SqliteStorage};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "imovel-sniper")]
#[command(about = "Crawls listing pages, scores opportunities against the local market and stores them")]
struct Cli {
    /// Path to the JSON config file
    #[arg(long, default_value = "config.json")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Crawl one location and ingest the scored listings
    Run {
        #[arg(long, default_value = "")]
        state: String,
        #[arg(long)]
        city: String,
        #[arg(long, default_value = "")]
        neighborhood: String,
        #[arg(long)]
        max_results: Option<usize>,
        /// Score without writing listings
        #[arg(long)]
        dry_run: bool,
        /// manual | scheduled | api
        #[arg(long, default_value = "manual")]
        trigger: TriggerType,
        #[arg(long)]
        triggered_by: Option<String>,
        /// Overrides `limits.run_deadline_seconds`
        #[arg(long)]
        deadline_seconds: Option<u64>,
        /// Render pages with headless Chrome (needs the `browser` feature)
        #[arg(long)]
        browser: bool,
    },
    /// Ingest a JSON batch produced by an external crawler ("-" reads stdin)
    Ingest { file: PathBuf },
    /// List stored opportunities
    List {
        #[command(flatten)]
        filters: FilterArgs,
        /// score | price_asc | price_desc | newest
        #[arg(long)]
        sort: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long, default_value_t = 0)]
        offset: usize,
    },
    /// Value counts and ranges for the given filters
    Facets {
        #[command(flatten)]
        filters: FilterArgs,
    },
    /// Move an opportunity to new, viewed, contacted or discarded
    SetStatus { id: i64, status: String },
    /// Recent job runs, newest first
    Runs {
        #[arg(long, default_value_t = 20)]
        limit: usize,
        #[arg(long, default_value_t = 0)]
        offset: usize,
    },
    /// One job run by id
    RunShow { id: i64 },
}

#[derive(Debug, Args)]
struct FilterArgs {
    #[arg(long)]
    state: Option<String>,
    #[arg(long)]
    city: Option<String>,
    #[arg(long)]
    neighborhood: Option<String>,
    #[arg(long)]
    min_score: Option<u8>,
    #[arg(long)]
    min_price: Option<f64>,
    #[arg(long)]
    max_price: Option<f64>,
    #[arg(long)]
    min_area: Option<f64>,
    #[arg(long)]
    max_area: Option<f64>,
    /// Comma-separated, e.g. "new,viewed"
    #[arg(long)]
    status: Option<String>,
    /// Comma-separated, e.g. "2,3"
    #[arg(long)]
    bedrooms: Option<String>,
}

impl FilterArgs {
    fn into_query(self) -> Result<ListingQuery, ValidationError> {
        Ok(ListingQuery {
            statuses: OpportunityStatus::parse_set(self.status.as_deref().unwrap_or(""))?,
            bedrooms: storage::query::parse_bedrooms(self.bedrooms.as_deref().unwrap_or(""))?,
            state: self.state,
            city: self.city,
            neighborhood: self.neighborhood,
            min_score: self.min_score,
            min_price: self.min_price,
            max_price: self.max_price,
            min_area: self.min_area,
            max_area: self.max_area,
            ..Default::default()
        })
    }
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Scraper(#[from] ScraperError),
    #[error(transparent)]
    Parser(#[from] ParserError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error(transparent)]
    Ingest(#[from] IngestError),
    #[error("reading input: {0}")]
    Io(#[from] std::io::Error),
    #[error("writing output: {0}")]
    Output(#[from] serde_json::Error),
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    // Set panic hook to log details about any panic
    std::panic::set_hook(Box::new(|panic_info| {
        eprintln!("Panic occurred: {:?}", panic_info);
    }));

    let cli = Cli::parse();
    let config = match load_config(&cli.config) {
        Ok(cfg) => Arc::new(cfg),
        Err(e) => {
            error!("Config load error: {}", e);
            std::process::exit(2);
        }
    };

    if let Err(e) = dispatch(cli.command, config).await {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn dispatch(command: Commands, config: Arc<AppConfig>) -> Result<(), CliError> {
    let storage = SqliteStorage::new(&config.database_path)?;

    match command {
        Commands::Run {
            state,
            city,
            neighborhood,
            max_results,
            dry_run,
            trigger,
            triggered_by,
            deadline_seconds,
            browser,
        } => {
            let params = RunParams {
                state,
                city,
                neighborhood,
                max_results,
                dry_run,
            };
            let fetcher = build_fetcher(&config, browser)?;
            let parser = Arc::new(HtmlListingParser::new(&config.selectors)?);
            let storage = Arc::new(Mutex::new(storage));
            let mut pipeline = Pipeline::new(config.clone(), fetcher, parser, storage);
            if let Some(secs) = deadline_seconds {
                pipeline = pipeline.with_deadline(Duration::from_secs(secs));
            }

            let cancel = CancellationToken::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupt received, cancelling run...");
                    on_signal.cancel();
                }
            });

            let summary = pipeline
                .run(&params, trigger, triggered_by.as_deref(), &cancel)
                .await?;
            print_json(&summary)?;
        }
        Commands::Ingest { file } => {
            let raw = if file.as_os_str() == "-" {
                let mut buf = String::new();
                std::io::stdin().read_to_string(&mut buf)?;
                buf
            } else {
                std::fs::read_to_string(&file)?
            };
            let batch = IngestBatch::from_json(&raw)?;
            let report = ingest_batch(&storage, batch)?;
            print_json(&report)?;
        }
        Commands::List {
            filters,
            sort,
            limit,
            offset,
        } => {
            let query = ListingQuery {
                sort: sort.as_deref().unwrap_or("").parse()?,
                limit,
                offset,
                ..filters.into_query()?
            };
            print_json(&storage.query_opportunities(&query)?)?;
        }
        Commands::Facets { filters } => {
            print_json(&storage.facets(&filters.into_query()?)?)?;
        }
        Commands::SetStatus { id, status } => {
            let updated = storage.set_status(id, &status)?;
            info!("Opportunity {} is now {}", id, updated.status);
            print_json(&updated)?;
        }
        Commands::Runs { limit, offset } => {
            print_json(&storage.list_job_runs(limit, offset)?)?;
        }
        Commands::RunShow { id } => {
            let run = storage.get_job_run(id)?.ok_or(StorageError::NotFound)?;
            print_json(&run)?;
        }
    }

    Ok(())
}

fn build_fetcher(config: &AppConfig, browser: bool) -> Result<Arc<dyn PageFetcher>, ScraperError> {
    if browser {
        #[cfg(feature = "browser")]
        {
            info!("Using headless browser fetcher");
            return Ok(Arc::new(crate::scraper::fetcher::BrowserPageFetcher::new(&config.fetch)?));
        }
        #[cfg(not(feature = "browser"))]
        {
            warn!("Built without the `browser` feature, falling back to plain HTTP");
        }
    }
    Ok(Arc::new(HttpPageFetcher::new(&config.fetch)?))
}

fn print_json<T: Serialize>(value: &T) -> Result<(), serde_json::Error> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
