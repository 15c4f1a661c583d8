use std::{
    fs::{self, OpenOptions},
    io::Read,
    path::PathBuf,
    sync::Arc,
};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::json;
use tracing::debug;
use tracing_subscriber::{prelude::*, EnvFilter};

use offertrack_core::{
    config::{self, AppConfig, StoreKind},
    month::parse_year,
    DateRange, DetailLevel, DocumentStore, GameRecord, HttpPageSource, JsonFileDocumentStore,
    MemoryDocumentStore, MonthKey, RateLimitedFetcher, RateLimiter, RestDocumentStore,
    RetrievalPipeline, TieredCache, YearPartitionedStore,
};

type Documents = Arc<dyn DocumentStore>;

#[derive(Debug, Parser)]
#[command(name = "offertrack", version, about = "Monthly game offer archive")]
struct Cli {
    /// Config file to use instead of the default location.
    #[arg(long, global = true, env = "OFFERTRACK_CONFIG")]
    config: Option<PathBuf>,

    /// Extraction mode for scraped pages (short or full).
    #[arg(long, global = true)]
    detail: Option<DetailLevel>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Games offered in one month, e.g. `september-2024`.
    Month {
        month: String,
        /// Answer from the store only; never scrape.
        #[arg(long)]
        stored: bool,
    },
    /// Games offered from START through END, both inclusive.
    Range {
        start: String,
        end: String,
        /// Answer from the store only; never scrape.
        #[arg(long)]
        stored: bool,
    },
    /// Stored games of the last few months, up to and including this one.
    Recent {
        #[arg(long, default_value_t = 6)]
        months: u32,
    },
    /// Stored games for one or more years.
    Year {
        #[arg(required = true)]
        years: Vec<String>,
    },
    /// Years with stored games.
    Years,
    /// Every stored game.
    All,
    /// One stored game by id.
    Get { id: String },
    /// Stored game count per year.
    Stats,
    /// Months with stored games.
    Periods,
    /// Store a single game read as JSON from FILE (or stdin with `-`).
    Add {
        #[arg(default_value = "-")]
        file: PathBuf,
    },
    /// Store a JSON array of games read from FILE (or stdin with `-`).
    Bulk {
        #[arg(default_value = "-")]
        file: PathBuf,
    },
    /// Overwrite a stored game with JSON read from FILE (or stdin with `-`).
    Update {
        id: String,
        #[arg(default_value = "-")]
        file: PathBuf,
    },
    /// Delete a stored game.
    Delete {
        id: String,
        /// Partition year, when known.
        #[arg(long)]
        year: Option<String>,
    },
    /// Copy records from the flat legacy collection into year partitions.
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging()?;
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => AppConfig::load_from(path, true)?,
        None => {
            config::ensure_default_config()?;
            AppConfig::load()?
        }
    };
    let detail = cli.detail.unwrap_or(config.default_detail);
    debug!("store backend {:?}, detail {:?}", config.store, detail);

    let store = Arc::new(YearPartitionedStore::new(
        open_documents(&config)?,
        TieredCache::new(config.cache_policy()),
    ));
    let fetcher = RateLimitedFetcher::new(
        Arc::new(RateLimiter::new(config.cooldown())),
        HttpPageSource::new(config.source_url.clone())?,
    );
    let pipeline = RetrievalPipeline::new(
        TieredCache::new(config.cache_policy()),
        Arc::clone(&store),
        fetcher,
    );

    match cli.command {
        Command::Month { month, stored } => {
            let month: MonthKey = month.parse()?;
            if stored {
                let games = store.get_by_month(&month).await?;
                print(&json!({ "period": month.to_string(), "count": games.len(), "games": games }))
            } else {
                print(&pipeline.resolve(&month, detail).await?)
            }
        }
        Command::Range { start, end, stored } => {
            let range = DateRange::parse(&start, &end)?;
            if stored {
                let games = store.get_by_range(&range).await?;
                print(&json!({
                    "dateRange": date_range(&range),
                    "count": games.len(),
                    "games": games
                }))
            } else {
                print(&pipeline.resolve_range(&range, detail).await?)
            }
        }
        Command::Recent { months } => {
            let range = DateRange::recent(months);
            let games = store.get_by_range(&range).await?;
            print(&json!({
                "period": format!("Last {months} months"),
                "dateRange": date_range(&range),
                "count": games.len(),
                "games": games
            }))
        }
        Command::Year { years } => {
            let years = years
                .iter()
                .map(|year| parse_year(year))
                .collect::<Result<Vec<_>, _>>()?;
            let games = store.get_by_years(&years).await?;
            print(&json!({ "years": years, "count": games.len(), "games": games }))
        }
        Command::Years => print(&store.available_years().await?),
        Command::All => {
            let games = store.get_all().await?;
            print(&json!({ "count": games.len(), "games": games }))
        }
        Command::Get { id } => match store.get(&id).await? {
            Some(game) => print(&game),
            None => bail!("no game with id {id}"),
        },
        Command::Stats => {
            let by_year = store.count_by_year().await?;
            let total: usize = by_year.values().sum();
            print(&json!({ "total": total, "byYear": by_year }))
        }
        Command::Periods => {
            let periods: Vec<String> = store
                .available_periods()
                .await?
                .iter()
                .map(ToString::to_string)
                .collect();
            print(&periods)
        }
        Command::Add { file } => {
            let record: GameRecord = read_json(&file)?;
            if !record.is_valid() {
                bail!("a game needs a non-empty title");
            }
            let id = store.add(&record).await?;
            print(&json!({ "id": id }))
        }
        Command::Bulk { file } => {
            let records: Vec<GameRecord> = read_json(&file)?;
            print(&store.add_many(&records).await?)
        }
        Command::Update { id, file } => {
            let record: GameRecord = read_json(&file)?;
            if !record.is_valid() {
                bail!("a game needs a non-empty title");
            }
            store.update(&id, &record).await?;
            print(&json!({ "id": id, "updated": true }))
        }
        Command::Delete { id, year } => {
            let deleted = match year {
                Some(year) => store.delete_in_year(&id, parse_year(&year)?).await?,
                None => store.delete(&id).await?,
            };
            if !deleted {
                bail!("no game with id {id}");
            }
            print(&json!({ "id": id, "deleted": true }))
        }
        Command::Migrate => {
            let migrated = store.migrate_legacy().await?;
            print(&json!({ "migrated": migrated }))
        }
    }
}

fn open_documents(config: &AppConfig) -> Result<Documents> {
    let documents: Documents = match config.store {
        StoreKind::Memory => Arc::new(MemoryDocumentStore::new()),
        StoreKind::File => Arc::new(
            JsonFileDocumentStore::open(&config.store_path).with_context(|| {
                format!("failed to open store at {}", config.store_path.display())
            })?,
        ),
        StoreKind::Rest => {
            let Some(url) = &config.store_url else {
                bail!("store = \"rest\" requires store_url");
            };
            Arc::new(RestDocumentStore::new(reqwest::Client::new(), url.clone()))
        }
    };
    Ok(documents)
}

fn date_range(range: &DateRange) -> serde_json::Value {
    json!({ "start": range.start().to_string(), "end": range.end().to_string() })
}

fn read_json<T: serde::de::DeserializeOwned>(file: &PathBuf) -> Result<T> {
    let raw = if file.as_os_str() == "-" {
        let mut raw = String::new();
        std::io::stdin()
            .read_to_string(&mut raw)
            .context("failed to read stdin")?;
        raw
    } else {
        fs::read_to_string(file).with_context(|| format!("failed to read {}", file.display()))?
    };
    serde_json::from_str(&raw).context("invalid game JSON")
}

fn print<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn init_logging() -> Result<()> {
    let log_dir = std::env::current_dir()?.join("logs");
    fs::create_dir_all(&log_dir)?;
    let log_path = log_dir.join("offertrack.log");

    let env_filter = EnvFilter::from_default_env();

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .compact()
        .with_writer(std::io::stderr);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .compact()
        .with_ansi(false)
        .with_writer(move || {
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(&log_path)
                .expect("failed to open log file")
        });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    Ok(())
}
