//! # Page Catalog CLI (`pcat`)
//!
//! The `pcat` binary drives ingestion of rendered pages into the catalog and
//! queries the result.
//!
//! ## Usage
//!
//! ```bash
//! pcat --config ./config/pcat.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `pcat init` | Create the SQLite database and run schema migrations |
//! | `pcat ingest <source>` | Ingest every materialized page once |
//! | `pcat watch <source>` | Ingest pages as the producer writes them |
//! | `pcat import <manifest>` | Bulk-load an extraction manifest |
//! | `pcat search "<query>"` | Ranked full-text search |
//! | `pcat list` | Filtered listing, newest first |
//! | `pcat get <id>` | Print one record |
//! | `pcat people` | Detected people by record count |
//! | `pcat stats` | Catalog summary |
//! | `pcat progress <source>` | Producer output versus ingested records |
//!
//! Logging goes to stderr and is controlled by `RUST_LOG` (default `info`).

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use page_catalog::progress::ProgressMode;
use page_catalog::search::SearchRequest;
use page_catalog::{batch, config, get, migrate, search, stats, watch};

/// Page Catalog: incremental ingestion of paginated document dumps into a
/// searchable catalog.
#[derive(Parser)]
#[command(name = "pcat", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/pcat.toml`.
    #[arg(long, global = true, default_value = "./config/pcat.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent; running it multiple times is safe.
    Init,

    /// Ingest a source's pages once.
    ///
    /// Processes every index in `[start, end)` (default: the whole source).
    /// Pages already in the catalog are skipped, so an interrupted run can
    /// simply be repeated.
    Ingest {
        /// Source identifier, e.g. `COMBINED.pdf`.
        source: String,

        /// First page index to process.
        #[arg(long)]
        start: Option<u32>,

        /// Page index to stop before.
        #[arg(long)]
        end: Option<u32>,

        /// Progress on stderr: `off`, `human` or `json`. Defaults to human on a TTY.
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },

    /// Follow a running producer and ingest pages as they appear.
    ///
    /// Stops once the producer is no longer running, no new pages arrive
    /// and a final grace period has passed. Ctrl-C stops early.
    Watch {
        source: String,

        /// Poll interval in seconds (overrides `[watch].poll_interval_secs`).
        #[arg(long)]
        interval: Option<u64>,

        /// Grace period in seconds (overrides `[watch].grace_secs`).
        #[arg(long)]
        grace: Option<u64>,

        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },

    /// Import an extraction manifest (JSON array of pages).
    Import {
        manifest: PathBuf,

        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },

    /// Ranked full-text search over text, description and title.
    Search {
        query: String,

        #[command(flatten)]
        filters: Filters,
    },

    /// List records, newest first.
    List {
        #[command(flatten)]
        filters: Filters,
    },

    /// Print a record by id.
    Get { id: i64 },

    /// List detected people by number of records.
    People {
        #[arg(long, default_value_t = 50)]
        limit: i64,
    },

    /// Show catalog statistics.
    Stats,

    /// Compare producer output with ingested records for a source.
    Progress { source: String },
}

/// Filters and pagination shared by `search` and `list`.
#[derive(clap::Args)]
struct Filters {
    /// Record type, e.g. `image`, `flight_log`, `legal`. `all` disables the filter.
    #[arg(long)]
    category: Option<String>,

    /// Case-insensitive substring of the source id.
    #[arg(long)]
    source: Option<String>,

    #[arg(long, default_value_t = 1)]
    page: i64,

    /// Results per page (defaults to `[retrieval].default_per_page`).
    #[arg(long)]
    per_page: Option<i64>,
}

impl Filters {
    fn into_request(self, text_query: Option<String>, default_per_page: i64) -> SearchRequest {
        SearchRequest {
            text_query,
            category: self.category,
            source_filter: self.source,
            page: self.page,
            per_page: self.per_page.unwrap_or(default_per_page),
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest {
            source,
            start,
            end,
            progress,
        } => {
            let mode = progress.unwrap_or_else(ProgressMode::default_for_tty);
            batch::run_ingest(&cfg, &source, start, end, mode).await?;
        }
        Commands::Watch {
            source,
            interval,
            grace,
            progress,
        } => {
            let mode = progress.unwrap_or_else(ProgressMode::default_for_tty);
            watch::run_watch(&cfg, &source, interval, grace, mode).await?;
        }
        Commands::Import { manifest, progress } => {
            let mode = progress.unwrap_or_else(ProgressMode::default_for_tty);
            batch::run_import(&cfg, &manifest, mode).await?;
        }
        Commands::Search { query, filters } => {
            let request = filters.into_request(Some(query), cfg.retrieval.default_per_page);
            search::run_search(&cfg, request).await?;
        }
        Commands::List { filters } => {
            let request = filters.into_request(None, cfg.retrieval.default_per_page);
            search::run_search(&cfg, request).await?;
        }
        Commands::Get { id } => {
            get::run_get(&cfg, id).await?;
        }
        Commands::People { limit } => {
            stats::run_people(&cfg, limit).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Progress { source } => {
            stats::run_progress(&cfg, &source).await?;
        }
    }

    Ok(())
}
