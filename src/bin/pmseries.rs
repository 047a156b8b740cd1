//! pmseries - load PCP archives into a key-value store and query cached series
//!
//! # Commands
//!
//! - `query <expr>` - Series matching an expression; with any of `--start`,
//!   `--finish`, `--offset` or `--count` the matching samples instead
//! - `load <expr>` - Load the source named by `source.archive == "path"`,
//!   restricted to any `metric.name == "..."` patterns in the expression
//! - `loadmeta <expr>` - As `load`, metadata only
//! - `desc <ids>` - Metric descriptors of series
//! - `instance <ids>` - Instance names and ids of series
//! - `labels [ids]` - Labels of series, or every label name
//! - `notes [ids]` - Notes of series, or every note name
//! - `metrics [ids]` - Metric names of series, or every metric name
//!
//! # Configuration
//!
//! Read from, in order:
//! 1. `--config <path>`
//! 2. `PMSERIES_CONFIG` environment variable (path to TOML file)
//! 3. `./pmseries.toml` in current directory
//! 4. Default configuration
//!
//! Output is pretty-printed JSON on stdout; diagnostics go to stderr.

use clap::{Parser, Subcommand};
use pcp_series::config::SeriesConfig;
use pcp_series::error::{Error, Result};
use pcp_series::identity::SeriesId;
use pcp_series::loader::{LoadRequest, Loader};
use pcp_series::mapper::Mapper;
use pcp_series::metrics::gather_metrics;
use pcp_series::query::{parse, Lookup, Solver};
use pcp_series::store::schema::check_version;
use pcp_series::store::util::sanitize_url;
use pcp_series::store::{Keys, MemoryStore, RedisStore, Store};
use pcp_series::types::{TimeWindow, Timestamp};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info};

// =============================================================================
// CLI Definition
// =============================================================================

/// pmseries - cache and query Performance Co-Pilot time series
#[derive(Parser)]
#[command(name = "pmseries")]
#[command(version)]
#[command(about = "Load PCP archives into a key-value store and query cached series", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file (overrides PMSERIES_CONFIG env var)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the store URL (e.g., redis://localhost:6379)
    #[arg(short, long, global = true)]
    url: Option<String>,

    /// Use an in-process store instead of a server (dry run)
    #[arg(long, global = true)]
    memory: bool,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print telemetry counters to stderr on exit
    #[arg(long, global = true)]
    stats: bool,

    #[command(flatten)]
    window: WindowArgs,
}

/// Time bounds and pagination
#[derive(clap::Args, Default)]
struct WindowArgs {
    /// Window start, epoch seconds or RFC 3339
    #[arg(short, long, global = true)]
    start: Option<Timestamp>,

    /// Window end, epoch seconds or RFC 3339
    #[arg(short, long, global = true)]
    finish: Option<Timestamp>,

    /// Newest samples to skip per series
    #[arg(short, long, global = true)]
    offset: Option<usize>,

    /// Samples per series (0 means the configured default)
    #[arg(short = 'n', long, global = true)]
    count: Option<usize>,
}

impl WindowArgs {
    fn requested(&self) -> bool {
        self.start.is_some() || self.finish.is_some() || self.offset.is_some() || self.count.is_some()
    }

    fn to_window(&self, default_count: usize) -> TimeWindow {
        TimeWindow {
            start: self.start,
            end: self.finish,
            offset: self.offset.unwrap_or(0),
            count: self.count.filter(|&n| n > 0).unwrap_or(default_count),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Series (or samples) matching an expression
    Query {
        /// Query expression
        expr: String,
    },

    /// Load a metric source named in an expression
    Load {
        /// Expression naming the source and optional metric patterns
        expr: String,
    },

    /// Load metadata only, no samples
    Loadmeta {
        /// Expression naming the source and optional metric patterns
        expr: String,
    },

    /// Metric descriptors of series
    Desc {
        /// Series identifiers
        #[arg(required = true)]
        ids: Vec<SeriesId>,
    },

    /// Instance of series
    Instance {
        /// Series identifiers
        #[arg(required = true)]
        ids: Vec<SeriesId>,
    },

    /// Labels of series, or all label names
    Labels {
        /// Series identifiers
        ids: Vec<SeriesId>,
    },

    /// Notes of series, or all note names
    Notes {
        /// Series identifiers
        ids: Vec<SeriesId>,
    },

    /// Metric names of series, or all metric names
    Metrics {
        /// Series identifiers
        ids: Vec<SeriesId>,
    },
}

// =============================================================================
// Startup
// =============================================================================

/// Store, key schema and settings shared by every command
struct Session {
    store: Arc<dyn Store>,
    keys: Keys,
    config: SeriesConfig,
}

impl Session {
    async fn open(cli: &Cli, config: SeriesConfig) -> Result<Self> {
        let keys = Keys::new(config.store.key_prefix.clone());
        let store: Arc<dyn Store> = if cli.memory {
            info!("Using in-process store");
            Arc::new(MemoryStore::new())
        } else {
            info!(url = %sanitize_url(&config.store.url), "Connecting to store");
            Arc::new(RedisStore::connect(config.redis_config()).await?)
        };

        let version = check_version(store.as_ref(), &keys).await?;
        debug!(version, "Store schema version accepted");

        Ok(Self { store, keys, config })
    }

    async fn loader(&self) -> Result<Loader> {
        let mapper = Mapper::new(self.store.clone(), self.keys.clone(), self.config.store.cache_size).await?;
        Ok(Loader::new(Arc::new(mapper), self.config.load.counter_wrap))
    }

    fn solver(&self) -> Solver {
        Solver::new(self.store.clone(), self.keys.clone())
    }

    fn lookup(&self) -> Lookup {
        Lookup::new(self.store.clone(), self.keys.clone())
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// =============================================================================
// CLI Command Handlers
// =============================================================================

async fn cmd_query(session: &Session, expr: &str, window: &WindowArgs) -> Result<()> {
    let tree = parse(expr)?;
    let window = window
        .requested()
        .then(|| window.to_window(session.config.query.default_count));
    let result = session.solver().solve(&tree, window.as_ref()).await?;
    print_json(&result)
}

async fn cmd_load(session: &Session, expr: &str, window: &WindowArgs, metadata_only: bool) -> Result<()> {
    let tree = parse(expr)?;
    let mut request = LoadRequest::from_query(&tree, window.to_window(session.config.query.default_count))?;
    request.metadata_only = metadata_only;

    let summary = session.loader().await?.load(&request).await?;
    print_json(&summary)
}

async fn run(cli: &Cli, session: &Session) -> Result<()> {
    match &cli.command {
        Commands::Query { expr } => cmd_query(session, expr, &cli.window).await,
        Commands::Load { expr } => cmd_load(session, expr, &cli.window, false).await,
        Commands::Loadmeta { expr } => cmd_load(session, expr, &cli.window, true).await,
        Commands::Desc { ids } => print_json(&session.lookup().desc(ids).await?),
        Commands::Instance { ids } => print_json(&session.lookup().instance(ids).await?),
        Commands::Labels { ids } if ids.is_empty() => print_json(&session.lookup().all_labels().await?),
        Commands::Labels { ids } => print_json(&session.lookup().labels(ids).await?),
        Commands::Notes { ids } if ids.is_empty() => print_json(&session.lookup().all_notes().await?),
        Commands::Notes { ids } => print_json(&session.lookup().notes(ids).await?),
        Commands::Metrics { ids } if ids.is_empty() => print_json(&session.lookup().all_metrics().await?),
        Commands::Metrics { ids } => print_json(&session.lookup().metric_names(ids).await?),
    }
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let cli = Cli::parse();

    let mut config = match SeriesConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("pmseries: {}", e);
            return std::process::ExitCode::FAILURE;
        },
    };

    // CLI overrides
    if let Some(url) = &cli.url {
        config.store.url = url.clone();
    }
    if cli.verbose {
        config.logging.level = "debug".to_string();
    }

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let outcome = match config.validate().map_err(Error::Configuration) {
        Ok(()) => match Session::open(&cli, config).await {
            Ok(session) => run(&cli, &session).await,
            Err(e) => Err(e),
        },
        Err(e) => Err(e),
    };

    if cli.stats {
        match gather_metrics() {
            Ok(text) => eprint!("{}", text),
            Err(e) => error!(error = %e, "Failed to gather telemetry"),
        }
    }

    match outcome {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("pmseries: {}", e);
            std::process::ExitCode::FAILURE
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_count_uses_default() {
        let cli = Cli::try_parse_from(["pmseries", "query", "--count", "0", "a == 1"]).unwrap();
        assert!(cli.window.requested());
        assert_eq!(cli.window.to_window(10).count, 10);

        let cli = Cli::try_parse_from(["pmseries", "query", "-n", "3", "-o", "1", "a == 1"]).unwrap();
        let window = cli.window.to_window(10);
        assert_eq!((window.offset, window.count), (1, 3));
    }

    #[test]
    fn test_window_not_requested() {
        let cli = Cli::try_parse_from(["pmseries", "query", "a == 1"]).unwrap();
        assert!(!cli.window.requested());
        assert_eq!(cli.window.to_window(10).count, 10);
    }
}
