//! sqlite-recover command-line interface
//!
//! Reads SQLite evidence files without modifying them and prints results as
//! JSON.
//!
//! # Usage
//!
//! ```bash
//! # Header fields straight from disk
//! sqlite-recover header evidence.db
//!
//! # Rows left behind on freelist pages
//! sqlite-recover freelist evidence.db
//!
//! # Pages in the WAL that the main file does not reflect yet
//! sqlite-recover wal-diff evidence.db
//! ```

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use sqlite_recover_core::{
    accessor::{find_databases, journal_inventory},
    carve_file, read_header, ForensicAccessor, ForensicConfig,
    FreelistRecoveryEngine, QueryParams, Value, WalAnalyzer,
};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Forensic reader for SQLite databases
#[derive(Parser, Debug)]
#[command(
    name = "sqlite-recover",
    version,
    about = "Read and recover data from SQLite evidence files",
    long_about = "Reads SQLite database files without modifying them.\n\n\
                  Queries run against a scratch copy; recovery commands read raw\n\
                  pages from the freelist, the whole file, or the write-ahead log."
)]
struct Args {
    /// Configuration file (TOML)
    #[arg(long, value_name = "FILE", env = "SQLITE_RECOVER_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    /// Print JSON on a single line
    #[arg(long, global = true)]
    compact: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Search a directory tree for SQLite databases
    Find { dir: PathBuf },
    /// Parse the 100-byte database header
    Header { db: PathBuf },
    /// List tables, indexes, triggers and views
    Schema { db: PathBuf },
    /// Run one read-only SQL statement
    Query {
        db: PathBuf,
        sql: String,
        /// Positional parameter (repeatable)
        #[arg(short = 'p', long = "param")]
        params: Vec<String>,
        /// Named parameter as NAME=VALUE (repeatable)
        #[arg(short = 'n', long = "named", conflicts_with = "params")]
        named: Vec<String>,
        /// Override the row cap
        #[arg(long)]
        max_rows: Option<usize>,
    },
    /// Page through a table's rows
    Table {
        db: PathBuf,
        table: String,
        #[arg(long, default_value_t = 100)]
        limit: usize,
        #[arg(long, default_value_t = 0)]
        offset: usize,
    },
    /// Presence and size of -journal, -wal and -shm files
    Journals { db: PathBuf },
    /// Engine counters compared against the raw header
    Stats { db: PathBuf },
    /// Recover records and text from freelist pages
    Freelist { db: PathBuf },
    /// Deleted records grouped by table
    Recover {
        db: PathBuf,
        #[arg(long)]
        table: Option<String>,
    },
    /// Sweep every page of the file for table-leaf pages
    Carve { path: PathBuf },
    /// Parse the WAL header and frames
    Wal { db: PathBuf },
    /// Compare WAL frames with the main file
    WalDiff { db: PathBuf },
    /// WAL frames that may carry rows of a table
    WalRecords {
        db: PathBuf,
        #[arg(long)]
        table: Option<String>,
    },
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose);

    let compact = args.compact;
    let (envelope, code) = match run(args) {
        Ok(result) => (json!({ "ok": true, "result": result }), ExitCode::SUCCESS),
        Err(e) => (json!({ "ok": false, "error": format!("{e:#}") }), ExitCode::FAILURE),
    };
    let rendered = if compact {
        serde_json::to_string(&envelope)
    } else {
        serde_json::to_string_pretty(&envelope)
    };
    match rendered {
        Ok(text) => println!("{text}"),
        Err(e) => eprintln!("Error: {e}"),
    }
    code
}

fn init_logging(verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("sqlite_recover=debug,sqlite_recover_core=debug")
        } else {
            EnvFilter::new("sqlite_recover=warn,sqlite_recover_core=warn")
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn load_config(path: Option<&Path>) -> Result<ForensicConfig> {
    let Some(path) = path else {
        return Ok(ForensicConfig::default());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    let config =
        toml::from_str(&text).with_context(|| format!("parsing config {}", path.display()))?;
    debug!(path = %path.display(), "loaded configuration");
    Ok(config)
}

fn run(args: Args) -> Result<serde_json::Value> {
    let mut config = load_config(args.config.as_deref())?;

    let value = match args.command {
        Command::Find { dir } => serde_json::to_value(find_databases(&dir, &config.accessor)?)?,
        Command::Header { db } => serde_json::to_value(read_header(&db)?)?,
        Command::Schema { db } => {
            let accessor = ForensicAccessor::new(config.accessor)?;
            let handle = accessor.open(&db)?;
            serde_json::to_value(accessor.describe_schema(&handle)?)?
        }
        Command::Query {
            db,
            sql,
            params,
            named,
            max_rows,
        } => {
            if let Some(max_rows) = max_rows {
                config.accessor.max_query_rows = max_rows;
            }
            let params = if !named.is_empty() {
                QueryParams::Named(named.iter().map(|n| parse_named(n)).collect::<Result<_>>()?)
            } else if !params.is_empty() {
                QueryParams::Positional(params.iter().map(|p| parse_value(p)).collect())
            } else {
                QueryParams::None
            };
            let accessor = ForensicAccessor::new(config.accessor)?;
            let handle = accessor.open(&db)?;
            serde_json::to_value(accessor.execute_query(&handle, &sql, &params)?)?
        }
        Command::Table {
            db,
            table,
            limit,
            offset,
        } => {
            let accessor = ForensicAccessor::new(config.accessor)?;
            let handle = accessor.open(&db)?;
            serde_json::to_value(accessor.table_page(&handle, &table, limit, offset)?)?
        }
        Command::Journals { db } => serde_json::to_value(journal_inventory(&db))?,
        Command::Stats { db } => {
            let accessor = ForensicAccessor::new(config.accessor)?;
            let handle = accessor.open(&db)?;
            json!({
                "header": handle.header(),
                "engine": accessor.engine_stats(&handle)?,
                "discrepancies": accessor.cross_check_header(&handle)?,
            })
        }
        Command::Freelist { db } => {
            let engine = FreelistRecoveryEngine::open(&db, config.recovery)?;
            serde_json::to_value(engine.scan_freelist()?)?
        }
        Command::Recover { db, table } => {
            let engine = FreelistRecoveryEngine::open(&db, config.recovery)?;
            serde_json::to_value(engine.recover_deleted_records(table.as_deref())?)?
        }
        Command::Carve { path } => serde_json::to_value(carve_file(&path, &config.recovery)?)?,
        Command::Wal { db } => {
            let mut analyzer = WalAnalyzer::for_database(&db, config.wal);
            serde_json::to_value(analyzer.analyze()?)?
        }
        Command::WalDiff { db } => {
            let mut analyzer = WalAnalyzer::for_database(&db, config.wal);
            serde_json::to_value(analyzer.diff_against_main(&db)?)?
        }
        Command::WalRecords { db, table } => {
            let mut analyzer =
                WalAnalyzer::for_database(&db, config.wal).with_recovery_config(config.recovery);
            serde_json::to_value(analyzer.extract_candidate_records(table.as_deref())?)?
        }
    };
    info!("command finished");
    Ok(value)
}

/// Integers and reals are bound as numbers, `NULL` as null, anything else as
/// text.
fn parse_value(raw: &str) -> Value {
    if raw.eq_ignore_ascii_case("null") {
        Value::Null
    } else if let Ok(i) = raw.parse::<i64>() {
        Value::Integer(i)
    } else if let Ok(r) = raw.parse::<f64>() {
        Value::Real(r)
    } else {
        Value::Text(raw.to_string())
    }
}

fn parse_named(raw: &str) -> Result<(String, Value)> {
    let (name, value) = raw
        .split_once('=')
        .with_context(|| format!("named parameter `{raw}` must look like NAME=VALUE"))?;
    Ok((name.to_string(), parse_value(value)))
}
