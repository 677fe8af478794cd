//! rustpaperbot - Scholar + Crossref paper pipeline
//!
//! ## Usage
//!
//! ```bash
//! rustpaperbot init
//! rustpaperbot validate "digital workplace" --max-results 10 --min-year 2015
//! rustpaperbot download --start 1 --end 5
//! rustpaperbot dedup
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use rustpaperbot::config::AppConfig;
use rustpaperbot::cookies::CookieStore;
use rustpaperbot::crossref::parse_doi_list;
use rustpaperbot::gscholar::parse_pages;
use rustpaperbot::pipeline::SessionContext;
use rustpaperbot::store::{PaperFilter, PaperStore, Table};
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::{fmt, EnvFilter};

// ============================================================================
// CLI Definition
// ============================================================================

/// Scholar + Crossref paper search, validation, storage and PDF acquisition
#[derive(Parser)]
#[command(name = "rustpaperbot")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    /// Config file
    #[arg(long, global = true, env = "RUSTPAPERBOT_CONFIG")]
    config: Option<PathBuf>,

    /// Database file (overrides the config)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database and its tables
    Init,

    /// Scrape Google Scholar and save the results
    Search {
        /// Search keywords
        query: String,

        /// Page range (e.g., "1", "1-5")
        #[arg(long, default_value = "1")]
        pages: String,

        /// Keep only papers from this year onwards
        #[arg(long)]
        min_year: Option<i32>,

        /// Proxy URL (e.g., http://127.0.0.1:7890)
        #[arg(long)]
        proxy: Option<String>,
    },

    /// Search Crossref and save the results
    Crossref {
        query: String,

        #[arg(long, default_value = "20")]
        rows: usize,
    },

    /// Look up DOIs on Crossref and save the results
    Doi {
        /// DOIs to resolve
        dois: Vec<String>,

        /// File with one DOI per line
        #[arg(long)]
        file: Option<PathBuf>,
    },

    /// Scrape Scholar page 1 and validate every result against Crossref
    Validate {
        query: String,

        #[arg(long, default_value = "10")]
        max_results: usize,

        #[arg(long)]
        min_year: Option<i32>,
    },

    /// Download PDFs of verified papers (1-based positions, most cited first)
    Download {
        #[arg(long, default_value = "1")]
        start: usize,

        /// Last position, defaults to the end of the list
        #[arg(long)]
        end: Option<usize>,

        /// Mirror base URL, repeatable (replaces the configured mirrors)
        #[arg(long = "mirror")]
        mirrors: Vec<String>,

        /// Also search mirrors by title
        #[arg(long)]
        title_fallback: bool,
    },

    /// Back up the database, then remove duplicate rows
    Dedup,

    /// Copy the database into the backup directory
    Backup,

    /// Replace the database with a backup file
    Restore { backup: PathBuf },

    /// List stored papers
    List {
        #[arg(long, value_enum, default_value = "verified")]
        table: TableArg,

        #[arg(long)]
        title: Option<String>,

        #[arg(long)]
        author: Option<String>,

        #[arg(long)]
        journal: Option<String>,

        #[arg(long)]
        year_from: Option<i32>,

        #[arg(long)]
        year_to: Option<i32>,

        #[arg(long)]
        min_score: Option<i64>,

        #[arg(long, default_value = "50")]
        limit: i64,
    },

    /// Manage Scholar cookies
    Cookies {
        #[command(subcommand)]
        action: CookieAction,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum TableArg {
    Scholar,
    Crossref,
    Verified,
}

impl From<TableArg> for Table {
    fn from(arg: TableArg) -> Self {
        match arg {
            TableArg::Scholar => Table::Scholar,
            TableArg::Crossref => Table::Crossref,
            TableArg::Verified => Table::Verified,
        }
    }
}

#[derive(Subcommand)]
enum CookieAction {
    /// Show cookie file path
    Path,
    /// Clear stored cookies
    Clear,
    /// Import a browser cookie export (JSON array)
    Import { file: PathBuf },
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.debug { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));
    if cli.json_logs {
        fmt().json().with_env_filter(filter).with_target(true).init();
    } else {
        fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(false)
            .init();
    }

    let mut config = AppConfig::load(cli.config.as_deref()).context("Failed to load config")?;
    if let Some(db) = cli.db {
        config.database_path = db;
    }

    match cli.command {
        Commands::Init => {
            let store = PaperStore::open(&config.database_path).await?;
            store.init_schema().await?;
            println!("Database ready: {}", config.database_path.display());
        }
        Commands::Search {
            query,
            pages,
            min_year,
            proxy,
        } => {
            let pages = parse_pages(&pages)?;
            if proxy.is_some() {
                config.proxy = proxy;
            }
            let session = SessionContext::open(config).await?;
            let report = session.scholar_search(&query, &pages, min_year).await?;
            println!("{}", report.summary());
        }
        Commands::Crossref { query, rows } => {
            let session = SessionContext::open(config).await?;
            println!("{}", session.crossref_search(&query, rows).await?.summary());
        }
        Commands::Doi { mut dois, file } => {
            if let Some(file) = file {
                let text = std::fs::read_to_string(&file)
                    .with_context(|| format!("Failed to read {}", file.display()))?;
                dois.extend(parse_doi_list(&text));
            }
            let dois = parse_doi_list(&dois.join("\n"));
            if dois.is_empty() {
                bail!("No DOIs given");
            }
            let session = SessionContext::open(config).await?;
            println!("{}", session.doi_search(&dois).await?.summary());
        }
        Commands::Validate {
            query,
            max_results,
            min_year,
        } => {
            let session = SessionContext::open(config).await?;
            let report = session.validate(&query, max_results, min_year).await?;
            print_papers(&report.validation.records);
            println!("{}", report.summary());
        }
        Commands::Download {
            start,
            end,
            mirrors,
            title_fallback,
        } => {
            if !mirrors.is_empty() {
                config.mirror_count = mirrors.len();
                config.mirrors = mirrors;
            }
            config.title_fallback |= title_fallback;
            if config.active_mirrors().is_empty() {
                info!("No mirrors configured; only stored URLs will be tried");
            }

            let session = SessionContext::open(config).await?;
            let end = match end {
                Some(end) => end,
                None => session.store().list_verified().await?.len(),
            };
            if start == 0 || start > end {
                bail!("Invalid range {}..={}", start, end);
            }
            println!("{}", session.download(start..=end).await?.summary());
        }
        Commands::Dedup => {
            let session = SessionContext::open(config).await?;
            println!("{}", session.deduplicate().await?.summary());
        }
        Commands::Backup => {
            let session = SessionContext::open(config).await?;
            println!("Backup written to {}", session.backup()?.display());
        }
        Commands::Restore { backup } => {
            let session = SessionContext::open(config).await?;
            session.restore(&backup).await?;
            println!("Database restored from {}", backup.display());
        }
        Commands::List {
            table,
            title,
            author,
            journal,
            year_from,
            year_to,
            min_score,
            limit,
        } => {
            let store = PaperStore::open(&config.database_path).await?;
            let filter = PaperFilter {
                title,
                author,
                journal,
                year_from,
                year_to,
                min_metadata_score: min_score,
                limit: Some(limit),
            };
            let papers = store.query_papers(table.into(), &filter).await?;
            let records: Vec<_> = papers.into_iter().map(|p| p.record).collect();
            print_papers(&records);
            println!("{} papers", records.len());
        }
        Commands::Cookies { action } => handle_cookies(action)?,
    }

    Ok(())
}

fn print_papers(records: &[rustpaperbot::PaperRecord]) {
    for (idx, record) in records.iter().enumerate() {
        let title: String = if record.title.chars().count() > 100 {
            record.title.chars().take(97).chain("...".chars()).collect()
        } else {
            record.title.clone()
        };
        println!(
            "{:>3}. [{}] {} ({}) cites={} doi={}",
            idx + 1,
            record.verification_status.label(),
            title,
            record.year.as_deref().unwrap_or("n/a"),
            record.citation_count.unwrap_or(0),
            record.doi.as_deref().unwrap_or("n/a"),
        );
    }
}

fn handle_cookies(action: CookieAction) -> Result<()> {
    let store = CookieStore::new()?;

    match action {
        CookieAction::Path => {
            println!("Cookie file: {}", store.path().display());
        }
        CookieAction::Clear => {
            store.clear()?;
            println!("Cookies cleared.");
        }
        CookieAction::Import { file } => {
            let json = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let count = store.import_json(&json)?;
            println!("Imported {} cookies into {}", count, store.path().display());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_config_flag_reads_env() {
        let command = Cli::command();
        let config = command
            .get_arguments()
            .find(|arg| arg.get_id() == "config")
            .expect("config arg");
        assert_eq!(
            config.get_env().and_then(|v| v.to_str()),
            Some("RUSTPAPERBOT_CONFIG")
        );

        let cli = Cli::try_parse_from(["rustpaperbot", "--config", "alt.toml", "dedup"]).expect("parse");
        assert_eq!(cli.config.as_deref(), Some(std::path::Path::new("alt.toml")));
    }
}
