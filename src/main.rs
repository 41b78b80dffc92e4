mod api;
mod config;
mod error;
mod export;
mod metrics;
mod models;
mod pipeline;
mod scraper;
mod storage;
mod utils;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::AppConfig;
use crate::models::{Period, SalesQuery, Segment, SortKey};
use crate::pipeline::Pipeline;
use crate::scraper::DanawaScraper;
use crate::storage::Repository;

#[derive(Parser)]
#[command(name = "auto-rank", about = "Monthly car sales ranking tracker", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    /// Scrape one month's ranking, score it and store it
    Scrape {
        /// Month to scrape, YYYY-MM (default: current month)
        #[arg(short, long)]
        period: Option<Period>,

        /// Market segment (default: both, one after the other)
        #[arg(short, long, value_enum)]
        segment: Option<Segment>,
    },

    /// Print stored records
    List {
        #[arg(short, long)]
        period: Option<Period>,

        #[arg(short, long, value_enum)]
        segment: Option<Segment>,

        /// Only models selling at least this many units
        #[arg(long)]
        min_sales: Option<i64>,

        /// Hide models with no sales in the previous month
        #[arg(long)]
        exclude_new: bool,

        #[arg(long, value_enum, default_value_t = SortKey::Score)]
        sort_by: SortKey,

        /// Emit JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// List months with stored data, newest first
    Periods,

    /// Export stored records to CSV
    Export {
        #[arg(short, long)]
        out: PathBuf,

        #[arg(short, long)]
        period: Option<Period>,

        #[arg(short, long, value_enum)]
        segment: Option<Segment>,
    },

    /// Serve the sales API over HTTP
    Serve {
        /// Listen address (default from config: server.bind)
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Show database statistics
    Stats,

    /// Apply schema migrations without loading data
    Migrate,
}

fn open_repo(config: &AppConfig) -> Result<Repository> {
    let repo = Repository::open(&config.storage.db_path)
        .with_context(|| format!("Failed to open DuckDB at {:?}", config.storage.db_path))?;
    if config.storage.run_migrations {
        repo.run_migrations().context("Migrations failed")?;
    }
    Ok(repo)
}

fn build_pipeline(config: &AppConfig, repo: Arc<Repository>) -> Result<Pipeline> {
    let scraper = DanawaScraper::new(&config.scraper).context("Failed to build scraper")?;
    Ok(Pipeline::new(Arc::new(scraper), repo))
}

fn segments(segment: Option<Segment>) -> Vec<Segment> {
    segment.map(|s| vec![s]).unwrap_or_else(|| Segment::ALL.to_vec())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "auto_rank=info,warn",
        1 => "auto_rank=debug,info",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(fmt::layer().compact().with_target(false))
        .with(EnvFilter::new(filter))
        .init();

    let config = AppConfig::load()?;

    match cli.command {
        Command::Scrape { period, segment } => {
            let period = period.unwrap_or_else(Period::current);
            let _t = utils::Timer::start(format!("Scrape {}", period));
            let repo = Arc::new(open_repo(&config)?);
            let pipeline = build_pipeline(&config, repo)?;

            let processed = pipeline
                .run_segments(period, &segments(segment))
                .await
                .with_context(|| format!("Scrape of {} failed", period))?;
            info!("Done: {} records for {}", processed, period);
        }

        Command::List { period, segment, min_sales, exclude_new, sort_by, json } => {
            let repo = open_repo(&config)?;
            let records = repo.query(&SalesQuery { period, segment, min_sales, exclude_new, sort_by })?;

            if json {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else if records.is_empty() {
                println!("No records — run `auto-rank scrape` first.");
            } else {
                println!(
                    "{:<8} {:<9} {:>4} {:<28} {:>9} {:>9} {:>9} {:>5} {:>7}",
                    "period", "segment", "rank", "model", "sales", "Δ units", "Δ %", "Δrk", "score"
                );
                for r in &records {
                    println!(
                        "{:<8} {:<9} {:>4} {:<28} {:>9} {:>9} {:>9} {:>+5} {:>7.3}",
                        r.period.to_string(),
                        r.segment.to_string(),
                        r.rank,
                        r.model_name,
                        utils::fmt_number(r.sales_volume),
                        utils::fmt_number(r.mom_absolute),
                        if r.is_new_entry() { "new".to_string() } else { utils::fmt_pct(r.mom_percent) },
                        r.rank_delta,
                        r.score,
                    );
                }
            }
        }

        Command::Periods => {
            let repo = open_repo(&config)?;
            let periods = repo.list_periods()?;
            if periods.is_empty() {
                println!("No periods stored yet.");
            }
            for p in &periods {
                println!("{}", p);
            }
        }

        Command::Export { out, period, segment } => {
            let repo = open_repo(&config)?;
            let records = repo.query(&SalesQuery {
                period,
                segment,
                sort_by: SortKey::Rank,
                ..Default::default()
            })?;
            let n = export::export_csv(&records, &out)?;
            println!("{} records written to {}", n, out.display());
        }

        Command::Serve { bind } => {
            let repo = Arc::new(open_repo(&config)?);
            let pipeline = Arc::new(build_pipeline(&config, Arc::clone(&repo))?);

            if repo.list_periods()?.is_empty() {
                info!("Database empty. Trigger a scrape via POST /api/scraper/trigger");
            }

            let addr = bind.unwrap_or_else(|| config.server.bind.clone());
            let listener = tokio::net::TcpListener::bind(&addr)
                .await
                .with_context(|| format!("Could not bind {}", addr))?;
            info!("Listening on http://{}", addr);

            axum::serve(listener, api::router(api::ApiState { repo, pipeline }))
                .await
                .context("HTTP server failed")?;
        }

        Command::Stats => {
            let repo = open_repo(&config)?;
            let records = repo.record_count()?;
            let runs = repo.run_count()?;
            let (min, max) = repo.period_range().unwrap_or((None, None));
            println!("─────────────────────────────────");
            println!("  Auto Rank — Database Stats");
            println!("─────────────────────────────────");
            println!("  Records     : {}", utils::fmt_number(records));
            println!("  Scrape runs : {}", utils::fmt_number(runs));
            println!("  From        : {}", min.map(|p| p.to_string()).unwrap_or("—".into()));
            println!("  To          : {}", max.map(|p| p.to_string()).unwrap_or("—".into()));
            println!("─────────────────────────────────");
        }

        Command::Migrate => {
            Repository::open(&config.storage.db_path)?.run_migrations()?;
            println!("Migrations applied.");
        }
    }

    Ok(())
}
