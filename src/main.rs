use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use std::sync::Arc;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

use ticker_revalidator::database_sqlx::SqliteTickerStore;
use ticker_revalidator::models::{CandidateMode, Config};
use ticker_revalidator::{RevalidationEngine, YahooClient};

#[derive(Parser)]
#[command(author, version, about = "Re-check stored ticker symbols against the quote service", long_about = None)]
struct Cli {
    /// SQLite database path (overrides DATABASE_PATH)
    #[arg(long, global = true)]
    database: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Revalidate tickers and store the results
    Run {
        /// Which tickers to revalidate
        #[arg(long, value_enum, default_value_t = ModeArg::Inactive)]
        mode: ModeArg,

        /// Age in days after which a ticker counts as stale (stale mode)
        #[arg(long)]
        stale_days: Option<u32>,

        /// Only revalidate the first N candidates
        #[arg(long)]
        limit: Option<usize>,

        /// Tickers committed per batch
        #[arg(long)]
        batch_size: Option<usize>,

        /// Concurrent lookups per chunk
        #[arg(long)]
        concurrency: Option<usize>,

        /// Print the run summary as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show ticker table statistics and recent activity
    Status,
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    Inactive,
    Active,
    Stale,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("ticker_revalidator=info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = Config::from_env();
    if let Some(database) = cli.database {
        config.database_path = database;
    }

    let store = match SqliteTickerStore::connect(&config.database_path).await {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!("Failed to initialize database: {}", e);
            eprintln!("❌ Database Error: {}", e);
            std::process::exit(1);
        }
    };

    match cli.command {
        Commands::Run {
            mode,
            stale_days,
            limit,
            batch_size,
            concurrency,
            json,
        } => {
            if let Some(batch_size) = batch_size {
                config.batch_size = batch_size;
            }
            if let Some(concurrency) = concurrency {
                config.concurrent_requests = concurrency;
            }
            let mode = match mode {
                ModeArg::Inactive => CandidateMode::Inactive,
                ModeArg::Active => CandidateMode::Active,
                ModeArg::Stale => CandidateMode::Stale {
                    days: stale_days.unwrap_or(config.stale_after_days),
                },
            };
            run(store, &config, mode, limit, json).await
        }
        Commands::Status => status(&store, &config).await,
    }
}

/// What a Ctrl-C does during a run
#[derive(Debug, PartialEq, Eq)]
enum SignalAction {
    /// Stop starting work, commit the in-flight batch
    FinishBatch,
    /// Give up on the in-flight batch
    ExitNow,
}

fn signal_action(received: u32) -> SignalAction {
    if received <= 1 {
        SignalAction::FinishBatch
    } else {
        SignalAction::ExitNow
    }
}

async fn run(
    store: Arc<SqliteTickerStore>,
    config: &Config,
    mode: CandidateMode,
    limit: Option<usize>,
    json: bool,
) -> Result<()> {
    let client = Arc::new(YahooClient::new(config)?);
    let mut engine = RevalidationEngine::new(store, client, config)
        .with_mode(mode)
        .with_limit(limit);

    let interrupt = engine.interrupt_handle();
    tokio::spawn(async move {
        let mut received = 0;
        while tokio::signal::ctrl_c().await.is_ok() {
            received += 1;
            match signal_action(received) {
                SignalAction::FinishBatch => {
                    warn!("🛑 Revalidation interrupted by user, finishing the current batch...");
                    warn!("Press Ctrl-C again to exit immediately");
                    interrupt.interrupt();
                }
                SignalAction::ExitNow => {
                    // Batches committed so far stay in the database
                    eprintln!("🛑 Exiting without waiting for the current batch");
                    std::process::exit(130);
                }
            }
        }
    });

    let summary = match engine.run().await {
        Ok(summary) => summary,
        Err(e) => {
            error!("💥 Revalidation failed: {}", e);
            eprintln!("❌ Revalidation failed: {}", e);
            std::process::exit(1);
        }
    };

    if summary.interrupted {
        println!("🛑 Revalidation interrupted by user");
        println!("💾 Progress has been saved to database");
    }
    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    }
    Ok(())
}

async fn status(store: &SqliteTickerStore, config: &Config) -> Result<()> {
    let stats = store.stats(config.stale_after_days).await?;

    println!();
    println!("📊 TICKER STORE STATUS");
    println!("======================");
    println!("Total tickers:      {}", stats.total);
    println!("Active:             {}", stats.active);
    println!("Validated:          {}", stats.validated);
    println!("Exchanges:          {}", stats.exchanges);
    println!(
        "Need validation:    {} (never checked or older than {} days)",
        stats.need_validation, config.stale_after_days
    );

    let recent = store.recent_activity(10).await?;
    if !recent.is_empty() {
        println!();
        println!("Recent activity:");
        for record in recent {
            println!(
                "  {:<10} {:<8} {:>12} {:<10} {}",
                record.symbol,
                match record.active {
                    Some(true) => "active",
                    Some(false) => "inactive",
                    None => "unknown",
                },
                record.price.map(|p| format!("{:.2}", p)).unwrap_or_default(),
                record.exchange.unwrap_or_default(),
                record
                    .last_checked
                    .map(|t| t.to_string())
                    .unwrap_or_default(),
            );
        }
    }

    Ok(())
}
