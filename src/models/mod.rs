use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Price stored for any ticker that is not confirmed active
pub const UNKNOWN_PRICE: f64 = -1.0;

/// Persisted state of one ticker symbol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickerRecord {
    pub symbol: String,
    pub active: Option<bool>,
    pub price: Option<f64>,
    pub exchange: Option<String>,
    pub last_checked: Option<NaiveDateTime>,
}

/// Where a validated ticker ended up listed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Listing {
    /// Trading on the named exchange
    Exchange(String),
    /// Lookup succeeded but returned no usable quote
    Inactive,
    /// Confirmed gone, either by error signature or deep validation
    Delisted,
    /// Transient failure, try again on a later run
    Error,
}

impl Listing {
    const MARKERS: [&'static str; 3] = ["INACTIVE", "DELISTED", "ERROR"];

    /// Whether `name` collides with one of the status markers stored in place of an exchange
    pub fn is_marker(name: &str) -> bool {
        Self::MARKERS.iter().any(|marker| marker.eq_ignore_ascii_case(name.trim()))
    }

    pub fn as_str(&self) -> &str {
        match self {
            Listing::Exchange(name) => name,
            Listing::Inactive => "INACTIVE",
            Listing::Delisted => "DELISTED",
            Listing::Error => "ERROR",
        }
    }
}

impl fmt::Display for Listing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of validating a single symbol.
///
/// Only built through the constructors below so that a `Delisted` outcome
/// always carries `active == false` and the sentinel price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationOutcome {
    pub symbol: String,
    pub active: bool,
    pub price: f64,
    pub exchange: Listing,
    pub reason: Option<String>,
}

impl ValidationOutcome {
    pub fn active(symbol: impl Into<String>, price: f64, exchange: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            active: true,
            price,
            exchange: Listing::Exchange(exchange.into()),
            reason: None,
        }
    }

    pub fn inactive(symbol: impl Into<String>) -> Self {
        Self::not_trading(symbol, Listing::Inactive, None)
    }

    pub fn delisted(symbol: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::not_trading(symbol, Listing::Delisted, Some(reason.into()))
    }

    pub fn error(symbol: impl Into<String>) -> Self {
        Self::not_trading(symbol, Listing::Error, None)
    }

    fn not_trading(symbol: impl Into<String>, exchange: Listing, reason: Option<String>) -> Self {
        Self {
            symbol: symbol.into(),
            active: false,
            price: UNKNOWN_PRICE,
            exchange,
            reason,
        }
    }

    pub fn is_delisted(&self) -> bool {
        self.exchange == Listing::Delisted
    }

    pub fn is_error(&self) -> bool {
        self.exchange == Listing::Error
    }
}

/// Which tickers a run should revalidate
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CandidateMode {
    /// `active = 0 OR active IS NULL`
    #[default]
    Inactive,
    /// `active = 1`
    Active,
    /// Never checked, or checked more than `days` ago
    Stale { days: u32 },
}

impl fmt::Display for CandidateMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CandidateMode::Inactive => write!(f, "inactive"),
            CandidateMode::Active => write!(f, "active"),
            CandidateMode::Stale { days } => write!(f, "stale (>{} days)", days),
        }
    }
}

/// Counters accumulated over one engine run.
///
/// Only the orchestrating loop touches this, after a chunk or batch settles.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunProgress {
    pub processed: usize,
    pub newly_active: usize,
    pub delisted: usize,
    pub transient_failures: usize,
    pub errors: usize,
    pub requests: u64,
    pub session_refreshes: usize,
    pub batches_committed: usize,
}

/// Final report of a revalidation pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub mode: CandidateMode,
    pub total_candidates: usize,
    pub total_processed: usize,
    pub newly_active: usize,
    pub delisted: usize,
    pub errors: usize,
    pub total_requests: u64,
    pub session_refreshes: usize,
    pub batches_committed: usize,
    pub duration_seconds: f64,
    pub interrupted: bool,
}

impl RunSummary {
    pub fn from_progress(
        mode: CandidateMode,
        total_candidates: usize,
        progress: &RunProgress,
        elapsed: Duration,
        interrupted: bool,
    ) -> Self {
        Self {
            mode,
            total_candidates,
            total_processed: progress.processed,
            newly_active: progress.newly_active,
            delisted: progress.delisted,
            errors: progress.errors,
            total_requests: progress.requests,
            session_refreshes: progress.session_refreshes,
            batches_committed: progress.batches_committed,
            duration_seconds: elapsed.as_secs_f64(),
            interrupted,
        }
    }
}

/// Aggregate counts over the `tickers` table
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    pub total: i64,
    pub active: i64,
    pub validated: i64,
    pub exchanges: i64,
    pub need_validation: i64,
}

/// Configuration for the application
#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    pub quote_base_url: String,
    pub batch_size: usize,
    pub concurrent_requests: usize,
    pub chunk_delay: Duration,
    pub batch_delay: Duration,
    pub refresh_interval: u64,
    pub refresh_pause: Duration,
    pub refresh_symbol: String,
    pub primary_timeout: Duration,
    pub deep_timeout: Duration,
    pub rate_limit_per_second: u32,
    pub stale_after_days: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: "db/tickers.db".to_string(),
            quote_base_url: "https://query1.finance.yahoo.com".to_string(),
            batch_size: 500,
            concurrent_requests: 10,
            chunk_delay: Duration::from_millis(500),
            batch_delay: Duration::from_millis(1000),
            refresh_interval: 10_000,
            refresh_pause: Duration::from_millis(2000),
            refresh_symbol: "AAPL".to_string(),
            primary_timeout: Duration::from_millis(5000),
            deep_timeout: Duration::from_millis(3000),
            rate_limit_per_second: 0,
            stale_after_days: 5,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok(); // Load .env file if it exists

        let defaults = Config::default();
        Config {
            database_path: std::env::var("DATABASE_PATH").unwrap_or(defaults.database_path),
            quote_base_url: std::env::var("QUOTE_BASE_URL").unwrap_or(defaults.quote_base_url),
            batch_size: env_parse("BATCH_SIZE", defaults.batch_size),
            concurrent_requests: env_parse("CONCURRENT_REQUESTS", defaults.concurrent_requests),
            chunk_delay: env_millis("CHUNK_DELAY_MS", defaults.chunk_delay),
            batch_delay: env_millis("BATCH_DELAY_MS", defaults.batch_delay),
            refresh_interval: env_parse("REFRESH_INTERVAL", defaults.refresh_interval),
            refresh_pause: env_millis("REFRESH_PAUSE_MS", defaults.refresh_pause),
            refresh_symbol: std::env::var("REFRESH_SYMBOL").unwrap_or(defaults.refresh_symbol),
            primary_timeout: env_millis("PRIMARY_TIMEOUT_MS", defaults.primary_timeout),
            deep_timeout: env_millis("DEEP_TIMEOUT_MS", defaults.deep_timeout),
            rate_limit_per_second: env_parse("RATE_LIMIT_PER_SECOND", defaults.rate_limit_per_second),
            stale_after_days: env_parse("STALE_AFTER_DAYS", defaults.stale_after_days),
        }
    }
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

fn env_millis(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(default)
}
