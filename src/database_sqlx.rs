use async_trait::async_trait;
use chrono::NaiveDateTime;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Row, SqlitePool,
};
use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::models::{CandidateMode, StoreStats, TickerRecord, ValidationOutcome};

/// Per-batch result of a bulk update
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchCommit {
    pub committed: usize,
    pub errors: usize,
    pub newly_active: usize,
}

/// Persistence boundary of the revalidation engine
#[async_trait]
pub trait TickerStore: Send + Sync {
    /// Symbols due for revalidation, ordered by symbol
    async fn list_candidates(
        &self,
        mode: CandidateMode,
        limit: Option<usize>,
    ) -> Result<Vec<String>, StoreError>;

    /// Apply a batch of outcomes inside one transaction.
    ///
    /// A failing row is counted in `errors` and the remaining rows still
    /// commit. A failed commit rolls the whole batch back and returns `Err`.
    async fn bulk_update(&self, outcomes: &[ValidationOutcome]) -> Result<BatchCommit, StoreError>;
}

/// SQLite-backed ticker table
#[derive(Clone)]
pub struct SqliteTickerStore {
    pool: SqlitePool,
}

impl SqliteTickerStore {
    /// Open (or create) the database and make sure the `tickers` table exists
    pub async fn connect(database_path: &str) -> Result<Self, StoreError> {
        let path = database_path.strip_prefix("sqlite:").unwrap_or(database_path);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(std::time::Duration::from_secs(30))
            .connect_with(SqliteConnectOptions::new().filename(path).create_if_missing(true))
            .await?;

        // Enable WAL mode for better concurrency
        sqlx::query("PRAGMA journal_mode = WAL").execute(&pool).await?;
        sqlx::query("PRAGMA synchronous = NORMAL").execute(&pool).await?;

        let store = Self { pool };
        store.create_schema().await?;
        info!("💾 Ticker store ready at {}", path);
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn create_schema(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tickers (
                ticker TEXT PRIMARY KEY NOT NULL,
                active INTEGER,
                price REAL,
                exchange TEXT,
                last_checked DATETIME
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_tickers_active ON tickers(active)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Insert symbols with unknown state, ignoring ones already present
    pub async fn insert_symbols(&self, symbols: &[&str]) -> Result<usize, StoreError> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;
        for symbol in symbols {
            let result = sqlx::query("INSERT OR IGNORE INTO tickers (ticker) VALUES (?)")
                .bind(*symbol)
                .execute(&mut *tx)
                .await?;
            inserted += result.rows_affected() as usize;
        }
        tx.commit().await?;
        Ok(inserted)
    }

    /// Fetch a single ticker record
    pub async fn get_ticker(&self, symbol: &str) -> Result<Option<TickerRecord>, StoreError> {
        let row = sqlx::query(
            "SELECT ticker, active, price, exchange, last_checked FROM tickers WHERE ticker = ?",
        )
        .bind(symbol)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| record_from_row(&row)).transpose()
    }

    /// The most recently validated tickers, newest first
    pub async fn recent_activity(&self, limit: i64) -> Result<Vec<TickerRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT ticker, active, price, exchange, last_checked
            FROM tickers
            WHERE last_checked IS NOT NULL
            ORDER BY last_checked DESC, ticker
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(record_from_row).collect()
    }

    /// Table-wide counts for the status report
    pub async fn stats(&self, stale_after_days: u32) -> Result<StoreStats, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS total,
                COALESCE(SUM(CASE WHEN active = 1 THEN 1 ELSE 0 END), 0) AS active,
                COALESCE(SUM(CASE WHEN last_checked IS NOT NULL THEN 1 ELSE 0 END), 0) AS validated,
                COUNT(DISTINCT exchange) AS exchanges,
                COALESCE(SUM(CASE WHEN last_checked IS NULL
                    OR julianday('now') - julianday(last_checked) > ? THEN 1 ELSE 0 END), 0) AS need_validation
            FROM tickers
            "#,
        )
        .bind(stale_after_days as f64)
        .fetch_one(&self.pool)
        .await?;

        Ok(StoreStats {
            total: row.try_get("total")?,
            active: row.try_get("active")?,
            validated: row.try_get("validated")?,
            exchanges: row.try_get("exchanges")?,
            need_validation: row.try_get("need_validation")?,
        })
    }
}

#[async_trait]
impl TickerStore for SqliteTickerStore {
    async fn list_candidates(
        &self,
        mode: CandidateMode,
        limit: Option<usize>,
    ) -> Result<Vec<String>, StoreError> {
        let predicate = match mode {
            CandidateMode::Inactive => "active = 0 OR active IS NULL",
            CandidateMode::Active => "active = 1",
            CandidateMode::Stale { .. } => {
                "last_checked IS NULL OR julianday('now') - julianday(last_checked) > ?"
            }
        };
        // SQLite treats a negative LIMIT as "no limit"
        let limit = limit.map(|n| n as i64).unwrap_or(-1);
        let sql = format!(
            "SELECT ticker FROM tickers WHERE {} ORDER BY ticker LIMIT ?",
            predicate
        );

        let mut query = sqlx::query_scalar::<_, String>(&sql);
        if let CandidateMode::Stale { days } = mode {
            query = query.bind(days as f64);
        }
        let symbols = query.bind(limit).fetch_all(&self.pool).await?;

        debug!("{} candidates for mode {}", symbols.len(), mode);
        Ok(symbols)
    }

    async fn bulk_update(&self, outcomes: &[ValidationOutcome]) -> Result<BatchCommit, StoreError> {
        let mut tx = self.pool.begin().await?;
        let mut commit = BatchCommit::default();

        for outcome in outcomes {
            let result = sqlx::query(
                r#"
                UPDATE tickers
                SET active = ?, price = ?, exchange = ?, last_checked = CURRENT_TIMESTAMP
                WHERE ticker = ?
                "#,
            )
            .bind(outcome.active)
            .bind(outcome.price)
            .bind(outcome.exchange.as_str())
            .bind(&outcome.symbol)
            .execute(&mut *tx)
            .await;

            match result {
                Ok(done) if done.rows_affected() == 0 => {
                    commit.errors += 1;
                    warn!("❌ Error updating {}: unknown ticker", outcome.symbol);
                }
                Ok(_) => {
                    commit.committed += 1;
                    if outcome.active {
                        commit.newly_active += 1;
                        debug!(
                            "✅ Updated {} to ACTIVE - {} - ${}",
                            outcome.symbol, outcome.exchange, outcome.price
                        );
                    }
                }
                Err(e) => {
                    commit.errors += 1;
                    warn!("❌ Error updating {}: {}", outcome.symbol, e);
                }
            }
        }

        tx.commit().await.map_err(StoreError::Commit)?;
        debug!(
            "Database transaction committed: {} rows, {} newly active",
            commit.committed, commit.newly_active
        );
        Ok(commit)
    }
}

fn record_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<TickerRecord, StoreError> {
    Ok(TickerRecord {
        symbol: row.try_get("ticker")?,
        active: row.try_get::<Option<bool>, _>("active")?,
        price: row.try_get("price")?,
        exchange: row.try_get("exchange")?,
        last_checked: row.try_get::<Option<NaiveDateTime>, _>("last_checked")?,
    })
}
