//! Throwaway SQLite stores and a store wrapper for fault injection

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tempfile::TempDir;
use ticker_revalidator::database_sqlx::{BatchCommit, SqliteTickerStore, TickerStore};
use ticker_revalidator::error::StoreError;
use ticker_revalidator::models::{CandidateMode, ValidationOutcome};

/// Fresh store in a temporary directory, seeded with `symbols`.
///
/// Keep the `TempDir` alive for as long as the store is used.
pub async fn temp_store(symbols: &[&str]) -> (TempDir, SqliteTickerStore) {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let path = dir.path().join("tickers.db");
    let store = SqliteTickerStore::connect(path.to_str().unwrap())
        .await
        .expect("Failed to create ticker store");
    store.insert_symbols(symbols).await.expect("Failed to seed tickers");
    (dir, store)
}

/// Delegating store that records every batch and can fail chosen commits
pub struct InstrumentedStore {
    inner: SqliteTickerStore,
    /// 1-based bulk_update call that should fail
    fail_on_call: Option<usize>,
    /// Serve the first candidate list on every later call
    freeze_candidates: bool,
    frozen: Mutex<Option<Vec<String>>>,
    calls: AtomicUsize,
    batches: Mutex<Vec<Vec<ValidationOutcome>>>,
}

impl InstrumentedStore {
    pub fn new(inner: SqliteTickerStore) -> Self {
        Self {
            inner,
            fail_on_call: None,
            freeze_candidates: false,
            frozen: Mutex::new(None),
            calls: AtomicUsize::new(0),
            batches: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_on(mut self, call: usize) -> Self {
        self.fail_on_call = Some(call);
        self
    }

    pub fn with_frozen_candidates(mut self) -> Self {
        self.freeze_candidates = true;
        self
    }

    pub fn inner(&self) -> &SqliteTickerStore {
        &self.inner
    }

    pub fn bulk_update_calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Outcomes handed to bulk_update, one entry per call
    pub fn batches(&self) -> Vec<Vec<ValidationOutcome>> {
        self.batches.lock().unwrap().clone()
    }

    pub fn take_batches(&self) -> Vec<Vec<ValidationOutcome>> {
        std::mem::take(&mut *self.batches.lock().unwrap())
    }
}

#[async_trait]
impl TickerStore for InstrumentedStore {
    async fn list_candidates(
        &self,
        mode: CandidateMode,
        limit: Option<usize>,
    ) -> Result<Vec<String>, StoreError> {
        if self.freeze_candidates {
            if let Some(frozen) = self.frozen.lock().unwrap().clone() {
                return Ok(frozen);
            }
        }
        let candidates = self.inner.list_candidates(mode, limit).await?;
        if self.freeze_candidates {
            *self.frozen.lock().unwrap() = Some(candidates.clone());
        }
        Ok(candidates)
    }

    async fn bulk_update(&self, outcomes: &[ValidationOutcome]) -> Result<BatchCommit, StoreError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.batches.lock().unwrap().push(outcomes.to_vec());

        if self.fail_on_call == Some(call) {
            return Err(StoreError::Commit(sqlx::Error::PoolTimedOut));
        }
        self.inner.bulk_update(outcomes).await
    }
}
