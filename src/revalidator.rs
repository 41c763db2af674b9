//! Revalidation engine
//!
//! One `run()` is a full pass: load candidates from the store, validate them
//! batch by batch, and commit each batch before the next one starts so that
//! everything up to the last committed batch survives an interruption.

use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;
use tracing::{debug, error, info};

use crate::api::QuoteProvider;
use crate::database_sqlx::TickerStore;
use crate::error::EngineError;
use crate::models::{CandidateMode, Config, RunProgress, RunSummary, ValidationOutcome};
use crate::scheduler::{
    plan_batches, BatchScheduler, InterruptHandle, ProgressEvent, RunState, SchedulerSettings,
};
use crate::session::SessionRefresher;
use crate::validator::Validator;

pub struct RevalidationEngine<S, P> {
    store: Arc<S>,
    scheduler: BatchScheduler<P>,
    mode: CandidateMode,
    limit: Option<usize>,
    state: RunState,
}

impl<S, P> RevalidationEngine<S, P>
where
    S: TickerStore,
    P: QuoteProvider + 'static,
{
    pub fn new(store: Arc<S>, provider: Arc<P>, config: &Config) -> Self {
        let refresher = SessionRefresher::new(
            Arc::clone(&provider),
            config.refresh_symbol.clone(),
            config.refresh_interval,
            config.refresh_pause,
        );
        let validator = Arc::new(Validator::new(provider));
        let scheduler = BatchScheduler::new(validator, refresher, SchedulerSettings::from(config));

        Self {
            store,
            scheduler,
            mode: CandidateMode::default(),
            limit: None,
            state: RunState::Idle,
        }
    }

    pub fn with_mode(mut self, mode: CandidateMode) -> Self {
        self.mode = mode;
        self
    }

    /// Cap the number of candidates (trial runs)
    pub fn with_limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_progress_channel(mut self, events: broadcast::Sender<ProgressEvent>) -> Self {
        self.scheduler.set_events(events);
        self
    }

    pub fn interrupt_handle(&self) -> InterruptHandle {
        self.scheduler.interrupt_handle()
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Perform one full revalidation pass
    pub async fn run(&mut self) -> Result<RunSummary, EngineError> {
        let started = Instant::now();
        info!("🔍 Starting revalidation of {} tickers...", self.mode);

        self.transition(RunState::FetchingCandidates);
        let candidates = match self.store.list_candidates(self.mode, self.limit).await {
            Ok(candidates) => candidates,
            Err(e) => {
                self.transition(RunState::Idle);
                return Err(EngineError::Candidates(e));
            }
        };

        let batches = plan_batches(candidates, self.scheduler.settings().batch_size);
        let total_candidates: usize = batches.iter().map(|b| b.symbols.len()).sum();
        let total_batches = batches.len();
        info!("📊 Found {} {} tickers to revalidate", total_candidates, self.mode);

        let mut progress = RunProgress::default();
        let mut attempted = 0;
        let mut interrupted = false;

        for batch in &batches {
            if self.scheduler.is_interrupted() {
                interrupted = true;
                break;
            }

            self.transition(RunState::ProcessingBatch(batch.number));
            info!(
                "🚀 Processing batch {}/{} ({} tickers)...",
                batch.number,
                total_batches,
                batch.symbols.len()
            );
            let run = self.scheduler.process_batch(batch, &mut progress).await;

            if !run.outcomes.is_empty() {
                self.transition(RunState::Committing(batch.number));
                self.commit_batch(batch.number, total_batches, &run.outcomes, &mut progress)
                    .await;
            }

            attempted += run.outcomes.len();
            info!(
                "📈 Progress: {:.1}% ({} active tickers found so far)",
                percent(attempted, total_candidates),
                progress.newly_active
            );

            if run.interrupted {
                interrupted = true;
                break;
            }
            if batch.number < total_batches
                && self.scheduler.pause(self.scheduler.settings().batch_delay).await
            {
                interrupted = true;
                break;
            }
        }

        self.transition(if interrupted { RunState::Interrupted } else { RunState::Done });

        let summary = RunSummary::from_progress(
            self.mode,
            total_candidates,
            &progress,
            started.elapsed(),
            interrupted,
        );
        log_summary(&summary);
        Ok(summary)
    }

    /// Hand one batch to the store. A failed commit is counted, never propagated.
    async fn commit_batch(
        &self,
        batch_number: usize,
        total_batches: usize,
        outcomes: &[ValidationOutcome],
        progress: &mut RunProgress,
    ) {
        match self.store.bulk_update(outcomes).await {
            Ok(commit) => {
                progress.processed += commit.committed;
                progress.newly_active += commit.newly_active;
                progress.errors += commit.errors;
                progress.batches_committed += 1;

                info!(
                    "💾 Batch {} completed: {} active tickers found, {} tickers updated",
                    batch_number, commit.newly_active, commit.committed
                );
                self.scheduler.emit(ProgressEvent::BatchCommitted {
                    batch: batch_number,
                    total_batches,
                    progress: progress.clone(),
                });
            }
            Err(e) => {
                error!("❌ Batch {} update failed: {}", batch_number, e);
                progress.errors += outcomes.len();
                self.scheduler.emit(ProgressEvent::BatchFailed {
                    batch: batch_number,
                    message: e.to_string(),
                });
            }
        }
    }

    fn transition(&mut self, state: RunState) {
        debug!("Engine state: {} -> {}", self.state, state);
        self.state = state;
        self.scheduler.emit(ProgressEvent::StateChanged(state));
    }
}

fn percent(done: usize, total: usize) -> f64 {
    if total == 0 {
        100.0
    } else {
        done as f64 / total as f64 * 100.0
    }
}

fn log_summary(summary: &RunSummary) {
    if summary.interrupted {
        info!("🛑 Revalidation interrupted");
        info!("💾 Progress up to the last committed batch has been saved to database");
    } else if summary.total_candidates == 0 {
        info!("✅ No {} tickers found to revalidate!", summary.mode);
    } else {
        info!("🎉 Revalidation completed!");
    }
    info!("==========================================");
    info!("📊 Total tickers processed: {}", summary.total_processed);
    info!("✨ Active tickers found: {}", summary.newly_active);
    info!("🗑️  Delisted: {}", summary.delisted);
    info!("❌ Errors: {}", summary.errors);
    info!("🌐 Total requests: {}", summary.total_requests);
    info!("🔄 Session refreshes: {}", summary.session_refreshes);
    info!("⏱️  Duration: {:.2} seconds", summary.duration_seconds);

    if summary.newly_active > 0 {
        info!(
            "🎯 Success! Found {} active tickers among the {} candidates",
            summary.newly_active, summary.mode
        );
    } else if summary.total_processed > 0 && summary.mode == CandidateMode::Inactive {
        info!("✅ No previously missed active tickers found - validation was accurate!");
    }
}
