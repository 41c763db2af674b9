//! Batch scheduling of ticker validations
//!
//! Candidates are split into batches (the commit unit) and each batch into
//! chunks (the concurrency unit). Chunks run one after another; every symbol
//! of a chunk is validated concurrently and the whole chunk settles before
//! the next one starts.

use futures::future::join_all;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info};

use crate::api::QuoteProvider;
use crate::models::{Config, RunProgress, ValidationOutcome};
use crate::session::SessionRefresher;
use crate::validator::Validator;

/// Pacing and partitioning knobs
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerSettings {
    pub batch_size: usize,
    pub chunk_size: usize,
    pub chunk_delay: Duration,
    pub batch_delay: Duration,
}

impl From<&Config> for SchedulerSettings {
    fn from(config: &Config) -> Self {
        Self {
            batch_size: config.batch_size.max(1),
            chunk_size: config.concurrent_requests.max(1),
            chunk_delay: config.chunk_delay,
            batch_delay: config.batch_delay,
        }
    }
}

/// Ordered slice of candidates committed as one unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    /// 1-based position in the run
    pub number: usize,
    pub symbols: Vec<String>,
}

impl Batch {
    pub fn chunks(&self, chunk_size: usize) -> std::slice::Chunks<'_, String> {
        self.symbols.chunks(chunk_size.max(1))
    }
}

/// Sort, de-duplicate and slice candidates into fixed-size batches
pub fn plan_batches(mut candidates: Vec<String>, batch_size: usize) -> Vec<Batch> {
    candidates.sort();
    candidates.dedup();

    candidates
        .chunks(batch_size.max(1))
        .enumerate()
        .map(|(index, symbols)| Batch {
            number: index + 1,
            symbols: symbols.to_vec(),
        })
        .collect()
}

/// Lifecycle of one run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunState {
    Idle,
    FetchingCandidates,
    ProcessingBatch(usize),
    Committing(usize),
    Done,
    Interrupted,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Idle => write!(f, "idle"),
            RunState::FetchingCandidates => write!(f, "fetching candidates"),
            RunState::ProcessingBatch(n) => write!(f, "processing batch {}", n),
            RunState::Committing(n) => write!(f, "committing batch {}", n),
            RunState::Done => write!(f, "done"),
            RunState::Interrupted => write!(f, "interrupted"),
        }
    }
}

/// Progress notifications for observers of a run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ProgressEvent {
    StateChanged(RunState),
    TickerActivated {
        symbol: String,
        exchange: String,
        price: f64,
    },
    BatchCommitted {
        batch: usize,
        total_batches: usize,
        progress: RunProgress,
    },
    BatchFailed {
        batch: usize,
        message: String,
    },
    SessionRefreshed {
        succeeded: bool,
    },
}

/// Cloneable hook that asks a running engine to stop after the in-flight batch
#[derive(Debug, Clone)]
pub struct InterruptHandle {
    flag: Arc<watch::Sender<bool>>,
}

impl Default for InterruptHandle {
    fn default() -> Self {
        let (flag, _) = watch::channel(false);
        Self { flag: Arc::new(flag) }
    }
}

impl InterruptHandle {
    pub fn interrupt(&self) {
        self.flag.send_replace(true);
    }

    pub fn is_interrupted(&self) -> bool {
        *self.flag.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.flag.subscribe()
    }
}

/// Validations gathered for one batch
#[derive(Debug, Default)]
pub struct BatchRun {
    pub outcomes: Vec<ValidationOutcome>,
    /// No further chunks were started because of an interrupt
    pub interrupted: bool,
}

/// Outcome of one symbol together with the calls it issued
#[derive(Debug)]
struct Validation {
    outcome: ValidationOutcome,
    requests: u64,
}

/// Drives the chunks of each batch through the validator
pub struct BatchScheduler<P> {
    validator: Arc<Validator<P>>,
    refresher: SessionRefresher<P>,
    settings: SchedulerSettings,
    interrupt: InterruptHandle,
    events: Option<broadcast::Sender<ProgressEvent>>,
}

impl<P: QuoteProvider + 'static> BatchScheduler<P> {
    pub fn new(
        validator: Arc<Validator<P>>,
        refresher: SessionRefresher<P>,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            validator,
            refresher,
            settings,
            interrupt: InterruptHandle::default(),
            events: None,
        }
    }

    pub fn settings(&self) -> &SchedulerSettings {
        &self.settings
    }

    pub fn interrupt_handle(&self) -> InterruptHandle {
        self.interrupt.clone()
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupt.is_interrupted()
    }

    pub fn set_events(&mut self, events: broadcast::Sender<ProgressEvent>) {
        self.events = Some(events);
    }

    /// Best-effort publish; a run never waits on observers
    pub fn emit(&self, event: ProgressEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }

    /// Validate every chunk of `batch`, folding counters into `progress`
    pub async fn process_batch(&mut self, batch: &Batch, progress: &mut RunProgress) -> BatchRun {
        let mut run = BatchRun {
            outcomes: Vec::with_capacity(batch.symbols.len()),
            interrupted: false,
        };
        let chunk_count = batch.symbols.len().div_ceil(self.settings.chunk_size.max(1));

        for (index, chunk) in batch.chunks(self.settings.chunk_size).enumerate() {
            if self.interrupt.is_interrupted() {
                run.interrupted = true;
                break;
            }

            self.refresh_if_due(progress).await;

            debug!(
                "Batch {} chunk {}/{} ({} tickers)",
                batch.number,
                index + 1,
                chunk_count,
                chunk.len()
            );
            for validation in self.validate_chunk(chunk).await {
                self.record(validation, progress, &mut run.outcomes);
            }
            // A threshold crossed inside this chunk is handled before any pause
            self.refresh_if_due(progress).await;

            if index + 1 < chunk_count && self.pause(self.settings.chunk_delay).await {
                run.interrupted = true;
                break;
            }
        }

        run
    }

    async fn refresh_if_due(&mut self, progress: &mut RunProgress) {
        if let Some(succeeded) = self.refresher.maybe_refresh(progress.requests).await {
            progress.session_refreshes += 1;
            self.emit(ProgressEvent::SessionRefreshed { succeeded });
        }
    }

    /// Run every symbol of the chunk concurrently and wait for all of them
    async fn validate_chunk(&self, chunk: &[String]) -> Vec<Validation> {
        let tasks: Vec<_> = chunk
            .iter()
            .map(|symbol| {
                let validator = Arc::clone(&self.validator);
                let symbol = symbol.clone();
                let issued = Arc::new(AtomicU64::new(0));
                let tally = Arc::clone(&issued);
                let handle = tokio::spawn(async move { validator.validate(&symbol, &tally).await });
                (handle, issued)
            })
            .collect();
        let (handles, tallies): (Vec<_>, Vec<_>) = tasks.into_iter().unzip();

        join_all(handles)
            .await
            .into_iter()
            .zip(tallies)
            .zip(chunk)
            .map(|((joined, issued), symbol)| {
                let requests = issued.load(Ordering::Relaxed);
                match joined {
                    Ok(outcome) => Validation { outcome, requests },
                    Err(e) => {
                        error!("❌ Validation task for {} failed: {}", symbol, e);
                        Validation {
                            outcome: ValidationOutcome::error(symbol.as_str()),
                            requests,
                        }
                    }
                }
            })
            .collect()
    }

    fn record(
        &self,
        validation: Validation,
        progress: &mut RunProgress,
        outcomes: &mut Vec<ValidationOutcome>,
    ) {
        progress.requests += validation.requests;

        let outcome = validation.outcome;
        if outcome.active {
            info!(
                "✨ Found active ticker: {} - {} - ${}",
                outcome.symbol, outcome.exchange, outcome.price
            );
            self.emit(ProgressEvent::TickerActivated {
                symbol: outcome.symbol.clone(),
                exchange: outcome.exchange.to_string(),
                price: outcome.price,
            });
        } else if outcome.is_delisted() {
            progress.delisted += 1;
        } else if outcome.is_error() {
            progress.transient_failures += 1;
        }
        outcomes.push(outcome);
    }

    /// Sleep for `duration` unless interrupted first. Returns `true` on interrupt.
    pub async fn pause(&self, duration: Duration) -> bool {
        let mut interrupted = self.interrupt.subscribe();
        if *interrupted.borrow_and_update() {
            return true;
        }
        if duration.is_zero() {
            return false;
        }

        tokio::select! {
            _ = tokio::time::sleep(duration) => false,
            Ok(_) = interrupted.wait_for(|flag| *flag) => true,
        }
    }
}
