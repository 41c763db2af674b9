//! Two-stage ticker validation
//!
//! The primary chart lookup decides most tickers on its own. Only tickers
//! that look active get the (more expensive) deep lookups, which catch
//! instruments still served with a stale cached price.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use crate::api::QuoteProvider;
use crate::classifier::payload_signature;
use crate::error::{DeepFailure, LookupError};
use crate::models::ValidationOutcome;

/// Verdict of the deep stage
#[derive(Debug, Clone, PartialEq)]
enum DeepVerdict {
    Clean,
    Delisted(String),
}

pub struct Validator<P> {
    provider: Arc<P>,
}

impl<P: QuoteProvider> Validator<P> {
    pub fn new(provider: Arc<P>) -> Self {
        Self { provider }
    }

    /// Validate a single symbol. Never fails: every error ends up in the outcome.
    ///
    /// Each outbound call is added to `issued` once it has gone out, so the
    /// tally stays accurate even if the task dies halfway.
    pub async fn validate(&self, symbol: &str, issued: &AtomicU64) -> ValidationOutcome {
        issued.fetch_add(1, Ordering::Relaxed);
        let primary = match self.provider.fetch_primary(symbol).await {
            Ok(primary) => primary,
            Err(LookupError::Delisted(reason)) => {
                debug!("{}: delisted ({})", symbol, reason);
                return ValidationOutcome::delisted(symbol, reason);
            }
            Err(LookupError::Transient(message)) => {
                debug!("{}: transient lookup failure ({})", symbol, message);
                return ValidationOutcome::error(symbol);
            }
        };

        let Some((price, exchange)) = primary.listing() else {
            debug!("{}: no usable price/exchange in chart response", symbol);
            return ValidationOutcome::inactive(symbol);
        };

        match self.deep_validate(symbol, issued).await {
            DeepVerdict::Delisted(reason) => {
                info!("🗑️  {}: Deep validation failed - {}", symbol, reason);
                ValidationOutcome::delisted(symbol, reason)
            }
            DeepVerdict::Clean => ValidationOutcome::active(symbol, price, exchange),
        }
    }

    async fn deep_validate(&self, symbol: &str, issued: &AtomicU64) -> DeepVerdict {
        match self.provider.fetch_deep(symbol).await {
            Ok(probe) => {
                issued.fetch_add(probe.requests(), Ordering::Relaxed);
                if probe.payloads.iter().any(|body| payload_signature(body).is_some()) {
                    DeepVerdict::Delisted(
                        "Deep validation failed - problematic ticker detected".to_string(),
                    )
                } else {
                    DeepVerdict::Clean
                }
            }
            Err(DeepFailure { requests, error }) => {
                issued.fetch_add(requests, Ordering::Relaxed);
                match error {
                    LookupError::Delisted(message) => {
                        DeepVerdict::Delisted(format!("Deep validation error: {}", message))
                    }
                    // A flaky secondary endpoint is not evidence against a healthy primary
                    LookupError::Transient(message) => {
                        debug!("{}: deep validation inconclusive ({})", symbol, message);
                        DeepVerdict::Clean
                    }
                }
            }
        }
    }
}
