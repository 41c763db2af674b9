use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::api::QuoteProvider;

/// Periodic warm-up lookup that resets upstream cookies and rate-limit state.
///
/// Fires once each time the run's request counter crosses another multiple
/// of `interval`. A failed refresh is logged and otherwise ignored.
pub struct SessionRefresher<P> {
    provider: Arc<P>,
    reference_symbol: String,
    interval: u64,
    pause: Duration,
    thresholds_handled: u64,
}

impl<P: QuoteProvider> SessionRefresher<P> {
    pub fn new(provider: Arc<P>, reference_symbol: impl Into<String>, interval: u64, pause: Duration) -> Self {
        Self {
            provider,
            reference_symbol: reference_symbol.into(),
            interval,
            pause,
            thresholds_handled: 0,
        }
    }

    /// Whether `request_count` has crossed a threshold not yet refreshed for
    pub fn is_due(&self, request_count: u64) -> bool {
        self.interval > 0 && request_count / self.interval > self.thresholds_handled
    }

    /// Refresh the session if due. Returns `Some(succeeded)` when a refresh was attempted.
    pub async fn maybe_refresh(&mut self, request_count: u64) -> Option<bool> {
        if !self.is_due(request_count) {
            return None;
        }
        // Several thresholds crossed at once still cost a single refresh
        self.thresholds_handled = request_count / self.interval;

        info!("🔄 Refreshing cookies and crumbs for rate limit prevention...");
        match self.provider.fetch_primary(&self.reference_symbol).await {
            Ok(_) => {
                info!("✅ Session refreshed successfully");
                tokio::time::sleep(self.pause).await;
                Some(true)
            }
            Err(e) => {
                warn!("⚠️  Session refresh warning (continuing anyway): {}", e);
                Some(false)
            }
        }
    }
}
