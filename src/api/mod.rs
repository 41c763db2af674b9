use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::num::NonZeroU32;

use crate::error::{DeepFailure, LookupError};
use crate::models::Listing;

pub mod yahoo_client;
pub use yahoo_client::YahooClient;

/// Request-per-second cap shared by every lookup of a client.
///
/// A rate of zero disables the cap; pacing then comes only from the
/// scheduler's chunk and batch delays.
pub struct ApiRateLimiter {
    limiter: Option<DefaultDirectRateLimiter>,
}

impl ApiRateLimiter {
    pub fn new(requests_per_second: u32) -> Self {
        let limiter = NonZeroU32::new(requests_per_second)
            .map(|rate| RateLimiter::direct(Quota::per_second(rate)));
        Self { limiter }
    }

    pub async fn wait(&self) {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }
    }
}

/// Result of the primary chart lookup
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PrimaryQuote {
    pub symbol: Option<String>,
    pub price: Option<f64>,
    pub exchange: Option<String>,
}

impl PrimaryQuote {
    /// Price and exchange, when both are present and meaningful.
    ///
    /// An exchange named like one of the stored status markers is not a
    /// listing, so a quote can never be stored as active under "DELISTED".
    pub fn listing(&self) -> Option<(f64, &str)> {
        let price = self.price.filter(|p| *p > 0.0)?;
        let exchange = self
            .exchange
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty() && !Listing::is_marker(e))?;
        Some((price, exchange))
    }
}

/// Raw bodies of the two deep-validation lookups
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DeepProbe {
    pub payloads: Vec<String>,
}

impl DeepProbe {
    /// One call per payload
    pub fn requests(&self) -> u64 {
        self.payloads.len() as u64
    }
}

/// External quote service used by the validator
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait QuoteProvider: Send + Sync {
    /// Single chart lookup returning last price and exchange name
    async fn fetch_primary(&self, symbol: &str) -> Result<PrimaryQuote, LookupError>;

    /// Historical-range and quote-batch lookups, returned unparsed.
    /// A failure reports how many of the calls were issued.
    async fn fetch_deep(&self, symbol: &str) -> Result<DeepProbe, DeepFailure>;
}
