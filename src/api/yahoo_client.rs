use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::{ApiRateLimiter, DeepProbe, PrimaryQuote, QuoteProvider};
use crate::error::{DeepFailure, LookupError};
use crate::models::Config;

const BROWSER_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Longest slice of a non-JSON error body kept in an error message
const MAX_ERROR_BODY: usize = 200;

/// Chart endpoint response
#[derive(Debug, Deserialize)]
struct ChartEnvelope {
    chart: ChartBody,
}

#[derive(Debug, Deserialize)]
struct ChartBody {
    result: Option<Vec<ChartResult>>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    meta: Option<ChartMeta>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChartMeta {
    regular_market_price: Option<f64>,
    exchange_name: Option<String>,
    symbol: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    code: Option<String>,
    description: Option<String>,
}

/// Client for the Yahoo-style chart and quote JSON endpoints
pub struct YahooClient {
    client: Client,
    base_url: Url,
    primary_timeout: Duration,
    deep_timeout: Duration,
    rate_limiter: ApiRateLimiter,
}

impl YahooClient {
    /// Create a new client from the application config
    pub fn new(config: &Config) -> Result<Self> {
        let client = Client::builder()
            .user_agent(BROWSER_USER_AGENT)
            .build()?;

        let base_url = Url::parse(&config.quote_base_url)?;
        if base_url.cannot_be_a_base() {
            return Err(anyhow!("Quote base URL cannot carry a path: {}", base_url));
        }

        Ok(Self {
            client,
            base_url,
            primary_timeout: config.primary_timeout,
            deep_timeout: config.deep_timeout,
            rate_limiter: ApiRateLimiter::new(config.rate_limit_per_second),
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, LookupError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| LookupError::Transient(format!("invalid base URL {}", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Issue one GET and return the body of a successful response
    async fn get_body(
        &self,
        url: Url,
        query: &[(&str, &str)],
        timeout: Duration,
    ) -> Result<String, LookupError> {
        self.rate_limiter.wait().await;

        debug!("GET {} {:?}", url, query);
        let response = self
            .client
            .get(url)
            .query(query)
            .timeout(timeout)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(LookupError::from_message(format!(
                "HTTP {}: {}",
                status,
                error_description(&body)
            )));
        }

        Ok(body)
    }
}

#[async_trait]
impl QuoteProvider for YahooClient {
    async fn fetch_primary(&self, symbol: &str) -> Result<PrimaryQuote, LookupError> {
        let url = self.endpoint(&["v8", "finance", "chart", symbol])?;
        let body = self
            .get_body(url, &[("interval", "1d"), ("range", "1d")], self.primary_timeout)
            .await?;

        let envelope = match serde_json::from_str::<ChartEnvelope>(&body) {
            Ok(envelope) => envelope,
            Err(e) => {
                debug!("Unparseable chart response for {}: {}", symbol, e);
                return Ok(PrimaryQuote::default());
            }
        };

        if let Some(error) = envelope.chart.error {
            let message = error
                .description
                .or(error.code)
                .unwrap_or_else(|| "unknown chart error".to_string());
            return Err(LookupError::from_message(message));
        }

        let meta = envelope
            .chart
            .result
            .and_then(|results| results.into_iter().next())
            .and_then(|result| result.meta);

        Ok(match meta {
            Some(meta) => PrimaryQuote {
                symbol: meta.symbol,
                price: meta.regular_market_price,
                exchange: meta.exchange_name,
            },
            None => PrimaryQuote::default(),
        })
    }

    async fn fetch_deep(&self, symbol: &str) -> Result<DeepProbe, DeepFailure> {
        let history_url = self
            .endpoint(&["v8", "finance", "chart", symbol])
            .map_err(|e| DeepFailure::after(0, e))?;
        let history = self
            .get_body(history_url, &[("range", "1mo"), ("interval", "1d")], self.deep_timeout)
            .await
            .map_err(|e| DeepFailure::after(1, e))?;

        let quote_url = self
            .endpoint(&["v7", "finance", "quote"])
            .map_err(|e| DeepFailure::after(1, e))?;
        let quote = self
            .get_body(quote_url, &[("symbols", symbol)], self.deep_timeout)
            .await
            .map_err(|e| DeepFailure::after(2, e))?;

        Ok(DeepProbe {
            payloads: vec![history, quote],
        })
    }
}

/// Pull the most descriptive message out of an error response body
fn error_description(body: &str) -> String {
    if let Ok(Value::Object(root)) = serde_json::from_str::<Value>(body) {
        // Error envelopes look like {"chart": {"error": {...}}} or {"finance": {"error": {...}}}
        for section in root.values() {
            if let Some(error) = section.get("error") {
                if let Ok(error) = serde_json::from_value::<ApiError>(error.clone()) {
                    if let Some(message) = error.description.or(error.code) {
                        return message;
                    }
                }
            }
        }
    }

    body.chars().take(MAX_ERROR_BODY).collect()
}
