//! Hyperliquid public market-data client.

use anyhow::{Context, Result};
use async_trait::async_trait;
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use perp_sentinel_core::{ExchangeConfig, ExchangeError, ExchangeResult};
use reqwest::header::RETRY_AFTER;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::paper::PriceFeed;

pub const DEFAULT_API_URL: &str = "https://api.hyperliquid.xyz";

/// Default budget when the configured rate is zero.
const FALLBACK_REQUESTS_PER_SECOND: u32 = 10;

pub struct HyperliquidClient {
    http_client: Client,
    base_url: String,
    rate_limiter: Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
}

impl HyperliquidClient {
    /// Builds a client from the exchange section of the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(config: &ExchangeConfig) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .context("failed to build HTTP client")?;

        let rps = NonZeroU32::new(config.requests_per_second)
            .or_else(|| NonZeroU32::new(FALLBACK_REQUESTS_PER_SECOND))
            .context("request rate must be positive")?;
        let rate_limiter = Arc::new(RateLimiter::direct(Quota::per_second(rps)));

        Ok(Self {
            http_client,
            base_url: config.api_url.trim_end_matches('/').to_string(),
            rate_limiter,
        })
    }

    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Mid prices for every listed perp.
    ///
    /// Entries whose price does not parse are skipped.
    ///
    /// # Errors
    ///
    /// Returns a classified [`ExchangeError`] for transport, HTTP and decoding failures.
    pub async fn all_mids(&self) -> ExchangeResult<HashMap<String, Decimal>> {
        let raw: HashMap<String, String> = self.info(json!({ "type": "allMids" })).await?;

        let mut mids = HashMap::with_capacity(raw.len());
        for (symbol, price) in raw {
            match Decimal::from_str(&price) {
                Ok(value) => {
                    mids.insert(symbol, value);
                }
                Err(e) => warn!(symbol = %symbol, price = %price, error = %e, "Skipping unparseable mid"),
            }
        }
        Ok(mids)
    }

    /// Mid price for one symbol.
    ///
    /// # Errors
    ///
    /// Returns [`ExchangeError::UnknownSymbol`] if the exchange does not list `symbol`.
    pub async fn mid(&self, symbol: &str) -> ExchangeResult<Decimal> {
        self.all_mids()
            .await?
            .remove(symbol)
            .ok_or_else(|| ExchangeError::UnknownSymbol(symbol.to_string()))
    }

    async fn info<T: DeserializeOwned>(&self, body: serde_json::Value) -> ExchangeResult<T> {
        self.rate_limiter.until_ready().await;

        let url = format!("{}/info", self.base_url);
        debug!(url = %url, "POST info");
        let response = self
            .http_client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let retry_after_secs = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok());
            let message = response.text().await.unwrap_or_default();
            return Err(match ExchangeError::from_status(status.as_u16(), message) {
                ExchangeError::RateLimited { retry_after_ms } => ExchangeError::RateLimited {
                    retry_after_ms: retry_after_secs.map_or(retry_after_ms, |s| s * 1000),
                },
                other => other,
            });
        }

        let text = response.text().await.map_err(transport_error)?;
        serde_json::from_str(&text).map_err(|e| ExchangeError::Parse(e.to_string()))
    }
}

fn transport_error(e: reqwest::Error) -> ExchangeError {
    if e.is_timeout() {
        ExchangeError::Timeout(e.to_string())
    } else if e.is_decode() {
        ExchangeError::Parse(e.to_string())
    } else {
        ExchangeError::Network(e.to_string())
    }
}

#[async_trait]
impl PriceFeed for HyperliquidClient {
    async fn price(&self, symbol: &str) -> ExchangeResult<Decimal> {
        self.mid(symbol).await
    }
}
