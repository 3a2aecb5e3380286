use async_trait::async_trait;
use perp_sentinel_core::{Balance, ExchangeClient, ExchangeResult, Order, OrderRequest};
use rust_decimal::Decimal;
use std::sync::Arc;

use crate::dispatcher::{ApiDispatcher, Priority};
use crate::retry::RetryPolicy;

/// Exchange client whose calls go through the shared priority gate and retry policy.
///
/// Several views can share one dispatcher; they differ only in the priority
/// used for ticker reads (scanner market data vs. monitor position checks).
#[derive(Clone)]
pub struct DispatchedClient {
    inner: Arc<dyn ExchangeClient>,
    dispatcher: Arc<ApiDispatcher>,
    retry: RetryPolicy,
    ticker_priority: Priority,
}

impl DispatchedClient {
    #[must_use]
    pub fn new(
        inner: Arc<dyn ExchangeClient>,
        dispatcher: Arc<ApiDispatcher>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            inner,
            dispatcher,
            retry,
            ticker_priority: Priority::Normal,
        }
    }

    #[must_use]
    pub fn with_ticker_priority(mut self, priority: Priority) -> Self {
        self.ticker_priority = priority;
        self
    }

    #[must_use]
    pub fn dispatcher(&self) -> &Arc<ApiDispatcher> {
        &self.dispatcher
    }
}

#[async_trait]
impl ExchangeClient for DispatchedClient {
    // Each attempt is admitted on its own so a retry after backoff queues behind higher tiers.

    async fn get_ticker(&self, symbol: &str) -> ExchangeResult<Decimal> {
        let priority = self.ticker_priority;
        self.retry
            .run("get_ticker", move || async move {
                let _permit = self.dispatcher.acquire(priority).await;
                self.inner.get_ticker(symbol).await
            })
            .await
    }

    async fn get_balance(&self) -> ExchangeResult<Balance> {
        self.retry
            .run("get_balance", move || async move {
                let _permit = self.dispatcher.acquire(Priority::High).await;
                self.inner.get_balance().await
            })
            .await
    }

    async fn create_market_order(&self, request: &OrderRequest) -> ExchangeResult<Order> {
        self.retry
            .run_once_accepted("create_market_order", move || async move {
                let _permit = self.dispatcher.acquire(Priority::Critical).await;
                self.inner.create_market_order(request).await
            })
            .await
    }

    async fn close_position(&self, symbol: &str) -> ExchangeResult<bool> {
        self.retry
            .run_once_accepted("close_position", move || async move {
                let _permit = self.dispatcher.acquire(Priority::Critical).await;
                self.inner.close_position(symbol).await
            })
            .await
    }
}
