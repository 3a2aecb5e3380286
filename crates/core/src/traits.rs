use crate::error::ExchangeResult;
use crate::events::{Balance, Features, Order, OrderRequest, Prediction, RawSignal, SignalDirection};
use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;

/// Operations the engine needs from a derivatives exchange.
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    /// Latest traded/mid price for `symbol`.
    async fn get_ticker(&self, symbol: &str) -> ExchangeResult<Decimal>;

    async fn get_balance(&self) -> ExchangeResult<Balance>;

    /// Submits a market order. Closing/reducing orders must set `reduce_only`.
    async fn create_market_order(&self, request: &OrderRequest) -> ExchangeResult<Order>;

    /// Flattens the whole position in `symbol`. Returns `false` when there was nothing to close.
    async fn close_position(&self, symbol: &str) -> ExchangeResult<bool>;
}

/// Indicator/signal collaborator.
#[async_trait]
pub trait SignalSource: Send + Sync {
    async fn evaluate(&self, symbol: &str) -> Result<RawSignal>;
}

/// Trained classifier collaborator.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn predict(&self, features: &Features) -> Result<Prediction>;

    /// Online feedback after a trade opened on `features` realized `pnl`.
    async fn record_outcome(
        &self,
        features: &Features,
        signal: SignalDirection,
        pnl: Decimal,
    ) -> Result<()>;
}
