//! Simulated perpetuals exchange.
//!
//! Fills at the feed price moved against the taker by the configured slippage,
//! charges commission on notional and keeps isolated margin per position. No
//! order ever leaves the process.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use perp_sentinel_core::{
    Balance, ExchangeClient, ExchangeError, ExchangeResult, Order, OrderRequest, OrderSide,
    PaperConfig, Side,
};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Source of reference prices for simulated fills.
#[async_trait]
pub trait PriceFeed: Send + Sync {
    async fn price(&self, symbol: &str) -> ExchangeResult<Decimal>;
}

/// In-memory price table, set by tests and demos.
#[derive(Debug, Default)]
pub struct ScriptedFeed {
    prices: RwLock<HashMap<String, Decimal>>,
}

impl ScriptedFeed {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_price(self, symbol: impl Into<String>, price: Decimal) -> Self {
        self.set(symbol, price);
        self
    }

    pub fn set(&self, symbol: impl Into<String>, price: Decimal) {
        self.prices.write().insert(symbol.into(), price);
    }

    pub fn remove(&self, symbol: &str) {
        self.prices.write().remove(symbol);
    }
}

#[async_trait]
impl PriceFeed for ScriptedFeed {
    async fn price(&self, symbol: &str) -> ExchangeResult<Decimal> {
        self.prices
            .read()
            .get(symbol)
            .copied()
            .ok_or_else(|| ExchangeError::UnknownSymbol(symbol.to_string()))
    }
}

#[derive(Debug, Clone)]
struct PaperPosition {
    side: Side,
    leverage: u32,
    quantity: Decimal,
    entry_price: Decimal,
    margin: Decimal,
}

impl PaperPosition {
    fn unrealized(&self, price: Decimal) -> Decimal {
        (price - self.entry_price) * self.quantity * self.side.sign()
    }
}

#[derive(Debug)]
struct Account {
    /// Deposited balance plus realized PnL minus fees.
    cash: Decimal,
    positions: HashMap<String, PaperPosition>,
}

impl Account {
    fn used_margin(&self) -> Decimal {
        self.positions.values().map(|p| p.margin).sum()
    }
}

pub struct PaperExchange {
    feed: Arc<dyn PriceFeed>,
    config: PaperConfig,
    account: Mutex<Account>,
}

impl PaperExchange {
    #[must_use]
    pub fn new(feed: Arc<dyn PriceFeed>, config: PaperConfig) -> Self {
        let account = Account {
            cash: config.starting_balance,
            positions: HashMap::new(),
        };
        Self {
            feed,
            config,
            account: Mutex::new(account),
        }
    }

    /// Open quantity for `symbol`, if any.
    #[must_use]
    pub fn position_quantity(&self, symbol: &str) -> Option<Decimal> {
        self.account.lock().positions.get(symbol).map(|p| p.quantity)
    }

    #[must_use]
    pub fn open_symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.account.lock().positions.keys().cloned().collect();
        symbols.sort();
        symbols
    }

    /// Cash balance excluding unrealized PnL.
    #[must_use]
    pub fn cash(&self) -> Decimal {
        self.account.lock().cash
    }

    fn fill_price(&self, reference: Decimal, side: OrderSide) -> Decimal {
        match side {
            OrderSide::Buy => reference * (Decimal::ONE + self.config.slippage),
            OrderSide::Sell => reference * (Decimal::ONE - self.config.slippage),
        }
    }

    fn reduce(
        &self,
        account: &mut Account,
        request: &OrderRequest,
        fill: Decimal,
    ) -> ExchangeResult<(Decimal, Decimal)> {
        let position = account
            .positions
            .get_mut(&request.symbol)
            .filter(|p| p.side.exit_order_side() == request.side)
            .ok_or_else(|| {
                ExchangeError::BadRequest(format!(
                    "reduce-only {} order for {} with no matching position",
                    request.side, request.symbol
                ))
            })?;

        let quantity = request.quantity.min(position.quantity);
        let fee = fill * quantity * self.config.commission;
        let pnl = (fill - position.entry_price) * quantity * position.side.sign();
        let released = position.margin * quantity / position.quantity;

        position.quantity -= quantity;
        position.margin -= released;
        if position.quantity.is_zero() {
            account.positions.remove(&request.symbol);
        }
        account.cash += pnl - fee;

        debug!(symbol = %request.symbol, quantity = %quantity, pnl = %pnl, fee = %fee, "Paper position reduced");
        Ok((quantity, fee))
    }

    fn open(
        &self,
        account: &mut Account,
        request: &OrderRequest,
        fill: Decimal,
    ) -> ExchangeResult<Decimal> {
        let side = match request.side {
            OrderSide::Buy => Side::Long,
            OrderSide::Sell => Side::Short,
        };
        if let Some(existing) = account.positions.get(&request.symbol) {
            if existing.side != side {
                return Err(ExchangeError::BadRequest(format!(
                    "{} has an opposite position open; reduce it first",
                    request.symbol
                )));
            }
        }

        let notional = fill * request.quantity;
        let margin = notional / Decimal::from(request.leverage);
        let fee = notional * self.config.commission;
        let free = account.cash - account.used_margin();
        if margin + fee > free {
            return Err(ExchangeError::InsufficientFunds(format!(
                "need {} margin plus {} fee, {} free",
                margin.round_dp(2),
                fee.round_dp(2),
                free.round_dp(2)
            )));
        }

        account.cash -= fee;
        let position = account
            .positions
            .entry(request.symbol.clone())
            .or_insert(PaperPosition {
                side,
                leverage: request.leverage,
                quantity: Decimal::ZERO,
                entry_price: fill,
                margin: Decimal::ZERO,
            });
        let total = position.quantity + request.quantity;
        position.entry_price =
            (position.entry_price * position.quantity + fill * request.quantity) / total;
        position.quantity = total;
        position.margin += margin;
        Ok(fee)
    }
}

#[async_trait]
impl ExchangeClient for PaperExchange {
    async fn get_ticker(&self, symbol: &str) -> ExchangeResult<Decimal> {
        self.feed.price(symbol).await
    }

    async fn get_balance(&self) -> ExchangeResult<Balance> {
        let (cash, used, positions) = {
            let account = self.account.lock();
            let positions: Vec<(String, PaperPosition)> = account
                .positions
                .iter()
                .map(|(symbol, p)| (symbol.clone(), p.clone()))
                .collect();
            (account.cash, account.used_margin(), positions)
        };

        let mut unrealized = Decimal::ZERO;
        for (symbol, position) in &positions {
            let price = self.feed.price(symbol).await?;
            unrealized += position.unrealized(price);
        }

        let total = cash + unrealized;
        Ok(Balance {
            free: (total - used).max(Decimal::ZERO),
            used,
            total,
        })
    }

    async fn create_market_order(&self, request: &OrderRequest) -> ExchangeResult<Order> {
        if request.quantity <= Decimal::ZERO {
            return Err(ExchangeError::BadRequest(format!(
                "order quantity must be positive, got {}",
                request.quantity
            )));
        }
        if request.leverage == 0 {
            return Err(ExchangeError::BadRequest("leverage must be at least 1".to_string()));
        }

        let reference = self.feed.price(&request.symbol).await?;
        let fill = self.fill_price(reference, request.side);

        let (quantity, fee) = {
            let mut account = self.account.lock();
            if request.reduce_only {
                self.reduce(&mut account, request, fill)?
            } else {
                (request.quantity, self.open(&mut account, request, fill)?)
            }
        };

        let order = Order {
            order_id: Uuid::new_v4().to_string(),
            symbol: request.symbol.clone(),
            side: request.side,
            quantity,
            avg_price: fill,
            fee,
            reduce_only: request.reduce_only,
            timestamp: Utc::now(),
        };
        info!(
            order_id = %order.order_id,
            symbol = %order.symbol,
            side = %order.side,
            quantity = %order.quantity,
            price = %order.avg_price,
            reduce_only = order.reduce_only,
            "Paper order filled"
        );
        Ok(order)
    }

    async fn close_position(&self, symbol: &str) -> ExchangeResult<bool> {
        let open = self
            .account
            .lock()
            .positions
            .get(symbol)
            .map(|p| (p.side, p.quantity, p.leverage));
        let Some((side, quantity, leverage)) = open else {
            return Ok(false);
        };

        let request = OrderRequest {
            symbol: symbol.to_string(),
            side: side.exit_order_side(),
            quantity,
            leverage,
            reduce_only: true,
        };

        match self.create_market_order(&request).await {
            Ok(_) => Ok(true),
            // Closed concurrently between the lookup and the fill.
            Err(ExchangeError::BadRequest(_)) if self.position_quantity(symbol).is_none() => {
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn exchange(feed: Arc<ScriptedFeed>) -> PaperExchange {
        PaperExchange::new(
            feed,
            PaperConfig {
                starting_balance: dec!(10000),
                slippage: dec!(0.001),
                commission: dec!(0.0005),
            },
        )
    }

    fn order(side: OrderSide, quantity: Decimal, reduce_only: bool) -> OrderRequest {
        OrderRequest {
            symbol: "BTC".to_string(),
            side,
            quantity,
            leverage: 10,
            reduce_only,
        }
    }

    #[tokio::test]
    async fn buy_fills_with_adverse_slippage_and_fee() {
        let feed = Arc::new(ScriptedFeed::new().with_price("BTC", dec!(50000)));
        let exchange = exchange(Arc::clone(&feed));

        let fill = exchange
            .create_market_order(&order(OrderSide::Buy, dec!(0.1), false))
            .await
            .unwrap();
        assert_eq!(fill.avg_price, dec!(50050));
        assert_eq!(fill.fee, dec!(2.50250));
        assert_eq!(exchange.position_quantity("BTC"), Some(dec!(0.1)));

        let balance = exchange.get_balance().await.unwrap();
        assert_eq!(balance.used, dec!(500.5));
        // Marked at 50000: 5.005 below the fill.
        assert_eq!(balance.total, dec!(10000) - dec!(2.5025) - dec!(5));
    }

    #[tokio::test]
    async fn reduce_only_realizes_pnl() {
        let feed = Arc::new(ScriptedFeed::new().with_price("BTC", dec!(50000)));
        let exchange = exchange(Arc::clone(&feed));
        exchange
            .create_market_order(&order(OrderSide::Buy, dec!(0.1), false))
            .await
            .unwrap();

        feed.set("BTC", dec!(51000));
        let exit = exchange
            .create_market_order(&order(OrderSide::Sell, dec!(0.1), true))
            .await
            .unwrap();
        assert_eq!(exit.avg_price, dec!(50949));
        assert!(exchange.position_quantity("BTC").is_none());

        // (50949 - 50050) × 0.1 = 89.9 gross
        let expected = dec!(10000) + dec!(89.9) - fill_fee(dec!(50050)) - fill_fee(dec!(50949));
        assert_eq!(exchange.cash(), expected);
        let balance = exchange.get_balance().await.unwrap();
        assert_eq!(balance.used, Decimal::ZERO);
        assert_eq!(balance.free, expected);
    }

    fn fill_fee(price: Decimal) -> Decimal {
        price * dec!(0.1) * dec!(0.0005)
    }

    #[tokio::test]
    async fn reduce_only_without_position_is_rejected() {
        let feed = Arc::new(ScriptedFeed::new().with_price("BTC", dec!(50000)));
        let exchange = exchange(feed);
        let err = exchange
            .create_market_order(&order(OrderSide::Sell, dec!(0.1), true))
            .await
            .unwrap_err();
        assert!(matches!(err, ExchangeError::BadRequest(_)));
        assert_eq!(exchange.cash(), dec!(10000));
    }

    #[tokio::test]
    async fn insufficient_margin_is_rejected() {
        let feed = Arc::new(ScriptedFeed::new().with_price("BTC", dec!(50000)));
        let exchange = exchange(feed);
        let err = exchange
            .create_market_order(&order(OrderSide::Buy, dec!(3), false))
            .await
            .unwrap_err();
        assert!(matches!(err, ExchangeError::InsufficientFunds(_)));
        assert!(exchange.open_symbols().is_empty());
    }

    #[tokio::test]
    async fn close_position_flattens_and_reports_flat() {
        let feed = Arc::new(ScriptedFeed::new().with_price("BTC", dec!(50000)));
        let exchange = exchange(Arc::clone(&feed));
        exchange
            .create_market_order(&order(OrderSide::Sell, dec!(0.2), false))
            .await
            .unwrap();

        assert!(exchange.close_position("BTC").await.unwrap());
        assert!(exchange.position_quantity("BTC").is_none());
        assert!(!exchange.close_position("BTC").await.unwrap());
    }

    #[tokio::test]
    async fn unknown_symbol_surfaces_from_feed() {
        let exchange = exchange(Arc::new(ScriptedFeed::new()));
        let err = exchange.get_ticker("DOGE").await.unwrap_err();
        assert_eq!(err, ExchangeError::UnknownSymbol("DOGE".to_string()));
    }
}
