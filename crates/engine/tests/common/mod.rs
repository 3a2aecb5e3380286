#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use perp_sentinel_core::{
    ExchangeClient, Features, OrderRequest, OrderSide, PaperConfig, Position, PositionParams,
    RawSignal, SentinelConfig, Side, SignalDirection, SignalSource, TradeCandidate,
};
use perp_sentinel_exchange::{PaperExchange, ScriptedFeed};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::Arc;

/// Signal source returning whatever was last set per symbol.
#[derive(Default)]
pub struct StaticSignals {
    signals: RwLock<HashMap<String, RawSignal>>,
}

impl StaticSignals {
    pub fn set(&self, symbol: &str, direction: SignalDirection, confidence: f64) {
        self.signals.write().insert(
            symbol.to_string(),
            RawSignal {
                direction,
                confidence,
                volatility: 0.02,
            },
        );
    }
}

#[async_trait]
impl SignalSource for StaticSignals {
    async fn evaluate(&self, symbol: &str) -> Result<RawSignal> {
        self.signals
            .read()
            .get(symbol)
            .copied()
            .ok_or_else(|| anyhow!("no signal for {symbol}"))
    }
}

/// Frictionless paper exchange so fills land exactly on the feed price.
pub fn paper(feed: Arc<ScriptedFeed>) -> Arc<PaperExchange> {
    Arc::new(PaperExchange::new(
        feed,
        PaperConfig {
            starting_balance: dec!(10000),
            slippage: Decimal::ZERO,
            commission: Decimal::ZERO,
        },
    ))
}

/// Configuration with millisecond-scale loops.
pub fn fast_config(universe: &[&str]) -> SentinelConfig {
    let mut config = SentinelConfig::default();
    config.engine.universe = universe.iter().map(|s| (*s).to_string()).collect();
    config.engine.monitor_interval_ms = 10;
    config.engine.coordinator_interval_ms = 10;
    config.engine.scan_interval_secs = 1;
    config.engine.shutdown_poll_ms = 5;
    config.exchange.base_retry_delay_ms = 1;
    config.exchange.max_retry_delay_ms = 5;
    config
}

/// Opens `quantity` on the paper exchange and returns the matching position.
pub async fn open_on_exchange(
    exchange: &PaperExchange,
    symbol: &str,
    side: Side,
    quantity: Decimal,
    leverage: u32,
    stop_loss: Decimal,
    take_profit: Decimal,
) -> Position {
    let order = exchange
        .create_market_order(&OrderRequest {
            symbol: symbol.to_string(),
            side: match side {
                Side::Long => OrderSide::Buy,
                Side::Short => OrderSide::Sell,
            },
            quantity,
            leverage,
            reduce_only: false,
        })
        .await
        .unwrap();
    Position::new(PositionParams {
        symbol: symbol.to_string(),
        side,
        entry_price: order.avg_price,
        quantity: order.quantity,
        leverage,
        stop_loss,
        take_profit,
        opened_at: Utc::now(),
    })
    .unwrap()
}

pub fn candidate(symbol: &str, confidence: Decimal, reference_price: Decimal) -> TradeCandidate {
    TradeCandidate {
        symbol: symbol.to_string(),
        direction: SignalDirection::Long,
        confidence,
        volatility: dec!(0.02),
        score: confidence,
        reference_price,
        features: Features(vec![1.0, 0.8, 0.02]),
        generated_at: Utc::now(),
    }
}

pub fn as_client(exchange: &Arc<PaperExchange>) -> Arc<dyn ExchangeClient> {
    Arc::clone(exchange) as Arc<dyn ExchangeClient>
}
