//! Position monitor: re-prices every open position and applies the state machine.
//!
//! Exchange calls never happen while the book lock is held. A price is fetched
//! first, then the position is re-read under the lock; if it was closed in the
//! meantime the stale result is dropped.

use chrono::Utc;
use perp_sentinel_core::{
    CloseReason, ClosedTrade, ExchangeClient, ExchangeError, ExitPolicy, OrderRequest, Position,
    SignalReading, SignalSource,
};
use rust_decimal::Decimal;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::book::{BookError, PositionBook};
use crate::lifecycle::{apply_adjustment, evaluate};
use crate::types::Decision;

#[derive(Debug, Error)]
pub enum CloseError {
    #[error(transparent)]
    Book(#[from] BookError),

    #[error("close order failed for {symbol}: {source}")]
    Exchange {
        symbol: String,
        #[source]
        source: ExchangeError,
    },
}

/// Counters from one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub evaluated: usize,
    pub adjusted: usize,
    pub closed: usize,
    pub skipped: usize,
}

pub struct PositionMonitor {
    book: Arc<PositionBook>,
    exchange: Arc<dyn ExchangeClient>,
    signals: Arc<dyn SignalSource>,
    policy: ExitPolicy,
    closures: mpsc::UnboundedSender<ClosedTrade>,
}

impl PositionMonitor {
    /// Creates a monitor. Every realized close is sent on `closures`.
    #[must_use]
    pub fn new(
        book: Arc<PositionBook>,
        exchange: Arc<dyn ExchangeClient>,
        signals: Arc<dyn SignalSource>,
        policy: ExitPolicy,
        closures: mpsc::UnboundedSender<ClosedTrade>,
    ) -> Self {
        Self {
            book,
            exchange,
            signals,
            policy,
            closures,
        }
    }

    #[must_use]
    pub fn book(&self) -> &Arc<PositionBook> {
        &self.book
    }

    /// Evaluates every live position once.
    ///
    /// A failure on one symbol is logged and does not stop the sweep.
    pub async fn sweep(&self) -> SweepReport {
        let mut report = SweepReport::default();

        for symbol in self.book.symbols() {
            let price = match self.exchange.get_ticker(&symbol).await {
                Ok(price) if price > Decimal::ZERO => price,
                Ok(price) => {
                    warn!(symbol = %symbol, price = %price, "Ignoring non-positive price");
                    report.skipped += 1;
                    continue;
                }
                Err(e) => {
                    warn!(symbol = %symbol, error = %e, "Price fetch failed, skipping symbol");
                    report.skipped += 1;
                    continue;
                }
            };
            let momentum = self.momentum(&symbol).await;

            let now = Utc::now();
            let policy = &self.policy;
            let outcome = self.book.update(&symbol, |pos| {
                let roi = pos.observe(price, now);
                let decision = evaluate(pos, price, now, &momentum, policy);
                let changed = match &decision {
                    Decision::Adjust(adj) => apply_adjustment(pos, adj, now),
                    _ => false,
                };
                (decision, changed, roi, pos.stop_loss(), pos.take_profit())
            });

            let Some((decision, changed, roi, stop, target)) = outcome else {
                debug!(symbol = %symbol, "Position closed during sweep");
                continue;
            };
            report.evaluated += 1;

            match decision {
                Decision::Hold => {}
                Decision::Adjust(_) => {
                    if changed {
                        report.adjusted += 1;
                        info!(
                            symbol = %symbol,
                            price = %price,
                            roi = %roi,
                            stop_loss = %stop,
                            take_profit = %target,
                            "Adjusted protective levels"
                        );
                    }
                }
                Decision::Close(reason) => match self.close(&symbol, reason).await {
                    Ok(_) => report.closed += 1,
                    Err(CloseError::Book(e)) => {
                        debug!(symbol = %symbol, error = %e, "Close already handled elsewhere");
                    }
                    Err(e) => {
                        error!(symbol = %symbol, reason = %reason, error = %e, "Failed to close position");
                    }
                },
            }
        }

        report
    }

    /// Closes the position for `symbol` with a reduce-only market order.
    ///
    /// Only one concurrent caller can succeed; the rest see [`BookError::NotFound`].
    /// On exchange failure the position is restored to the book.
    ///
    /// # Errors
    ///
    /// Returns an error if the position is not live or the close order fails.
    pub async fn close(&self, symbol: &str, reason: CloseReason) -> Result<ClosedTrade, CloseError> {
        let position = self.book.begin_close(symbol)?;

        let request = OrderRequest {
            symbol: symbol.to_string(),
            side: position.side().exit_order_side(),
            quantity: position.quantity(),
            leverage: position.leverage(),
            reduce_only: true,
        };

        match self.exchange.create_market_order(&request).await {
            Ok(order) => {
                self.book.complete_close(symbol);
                let trade = closed_trade(&position, order.avg_price, order.fee, reason);
                self.report_close(&trade);
                Ok(trade)
            }
            Err(source) => {
                self.book.abort_close(position);
                Err(CloseError::Exchange {
                    symbol: symbol.to_string(),
                    source,
                })
            }
        }
    }

    /// Closes every live position, falling back to a whole-position close when the
    /// reduce-only order fails. Returns the trades that were recorded.
    pub async fn flatten_all(&self, reason: CloseReason) -> Vec<ClosedTrade> {
        let mut trades = Vec::new();
        for symbol in self.book.symbols() {
            match self.close(&symbol, reason).await {
                Ok(trade) => trades.push(trade),
                Err(CloseError::Book(_)) => {}
                Err(e) => {
                    warn!(symbol = %symbol, error = %e, "Reduce-only close failed, flattening");
                    if let Some(trade) = self.force_close(&symbol, reason).await {
                        trades.push(trade);
                    }
                }
            }
        }
        trades
    }

    /// Flattens through `close_position` and books the outcome at the last ticker.
    async fn force_close(&self, symbol: &str, reason: CloseReason) -> Option<ClosedTrade> {
        let position = self.book.begin_close(symbol).ok()?;
        match self.exchange.close_position(symbol).await {
            Ok(true) => {
                self.book.complete_close(symbol);
                let exit_price = match self.exchange.get_ticker(symbol).await {
                    Ok(price) if price > Decimal::ZERO => price,
                    _ => {
                        warn!(symbol = %symbol, "No price after flatten, booking at entry");
                        position.entry_price()
                    }
                };
                let trade = closed_trade(&position, exit_price, Decimal::ZERO, reason);
                self.report_close(&trade);
                Some(trade)
            }
            Ok(false) => {
                self.book.complete_close(symbol);
                warn!(symbol = %symbol, "Exchange reported no position to flatten");
                None
            }
            Err(e) => {
                error!(
                    symbol = %symbol,
                    quantity = %position.quantity(),
                    error = %e,
                    "Failed to flatten position, left open on exchange"
                );
                self.book.abort_close(position);
                None
            }
        }
    }

    async fn momentum(&self, symbol: &str) -> SignalReading {
        match self.signals.evaluate(symbol).await {
            Ok(raw) => SignalReading::try_from(raw).unwrap_or_else(|e| {
                warn!(symbol = %symbol, error = %e, "Rejected momentum signal");
                SignalReading::neutral()
            }),
            Err(e) => {
                debug!(symbol = %symbol, error = %e, "No momentum signal");
                SignalReading::neutral()
            }
        }
    }

    fn report_close(&self, trade: &ClosedTrade) {
        if trade.reason.is_emergency() {
            warn!(
                symbol = %trade.symbol,
                reason = %trade.reason,
                roi = %trade.roi,
                pnl = %trade.pnl,
                "Emergency close"
            );
        } else {
            info!(
                symbol = %trade.symbol,
                reason = %trade.reason,
                roi = %trade.roi,
                pnl = %trade.pnl,
                "Position closed"
            );
        }
        if self.closures.send(trade.clone()).is_err() {
            warn!(symbol = %trade.symbol, "Closure channel dropped, outcome not recorded");
        }
    }
}

/// Realized outcome of closing `position` at `exit_price`.
#[must_use]
pub fn closed_trade(
    position: &Position,
    exit_price: Decimal,
    fee: Decimal,
    reason: CloseReason,
) -> ClosedTrade {
    ClosedTrade {
        symbol: position.symbol().to_string(),
        side: position.side(),
        entry_price: position.entry_price(),
        exit_price,
        quantity: position.quantity(),
        leverage: position.leverage(),
        pnl: position.unrealized_pnl(exit_price) - fee,
        roi: position.leveraged_roi(exit_price),
        peak_roi: position.peak_roi().max(position.leveraged_roi(exit_price)),
        reason,
        opened_at: position.opened_at(),
        closed_at: Utc::now(),
        features: position.features().cloned(),
    }
}
