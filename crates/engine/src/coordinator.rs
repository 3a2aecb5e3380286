//! Engine coordinator: turns fresh scanner output into sized positions and
//! books every realized close into the risk state.

use chrono::{DateTime, Utc};
use perp_sentinel_core::{
    Balance, Classifier, ClosedTrade, EngineConfig, ExchangeClient, OrderRequest, Position,
    PositionParams, SignalDirection, TradeCandidate,
};
use perp_sentinel_positions::PositionBook;
use perp_sentinel_risk::{CircuitBreaker, CircuitBreakerError, RiskLedger, RiskSizer, RiskState};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::cache::OpportunityCache;
use crate::history::TradeHistory;

/// Why a candidate did not become a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectReason {
    KillSwitch,
    TradingHalted,
    StaleCache,
    MaxPositions,
    CorrelationLimit,
    AlreadyOpen,
    Cooldown,
    LowConfidence,
    SizingFailed,
    OrderFailed,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = match self {
            Self::KillSwitch => "kill_switch",
            Self::TradingHalted => "trading_halted",
            Self::StaleCache => "stale_cache",
            Self::MaxPositions => "max_positions",
            Self::CorrelationLimit => "correlation_limit",
            Self::AlreadyOpen => "already_open",
            Self::Cooldown => "cooldown",
            Self::LowConfidence => "low_confidence",
            Self::SizingFailed => "sizing_failed",
            Self::OrderFailed => "order_failed",
        };
        f.write_str(code)
    }
}

/// Counters from one coordinator pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub closes_recorded: usize,
    pub opened: usize,
    pub rejected: usize,
}

pub struct EngineCoordinator {
    book: Arc<PositionBook>,
    cache: Arc<OpportunityCache>,
    exchange: Arc<dyn ExchangeClient>,
    classifier: Option<Arc<dyn Classifier>>,
    ledger: Arc<RiskLedger>,
    breaker: Arc<CircuitBreaker>,
    history: Arc<TradeHistory>,
    sizer: RiskSizer,
    config: EngineConfig,
    closures: mpsc::UnboundedReceiver<ClosedTrade>,
    last_closed: HashMap<String, DateTime<Utc>>,
    last_generation: Option<u64>,
}

impl EngineCoordinator {
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        book: Arc<PositionBook>,
        cache: Arc<OpportunityCache>,
        exchange: Arc<dyn ExchangeClient>,
        ledger: Arc<RiskLedger>,
        breaker: Arc<CircuitBreaker>,
        history: Arc<TradeHistory>,
        sizer: RiskSizer,
        config: EngineConfig,
        closures: mpsc::UnboundedReceiver<ClosedTrade>,
    ) -> Self {
        Self {
            book,
            cache,
            exchange,
            classifier: None,
            ledger,
            breaker,
            history,
            sizer,
            config,
            closures,
            last_closed: HashMap::new(),
            last_generation: None,
        }
    }

    /// Sends every realized outcome back to `classifier`.
    #[must_use]
    pub fn with_classifier(mut self, classifier: Arc<dyn Classifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    /// One pass: record closes, then act on the cache if it holds a new, fresh scan.
    ///
    /// Each scan is acted on at most once.
    pub async fn tick(&mut self) -> TickReport {
        let mut report = TickReport {
            closes_recorded: self.drain_closures().await,
            ..TickReport::default()
        };

        let Some(snapshot) = self.cache.snapshot() else {
            return report;
        };
        if self.last_generation == Some(snapshot.generation) {
            return report;
        }
        self.last_generation = Some(snapshot.generation);
        if snapshot.candidates.is_empty() {
            return report;
        }

        let now = Utc::now();
        let max_age = self.config.max_cache_age();
        if snapshot.is_stale(now, max_age) {
            warn!(
                reason = %RejectReason::StaleCache,
                generation = snapshot.generation,
                age_secs = snapshot.age_secs(now),
                max_age_secs = max_age.as_secs(),
                candidates = snapshot.candidates.len(),
                "Discarding stale opportunities"
            );
            report.rejected += snapshot.candidates.len();
            return report;
        }

        let mut balance = match self.exchange.get_balance().await {
            Ok(balance) => balance,
            Err(e) => {
                if e.is_fatal() {
                    self.breaker.record_error(&e);
                }
                warn!(error = %e, "Balance unavailable, skipping entries this pass");
                return report;
            }
        };
        let mut risk = self.ledger.sync_equity(balance.total);

        for candidate in &snapshot.candidates {
            match self.try_open(candidate, &balance, &risk).await {
                Ok(()) => {
                    report.opened += 1;
                    match self.exchange.get_balance().await {
                        Ok(fresh) => {
                            balance = fresh;
                            risk = self.ledger.sync_equity(balance.total);
                        }
                        Err(e) => {
                            warn!(error = %e, "Balance refresh failed, deferring remaining candidates");
                            break;
                        }
                    }
                }
                Err(reason) => {
                    report.rejected += 1;
                    debug!(symbol = %candidate.symbol, reason = %reason, "Candidate not opened");
                }
            }
        }

        report
    }

    /// Records every close waiting on the channel. Returns how many were recorded.
    pub async fn drain_closures(&mut self) -> usize {
        let mut recorded = 0;
        while let Ok(trade) = self.closures.try_recv() {
            self.record_close(trade).await;
            recorded += 1;
        }
        if recorded > 0 {
            self.resync_equity().await;
        }
        recorded
    }

    /// Realized PnL reaches equity through the account total, never by adding it again.
    async fn resync_equity(&self) {
        match self.exchange.get_balance().await {
            Ok(balance) => {
                let state = self.ledger.sync_equity(balance.total);
                debug!(
                    equity = %state.current_equity(),
                    peak = %state.peak_equity(),
                    drawdown = %state.drawdown(),
                    "Equity synced after close"
                );
            }
            Err(e) => {
                if e.is_fatal() {
                    self.breaker.record_error(&e);
                }
                warn!(error = %e, "Balance unavailable after close, equity stays at last sync");
            }
        }
    }

    async fn record_close(&mut self, trade: ClosedTrade) {
        let state = self.ledger.record_trade(&trade);
        self.last_closed.insert(trade.symbol.clone(), trade.closed_at);

        if let (Some(classifier), Some(features)) = (&self.classifier, &trade.features) {
            let signal = SignalDirection::from(trade.side);
            if let Err(e) = classifier.record_outcome(features, signal, trade.pnl).await {
                warn!(symbol = %trade.symbol, error = %e, "Classifier feedback failed");
            }
        }

        debug!(
            symbol = %trade.symbol,
            reason = %trade.reason,
            trades = state.total_trades(),
            "Close booked"
        );
        self.history.push(trade);
    }

    async fn try_open(
        &self,
        candidate: &TradeCandidate,
        balance: &Balance,
        risk: &RiskState,
    ) -> Result<(), RejectReason> {
        let symbol = candidate.symbol.as_str();

        if let Err(e) = self.breaker.can_trade() {
            let reason = match e {
                CircuitBreakerError::KillSwitch => RejectReason::KillSwitch,
                CircuitBreakerError::Halted { .. } | CircuitBreakerError::Paused { .. } => {
                    RejectReason::TradingHalted
                }
            };
            return Err(reject(candidate, reason, &e.to_string()));
        }

        let Some(side) = candidate.direction.side() else {
            return Err(reject(candidate, RejectReason::LowConfidence, "no direction"));
        };
        if self.book.contains(symbol) {
            return Err(reject(candidate, RejectReason::AlreadyOpen, "position live or closing"));
        }
        if self.book.occupied() >= self.config.max_positions {
            return Err(reject(
                candidate,
                RejectReason::MaxPositions,
                &format!("limit {}", self.config.max_positions),
            ));
        }
        let group = self.config.correlation_group(symbol).map(str::to_string);
        if let Some(group) = &group {
            if self.book.group_count(group) >= self.config.max_per_correlation_group {
                return Err(reject(
                    candidate,
                    RejectReason::CorrelationLimit,
                    &format!("group {group} at limit {}", self.config.max_per_correlation_group),
                ));
            }
        }
        if let Some(closed_at) = self.last_closed.get(symbol) {
            let elapsed = Utc::now() - *closed_at;
            if let Ok(cooldown) = chrono::Duration::from_std(self.config.reentry_cooldown()) {
                if elapsed < cooldown {
                    return Err(reject(
                        candidate,
                        RejectReason::Cooldown,
                        &format!("closed {}s ago", elapsed.num_seconds()),
                    ));
                }
            }
        }
        if candidate.confidence < self.config.min_confidence {
            return Err(reject(
                candidate,
                RejectReason::LowConfidence,
                &format!("{} < {}", candidate.confidence, self.config.min_confidence),
            ));
        }

        let sizing = self
            .sizer
            .size(
                balance,
                candidate.confidence,
                candidate.volatility,
                risk,
                candidate.reference_price,
            )
            .map_err(|e| reject(candidate, RejectReason::SizingFailed, &e.to_string()))?;

        let request = OrderRequest {
            symbol: symbol.to_string(),
            side: side.entry_order_side(),
            quantity: sizing.quantity,
            leverage: sizing.leverage,
            reduce_only: false,
        };
        let order = match self.exchange.create_market_order(&request).await {
            Ok(order) => order,
            Err(e) => {
                self.breaker.record_error(&e);
                return Err(reject(candidate, RejectReason::OrderFailed, &e.to_string()));
            }
        };
        self.breaker.record_success();

        let entry = order.avg_price;
        let params = PositionParams {
            symbol: symbol.to_string(),
            side,
            entry_price: entry,
            quantity: order.quantity,
            leverage: sizing.leverage,
            stop_loss: sizing.stop_price(side, entry),
            take_profit: sizing.target_price(side, entry),
            opened_at: order.timestamp,
        };
        let mut position = match Position::new(params) {
            Ok(position) => position.with_features(candidate.features.clone()),
            Err(e) => {
                error!(symbol = %symbol, error = %e, "Filled entry is not a valid position, flattening");
                if let Err(close_err) = self.exchange.close_position(symbol).await {
                    error!(symbol = %symbol, error = %close_err, "Failed to flatten invalid entry");
                }
                return Err(RejectReason::OrderFailed);
            }
        };
        if let Some(group) = group {
            position = position.with_correlation_group(group);
        }

        let (stop, target) = (position.stop_loss(), position.take_profit());
        if let Err(e) = self.book.insert(position) {
            error!(symbol = %symbol, error = %e, "Opened position could not be booked");
            return Err(RejectReason::AlreadyOpen);
        }

        info!(
            symbol = %symbol,
            side = %side,
            entry = %entry,
            quantity = %order.quantity,
            leverage = sizing.leverage,
            stop_loss = %stop,
            take_profit = %target,
            risk_fraction = %sizing.risk_fraction,
            throttle = %sizing.throttle,
            "Opened position"
        );
        Ok(())
    }
}

fn reject(candidate: &TradeCandidate, reason: RejectReason, detail: &str) -> RejectReason {
    warn!(
        symbol = %candidate.symbol,
        reason = %reason,
        detail = %detail,
        confidence = %candidate.confidence,
        "Trade rejected"
    );
    reason
}
