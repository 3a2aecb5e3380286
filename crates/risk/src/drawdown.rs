//! Process-wide risk statistics and drawdown throttle.
//!
//! [`RiskState`] is a plain value; [`RiskLedger`] owns the single shared
//! instance behind one mutex so every update is applied as one transaction.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use perp_sentinel_core::{ClosedTrade, SizingConfig};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::{info, warn};

use crate::persistence::RiskPersistence;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskState {
    peak_equity: Decimal,
    current_equity: Decimal,
    /// `(peak - current) / peak`, 0 at a new high.
    drawdown: Decimal,
    /// Realized PnL of the most recent closes, oldest first.
    outcomes: VecDeque<Decimal>,
    window: usize,
    wins: usize,
    losses: usize,
    avg_win: Decimal,
    /// Average loss magnitude (positive).
    avg_loss: Decimal,
    total_trades: u64,
    realized_pnl: Decimal,
    updated_at: DateTime<Utc>,
}

impl RiskState {
    /// Fresh state seeded from the account equity.
    #[must_use]
    pub fn new(equity: Decimal, window: usize) -> Self {
        Self {
            peak_equity: equity,
            current_equity: equity,
            drawdown: Decimal::ZERO,
            outcomes: VecDeque::with_capacity(window),
            window: window.max(1),
            wins: 0,
            losses: 0,
            avg_win: Decimal::ZERO,
            avg_loss: Decimal::ZERO,
            total_trades: 0,
            realized_pnl: Decimal::ZERO,
            updated_at: Utc::now(),
        }
    }

    #[must_use]
    pub const fn peak_equity(&self) -> Decimal {
        self.peak_equity
    }

    #[must_use]
    pub const fn current_equity(&self) -> Decimal {
        self.current_equity
    }

    #[must_use]
    pub const fn drawdown(&self) -> Decimal {
        self.drawdown
    }

    #[must_use]
    pub const fn wins(&self) -> usize {
        self.wins
    }

    #[must_use]
    pub const fn losses(&self) -> usize {
        self.losses
    }

    #[must_use]
    pub const fn avg_win(&self) -> Decimal {
        self.avg_win
    }

    #[must_use]
    pub const fn avg_loss(&self) -> Decimal {
        self.avg_loss
    }

    #[must_use]
    pub const fn total_trades(&self) -> u64 {
        self.total_trades
    }

    #[must_use]
    pub const fn realized_pnl(&self) -> Decimal {
        self.realized_pnl
    }

    #[must_use]
    pub const fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Number of outcomes in the rolling window.
    #[must_use]
    pub fn window_len(&self) -> usize {
        self.outcomes.len()
    }

    /// Win rate over the rolling window, `None` before the first close.
    #[must_use]
    pub fn win_rate(&self) -> Option<Decimal> {
        let n = self.outcomes.len();
        if n == 0 {
            return None;
        }
        Some(Decimal::from(self.wins) / Decimal::from(n))
    }

    /// Average win over average loss, `None` until both sides have been observed.
    #[must_use]
    pub fn payoff_ratio(&self) -> Option<Decimal> {
        if self.avg_loss.is_zero() || self.wins == 0 {
            return None;
        }
        Some(self.avg_win / self.avg_loss)
    }

    /// Size multiplier for the current drawdown.
    #[must_use]
    pub fn throttle(&self, config: &SizingConfig) -> Decimal {
        if self.drawdown > config.severe_drawdown {
            config.severe_throttle
        } else if self.drawdown > config.moderate_drawdown {
            config.moderate_throttle
        } else {
            Decimal::ONE
        }
    }

    /// Applies a realized close to the outcome statistics.
    ///
    /// Equity is left alone: the account total passed to [`RiskState::sync_equity`]
    /// already carries both realized and unrealized PnL.
    pub fn record_outcome(&mut self, pnl: Decimal) {
        self.outcomes.push_back(pnl);
        while self.outcomes.len() > self.window {
            self.outcomes.pop_front();
        }
        self.recompute_stats();

        self.total_trades += 1;
        self.realized_pnl += pnl;
        self.updated_at = Utc::now();
    }

    /// Replaces current equity with an observed account total.
    pub fn sync_equity(&mut self, equity: Decimal) {
        self.set_equity(equity);
    }

    fn set_equity(&mut self, equity: Decimal) {
        self.current_equity = equity;
        if equity > self.peak_equity {
            self.peak_equity = equity;
        }
        self.drawdown = if self.peak_equity > Decimal::ZERO {
            ((self.peak_equity - equity) / self.peak_equity).max(Decimal::ZERO)
        } else {
            Decimal::ZERO
        };
        self.updated_at = Utc::now();
    }

    fn recompute_stats(&mut self) {
        let (mut wins, mut losses) = (0usize, 0usize);
        let (mut win_sum, mut loss_sum) = (Decimal::ZERO, Decimal::ZERO);
        for pnl in &self.outcomes {
            if *pnl > Decimal::ZERO {
                wins += 1;
                win_sum += *pnl;
            } else {
                losses += 1;
                loss_sum += pnl.abs();
            }
        }
        self.wins = wins;
        self.losses = losses;
        self.avg_win = if wins > 0 {
            win_sum / Decimal::from(wins)
        } else {
            Decimal::ZERO
        };
        self.avg_loss = if losses > 0 {
            loss_sum / Decimal::from(losses)
        } else {
            Decimal::ZERO
        };
    }
}

/// Single serialization point for [`RiskState`].
#[derive(Debug)]
pub struct RiskLedger {
    state: Mutex<RiskState>,
    persistence: Option<RiskPersistence>,
}

impl RiskLedger {
    #[must_use]
    pub fn new(state: RiskState) -> Self {
        Self {
            state: Mutex::new(state),
            persistence: None,
        }
    }

    /// Restores state from `persistence` (or starts fresh) and syncs it to `equity`.
    #[must_use]
    pub fn open(equity: Decimal, window: usize, persistence: Option<RiskPersistence>) -> Self {
        let mut state = match &persistence {
            Some(p) => p.load_or(|| RiskState::new(equity, window)),
            None => RiskState::new(equity, window),
        };
        state.window = window.max(1);
        state.sync_equity(equity);
        info!(
            equity = %state.current_equity,
            peak = %state.peak_equity,
            drawdown = %state.drawdown,
            trades = state.total_trades,
            "Risk ledger ready"
        );
        Self {
            state: Mutex::new(state),
            persistence,
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> RiskState {
        self.state.lock().clone()
    }

    /// Records a closed trade and returns the updated state.
    pub fn record_trade(&self, trade: &ClosedTrade) -> RiskState {
        let snapshot = {
            let mut state = self.state.lock();
            state.record_outcome(trade.pnl);
            state.clone()
        };
        info!(
            symbol = %trade.symbol,
            pnl = %trade.pnl,
            realized = %snapshot.realized_pnl,
            trades = snapshot.total_trades,
            "Recorded trade outcome"
        );
        self.persist(&snapshot);
        snapshot
    }

    /// Syncs current equity with the account total and returns the updated state.
    pub fn sync_equity(&self, equity: Decimal) -> RiskState {
        let mut state = self.state.lock();
        state.sync_equity(equity);
        state.clone()
    }

    fn persist(&self, snapshot: &RiskState) {
        if let Some(persistence) = &self.persistence {
            if let Err(e) = persistence.save(snapshot) {
                warn!(
                    path = %persistence.path().display(),
                    error = %e,
                    "Failed to persist risk state"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use perp_sentinel_core::{CloseReason, Side};
    use rust_decimal_macros::dec;

    fn trade(pnl: Decimal) -> ClosedTrade {
        ClosedTrade {
            symbol: "BTC".to_string(),
            side: Side::Long,
            entry_price: dec!(50000),
            exit_price: dec!(50000),
            quantity: dec!(0.1),
            leverage: 5,
            pnl,
            roi: Decimal::ZERO,
            peak_roi: Decimal::ZERO,
            reason: CloseReason::TakeProfit,
            opened_at: Utc::now(),
            closed_at: Utc::now(),
            features: None,
        }
    }

    #[test]
    fn drawdown_throttle_tiers() {
        let config = SizingConfig::default();
        let mut state = RiskState::new(dec!(10000), 50);
        assert_eq!(state.throttle(&config), Decimal::ONE);

        state.sync_equity(dec!(8400)); // -16%
        assert_eq!(state.drawdown(), dec!(0.16));
        assert_eq!(state.throttle(&config), dec!(0.75));

        state.sync_equity(dec!(7800)); // -22%
        assert_eq!(state.drawdown(), dec!(0.22));
        assert_eq!(state.throttle(&config), dec!(0.5));

        state.sync_equity(dec!(10500)); // new peak
        assert_eq!(state.peak_equity(), dec!(10500));
        assert_eq!(state.drawdown(), Decimal::ZERO);
        assert_eq!(state.throttle(&config), Decimal::ONE);
    }

    #[test]
    fn exactly_at_tier_boundary_is_not_throttled_harder() {
        let config = SizingConfig::default();
        let mut state = RiskState::new(dec!(10000), 50);
        state.sync_equity(dec!(8000)); // exactly -20%
        assert_eq!(state.throttle(&config), dec!(0.75));
    }

    #[test]
    fn rolling_window_drops_old_outcomes() {
        let mut state = RiskState::new(dec!(10000), 3);
        state.record_outcome(dec!(-100));
        state.record_outcome(dec!(200));
        state.record_outcome(dec!(200));
        state.record_outcome(dec!(200));

        assert_eq!(state.window_len(), 3);
        assert_eq!(state.wins(), 3);
        assert_eq!(state.losses(), 0);
        assert_eq!(state.total_trades(), 4);
        assert_eq!(state.realized_pnl(), dec!(500));
        assert_eq!(state.payoff_ratio(), None);
    }

    #[test]
    fn averages_and_win_rate() {
        let mut state = RiskState::new(dec!(10000), 50);
        state.record_outcome(dec!(300));
        state.record_outcome(dec!(100));
        state.record_outcome(dec!(-50));
        state.record_outcome(dec!(-150));

        assert_eq!(state.win_rate(), Some(dec!(0.5)));
        assert_eq!(state.avg_win(), dec!(200));
        assert_eq!(state.avg_loss(), dec!(100));
        assert_eq!(state.payoff_ratio(), Some(dec!(2)));
    }

    #[test]
    fn ledger_drawdown_follows_account_total() {
        let ledger = RiskLedger::new(RiskState::new(dec!(10000), 50));
        ledger.record_trade(&trade(dec!(-1000)));
        ledger.record_trade(&trade(dec!(-1200)));
        let state = ledger.sync_equity(dec!(7800));

        assert_eq!(state.current_equity(), dec!(7800));
        assert_eq!(state.drawdown(), dec!(0.22));
        assert_eq!(state.realized_pnl(), dec!(-2200));
        assert_eq!(ledger.snapshot().total_trades(), 2);
    }

    #[test]
    fn profitable_close_is_not_counted_twice() {
        let ledger = RiskLedger::new(RiskState::new(dec!(10000), 50));
        // Account total already includes the open gain.
        ledger.sync_equity(dec!(10500));
        let state = ledger.record_trade(&trade(dec!(500)));
        assert_eq!(state.current_equity(), dec!(10500));
        assert_eq!(state.peak_equity(), dec!(10500));

        // Balance after the close reports the same total: no phantom drawdown.
        let state = ledger.sync_equity(dec!(10500));
        assert_eq!(state.peak_equity(), dec!(10500));
        assert_eq!(state.drawdown(), Decimal::ZERO);
    }

    #[test]
    fn ledger_persists_and_restores() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("risk.json");

        let ledger = RiskLedger::open(dec!(10000), 50, Some(RiskPersistence::new(path.clone())));
        ledger.record_trade(&trade(dec!(500)));
        ledger.sync_equity(dec!(10500));
        ledger.record_trade(&trade(dec!(-200)));

        let restored = RiskLedger::open(dec!(10300), 50, Some(RiskPersistence::new(path)));
        let state = restored.snapshot();
        assert_eq!(state.total_trades(), 2);
        assert_eq!(state.peak_equity(), dec!(10500));
        assert_eq!(state.current_equity(), dec!(10300));
        assert_eq!(state.wins(), 1);
    }
}
