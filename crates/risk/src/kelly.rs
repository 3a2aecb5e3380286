//! Fractional Kelly sizing for leveraged directional trades.
//!
//! With win rate `p` and payoff ratio `b` (average win / average loss) the full
//! Kelly fraction is
//! ```text
//! f* = (p * b - (1 - p)) / b
//! ```
//! The sizer scales `f*` by a safety fraction and clamps the result, so the
//! returned fraction always lies inside the configured band regardless of the
//! statistics fed in.

use perp_sentinel_core::SizingConfig;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::drawdown::RiskState;

/// Full Kelly fraction. Negative when the edge is negative; zero for a non-positive payoff.
#[must_use]
pub fn full_kelly(win_rate: Decimal, payoff_ratio: Decimal) -> Decimal {
    if payoff_ratio <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    (win_rate * payoff_ratio - (Decimal::ONE - win_rate)) / payoff_ratio
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KellySizer {
    /// Multiplier applied to full Kelly (0.25 = quarter Kelly).
    pub safety: Decimal,
    pub min_fraction: Decimal,
    pub max_fraction: Decimal,
    /// Conservative fraction used while the track record is too short.
    pub fallback_fraction: Decimal,
    pub min_trades: usize,
}

impl KellySizer {
    #[must_use]
    pub fn from_config(config: &SizingConfig) -> Self {
        Self {
            safety: config.kelly_safety,
            min_fraction: config.min_risk_fraction,
            max_fraction: config.max_risk_fraction,
            fallback_fraction: config.fallback_risk_fraction,
            min_trades: config.min_trades_for_kelly,
        }
    }

    /// Clamped fractional Kelly for the given statistics.
    ///
    /// # Arguments
    /// * `win_rate` - Observed probability of a winning trade, 0 to 1
    /// * `payoff_ratio` - Average win divided by average loss magnitude
    #[must_use]
    pub fn fraction_for(&self, win_rate: Decimal, payoff_ratio: Decimal) -> Decimal {
        let win_rate = win_rate.clamp(Decimal::ZERO, Decimal::ONE);
        let scaled = full_kelly(win_rate, payoff_ratio) * self.safety;
        scaled.clamp(self.min_fraction, self.max_fraction)
    }

    /// Fraction of equity to commit as margin given the recorded track record.
    #[must_use]
    pub fn risk_fraction(&self, state: &RiskState) -> Decimal {
        if state.window_len() < self.min_trades {
            return self
                .fallback_fraction
                .clamp(self.min_fraction, self.max_fraction);
        }

        match (state.win_rate(), state.payoff_ratio()) {
            (Some(p), Some(b)) => self.fraction_for(p, b),
            // All wins (no loss to divide by) or no data: take the cap or the floor.
            (Some(p), None) if p == Decimal::ONE => self.max_fraction,
            _ => self.min_fraction,
        }
    }
}

impl Default for KellySizer {
    fn default() -> Self {
        Self::from_config(&SizingConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn full_kelly_formula() {
        // (0.55 * 2 - 0.45) / 2 = 0.325
        assert_eq!(full_kelly(dec!(0.55), dec!(2.0)), dec!(0.325));
        // 50/50 at even money has no edge
        assert_eq!(full_kelly(dec!(0.5), dec!(1)), Decimal::ZERO);
        assert!(full_kelly(dec!(0.3), dec!(1)) < Decimal::ZERO);
        assert_eq!(full_kelly(dec!(0.6), Decimal::ZERO), Decimal::ZERO);
    }

    #[test]
    fn reference_statistics_hit_the_cap() {
        let sizer = KellySizer::default();
        // 0.325 * 0.25 = 0.08125, capped at 3.5%
        assert_eq!(sizer.fraction_for(dec!(0.55), dec!(2.0)), dec!(0.035));
    }

    #[test]
    fn fraction_stays_in_band_for_all_inputs() {
        let sizer = KellySizer::default();
        for safety in [dec!(0.25), dec!(0.35), dec!(0.5)] {
            let sizer = KellySizer {
                safety,
                ..sizer.clone()
            };
            for p in 0..=100 {
                let win_rate = Decimal::new(p, 2);
                for b in [
                    dec!(0),
                    dec!(0.01),
                    dec!(0.5),
                    dec!(1),
                    dec!(2.0),
                    dec!(3.7),
                    dec!(100),
                ] {
                    let f = sizer.fraction_for(win_rate, b);
                    assert!(
                        f >= dec!(0.005) && f <= dec!(0.035),
                        "p={win_rate} b={b} safety={safety} gave {f}"
                    );
                }
            }
        }
        // Out-of-range win rates are clamped before use.
        let f = sizer.fraction_for(dec!(1.7), dec!(2.0));
        assert!(f <= dec!(0.035));
        let f = sizer.fraction_for(dec!(-0.4), dec!(2.0));
        assert!(f >= dec!(0.005));
    }

    #[test]
    fn fallback_with_short_history() {
        let sizer = KellySizer::default();
        let mut state = RiskState::new(dec!(10000), 50);
        for _ in 0..5 {
            state.record_outcome(dec!(100));
        }
        assert_eq!(sizer.risk_fraction(&state), dec!(0.01));
    }

    #[test]
    fn uses_kelly_once_history_is_long_enough() {
        let sizer = KellySizer::default();
        let mut state = RiskState::new(dec!(10000), 50);
        // 11 wins of 200, 9 losses of 100: p = 0.55, b = 2.0
        for _ in 0..11 {
            state.record_outcome(dec!(200));
        }
        for _ in 0..9 {
            state.record_outcome(dec!(-100));
        }
        assert_eq!(state.win_rate(), Some(dec!(0.55)));
        assert_eq!(state.payoff_ratio(), Some(dec!(2)));
        assert_eq!(sizer.risk_fraction(&state), dec!(0.035));
    }

    #[test]
    fn losing_record_takes_the_floor() {
        let sizer = KellySizer::default();
        let mut state = RiskState::new(dec!(10000), 50);
        for i in 0..25 {
            state.record_outcome(if i % 4 == 0 { dec!(50) } else { dec!(-100) });
        }
        assert_eq!(sizer.risk_fraction(&state), dec!(0.005));
    }
}
