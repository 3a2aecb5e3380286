use perp_sentinel_core::{Balance, Side, SizingConfig};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;
use thiserror::Error;

use crate::drawdown::RiskState;
use crate::kelly::KellySizer;

/// Decimal places kept on order quantities.
const QUANTITY_DP: u32 = 8;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SizingError {
    #[error("equity must be positive, got {0}")]
    NonPositiveEquity(Decimal),

    #[error("entry price must be positive, got {0}")]
    NonPositivePrice(Decimal),

    #[error("confidence {0} outside [0, 1]")]
    InvalidConfidence(Decimal),

    #[error("volatility must be non-negative, got {0}")]
    InvalidVolatility(Decimal),

    #[error("stop distance {stop_distance} too wide for any leverage within max stop ROI {max_stop_roi}")]
    StopTooWide {
        stop_distance: Decimal,
        max_stop_roi: Decimal,
    },

    #[error("insufficient free margin: {free}")]
    InsufficientMargin { free: Decimal },

    #[error("computed quantity rounds to zero")]
    ZeroQuantity,
}

/// Output of [`RiskSizer::size`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SizingDecision {
    pub quantity: Decimal,
    pub leverage: u32,
    /// Fraction of entry price between entry and stop.
    pub stop_distance: Decimal,
    /// Fraction of entry price between entry and target.
    pub target_distance: Decimal,
    /// Fractional Kelly share of equity before throttling.
    pub risk_fraction: Decimal,
    pub throttle: Decimal,
    pub notional: Decimal,
    pub margin: Decimal,
    /// Loss if the stop is hit.
    pub risk_amount: Decimal,
}

impl SizingDecision {
    #[must_use]
    pub fn stop_price(&self, side: Side, entry_price: Decimal) -> Decimal {
        entry_price * (Decimal::ONE - side.sign() * self.stop_distance)
    }

    #[must_use]
    pub fn target_price(&self, side: Side, entry_price: Decimal) -> Decimal {
        entry_price * (Decimal::ONE + side.sign() * self.target_distance)
    }
}

/// Turns equity, signal quality and track record into a concrete entry size.
#[derive(Debug, Clone)]
pub struct RiskSizer {
    config: SizingConfig,
    kelly: KellySizer,
}

impl RiskSizer {
    #[must_use]
    pub fn new(config: SizingConfig) -> Self {
        let kelly = KellySizer::from_config(&config);
        Self { config, kelly }
    }

    #[must_use]
    pub const fn config(&self) -> &SizingConfig {
        &self.config
    }

    /// Stop distance scaled by volatility and bounded to the configured band.
    #[must_use]
    pub fn stop_distance(&self, volatility: Decimal) -> Decimal {
        let c = &self.config;
        let scaled = c.base_stop_distance * (volatility / c.reference_volatility);
        scaled.clamp(c.min_stop_distance, c.max_stop_distance)
    }

    /// Leverage bucket for the signal, before the stop-ROI reduction.
    #[must_use]
    pub fn base_leverage(&self, confidence: Decimal, volatility: Decimal) -> u32 {
        let c = &self.config;
        let bucket = if volatility <= c.low_volatility {
            c.calm_leverage
        } else if volatility > c.high_volatility {
            c.turbulent_leverage
        } else {
            c.normal_leverage
        };
        let adjusted = if confidence >= c.high_confidence {
            bucket.saturating_add(c.confidence_leverage_step)
        } else if confidence < c.low_confidence {
            bucket.saturating_sub(c.confidence_leverage_step)
        } else {
            bucket
        };
        adjusted.clamp(c.min_leverage, c.max_leverage)
    }

    /// Sizes a new entry.
    ///
    /// # Arguments
    /// * `balance` - Account balance; `total` is equity, `free` bounds margin
    /// * `confidence` - Validated signal confidence, 0 to 1
    /// * `volatility` - Observed volatility as a fraction of price
    /// * `state` - Current risk statistics (Kelly inputs and drawdown)
    /// * `entry_price` - Expected fill price
    ///
    /// # Errors
    ///
    /// Returns an error on invalid inputs, when no leverage keeps the stop ROI
    /// within bounds, or when the result is not fundable.
    pub fn size(
        &self,
        balance: &Balance,
        confidence: Decimal,
        volatility: Decimal,
        state: &RiskState,
        entry_price: Decimal,
    ) -> Result<SizingDecision, SizingError> {
        let c = &self.config;
        let equity = balance.total;
        if equity <= Decimal::ZERO {
            return Err(SizingError::NonPositiveEquity(equity));
        }
        if entry_price <= Decimal::ZERO {
            return Err(SizingError::NonPositivePrice(entry_price));
        }
        if confidence < Decimal::ZERO || confidence > Decimal::ONE {
            return Err(SizingError::InvalidConfidence(confidence));
        }
        if volatility < Decimal::ZERO {
            return Err(SizingError::InvalidVolatility(volatility));
        }

        let stop_distance = self.stop_distance(volatility);
        let target_distance = stop_distance * c.reward_risk_ratio;

        let mut leverage = self.base_leverage(confidence, volatility);
        while leverage > c.min_leverage && Decimal::from(leverage) * stop_distance > c.max_stop_roi
        {
            leverage -= 1;
        }
        if Decimal::from(leverage) * stop_distance > c.max_stop_roi {
            return Err(SizingError::StopTooWide {
                stop_distance,
                max_stop_roi: c.max_stop_roi,
            });
        }
        let lev = Decimal::from(leverage);

        let risk_fraction = self.kelly.risk_fraction(state);
        let throttle = state.throttle(c);
        let mut notional = equity * risk_fraction * throttle * lev;

        // Hard per-trade loss cap, applied after every other adjustment.
        let max_loss = equity * c.max_risk_per_trade;
        if notional * stop_distance > max_loss {
            notional = max_loss / stop_distance;
        }

        if balance.free <= Decimal::ZERO {
            return Err(SizingError::InsufficientMargin { free: balance.free });
        }
        notional = notional.min(balance.free * lev);

        let quantity = (notional / entry_price)
            .round_dp_with_strategy(QUANTITY_DP, RoundingStrategy::ToZero);
        if quantity <= Decimal::ZERO {
            return Err(SizingError::ZeroQuantity);
        }
        let notional = quantity * entry_price;

        Ok(SizingDecision {
            quantity,
            leverage,
            stop_distance,
            target_distance,
            risk_fraction,
            throttle,
            notional,
            margin: notional / lev,
            risk_amount: notional * stop_distance,
        })
    }
}
