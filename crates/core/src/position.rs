use crate::events::{Features, OrderSide};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Direction of an open leveraged position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    /// `+1` for long, `-1` for short.
    #[must_use]
    pub const fn sign(self) -> Decimal {
        match self {
            Self::Long => Decimal::ONE,
            Self::Short => Decimal::NEGATIVE_ONE,
        }
    }

    /// Order side that opens a position in this direction.
    #[must_use]
    pub const fn entry_order_side(self) -> OrderSide {
        match self {
            Self::Long => OrderSide::Buy,
            Self::Short => OrderSide::Sell,
        }
    }

    /// Order side that reduces a position in this direction.
    #[must_use]
    pub const fn exit_order_side(self) -> OrderSide {
        match self {
            Self::Long => OrderSide::Sell,
            Self::Short => OrderSide::Buy,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Long => write!(f, "long"),
            Self::Short => write!(f, "short"),
        }
    }
}

/// Errors raised when constructing a [`Position`] from invalid parameters.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PositionError {
    #[error("symbol must not be empty")]
    EmptySymbol,

    #[error("entry price must be positive, got {0}")]
    NonPositiveEntryPrice(Decimal),

    #[error("quantity must be positive, got {0}")]
    NonPositiveQuantity(Decimal),

    #[error("leverage must be at least 1")]
    ZeroLeverage,

    #[error("stop loss {stop_loss} is on the wrong side of entry {entry_price} for a {side} position")]
    InvalidStopLoss {
        side: Side,
        entry_price: Decimal,
        stop_loss: Decimal,
    },

    #[error("take profit {take_profit} is on the wrong side of entry {entry_price} for a {side} position")]
    InvalidTakeProfit {
        side: Side,
        entry_price: Decimal,
        take_profit: Decimal,
    },
}

/// Parameters for opening a [`Position`].
#[derive(Debug, Clone)]
pub struct PositionParams {
    pub symbol: String,
    pub side: Side,
    pub entry_price: Decimal,
    pub quantity: Decimal,
    pub leverage: u32,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    pub opened_at: DateTime<Utc>,
}

/// One open leveraged trade.
///
/// Fields are private: a `Position` can only be created through [`Position::new`],
/// which rejects invalid parameters, and its stop/target can only move through
/// [`Position::tighten_stop`] and [`Position::extend_target`], which refuse to
/// loosen risk.
#[derive(Debug, Clone, Serialize)]
pub struct Position {
    symbol: String,
    side: Side,
    entry_price: Decimal,
    quantity: Decimal,
    leverage: u32,
    stop_loss: Decimal,
    take_profit: Decimal,
    initial_stop_loss: Decimal,
    initial_take_profit: Decimal,
    opened_at: DateTime<Utc>,
    peak_roi: Decimal,
    last_updated: DateTime<Utc>,
    last_extension_at: Option<DateTime<Utc>>,
    correlation_group: Option<String>,
    #[serde(skip)]
    features: Option<Features>,
}

impl Position {
    /// Opens a position after validating every invariant.
    ///
    /// # Errors
    /// Returns [`PositionError`] when the symbol is empty, price/quantity/leverage
    /// are not positive, or the stop/target are not on the correct side of entry.
    pub fn new(params: PositionParams) -> Result<Self, PositionError> {
        let PositionParams {
            symbol,
            side,
            entry_price,
            quantity,
            leverage,
            stop_loss,
            take_profit,
            opened_at,
        } = params;

        if symbol.trim().is_empty() {
            return Err(PositionError::EmptySymbol);
        }
        if entry_price <= Decimal::ZERO {
            return Err(PositionError::NonPositiveEntryPrice(entry_price));
        }
        if quantity <= Decimal::ZERO {
            return Err(PositionError::NonPositiveQuantity(quantity));
        }
        if leverage == 0 {
            return Err(PositionError::ZeroLeverage);
        }

        let (stop_ok, target_ok) = match side {
            Side::Long => (
                stop_loss > Decimal::ZERO && stop_loss < entry_price,
                take_profit > entry_price,
            ),
            Side::Short => (
                stop_loss > entry_price,
                take_profit > Decimal::ZERO && take_profit < entry_price,
            ),
        };
        if !stop_ok {
            return Err(PositionError::InvalidStopLoss {
                side,
                entry_price,
                stop_loss,
            });
        }
        if !target_ok {
            return Err(PositionError::InvalidTakeProfit {
                side,
                entry_price,
                take_profit,
            });
        }

        Ok(Self {
            symbol,
            side,
            entry_price,
            quantity,
            leverage,
            stop_loss,
            take_profit,
            initial_stop_loss: stop_loss,
            initial_take_profit: take_profit,
            opened_at,
            peak_roi: Decimal::ZERO,
            last_updated: opened_at,
            last_extension_at: None,
            correlation_group: None,
            features: None,
        })
    }

    /// Attaches the classifier features the entry was decided on.
    #[must_use]
    pub fn with_features(mut self, features: Features) -> Self {
        self.features = Some(features);
        self
    }

    #[must_use]
    pub fn with_correlation_group(mut self, group: impl Into<String>) -> Self {
        self.correlation_group = Some(group.into());
        self
    }

    #[must_use]
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    #[must_use]
    pub const fn side(&self) -> Side {
        self.side
    }

    #[must_use]
    pub const fn entry_price(&self) -> Decimal {
        self.entry_price
    }

    #[must_use]
    pub const fn quantity(&self) -> Decimal {
        self.quantity
    }

    #[must_use]
    pub const fn leverage(&self) -> u32 {
        self.leverage
    }

    #[must_use]
    pub const fn stop_loss(&self) -> Decimal {
        self.stop_loss
    }

    #[must_use]
    pub const fn take_profit(&self) -> Decimal {
        self.take_profit
    }

    #[must_use]
    pub const fn initial_stop_loss(&self) -> Decimal {
        self.initial_stop_loss
    }

    #[must_use]
    pub const fn initial_take_profit(&self) -> Decimal {
        self.initial_take_profit
    }

    #[must_use]
    pub const fn opened_at(&self) -> DateTime<Utc> {
        self.opened_at
    }

    /// Best leveraged ROI observed since entry (peak favorable excursion).
    #[must_use]
    pub const fn peak_roi(&self) -> Decimal {
        self.peak_roi
    }

    #[must_use]
    pub const fn last_updated(&self) -> DateTime<Utc> {
        self.last_updated
    }

    #[must_use]
    pub const fn last_extension_at(&self) -> Option<DateTime<Utc>> {
        self.last_extension_at
    }

    #[must_use]
    pub fn correlation_group(&self) -> Option<&str> {
        self.correlation_group.as_deref()
    }

    #[must_use]
    pub const fn features(&self) -> Option<&Features> {
        self.features.as_ref()
    }

    /// Entry notional (entry price × quantity).
    #[must_use]
    pub fn notional(&self) -> Decimal {
        self.entry_price * self.quantity
    }

    /// Margin committed to the position (notional / leverage).
    #[must_use]
    pub fn margin(&self) -> Decimal {
        self.notional() / Decimal::from(self.leverage)
    }

    /// Unleveraged price return, signed so that a favorable move is positive.
    #[must_use]
    pub fn signed_return(&self, price: Decimal) -> Decimal {
        (price - self.entry_price) / self.entry_price * self.side.sign()
    }

    /// Leveraged ROI: signed price return × leverage.
    ///
    /// Every ROI threshold in the engine is evaluated against this value.
    #[must_use]
    pub fn leveraged_roi(&self, price: Decimal) -> Decimal {
        self.signed_return(price) * Decimal::from(self.leverage)
    }

    /// Unrealized `PnL` in quote currency at `price`.
    #[must_use]
    pub fn unrealized_pnl(&self, price: Decimal) -> Decimal {
        (price - self.entry_price) * self.quantity * self.side.sign()
    }

    /// Fraction of the distance from entry to the *initial* target covered at `price`.
    ///
    /// Negative when price moved against the position. The ratio is sign-correct
    /// for shorts without special casing because both terms flip sign.
    #[must_use]
    pub fn progress(&self, price: Decimal) -> Decimal {
        (price - self.entry_price) / (self.initial_take_profit - self.entry_price)
    }

    /// Initial stop distance as a fraction of entry price.
    #[must_use]
    pub fn initial_stop_distance(&self) -> Decimal {
        (self.entry_price - self.initial_stop_loss).abs() / self.entry_price
    }

    /// Current target distance from entry, in price units.
    #[must_use]
    pub fn target_distance(&self) -> Decimal {
        (self.take_profit - self.entry_price).abs()
    }

    /// Initial target distance from entry, in price units.
    #[must_use]
    pub fn initial_target_distance(&self) -> Decimal {
        (self.initial_take_profit - self.entry_price).abs()
    }

    #[must_use]
    pub fn stop_hit(&self, price: Decimal) -> bool {
        match self.side {
            Side::Long => price <= self.stop_loss,
            Side::Short => price >= self.stop_loss,
        }
    }

    #[must_use]
    pub fn target_hit(&self, price: Decimal) -> bool {
        match self.side {
            Side::Long => price >= self.take_profit,
            Side::Short => price <= self.take_profit,
        }
    }

    /// Whether `candidate` would move the stop in the position's favor.
    #[must_use]
    pub fn improves_stop(&self, candidate: Decimal) -> bool {
        match self.side {
            Side::Long => candidate > self.stop_loss,
            Side::Short => candidate < self.stop_loss,
        }
    }

    /// Whether `candidate` lies further from entry than the current target.
    #[must_use]
    pub fn extends_target(&self, candidate: Decimal) -> bool {
        match self.side {
            Side::Long => candidate > self.take_profit,
            Side::Short => candidate < self.take_profit && candidate > Decimal::ZERO,
        }
    }

    #[must_use]
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.opened_at
    }

    /// Records the leveraged ROI at `price`, raising the peak excursion when exceeded.
    ///
    /// Returns the ROI at `price`.
    pub fn observe(&mut self, price: Decimal, now: DateTime<Utc>) -> Decimal {
        let roi = self.leveraged_roi(price);
        if roi > self.peak_roi {
            self.peak_roi = roi;
            self.last_updated = now;
        }
        roi
    }

    /// Moves the stop to `candidate` only if that is an improvement.
    ///
    /// Returns `true` when the stop changed.
    pub fn tighten_stop(&mut self, candidate: Decimal, now: DateTime<Utc>) -> bool {
        if !self.improves_stop(candidate) {
            return false;
        }
        self.stop_loss = candidate;
        self.last_updated = now;
        true
    }

    /// Moves the target to `candidate` only if it lies further from entry.
    ///
    /// Returns `true` when the target changed.
    pub fn extend_target(&mut self, candidate: Decimal, now: DateTime<Utc>) -> bool {
        if !self.extends_target(candidate) {
            return false;
        }
        self.take_profit = candidate;
        self.last_updated = now;
        self.last_extension_at = Some(now);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn params(side: Side, entry: Decimal, stop: Decimal, target: Decimal) -> PositionParams {
        PositionParams {
            symbol: "BTC".to_string(),
            side,
            entry_price: entry,
            quantity: dec!(0.5),
            leverage: 10,
            stop_loss: stop,
            take_profit: target,
            opened_at: Utc::now(),
        }
    }

    #[test]
    fn constructs_valid_long_and_short() {
        assert!(Position::new(params(Side::Long, dec!(100), dec!(95), dec!(115))).is_ok());
        assert!(Position::new(params(Side::Short, dec!(100), dec!(105), dec!(85))).is_ok());
    }

    #[test]
    fn rejects_non_positive_inputs() {
        let mut p = params(Side::Long, dec!(0), dec!(95), dec!(115));
        assert_eq!(
            Position::new(p.clone()).unwrap_err(),
            PositionError::NonPositiveEntryPrice(dec!(0))
        );

        p.entry_price = dec!(100);
        p.quantity = dec!(-1);
        assert_eq!(
            Position::new(p.clone()).unwrap_err(),
            PositionError::NonPositiveQuantity(dec!(-1))
        );

        p.quantity = dec!(1);
        p.leverage = 0;
        assert_eq!(Position::new(p).unwrap_err(), PositionError::ZeroLeverage);
    }

    #[test]
    fn rejects_mirrored_stop_and_target() {
        let err = Position::new(params(Side::Long, dec!(100), dec!(105), dec!(115))).unwrap_err();
        assert!(matches!(err, PositionError::InvalidStopLoss { .. }));

        let err = Position::new(params(Side::Short, dec!(100), dec!(105), dec!(110))).unwrap_err();
        assert!(matches!(err, PositionError::InvalidTakeProfit { .. }));
    }

    #[test]
    fn leveraged_roi_long() {
        let pos = Position::new(params(Side::Long, dec!(100), dec!(95), dec!(115))).unwrap();
        // +2% price move × 10x
        assert_eq!(pos.signed_return(dec!(102)), dec!(0.02));
        assert_eq!(pos.leveraged_roi(dec!(102)), dec!(0.20));
        assert_eq!(pos.leveraged_roi(dec!(97)), dec!(-0.30));
    }

    #[test]
    fn leveraged_roi_short() {
        let pos = Position::new(params(Side::Short, dec!(100), dec!(105), dec!(85))).unwrap();
        // Price falling is favorable for a short
        assert_eq!(pos.signed_return(dec!(98)), dec!(0.02));
        assert_eq!(pos.leveraged_roi(dec!(98)), dec!(0.20));
        assert_eq!(pos.leveraged_roi(dec!(103)), dec!(-0.30));
    }

    #[test]
    fn roi_equals_return_times_leverage_everywhere() {
        for side in [Side::Long, Side::Short] {
            let (stop, target) = match side {
                Side::Long => (dec!(90), dec!(130)),
                Side::Short => (dec!(110), dec!(70)),
            };
            let pos = Position::new(params(side, dec!(100), stop, target)).unwrap();
            for price in [dec!(80), dec!(95.5), dec!(100), dec!(101.25), dec!(120)] {
                assert_eq!(
                    pos.leveraged_roi(price),
                    pos.signed_return(price) * Decimal::from(pos.leverage())
                );
            }
        }
    }

    #[test]
    fn progress_is_direction_adjusted() {
        let long = Position::new(params(Side::Long, dec!(50000), dec!(49000), dec!(55000))).unwrap();
        assert_eq!(long.progress(dec!(54250)), dec!(0.85));

        let short = Position::new(params(Side::Short, dec!(50000), dec!(51000), dec!(45000))).unwrap();
        assert_eq!(short.progress(dec!(45750)), dec!(0.85));
        assert!(short.progress(dec!(50500)) < Decimal::ZERO);
    }

    #[test]
    fn stop_only_tightens() {
        let now = Utc::now();
        let mut pos = Position::new(params(Side::Long, dec!(100), dec!(95), dec!(115))).unwrap();
        assert!(!pos.tighten_stop(dec!(94), now));
        assert_eq!(pos.stop_loss(), dec!(95));
        assert!(pos.tighten_stop(dec!(98), now));
        assert_eq!(pos.stop_loss(), dec!(98));

        let mut short = Position::new(params(Side::Short, dec!(100), dec!(105), dec!(85))).unwrap();
        assert!(!short.tighten_stop(dec!(106), now));
        assert!(short.tighten_stop(dec!(101), now));
        assert_eq!(short.stop_loss(), dec!(101));
    }

    #[test]
    fn target_only_extends() {
        let now = Utc::now();
        let mut pos = Position::new(params(Side::Short, dec!(100), dec!(105), dec!(85))).unwrap();
        assert!(!pos.extend_target(dec!(90), now));
        assert!(pos.extend_target(dec!(84), now));
        assert_eq!(pos.take_profit(), dec!(84));
        assert_eq!(pos.initial_take_profit(), dec!(85));
        assert_eq!(pos.last_extension_at(), Some(now));
    }

    #[test]
    fn observe_tracks_peak_excursion() {
        let now = Utc::now();
        let mut pos = Position::new(params(Side::Long, dec!(100), dec!(95), dec!(115))).unwrap();
        pos.observe(dec!(103), now);
        pos.observe(dec!(101), now);
        assert_eq!(pos.peak_roi(), dec!(0.30));
    }
}
