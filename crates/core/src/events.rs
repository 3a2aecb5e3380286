use crate::position::Side;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Direction proposed by a signal source or classifier.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SignalDirection {
    Long,
    Short,
    Hold,
}

impl SignalDirection {
    /// Position side this direction opens, `None` for `Hold`.
    #[must_use]
    pub const fn side(self) -> Option<Side> {
        match self {
            Self::Long => Some(Side::Long),
            Self::Short => Some(Side::Short),
            Self::Hold => None,
        }
    }
}

impl From<Side> for SignalDirection {
    fn from(side: Side) -> Self {
        match side {
            Side::Long => Self::Long,
            Side::Short => Self::Short,
        }
    }
}

impl std::fmt::Display for SignalDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Long => write!(f, "long"),
            Self::Short => write!(f, "short"),
            Self::Hold => write!(f, "hold"),
        }
    }
}

/// Unvalidated payload as returned by a signal collaborator.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RawSignal {
    pub direction: SignalDirection,
    pub confidence: f64,
    pub volatility: f64,
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum SignalError {
    #[error("confidence {0} outside [0, 1]")]
    ConfidenceOutOfRange(f64),

    #[error("volatility {0} must be finite and non-negative")]
    InvalidVolatility(f64),
}

/// A signal that passed boundary validation.
///
/// Confidence is guaranteed to lie in `[0, 1]` and volatility to be finite and
/// non-negative, so downstream code never re-checks them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SignalReading {
    direction: SignalDirection,
    confidence: Decimal,
    volatility: Decimal,
}

impl SignalReading {
    /// Neutral reading: hold with zero confidence.
    #[must_use]
    pub const fn neutral() -> Self {
        Self {
            direction: SignalDirection::Hold,
            confidence: Decimal::ZERO,
            volatility: Decimal::ZERO,
        }
    }

    #[must_use]
    pub const fn direction(&self) -> SignalDirection {
        self.direction
    }

    #[must_use]
    pub const fn confidence(&self) -> Decimal {
        self.confidence
    }

    #[must_use]
    pub const fn volatility(&self) -> Decimal {
        self.volatility
    }

    /// Whether this reading points in `side`'s direction with at least `threshold` confidence.
    #[must_use]
    pub fn favors(&self, side: Side, threshold: Decimal) -> bool {
        self.direction.side() == Some(side) && self.confidence >= threshold
    }
}

impl TryFrom<RawSignal> for SignalReading {
    type Error = SignalError;

    fn try_from(raw: RawSignal) -> Result<Self, Self::Error> {
        if !raw.confidence.is_finite() || !(0.0..=1.0).contains(&raw.confidence) {
            return Err(SignalError::ConfidenceOutOfRange(raw.confidence));
        }
        if !raw.volatility.is_finite() || raw.volatility < 0.0 {
            return Err(SignalError::InvalidVolatility(raw.volatility));
        }
        let confidence = Decimal::try_from(raw.confidence)
            .map_err(|_| SignalError::ConfidenceOutOfRange(raw.confidence))?;
        let volatility = Decimal::try_from(raw.volatility)
            .map_err(|_| SignalError::InvalidVolatility(raw.volatility))?;

        Ok(Self {
            direction: raw.direction,
            confidence,
            volatility,
        })
    }
}

/// Feature vector handed to the classifier collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Features(pub Vec<f64>);

impl Features {
    /// Features derived from a validated signal reading.
    #[must_use]
    pub fn from_reading(reading: &SignalReading) -> Self {
        let direction = match reading.direction() {
            SignalDirection::Long => 1.0,
            SignalDirection::Short => -1.0,
            SignalDirection::Hold => 0.0,
        };
        let confidence = f64::try_from(reading.confidence()).unwrap_or_default();
        let volatility = f64::try_from(reading.volatility()).unwrap_or_default();
        Self(vec![direction, confidence, volatility])
    }
}

/// Output of the classifier collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub direction: SignalDirection,
    pub confidence: f64,
}

/// A ranked trade opportunity published by the scanner.
#[derive(Debug, Clone, Serialize)]
pub struct TradeCandidate {
    pub symbol: String,
    pub direction: SignalDirection,
    pub confidence: Decimal,
    pub volatility: Decimal,
    pub score: Decimal,
    pub reference_price: Decimal,
    pub features: Features,
    pub generated_at: DateTime<Utc>,
}

/// Why a position was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    StopLoss,
    TakeProfit,
    EmergencySevere,
    EmergencyModerate,
    EmergencyEarly,
    ProfitProtect,
    Shutdown,
    Manual,
}

impl CloseReason {
    /// Whether this close came from a failsafe emergency tier.
    #[must_use]
    pub const fn is_emergency(self) -> bool {
        matches!(
            self,
            Self::EmergencySevere | Self::EmergencyModerate | Self::EmergencyEarly
        )
    }
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StopLoss => write!(f, "stop_loss"),
            Self::TakeProfit => write!(f, "take_profit"),
            Self::EmergencySevere => write!(f, "emergency_severe"),
            Self::EmergencyModerate => write!(f, "emergency_moderate"),
            Self::EmergencyEarly => write!(f, "emergency_early"),
            Self::ProfitProtect => write!(f, "profit_protect"),
            Self::Shutdown => write!(f, "shutdown"),
            Self::Manual => write!(f, "manual"),
        }
    }
}

/// Realized outcome of a closed position.
#[derive(Debug, Clone, Serialize)]
pub struct ClosedTrade {
    pub symbol: String,
    pub side: Side,
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    pub quantity: Decimal,
    pub leverage: u32,
    pub pnl: Decimal,
    pub roi: Decimal,
    pub peak_roi: Decimal,
    pub reason: CloseReason,
    pub opened_at: DateTime<Utc>,
    pub closed_at: DateTime<Utc>,
    #[serde(skip)]
    pub features: Option<Features>,
}

impl ClosedTrade {
    #[must_use]
    pub fn is_win(&self) -> bool {
        self.pnl > Decimal::ZERO
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "buy"),
            Self::Sell => write!(f, "sell"),
        }
    }
}

/// Market order request sent to the exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: Decimal,
    pub leverage: u32,
    pub reduce_only: bool,
}

/// Exchange acknowledgement of a filled market order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: Decimal,
    pub avg_price: Decimal,
    pub fee: Decimal,
    pub reduce_only: bool,
    pub timestamp: DateTime<Utc>,
}

/// Account balance in quote currency.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Balance {
    pub free: Decimal,
    pub used: Decimal,
    pub total: Decimal,
}
