//! Decision types produced by the exit state machine.

use perp_sentinel_core::CloseReason;
use rust_decimal::Decimal;
use serde::Serialize;

/// New protective levels for a position.
///
/// Values are absolute prices. Applying an adjustment never loosens risk:
/// a stop that does not improve or a target that does not extend is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Adjustment {
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
}

/// Outcome of evaluating one position at one price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Decision {
    Hold,
    Adjust(Adjustment),
    Close(CloseReason),
}

impl Decision {
    #[must_use]
    pub const fn close_reason(&self) -> Option<CloseReason> {
        match self {
            Self::Close(reason) => Some(*reason),
            _ => None,
        }
    }
}
