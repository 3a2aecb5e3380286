//! Per-position state machine.

use chrono::{DateTime, Utc};
use perp_sentinel_core::{ExitPolicy, Position, SignalReading};
use rust_decimal::Decimal;

use crate::stops::check_exit_rules;
use crate::targets::check_adjustments;
use crate::types::{Adjustment, Decision};

/// Evaluates one position at one price.
///
/// Exit rules are checked first in fixed priority order (hard stop, take
/// profit, emergency tiers, stall tightening, profit lock); only when none
/// matches does the stop/target adjuster run.
pub fn evaluate(
    pos: &Position,
    price: Decimal,
    now: DateTime<Utc>,
    momentum: &SignalReading,
    policy: &ExitPolicy,
) -> Decision {
    if let Some(decision) = check_exit_rules(pos, price, now, policy) {
        return decision;
    }
    check_adjustments(pos, price, now, momentum, policy).map_or(Decision::Hold, Decision::Adjust)
}

/// Applies an adjustment, ignoring any level that would loosen risk.
///
/// Returns `true` when the position changed.
pub fn apply_adjustment(pos: &mut Position, adjustment: &Adjustment, now: DateTime<Utc>) -> bool {
    let stop_moved = pos.tighten_stop(adjustment.stop_loss, now);
    let target_moved = pos.extend_target(adjustment.take_profit, now);
    stop_moved || target_moved
}
