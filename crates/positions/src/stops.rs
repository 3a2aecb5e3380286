//! Exit rules: hard levels, emergency loss tiers, stall tightening and profit lock.

use chrono::{DateTime, Utc};
use perp_sentinel_core::{CloseReason, ExitPolicy, Position, Side};
use rust_decimal::Decimal;

use crate::types::{Adjustment, Decision};

/// Checks the exit rules in priority order. The first rule that matches wins.
///
/// `pos.peak_roi()` must already include `price` (see [`Position::observe`]).
pub fn check_exit_rules(
    pos: &Position,
    price: Decimal,
    now: DateTime<Utc>,
    policy: &ExitPolicy,
) -> Option<Decision> {
    if pos.stop_hit(price) {
        return Some(Decision::Close(CloseReason::StopLoss));
    }
    if pos.target_hit(price) {
        return Some(Decision::Close(CloseReason::TakeProfit));
    }

    let roi = pos.leveraged_roi(price);
    if let Some(reason) = check_emergency(roi, policy) {
        tracing::warn!(
            symbol = pos.symbol(),
            roi = %roi,
            reason = %reason,
            "Emergency loss tier triggered"
        );
        return Some(Decision::Close(reason));
    }

    if let Some(stop) = check_stall(pos, price, now, policy) {
        tracing::info!(
            symbol = pos.symbol(),
            age_mins = pos.age(now).num_minutes(),
            old_stop = %pos.stop_loss(),
            new_stop = %stop,
            "Stalled position, tightening stop"
        );
        return Some(Decision::Adjust(Adjustment {
            stop_loss: stop,
            take_profit: pos.take_profit(),
        }));
    }

    if check_profit_lock(pos, roi, policy) {
        tracing::info!(
            symbol = pos.symbol(),
            roi = %roi,
            peak_roi = %pos.peak_roi(),
            "Momentum lost, locking profit"
        );
        return Some(Decision::Close(CloseReason::ProfitProtect));
    }

    None
}

/// Deepest emergency tier reached by `roi`, if any.
fn check_emergency(roi: Decimal, policy: &ExitPolicy) -> Option<CloseReason> {
    if roi <= policy.emergency_severe_roi {
        Some(CloseReason::EmergencySevere)
    } else if roi <= policy.emergency_moderate_roi {
        Some(CloseReason::EmergencyModerate)
    } else if roi <= policy.emergency_early_roi {
        Some(CloseReason::EmergencyEarly)
    } else {
        None
    }
}

/// Tightened stop for a position that has not moved for `stall_after`.
///
/// Closes `stall_tighten_fraction` of the gap between stop and breakeven, but
/// never to or past the current price.
fn check_stall(
    pos: &Position,
    price: Decimal,
    now: DateTime<Utc>,
    policy: &ExitPolicy,
) -> Option<Decimal> {
    let stall_after = chrono::Duration::from_std(policy.stall_after()).ok()?;
    if pos.age(now) < stall_after || now - pos.last_updated() < stall_after {
        return None;
    }
    if pos.peak_roi() >= policy.stall_min_roi {
        return None;
    }

    let stop = pos.stop_loss();
    let fraction = policy.stall_tighten_fraction;
    let toward_entry = stop + (pos.entry_price() - stop) * fraction;
    let losing_side = match pos.side() {
        Side::Long => toward_entry < price,
        Side::Short => toward_entry > price,
    };
    let candidate = if losing_side {
        toward_entry
    } else {
        stop + (price - stop) * fraction
    };

    pos.improves_stop(candidate).then_some(candidate)
}

/// Peak ROI was meaningful and the position has given back too much of it.
fn check_profit_lock(pos: &Position, roi: Decimal, policy: &ExitPolicy) -> bool {
    let peak = pos.peak_roi();
    peak >= policy.profit_lock_min_peak && roi <= peak * (Decimal::ONE - policy.profit_lock_retrace)
}
