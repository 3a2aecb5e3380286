//! Dynamic stop/target adjuster.
//!
//! Stops ratchet in the position's favor: to breakeven once half the way to the
//! initial target, then trailing by the initial stop distance. Targets only
//! extend, only on strongly favorable momentum, and by a cap that shrinks as
//! price approaches the target.

use chrono::{DateTime, Utc};
use perp_sentinel_core::{ExitPolicy, Position, SignalReading};
use rust_decimal::Decimal;

use crate::types::Adjustment;

/// Computes stop and target moves for a position that is not exiting.
///
/// Returns `None` when neither level would change.
pub fn check_adjustments(
    pos: &Position,
    price: Decimal,
    now: DateTime<Utc>,
    momentum: &SignalReading,
    policy: &ExitPolicy,
) -> Option<Adjustment> {
    let progress = pos.progress(price);

    let stop = stop_candidate(pos, price, progress, policy)
        .filter(|candidate| pos.improves_stop(*candidate));
    let target = target_candidate(pos, progress, now, momentum, policy)
        .filter(|candidate| pos.extends_target(*candidate));

    if stop.is_none() && target.is_none() {
        return None;
    }

    Some(Adjustment {
        stop_loss: stop.unwrap_or_else(|| pos.stop_loss()),
        take_profit: target.unwrap_or_else(|| pos.take_profit()),
    })
}

/// Extension cap for a given progress, as a fraction of the current target distance.
#[must_use]
pub fn extension_cap(progress: Decimal, policy: &ExitPolicy) -> Decimal {
    if progress >= Decimal::ONE {
        policy.beyond_target_extension
    } else if progress >= policy.near_target_progress || progress >= policy.freeze_progress {
        policy.near_target_extension
    } else if progress >= policy.mid_progress {
        policy.mid_extension
    } else {
        policy.early_extension
    }
}

fn stop_candidate(
    pos: &Position,
    price: Decimal,
    progress: Decimal,
    policy: &ExitPolicy,
) -> Option<Decimal> {
    if progress >= policy.trail_progress {
        let trail_gap = pos.initial_stop_distance() * pos.entry_price();
        let trailing = price - pos.side().sign() * trail_gap;
        // Trailing never sits worse than breakeven once engaged.
        let breakeven = pos.entry_price();
        Some(if pos.side().sign() > Decimal::ZERO {
            trailing.max(breakeven)
        } else {
            trailing.min(breakeven)
        })
    } else if progress >= policy.breakeven_progress {
        Some(pos.entry_price())
    } else {
        None
    }
}

fn target_candidate(
    pos: &Position,
    progress: Decimal,
    now: DateTime<Utc>,
    momentum: &SignalReading,
    policy: &ExitPolicy,
) -> Option<Decimal> {
    if !momentum.favors(pos.side(), policy.momentum_threshold) {
        return None;
    }
    if let Some(last) = pos.last_extension_at() {
        let cooldown = chrono::Duration::from_std(policy.extension_cooldown()).ok()?;
        if now - last < cooldown {
            return None;
        }
    }

    let current = pos.target_distance();
    let ceiling = pos.initial_target_distance() * (Decimal::ONE + policy.max_total_extension);
    let room = ceiling - current;
    if room <= Decimal::ZERO {
        return None;
    }

    let extension = (current * extension_cap(progress, policy) * momentum.confidence()).min(room);
    if extension <= Decimal::ZERO {
        return None;
    }
    Some(pos.take_profit() + pos.side().sign() * extension)
}
