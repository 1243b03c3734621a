//! Linear vote-escrow decay curve.
//!
//! A lock of `amount` ending at `end` contributes
//! `slope = amount / MAX_TIME` and `bias = slope * (end - now)`, reaching zero
//! exactly at `end`. The global curve is the sum of every account curve and is
//! maintained incrementally from per-call deltas.
//! All arithmetic is integer-only; the slope division truncates.

use vesta_core::constants::MAX_TIME;
use vesta_core::error::VestaError;
use vesta_core::fixed::Amount;
use vesta_core::types::{LockedBalance, Point, Timestamp};

/// Per-second decay for a locked amount.
///
/// # Examples
///
/// ```
/// use vesta_core::constants::MAX_TIME;
/// use vesta_core::fixed::Amount;
/// use vesta_escrow::curve::slope_for;
/// assert_eq!(slope_for(Amount::from_raw(MAX_TIME as u128 * 3)), Amount::from_raw(3));
/// assert_eq!(slope_for(Amount::from_raw(MAX_TIME as u128 - 1)), Amount::ZERO);
/// ```
pub fn slope_for(amount: Amount) -> Amount {
    // MAX_TIME is a nonzero constant.
    amount.checked_div_int(MAX_TIME).unwrap_or(Amount::ZERO)
}

/// The checkpoint an account's lock produces at `now`.
///
/// Locks that are empty, expired, or in cooldown produce a zero point.
pub fn lock_point(lock: &LockedBalance, now: Timestamp, blk: u64) -> Result<Point, VestaError> {
    if !lock.is_active(now) {
        return Ok(Point {
            bias: Amount::ZERO,
            slope: Amount::ZERO,
            ts: now,
            blk,
        });
    }
    let slope = slope_for(lock.amount);
    let bias = slope
        .checked_mul_int(lock.end - now)
        .ok_or(VestaError::ArithmeticOverflow)?;
    Ok(Point {
        bias,
        slope,
        ts: now,
        blk,
    })
}

/// Replace an account's old contribution to `global` with its new one.
///
/// Both account points must be evaluated at `global.ts`. Results clamp at zero.
pub fn apply_delta(global: Point, old: &Point, new: &Point) -> Point {
    Point {
        bias: global.bias.saturating_add(new.bias).saturating_sub(old.bias),
        slope: global.slope.saturating_add(new.slope).saturating_sub(old.slope),
        ..global
    }
}

/// Decay `point` forward to `to` under its current slope.
pub fn decay_to(point: Point, to: Timestamp) -> Point {
    Point {
        bias: point.power_at(to),
        ts: to.max(point.ts),
        ..point
    }
}

/// Block number at `t`, interpolated between two observed chain positions.
///
/// Used for the week-boundary points written while replaying the global
/// curve across periods with no activity.
pub fn interpolate_block(from: &Point, to_ts: Timestamp, to_blk: u64, t: Timestamp) -> u64 {
    if to_ts <= from.ts || to_blk <= from.blk {
        return from.blk;
    }
    let span = (to_ts - from.ts) as u128;
    let elapsed = (t.min(to_ts).saturating_sub(from.ts)) as u128;
    let blocks = (to_blk - from.blk) as u128;
    from.blk + (blocks * elapsed / span) as u64
}
