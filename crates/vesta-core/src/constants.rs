//! Protocol constants. All durations are in seconds, all amounts in raw
//! fixed-point units (1 token = 10^18 units).

/// Number of decimal places carried by [`Amount`](crate::fixed::Amount).
pub const DECIMALS: u32 = 18;

/// Raw units in one whole token.
pub const UNIT: u128 = 1_000_000_000_000_000_000;

/// Length of one accounting period. Lock ends and reward weeks align to it.
pub const WEEK: u64 = 7 * 86_400;

/// Longest allowed lock duration: four 365-day years.
pub const MAX_TIME: u64 = 4 * 365 * 86_400;

/// Shortest allowed lock duration after week rounding.
pub const MIN_TIME: u64 = WEEK;

/// Waiting period between `initiate_cooldown` and the earliest withdrawal.
pub const COOLDOWN_PERIOD: u64 = MIN_TIME;

/// Round a timestamp down to the start of its week.
///
/// # Examples
///
/// ```
/// use vesta_core::constants::{week_floor, WEEK};
/// assert_eq!(week_floor(0), 0);
/// assert_eq!(week_floor(WEEK - 1), 0);
/// assert_eq!(week_floor(WEEK * 3 + 17), WEEK * 3);
/// ```
pub fn week_floor(ts: u64) -> u64 {
    ts / WEEK * WEEK
}
