//! Append-only checkpoint logs and historical queries.
//!
//! The global curve and every account curve are stored as logs of [`Point`]s
//! addressed by epoch. Global epoch 0 is the genesis point written at
//! initialisation; account logs start at user epoch 0. Lookups binary-search
//! for the newest point at or before the queried time and decay forward from
//! it. Total-supply lookups additionally replay the week-aligned slope-change
//! schedule so that locks expiring in between are dropped from the slope.
//!
//! A point is never rewritten except when a later call in the same block
//! (same block number and timestamp) amends the newest entry of a log.

use vesta_core::constants::{WEEK, week_floor};
use vesta_core::error::{StoreError, VestaError};
use vesta_core::fixed::Amount;
use vesta_core::store::{StagedState, StateRead, StateReadExt, StorageKey};
use vesta_core::types::{Address, BlockContext, LockedBalance, Point, Timestamp};

use crate::curve::{apply_delta, interpolate_block, lock_point};

/// Random access to an epoch-indexed checkpoint log.
pub trait PointLog {
    /// Number of points in the log.
    fn len(&self) -> Result<u64, VestaError>;

    /// The point at `epoch`. Errors if `epoch >= len()`.
    fn point(&self, epoch: u64) -> Result<Point, VestaError>;

    fn is_empty(&self) -> Result<bool, VestaError> {
        Ok(self.len()? == 0)
    }
}

impl PointLog for [Point] {
    fn len(&self) -> Result<u64, VestaError> {
        Ok(<[Point]>::len(self) as u64)
    }

    fn point(&self, epoch: u64) -> Result<Point, VestaError> {
        self.get(epoch as usize)
            .copied()
            .ok_or_else(|| StoreError::Missing(format!("point {epoch}")).into())
    }
}

/// Latest epoch whose point has `ts <= t`, or `None` if the log is empty or
/// starts after `t`.
///
/// # Examples
///
/// ```
/// use vesta_core::types::Point;
/// use vesta_escrow::history::find_epoch;
/// let log: Vec<Point> = [10, 20, 20, 30]
///     .iter()
///     .map(|&ts| Point { ts, ..Point::default() })
///     .collect();
/// assert_eq!(find_epoch(log.as_slice(), 5).unwrap(), None);
/// assert_eq!(find_epoch(log.as_slice(), 20).unwrap(), Some(2));
/// assert_eq!(find_epoch(log.as_slice(), 99).unwrap(), Some(3));
/// ```
pub fn find_epoch<L: PointLog + ?Sized>(log: &L, t: Timestamp) -> Result<Option<u64>, VestaError> {
    let len = log.len()?;
    if len == 0 || log.point(0)?.ts > t {
        return Ok(None);
    }
    let (mut lo, mut hi) = (0u64, len - 1);
    while lo < hi {
        let mid = lo + (hi - lo).div_ceil(2);
        if log.point(mid)?.ts <= t {
            lo = mid;
        } else {
            hi = mid - 1;
        }
    }
    Ok(Some(lo))
}

/// The global checkpoint log in storage.
pub struct GlobalLog<'a, R: StateRead + ?Sized> {
    state: &'a R,
}

impl<'a, R: StateRead + ?Sized> GlobalLog<'a, R> {
    pub fn new(state: &'a R) -> Self {
        Self { state }
    }
}

impl<R: StateRead + ?Sized> PointLog for GlobalLog<'_, R> {
    fn len(&self) -> Result<u64, VestaError> {
        Ok(self
            .state
            .load::<u64>(&StorageKey::GlobalEpoch)?
            .map_or(0, |epoch| epoch + 1))
    }

    fn point(&self, epoch: u64) -> Result<Point, VestaError> {
        self.state
            .load(&StorageKey::GlobalPoint(epoch))?
            .ok_or_else(|| StoreError::Missing(format!("global point {epoch}")).into())
    }
}

/// One account's checkpoint log in storage.
pub struct UserLog<'a, R: StateRead + ?Sized> {
    state: &'a R,
    account: Address,
}

impl<'a, R: StateRead + ?Sized> UserLog<'a, R> {
    pub fn new(state: &'a R, account: Address) -> Self {
        Self { state, account }
    }
}

impl<R: StateRead + ?Sized> PointLog for UserLog<'_, R> {
    fn len(&self) -> Result<u64, VestaError> {
        Ok(self.state.load_or_default(&StorageKey::UserEpochCount(self.account))?)
    }

    fn point(&self, epoch: u64) -> Result<Point, VestaError> {
        self.state
            .load(&StorageKey::UserPoint(self.account, epoch))?
            .ok_or_else(|| {
                StoreError::Missing(format!("point {epoch} of {}", self.account)).into()
            })
    }
}

/// Pending global slope decrease scheduled at `t`.
pub fn slope_change<R: StateRead + ?Sized>(state: &R, t: Timestamp) -> Result<Amount, VestaError> {
    Ok(state.load_or_default(&StorageKey::SlopeChange(t))?)
}

fn set_slope_change<R: StateRead + ?Sized>(
    staged: &mut StagedState<'_, R>,
    t: Timestamp,
    value: Amount,
) -> Result<(), VestaError> {
    if value.is_zero() {
        staged.remove(&StorageKey::SlopeChange(t))?;
    } else {
        staged.store(&StorageKey::SlopeChange(t), &value)?;
    }
    Ok(())
}

/// Decay the global `point` forward to `t`, dropping scheduled slope at each
/// week boundary crossed.
pub fn supply_at<R: StateRead + ?Sized>(
    state: &R,
    point: Point,
    t: Timestamp,
) -> Result<Amount, VestaError> {
    let mut last = point;
    if t <= last.ts {
        return Ok(last.bias);
    }
    let mut t_i = week_floor(last.ts);
    loop {
        t_i = t_i.saturating_add(WEEK);
        let mut d_slope = Amount::ZERO;
        if t_i > t {
            t_i = t;
        } else {
            d_slope = slope_change(state, t_i)?;
        }
        last.bias = last
            .bias
            .saturating_sub(last.slope.saturating_mul_int(t_i - last.ts));
        if t_i == t || last.bias.is_zero() {
            break;
        }
        last.slope = last.slope.saturating_sub(d_slope);
        last.ts = t_i;
        if last.slope.is_zero() {
            break;
        }
    }
    Ok(last.bias)
}

/// Voting power of `account` at `t`.
pub fn account_power_at<R: StateRead + ?Sized>(
    state: &R,
    account: Address,
    t: Timestamp,
) -> Result<Amount, VestaError> {
    let log = UserLog::new(state, account);
    match find_epoch(&log, t)? {
        Some(epoch) => Ok(log.point(epoch)?.power_at(t)),
        None => Ok(Amount::ZERO),
    }
}

/// Total voting power at `t`.
pub fn total_power_at<R: StateRead + ?Sized>(state: &R, t: Timestamp) -> Result<Amount, VestaError> {
    let log = GlobalLog::new(state);
    match find_epoch(&log, t)? {
        Some(epoch) => supply_at(state, log.point(epoch)?, t),
        None => Ok(Amount::ZERO),
    }
}

/// A lock transition to fold into the curves.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LockChange {
    pub account: Address,
    pub old: LockedBalance,
    pub new: LockedBalance,
}

/// Bring the global curve up to `block` and, if given, apply one account's
/// lock change.
///
/// Week boundaries crossed since the last global checkpoint are written as
/// their own points, with block numbers interpolated between the last
/// checkpoint and `block`. Returns the new head of the global log.
pub fn checkpoint<R: StateRead + ?Sized>(
    staged: &mut StagedState<'_, R>,
    block: &BlockContext,
    change: Option<&LockChange>,
) -> Result<Point, VestaError> {
    let now = block.timestamp;
    let curves = match change {
        Some(c) => Some((
            lock_point(&c.old, now, block.number)?,
            lock_point(&c.new, now, block.number)?,
        )),
        None => None,
    };

    let mut epoch: u64 = staged
        .load(&StorageKey::GlobalEpoch)?
        .ok_or(VestaError::NotInitialized)?;
    let head = GlobalLog::new(&*staged).point(epoch)?;

    // Replay the global curve week by week up to now.
    let mut point = head;
    let mut fillers = Vec::new();
    let mut t_i = week_floor(point.ts);
    loop {
        t_i = t_i.saturating_add(WEEK);
        let mut d_slope = Amount::ZERO;
        if t_i > now || point.slope.is_zero() {
            t_i = now;
        } else {
            d_slope = slope_change(&*staged, t_i)?;
        }
        point.bias = point
            .bias
            .saturating_sub(point.slope.saturating_mul_int(t_i.saturating_sub(point.ts)));
        point.slope = point.slope.saturating_sub(d_slope);
        point.ts = t_i.max(point.ts);
        if t_i >= now {
            point.blk = block.number;
            break;
        }
        point.blk = interpolate_block(&head, now, block.number, t_i);
        fillers.push(point);
    }

    if let Some((u_old, u_new)) = &curves {
        point = apply_delta(point, u_old, u_new);
    }

    for filler in &fillers {
        epoch += 1;
        staged.store(&StorageKey::GlobalPoint(epoch), filler)?;
    }
    let amend = fillers.is_empty() && head.blk == block.number && head.ts == now;
    if !amend {
        epoch += 1;
    }
    staged.store(&StorageKey::GlobalPoint(epoch), &point)?;
    staged.store(&StorageKey::GlobalEpoch, &epoch)?;

    if let (Some(c), Some((u_old, u_new))) = (change, curves) {
        schedule_slope_changes(staged, now, c, &u_old, &u_new)?;
        append_user_point(staged, c.account, &u_new)?;
    }
    Ok(point)
}

/// Move the account's pending slope decrease from its old end to its new end.
fn schedule_slope_changes<R: StateRead + ?Sized>(
    staged: &mut StagedState<'_, R>,
    now: Timestamp,
    change: &LockChange,
    u_old: &Point,
    u_new: &Point,
) -> Result<(), VestaError> {
    let (old_end, new_end) = (change.old.end, change.new.end);
    if old_end > now {
        let mut old_dslope = slope_change(&*staged, old_end)?.saturating_sub(u_old.slope);
        if new_end == old_end {
            old_dslope = old_dslope.saturating_add(u_new.slope);
        }
        set_slope_change(staged, old_end, old_dslope)?;
    }
    if new_end > now && new_end > old_end {
        let new_dslope = slope_change(&*staged, new_end)?.saturating_add(u_new.slope);
        set_slope_change(staged, new_end, new_dslope)?;
    }
    Ok(())
}

fn append_user_point<R: StateRead + ?Sized>(
    staged: &mut StagedState<'_, R>,
    account: Address,
    point: &Point,
) -> Result<(), VestaError> {
    let count = UserLog::new(&*staged, account).len()?;
    if count > 0 {
        let last = UserLog::new(&*staged, account).point(count - 1)?;
        if last.blk == point.blk && last.ts == point.ts {
            staged.store(&StorageKey::UserPoint(account, count - 1), point)?;
            return Ok(());
        }
    }
    staged.store(&StorageKey::UserPoint(account, count), point)?;
    staged.store(&StorageKey::UserEpochCount(account), &(count + 1))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use vesta_core::constants::MAX_TIME;
    use vesta_core::store::{MemoryStore, StateStore};

    const T0: Timestamp = 100 * WEEK;

    fn alice() -> Address {
        Address([0xa1; 20])
    }

    fn bob() -> Address {
        Address([0xb0; 20])
    }

    fn genesis(ts: Timestamp) -> MemoryStore {
        let mut store = MemoryStore::new();
        let mut staged = StagedState::new(&store);
        staged.store(&StorageKey::GlobalEpoch, &0u64).unwrap();
        staged
            .store(&StorageKey::GlobalPoint(0), &Point { ts, blk: 1, ..Point::default() })
            .unwrap();
        let batch = staged.into_batch();
        store.write(batch).unwrap();
        store
    }

    fn lock(tokens: u64, end: Timestamp) -> LockedBalance {
        LockedBalance {
            amount: Amount::from_tokens(tokens),
            end,
            ..LockedBalance::default()
        }
    }

    fn apply(store: &mut MemoryStore, ts: Timestamp, blk: u64, change: Option<LockChange>) -> Point {
        let mut staged = StagedState::new(&*store);
        let block = BlockContext { timestamp: ts, number: blk };
        let head = checkpoint(&mut staged, &block, change.as_ref()).unwrap();
        let batch = staged.into_batch();
        store.write(batch).unwrap();
        head
    }

    fn open(account: Address, tokens: u64, end: Timestamp) -> LockChange {
        LockChange {
            account,
            old: LockedBalance::default(),
            new: lock(tokens, end),
        }
    }

    #[test]
    fn find_epoch_on_empty_log() {
        let log: Vec<Point> = Vec::new();
        assert_eq!(find_epoch(log.as_slice(), 10).unwrap(), None);
    }

    #[test]
    fn find_epoch_takes_latest_duplicate() {
        let log: Vec<Point> = [5, 5, 5]
            .iter()
            .map(|&ts| Point { ts, ..Point::default() })
            .collect();
        assert_eq!(find_epoch(log.as_slice(), 5).unwrap(), Some(2));
        assert_eq!(find_epoch(log.as_slice(), 4).unwrap(), None);
    }

    #[test]
    fn missing_slice_point_is_store_error() {
        let log: Vec<Point> = Vec::new();
        let err = PointLog::point(log.as_slice(), 3).unwrap_err();
        assert!(matches!(err, VestaError::Store(StoreError::Missing(_))));
    }

    #[test]
    fn checkpoint_without_genesis_fails() {
        let store = MemoryStore::new();
        let mut staged = StagedState::new(&store);
        let block = BlockContext { timestamp: T0, number: 1 };
        assert_eq!(checkpoint(&mut staged, &block, None), Err(VestaError::NotInitialized));
    }

    #[test]
    fn lock_schedules_slope_change_at_end() {
        let mut store = genesis(T0);
        let end = T0 + 10 * WEEK;
        let head = apply(&mut store, T0, 2, Some(open(alice(), 1000, end)));
        let slope = Amount::from_tokens(1000).checked_div_int(MAX_TIME).unwrap();
        assert_eq!(head.slope, slope);
        assert_eq!(slope_change(&store, end).unwrap(), slope);
        assert_eq!(UserLog::new(&store, alice()).len().unwrap(), 1);
    }

    #[test]
    fn same_block_amends_instead_of_appending() {
        let mut store = genesis(T0);
        apply(&mut store, T0 + 10, 2, Some(open(alice(), 10, T0 + 5 * WEEK)));
        let epoch_after_first: u64 = store.load(&StorageKey::GlobalEpoch).unwrap().unwrap();

        let change = LockChange {
            account: alice(),
            old: lock(10, T0 + 5 * WEEK),
            new: lock(20, T0 + 5 * WEEK),
        };
        apply(&mut store, T0 + 10, 2, Some(change));
        let epoch_after_second: u64 = store.load(&StorageKey::GlobalEpoch).unwrap().unwrap();

        assert_eq!(epoch_after_first, epoch_after_second);
        assert_eq!(UserLog::new(&store, alice()).len().unwrap(), 1);
        assert_eq!(
            account_power_at(&store, alice(), T0 + 10).unwrap(),
            lock_point(&lock(20, T0 + 5 * WEEK), T0 + 10, 2).unwrap().bias
        );
    }

    #[test]
    fn idle_weeks_are_backfilled_with_interpolated_blocks() {
        let mut store = genesis(T0);
        apply(&mut store, T0, 10, Some(open(alice(), 1000, T0 + 10 * WEEK)));
        let before: u64 = store.load(&StorageKey::GlobalEpoch).unwrap().unwrap();
        apply(&mut store, T0 + 3 * WEEK, 40, None);
        let after: u64 = store.load(&StorageKey::GlobalEpoch).unwrap().unwrap();
        // Two week boundaries strictly before now plus the head.
        assert_eq!(after - before, 3);
        let log = GlobalLog::new(&store);
        assert_eq!(log.point(before + 1).unwrap().ts, T0 + WEEK);
        assert_eq!(log.point(before + 1).unwrap().blk, 20);
        assert_eq!(log.point(before + 2).unwrap().blk, 30);
        assert_eq!(log.point(after).unwrap().blk, 40);
    }

    #[test]
    fn supply_drops_expired_locks_between_checkpoints() {
        let mut store = genesis(T0);
        apply(&mut store, T0, 2, Some(open(alice(), 1000, T0 + 2 * WEEK)));
        apply(&mut store, T0, 3, Some(open(bob(), 1000, T0 + 8 * WEEK)));
        // No checkpoint after T0; the replay must apply alice's slope change.
        let t = T0 + 5 * WEEK;
        let expected = account_power_at(&store, alice(), t)
            .unwrap()
            .saturating_add(account_power_at(&store, bob(), t).unwrap());
        assert_eq!(account_power_at(&store, alice(), t).unwrap(), Amount::ZERO);
        assert_eq!(total_power_at(&store, t).unwrap(), expected);
    }

    #[test]
    fn supply_before_genesis_is_zero() {
        let mut store = genesis(T0);
        apply(&mut store, T0, 2, Some(open(alice(), 1000, T0 + 2 * WEEK)));
        assert_eq!(total_power_at(&store, T0 - 1).unwrap(), Amount::ZERO);
        assert_eq!(account_power_at(&store, alice(), T0 - 1).unwrap(), Amount::ZERO);
    }

    #[test]
    fn extension_moves_slope_change() {
        let mut store = genesis(T0);
        let (e1, e2) = (T0 + 4 * WEEK, T0 + 9 * WEEK);
        apply(&mut store, T0, 2, Some(open(alice(), 500, e1)));
        let change = LockChange {
            account: alice(),
            old: lock(500, e1),
            new: lock(500, e2),
        };
        apply(&mut store, T0 + WEEK, 3, Some(change));
        assert_eq!(slope_change(&store, e1).unwrap(), Amount::ZERO);
        assert!(store.get(&StorageKey::SlopeChange(e1).to_bytes().unwrap()).unwrap().is_none());
        assert_eq!(
            slope_change(&store, e2).unwrap(),
            Amount::from_tokens(500).checked_div_int(MAX_TIME).unwrap()
        );
    }

    #[test]
    fn closing_a_lock_leaves_zero_user_point() {
        let mut store = genesis(T0);
        let end = T0 + 2 * WEEK;
        apply(&mut store, T0, 2, Some(open(alice(), 10, end)));
        let change = LockChange {
            account: alice(),
            old: lock(10, end),
            new: LockedBalance::default(),
        };
        apply(&mut store, end + 5, 9, Some(change));
        let log = UserLog::new(&store, alice());
        assert_eq!(log.len().unwrap(), 2);
        assert_eq!(log.point(1).unwrap().bias, Amount::ZERO);
        assert_eq!(total_power_at(&store, end + 5).unwrap(), Amount::ZERO);
    }
}
