//! The vote-escrow lock manager.
//!
//! [`VoteEscrow`] owns the lock lifecycle (NoLock → Locked → CooldownInitiated
//! → withdrawn) and the checkpoint writes each transition triggers. Every
//! mutation validates first, stages its writes, performs the asset transfer,
//! and only then commits the batch; a rejected call leaves storage untouched.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use vesta_core::constants::{COOLDOWN_PERIOD, MAX_TIME, MIN_TIME, week_floor};
use vesta_core::error::{LockError, VestaError};
use vesta_core::fixed::Amount;
use vesta_core::store::{StagedState, StateReadExt, StateStore, StorageKey, WriteBatch};
use vesta_core::traits::{AssetLedger, VotingPowerSource};
use vesta_core::types::{Address, BlockContext, CallContext, LockedBalance, Point, Timestamp};

use crate::history::{self, GlobalLog, LockChange, PointLog, UserLog};

/// Parameters fixed at initialisation.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct EscrowConfig {
    /// Asset accepted for locking.
    pub token: Address,
    /// Ledger address holding locked deposits.
    pub escrow: Address,
    /// Free-form deployment version tag.
    pub version: String,
}

/// Vote-escrow engine over a keyed state store.
pub struct VoteEscrow<S: StateStore> {
    store: S,
    config: EscrowConfig,
}

impl<S: StateStore> VoteEscrow<S> {
    /// Write the escrow configuration and the genesis global point.
    pub fn initialize(
        mut store: S,
        token: Address,
        escrow: Address,
        version: impl Into<String>,
        block: &BlockContext,
    ) -> Result<Self, VestaError> {
        if token.is_zero() {
            return Err(VestaError::ZeroAddress("token"));
        }
        if escrow.is_zero() {
            return Err(VestaError::ZeroAddress("escrow"));
        }
        if store.load::<EscrowConfig>(&StorageKey::EscrowConfig)?.is_some() {
            return Err(VestaError::AlreadyInitialized);
        }

        let config = EscrowConfig {
            token,
            escrow,
            version: version.into(),
        };
        let genesis = Point {
            bias: Amount::ZERO,
            slope: Amount::ZERO,
            ts: block.timestamp,
            blk: block.number,
        };
        let batch = {
            let mut staged = StagedState::new(&store);
            staged.store(&StorageKey::EscrowConfig, &config)?;
            staged.store(&StorageKey::GlobalEpoch, &0u64)?;
            staged.store(&StorageKey::GlobalPoint(0), &genesis)?;
            staged.into_batch()
        };
        store.write(batch)?;

        info!(%token, %escrow, version = %config.version, ts = block.timestamp, "escrow initialized");
        Ok(Self { store, config })
    }

    /// Reopen a previously initialised escrow.
    pub fn open(store: S) -> Result<Self, VestaError> {
        let config = store
            .load::<EscrowConfig>(&StorageKey::EscrowConfig)?
            .ok_or(VestaError::NotInitialized)?;
        Ok(Self { store, config })
    }

    pub fn config(&self) -> &EscrowConfig {
        &self.config
    }

    /// Ledger address holding locked deposits.
    pub fn address(&self) -> Address {
        self.config.escrow
    }

    pub fn token(&self) -> Address {
        self.config.token
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    // ------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------

    /// Lock `amount` until `unlock_time`, rounded down to a week boundary.
    pub fn create_lock(
        &mut self,
        ctx: &CallContext,
        amount: Amount,
        unlock_time: Timestamp,
        auto_cooldown: bool,
        assets: &mut dyn AssetLedger,
    ) -> Result<(), VestaError> {
        let now = ctx.now();
        let account = ctx.caller;
        if amount.is_zero() {
            return Err(LockError::InvalidAmount.into());
        }
        if unlock_time <= now {
            return Err(LockError::LockInPast.into());
        }
        if unlock_time - now > MAX_TIME {
            return Err(LockError::LockTooLong.into());
        }
        let old = self.locked(&account)?;
        if old.exists() {
            return Err(LockError::ExistingLockFound.into());
        }
        let end = week_floor(unlock_time);
        if end < now.saturating_add(MIN_TIME) {
            return Err(LockError::LockTooShort.into());
        }

        let new = LockedBalance {
            amount,
            end,
            auto_cooldown,
            cooldown_initiated: false,
            cooldown_end: 0,
        };
        let batch = self.stage_lock_change(&ctx.block, account, old, new)?;
        let escrow = self.config.escrow;
        self.commit(batch, assets, &account, &escrow, amount)?;

        debug!(%account, %amount, end, auto_cooldown, "lock created");
        Ok(())
    }

    /// Add `amount` to the caller's lock without changing its end.
    pub fn increase_amount(
        &mut self,
        ctx: &CallContext,
        amount: Amount,
        assets: &mut dyn AssetLedger,
    ) -> Result<(), VestaError> {
        let caller = ctx.caller;
        self.deposit_for(ctx, &caller, &caller, amount, assets)
    }

    /// Add `amount`, paid by `payer`, to `account`'s active lock.
    pub fn deposit_for(
        &mut self,
        ctx: &CallContext,
        payer: &Address,
        account: &Address,
        amount: Amount,
        assets: &mut dyn AssetLedger,
    ) -> Result<(), VestaError> {
        let now = ctx.now();
        if amount.is_zero() {
            return Err(LockError::InvalidAmount.into());
        }
        let old = self.locked(account)?;
        if !old.exists() {
            return Err(LockError::NoExistingLock.into());
        }
        if old.cooldown_initiated {
            return Err(LockError::CooldownActive.into());
        }
        if old.end <= now {
            return Err(LockError::LockExpired.into());
        }

        let new = LockedBalance {
            amount: old
                .amount
                .checked_add(amount)
                .ok_or(VestaError::ArithmeticOverflow)?,
            ..old
        };
        let batch = self.stage_lock_change(&ctx.block, *account, old, new)?;
        let escrow = self.config.escrow;
        self.commit(batch, assets, payer, &escrow, amount)?;

        debug!(%account, %payer, %amount, total = %new.amount, "deposit added");
        Ok(())
    }

    /// Push the caller's unlock time out to `unlock_time`, rounded down to a
    /// week boundary.
    pub fn increase_unlock_time(&mut self, ctx: &CallContext, unlock_time: Timestamp) -> Result<(), VestaError> {
        let now = ctx.now();
        let account = ctx.caller;
        let old = self.locked(&account)?;
        if !old.exists() {
            return Err(LockError::NoExistingLock.into());
        }
        if old.cooldown_initiated {
            return Err(LockError::CooldownActive.into());
        }
        if old.end <= now {
            return Err(LockError::LockExpired.into());
        }
        if unlock_time.saturating_sub(now) > MAX_TIME {
            return Err(LockError::LockTooLong.into());
        }
        let end = week_floor(unlock_time);
        if end <= old.end {
            return Err(LockError::LockNotExtended.into());
        }

        let new = LockedBalance { end, ..old };
        let batch = self.stage_lock_change(&ctx.block, account, old, new)?;
        self.store.write(batch)?;

        debug!(%account, old_end = old.end, end, "unlock time increased");
        Ok(())
    }

    /// Start the exit cooldown on an expired lock.
    pub fn initiate_cooldown(&mut self, ctx: &CallContext) -> Result<(), VestaError> {
        let now = ctx.now();
        let account = ctx.caller;
        let old = self.locked(&account)?;
        if !old.exists() {
            return Err(LockError::NoExistingLock.into());
        }
        if old.cooldown_initiated {
            return Err(LockError::CooldownActive.into());
        }
        if now < old.end {
            return Err(LockError::LockNotExpired.into());
        }

        let new = LockedBalance {
            cooldown_initiated: true,
            cooldown_end: now.saturating_add(COOLDOWN_PERIOD),
            ..old
        };
        let batch = self.stage_lock_change(&ctx.block, account, old, new)?;
        self.store.write(batch)?;

        debug!(%account, cooldown_end = new.cooldown_end, "cooldown initiated");
        Ok(())
    }

    /// Release the caller's deposit. Returns the amount withdrawn.
    pub fn withdraw(&mut self, ctx: &CallContext, assets: &mut dyn AssetLedger) -> Result<Amount, VestaError> {
        let now = ctx.now();
        let account = ctx.caller;
        let old = self.locked(&account)?;
        if !old.exists() {
            return Err(LockError::NoExistingLock.into());
        }
        if old.cooldown_initiated {
            if now < old.cooldown_end {
                return Err(LockError::LockNotExpired.into());
            }
        } else if now < old.end {
            return Err(LockError::LockNotExpired.into());
        } else if !old.auto_cooldown {
            return Err(LockError::NoCooldownInitiated.into());
        }

        let batch = {
            let mut staged = StagedState::new(&self.store);
            staged.remove(&StorageKey::Locked(account))?;
            let change = LockChange {
                account,
                old,
                new: LockedBalance::default(),
            };
            history::checkpoint(&mut staged, &ctx.block, Some(&change))?;
            staged.into_batch()
        };
        let escrow = self.config.escrow;
        self.commit(batch, assets, &escrow, &account, old.amount)?;

        debug!(%account, amount = %old.amount, "withdrawn");
        Ok(old.amount)
    }

    /// Bring the global curve up to the current block.
    pub fn checkpoint(&mut self, ctx: &CallContext) -> Result<(), VestaError> {
        let (batch, head) = {
            let mut staged = StagedState::new(&self.store);
            let head = history::checkpoint(&mut staged, &ctx.block, None)?;
            (staged.into_batch(), head)
        };
        self.store.write(batch)?;
        debug!(ts = head.ts, blk = head.blk, bias = %head.bias, "global checkpoint");
        Ok(())
    }

    fn stage_lock_change(
        &self,
        block: &BlockContext,
        account: Address,
        old: LockedBalance,
        new: LockedBalance,
    ) -> Result<WriteBatch, VestaError> {
        let mut staged = StagedState::new(&self.store);
        staged.store(&StorageKey::Locked(account), &new)?;
        let change = LockChange { account, old, new };
        history::checkpoint(&mut staged, block, Some(&change))?;
        Ok(staged.into_batch())
    }

    /// Transfer, then write. The transfer is reverted if the write fails.
    fn commit(
        &mut self,
        batch: WriteBatch,
        assets: &mut dyn AssetLedger,
        from: &Address,
        to: &Address,
        amount: Amount,
    ) -> Result<(), VestaError> {
        assets.transfer(from, to, amount)?;
        if let Err(e) = self.store.write(batch) {
            if let Err(revert) = assets.transfer(to, from, amount) {
                warn!(%from, %to, %amount, error = %revert, "could not revert transfer");
            }
            return Err(e.into());
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Views
    // ------------------------------------------------------------------

    /// Current voting power of `account`.
    pub fn balance_of(&self, account: &Address, now: Timestamp) -> Result<Amount, VestaError> {
        let log = UserLog::new(&self.store, *account);
        let count = log.len()?;
        if count == 0 {
            return Ok(Amount::ZERO);
        }
        Ok(log.point(count - 1)?.power_at(now))
    }

    /// Voting power of `account` at `t`.
    pub fn balance_of_at(&self, account: &Address, t: Timestamp) -> Result<Amount, VestaError> {
        history::account_power_at(&self.store, *account, t)
    }

    /// Current total voting power.
    pub fn total_supply(&self, now: Timestamp) -> Result<Amount, VestaError> {
        self.total_supply_at(now)
    }

    /// Total voting power at `t`.
    pub fn total_supply_at(&self, t: Timestamp) -> Result<Amount, VestaError> {
        history::total_power_at(&self.store, t)
    }

    pub fn locked(&self, account: &Address) -> Result<LockedBalance, VestaError> {
        Ok(self.store.load_or_default(&StorageKey::Locked(*account))?)
    }

    pub fn locked_end(&self, account: &Address) -> Result<Timestamp, VestaError> {
        Ok(self.locked(account)?.end)
    }

    /// Index of the newest global checkpoint.
    pub fn epoch(&self) -> Result<u64, VestaError> {
        Ok(self.store.load_or_default(&StorageKey::GlobalEpoch)?)
    }

    pub fn point_history(&self, epoch: u64) -> Result<Option<Point>, VestaError> {
        if epoch >= GlobalLog::new(&self.store).len()? {
            return Ok(None);
        }
        Ok(Some(GlobalLog::new(&self.store).point(epoch)?))
    }

    /// Number of checkpoints recorded for `account`.
    pub fn user_point_epoch(&self, account: &Address) -> Result<u64, VestaError> {
        UserLog::new(&self.store, *account).len()
    }

    pub fn user_point_history(&self, account: &Address, epoch: u64) -> Result<Option<Point>, VestaError> {
        let log = UserLog::new(&self.store, *account);
        if epoch >= log.len()? {
            return Ok(None);
        }
        Ok(Some(log.point(epoch)?))
    }

    /// Pending global slope decrease at week boundary `t`.
    pub fn slope_change(&self, t: Timestamp) -> Result<Amount, VestaError> {
        history::slope_change(&self.store, t)
    }
}

impl<S: StateStore> VotingPowerSource for VoteEscrow<S> {
    fn balance_of_at(&self, account: &Address, t: Timestamp) -> Result<Amount, VestaError> {
        VoteEscrow::balance_of_at(self, account, t)
    }

    fn total_supply_at(&self, t: Timestamp) -> Result<Amount, VestaError> {
        VoteEscrow::total_supply_at(self, t)
    }

    fn first_checkpoint_time(&self, account: &Address) -> Result<Option<Timestamp>, VestaError> {
        Ok(self.user_point_history(account, 0)?.map(|p| p.ts))
    }

    fn has_active_lock(&self, account: &Address, now: Timestamp) -> Result<bool, VestaError> {
        Ok(self.locked(account)?.is_active(now))
    }

    fn checkpoint(&mut self, ctx: &CallContext) -> Result<(), VestaError> {
        VoteEscrow::checkpoint(self, ctx)
    }

    fn deposit_for(
        &mut self,
        ctx: &CallContext,
        payer: &Address,
        account: &Address,
        amount: Amount,
        assets: &mut dyn AssetLedger,
    ) -> Result<(), VestaError> {
        VoteEscrow::deposit_for(self, ctx, payer, account, amount, assets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use vesta_core::constants::WEEK;
    use vesta_core::error::{LedgerError, StoreError};
    use vesta_core::store::{MemoryStore, StateRead};

    const T0: Timestamp = 2_000 * WEEK;

    fn token() -> Address {
        Address([0x70; 20])
    }
    fn escrow_addr() -> Address {
        Address([0xe5; 20])
    }
    fn alice() -> Address {
        Address([0xa1; 20])
    }
    fn bob() -> Address {
        Address([0xb0; 20])
    }

    #[derive(Default)]
    struct Assets {
        balances: HashMap<Address, Amount>,
    }

    impl Assets {
        fn funded(accounts: &[Address], tokens: u64) -> Self {
            let mut a = Self::default();
            for acc in accounts {
                a.balances.insert(*acc, Amount::from_tokens(tokens));
            }
            a
        }
    }

    impl AssetLedger for Assets {
        fn balance_of(&self, owner: &Address) -> Amount {
            self.balances.get(owner).copied().unwrap_or_default()
        }

        fn transfer(&mut self, from: &Address, to: &Address, amount: Amount) -> Result<(), LedgerError> {
            let have = self.balance_of(from);
            let left = have
                .checked_sub(amount)
                .ok_or(LedgerError::InsufficientBalance { have, need: amount })?;
            self.balances.insert(*from, left);
            let credited = self.balance_of(to).saturating_add(amount);
            self.balances.insert(*to, credited);
            Ok(())
        }
    }

    fn setup() -> (VoteEscrow<MemoryStore>, Assets) {
        let block = BlockContext { timestamp: T0, number: 1 };
        let ve = VoteEscrow::initialize(MemoryStore::new(), token(), escrow_addr(), "v1", &block).unwrap();
        (ve, Assets::funded(&[alice(), bob()], 1_000_000))
    }

    fn at(caller: Address, ts: Timestamp, blk: u64) -> CallContext {
        CallContext::new(caller, ts, blk)
    }

    // --- initialisation ---

    #[test]
    fn initialize_rejects_zero_addresses() {
        let block = BlockContext::default();
        let err = VoteEscrow::initialize(MemoryStore::new(), Address::ZERO, escrow_addr(), "v1", &block)
            .err()
            .unwrap();
        assert_eq!(err, VestaError::ZeroAddress("token"));
        let err = VoteEscrow::initialize(MemoryStore::new(), token(), Address::ZERO, "v1", &block)
            .err()
            .unwrap();
        assert_eq!(err, VestaError::ZeroAddress("escrow"));
    }

    #[test]
    fn initialize_twice_fails_and_open_restores() {
        let (ve, _) = setup();
        let store = ve.into_store();
        let err = VoteEscrow::initialize(store.clone(), token(), escrow_addr(), "v2", &BlockContext::default())
            .err()
            .unwrap();
        assert_eq!(err, VestaError::AlreadyInitialized);
        let ve = VoteEscrow::open(store).unwrap();
        assert_eq!(ve.config().version, "v1");
        assert_eq!(ve.epoch().unwrap(), 0);
    }

    #[test]
    fn open_uninitialized_fails() {
        assert_eq!(VoteEscrow::open(MemoryStore::new()).err(), Some(VestaError::NotInitialized));
    }

    // --- create_lock ---

    #[test]
    fn create_lock_validation_order() {
        let (mut ve, mut assets) = setup();
        let ctx = at(alice(), T0, 2);
        let cases = [
            (Amount::ZERO, T0 - 1, LockError::InvalidAmount),
            (Amount::ONE, T0, LockError::LockInPast),
            (Amount::ONE, T0 + MAX_TIME + 1, LockError::LockTooLong),
            (Amount::ONE, T0 + WEEK - 1, LockError::LockTooShort),
        ];
        for (amount, unlock, expected) in cases {
            let err = ve.create_lock(&ctx, amount, unlock, false, &mut assets).unwrap_err();
            assert_eq!(err, VestaError::Lock(expected));
        }
        ve.create_lock(&ctx, Amount::ONE, T0 + 4 * WEEK, false, &mut assets).unwrap();
        let err = ve.create_lock(&ctx, Amount::ONE, T0 + 4 * WEEK, false, &mut assets).unwrap_err();
        assert_eq!(err, VestaError::Lock(LockError::ExistingLockFound));
    }

    #[test]
    fn create_lock_rounds_end_and_moves_funds() {
        let (mut ve, mut assets) = setup();
        let ctx = at(alice(), T0 + 100, 2);
        ve.create_lock(&ctx, Amount::from_tokens(100), T0 + 10 * WEEK + 500, false, &mut assets)
            .unwrap();
        let lock = ve.locked(&alice()).unwrap();
        assert_eq!(lock.end, T0 + 10 * WEEK);
        assert_eq!(ve.locked_end(&alice()).unwrap(), T0 + 10 * WEEK);
        assert_eq!(assets.balance_of(&escrow_addr()), Amount::from_tokens(100));
        assert_eq!(ve.user_point_epoch(&alice()).unwrap(), 1);
        assert!(ve.balance_of(&alice(), T0 + 100).unwrap() > Amount::ZERO);
    }

    #[test]
    fn four_year_lock_gives_nearly_full_power() {
        let (mut ve, mut assets) = setup();
        let ctx = at(alice(), T0, 2);
        ve.create_lock(&ctx, Amount::from_tokens(1000), T0 + MAX_TIME, false, &mut assets)
            .unwrap();
        let power = ve.balance_of(&alice(), T0).unwrap();
        // MAX_TIME is not a whole number of weeks, so the rounded end is
        // within one week of the maximum.
        let floor = Amount::from_tokens(1000)
            .mul_div(Amount::from_raw((MAX_TIME - WEEK) as u128), Amount::from_raw(MAX_TIME as u128))
            .unwrap();
        assert!(power <= Amount::from_tokens(1000));
        assert!(power >= floor.saturating_sub(Amount::from_raw(MAX_TIME as u128)));
    }

    #[test]
    fn rejected_transfer_writes_nothing() {
        let (mut ve, _) = setup();
        let mut broke = Assets::default();
        let before = ve.store().clone();
        let err = ve
            .create_lock(&at(alice(), T0, 2), Amount::ONE, T0 + 4 * WEEK, false, &mut broke)
            .unwrap_err();
        assert!(matches!(err, VestaError::Ledger(_)));
        assert_eq!(ve.store(), &before);
    }

    // --- increase_amount / deposit_for ---

    #[test]
    fn increase_amount_checks() {
        let (mut ve, mut assets) = setup();
        let ctx = at(alice(), T0, 2);
        assert_eq!(
            ve.increase_amount(&ctx, Amount::ZERO, &mut assets).unwrap_err(),
            VestaError::Lock(LockError::InvalidAmount)
        );
        assert_eq!(
            ve.increase_amount(&ctx, Amount::ONE, &mut assets).unwrap_err(),
            VestaError::Lock(LockError::NoExistingLock)
        );
        ve.create_lock(&ctx, Amount::ONE, T0 + 2 * WEEK, false, &mut assets).unwrap();
        let late = at(alice(), T0 + 2 * WEEK, 9);
        assert_eq!(
            ve.increase_amount(&late, Amount::ONE, &mut assets).unwrap_err(),
            VestaError::Lock(LockError::LockExpired)
        );
        ve.initiate_cooldown(&late).unwrap();
        assert_eq!(
            ve.increase_amount(&late, Amount::ONE, &mut assets).unwrap_err(),
            VestaError::Lock(LockError::CooldownActive)
        );
    }

    #[test]
    fn increase_amount_keeps_end_and_raises_power() {
        let (mut ve, mut assets) = setup();
        ve.create_lock(&at(alice(), T0, 2), Amount::from_tokens(10), T0 + 8 * WEEK, false, &mut assets)
            .unwrap();
        let before = ve.balance_of(&alice(), T0 + WEEK).unwrap();
        ve.increase_amount(&at(alice(), T0 + WEEK, 3), Amount::from_tokens(10), &mut assets)
            .unwrap();
        let after = ve.balance_of(&alice(), T0 + WEEK).unwrap();
        assert!(after > before);
        let lock = ve.locked(&alice()).unwrap();
        assert_eq!(lock.amount, Amount::from_tokens(20));
        assert_eq!(lock.end, T0 + 8 * WEEK);
    }

    #[test]
    fn deposit_for_is_paid_by_payer() {
        let (mut ve, mut assets) = setup();
        ve.create_lock(&at(alice(), T0, 2), Amount::from_tokens(10), T0 + 8 * WEEK, false, &mut assets)
            .unwrap();
        let ctx = at(bob(), T0, 3);
        ve.deposit_for(&ctx, &bob(), &alice(), Amount::from_tokens(5), &mut assets).unwrap();
        assert_eq!(ve.locked(&alice()).unwrap().amount, Amount::from_tokens(15));
        assert_eq!(assets.balance_of(&bob()), Amount::from_tokens(999_995));
    }

    // --- increase_unlock_time ---

    #[test]
    fn increase_unlock_time_checks() {
        let (mut ve, mut assets) = setup();
        let ctx = at(alice(), T0, 2);
        assert_eq!(
            ve.increase_unlock_time(&ctx, T0 + 8 * WEEK).unwrap_err(),
            VestaError::Lock(LockError::NoExistingLock)
        );
        ve.create_lock(&ctx, Amount::ONE, T0 + 4 * WEEK, false, &mut assets).unwrap();
        assert_eq!(
            ve.increase_unlock_time(&ctx, T0 + 4 * WEEK + 10).unwrap_err(),
            VestaError::Lock(LockError::LockNotExtended)
        );
        assert_eq!(
            ve.increase_unlock_time(&ctx, T0 + MAX_TIME + 1).unwrap_err(),
            VestaError::Lock(LockError::LockTooLong)
        );
        ve.increase_unlock_time(&ctx, T0 + 6 * WEEK).unwrap();
        assert_eq!(ve.locked_end(&alice()).unwrap(), T0 + 6 * WEEK);
        let late = at(alice(), T0 + 6 * WEEK, 3);
        assert_eq!(
            ve.increase_unlock_time(&late, T0 + 9 * WEEK).unwrap_err(),
            VestaError::Lock(LockError::LockExpired)
        );
    }

    // --- cooldown and withdraw ---

    #[test]
    fn withdraw_without_auto_cooldown_requires_cooldown() {
        let (mut ve, mut assets) = setup();
        let end = T0 + 2 * WEEK;
        ve.create_lock(&at(alice(), T0, 2), Amount::from_tokens(7), end, false, &mut assets)
            .unwrap();

        assert_eq!(
            ve.withdraw(&at(alice(), end - 1, 3), &mut assets).unwrap_err(),
            VestaError::Lock(LockError::LockNotExpired)
        );
        assert_eq!(
            ve.initiate_cooldown(&at(alice(), end - 1, 3)).unwrap_err(),
            VestaError::Lock(LockError::LockNotExpired)
        );
        assert_eq!(
            ve.withdraw(&at(alice(), end, 4), &mut assets).unwrap_err(),
            VestaError::Lock(LockError::NoCooldownInitiated)
        );

        ve.initiate_cooldown(&at(alice(), end, 4)).unwrap();
        assert_eq!(
            ve.initiate_cooldown(&at(alice(), end, 4)).unwrap_err(),
            VestaError::Lock(LockError::CooldownActive)
        );
        assert_eq!(ve.balance_of(&alice(), end).unwrap(), Amount::ZERO);
        assert_eq!(
            ve.withdraw(&at(alice(), end + COOLDOWN_PERIOD - 1, 5), &mut assets)
                .unwrap_err(),
            VestaError::Lock(LockError::LockNotExpired)
        );

        let out = ve
            .withdraw(&at(alice(), end + COOLDOWN_PERIOD, 6), &mut assets)
            .unwrap();
        assert_eq!(out, Amount::from_tokens(7));
        assert_eq!(assets.balance_of(&alice()), Amount::from_tokens(1_000_000));
        assert!(!ve.locked(&alice()).unwrap().exists());
    }

    #[test]
    fn auto_cooldown_withdraws_at_end() {
        let (mut ve, mut assets) = setup();
        let end = T0 + 3 * WEEK;
        ve.create_lock(&at(alice(), T0, 2), Amount::from_tokens(7), end, true, &mut assets)
            .unwrap();
        assert_eq!(
            ve.withdraw(&at(alice(), end - 1, 3), &mut assets).unwrap_err(),
            VestaError::Lock(LockError::LockNotExpired)
        );
        assert_eq!(ve.withdraw(&at(alice(), end, 4), &mut assets).unwrap(), Amount::from_tokens(7));
        assert_eq!(
            ve.withdraw(&at(alice(), end, 4), &mut assets).unwrap_err(),
            VestaError::Lock(LockError::NoExistingLock)
        );
    }

    #[test]
    fn withdrawn_account_can_lock_again() {
        let (mut ve, mut assets) = setup();
        let end = T0 + 2 * WEEK;
        ve.create_lock(&at(alice(), T0, 2), Amount::ONE, end, true, &mut assets).unwrap();
        ve.withdraw(&at(alice(), end, 3), &mut assets).unwrap();
        ve.create_lock(&at(alice(), end, 3), Amount::ONE, end + 4 * WEEK, false, &mut assets)
            .unwrap();
        assert_eq!(ve.user_point_epoch(&alice()).unwrap(), 2);
    }

    // --- queries ---

    #[test]
    fn power_decays_to_zero_at_end() {
        let (mut ve, mut assets) = setup();
        let end = T0 + 10 * WEEK;
        ve.create_lock(&at(alice(), T0, 2), Amount::from_tokens(500), end, false, &mut assets)
            .unwrap();
        let mut prev = ve.balance_of(&alice(), T0).unwrap();
        for w in 1..=10 {
            let now = ve.balance_of(&alice(), T0 + w * WEEK).unwrap();
            assert!(now < prev);
            prev = now;
        }
        assert_eq!(prev, Amount::ZERO);
        assert_eq!(ve.total_supply(end).unwrap(), Amount::ZERO);
    }

    #[test]
    fn supply_matches_sum_of_balances() {
        let (mut ve, mut assets) = setup();
        ve.create_lock(&at(alice(), T0, 2), Amount::from_tokens(300), T0 + 5 * WEEK, false, &mut assets)
            .unwrap();
        ve.create_lock(&at(bob(), T0 + 3 * 86_400, 3), Amount::from_tokens(900), T0 + 40 * WEEK, false, &mut assets)
            .unwrap();
        for t in [T0, T0 + 86_400, T0 + 4 * WEEK, T0 + 6 * WEEK, T0 + 39 * WEEK, T0 + 41 * WEEK] {
            let sum = ve
                .balance_of_at(&alice(), t)
                .unwrap()
                .saturating_add(ve.balance_of_at(&bob(), t).unwrap());
            assert_eq!(ve.total_supply_at(t).unwrap(), sum, "at {t}");
        }
    }

    #[test]
    fn historical_balance_before_first_checkpoint_is_zero() {
        let (mut ve, mut assets) = setup();
        ve.create_lock(&at(alice(), T0 + WEEK, 2), Amount::ONE, T0 + 5 * WEEK, false, &mut assets)
            .unwrap();
        assert_eq!(ve.balance_of_at(&alice(), T0).unwrap(), Amount::ZERO);
        assert_eq!(ve.first_checkpoint_time(&alice()).unwrap(), Some(T0 + WEEK));
        assert_eq!(ve.first_checkpoint_time(&bob()).unwrap(), None);
    }

    #[test]
    fn same_block_operations_amend() {
        let (mut ve, mut assets) = setup();
        let ctx = at(alice(), T0 + 5, 2);
        ve.create_lock(&ctx, Amount::ONE, T0 + 4 * WEEK, false, &mut assets).unwrap();
        let epoch = ve.epoch().unwrap();
        ve.increase_amount(&ctx, Amount::ONE, &mut assets).unwrap();
        ve.increase_unlock_time(&ctx, T0 + 8 * WEEK).unwrap();
        assert_eq!(ve.epoch().unwrap(), epoch);
        assert_eq!(ve.user_point_epoch(&alice()).unwrap(), 1);
        assert!(ve.point_history(epoch + 1).unwrap().is_none());
    }

    #[test]
    fn slope_change_tracks_lock_end() {
        let (mut ve, mut assets) = setup();
        let end = T0 + 4 * WEEK;
        ve.create_lock(&at(alice(), T0, 2), Amount::from_tokens(1000), end, false, &mut assets)
            .unwrap();
        let point = ve.user_point_history(&alice(), 0).unwrap().unwrap();
        assert_eq!(ve.slope_change(end).unwrap(), point.slope);
        assert!(ve.has_active_lock(&alice(), T0).unwrap());
        assert!(!ve.has_active_lock(&alice(), end).unwrap());
    }

    // --- store failure ---

    struct FailingStore {
        inner: MemoryStore,
        fail: bool,
    }

    impl StateRead for FailingStore {
        fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
            self.inner.get(key)
        }
    }

    impl StateStore for FailingStore {
        fn write(&mut self, batch: WriteBatch) -> Result<(), StoreError> {
            if self.fail {
                return Err(StoreError::Backend("disk full".into()));
            }
            self.inner.write(batch)
        }
    }

    #[test]
    fn failed_write_reverts_transfer() {
        let store = FailingStore {
            inner: MemoryStore::new(),
            fail: false,
        };
        let block = BlockContext { timestamp: T0, number: 1 };
        let mut ve = VoteEscrow::initialize(store, token(), escrow_addr(), "v1", &block).unwrap();
        ve.store.fail = true;
        let mut assets = Assets::funded(&[alice()], 10);
        let err = ve
            .create_lock(&at(alice(), T0, 2), Amount::ONE, T0 + 4 * WEEK, false, &mut assets)
            .unwrap_err();
        assert_eq!(err, VestaError::Store(StoreError::Backend("disk full".into())));
        assert_eq!(assets.balance_of(&alice()), Amount::from_tokens(10));
        assert_eq!(assets.balance_of(&escrow_addr()), Amount::ZERO);
    }
}
