//! Weekly reward distributor.
//!
//! Rewards are credited to the week in progress (or to the start week before
//! distribution begins). Once a week has started, its total voting supply is
//! snapshotted into a [`RewardEpoch`] record; records form a gap-free
//! sequence from `start_time`. Claims walk completed, snapshotted weeks after
//! the account's [`ClaimCursor`] and pay
//! `balance_at(week) * tokens_per_week / total_supply_at_week` for each.

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use vesta_core::constants::{WEEK, week_floor};
use vesta_core::error::{RewardError, VestaError};
use vesta_core::fixed::Amount;
use vesta_core::store::{StagedState, StateRead, StateReadExt, StateStore, StorageKey};
use vesta_core::traits::{AssetLedger, VotingPowerSource};
use vesta_core::types::{Address, BlockContext, CallContext, ClaimCursor, RewardEpoch, Timestamp};

/// Deployment parameters.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct DistributorConfig {
    /// Reward asset.
    pub token: Address,
    /// Ledger address holding undistributed rewards.
    pub address: Address,
    /// Account allowed to toggle checkpointing and kill the distributor.
    pub controller: Address,
    /// Receives the remaining balance on kill.
    pub emergency_return: Address,
    /// First rewarded week; floored to a week boundary.
    pub start_time: Timestamp,
}

/// Persisted distributor parameters and running totals.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct DistributorState {
    pub token: Address,
    pub address: Address,
    pub controller: Address,
    pub emergency_return: Address,
    /// Week-aligned start of distribution.
    pub start_time: Timestamp,
    /// First week whose supply has not been snapshotted yet.
    pub next_week: Timestamp,
    /// Time of the most recent token checkpoint.
    pub last_token_time: Timestamp,
    /// Reward balance already credited to weeks.
    pub token_last_balance: Amount,
    pub allow_checkpoint_reward: bool,
    pub killed: bool,
}

impl DistributorState {
    /// Week that new rewards are credited to at `now`.
    pub fn credit_week(&self, now: Timestamp) -> Timestamp {
        week_floor(now).max(self.start_time)
    }
}

/// Reward distributor over a keyed state store.
pub struct RewardDistributor<S: StateStore> {
    store: S,
    state: DistributorState,
}

impl<S: StateStore> RewardDistributor<S> {
    pub fn initialize(mut store: S, config: DistributorConfig, block: &BlockContext) -> Result<Self, VestaError> {
        for (name, addr) in [
            ("token", config.token),
            ("distributor", config.address),
            ("controller", config.controller),
            ("emergency_return", config.emergency_return),
        ] {
            if addr.is_zero() {
                return Err(VestaError::ZeroAddress(name));
            }
        }
        if store.load::<DistributorState>(&StorageKey::DistributorState)?.is_some() {
            return Err(VestaError::AlreadyInitialized);
        }

        let start_time = week_floor(config.start_time);
        let state = DistributorState {
            token: config.token,
            address: config.address,
            controller: config.controller,
            emergency_return: config.emergency_return,
            start_time,
            next_week: start_time,
            last_token_time: block.timestamp,
            token_last_balance: Amount::ZERO,
            allow_checkpoint_reward: false,
            killed: false,
        };
        let batch = {
            let mut staged = StagedState::new(&store);
            staged.store(&StorageKey::DistributorState, &state)?;
            staged.into_batch()
        };
        store.write(batch)?;

        info!(address = %state.address, controller = %state.controller, start_time, "distributor initialized");
        Ok(Self { store, state })
    }

    pub fn open(store: S) -> Result<Self, VestaError> {
        let state = store
            .load::<DistributorState>(&StorageKey::DistributorState)?
            .ok_or(VestaError::NotInitialized)?;
        Ok(Self { store, state })
    }

    pub fn state(&self) -> &DistributorState {
        &self.state
    }

    pub fn address(&self) -> Address {
        self.state.address
    }

    pub fn start_time(&self) -> Timestamp {
        self.state.start_time
    }

    /// Most recent week with a supply snapshot, if any.
    pub fn last_checkpointed_week(&self) -> Option<Timestamp> {
        (self.state.next_week > self.state.start_time).then(|| self.state.next_week - WEEK)
    }

    pub fn reward_epoch(&self, week: Timestamp) -> Result<Option<RewardEpoch>, VestaError> {
        Ok(self.store.load(&StorageKey::RewardEpoch(week_floor(week)))?)
    }

    pub fn claim_cursor(&self, account: &Address) -> Result<Option<ClaimCursor>, VestaError> {
        Ok(self.store.load(&StorageKey::ClaimCursor(*account))?)
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

    /// Snapshot every started week and ingest untracked reward balance.
    /// Safe to call any number of times.
    pub fn checkpoint_token(
        &mut self,
        ctx: &CallContext,
        escrow: &mut dyn VotingPowerSource,
        assets: &dyn AssetLedger,
    ) -> Result<(), VestaError> {
        escrow.checkpoint(ctx)?;
        let mut state = self.state.clone();
        let balance = assets.balance_of(&state.address);
        let batch = {
            let mut staged = StagedState::new(&self.store);
            stage_checkpoint(&mut staged, &mut state, ctx.now(), &*escrow, balance)?;
            staged.store(&StorageKey::DistributorState, &state)?;
            staged.into_batch()
        };
        self.store.write(batch)?;
        self.state = state;
        debug!(next_week = self.state.next_week, balance = %self.state.token_last_balance, "token checkpoint");
        Ok(())
    }

    /// Transfer `amount` from the caller and credit it to the current week.
    pub fn add_rewards(
        &mut self,
        ctx: &CallContext,
        amount: Amount,
        escrow: &mut dyn VotingPowerSource,
        assets: &mut dyn AssetLedger,
    ) -> Result<(), VestaError> {
        if self.state.killed {
            return Err(RewardError::Killed.into());
        }
        if amount.is_zero() {
            return Err(RewardError::ZeroRewards.into());
        }
        if !self.state.allow_checkpoint_reward {
            return Err(RewardError::CheckpointRewardDisabled.into());
        }

        escrow.checkpoint(ctx)?;
        let now = ctx.now();
        let mut state = self.state.clone();
        let balance = assets.balance_of(&state.address);
        let week = state.credit_week(now);
        let batch = {
            let mut staged = StagedState::new(&self.store);
            stage_checkpoint(&mut staged, &mut state, now, &*escrow, balance)?;
            credit(&mut staged, week, amount)?;
            state.token_last_balance = state
                .token_last_balance
                .checked_add(amount)
                .ok_or(VestaError::ArithmeticOverflow)?;
            staged.store(&StorageKey::DistributorState, &state)?;
            staged.into_batch()
        };

        let (from, to) = (ctx.caller, state.address);
        assets.transfer(&from, &to, amount)?;
        if let Err(e) = self.store.write(batch) {
            if let Err(revert) = assets.transfer(&to, &from, amount) {
                warn!(%from, %amount, error = %revert, "could not revert reward deposit");
            }
            return Err(e.into());
        }
        self.state = state;

        info!(from = %ctx.caller, %amount, week, "rewards added");
        Ok(())
    }

    /// Rewards `account` could claim now from already snapshotted weeks.
    pub fn compute_rewards(
        &self,
        account: &Address,
        now: Timestamp,
        escrow: &dyn VotingPowerSource,
    ) -> Result<Amount, VestaError> {
        Ok(accrued(&self.store, &self.state, account, now, escrow)?.0)
    }

    /// Pay out everything `account` has accrued over completed weeks.
    ///
    /// With `restake`, a caller claiming for itself with an active lock has
    /// the rewards added to that lock instead of transferred.
    pub fn claim(
        &mut self,
        ctx: &CallContext,
        account: &Address,
        restake: bool,
        escrow: &mut dyn VotingPowerSource,
        assets: &mut dyn AssetLedger,
    ) -> Result<Amount, VestaError> {
        if self.state.killed {
            return Err(RewardError::Killed.into());
        }

        escrow.checkpoint(ctx)?;
        let now = ctx.now();
        let mut state = self.state.clone();
        let balance = assets.balance_of(&state.address);
        let (batch, amount, last_week) = {
            let mut staged = StagedState::new(&self.store);
            stage_checkpoint(&mut staged, &mut state, now, &*escrow, balance)?;
            let (amount, last_week) = accrued(&staged, &state, account, now, &*escrow)?;
            if let Some(week) = last_week {
                staged.store(&StorageKey::ClaimCursor(*account), &ClaimCursor { last_week: week })?;
            }
            state.token_last_balance = state.token_last_balance.saturating_sub(amount);
            staged.store(&StorageKey::DistributorState, &state)?;
            (staged.into_batch(), amount, last_week)
        };

        let relock = !amount.is_zero()
            && restake
            && ctx.caller == *account
            && escrow.has_active_lock(account, now)?;
        if relock {
            escrow.deposit_for(ctx, &state.address, account, amount, assets)?;
        } else if !amount.is_zero() {
            assets.transfer(&state.address, account, amount)?;
        }

        if let Err(e) = self.store.write(batch) {
            if relock {
                error!(%account, %amount, "claim restaked but cursor was not saved");
            } else if !amount.is_zero() {
                if let Err(revert) = assets.transfer(account, &state.address, amount) {
                    warn!(%account, %amount, error = %revert, "could not revert claim payout");
                }
            }
            return Err(e.into());
        }
        self.state = state;

        debug!(%account, %amount, restaked = relock, ?last_week, "claimed");
        Ok(amount)
    }

    /// Enable reward checkpointing. Controller only; cannot be undone.
    pub fn toggle_allow_checkpoint_reward(&mut self, ctx: &CallContext) -> Result<(), VestaError> {
        if ctx.caller != self.state.controller {
            return Err(RewardError::Unauthorized.into());
        }
        if self.state.allow_checkpoint_reward {
            return Err(RewardError::CheckpointRewardAlreadyEnabled.into());
        }
        let state = DistributorState {
            allow_checkpoint_reward: true,
            ..self.state.clone()
        };
        self.write_state(state)?;
        info!(controller = %ctx.caller, "reward checkpointing enabled");
        Ok(())
    }

    /// Stop the distributor and send its whole balance to the emergency
    /// return address. Controller only.
    pub fn kill(&mut self, ctx: &CallContext, assets: &mut dyn AssetLedger) -> Result<Amount, VestaError> {
        if ctx.caller != self.state.controller {
            return Err(RewardError::Unauthorized.into());
        }
        if self.state.killed {
            return Err(RewardError::Killed.into());
        }
        let (from, to) = (self.state.address, self.state.emergency_return);
        let balance = assets.balance_of(&from);
        let state = DistributorState {
            killed: true,
            token_last_balance: Amount::ZERO,
            ..self.state.clone()
        };

        assets.transfer(&from, &to, balance)?;
        if let Err(e) = self.write_state(state) {
            if let Err(revert) = assets.transfer(&to, &from, balance) {
                warn!(%balance, error = %revert, "could not revert emergency return");
            }
            return Err(e);
        }
        info!(emergency_return = %to, %balance, "distributor killed");
        Ok(balance)
    }

    fn write_state(&mut self, state: DistributorState) -> Result<(), VestaError> {
        let batch = {
            let mut staged = StagedState::new(&self.store);
            staged.store(&StorageKey::DistributorState, &state)?;
            staged.into_batch()
        };
        self.store.write(batch)?;
        self.state = state;
        Ok(())
    }
}

/// Snapshot supply for every week that has started, then credit any reward
/// balance that arrived outside `add_rewards`.
fn stage_checkpoint<R: StateRead + ?Sized>(
    staged: &mut StagedState<'_, R>,
    state: &mut DistributorState,
    now: Timestamp,
    escrow: &dyn VotingPowerSource,
    balance: Amount,
) -> Result<(), VestaError> {
    while state.next_week < now {
        let week = state.next_week;
        let mut epoch: RewardEpoch = staged.load_or_default(&StorageKey::RewardEpoch(week))?;
        epoch.week_start = week;
        epoch.total_supply_at_week = escrow.total_supply_at(week)?;
        staged.store(&StorageKey::RewardEpoch(week), &epoch)?;
        state.next_week = week + WEEK;
    }

    if state.allow_checkpoint_reward && !state.killed {
        let untracked = balance.saturating_sub(state.token_last_balance);
        if !untracked.is_zero() {
            credit(staged, state.credit_week(now), untracked)?;
            state.token_last_balance = balance;
        }
    }
    state.last_token_time = now;
    Ok(())
}

fn credit<R: StateRead + ?Sized>(
    staged: &mut StagedState<'_, R>,
    week: Timestamp,
    amount: Amount,
) -> Result<(), VestaError> {
    let mut epoch: RewardEpoch = staged.load_or_default(&StorageKey::RewardEpoch(week))?;
    epoch.week_start = week;
    epoch.tokens_per_week = epoch
        .tokens_per_week
        .checked_add(amount)
        .ok_or(VestaError::ArithmeticOverflow)?;
    staged.store(&StorageKey::RewardEpoch(week), &epoch)?;
    Ok(())
}

/// Rewards accrued by `account` over completed, snapshotted weeks after its
/// cursor, and the last week walked.
fn accrued<R: StateRead + ?Sized>(
    store: &R,
    state: &DistributorState,
    account: &Address,
    now: Timestamp,
    escrow: &dyn VotingPowerSource,
) -> Result<(Amount, Option<Timestamp>), VestaError> {
    let mut week = match store.load::<ClaimCursor>(&StorageKey::ClaimCursor(*account))? {
        Some(cursor) => cursor.last_week + WEEK,
        None => match escrow.first_checkpoint_time(account)? {
            Some(ts) => week_floor(ts).max(state.start_time),
            None => return Ok((Amount::ZERO, None)),
        },
    };
    let end = week_floor(now).min(state.next_week);

    let mut total = Amount::ZERO;
    let mut last_week = None;
    while week < end {
        let epoch: RewardEpoch = store.load_or_default(&StorageKey::RewardEpoch(week))?;
        if !epoch.total_supply_at_week.is_zero() && !epoch.tokens_per_week.is_zero() {
            let balance = escrow.balance_of_at(account, week)?;
            let share = balance
                .mul_div(epoch.tokens_per_week, epoch.total_supply_at_week)
                .ok_or(VestaError::ArithmeticOverflow)?;
            total = total.checked_add(share).ok_or(VestaError::ArithmeticOverflow)?;
        }
        last_week = Some(week);
        week += WEEK;
    }
    Ok((total, last_week))
}
