//! Error types for the Vesta engine.
use thiserror::Error;

use crate::fixed::Amount;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LockError {
    #[error("cannot lock or deposit zero tokens")] InvalidAmount,
    #[error("cannot lock in the past")] LockInPast,
    #[error("lock shorter than the minimum period")] LockTooShort,
    #[error("voting lock can be 4 years max")] LockTooLong,
    #[error("withdraw old tokens first")] ExistingLockFound,
    #[error("no existing lock found")] NoExistingLock,
    #[error("lock expired, withdraw")] LockExpired,
    #[error("lock not expired")] LockNotExpired,
    #[error("cannot deposit during cooldown")] CooldownActive,
    #[error("no cooldown initiated")] NoCooldownInitiated,
    #[error("can only increase lock duration")] LockNotExtended,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RewardError {
    #[error("cannot add zero rewards")] ZeroRewards,
    #[error("reward checkpointing is disabled")] CheckpointRewardDisabled,
    #[error("reward checkpointing already enabled")] CheckpointRewardAlreadyEnabled,
    #[error("caller is not the controller")] Unauthorized,
    #[error("distributor is killed")] Killed,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("insufficient balance: have {have}, need {need}")] InsufficientBalance { have: Amount, need: Amount },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("codec: {0}")] Codec(String),
    #[error("backend: {0}")] Backend(String),
    #[error("missing record: {0}")] Missing(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VestaError {
    #[error(transparent)] Lock(#[from] LockError),
    #[error(transparent)] Reward(#[from] RewardError),
    #[error(transparent)] Ledger(#[from] LedgerError),
    #[error(transparent)] Store(#[from] StoreError),
    #[error("zero address: {0}")] ZeroAddress(&'static str),
    #[error("already initialized")] AlreadyInitialized,
    #[error("not initialized")] NotInitialized,
    #[error("arithmetic overflow")] ArithmeticOverflow,
}
