//! Trait interfaces for the Vesta engine.
//!
//! These traits define the contracts between the engine and its collaborators:
//! - [`AssetLedger`] — fungible-asset balances and transfers (the executor implements)
//! - [`VotingPowerSource`] — the reward distributor's view of the escrow (vesta-escrow implements)
//!
//! Storage is covered separately by [`StateStore`](crate::store::StateStore).

use crate::error::{LedgerError, VestaError};
use crate::fixed::Amount;
use crate::types::{Address, CallContext, Timestamp};

/// External fungible-asset ledger.
///
/// The escrow and the distributor hold their balances here under their own
/// addresses; every deposit, withdrawal, reward and claim is a transfer.
pub trait AssetLedger {
    /// Current balance of `owner`.
    fn balance_of(&self, owner: &Address) -> Amount;

    /// Move `amount` from `from` to `to`. Fails without effect if `from` is short.
    fn transfer(&mut self, from: &Address, to: &Address, amount: Amount) -> Result<(), LedgerError>;
}

/// Voting-power queries and restaking hooks consumed by the reward distributor.
pub trait VotingPowerSource {
    /// Voting power of `account` at time `t`.
    fn balance_of_at(&self, account: &Address, t: Timestamp) -> Result<Amount, VestaError>;

    /// Total voting power at time `t`.
    fn total_supply_at(&self, t: Timestamp) -> Result<Amount, VestaError>;

    /// Timestamp of the account's first checkpoint, or `None` if it never locked.
    fn first_checkpoint_time(&self, account: &Address) -> Result<Option<Timestamp>, VestaError>;

    /// Whether `account` holds a lock that still accepts deposits at `now`.
    fn has_active_lock(&self, account: &Address, now: Timestamp) -> Result<bool, VestaError>;

    /// Bring the global curve up to the current block.
    fn checkpoint(&mut self, ctx: &CallContext) -> Result<(), VestaError>;

    /// Add `amount`, paid by `payer`, to `account`'s active lock.
    fn deposit_for(
        &mut self,
        ctx: &CallContext,
        payer: &Address,
        account: &Address,
        amount: Amount,
        assets: &mut dyn AssetLedger,
    ) -> Result<(), VestaError>;
}
