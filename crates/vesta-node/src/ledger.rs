//! Deterministic ledger executor.
//!
//! [`SimLedger`] stands in for the host chain: it owns the clock, the block
//! counter and every token balance, and hands the engines a fresh
//! [`CallContext`] per call.

use std::collections::BTreeMap;

use serde::Serialize;

use vesta_core::error::{LedgerError, VestaError};
use vesta_core::fixed::Amount;
use vesta_core::traits::AssetLedger;
use vesta_core::types::{Address, BlockContext, CallContext, Timestamp};

/// Seconds between blocks unless told otherwise.
pub const DEFAULT_BLOCK_TIME: u64 = 12;

/// Simulated chain clock and token ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SimLedger {
    timestamp: Timestamp,
    number: u64,
    block_time: u64,
    balances: BTreeMap<Address, Amount>,
}

impl SimLedger {
    /// A ledger positioned at block 1, `genesis_time`.
    pub fn new(genesis_time: Timestamp, block_time: u64) -> Self {
        Self {
            timestamp: genesis_time,
            number: 1,
            block_time: block_time.max(1),
            balances: BTreeMap::new(),
        }
    }

    pub fn block(&self) -> BlockContext {
        BlockContext {
            timestamp: self.timestamp,
            number: self.number,
        }
    }

    pub fn now(&self) -> Timestamp {
        self.timestamp
    }

    /// Context for a call made by `caller` in the current block.
    pub fn context(&self, caller: Address) -> CallContext {
        CallContext::new(caller, self.timestamp, self.number)
    }

    /// Produce the next block.
    pub fn mine(&mut self) {
        self.advance(self.block_time);
    }

    /// Move the clock forward by `seconds` in a single new block. The clock
    /// stops at `Timestamp::MAX`.
    pub fn advance(&mut self, seconds: u64) {
        self.number = self.number.saturating_add(1);
        self.timestamp = self.timestamp.saturating_add(seconds);
    }

    /// Create `amount` new tokens for `to`.
    pub fn mint(&mut self, to: &Address, amount: Amount) -> Result<(), VestaError> {
        let balance = self
            .balance_of(to)
            .checked_add(amount)
            .ok_or(VestaError::ArithmeticOverflow)?;
        self.balances.insert(*to, balance);
        Ok(())
    }

    /// Every nonzero balance, ordered by address.
    pub fn balances(&self) -> impl Iterator<Item = (&Address, &Amount)> {
        self.balances.iter().filter(|(_, amount)| !amount.is_zero())
    }
}

impl AssetLedger for SimLedger {
    fn balance_of(&self, owner: &Address) -> Amount {
        self.balances.get(owner).copied().unwrap_or_default()
    }

    fn transfer(&mut self, from: &Address, to: &Address, amount: Amount) -> Result<(), LedgerError> {
        if amount.is_zero() || from == to {
            return Ok(());
        }
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
