//! Shared test helpers for E2E and property tests.

use vesta_core::constants::WEEK;
use vesta_core::error::VestaError;
use vesta_core::fixed::Amount;
use vesta_core::store::MemoryStore;
use vesta_core::traits::AssetLedger;
use vesta_core::types::{Address, Timestamp};
use vesta_node::ledger::SimLedger;
use vesta_node::node::{Deployment, Mint, Scenario};

/// Week-aligned deployment time.
pub const T0: Timestamp = 2_600 * WEEK;

/// Distributor controller; funds reward deposits.
pub const CONTROLLER: Address = Address([0xc0; 20]);

/// Balance minted to every test account.
pub const STARTING_BALANCE: u64 = 1_000_000;

/// Deterministic account address from a seed byte.
pub fn addr(seed: u8) -> Address {
    Address([seed; 20])
}

pub fn tokens(n: u64) -> Amount {
    Amount::from_tokens(n)
}

pub type TestDeployment = Deployment<MemoryStore>;

/// In-memory deployment at `T0` with `accounts` and the controller funded.
pub fn deploy(accounts: &[Address]) -> TestDeployment {
    let mut mint: Vec<Mint> = accounts
        .iter()
        .map(|a| Mint { account: *a, amount: tokens(STARTING_BALANCE) })
        .collect();
    mint.push(Mint { account: CONTROLLER, amount: tokens(STARTING_BALANCE) });
    let scenario = Scenario {
        genesis_time: T0,
        block_time: 12,
        controller: CONTROLLER,
        emergency_return: None,
        start_time: None,
        mint,
        steps: vec![],
    };
    match Deployment::deploy(MemoryStore::new(), MemoryStore::new(), &scenario, "test") {
        Ok(d) => d,
        Err(e) => panic!("test deployment failed: {e}"),
    }
}

/// Lock `amount` for `account` until `now + duration`.
pub fn create_lock(
    d: &mut TestDeployment,
    account: Address,
    amount: Amount,
    duration: u64,
    auto_cooldown: bool,
) -> Result<(), VestaError> {
    let ctx = d.ledger.context(account);
    let unlock = ctx.now() + duration;
    d.escrow.create_lock(&ctx, amount, unlock, auto_cooldown, &mut d.ledger)
}

/// Enable rewards and deposit `amount` from the controller.
pub fn fund_rewards(d: &mut TestDeployment, amount: Amount) -> Result<(), VestaError> {
    let ctx = d.ledger.context(CONTROLLER);
    if !d.distributor.state().allow_checkpoint_reward {
        d.distributor.toggle_allow_checkpoint_reward(&ctx)?;
    }
    d.distributor.add_rewards(&ctx, amount, &mut d.escrow, &mut d.ledger)
}

/// Claim for `account`, called by `account`.
pub fn claim(d: &mut TestDeployment, account: Address, restake: bool) -> Result<Amount, VestaError> {
    let ctx = d.ledger.context(account);
    d.distributor
        .claim(&ctx, &account, restake, &mut d.escrow, &mut d.ledger)
}

/// Run `checkpoint_token` as the controller.
pub fn checkpoint_token(d: &mut TestDeployment) -> Result<(), VestaError> {
    let ctx = d.ledger.context(CONTROLLER);
    d.distributor.checkpoint_token(&ctx, &mut d.escrow, &d.ledger)
}

/// Sum of voting power over `accounts` at `t`.
pub fn power_sum(d: &TestDeployment, accounts: &[Address], t: Timestamp) -> Amount {
    accounts.iter().fold(Amount::ZERO, |acc, a| {
        let power = d.escrow.balance_of_at(a, t).unwrap_or(Amount::ZERO);
        acc.saturating_add(power)
    })
}

/// Everything a call could mutate.
pub type Snapshot = (MemoryStore, MemoryStore, SimLedger);

pub fn snapshot(d: &TestDeployment) -> Snapshot {
    (
        d.escrow.store().clone(),
        d.distributor.store().clone(),
        d.ledger.clone(),
    )
}

/// Sum of all ledger balances, system accounts included.
pub fn ledger_total(ledger: &SimLedger) -> u128 {
    ledger.balances().map(|(_, a)| a.raw()).sum()
}

/// Balance of `owner` on the deployment's ledger.
pub fn balance(d: &TestDeployment, owner: &Address) -> Amount {
    d.ledger.balance_of(owner)
}
