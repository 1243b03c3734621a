//! Deployment composition and scenario replay.
//!
//! A [`Deployment`] wires a [`VoteEscrow`] and a [`RewardDistributor`] to a
//! [`SimLedger`]. [`Scenario`] files describe the initial token balances and
//! an ordered list of [`Step`]s; [`Deployment::run`] replays them and reports
//! what each step did. Rejected steps are recorded, not fatal.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use vesta_core::error::VestaError;
use vesta_core::fixed::Amount;
use vesta_core::store::StateStore;
use vesta_core::traits::AssetLedger;
use vesta_core::types::{Address, LockedBalance, Timestamp};
use vesta_escrow::VoteEscrow;
use vesta_rewards::{DistributorConfig, DistributorState, RewardDistributor};

use crate::ledger::{DEFAULT_BLOCK_TIME, SimLedger};

/// Ledger address of the locked token.
pub const TOKEN: Address = system_address(0x01);
/// Ledger address holding escrowed deposits.
pub const ESCROW: Address = system_address(0x02);
/// Ledger address holding undistributed rewards.
pub const DISTRIBUTOR: Address = system_address(0x03);

const fn system_address(tag: u8) -> Address {
    let mut bytes = [0u8; 20];
    bytes[0] = 0xff;
    bytes[19] = tag;
    Address(bytes)
}

fn default_block_time() -> u64 {
    DEFAULT_BLOCK_TIME
}

/// An initial token allocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mint {
    pub account: Address,
    pub amount: Amount,
}

/// A replayable deployment script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scenario {
    /// Timestamp of the deployment block.
    pub genesis_time: Timestamp,
    #[serde(default = "default_block_time")]
    pub block_time: u64,
    /// Distributor controller.
    pub controller: Address,
    /// Receives the distributor balance on kill; defaults to the controller.
    #[serde(default)]
    pub emergency_return: Option<Address>,
    /// First rewarded week; defaults to the genesis time.
    #[serde(default)]
    pub start_time: Option<Timestamp>,
    #[serde(default)]
    pub mint: Vec<Mint>,
    #[serde(default)]
    pub steps: Vec<Step>,
}

/// One scripted call. Steps run in the current block; only `mine` and
/// `advance` move the chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Step {
    /// Produce one block.
    Mine,
    /// Produce one block `seconds` later.
    Advance { seconds: u64 },
    /// Lock until `now + duration`.
    CreateLock {
        account: Address,
        amount: Amount,
        duration: u64,
        #[serde(default)]
        auto_cooldown: bool,
    },
    IncreaseAmount { account: Address, amount: Amount },
    /// Extend the lock to `now + duration`.
    IncreaseUnlockTime { account: Address, duration: u64 },
    DepositFor { payer: Address, account: Address, amount: Amount },
    InitiateCooldown { account: Address },
    Withdraw { account: Address },
    Checkpoint,
    /// Controller enables reward checkpointing.
    EnableRewards,
    AddRewards { from: Address, amount: Amount },
    /// Send tokens straight to the distributor, bypassing `add_rewards`.
    Donate { from: Address, amount: Amount },
    CheckpointToken,
    Claim {
        account: Address,
        #[serde(default)]
        restake: bool,
    },
    /// Controller kills the distributor.
    Kill,
}

impl Step {
    pub fn name(&self) -> &'static str {
        match self {
            Step::Mine => "mine",
            Step::Advance { .. } => "advance",
            Step::CreateLock { .. } => "create_lock",
            Step::IncreaseAmount { .. } => "increase_amount",
            Step::IncreaseUnlockTime { .. } => "increase_unlock_time",
            Step::DepositFor { .. } => "deposit_for",
            Step::InitiateCooldown { .. } => "initiate_cooldown",
            Step::Withdraw { .. } => "withdraw",
            Step::Checkpoint => "checkpoint",
            Step::EnableRewards => "enable_rewards",
            Step::AddRewards { .. } => "add_rewards",
            Step::Donate { .. } => "donate",
            Step::CheckpointToken => "checkpoint_token",
            Step::Claim { .. } => "claim",
            Step::Kill => "kill",
        }
    }
}

/// Result of one replayed step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepOutcome {
    pub index: usize,
    pub op: &'static str,
    pub ts: Timestamp,
    pub block: u64,
    pub ok: bool,
    /// Returned amount or error message.
    pub detail: String,
}

/// Per-account view at the end of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountSummary {
    pub account: Address,
    pub balance: Amount,
    pub voting_power: Amount,
    pub locked: LockedBalance,
    pub claimable: Amount,
}

/// Engine state at the end of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub ts: Timestamp,
    pub block: u64,
    pub epoch: u64,
    pub total_supply: Amount,
    pub escrowed: Amount,
    pub accounts: Vec<AccountSummary>,
    pub distributor: DistributorState,
}

/// Everything a run produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Report {
    pub outcomes: Vec<StepOutcome>,
    pub summary: Summary,
}

/// Escrow, distributor, and the ledger they run on.
pub struct Deployment<S: StateStore> {
    pub ledger: SimLedger,
    pub escrow: VoteEscrow<S>,
    pub distributor: RewardDistributor<S>,
    controller: Address,
    accounts: Vec<Address>,
}

impl<S: StateStore> Deployment<S> {
    /// Initialise both engines and mint the scenario's balances.
    pub fn deploy(
        escrow_store: S,
        rewards_store: S,
        scenario: &Scenario,
        version: &str,
    ) -> Result<Self, VestaError> {
        let mut ledger = SimLedger::new(scenario.genesis_time, scenario.block_time);
        let block = ledger.block();
        let escrow = VoteEscrow::initialize(escrow_store, TOKEN, ESCROW, version, &block)?;
        let config = DistributorConfig {
            token: TOKEN,
            address: DISTRIBUTOR,
            controller: scenario.controller,
            emergency_return: scenario.emergency_return.unwrap_or(scenario.controller),
            start_time: scenario.start_time.unwrap_or(scenario.genesis_time),
        };
        let distributor = RewardDistributor::initialize(rewards_store, config, &block)?;

        let mut accounts = Vec::new();
        for grant in &scenario.mint {
            ledger.mint(&grant.account, grant.amount)?;
            if !accounts.contains(&grant.account) {
                accounts.push(grant.account);
            }
        }

        info!(
            genesis_time = scenario.genesis_time,
            accounts = accounts.len(),
            steps = scenario.steps.len(),
            "deployment ready"
        );
        Ok(Self {
            ledger,
            escrow,
            distributor,
            controller: scenario.controller,
            accounts,
        })
    }

    /// Replay `steps` in order.
    pub fn run(&mut self, steps: &[Step]) -> Vec<StepOutcome> {
        steps
            .iter()
            .enumerate()
            .map(|(index, step)| {
                let block = self.ledger.block();
                let result = self.apply(step);
                let (ok, detail) = match result {
                    Ok(detail) => {
                        debug!(index, op = step.name(), %detail, "step applied");
                        (true, detail)
                    }
                    Err(e) => {
                        warn!(index, op = step.name(), error = %e, "step rejected");
                        (false, e.to_string())
                    }
                };
                StepOutcome {
                    index,
                    op: step.name(),
                    ts: block.timestamp,
                    block: block.number,
                    ok,
                    detail,
                }
            })
            .collect()
    }

    /// Apply one step and describe its effect.
    pub fn apply(&mut self, step: &Step) -> Result<String, VestaError> {
        let now = self.ledger.now();
        match step {
            Step::Mine => {
                self.ledger.mine();
                Ok(format!("block {}", self.ledger.block().number))
            }
            Step::Advance { seconds } => {
                self.ledger.advance(*seconds);
                Ok(format!("ts {}", self.ledger.now()))
            }
            Step::CreateLock {
                account,
                amount,
                duration,
                auto_cooldown,
            } => {
                let ctx = self.ledger.context(*account);
                let unlock_time = now.saturating_add(*duration);
                self.escrow
                    .create_lock(&ctx, *amount, unlock_time, *auto_cooldown, &mut self.ledger)?;
                Ok(format!("locked {amount} until {}", self.escrow.locked_end(account)?))
            }
            Step::IncreaseAmount { account, amount } => {
                let ctx = self.ledger.context(*account);
                self.escrow.increase_amount(&ctx, *amount, &mut self.ledger)?;
                Ok(format!("locked {}", self.escrow.locked(account)?.amount))
            }
            Step::IncreaseUnlockTime { account, duration } => {
                let ctx = self.ledger.context(*account);
                self.escrow
                    .increase_unlock_time(&ctx, now.saturating_add(*duration))?;
                Ok(format!("unlock at {}", self.escrow.locked_end(account)?))
            }
            Step::DepositFor { payer, account, amount } => {
                let ctx = self.ledger.context(*payer);
                self.escrow
                    .deposit_for(&ctx, payer, account, *amount, &mut self.ledger)?;
                Ok(format!("locked {}", self.escrow.locked(account)?.amount))
            }
            Step::InitiateCooldown { account } => {
                let ctx = self.ledger.context(*account);
                self.escrow.initiate_cooldown(&ctx)?;
                Ok(format!("cooldown ends {}", self.escrow.locked(account)?.cooldown_end))
            }
            Step::Withdraw { account } => {
                let ctx = self.ledger.context(*account);
                let amount = self.escrow.withdraw(&ctx, &mut self.ledger)?;
                Ok(format!("withdrew {amount}"))
            }
            Step::Checkpoint => {
                let ctx = self.ledger.context(self.controller);
                self.escrow.checkpoint(&ctx)?;
                Ok(format!("epoch {}", self.escrow.epoch()?))
            }
            Step::EnableRewards => {
                let ctx = self.ledger.context(self.controller);
                self.distributor.toggle_allow_checkpoint_reward(&ctx)?;
                Ok("enabled".to_string())
            }
            Step::AddRewards { from, amount } => {
                let ctx = self.ledger.context(*from);
                self.distributor
                    .add_rewards(&ctx, *amount, &mut self.escrow, &mut self.ledger)?;
                Ok(format!("added {amount}"))
            }
            Step::Donate { from, amount } => {
                self.ledger.transfer(from, &DISTRIBUTOR, *amount)?;
                Ok(format!("sent {amount}"))
            }
            Step::CheckpointToken => {
                let ctx = self.ledger.context(self.controller);
                self.distributor
                    .checkpoint_token(&ctx, &mut self.escrow, &self.ledger)?;
                let week = self
                    .distributor
                    .last_checkpointed_week()
                    .map_or_else(|| "none".to_string(), |w| w.to_string());
                Ok(format!("last week {week}"))
            }
            Step::Claim { account, restake } => {
                let ctx = self.ledger.context(*account);
                let amount = self.distributor.claim(
                    &ctx,
                    account,
                    *restake,
                    &mut self.escrow,
                    &mut self.ledger,
                )?;
                Ok(format!("claimed {amount}"))
            }
            Step::Kill => {
                let ctx = self.ledger.context(self.controller);
                let amount = self.distributor.kill(&ctx, &mut self.ledger)?;
                Ok(format!("returned {amount}"))
            }
        }
    }

    /// Snapshot of balances, locks and supply at the current block.
    pub fn summary(&self) -> Result<Summary, VestaError> {
        let now = self.ledger.now();
        let mut accounts = Vec::with_capacity(self.accounts.len());
        for account in &self.accounts {
            accounts.push(AccountSummary {
                account: *account,
                balance: self.ledger.balance_of(account),
                voting_power: self.escrow.balance_of(account, now)?,
                locked: self.escrow.locked(account)?,
                claimable: self.distributor.compute_rewards(account, now, &self.escrow)?,
            });
        }
        Ok(Summary {
            ts: now,
            block: self.ledger.block().number,
            epoch: self.escrow.epoch()?,
            total_supply: self.escrow.total_supply(now)?,
            escrowed: self.ledger.balance_of(&ESCROW),
            accounts,
            distributor: self.distributor.state().clone(),
        })
    }

    /// Deploy, replay every step, and summarise.
    pub fn execute(
        escrow_store: S,
        rewards_store: S,
        scenario: &Scenario,
        version: &str,
    ) -> Result<Report, VestaError> {
        let mut deployment = Self::deploy(escrow_store, rewards_store, scenario, version)?;
        let outcomes = deployment.run(&scenario.steps);
        let summary = deployment.summary()?;
        let rejected = outcomes.iter().filter(|o| !o.ok).count();
        info!(steps = outcomes.len(), rejected, total_supply = %summary.total_supply, "scenario finished");
        Ok(Report { outcomes, summary })
    }
}
