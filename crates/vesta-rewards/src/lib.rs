//! # vesta-rewards — Weekly reward distributor.
//!
//! Rewards are bucketed into week-aligned [`RewardEpoch`]s. Each completed
//! week pays every account `balance_at(week) * tokens / supply_at(week)`,
//! read from any [`VotingPowerSource`].
//!
//! [`RewardEpoch`]: vesta_core::types::RewardEpoch
//! [`VotingPowerSource`]: vesta_core::traits::VotingPowerSource

pub mod distributor;

pub use distributor::{DistributorConfig, DistributorState, RewardDistributor};
