//! # vesta-node — Deployment, storage, and scenario replay.
//!
//! Composes the Vesta engines into a runnable deployment:
//! - [`storage::StateDb`] — RocksDB database with a column family per engine
//! - [`ledger::SimLedger`] — deterministic clock, blocks, and token balances
//! - [`node::Deployment`] — escrow plus distributor wired to a ledger
//! - [`config::NodeConfig`] — node configuration

pub mod config;
pub mod ledger;
pub mod node;
pub mod storage;

pub use config::{LogFormat, NodeConfig};
pub use ledger::SimLedger;
pub use node::{Deployment, Report, Scenario, Step};
pub use storage::{RocksStore, StateDb};
