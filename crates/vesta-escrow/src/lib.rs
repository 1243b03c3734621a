//! # vesta-escrow — Vote-escrow lock manager.
//!
//! All calculations use integer arithmetic only for determinism.
//!
//! - **Linear decay curve**: a lock of `amount` ending at `end` carries
//!   `amount / MAX_TIME * (end - now)` voting power, reaching zero at `end`.
//! - **Checkpoint logs**: global and per-account point histories addressed by
//!   epoch, searched by time with a binary search.
//! - **Slope-change schedule**: pending global slope decreases keyed by week
//!   boundary, so total supply is replayed without scanning accounts.
//! - **Lock lifecycle**: create, top up, extend, cooldown, withdraw.

pub mod curve;
pub mod escrow;
pub mod history;

pub use escrow::{EscrowConfig, VoteEscrow};
pub use history::{LockChange, PointLog, find_epoch};
